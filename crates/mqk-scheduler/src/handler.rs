use async_trait::async_trait;

/// Injected behavior for a registered job. Stored only in the in-process
/// registry — never persisted. The durable row carries schedule/lease state
/// only (see `JobStore`).
#[async_trait]
pub trait JobHandler: Send + Sync {
    async fn run(&self) -> anyhow::Result<()>;
}

#[async_trait]
impl<F, Fut> JobHandler for F
where
    F: Fn() -> Fut + Send + Sync,
    Fut: std::future::Future<Output = anyhow::Result<()>> + Send,
{
    async fn run(&self) -> anyhow::Result<()> {
        (self)().await
    }
}
