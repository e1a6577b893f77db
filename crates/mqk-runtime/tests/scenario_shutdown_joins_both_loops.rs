use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use mqk_heartbeat::{
    AdvisoryOracle, ExecuteRequest, ExecuteResponse, Executor, HeartbeatConfig, HeartbeatSupervisor, OpenOrder,
    OpenPosition, PositionDataSource,
};
use mqk_runtime::Runtime;
use mqk_scheduler::{InMemoryJobStore, Scheduler};
use tokio::sync::Mutex;

struct NullExecutor;

#[async_trait]
impl Executor for NullExecutor {
    async fn execute(&self, _req: ExecuteRequest) -> anyhow::Result<ExecuteResponse> {
        Ok(ExecuteResponse {
            executed: false,
            message: "unused".to_string(),
        })
    }

    async fn cancel_order(&self, _symbol: &str, _order_id: &str) -> anyhow::Result<()> {
        Ok(())
    }

    async fn open_orders(&self, _symbol: &str) -> anyhow::Result<Vec<OpenOrder>> {
        Ok(Vec::new())
    }
}

struct EmptyPositions;

#[async_trait]
impl PositionDataSource for EmptyPositions {
    async fn open_positions(&self) -> anyhow::Result<Vec<OpenPosition>> {
        Ok(Vec::new())
    }

    async fn mids(&self) -> anyhow::Result<std::collections::HashMap<String, f64>> {
        Ok(std::collections::HashMap::new())
    }
}

struct UnusedOracle;

#[async_trait]
impl AdvisoryOracle for UnusedOracle {
    async fn decide(&self, _prompt: &str, _timeout_ms: u64) -> anyhow::Result<String> {
        unreachable!("no open positions means the oracle is never consulted")
    }
}

#[tokio::test]
async fn spawned_loops_stop_within_the_grace_period() {
    let store = Arc::new(InMemoryJobStore::default());
    let scheduler = Arc::new(Scheduler::new(store, "runtime-test"));

    let supervisor = Arc::new(Mutex::new(HeartbeatSupervisor::new(
        HeartbeatConfig {
            enabled: false,
            ..Default::default()
        },
        NullExecutor,
        EmptyPositions,
        UnusedOracle,
    )));

    let runtime = Runtime::spawn(
        scheduler,
        Duration::from_millis(10),
        supervisor,
        Duration::from_millis(10),
    );

    tokio::time::sleep(Duration::from_millis(30)).await;
    let result = runtime.shutdown(Duration::from_secs(2)).await;
    assert!(result.is_ok());
}

#[tokio::test]
async fn heartbeat_tick_is_a_no_op_while_disabled() {
    let mut supervisor = HeartbeatSupervisor::new(
        HeartbeatConfig {
            enabled: false,
            ..Default::default()
        },
        NullExecutor,
        EmptyPositions,
        UnusedOracle,
    );
    let records = supervisor.tick(Utc::now()).await;
    assert!(records.is_empty());
}
