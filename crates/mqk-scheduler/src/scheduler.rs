use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};

use crate::handler::JobHandler;
use crate::nextfire::{advance_next_run, initial_next_run};
use crate::store::JobStore;
use crate::types::{JobDefinition, SchedulerError};

/// Drives registered jobs against a `JobStore`. One `Scheduler` per process;
/// multiple processes may share the same store safely because the lease CAS
/// is the only coordination primitive (§5).
pub struct Scheduler<S: JobStore> {
    store: Arc<S>,
    owner_id: String,
    handlers: Mutex<HashMap<String, (JobDefinition, Arc<dyn JobHandler>)>>,
    tick_in_flight: AtomicBool,
    stop: Arc<tokio::sync::Notify>,
    stopped: AtomicBool,
}

impl<S: JobStore + 'static> Scheduler<S> {
    pub fn new(store: Arc<S>, owner_id: impl Into<String>) -> Self {
        Self {
            store,
            owner_id: owner_id.into(),
            handlers: Mutex::new(HashMap::new()),
            tick_in_flight: AtomicBool::new(false),
            stop: Arc::new(tokio::sync::Notify::new()),
            stopped: AtomicBool::new(false),
        }
    }

    /// Idempotent: re-registering only updates the handler reference, never
    /// the durable row's counters or `next_run_at`.
    pub async fn register_job(
        &self,
        def: JobDefinition,
        handler: Arc<dyn JobHandler>,
        now: DateTime<Utc>,
    ) -> Result<(), SchedulerError> {
        let initial = initial_next_run(&def, now)?;
        self.store.upsert_definition(&def, initial).await.map_err(SchedulerError::Store)?;
        self.handlers.lock().await.insert(def.name.clone(), (def, handler));
        Ok(())
    }

    /// Demotes any `running` row whose lease has already expired. Call once
    /// at process startup before the tick loop begins.
    pub async fn recover_at_startup(&self, now: DateTime<Utc>) -> Result<Vec<String>, SchedulerError> {
        let recovered = self.store.recover_expired(now).await.map_err(SchedulerError::Store)?;
        for name in &recovered {
            warn!(job = %name, "recovered expired lease at startup");
        }
        Ok(recovered)
    }

    /// Runs the polling loop until `stop()` is called, at `interval`.
    pub async fn run(self: Arc<Self>, interval: std::time::Duration) {
        let mut ticker = tokio::time::interval(interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.tick(Utc::now()).await {
                        warn!(error = %e, "scheduler tick failed");
                    }
                }
                _ = self.stop.notified() => {
                    info!("scheduler loop stopping");
                    break;
                }
            }
        }
        self.stopped.store(true, Ordering::SeqCst);
    }

    pub fn stop(&self) {
        self.stop.notify_one();
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    /// One scheduling pass: enumerate registered jobs, attempt lease
    /// acquisition on due ones, invoke handlers, record outcome.
    #[instrument(skip(self), name = "scheduler_tick")]
    pub async fn tick(&self, now: DateTime<Utc>) -> Result<(), SchedulerError> {
        if self
            .tick_in_flight
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            debug!("tick already in flight, skipping re-entrant call");
            return Ok(());
        }
        let result = self.tick_inner(now).await;
        self.tick_in_flight.store(false, Ordering::SeqCst);
        result
    }

    async fn tick_inner(&self, now: DateTime<Utc>) -> Result<(), SchedulerError> {
        let registry = self.handlers.lock().await;
        let jobs: Vec<(JobDefinition, Arc<dyn JobHandler>)> =
            registry.values().cloned().collect();
        drop(registry);

        for (def, handler) in jobs {
            let lease_expiry = now + ChronoDuration::milliseconds(def.lease_ms);
            let acquired = self
                .store
                .try_acquire_lease(&def.name, &self.owner_id, now, lease_expiry)
                .await
                .map_err(SchedulerError::Store)?;
            if !acquired {
                continue;
            }

            info!(job = %def.name, "lease acquired, invoking handler");
            let outcome = handler.run().await;
            let completed_at = Utc::now();
            let next_run = advance_next_run(&def, now, completed_at)?;

            match outcome {
                Ok(()) => {
                    self.store
                        .mark_success(&def.name, next_run, completed_at)
                        .await
                        .map_err(SchedulerError::Store)?;
                    info!(job = %def.name, next_run = %next_run, "job succeeded");
                }
                Err(e) => {
                    self.store
                        .mark_failed(&def.name, next_run, completed_at, &e.to_string())
                        .await
                        .map_err(SchedulerError::Store)?;
                    warn!(job = %def.name, error = %e, "job failed");
                }
            }
        }
        Ok(())
    }
}
