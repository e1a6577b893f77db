//! Process orchestrator: spawns the scheduler and heartbeat loops as
//! independent tasks and coordinates their shutdown.
//!
//! This mirrors the "small number of cooperative loops within one process"
//! scheduling model: the scheduler loop already owns its own interval/stop
//! primitive (`Scheduler::run`); the heartbeat loop does not, so it is wound
//! around `HeartbeatSupervisor::tick` here.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use mqk_heartbeat::{AdvisoryOracle, Executor, HeartbeatSupervisor, PositionDataSource};
use mqk_scheduler::{JobStore, Scheduler};
use tokio::sync::{Mutex, Notify};
use tokio::task::JoinHandle;
use tracing::{info, warn};

pub struct Runtime<S: JobStore + 'static> {
    scheduler: Arc<Scheduler<S>>,
    scheduler_handle: JoinHandle<()>,
    heartbeat_stop: Arc<Notify>,
    heartbeat_handle: JoinHandle<()>,
}

impl<S: JobStore + 'static> Runtime<S> {
    /// Spawns both loops. The scheduler loop polls at `scheduler_interval`
    /// (independent of any individual job's own schedule — this is just the
    /// tick cadence); the heartbeat loop polls at `heartbeat_interval`.
    pub fn spawn<E, D, O>(
        scheduler: Arc<Scheduler<S>>,
        scheduler_interval: Duration,
        heartbeat: Arc<Mutex<HeartbeatSupervisor<E, D, O>>>,
        heartbeat_interval: Duration,
    ) -> Self
    where
        E: Executor + 'static,
        D: PositionDataSource + 'static,
        O: AdvisoryOracle + 'static,
    {
        let scheduler_handle = {
            let s = scheduler.clone();
            tokio::spawn(async move { s.run(scheduler_interval).await })
        };

        let heartbeat_stop = Arc::new(Notify::new());
        let heartbeat_handle = {
            let stop = heartbeat_stop.clone();
            tokio::spawn(async move {
                let mut ticker = tokio::time::interval(heartbeat_interval);
                loop {
                    tokio::select! {
                        _ = ticker.tick() => {
                            let mut sup = heartbeat.lock().await;
                            let records = sup.tick(Utc::now()).await;
                            for record in records {
                                info!(?record, "heartbeat tick record");
                            }
                        }
                        _ = stop.notified() => {
                            info!("heartbeat loop stopping");
                            break;
                        }
                    }
                }
            })
        };

        Self {
            scheduler,
            scheduler_handle,
            heartbeat_stop,
            heartbeat_handle,
        }
    }

    /// Flips both loops' stop signals and waits up to `grace` for them to
    /// exit. A loop still mid-tick when this is called is allowed to finish
    /// that tick; only its next iteration is skipped.
    pub async fn shutdown(self, grace: Duration) -> anyhow::Result<()> {
        self.scheduler.stop();
        self.heartbeat_stop.notify_one();

        let joined = tokio::time::timeout(grace, async {
            let _ = self.scheduler_handle.await;
            let _ = self.heartbeat_handle.await;
        })
        .await;

        if joined.is_err() {
            warn!("runtime shutdown grace period elapsed before both loops exited");
        }
        Ok(())
    }
}
