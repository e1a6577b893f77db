use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use chrono::{Duration as ChronoDuration, TimeZone, Utc};
use mqk_scheduler::{InMemoryJobStore, JobDefinition, JobHandler, JobStatus, JobStore, ScheduleKind, Scheduler};

fn now() -> chrono::DateTime<chrono::Utc> {
    Utc.timestamp_opt(1_700_000_000, 0).unwrap()
}

struct CountingHandler(Arc<AtomicUsize>);

#[async_trait::async_trait]
impl JobHandler for CountingHandler {
    async fn run(&self) -> anyhow::Result<()> {
        self.0.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[tokio::test]
async fn s5_lease_recovery_then_single_run() {
    let store = Arc::new(InMemoryJobStore::default());
    let def = JobDefinition {
        name: "discovery_scan".into(),
        schedule: ScheduleKind::Interval { period_ms: 60_000 },
        lease_ms: 30_000,
    };
    store.upsert_definition(&def, now() - ChronoDuration::seconds(2)).await.unwrap();
    // Simulate a crashed prior run: running, lease expired a second ago.
    store
        .try_acquire_lease("discovery_scan", "dead-owner", now() - ChronoDuration::seconds(40), now() - ChronoDuration::seconds(1))
        .await
        .unwrap();

    let scheduler = Scheduler::new(store.clone(), "owner-a");
    let recovered = scheduler.recover_at_startup(now()).await.unwrap();
    assert_eq!(recovered, vec!["discovery_scan".to_string()]);

    let row = store.get("discovery_scan").await.unwrap().unwrap();
    assert_eq!(row.status, JobStatus::Failed);
    assert_eq!(row.consecutive_failures, 1);
    assert!(row.lock_owner.is_none());

    let runs = Arc::new(AtomicUsize::new(0));
    scheduler
        .register_job(def, Arc::new(CountingHandler(runs.clone())), now())
        .await
        .unwrap();
    scheduler.tick(now()).await.unwrap();
    assert_eq!(runs.load(Ordering::SeqCst), 1);

    let row = store.get("discovery_scan").await.unwrap().unwrap();
    assert_eq!(row.status, JobStatus::Success);
    assert!(row.next_run_at > now());
}

#[tokio::test]
async fn lease_mutual_exclusion_across_two_acquirers() {
    let store = Arc::new(InMemoryJobStore::default());
    let def = JobDefinition {
        name: "heartbeat".into(),
        schedule: ScheduleKind::Interval { period_ms: 30_000 },
        lease_ms: 10_000,
    };
    store.upsert_definition(&def, now() - ChronoDuration::seconds(1)).await.unwrap();

    let lock_expiry = now() + ChronoDuration::seconds(10);
    let first = store.try_acquire_lease("heartbeat", "proc-a", now(), lock_expiry).await.unwrap();
    let second = store.try_acquire_lease("heartbeat", "proc-b", now(), lock_expiry).await.unwrap();

    assert!(first);
    assert!(!second, "a second acquirer must not win the same due job's lease");
}

#[tokio::test]
async fn next_run_is_monotone_after_success_and_failure() {
    let store = Arc::new(InMemoryJobStore::default());
    let def = JobDefinition {
        name: "j".into(),
        schedule: ScheduleKind::Interval { period_ms: 1_000 },
        lease_ms: 5_000,
    };
    store.upsert_definition(&def, now()).await.unwrap();
    let before = store.get("j").await.unwrap().unwrap().next_run_at;

    store.mark_failed("j", before + ChronoDuration::seconds(5), now(), "boom").await.unwrap();
    let after_fail = store.get("j").await.unwrap().unwrap().next_run_at;
    assert!(after_fail > before);

    store.mark_success("j", after_fail + ChronoDuration::seconds(5), now()).await.unwrap();
    let after_success = store.get("j").await.unwrap().unwrap().next_run_at;
    assert!(after_success > after_fail);
}

#[tokio::test]
async fn cancel_pushes_next_run_far_out_and_force_due_pulls_it_back() {
    let store = Arc::new(InMemoryJobStore::default());
    let def = JobDefinition {
        name: "discovery_scan".into(),
        schedule: ScheduleKind::Interval { period_ms: 60_000 },
        lease_ms: 30_000,
    };
    store.upsert_definition(&def, now() + ChronoDuration::seconds(60)).await.unwrap();

    assert!(store.cancel("discovery_scan", now()).await.unwrap());
    let row = store.get("discovery_scan").await.unwrap().unwrap();
    assert!(row.next_run_at > now() + ChronoDuration::days(365));

    assert!(store.force_due("discovery_scan", now()).await.unwrap());
    let row = store.get("discovery_scan").await.unwrap().unwrap();
    assert_eq!(row.next_run_at, now());

    assert!(!store.cancel("nonexistent", now()).await.unwrap());
    assert!(!store.force_due("nonexistent", now()).await.unwrap());
}
