use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::types::{JobDefinition, JobRow, JobStatus};

/// Persistence boundary for job rows. `try_acquire_lease` is the sole
/// cross-process coordination primitive (§5): it must be a single atomic
/// compare-and-set at the store layer.
#[async_trait]
pub trait JobStore: Send + Sync {
    async fn upsert_definition(&self, def: &JobDefinition, initial_next_run: DateTime<Utc>) -> anyhow::Result<()>;
    async fn get(&self, name: &str) -> anyhow::Result<Option<JobRow>>;
    async fn list(&self) -> anyhow::Result<Vec<JobRow>>;

    /// Atomically claim `name` if due and unowned/expired. On success the row
    /// is updated to `running` with the given owner and lock expiry.
    async fn try_acquire_lease(
        &self,
        name: &str,
        owner: &str,
        now: DateTime<Utc>,
        lock_expires_at: DateTime<Utc>,
    ) -> anyhow::Result<bool>;

    async fn mark_success(&self, name: &str, next_run_at: DateTime<Utc>, now: DateTime<Utc>) -> anyhow::Result<()>;

    async fn mark_failed(
        &self,
        name: &str,
        next_run_at: DateTime<Utc>,
        now: DateTime<Utc>,
        error: &str,
    ) -> anyhow::Result<()>;

    /// Demote any `running` row whose lease has expired to `failed`,
    /// incrementing its failure counter and clearing the lock. Returns the
    /// names recovered.
    async fn recover_expired(&self, now: DateTime<Utc>) -> anyhow::Result<Vec<String>>;

    /// Push `next_run_at` far into the future and clear any lock, so the job
    /// stops firing without deleting its row or losing its failure history.
    /// Re-registration via `upsert_definition` never resets `next_run_at`, so
    /// a canceled job stays canceled until explicitly rescheduled.
    async fn cancel(&self, name: &str, now: DateTime<Utc>) -> anyhow::Result<bool>;

    /// Pull `next_run_at` back to `now` (without touching an in-flight lock),
    /// so the next tick of any process considers the job due regardless of
    /// its normal schedule. This is how an externally-triggered scan is
    /// expressed without a second coordination channel.
    async fn force_due(&self, name: &str, now: DateTime<Utc>) -> anyhow::Result<bool>;
}

/// In-memory store for tests and single-process demos. Not a substitute for
/// `PgJobStore` in multi-process deployments — there is no cross-process
/// coordination here at all.
#[derive(Default)]
pub struct InMemoryJobStore {
    rows: Mutex<HashMap<String, JobRow>>,
}

#[async_trait]
impl JobStore for InMemoryJobStore {
    async fn upsert_definition(&self, def: &JobDefinition, initial_next_run: DateTime<Utc>) -> anyhow::Result<()> {
        let mut rows = self.rows.lock().unwrap();
        rows.entry(def.name.clone()).or_insert_with(|| JobRow {
            name: def.name.clone(),
            status: JobStatus::Idle,
            next_run_at: initial_next_run,
            last_run_at: None,
            consecutive_failures: 0,
            lock_owner: None,
            lock_expires_at: None,
            last_error: None,
        });
        Ok(())
    }

    async fn get(&self, name: &str) -> anyhow::Result<Option<JobRow>> {
        Ok(self.rows.lock().unwrap().get(name).cloned())
    }

    async fn list(&self) -> anyhow::Result<Vec<JobRow>> {
        Ok(self.rows.lock().unwrap().values().cloned().collect())
    }

    async fn try_acquire_lease(
        &self,
        name: &str,
        owner: &str,
        now: DateTime<Utc>,
        lock_expires_at: DateTime<Utc>,
    ) -> anyhow::Result<bool> {
        let mut rows = self.rows.lock().unwrap();
        let Some(row) = rows.get_mut(name) else {
            return Ok(false);
        };
        let due = row.next_run_at <= now;
        let unowned = row.lock_expires_at.map(|exp| exp <= now).unwrap_or(true);
        if due && unowned {
            row.status = JobStatus::Running;
            row.lock_owner = Some(owner.to_string());
            row.lock_expires_at = Some(lock_expires_at);
            Ok(true)
        } else {
            Ok(false)
        }
    }

    async fn mark_success(&self, name: &str, next_run_at: DateTime<Utc>, now: DateTime<Utc>) -> anyhow::Result<()> {
        let mut rows = self.rows.lock().unwrap();
        if let Some(row) = rows.get_mut(name) {
            row.status = JobStatus::Success;
            row.next_run_at = next_run_at;
            row.last_run_at = Some(now);
            row.consecutive_failures = 0;
            row.lock_owner = None;
            row.lock_expires_at = None;
            row.last_error = None;
        }
        Ok(())
    }

    async fn mark_failed(
        &self,
        name: &str,
        next_run_at: DateTime<Utc>,
        now: DateTime<Utc>,
        error: &str,
    ) -> anyhow::Result<()> {
        let mut rows = self.rows.lock().unwrap();
        if let Some(row) = rows.get_mut(name) {
            row.status = JobStatus::Failed;
            row.next_run_at = next_run_at;
            row.last_run_at = Some(now);
            row.consecutive_failures += 1;
            row.lock_owner = None;
            row.lock_expires_at = None;
            row.last_error = Some(error.to_string());
        }
        Ok(())
    }

    async fn recover_expired(&self, now: DateTime<Utc>) -> anyhow::Result<Vec<String>> {
        let mut rows = self.rows.lock().unwrap();
        let mut recovered = Vec::new();
        for row in rows.values_mut() {
            if row.status == JobStatus::Running {
                if row.lock_expires_at.map(|exp| exp <= now).unwrap_or(false) {
                    row.status = JobStatus::Failed;
                    row.consecutive_failures += 1;
                    row.lock_owner = None;
                    row.lock_expires_at = None;
                    row.last_error = Some("recovered: lease expired without completion".to_string());
                    recovered.push(row.name.clone());
                }
            }
        }
        Ok(recovered)
    }

    async fn cancel(&self, name: &str, now: DateTime<Utc>) -> anyhow::Result<bool> {
        let mut rows = self.rows.lock().unwrap();
        let Some(row) = rows.get_mut(name) else {
            return Ok(false);
        };
        row.next_run_at = far_future(now);
        row.lock_owner = None;
        row.lock_expires_at = None;
        Ok(true)
    }

    async fn force_due(&self, name: &str, now: DateTime<Utc>) -> anyhow::Result<bool> {
        let mut rows = self.rows.lock().unwrap();
        let Some(row) = rows.get_mut(name) else {
            return Ok(false);
        };
        row.next_run_at = now;
        Ok(true)
    }
}

/// A decade out is far enough that no real scheduler loop will ever observe
/// this job as due again without an explicit reschedule.
fn far_future(now: DateTime<Utc>) -> DateTime<Utc> {
    now + chrono::Duration::days(3650)
}

/// Postgres-backed store against the `scheduler_jobs` table (see
/// `mqk-db`'s migrations). The lease acquisition mirrors the
/// `FOR UPDATE SKIP LOCKED` claim-batch pattern `mqk-db::outbox_claim_batch`
/// already uses, narrowed to a single-row compare-and-set.
pub struct PgJobStore {
    pool: sqlx::PgPool,
}

impl PgJobStore {
    pub fn new(pool: sqlx::PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl JobStore for PgJobStore {
    async fn upsert_definition(&self, def: &JobDefinition, initial_next_run: DateTime<Utc>) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            insert into scheduler_jobs (name, status, next_run_at, consecutive_failures)
            values ($1, 'idle', $2, 0)
            on conflict (name) do nothing
            "#,
        )
        .bind(&def.name)
        .bind(initial_next_run)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get(&self, name: &str) -> anyhow::Result<Option<JobRow>> {
        let row = sqlx::query_as::<_, JobRowSql>(
            r#"select name, status, next_run_at, last_run_at, consecutive_failures,
                      lock_owner, lock_expires_at, last_error
               from scheduler_jobs where name = $1"#,
        )
        .bind(name)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(Into::into))
    }

    async fn list(&self) -> anyhow::Result<Vec<JobRow>> {
        let rows = sqlx::query_as::<_, JobRowSql>(
            r#"select name, status, next_run_at, last_run_at, consecutive_failures,
                      lock_owner, lock_expires_at, last_error
               from scheduler_jobs order by name"#,
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn try_acquire_lease(
        &self,
        name: &str,
        owner: &str,
        now: DateTime<Utc>,
        lock_expires_at: DateTime<Utc>,
    ) -> anyhow::Result<bool> {
        let result = sqlx::query(
            r#"
            update scheduler_jobs
               set status = 'running', lock_owner = $2, lock_expires_at = $4
             where name = $1
               and next_run_at <= $3
               and (lock_expires_at is null or lock_expires_at <= $3)
            "#,
        )
        .bind(name)
        .bind(owner)
        .bind(now)
        .bind(lock_expires_at)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn mark_success(&self, name: &str, next_run_at: DateTime<Utc>, now: DateTime<Utc>) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            update scheduler_jobs
               set status = 'success', next_run_at = $2, last_run_at = $3,
                   consecutive_failures = 0, lock_owner = null, lock_expires_at = null,
                   last_error = null
             where name = $1
            "#,
        )
        .bind(name)
        .bind(next_run_at)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn mark_failed(
        &self,
        name: &str,
        next_run_at: DateTime<Utc>,
        now: DateTime<Utc>,
        error: &str,
    ) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            update scheduler_jobs
               set status = 'failed', next_run_at = $2, last_run_at = $3,
                   consecutive_failures = consecutive_failures + 1,
                   lock_owner = null, lock_expires_at = null, last_error = $4
             where name = $1
            "#,
        )
        .bind(name)
        .bind(next_run_at)
        .bind(now)
        .bind(error)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn recover_expired(&self, now: DateTime<Utc>) -> anyhow::Result<Vec<String>> {
        let rows = sqlx::query_as::<_, (String,)>(
            r#"
            update scheduler_jobs
               set status = 'failed',
                   consecutive_failures = consecutive_failures + 1,
                   lock_owner = null, lock_expires_at = null,
                   last_error = 'recovered: lease expired without completion'
             where status = 'running'
               and lock_expires_at <= $1
            returning name
            "#,
        )
        .bind(now)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(|(n,)| n).collect())
    }

    async fn cancel(&self, name: &str, now: DateTime<Utc>) -> anyhow::Result<bool> {
        let result = sqlx::query(
            r#"
            update scheduler_jobs
               set next_run_at = $2, lock_owner = null, lock_expires_at = null
             where name = $1
            "#,
        )
        .bind(name)
        .bind(far_future(now))
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn force_due(&self, name: &str, now: DateTime<Utc>) -> anyhow::Result<bool> {
        let result = sqlx::query("update scheduler_jobs set next_run_at = $2 where name = $1")
            .bind(name)
            .bind(now)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() == 1)
    }
}

#[derive(sqlx::FromRow)]
struct JobRowSql {
    name: String,
    status: String,
    next_run_at: DateTime<Utc>,
    last_run_at: Option<DateTime<Utc>>,
    consecutive_failures: i64,
    lock_owner: Option<String>,
    lock_expires_at: Option<DateTime<Utc>>,
    last_error: Option<String>,
}

impl From<JobRowSql> for JobRow {
    fn from(r: JobRowSql) -> Self {
        JobRow {
            name: r.name,
            status: JobStatus::parse(&r.status).unwrap_or(JobStatus::Idle),
            next_run_at: r.next_run_at,
            last_run_at: r.last_run_at,
            consecutive_failures: r.consecutive_failures,
            lock_owner: r.lock_owner,
            lock_expires_at: r.lock_expires_at,
            last_error: r.last_error,
        }
    }
}
