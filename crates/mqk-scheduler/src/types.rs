use chrono::{DateTime, Utc};
use chrono_tz::Tz;

#[derive(Debug, Clone)]
pub enum ScheduleKind {
    Interval { period_ms: i64 },
    Daily { hour: u32, minute: u32, tz: Tz },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStatus {
    Idle,
    Running,
    Success,
    Failed,
}

impl JobStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Idle => "idle",
            JobStatus::Running => "running",
            JobStatus::Success => "success",
            JobStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "idle" => Some(JobStatus::Idle),
            "running" => Some(JobStatus::Running),
            "success" => Some(JobStatus::Success),
            "failed" => Some(JobStatus::Failed),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct JobDefinition {
    pub name: String,
    pub schedule: ScheduleKind,
    pub lease_ms: i64,
}

#[derive(Debug, Clone)]
pub struct JobRow {
    pub name: String,
    pub status: JobStatus,
    pub next_run_at: DateTime<Utc>,
    pub last_run_at: Option<DateTime<Utc>>,
    pub consecutive_failures: i64,
    pub lock_owner: Option<String>,
    pub lock_expires_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    #[error("job {0} is not registered")]
    UnknownJob(String),
    #[error("interval must be > 0")]
    InvalidInterval,
    #[error(transparent)]
    Store(#[from] anyhow::Error),
}
