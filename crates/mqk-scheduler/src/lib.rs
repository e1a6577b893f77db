pub mod handler;
pub mod nextfire;
pub mod scheduler;
pub mod store;
pub mod types;

pub use handler::JobHandler;
pub use scheduler::Scheduler;
pub use store::{InMemoryJobStore, JobStore, PgJobStore};
pub use types::{JobDefinition, JobRow, JobStatus, ScheduleKind, SchedulerError};
