pub mod backoff;
pub mod oracle;
pub mod ring;
pub mod supervisor;
pub mod triggers;
pub mod types;
pub mod validate;

pub use backoff::{classify_transport_error, retry_with_backoff, ErrorClass, RetryPolicy, SlidingHourRateLimiter};
pub use oracle::extract_action;
pub use ring::RingBuffer;
pub use supervisor::HeartbeatSupervisor;
pub use triggers::{evaluate_triggers, is_liquidation_emergency, is_pnl_emergency, CooldownMap};
pub use types::*;
pub use validate::validate_action;
