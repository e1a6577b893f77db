pub mod policy;
pub mod store;
pub mod types;

pub use policy::{fingerprint, AlertDedupeTracker, AlertPolicyConfig, ChannelRouting, SendVerdict};
pub use store::AlertStore;
pub use types::*;
