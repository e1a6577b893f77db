pub mod classify;
pub mod gates;
pub mod kelly;
pub mod mutator;
pub mod state;
pub mod types;

pub use classify::{
    classify_liquidity_bucket, classify_market_regime, classify_signal, classify_volatility_bucket,
    infer_signal_class_legacy, signal_class_allowed,
};
pub use gates::{global_trade_gate, news_entry_gate, GlobalTradeGateConfig, GlobalTradeGateInput, NewsGateConfig};
pub use kelly::fractional_kelly;
pub use mutator::{apply_adaptive_tightening, apply_observation_forcing, reflect, MutatorConfig};
pub use state::AutonomyPolicyState;
pub use types::*;
