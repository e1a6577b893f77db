use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MarketRegime {
    Trending,
    Choppy,
    HighVolExpansion,
    LowVolCompression,
}

impl MarketRegime {
    pub fn as_str(self) -> &'static str {
        match self {
            MarketRegime::Trending => "trending",
            MarketRegime::Choppy => "choppy",
            MarketRegime::HighVolExpansion => "high_vol_expansion",
            MarketRegime::LowVolCompression => "low_vol_compression",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalClass {
    MomentumBreakout,
    MeanReversion,
    LiquidationCascade,
    NewsEvent,
    Unknown,
}

impl SignalClass {
    pub fn as_str(self) -> &'static str {
        match self {
            SignalClass::MomentumBreakout => "momentum_breakout",
            SignalClass::MeanReversion => "mean_reversion",
            SignalClass::LiquidationCascade => "liquidation_cascade",
            SignalClass::NewsEvent => "news_event",
            SignalClass::Unknown => "unknown",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VolatilityBucket {
    High,
    Medium,
    Low,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LiquidityBucket {
    Deep,
    Normal,
    Thin,
}

/// One tagged primitive contributing to a signal cluster.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignalPrimitive {
    pub kind: String,
    pub metrics: BTreeMap<String, f64>,
    pub bias: f64,
}

/// Bundle of primitives feeding regime/bucket classification.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SignalCluster {
    pub trend: f64,
    pub vol_z: f64,
    pub orderflow_trade_count: u32,
    pub primitives: Vec<SignalPrimitive>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewsTrigger {
    pub enabled: bool,
    pub sources: Vec<String>,
    pub novelty: f64,
    pub confirmation: f64,
    pub liquidity: f64,
    pub volatility: f64,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Expression {
    pub hypothesis_id: String,
    pub symbol: String,
    pub side: Side,
    pub signal_class: Option<SignalClass>,
    pub confidence: f64,
    pub expected_edge: f64,
    pub leverage: i64,
    pub probe_size_micros: i64,
    pub news_trigger: Option<NewsTrigger>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Side {
    Long,
    Short,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TradeOutcome {
    Executed,
    Failed,
    Blocked,
    WouldTrade,
}

/// A single append-only journal row, as read back for gate evaluation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JournalEntry {
    pub signal_class: SignalClass,
    pub regime: MarketRegime,
    pub outcome: TradeOutcome,
    pub thesis_correct: Option<bool>,
    pub captured_r: Option<f64>,
    pub closed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy)]
pub struct KellyInput {
    pub edge: f64,
    pub expectancy: f64,
    pub variance: f64,
    pub sample_count: u32,
    pub max_fraction: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Decision {
    pub allowed: bool,
    pub reason: Option<String>,
}

impl Decision {
    pub fn allow() -> Self {
        Self { allowed: true, reason: None }
    }

    pub fn deny(reason: impl Into<String>) -> Self {
        Self { allowed: false, reason: Some(reason.into()) }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PolicyError {
    #[error("store unavailable: {0}")]
    StoreUnavailable(String),
}
