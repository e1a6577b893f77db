use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Side {
    Long,
    Short,
}

#[derive(Debug, Clone)]
pub struct HeartbeatTick {
    pub at: DateTime<Utc>,
    pub mark_price: f64,
    pub unrealized_pnl_pct_of_equity: f64,
    pub liq_dist_pct: f64,
    pub funding_rate: f64,
    pub stop_price: Option<f64>,
    pub take_profit_price: Option<f64>,
    pub side: Side,
    pub size: f64,
    pub position_opened_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TriggerKind {
    PnlShift,
    ApproachingStop,
    ApproachingTp,
    LiquidationProximity,
    FundingSpike,
    VolatilitySpike,
    TimeCeiling,
    PositionClosed,
}

impl TriggerKind {
    pub fn as_str(self) -> &'static str {
        match self {
            TriggerKind::PnlShift => "pnl_shift",
            TriggerKind::ApproachingStop => "approaching_stop",
            TriggerKind::ApproachingTp => "approaching_tp",
            TriggerKind::LiquidationProximity => "liquidation_proximity",
            TriggerKind::FundingSpike => "funding_spike",
            TriggerKind::VolatilitySpike => "volatility_spike",
            TriggerKind::TimeCeiling => "time_ceiling",
            TriggerKind::PositionClosed => "position_closed",
        }
    }
}

/// Mirrors `mqk_config::autonomy::ExecutionMode` without depending on that
/// crate — the heartbeat supervisor only needs to compare, never resolve,
/// the execution mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionMode {
    Paper,
    Live,
    Webhook,
}

#[derive(Debug, Clone)]
pub struct HeartbeatConfig {
    pub enabled: bool,
    /// Heartbeat intervention (circuit breakers, advisory dispatch) only
    /// runs in `Live` mode; paper/webhook ticks are a no-op precondition.
    pub execution_mode: ExecutionMode,
    /// Provider name the executor must report via `Executor::provider`.
    /// Empty means "no venue restriction" (useful for tests and for modes
    /// with no live venue wired).
    pub configured_venue: String,
    pub tick_interval_seconds: u64,
    pub rolling_buffer_size: usize,
    pub pnl_shift_pct: f64,
    pub approaching_stop_pct: f64,
    pub approaching_tp_pct: f64,
    pub liquidation_proximity_pct: f64,
    pub funding_spike_rate: f64,
    pub volatility_spike_pct: f64,
    pub volatility_spike_window_ticks: usize,
    pub time_ceiling_minutes: i64,
    pub trigger_cooldown_seconds: i64,
    pub max_calls_per_hour: u32,
    pub emergency_liq_dist_pct: f64,
    pub emergency_pnl_pct: f64,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            execution_mode: ExecutionMode::Live,
            configured_venue: String::new(),
            tick_interval_seconds: 30,
            rolling_buffer_size: 60,
            pnl_shift_pct: 2.0,
            approaching_stop_pct: 0.5,
            approaching_tp_pct: 0.5,
            liquidation_proximity_pct: 10.0,
            funding_spike_rate: 0.01,
            volatility_spike_pct: 1.5,
            volatility_spike_window_ticks: 10,
            time_ceiling_minutes: 720,
            trigger_cooldown_seconds: 180,
            max_calls_per_hour: 20,
            emergency_liq_dist_pct: 2.0,
            emergency_pnl_pct: -5.0,
        }
    }
}

impl HeartbeatConfig {
    /// Clamp to the §3 ring-buffer bound (10..1000).
    pub fn clamped_buffer_size(&self) -> usize {
        self.rolling_buffer_size.clamp(10, 1000)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum HeartbeatAction {
    Hold,
    CloseEntirely,
    TakePartialProfit { fraction: Option<f64>, size: Option<f64> },
    TightenStop { new_stop_price: f64 },
    AdjustTakeProfit { new_take_profit_price: f64 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JournalOutcome {
    Ok,
    Failed,
    Skipped,
    Rejected,
}

#[derive(Debug, Clone)]
pub struct JournalRecord {
    pub symbol: String,
    pub outcome: JournalOutcome,
    pub triggers: Vec<&'static str>,
    pub action: Option<HeartbeatAction>,
    pub detail: Option<String>,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct ExecuteRequest {
    pub symbol: String,
    pub side: Side,
    pub size: f64,
    pub order_type: OrderType,
    pub price: Option<f64>,
    pub reduce_only: bool,
    pub reasoning: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderType {
    Market,
    Limit,
}

#[derive(Debug, Clone)]
pub struct ExecuteResponse {
    pub executed: bool,
    pub message: String,
}

#[derive(Debug, Clone)]
pub struct OpenOrder {
    pub order_id: String,
    pub symbol: String,
}

#[async_trait]
pub trait Executor: Send + Sync {
    async fn execute(&self, req: ExecuteRequest) -> anyhow::Result<ExecuteResponse>;
    async fn cancel_order(&self, symbol: &str, order_id: &str) -> anyhow::Result<()>;
    async fn open_orders(&self, symbol: &str) -> anyhow::Result<Vec<OpenOrder>>;

    /// Venue identifier, checked against `HeartbeatConfig::configured_venue`
    /// before a tick is allowed to act. Default "" never matches a
    /// non-empty `configured_venue`, so adapters must opt in explicitly.
    fn provider(&self) -> &str {
        ""
    }
}

#[async_trait]
pub trait PositionDataSource: Send + Sync {
    async fn open_positions(&self) -> anyhow::Result<Vec<OpenPosition>>;
    async fn mids(&self) -> anyhow::Result<std::collections::HashMap<String, f64>>;
}

#[derive(Debug, Clone)]
pub struct OpenPosition {
    pub symbol: String,
    pub side: Side,
    pub size: f64,
    pub mark_price: f64,
    pub unrealized_pnl_pct_of_equity: f64,
    pub liq_dist_pct: f64,
    pub funding_rate: f64,
    pub stop_price: Option<f64>,
    pub take_profit_price: Option<f64>,
    pub opened_at: DateTime<Utc>,
}

#[async_trait]
pub trait AdvisoryOracle: Send + Sync {
    async fn decide(&self, prompt: &str, timeout_ms: u64) -> anyhow::Result<String>;
}

#[derive(Debug, thiserror::Error)]
pub enum HeartbeatError {
    #[error("invalid action: {0}")]
    InvalidAction(String),
    #[error(transparent)]
    Transport(#[from] anyhow::Error),
}
