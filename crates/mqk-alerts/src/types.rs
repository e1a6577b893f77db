use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Info,
    Warning,
    High,
    Critical,
}

impl Severity {
    pub fn as_str(self) -> &'static str {
        match self {
            Severity::Info => "info",
            Severity::Warning => "warning",
            Severity::High => "high",
            Severity::Critical => "critical",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertState {
    Open,
    Suppressed,
    Sent,
    Resolved,
}

impl AlertState {
    pub fn as_str(self) -> &'static str {
        match self {
            AlertState::Open => "open",
            AlertState::Suppressed => "suppressed",
            AlertState::Sent => "sent",
            AlertState::Resolved => "resolved",
        }
    }

    /// Enforces the §3 transition table.
    pub fn can_transition_to(self, next: AlertState) -> bool {
        use AlertState::*;
        matches!(
            (self, next),
            (Open, Suppressed) | (Open, Sent) | (Open, Resolved) |
            (Suppressed, Sent) | (Suppressed, Resolved) |
            (Sent, Resolved)
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryStatus {
    Retrying,
    Sent,
    Failed,
}

#[derive(Debug, Clone)]
pub struct CreateAlertRequest {
    pub dedupe_key: String,
    pub source: String,
    pub reason: String,
    pub severity: Severity,
    pub summary: String,
    pub message: Option<String>,
    pub metadata: Option<Value>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct Alert {
    pub id: Uuid,
    pub dedupe_key: String,
    pub source: String,
    pub reason: String,
    pub severity: Severity,
    pub summary: String,
    pub message: Option<String>,
    pub metadata: Option<Value>,
    pub state: AlertState,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub acknowledged_at: Option<DateTime<Utc>>,
    pub acknowledged_by: Option<String>,
    pub last_error: Option<String>,
}

#[derive(Debug, Clone)]
pub struct RecordDeliveryRequest {
    pub alert_id: Uuid,
    pub channel: String,
    pub status: DeliveryStatus,
    pub attempt: i32,
    pub provider_message_id: Option<String>,
    pub error: Option<String>,
    pub metadata: Option<Value>,
}

#[derive(Debug, thiserror::Error)]
pub enum AlertError {
    #[error("invalid transition from {from} to {to}")]
    InvalidTransition { from: &'static str, to: &'static str },
    #[error("alert {0} not found")]
    NotFound(Uuid),
    #[error(transparent)]
    Store(#[from] anyhow::Error),
}
