//! Typed autonomy runtime configuration.
//!
//! Resolved once at process startup from the JSON `load_layered_yaml`
//! already produces (defaults -> file -> environment layering happens
//! upstream of this module; this module only knows how to turn the merged
//! JSON into a typed record with every field defaulted).

use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct AutonomyKnobs {
    pub enabled: bool,
    pub full_auto: bool,
    pub max_trades_per_day: u32,
    pub scan_interval_seconds: u64,
    pub probe_risk_fraction: f64,
    pub min_sharpe: f64,
    pub min_samples: u32,
}

impl Default for AutonomyKnobs {
    fn default() -> Self {
        Self {
            enabled: false,
            full_auto: false,
            max_trades_per_day: 25,
            scan_interval_seconds: 900,
            probe_risk_fraction: 0.005,
            min_sharpe: 0.8,
            min_samples: 8,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct HeartbeatKnobs {
    pub enabled: bool,
    pub tick_interval_seconds: u64,
    pub rolling_buffer_size: usize,
    pub max_calls_per_hour: u32,
}

impl Default for HeartbeatKnobs {
    fn default() -> Self {
        Self {
            enabled: false,
            tick_interval_seconds: 30,
            rolling_buffer_size: 60,
            max_calls_per_hour: 20,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMode {
    Paper,
    Live,
    Webhook,
}

impl Default for ExecutionMode {
    fn default() -> Self {
        ExecutionMode::Paper
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct ExecutionKnobs {
    pub mode: ExecutionMode,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct HyperliquidKnobs {
    pub max_leverage: i64,
}

impl Default for HyperliquidKnobs {
    fn default() -> Self {
        Self { max_leverage: 5 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct WalletLimits {
    pub daily: i64,
    pub per_trade: i64,
    pub confirmation_threshold: i64,
}

impl Default for WalletLimits {
    fn default() -> Self {
        Self { daily: 100, per_trade: 25, confirmation_threshold: 10 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct WalletKnobs {
    pub limits: WalletLimits,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct AlertsKnobs {
    pub enabled: bool,
    pub dedupe_window_seconds: u64,
    pub cooldown_seconds: u64,
}

impl Default for AlertsKnobs {
    fn default() -> Self {
        Self { enabled: true, dedupe_window_seconds: 300, cooldown_seconds: 900 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct SchedulerKnobs {
    pub tick_interval_ms: u64,
    pub default_lease_ms: u64,
}

impl Default for SchedulerKnobs {
    fn default() -> Self {
        Self { tick_interval_ms: 1000, default_lease_ms: 60_000 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct EventScanKnobs {
    pub enabled: bool,
    pub cooldown_ms: u64,
}

impl Default for EventScanKnobs {
    fn default() -> Self {
        Self { enabled: true, cooldown_ms: 60_000 }
    }
}

/// The single typed config record resolved at startup. Field names match the
/// dotted knob table: `autonomy.*`, `heartbeat.*`, `execution.*`,
/// `hyperliquid.*`, `wallet.*`, `alerts.*`, `scheduler.*`, `eventScan.*`.
/// `db.url` is deliberately not here — it is read directly from the
/// `MQK_DATABASE_URL` env var by `mqk_db::connect_from_env`.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(default)]
pub struct AutonomyRuntimeConfig {
    pub autonomy: AutonomyKnobs,
    pub heartbeat: HeartbeatKnobs,
    pub execution: ExecutionKnobs,
    pub hyperliquid: HyperliquidKnobs,
    pub wallet: WalletKnobs,
    pub alerts: AlertsKnobs,
    pub scheduler: SchedulerKnobs,
    #[serde(rename = "eventScan")]
    pub event_scan: EventScanKnobs,
}

impl AutonomyRuntimeConfig {
    /// Resolve from the merged config JSON `load_layered_yaml` produces.
    /// Missing branches and missing leaves both fall back to defaults —
    /// nothing here unwraps an `Option` at a call site.
    pub fn resolve(config_json: &Value) -> Self {
        serde_json::from_value(config_json.clone()).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_json_resolves_to_documented_defaults() {
        let cfg = AutonomyRuntimeConfig::resolve(&Value::Object(Default::default()));
        assert_eq!(cfg, AutonomyRuntimeConfig::default());
        assert_eq!(cfg.autonomy.max_trades_per_day, 25);
        assert_eq!(cfg.heartbeat.max_calls_per_hour, 20);
        assert_eq!(cfg.scheduler.default_lease_ms, 60_000);
        assert_eq!(cfg.event_scan.cooldown_ms, 60_000);
    }

    #[test]
    fn partial_override_leaves_siblings_at_default() {
        let json = serde_json::json!({
            "autonomy": { "enabled": true, "fullAuto": true },
            "eventScan": { "cooldownMs": 5000 },
        });
        let cfg = AutonomyRuntimeConfig::resolve(&json);
        assert!(cfg.autonomy.enabled);
        assert!(cfg.autonomy.full_auto);
        assert_eq!(cfg.autonomy.max_trades_per_day, 25);
        assert_eq!(cfg.event_scan.cooldown_ms, 5000);
        assert!(cfg.event_scan.enabled);
    }
}
