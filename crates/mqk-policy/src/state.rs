use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The singleton policy row. Overrides start unset and only ever tighten
/// within a session; `resolved_*` accessors implement Open Question 1
/// (override-if-set-else-config) in exactly one place so call sites never
/// re-derive the fallback.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AutonomyPolicyState {
    pub min_edge_override: Option<f64>,
    pub max_trades_per_scan_override: Option<u32>,
    pub leverage_cap_override: Option<i64>,
    pub observation_only_until: Option<DateTime<Utc>>,
    pub full_auto_override: Option<bool>,
    pub reason: Option<String>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl AutonomyPolicyState {
    pub fn resolved_min_edge(&self, config_default: f64) -> f64 {
        self.min_edge_override.unwrap_or(config_default)
    }

    pub fn resolved_max_trades_per_scan(&self, config_default: u32) -> u32 {
        self.max_trades_per_scan_override.unwrap_or(config_default)
    }

    pub fn resolved_leverage_cap(&self, config_default: i64) -> i64 {
        self.leverage_cap_override.unwrap_or(config_default)
    }

    pub fn resolved_full_auto(&self, config_default: bool) -> bool {
        self.full_auto_override.unwrap_or(config_default)
    }

    pub fn is_observation_only(&self, now: DateTime<Utc>) -> bool {
        self.observation_only_until.map(|until| until > now).unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolved_full_auto_falls_back_to_config_default_when_unset() {
        let state = AutonomyPolicyState::default();
        assert!(!state.resolved_full_auto(false));
        assert!(state.resolved_full_auto(true));
    }

    #[test]
    fn full_auto_override_wins_over_config_default() {
        let state = AutonomyPolicyState {
            full_auto_override: Some(true),
            ..Default::default()
        };
        assert!(state.resolved_full_auto(false));
    }

    #[test]
    fn observation_only_until_in_the_past_is_not_observation_only() {
        let now = Utc::now();
        let state = AutonomyPolicyState {
            observation_only_until: Some(now - chrono::Duration::seconds(1)),
            ..Default::default()
        };
        assert!(!state.is_observation_only(now));
    }
}
