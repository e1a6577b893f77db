//! Reflective policy mutator: tightens overrides and forces observation mode
//! after clusters of losing trades. Pure over `(config, state, recent
//! journal)` — the same shape the risk engine this is grounded on uses for
//! its halt/tighten decisions, adapted to a monotonically-tightening
//! override set instead of a single halt flag.

use chrono::{DateTime, Duration as ChronoDuration, Utc};

use crate::state::AutonomyPolicyState;
use crate::types::{JournalEntry, TradeOutcome};

#[derive(Debug, Clone)]
pub struct ObservationForcingConfig {
    pub window: usize,
    pub min_false: usize,
    pub scan_interval_seconds: i64,
}

impl Default for ObservationForcingConfig {
    fn default() -> Self {
        Self { window: 5, min_false: 3, scan_interval_seconds: 900 }
    }
}

#[derive(Debug, Clone)]
pub struct AdaptiveTighteningConfig {
    pub window: usize,
    pub min_failed_ratio: f64,
    pub min_edge_step: f64,
    pub min_edge_ceiling: f64,
    pub min_edge_floor: f64,
    pub max_trades_floor: u32,
    pub leverage_floor: i64,
}

impl Default for AdaptiveTighteningConfig {
    fn default() -> Self {
        Self {
            window: 10,
            min_failed_ratio: 0.5,
            min_edge_step: 0.01,
            min_edge_ceiling: 0.20,
            min_edge_floor: 0.03,
            max_trades_floor: 1,
            leverage_floor: 1,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct MutatorConfig {
    pub observation_forcing: ObservationForcingConfig,
    pub adaptive_tightening: AdaptiveTighteningConfig,
}

/// Entries must be ordered most-recent-first.
pub fn apply_observation_forcing(
    cfg: &ObservationForcingConfig,
    state: &mut AutonomyPolicyState,
    recent: &[JournalEntry],
    now: DateTime<Utc>,
) {
    let resolved: Vec<bool> = recent
        .iter()
        .filter_map(|e| e.thesis_correct)
        .take(cfg.window)
        .collect();
    let false_count = resolved.iter().filter(|correct| !**correct).count();
    if false_count < cfg.min_false {
        return;
    }
    let ttl = ChronoDuration::seconds(cfg.scan_interval_seconds.max(60));
    let candidate = now + ttl;
    let extended = state.observation_only_until.map(|until| candidate > until).unwrap_or(true);
    if extended {
        state.observation_only_until = Some(candidate);
        state.reason = Some(format!(
            "{false_count}/{} recent trades invalidated thesis",
            resolved.len()
        ));
        state.updated_at = Some(now);
        tracing::info!(
            false_count,
            window = resolved.len(),
            until = %candidate,
            "observation mode forced"
        );
    }
}

/// Entries must be ordered most-recent-first.
pub fn apply_adaptive_tightening(
    cfg: &AdaptiveTighteningConfig,
    state: &mut AutonomyPolicyState,
    recent: &[JournalEntry],
    config_min_edge_default: f64,
    config_max_trades_default: u32,
    config_leverage_default: i64,
    now: DateTime<Utc>,
) {
    let window: Vec<&JournalEntry> = recent.iter().take(cfg.window).collect();
    if window.len() < 6 {
        return;
    }
    let failed = window
        .iter()
        .filter(|e| matches!(e.outcome, TradeOutcome::Failed))
        .count();
    let ratio = failed as f64 / window.len() as f64;
    if ratio < cfg.min_failed_ratio {
        return;
    }

    let current_edge = state.resolved_min_edge(config_min_edge_default);
    state.min_edge_override =
        Some((current_edge + cfg.min_edge_step).clamp(cfg.min_edge_floor, cfg.min_edge_ceiling));

    let current_trades = state.resolved_max_trades_per_scan(config_max_trades_default);
    state.max_trades_per_scan_override =
        Some(current_trades.saturating_sub(1).max(cfg.max_trades_floor));

    let current_leverage = state.resolved_leverage_cap(config_leverage_default);
    state.leverage_cap_override = Some((current_leverage - 1).max(cfg.leverage_floor));

    state.updated_at = Some(now);
    tracing::info!(failed, total = window.len(), "adaptive tightening applied");
}

pub fn reflect(
    cfg: &MutatorConfig,
    state: &mut AutonomyPolicyState,
    recent: &[JournalEntry],
    config_min_edge_default: f64,
    config_max_trades_default: u32,
    config_leverage_default: i64,
    now: DateTime<Utc>,
) {
    apply_observation_forcing(&cfg.observation_forcing, state, recent, now);
    apply_adaptive_tightening(
        &cfg.adaptive_tightening,
        state,
        recent,
        config_min_edge_default,
        config_max_trades_default,
        config_leverage_default,
        now,
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{MarketRegime, SignalClass};
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000, 0).unwrap()
    }

    fn entry(thesis_correct: Option<bool>, outcome: TradeOutcome) -> JournalEntry {
        JournalEntry {
            signal_class: SignalClass::MomentumBreakout,
            regime: MarketRegime::Trending,
            outcome,
            thesis_correct,
            captured_r: None,
            closed_at: Some(now()),
        }
    }

    #[test]
    fn s3_observation_forcing_triggers_on_three_false_of_five() {
        // most-recent-first: false,false,true,false,true
        let recent = vec![
            entry(Some(false), TradeOutcome::Executed),
            entry(Some(false), TradeOutcome::Executed),
            entry(Some(true), TradeOutcome::Executed),
            entry(Some(false), TradeOutcome::Executed),
            entry(Some(true), TradeOutcome::Executed),
        ];
        let mut state = AutonomyPolicyState::default();
        let cfg = ObservationForcingConfig::default();
        apply_observation_forcing(&cfg, &mut state, &recent, now());
        assert!(state.is_observation_only(now()));
        let until = state.observation_only_until.unwrap();
        assert_eq!((until - now()).num_seconds(), 900);
    }

    #[test]
    fn observation_forcing_only_extends_never_retracts() {
        let mut state = AutonomyPolicyState::default();
        let far_future = now() + ChronoDuration::seconds(10_000);
        state.observation_only_until = Some(far_future);
        let recent = vec![
            entry(Some(false), TradeOutcome::Executed),
            entry(Some(false), TradeOutcome::Executed),
            entry(Some(false), TradeOutcome::Executed),
        ];
        apply_observation_forcing(&ObservationForcingConfig::default(), &mut state, &recent, now());
        assert_eq!(state.observation_only_until, Some(far_future));
    }

    #[test]
    fn adaptive_tightening_requires_six_entries_and_half_failed() {
        let recent: Vec<JournalEntry> = (0..10)
            .map(|i| entry(None, if i < 5 { TradeOutcome::Failed } else { TradeOutcome::Executed }))
            .collect();
        let mut state = AutonomyPolicyState::default();
        apply_adaptive_tightening(&AdaptiveTighteningConfig::default(), &mut state, &recent, 0.05, 5, 5, now());
        assert_eq!(state.min_edge_override, Some(0.06));
        assert_eq!(state.max_trades_per_scan_override, Some(4));
        assert_eq!(state.leverage_cap_override, Some(4));
    }

    #[test]
    fn adaptive_tightening_clamps_at_floor_and_ceiling() {
        let recent: Vec<JournalEntry> = (0..10).map(|_| entry(None, TradeOutcome::Failed)).collect();
        let mut state = AutonomyPolicyState { min_edge_override: Some(0.20), leverage_cap_override: Some(1), ..Default::default() };
        apply_adaptive_tightening(&AdaptiveTighteningConfig::default(), &mut state, &recent, 0.05, 2, 1, now());
        assert_eq!(state.min_edge_override, Some(0.20));
        assert_eq!(state.leverage_cap_override, Some(1));
        assert_eq!(state.max_trades_per_scan_override, Some(1));
    }
}
