use chrono::{TimeZone, Utc};
use mqk_policy::mutator::{apply_observation_forcing, ObservationForcingConfig};
use mqk_policy::types::{Expression, JournalEntry, MarketRegime, NewsTrigger, Side, SignalClass, TradeOutcome};
use mqk_policy::{global_trade_gate, AutonomyPolicyState, GlobalTradeGateConfig, GlobalTradeGateInput};

fn now() -> chrono::DateTime<Utc> {
    Utc.timestamp_opt(1_700_000_000, 0).unwrap()
}

fn journal_entry(thesis_correct: Option<bool>) -> JournalEntry {
    JournalEntry {
        signal_class: SignalClass::MomentumBreakout,
        regime: MarketRegime::Trending,
        outcome: TradeOutcome::Executed,
        thesis_correct,
        captured_r: None,
        closed_at: Some(now()),
    }
}

#[test]
fn losing_cluster_forces_observation_then_gate_denies_all() {
    let recent = vec![
        journal_entry(Some(false)),
        journal_entry(Some(false)),
        journal_entry(Some(true)),
        journal_entry(Some(false)),
        journal_entry(Some(true)),
    ];
    let mut policy = AutonomyPolicyState::default();
    apply_observation_forcing(&ObservationForcingConfig::default(), &mut policy, &recent, now());
    assert!(policy.is_observation_only(now()));

    let expr = Expression {
        hypothesis_id: "btc_trend_9".into(),
        symbol: "BTC".into(),
        side: Side::Long,
        signal_class: Some(SignalClass::MomentumBreakout),
        confidence: 0.9,
        expected_edge: 0.05,
        leverage: 2,
        probe_size_micros: 1_000_000,
        news_trigger: None::<NewsTrigger>,
    };

    let cfg = GlobalTradeGateConfig { autonomy_enabled: true, ..GlobalTradeGateConfig::default() };
    let decision = global_trade_gate(
        &cfg,
        &policy,
        &GlobalTradeGateInput {
            expr: &expr,
            regime: MarketRegime::Trending,
            today_trade_count: 0,
            recent_same_signal: &[],
            now: now(),
        },
    );
    assert!(!decision.allowed);
    assert!(decision.reason.unwrap().contains("observation mode"));
}
