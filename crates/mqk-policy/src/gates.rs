use chrono::{DateTime, Utc};

use crate::classify::{classify_signal, signal_class_allowed};
use crate::state::AutonomyPolicyState;
use crate::types::{Decision, Expression, JournalEntry, MarketRegime, TradeOutcome};

#[derive(Debug, Clone)]
pub struct NewsGateConfig {
    pub min_novelty: f64,
    pub min_confirmation: f64,
    pub min_liquidity: f64,
    pub min_volatility: f64,
    pub min_source_count: usize,
}

impl Default for NewsGateConfig {
    fn default() -> Self {
        Self {
            min_novelty: 0.6,
            min_confirmation: 0.55,
            min_liquidity: 0.4,
            min_volatility: 0.25,
            min_source_count: 1,
        }
    }
}

/// Gates entry on a news-triggered expression. Returns `Decision::allow()`
/// when no trigger is attached at all — callers only invoke this for
/// news-class expressions.
pub fn news_entry_gate(cfg: &NewsGateConfig, expr: &Expression, now: DateTime<Utc>) -> Decision {
    let Some(trigger) = &expr.news_trigger else {
        return Decision::deny("no news trigger attached");
    };
    if !trigger.enabled {
        return Decision::deny("news trigger disabled");
    }
    if trigger.expires_at <= now {
        return Decision::deny("expired");
    }
    if trigger.novelty < cfg.min_novelty {
        return Decision::deny(format!(
            "novelty {:.2} below minimum {:.2}",
            trigger.novelty, cfg.min_novelty
        ));
    }
    if trigger.confirmation < cfg.min_confirmation {
        return Decision::deny(format!(
            "confirmation {:.2} below minimum {:.2}",
            trigger.confirmation, cfg.min_confirmation
        ));
    }
    if trigger.liquidity < cfg.min_liquidity {
        return Decision::deny(format!(
            "liquidity {:.2} below minimum {:.2}",
            trigger.liquidity, cfg.min_liquidity
        ));
    }
    if trigger.volatility < cfg.min_volatility {
        return Decision::deny(format!(
            "volatility {:.2} below minimum {:.2}",
            trigger.volatility, cfg.min_volatility
        ));
    }
    let source_count = trigger.sources.len();
    if source_count < cfg.min_source_count {
        return Decision::deny(format!(
            "source count {source_count} below minimum {}",
            cfg.min_source_count
        ));
    }
    Decision::allow()
}

#[derive(Debug, Clone)]
pub struct SignalPerformanceConfig {
    pub min_samples: usize,
    pub min_sharpe: f64,
}

impl Default for SignalPerformanceConfig {
    fn default() -> Self {
        Self { min_samples: 8, min_sharpe: 0.8 }
    }
}

#[derive(Debug, Clone)]
pub struct GlobalTradeGateConfig {
    pub autonomy_enabled: bool,
    pub max_trades_per_day: u32,
    pub signal_performance: SignalPerformanceConfig,
}

impl Default for GlobalTradeGateConfig {
    fn default() -> Self {
        Self {
            autonomy_enabled: false,
            max_trades_per_day: 25,
            signal_performance: SignalPerformanceConfig::default(),
        }
    }
}

pub struct GlobalTradeGateInput<'a> {
    pub expr: &'a Expression,
    pub regime: MarketRegime,
    pub today_trade_count: u32,
    /// Most-recent-first resolved journal entries for this signal class.
    pub recent_same_signal: &'a [JournalEntry],
    pub now: DateTime<Utc>,
}

/// Sample-weighted Sharpe-like ratio over captured R multiples.
fn sharpe_like(samples: &[f64]) -> f64 {
    let n = samples.len() as f64;
    if n == 0.0 {
        return 0.0;
    }
    let mean = samples.iter().sum::<f64>() / n;
    let variance = samples.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / n;
    let stdev = variance.sqrt();
    if stdev <= f64::EPSILON {
        return if mean > 0.0 { f64::INFINITY } else { 0.0 };
    }
    mean / stdev
}

pub fn global_trade_gate(
    cfg: &GlobalTradeGateConfig,
    policy: &AutonomyPolicyState,
    input: &GlobalTradeGateInput<'_>,
) -> Decision {
    if !cfg.autonomy_enabled {
        return Decision::allow();
    }

    if let Some(until) = policy.observation_only_until {
        if until > input.now {
            return Decision::deny(format!("observation mode active until {}", until.to_rfc3339()));
        }
    }

    if input.today_trade_count >= cfg.max_trades_per_day {
        return Decision::deny(format!(
            "daily trade cap reached ({}/{})",
            input.today_trade_count, cfg.max_trades_per_day
        ));
    }

    let resolved: Vec<&JournalEntry> = input
        .recent_same_signal
        .iter()
        .filter(|e| matches!(e.outcome, TradeOutcome::Executed) && e.captured_r.is_some())
        .collect();
    if resolved.len() >= cfg.signal_performance.min_samples {
        let rs: Vec<f64> = resolved.iter().filter_map(|e| e.captured_r).collect();
        let sharpe = sharpe_like(&rs);
        if sharpe < cfg.signal_performance.min_sharpe {
            return Decision::deny(format!(
                "signal-performance guard: sharpe {:.2} below minimum {:.2}",
                sharpe, cfg.signal_performance.min_sharpe
            ));
        }
    }

    let signal = classify_signal(input.expr);
    if !signal_class_allowed(signal, input.regime) {
        return Decision::deny(format!(
            "{} disallowed in regime {}",
            signal.as_str(),
            input.regime.as_str()
        ));
    }

    Decision::allow()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{NewsTrigger, Side, SignalClass};
    use chrono::Duration as ChronoDuration;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000, 0).unwrap()
    }

    fn expr_with_trigger(trigger: Option<NewsTrigger>, signal_class: Option<SignalClass>) -> Expression {
        Expression {
            hypothesis_id: "btc_01".into(),
            symbol: "BTC".into(),
            side: Side::Long,
            signal_class,
            confidence: 0.7,
            expected_edge: 0.02,
            leverage: 2,
            probe_size_micros: 1_000_000,
            news_trigger: trigger,
        }
    }

    #[test]
    fn s2_news_gate_pass() {
        let trigger = NewsTrigger {
            enabled: true,
            sources: vec!["newsapi".into()],
            novelty: 0.7,
            confirmation: 0.7,
            liquidity: 0.8,
            volatility: 0.9,
            expires_at: now() + ChronoDuration::seconds(60),
        };
        let expr = expr_with_trigger(Some(trigger), Some(SignalClass::NewsEvent));
        let decision = news_entry_gate(&NewsGateConfig::default(), &expr, now());
        assert!(decision.allowed, "{:?}", decision.reason);
    }

    #[test]
    fn news_gate_expired_boundary() {
        let trigger = NewsTrigger {
            enabled: true,
            sources: vec!["newsapi".into()],
            novelty: 0.9,
            confirmation: 0.9,
            liquidity: 0.9,
            volatility: 0.9,
            expires_at: now(),
        };
        let expr = expr_with_trigger(Some(trigger), Some(SignalClass::NewsEvent));
        let decision = news_entry_gate(&NewsGateConfig::default(), &expr, now());
        assert!(!decision.allowed);
        assert_eq!(decision.reason.as_deref(), Some("expired"));
    }

    #[test]
    fn s1_trending_mean_reversion_denied() {
        let expr = expr_with_trigger(None, Some(SignalClass::MeanReversion));
        let policy = AutonomyPolicyState::default();
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
        assert!(decision.reason.unwrap().contains("disallowed in regime trending"));
    }

    #[test]
    fn observation_mode_dominates() {
        let expr = expr_with_trigger(None, Some(SignalClass::MomentumBreakout));
        let mut policy = AutonomyPolicyState::default();
        policy.observation_only_until = Some(now() + ChronoDuration::seconds(1));
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
    }

    #[test]
    fn daily_cap_boundary() {
        let expr = expr_with_trigger(None, Some(SignalClass::MomentumBreakout));
        let policy = AutonomyPolicyState::default();
        let cfg = GlobalTradeGateConfig { autonomy_enabled: true, max_trades_per_day: 25, ..GlobalTradeGateConfig::default() };
        let decision = global_trade_gate(
            &cfg,
            &policy,
            &GlobalTradeGateInput {
                expr: &expr,
                regime: MarketRegime::Trending,
                today_trade_count: 25,
                recent_same_signal: &[],
                now: now(),
            },
        );
        assert!(!decision.allowed);
    }

    #[test]
    fn disabled_autonomy_allows_everything() {
        let expr = expr_with_trigger(None, Some(SignalClass::MeanReversion));
        let policy = AutonomyPolicyState::default();
        let cfg = GlobalTradeGateConfig::default();
        let decision = global_trade_gate(
            &cfg,
            &policy,
            &GlobalTradeGateInput {
                expr: &expr,
                regime: MarketRegime::Trending,
                today_trade_count: 999,
                recent_same_signal: &[],
                now: now(),
            },
        );
        assert!(decision.allowed);
    }
}
