use std::collections::HashMap;

use chrono::{DateTime, Duration as ChronoDuration, Utc};

use crate::ring::RingBuffer;
use crate::types::{HeartbeatConfig, HeartbeatTick, TriggerKind};

pub type CooldownMap = HashMap<TriggerKind, DateTime<Utc>>;

fn cooled_down(cooldowns: &CooldownMap, kind: TriggerKind, now: DateTime<Utc>, window_seconds: i64) -> bool {
    match cooldowns.get(&kind) {
        Some(last) => now - *last >= ChronoDuration::seconds(window_seconds),
        None => true,
    }
}

fn stdev(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let mean = values.iter().sum::<f64>() / values.len() as f64;
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / values.len() as f64;
    variance.sqrt()
}

/// Evaluates the fixed trigger set against the ring buffer's latest sample
/// and recent history. Each fired trigger is filtered by its own cooldown;
/// callers are responsible for updating `cooldowns` for triggers they act on.
pub fn evaluate_triggers(
    ring: &RingBuffer<HeartbeatTick>,
    cfg: &HeartbeatConfig,
    now: DateTime<Utc>,
    cooldowns: &CooldownMap,
) -> Vec<TriggerKind> {
    let mut fired = Vec::new();
    let Some(latest) = ring.last() else { return fired };

    let mut fire = |kind: TriggerKind, fired: &mut Vec<TriggerKind>| {
        if cooled_down(cooldowns, kind, now, cfg.trigger_cooldown_seconds) {
            fired.push(kind);
        }
    };

    if let Some(first) = ring.iter().next() {
        let shift = (latest.unrealized_pnl_pct_of_equity - first.unrealized_pnl_pct_of_equity).abs();
        if shift > cfg.pnl_shift_pct {
            fire(TriggerKind::PnlShift, &mut fired);
        }
    }

    if let Some(stop) = latest.stop_price {
        let dist_pct = ((latest.mark_price - stop).abs() / latest.mark_price.max(f64::EPSILON)) * 100.0;
        if dist_pct <= cfg.approaching_stop_pct {
            fire(TriggerKind::ApproachingStop, &mut fired);
        }
    }

    if let Some(tp) = latest.take_profit_price {
        let dist_pct = ((latest.mark_price - tp).abs() / latest.mark_price.max(f64::EPSILON)) * 100.0;
        if dist_pct <= cfg.approaching_tp_pct {
            fire(TriggerKind::ApproachingTp, &mut fired);
        }
    }

    if latest.liq_dist_pct <= cfg.liquidation_proximity_pct {
        fire(TriggerKind::LiquidationProximity, &mut fired);
    }

    if latest.funding_rate.abs() >= cfg.funding_spike_rate {
        fire(TriggerKind::FundingSpike, &mut fired);
    }

    let window: Vec<f64> = ring
        .iter()
        .rev()
        .take(cfg.volatility_spike_window_ticks)
        .map(|t| t.mark_price)
        .collect();
    if window.len() >= 2 {
        let returns: Vec<f64> = window
            .windows(2)
            .map(|w| (w[0] - w[1]) / w[1].max(f64::EPSILON))
            .collect();
        if stdev(&returns) * 100.0 > cfg.volatility_spike_pct {
            fire(TriggerKind::VolatilitySpike, &mut fired);
        }
    }

    let age_minutes = (now - latest.position_opened_at).num_minutes();
    if age_minutes >= cfg.time_ceiling_minutes {
        fire(TriggerKind::TimeCeiling, &mut fired);
    }

    fired
}

/// Either circuit breaker, evaluated independently of the cooldown-gated set
/// above: these must never be suppressed by cooldown.
pub fn is_liquidation_emergency(tick: &HeartbeatTick, cfg: &HeartbeatConfig) -> bool {
    tick.liq_dist_pct < cfg.emergency_liq_dist_pct
}

pub fn is_pnl_emergency(tick: &HeartbeatTick, cfg: &HeartbeatConfig) -> bool {
    tick.unrealized_pnl_pct_of_equity < cfg.emergency_pnl_pct
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Side;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000, 0).unwrap()
    }

    fn tick(liq: f64, pnl: f64, opened_minutes_ago: i64) -> HeartbeatTick {
        HeartbeatTick {
            at: now(),
            mark_price: 100.0,
            unrealized_pnl_pct_of_equity: pnl,
            liq_dist_pct: liq,
            funding_rate: 0.0,
            stop_price: None,
            take_profit_price: None,
            side: Side::Long,
            size: 1.0,
            position_opened_at: now() - ChronoDuration::minutes(opened_minutes_ago),
        }
    }

    #[test]
    fn s4_emergency_close_boundary() {
        let cfg = HeartbeatConfig::default();
        assert!(!is_liquidation_emergency(&tick(2.0, 0.0, 0), &cfg), "2.0 is not strictly less than 2.0");
        assert!(is_liquidation_emergency(&tick(1.99, 0.0, 0), &cfg));
    }

    #[test]
    fn pnl_emergency_uses_strict_less_than() {
        let cfg = HeartbeatConfig::default();
        assert!(!is_pnl_emergency(&tick(50.0, -5.0, 0), &cfg));
        assert!(is_pnl_emergency(&tick(50.0, -5.01, 0), &cfg));
    }

    #[test]
    fn time_ceiling_fires_past_threshold() {
        let mut ring = RingBuffer::new(10);
        ring.push(tick(50.0, 0.0, 1000));
        let cfg = HeartbeatConfig { time_ceiling_minutes: 720, ..HeartbeatConfig::default() };
        let fired = evaluate_triggers(&ring, &cfg, now(), &CooldownMap::new());
        assert!(fired.contains(&TriggerKind::TimeCeiling));
    }

    #[test]
    fn cooldown_suppresses_repeat_fire() {
        let mut ring = RingBuffer::new(10);
        ring.push(tick(1.0, 0.0, 0));
        let cfg = HeartbeatConfig::default();
        let mut cooldowns = CooldownMap::new();
        cooldowns.insert(TriggerKind::LiquidationProximity, now() - ChronoDuration::seconds(10));
        let fired = evaluate_triggers(&ring, &cfg, now(), &cooldowns);
        assert!(!fired.contains(&TriggerKind::LiquidationProximity));
    }

    #[test]
    fn cooldown_expires_and_trigger_fires_again() {
        let mut ring = RingBuffer::new(10);
        ring.push(tick(1.0, 0.0, 0));
        let cfg = HeartbeatConfig::default();
        let mut cooldowns = CooldownMap::new();
        cooldowns.insert(TriggerKind::LiquidationProximity, now() - ChronoDuration::seconds(200));
        let fired = evaluate_triggers(&ring, &cfg, now(), &cooldowns);
        assert!(fired.contains(&TriggerKind::LiquidationProximity));
    }
}
