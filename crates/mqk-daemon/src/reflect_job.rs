//! Reflective policy mutation job: folds the most recent trade journal into
//! the singleton policy-state row, tightening overrides and forcing
//! observation mode after clusters of losing or invalidated trades.
//!
//! Every pass that forces observation mode runs the candidate alert through
//! `AlertDedupeTracker` before calling `AlertStore::create` — fingerprint
//! dedupe and cooldown suppress repeat alerts for the same condition, and
//! severity routes to `AlertPolicyConfig::channels`. An authorized send
//! records one delivery attempt per routed channel.

use chrono::{DateTime, Utc};
use mqk_alerts::{
    AlertDedupeTracker, AlertPolicyConfig, AlertStore, CreateAlertRequest, DeliveryStatus, RecordDeliveryRequest,
    SendVerdict, Severity,
};
use mqk_policy::mutator::{reflect, MutatorConfig};
use mqk_policy::state::AutonomyPolicyState;
use mqk_policy::types::{JournalEntry, MarketRegime, SignalClass, TradeOutcome};
use sqlx::PgPool;
use tokio::sync::Mutex;
use tracing::{info, warn};

const JOURNAL_WINDOW: i64 = 10;
const OBSERVATION_FORCED_DEDUPE_KEY: &str = "reflective_mutator:observation_forced";

fn parse_signal_class(s: &str) -> SignalClass {
    match s {
        "momentum_breakout" => SignalClass::MomentumBreakout,
        "mean_reversion" => SignalClass::MeanReversion,
        "liquidation_cascade" => SignalClass::LiquidationCascade,
        "news_event" => SignalClass::NewsEvent,
        _ => SignalClass::Unknown,
    }
}

fn parse_regime(s: &str) -> MarketRegime {
    match s {
        "trending" => MarketRegime::Trending,
        "high_vol_expansion" => MarketRegime::HighVolExpansion,
        "low_vol_compression" => MarketRegime::LowVolCompression,
        _ => MarketRegime::Choppy,
    }
}

fn parse_outcome(s: &str) -> TradeOutcome {
    match s {
        "executed" => TradeOutcome::Executed,
        "failed" => TradeOutcome::Failed,
        "blocked" => TradeOutcome::Blocked,
        _ => TradeOutcome::WouldTrade,
    }
}

fn from_row(row: &mqk_db::PolicyStateRow) -> AutonomyPolicyState {
    AutonomyPolicyState {
        min_edge_override: row.min_edge_override,
        max_trades_per_scan_override: row.max_trades_per_scan_override.map(|v| v.max(0) as u32),
        leverage_cap_override: row.leverage_cap_override,
        observation_only_until: row.observation_only_until,
        full_auto_override: row.full_auto_override,
        reason: row.reason.clone(),
        updated_at: Some(row.updated_at),
    }
}

fn to_row(state: &AutonomyPolicyState, now: DateTime<Utc>) -> mqk_db::PolicyStateRow {
    mqk_db::PolicyStateRow {
        min_edge_override: state.min_edge_override,
        max_trades_per_scan_override: state.max_trades_per_scan_override.map(|v| v as i64),
        leverage_cap_override: state.leverage_cap_override,
        observation_only_until: state.observation_only_until,
        full_auto_override: state.full_auto_override,
        reason: state.reason.clone(),
        updated_at: state.updated_at.unwrap_or(now),
    }
}

/// Defaults the config layer would otherwise supply per-override.
pub struct PolicyDefaults {
    pub min_edge: f64,
    pub max_trades_per_scan: u32,
    pub leverage_cap: i64,
}

pub async fn run_once(
    pool: &PgPool,
    alerts: &AlertStore,
    dedupe: &Mutex<AlertDedupeTracker>,
    alert_policy: &AlertPolicyConfig,
    cfg: &MutatorConfig,
    defaults: &PolicyDefaults,
) -> anyhow::Result<()> {
    let now = Utc::now();
    let rows = mqk_db::recent_journal_entries(pool, JOURNAL_WINDOW).await?;
    if rows.is_empty() {
        return Ok(());
    }

    let entries: Vec<JournalEntry> = rows
        .iter()
        .map(|r| JournalEntry {
            signal_class: parse_signal_class(&r.signal_class),
            regime: parse_regime(&r.regime),
            outcome: parse_outcome(&r.outcome),
            thesis_correct: r.thesis_correct,
            captured_r: r.captured_r,
            closed_at: r.closed_at,
        })
        .collect();

    let row = mqk_db::load_policy_state(pool).await?.unwrap_or_default();
    let mut state = from_row(&row);
    let was_observation_only = state.is_observation_only(now);

    reflect(
        cfg,
        &mut state,
        &entries,
        defaults.min_edge,
        defaults.max_trades_per_scan,
        defaults.leverage_cap,
        now,
    );

    if state.is_observation_only(now) && !was_observation_only {
        let summary = state.reason.clone().unwrap_or_else(|| "observation mode forced".to_string());
        raise_observation_forced_alert(alerts, dedupe, alert_policy, &summary, now).await;
    }

    mqk_db::save_policy_state(pool, &to_row(&state, now)).await?;
    info!("reflective mutation pass complete");
    Ok(())
}

async fn raise_observation_forced_alert(
    alerts: &AlertStore,
    dedupe: &Mutex<AlertDedupeTracker>,
    alert_policy: &AlertPolicyConfig,
    summary: &str,
    now: DateTime<Utc>,
) {
    let reason = "observation_forced";
    let verdict = {
        let mut tracker = dedupe.lock().await;
        let verdict = tracker.evaluate(alert_policy, OBSERVATION_FORCED_DEDUPE_KEY, reason, Severity::Warning, summary, now);
        let fp = mqk_alerts::fingerprint(reason, Severity::Warning, summary);
        tracker.record_seen(OBSERVATION_FORCED_DEDUPE_KEY, fp, now);
        verdict
    };

    let channels = match verdict {
        SendVerdict::Suppress(why) => {
            info!(why, "observation-forced alert suppressed by dedupe/cooldown policy");
            return;
        }
        SendVerdict::Authorize { channels, .. } => channels,
    };

    let created = alerts
        .create(&CreateAlertRequest {
            dedupe_key: OBSERVATION_FORCED_DEDUPE_KEY.to_string(),
            source: "mqk-daemon".to_string(),
            reason: reason.to_string(),
            severity: Severity::Warning,
            summary: summary.to_string(),
            message: None,
            metadata: None,
            occurred_at: now,
        })
        .await;

    let alert = match created {
        Ok(alert) => alert,
        Err(e) => {
            warn!(error = %e, "failed to raise observation-forced alert");
            return;
        }
    };

    dedupe.lock().await.record_sent(OBSERVATION_FORCED_DEDUPE_KEY, now);

    for channel in channels {
        let result = alerts
            .record_delivery(
                &RecordDeliveryRequest {
                    alert_id: alert.id,
                    channel: channel.clone(),
                    status: DeliveryStatus::Sent,
                    attempt: 1,
                    provider_message_id: None,
                    error: None,
                    metadata: None,
                },
                now,
            )
            .await;
        if let Err(e) = result {
            warn!(error = %e, channel = %channel, "failed to record alert delivery");
        }
    }
}
