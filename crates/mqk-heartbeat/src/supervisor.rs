use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use tracing::{info, warn};

use crate::backoff::{retry_with_backoff, ErrorClass, RetryPolicy, SlidingHourRateLimiter};
use crate::oracle::extract_action;
use crate::ring::RingBuffer;
use crate::triggers::{evaluate_triggers, is_liquidation_emergency, is_pnl_emergency, CooldownMap};
use crate::types::{
    AdvisoryOracle, ExecuteRequest, ExecutionMode, Executor, HeartbeatAction, HeartbeatConfig, HeartbeatTick,
    JournalOutcome, JournalRecord, OpenPosition, OrderType, PositionDataSource, Side, TriggerKind,
};
use crate::validate::validate_action;

pub struct HeartbeatSupervisor<E, D, O> {
    cfg: HeartbeatConfig,
    executor: E,
    data_source: D,
    oracle: O,
    rings: HashMap<String, RingBuffer<HeartbeatTick>>,
    cooldowns: HashMap<String, CooldownMap>,
    known_symbols: HashSet<String>,
    rate_limiter: SlidingHourRateLimiter,
    retry_policy: RetryPolicy,
}

impl<E, D, O> HeartbeatSupervisor<E, D, O>
where
    E: Executor,
    D: PositionDataSource,
    O: AdvisoryOracle,
{
    pub fn new(cfg: HeartbeatConfig, executor: E, data_source: D, oracle: O) -> Self {
        Self {
            cfg,
            executor,
            data_source,
            oracle,
            rings: HashMap::new(),
            cooldowns: HashMap::new(),
            known_symbols: HashSet::new(),
            rate_limiter: SlidingHourRateLimiter::default(),
            retry_policy: RetryPolicy::default(),
        }
    }

    pub fn data_source(&self) -> &D {
        &self.data_source
    }

    pub async fn tick(&mut self, now: DateTime<Utc>) -> Vec<JournalRecord> {
        let mut records = Vec::new();

        if !self.cfg.enabled {
            return records;
        }
        if self.cfg.execution_mode != ExecutionMode::Live {
            return records;
        }
        if !self.cfg.configured_venue.is_empty() && self.executor.provider() != self.cfg.configured_venue {
            warn!(
                configured = %self.cfg.configured_venue,
                actual = %self.executor.provider(),
                "executor provider does not match configured venue, skipping tick"
            );
            return records;
        }

        let positions = match retry_with_backoff(
            &self.retry_policy,
            |_e: &anyhow::Error| ErrorClass::Retryable,
            || self.data_source.open_positions(),
        )
        .await
        {
            Ok(p) => p,
            Err(e) => {
                warn!(error = %e, "position data unavailable this tick");
                records.push(JournalRecord {
                    symbol: "*".into(),
                    outcome: JournalOutcome::Skipped,
                    triggers: vec!["data_poll_failed"],
                    action: None,
                    detail: Some(e.to_string()),
                    at: now,
                });
                return records;
            }
        };

        let current_symbols: HashSet<String> = positions.iter().map(|p| p.symbol.clone()).collect();
        for closed in self.known_symbols.difference(&current_symbols).cloned().collect::<Vec<_>>() {
            self.rings.remove(&closed);
            self.cooldowns.remove(&closed);
            records.push(JournalRecord {
                symbol: closed,
                outcome: JournalOutcome::Ok,
                triggers: vec![TriggerKind::PositionClosed.as_str()],
                action: None,
                detail: None,
                at: now,
            });
        }
        self.known_symbols = current_symbols;

        for position in &positions {
            let record = self.handle_position(position, now).await;
            records.push(record);
        }

        records
    }

    async fn handle_position(&mut self, position: &OpenPosition, now: DateTime<Utc>) -> JournalRecord {
        let tick = HeartbeatTick {
            at: now,
            mark_price: position.mark_price,
            unrealized_pnl_pct_of_equity: position.unrealized_pnl_pct_of_equity,
            liq_dist_pct: position.liq_dist_pct,
            funding_rate: position.funding_rate,
            stop_price: position.stop_price,
            take_profit_price: position.take_profit_price,
            side: position.side,
            size: position.size,
            position_opened_at: position.opened_at,
        };
        let ring = self
            .rings
            .entry(position.symbol.clone())
            .or_insert_with(|| RingBuffer::new(self.cfg.clamped_buffer_size()));
        ring.push(tick.clone());

        if is_liquidation_emergency(&tick, &self.cfg) {
            return self
                .emergency_close(position, now, TriggerKind::LiquidationProximity)
                .await;
        }
        if is_pnl_emergency(&tick, &self.cfg) {
            return self.emergency_close(position, now, TriggerKind::PnlShift).await;
        }

        let cooldowns = self.cooldowns.entry(position.symbol.clone()).or_default();
        let fired = evaluate_triggers(ring, &self.cfg, now, cooldowns);
        if fired.is_empty() {
            return JournalRecord {
                symbol: position.symbol.clone(),
                outcome: JournalOutcome::Ok,
                triggers: vec![],
                action: Some(HeartbeatAction::Hold),
                detail: None,
                at: now,
            };
        }

        if !self.rate_limiter.try_acquire(self.cfg.max_calls_per_hour, now) {
            return JournalRecord {
                symbol: position.symbol.clone(),
                outcome: JournalOutcome::Skipped,
                triggers: fired.iter().map(|t| t.as_str()).collect(),
                action: Some(HeartbeatAction::Hold),
                detail: Some("advisory rate limit exceeded".into()),
                at: now,
            };
        }

        for kind in &fired {
            self.cooldowns.entry(position.symbol.clone()).or_default().insert(*kind, now);
        }

        let prompt = build_prompt(position, &fired);
        let action = match self.oracle.decide(&prompt, 30_000).await {
            Ok(content) => extract_action(&content),
            Err(e) => {
                warn!(symbol = %position.symbol, error = %e, "advisory oracle call failed, defaulting to hold");
                HeartbeatAction::Hold
            }
        };

        if let Err(reason) = validate_action(&action, position) {
            return JournalRecord {
                symbol: position.symbol.clone(),
                outcome: JournalOutcome::Rejected,
                triggers: fired.iter().map(|t| t.as_str()).collect(),
                action: Some(action),
                detail: Some(reason),
                at: now,
            };
        }

        self.execute_action(position, action, &fired, now).await
    }

    async fn emergency_close(
        &mut self,
        position: &OpenPosition,
        now: DateTime<Utc>,
        trigger: TriggerKind,
    ) -> JournalRecord {
        let req = ExecuteRequest {
            symbol: position.symbol.clone(),
            side: opposite(position.side),
            size: position.size,
            order_type: OrderType::Market,
            price: None,
            reduce_only: true,
            reasoning: format!("emergency close: {}", trigger.as_str()),
        };
        match self.executor.execute(req).await {
            Ok(resp) if resp.executed => {
                info!(symbol = %position.symbol, trigger = trigger.as_str(), "emergency close executed");
                JournalRecord {
                    symbol: position.symbol.clone(),
                    outcome: JournalOutcome::Ok,
                    triggers: vec![trigger.as_str()],
                    action: Some(HeartbeatAction::CloseEntirely),
                    detail: None,
                    at: now,
                }
            }
            Ok(resp) => JournalRecord {
                symbol: position.symbol.clone(),
                outcome: JournalOutcome::Failed,
                triggers: vec![trigger.as_str()],
                action: Some(HeartbeatAction::CloseEntirely),
                detail: Some(resp.message),
                at: now,
            },
            Err(e) => JournalRecord {
                symbol: position.symbol.clone(),
                outcome: JournalOutcome::Failed,
                triggers: vec![trigger.as_str()],
                action: Some(HeartbeatAction::CloseEntirely),
                detail: Some(e.to_string()),
                at: now,
            },
        }
    }

    async fn execute_action(
        &self,
        position: &OpenPosition,
        action: HeartbeatAction,
        fired: &[TriggerKind],
        now: DateTime<Utc>,
    ) -> JournalRecord {
        let triggers: Vec<&'static str> = fired.iter().map(|t| t.as_str()).collect();

        if matches!(action, HeartbeatAction::TightenStop { .. } | HeartbeatAction::AdjustTakeProfit { .. }) {
            match self.executor.open_orders(&position.symbol).await {
                Ok(existing) => {
                    for order in existing {
                        if let Err(e) = self.executor.cancel_order(&position.symbol, &order.order_id).await {
                            warn!(
                                symbol = %position.symbol,
                                order_id = %order.order_id,
                                error = %e,
                                "failed to cancel existing trigger order before replace"
                            );
                        }
                    }
                }
                Err(e) => {
                    warn!(symbol = %position.symbol, error = %e, "failed to list open orders before trigger replace");
                }
            }
        }

        let req = match action {
            HeartbeatAction::Hold => {
                return JournalRecord {
                    symbol: position.symbol.clone(),
                    outcome: JournalOutcome::Ok,
                    triggers,
                    action: Some(action),
                    detail: None,
                    at: now,
                };
            }
            HeartbeatAction::CloseEntirely => ExecuteRequest {
                symbol: position.symbol.clone(),
                side: opposite(position.side),
                size: position.size,
                order_type: OrderType::Market,
                price: None,
                reduce_only: true,
                reasoning: "advisory close".into(),
            },
            HeartbeatAction::TakePartialProfit { fraction, size } => {
                let qty = size.unwrap_or_else(|| position.size * fraction.unwrap_or(0.0));
                ExecuteRequest {
                    symbol: position.symbol.clone(),
                    side: opposite(position.side),
                    size: qty.min(position.size),
                    order_type: OrderType::Market,
                    price: None,
                    reduce_only: true,
                    reasoning: "advisory partial profit".into(),
                }
            }
            HeartbeatAction::TightenStop { new_stop_price } | HeartbeatAction::AdjustTakeProfit { new_take_profit_price: new_stop_price } => {
                ExecuteRequest {
                    symbol: position.symbol.clone(),
                    side: opposite(position.side),
                    size: position.size,
                    order_type: OrderType::Limit,
                    price: Some(new_stop_price),
                    reduce_only: true,
                    reasoning: "advisory trigger-order replace".into(),
                }
            }
        };

        match self.executor.execute(req).await {
            Ok(resp) if resp.executed => JournalRecord {
                symbol: position.symbol.clone(),
                outcome: JournalOutcome::Ok,
                triggers,
                action: Some(action),
                detail: None,
                at: now,
            },
            Ok(resp) => JournalRecord {
                symbol: position.symbol.clone(),
                outcome: JournalOutcome::Failed,
                triggers,
                action: Some(action),
                detail: Some(resp.message),
                at: now,
            },
            Err(e) => JournalRecord {
                symbol: position.symbol.clone(),
                outcome: JournalOutcome::Failed,
                triggers,
                action: Some(action),
                detail: Some(e.to_string()),
                at: now,
            },
        }
    }
}

fn opposite(side: Side) -> Side {
    match side {
        Side::Long => Side::Short,
        Side::Short => Side::Long,
    }
}

fn build_prompt(position: &OpenPosition, fired: &[TriggerKind]) -> String {
    let trigger_names: Vec<&str> = fired.iter().map(|t| t.as_str()).collect();
    format!(
        "symbol={} side={:?} size={} mark={} pnl_pct={} liq_dist_pct={} triggers={:?}",
        position.symbol,
        position.side,
        position.size,
        position.mark_price,
        position.unrealized_pnl_pct_of_equity,
        position.liq_dist_pct,
        trigger_names
    )
}

