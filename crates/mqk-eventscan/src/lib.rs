//! Event-scan coordinator: debounces externally-triggered scans between
//! scheduler ticks.
//!
//! One `EventScanCoordinator` is owned per process and shared (behind a
//! mutex, at the caller's discretion) across the handlers that can raise a
//! scan request. Cooldown state is intentionally not persisted: losing it on
//! restart just means the next external event is allowed through again.

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanVerdict {
    Disabled,
    BelowMinItems,
    /// Still cooling down; caller must wait at least this long.
    Cooldown { wait: Duration },
    Allowed,
}

#[derive(Debug, Clone)]
pub struct EventScanConfig {
    pub enabled: bool,
    pub cooldown: Duration,
}

impl Default for EventScanConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            cooldown: Duration::from_millis(60_000),
        }
    }
}

#[derive(Debug, Clone)]
pub struct EvaluateInput<'a> {
    pub event_key: &'a str,
    pub item_count: usize,
    pub min_items: usize,
    pub now: DateTime<Utc>,
}

/// Per-key cooldown tracker. Not `Sync`; wrap in a mutex to share across tasks.
#[derive(Debug, Default)]
pub struct EventScanCoordinator {
    cfg: EventScanConfig,
    last_fired: HashMap<String, DateTime<Utc>>,
}

impl EventScanCoordinator {
    pub fn new(cfg: EventScanConfig) -> Self {
        Self {
            cfg,
            last_fired: HashMap::new(),
        }
    }

    pub fn evaluate(&self, input: &EvaluateInput<'_>) -> ScanVerdict {
        if !self.cfg.enabled {
            return ScanVerdict::Disabled;
        }
        if input.item_count < input.min_items {
            return ScanVerdict::BelowMinItems;
        }
        if let Some(last) = self.last_fired.get(input.event_key) {
            let elapsed = (input.now - *last)
                .to_std()
                .unwrap_or(Duration::ZERO);
            if elapsed < self.cfg.cooldown {
                return ScanVerdict::Cooldown {
                    wait: self.cfg.cooldown - elapsed,
                };
            }
        }
        ScanVerdict::Allowed
    }

    pub fn mark_triggered(&mut self, event_key: &str, now: DateTime<Utc>) {
        self.last_fired.insert(event_key.to_string(), now);
    }

    /// Evaluate and, if allowed, atomically record the fire so a concurrent
    /// caller sees the updated cooldown immediately.
    pub fn try_acquire(&mut self, input: &EvaluateInput<'_>) -> ScanVerdict {
        let verdict = self.evaluate(input);
        if verdict == ScanVerdict::Allowed {
            self.mark_triggered(input.event_key, input.now);
            tracing::debug!(event_key = input.event_key, "event scan admitted");
        }
        verdict
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    #[test]
    fn disabled_coordinator_never_triggers() {
        let c = EventScanCoordinator::new(EventScanConfig {
            enabled: false,
            cooldown: Duration::from_secs(1),
        });
        let v = c.evaluate(&EvaluateInput {
            event_key: "btc",
            item_count: 100,
            min_items: 1,
            now: t(0),
        });
        assert_eq!(v, ScanVerdict::Disabled);
    }

    #[test]
    fn below_min_items_blocks() {
        let c = EventScanCoordinator::new(EventScanConfig::default());
        let v = c.evaluate(&EvaluateInput {
            event_key: "btc",
            item_count: 2,
            min_items: 5,
            now: t(0),
        });
        assert_eq!(v, ScanVerdict::BelowMinItems);
    }

    #[test]
    fn cooldown_is_independent_per_key() {
        let mut c = EventScanCoordinator::new(EventScanConfig {
            enabled: true,
            cooldown: Duration::from_secs(60),
        });
        let input_btc = EvaluateInput {
            event_key: "btc",
            item_count: 10,
            min_items: 1,
            now: t(0),
        };
        assert_eq!(c.try_acquire(&input_btc), ScanVerdict::Allowed);

        // Same key, still cooling down.
        let again = EvaluateInput { now: t(10), ..input_btc };
        match c.evaluate(&again) {
            ScanVerdict::Cooldown { wait } => assert_eq!(wait, Duration::from_secs(50)),
            other => panic!("expected cooldown, got {other:?}"),
        }

        // Different key is unaffected.
        let eth = EvaluateInput {
            event_key: "eth",
            item_count: 10,
            min_items: 1,
            now: t(10),
        };
        assert_eq!(c.evaluate(&eth), ScanVerdict::Allowed);
    }

    #[test]
    fn cooldown_expires() {
        let mut c = EventScanCoordinator::new(EventScanConfig {
            enabled: true,
            cooldown: Duration::from_secs(60),
        });
        let input = EvaluateInput {
            event_key: "btc",
            item_count: 10,
            min_items: 1,
            now: t(0),
        };
        assert_eq!(c.try_acquire(&input), ScanVerdict::Allowed);
        let later = EvaluateInput { now: t(61), ..input };
        assert_eq!(c.evaluate(&later), ScanVerdict::Allowed);
    }
}
