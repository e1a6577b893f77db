use crate::types::{HeartbeatAction, OpenPosition, Side};

/// Implements §4.E.1. Returns `Ok(())` for a valid action, `Err(reason)`
/// otherwise; the caller journals invalid actions as `rejected` without
/// ever calling the executor.
pub fn validate_action(action: &HeartbeatAction, position: &OpenPosition) -> Result<(), String> {
    match action {
        HeartbeatAction::Hold | HeartbeatAction::CloseEntirely => Ok(()),
        HeartbeatAction::TakePartialProfit { fraction, size } => {
            match (fraction, size) {
                (Some(f), None) if *f > 0.0 && *f < 1.0 => Ok(()),
                (None, Some(s)) if *s > 0.0 => Ok(()),
                (Some(_), Some(_)) => Err("exactly one of fraction or size must be set".into()),
                (None, None) => Err("one of fraction or size must be set".into()),
                _ => Err("fraction must be in (0,1) or size must be > 0".into()),
            }
        }
        HeartbeatAction::AdjustTakeProfit { new_take_profit_price } => {
            if *new_take_profit_price > 0.0 {
                Ok(())
            } else {
                Err("new take-profit price must be > 0".into())
            }
        }
        HeartbeatAction::TightenStop { new_stop_price } => {
            if *new_stop_price <= 0.0 {
                return Err("new stop price must be > 0".into());
            }
            if let Some(current) = position.stop_price {
                let loosens = match position.side {
                    Side::Long => *new_stop_price < current,
                    Side::Short => *new_stop_price > current,
                };
                if loosens {
                    return Err("tighten_stop must not loosen the existing stop".into());
                }
            }
            let wrong_side = match position.side {
                Side::Long => *new_stop_price > position.mark_price,
                Side::Short => *new_stop_price < position.mark_price,
            };
            if wrong_side {
                return Err("stop must remain on the loss-protection side of mark".into());
            }
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn long_position(mark: f64, stop: Option<f64>) -> OpenPosition {
        OpenPosition {
            symbol: "BTC".into(),
            side: Side::Long,
            size: 1.0,
            mark_price: mark,
            unrealized_pnl_pct_of_equity: 0.0,
            liq_dist_pct: 50.0,
            funding_rate: 0.0,
            stop_price: stop,
            take_profit_price: None,
            opened_at: Utc.timestamp_opt(1_700_000_000, 0).unwrap(),
        }
    }

    #[test]
    fn tighten_stop_cannot_loosen_long() {
        let pos = long_position(100.0, Some(95.0));
        let action = HeartbeatAction::TightenStop { new_stop_price: 93.0 };
        assert!(validate_action(&action, &pos).is_err());
    }

    #[test]
    fn tighten_stop_accepts_valid_long() {
        let pos = long_position(100.0, Some(95.0));
        let action = HeartbeatAction::TightenStop { new_stop_price: 97.0 };
        assert!(validate_action(&action, &pos).is_ok());
    }

    #[test]
    fn tighten_stop_rejects_wrong_side_of_mark() {
        let pos = long_position(100.0, Some(95.0));
        let action = HeartbeatAction::TightenStop { new_stop_price: 101.0 };
        assert!(validate_action(&action, &pos).is_err());
    }

    #[test]
    fn take_partial_profit_requires_exactly_one_of_fraction_or_size() {
        let pos = long_position(100.0, None);
        assert!(validate_action(&HeartbeatAction::TakePartialProfit { fraction: None, size: None }, &pos).is_err());
        assert!(validate_action(
            &HeartbeatAction::TakePartialProfit { fraction: Some(0.5), size: Some(1.0) },
            &pos
        )
        .is_err());
        assert!(validate_action(&HeartbeatAction::TakePartialProfit { fraction: Some(0.5), size: None }, &pos).is_ok());
    }
}
