//! Pure classification rules. No I/O, no clock reads — every input is
//! explicit so the boundary cases in the testable-properties table are
//! exercised directly.

use crate::types::{Expression, LiquidityBucket, MarketRegime, SignalClass, SignalCluster};

pub fn classify_market_regime(cluster: &SignalCluster) -> MarketRegime {
    if cluster.vol_z >= 1.0 {
        MarketRegime::HighVolExpansion
    } else if cluster.vol_z <= -0.5 {
        MarketRegime::LowVolCompression
    } else if cluster.trend.abs() >= 0.015 {
        MarketRegime::Trending
    } else {
        MarketRegime::Choppy
    }
}

pub fn classify_volatility_bucket(cluster: &SignalCluster) -> crate::types::VolatilityBucket {
    use crate::types::VolatilityBucket::*;
    let abs = cluster.vol_z.abs();
    if abs >= 1.2 {
        High
    } else if abs <= 0.4 {
        Low
    } else {
        Medium
    }
}

pub fn classify_liquidity_bucket(cluster: &SignalCluster) -> LiquidityBucket {
    if cluster.orderflow_trade_count >= 18 {
        LiquidityBucket::Deep
    } else if cluster.orderflow_trade_count <= 4 {
        LiquidityBucket::Thin
    } else {
        LiquidityBucket::Normal
    }
}

/// Explicit field is authoritative; substring inference on the hypothesis id
/// is a legacy fallback only (see DESIGN.md Open Question 3).
pub fn classify_signal(expr: &Expression) -> SignalClass {
    if let Some(explicit) = expr.signal_class {
        return explicit;
    }
    infer_signal_class_legacy(&expr.hypothesis_id, expr.news_trigger.is_some())
}

pub fn infer_signal_class_legacy(hypothesis_id: &str, has_news_trigger: bool) -> SignalClass {
    if hypothesis_id.contains("_revert") {
        SignalClass::MeanReversion
    } else if hypothesis_id.contains("_reflex") {
        SignalClass::LiquidationCascade
    } else if hypothesis_id.contains("_trend") {
        SignalClass::MomentumBreakout
    } else if has_news_trigger {
        SignalClass::NewsEvent
    } else {
        SignalClass::Unknown
    }
}

/// Fixed regime/signal-class compatibility matrix.
pub fn signal_class_allowed(signal: SignalClass, regime: MarketRegime) -> bool {
    use MarketRegime::*;
    use SignalClass::*;
    match regime {
        Trending => matches!(signal, MomentumBreakout | NewsEvent | LiquidationCascade),
        Choppy => matches!(signal, MeanReversion | NewsEvent),
        HighVolExpansion => matches!(signal, LiquidationCascade | NewsEvent | MomentumBreakout),
        LowVolCompression => matches!(signal, MeanReversion | NewsEvent),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cluster(trend: f64, vol_z: f64) -> SignalCluster {
        SignalCluster { trend, vol_z, orderflow_trade_count: 10, primitives: vec![] }
    }

    #[test]
    fn high_vol_expansion_inclusive_boundary() {
        assert_eq!(classify_market_regime(&cluster(0.0, 1.0)), MarketRegime::HighVolExpansion);
    }

    #[test]
    fn low_vol_compression_inclusive_boundary() {
        assert_eq!(classify_market_regime(&cluster(0.0, -0.5)), MarketRegime::LowVolCompression);
    }

    #[test]
    fn trending_requires_threshold() {
        assert_eq!(classify_market_regime(&cluster(0.02, 0.4)), MarketRegime::Trending);
        assert_eq!(classify_market_regime(&cluster(0.001, 0.4)), MarketRegime::Choppy);
    }

    #[test]
    fn liquidity_buckets() {
        assert_eq!(classify_liquidity_bucket(&SignalCluster { orderflow_trade_count: 18, ..cluster(0.0, 0.0) }), LiquidityBucket::Deep);
        assert_eq!(classify_liquidity_bucket(&SignalCluster { orderflow_trade_count: 4, ..cluster(0.0, 0.0) }), LiquidityBucket::Thin);
        assert_eq!(classify_liquidity_bucket(&SignalCluster { orderflow_trade_count: 10, ..cluster(0.0, 0.0) }), LiquidityBucket::Normal);
    }

    #[test]
    fn legacy_inference_by_substring() {
        assert_eq!(infer_signal_class_legacy("btc_revert_01", false), SignalClass::MeanReversion);
        assert_eq!(infer_signal_class_legacy("eth_reflex_02", false), SignalClass::LiquidationCascade);
        assert_eq!(infer_signal_class_legacy("sol_trend_03", false), SignalClass::MomentumBreakout);
        assert_eq!(infer_signal_class_legacy("xyz", true), SignalClass::NewsEvent);
        assert_eq!(infer_signal_class_legacy("xyz", false), SignalClass::Unknown);
    }

    #[test]
    fn explicit_field_wins_over_inference() {
        let expr = Expression {
            hypothesis_id: "btc_revert_01".into(),
            symbol: "BTC".into(),
            side: crate::types::Side::Long,
            signal_class: Some(SignalClass::MomentumBreakout),
            confidence: 0.5,
            expected_edge: 0.01,
            leverage: 2,
            probe_size_micros: 1_000_000,
            news_trigger: None,
        };
        assert_eq!(classify_signal(&expr), SignalClass::MomentumBreakout);
    }

    #[test]
    fn regime_compatibility_matrix_s1() {
        // S1: trending regime, mean_reversion signal -> disallowed.
        assert!(!signal_class_allowed(SignalClass::MeanReversion, MarketRegime::Trending));
    }
}
