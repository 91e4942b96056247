//! Diagnostics pipeline: market phase, pump score and risk score.

use serde::{Deserialize, Serialize};

use crate::data::{FeatureSet, IndicatorSet};
use crate::types::{
    DerivativesSnapshot, LiquidityLevel, Phase, StructureLabel, Trend, VolatilityLevel,
};

/// Output of the diagnostics pipeline for one symbol × timeframe.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Diagnosis {
    pub phase: Phase,
    pub trend: Trend,
    /// Upside opportunity in [0, 1].
    pub pump_score: f64,
    /// Downside danger in [0, 1].
    pub risk_score: f64,
}

#[derive(Debug, Default, Clone)]
pub struct DiagnosticsAnalyzer;

impl DiagnosticsAnalyzer {
    pub fn new() -> Self {
        Self
    }

    pub fn analyze(
        &self,
        features: &FeatureSet,
        indicators: &IndicatorSet,
        derivatives: Option<&DerivativesSnapshot>,
    ) -> Diagnosis {
        let phase = refine_phase(base_phase(features), derivatives);
        Diagnosis {
            phase,
            trend: features.trend,
            pump_score: pump_score(phase, features, indicators, derivatives),
            risk_score: risk_score(phase, features, derivatives),
        }
    }
}

// ---------------------------------------------------------------------------
// Phase
// ---------------------------------------------------------------------------

fn base_phase(features: &FeatureSet) -> Phase {
    let liquid = features.liquidity >= LiquidityLevel::Medium;
    if features.volatility == VolatilityLevel::High && features.liquidity == LiquidityLevel::Low {
        Phase::Shakeout
    } else if features.trend == Trend::Bullish && liquid {
        Phase::ExpansionUp
    } else if features.trend == Trend::Bearish && liquid {
        Phase::ExpansionDown
    } else if matches!(features.trend, Trend::Neutral | Trend::Bullish) {
        Phase::Accumulation
    } else {
        Phase::Distribution
    }
}

/// Funding and open interest can overturn the price-only phase.
fn refine_phase(phase: Phase, derivatives: Option<&DerivativesSnapshot>) -> Phase {
    let Some(d) = derivatives else {
        return phase;
    };
    let (Some(funding), Some(oi)) = (d.funding_rate, d.oi_change_pct) else {
        return phase;
    };
    match phase {
        // Shorts piling in under accumulation.
        Phase::Accumulation if funding < -0.001 && oi > 5.0 => Phase::Shakeout,
        // Crowded longs closing into strength.
        Phase::ExpansionUp if funding > 0.01 && oi < -5.0 => Phase::Distribution,
        other => other,
    }
}

// ---------------------------------------------------------------------------
// Scores
// ---------------------------------------------------------------------------

fn pump_score(
    phase: Phase,
    features: &FeatureSet,
    indicators: &IndicatorSet,
    derivatives: Option<&DerivativesSnapshot>,
) -> f64 {
    let phase_part = match phase {
        Phase::Accumulation => 0.3,
        Phase::Shakeout => 0.25,
        Phase::ExpansionUp => 0.2,
        Phase::Distribution | Phase::ExpansionDown => 0.0,
    };
    let trend_part = match features.trend {
        Trend::Bullish => 1.0,
        Trend::Neutral => 0.5,
        Trend::Bearish => 0.0,
    };
    let structure_part = match features.structure {
        StructureLabel::HigherHigh => 1.0,
        StructureLabel::Range => 0.5,
        StructureLabel::LowerLow => 0.0,
    };
    let volatility_part = match features.volatility {
        VolatilityLevel::Low => 1.0,
        VolatilityLevel::Medium => 0.5,
        VolatilityLevel::High => 0.0,
    };

    let mut derivatives_part: f64 = 0.0;
    if let Some(d) = derivatives {
        if d.cvd.is_some_and(|cvd| cvd > 0.0) {
            derivatives_part += 0.3;
        }
        match d.oi_change_pct {
            Some(oi) if oi > 5.0 => derivatives_part += 0.3,
            Some(oi) if oi > 0.0 => derivatives_part += 0.15,
            _ => {}
        }
        match d.funding_rate {
            Some(f) if f < -0.001 => derivatives_part += 0.2,
            Some(f) if f < 0.0 => derivatives_part += 0.1,
            _ => {}
        }
    }
    let derivatives_part = derivatives_part.min(1.0);

    let mut score = phase_part * 0.3
        + trend_part * 0.2
        + volatility_part * 0.1
        + structure_part * 0.15
        + derivatives_part * 0.25;

    // Discount to VWAP and to the long EMA.
    if let Some(close) = indicators.close {
        if indicators.vwap.is_some_and(|v| v > 0.0 && (v - close) / v > 0.02) {
            score += 0.05;
        }
        if indicators
            .ema_200
            .is_some_and(|e| e.last > 0.0 && (e.last - close) / e.last > 0.05)
        {
            score += 0.05;
        }
    }

    score.clamp(0.0, 1.0)
}

fn risk_score(phase: Phase, features: &FeatureSet, derivatives: Option<&DerivativesSnapshot>) -> f64 {
    let volatility_part = match features.volatility {
        VolatilityLevel::High => 1.0,
        VolatilityLevel::Medium => 0.5,
        VolatilityLevel::Low => 0.0,
    };
    let liquidity_part = match features.liquidity {
        LiquidityLevel::Low => 1.0,
        LiquidityLevel::Medium => 0.5,
        LiquidityLevel::High => 0.0,
    };
    let phase_part = match phase {
        Phase::Shakeout => 0.2,
        Phase::ExpansionDown => 0.15,
        Phase::Distribution => 0.1,
        Phase::ExpansionUp => 0.05,
        Phase::Accumulation => 0.0,
    };
    let derivatives_part = match derivatives.and_then(|d| d.funding_rate).map(f64::abs) {
        Some(f) if f > 0.01 => 1.0,
        Some(f) if f > 0.001 => 0.6,
        Some(f) if f > 0.0 => 0.3,
        _ => 0.0,
    };
    let trend_part = match features.trend {
        Trend::Bearish => 1.0,
        Trend::Neutral => 0.5,
        Trend::Bullish => 0.0,
    };

    let risk: f64 = volatility_part * 0.3
        + liquidity_part * 0.25
        + phase_part * 0.2
        + derivatives_part * 0.15
        + trend_part * 0.1;
    risk.clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::SeriesTail;

    fn make_features(
        trend: Trend,
        volatility: VolatilityLevel,
        liquidity: LiquidityLevel,
        structure: StructureLabel,
    ) -> FeatureSet {
        FeatureSet {
            trend,
            volatility,
            liquidity,
            structure,
            ..FeatureSet::default()
        }
    }

    #[test]
    fn test_phase_rules() {
        let shake = make_features(
            Trend::Bullish,
            VolatilityLevel::High,
            LiquidityLevel::Low,
            StructureLabel::Range,
        );
        assert_eq!(base_phase(&shake), Phase::Shakeout);

        let up = make_features(
            Trend::Bullish,
            VolatilityLevel::Medium,
            LiquidityLevel::High,
            StructureLabel::Range,
        );
        assert_eq!(base_phase(&up), Phase::ExpansionUp);

        let down = make_features(
            Trend::Bearish,
            VolatilityLevel::Medium,
            LiquidityLevel::Medium,
            StructureLabel::Range,
        );
        assert_eq!(base_phase(&down), Phase::ExpansionDown);

        let acc = make_features(
            Trend::Neutral,
            VolatilityLevel::Low,
            LiquidityLevel::Low,
            StructureLabel::Range,
        );
        assert_eq!(base_phase(&acc), Phase::Accumulation);

        let dist = make_features(
            Trend::Bearish,
            VolatilityLevel::Low,
            LiquidityLevel::Low,
            StructureLabel::Range,
        );
        assert_eq!(base_phase(&dist), Phase::Distribution);
    }

    #[test]
    fn test_derivative_refinements() {
        let shorts = DerivativesSnapshot {
            funding_rate: Some(-0.005),
            oi_change_pct: Some(8.0),
            cvd: None,
        };
        assert_eq!(refine_phase(Phase::Accumulation, Some(&shorts)), Phase::Shakeout);

        let longs = DerivativesSnapshot {
            funding_rate: Some(0.02),
            oi_change_pct: Some(-8.0),
            cvd: None,
        };
        assert_eq!(refine_phase(Phase::ExpansionUp, Some(&longs)), Phase::Distribution);
        assert_eq!(refine_phase(Phase::ExpansionUp, None), Phase::ExpansionUp);
    }

    #[test]
    fn test_pump_score_components() {
        let features = make_features(
            Trend::Bullish,
            VolatilityLevel::Low,
            LiquidityLevel::Low,
            StructureLabel::HigherHigh,
        );
        let derivs = DerivativesSnapshot {
            funding_rate: Some(-0.005),
            oi_change_pct: Some(10.0),
            cvd: Some(1.0),
        };
        // phase .3*.3 + trend .2 + vol .1 + structure .15 + derivs .8*.25
        let score = pump_score(
            Phase::Accumulation,
            &features,
            &IndicatorSet::default(),
            Some(&derivs),
        );
        assert!((score - (0.09 + 0.2 + 0.1 + 0.15 + 0.2)).abs() < 1e-12);
    }

    #[test]
    fn test_pump_discount_bonuses() {
        let features = FeatureSet::default();
        let base = pump_score(Phase::Distribution, &features, &IndicatorSet::default(), None);
        let indicators = IndicatorSet {
            close: Some(90.0),
            vwap: Some(100.0),
            ema_200: Some(SeriesTail::new(100.0, 100.0)),
            ..IndicatorSet::default()
        };
        let boosted = pump_score(Phase::Distribution, &features, &indicators, None);
        assert!((boosted - base - 0.10).abs() < 1e-12);
    }

    #[test]
    fn test_risk_score_worst_case() {
        let features = make_features(
            Trend::Bearish,
            VolatilityLevel::High,
            LiquidityLevel::Low,
            StructureLabel::LowerLow,
        );
        let derivs = DerivativesSnapshot {
            funding_rate: Some(-0.05),
            ..DerivativesSnapshot::default()
        };
        let risk = risk_score(Phase::Shakeout, &features, Some(&derivs));
        assert!((risk - (0.3 + 0.25 + 0.04 + 0.15 + 0.1)).abs() < 1e-12);
        assert!(risk <= 1.0);
    }

    #[test]
    fn test_risk_score_middle_tiers() {
        let features = make_features(
            Trend::Neutral,
            VolatilityLevel::Medium,
            LiquidityLevel::Medium,
            StructureLabel::Range,
        );
        let derivs = DerivativesSnapshot {
            funding_rate: Some(0.005),
            ..DerivativesSnapshot::default()
        };
        // vol .5*.3 + liq .5*.25 + phase .1*.2 + funding .6*.15 + trend .5*.1
        let risk = risk_score(Phase::Distribution, &features, Some(&derivs));
        assert!((risk - (0.15 + 0.125 + 0.02 + 0.09 + 0.05)).abs() < 1e-12);

        let calm = make_features(
            Trend::Bullish,
            VolatilityLevel::Low,
            LiquidityLevel::High,
            StructureLabel::HigherHigh,
        );
        assert_eq!(risk_score(Phase::Accumulation, &calm, None), 0.0);
    }

    #[test]
    fn test_analyze_scores_in_range() {
        let analyzer = DiagnosticsAnalyzer::new();
        let diagnosis = analyzer.analyze(&FeatureSet::default(), &IndicatorSet::default(), None);
        assert_eq!(diagnosis.phase, Phase::Accumulation);
        assert!((0.0..=1.0).contains(&diagnosis.pump_score));
        assert!((0.0..=1.0).contains(&diagnosis.risk_score));
    }
}
