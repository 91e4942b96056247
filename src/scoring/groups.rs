//! Per-group scoring rules.
//!
//! Each group tallies bullish and bearish votes from its indicators;
//! the raw score is `(bullish - bearish) / divisor` clamped to [-2, 2].
//! Signal values record each vote at half its count, signed by side.

use std::collections::BTreeMap;

use crate::data::{BreakOfStructure, FeatureSet, IndicatorSet};
use crate::engine::diagnostics::Diagnosis;
use crate::scoring::{GroupScore, IndicatorGroup};
use crate::types::{DerivativesSnapshot, Phase, PriceZone, StructureLabel, Trend, VolatilityLevel};

/// Everything a group rule may read for one timeframe.
#[derive(Debug, Clone, Copy)]
pub struct ScoringInput<'a> {
    pub diagnosis: &'a Diagnosis,
    pub indicators: &'a IndicatorSet,
    pub features: &'a FeatureSet,
    pub derivatives: Option<&'a DerivativesSnapshot>,
}

#[derive(Debug, Default)]
struct Tally {
    bullish: f64,
    bearish: f64,
    signals: BTreeMap<String, f64>,
}

impl Tally {
    fn bull(&mut self, name: &str, count: f64) {
        self.bullish += count;
        *self.signals.entry(name.to_string()).or_insert(0.0) += count / 2.0;
    }

    fn bear(&mut self, name: &str, count: f64) {
        self.bearish += count;
        *self.signals.entry(name.to_string()).or_insert(0.0) -= count / 2.0;
    }

    /// Record a reading that does not vote.
    fn info(&mut self, name: &str, value: f64) {
        self.signals.insert(name.to_string(), value);
    }

    fn finish(self, group: IndicatorGroup, weight: f64) -> GroupScore {
        let raw_score = ((self.bullish - self.bearish) / group.divisor()).clamp(-2.0, 2.0);
        GroupScore {
            group,
            raw_score,
            weight,
            signals: self.signals,
            summary: summarize(group, raw_score),
        }
    }
}

fn summarize(group: IndicatorGroup, raw: f64) -> String {
    let tone = if raw > 1.0 {
        "strongly bullish"
    } else if raw > 0.3 {
        "mildly bullish"
    } else if raw < -1.0 {
        "strongly bearish"
    } else if raw < -0.3 {
        "mildly bearish"
    } else {
        "neutral"
    };
    format!("{} {}", group.as_str(), tone)
}

pub fn score_trend(input: &ScoringInput<'_>, weight: f64) -> GroupScore {
    let ind = input.indicators;
    let mut t = Tally::default();

    if let (Some(e20), Some(e50), Some(e200)) = (ind.ema_20, ind.ema_50, ind.ema_200) {
        if e20.rising() && e50.rising() && e200.rising() {
            t.bull("ema_stack", 3.0);
        } else if e20.falling() && e50.falling() && e200.falling() {
            t.bear("ema_stack", 3.0);
        }
    }

    if let (Some(adx), Some(plus), Some(minus)) = (ind.adx, ind.plus_di, ind.minus_di) {
        if adx > 25.0 {
            if plus > minus {
                t.bull("adx", 1.0);
            } else if minus > plus {
                t.bear("adx", 1.0);
            }
        }
    }

    match input.features.structure {
        StructureLabel::HigherHigh => t.bull("structure", 1.0),
        StructureLabel::LowerLow => t.bear("structure", 1.0),
        StructureLabel::Range => {}
    }

    match input.diagnosis.trend {
        Trend::Bullish => t.bull("trend_state", 1.0),
        Trend::Bearish => t.bear("trend_state", 1.0),
        Trend::Neutral => {}
    }

    t.finish(IndicatorGroup::Trend, weight)
}

pub fn score_momentum(input: &ScoringInput<'_>, weight: f64) -> GroupScore {
    let ind = input.indicators;
    let mut t = Tally::default();

    if let Some(rsi) = ind.rsi {
        if rsi > 70.0 {
            t.bear("rsi", 1.0);
        } else if rsi < 30.0 {
            t.bull("rsi", 1.0);
        } else if rsi > 50.0 {
            t.bull("rsi", 0.5);
        } else if rsi < 50.0 {
            t.bear("rsi", 0.5);
        }
    }

    if let (Some(macd), Some(signal)) = (ind.macd, ind.macd_signal) {
        if macd > signal {
            t.bull("macd", 1.0);
        } else if macd < signal {
            t.bear("macd", 1.0);
        }
    }

    if let Some(stoch) = ind.stoch_rsi {
        if stoch > 80.0 {
            t.bear("stoch_rsi", 1.0);
        } else if stoch < 20.0 {
            t.bull("stoch_rsi", 1.0);
        }
    }

    if let (Some(wt1), Some(wt2)) = (ind.wt1, ind.wt2) {
        if wt1 > wt2 {
            t.bull("wavetrend", 1.0);
        } else if wt1 < wt2 {
            t.bear("wavetrend", 1.0);
        }
    }

    if let Some(stc) = ind.stc {
        if stc > 75.0 {
            t.bull("stc", 1.0);
        } else if stc < 25.0 {
            t.bear("stc", 1.0);
        }
    }

    for div in &input.features.divergences {
        let name = format!("divergence_{}", div.indicator.to_lowercase());
        match div.bias {
            Trend::Bullish => t.bull(&name, div.strength.weight()),
            Trend::Bearish => t.bear(&name, div.strength.weight()),
            Trend::Neutral => {}
        }
    }

    t.finish(IndicatorGroup::Momentum, weight)
}

pub fn score_volume(input: &ScoringInput<'_>, weight: f64) -> GroupScore {
    let ind = input.indicators;
    let mut t = Tally::default();

    if let Some(obv) = ind.obv {
        if obv.rising() {
            t.bull("obv", 1.0);
        } else if obv.falling() {
            t.bear("obv", 1.0);
        }
    }

    if let Some(cmf) = ind.cmf {
        if cmf > 0.05 {
            t.bull("cmf", 1.0);
        } else if cmf < -0.05 {
            t.bear("cmf", 1.0);
        }
    }

    t.finish(IndicatorGroup::Volume, weight)
}

pub fn score_volatility(input: &ScoringInput<'_>, weight: f64) -> GroupScore {
    let ind = input.indicators;
    let mut t = Tally::default();

    if let (Some(close), Some(upper), Some(lower)) = (ind.close, ind.bb_upper, ind.bb_lower) {
        if close > upper {
            t.bear("bollinger", 1.0);
        } else if close < lower {
            t.bull("bollinger", 1.0);
        }
    }

    if input.features.volatility == VolatilityLevel::High {
        let lean = match input.diagnosis.trend {
            Trend::Bullish => 0.3,
            Trend::Bearish => -0.3,
            Trend::Neutral => 0.0,
        };
        t.info("high_volatility", lean);
    }

    t.finish(IndicatorGroup::Volatility, weight)
}

pub fn score_structure(input: &ScoringInput<'_>, weight: f64) -> GroupScore {
    let features = input.features;
    let mut t = Tally::default();

    match features.break_of_structure {
        Some(BreakOfStructure::Up) => t.bull("bos", 1.0),
        Some(BreakOfStructure::Down) => t.bear("bos", 1.0),
        None => {}
    }

    match features.zone {
        Some(PriceZone::Discount) => t.bull("zone", 1.0),
        Some(PriceZone::Premium) => t.bear("zone", 1.0),
        Some(PriceZone::Equilibrium) | None => {}
    }

    match input.diagnosis.phase {
        Phase::Accumulation | Phase::ExpansionUp => t.bull("phase", 1.0),
        Phase::Distribution | Phase::ExpansionDown => t.bear("phase", 1.0),
        Phase::Shakeout => {}
    }

    t.finish(IndicatorGroup::Structure, weight)
}

pub fn score_derivatives(input: &ScoringInput<'_>, weight: f64) -> GroupScore {
    let mut t = Tally::default();

    if let Some(d) = input.derivatives {
        if let Some(funding) = d.funding_rate {
            if funding > 0.01 {
                t.bear("funding", 1.0);
            } else if funding < -0.01 {
                t.bull("funding", 1.0);
            }
        }

        if let Some(oi) = d.oi_change_pct {
            if oi > 5.0 {
                match input.diagnosis.trend {
                    Trend::Bullish => t.bull("open_interest", 1.0),
                    Trend::Bearish => t.bear("open_interest", 1.0),
                    Trend::Neutral => {}
                }
            }
        }

        if let Some(cvd) = d.cvd {
            if cvd > 0.0 {
                t.bull("cvd", 0.5);
            } else if cvd < 0.0 {
                t.bear("cvd", 0.5);
            }
        }
    }

    t.finish(IndicatorGroup::Derivatives, weight)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{Divergence, DivergenceStrength, SeriesTail};

    fn make_diagnosis(phase: Phase, trend: Trend) -> Diagnosis {
        Diagnosis {
            phase,
            trend,
            pump_score: 0.5,
            risk_score: 0.5,
        }
    }

    #[test]
    fn test_trend_group_all_bullish_saturates() {
        let diag = make_diagnosis(Phase::ExpansionUp, Trend::Bullish);
        let indicators = IndicatorSet {
            ema_20: Some(SeriesTail::new(2.0, 1.0)),
            ema_50: Some(SeriesTail::new(2.0, 1.0)),
            ema_200: Some(SeriesTail::new(2.0, 1.0)),
            adx: Some(30.0),
            plus_di: Some(30.0),
            minus_di: Some(10.0),
            ..IndicatorSet::default()
        };
        let features = FeatureSet {
            structure: StructureLabel::HigherHigh,
            ..FeatureSet::default()
        };
        let input = ScoringInput {
            diagnosis: &diag,
            indicators: &indicators,
            features: &features,
            derivatives: None,
        };
        let score = score_trend(&input, 0.25);
        // (3 + 1 + 1 + 1) / 3 = 2
        assert_eq!(score.raw_score, 2.0);
        assert_eq!(score.signals["ema_stack"], 1.5);
        assert!(score.summary.contains("strongly bullish"));
    }

    #[test]
    fn test_momentum_midline_and_divergence() {
        let diag = make_diagnosis(Phase::Accumulation, Trend::Neutral);
        let indicators = IndicatorSet {
            rsi: Some(40.0),
            ..IndicatorSet::default()
        };
        let features = FeatureSet {
            divergences: vec![Divergence {
                bias: Trend::Bullish,
                strength: DivergenceStrength::Strong,
                indicator: "RSI",
            }],
            ..FeatureSet::default()
        };
        let input = ScoringInput {
            diagnosis: &diag,
            indicators: &indicators,
            features: &features,
            derivatives: None,
        };
        let score = score_momentum(&input, 0.25);
        // (1.5 - 0.5) / 3
        assert!((score.raw_score - 1.0 / 3.0).abs() < 1e-12);
        assert_eq!(score.signals["rsi"], -0.25);
    }

    #[test]
    fn test_bollinger_overbought_is_bearish() {
        let diag = make_diagnosis(Phase::ExpansionUp, Trend::Bullish);
        let indicators = IndicatorSet {
            close: Some(110.0),
            bb_upper: Some(105.0),
            bb_lower: Some(95.0),
            ..IndicatorSet::default()
        };
        let features = FeatureSet {
            volatility: VolatilityLevel::High,
            ..FeatureSet::default()
        };
        let input = ScoringInput {
            diagnosis: &diag,
            indicators: &indicators,
            features: &features,
            derivatives: None,
        };
        let score = score_volatility(&input, 0.1);
        assert!((score.raw_score + 1.0 / 1.5).abs() < 1e-12);
        // Informational only.
        assert_eq!(score.signals["high_volatility"], 0.3);
    }

    #[test]
    fn test_derivatives_group() {
        let diag = make_diagnosis(Phase::ExpansionDown, Trend::Bearish);
        let derivs = DerivativesSnapshot {
            funding_rate: Some(0.02),
            oi_change_pct: Some(8.0),
            cvd: Some(-100.0),
        };
        let indicators = IndicatorSet::default();
        let features = FeatureSet::default();
        let input = ScoringInput {
            diagnosis: &diag,
            indicators: &indicators,
            features: &features,
            derivatives: Some(&derivs),
        };
        let score = score_derivatives(&input, 0.05);
        // -(1 + 1 + 0.5) / 1.5
        assert!((score.raw_score + 2.5 / 1.5).abs() < 1e-12);
        assert_eq!(score.signals["cvd"], -0.25);
    }

    #[test]
    fn test_structure_discount_accumulation() {
        let diag = make_diagnosis(Phase::Accumulation, Trend::Neutral);
        let indicators = IndicatorSet::default();
        let features = FeatureSet {
            zone: Some(PriceZone::Discount),
            break_of_structure: Some(BreakOfStructure::Up),
            ..FeatureSet::default()
        };
        let input = ScoringInput {
            diagnosis: &diag,
            indicators: &indicators,
            features: &features,
            derivatives: None,
        };
        assert_eq!(score_structure(&input, 0.2).raw_score, 1.5);
    }
}
