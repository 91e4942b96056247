//! Group weights, timeframe weights and outcome-driven weight tuning.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::scoring::IndicatorGroup;
use crate::types::Timeframe;

/// Minimum samples per group before a correlation is trusted.
pub const MIN_RECOMMENDATION_SAMPLES: usize = 10;
const WEIGHT_CAP: f64 = 0.35;
const WEIGHT_FLOOR: f64 = 0.05;

// ---------------------------------------------------------------------------
// Group weights
// ---------------------------------------------------------------------------

/// Contribution of each indicator group to a timeframe's weighted raw score.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GroupWeights {
    pub trend: f64,
    pub momentum: f64,
    pub volume: f64,
    pub volatility: f64,
    pub structure: f64,
    pub derivatives: f64,
}

impl Default for GroupWeights {
    fn default() -> Self {
        Self {
            trend: 0.25,
            momentum: 0.25,
            volume: 0.15,
            volatility: 0.10,
            structure: 0.20,
            derivatives: 0.05,
        }
    }
}

impl GroupWeights {
    pub fn get(&self, group: IndicatorGroup) -> f64 {
        match group {
            IndicatorGroup::Trend => self.trend,
            IndicatorGroup::Momentum => self.momentum,
            IndicatorGroup::Volume => self.volume,
            IndicatorGroup::Volatility => self.volatility,
            IndicatorGroup::Structure => self.structure,
            IndicatorGroup::Derivatives => self.derivatives,
        }
    }

    pub fn set(&mut self, group: IndicatorGroup, weight: f64) {
        let slot = match group {
            IndicatorGroup::Trend => &mut self.trend,
            IndicatorGroup::Momentum => &mut self.momentum,
            IndicatorGroup::Volume => &mut self.volume,
            IndicatorGroup::Volatility => &mut self.volatility,
            IndicatorGroup::Structure => &mut self.structure,
            IndicatorGroup::Derivatives => &mut self.derivatives,
        };
        *slot = weight;
    }

    pub fn sum(&self) -> f64 {
        IndicatorGroup::ALL.iter().map(|g| self.get(*g)).sum()
    }

    /// Rescale so the weights sum to 1. A zero total leaves them untouched.
    pub fn normalized(&self) -> Self {
        let total = self.sum();
        if total <= 0.0 {
            return *self;
        }
        let mut out = *self;
        for group in IndicatorGroup::ALL {
            out.set(*group, self.get(*group) / total);
        }
        out
    }
}

// ---------------------------------------------------------------------------
// Timeframe weights
// ---------------------------------------------------------------------------

/// Weight of `timeframe` when aggregating toward `target`, before renormalization.
///
/// Sub-hourly targets use the 1h row; timeframes outside the table get 0.1.
pub fn timeframe_weight(timeframe: Timeframe, target: Timeframe) -> f64 {
    let row: [f64; 4] = match target {
        Timeframe::M1 | Timeframe::M15 | Timeframe::H1 => [0.50, 0.30, 0.15, 0.05],
        Timeframe::H4 => [0.20, 0.40, 0.30, 0.10],
        Timeframe::D1 => [0.10, 0.25, 0.40, 0.25],
        Timeframe::W1 => [0.05, 0.15, 0.30, 0.50],
    };
    match timeframe {
        Timeframe::H1 => row[0],
        Timeframe::H4 => row[1],
        Timeframe::D1 => row[2],
        Timeframe::W1 => row[3],
        Timeframe::M1 | Timeframe::M15 => 0.1,
    }
}

// ---------------------------------------------------------------------------
// Recommendations
// ---------------------------------------------------------------------------

/// One logged evaluation: per-group raw scores and the realized return.
#[derive(Debug, Clone, PartialEq)]
pub struct WeightSample {
    /// Raw score per group label.
    pub group_scores: BTreeMap<String, f64>,
    pub forward_return: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WeightRecommendation {
    pub group: IndicatorGroup,
    pub current: f64,
    pub recommended: f64,
    pub correlation: f64,
    pub samples: usize,
}

/// Suggest weight changes from the correlation between each group's raw
/// score and the forward return.
///
/// Strongly predictive groups (corr > 0.3) gain 20% up to 0.35,
/// anti-predictive ones (corr < -0.1) lose 20% down to 0.05. Only
/// changes larger than 0.01 are returned.
pub fn recommend_weights(
    samples: &[WeightSample],
    current: &GroupWeights,
) -> Vec<WeightRecommendation> {
    let mut out = Vec::new();

    for group in IndicatorGroup::ALL {
        let (xs, ys): (Vec<f64>, Vec<f64>) = samples
            .iter()
            .filter_map(|s| {
                s.group_scores
                    .get(group.as_str())
                    .map(|score| (*score, s.forward_return))
            })
            .unzip();
        if xs.len() < MIN_RECOMMENDATION_SAMPLES {
            continue;
        }
        let Some(corr) = pearson(&xs, &ys) else {
            continue;
        };

        let weight = current.get(*group);
        let recommended = if corr > 0.3 {
            (weight * 1.2).min(WEIGHT_CAP)
        } else if corr < -0.1 {
            (weight * 0.8).max(WEIGHT_FLOOR)
        } else {
            weight
        };

        if (recommended - weight).abs() > 0.01 {
            out.push(WeightRecommendation {
                group: *group,
                current: weight,
                recommended,
                correlation: corr,
                samples: xs.len(),
            });
        }
    }

    out
}

/// Apply recommendations and renormalize to a sum of 1.
pub fn apply_recommendations(
    current: &GroupWeights,
    recommendations: &[WeightRecommendation],
) -> GroupWeights {
    let mut weights = *current;
    for rec in recommendations {
        weights.set(rec.group, rec.recommended);
    }
    weights.normalized()
}

/// Pearson correlation; `None` when either side has no variance.
pub fn pearson(xs: &[f64], ys: &[f64]) -> Option<f64> {
    let n = xs.len().min(ys.len());
    if n < 2 {
        return None;
    }
    let mx = xs[..n].iter().sum::<f64>() / n as f64;
    let my = ys[..n].iter().sum::<f64>() / n as f64;

    let mut cov = 0.0;
    let mut vx = 0.0;
    let mut vy = 0.0;
    for (x, y) in xs[..n].iter().zip(&ys[..n]) {
        cov += (x - mx) * (y - my);
        vx += (x - mx).powi(2);
        vy += (y - my).powi(2);
    }
    if vx <= 0.0 || vy <= 0.0 {
        return None;
    }
    Some(cov / (vx.sqrt() * vy.sqrt()))
}
