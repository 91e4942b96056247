//! Multi-timeframe scoring engine.
//!
//! `score_timeframe` folds six indicator groups into a weighted raw score
//! in [-2, 2] and saturates it into long/short scores on a 0–10 scale.
//! `aggregate_multi_tf` blends several timeframes toward a target and
//! measures how much they agree.

pub mod groups;
pub mod weights;

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::RwLock;
use tracing::debug;

use crate::data::{FeatureSet, IndicatorSet};
use crate::engine::diagnostics::Diagnosis;
use crate::types::{DerivativesSnapshot, Direction, MomentumGrade, ScanError, Timeframe};

pub use groups::ScoringInput;
pub use weights::{timeframe_weight, GroupWeights};

/// Weighted raw scores within this band count as having no direction.
const SIGN_DEAD_ZONE: f64 = 0.2;

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IndicatorGroup {
    Trend,
    Momentum,
    Volume,
    Volatility,
    Structure,
    Derivatives,
}

impl IndicatorGroup {
    pub const ALL: &'static [IndicatorGroup] = &[
        IndicatorGroup::Trend,
        IndicatorGroup::Momentum,
        IndicatorGroup::Volume,
        IndicatorGroup::Volatility,
        IndicatorGroup::Structure,
        IndicatorGroup::Derivatives,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            IndicatorGroup::Trend => "trend",
            IndicatorGroup::Momentum => "momentum",
            IndicatorGroup::Volume => "volume",
            IndicatorGroup::Volatility => "volatility",
            IndicatorGroup::Structure => "structure",
            IndicatorGroup::Derivatives => "derivatives",
        }
    }

    /// Vote count that maps to a raw score of 1.
    pub fn divisor(&self) -> f64 {
        match self {
            IndicatorGroup::Trend | IndicatorGroup::Momentum => 3.0,
            IndicatorGroup::Structure => 2.0,
            IndicatorGroup::Volume | IndicatorGroup::Volatility | IndicatorGroup::Derivatives => 1.5,
        }
    }
}

impl fmt::Display for IndicatorGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupScore {
    pub group: IndicatorGroup,
    /// In [-2, 2].
    pub raw_score: f64,
    pub weight: f64,
    pub signals: BTreeMap<String, f64>,
    pub summary: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeframeScore {
    pub timeframe: Timeframe,
    /// Timeframe weight toward the target, before renormalization.
    pub weight: f64,
    pub groups: BTreeMap<IndicatorGroup, GroupScore>,
    pub weighted_raw: f64,
    pub normalized_long: f64,
    pub normalized_short: f64,
    pub net_score: f64,
}

impl TimeframeScore {
    /// Raw score per group label, as stored with snapshots.
    pub fn group_raw_scores(&self) -> BTreeMap<String, f64> {
        self.groups
            .iter()
            .map(|(g, s)| (g.as_str().to_string(), s.raw_score))
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MultiTimeframeScore {
    pub target: Timeframe,
    pub per_tf: BTreeMap<Timeframe, TimeframeScore>,
    pub aggregated_long: f64,
    pub aggregated_short: f64,
    pub net_score: f64,
    /// Cross-timeframe agreement in [0, 1].
    pub confidence: f64,
    pub direction: Direction,
    pub momentum: MomentumGrade,
    /// Weighted mean of the per-timeframe weighted raw scores.
    pub consensus_raw: f64,
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

/// Scores timeframes with replaceable group weights.
#[derive(Debug, Default)]
pub struct ScoringEngine {
    weights: RwLock<GroupWeights>,
}

impl ScoringEngine {
    pub fn new(weights: GroupWeights) -> Self {
        Self {
            weights: RwLock::new(weights),
        }
    }

    /// Active weights.
    pub fn weights(&self) -> GroupWeights {
        *self.weights.read().unwrap_or_else(|e| e.into_inner())
    }

    pub fn set_weights(&self, weights: GroupWeights) {
        *self.weights.write().unwrap_or_else(|e| e.into_inner()) = weights;
    }

    pub fn score_timeframe(
        &self,
        diagnosis: &Diagnosis,
        indicators: &IndicatorSet,
        features: &FeatureSet,
        derivatives: Option<&DerivativesSnapshot>,
        timeframe: Timeframe,
        target: Timeframe,
    ) -> TimeframeScore {
        let weights = self.weights();
        let input = ScoringInput {
            diagnosis,
            indicators,
            features,
            derivatives,
        };

        let scored = [
            groups::score_trend(&input, weights.trend),
            groups::score_momentum(&input, weights.momentum),
            groups::score_volume(&input, weights.volume),
            groups::score_volatility(&input, weights.volatility),
            groups::score_structure(&input, weights.structure),
            groups::score_derivatives(&input, weights.derivatives),
        ];

        let weighted_raw = scored
            .iter()
            .map(|g| g.raw_score * g.weight)
            .sum::<f64>()
            .clamp(-2.0, 2.0);
        let (normalized_long, normalized_short) = saturate(weighted_raw);

        debug!(
            timeframe = %timeframe,
            weighted_raw,
            long = normalized_long,
            "Scored timeframe"
        );

        TimeframeScore {
            timeframe,
            weight: timeframe_weight(timeframe, target),
            groups: scored.into_iter().map(|g| (g.group, g)).collect(),
            weighted_raw,
            normalized_long,
            normalized_short,
            net_score: normalized_long - normalized_short,
        }
    }

    pub fn aggregate_multi_tf(
        &self,
        per_tf: BTreeMap<Timeframe, TimeframeScore>,
        target: Timeframe,
    ) -> Result<MultiTimeframeScore, ScanError> {
        if per_tf.is_empty() {
            return Err(ScanError::EmptyTimeframes);
        }

        let raw_weights: Vec<(f64, &TimeframeScore)> = per_tf
            .iter()
            .map(|(tf, score)| (timeframe_weight(*tf, target), score))
            .collect();
        let total: f64 = raw_weights.iter().map(|(w, _)| w).sum();
        let normalized: Vec<(f64, &TimeframeScore)> = raw_weights
            .into_iter()
            .map(|(w, s)| (if total > 0.0 { w / total } else { 0.0 }, s))
            .collect();

        let aggregated_long: f64 = normalized.iter().map(|(w, s)| w * s.normalized_long).sum();
        let aggregated_short: f64 = normalized.iter().map(|(w, s)| w * s.normalized_short).sum();
        let consensus_raw: f64 = normalized.iter().map(|(w, s)| w * s.weighted_raw).sum();

        let confidence = if normalized.len() == 1 {
            1.0
        } else {
            agreement(&normalized, consensus_raw)
        };

        Ok(MultiTimeframeScore {
            target,
            aggregated_long,
            aggregated_short,
            net_score: aggregated_long - aggregated_short,
            confidence,
            direction: if aggregated_long >= aggregated_short {
                Direction::Long
            } else {
                Direction::Short
            },
            momentum: momentum_grade(consensus_raw),
            consensus_raw,
            per_tf,
        })
    }
}

/// `long = 5·(1 + tanh(raw))`, `short = 10 − long`.
pub fn saturate(weighted_raw: f64) -> (f64, f64) {
    let long = (5.0 * (1.0 + weighted_raw.tanh())).clamp(0.0, 10.0);
    (long, 10.0 - long)
}

fn sign(value: f64) -> i8 {
    if value > SIGN_DEAD_ZONE {
        1
    } else if value < -SIGN_DEAD_ZONE {
        -1
    } else {
        0
    }
}

/// Confidence from how much timeframe weight agrees with the consensus.
fn agreement(weighted: &[(f64, &TimeframeScore)], consensus_raw: f64) -> f64 {
    let consensus = sign(consensus_raw);

    if consensus == 0 {
        let neutral: f64 = weighted
            .iter()
            .filter(|(_, s)| sign(s.weighted_raw) == 0)
            .map(|(w, _)| w)
            .sum();
        return (0.4 + 0.6 * neutral).clamp(0.0, 1.0);
    }

    let aligned: f64 = weighted
        .iter()
        .map(|(w, s)| match sign(s.weighted_raw) {
            x if x == consensus => *w,
            0 => w * 0.3,
            _ => 0.0,
        })
        .sum();
    (0.3 + 0.7 * aligned).clamp(0.0, 1.0)
}

fn momentum_grade(consensus_raw: f64) -> MomentumGrade {
    if consensus_raw >= 1.0 {
        MomentumGrade::StrongBullish
    } else if consensus_raw >= 0.3 {
        MomentumGrade::WeakBullish
    } else if consensus_raw <= -1.0 {
        MomentumGrade::StrongBearish
    } else if consensus_raw <= -0.3 {
        MomentumGrade::WeakBearish
    } else {
        MomentumGrade::Neutral
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
