//! Pattern reliability from historical outcomes.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

use crate::backtest::replay::OutcomeReplayer;
use crate::backtest::stats::{hit_rate, mean, population_std};
use crate::storage::SnapshotQuery;

const PATTERN_FETCH_LIMIT: usize = 1_000;
/// Return dispersion (percent) at which consistency reaches zero.
const STD_CEILING: f64 = 20.0;

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Reliability {
    /// `None` while the pattern has too few resolved samples.
    pub score: Option<f64>,
    pub samples: usize,
}

pub struct ReliabilityIndex {
    replayer: Arc<OutcomeReplayer>,
    horizon_hours: f64,
}

impl ReliabilityIndex {
    pub fn new(replayer: Arc<OutcomeReplayer>, horizon_hours: f64) -> Self {
        Self {
            replayer,
            horizon_hours,
        }
    }

    pub async fn reliability(&self, pattern_key: &str, min_samples: usize) -> Result<Reliability> {
        let query = SnapshotQuery::new()
            .pattern_key(pattern_key)
            .newest_first()
            .limit(PATTERN_FETCH_LIMIT);
        let samples = self.replayer.samples(&query, self.horizon_hours).await?;
        let returns: Vec<f64> = samples.iter().map(|s| s.forward_return).collect();

        if returns.len() < min_samples.max(1) {
            debug!(pattern_key, samples = returns.len(), "Pattern below sample floor");
            return Ok(Reliability {
                score: None,
                samples: returns.len(),
            });
        }

        Ok(Reliability {
            score: Some(reliability_score(&returns)),
            samples: returns.len(),
        })
    }
}

/// `hit·0.6 + consistency·0.4`, halved when the mean return is negative.
pub fn reliability_score(returns: &[f64]) -> f64 {
    let consistency = (1.0 - population_std(returns) / STD_CEILING).max(0.0);
    let mut score = hit_rate(returns) * 0.6 + consistency * 0.4;
    if mean(returns) < 0.0 {
        score *= 0.5;
    }
    score.clamp(0.0, 1.0)
}
