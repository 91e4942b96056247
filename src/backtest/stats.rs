//! Summary statistics over forward returns (percent).

use serde::{Deserialize, Serialize};

/// Outcome statistics of one group of samples.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GroupStats {
    pub count: usize,
    pub avg_return: f64,
    pub median_return: f64,
    /// Share of strictly positive returns.
    pub hit_rate: f64,
    pub std_return: f64,
    /// Mean of the worst 10% (at least one sample).
    pub expected_shortfall: f64,
    pub min_return: f64,
    pub max_return: f64,
}

impl GroupStats {
    /// `None` for an empty slice.
    pub fn from_returns(returns: &[f64]) -> Option<Self> {
        if returns.is_empty() {
            return None;
        }
        let mut sorted = returns.to_vec();
        sorted.sort_by(f64::total_cmp);

        Some(Self {
            count: returns.len(),
            avg_return: mean(returns),
            median_return: median_sorted(&sorted),
            hit_rate: hit_rate(returns),
            std_return: sample_std(returns),
            expected_shortfall: expected_shortfall_sorted(&sorted),
            min_return: sorted[0],
            max_return: sorted[sorted.len() - 1],
        })
    }

    /// Both acceptance bars met.
    pub fn meets(&self, min_hit_rate: f64, min_avg_return: f64) -> bool {
        self.hit_rate >= min_hit_rate && self.avg_return >= min_avg_return
    }
}

pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

pub fn hit_rate(returns: &[f64]) -> f64 {
    if returns.is_empty() {
        return 0.0;
    }
    returns.iter().filter(|r| **r > 0.0).count() as f64 / returns.len() as f64
}

/// Standard deviation with Bessel's correction; 0 below two samples.
pub fn sample_std(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let m = mean(values);
    let var = values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / (values.len() - 1) as f64;
    var.sqrt()
}

/// Population standard deviation.
pub fn population_std(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let m = mean(values);
    let var = values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / values.len() as f64;
    var.sqrt()
}

fn median_sorted(sorted: &[f64]) -> f64 {
    let n = sorted.len();
    if n == 0 {
        0.0
    } else if n % 2 == 1 {
        sorted[n / 2]
    } else {
        (sorted[n / 2 - 1] + sorted[n / 2]) / 2.0
    }
}

fn expected_shortfall_sorted(sorted: &[f64]) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    let k = (sorted.len() / 10).max(1);
    mean(&sorted[..k])
}

/// Mean of the worst 10% of `returns`, at least one sample.
pub fn expected_shortfall(returns: &[f64]) -> f64 {
    let mut sorted = returns.to_vec();
    sorted.sort_by(f64::total_cmp);
    expected_shortfall_sorted(&sorted)
}

/// 5th-percentile return (nearest rank, lowest value for tiny samples).
pub fn value_at_risk_5(returns: &[f64]) -> f64 {
    let mut sorted = returns.to_vec();
    sorted.sort_by(f64::total_cmp);
    match sorted.len() {
        0 => 0.0,
        n if n > 5 => sorted[n * 5 / 100],
        _ => sorted[0],
    }
}
