//! Forecast scorecard.
//!
//! Measures how well forecast probabilities match realized direction.
//! Computes the Brier score overall and per setup type, a 10-bin
//! reliability curve, and a coarse over/under-confidence diagnosis.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::storage::ForecastRecord;

// ---------------------------------------------------------------------------
// Scorecard data
// ---------------------------------------------------------------------------

/// A single probability–outcome pair.
#[derive(Debug, Clone, PartialEq)]
pub struct ScorecardPoint {
    pub setup_type: Option<String>,
    pub predicted_p_up: f64,
    pub went_up: bool,
}

impl ScorecardPoint {
    /// `None` for unresolved records.
    pub fn from_record(record: &ForecastRecord) -> Option<Self> {
        Some(Self {
            setup_type: record.setup_type.clone(),
            predicted_p_up: record.calibrated_p_up,
            went_up: record.hit()?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScorecardReport {
    pub total_forecasts: usize,
    pub overall_brier: f64,
    pub setup_brier: BTreeMap<String, f64>,
    pub reliability_curve: Vec<ReliabilityBucket>,
    pub diagnosis: ScorecardDiagnosis,
}

/// One 10% bin of the reliability curve.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReliabilityBucket {
    pub bin_start: f64,
    pub bin_end: f64,
    pub mean_predicted: f64,
    pub actual_rate: f64,
    pub count: usize,
    /// |mean_predicted − actual_rate|
    pub deviation: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ScorecardDiagnosis {
    WellCalibrated,
    /// Probabilities too extreme.
    OverConfident,
    /// Probabilities too central.
    UnderConfident,
    InsufficientData,
}

// ---------------------------------------------------------------------------
// Scorecard
// ---------------------------------------------------------------------------

pub struct ForecastScorecard {
    points: Vec<ScorecardPoint>,
    num_bins: usize,
}

impl Default for ForecastScorecard {
    fn default() -> Self {
        Self::new()
    }
}

impl ForecastScorecard {
    pub fn new() -> Self {
        Self {
            points: Vec::new(),
            num_bins: 10,
        }
    }

    pub fn from_records(records: &[ForecastRecord]) -> Self {
        let mut card = Self::new();
        card.points
            .extend(records.iter().filter_map(ScorecardPoint::from_record));
        card
    }

    pub fn add_point(&mut self, point: ScorecardPoint) {
        self.points.push(point);
    }

    pub fn count(&self) -> usize {
        self.points.len()
    }

    pub fn report(&self) -> ScorecardReport {
        if self.points.is_empty() {
            return ScorecardReport {
                total_forecasts: 0,
                overall_brier: 0.0,
                setup_brier: BTreeMap::new(),
                reliability_curve: Vec::new(),
                diagnosis: ScorecardDiagnosis::InsufficientData,
            };
        }

        let curve = self.reliability_curve();
        let diagnosis = self.diagnose(&curve);
        ScorecardReport {
            total_forecasts: self.points.len(),
            overall_brier: brier(self.points.iter()),
            setup_brier: self.setup_brier(),
            reliability_curve: curve,
            diagnosis,
        }
    }

    fn setup_brier(&self) -> BTreeMap<String, f64> {
        let mut by_setup: BTreeMap<String, Vec<&ScorecardPoint>> = BTreeMap::new();
        for p in &self.points {
            if let Some(setup) = &p.setup_type {
                by_setup.entry(setup.clone()).or_default().push(p);
            }
        }
        by_setup
            .into_iter()
            .map(|(setup, points)| (setup, brier(points.into_iter())))
            .collect()
    }

    fn reliability_curve(&self) -> Vec<ReliabilityBucket> {
        let n = self.num_bins;
        let mut bins: Vec<Vec<&ScorecardPoint>> = vec![Vec::new(); n];
        for p in &self.points {
            let idx = ((p.predicted_p_up.clamp(0.0, 1.0) * n as f64).floor() as usize).min(n - 1);
            bins[idx].push(p);
        }

        bins.into_iter()
            .enumerate()
            .map(|(i, in_bin)| {
                let bin_start = i as f64 / n as f64;
                let bin_end = (i + 1) as f64 / n as f64;

                if in_bin.is_empty() {
                    return ReliabilityBucket {
                        bin_start,
                        bin_end,
                        mean_predicted: (bin_start + bin_end) / 2.0,
                        actual_rate: 0.0,
                        count: 0,
                        deviation: 0.0,
                    };
                }

                let count = in_bin.len();
                let mean_predicted =
                    in_bin.iter().map(|p| p.predicted_p_up).sum::<f64>() / count as f64;
                let actual_rate = in_bin.iter().filter(|p| p.went_up).count() as f64 / count as f64;
                ReliabilityBucket {
                    bin_start,
                    bin_end,
                    mean_predicted,
                    actual_rate,
                    count,
                    deviation: (mean_predicted - actual_rate).abs(),
                }
            })
            .collect()
    }

    fn diagnose(&self, curve: &[ReliabilityBucket]) -> ScorecardDiagnosis {
        let populated: Vec<&ReliabilityBucket> = curve.iter().filter(|b| b.count >= 3).collect();
        if populated.len() < 3 || self.points.len() < 20 {
            return ScorecardDiagnosis::InsufficientData;
        }

        let mut over = 0;
        let mut under = 0;
        for bucket in populated {
            if bucket.deviation < 0.05 {
                continue;
            }
            let mid = (bucket.bin_start + bucket.bin_end) / 2.0;
            if mid < 0.3 {
                if bucket.actual_rate > bucket.mean_predicted {
                    over += 1;
                } else {
                    under += 1;
                }
            } else if mid > 0.7 {
                if bucket.actual_rate < bucket.mean_predicted {
                    over += 1;
                } else {
                    under += 1;
                }
            }
        }

        if over > under + 1 {
            ScorecardDiagnosis::OverConfident
        } else if under > over + 1 {
            ScorecardDiagnosis::UnderConfident
        } else {
            ScorecardDiagnosis::WellCalibrated
        }
    }
}

/// Brier = (1/N)·Σ(p − outcome)². 0 is perfect, 0.25 is a coin flip.
fn brier<'a>(points: impl Iterator<Item = &'a ScorecardPoint>) -> f64 {
    let (sum, n) = points.fold((0.0, 0usize), |(sum, n), p| {
        let outcome = if p.went_up { 1.0 } else { 0.0 };
        (sum + (p.predicted_p_up - outcome).powi(2), n + 1)
    });
    if n == 0 {
        0.0
    } else {
        sum / n as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_point(p: f64, went_up: bool) -> ScorecardPoint {
        ScorecardPoint {
            setup_type: None,
            predicted_p_up: p,
            went_up,
        }
    }

    #[test]
    fn test_sharp_and_right() {
        let mut card = ForecastScorecard::new();
        for _ in 0..10 {
            card.add_point(make_point(0.9, true));
            card.add_point(make_point(0.1, false));
        }
        assert!(card.report().overall_brier < 0.05);
    }

    #[test]
    fn test_sharp_and_wrong() {
        let mut card = ForecastScorecard::new();
        for _ in 0..10 {
            card.add_point(make_point(0.9, false));
            card.add_point(make_point(0.1, true));
        }
        assert!(card.report().overall_brier > 0.5);
    }

    #[test]
    fn test_coin_flip_brier() {
        let mut card = ForecastScorecard::new();
        for _ in 0..50 {
            card.add_point(make_point(0.5, true));
            card.add_point(make_point(0.5, false));
        }
        assert!((card.report().overall_brier - 0.25).abs() < 0.01);
    }

    #[test]
    fn test_empty_and_thin() {
        assert_eq!(
            ForecastScorecard::new().report().diagnosis,
            ScorecardDiagnosis::InsufficientData
        );
        let mut card = ForecastScorecard::new();
        for _ in 0..5 {
            card.add_point(make_point(0.7, true));
        }
        assert_eq!(card.report().diagnosis, ScorecardDiagnosis::InsufficientData);
    }

    #[test]
    fn test_overconfident_extremes() {
        let mut card = ForecastScorecard::new();
        for i in 0..10 {
            // Extreme calls that land near 50/50.
            card.add_point(make_point(0.95, i % 2 == 0));
            card.add_point(make_point(0.85, i % 2 == 0));
            card.add_point(make_point(0.05, i % 2 == 0));
            card.add_point(make_point(0.15, i % 2 == 0));
        }
        assert_eq!(card.report().diagnosis, ScorecardDiagnosis::OverConfident);
    }

    #[test]
    fn test_setup_brier_and_curve() {
        let mut card = ForecastScorecard::new();
        card.add_point(ScorecardPoint {
            setup_type: Some("breakout".into()),
            predicted_p_up: 0.8,
            went_up: true,
        });
        card.add_point(ScorecardPoint {
            setup_type: Some("fade".into()),
            predicted_p_up: 0.8,
            went_up: false,
        });
        let report = card.report();
        assert!(report.setup_brier["breakout"] < 0.1);
        assert!(report.setup_brier["fade"] > 0.5);
        assert_eq!(report.reliability_curve.len(), 10);
        let bucket = report
            .reliability_curve
            .iter()
            .find(|b| b.bin_start <= 0.8 && b.bin_end > 0.8)
            .unwrap();
        assert_eq!(bucket.count, 2);
    }
}
