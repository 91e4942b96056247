//! Drift baseline forecast model.
//!
//! Fits the mean and dispersion of per-bar log returns and projects them
//! over the horizon. Used when no external model is wired in.

use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;

use crate::data::{Forecast, ForecastModel, ForecastPredictor, ModelKey};
use crate::types::{Bar, ScanError};

/// Bars used for fitting.
const FIT_WINDOW: usize = 200;
const MIN_FIT_BARS: usize = 20;
/// Logistic approximation of the normal CDF.
const LOGISTIC_SCALE: f64 = 1.702;
/// Two-sided 90% band.
const Z_90: f64 = 1.645;

#[derive(Debug, Default, Clone)]
pub struct DriftPredictor;

impl DriftPredictor {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl ForecastPredictor for DriftPredictor {
    async fn train(&self, key: &ModelKey, bars: &[Bar]) -> Result<Arc<dyn ForecastModel>> {
        let start = bars.len().saturating_sub(FIT_WINDOW + 1);
        let returns: Vec<f64> = bars[start..]
            .windows(2)
            .filter(|w| w[0].close > 0.0 && w[1].close > 0.0)
            .map(|w| (w[1].close / w[0].close).ln())
            .collect();
        if returns.len() < MIN_FIT_BARS {
            return Err(ScanError::InsufficientData {
                symbol: key.symbol.clone(),
                needed: MIN_FIT_BARS + 1,
                got: bars.len(),
            }
            .into());
        }

        let n = returns.len() as f64;
        let drift = returns.iter().sum::<f64>() / n;
        let sigma = (returns.iter().map(|r| (r - drift).powi(2)).sum::<f64>() / n).sqrt();
        Ok(Arc::new(DriftModel {
            drift,
            sigma,
            horizon_bars: key.horizon_bars.max(1),
        }))
    }
}

#[derive(Debug, Clone, Copy)]
struct DriftModel {
    drift: f64,
    sigma: f64,
    horizon_bars: u32,
}

impl ForecastModel for DriftModel {
    fn predict(&self, _bars: &[Bar]) -> Result<Forecast> {
        let h = self.horizon_bars as f64;
        let mean = self.drift * h;
        let spread = self.sigma * h.sqrt();

        let p_up = if spread > 0.0 {
            1.0 / (1.0 + (-LOGISTIC_SCALE * mean / spread).exp())
        } else if mean > 0.0 {
            1.0
        } else if mean < 0.0 {
            0.0
        } else {
            0.5
        };
        let pct = |log_ret: f64| (log_ret.exp() - 1.0) * 100.0;

        Ok(Forecast {
            predicted_return: pct(mean),
            p_up,
            interval: (pct(mean - Z_90 * spread), pct(mean + Z_90 * spread)),
        })
    }
}
