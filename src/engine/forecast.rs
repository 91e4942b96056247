//! Forecast service.
//!
//! Wraps a black-box predictor with a bounded model cache and a short
//! forecast cache, calibrates each raw probability against resolved
//! history, and logs every issued forecast so it can be scored once its
//! horizon elapses.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::backtest::CalibrationService;
use crate::cache::{FifoCache, TtlCache};
use crate::config::ForecastConfig;
use crate::data::{BarStore, ForecastModel, ForecastPredictor, ModelKey};
use crate::storage::{ForecastLog, ForecastRecord};
use crate::types::{Bar, ScanError, Timeframe};

const DEFAULT_MODEL_TYPE: &str = "default";
const BARS_LIMIT: usize = 500;

type ForecastKey = (String, Timeframe, u32);

/// A model forecast with its probability rescaled by history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalibratedForecast {
    /// Log id, when the forecast was recorded.
    pub id: Option<i64>,
    pub symbol: String,
    pub timeframe: Timeframe,
    pub horizon_bars: u32,
    pub entry_price: f64,
    pub predicted_return: f64,
    pub interval: (f64, f64),
    pub raw_p_up: f64,
    pub calibrated_p_up: f64,
    pub created_at: DateTime<Utc>,
    pub target_ms: i64,
}

pub struct ForecastService {
    bars: Arc<dyn BarStore>,
    predictor: Arc<dyn ForecastPredictor>,
    log: Arc<dyn ForecastLog>,
    calibration: Arc<CalibrationService>,
    models: Mutex<FifoCache<ModelKey, Arc<dyn ForecastModel>>>,
    forecasts: Mutex<TtlCache<ForecastKey, CalibratedForecast>>,
    model_type: String,
}

impl ForecastService {
    pub fn new(
        bars: Arc<dyn BarStore>,
        predictor: Arc<dyn ForecastPredictor>,
        log: Arc<dyn ForecastLog>,
        calibration: Arc<CalibrationService>,
        config: &ForecastConfig,
    ) -> Self {
        Self {
            bars,
            predictor,
            log,
            calibration,
            models: Mutex::new(FifoCache::new(config.model_cache_capacity)),
            forecasts: Mutex::new(TtlCache::with_ttl_secs(config.forecast_ttl_secs)),
            model_type: DEFAULT_MODEL_TYPE.to_string(),
        }
    }

    pub async fn forecast(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        horizon_bars: u32,
    ) -> Result<CalibratedForecast> {
        let cache_key = (symbol.to_string(), timeframe, horizon_bars);
        if let Some(cached) = self.forecasts.lock().await.get(&cache_key) {
            debug!(symbol, timeframe = %timeframe, horizon_bars, "Forecast cache hit");
            return Ok(cached);
        }

        let bars = self
            .bars
            .last_n(symbol, timeframe, BARS_LIMIT)
            .await
            .with_context(|| format!("Failed to fetch {timeframe} bars for {symbol}"))?;
        let last = *bars.last().ok_or_else(|| ScanError::InsufficientData {
            symbol: symbol.to_string(),
            needed: 1,
            got: 0,
        })?;

        let key = ModelKey {
            symbol: symbol.to_string(),
            timeframe,
            horizon_bars,
            model_type: self.model_type.clone(),
        };
        let model = self.model_for(&key, &bars).await?;
        let raw = model
            .predict(&bars)
            .with_context(|| format!("Prediction failed for {key}"))?;

        let raw_p_up = raw.p_up.clamp(0.0, 1.0);
        let calibrated_p_up = self
            .calibration
            .calibrate_probability(raw_p_up, symbol, timeframe, horizon_bars)
            .await;

        let created_at = Utc::now();
        let target_ms = last.timestamp_ms + timeframe.duration_ms() * horizon_bars as i64;
        let record = ForecastRecord {
            id: None,
            symbol: symbol.to_string(),
            timeframe,
            horizon_bars,
            created_at_ms: created_at.timestamp_millis(),
            target_ms,
            entry_price: last.close,
            predicted_return: raw.predicted_return,
            raw_p_up,
            calibrated_p_up,
            setup_type: None,
            grade: None,
            realized_return: None,
            resolved_at_ms: None,
        };
        let id = match self.log.record_forecast(&record).await {
            Ok(id) => Some(id),
            Err(e) => {
                warn!(symbol, error = %e, "Failed to record forecast");
                None
            }
        };

        let forecast = CalibratedForecast {
            id,
            symbol: symbol.to_string(),
            timeframe,
            horizon_bars,
            entry_price: last.close,
            predicted_return: raw.predicted_return,
            interval: raw.interval,
            raw_p_up,
            calibrated_p_up,
            created_at,
            target_ms,
        };
        self.forecasts.lock().await.insert(cache_key, forecast.clone());
        info!(
            symbol,
            timeframe = %timeframe,
            horizon_bars,
            raw_p_up,
            calibrated_p_up,
            "Forecast issued"
        );
        Ok(forecast)
    }

    /// Cached model, or a freshly trained one. Two concurrent misses may
    /// both train; the later insert wins.
    async fn model_for(&self, key: &ModelKey, bars: &[Bar]) -> Result<Arc<dyn ForecastModel>> {
        if let Some(model) = self.models.lock().await.get(key) {
            return Ok(model);
        }
        let model = self
            .predictor
            .train(key, bars)
            .await
            .with_context(|| format!("Training failed for {key}"))?;
        if let Some(evicted) = self.models.lock().await.insert(key.clone(), model.clone()) {
            debug!(evicted = %evicted, "Model cache full, evicted oldest");
        }
        Ok(model)
    }

    /// Forecast each symbol once, skipping repeats. Failures are logged
    /// and skipped; returns how many forecasts were issued.
    pub async fn forecast_symbols(
        &self,
        symbols: &[String],
        timeframe: Timeframe,
        horizon_bars: u32,
    ) -> usize {
        let mut seen = HashSet::new();
        let mut issued = 0;
        for symbol in symbols {
            if !seen.insert(symbol.as_str()) {
                continue;
            }
            match self.forecast(symbol, timeframe, horizon_bars).await {
                Ok(_) => issued += 1,
                Err(e) => warn!(symbol = %symbol, error = %e, "Forecast failed"),
            }
        }
        issued
    }

    /// Resolve every logged forecast whose horizon has elapsed by `now_ms`.
    /// Returns how many were resolved.
    pub async fn resolve_pending(&self, now_ms: i64) -> Result<usize> {
        let pending = self
            .log
            .pending(now_ms)
            .await
            .context("Failed to load pending forecasts")?;

        let mut resolved = 0;
        for record in pending {
            let Some(id) = record.id else { continue };
            let bars = match self
                .bars
                .last_n(&record.symbol, record.timeframe, BARS_LIMIT)
                .await
            {
                Ok(bars) => bars,
                Err(e) => {
                    warn!(symbol = %record.symbol, error = %e, "Bars unavailable for resolution");
                    continue;
                }
            };
            let Some(realized) = realized_return(&record, &bars) else {
                debug!(symbol = %record.symbol, id, "No bar past target yet");
                continue;
            };
            if let Err(e) = self.log.record_outcome(id, realized, now_ms).await {
                warn!(symbol = %record.symbol, id, error = %e, "Failed to record forecast outcome");
                continue;
            }
            resolved += 1;
        }

        if resolved > 0 {
            info!(resolved, "Resolved pending forecasts");
        }
        Ok(resolved)
    }

    pub async fn clear_caches(&self) {
        self.models.lock().await.clear();
        self.forecasts.lock().await.clear();
    }

    pub async fn cached_models(&self) -> usize {
        self.models.lock().await.len()
    }
}

/// Percent move from entry to the close of the first bar at or after the target.
fn realized_return(record: &ForecastRecord, bars: &[Bar]) -> Option<f64> {
    if record.entry_price <= 0.0 {
        return None;
    }
    let exit = bars.iter().find(|b| b.timestamp_ms >= record.target_ms)?;
    Some((exit.close - record.entry_price) / record.entry_price * 100.0)
}
