//! Calibration service.
//!
//! Turns logged outcomes into three adjustments: forecast probabilities
//! rescaled by the hit rate actually observed in their probability bin,
//! an effective pump-score threshold per symbol and regime, and pattern
//! reliability. Every lookup degrades to a documented default when the
//! history is thin or a store fails.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};

use crate::backtest::reliability::{Reliability, ReliabilityIndex};
use crate::backtest::replay::{OutcomeReplayer, RegimeStats, ScoreBin};
use crate::backtest::scorecard::{ForecastScorecard, ScorecardReport};
use crate::backtest::stats::{
    expected_shortfall, hit_rate, mean, population_std, value_at_risk_5, GroupStats,
};
use crate::cache::TtlCache;
use crate::config::CalibrationConfig;
use crate::scoring::weights::{recommend_weights, WeightRecommendation, WeightSample};
use crate::scoring::GroupWeights;
use crate::storage::{ForecastLog, ForecastQuery, ForecastRecord, SnapshotQuery};
use crate::types::{Regime, Timeframe};

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

const FORECAST_FETCH_LIMIT: usize = 1_000;
const MIN_CALIBRATION_ROWS: usize = 50;
const MIN_BIN_ROWS: usize = 10;

/// Probability bins, half-open except the last.
const PROBABILITY_BINS: [(f64, f64); 5] = [(0.5, 0.6), (0.6, 0.7), (0.7, 0.8), (0.8, 0.9), (0.9, 1.0)];

pub const THRESHOLD_FLOOR: f64 = 0.6;
pub const THRESHOLD_CEILING: f64 = 0.95;
const BASE_THRESHOLD: f64 = 0.7;
const SYMBOL_REGIME_MIN_COUNT: usize = 10;
const REGIME_MIN_COUNT: usize = 20;
const SEARCH_BIN_MIN_COUNT: usize = 5;

/// Expected shortfall (percent) below which setup calibration is damped.
const SEVERE_SHORTFALL: f64 = -5.0;

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// Outcome statistics of one forecast-probability bin.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CalibrationBin {
    pub lower: f64,
    pub upper: f64,
    pub count: usize,
    pub hit_rate: f64,
    pub avg_return: f64,
    pub expected_shortfall: f64,
}

impl CalibrationBin {
    pub fn midpoint(&self) -> f64 {
        (self.lower + self.upper) / 2.0
    }
}

/// Realized-return profile of a setup type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SetupStats {
    pub count: usize,
    pub avg_return: f64,
    pub std_return: f64,
    pub hit_rate: f64,
    pub expected_shortfall: f64,
    /// 5th-percentile return.
    pub var_5: f64,
    pub setup_type: Option<String>,
    pub grade: Option<String>,
}

// ---------------------------------------------------------------------------
// Service
// ---------------------------------------------------------------------------

pub struct CalibrationService {
    replayer: Arc<OutcomeReplayer>,
    reliability: ReliabilityIndex,
    forecasts: Arc<dyn ForecastLog>,
    config: CalibrationConfig,
    thresholds: Mutex<TtlCache<(String, Regime), f64>>,
}

impl CalibrationService {
    pub fn new(
        replayer: Arc<OutcomeReplayer>,
        forecasts: Arc<dyn ForecastLog>,
        config: CalibrationConfig,
    ) -> Self {
        let reliability = ReliabilityIndex::new(replayer.clone(), config.horizon_hours);
        let thresholds = TtlCache::with_ttl_secs(config.threshold_cache_ttl_secs);
        Self {
            replayer,
            reliability,
            forecasts,
            config,
            thresholds: Mutex::new(thresholds),
        }
    }

    pub fn config(&self) -> &CalibrationConfig {
        &self.config
    }

    // -----------------------------------------------------------------------
    // Probability calibration
    // -----------------------------------------------------------------------

    /// Rescale `raw` by the hit rate observed in its probability bin.
    /// Thin history passes `raw` through.
    pub async fn calibrate_probability(
        &self,
        raw: f64,
        symbol: &str,
        timeframe: Timeframe,
        horizon_bars: u32,
    ) -> f64 {
        let query = forecast_query(symbol, timeframe, horizon_bars, None, None);
        match self.forecasts.resolved(&query).await {
            Ok(rows) => calibrate_with(raw, &rows, false).unwrap_or(raw),
            Err(e) => {
                warn!(symbol, error = %e, "Forecast history unavailable, using raw probability");
                raw
            }
        }
    }

    /// Setup-aware variant: rows are filtered by setup type and grade, and
    /// bins with a negative mean or a severe tail are damped further.
    pub async fn calibrate_probability_by_setup(
        &self,
        raw: f64,
        symbol: &str,
        timeframe: Timeframe,
        horizon_bars: u32,
        setup_type: Option<&str>,
        grade: Option<&str>,
    ) -> f64 {
        let query = forecast_query(symbol, timeframe, horizon_bars, setup_type, grade);
        match self.forecasts.resolved(&query).await {
            Ok(rows) => match calibrate_with(raw, &rows, true) {
                Some(calibrated) => {
                    debug!(symbol, raw, calibrated, setup_type, grade, "Calibrated by setup");
                    calibrated
                }
                None => {
                    self.calibrate_probability(raw, symbol, timeframe, horizon_bars)
                        .await
                }
            },
            Err(e) => {
                warn!(symbol, error = %e, "Setup history unavailable, falling back");
                self.calibrate_probability(raw, symbol, timeframe, horizon_bars)
                    .await
            }
        }
    }

    // -----------------------------------------------------------------------
    // Effective threshold
    // -----------------------------------------------------------------------

    /// Threshold with the configured acceptance bars.
    pub async fn get_effective_threshold(&self, symbol: &str, regime: Regime) -> f64 {
        self.effective_threshold_with(
            symbol,
            regime,
            self.config.min_hit_rate,
            self.config.min_avg_return,
        )
        .await
    }

    /// Lowest pump score whose history meets both bars, clamped to
    /// [0.6, 0.95]. Cached per (symbol, regime) until the configured TTL
    /// lapses, then recomputed from the log.
    pub async fn effective_threshold_with(
        &self,
        symbol: &str,
        regime: Regime,
        min_hit_rate: f64,
        min_avg_return: f64,
    ) -> f64 {
        let key = (symbol.to_string(), regime);
        let cached = self.lock_thresholds().get(&key);
        if let Some(hit) = cached {
            return hit;
        }

        let threshold = match self
            .replayer
            .analyze_symbol_regime(symbol, regime, self.config.horizon_hours)
            .await
        {
            Ok(stats) => threshold_from_stats(&stats, min_hit_rate, min_avg_return)
                .unwrap_or_else(|| default_threshold(regime)),
            Err(e) => {
                warn!(symbol, regime = %regime, error = %e, "Outcome replay failed, using default threshold");
                return default_threshold(regime).clamp(THRESHOLD_FLOOR, THRESHOLD_CEILING);
            }
        }
        .clamp(THRESHOLD_FLOOR, THRESHOLD_CEILING);

        debug!(symbol, regime = %regime, threshold, "Effective threshold");
        self.lock_thresholds().insert(key, threshold);
        threshold
    }

    pub fn clear_cache(&self) {
        self.lock_thresholds().clear();
    }

    fn lock_thresholds(&self) -> std::sync::MutexGuard<'_, TtlCache<(String, Regime), f64>> {
        self.thresholds.lock().unwrap_or_else(|e| e.into_inner())
    }

    // -----------------------------------------------------------------------
    // Reliability and setup statistics
    // -----------------------------------------------------------------------

    pub async fn get_reliability(&self, pattern_key: &str, min_samples: usize) -> Reliability {
        match self.reliability.reliability(pattern_key, min_samples).await {
            Ok(r) => r,
            Err(e) => {
                warn!(pattern_key, error = %e, "Reliability lookup failed");
                Reliability::default()
            }
        }
    }

    pub async fn setup_type_stats(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        horizon_bars: u32,
        setup_type: Option<&str>,
        grade: Option<&str>,
        min_samples: usize,
    ) -> Option<SetupStats> {
        let query = forecast_query(symbol, timeframe, horizon_bars, setup_type, grade);
        let rows = match self.forecasts.resolved(&query).await {
            Ok(rows) => rows,
            Err(e) => {
                warn!(symbol, error = %e, "Setup stats unavailable");
                return None;
            }
        };
        let returns: Vec<f64> = rows.iter().filter_map(|r| r.realized_return).collect();
        if returns.len() < min_samples.max(1) {
            return None;
        }

        Some(SetupStats {
            count: returns.len(),
            avg_return: mean(&returns),
            std_return: population_std(&returns),
            hit_rate: hit_rate(&returns),
            expected_shortfall: expected_shortfall(&returns),
            var_5: value_at_risk_5(&returns),
            setup_type: setup_type.map(str::to_string),
            grade: grade.map(str::to_string),
        })
    }

    pub async fn forecast_scorecard(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        horizon_bars: u32,
    ) -> Result<ScorecardReport> {
        let query = forecast_query(symbol, timeframe, horizon_bars, None, None);
        let rows = self.forecasts.resolved(&query).await?;
        Ok(ForecastScorecard::from_records(&rows).report())
    }

    // -----------------------------------------------------------------------
    // Weight recommendation
    // -----------------------------------------------------------------------

    /// Correlate logged per-group raw scores with realized returns.
    pub async fn recommend_weights(
        &self,
        timeframe: Option<Timeframe>,
        current: &GroupWeights,
    ) -> Result<Vec<WeightRecommendation>> {
        let mut query = SnapshotQuery::new();
        query.timeframe = timeframe;
        let samples = self
            .replayer
            .samples(&query, self.config.horizon_hours)
            .await?;

        let weight_samples: Vec<WeightSample> = samples
            .into_iter()
            .filter(|s| !s.snapshot.metrics.group_scores.is_empty())
            .map(|s| WeightSample {
                group_scores: s.snapshot.metrics.group_scores,
                forward_return: s.forward_return,
            })
            .collect();

        let recommendations = recommend_weights(&weight_samples, current);
        info!(
            samples = weight_samples.len(),
            changes = recommendations.len(),
            "Weight recommendations computed"
        );
        Ok(recommendations)
    }
}

// ---------------------------------------------------------------------------
// Pure helpers
// ---------------------------------------------------------------------------

fn forecast_query(
    symbol: &str,
    timeframe: Timeframe,
    horizon_bars: u32,
    setup_type: Option<&str>,
    grade: Option<&str>,
) -> ForecastQuery {
    ForecastQuery {
        symbol: Some(symbol.to_string()),
        timeframe: Some(timeframe),
        horizon_bars: Some(horizon_bars),
        setup_type: setup_type.map(str::to_string),
        grade: grade.map(str::to_string),
        limit: Some(FORECAST_FETCH_LIMIT),
    }
}

/// Bin holding probability `p`; values outside [0.5, 1.0] belong to none.
fn bin_of(p: f64) -> Option<usize> {
    PROBABILITY_BINS
        .iter()
        .enumerate()
        .position(|(i, (lo, hi))| p >= *lo && (p < *hi || (i == PROBABILITY_BINS.len() - 1 && p <= *hi)))
}

/// Like `bin_of`, but out-of-range values snap to the nearest bin.
fn nearest_bin(p: f64) -> usize {
    bin_of(p).unwrap_or(if p < PROBABILITY_BINS[0].0 {
        0
    } else {
        PROBABILITY_BINS.len() - 1
    })
}

/// Per-bin outcome statistics of resolved forecasts, keyed by their raw
/// probability. Bins with fewer than ten rows are left out.
pub fn calibration_bins(rows: &[ForecastRecord]) -> Vec<(usize, CalibrationBin)> {
    let mut grouped: Vec<Vec<f64>> = vec![Vec::new(); PROBABILITY_BINS.len()];
    for row in rows {
        if let (Some(idx), Some(ret)) = (bin_of(row.raw_p_up), row.realized_return) {
            grouped[idx].push(ret);
        }
    }

    grouped
        .into_iter()
        .enumerate()
        .filter(|(_, returns)| returns.len() >= MIN_BIN_ROWS)
        .map(|(i, returns)| {
            let (lower, upper) = PROBABILITY_BINS[i];
            (
                i,
                CalibrationBin {
                    lower,
                    upper,
                    count: returns.len(),
                    hit_rate: hit_rate(&returns),
                    avg_return: mean(&returns),
                    expected_shortfall: expected_shortfall(&returns),
                },
            )
        })
        .collect()
}

/// `None` when there are too few rows to calibrate at all.
fn calibrate_with(raw: f64, rows: &[ForecastRecord], risk_adjusted: bool) -> Option<f64> {
    if rows.len() < MIN_CALIBRATION_ROWS {
        return None;
    }
    let target = nearest_bin(raw);
    let bins = calibration_bins(rows);
    let Some((_, bin)) = bins.iter().find(|(i, _)| *i == target) else {
        return Some(raw);
    };

    let mut factor = bin.hit_rate / bin.midpoint();
    if risk_adjusted {
        if bin.avg_return < 0.0 {
            factor *= 0.9;
        }
        if bin.expected_shortfall < SEVERE_SHORTFALL {
            factor *= 0.85;
        }
    }
    Some((raw * factor).clamp(0.0, 1.0))
}

/// Regime-only fallback when history can't place the threshold.
pub fn default_threshold(regime: Regime) -> f64 {
    match regime {
        Regime::RiskOff => (BASE_THRESHOLD + 0.1).min(0.9),
        Regime::Panic => (BASE_THRESHOLD + 0.15).min(0.95),
        Regime::RiskOn => (BASE_THRESHOLD - 0.05).max(0.6),
        Regime::AltSeason => (BASE_THRESHOLD - 0.08).max(0.6),
        Regime::Choppy | Regime::BtcDominance => BASE_THRESHOLD,
    }
}

/// Threshold from replayed statistics: the symbol×regime cell first, then
/// the regime-wide cell. `None` when neither qualifies.
pub fn threshold_from_stats(stats: &RegimeStats, min_hit_rate: f64, min_avg_return: f64) -> Option<f64> {
    let qualifies = |cell: &Option<GroupStats>, min_count: usize| {
        cell.as_ref()
            .is_some_and(|c| c.count >= min_count && c.meets(min_hit_rate, min_avg_return))
    };

    if qualifies(&stats.symbol_regime, SYMBOL_REGIME_MIN_COUNT) {
        return Some(search_bins(&stats.symbol_regime_bins, min_hit_rate, min_avg_return));
    }
    if qualifies(&stats.regime, REGIME_MIN_COUNT) {
        return Some(search_bins(&stats.regime_bins, min_hit_rate, min_avg_return));
    }
    None
}

/// Lower bound of the lowest bin meeting both bars.
fn search_bins(bins: &[ScoreBin], min_hit_rate: f64, min_avg_return: f64) -> f64 {
    let mut ordered: Vec<&ScoreBin> = bins.iter().collect();
    ordered.sort_by(|a, b| a.lower.total_cmp(&b.lower));
    ordered
        .into_iter()
        .find(|b| b.stats.count >= SEARCH_BIN_MIN_COUNT && b.stats.meets(min_hit_rate, min_avg_return))
        .map(|b| b.lower)
        .unwrap_or(BASE_THRESHOLD)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::memory::InMemoryBarStore;
    use crate::storage::{InMemoryDiagnosticsLog, InMemoryForecastLog};

    fn make_record(raw: f64, realized: f64) -> ForecastRecord {
        ForecastRecord {
            id: None,
            symbol: "BTC".into(),
            timeframe: Timeframe::H1,
            horizon_bars: 4,
            created_at_ms: 0,
            target_ms: 0,
            entry_price: 100.0,
            predicted_return: 1.0,
            raw_p_up: raw,
            calibrated_p_up: raw,
            setup_type: Some("breakout".into()),
            grade: Some("A".into()),
            realized_return: Some(realized),
            resolved_at_ms: Some(0),
        }
    }

    /// `n` rows at `raw` of which `ups` went up.
    fn make_rows(raw: f64, n: usize, ups: usize) -> Vec<ForecastRecord> {
        (0..n)
            .map(|i| make_record(raw, if i < ups { 1.0 } else { -1.0 }))
            .collect()
    }

    fn make_stats(count: usize, hit: f64, avg: f64) -> GroupStats {
        GroupStats {
            count,
            avg_return: avg,
            median_return: avg,
            hit_rate: hit,
            std_return: 1.0,
            expected_shortfall: -1.0,
            min_return: -1.0,
            max_return: 5.0,
        }
    }

    fn make_bin(lower: f64, count: usize, hit: f64, avg: f64) -> ScoreBin {
        ScoreBin {
            index: 0,
            lower,
            upper: lower + 0.05,
            stats: make_stats(count, hit, avg),
        }
    }

    async fn make_service(rows: Vec<ForecastRecord>) -> CalibrationService {
        let forecasts = Arc::new(InMemoryForecastLog::new());
        for row in &rows {
            let id = forecasts.record_forecast(row).await.unwrap();
            forecasts
                .record_outcome(id, row.realized_return.unwrap_or_default(), 0)
                .await
                .unwrap();
        }
        let replayer = Arc::new(OutcomeReplayer::new(
            Arc::new(InMemoryDiagnosticsLog::new()),
            Arc::new(InMemoryBarStore::new()),
            10,
        ));
        CalibrationService::new(replayer, forecasts, CalibrationConfig::default())
    }

    #[test]
    fn test_bin_lookup() {
        assert_eq!(bin_of(0.5), Some(0));
        assert_eq!(bin_of(0.6), Some(1));
        assert_eq!(bin_of(1.0), Some(4));
        assert_eq!(bin_of(0.3), None);
        assert_eq!(nearest_bin(0.3), 0);
        assert_eq!(nearest_bin(1.2), 4);
    }

    #[test]
    fn test_matching_hit_rate_is_neutral() {
        // Bin [0.6, 0.7) with 65% hits.
        let rows = make_rows(0.65, 100, 65);
        let calibrated = calibrate_with(0.65, &rows, false).unwrap();
        assert!((calibrated - 0.65).abs() < 1e-9);
    }

    #[test]
    fn test_low_hit_rate_shrinks() {
        let rows = make_rows(0.65, 100, 40);
        let calibrated = calibrate_with(0.65, &rows, false).unwrap();
        assert!(calibrated < 0.65);
        assert!((calibrated - 0.65 * 0.4 / 0.65).abs() < 1e-9);
    }

    #[test]
    fn test_thin_history_passes_through() {
        let rows = make_rows(0.65, 40, 10);
        assert_eq!(calibrate_with(0.65, &rows, false), None);
        // Enough rows overall, but none in the target bin.
        let rows = make_rows(0.85, 60, 30);
        assert_eq!(calibrate_with(0.65, &rows, false), Some(0.65));
    }

    #[test]
    fn test_risk_adjustment_damps_bad_tails() {
        let mut rows = make_rows(0.75, 100, 75);
        for row in rows.iter_mut().skip(75) {
            row.realized_return = Some(-20.0);
        }
        let plain = calibrate_with(0.75, &rows, false).unwrap();
        let adjusted = calibrate_with(0.75, &rows, true).unwrap();
        // Mean is negative and the tail is below -5%.
        assert!((adjusted - plain * 0.9 * 0.85).abs() < 1e-9);
    }

    #[test]
    fn test_default_thresholds() {
        assert!((default_threshold(Regime::RiskOff) - 0.8).abs() < 1e-12);
        assert!((default_threshold(Regime::Panic) - 0.85).abs() < 1e-12);
        assert!((default_threshold(Regime::RiskOn) - 0.65).abs() < 1e-12);
        assert!((default_threshold(Regime::AltSeason) - 0.62).abs() < 1e-12);
        assert_eq!(default_threshold(Regime::Choppy), 0.7);
    }

    #[test]
    fn test_threshold_prefers_symbol_cell() {
        let stats = RegimeStats {
            symbol_regime: Some(make_stats(12, 0.6, 2.5)),
            regime: Some(make_stats(50, 0.7, 3.0)),
            symbol_regime_bins: vec![
                make_bin(0.4, 3, 0.9, 5.0),
                make_bin(0.55, 6, 0.6, 2.2),
                make_bin(0.7, 6, 0.8, 4.0),
            ],
            regime_bins: vec![make_bin(0.3, 10, 0.9, 5.0)],
        };
        // The 0.4 bin is too small; 0.55 is the first that qualifies.
        assert_eq!(threshold_from_stats(&stats, 0.55, 2.0), Some(0.55));
    }

    #[test]
    fn test_threshold_falls_back_to_regime_cell() {
        let stats = RegimeStats {
            symbol_regime: Some(make_stats(5, 0.9, 5.0)),
            regime: Some(make_stats(25, 0.6, 2.5)),
            symbol_regime_bins: vec![],
            regime_bins: vec![make_bin(0.65, 8, 0.7, 3.0)],
        };
        assert_eq!(threshold_from_stats(&stats, 0.55, 2.0), Some(0.65));

        let weak = RegimeStats {
            regime: Some(make_stats(25, 0.4, 2.5)),
            ..RegimeStats::default()
        };
        assert_eq!(threshold_from_stats(&weak, 0.55, 2.0), None);
    }

    #[test]
    fn test_search_defaults_when_no_bin_qualifies() {
        let bins = vec![make_bin(0.5, 20, 0.3, -1.0)];
        assert_eq!(search_bins(&bins, 0.55, 2.0), 0.7);
    }

    #[tokio::test]
    async fn test_effective_threshold_default_and_cache() {
        let service = make_service(Vec::new()).await;
        let t = service.get_effective_threshold("BTC", Regime::Panic).await;
        assert!((t - 0.85).abs() < 1e-12);
        assert_eq!(service.lock_thresholds().len(), 1);
        service.clear_cache();
        assert!(service.lock_thresholds().is_empty());

        for regime in Regime::ALL {
            let t = service.get_effective_threshold("ETH", *regime).await;
            assert!((THRESHOLD_FLOOR..=THRESHOLD_CEILING).contains(&t));
        }
    }

    #[tokio::test]
    async fn test_calibrate_probability_through_log() {
        let service = make_service(make_rows(0.65, 100, 40)).await;
        let calibrated = service
            .calibrate_probability(0.65, "BTC", Timeframe::H1, 4)
            .await;
        assert!(calibrated < 0.65);

        // Unknown symbol has no history.
        let raw = service
            .calibrate_probability(0.65, "DOGE", Timeframe::H1, 4)
            .await;
        assert_eq!(raw, 0.65);
    }

    #[tokio::test]
    async fn test_setup_filter_and_stats() {
        let service = make_service(make_rows(0.65, 60, 30)).await;
        let none = service
            .calibrate_probability_by_setup(0.65, "BTC", Timeframe::H1, 4, Some("fade"), None)
            .await;
        // No fade rows: falls back to plain calibration over all rows.
        let plain = service.calibrate_probability(0.65, "BTC", Timeframe::H1, 4).await;
        assert!((none - plain).abs() < 1e-12);

        let stats = service
            .setup_type_stats("BTC", Timeframe::H1, 4, Some("breakout"), Some("A"), 20)
            .await
            .unwrap();
        assert_eq!(stats.count, 60);
        assert!((stats.hit_rate - 0.5).abs() < 1e-12);
        assert_eq!(stats.var_5, -1.0);
        assert!(service
            .setup_type_stats("BTC", Timeframe::H1, 4, Some("fade"), None, 20)
            .await
            .is_none());
    }

    #[tokio::test]
    async fn test_scorecard_from_log() {
        let service = make_service(make_rows(0.65, 30, 20)).await;
        let report = service
            .forecast_scorecard("BTC", Timeframe::H1, 4)
            .await
            .unwrap();
        assert_eq!(report.total_forecasts, 30);
        assert!(report.overall_brier > 0.0 && report.overall_brier < 0.5);
    }
}
