//! Deterministic collaborators for integration tests.
//!
//! A bar store whose symbols can be forced to fail, a bar store gauging
//! concurrent reads, fixed indicator and feature providers describing a
//! bullish low-volatility setup, a mock derivatives provider, and
//! builders for bars and snapshots.

#![allow(dead_code)]

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use mockall::mock;
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use setup_scanner::backtest::{CalibrationService, OutcomeReplayer};
use setup_scanner::config::{CalibrationConfig, RegimeConfig, ScannerConfig};
use setup_scanner::data::memory::InMemoryBarStore;
use setup_scanner::data::{
    BarStore, DerivativesProvider, FeatureProvider, FeatureSet, IndicatorProvider, IndicatorSet,
    SeriesTail,
};
use setup_scanner::engine::{RegimeClassifier, ScanComponents, ScannerOrchestrator};
use setup_scanner::scoring::{GroupWeights, ScoringEngine};
use setup_scanner::storage::{DiagnosticsLog, InMemoryForecastLog};
use setup_scanner::types::*;

pub const HOUR_MS: i64 = 3_600_000;

// ---------------------------------------------------------------------------
// Derivatives
// ---------------------------------------------------------------------------

mock! {
    pub Derivatives {}

    #[async_trait]
    impl DerivativesProvider for Derivatives {
        async fn snapshot(&self, symbol: &str) -> Result<DerivativesSnapshot>;
    }
}

// ---------------------------------------------------------------------------
// Bar store
// ---------------------------------------------------------------------------

/// In-memory bars plus a switchable failure list.
#[derive(Default)]
pub struct FlakyBarStore {
    inner: InMemoryBarStore,
    failing: Arc<Mutex<HashSet<String>>>,
}

impl FlakyBarStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every later read for `symbol` errors.
    pub fn fail_for(&self, symbol: &str) {
        self.failing.lock().unwrap().insert(symbol.to_string());
    }

    pub async fn insert_bars(&self, symbol: &str, timeframe: Timeframe, bars: Vec<Bar>) {
        self.inner.insert_bars(symbol, timeframe, bars).await;
    }
}

#[async_trait]
impl BarStore for FlakyBarStore {
    async fn last_n(&self, symbol: &str, timeframe: Timeframe, n: usize) -> Result<Vec<Bar>> {
        let failing = self.failing.lock().unwrap().contains(symbol);
        if failing {
            return Err(anyhow!("forced bar store error for {symbol}"));
        }
        self.inner.last_n(symbol, timeframe, n).await
    }
}

/// In-memory bars that record the peak number of overlapping reads on one
/// timeframe. Each gauged read holds for a few milliseconds.
pub struct GaugedBarStore {
    inner: InMemoryBarStore,
    gauged: Timeframe,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
}

impl GaugedBarStore {
    pub fn new(gauged: Timeframe) -> Self {
        Self {
            inner: InMemoryBarStore::new(),
            gauged,
            in_flight: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        }
    }

    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    pub async fn insert_bars(&self, symbol: &str, timeframe: Timeframe, bars: Vec<Bar>) {
        self.inner.insert_bars(symbol, timeframe, bars).await;
    }
}

#[async_trait]
impl BarStore for GaugedBarStore {
    async fn last_n(&self, symbol: &str, timeframe: Timeframe, n: usize) -> Result<Vec<Bar>> {
        if timeframe == self.gauged {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(20)).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
        }
        self.inner.last_n(symbol, timeframe, n).await
    }
}

// ---------------------------------------------------------------------------
// Indicator / feature providers
// ---------------------------------------------------------------------------

/// Price trading 5% under VWAP and 10% under the long EMA.
pub struct DiscountIndicators;

impl IndicatorProvider for DiscountIndicators {
    fn compute(&self, bars: &[Bar]) -> IndicatorSet {
        let close = bars.last().map(|b| b.close).unwrap_or(100.0);
        IndicatorSet {
            close: Some(close),
            vwap: Some(close * 1.05),
            ema_200: Some(SeriesTail::new(close * 1.1, close * 1.1)),
            ..IndicatorSet::default()
        }
    }
}

/// Bullish trend, low volatility, medium liquidity, higher highs.
pub struct BullishFeatures;

impl FeatureProvider for BullishFeatures {
    fn extract(
        &self,
        _bars: &[Bar],
        _indicators: &IndicatorSet,
        _derivatives: Option<&DerivativesSnapshot>,
    ) -> FeatureSet {
        FeatureSet {
            trend: Trend::Bullish,
            volatility: VolatilityLevel::Low,
            liquidity: LiquidityLevel::Medium,
            structure: StructureLabel::HigherHigh,
            ..FeatureSet::default()
        }
    }
}

// ---------------------------------------------------------------------------
// Builders
// ---------------------------------------------------------------------------

pub fn make_bars(n: usize, timeframe: Timeframe, start_ms: i64, close: f64) -> Vec<Bar> {
    (0..n)
        .map(|i| Bar {
            timestamp_ms: start_ms + i as i64 * timeframe.duration_ms(),
            open: close,
            high: close * 1.001,
            low: close * 0.999,
            close,
            volume: 1_000_000.0,
        })
        .collect()
}

pub fn make_snapshot(
    symbol: &str,
    timestamp_ms: i64,
    pump_score: f64,
    close_price: f64,
    regime: Regime,
) -> DiagnosticsSnapshot {
    DiagnosticsSnapshot {
        id: None,
        timestamp_ms,
        symbol: symbol.to_string(),
        timeframe: Timeframe::H1,
        phase: Phase::Accumulation,
        trend: Trend::Bullish,
        volatility: VolatilityLevel::Low,
        liquidity: LiquidityLevel::Medium,
        structure: StructureLabel::HigherHigh,
        pump_score,
        risk_score: 0.2,
        close_price,
        strategy_mode: "scan".to_string(),
        metrics: SnapshotMetrics {
            regime: Some(regime),
            ..SnapshotMetrics::default()
        },
        pattern_key: pattern_key(
            Phase::Accumulation,
            Trend::Bullish,
            StructureLabel::HigherHigh,
            Some(regime),
        ),
        reliability_score: None,
    }
}

/// Scanner wired to the fixed providers and in-memory stores.
pub fn make_scanner(
    bars: Arc<dyn BarStore>,
    log: Arc<dyn DiagnosticsLog>,
    derivatives: Option<Arc<dyn DerivativesProvider>>,
) -> ScannerOrchestrator {
    make_scanner_with(bars, log, derivatives, &ScannerConfig::default())
}

pub fn make_scanner_with(
    bars: Arc<dyn BarStore>,
    log: Arc<dyn DiagnosticsLog>,
    derivatives: Option<Arc<dyn DerivativesProvider>>,
    config: &ScannerConfig,
) -> ScannerOrchestrator {
    let replayer = Arc::new(OutcomeReplayer::new(log.clone(), bars.clone(), 10));
    let calibration = Arc::new(CalibrationService::new(
        replayer,
        Arc::new(InMemoryForecastLog::new()),
        CalibrationConfig::default(),
    ));
    ScannerOrchestrator::new(
        ScanComponents {
            bars: bars.clone(),
            indicators: Arc::new(DiscountIndicators),
            features: Arc::new(BullishFeatures),
            derivatives,
            diagnostics_log: log,
            scoring: Arc::new(ScoringEngine::new(GroupWeights::default())),
            regime: Arc::new(RegimeClassifier::new(bars, RegimeConfig::default())),
            calibration,
        },
        config,
    )
}
