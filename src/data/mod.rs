//! Market data collaborators.
//!
//! Defines the traits the scanning core consumes (bar store, indicator
//! and feature providers, derivatives snapshots, forecast predictor)
//! together with the value types they exchange. Reference
//! implementations live in the submodules.

pub mod baseline;
pub mod features;
pub mod indicators;
pub mod memory;
pub mod sqlite;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::types::{
    Bar, DerivativesSnapshot, LiquidityLevel, PriceZone, StructureLabel, Timeframe, Trend,
    VolatilityLevel,
};

// ---------------------------------------------------------------------------
// Collaborator traits
// ---------------------------------------------------------------------------

/// Read access to stored OHLCV bars.
#[async_trait]
pub trait BarStore: Send + Sync {
    /// The newest `n` bars for a symbol, ordered oldest → newest.
    ///
    /// Unknown symbols return an empty vector, not an error.
    async fn last_n(&self, symbol: &str, timeframe: Timeframe, n: usize) -> Result<Vec<Bar>>;
}

/// Computes indicator readings from a bar window. Pure.
pub trait IndicatorProvider: Send + Sync {
    fn compute(&self, bars: &[Bar]) -> IndicatorSet;
}

/// Derives structural features from bars and indicators. Pure.
pub trait FeatureProvider: Send + Sync {
    fn extract(
        &self,
        bars: &[Bar],
        indicators: &IndicatorSet,
        derivatives: Option<&DerivativesSnapshot>,
    ) -> FeatureSet;
}

/// Funding, open interest and CVD for one symbol.
#[async_trait]
pub trait DerivativesProvider: Send + Sync {
    async fn snapshot(&self, symbol: &str) -> Result<DerivativesSnapshot>;

    /// Provider name for logging.
    fn name(&self) -> &str {
        "derivatives"
    }
}

/// Black-box forecast model trainer.
#[async_trait]
pub trait ForecastPredictor: Send + Sync {
    async fn train(&self, key: &ModelKey, bars: &[Bar]) -> Result<Arc<dyn ForecastModel>>;
}

/// A trained forecast model.
pub trait ForecastModel: Send + Sync {
    fn predict(&self, bars: &[Bar]) -> Result<Forecast>;
}

// ---------------------------------------------------------------------------
// Indicator readings
// ---------------------------------------------------------------------------

/// Last two values of a series, enough to read its direction.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SeriesTail {
    pub last: f64,
    pub prev: f64,
}

impl SeriesTail {
    pub fn new(last: f64, prev: f64) -> Self {
        Self { last, prev }
    }

    pub fn rising(&self) -> bool {
        self.last > self.prev
    }

    pub fn falling(&self) -> bool {
        self.last < self.prev
    }

    /// Build from the last two entries of a series.
    pub fn from_series(series: &[f64]) -> Option<Self> {
        match series {
            [.., prev, last] if prev.is_finite() && last.is_finite() => Some(Self::new(*last, *prev)),
            _ => None,
        }
    }
}

/// Latest indicator readings for one bar window. Missing readings are `None`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IndicatorSet {
    pub close: Option<f64>,
    pub ema_20: Option<SeriesTail>,
    pub ema_50: Option<SeriesTail>,
    pub ema_200: Option<SeriesTail>,
    pub adx: Option<f64>,
    pub plus_di: Option<f64>,
    pub minus_di: Option<f64>,
    pub rsi: Option<f64>,
    pub stoch_rsi: Option<f64>,
    pub macd: Option<f64>,
    pub macd_signal: Option<f64>,
    pub macd_hist: Option<f64>,
    /// WaveTrend lines.
    pub wt1: Option<f64>,
    pub wt2: Option<f64>,
    /// Schaff trend cycle.
    pub stc: Option<f64>,
    pub obv: Option<SeriesTail>,
    /// Chaikin money flow.
    pub cmf: Option<f64>,
    pub bb_upper: Option<f64>,
    pub bb_middle: Option<f64>,
    pub bb_lower: Option<f64>,
    pub atr: Option<f64>,
    /// Mean ATR over the window, for relative volatility.
    pub atr_mean: Option<f64>,
    pub vwap: Option<f64>,
}

impl IndicatorSet {
    /// Flatten the readings into a name → value map for snapshot metrics.
    pub fn to_values(&self) -> BTreeMap<String, f64> {
        let mut values = BTreeMap::new();
        let mut put = |name: &str, value: Option<f64>| {
            if let Some(v) = value.filter(|v| v.is_finite()) {
                values.insert(name.to_string(), v);
            }
        };
        put("close", self.close);
        put("ema_20", self.ema_20.map(|t| t.last));
        put("ema_50", self.ema_50.map(|t| t.last));
        put("ema_200", self.ema_200.map(|t| t.last));
        put("adx", self.adx);
        put("plus_di", self.plus_di);
        put("minus_di", self.minus_di);
        put("rsi", self.rsi);
        put("stoch_rsi", self.stoch_rsi);
        put("macd", self.macd);
        put("macd_signal", self.macd_signal);
        put("macd_hist", self.macd_hist);
        put("wt1", self.wt1);
        put("wt2", self.wt2);
        put("stc", self.stc);
        put("obv", self.obv.map(|t| t.last));
        put("cmf", self.cmf);
        put("bb_upper", self.bb_upper);
        put("bb_middle", self.bb_middle);
        put("bb_lower", self.bb_lower);
        put("atr", self.atr);
        put("vwap", self.vwap);
        values
    }
}

// ---------------------------------------------------------------------------
// Features
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BreakOfStructure {
    Up,
    Down,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DivergenceStrength {
    Strong,
    Medium,
    Weak,
}

impl DivergenceStrength {
    /// Vote weight of a divergence in the momentum group.
    pub fn weight(&self) -> f64 {
        match self {
            DivergenceStrength::Strong => 1.5,
            DivergenceStrength::Medium => 1.0,
            DivergenceStrength::Weak => 0.5,
        }
    }
}

/// Price/oscillator divergence. `bias` is Bullish or Bearish.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Divergence {
    pub bias: Trend,
    pub strength: DivergenceStrength,
    pub indicator: &'static str,
}

/// Structural context derived from a bar window.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FeatureSet {
    pub trend: Trend,
    pub volatility: VolatilityLevel,
    pub liquidity: LiquidityLevel,
    pub structure: StructureLabel,
    pub break_of_structure: Option<BreakOfStructure>,
    pub zone: Option<PriceZone>,
    pub position_in_range: Option<f64>,
    /// Signed % from price down to the nearest support.
    pub support_distance_pct: Option<f64>,
    /// Signed % from price up to the nearest resistance.
    pub resistance_distance_pct: Option<f64>,
    pub demand_ob_below: bool,
    pub demand_ob_distance_pct: Option<f64>,
    pub divergences: Vec<Divergence>,
}

impl Default for FeatureSet {
    fn default() -> Self {
        Self {
            trend: Trend::Neutral,
            volatility: VolatilityLevel::Medium,
            liquidity: LiquidityLevel::Medium,
            structure: StructureLabel::Range,
            break_of_structure: None,
            zone: None,
            position_in_range: None,
            support_distance_pct: None,
            resistance_distance_pct: None,
            demand_ob_below: false,
            demand_ob_distance_pct: None,
            divergences: Vec::new(),
        }
    }
}

// ---------------------------------------------------------------------------
// Forecasts
// ---------------------------------------------------------------------------

/// Identity of a trained forecast model.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ModelKey {
    pub symbol: String,
    pub timeframe: Timeframe,
    pub horizon_bars: u32,
    pub model_type: String,
}

impl std::fmt::Display for ModelKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}:{}:h{}:{}",
            self.symbol, self.timeframe, self.horizon_bars, self.model_type
        )
    }
}

/// Raw model output.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Forecast {
    /// Predicted return over the horizon, in percent.
    pub predicted_return: f64,
    /// Probability that the return is positive.
    pub p_up: f64,
    /// Confidence interval on the return, in percent.
    pub interval: (f64, f64),
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
