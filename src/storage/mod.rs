//! Persistence layer.
//!
//! The diagnostics log (append-only snapshots) and the forecast log
//! (predictions and their realized outcomes) are traits with SQLite and
//! in-memory implementations. Group weights persist as a JSON file.

pub mod memory;
pub mod sqlite;
pub mod weights;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::types::{DiagnosticsSnapshot, Phase, Regime, Timeframe};

pub use memory::{InMemoryDiagnosticsLog, InMemoryForecastLog};
pub use sqlite::{SqliteDiagnosticsLog, SqliteForecastLog};
pub use weights::{load_weights, save_weights};

// ---------------------------------------------------------------------------
// Diagnostics log
// ---------------------------------------------------------------------------

#[async_trait]
pub trait DiagnosticsLog: Send + Sync {
    /// Append a snapshot and return its id.
    ///
    /// Idempotent on (symbol, timeframe, timestamp): a repeat returns the
    /// id of the row already stored.
    async fn save_snapshot(&self, snapshot: &DiagnosticsSnapshot) -> Result<i64>;

    async fn get_snapshots(&self, query: &SnapshotQuery) -> Result<Vec<DiagnosticsSnapshot>>;
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum SnapshotOrder {
    #[default]
    OldestFirst,
    NewestFirst,
}

/// Filter over logged snapshots. Unset fields match everything.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SnapshotQuery {
    pub symbol: Option<String>,
    pub timeframe: Option<Timeframe>,
    pub phase: Option<Phase>,
    /// Regime stored with the snapshot.
    pub regime: Option<Regime>,
    pub pattern_key: Option<String>,
    pub min_pump_score: Option<f64>,
    pub max_pump_score: Option<f64>,
    pub since_ms: Option<i64>,
    pub until_ms: Option<i64>,
    pub limit: Option<usize>,
    pub order: SnapshotOrder,
}

impl SnapshotQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn symbol(mut self, symbol: impl Into<String>) -> Self {
        self.symbol = Some(symbol.into());
        self
    }

    pub fn timeframe(mut self, timeframe: Timeframe) -> Self {
        self.timeframe = Some(timeframe);
        self
    }

    pub fn phase(mut self, phase: Phase) -> Self {
        self.phase = Some(phase);
        self
    }

    pub fn regime(mut self, regime: Regime) -> Self {
        self.regime = Some(regime);
        self
    }

    pub fn pattern_key(mut self, key: impl Into<String>) -> Self {
        self.pattern_key = Some(key.into());
        self
    }

    pub fn pump_range(mut self, min: Option<f64>, max: Option<f64>) -> Self {
        self.min_pump_score = min;
        self.max_pump_score = max;
        self
    }

    pub fn since(mut self, ms: i64) -> Self {
        self.since_ms = Some(ms);
        self
    }

    pub fn until(mut self, ms: i64) -> Self {
        self.until_ms = Some(ms);
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn newest_first(mut self) -> Self {
        self.order = SnapshotOrder::NewestFirst;
        self
    }

    pub fn matches(&self, s: &DiagnosticsSnapshot) -> bool {
        self.symbol.as_deref().map_or(true, |v| v == s.symbol)
            && self.timeframe.map_or(true, |v| v == s.timeframe)
            && self.phase.map_or(true, |v| v == s.phase)
            && self.regime.map_or(true, |v| s.regime() == Some(v))
            && self.pattern_key.as_deref().map_or(true, |v| v == s.pattern_key)
            && self.min_pump_score.map_or(true, |v| s.pump_score >= v)
            && self.max_pump_score.map_or(true, |v| s.pump_score <= v)
            && self.since_ms.map_or(true, |v| s.timestamp_ms >= v)
            && self.until_ms.map_or(true, |v| s.timestamp_ms <= v)
    }
}

// ---------------------------------------------------------------------------
// Forecast log
// ---------------------------------------------------------------------------

/// A logged forecast and, once resolved, its realized return.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForecastRecord {
    pub id: Option<i64>,
    pub symbol: String,
    pub timeframe: Timeframe,
    pub horizon_bars: u32,
    pub created_at_ms: i64,
    /// When the horizon elapses.
    pub target_ms: i64,
    pub entry_price: f64,
    /// Percent.
    pub predicted_return: f64,
    pub raw_p_up: f64,
    pub calibrated_p_up: f64,
    pub setup_type: Option<String>,
    pub grade: Option<String>,
    /// Percent; `None` until resolved.
    pub realized_return: Option<f64>,
    pub resolved_at_ms: Option<i64>,
}

impl ForecastRecord {
    pub fn is_resolved(&self) -> bool {
        self.realized_return.is_some()
    }

    /// Whether the realized move went up. `None` while pending.
    pub fn hit(&self) -> Option<bool> {
        self.realized_return.map(|r| r > 0.0)
    }
}

/// Filter over resolved forecasts. Results are newest first.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ForecastQuery {
    pub symbol: Option<String>,
    pub timeframe: Option<Timeframe>,
    pub horizon_bars: Option<u32>,
    pub setup_type: Option<String>,
    pub grade: Option<String>,
    pub limit: Option<usize>,
}

impl ForecastQuery {
    pub fn matches(&self, r: &ForecastRecord) -> bool {
        self.symbol.as_deref().map_or(true, |v| v == r.symbol)
            && self.timeframe.map_or(true, |v| v == r.timeframe)
            && self.horizon_bars.map_or(true, |v| v == r.horizon_bars)
            && self
                .setup_type
                .as_deref()
                .map_or(true, |v| r.setup_type.as_deref() == Some(v))
            && self
                .grade
                .as_deref()
                .map_or(true, |v| r.grade.as_deref() == Some(v))
    }
}

#[async_trait]
pub trait ForecastLog: Send + Sync {
    async fn record_forecast(&self, record: &ForecastRecord) -> Result<i64>;

    async fn record_outcome(&self, id: i64, realized_return: f64, resolved_at_ms: i64) -> Result<()>;

    /// Resolved forecasts matching `query`, newest first.
    async fn resolved(&self, query: &ForecastQuery) -> Result<Vec<ForecastRecord>>;

    /// Unresolved forecasts whose horizon ends at or before `before_ms`.
    async fn pending(&self, before_ms: i64) -> Result<Vec<ForecastRecord>>;
}
