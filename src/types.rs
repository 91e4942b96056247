//! Shared types for the setup scanner.
//!
//! These types form the data model used across all modules: bars and
//! timeframes coming in from the stores, the categorical diagnostics
//! labels, immutable diagnostics snapshots, regime snapshots and the
//! candidates a scan hands back to its caller.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt;

// ---------------------------------------------------------------------------
// Labelled enums
// ---------------------------------------------------------------------------

/// Declares a categorical enum whose wire form is a fixed upper-case label.
///
/// Generates `as_str`, `ALL`, `Display` and a case-insensitive `FromStr`.
macro_rules! labelled_enum {
    (
        $(#[$meta:meta])*
        $name:ident { $($variant:ident => $label:literal),+ $(,)? }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        pub enum $name {
            $(#[serde(rename = $label)] $variant),+
        }

        impl $name {
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $label),+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl std::str::FromStr for $name {
            type Err = anyhow::Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                let upper = s.trim().to_uppercase().replace(['-', ' '], "_");
                $(
                    if upper == $label {
                        return Ok($name::$variant);
                    }
                )+
                Err(anyhow::anyhow!("Unknown {}: {s}", stringify!($name)))
            }
        }
    };
}

labelled_enum! {
    /// Market phase assigned by the diagnostics pipeline.
    Phase {
        Accumulation => "ACCUMULATION",
        Distribution => "DISTRIBUTION",
        ExpansionUp => "EXPANSION_UP",
        ExpansionDown => "EXPANSION_DOWN",
        Shakeout => "SHAKEOUT",
    }
}

labelled_enum! {
    Trend {
        Bullish => "BULLISH",
        Bearish => "BEARISH",
        Neutral => "NEUTRAL",
    }
}

labelled_enum! {
    /// Volatility bucket relative to the symbol's own recent history.
    VolatilityLevel {
        Low => "LOW",
        Medium => "MEDIUM",
        High => "HIGH",
    }
}

labelled_enum! {
    /// Liquidity bucket from current volume against its moving average.
    LiquidityLevel {
        Low => "LOW",
        Medium => "MEDIUM",
        High => "HIGH",
    }
}

labelled_enum! {
    /// Swing-structure label of the most recent bars.
    StructureLabel {
        HigherHigh => "HIGHER_HIGH",
        LowerLow => "LOWER_LOW",
        Range => "RANGE",
    }
}

labelled_enum! {
    /// Position of price inside its recent dealing range.
    PriceZone {
        Premium => "PREMIUM",
        Discount => "DISCOUNT",
        Equilibrium => "EQUILIBRIUM",
    }
}

labelled_enum! {
    /// Macro market regime.
    Regime {
        RiskOn => "RISK_ON",
        RiskOff => "RISK_OFF",
        Panic => "PANIC",
        Choppy => "CHOPPY",
        AltSeason => "ALT_SEASON",
        BtcDominance => "BTC_DOMINANCE",
    }
}

labelled_enum! {
    /// Liquidity classification from spread and depth-at-distance.
    TradabilityState {
        Illiquid => "ILLIQUID",
        Normal => "NORMAL",
        HighLiquidity => "HIGH_LIQUIDITY",
    }
}

labelled_enum! {
    /// Risk appetite of the user a scan runs for.
    UserProfile {
        Conservative => "CONSERVATIVE",
        Balanced => "BALANCED",
        Aggressive => "AGGRESSIVE",
    }
}

labelled_enum! {
    Direction {
        Long => "LONG",
        Short => "SHORT",
    }
}

labelled_enum! {
    /// Strength of the multi-timeframe consensus.
    MomentumGrade {
        StrongBullish => "STRONG_BULLISH",
        WeakBullish => "WEAK_BULLISH",
        Neutral => "NEUTRAL",
        WeakBearish => "WEAK_BEARISH",
        StrongBearish => "STRONG_BEARISH",
    }
}

impl Regime {
    /// Fixed human-readable description of the regime.
    pub fn description(&self) -> &'static str {
        match self {
            Regime::RiskOn => "Risk-on: market rising with contained volatility",
            Regime::RiskOff => "Risk-off: market falling, defensive positioning",
            Regime::Panic => "Panic: extreme volatility with a sharp drawdown",
            Regime::Choppy => "Choppy: elevated volatility without a clear direction",
            Regime::AltSeason => "Alt season: alt-market proxies outperforming the anchor",
            Regime::BtcDominance => "Anchor dominance: anchor rising while alts lag",
        }
    }
}

impl Default for UserProfile {
    fn default() -> Self {
        UserProfile::Balanced
    }
}

// ---------------------------------------------------------------------------
// Timeframe
// ---------------------------------------------------------------------------

/// Bar interval. Serialized as its short label (`"4h"`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Timeframe {
    M1,
    M15,
    H1,
    H4,
    D1,
    W1,
}

impl Timeframe {
    pub const ALL: &'static [Timeframe] = &[
        Timeframe::M1,
        Timeframe::M15,
        Timeframe::H1,
        Timeframe::H4,
        Timeframe::D1,
        Timeframe::W1,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Timeframe::M1 => "1m",
            Timeframe::M15 => "15m",
            Timeframe::H1 => "1h",
            Timeframe::H4 => "4h",
            Timeframe::D1 => "1d",
            Timeframe::W1 => "1w",
        }
    }

    /// Length of one bar in hours.
    pub fn hours(&self) -> f64 {
        match self {
            Timeframe::M1 => 1.0 / 60.0,
            Timeframe::M15 => 0.25,
            Timeframe::H1 => 1.0,
            Timeframe::H4 => 4.0,
            Timeframe::D1 => 24.0,
            Timeframe::W1 => 168.0,
        }
    }

    /// Length of one bar in milliseconds.
    pub fn duration_ms(&self) -> i64 {
        (self.hours() * 3_600_000.0).round() as i64
    }

    /// Vote weight when several timeframes elect a consensus phase.
    pub fn consensus_weight(&self) -> f64 {
        match self {
            Timeframe::W1 | Timeframe::D1 => 3.0,
            Timeframe::H4 => 2.0,
            Timeframe::H1 => 1.0,
            Timeframe::M15 => 0.5,
            Timeframe::M1 => 0.25,
        }
    }
}

impl fmt::Display for Timeframe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Timeframe {
    type Err = ScanError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "1m" => Ok(Timeframe::M1),
            "15m" => Ok(Timeframe::M15),
            "1h" | "60m" => Ok(Timeframe::H1),
            "4h" => Ok(Timeframe::H4),
            "1d" | "24h" => Ok(Timeframe::D1),
            "1w" | "7d" => Ok(Timeframe::W1),
            _ => Err(ScanError::InvalidTimeframe(s.to_string())),
        }
    }
}

impl TryFrom<String> for Timeframe {
    type Error = ScanError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Timeframe> for String {
    fn from(tf: Timeframe) -> Self {
        tf.as_str().to_string()
    }
}

// ---------------------------------------------------------------------------
// Market data
// ---------------------------------------------------------------------------

/// One OHLCV bar. Stores hand these out oldest → newest.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    pub timestamp_ms: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

impl Bar {
    /// True range against the previous close.
    pub fn true_range(&self, prev_close: f64) -> f64 {
        (self.high - self.low)
            .max((self.high - prev_close).abs())
            .max((self.low - prev_close).abs())
    }
}

/// Derivatives metrics for one symbol; each field may be unavailable.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct DerivativesSnapshot {
    pub funding_rate: Option<f64>,
    pub oi_change_pct: Option<f64>,
    /// Cumulative volume delta proxy.
    pub cvd: Option<f64>,
}

impl DerivativesSnapshot {
    pub fn is_empty(&self) -> bool {
        self.funding_rate.is_none() && self.oi_change_pct.is_none() && self.cvd.is_none()
    }
}

// ---------------------------------------------------------------------------
// Diagnostics snapshot
// ---------------------------------------------------------------------------

/// Context stored alongside a snapshot so outcomes can be grouped later.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SnapshotMetrics {
    /// Regime in force when the snapshot was taken.
    #[serde(default)]
    pub regime: Option<Regime>,
    #[serde(default)]
    pub support_distance_pct: Option<f64>,
    #[serde(default)]
    pub resistance_distance_pct: Option<f64>,
    /// Whether an unmitigated demand order block sits below price.
    #[serde(default)]
    pub demand_ob_below: Option<bool>,
    #[serde(default)]
    pub demand_ob_distance_pct: Option<f64>,
    #[serde(default)]
    pub zone: Option<PriceZone>,
    /// 0.0 at the range low, 1.0 at the range high.
    #[serde(default)]
    pub position_in_range: Option<f64>,
    /// Raw score per indicator group, keyed by group label.
    #[serde(default)]
    pub group_scores: BTreeMap<String, f64>,
    /// Free-form indicator and feature readings.
    #[serde(default)]
    pub values: BTreeMap<String, f64>,
}

impl SnapshotMetrics {
    /// Distance to the closer of the nearest support and resistance.
    pub fn nearest_level_distance_pct(&self) -> Option<f64> {
        match (self.support_distance_pct, self.resistance_distance_pct) {
            (Some(s), Some(r)) => Some(s.abs().min(r.abs())),
            (Some(s), None) => Some(s.abs()),
            (None, Some(r)) => Some(r.abs()),
            (None, None) => None,
        }
    }
}

/// Immutable record of one symbol × timeframe evaluation.
///
/// Written once to the diagnostics log and never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiagnosticsSnapshot {
    /// Row id assigned by the log; `None` before the first save.
    #[serde(default)]
    pub id: Option<i64>,
    pub timestamp_ms: i64,
    pub symbol: String,
    pub timeframe: Timeframe,
    pub phase: Phase,
    pub trend: Trend,
    pub volatility: VolatilityLevel,
    pub liquidity: LiquidityLevel,
    pub structure: StructureLabel,
    /// Upside opportunity in [0, 1].
    pub pump_score: f64,
    /// Downside danger in [0, 1].
    pub risk_score: f64,
    pub close_price: f64,
    pub strategy_mode: String,
    pub metrics: SnapshotMetrics,
    pub pattern_key: String,
    #[serde(default)]
    pub reliability_score: Option<f64>,
}

impl DiagnosticsSnapshot {
    pub fn regime(&self) -> Option<Regime> {
        self.metrics.regime
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        DateTime::from_timestamp_millis(self.timestamp_ms).unwrap_or_default()
    }
}

impl fmt::Display for DiagnosticsSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{} {}] {} / {} / {} pump={:.2} risk={:.2} @ {}",
            self.symbol,
            self.timeframe,
            self.phase,
            self.trend,
            self.structure,
            self.pump_score,
            self.risk_score,
            self.close_price,
        )
    }
}

/// Deterministic key grouping historically similar situations.
///
/// First 16 hex chars of SHA-256 over `phase_trend_structure[_regime]`.
pub fn pattern_key(
    phase: Phase,
    trend: Trend,
    structure: StructureLabel,
    regime: Option<Regime>,
) -> String {
    let mut material = format!("{phase}_{trend}_{structure}");
    if let Some(regime) = regime {
        material.push('_');
        material.push_str(regime.as_str());
    }
    let digest = Sha256::digest(material.as_bytes());
    let mut key = hex::encode(digest);
    key.truncate(16);
    key
}

// ---------------------------------------------------------------------------
// Regime snapshot
// ---------------------------------------------------------------------------

/// Classified macro regime plus the metrics that produced it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegimeSnapshot {
    pub regime: Regime,
    pub confidence: f64,
    pub description: String,
    pub btc_change_1h: f64,
    pub btc_change_4h: f64,
    pub btc_change_24h: f64,
    /// Mean true range as % of price.
    pub btc_volatility: f64,
    pub btc_trend: Trend,
    pub alt_performance_vs_btc: Option<f64>,
    pub usdt_dominance: Option<f64>,
    pub computed_at: DateTime<Utc>,
}

impl fmt::Display for RegimeSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} ({:.0}%): {}",
            self.regime,
            self.confidence * 100.0,
            self.description,
        )
    }
}

// ---------------------------------------------------------------------------
// Scan output
// ---------------------------------------------------------------------------

/// Liquidity metrics and the resulting classification.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TradabilitySnapshot {
    pub volume_24h_usd: Option<f64>,
    pub spread_bps: f64,
    pub size_at_10bps_usd: f64,
    pub state: TradabilityState,
}

/// Per-timeframe summary carried on a candidate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeframeBreakdown {
    pub phase: Phase,
    pub trend: Trend,
    pub pump_score: f64,
    pub risk_score: f64,
    pub normalized_long: f64,
    pub normalized_short: f64,
    pub net_score: f64,
}

/// One asset's scan result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SetupCandidate {
    pub symbol: String,
    pub phase: Phase,
    pub avg_pump_score: f64,
    pub avg_risk_score: f64,
    pub per_timeframe: BTreeMap<Timeframe, TimeframeBreakdown>,
    /// Multi-timeframe bias and how strongly the timeframes agree on it.
    pub direction: Direction,
    pub confidence: f64,
    pub current_price: f64,
    pub tradability: TradabilitySnapshot,
    pub regime: Regime,
    pub pattern_key: String,
    pub reliability_score: Option<f64>,
    pub reliability_samples: usize,
    pub effective_threshold: f64,
}

impl fmt::Display for SetupCandidate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} {} conf={:.2} pump={:.2} risk={:.2} threshold={:.2} [{}]",
            self.symbol,
            self.phase,
            self.direction,
            self.confidence,
            self.avg_pump_score,
            self.avg_risk_score,
            self.effective_threshold,
            self.tradability.state,
        )?;
        if let Some(r) = self.reliability_score {
            write!(f, " reliability={:.2} (n={})", r, self.reliability_samples)?;
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Domain-specific error types for the scanner.
#[derive(Debug, thiserror::Error)]
pub enum ScanError {
    #[error("At least one scored timeframe is required")]
    EmptyTimeframes,

    #[error("Insufficient data for {symbol}: need {needed} bars, have {got}")]
    InsufficientData {
        symbol: String,
        needed: usize,
        got: usize,
    },

    #[error("Provider error ({provider}): {message}")]
    Provider { provider: String, message: String },

    #[error("Invalid timeframe: {0}")]
    InvalidTimeframe(String),

    #[error("Storage error: {0}")]
    Storage(String),
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
