//! Standard feature provider.
//!
//! Reads trend, volatility and liquidity states from indicator values,
//! then derives swing structure from the bars: higher-high/lower-low,
//! break of structure, premium/discount zone, nearest support and
//! resistance, demand order blocks and RSI divergences.

use crate::data::indicators::{mean, rsi_series};
use crate::data::{
    BreakOfStructure, Divergence, DivergenceStrength, FeatureProvider, FeatureSet, IndicatorSet,
};
use crate::types::{
    Bar, DerivativesSnapshot, LiquidityLevel, PriceZone, StructureLabel, Trend, VolatilityLevel,
};

/// ATR / mean-ATR ratio above which volatility is High.
const VOL_HIGH_RATIO: f64 = 1.5;
const VOL_LOW_RATIO: f64 = 0.7;
/// Volume / MA20 ratio above which liquidity is High.
const VOLUME_HIGH_RATIO: f64 = 1.5;
const VOLUME_LOW_RATIO: f64 = 0.5;
/// Bars considered for swings, zones and levels.
const STRUCTURE_LOOKBACK: usize = 50;
const SWING_SIDE: usize = 2;
/// Half-width of the equilibrium band around mid-range, as a share of the range.
const EQUILIBRIUM_BAND: f64 = 0.05;
const ORDER_BLOCK_LOOKBACK: usize = 30;

#[derive(Debug, Default, Clone)]
pub struct StandardFeatures;

impl StandardFeatures {
    pub fn new() -> Self {
        Self
    }
}

impl FeatureProvider for StandardFeatures {
    fn extract(
        &self,
        bars: &[Bar],
        indicators: &IndicatorSet,
        _derivatives: Option<&DerivativesSnapshot>,
    ) -> FeatureSet {
        let Some(close) = bars.last().map(|b| b.close) else {
            return FeatureSet::default();
        };

        let window = &bars[bars.len().saturating_sub(STRUCTURE_LOOKBACK)..];
        let swings = Swings::find(window, SWING_SIDE);
        let (zone, position_in_range) = premium_discount(window, &swings, close);
        let demand_ob = demand_order_block(bars, close);

        FeatureSet {
            trend: trend_state(indicators, close),
            volatility: volatility_state(indicators),
            liquidity: liquidity_state(bars),
            structure: structure_label(bars),
            break_of_structure: break_of_structure(window, &swings, close),
            zone,
            position_in_range,
            support_distance_pct: swings
                .lows
                .iter()
                .map(|&i| window[i].low)
                .filter(|&level| level < close)
                .fold(None, |best: Option<f64>, level| Some(best.map_or(level, |b| b.max(level))))
                .map(|level| (close - level) / close * 100.0),
            resistance_distance_pct: swings
                .highs
                .iter()
                .map(|&i| window[i].high)
                .filter(|&level| level > close)
                .fold(None, |best: Option<f64>, level| Some(best.map_or(level, |b| b.min(level))))
                .map(|level| (level - close) / close * 100.0),
            demand_ob_below: demand_ob.is_some(),
            demand_ob_distance_pct: demand_ob,
            divergences: rsi_divergences(bars),
        }
    }
}

// ---------------------------------------------------------------------------
// States
// ---------------------------------------------------------------------------

/// Vote across EMA stack, RSI side and MACD histogram.
fn trend_state(ind: &IndicatorSet, close: f64) -> Trend {
    let mut votes: Vec<f64> = Vec::new();

    if let (Some(e20), Some(e50)) = (ind.ema_20, ind.ema_50) {
        if close > e20.last && e20.last > e50.last {
            votes.push(1.0);
        } else if close < e20.last && e20.last < e50.last {
            votes.push(-1.0);
        }
    }
    if let (Some(e50), Some(e200)) = (ind.ema_50, ind.ema_200) {
        if e50.last > e200.last {
            votes.push(1.0);
        } else if e50.last < e200.last {
            votes.push(-1.0);
        }
    }
    if let Some(rsi) = ind.rsi {
        if rsi > 60.0 {
            votes.push(1.0);
        } else if rsi < 40.0 {
            votes.push(-1.0);
        }
    }
    if let Some(hist) = ind.macd_hist {
        if hist > 0.0 {
            votes.push(1.0);
        } else if hist < 0.0 {
            votes.push(-1.0);
        }
    }

    match mean(&votes) {
        Some(avg) if avg > 0.3 => Trend::Bullish,
        Some(avg) if avg < -0.3 => Trend::Bearish,
        _ => Trend::Neutral,
    }
}

fn volatility_state(ind: &IndicatorSet) -> VolatilityLevel {
    match (ind.atr, ind.atr_mean) {
        (Some(atr), Some(avg)) if avg > 0.0 => {
            let ratio = atr / avg;
            if ratio > VOL_HIGH_RATIO {
                VolatilityLevel::High
            } else if ratio < VOL_LOW_RATIO {
                VolatilityLevel::Low
            } else {
                VolatilityLevel::Medium
            }
        }
        _ => VolatilityLevel::Medium,
    }
}

fn liquidity_state(bars: &[Bar]) -> LiquidityLevel {
    let volumes: Vec<f64> = bars.iter().map(|b| b.volume.max(0.0)).collect();
    if volumes.iter().sum::<f64>() == 0.0 {
        return LiquidityLevel::Low;
    }
    let tail = &volumes[volumes.len().saturating_sub(20)..];
    let (Some(avg), Some(current)) = (mean(tail), volumes.last()) else {
        return LiquidityLevel::Medium;
    };
    if avg == 0.0 {
        return LiquidityLevel::Medium;
    }
    let ratio = current / avg;
    if ratio > VOLUME_HIGH_RATIO {
        LiquidityLevel::High
    } else if ratio < VOLUME_LOW_RATIO {
        LiquidityLevel::Low
    } else {
        LiquidityLevel::Medium
    }
}

/// Compare the extremes of the last `lookback` bars with the block before.
fn structure_label(bars: &[Bar]) -> StructureLabel {
    if bars.len() < 20 {
        return StructureLabel::Range;
    }
    let lookback = (bars.len() / 4).min(10);
    let recent = &bars[bars.len() - lookback..];
    let prev = &bars[bars.len() - 2 * lookback..bars.len() - lookback];

    let high = |s: &[Bar]| s.iter().map(|b| b.high).fold(f64::NEG_INFINITY, f64::max);
    let low = |s: &[Bar]| s.iter().map(|b| b.low).fold(f64::INFINITY, f64::min);

    if high(recent) > high(prev) {
        StructureLabel::HigherHigh
    } else if low(recent) < low(prev) {
        StructureLabel::LowerLow
    } else {
        StructureLabel::Range
    }
}

// ---------------------------------------------------------------------------
// Swing structure
// ---------------------------------------------------------------------------

/// Indices of swing highs and lows inside a window.
#[derive(Debug, Default)]
struct Swings {
    highs: Vec<usize>,
    lows: Vec<usize>,
}

impl Swings {
    /// A swing high is the highest high within `side` bars either way.
    fn find(bars: &[Bar], side: usize) -> Self {
        let mut swings = Swings::default();
        if bars.len() < 2 * side + 1 {
            return swings;
        }
        for i in side..bars.len() - side {
            let window = &bars[i - side..=i + side];
            if window.iter().all(|b| b.high <= bars[i].high) {
                swings.highs.push(i);
            }
            if window.iter().all(|b| b.low >= bars[i].low) {
                swings.lows.push(i);
            }
        }
        swings
    }
}

fn break_of_structure(bars: &[Bar], swings: &Swings, close: f64) -> Option<BreakOfStructure> {
    let last_high = swings.highs.last().map(|&i| bars[i].high);
    let last_low = swings.lows.last().map(|&i| bars[i].low);
    match (last_high, last_low) {
        (Some(h), _) if close > h => Some(BreakOfStructure::Up),
        (_, Some(l)) if close < l => Some(BreakOfStructure::Down),
        _ => None,
    }
}

/// Zone against the mid of the range spanned by the last five swings.
fn premium_discount(bars: &[Bar], swings: &Swings, close: f64) -> (Option<PriceZone>, Option<f64>) {
    let recent_highs = &swings.highs[swings.highs.len().saturating_sub(5)..];
    let recent_lows = &swings.lows[swings.lows.len().saturating_sub(5)..];
    if recent_highs.is_empty() || recent_lows.is_empty() {
        return (None, None);
    }

    let high = recent_highs
        .iter()
        .map(|&i| bars[i].high)
        .fold(f64::NEG_INFINITY, f64::max);
    let low = recent_lows
        .iter()
        .map(|&i| bars[i].low)
        .fold(f64::INFINITY, f64::min);
    let range = high - low;
    if range <= 0.0 {
        return (None, None);
    }

    let position = ((close - low) / range).clamp(0.0, 1.0);
    let zone = if position > 0.5 + EQUILIBRIUM_BAND {
        PriceZone::Premium
    } else if position < 0.5 - EQUILIBRIUM_BAND {
        PriceZone::Discount
    } else {
        PriceZone::Equilibrium
    };
    (Some(zone), Some(position))
}

/// Distance (%) from price down to the newest unmitigated demand block.
///
/// A demand block is a large-bodied bearish candle on above-average
/// volume whose high has not been traded back into since.
fn demand_order_block(bars: &[Bar], close: f64) -> Option<f64> {
    if bars.len() < ORDER_BLOCK_LOOKBACK + 1 || close <= 0.0 {
        return None;
    }
    let start = bars.len() - ORDER_BLOCK_LOOKBACK - 1;
    let avg_volume = mean(&bars[start..].iter().map(|b| b.volume).collect::<Vec<_>>())?;
    if avg_volume <= 0.0 {
        return None;
    }

    for i in (start..bars.len() - 1).rev() {
        let candle = &bars[i];
        let body = (candle.close - candle.open).abs();
        let range = candle.high - candle.low;
        let bearish = candle.close < candle.open;
        if !bearish || range <= 0.0 || body <= range * 0.6 {
            continue;
        }
        if candle.volume / avg_volume <= 1.2 || candle.high >= close {
            continue;
        }
        let mitigated = bars[i + 1..].iter().any(|b| b.low <= candle.high);
        if !mitigated {
            return Some((close - candle.high) / close * 100.0);
        }
    }
    None
}

// ---------------------------------------------------------------------------
// Divergences
// ---------------------------------------------------------------------------

const RSI_PERIOD: usize = 14;

/// Regular RSI divergences between the last two swing highs or lows.
fn rsi_divergences(bars: &[Bar]) -> Vec<Divergence> {
    if bars.len() < 50 {
        return Vec::new();
    }
    let closes: Vec<f64> = bars.iter().map(|b| b.close).collect();
    let rsi = rsi_series(&closes, RSI_PERIOD);
    // rsi[j] belongs to bar j + RSI_PERIOD.
    let rsi_at = |bar: usize| bar.checked_sub(RSI_PERIOD).and_then(|j| rsi.get(j)).copied();

    let swings = Swings::find(bars, SWING_SIDE);
    let mut found = Vec::new();

    if let &[.., a, b] = swings.lows.as_slice() {
        if let (Some(ra), Some(rb)) = (rsi_at(a), rsi_at(b)) {
            if bars[b].low < bars[a].low && rb > ra {
                found.push(Divergence {
                    bias: Trend::Bullish,
                    strength: strength_of(rb - ra),
                    indicator: "RSI",
                });
            }
        }
    }
    if let &[.., a, b] = swings.highs.as_slice() {
        if let (Some(ra), Some(rb)) = (rsi_at(a), rsi_at(b)) {
            if bars[b].high > bars[a].high && rb < ra {
                found.push(Divergence {
                    bias: Trend::Bearish,
                    strength: strength_of(ra - rb),
                    indicator: "RSI",
                });
            }
        }
    }
    found
}

fn strength_of(rsi_gap: f64) -> DivergenceStrength {
    if rsi_gap > 10.0 {
        DivergenceStrength::Strong
    } else if rsi_gap > 5.0 {
        DivergenceStrength::Medium
    } else {
        DivergenceStrength::Weak
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
