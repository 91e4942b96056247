//! Standard indicator provider.
//!
//! Classic formulas over a bar window: EMA, RSI and StochRSI, MACD,
//! ADX/DMI, WaveTrend, Schaff trend cycle, OBV, Chaikin money flow,
//! Bollinger bands, ATR and VWAP. Readings that need more history than
//! the window holds are left as `None`.

use crate::data::{IndicatorProvider, IndicatorSet, SeriesTail};
use crate::types::Bar;

const RSI_PERIOD: usize = 14;
const STOCH_PERIOD: usize = 14;
const ADX_PERIOD: usize = 14;
const ATR_PERIOD: usize = 14;
const BB_PERIOD: usize = 20;
const BB_STD_DEV: f64 = 2.0;
const CMF_PERIOD: usize = 20;
/// OBV slope is read over this many bars.
const OBV_SLOPE_BARS: usize = 5;

/// Indicator provider using textbook periods.
#[derive(Debug, Default, Clone)]
pub struct StandardIndicators;

impl StandardIndicators {
    pub fn new() -> Self {
        Self
    }
}

impl IndicatorProvider for StandardIndicators {
    fn compute(&self, bars: &[Bar]) -> IndicatorSet {
        let closes: Vec<f64> = bars.iter().map(|b| b.close).collect();

        let (macd, macd_signal, macd_hist) = match macd(&closes, 12, 26, 9) {
            Some((m, s)) => (Some(m), Some(s), Some(m - s)),
            None => (None, None, None),
        };
        let (adx, plus_di, minus_di) = match adx(bars, ADX_PERIOD) {
            Some((a, p, m)) => (Some(a), Some(p), Some(m)),
            None => (None, None, None),
        };
        let (wt1, wt2) = match wavetrend(bars) {
            Some((a, b)) => (Some(a), Some(b)),
            None => (None, None),
        };
        let (bb_upper, bb_middle, bb_lower) = match bollinger(&closes, BB_PERIOD, BB_STD_DEV) {
            Some((u, m, l)) => (Some(u), Some(m), Some(l)),
            None => (None, None, None),
        };
        let atr_values = atr_series(bars, ATR_PERIOD);
        let rsi_values = rsi_series(&closes, RSI_PERIOD);

        IndicatorSet {
            close: closes.last().copied(),
            ema_20: SeriesTail::from_series(&ema_series(&closes, 20)),
            ema_50: SeriesTail::from_series(&ema_series(&closes, 50)),
            ema_200: SeriesTail::from_series(&ema_series(&closes, 200)),
            adx,
            plus_di,
            minus_di,
            rsi: rsi_values.last().copied(),
            stoch_rsi: stoch_rsi(&rsi_values, STOCH_PERIOD),
            macd,
            macd_signal,
            macd_hist,
            wt1,
            wt2,
            stc: schaff_trend_cycle(&closes),
            obv: obv_slope(bars, OBV_SLOPE_BARS),
            cmf: chaikin_money_flow(bars, CMF_PERIOD),
            bb_upper,
            bb_middle,
            bb_lower,
            atr: atr_values.last().copied(),
            atr_mean: mean(&atr_values),
            vwap: vwap(bars),
        }
    }
}

// ---------------------------------------------------------------------------
// Series helpers
// ---------------------------------------------------------------------------

pub(crate) fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        None
    } else {
        Some(values.iter().sum::<f64>() / values.len() as f64)
    }
}

/// EMA seeded with the SMA of the first `period` values.
///
/// The output has `len - period + 1` entries, aligned to the input's tail.
pub fn ema_series(values: &[f64], period: usize) -> Vec<f64> {
    if period == 0 || values.len() < period {
        return Vec::new();
    }
    let multiplier = 2.0 / (period as f64 + 1.0);
    let seed = values[..period].iter().sum::<f64>() / period as f64;

    let mut out = Vec::with_capacity(values.len() - period + 1);
    out.push(seed);
    let mut ema = seed;
    for value in &values[period..] {
        ema = (value - ema) * multiplier + ema;
        out.push(ema);
    }
    out
}

/// Difference of two tail-aligned series.
fn aligned_diff(fast: &[f64], slow: &[f64]) -> Vec<f64> {
    let n = fast.len().min(slow.len());
    let fast = &fast[fast.len() - n..];
    let slow = &slow[slow.len() - n..];
    fast.iter().zip(slow).map(|(f, s)| f - s).collect()
}

/// Wilder RSI for every bar once `period` changes are available.
pub fn rsi_series(closes: &[f64], period: usize) -> Vec<f64> {
    if period == 0 || closes.len() < period + 1 {
        return Vec::new();
    }

    let changes: Vec<f64> = closes.windows(2).map(|w| w[1] - w[0]).collect();
    let gains: Vec<f64> = changes.iter().map(|c| c.max(0.0)).collect();
    let losses: Vec<f64> = changes.iter().map(|c| (-c).max(0.0)).collect();

    let mut avg_gain = gains[..period].iter().sum::<f64>() / period as f64;
    let mut avg_loss = losses[..period].iter().sum::<f64>() / period as f64;

    let mut out = vec![rsi_value(avg_gain, avg_loss)];
    for i in period..changes.len() {
        avg_gain = (avg_gain * (period - 1) as f64 + gains[i]) / period as f64;
        avg_loss = (avg_loss * (period - 1) as f64 + losses[i]) / period as f64;
        out.push(rsi_value(avg_gain, avg_loss));
    }
    out
}

fn rsi_value(avg_gain: f64, avg_loss: f64) -> f64 {
    if avg_loss == 0.0 {
        return 100.0;
    }
    let rs = avg_gain / avg_loss;
    100.0 - 100.0 / (1.0 + rs)
}

/// Stochastic of the RSI over `period` values, in [0, 100].
fn stoch_rsi(rsi: &[f64], period: usize) -> Option<f64> {
    if rsi.len() < period {
        return None;
    }
    let window = &rsi[rsi.len() - period..];
    let lo = window.iter().copied().fold(f64::INFINITY, f64::min);
    let hi = window.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let last = *window.last()?;
    if hi - lo < f64::EPSILON {
        return Some(50.0);
    }
    Some((last - lo) / (hi - lo) * 100.0)
}

/// Last MACD line and signal values.
fn macd(closes: &[f64], fast: usize, slow: usize, signal: usize) -> Option<(f64, f64)> {
    let line = aligned_diff(&ema_series(closes, fast), &ema_series(closes, slow));
    let signal_line = ema_series(&line, signal);
    Some((*line.last()?, *signal_line.last()?))
}

/// Wilder ADX with the directional indices: `(adx, +DI, -DI)`.
fn adx(bars: &[Bar], period: usize) -> Option<(f64, f64, f64)> {
    if period == 0 || bars.len() < 2 * period + 1 {
        return None;
    }

    let mut trs = Vec::with_capacity(bars.len() - 1);
    let mut plus_dm = Vec::with_capacity(bars.len() - 1);
    let mut minus_dm = Vec::with_capacity(bars.len() - 1);
    for w in bars.windows(2) {
        let (prev, cur) = (&w[0], &w[1]);
        let up = cur.high - prev.high;
        let down = prev.low - cur.low;
        trs.push(cur.true_range(prev.close));
        plus_dm.push(if up > down && up > 0.0 { up } else { 0.0 });
        minus_dm.push(if down > up && down > 0.0 { down } else { 0.0 });
    }

    let p = period as f64;
    let mut tr_s: f64 = trs[..period].iter().sum();
    let mut plus_s: f64 = plus_dm[..period].iter().sum();
    let mut minus_s: f64 = minus_dm[..period].iter().sum();

    let di = |dm: f64, tr: f64| if tr > 0.0 { 100.0 * dm / tr } else { 0.0 };
    let dx = |plus: f64, minus: f64| {
        let sum = plus + minus;
        if sum > 0.0 {
            100.0 * (plus - minus).abs() / sum
        } else {
            0.0
        }
    };

    let mut dxs = vec![dx(di(plus_s, tr_s), di(minus_s, tr_s))];
    for i in period..trs.len() {
        tr_s = tr_s - tr_s / p + trs[i];
        plus_s = plus_s - plus_s / p + plus_dm[i];
        minus_s = minus_s - minus_s / p + minus_dm[i];
        dxs.push(dx(di(plus_s, tr_s), di(minus_s, tr_s)));
    }

    if dxs.len() < period {
        return None;
    }
    let mut adx = dxs[..period].iter().sum::<f64>() / p;
    for value in &dxs[period..] {
        adx = (adx * (p - 1.0) + value) / p;
    }

    Some((adx, di(plus_s, tr_s), di(minus_s, tr_s)))
}

/// WaveTrend oscillator (channel 10, average 21): `(wt1, wt2)`.
fn wavetrend(bars: &[Bar]) -> Option<(f64, f64)> {
    const CHANNEL: usize = 10;
    const AVERAGE: usize = 21;

    let ap: Vec<f64> = bars.iter().map(|b| (b.high + b.low + b.close) / 3.0).collect();
    let esa = ema_series(&ap, CHANNEL);
    let ap_tail = &ap[ap.len() - esa.len()..];
    let deviation: Vec<f64> = ap_tail
        .iter()
        .zip(&esa)
        .map(|(a, e)| (a - e).abs())
        .collect();
    let d = ema_series(&deviation, CHANNEL);
    if d.is_empty() {
        return None;
    }

    let offset = esa.len() - d.len();
    let ci: Vec<f64> = d
        .iter()
        .enumerate()
        .map(|(i, d)| {
            let diff = ap_tail[offset + i] - esa[offset + i];
            if *d > 0.0 {
                diff / (0.015 * d)
            } else {
                0.0
            }
        })
        .collect();

    let wt1 = ema_series(&ci, AVERAGE);
    if wt1.len() < 4 {
        return None;
    }
    let wt2 = mean(&wt1[wt1.len() - 4..])?;
    Some((*wt1.last()?, wt2))
}

/// Schaff trend cycle (23/50 MACD, cycle 10), in [0, 100].
fn schaff_trend_cycle(closes: &[f64]) -> Option<f64> {
    const CYCLE: usize = 10;
    let line = aligned_diff(&ema_series(closes, 23), &ema_series(closes, 50));
    let first = smoothed_stochastic(&line, CYCLE);
    let second = smoothed_stochastic(&first, CYCLE);
    second.last().copied()
}

fn smoothed_stochastic(series: &[f64], cycle: usize) -> Vec<f64> {
    if cycle == 0 || series.len() < cycle {
        return Vec::new();
    }
    let mut out = Vec::with_capacity(series.len() - cycle + 1);
    let mut prev: Option<f64> = None;
    for i in cycle - 1..series.len() {
        let window = &series[i + 1 - cycle..=i];
        let lo = window.iter().copied().fold(f64::INFINITY, f64::min);
        let hi = window.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        let k = if hi - lo > 0.0 {
            (series[i] - lo) / (hi - lo) * 100.0
        } else {
            prev.unwrap_or(50.0)
        };
        let smoothed = match prev {
            Some(p) => p + 0.5 * (k - p),
            None => k,
        };
        out.push(smoothed);
        prev = Some(smoothed);
    }
    out
}

/// Current OBV against its value `lookback` bars earlier.
fn obv_slope(bars: &[Bar], lookback: usize) -> Option<SeriesTail> {
    if bars.len() < lookback + 2 {
        return None;
    }
    let mut obv = 0.0;
    let mut series = Vec::with_capacity(bars.len());
    series.push(obv);
    for w in bars.windows(2) {
        if w[1].close > w[0].close {
            obv += w[1].volume;
        } else if w[1].close < w[0].close {
            obv -= w[1].volume;
        }
        series.push(obv);
    }
    let last = *series.last()?;
    let prev = series[series.len() - 1 - lookback];
    Some(SeriesTail::new(last, prev))
}

fn chaikin_money_flow(bars: &[Bar], period: usize) -> Option<f64> {
    if period == 0 || bars.len() < period {
        return None;
    }
    let window = &bars[bars.len() - period..];
    let mut flow = 0.0;
    let mut volume = 0.0;
    for bar in window {
        let range = bar.high - bar.low;
        if range > 0.0 {
            let multiplier = ((bar.close - bar.low) - (bar.high - bar.close)) / range;
            flow += multiplier * bar.volume;
        }
        volume += bar.volume;
    }
    if volume > 0.0 {
        Some(flow / volume)
    } else {
        None
    }
}

/// `(upper, middle, lower)` bands over the last `period` closes.
fn bollinger(closes: &[f64], period: usize, width: f64) -> Option<(f64, f64, f64)> {
    if period == 0 || closes.len() < period {
        return None;
    }
    let window = &closes[closes.len() - period..];
    let middle = mean(window)?;
    let variance = window.iter().map(|c| (c - middle).powi(2)).sum::<f64>() / period as f64;
    let sd = variance.sqrt();
    Some((middle + width * sd, middle, middle - width * sd))
}

/// Wilder ATR for every bar once `period` true ranges are available.
pub fn atr_series(bars: &[Bar], period: usize) -> Vec<f64> {
    if period == 0 || bars.len() < period + 1 {
        return Vec::new();
    }
    let trs: Vec<f64> = bars.windows(2).map(|w| w[1].true_range(w[0].close)).collect();
    let p = period as f64;
    let mut atr = trs[..period].iter().sum::<f64>() / p;
    let mut out = vec![atr];
    for tr in &trs[period..] {
        atr = (atr * (p - 1.0) + tr) / p;
        out.push(atr);
    }
    out
}

/// Volume-weighted typical price over the whole window.
fn vwap(bars: &[Bar]) -> Option<f64> {
    let (pv, v) = bars.iter().fold((0.0, 0.0), |(pv, v), b| {
        let typical = (b.high + b.low + b.close) / 3.0;
        (pv + typical * b.volume, v + b.volume)
    });
    if v > 0.0 {
        Some(pv / v)
    } else {
        None
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
