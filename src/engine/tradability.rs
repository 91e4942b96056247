//! Liquidity gate: spread and depth estimates from 24h volume.

use crate::types::{Bar, TradabilitySnapshot, TradabilityState};

const MIN_SIZE_USD: f64 = 1_000.0;
const MAX_SIZE_USD: f64 = 1_000_000.0;

#[derive(Debug, Default, Clone)]
pub struct TradabilityAnalyzer;

impl TradabilityAnalyzer {
    pub fn new() -> Self {
        Self
    }

    /// Classify from the 24h USD volume, `None` when unknown.
    pub fn analyze(&self, volume_24h_usd: Option<f64>) -> TradabilitySnapshot {
        let volume = volume_24h_usd.filter(|v| v.is_finite() && *v >= 0.0);
        let spread_bps = estimate_spread_bps(volume);
        let size_at_10bps_usd = estimate_size_at_10bps(volume);
        TradabilitySnapshot {
            volume_24h_usd: volume,
            spread_bps,
            size_at_10bps_usd,
            state: classify(spread_bps, size_at_10bps_usd),
        }
    }
}

/// Sum of the last 24 bar volumes valued at `price`.
pub fn volume_24h_usd(bars: &[Bar], price: f64) -> Option<f64> {
    if bars.is_empty() || price <= 0.0 {
        return None;
    }
    let volume: f64 = bars[bars.len().saturating_sub(24)..]
        .iter()
        .map(|b| b.volume)
        .sum();
    Some(volume * price)
}

fn estimate_spread_bps(volume: Option<f64>) -> f64 {
    let Some(volume) = volume else {
        return 50.0;
    };
    let millions = volume / 1_000_000.0;
    if millions > 10.0 {
        2.0
    } else if millions > 1.0 {
        5.0
    } else if millions > 0.1 {
        15.0
    } else if millions > 0.01 {
        30.0
    } else {
        50.0
    }
}

/// Roughly 1% of daily volume can trade within 10 bps.
fn estimate_size_at_10bps(volume: Option<f64>) -> f64 {
    match volume {
        Some(v) => (v * 0.01).clamp(MIN_SIZE_USD, MAX_SIZE_USD),
        None => MIN_SIZE_USD,
    }
}

fn classify(spread_bps: f64, size_usd: f64) -> TradabilityState {
    if spread_bps > 30.0 || size_usd < 5_000.0 {
        TradabilityState::Illiquid
    } else if spread_bps < 5.0 && size_usd > 50_000.0 {
        TradabilityState::HighLiquidity
    } else {
        TradabilityState::Normal
    }
}
