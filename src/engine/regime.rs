//! Macro regime classification.
//!
//! Reads the anchor asset's hourly and daily bars plus the alt-market
//! and stablecoin-dominance proxies, derives price change and volatility
//! metrics, and runs a first-match rule cascade. The result is cached
//! for a short TTL; any data problem degrades to a low-confidence
//! Choppy regime instead of an error.

use chrono::Utc;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::cache::TtlCache;
use crate::config::RegimeConfig;
use crate::data::BarStore;
use crate::types::{Bar, Regime, RegimeSnapshot, Timeframe, Trend};

const HOURLY_BARS: usize = 25;
const DAILY_BARS: usize = 30;
const ALT_WINDOW_DAYS: usize = 7;
const INSUFFICIENT_DATA: &str = "insufficient data";

/// Inputs of the rule cascade, all in percent.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct RegimeMetrics {
    pub change_1h: f64,
    pub change_4h: f64,
    pub change_24h: f64,
    /// Mean true range as % of the last close.
    pub volatility: f64,
    pub alt_performance: Option<f64>,
    pub usdt_dominance: Option<f64>,
}

impl RegimeMetrics {
    /// Blend of the short and long changes, thresholded at ±2.
    pub fn trend(&self) -> Trend {
        let blended = 0.2 * self.change_1h + 0.3 * self.change_4h + 0.5 * self.change_24h;
        if blended > 2.0 {
            Trend::Bullish
        } else if blended < -2.0 {
            Trend::Bearish
        } else {
            Trend::Neutral
        }
    }
}

/// First-match rule cascade. Returns the regime and its confidence.
pub fn classify(m: &RegimeMetrics) -> (Regime, f64) {
    let c24 = m.change_24h;
    let vol = m.volatility;
    let alt = m.alt_performance;

    if vol > 10.0 && c24 < -10.0 {
        (Regime::Panic, 0.9)
    } else if c24 < -5.0 && vol > 5.0 {
        (Regime::RiskOff, 0.85)
    } else if c24 > 3.0 && vol < 4.0 {
        (Regime::RiskOn, 0.8)
    } else if alt.is_some_and(|a| a > 5.0) && c24 >= 0.0 {
        (Regime::AltSeason, 0.75)
    } else if c24 > 2.0 && alt.is_some_and(|a| a < -2.0) {
        (Regime::BtcDominance, 0.75)
    } else if vol > 5.0 && c24.abs() < 3.0 {
        (Regime::Choppy, 0.7)
    } else if c24 > 0.0 {
        (Regime::RiskOn, 0.6)
    } else {
        (Regime::RiskOff, 0.6)
    }
}

pub struct RegimeClassifier {
    bars: Arc<dyn BarStore>,
    config: RegimeConfig,
    cache: Mutex<TtlCache<(), RegimeSnapshot>>,
}

impl RegimeClassifier {
    pub fn new(bars: Arc<dyn BarStore>, config: RegimeConfig) -> Self {
        let cache = TtlCache::with_ttl_secs(config.cache_ttl_secs);
        Self {
            bars,
            config,
            cache: Mutex::new(cache),
        }
    }

    /// Current regime. Never fails; see the module docs.
    pub async fn analyze_current_regime(&self) -> RegimeSnapshot {
        let mut cache = self.cache.lock().await;
        if let Some(hit) = cache.get(&()) {
            debug!(regime = %hit.regime, "Regime cache hit");
            return hit;
        }

        let snapshot = match self.compute().await {
            Ok(Some(snapshot)) => snapshot,
            Ok(None) => fallback_snapshot(INSUFFICIENT_DATA),
            Err(e) => {
                warn!(error = %e, "Regime inputs unavailable, using safe default");
                fallback_snapshot(INSUFFICIENT_DATA)
            }
        };

        info!(
            regime = %snapshot.regime,
            confidence = snapshot.confidence,
            btc_24h = snapshot.btc_change_24h,
            volatility = snapshot.btc_volatility,
            "Regime computed"
        );
        cache.insert((), snapshot.clone());
        snapshot
    }

    pub async fn clear_cache(&self) {
        self.cache.lock().await.clear();
    }

    async fn compute(&self) -> anyhow::Result<Option<RegimeSnapshot>> {
        let anchor = &self.config.anchor_symbol;
        let hourly = self.bars.last_n(anchor, Timeframe::H1, HOURLY_BARS).await?;
        let Some(metrics_base) = hourly_metrics(&hourly) else {
            return Ok(None);
        };
        let daily = self.bars.last_n(anchor, Timeframe::D1, DAILY_BARS).await?;

        let alt_performance = match window_change(&daily, ALT_WINDOW_DAYS) {
            Some(anchor_7d) => self
                .alt_change()
                .await
                .map(|alt_7d| alt_7d - anchor_7d),
            None => None,
        };

        let usdt_dominance = match &self.config.stable_dominance_symbol {
            Some(symbol) => match self.bars.last_n(symbol, Timeframe::D1, 1).await {
                Ok(bars) => bars.last().map(|b| b.close),
                Err(e) => {
                    debug!(symbol = %symbol, error = %e, "Dominance proxy unavailable");
                    None
                }
            },
            None => None,
        };

        let metrics = RegimeMetrics {
            alt_performance,
            usdt_dominance,
            ..metrics_base
        };
        Ok(Some(snapshot_from(&metrics)))
    }

    /// 7-day change of the first alt proxy that has data.
    async fn alt_change(&self) -> Option<f64> {
        for proxy in &self.config.alt_proxies {
            match self.bars.last_n(proxy, Timeframe::D1, ALT_WINDOW_DAYS).await {
                Ok(bars) => {
                    if let Some(change) = window_change(&bars, ALT_WINDOW_DAYS) {
                        return Some(change);
                    }
                }
                Err(e) => debug!(proxy = %proxy, error = %e, "Alt proxy unavailable"),
            }
        }
        None
    }
}

/// Change of the 1h/4h/24h windows and the ATR-based volatility.
fn hourly_metrics(bars: &[Bar]) -> Option<RegimeMetrics> {
    if bars.len() < 2 {
        return None;
    }
    let last_close = bars.last()?.close;
    if last_close <= 0.0 {
        return None;
    }

    let true_ranges: Vec<f64> = bars.windows(2).map(|w| w[1].true_range(w[0].close)).collect();
    let atr = true_ranges.iter().sum::<f64>() / true_ranges.len() as f64;

    Some(RegimeMetrics {
        change_1h: window_change(bars, 2)?,
        change_4h: window_change(bars, 5)?,
        change_24h: window_change(bars, bars.len())?,
        volatility: atr / last_close * 100.0,
        alt_performance: None,
        usdt_dominance: None,
    })
}

/// Percent change across the last `n` closes (or all, if fewer).
fn window_change(bars: &[Bar], n: usize) -> Option<f64> {
    if bars.len() < 2 {
        return None;
    }
    let window = &bars[bars.len().saturating_sub(n)..];
    let first = window.first()?.close;
    let last = window.last()?.close;
    if first <= 0.0 {
        return None;
    }
    Some((last - first) / first * 100.0)
}

fn snapshot_from(metrics: &RegimeMetrics) -> RegimeSnapshot {
    let (regime, confidence) = classify(metrics);
    RegimeSnapshot {
        regime,
        confidence,
        description: describe(regime, metrics),
        btc_change_1h: metrics.change_1h,
        btc_change_4h: metrics.change_4h,
        btc_change_24h: metrics.change_24h,
        btc_volatility: metrics.volatility,
        btc_trend: metrics.trend(),
        alt_performance_vs_btc: metrics.alt_performance,
        usdt_dominance: metrics.usdt_dominance,
        computed_at: Utc::now(),
    }
}

/// Regime text with the anchor and alt metrics that drove it.
fn describe(regime: Regime, metrics: &RegimeMetrics) -> String {
    let change = metrics.change_24h;
    let vol = metrics.volatility;
    let alt = metrics.alt_performance.unwrap_or(0.0);
    match regime {
        Regime::RiskOn => format!("Risk-on: anchor {change:+.1}% in 24h, volatility {vol:.1}%"),
        Regime::RiskOff => format!("Risk-off: anchor {change:+.1}% in 24h, volatility {vol:.1}%"),
        Regime::Panic => format!("Panic: anchor {change:+.1}% in 24h on extreme volatility {vol:.1}%"),
        Regime::Choppy => format!("Choppy: volatility {vol:.1}% without a clear direction"),
        Regime::AltSeason => format!("Alt season: alts leading the anchor by {alt:.1}%"),
        Regime::BtcDominance => {
            format!("Anchor dominance: alts lagging the anchor by {:.1}%", alt.abs())
        }
    }
}

fn fallback_snapshot(reason: &str) -> RegimeSnapshot {
    RegimeSnapshot {
        regime: Regime::Choppy,
        confidence: 0.5,
        description: reason.to_string(),
        btc_change_1h: 0.0,
        btc_change_4h: 0.0,
        btc_change_24h: 0.0,
        btc_volatility: 0.0,
        btc_trend: Trend::Neutral,
        alt_performance_vs_btc: None,
        usdt_dominance: None,
        computed_at: Utc::now(),
    }
}
