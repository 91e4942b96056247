//! Regime classification from stored anchor bars.

use std::sync::Arc;

use setup_scanner::config::RegimeConfig;
use setup_scanner::data::memory::InMemoryBarStore;
use setup_scanner::engine::RegimeClassifier;
use setup_scanner::types::*;

use crate::mocks::HOUR_MS;

/// 25 hourly bars rising from 100 to 112 with a 3% true range at the close.
fn make_rally() -> Vec<Bar> {
    (0..25)
        .map(|i| {
            let close = 100.0 + i as f64 * 0.5;
            Bar {
                timestamp_ms: i as i64 * HOUR_MS,
                open: close - 0.5,
                high: close + 1.68,
                low: close - 1.68,
                close,
                volume: 1_000.0,
            }
        })
        .collect()
}

#[tokio::test]
async fn test_strong_rally_is_risk_on() {
    let store = Arc::new(InMemoryBarStore::new());
    store.insert_bars("BTC", Timeframe::H1, make_rally()).await;
    let classifier = RegimeClassifier::new(store, RegimeConfig::default());

    let snapshot = classifier.analyze_current_regime().await;
    assert_eq!(snapshot.regime, Regime::RiskOn);
    assert!(snapshot.confidence >= 0.8);
    assert!((snapshot.btc_change_24h - 12.0).abs() < 1e-9);
    assert!((snapshot.btc_volatility - 3.0).abs() < 0.01);
    assert_eq!(snapshot.btc_trend, Trend::Bullish);
}

#[tokio::test]
async fn test_regime_is_cached_until_cleared() {
    let store = Arc::new(InMemoryBarStore::new());
    let classifier = RegimeClassifier::new(store.clone(), RegimeConfig::default());

    // Nothing stored yet: low-confidence Choppy.
    let first = classifier.analyze_current_regime().await;
    assert_eq!(first.regime, Regime::Choppy);

    store.insert_bars("BTC", Timeframe::H1, make_rally()).await;
    let cached = classifier.analyze_current_regime().await;
    assert_eq!(cached.regime, Regime::Choppy);

    classifier.clear_cache().await;
    let fresh = classifier.analyze_current_regime().await;
    assert_eq!(fresh.regime, Regime::RiskOn);
}
