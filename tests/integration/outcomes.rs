//! Outcome replay feeding reliability and calibrated thresholds.

use std::sync::Arc;

use setup_scanner::backtest::{CalibrationService, OutcomeReplayer, ReliabilityIndex};
use setup_scanner::config::CalibrationConfig;
use setup_scanner::data::memory::InMemoryBarStore;
use setup_scanner::storage::{DiagnosticsLog, InMemoryDiagnosticsLog, InMemoryForecastLog};
use setup_scanner::types::*;

use crate::mocks::{make_snapshot, HOUR_MS};

fn exit_bar(timestamp_ms: i64, close: f64) -> Bar {
    Bar {
        timestamp_ms,
        open: close,
        high: close,
        low: close,
        close,
        volume: 1.0,
    }
}

#[tokio::test]
async fn test_pattern_reliability_from_mixed_outcomes() {
    let log = Arc::new(InMemoryDiagnosticsLog::new());
    let bars = Arc::new(InMemoryBarStore::new());

    // 30 occurrences of one pattern, each on its own symbol so the exit
    // comes from that symbol's bars: 20 finish +3%, 10 finish -2%.
    for i in 0..30 {
        let symbol = format!("P{i:02}");
        let snapshot = make_snapshot(&symbol, 0, 0.8, 100.0, Regime::RiskOn);
        log.save_snapshot(&snapshot).await.unwrap();
        let exit = if i < 20 { 103.0 } else { 98.0 };
        bars.insert_bars(&symbol, Timeframe::H1, vec![exit_bar(24 * HOUR_MS, exit)])
            .await;
    }

    let replayer = Arc::new(OutcomeReplayer::new(log, bars, 10));
    let index = ReliabilityIndex::new(replayer, 24.0);
    let key = pattern_key(
        Phase::Accumulation,
        Trend::Bullish,
        StructureLabel::HigherHigh,
        Some(Regime::RiskOn),
    );

    let reliability = index.reliability(&key, 10).await.unwrap();
    assert_eq!(reliability.samples, 30);
    assert!(reliability.score.unwrap() > 0.5);

    // A higher floor than the history holds withholds the score.
    let thin = index.reliability(&key, 31).await.unwrap();
    assert_eq!(thin.score, None);
    assert_eq!(thin.samples, 30);
}

/// Hourly SOL snapshots from `start_ms`; every exit bar closes at 100, so
/// the entry price sets the return. High scores won 5%, low scores lost 1%.
async fn seed_sol_history(log: &InMemoryDiagnosticsLog, bars: &InMemoryBarStore, start_ms: i64) {
    for i in 0..20 {
        let (pump, ret) = if i < 15 { (0.82, 5.0) } else { (0.62, -1.0) };
        let entry = 100.0 / (1.0 + ret / 100.0);
        let snapshot = make_snapshot("SOL", start_ms + i * HOUR_MS, pump, entry, Regime::RiskOn);
        log.save_snapshot(&snapshot).await.unwrap();
    }
    let exits: Vec<Bar> = (24..44)
        .map(|h| exit_bar(start_ms + h * HOUR_MS, 100.0))
        .collect();
    bars.insert_bars("SOL", Timeframe::H1, exits).await;
}

fn make_calibration(
    replayer: OutcomeReplayer,
    config: CalibrationConfig,
) -> CalibrationService {
    CalibrationService::new(
        Arc::new(replayer),
        Arc::new(InMemoryForecastLog::new()),
        config,
    )
}

#[tokio::test]
async fn test_effective_threshold_from_history() {
    let log = Arc::new(InMemoryDiagnosticsLog::new());
    let bars = Arc::new(InMemoryBarStore::new());
    seed_sol_history(&log, &bars, 0).await;

    let calibration = make_calibration(
        OutcomeReplayer::new(log, bars, 10),
        CalibrationConfig::default(),
    );

    // Twenty equal-width bins over [0.62, 0.82]: the winners fill the top
    // bin, whose lower edge is 0.62 + 19 * 0.01.
    let threshold = calibration
        .get_effective_threshold("SOL", Regime::RiskOn)
        .await;
    assert!((threshold - 0.81).abs() < 1e-9);

    // No history in this regime: the static regime default.
    let choppy = calibration
        .get_effective_threshold("SOL", Regime::Choppy)
        .await;
    assert!((choppy - 0.7).abs() < 1e-9);

    // Thresholds stay inside the clamp for every regime.
    for regime in Regime::ALL {
        let t = calibration.get_effective_threshold("XRP", *regime).await;
        assert!((0.6..=0.95).contains(&t));
    }
}

#[tokio::test]
async fn test_threshold_picks_up_history_after_cache_expiry() {
    let log = Arc::new(InMemoryDiagnosticsLog::new());
    let bars = Arc::new(InMemoryBarStore::new());
    let expiring = make_calibration(
        OutcomeReplayer::new(log.clone(), bars.clone(), 10),
        CalibrationConfig {
            threshold_cache_ttl_secs: 0,
            ..CalibrationConfig::default()
        },
    );
    let long_lived = make_calibration(
        OutcomeReplayer::new(log.clone(), bars.clone(), 10),
        CalibrationConfig::default(),
    );

    // Empty log: the RiskOn default.
    let before = expiring.get_effective_threshold("SOL", Regime::RiskOn).await;
    assert!((before - 0.65).abs() < 1e-9);
    let cached = long_lived.get_effective_threshold("SOL", Regime::RiskOn).await;
    assert!((cached - 0.65).abs() < 1e-9);

    seed_sol_history(&log, &bars, 0).await;

    // An expired entry is recomputed from the new history.
    let after = expiring.get_effective_threshold("SOL", Regime::RiskOn).await;
    assert!((after - 0.81).abs() < 1e-9);

    // A fresh entry holds until it lapses or the cache is cleared.
    let still = long_lived.get_effective_threshold("SOL", Regime::RiskOn).await;
    assert!((still - 0.65).abs() < 1e-9);
    long_lived.clear_cache();
    let cleared = long_lived.get_effective_threshold("SOL", Regime::RiskOn).await;
    assert!((cleared - 0.81).abs() < 1e-9);
}

#[tokio::test]
async fn test_threshold_uses_newest_history_past_fetch_limit() {
    let log = Arc::new(InMemoryDiagnosticsLog::new());
    let bars = Arc::new(InMemoryBarStore::new());

    // Older Panic rows alone exceed the fetch limit.
    for i in 0..60 {
        let snapshot = make_snapshot(&format!("OLD{i:02}"), i * HOUR_MS, 0.9, 100.0, Regime::Panic);
        log.save_snapshot(&snapshot).await.unwrap();
    }
    seed_sol_history(&log, &bars, 1_000 * HOUR_MS).await;

    let calibration = make_calibration(
        OutcomeReplayer::new(log, bars, 10).with_snapshot_limit(50),
        CalibrationConfig::default(),
    );
    let threshold = calibration
        .get_effective_threshold("SOL", Regime::RiskOn)
        .await;
    assert!((threshold - 0.81).abs() < 1e-9);
}
