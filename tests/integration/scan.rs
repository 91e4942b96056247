//! End-to-end universe scans over mock collaborators.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use std::sync::Arc;

use setup_scanner::config::ScannerConfig;
use setup_scanner::data::{BarStore, DerivativesProvider};
use setup_scanner::engine::ScanRequest;
use setup_scanner::storage::{DiagnosticsLog, InMemoryDiagnosticsLog, SnapshotQuery};
use setup_scanner::types::*;

use crate::mocks::{
    make_bars, make_scanner, make_scanner_with, FlakyBarStore, GaugedBarStore, MockDerivatives,
    HOUR_MS,
};

const SYMBOLS: [&str; 5] = ["A", "B", "C", "D", "E"];

fn make_request(limit: usize) -> ScanRequest {
    ScanRequest {
        symbols: SYMBOLS.iter().map(|s| s.to_string()).collect(),
        timeframes: vec![Timeframe::H4, Timeframe::D1],
        min_score: 0.0,
        max_risk: 0.7,
        limit,
        filter_illiquid: true,
        user_profile: UserProfile::Balanced,
    }
}

async fn make_store() -> Arc<FlakyBarStore> {
    let store = Arc::new(FlakyBarStore::new());
    for symbol in SYMBOLS {
        store
            .insert_bars(symbol, Timeframe::H4, make_bars(60, Timeframe::H4, 0, 100.0))
            .await;
        store
            .insert_bars(symbol, Timeframe::D1, make_bars(30, Timeframe::D1, 0, 100.0))
            .await;
    }
    store
}

/// Negative funding and rising OI everywhere; only E also shows buying CVD.
fn make_derivatives() -> Arc<dyn DerivativesProvider> {
    let mut mock = MockDerivatives::new();
    mock.expect_snapshot().returning(|symbol| {
        Ok(DerivativesSnapshot {
            funding_rate: Some(-0.002),
            oi_change_pct: Some(6.0),
            cvd: (symbol == "E").then_some(1.0),
        })
    });
    Arc::new(mock)
}

#[tokio::test]
async fn test_failing_symbol_does_not_abort_scan() {
    let store = make_store().await;
    store.fail_for("C");
    let log = Arc::new(InMemoryDiagnosticsLog::new());
    let scanner = make_scanner(store, log.clone(), Some(make_derivatives()));

    let report = scanner.scan_universe(&make_request(10)).await;

    assert_eq!(report.scanned, 5);
    assert_eq!(report.failed, 1);
    assert_eq!(report.skipped, 0);
    let order: Vec<&str> = report.candidates.iter().map(|c| c.symbol.as_str()).collect();
    assert_eq!(order, vec!["E", "A", "B", "D"]);

    // No anchor bars: the regime falls back to Choppy and its static threshold.
    assert_eq!(report.regime.regime, Regime::Choppy);
    for c in &report.candidates {
        assert_eq!(c.regime, Regime::Choppy);
        assert!((c.effective_threshold - 0.7).abs() < 1e-9);
        assert!((c.avg_risk_score - 0.225).abs() < 1e-9);
        assert_eq!(c.per_timeframe.len(), 2);
        assert_eq!(c.phase, Phase::ExpansionUp);
        assert_eq!(c.tradability.state, TradabilityState::HighLiquidity);
        assert_eq!(c.reliability_score, None);
    }
    assert!((report.candidates[0].avg_pump_score - 0.81).abs() < 1e-9);
    assert!((report.candidates[1].avg_pump_score - 0.735).abs() < 1e-9);

    // One snapshot per symbol and timeframe that produced a candidate.
    assert_eq!(log.len().await, 8);
    let c_rows = log
        .get_snapshots(&SnapshotQuery::new().symbol("C"))
        .await
        .unwrap();
    assert!(c_rows.is_empty());
}

#[tokio::test]
async fn test_limit_and_risk_filters() {
    let store = make_store().await;
    let log = Arc::new(InMemoryDiagnosticsLog::new());
    let scanner = make_scanner(store, log, Some(make_derivatives()));

    let report = scanner.scan_universe(&make_request(2)).await;
    let order: Vec<&str> = report.candidates.iter().map(|c| c.symbol.as_str()).collect();
    assert_eq!(order, vec!["E", "A"]);

    let strict = ScanRequest {
        max_risk: 0.2,
        ..make_request(10)
    };
    let report = scanner.scan_universe(&strict).await;
    assert!(report.candidates.is_empty());
    assert_eq!(report.filtered, 5);
}

#[tokio::test]
async fn test_min_score_above_threshold_filters() {
    let store = make_store().await;
    let log = Arc::new(InMemoryDiagnosticsLog::new());
    let scanner = make_scanner(store, log, Some(make_derivatives()));

    let request = ScanRequest {
        min_score: 0.8,
        ..make_request(10)
    };
    let report = scanner.scan_universe(&request).await;
    assert_eq!(report.candidates.len(), 1);
    assert_eq!(report.candidates[0].symbol, "E");
}

#[tokio::test]
async fn test_missing_derivatives_provider() {
    let store = make_store().await;
    let log = Arc::new(InMemoryDiagnosticsLog::new());
    let scanner = make_scanner(store, log, None);

    // Without derivatives the pump score is 0.06 + 0.2 + 0.1 + 0.15 + 0.1 = 0.61,
    // under the Choppy threshold.
    let report = scanner.scan_universe(&make_request(10)).await;
    assert!(report.candidates.is_empty());
    assert_eq!(report.failed, 0);
    assert_eq!(report.filtered, 5);
}

#[tokio::test]
async fn test_symbol_without_bars_is_skipped() {
    let store = make_store().await;
    let log = Arc::new(InMemoryDiagnosticsLog::new());
    let scanner = make_scanner(store, log, Some(make_derivatives()));

    let mut request = make_request(10);
    request.symbols.push("EMPTY".to_string());
    let report = scanner.scan_universe(&request).await;
    assert_eq!(report.scanned, 6);
    assert_eq!(report.skipped, 1);
    assert_eq!(report.candidates.len(), 5);
}

/// Diagnostics log that rejects every write and read.
struct BrokenLog;

#[async_trait]
impl DiagnosticsLog for BrokenLog {
    async fn save_snapshot(&self, _snapshot: &DiagnosticsSnapshot) -> Result<i64> {
        Err(anyhow!("disk full"))
    }

    async fn get_snapshots(&self, _query: &SnapshotQuery) -> Result<Vec<DiagnosticsSnapshot>> {
        Err(anyhow!("disk full"))
    }
}

#[tokio::test]
async fn test_log_failure_keeps_candidates() {
    let store: Arc<dyn BarStore> = make_store().await;
    let scanner = make_scanner(store, Arc::new(BrokenLog), Some(make_derivatives()));

    let report = scanner.scan_universe(&make_request(10)).await;
    assert_eq!(report.failed, 0);
    assert_eq!(report.candidates.len(), 5);
    assert!(report
        .candidates
        .iter()
        .all(|c| (c.effective_threshold - 0.7).abs() < 1e-9 && c.reliability_samples == 0));
}

#[tokio::test]
async fn test_worker_pool_caps_concurrent_symbols() {
    let store = Arc::new(GaugedBarStore::new(Timeframe::H4));
    let symbols = ["A", "B", "C", "D", "E", "F"];
    for symbol in symbols {
        store
            .insert_bars(symbol, Timeframe::H4, make_bars(60, Timeframe::H4, 0, 100.0))
            .await;
    }
    let config = ScannerConfig {
        max_concurrency: 2,
        ..ScannerConfig::default()
    };
    // The log rejects reads, so the only H4 reads are the per-symbol fetches.
    let scanner = make_scanner_with(
        store.clone(),
        Arc::new(BrokenLog),
        Some(make_derivatives()),
        &config,
    );

    let request = ScanRequest {
        symbols: symbols.iter().map(|s| s.to_string()).collect(),
        timeframes: vec![Timeframe::H4],
        ..make_request(10)
    };
    let report = scanner.scan_universe(&request).await;

    assert_eq!(report.scanned, 6);
    assert_eq!(report.failed, 0);
    assert_eq!(report.skipped, 0);
    assert_eq!(store.peak(), 2);
}

#[tokio::test]
async fn test_snapshot_timestamps_follow_last_bar() {
    let store = make_store().await;
    let log = Arc::new(InMemoryDiagnosticsLog::new());
    let scanner = make_scanner(store, log.clone(), Some(make_derivatives()));
    scanner.scan_universe(&make_request(10)).await;

    let rows = log
        .get_snapshots(
            &SnapshotQuery::new()
                .symbol("A")
                .timeframe(Timeframe::H4),
        )
        .await
        .unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].timestamp_ms, 59 * 4 * HOUR_MS);
    assert_eq!(rows[0].metrics.regime, Some(Regime::Choppy));
    assert!(rows[0].metrics.group_scores.contains_key("trend"));
}
