//! Setup scanner daemon.
//!
//! Entry point. Loads configuration, initialises structured logging,
//! opens the SQLite stores, restores tuned group weights, and runs the
//! periodic universe scan with graceful shutdown. Each cycle publishes
//! the scan on the JSON feed, forecasts the anchor and every candidate,
//! and resolves forecasts whose horizon has passed.

use anyhow::Result;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use setup_scanner::backtest::{CalibrationService, OutcomeReplayer};
use setup_scanner::config::AppConfig;
use setup_scanner::dashboard::{self, FeedState};
use setup_scanner::data::baseline::DriftPredictor;
use setup_scanner::data::features::StandardFeatures;
use setup_scanner::data::indicators::StandardIndicators;
use setup_scanner::data::sqlite::SqliteBarStore;
use setup_scanner::data::BarStore;
use setup_scanner::engine::{
    ForecastService, RegimeClassifier, ScanComponents, ScanReport, ScanRequest, ScannerOrchestrator,
};
use setup_scanner::scoring::weights::apply_recommendations;
use setup_scanner::scoring::ScoringEngine;
use setup_scanner::storage::{
    self, sqlite::open_pool, DiagnosticsLog, ForecastLog, SqliteDiagnosticsLog, SqliteForecastLog,
};

/// Scan cycles between weight refreshes.
const WEIGHT_REFRESH_CYCLES: u64 = 96;

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (non-fatal if missing)
    let _ = dotenv::dotenv();

    let config_path = std::env::var("SCANNER_CONFIG").unwrap_or_else(|_| "config.toml".into());
    let cfg = AppConfig::load(&config_path)?;

    init_logging();

    info!(
        symbols = cfg.scanner.symbols.len(),
        timeframes = ?cfg.scanner.timeframes,
        interval_secs = cfg.scanner.scan_interval_secs,
        database = %cfg.storage.database_path,
        "Setup scanner starting up"
    );

    // -- Stores ----------------------------------------------------------

    let pool = open_pool(&cfg.storage.database_path).await?;
    let bars: Arc<dyn BarStore> = Arc::new(SqliteBarStore::from_pool(pool.clone()).await?);
    let diagnostics_log: Arc<dyn DiagnosticsLog> =
        Arc::new(SqliteDiagnosticsLog::from_pool(pool.clone()).await?);
    let forecast_log: Arc<dyn ForecastLog> = Arc::new(SqliteForecastLog::from_pool(pool).await?);

    // -- Scoring weights -------------------------------------------------

    let weights = match storage::load_weights(&cfg.storage.weights_path)? {
        Some(w) => {
            info!(path = %cfg.storage.weights_path, "Resumed tuned weights");
            w
        }
        None => cfg.scoring.normalized(),
    };
    let scoring = Arc::new(ScoringEngine::new(weights));

    // -- Components ------------------------------------------------------

    let replayer = Arc::new(OutcomeReplayer::new(
        diagnostics_log.clone(),
        bars.clone(),
        cfg.calibration.min_group_samples,
    ));
    let calibration = Arc::new(CalibrationService::new(
        replayer,
        forecast_log.clone(),
        cfg.calibration.clone(),
    ));
    let regime = Arc::new(RegimeClassifier::new(bars.clone(), cfg.regime.clone()));

    let scanner = ScannerOrchestrator::new(
        ScanComponents {
            bars: bars.clone(),
            indicators: Arc::new(StandardIndicators::new()),
            features: Arc::new(StandardFeatures::new()),
            derivatives: None,
            diagnostics_log,
            scoring: scoring.clone(),
            regime,
            calibration: calibration.clone(),
        },
        &cfg.scanner,
    );
    let forecasts = ForecastService::new(
        bars,
        Arc::new(DriftPredictor::new()),
        forecast_log,
        calibration.clone(),
        &cfg.forecast,
    );

    let feed = Arc::new(FeedState::new(scoring.weights()));
    if cfg.dashboard.enabled {
        dashboard::spawn_dashboard(feed.clone(), cfg.dashboard.port);
    }

    // -- Main loop -------------------------------------------------------

    let request = ScanRequest::from_config(&cfg.scanner);
    let mut interval = tokio::time::interval(Duration::from_secs(cfg.scanner.scan_interval_secs.max(1)));
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    info!(
        interval_secs = cfg.scanner.scan_interval_secs,
        "Entering scan loop. Press Ctrl+C to stop."
    );

    let mut cycle: u64 = 0;
    loop {
        tokio::select! {
            _ = interval.tick() => {
                cycle += 1;
                let report = scanner.scan_universe(&request).await;
                log_scan_report(cycle, &report);
                feed.publish(&report).await;

                let mut forecast_symbols = vec![cfg.regime.anchor_symbol.clone()];
                forecast_symbols.extend(report.candidates.iter().map(|c| c.symbol.clone()));
                let issued = forecasts
                    .forecast_symbols(&forecast_symbols, cfg.forecast.timeframe, cfg.forecast.horizon_bars)
                    .await;
                debug!(issued, "Forecasts issued");

                if let Err(e) = forecasts.resolve_pending(Utc::now().timestamp_millis()).await {
                    warn!(error = %e, "Forecast resolution failed");
                }

                if cycle % WEIGHT_REFRESH_CYCLES == 0 {
                    refresh_weights(&calibration, &scoring, &feed, &cfg.storage.weights_path).await;
                }
            }
            _ = &mut shutdown => {
                info!("Shutdown signal received.");
                break;
            }
        }
    }

    if let Err(e) = storage::save_weights(&scoring.weights(), &cfg.storage.weights_path) {
        error!(error = %e, "Failed to save weights");
    }
    info!(cycles = cycle, "Setup scanner shut down cleanly.");

    Ok(())
}

/// Re-tune group weights from logged outcomes and persist them.
async fn refresh_weights(
    calibration: &CalibrationService,
    scoring: &ScoringEngine,
    feed: &FeedState,
    path: &str,
) {
    let current = scoring.weights();
    let recommendations = match calibration.recommend_weights(None, &current).await {
        Ok(r) => r,
        Err(e) => {
            warn!(error = %e, "Weight recommendation failed");
            return;
        }
    };
    if recommendations.is_empty() {
        return;
    }

    for rec in &recommendations {
        info!(
            group = %rec.group.as_str(),
            current = rec.current,
            recommended = rec.recommended,
            correlation = rec.correlation,
            samples = rec.samples,
            "Weight adjusted"
        );
    }
    let updated = apply_recommendations(&current, &recommendations);
    scoring.set_weights(updated);
    feed.set_weights(updated).await;
    if let Err(e) = storage::save_weights(&updated, path) {
        error!(error = %e, "Failed to save weights");
    }
}

/// Log a human-readable scan summary.
fn log_scan_report(cycle: u64, report: &ScanReport) {
    info!(
        cycle,
        scan_id = %report.scan_id,
        regime = %report.regime.regime,
        scanned = report.scanned,
        failed = report.failed,
        skipped = report.skipped,
        filtered = report.filtered,
        candidates = report.candidates.len(),
        duration_ms = (report.finished_at - report.started_at).num_milliseconds(),
        "Scan complete"
    );
    for candidate in &report.candidates {
        info!(%candidate, "Candidate");
    }
}

/// Initialise the `tracing` subscriber.
fn init_logging() {
    use tracing_subscriber::{fmt, EnvFilter};

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("setup_scanner=info"));

    let json_logging = std::env::var("SCANNER_LOG_JSON").is_ok();

    if json_logging {
        fmt()
            .json()
            .with_env_filter(env_filter)
            .with_target(true)
            .with_thread_ids(true)
            .init();
    } else {
        fmt()
            .with_env_filter(env_filter)
            .with_target(true)
            .init();
    }
}
