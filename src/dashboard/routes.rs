//! Scan feed route handlers.
//!
//! All endpoints return JSON. State is shared via `Arc<FeedState>`.

use axum::{extract::State, http::StatusCode, Json};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::engine::{ScanReport, ScanSummary};
use crate::scoring::GroupWeights;
use crate::types::{RegimeSnapshot, SetupCandidate};

/// Scan summaries kept for `/api/scans`.
pub const SCAN_HISTORY: usize = 100;

// ---------------------------------------------------------------------------
// Shared state
// ---------------------------------------------------------------------------

/// Latest scan output, written by the scan loop and read by the handlers.
pub struct FeedState {
    pub regime: RwLock<Option<RegimeSnapshot>>,
    pub candidates: RwLock<Vec<SetupCandidate>>,
    pub scans: RwLock<VecDeque<ScanSummary>>,
    pub weights: RwLock<GroupWeights>,
    pub started_at: DateTime<Utc>,
}

impl FeedState {
    pub fn new(weights: GroupWeights) -> Self {
        Self {
            regime: RwLock::new(None),
            candidates: RwLock::new(Vec::new()),
            scans: RwLock::new(VecDeque::with_capacity(SCAN_HISTORY)),
            weights: RwLock::new(weights),
            started_at: Utc::now(),
        }
    }

    /// Publish a finished scan.
    pub async fn publish(&self, report: &ScanReport) {
        *self.regime.write().await = Some(report.regime.clone());
        *self.candidates.write().await = report.candidates.clone();

        let mut scans = self.scans.write().await;
        if scans.len() >= SCAN_HISTORY {
            scans.pop_front();
        }
        scans.push_back(report.summary());
    }

    pub async fn set_weights(&self, weights: GroupWeights) {
        *self.weights.write().await = weights;
    }
}

pub type AppState = Arc<FeedState>;

// ---------------------------------------------------------------------------
// Response types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub uptime_secs: i64,
    pub scans: usize,
}

// ---------------------------------------------------------------------------
// Route handlers
// ---------------------------------------------------------------------------

/// GET /health
pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        uptime_secs: (Utc::now() - state.started_at).num_seconds(),
        scans: state.scans.read().await.len(),
    })
}

/// GET /api/regime
///
/// 404 until the first scan has finished.
pub async fn get_regime(
    State(state): State<AppState>,
) -> Result<Json<RegimeSnapshot>, StatusCode> {
    state
        .regime
        .read()
        .await
        .clone()
        .map(Json)
        .ok_or(StatusCode::NOT_FOUND)
}

/// GET /api/candidates
pub async fn get_candidates(State(state): State<AppState>) -> Json<Vec<SetupCandidate>> {
    Json(state.candidates.read().await.clone())
}

/// GET /api/scans
pub async fn get_scans(State(state): State<AppState>) -> Json<Vec<ScanSummary>> {
    Json(state.scans.read().await.iter().cloned().collect())
}

/// GET /api/weights
pub async fn get_weights(State(state): State<AppState>) -> Json<GroupWeights> {
    Json(*state.weights.read().await)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Regime, Trend};
    use uuid::Uuid;

    fn make_report(symbols: &[&str]) -> ScanReport {
        let now = Utc::now();
        ScanReport {
            scan_id: Uuid::new_v4(),
            started_at: now,
            finished_at: now,
            regime: RegimeSnapshot {
                regime: Regime::Choppy,
                confidence: 0.5,
                description: Regime::Choppy.description().to_string(),
                btc_change_1h: 0.0,
                btc_change_4h: 0.0,
                btc_change_24h: 0.0,
                btc_volatility: 0.0,
                btc_trend: Trend::Neutral,
                alt_performance_vs_btc: None,
                usdt_dominance: None,
                computed_at: now,
            },
            candidates: Vec::new(),
            scanned: symbols.len(),
            failed: 0,
            skipped: 0,
            filtered: symbols.len(),
        }
    }

    #[tokio::test]
    async fn test_publish_updates_feed() {
        let state = FeedState::new(GroupWeights::default());
        state.publish(&make_report(&["BTC", "ETH"])).await;
        assert_eq!(state.regime.read().await.as_ref().unwrap().regime, Regime::Choppy);
        let scans = state.scans.read().await;
        assert_eq!(scans.len(), 1);
        assert_eq!(scans[0].scanned, 2);
    }

    #[tokio::test]
    async fn test_scan_history_is_bounded() {
        let state = FeedState::new(GroupWeights::default());
        let mut first_id = None;
        for _ in 0..(SCAN_HISTORY + 5) {
            let report = make_report(&["BTC"]);
            first_id.get_or_insert(report.scan_id);
            state.publish(&report).await;
        }
        let scans = state.scans.read().await;
        assert_eq!(scans.len(), SCAN_HISTORY);
        assert!(scans.iter().all(|s| Some(s.scan_id) != first_id));
    }

    #[tokio::test]
    async fn test_get_regime_before_first_scan() {
        let state = Arc::new(FeedState::new(GroupWeights::default()));
        assert_eq!(get_regime(State(state)).await.unwrap_err(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_set_weights() {
        let state = Arc::new(FeedState::new(GroupWeights::default()));
        let mut weights = GroupWeights::default();
        weights.trend = 0.4;
        state.set_weights(weights).await;
        let Json(got) = get_weights(State(state)).await;
        assert_eq!(got, weights);
    }
}
