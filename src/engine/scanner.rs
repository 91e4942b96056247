//! Universe scanner.
//!
//! Runs the per-symbol diagnostics pipeline for every requested symbol
//! under a fixed-size worker pool, logs a snapshot per timeframe, and
//! returns the candidates that clear the calibrated pump threshold and
//! the tradability gate, best first.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::backtest::CalibrationService;
use crate::config::ScannerConfig;
use crate::data::{BarStore, DerivativesProvider, FeatureProvider, FeatureSet, IndicatorProvider};
use crate::engine::diagnostics::DiagnosticsAnalyzer;
use crate::engine::regime::RegimeClassifier;
use crate::engine::tradability::{volume_24h_usd, TradabilityAnalyzer};
use crate::scoring::{timeframe_weight, ScoringEngine, TimeframeScore};
use crate::storage::DiagnosticsLog;
use crate::types::{
    pattern_key, Bar, DerivativesSnapshot, DiagnosticsSnapshot, Phase, RegimeSnapshot,
    SetupCandidate, SnapshotMetrics, Timeframe, TimeframeBreakdown, TradabilityState, UserProfile,
};

/// Spread above which an illiquid symbol is dropped for every profile.
///
/// The volume-based spread estimate tops out at exactly this value, so the
/// cutoff only bites for spreads supplied from outside that ladder.
const MAX_ILLIQUID_SPREAD_BPS: f64 = 50.0;
const STRATEGY_MODE: &str = "scan";

// ---------------------------------------------------------------------------
// Request / report
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanRequest {
    pub symbols: Vec<String>,
    pub timeframes: Vec<Timeframe>,
    pub min_score: f64,
    pub max_risk: f64,
    pub limit: usize,
    pub filter_illiquid: bool,
    pub user_profile: UserProfile,
}

impl ScanRequest {
    pub fn from_config(config: &ScannerConfig) -> Self {
        Self {
            symbols: config.symbols.clone(),
            timeframes: config.timeframes.clone(),
            min_score: config.min_score,
            max_risk: config.max_risk,
            limit: config.limit,
            filter_illiquid: config.filter_illiquid,
            user_profile: config.user_profile,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanReport {
    pub scan_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub regime: RegimeSnapshot,
    pub candidates: Vec<SetupCandidate>,
    pub scanned: usize,
    /// Pipelines that errored or panicked.
    pub failed: usize,
    /// Symbols without a usable timeframe.
    pub skipped: usize,
    /// Candidates removed by the score, risk and liquidity filters.
    pub filtered: usize,
}

/// Compact view of a report for the feed's history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanSummary {
    pub scan_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub duration_ms: i64,
    pub regime: String,
    pub scanned: usize,
    pub failed: usize,
    pub skipped: usize,
    pub filtered: usize,
    pub candidates: usize,
    pub top_symbols: Vec<String>,
}

impl ScanReport {
    pub fn summary(&self) -> ScanSummary {
        ScanSummary {
            scan_id: self.scan_id,
            started_at: self.started_at,
            duration_ms: (self.finished_at - self.started_at).num_milliseconds(),
            regime: self.regime.regime.to_string(),
            scanned: self.scanned,
            failed: self.failed,
            skipped: self.skipped,
            filtered: self.filtered,
            candidates: self.candidates.len(),
            top_symbols: self.candidates.iter().take(3).map(|c| c.symbol.clone()).collect(),
        }
    }
}

// ---------------------------------------------------------------------------
// Composition
// ---------------------------------------------------------------------------

/// Collaborators of the scan pipeline.
#[derive(Clone)]
pub struct ScanComponents {
    pub bars: Arc<dyn BarStore>,
    pub indicators: Arc<dyn IndicatorProvider>,
    pub features: Arc<dyn FeatureProvider>,
    pub derivatives: Option<Arc<dyn DerivativesProvider>>,
    pub diagnostics_log: Arc<dyn DiagnosticsLog>,
    pub scoring: Arc<ScoringEngine>,
    pub regime: Arc<RegimeClassifier>,
    pub calibration: Arc<CalibrationService>,
}

struct Pipeline {
    components: ScanComponents,
    analyzer: DiagnosticsAnalyzer,
    tradability: TradabilityAnalyzer,
    bars_limit: usize,
    target: Timeframe,
}

pub struct ScannerOrchestrator {
    pipeline: Arc<Pipeline>,
    max_concurrency: usize,
}

/// Per-timeframe result inside one symbol's pipeline.
struct TimeframeEval {
    timeframe: Timeframe,
    bars: Vec<Bar>,
    snapshot: DiagnosticsSnapshot,
    score: TimeframeScore,
}

impl ScannerOrchestrator {
    pub fn new(components: ScanComponents, config: &ScannerConfig) -> Self {
        Self {
            pipeline: Arc::new(Pipeline {
                components,
                analyzer: DiagnosticsAnalyzer::new(),
                tradability: TradabilityAnalyzer::new(),
                bars_limit: config.bars_limit.max(1),
                target: config.target_timeframe,
            }),
            max_concurrency: config.max_concurrency.max(1),
        }
    }

    pub async fn scan_universe(&self, request: &ScanRequest) -> ScanReport {
        let started_at = Utc::now();
        let regime = self.pipeline.components.regime.analyze_current_regime().await;
        info!(
            symbols = request.symbols.len(),
            timeframes = request.timeframes.len(),
            regime = %regime.regime,
            "Starting universe scan"
        );

        let semaphore = Arc::new(Semaphore::new(self.max_concurrency));
        let mut tasks = JoinSet::new();
        for symbol in &request.symbols {
            let pipeline = self.pipeline.clone();
            let semaphore = semaphore.clone();
            let symbol = symbol.clone();
            let timeframes = request.timeframes.clone();
            let regime = regime.clone();
            tasks.spawn(async move {
                let _permit = semaphore.acquire_owned().await;
                let outcome = pipeline.process_symbol(&symbol, &timeframes, &regime).await;
                (symbol, outcome)
            });
        }

        let mut candidates = Vec::new();
        let mut failed = 0;
        let mut skipped = 0;
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((_, Ok(Some(candidate)))) => candidates.push(candidate),
                Ok((symbol, Ok(None))) => {
                    debug!(symbol = %symbol, "No usable timeframe, skipping");
                    skipped += 1;
                }
                Ok((symbol, Err(e))) => {
                    warn!(symbol = %symbol, error = %e, "Symbol pipeline failed");
                    failed += 1;
                }
                Err(e) => {
                    warn!(error = %e, "Symbol pipeline panicked");
                    failed += 1;
                }
            }
        }

        let produced = candidates.len();
        let mut candidates: Vec<SetupCandidate> = candidates
            .into_iter()
            .filter(|c| passes_filters(c, request))
            .collect();
        let filtered = produced - candidates.len();
        rank_candidates(&mut candidates);
        candidates.truncate(request.limit);

        info!(
            scanned = request.symbols.len(),
            failed,
            skipped,
            filtered,
            candidates = candidates.len(),
            "Universe scan complete"
        );

        ScanReport {
            scan_id: Uuid::new_v4(),
            started_at,
            finished_at: Utc::now(),
            regime,
            candidates,
            scanned: request.symbols.len(),
            failed,
            skipped,
            filtered,
        }
    }
}

// ---------------------------------------------------------------------------
// Per-symbol pipeline
// ---------------------------------------------------------------------------

impl Pipeline {
    async fn process_symbol(
        &self,
        symbol: &str,
        timeframes: &[Timeframe],
        regime: &RegimeSnapshot,
    ) -> Result<Option<SetupCandidate>> {
        let c = &self.components;
        let derivatives = self.fetch_derivatives(symbol).await;

        let fetched = join_all(
            timeframes
                .iter()
                .map(|tf| c.bars.last_n(symbol, *tf, self.bars_limit)),
        )
        .await;

        let mut evals = Vec::with_capacity(timeframes.len());
        for (tf, bars) in timeframes.iter().zip(fetched) {
            let bars = bars.with_context(|| format!("Failed to fetch {tf} bars for {symbol}"))?;
            if bars.is_empty() {
                debug!(symbol, timeframe = %tf, "No bars, skipping timeframe");
                continue;
            }
            evals.push(self.evaluate(symbol, *tf, bars, derivatives.as_ref(), regime));
        }
        let Some(first) = evals.first() else {
            return Ok(None);
        };

        for eval in &evals {
            if let Err(e) = c.diagnostics_log.save_snapshot(&eval.snapshot).await {
                warn!(symbol, timeframe = %eval.timeframe, error = %e, "Failed to log snapshot");
            }
        }

        let n = evals.len() as f64;
        let avg_pump_score = evals.iter().map(|e| e.snapshot.pump_score).sum::<f64>() / n;
        let avg_risk_score = evals.iter().map(|e| e.snapshot.risk_score).sum::<f64>() / n;
        let phase = consensus_phase(&evals, self.target);

        let current_price = first.snapshot.close_price;
        let volume_bars = evals
            .iter()
            .find(|e| e.timeframe == Timeframe::H1)
            .unwrap_or(first);
        let tradability = self
            .tradability
            .analyze(volume_24h_usd(&volume_bars.bars, current_price));

        let key = first.snapshot.pattern_key.clone();
        let reliability = c
            .calibration
            .get_reliability(&key, c.calibration.config().reliability_min_samples)
            .await;
        let effective_threshold = c
            .calibration
            .get_effective_threshold(symbol, regime.regime)
            .await;

        let per_tf: BTreeMap<Timeframe, TimeframeScore> = evals
            .iter()
            .map(|e| (e.timeframe, e.score.clone()))
            .collect();
        let multi = c.scoring.aggregate_multi_tf(per_tf, self.target)?;

        let per_timeframe = evals
            .iter()
            .map(|e| {
                (
                    e.timeframe,
                    TimeframeBreakdown {
                        phase: e.snapshot.phase,
                        trend: e.snapshot.trend,
                        pump_score: e.snapshot.pump_score,
                        risk_score: e.snapshot.risk_score,
                        normalized_long: e.score.normalized_long,
                        normalized_short: e.score.normalized_short,
                        net_score: e.score.net_score,
                    },
                )
            })
            .collect();

        debug!(
            symbol,
            phase = %phase,
            pump = avg_pump_score,
            risk = avg_risk_score,
            threshold = effective_threshold,
            tradability = %tradability.state,
            "Symbol evaluated"
        );

        Ok(Some(SetupCandidate {
            symbol: symbol.to_string(),
            phase,
            avg_pump_score,
            avg_risk_score,
            per_timeframe,
            direction: multi.direction,
            confidence: multi.confidence,
            current_price,
            tradability,
            regime: regime.regime,
            pattern_key: key,
            reliability_score: reliability.score,
            reliability_samples: reliability.samples,
            effective_threshold,
        }))
    }

    async fn fetch_derivatives(&self, symbol: &str) -> Option<DerivativesSnapshot> {
        let provider = self.components.derivatives.as_ref()?;
        match provider.snapshot(symbol).await {
            Ok(snapshot) if !snapshot.is_empty() => Some(snapshot),
            Ok(_) => None,
            Err(e) => {
                debug!(symbol, provider = provider.name(), error = %e, "Derivatives unavailable");
                None
            }
        }
    }

    fn evaluate(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        bars: Vec<Bar>,
        derivatives: Option<&DerivativesSnapshot>,
        regime: &RegimeSnapshot,
    ) -> TimeframeEval {
        let c = &self.components;
        let indicators = c.indicators.compute(&bars);
        let features = c.features.extract(&bars, &indicators, derivatives);
        let diagnosis = self.analyzer.analyze(&features, &indicators, derivatives);
        let score = c.scoring.score_timeframe(
            &diagnosis,
            &indicators,
            &features,
            derivatives,
            timeframe,
            self.target,
        );

        // Bars are non-empty here.
        let last = bars[bars.len() - 1];
        let mut values = indicators.to_values();
        values.insert("net_score".into(), score.net_score);
        values.insert("weighted_raw".into(), score.weighted_raw);
        if let Some(d) = derivatives {
            if let Some(f) = d.funding_rate {
                values.insert("funding_rate".into(), f);
            }
            if let Some(oi) = d.oi_change_pct {
                values.insert("oi_change_pct".into(), oi);
            }
        }

        let snapshot = DiagnosticsSnapshot {
            id: None,
            timestamp_ms: last.timestamp_ms,
            symbol: symbol.to_string(),
            timeframe,
            phase: diagnosis.phase,
            trend: diagnosis.trend,
            volatility: features.volatility,
            liquidity: features.liquidity,
            structure: features.structure,
            pump_score: diagnosis.pump_score,
            risk_score: diagnosis.risk_score,
            close_price: last.close,
            strategy_mode: STRATEGY_MODE.to_string(),
            metrics: snapshot_metrics(&features, &score, regime, values),
            pattern_key: pattern_key(
                diagnosis.phase,
                diagnosis.trend,
                features.structure,
                Some(regime.regime),
            ),
            reliability_score: None,
        };

        TimeframeEval {
            timeframe,
            bars,
            snapshot,
            score,
        }
    }
}

fn snapshot_metrics(
    features: &FeatureSet,
    score: &TimeframeScore,
    regime: &RegimeSnapshot,
    values: BTreeMap<String, f64>,
) -> SnapshotMetrics {
    SnapshotMetrics {
        regime: Some(regime.regime),
        support_distance_pct: features.support_distance_pct,
        resistance_distance_pct: features.resistance_distance_pct,
        demand_ob_below: Some(features.demand_ob_below),
        demand_ob_distance_pct: features.demand_ob_distance_pct,
        zone: features.zone,
        position_in_range: features.position_in_range,
        group_scores: score.group_raw_scores(),
        values,
    }
}

/// Phase carrying the most timeframe weight; ties go to the earlier timeframe.
fn consensus_phase(evals: &[TimeframeEval], target: Timeframe) -> Phase {
    let mut votes: Vec<(Phase, f64)> = Vec::new();
    for e in evals {
        let w = timeframe_weight(e.timeframe, target);
        match votes.iter_mut().find(|(p, _)| *p == e.snapshot.phase) {
            Some((_, total)) => *total += w,
            None => votes.push((e.snapshot.phase, w)),
        }
    }
    votes
        .into_iter()
        .fold(None::<(Phase, f64)>, |best, (phase, w)| match best {
            Some((_, bw)) if bw >= w => best,
            _ => Some((phase, w)),
        })
        .map(|(phase, _)| phase)
        .unwrap_or(Phase::Accumulation)
}

// ---------------------------------------------------------------------------
// Filtering and ranking
// ---------------------------------------------------------------------------

fn passes_filters(candidate: &SetupCandidate, request: &ScanRequest) -> bool {
    let floor = request.min_score.max(candidate.effective_threshold);
    if candidate.avg_pump_score < floor || candidate.avg_risk_score > request.max_risk {
        return false;
    }
    if request.filter_illiquid && candidate.tradability.state == TradabilityState::Illiquid {
        if request.user_profile == UserProfile::Conservative {
            return false;
        }
        if candidate.tradability.spread_bps > MAX_ILLIQUID_SPREAD_BPS {
            return false;
        }
    }
    true
}

/// Pump score descending, ties by symbol.
fn rank_candidates(candidates: &mut [SetupCandidate]) {
    candidates.sort_by(|a, b| {
        b.avg_pump_score
            .total_cmp(&a.avg_pump_score)
            .then_with(|| a.symbol.cmp(&b.symbol))
    });
}
