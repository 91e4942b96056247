//! Outcome replay.
//!
//! Pairs logged diagnostics snapshots with the price move that followed
//! them and groups the resulting samples along the dimensions the
//! calibration layer cares about: score rank, phase and trend, regime,
//! symbol, distance to levels, order blocks and premium/discount zone.

use anyhow::Result;
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;

use crate::backtest::stats::GroupStats;
use crate::data::BarStore;
use crate::storage::{DiagnosticsLog, SnapshotQuery};
use crate::types::{DiagnosticsSnapshot, Phase, PriceZone, Regime, Trend};

/// Bars scanned when no later snapshot prices the exit.
const FALLBACK_BARS: usize = 500;
/// Snapshot fetch ceiling for whole-log analyses; the newest rows win.
const DEFAULT_SNAPSHOT_LIMIT: usize = 10_000;
const MS_PER_HOUR: f64 = 3_600_000.0;

/// A snapshot together with its realized forward return (percent).
#[derive(Debug, Clone, PartialEq)]
pub struct OutcomeSample {
    pub snapshot: DiagnosticsSnapshot,
    pub forward_return: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecileStats {
    /// 1 = lowest pump scores.
    pub decile: usize,
    pub avg_pump_score: f64,
    pub stats: GroupStats,
}

/// Equal-width pump-score bin over `[lower, upper)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreBin {
    pub index: usize,
    pub lower: f64,
    pub upper: f64,
    pub stats: GroupStats,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BucketStats {
    pub label: String,
    pub stats: GroupStats,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OrderBlockStats {
    pub with_order_block: Option<GroupStats>,
    pub without_order_block: Option<GroupStats>,
    pub by_distance: Vec<BucketStats>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ZoneStats {
    pub by_zone: BTreeMap<PriceZone, GroupStats>,
    pub by_position: Vec<BucketStats>,
}

/// Inputs of the effective-threshold search for one symbol and regime.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RegimeStats {
    pub symbol_regime: Option<GroupStats>,
    pub regime: Option<GroupStats>,
    pub symbol_regime_bins: Vec<ScoreBin>,
    pub regime_bins: Vec<ScoreBin>,
}

pub const THRESHOLD_SEARCH_BINS: usize = 20;

const LEVEL_BUCKETS: &[(&str, f64, f64)] = &[
    ("<1%", 0.0, 1.0),
    ("1-3%", 1.0, 3.0),
    ("3-5%", 3.0, 5.0),
    ("5-10%", 5.0, 10.0),
    (">10%", 10.0, f64::INFINITY),
];

const ORDER_BLOCK_BUCKETS: &[(&str, f64, f64)] = &[
    ("<1%", 0.0, 1.0),
    ("1-3%", 1.0, 3.0),
    ("3-5%", 3.0, 5.0),
    (">5%", 5.0, f64::INFINITY),
];

const POSITION_BUCKETS: &[(&str, f64, f64)] = &[
    ("0-0.3", 0.0, 0.3),
    ("0.3-0.7", 0.3, 0.7),
    ("0.7-1.0", 0.7, f64::INFINITY),
];

pub struct OutcomeReplayer {
    log: Arc<dyn DiagnosticsLog>,
    bars: Arc<dyn BarStore>,
    min_group_samples: usize,
    snapshot_limit: usize,
}

impl OutcomeReplayer {
    pub fn new(log: Arc<dyn DiagnosticsLog>, bars: Arc<dyn BarStore>, min_group_samples: usize) -> Self {
        Self {
            log,
            bars,
            min_group_samples,
            snapshot_limit: DEFAULT_SNAPSHOT_LIMIT,
        }
    }

    /// Cap on snapshots fetched by the unbounded analyses.
    pub fn with_snapshot_limit(mut self, limit: usize) -> Self {
        self.snapshot_limit = limit.max(1);
        self
    }

    pub fn log(&self) -> &Arc<dyn DiagnosticsLog> {
        &self.log
    }

    // -----------------------------------------------------------------------
    // Forward returns
    // -----------------------------------------------------------------------

    /// Percent move from the snapshot close to the first observed price at
    /// or after `horizon_hours` later. `None` when the exit is not known yet.
    pub async fn calculate_forward_return(
        &self,
        snapshot: &DiagnosticsSnapshot,
        horizon_hours: f64,
    ) -> Option<f64> {
        let entry = snapshot.close_price;
        if entry <= 0.0 || !entry.is_finite() {
            return None;
        }
        let target_ms = snapshot.timestamp_ms + (horizon_hours * MS_PER_HOUR).round() as i64;

        let exit = match self.exit_from_log(snapshot, target_ms).await {
            Some(price) => Some(price),
            None => self.exit_from_bars(snapshot, target_ms).await,
        }?;
        Some((exit - entry) / entry * 100.0)
    }

    async fn exit_from_log(&self, snapshot: &DiagnosticsSnapshot, target_ms: i64) -> Option<f64> {
        let query = SnapshotQuery::new()
            .symbol(snapshot.symbol.clone())
            .timeframe(snapshot.timeframe)
            .since(target_ms)
            .limit(1);
        match self.log.get_snapshots(&query).await {
            Ok(rows) => rows.first().map(|s| s.close_price),
            Err(e) => {
                debug!(symbol = %snapshot.symbol, error = %e, "Exit lookup in log failed");
                None
            }
        }
    }

    async fn exit_from_bars(&self, snapshot: &DiagnosticsSnapshot, target_ms: i64) -> Option<f64> {
        match self
            .bars
            .last_n(&snapshot.symbol, snapshot.timeframe, FALLBACK_BARS)
            .await
        {
            Ok(bars) => bars
                .iter()
                .find(|b| b.timestamp_ms >= target_ms)
                .map(|b| b.close),
            Err(e) => {
                debug!(symbol = %snapshot.symbol, error = %e, "Exit lookup in bars failed");
                None
            }
        }
    }

    /// Forward returns for a batch; snapshots without one are dropped.
    pub async fn returns_for(
        &self,
        snapshots: &[DiagnosticsSnapshot],
        horizon_hours: f64,
    ) -> Vec<OutcomeSample> {
        let returns = join_all(
            snapshots
                .iter()
                .map(|s| self.calculate_forward_return(s, horizon_hours)),
        )
        .await;

        snapshots
            .iter()
            .zip(returns)
            .filter_map(|(snapshot, r)| {
                r.map(|forward_return| OutcomeSample {
                    snapshot: snapshot.clone(),
                    forward_return,
                })
            })
            .collect()
    }

    /// Fetch snapshots matching `query` and pair them with forward returns.
    /// An unbounded query is capped to the newest rows.
    pub async fn samples(&self, query: &SnapshotQuery, horizon_hours: f64) -> Result<Vec<OutcomeSample>> {
        let mut query = query.clone();
        if query.limit.is_none() {
            query = query.newest_first().limit(self.snapshot_limit);
        }
        let snapshots = self.log.get_snapshots(&query).await?;
        Ok(self.returns_for(&snapshots, horizon_hours).await)
    }

    // -----------------------------------------------------------------------
    // Aggregations
    // -----------------------------------------------------------------------

    /// Ten equal-count bins by pump-score rank.
    pub fn by_score_decile(&self, samples: &[OutcomeSample]) -> Vec<DecileStats> {
        let n = samples.len();
        if n == 0 {
            return Vec::new();
        }
        let mut ranked: Vec<&OutcomeSample> = samples.iter().collect();
        ranked.sort_by(|a, b| a.snapshot.pump_score.total_cmp(&b.snapshot.pump_score));

        let mut deciles: Vec<Vec<&OutcomeSample>> = vec![Vec::new(); 10];
        for (rank, sample) in ranked.into_iter().enumerate() {
            deciles[rank * 10 / n].push(sample);
        }

        deciles
            .into_iter()
            .enumerate()
            .filter(|(_, group)| group.len() >= self.min_group_samples.max(1))
            .filter_map(|(i, group)| {
                let returns: Vec<f64> = group.iter().map(|s| s.forward_return).collect();
                let scores: Vec<f64> = group.iter().map(|s| s.snapshot.pump_score).collect();
                GroupStats::from_returns(&returns).map(|stats| DecileStats {
                    decile: i + 1,
                    avg_pump_score: crate::backtest::stats::mean(&scores),
                    stats,
                })
            })
            .collect()
    }

    pub fn by_phase_trend(&self, samples: &[OutcomeSample]) -> BTreeMap<(Phase, Trend), GroupStats> {
        self.group_by(samples, |s| Some((s.snapshot.phase, s.snapshot.trend)))
    }

    /// Grouped by the regime stored with each snapshot.
    pub fn by_regime(&self, samples: &[OutcomeSample]) -> BTreeMap<Regime, GroupStats> {
        self.group_by(samples, |s| s.snapshot.regime())
    }

    pub fn by_symbol(&self, samples: &[OutcomeSample]) -> BTreeMap<String, GroupStats> {
        self.group_by(samples, |s| Some(s.snapshot.symbol.clone()))
    }

    pub fn by_symbol_regime(
        &self,
        samples: &[OutcomeSample],
    ) -> BTreeMap<(String, Regime), GroupStats> {
        self.group_by(samples, |s| {
            s.snapshot.regime().map(|r| (s.snapshot.symbol.clone(), r))
        })
    }

    pub fn by_regime_phase(&self, samples: &[OutcomeSample]) -> BTreeMap<(Regime, Phase), GroupStats> {
        self.group_by(samples, |s| s.snapshot.regime().map(|r| (r, s.snapshot.phase)))
    }

    /// `n` equal-width bins over the observed pump-score range.
    ///
    /// Every non-empty bin is returned; callers apply their own count floor.
    pub fn by_score_bins(&self, samples: &[OutcomeSample], n: usize) -> Vec<ScoreBin> {
        score_bins(samples, n)
    }

    /// Buckets by distance to the nearer of support and resistance.
    pub fn by_level_distance(&self, samples: &[OutcomeSample]) -> Vec<BucketStats> {
        self.bucketize(
            samples,
            |s| s.snapshot.metrics.nearest_level_distance_pct(),
            LEVEL_BUCKETS,
        )
    }

    pub fn by_order_block(&self, samples: &[OutcomeSample]) -> OrderBlockStats {
        let (with, without): (Vec<&OutcomeSample>, Vec<&OutcomeSample>) = samples
            .iter()
            .filter(|s| s.snapshot.metrics.demand_ob_below.is_some())
            .partition(|s| s.snapshot.metrics.demand_ob_below == Some(true));

        let with_returns: Vec<f64> = with.iter().map(|s| s.forward_return).collect();
        let without_returns: Vec<f64> = without.iter().map(|s| s.forward_return).collect();
        let with_samples: Vec<OutcomeSample> = with.into_iter().cloned().collect();

        OrderBlockStats {
            with_order_block: self.stats_if_enough(&with_returns),
            without_order_block: self.stats_if_enough(&without_returns),
            by_distance: self.bucketize(
                &with_samples,
                |s| s.snapshot.metrics.demand_ob_distance_pct.map(f64::abs),
                ORDER_BLOCK_BUCKETS,
            ),
        }
    }

    pub fn by_zone(&self, samples: &[OutcomeSample]) -> ZoneStats {
        ZoneStats {
            by_zone: self.group_by(samples, |s| s.snapshot.metrics.zone),
            by_position: self.bucketize(
                samples,
                |s| s.snapshot.metrics.position_in_range,
                POSITION_BUCKETS,
            ),
        }
    }

    /// Symbol×regime and regime-wide cells plus their score bins.
    pub async fn analyze_symbol_regime(
        &self,
        symbol: &str,
        regime: Regime,
        horizon_hours: f64,
    ) -> Result<RegimeStats> {
        let regime_query = SnapshotQuery::new().regime(regime);
        let samples = self.samples(&regime_query, horizon_hours).await?;
        let symbol_samples = self
            .samples(&regime_query.symbol(symbol), horizon_hours)
            .await?;

        debug!(
            symbol,
            regime = %regime,
            regime_samples = samples.len(),
            symbol_samples = symbol_samples.len(),
            "Replayed outcomes"
        );

        Ok(RegimeStats {
            symbol_regime: GroupStats::from_returns(&returns_of(&symbol_samples)),
            regime: GroupStats::from_returns(&returns_of(&samples)),
            symbol_regime_bins: score_bins(&symbol_samples, THRESHOLD_SEARCH_BINS),
            regime_bins: score_bins(&samples, THRESHOLD_SEARCH_BINS),
        })
    }

    // -----------------------------------------------------------------------
    // Helpers
    // -----------------------------------------------------------------------

    fn stats_if_enough(&self, returns: &[f64]) -> Option<GroupStats> {
        if returns.len() < self.min_group_samples {
            return None;
        }
        GroupStats::from_returns(returns)
    }

    fn group_by<K, F>(&self, samples: &[OutcomeSample], key: F) -> BTreeMap<K, GroupStats>
    where
        K: Ord,
        F: Fn(&OutcomeSample) -> Option<K>,
    {
        let mut groups: BTreeMap<K, Vec<f64>> = BTreeMap::new();
        for sample in samples {
            if let Some(k) = key(sample) {
                groups.entry(k).or_default().push(sample.forward_return);
            }
        }
        groups
            .into_iter()
            .filter_map(|(k, returns)| self.stats_if_enough(&returns).map(|s| (k, s)))
            .collect()
    }

    fn bucketize<F>(
        &self,
        samples: &[OutcomeSample],
        value: F,
        buckets: &[(&str, f64, f64)],
    ) -> Vec<BucketStats>
    where
        F: Fn(&OutcomeSample) -> Option<f64>,
    {
        buckets
            .iter()
            .filter_map(|(label, lo, hi)| {
                let returns: Vec<f64> = samples
                    .iter()
                    .filter(|s| value(s).is_some_and(|v| v >= *lo && v < *hi))
                    .map(|s| s.forward_return)
                    .collect();
                self.stats_if_enough(&returns).map(|stats| BucketStats {
                    label: label.to_string(),
                    stats,
                })
            })
            .collect()
    }
}

fn returns_of(samples: &[OutcomeSample]) -> Vec<f64> {
    samples.iter().map(|s| s.forward_return).collect()
}

fn score_bins(samples: &[OutcomeSample], n: usize) -> Vec<ScoreBin> {
    if samples.is_empty() || n == 0 {
        return Vec::new();
    }
    let scores = samples.iter().map(|s| s.snapshot.pump_score);
    let lo = scores.clone().fold(f64::INFINITY, f64::min);
    let hi = scores.fold(f64::NEG_INFINITY, f64::max);
    let width = (hi - lo) / n as f64;

    let mut bins: Vec<Vec<f64>> = vec![Vec::new(); n];
    for s in samples {
        let idx = if width > 0.0 {
            (((s.snapshot.pump_score - lo) / width).floor() as usize).min(n - 1)
        } else {
            0
        };
        bins[idx].push(s.forward_return);
    }

    bins.into_iter()
        .enumerate()
        .filter_map(|(i, returns)| {
            GroupStats::from_returns(&returns).map(|stats| ScoreBin {
                index: i,
                lower: lo + width * i as f64,
                upper: lo + width * (i + 1) as f64,
                stats,
            })
        })
        .collect()
}
