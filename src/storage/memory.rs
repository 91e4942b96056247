//! In-memory logs for tests and dry runs.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::storage::{
    DiagnosticsLog, ForecastLog, ForecastQuery, ForecastRecord, SnapshotOrder, SnapshotQuery,
};
use crate::types::DiagnosticsSnapshot;

#[derive(Default)]
pub struct InMemoryDiagnosticsLog {
    rows: RwLock<Vec<DiagnosticsSnapshot>>,
}

impl InMemoryDiagnosticsLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.rows.read().await.len()
    }
}

#[async_trait]
impl DiagnosticsLog for InMemoryDiagnosticsLog {
    async fn save_snapshot(&self, snapshot: &DiagnosticsSnapshot) -> Result<i64> {
        let mut rows = self.rows.write().await;
        if let Some(existing) = rows.iter().find(|s| {
            s.symbol == snapshot.symbol
                && s.timeframe == snapshot.timeframe
                && s.timestamp_ms == snapshot.timestamp_ms
        }) {
            return Ok(existing.id.unwrap_or_default());
        }
        let id = rows.len() as i64 + 1;
        let mut stored = snapshot.clone();
        stored.id = Some(id);
        rows.push(stored);
        Ok(id)
    }

    async fn get_snapshots(&self, query: &SnapshotQuery) -> Result<Vec<DiagnosticsSnapshot>> {
        let rows = self.rows.read().await;
        let mut out: Vec<DiagnosticsSnapshot> =
            rows.iter().filter(|s| query.matches(s)).cloned().collect();
        out.sort_by_key(|s| (s.timestamp_ms, s.id));
        if query.order == SnapshotOrder::NewestFirst {
            out.reverse();
        }
        if let Some(limit) = query.limit {
            out.truncate(limit);
        }
        Ok(out)
    }
}

#[derive(Default)]
pub struct InMemoryForecastLog {
    rows: RwLock<Vec<ForecastRecord>>,
}

impl InMemoryForecastLog {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ForecastLog for InMemoryForecastLog {
    async fn record_forecast(&self, record: &ForecastRecord) -> Result<i64> {
        let mut rows = self.rows.write().await;
        let id = rows.len() as i64 + 1;
        let mut stored = record.clone();
        stored.id = Some(id);
        rows.push(stored);
        Ok(id)
    }

    async fn record_outcome(&self, id: i64, realized_return: f64, resolved_at_ms: i64) -> Result<()> {
        let mut rows = self.rows.write().await;
        let row = rows
            .iter_mut()
            .find(|r| r.id == Some(id))
            .ok_or_else(|| anyhow!("Unknown forecast id {id}"))?;
        row.realized_return = Some(realized_return);
        row.resolved_at_ms = Some(resolved_at_ms);
        Ok(())
    }

    async fn resolved(&self, query: &ForecastQuery) -> Result<Vec<ForecastRecord>> {
        let rows = self.rows.read().await;
        let mut out: Vec<ForecastRecord> = rows
            .iter()
            .filter(|r| r.is_resolved() && query.matches(r))
            .cloned()
            .collect();
        out.sort_by(|a, b| b.created_at_ms.cmp(&a.created_at_ms).then(b.id.cmp(&a.id)));
        if let Some(limit) = query.limit {
            out.truncate(limit);
        }
        Ok(out)
    }

    async fn pending(&self, before_ms: i64) -> Result<Vec<ForecastRecord>> {
        let rows = self.rows.read().await;
        Ok(rows
            .iter()
            .filter(|r| !r.is_resolved() && r.target_ms <= before_ms)
            .cloned()
            .collect())
    }
}
