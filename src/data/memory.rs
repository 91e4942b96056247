//! In-memory bar store, used by tests and demos.

use anyhow::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;

use crate::data::BarStore;
use crate::types::{Bar, Timeframe};

#[derive(Debug, Default)]
pub struct InMemoryBarStore {
    series: RwLock<HashMap<(String, Timeframe), Vec<Bar>>>,
}

impl InMemoryBarStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge bars into a series, keeping it sorted and unique by timestamp.
    pub async fn insert_bars(&self, symbol: &str, timeframe: Timeframe, bars: Vec<Bar>) {
        let mut series = self.series.write().await;
        let entry = series
            .entry((symbol.to_string(), timeframe))
            .or_default();
        entry.extend(bars);
        entry.sort_by_key(|b| b.timestamp_ms);
        entry.dedup_by_key(|b| b.timestamp_ms);
    }

    pub async fn clear(&self) {
        self.series.write().await.clear();
    }
}

#[async_trait]
impl BarStore for InMemoryBarStore {
    async fn last_n(&self, symbol: &str, timeframe: Timeframe, n: usize) -> Result<Vec<Bar>> {
        let series = self.series.read().await;
        Ok(series
            .get(&(symbol.to_string(), timeframe))
            .map(|bars| bars[bars.len().saturating_sub(n)..].to_vec())
            .unwrap_or_default())
    }
}
