//! Group weights persisted as a JSON file.

use anyhow::{Context, Result};
use std::path::Path;
use tracing::{debug, info};

use crate::scoring::GroupWeights;

/// Save weights to a JSON file, creating parent directories as needed.
pub fn save_weights(weights: &GroupWeights, path: &str) -> Result<()> {
    if let Some(parent) = Path::new(path).parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory for {path}"))?;
        }
    }
    let json = serde_json::to_string_pretty(weights).context("Failed to serialise weights")?;
    std::fs::write(path, &json).with_context(|| format!("Failed to write weights to {path}"))?;

    debug!(path, trend = weights.trend, momentum = weights.momentum, "Weights saved");
    Ok(())
}

/// Load weights from a JSON file.
/// Returns None if the file doesn't exist.
pub fn load_weights(path: &str) -> Result<Option<GroupWeights>> {
    if !Path::new(path).exists() {
        info!(path, "No saved weights found, using configured weights");
        return Ok(None);
    }

    let json =
        std::fs::read_to_string(path).with_context(|| format!("Failed to read weights from {path}"))?;
    let weights: GroupWeights =
        serde_json::from_str(&json).with_context(|| format!("Failed to parse weights from {path}"))?;

    info!(path, sum = weights.sum(), "Weights loaded from disk");
    Ok(Some(weights))
}
