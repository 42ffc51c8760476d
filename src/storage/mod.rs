//! Persistence layer.
//!
//! Saves and loads the cross-period snapshot to/from a JSON file, so a
//! restarted agent continues the enter/swap_back toggle where it stopped.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::Path;
use tracing::{debug, info};

use crate::consensus::store::SynchronizedData;

/// Default state file path.
pub const DEFAULT_STATE_FILE: &str = "swapping_state.json";

/// What survives between runs: the next period number and the
/// cross-period keys.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistedState {
    pub period: u64,
    pub values: BTreeMap<String, Value>,
    pub saved_at: DateTime<Utc>,
}

impl PersistedState {
    /// Snapshot of `data` as the next period will see it.
    pub fn from_data(data: &SynchronizedData) -> Self {
        Self {
            period: data.period(),
            values: data.cross_period_values(),
            saved_at: Utc::now(),
        }
    }
}

/// Save state to a JSON file.
pub fn save_state(state: &PersistedState, path: Option<&str>) -> Result<()> {
    let path = path.unwrap_or(DEFAULT_STATE_FILE);
    let json = serde_json::to_string_pretty(state)
        .context("Failed to serialise agent state")?;

    std::fs::write(path, &json)
        .context(format!("Failed to write state to {path}"))?;

    debug!(path, period = state.period, keys = state.values.len(), "State saved");
    Ok(())
}

/// Load state from a JSON file.
/// Returns None if the file doesn't exist (fresh start).
pub fn load_state(path: Option<&str>) -> Result<Option<PersistedState>> {
    let path = path.unwrap_or(DEFAULT_STATE_FILE);

    if !Path::new(path).exists() {
        info!(path, "No saved state found, starting fresh");
        return Ok(None);
    }

    let json = std::fs::read_to_string(path)
        .context(format!("Failed to read state from {path}"))?;

    let state: PersistedState = serde_json::from_str(&json)
        .context(format!("Failed to parse state from {path}"))?;

    info!(
        path,
        period = state.period,
        keys = state.values.len(),
        saved_at = %state.saved_at,
        "State loaded from disk"
    );

    Ok(Some(state))
}

/// Delete the state file (for testing or reset).
pub fn delete_state(path: Option<&str>) -> Result<()> {
    let path = path.unwrap_or(DEFAULT_STATE_FILE);
    if Path::new(path).exists() {
        std::fs::remove_file(path)
            .context(format!("Failed to delete state file {path}"))?;
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
