//! Read-only usage signal from the external budget tracker.
//!
//! A separate process maintains a JSON file with the current spend level.
//! This subsystem only reads it, and only on the exhausted-fallback-chain
//! branch. Absent or corrupt is 0% usage, never an error.

use serde::Deserialize;
use std::path::Path;

/// Usage fraction above which exhausted requests report "queued, high
/// usage" instead of plain unavailability.
pub const HIGH_USAGE_THRESHOLD: f64 = 0.8;

#[derive(Debug, Deserialize)]
struct BudgetFile {
    #[serde(default)]
    usage_percent: f64,
}

/// Current usage as a fraction in [0, 1]. Missing file, bad JSON, or a
/// nonsensical value all read as 0.
pub fn current_usage(path: &Path) -> f64 {
    let Ok(raw) = std::fs::read_to_string(path) else {
        return 0.0;
    };
    let Ok(parsed) = serde_json::from_str::<BudgetFile>(&raw) else {
        tracing::debug!(path = %path.display(), "budget file unreadable, assuming 0%");
        return 0.0;
    };
    (parsed.usage_percent / 100.0).clamp(0.0, 1.0)
}

/// Whether usage is high enough to report queueing instead of
/// unavailability.
pub fn is_high_usage(path: &Path) -> bool {
    current_usage(path) >= HIGH_USAGE_THRESHOLD
}
