//! Sliding-window call ledger shared across router invocations.
//!
//! Every routing process reads and rewrites the same on-disk JSON file, so
//! the file-backed store serializes the whole read-modify-write cycle under
//! an exclusive lock on a sidecar lockfile and replaces the ledger with a
//! temp-file rename. A corrupt or missing ledger is treated as empty —
//! availability over strictness for non-security state.
//!
//! ## On-disk schema
//! ```json
//! {
//!   "_last_model": "gemini",
//!   "gemini": ["2026-08-07T11:58:02Z", "2026-08-07T11:58:41Z"],
//!   "codex": []
//! }
//! ```

use std::collections::HashMap;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use fs2::FileExt;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

/// Sliding window length. Rate limits are per-minute.
pub const WINDOW_SECS: i64 = 60;

/// The deserialized ledger: per-backend call timestamps plus the
/// last-backend pointer.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LedgerState {
    #[serde(
        rename = "_last_model",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub last_model: Option<String>,
    #[serde(flatten)]
    pub calls: HashMap<String, Vec<DateTime<Utc>>>,
}

impl LedgerState {
    /// Drop every timestamp older than the trailing window.
    pub fn prune(&mut self, now: DateTime<Utc>) {
        let cutoff = now - Duration::seconds(WINDOW_SECS);
        for stamps in self.calls.values_mut() {
            stamps.retain(|ts| *ts > cutoff);
        }
    }

    /// Calls to `backend` within the trailing window.
    pub fn active_count(&self, backend: &str, now: DateTime<Utc>) -> usize {
        let cutoff = now - Duration::seconds(WINDOW_SECS);
        self.calls
            .get(backend)
            .map(|stamps| stamps.iter().filter(|ts| **ts > cutoff).count())
            .unwrap_or(0)
    }
}

/// Storage abstraction so the router takes an injected store and tests run
/// against the in-memory implementation.
pub trait LedgerStore: Send + Sync {
    /// Read-only view of the current state, pruned to the trailing window.
    fn snapshot(&self) -> Result<LedgerState>;

    /// Apply `op` to the state under exclusive access and persist the
    /// result. Returns the state after the mutation.
    fn mutate(&self, op: &mut dyn FnMut(&mut LedgerState)) -> Result<LedgerState>;
}

// ── File-backed store ───────────────────────────────────────────

/// JSON-file ledger with cross-process locking.
pub struct FileLedger {
    path: PathBuf,
    lock_path: PathBuf,
}

impl FileLedger {
    /// Use (or create) the ledger at `path`. The parent directory is
    /// created if missing; the sidecar lockfile lives next to it.
    pub fn new(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("creating ledger dir {}", parent.display()))?;
        }
        let mut lock_path = path.as_os_str().to_owned();
        lock_path.push(".lock");
        Ok(Self {
            path: path.to_path_buf(),
            lock_path: PathBuf::from(lock_path),
        })
    }

    fn lock_file(&self) -> Result<fs::File> {
        OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&self.lock_path)
            .with_context(|| format!("opening ledger lockfile {}", self.lock_path.display()))
    }

    /// Parse the ledger file. Missing or corrupt contents yield an empty
    /// state rather than an error.
    fn read_state(&self) -> LedgerState {
        match fs::read_to_string(&self.path) {
            Ok(raw) => serde_json::from_str(&raw).unwrap_or_else(|e| {
                tracing::warn!(
                    path = %self.path.display(),
                    "ledger file corrupt, starting empty: {e}"
                );
                LedgerState::default()
            }),
            Err(_) => LedgerState::default(),
        }
    }

    /// Write state via temp file + rename so concurrent readers never see a
    /// half-written ledger.
    fn write_state(&self, state: &LedgerState) -> Result<()> {
        let tmp = self.path.with_extension("json.tmp");
        let raw = serde_json::to_string_pretty(state)?;
        {
            let mut f = fs::File::create(&tmp)
                .with_context(|| format!("creating {}", tmp.display()))?;
            f.write_all(raw.as_bytes())?;
            f.sync_all()?;
        }
        fs::rename(&tmp, &self.path)
            .with_context(|| format!("replacing {}", self.path.display()))?;
        Ok(())
    }
}

impl LedgerStore for FileLedger {
    fn snapshot(&self) -> Result<LedgerState> {
        let lock = self.lock_file()?;
        FileExt::lock_shared(&lock)?;
        let mut state = self.read_state();
        state.prune(Utc::now());
        FileExt::unlock(&lock)?;
        Ok(state)
    }

    fn mutate(&self, op: &mut dyn FnMut(&mut LedgerState)) -> Result<LedgerState> {
        // The exclusive lock spans read → modify → rename: concurrent
        // invocations queue here instead of losing call records.
        let lock = self.lock_file()?;
        FileExt::lock_exclusive(&lock)?;
        let mut state = self.read_state();
        op(&mut state);
        let result = self.write_state(&state);
        FileExt::unlock(&lock)?;
        result?;
        Ok(state)
    }
}

// ── In-memory store (tests, dry runs) ───────────────────────────

/// Mutex-guarded in-memory ledger. Substituted for the file store in tests
/// and anywhere persistence is unwanted.
#[derive(Default)]
pub struct MemoryLedger {
    state: Mutex<LedgerState>,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }
}

impl LedgerStore for MemoryLedger {
    fn snapshot(&self) -> Result<LedgerState> {
        let mut state = self.state.lock().clone();
        state.prune(Utc::now());
        Ok(state)
    }

    fn mutate(&self, op: &mut dyn FnMut(&mut LedgerState)) -> Result<LedgerState> {
        let mut state = self.state.lock();
        op(&mut state);
        Ok(state.clone())
    }
}

// ── Rate tracking over a store ──────────────────────────────────

use crate::registry::ModelDefinition;

/// Sliding-window rate checks and call recording over an injected store.
pub struct RateTracker {
    store: std::sync::Arc<dyn LedgerStore>,
}

impl RateTracker {
    pub fn new(store: std::sync::Arc<dyn LedgerStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &std::sync::Arc<dyn LedgerStore> {
        &self.store
    }

    /// Whether `def` has capacity right now: `remaining > headroom`.
    /// Backends without a configured limit always pass.
    pub fn check_rate_limit(&self, def: &ModelDefinition, now: DateTime<Utc>) -> bool {
        let Some(limit) = def.rpm_limit else {
            return true;
        };
        let active = match self.store.snapshot() {
            Ok(state) => state.active_count(&def.name, now),
            Err(e) => {
                tracing::warn!(backend = %def.name, "ledger read failed, assuming no capacity: {e}");
                return false;
            }
        };
        let remaining = (limit as i64) - (active as i64);
        remaining > def.headroom as i64
    }

    /// Append a call timestamp, update the last-backend pointer, prune, and
    /// persist.
    pub fn record_call(&self, backend: &str, now: DateTime<Utc>) -> Result<()> {
        self.store.mutate(&mut |state: &mut LedgerState| {
            state.calls.entry(backend.to_string()).or_default().push(now);
            state.last_model = Some(backend.to_string());
            state.prune(now);
        })?;
        Ok(())
    }

    /// The most recently dispatched backend, if any.
    pub fn last_backend(&self) -> Option<String> {
        self.store.snapshot().ok().and_then(|s| s.last_model)
    }
}
