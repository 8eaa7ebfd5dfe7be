//! Project-aware validation profiles.
//!
//! A profile declares which identifier sets in a project are authoritative
//! (registries) and which patterns in delegated output must resolve against
//! them (checks). Profiles are TOML, schema-validated through serde, and
//! cached for the process lifetime.
//!
//! ```toml
//! root = "/home/user/projects/synth"
//!
//! [[registry]]
//! name = "commands"
//! file = "src/commands.rs"
//! pattern = 'fn cmd_([a-z_]+)'
//!
//! [[check]]
//! name = "command-names"
//! registry = "commands"
//! scan = '`([a-z_]+)` command'
//! block_on_miss = true
//! ```

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, LazyLock};

use parking_lot::Mutex;
use regex::Regex;
use serde::Deserialize;

/// An authoritative identifier source inside the project.
#[derive(Debug, Clone, Deserialize)]
pub struct RegistryDef {
    pub name: String,
    /// Path relative to the profile root.
    pub file: String,
    /// Extraction pattern; capture group 1 if present, whole match
    /// otherwise.
    pub pattern: String,
}

/// One scan over candidate output, resolved against a registry.
#[derive(Debug, Clone, Deserialize)]
pub struct CheckDef {
    pub name: String,
    pub registry: String,
    pub scan: String,
    #[serde(default)]
    pub block_on_miss: bool,
}

#[derive(Debug, Clone, Deserialize)]
struct ProfileConfig {
    root: String,
    #[serde(default, rename = "registry")]
    registries: Vec<RegistryDef>,
    #[serde(default, rename = "check")]
    checks: Vec<CheckDef>,
}

/// An identifier the output used that its registry does not contain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProfileMiss {
    pub check: String,
    pub identifier: String,
    pub blocking: bool,
}

/// A parsed profile with its ground-truth sets built.
pub struct ValidationProfile {
    pub name: String,
    checks: Vec<(CheckDef, Regex)>,
    ground_truth: HashMap<String, HashSet<String>>,
    /// Registries whose project file or pattern could not be used; their
    /// checks are skipped with a warning rather than flooding misses.
    pub skipped_registries: Vec<String>,
}

impl ValidationProfile {
    /// Run every check over `text`, returning identifiers absent from
    /// their registries.
    pub fn run(&self, text: &str) -> Vec<ProfileMiss> {
        let mut misses = Vec::new();
        for (check, scan) in &self.checks {
            let Some(truth) = self.ground_truth.get(&check.registry) else {
                continue; // registry skipped at load
            };
            for cap in scan.captures_iter(text) {
                let ident = cap
                    .get(1)
                    .or_else(|| cap.get(0))
                    .map(|m| m.as_str().to_string())
                    .unwrap_or_default();
                if ident.is_empty() || truth.contains(&ident) {
                    continue;
                }
                misses.push(ProfileMiss {
                    check: check.name.clone(),
                    identifier: ident,
                    blocking: check.block_on_miss,
                });
            }
        }
        misses
    }
}

fn extract_identifiers(raw: &str, pattern: &Regex) -> HashSet<String> {
    pattern
        .captures_iter(raw)
        .filter_map(|cap| {
            cap.get(1)
                .or_else(|| cap.get(0))
                .map(|m| m.as_str().to_string())
        })
        .collect()
}

fn build(name: &str, path: &Path) -> Option<ValidationProfile> {
    let raw = std::fs::read_to_string(path).ok()?;
    let config: ProfileConfig = match toml::from_str(&raw) {
        Ok(c) => c,
        Err(e) => {
            tracing::warn!(profile = name, "profile file rejected: {e}");
            return None;
        }
    };

    let root = PathBuf::from(shellexpand::tilde(&config.root).into_owned());
    let mut ground_truth = HashMap::new();
    let mut skipped = Vec::new();

    for reg in &config.registries {
        let pattern = match Regex::new(&reg.pattern) {
            Ok(p) => p,
            Err(e) => {
                tracing::warn!(profile = name, registry = %reg.name, "bad pattern: {e}");
                skipped.push(reg.name.clone());
                continue;
            }
        };
        match std::fs::read_to_string(root.join(&reg.file)) {
            Ok(contents) => {
                ground_truth.insert(reg.name.clone(), extract_identifiers(&contents, &pattern));
            }
            Err(e) => {
                tracing::warn!(
                    profile = name,
                    registry = %reg.name,
                    file = %reg.file,
                    "registry file unreadable, skipping its checks: {e}"
                );
                skipped.push(reg.name.clone());
            }
        }
    }

    let checks = config
        .checks
        .iter()
        .filter_map(|check| match Regex::new(&check.scan) {
            Ok(re) => Some((check.clone(), re)),
            Err(e) => {
                tracing::warn!(profile = name, check = %check.name, "bad scan pattern: {e}");
                None
            }
        })
        .collect();

    Some(ValidationProfile {
        name: name.to_string(),
        checks,
        ground_truth,
        skipped_registries: skipped,
    })
}

/// Process-lifetime cache: profile path → parsed profile (or the memo that
/// it failed to parse).
static CACHE: LazyLock<Mutex<HashMap<PathBuf, Option<Arc<ValidationProfile>>>>> =
    LazyLock::new(|| Mutex::new(HashMap::new()));

/// Load `<profiles_dir>/<name>.toml`, cached. `None` when the file is
/// absent or malformed — the caller treats the profile as not existing.
pub fn load(name: &str, profiles_dir: &Path) -> Option<Arc<ValidationProfile>> {
    // Profile names come from task types; refuse anything path-like.
    if name.is_empty() || name.contains(['/', '\\', '.']) {
        return None;
    }
    let path = profiles_dir.join(format!("{name}.toml"));
    let mut cache = CACHE.lock();
    if let Some(cached) = cache.get(&path) {
        return cached.clone();
    }
    let profile = build(name, &path).map(Arc::new);
    cache.insert(path, profile.clone());
    profile
}
