//! Configuration: TOML file with full defaults.
//!
//! Everything works with no config file at all — the built-in backend set,
//! `~/.modelgate` state dir, and standard thresholds. A config file
//! overrides per key; an explicit `[[backend]]` list replaces the built-in
//! registry wholesale and is validated the same way.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::registry::{default_backends, ModelDefinition};

/// Dispatch timeout applied to every backend call.
pub const DEFAULT_DISPATCH_TIMEOUT_SECS: u64 = 120;

#[derive(Debug, Default, Deserialize)]
struct RawConfig {
    state_dir: Option<String>,
    #[serde(default)]
    confidential_terms: Vec<String>,
    dispatch_timeout_secs: Option<u64>,
    #[serde(default, rename = "backend")]
    backends: Vec<ModelDefinition>,
}

/// Resolved runtime configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub state_dir: PathBuf,
    pub confidential_terms: Vec<String>,
    pub dispatch_timeout_secs: u64,
    pub backends: Vec<ModelDefinition>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            state_dir: default_state_dir(),
            confidential_terms: Vec::new(),
            dispatch_timeout_secs: DEFAULT_DISPATCH_TIMEOUT_SECS,
            backends: default_backends(),
        }
    }
}

impl Config {
    pub fn rates_path(&self) -> PathBuf {
        self.state_dir.join("rates.json")
    }

    pub fn audit_path(&self) -> PathBuf {
        self.state_dir.join("audit.log")
    }

    pub fn profiles_dir(&self) -> PathBuf {
        self.state_dir.join("profiles")
    }

    pub fn budget_path(&self) -> PathBuf {
        self.state_dir.join("budget.json")
    }

    /// Load from an explicit path (must exist) or the default location
    /// (absent file means defaults).
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let resolved = match path {
            Some(p) => {
                if !p.exists() {
                    anyhow::bail!("config file not found: {}", p.display());
                }
                Some(p.to_path_buf())
            }
            None => {
                let default = default_state_dir().join("config.toml");
                default.exists().then_some(default)
            }
        };

        let Some(config_path) = resolved else {
            return Ok(Self::default());
        };

        let raw_text = std::fs::read_to_string(&config_path)
            .with_context(|| format!("reading {}", config_path.display()))?;
        let raw: RawConfig = toml::from_str(&raw_text)
            .with_context(|| format!("parsing {}", config_path.display()))?;

        let mut config = Self::default();
        if let Some(dir) = raw.state_dir {
            config.state_dir = PathBuf::from(shellexpand::tilde(&dir).into_owned());
        }
        if !raw.confidential_terms.is_empty() {
            config.confidential_terms = raw.confidential_terms;
        }
        if let Some(secs) = raw.dispatch_timeout_secs {
            config.dispatch_timeout_secs = secs;
        }
        if !raw.backends.is_empty() {
            config.backends = raw.backends;
        }
        Ok(config)
    }
}

fn default_state_dir() -> PathBuf {
    directories::UserDirs::new()
        .map(|u| u.home_dir().to_path_buf())
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".modelgate")
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn defaults_without_config_file() {
        let config = Config::default();
        assert_eq!(config.dispatch_timeout_secs, 120);
        assert!(!config.backends.is_empty());
        assert!(config.state_dir.ends_with(".modelgate"));
    }

    #[test]
    fn explicit_missing_path_errors() {
        assert!(Config::load(Some(Path::new("/no/such/config.toml"))).is_err());
    }

    #[test]
    fn partial_config_overrides_only_named_keys() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("config.toml");
        std::fs::write(&path, "dispatch_timeout_secs = 30\n").unwrap();
        let config = Config::load(Some(&path)).unwrap();
        assert_eq!(config.dispatch_timeout_secs, 30);
        assert_eq!(config.backends.len(), default_backends().len());
    }

    #[test]
    fn confidential_terms_load() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("config.toml");
        std::fs::write(&path, "confidential_terms = [\"project aurora\"]\n").unwrap();
        let config = Config::load(Some(&path)).unwrap();
        assert_eq!(config.confidential_terms, vec!["project aurora".to_string()]);
    }

    #[test]
    fn backend_list_replaces_defaults() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("config.toml");
        std::fs::write(
            &path,
            r#"
[[backend]]
name = "local"
tier = 1
context_window = 100000

[[backend]]
name = "remote"
tier = 2
rpm_limit = 5
headroom = 1
context_window = 50000
strengths = ["research"]

[backend.adapter]
kind = "http"
base_url = "http://127.0.0.1:9999/v1"
model = "test"
"#,
        )
        .unwrap();
        let config = Config::load(Some(&path)).unwrap();
        assert_eq!(config.backends.len(), 2);
        assert_eq!(config.backends[0].name, "local");
    }

    #[test]
    fn tilde_in_state_dir_expands() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("config.toml");
        std::fs::write(&path, "state_dir = \"~/.modelgate-test\"\n").unwrap();
        let config = Config::load(Some(&path)).unwrap();
        assert!(!config.state_dir.to_string_lossy().contains('~'));
    }

    #[test]
    fn derived_paths_hang_off_state_dir() {
        let config = Config {
            state_dir: PathBuf::from("/tmp/mg"),
            ..Config::default()
        };
        assert_eq!(config.rates_path(), PathBuf::from("/tmp/mg/rates.json"));
        assert_eq!(config.audit_path(), PathBuf::from("/tmp/mg/audit.log"));
        assert_eq!(config.profiles_dir(), PathBuf::from("/tmp/mg/profiles"));
        assert_eq!(config.budget_path(), PathBuf::from("/tmp/mg/budget.json"));
    }
}
