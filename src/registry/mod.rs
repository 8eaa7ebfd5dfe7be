//! Backend registry: the static table of model definitions.
//!
//! One trusted backend (tier 1, no dispatch adapter, no rate limit) and a
//! small fixed set of rate-limited secondaries (tiers 2–4). Definitions are
//! built once at startup — built-in defaults merged with config overrides —
//! and never mutated afterwards.

use serde::{Deserialize, Serialize};

/// How a secondary backend is reached. The trusted backend has no adapter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum AdapterKind {
    /// OpenAI-compatible chat endpoint.
    Http {
        /// Base URL, e.g. `http://127.0.0.1:11434/v1`.
        base_url: String,
        /// Model name sent in the request body.
        model: String,
        /// Env var holding the API key, if the endpoint needs one.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        api_key_env: Option<String>,
    },
    /// One-shot CLI invocation; the prompt is passed on stdin.
    Command {
        /// Binary name resolved on PATH.
        program: String,
        /// Fixed arguments prepended before the prompt flag.
        #[serde(default)]
        args: Vec<String>,
    },
}

/// A single backend definition. Immutable after startup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelDefinition {
    pub name: String,
    /// 1 = trusted/unlimited, 2–4 = increasingly constrained.
    pub tier: u8,
    /// Absent for the trusted backend.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub adapter: Option<AdapterKind>,
    /// Requests per minute; `None` = unlimited.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rpm_limit: Option<u32>,
    /// Reserved capacity kept unused below the hard limit.
    #[serde(default)]
    pub headroom: u32,
    /// Context window in tokens.
    pub context_window: u32,
    /// Strength tags consulted by the classifier and fallback chains.
    #[serde(default)]
    pub strengths: Vec<String>,
    /// Excluded from fallback chains when the message contains a
    /// confidential term.
    #[serde(default)]
    pub blocked_for_confidential: bool,
}

impl ModelDefinition {
    /// Whether this is the trusted, dispatch-free backend.
    pub fn is_trusted(&self) -> bool {
        self.tier == 1 && self.adapter.is_none()
    }

    pub fn has_strength(&self, tag: &str) -> bool {
        self.strengths.iter().any(|s| s == tag)
    }
}

/// The immutable registry built at startup.
#[derive(Debug)]
pub struct ModelRegistry {
    backends: Vec<ModelDefinition>,
}

impl ModelRegistry {
    /// Build from definitions. Exactly one trusted backend is required;
    /// anything else is a configuration error.
    pub fn new(backends: Vec<ModelDefinition>) -> anyhow::Result<Self> {
        let trusted = backends.iter().filter(|b| b.is_trusted()).count();
        if trusted != 1 {
            anyhow::bail!(
                "registry must contain exactly one trusted backend (tier 1, no adapter), found {trusted}"
            );
        }
        if let Some(bad) = backends
            .iter()
            .find(|b| !b.is_trusted() && b.adapter.is_none())
        {
            anyhow::bail!(
                "backend '{}' is tier {} but has no dispatch adapter",
                bad.name,
                bad.tier
            );
        }
        Ok(Self { backends })
    }

    /// Registry with the built-in default backend set.
    pub fn with_defaults() -> Self {
        Self {
            backends: default_backends(),
        }
    }

    pub fn get(&self, name: &str) -> Option<&ModelDefinition> {
        self.backends.iter().find(|b| b.name == name)
    }

    pub fn trusted(&self) -> &ModelDefinition {
        // Guaranteed by the constructor invariant.
        self.backends
            .iter()
            .find(|b| b.is_trusted())
            .expect("registry holds exactly one trusted backend")
    }

    pub fn all(&self) -> &[ModelDefinition] {
        &self.backends
    }

    /// The largest-context secondary backend, used for oversized messages.
    pub fn large_context_backend(&self) -> Option<&ModelDefinition> {
        self.backends
            .iter()
            .filter(|b| !b.is_trusted())
            .max_by_key(|b| b.context_window)
    }

    /// The general-purpose default the classifier falls back to.
    pub fn general_backend(&self) -> &ModelDefinition {
        self.large_context_backend().unwrap_or_else(|| self.trusted())
    }
}

/// Built-in backend set. Config can override any field per backend.
pub fn default_backends() -> Vec<ModelDefinition> {
    vec![
        ModelDefinition {
            name: "claude".into(),
            tier: 1,
            adapter: None,
            rpm_limit: None,
            headroom: 0,
            context_window: 200_000,
            strengths: vec![
                "strategy".into(),
                "security".into(),
                "tools".into(),
                "codebase".into(),
            ],
            blocked_for_confidential: false,
        },
        ModelDefinition {
            name: "gemini".into(),
            tier: 2,
            adapter: Some(AdapterKind::Command {
                program: "gemini".into(),
                args: vec![],
            }),
            rpm_limit: Some(15),
            headroom: 3,
            context_window: 1_000_000,
            strengths: vec!["research".into(), "summarize".into(), "large_context".into()],
            blocked_for_confidential: true,
        },
        ModelDefinition {
            name: "codex".into(),
            tier: 2,
            adapter: Some(AdapterKind::Command {
                program: "codex".into(),
                args: vec!["exec".into()],
            }),
            rpm_limit: Some(10),
            headroom: 2,
            context_window: 400_000,
            strengths: vec!["code".into()],
            blocked_for_confidential: true,
        },
        ModelDefinition {
            name: "deepseek".into(),
            tier: 3,
            adapter: Some(AdapterKind::Http {
                base_url: "https://api.deepseek.com/v1".into(),
                model: "deepseek-reasoner".into(),
                api_key_env: Some("DEEPSEEK_API_KEY".into()),
            }),
            rpm_limit: Some(30),
            headroom: 5,
            context_window: 64_000,
            strengths: vec!["reasoning".into(), "math".into()],
            blocked_for_confidential: true,
        },
        ModelDefinition {
            name: "ollama".into(),
            tier: 4,
            adapter: Some(AdapterKind::Http {
                base_url: "http://127.0.0.1:11434/v1".into(),
                model: "qwen3:8b".into(),
                api_key_env: None,
            }),
            rpm_limit: None,
            headroom: 0,
            context_window: 32_000,
            strengths: vec!["simple".into(), "privacy".into()],
            blocked_for_confidential: false,
        },
    ]
}
