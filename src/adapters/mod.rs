//! Dispatch adapters for secondary backends.
//!
//! The router and dispatcher only know the `BackendAdapter` contract: a
//! cheap health probe and a prompt→text invocation. Two generic adapters
//! cover the backend fleet — an OpenAI-compatible HTTP client and a
//! subprocess wrapper for CLI tools. The trusted backend has no adapter at
//! all; a `RouteResult` carrying `adapter: None` never dispatches.

pub mod command;
pub mod http;

pub use command::CommandAdapter;
pub use http::HttpAdapter;

use crate::registry::AdapterKind;
use async_trait::async_trait;

/// Contract every secondary backend is reached through.
#[async_trait]
pub trait BackendAdapter: Send + Sync {
    /// Whether the backend is usable right now: credential present, binary
    /// on PATH, or local service reachable. Must be cheap; the router calls
    /// this on every decision.
    async fn health(&self) -> bool;

    /// Send a prompt, return the raw response text. Timeouts are imposed by
    /// the dispatcher, not here.
    async fn invoke(&self, prompt: &str) -> anyhow::Result<String>;

    /// One-line description for `--health` output.
    fn describe(&self) -> String;
}

/// Factory: build the right adapter for a registry definition.
pub fn create_adapter(kind: &AdapterKind) -> Box<dyn BackendAdapter> {
    match kind {
        AdapterKind::Http {
            base_url,
            model,
            api_key_env,
        } => Box::new(HttpAdapter::new(base_url, model, api_key_env.as_deref())),
        AdapterKind::Command { program, args } => {
            Box::new(CommandAdapter::new(program, args.clone()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn factory_builds_http_adapter() {
        let kind = AdapterKind::Http {
            base_url: "http://127.0.0.1:11434/v1".into(),
            model: "qwen3:8b".into(),
            api_key_env: None,
        };
        let adapter = create_adapter(&kind);
        assert!(adapter.describe().contains("11434"));
    }

    #[test]
    fn factory_builds_command_adapter() {
        let kind = AdapterKind::Command {
            program: "gemini".into(),
            args: vec![],
        };
        let adapter = create_adapter(&kind);
        assert!(adapter.describe().contains("gemini"));
    }
}
