//! OpenAI-compatible HTTP adapter.
//!
//! Works against any `/chat/completions` endpoint — hosted APIs and local
//! Ollama-style servers alike. Authentication is an optional env-var-named
//! bearer key; local endpoints run without one.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::BackendAdapter;

/// Connect timeout for every request. The overall dispatch timeout is
/// enforced one level up.
const CONNECT_TIMEOUT_SECS: u64 = 5;

/// Health-probe timeout; the probe hits the models listing endpoint.
const PROBE_TIMEOUT_SECS: u64 = 3;

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    stream: bool,
}

#[derive(Debug, Serialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ChatResponseMessage {
    #[serde(default)]
    content: String,
}

/// Adapter for OpenAI-compatible chat endpoints.
pub struct HttpAdapter {
    base_url: String,
    model: String,
    api_key_env: Option<String>,
    client: reqwest::Client,
}

impl HttpAdapter {
    pub fn new(base_url: &str, model: &str, api_key_env: Option<&str>) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.to_string(),
            api_key_env: api_key_env.map(String::from),
            client: reqwest::Client::builder()
                .connect_timeout(Duration::from_secs(CONNECT_TIMEOUT_SECS))
                .build()
                .unwrap_or_else(|_| reqwest::Client::new()),
        }
    }

    fn api_key(&self) -> Option<String> {
        self.api_key_env
            .as_deref()
            .and_then(|var| std::env::var(var).ok())
            .filter(|k| !k.is_empty())
    }
}

#[async_trait]
impl BackendAdapter for HttpAdapter {
    async fn health(&self) -> bool {
        // Keyed endpoints: credential presence is the contract. Keyless
        // (local) endpoints: probe the models listing.
        if self.api_key_env.is_some() {
            return self.api_key().is_some();
        }
        let url = format!("{}/models", self.base_url);
        match self
            .client
            .get(&url)
            .timeout(Duration::from_secs(PROBE_TIMEOUT_SECS))
            .send()
            .await
        {
            Ok(resp) => resp.status().is_success(),
            Err(_) => false,
        }
    }

    async fn invoke(&self, prompt: &str) -> anyhow::Result<String> {
        let url = format!("{}/chat/completions", self.base_url);
        let body = ChatRequest {
            model: self.model.clone(),
            messages: vec![ChatMessage {
                role: "user".to_string(),
                content: prompt.to_string(),
            }],
            stream: false,
        };

        let mut req = self.client.post(&url).json(&body);
        if let Some(key) = self.api_key() {
            req = req.bearer_auth(key);
        }

        let resp = req.send().await?;
        if !resp.status().is_success() {
            anyhow::bail!("endpoint returned status {}", resp.status());
        }

        let chat: ChatResponse = resp.json().await?;
        let content = chat
            .choices
            .first()
            .map(|c| c.message.content.trim().to_string())
            .unwrap_or_default();
        Ok(content)
    }

    fn describe(&self) -> String {
        format!("http {} ({})", self.base_url, self.model)
    }
}
