//! Dispatch execution: run the routed backend, walk the chain on failure.
//!
//! The trusted backend is never called from here — it handles tasks
//! natively outside this subsystem, so its result is a queued sentinel.
//! Secondary dispatch wraps every adapter call in a hard timeout; timeout,
//! error, and empty response all advance the fallback chain. Dropping the
//! in-flight future on timeout aborts the underlying request or kills the
//! child process, so moving on is immediate.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;

use crate::adapters::{self, BackendAdapter};
use crate::audit::AuditLog;
use crate::errors::RouteError;
use crate::ledger::RateTracker;
use crate::registry::{AdapterKind, ModelRegistry};
use crate::router::RouteResult;

/// Appended once to every outbound prompt so heterogeneous backends answer
/// in a consistent register.
const STYLE_SUFFIX: &str =
    "\n\nAnswer in plain prose. No markdown decoration, no preamble, no self-commentary.";

/// Builds adapters for dispatch. Injected so tests can script backend
/// behavior.
pub trait AdapterFactory: Send + Sync {
    fn build(&self, kind: &AdapterKind) -> Box<dyn BackendAdapter>;
}

/// Production factory backed by the real HTTP/command adapters.
pub struct RealAdapters;

impl AdapterFactory for RealAdapters {
    fn build(&self, kind: &AdapterKind) -> Box<dyn BackendAdapter> {
        adapters::create_adapter(kind)
    }
}

/// What the dispatcher produced for one request.
#[derive(Debug, Clone)]
pub struct DispatchOutcome {
    /// Raw backend text, or the queued sentinel for the trusted lane.
    pub text: String,
    /// Backend that produced the text (or was queued for).
    pub backend: String,
    /// True when no external call was made and the task waits on the
    /// trusted backend.
    pub queued: bool,
    /// True when the answering backend was not the originally chosen one.
    pub fallback_used: bool,
    /// Backends that were tried and failed, in order.
    pub failed: Vec<String>,
}

/// Timeout-guarded executor over the fallback chain.
pub struct Dispatcher {
    registry: Arc<ModelRegistry>,
    tracker: RateTracker,
    factory: Box<dyn AdapterFactory>,
    audit: AuditLog,
    timeout_secs: u64,
}

impl Dispatcher {
    pub fn new(
        registry: Arc<ModelRegistry>,
        tracker: RateTracker,
        factory: Box<dyn AdapterFactory>,
        audit: AuditLog,
        timeout_secs: u64,
    ) -> Self {
        Self {
            registry,
            tracker,
            factory,
            audit,
            timeout_secs,
        }
    }

    pub fn tracker(&self) -> &RateTracker {
        &self.tracker
    }

    fn queued_outcome(&self, backend: &str, reason: &str, failed: Vec<String>) -> DispatchOutcome {
        DispatchOutcome {
            text: format!("[queued:{backend}] {reason}"),
            backend: backend.to_string(),
            queued: true,
            fallback_used: !failed.is_empty(),
            failed,
        }
    }

    /// Try one secondary backend. Returns the response text or the failure
    /// that should advance the chain.
    async fn try_backend(
        &self,
        name: &str,
        kind: &AdapterKind,
        prompt: &str,
    ) -> Result<String, RouteError> {
        if let Err(e) = self.tracker.record_call(name, Utc::now()) {
            tracing::warn!(backend = name, "ledger write failed: {e}");
        }

        let adapter = self.factory.build(kind);
        match tokio::time::timeout(
            Duration::from_secs(self.timeout_secs),
            adapter.invoke(prompt),
        )
        .await
        {
            Err(_) => Err(RouteError::BackendTimeout {
                backend: name.to_string(),
                timeout_secs: self.timeout_secs,
            }),
            Ok(Err(e)) => {
                tracing::warn!(backend = name, "adapter error: {e}");
                Err(RouteError::BackendUnavailable(name.to_string()))
            }
            Ok(Ok(text)) if text.trim().is_empty() => {
                Err(RouteError::BackendEmptyResponse(name.to_string()))
            }
            Ok(Ok(text)) => Ok(text),
        }
    }

    /// Execute a routing decision. Never errors: exhaustion degrades to
    /// the trusted-queued sentinel.
    pub async fn execute(&self, route: &RouteResult, message: &str) -> DispatchOutcome {
        // Trusted lane: no call is made at all.
        if route.adapter.is_none() {
            self.audit
                .record("queued", &format!("{}: {}", route.backend, route.reason));
            return self.queued_outcome(&route.backend, &route.reason, Vec::new());
        }

        let prompt = format!("{message}{STYLE_SUFFIX}");
        let mut failed: Vec<String> = Vec::new();

        let candidates: Vec<String> = std::iter::once(route.backend.clone())
            .chain(route.fallback_chain.iter().cloned())
            .collect();

        for (i, name) in candidates.iter().enumerate() {
            let Some(def) = self.registry.get(name) else {
                continue;
            };
            let Some(kind) = def.adapter.as_ref() else {
                continue;
            };

            // The router vetted the primary; chain entries are re-checked
            // at the moment they are reached.
            if i > 0 {
                let adapter = self.factory.build(kind);
                if !adapter.health().await
                    || !self.tracker.check_rate_limit(def, Utc::now())
                {
                    self.audit
                        .record("unavailable", &format!("{name}: skipped in chain"));
                    failed.push(name.clone());
                    continue;
                }
            }

            match self.try_backend(name, kind, &prompt).await {
                Ok(text) => {
                    self.audit.record(
                        "dispatched",
                        &format!("{name}{}", if i > 0 { " (fallback)" } else { "" }),
                    );
                    return DispatchOutcome {
                        text,
                        backend: name.clone(),
                        queued: false,
                        fallback_used: i > 0,
                        failed,
                    };
                }
                Err(e) => {
                    self.audit.record(e.tag(), &e.to_string());
                    tracing::info!(backend = name.as_str(), "dispatch failed, advancing: {e}");
                    failed.push(name.clone());
                }
            }
        }

        // Chain exhausted — degrade, never crash.
        let trusted = self.registry.trusted().name.clone();
        self.audit.record(
            RouteError::AllBackendsExhausted.tag(),
            &format!("degrading to {trusted}"),
        );
        self.queued_outcome(
            &trusted,
            "all external backends failed, task queued for trusted backend",
            failed,
        )
    }
}
