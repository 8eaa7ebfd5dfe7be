//! Domain error types for modelgate.
//!
//! Routing never surfaces these to a caller as a hard failure — every path
//! through `route()` and `execute()` resolves to a `RouteResult` or a
//! degraded dispatch outcome. The taxonomy exists so fallback handling and
//! audit lines can pattern-match on what went wrong instead of parsing
//! strings.

use thiserror::Error;

/// Failure reasons observed while routing or dispatching a task.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RouteError {
    /// The safety gate intercepted the message (secrets, malformed size).
    #[error("gate blocked: {0}")]
    GateBlocked(String),

    /// Classifier confidence was below the dispatch floor.
    #[error("ambiguous intent (confidence {confidence:.2} < {floor:.2})")]
    AmbiguousIntent { confidence: f64, floor: f64 },

    /// Backend failed its health or rate check.
    #[error("backend '{0}' unavailable")]
    BackendUnavailable(String),

    /// Backend did not answer within the dispatch timeout.
    #[error("backend '{backend}' timed out after {timeout_secs}s")]
    BackendTimeout { backend: String, timeout_secs: u64 },

    /// Backend answered with an empty body.
    #[error("backend '{0}' returned an empty response")]
    BackendEmptyResponse(String),

    /// The output validator refused the returned text.
    #[error("validation blocked: {0}")]
    ValidationBlocked(String),

    /// Primary and every fallback candidate failed or was unavailable.
    #[error("all external backends exhausted")]
    AllBackendsExhausted,
}

impl RouteError {
    /// Short status tag for audit log lines.
    pub fn tag(&self) -> &'static str {
        match self {
            Self::GateBlocked(_) => "gate_blocked",
            Self::AmbiguousIntent { .. } => "ambiguous",
            Self::BackendUnavailable(_) => "unavailable",
            Self::BackendTimeout { .. } => "timeout",
            Self::BackendEmptyResponse(_) => "empty_response",
            Self::ValidationBlocked(_) => "validation_blocked",
            Self::AllBackendsExhausted => "exhausted",
        }
    }

    /// Whether the dispatcher should advance to the next fallback candidate.
    ///
    /// Gate and ambiguity outcomes already resolved to the trusted backend;
    /// only per-backend dispatch failures are retryable.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::BackendUnavailable(_)
                | Self::BackendTimeout { .. }
                | Self::BackendEmptyResponse(_)
        )
    }
}
