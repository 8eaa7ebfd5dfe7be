//! modelgate — trust-tiered task routing for LLM backends.
//!
//! One always-available trusted backend, a small fleet of rate-limited
//! secondaries, keyword-driven routing with fallback chains, and output
//! validation before any returned text is trusted.

pub mod adapters;
pub mod audit;
pub mod budget;
pub mod classify;
pub mod cleaner;
pub mod cli;
pub mod config;
pub mod confidence;
pub mod dispatch;
pub mod errors;
pub mod gate;
pub mod ledger;
pub mod registry;
pub mod router;
pub mod validate;
