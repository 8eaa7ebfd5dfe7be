//! CLI surface: route-and-dispatch plus the operator inspection commands.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use chrono::Utc;
use clap::Parser;

use crate::audit::AuditLog;
use crate::adapters::create_adapter;
use crate::cleaner;
use crate::confidence;
use crate::config::Config;
use crate::dispatch::{Dispatcher, RealAdapters};
use crate::ledger::{FileLedger, RateTracker, WINDOW_SECS};
use crate::registry::ModelRegistry;
use crate::router::{AdapterHealth, Router};
use crate::validate;

#[derive(Debug, Parser)]
#[command(
    name = "modelgate",
    version,
    about = "Route a task to the right LLM backend, with rate limits, fallback, and output validation"
)]
pub struct Cli {
    /// The task message to route.
    pub message: Option<String>,

    /// Task message (alternative to the positional argument).
    #[arg(short = 'p', long)]
    pub prompt: Option<String>,

    /// Print the routing decision without dispatching.
    #[arg(long)]
    pub dry_run: bool,

    /// Verbose logging.
    #[arg(short, long)]
    pub verbose: bool,

    /// Bypass routing and force a specific backend.
    #[arg(long, value_name = "NAME")]
    pub model: Option<String>,

    /// Print per-backend health and rate status.
    #[arg(long)]
    pub health: bool,

    /// Print current sliding-window call counts.
    #[arg(long)]
    pub rates: bool,

    /// Run the confidence scorer on the given text and exit.
    #[arg(long, value_name = "TEXT")]
    pub score: Option<String>,

    /// Validation task type (built-ins: code, file_analysis, count) or a
    /// profile name.
    #[arg(long, value_name = "TYPE", default_value = "general")]
    pub task_type: String,

    /// Config file path (default: ~/.modelgate/config.toml).
    #[arg(long, value_name = "PATH")]
    pub config: Option<PathBuf>,
}

impl Cli {
    fn message_text(&self) -> Option<&str> {
        self.message.as_deref().or(self.prompt.as_deref())
    }
}

/// Entry point called from `main` after logging is initialized.
pub async fn run(cli: Cli) -> Result<()> {
    // Standalone scorer needs no state at all.
    if let Some(text) = &cli.score {
        println!("{}", confidence::score(text));
        return Ok(());
    }

    let config = Config::load(cli.config.as_deref())?;
    let registry = Arc::new(ModelRegistry::new(config.backends.clone())?);

    if cli.health {
        return print_health(&registry, &config).await;
    }
    if cli.rates {
        return print_rates(&registry, &config);
    }

    let Some(message) = cli.message_text() else {
        anyhow::bail!("no task message given; pass it as an argument or with --prompt");
    };

    let store = Arc::new(FileLedger::new(&config.rates_path())?);
    let tracker = RateTracker::new(store.clone());
    let audit = if cli.dry_run {
        AuditLog::disabled()
    } else {
        AuditLog::new(config.audit_path())
    };

    let router = Router::new(
        registry.clone(),
        tracker,
        Box::new(AdapterHealth),
        audit,
        config.budget_path(),
        config.confidential_terms.clone(),
    );

    // Forced backend bypasses routing entirely.
    let route = if let Some(name) = &cli.model {
        match router.force(name) {
            Ok(route) => route,
            Err(e) => {
                println!("[ERROR] {e}");
                return Ok(());
            }
        }
    } else {
        router.route(message).await
    };

    if cli.dry_run {
        println!("{}", serde_json::to_string_pretty(&route)?);
        return Ok(());
    }

    let dispatcher = Dispatcher::new(
        registry.clone(),
        RateTracker::new(store),
        Box::new(RealAdapters),
        AuditLog::new(config.audit_path()),
        config.dispatch_timeout_secs,
    );
    let outcome = dispatcher.execute(&route, message).await;

    if outcome.queued {
        if cli.model.is_some() && !outcome.failed.is_empty() {
            println!("[ERROR] {}: dispatch failed, task queued instead", outcome.backend);
        }
        println!("{}", outcome.text);
        return Ok(());
    }

    let cleaned = cleaner::clean(&outcome.text);
    let report = validate::validate(&cleaned, &cli.task_type, &config.profiles_dir());
    if report.blocked {
        // Blocked output is discarded entirely; only the warnings surface.
        println!("[blocked] backend output failed validation:");
        for warning in &report.warnings {
            println!("  - {warning}");
        }
        return Ok(());
    }
    for warning in &report.warnings {
        tracing::warn!("validation: {warning}");
    }

    let (annotated, score) = confidence::annotate(&cleaned);
    tracing::debug!(backend = %outcome.backend, score, "dispatch complete");
    println!("{annotated}");
    Ok(())
}

async fn print_health(registry: &ModelRegistry, config: &Config) -> Result<()> {
    let store = Arc::new(FileLedger::new(&config.rates_path())?);
    let tracker = RateTracker::new(store);
    let now = Utc::now();

    for def in registry.all() {
        let (healthy, via) = match &def.adapter {
            None => (true, "native".to_string()),
            Some(kind) => {
                let adapter = create_adapter(kind);
                (adapter.health().await, adapter.describe())
            }
        };
        let rate = if tracker.check_rate_limit(def, now) {
            "within limit"
        } else {
            "rate limited"
        };
        println!(
            "{:<10} tier {}  {}  {}  [{}]",
            def.name,
            def.tier,
            if healthy { "healthy  " } else { "unhealthy" },
            rate,
            via,
        );
    }
    Ok(())
}

fn print_rates(registry: &ModelRegistry, config: &Config) -> Result<()> {
    let store = FileLedger::new(&config.rates_path())?;
    let state = crate::ledger::LedgerStore::snapshot(&store)?;
    let now = Utc::now();

    for def in registry.all() {
        let active = state.active_count(&def.name, now);
        match def.rpm_limit {
            Some(limit) => println!(
                "{:<10} {:>3}/{} calls in the last {}s (headroom {})",
                def.name, active, limit, WINDOW_SECS, def.headroom
            ),
            None => println!(
                "{:<10} {:>3} calls in the last {}s (unlimited)",
                def.name, active, WINDOW_SECS
            ),
        }
    }
    if let Some(last) = state.last_model {
        println!("last backend: {last}");
    }
    Ok(())
}
