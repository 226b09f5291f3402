//! # Structured Logging Module
//!
//! Environment-aware console logging using the tracing ecosystem, plus structured helpers for
//! the operations operators most often need to correlate (transaction outcomes, dispatch
//! failures, ledger reconciliations).

use chrono::Utc;
use std::io::IsTerminal;
use std::sync::OnceLock;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

static LOGGER_INITIALIZED: OnceLock<()> = OnceLock::new();

/// Initialize structured logging with environment-specific configuration.
///
/// `RUST_LOG` wins over the environment-derived default level. Set
/// `ORCHESTRATOR_LOG_FORMAT=json` for one JSON object per line.
pub fn init_structured_logging() {
    LOGGER_INITIALIZED.get_or_init(|| {
        let environment = get_environment();
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(get_log_level(&environment)));
        let json = std::env::var("ORCHESTRATOR_LOG_FORMAT")
            .map(|v| v.eq_ignore_ascii_case("json"))
            .unwrap_or(false);

        let layer = if json {
            fmt::layer()
                .with_target(true)
                .with_thread_ids(true)
                .json()
                .with_filter(filter)
                .boxed()
        } else {
            fmt::layer()
                .with_target(true)
                .with_thread_ids(true)
                .with_ansi(std::io::stdout().is_terminal())
                .with_filter(filter)
                .boxed()
        };

        // A host process may already own the global subscriber
        if tracing_subscriber::registry().with(layer).try_init().is_err() {
            tracing::debug!("Global tracing subscriber already initialized - keeping it");
        }

        tracing::info!(
            pid = std::process::id(),
            environment = %environment,
            json = json,
            "🔧 STRUCTURED LOGGING: Initialized"
        );
    });
}

/// Current environment from environment variables
fn get_environment() -> String {
    std::env::var("ORCHESTRATOR_ENV")
        .or_else(|_| std::env::var("APP_ENV"))
        .unwrap_or_else(|_| "development".to_string())
}

/// Default log level for an environment
fn get_log_level(environment: &str) -> String {
    match environment {
        "production" => "info".to_string(),
        _ => "debug".to_string(),
    }
}

/// Log the outcome of one unit of work
pub fn log_transaction_outcome(
    method: &str,
    channel: &str,
    outcome: &str,
    events: usize,
    duration_ms: u64,
    details: Option<&str>,
) {
    tracing::info!(
        method = %method,
        channel = %channel,
        outcome = %outcome,
        events = events,
        duration_ms = duration_ms,
        details = details,
        timestamp = %Utc::now().to_rfc3339(),
        "💾 TRANSACTION"
    );
}

/// Log a committed write whose events did not reach the delivery session
pub fn log_dispatch_failure(method: &str, channel: &str, events: usize, error: &str) {
    tracing::error!(
        method = %method,
        channel = %channel,
        events = events,
        error = %error,
        timestamp = %Utc::now().to_rfc3339(),
        "📭 DISPATCH_FAILURE: write committed, events not dispatched"
    );
}

/// Log a post-timeout conflict that was turned into a success
pub fn log_reconciliation(method: &str, asset_key: &str, attempts: u32) {
    tracing::warn!(
        method = %method,
        asset_key = %asset_key,
        attempts = attempts,
        timestamp = %Utc::now().to_rfc3339(),
        "🔁 RECONCILIATION: conflict after timeout, asset already on ledger"
    );
}
