//! # Metrics
//!
//! OpenTelemetry instruments for the consistency core, recorded through the global meter
//! provider. Installing an exporter is left to the hosting process; without one the
//! instruments are no-ops.
//!
//! ```rust
//! use asset_orchestrator::metrics;
//! use opentelemetry::KeyValue;
//!
//! metrics::transactions_total().add(
//!     1,
//!     &[
//!         KeyValue::new("method", "/orchestrator.ModelService/RegisterModel"),
//!         KeyValue::new("outcome", "commit"),
//!     ],
//! );
//! ```

use opentelemetry::metrics::{Counter, Meter};
use opentelemetry::KeyValue;
use std::sync::OnceLock;

static METER: OnceLock<Meter> = OnceLock::new();

fn meter() -> &'static Meter {
    METER.get_or_init(|| opentelemetry::global::meter("asset-orchestrator"))
}

/// Transactions finished by the unit-of-work coordinator
///
/// Labels:
/// - method: fully-qualified RPC method
/// - outcome: commit, rollback
pub fn transactions_total() -> Counter<u64> {
    meter()
        .u64_counter("orchestrator.transactions.total")
        .with_description("Transactions finished, by method and outcome")
        .build()
}

/// Events handed to the delivery session after commit
///
/// Labels:
/// - channel: tenant channel (also the routing key)
pub fn events_dispatched_total() -> Counter<u64> {
    meter()
        .u64_counter("orchestrator.events.dispatched.total")
        .with_description("Events handed to the delivery session after commit")
        .build()
}

/// Committed requests whose events could not be handed to the delivery session
///
/// Labels:
/// - channel
pub fn event_dispatch_failures_total() -> Counter<u64> {
    meter()
        .u64_counter("orchestrator.events.dispatch_failures.total")
        .with_description("Committed requests whose events were not dispatched")
        .build()
}

/// Payloads re-published after a missing ack, a nack or a publish error
pub fn messages_republished_total() -> Counter<u64> {
    meter()
        .u64_counter("orchestrator.messages.republished.total")
        .with_description("Payloads re-published by the delivery session")
        .build()
}

/// Broker reconnections performed by the delivery session
pub fn broker_reconnects_total() -> Counter<u64> {
    meter()
        .u64_counter("orchestrator.broker.reconnects.total")
        .with_description("Broker reconnections performed by the delivery session")
        .build()
}

/// Ledger call retries
///
/// Labels:
/// - method
pub fn ledger_retries_total() -> Counter<u64> {
    meter()
        .u64_counter("orchestrator.ledger.retries.total")
        .with_description("Ledger calls re-issued by the retry policy")
        .build()
}

/// Conflicts after a timeout converted into success
///
/// Labels:
/// - method
pub fn ledger_reconciliations_total() -> Counter<u64> {
    meter()
        .u64_counter("orchestrator.ledger.reconciliations.total")
        .with_description("Post-timeout conflicts reconciled by re-reading the asset")
        .build()
}

pub(crate) fn method_outcome(method: &str, outcome: &'static str) -> [KeyValue; 2] {
    [
        KeyValue::new("method", method.to_string()),
        KeyValue::new("outcome", outcome),
    ]
}
