//! # Ledger-Backed Deployment
//!
//! In this deployment writes are ordered and persisted by a permissioned ledger instead of the
//! local database. Calls go through a [`LedgerClient`], which picks evaluate or submit from the
//! method table, retries within a wall-clock budget and reconciles single-asset creates that
//! conflict right after a timeout.
//!
//! Connections are pooled one per organization identity ([`LedgerPool`]); each has a dedicated
//! worker consuming its request queue in order.

pub mod client;
pub mod pool;
pub mod retry;
pub mod transport;

pub use client::LedgerClient;
pub use pool::{LedgerPool, LedgerWorkerHandle};
pub use retry::{
    predicate_for, ErrorKindPredicate, LegacyMessagePredicate, RetryPolicy, RetryPredicate,
    RetryState,
};
pub use transport::{CallMode, LedgerCallError, LedgerCallResult, LedgerConnector, LedgerTransport};
