//! # Transactional Store
//!
//! The contract the unit-of-work coordinator needs from persistent storage: open a transaction
//! whose isolation matches the request's method kind, journal the request's events inside it,
//! then commit or roll back.
//!
//! - Read-write transactions run SERIALIZABLE
//! - Read-only transactions run REPEATABLE READ READ ONLY (a snapshot)
//!
//! [`PgStore`] is the PostgreSQL implementation; [`MemoryStore`] keeps everything in process for
//! isolated execution.

pub mod error_codes;
pub mod memory;
pub mod postgres;

pub use memory::{MemoryStore, MemoryTransaction};
pub use postgres::{PgStore, PgTransaction};

use crate::classifier::MethodKind;
use crate::error::OrchestratorResult;
use crate::events::Event;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionMode {
    ReadOnly,
    ReadWrite,
}

impl TransactionMode {
    pub fn is_read_only(&self) -> bool {
        matches!(self, TransactionMode::ReadOnly)
    }

    /// Statement setting the isolation level; must be the first statement of the transaction
    pub fn isolation_statement(&self) -> &'static str {
        match self {
            TransactionMode::ReadWrite => "SET TRANSACTION ISOLATION LEVEL SERIALIZABLE",
            TransactionMode::ReadOnly => {
                "SET TRANSACTION ISOLATION LEVEL REPEATABLE READ READ ONLY"
            }
        }
    }
}

impl From<MethodKind> for TransactionMode {
    fn from(kind: MethodKind) -> Self {
        match kind {
            MethodKind::ReadOnly => TransactionMode::ReadOnly,
            MethodKind::ReadWrite => TransactionMode::ReadWrite,
        }
    }
}

impl fmt::Display for TransactionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransactionMode::ReadOnly => write!(f, "read_only"),
            TransactionMode::ReadWrite => write!(f, "read_write"),
        }
    }
}

#[async_trait]
pub trait TransactionalStore: Send + Sync + 'static {
    type Transaction: StoreTransaction;

    async fn begin(&self, mode: TransactionMode) -> OrchestratorResult<Self::Transaction>;

    /// Release connections at shutdown
    async fn close(&self) {}
}

/// An open transaction, exclusively owned by one request
#[async_trait]
pub trait StoreTransaction: Send + 'static {
    fn mode(&self) -> TransactionMode;

    /// Persist the request's events as part of this transaction
    async fn record_events(&mut self, events: &[Event]) -> OrchestratorResult<()>;

    async fn commit(self) -> OrchestratorResult<()>;

    async fn rollback(self) -> OrchestratorResult<()>;
}
