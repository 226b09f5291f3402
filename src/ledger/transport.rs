//! Ledger transport contract.
//!
//! A transport performs one call against the ledger gateway in one of two modes. Errors come
//! back as [`LedgerCallError`]: a locally observed timeout, or the raw error string the remote
//! side returned, which is the only thing that crosses the process boundary.

use crate::classifier::MethodKind;
use crate::error::OrchestratorError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// How a call reaches the ledger
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallMode {
    /// Executed against a peer's state without ordering or writing
    Evaluate,
    /// Endorsed, ordered and committed to the ledger
    Submit,
}

impl From<MethodKind> for CallMode {
    fn from(kind: MethodKind) -> Self {
        match kind {
            MethodKind::ReadOnly => CallMode::Evaluate,
            MethodKind::ReadWrite => CallMode::Submit,
        }
    }
}

impl fmt::Display for CallMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CallMode::Evaluate => f.write_str("evaluate"),
            CallMode::Submit => f.write_str("submit"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LedgerCallError {
    /// The gateway did not answer in time; the call may still have executed
    #[error("ledger call timed out: {0}")]
    Timeout(String),
    /// The remote side failed the call; the payload is its error string
    #[error("{0}")]
    Remote(String),
    /// The call never reached the gateway
    #[error("ledger unavailable: {0}")]
    Unavailable(String),
}

impl LedgerCallError {
    /// Map onto the error taxonomy. Remote strings are decoded as [`crate::error::ErrorStatus`]
    /// documents, with the legacy classifier as fallback.
    pub fn into_error(self, method: &str) -> OrchestratorError {
        match self {
            LedgerCallError::Timeout(message) => OrchestratorError::timeout(method, message),
            LedgerCallError::Remote(raw) => OrchestratorError::from_remote(&raw),
            LedgerCallError::Unavailable(message) => OrchestratorError::transient(message),
        }
    }
}

pub type LedgerCallResult = Result<Vec<u8>, LedgerCallError>;

#[async_trait]
pub trait LedgerTransport: Send + Sync {
    async fn call(&self, mode: CallMode, method: &str, payload: &[u8]) -> LedgerCallResult;
}

/// Opens a transport for one organization identity
#[async_trait]
pub trait LedgerConnector: Send + Sync + 'static {
    async fn connect(&self, organization: &str) -> Result<Arc<dyn LedgerTransport>, LedgerCallError>;
}
