//! # Error Taxonomy
//!
//! Every failure surfaced to a caller is one of a small set of kinds. Storage, broker and
//! ledger internals are mapped onto these kinds at the boundary where they occur, so callers
//! never see driver-specific errors.
//!
//! Errors that cross the ledger process boundary travel as an [`ErrorStatus`] JSON document
//! (`{"kind": "...", "message": "..."}`), which decodes back into the same kind. Strings that
//! do not decode (older peers, raw SDK messages) go through [`classify_message`], the
//! substring classifier kept for compatibility.

use crate::config::ConfigurationError;
use crate::messaging::MessagingError;
use crate::store::error_codes::PgErrorCode;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Kind of failure, independent of its representation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Caller input is malformed
    Validation,
    /// Unique-key violation or double creation
    Conflict,
    /// Caller lacks rights for the action
    PermissionDenied,
    /// Referenced asset is absent
    NotFound,
    /// Action is invalid for the asset's current state
    IncompatibleState,
    /// Network or gateway failure, including timeouts
    Transient,
    /// Unexpected or storage failure
    Internal,
}

impl ErrorKind {
    pub const ALL: [ErrorKind; 7] = [
        ErrorKind::Validation,
        ErrorKind::Conflict,
        ErrorKind::PermissionDenied,
        ErrorKind::NotFound,
        ErrorKind::IncompatibleState,
        ErrorKind::Transient,
        ErrorKind::Internal,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Validation => "validation",
            ErrorKind::Conflict => "conflict",
            ErrorKind::PermissionDenied => "permission_denied",
            ErrorKind::NotFound => "not_found",
            ErrorKind::IncompatibleState => "incompatible_state",
            ErrorKind::Transient => "transient",
            ErrorKind::Internal => "internal",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ErrorKind {
    type Err = OrchestratorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ErrorKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| OrchestratorError::internal(format!("unknown error kind '{s}'")))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OrchestratorError {
    #[error("validation error: {0}")]
    Validation(String),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("permission denied: {0}")]
    PermissionDenied(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("incompatible state: {0}")]
    IncompatibleState(String),
    /// A call that gave up waiting on the network or a gateway
    #[error("timeout: {operation} timed out: {message}")]
    Timeout { operation: String, message: String },
    #[error("transient error: {0}")]
    Transient(String),
    #[error("internal error: {0}")]
    Internal(String),
}

impl OrchestratorError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::Conflict(message.into())
    }

    pub fn permission_denied(message: impl Into<String>) -> Self {
        Self::PermissionDenied(message.into())
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound(message.into())
    }

    pub fn incompatible_state(message: impl Into<String>) -> Self {
        Self::IncompatibleState(message.into())
    }

    pub fn timeout(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Timeout {
            operation: operation.into(),
            message: message.into(),
        }
    }

    pub fn transient(message: impl Into<String>) -> Self {
        Self::Transient(message.into())
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Build an error of the given kind
    pub fn from_kind(kind: ErrorKind, message: impl Into<String>) -> Self {
        let message = message.into();
        match kind {
            ErrorKind::Validation => Self::Validation(message),
            ErrorKind::Conflict => Self::Conflict(message),
            ErrorKind::PermissionDenied => Self::PermissionDenied(message),
            ErrorKind::NotFound => Self::NotFound(message),
            ErrorKind::IncompatibleState => Self::IncompatibleState(message),
            ErrorKind::Transient => Self::Transient(message),
            ErrorKind::Internal => Self::Internal(message),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation(_) => ErrorKind::Validation,
            Self::Conflict(_) => ErrorKind::Conflict,
            Self::PermissionDenied(_) => ErrorKind::PermissionDenied,
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::IncompatibleState(_) => ErrorKind::IncompatibleState,
            Self::Timeout { .. } | Self::Transient(_) => ErrorKind::Transient,
            Self::Internal(_) => ErrorKind::Internal,
        }
    }

    /// The detail message without the kind prefix
    pub fn message(&self) -> &str {
        match self {
            Self::Validation(m)
            | Self::Conflict(m)
            | Self::PermissionDenied(m)
            | Self::NotFound(m)
            | Self::IncompatibleState(m)
            | Self::Transient(m)
            | Self::Internal(m) => m,
            Self::Timeout { message, .. } => message,
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict(_))
    }

    /// Encode for transport across a process boundary
    pub fn to_status(&self) -> ErrorStatus {
        ErrorStatus {
            kind: self.kind(),
            message: self.message().to_string(),
        }
    }

    /// Decode an error string received from a remote peer.
    ///
    /// Structured [`ErrorStatus`] payloads keep their kind; anything else is classified
    /// by [`classify_message`].
    pub fn from_remote(raw: &str) -> Self {
        match ErrorStatus::decode(raw) {
            Some(status) => Self::from_kind(status.kind, status.message),
            None => Self::from_kind(classify_message(raw), raw),
        }
    }
}

/// Wire form of an error crossing a process boundary
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorStatus {
    pub kind: ErrorKind,
    pub message: String,
}

impl ErrorStatus {
    pub fn encode(&self) -> String {
        // A struct of an enum and a string always serializes
        serde_json::to_string(self).unwrap_or_else(|_| self.message.clone())
    }

    pub fn decode(raw: &str) -> Option<Self> {
        serde_json::from_str(raw.trim()).ok()
    }
}

/// Legacy substring classifier for error strings from peers that do not send [`ErrorStatus`].
///
/// Our own `Display` prefixes are matched first so that an [`OrchestratorError`] rendered to
/// text classifies back to its own kind.
pub fn classify_message(message: &str) -> ErrorKind {
    let lowered = message.trim().to_ascii_lowercase();

    const PREFIXES: [(&str, ErrorKind); 8] = [
        ("validation error:", ErrorKind::Validation),
        ("conflict:", ErrorKind::Conflict),
        ("permission denied:", ErrorKind::PermissionDenied),
        ("not found:", ErrorKind::NotFound),
        ("incompatible state:", ErrorKind::IncompatibleState),
        ("timeout:", ErrorKind::Transient),
        ("transient error:", ErrorKind::Transient),
        ("internal error:", ErrorKind::Internal),
    ];
    if let Some((_, kind)) = PREFIXES
        .iter()
        .find(|(prefix, _)| lowered.starts_with(prefix))
    {
        return *kind;
    }

    // Read-conflict markers must win over the generic "conflict" substring
    const TRANSIENT: [&str; 7] = [
        "timeout",
        "timed out",
        "deadline exceeded",
        "unavailable",
        "connection reset",
        "mvcc_read_conflict",
        "phantom_read_conflict",
    ];
    if TRANSIENT.iter().any(|needle| lowered.contains(needle)) {
        return ErrorKind::Transient;
    }
    if lowered.contains("already exists") || lowered.contains("conflict") {
        return ErrorKind::Conflict;
    }
    if lowered.contains("permission denied") || lowered.contains("unauthorized") {
        return ErrorKind::PermissionDenied;
    }
    if lowered.contains("not found") {
        return ErrorKind::NotFound;
    }
    if lowered.contains("incompatible") {
        return ErrorKind::IncompatibleState;
    }
    if lowered.contains("invalid") || lowered.contains("validation") {
        return ErrorKind::Validation;
    }
    ErrorKind::Internal
}

impl From<sqlx::Error> for OrchestratorError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::RowNotFound => OrchestratorError::not_found("no rows found"),
            sqlx::Error::Database(db_err) => match db_err.code() {
                Some(code) if PgErrorCode::is_unique_violation(&code) => {
                    OrchestratorError::conflict(db_err.message().to_string())
                }
                Some(code) if PgErrorCode::is_foreign_key_violation(&code) => {
                    OrchestratorError::not_found(db_err.message().to_string())
                }
                Some(code) if PgErrorCode::is_retryable_transaction_error(&code) => {
                    OrchestratorError::transient(db_err.message().to_string())
                }
                _ => OrchestratorError::internal(format!("database: {}", db_err.message())),
            },
            sqlx::Error::PoolTimedOut => {
                OrchestratorError::timeout("database_pool", "timed out acquiring a connection")
            }
            sqlx::Error::Io(_) | sqlx::Error::PoolClosed => {
                OrchestratorError::transient(format!("database unavailable: {err}"))
            }
            _ => OrchestratorError::internal(format!("database: {err}")),
        }
    }
}

impl From<serde_json::Error> for OrchestratorError {
    fn from(error: serde_json::Error) -> Self {
        OrchestratorError::internal(format!("JSON serialization error: {error}"))
    }
}

impl From<ConfigurationError> for OrchestratorError {
    fn from(error: ConfigurationError) -> Self {
        OrchestratorError::validation(format!("configuration: {error}"))
    }
}

impl From<MessagingError> for OrchestratorError {
    fn from(error: MessagingError) -> Self {
        OrchestratorError::transient(format!("event delivery: {error}"))
    }
}

pub type OrchestratorResult<T> = std::result::Result<T, OrchestratorError>;
