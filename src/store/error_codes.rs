//! PostgreSQL SQLSTATE codes the store maps onto the error taxonomy.
//!
//! Full list: <https://www.postgresql.org/docs/current/errcodes-appendix.html>

/// PostgreSQL SQLSTATE error codes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PgErrorCode;

impl PgErrorCode {
    /// Unique violation (duplicate key) - Code 23505
    ///
    /// Raised when an asset is registered twice under the same key.
    pub const UNIQUE_VIOLATION: &'static str = "23505";

    /// Foreign key violation - Code 23503
    ///
    /// Raised when an asset references a parent that does not exist.
    pub const FOREIGN_KEY_VIOLATION: &'static str = "23503";

    /// Serialization failure - Code 40001
    ///
    /// Raised under SERIALIZABLE isolation when concurrent transactions cannot be ordered.
    pub const SERIALIZATION_FAILURE: &'static str = "40001";

    /// Deadlock detected - Code 40P01
    pub const DEADLOCK_DETECTED: &'static str = "40P01";

    /// Read-only transaction attempted a write - Code 25006
    pub const READ_ONLY_SQL_TRANSACTION: &'static str = "25006";

    #[inline]
    pub fn is_unique_violation(code: &str) -> bool {
        code == Self::UNIQUE_VIOLATION
    }

    #[inline]
    pub fn is_foreign_key_violation(code: &str) -> bool {
        code == Self::FOREIGN_KEY_VIOLATION
    }

    /// Serialization failure or deadlock: the whole transaction may be replayed
    #[inline]
    pub fn is_retryable_transaction_error(code: &str) -> bool {
        code == Self::SERIALIZATION_FAILURE || code == Self::DEADLOCK_DETECTED
    }
}
