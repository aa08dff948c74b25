//! Error type shared by every transaction-aware component.
//!
//! Sequences that want to be wrapped transactionally keep their own error type
//! and opt in with `E: From<TransactionError>`, so a wrapped sequence exposes
//! exactly the same error type as the raw one.

use crate::invocation::ReturnShape;
use thiserror::Error;

/// Errors raised by transaction infrastructure (never by sequence production).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransactionError {
    /// The attribute named a manager qualifier that is not registered.
    #[error("No transaction manager registered under qualifier '{0}'")]
    NoSuchManager(String),

    /// The resolved manager cannot drive begin/commit/rollback synchronously.
    #[error("Transaction manager '{manager}' is not supported for '{joinpoint}'")]
    UnsupportedManager {
        /// Name of the unsupported manager (or `<none>`).
        manager: String,
        /// The intercepted method's identification.
        joinpoint: String,
    },

    /// The attribute source failed to resolve an attribute.
    #[error("Failed to resolve transaction attribute: {0}")]
    AttributeResolution(String),

    /// The intercepted method produced a value of a different shape than declared.
    #[error("Method '{joinpoint}' declares {declared} but returned {actual}")]
    ReturnShapeMismatch {
        /// The intercepted method's identification.
        joinpoint: String,
        /// The shape recorded at registration.
        declared: ReturnShape,
        /// The shape actually produced.
        actual: ReturnShape,
    },

    /// A transaction was used in a state that forbids the operation
    /// (e.g. committing twice, `MANDATORY` without an outer transaction).
    #[error("Illegal transaction state: {0}")]
    IllegalTransactionState(String),

    /// The manager failed to commit.
    #[error("Commit failed for transaction '{label}': {reason}")]
    CommitFailed {
        /// Transaction label.
        label: String,
        /// Manager-provided reason.
        reason: String,
    },

    /// The manager failed to roll back.
    #[error("Rollback failed for transaction '{label}': {reason}")]
    RollbackFailed {
        /// Transaction label.
        label: String,
        /// Manager-provided reason.
        reason: String,
    },

    /// Any other manager-level failure (connection loss, begin failure).
    #[error("Transaction system error: {0}")]
    System(String),
}

/// Result alias for transaction infrastructure operations.
pub type Result<T> = std::result::Result<T, TransactionError>;
