//! Transaction handles, definition enums, and the manager trait.
//!
//! The manager is the external begin/commit/rollback primitive. Everything in
//! this module is synchronous: a drive call finalizes its transaction before
//! returning, so there is nothing to await.

use crate::attribute::TransactionAttribute;
use crate::context::BoundTransaction;
use crate::error::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Identifier a manager assigns to each transaction it begins.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TransactionId(u64);

impl TransactionId {
    /// Create a `TransactionId` with the given value.
    #[must_use]
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    /// Get the numeric value.
    #[must_use]
    pub const fn value(self) -> u64 {
        self.0
    }
}

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "tx-{}", self.0)
    }
}

/// Transaction propagation behavior.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Propagation {
    /// Join the current transaction or create a new one.
    #[default]
    Required,
    /// Join the current transaction, or run without one.
    Supports,
    /// Join the current transaction; fail without one.
    Mandatory,
    /// Always create a new transaction, suspending the current one.
    RequiresNew,
    /// Run without a transaction, suspending the current one.
    NotSupported,
    /// Run without a transaction; fail if one exists.
    Never,
    /// Run in a nested transaction (savepoint) if one exists.
    Nested,
}

impl Propagation {
    const ALL: [Self; 7] = [
        Self::Required,
        Self::Supports,
        Self::Mandatory,
        Self::RequiresNew,
        Self::NotSupported,
        Self::Never,
        Self::Nested,
    ];

    /// The canonical constant name, e.g. `PROPAGATION_REQUIRED`.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Required => "PROPAGATION_REQUIRED",
            Self::Supports => "PROPAGATION_SUPPORTS",
            Self::Mandatory => "PROPAGATION_MANDATORY",
            Self::RequiresNew => "PROPAGATION_REQUIRES_NEW",
            Self::NotSupported => "PROPAGATION_NOT_SUPPORTED",
            Self::Never => "PROPAGATION_NEVER",
            Self::Nested => "PROPAGATION_NESTED",
        }
    }
}

impl fmt::Display for Propagation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Propagation {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|p| p.as_str() == s)
            .ok_or_else(|| format!("Unknown propagation: {s}"))
    }
}

/// Transaction isolation level.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Isolation {
    /// Use the underlying store's default.
    #[default]
    Default,
    /// Dirty reads allowed.
    ReadUncommitted,
    /// Only committed data is visible.
    ReadCommitted,
    /// Repeated reads return the same rows.
    RepeatableRead,
    /// Full serializability.
    Serializable,
}

impl Isolation {
    const ALL: [Self; 5] = [
        Self::Default,
        Self::ReadUncommitted,
        Self::ReadCommitted,
        Self::RepeatableRead,
        Self::Serializable,
    ];

    /// The canonical constant name, e.g. `ISOLATION_DEFAULT`.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Default => "ISOLATION_DEFAULT",
            Self::ReadUncommitted => "ISOLATION_READ_UNCOMMITTED",
            Self::ReadCommitted => "ISOLATION_READ_COMMITTED",
            Self::RepeatableRead => "ISOLATION_REPEATABLE_READ",
            Self::Serializable => "ISOLATION_SERIALIZABLE",
        }
    }
}

impl fmt::Display for Isolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Isolation {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|i| i.as_str() == s)
            .ok_or_else(|| format!("Unknown isolation: {s}"))
    }
}

/// Opaque handle for one transaction, created by
/// [`PlatformTransactionManager::begin`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TransactionStatus {
    id: TransactionId,
    label: String,
    new_transaction: bool,
    read_only: bool,
    rollback_only: bool,
    completed: bool,
    started_at: DateTime<Utc>,
}

impl TransactionStatus {
    /// Create a status for a transaction that just began.
    ///
    /// `new_transaction` is `false` when the transaction joined an outer one.
    #[must_use]
    pub fn new(id: TransactionId, label: impl Into<String>, new_transaction: bool) -> Self {
        Self {
            id,
            label: label.into(),
            new_transaction,
            read_only: false,
            rollback_only: false,
            completed: false,
            started_at: Utc::now(),
        }
    }

    /// Mark the status read-only.
    #[must_use]
    pub const fn with_read_only(mut self, read_only: bool) -> Self {
        self.read_only = read_only;
        self
    }

    /// The transaction id.
    #[must_use]
    pub const fn id(&self) -> TransactionId {
        self.id
    }

    /// The label the transaction was begun with.
    #[must_use]
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Whether this status started a new physical transaction.
    #[must_use]
    pub const fn is_new_transaction(&self) -> bool {
        self.new_transaction
    }

    /// Whether the transaction is read-only.
    #[must_use]
    pub const fn is_read_only(&self) -> bool {
        self.read_only
    }

    /// Whether the transaction may only be rolled back.
    #[must_use]
    pub const fn is_rollback_only(&self) -> bool {
        self.rollback_only
    }

    /// Mark the transaction rollback-only.
    pub const fn set_rollback_only(&mut self) {
        self.rollback_only = true;
    }

    /// Whether commit or rollback already happened.
    #[must_use]
    pub const fn is_completed(&self) -> bool {
        self.completed
    }

    /// Record that commit or rollback happened. Managers call this.
    pub const fn set_completed(&mut self) {
        self.completed = true;
    }

    /// When the transaction began.
    #[must_use]
    pub const fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    /// Snapshot suitable for binding into a traversal context.
    #[must_use]
    pub fn binding(&self) -> BoundTransaction {
        BoundTransaction::new(self.id, self.label.clone(), self.read_only)
    }
}

/// A transaction manager that can begin, commit, and roll back synchronously.
///
/// # Thread Safety
///
/// Managers are shared behind `Arc` by every interceptor and wrapped sequence,
/// so implementations must be `Send + Sync`.
pub trait PlatformTransactionManager: Send + Sync {
    /// Begin (or join) a transaction for the attribute.
    ///
    /// `label` identifies the joinpoint for diagnostics.
    ///
    /// # Errors
    ///
    /// Returns an error when the transaction cannot be started, e.g.
    /// `IllegalTransactionState` for propagation violations.
    fn begin(&self, attribute: &TransactionAttribute, label: &str) -> Result<TransactionStatus>;

    /// Commit the transaction.
    ///
    /// # Errors
    ///
    /// Returns an error when the status is already completed or the commit fails.
    fn commit(&self, status: &mut TransactionStatus) -> Result<()>;

    /// Roll back the transaction.
    ///
    /// # Errors
    ///
    /// Returns an error when the status is already completed or the rollback fails.
    fn rollback(&self, status: &mut TransactionStatus) -> Result<()>;

    /// Name used in diagnostics.
    fn name(&self) -> &str {
        "transactionManager"
    }
}
