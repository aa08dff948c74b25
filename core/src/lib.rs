//! # Traverse TX Core
//!
//! Core traits and types for transaction-aware lazy traversals.
//!
//! A method that returns a lazy sequence finishes long before the sequence is
//! consumed. This crate defines the vocabulary needed to tie a transaction to
//! the consumption instead of the call:
//!
//! - **Traversable**: pull-driven sequence, driven with a callback, reporting
//!   exhaustion (`true`) or an early stop (`false`)
//! - **Emittable**: the same sequence exposed for push-style delivery
//! - **TraverseContext**: per-drive context carrying the bound transaction
//! - **TransactionAttribute**: propagation, isolation, rollback rules
//! - **PlatformTransactionManager**: synchronous begin/commit/rollback
//! - **MethodDescriptor / Invocation**: the intercepted call
//!
//! The interception logic itself lives in `traverse-tx-runtime`.
//!
//! ## Example
//!
//! ```ignore
//! use traverse_tx_core::invocation::{Invocation, MethodDescriptor, Returned};
//!
//! let method = Arc::new(MethodDescriptor::traversable("LedgerService", "entries"));
//! let invocation = Invocation::new(method, None, || {
//!     Ok(Returned::Traversable(Some(Box::new(ledger.entries()))))
//! });
//!
//! let wrapped = interceptor.invoke(invocation)?;
//! ```

// Re-export commonly used types
pub use chrono::{DateTime, Utc};

/// Transaction attributes and attribute sources
pub mod attribute;

/// Per-drive traversal context
pub mod context;

/// Push-style emission wrapper
pub mod emission;

/// Shared error type
pub mod error;

/// Intercepted call descriptors
pub mod invocation;

/// Transaction handles and the manager trait
pub mod transaction;

/// The lazy traversal abstraction
pub mod traversable;

pub use attribute::{RollbackRule, TransactionAttribute, TransactionAttributeSource};
pub use context::{BoundTransaction, TraverseContext};
pub use emission::Emittable;
pub use error::TransactionError;
pub use invocation::{Invocation, MethodDescriptor, ReturnShape, Returned, TargetType};
pub use transaction::{
    Isolation, PlatformTransactionManager, Propagation, TransactionId, TransactionStatus,
};
pub use traversable::{BoxTraversable, Traversable, TraverseMethod};
