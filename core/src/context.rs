//! Per-drive traversal context.
//!
//! The context replaces ambient (thread-local) transaction binding: the
//! transactional decorator binds the open transaction into the context for the
//! duration of one drive, and production code reads it back through
//! [`TraverseContext::current_transaction`].
//!
//! A context is intentionally `!Sync`. Exactly one driver owns it, which is the
//! single-driver rule the transactional decorator relies on.

use crate::transaction::TransactionId;
use std::cell::{Cell, RefCell};

/// Snapshot of a transaction bound into a [`TraverseContext`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BoundTransaction {
    id: Option<TransactionId>,
    label: String,
    read_only: bool,
}

impl BoundTransaction {
    /// A binding for a live transaction.
    #[must_use]
    pub fn new(id: TransactionId, label: impl Into<String>, read_only: bool) -> Self {
        Self {
            id: Some(id),
            label: label.into(),
            read_only,
        }
    }

    /// A binding for a joinpoint that runs without a transaction.
    #[must_use]
    pub fn no_op(label: impl Into<String>) -> Self {
        Self {
            id: None,
            label: label.into(),
            read_only: false,
        }
    }

    /// The bound transaction's id, if a transaction is live.
    #[must_use]
    pub const fn id(&self) -> Option<TransactionId> {
        self.id
    }

    /// The joinpoint label the binding was created for.
    #[must_use]
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Whether the transaction was opened read-only.
    #[must_use]
    pub const fn is_read_only(&self) -> bool {
        self.read_only
    }

    /// Whether a real transaction backs this binding.
    #[must_use]
    pub const fn is_transactional(&self) -> bool {
        self.id.is_some()
    }
}

/// Context passed by reference through every drive call.
#[derive(Debug, Default)]
pub struct TraverseContext {
    bindings: RefCell<Vec<BoundTransaction>>,
    releases: Cell<usize>,
}

impl TraverseContext {
    /// Create an empty context.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The innermost bound transaction, if any.
    #[must_use]
    pub fn current_transaction(&self) -> Option<BoundTransaction> {
        self.bindings.borrow().last().cloned()
    }

    /// The innermost live transaction id, if any.
    #[must_use]
    pub fn current_transaction_id(&self) -> Option<TransactionId> {
        self.bindings.borrow().last().and_then(BoundTransaction::id)
    }

    /// Number of bindings currently in place.
    #[must_use]
    pub fn depth(&self) -> usize {
        self.bindings.borrow().len()
    }

    /// How many bindings have been released over the lifetime of this context.
    #[must_use]
    pub fn releases(&self) -> usize {
        self.releases.get()
    }

    /// Bind a transaction until the returned guard is dropped.
    ///
    /// Dropping the guard restores the previously bound transaction, also
    /// while unwinding.
    #[must_use = "the binding is released as soon as the guard is dropped"]
    pub fn bind(&self, transaction: BoundTransaction) -> Binding<'_> {
        let mut bindings = self.bindings.borrow_mut();
        bindings.push(transaction);
        Binding {
            ctx: self,
            depth: bindings.len(),
        }
    }
}

/// Guard returned by [`TraverseContext::bind`].
#[derive(Debug)]
pub struct Binding<'a> {
    ctx: &'a TraverseContext,
    depth: usize,
}

impl Drop for Binding<'_> {
    fn drop(&mut self) {
        self.ctx.bindings.borrow_mut().truncate(self.depth - 1);
        self.ctx.releases.set(self.ctx.releases.get() + 1);
        tracing::trace!(depth = self.depth, "Released transaction binding");
    }
}
