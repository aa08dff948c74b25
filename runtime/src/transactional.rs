//! The transactional decorator for lazy traversals.
//!
//! A [`TransactionalTraversable`] opens one transaction per drive, binds it
//! into the caller's [`TraverseContext`], drives the raw sequence strictly
//! sequentially, and finalizes the transaction from the drive's outcome
//! before returning:
//!
//! - exhausted: release the binding, then commit
//! - stopped early: roll back, then release the binding
//! - production error: complete after the error (rollback unless a
//!   no-rollback rule matches), release the binding, return the same error
//!
//! # Example
//!
//! ```ignore
//! let wrapped = TransactionalTraversable::new(raw, manager, Some(attribute), "Ledger.entries");
//! let ctx = TraverseContext::new();
//! let exhausted = wrapped.sequence(&mut |entry| { export(entry); ControlFlow::Continue(()) }, &ctx)?;
//! ```

use crate::completion::{CompletionAction, DriveOutcome, TransactionInfo};
use crate::metrics::TraversalMetrics;
use std::fmt;
use std::ops::ControlFlow;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;
use traverse_tx_core::attribute::TransactionAttribute;
use traverse_tx_core::context::TraverseContext;
use traverse_tx_core::error::TransactionError;
use traverse_tx_core::transaction::PlatformTransactionManager;
use traverse_tx_core::traversable::{BoxTraversable, Traversable, TraverseMethod};

/// A lazy sequence whose drives run inside a transaction.
///
/// One instance is meant for one driver at a time. Each drive gets its own
/// transaction; nothing is opened at construction.
pub struct TransactionalTraversable<V, E> {
    inner: BoxTraversable<V, E>,
    manager: Arc<dyn PlatformTransactionManager>,
    attribute: Option<Arc<TransactionAttribute>>,
    joinpoint: String,
    sequential_advisory: bool,
    informed_sequential: AtomicBool,
}

impl<V, E> TransactionalTraversable<V, E> {
    /// Wrap `inner`. Without an attribute every drive runs without a
    /// transaction and the manager is never called.
    pub fn new(
        inner: BoxTraversable<V, E>,
        manager: Arc<dyn PlatformTransactionManager>,
        attribute: Option<Arc<TransactionAttribute>>,
        joinpoint: impl Into<String>,
    ) -> Self {
        Self {
            inner,
            manager,
            attribute,
            joinpoint: joinpoint.into(),
            sequential_advisory: true,
            informed_sequential: AtomicBool::new(false),
        }
    }

    /// Enable or disable the one-time sequential-traversal advisory.
    #[must_use]
    pub const fn with_sequential_advisory(mut self, enabled: bool) -> Self {
        self.sequential_advisory = enabled;
        self
    }

    /// The joinpoint label transactions are opened under.
    #[must_use]
    pub fn joinpoint(&self) -> &str {
        &self.joinpoint
    }

    /// The attribute every drive is opened with.
    #[must_use]
    pub fn attribute(&self) -> Option<&TransactionAttribute> {
        self.attribute.as_deref()
    }

    /// Whether the sequential-traversal advisory has been logged.
    #[must_use]
    pub fn has_informed_sequential(&self) -> bool {
        self.informed_sequential.load(Ordering::Acquire)
    }

    fn inform_sequential(&self, requested: TraverseMethod) {
        if !self.sequential_advisory || requested.is_sequence() {
            return;
        }
        if self
            .informed_sequential
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            tracing::info!(
                joinpoint = %self.joinpoint,
                %requested,
                "Enforcing sequential traversal within the transaction, \
                 the transaction binding is only valid for a single driver"
            );
        }
    }
}

impl<V, E> Traversable<V> for TransactionalTraversable<V, E>
where
    E: From<TransactionError> + std::error::Error + 'static,
{
    type Error = E;

    fn traverse(
        &self,
        method: TraverseMethod,
        traverse: &mut dyn FnMut(V) -> ControlFlow<()>,
        ctx: &TraverseContext,
    ) -> Result<bool, E> {
        let started = Instant::now();
        let mut info = TransactionInfo::begin(
            Some(&self.manager),
            self.attribute.clone(),
            self.joinpoint.as_str(),
        )?;
        self.inform_sequential(method);

        let binding = ctx.bind(info.binding());
        let result = self.inner.sequence(traverse, ctx);

        let finalized = match &result {
            Ok(true) => {
                drop(binding);
                info.finalize(&DriveOutcome::Exhausted)
            }
            Ok(false) => {
                TraversalMetrics::record_early_stop();
                let finalized = info.finalize(&DriveOutcome::StoppedEarly);
                drop(binding);
                finalized
            }
            Err(err) => {
                TraversalMetrics::record_failure();
                if let Err(tx_err) = info.finalize(&DriveOutcome::Failed(err)) {
                    tracing::error!(
                        joinpoint = %self.joinpoint,
                        error = %err,
                        transaction_error = %tx_err,
                        "Rollback failed after application error, returning the application error"
                    );
                }
                drop(binding);
                Ok(CompletionAction::None)
            }
        };

        TraversalMetrics::record_duration(started.elapsed());
        tracing::debug!(
            joinpoint = %self.joinpoint,
            state = ?info.state(),
            "Traversal finished"
        );
        finalized?;
        result
    }
}

impl<V, E> fmt::Debug for TransactionalTraversable<V, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransactionalTraversable")
            .field("joinpoint", &self.joinpoint)
            .field("manager", &self.manager.name())
            .field("attribute", &self.attribute)
            .field("informed_sequential", &self.has_informed_sequential())
            .finish_non_exhaustive()
    }
}
