//! Completion resolution: how a drive's outcome finalizes its transaction.
//!
//! [`resolve`] is the pure decision table. [`TransactionInfo`] owns one
//! transaction for one drive (or one method call) and applies the decision
//! to the manager exactly once.
//!
//! | Outcome | Live status | Action |
//! |---|---|---|
//! | `Exhausted` | yes | `Commit` |
//! | `StoppedEarly` | yes | `Rollback` |
//! | `Failed(err)` | yes | `Rollback`, or `Commit` when a no-rollback rule matches |
//! | any | no | `None` |

use crate::metrics::TraversalMetrics;
use std::error::Error;
use std::fmt;
use std::sync::Arc;
use traverse_tx_core::attribute::TransactionAttribute;
use traverse_tx_core::context::BoundTransaction;
use traverse_tx_core::error::Result;
use traverse_tx_core::transaction::{PlatformTransactionManager, TransactionStatus};

/// How a drive ended.
#[derive(Clone, Copy)]
pub enum DriveOutcome<'e> {
    /// The sequence was exhausted (or the method returned normally).
    Exhausted,
    /// The consumer stopped pulling before exhaustion.
    StoppedEarly,
    /// Production failed with this error.
    Failed(&'e (dyn Error + 'static)),
}

impl fmt::Debug for DriveOutcome<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Exhausted => write!(f, "Exhausted"),
            Self::StoppedEarly => write!(f, "StoppedEarly"),
            Self::Failed(err) => write!(f, "Failed({err})"),
        }
    }
}

/// What to do with the transaction.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CompletionAction {
    /// Commit.
    Commit,
    /// Roll back.
    Rollback,
    /// Nothing: no live transaction.
    None,
}

/// Lifecycle of one [`TransactionInfo`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TransactionState {
    /// Not begun yet.
    NotStarted,
    /// Begun and awaiting finalization.
    Active,
    /// Placeholder without a transaction.
    NoOp,
    /// Committed.
    Committed,
    /// Rolled back.
    RolledBack,
    /// The manager failed to commit or roll back.
    Failed,
}

impl TransactionState {
    /// Whether the transaction reached a terminal state.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Committed | Self::RolledBack | Self::Failed)
    }
}

/// Decide the completion action for an outcome.
#[must_use]
pub fn resolve(
    outcome: &DriveOutcome<'_>,
    attribute: Option<&TransactionAttribute>,
    has_status: bool,
) -> CompletionAction {
    if !has_status {
        return CompletionAction::None;
    }
    match outcome {
        DriveOutcome::Exhausted => CompletionAction::Commit,
        DriveOutcome::StoppedEarly => CompletionAction::Rollback,
        DriveOutcome::Failed(err) => {
            if attribute.is_none_or(|attribute| attribute.rollback_on(*err)) {
                CompletionAction::Rollback
            } else {
                CompletionAction::Commit
            }
        }
    }
}

/// One transaction, owned by exactly one drive.
///
/// Dropping an info that is still [`Active`](TransactionState::Active) rolls
/// it back, which covers panics unwinding through the raw sequence.
pub struct TransactionInfo {
    manager: Option<Arc<dyn PlatformTransactionManager>>,
    attribute: Option<Arc<TransactionAttribute>>,
    joinpoint: String,
    status: Option<TransactionStatus>,
    state: TransactionState,
}

impl TransactionInfo {
    /// Begin a transaction for `joinpoint` if the attribute asks for one.
    ///
    /// Without an attribute, or without a manager, the info is a no-op
    /// placeholder and the manager is never called. An attribute without a
    /// name is begun under the joinpoint label.
    ///
    /// # Errors
    ///
    /// Returns the manager's begin error.
    pub fn begin(
        manager: Option<&Arc<dyn PlatformTransactionManager>>,
        attribute: Option<Arc<TransactionAttribute>>,
        joinpoint: impl Into<String>,
    ) -> Result<Self> {
        let joinpoint = joinpoint.into();
        let mut info = Self {
            manager: manager.cloned(),
            attribute,
            joinpoint,
            status: None,
            state: TransactionState::NotStarted,
        };

        match (&info.manager, &info.attribute) {
            (Some(manager), Some(attribute)) => {
                let label = attribute.name().unwrap_or(&info.joinpoint);
                tracing::trace!(joinpoint = %info.joinpoint, "Getting transaction for [{label}]");
                let status = manager.begin(attribute, label)?;
                tracing::debug!(
                    joinpoint = %info.joinpoint,
                    transaction = %status.id(),
                    manager = manager.name(),
                    new_transaction = status.is_new_transaction(),
                    "Transaction begun"
                );
                info.status = Some(status);
                info.state = TransactionState::Active;
            }
            (None, Some(_)) => {
                tracing::debug!(
                    joinpoint = %info.joinpoint,
                    "Skipping transactional joinpoint because no transaction manager has been configured"
                );
                info.state = TransactionState::NoOp;
            }
            (_, None) => {
                tracing::trace!(
                    joinpoint = %info.joinpoint,
                    "Don't need to create transaction: this method is not transactional"
                );
                info.state = TransactionState::NoOp;
            }
        }

        Ok(info)
    }

    /// The joinpoint label.
    #[must_use]
    pub fn joinpoint(&self) -> &str {
        &self.joinpoint
    }

    /// Current lifecycle state.
    #[must_use]
    pub const fn state(&self) -> TransactionState {
        self.state
    }

    /// The live or finalized status, absent for no-op infos.
    #[must_use]
    pub const fn status(&self) -> Option<&TransactionStatus> {
        self.status.as_ref()
    }

    /// Whether a transaction is live and awaiting finalization.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.state == TransactionState::Active
    }

    /// Snapshot to bind into a traversal context.
    #[must_use]
    pub fn binding(&self) -> BoundTransaction {
        self.status.as_ref().map_or_else(
            || BoundTransaction::no_op(self.joinpoint.clone()),
            TransactionStatus::binding,
        )
    }

    /// Apply the completion action for `outcome`.
    ///
    /// Only the first call on a live transaction reaches the manager; later
    /// calls resolve to [`CompletionAction::None`].
    ///
    /// # Errors
    ///
    /// Returns the manager's commit or rollback error. The info is then in
    /// the [`Failed`](TransactionState::Failed) state.
    pub fn finalize(&mut self, outcome: &DriveOutcome<'_>) -> Result<CompletionAction> {
        let action = resolve(outcome, self.attribute.as_deref(), self.is_active());

        match (outcome, action) {
            (DriveOutcome::StoppedEarly, CompletionAction::Rollback) => {
                tracing::trace!(
                    joinpoint = %self.joinpoint,
                    "Rolling back the transaction as the traversal demand was fulfilled before the completion"
                );
            }
            (DriveOutcome::Failed(err), CompletionAction::Rollback | CompletionAction::Commit) => {
                tracing::trace!(
                    joinpoint = %self.joinpoint,
                    error = %err,
                    ?action,
                    "Completing transaction after exception"
                );
            }
            _ => {}
        }

        match action {
            CompletionAction::Commit => self.commit()?,
            CompletionAction::Rollback => self.rollback()?,
            CompletionAction::None => {}
        }
        Ok(action)
    }

    /// Commit on a normal method return.
    ///
    /// # Errors
    ///
    /// Returns the manager's commit error.
    pub fn commit_on_success(&mut self) -> Result<CompletionAction> {
        self.finalize(&DriveOutcome::Exhausted)
    }

    /// Roll back (or commit, per the rollback rules) after `error`.
    ///
    /// # Errors
    ///
    /// Returns the manager's commit or rollback error.
    pub fn complete_after_error(&mut self, error: &(dyn Error + 'static)) -> Result<CompletionAction> {
        self.finalize(&DriveOutcome::Failed(error))
    }

    fn commit(&mut self) -> Result<()> {
        let (Some(manager), Some(status)) = (&self.manager, self.status.as_mut()) else {
            return Ok(());
        };
        tracing::trace!(joinpoint = %self.joinpoint, transaction = %status.id(), "Completing transaction");
        match manager.commit(status) {
            Ok(()) => {
                self.state = TransactionState::Committed;
                TraversalMetrics::record_commit();
                Ok(())
            }
            Err(e) => {
                self.state = TransactionState::Failed;
                Err(e)
            }
        }
    }

    fn rollback(&mut self) -> Result<()> {
        let (Some(manager), Some(status)) = (&self.manager, self.status.as_mut()) else {
            return Ok(());
        };
        tracing::trace!(joinpoint = %self.joinpoint, transaction = %status.id(), "Rolling back transaction");
        match manager.rollback(status) {
            Ok(()) => {
                self.state = TransactionState::RolledBack;
                TraversalMetrics::record_rollback();
                Ok(())
            }
            Err(e) => {
                self.state = TransactionState::Failed;
                Err(e)
            }
        }
    }
}

impl fmt::Debug for TransactionInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransactionInfo")
            .field("joinpoint", &self.joinpoint)
            .field("state", &self.state)
            .field("status", &self.status)
            .finish_non_exhaustive()
    }
}

impl Drop for TransactionInfo {
    fn drop(&mut self) {
        if self.is_active() {
            tracing::warn!(
                joinpoint = %self.joinpoint,
                "Transaction was not finalized, rolling back"
            );
            if let Err(e) = self.rollback() {
                tracing::error!(joinpoint = %self.joinpoint, error = %e, "Rollback of unfinalized transaction failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::sync::Mutex;
    use traverse_tx_core::attribute::RollbackRule;
    use traverse_tx_core::error::TransactionError;
    use traverse_tx_core::transaction::TransactionId;

    #[derive(Debug, thiserror::Error)]
    #[error("validation failed")]
    struct ValidationFailed;

    #[derive(Debug, thiserror::Error)]
    #[error("storage failed")]
    struct StorageFailed;

    #[derive(Default)]
    struct CallLog {
        calls: Mutex<Vec<&'static str>>,
        fail_rollback: bool,
    }

    impl CallLog {
        fn calls(&self) -> Vec<&'static str> {
            self.calls.lock().map(|c| c.clone()).unwrap_or_default()
        }

        fn push(&self, call: &'static str) {
            if let Ok(mut calls) = self.calls.lock() {
                calls.push(call);
            }
        }
    }

    impl PlatformTransactionManager for CallLog {
        fn begin(&self, attribute: &TransactionAttribute, label: &str) -> Result<TransactionStatus> {
            self.push("begin");
            Ok(TransactionStatus::new(TransactionId::new(1), label, true)
                .with_read_only(attribute.is_read_only()))
        }

        fn commit(&self, status: &mut TransactionStatus) -> Result<()> {
            self.push("commit");
            status.set_completed();
            Ok(())
        }

        fn rollback(&self, status: &mut TransactionStatus) -> Result<()> {
            self.push("rollback");
            if self.fail_rollback {
                return Err(TransactionError::RollbackFailed {
                    label: status.label().to_string(),
                    reason: "connection lost".to_string(),
                });
            }
            status.set_completed();
            Ok(())
        }
    }

    #[allow(clippy::expect_used)]
    fn begin(log: &Arc<CallLog>, attribute: Option<TransactionAttribute>) -> TransactionInfo {
        let manager: Arc<dyn PlatformTransactionManager> = log.clone();
        TransactionInfo::begin(Some(&manager), attribute.map(Arc::new), "Ledger.entries")
            .expect("begin should succeed")
    }

    #[test]
    fn exhausted_commits() {
        let log = Arc::new(CallLog::default());
        let mut info = begin(&log, Some(TransactionAttribute::new()));
        assert_eq!(info.state(), TransactionState::Active);

        assert_eq!(info.finalize(&DriveOutcome::Exhausted), Ok(CompletionAction::Commit));
        assert_eq!(info.state(), TransactionState::Committed);
        assert_eq!(log.calls(), vec!["begin", "commit"]);
    }

    #[test]
    fn early_stop_rolls_back() {
        let log = Arc::new(CallLog::default());
        let mut info = begin(&log, Some(TransactionAttribute::new()));

        assert_eq!(info.finalize(&DriveOutcome::StoppedEarly), Ok(CompletionAction::Rollback));
        assert_eq!(info.state(), TransactionState::RolledBack);
        assert_eq!(log.calls(), vec!["begin", "rollback"]);
    }

    #[test]
    fn failure_honours_no_rollback_rule() {
        let log = Arc::new(CallLog::default());
        let attribute =
            TransactionAttribute::new().with_rule(RollbackRule::no_rollback_for::<ValidationFailed>());
        let mut info = begin(&log, Some(attribute));

        let action = info.complete_after_error(&ValidationFailed);
        assert_eq!(action, Ok(CompletionAction::Commit));
        assert_eq!(log.calls(), vec!["begin", "commit"]);
    }

    #[test]
    fn finalized_only_once() {
        let log = Arc::new(CallLog::default());
        let mut info = begin(&log, Some(TransactionAttribute::new()));

        assert_eq!(info.finalize(&DriveOutcome::StoppedEarly), Ok(CompletionAction::Rollback));
        assert_eq!(info.finalize(&DriveOutcome::Exhausted), Ok(CompletionAction::None));
        drop(info);
        assert_eq!(log.calls(), vec!["begin", "rollback"]);
    }

    #[test]
    fn no_attribute_never_calls_manager() {
        let log = Arc::new(CallLog::default());
        let mut info = begin(&log, None);
        assert_eq!(info.state(), TransactionState::NoOp);
        assert!(!info.binding().is_transactional());

        assert_eq!(info.finalize(&DriveOutcome::Exhausted), Ok(CompletionAction::None));
        assert!(log.calls().is_empty());
    }

    #[test]
    fn no_manager_is_no_op() {
        let info = TransactionInfo::begin(None, Some(Arc::new(TransactionAttribute::new())), "Svc.find");
        assert!(matches!(info, Ok(ref i) if i.state() == TransactionState::NoOp));
    }

    #[test]
    fn unnamed_attribute_uses_joinpoint_label() {
        let log = Arc::new(CallLog::default());
        let info = begin(&log, Some(TransactionAttribute::new()));
        assert_eq!(info.status().map(TransactionStatus::label), Some("Ledger.entries"));

        let named = begin(&log, Some(TransactionAttribute::new().with_name("export")));
        assert_eq!(named.status().map(TransactionStatus::label), Some("export"));
    }

    #[test]
    fn rollback_failure_marks_failed() {
        let log = Arc::new(CallLog {
            fail_rollback: true,
            ..CallLog::default()
        });
        let mut info = begin(&log, Some(TransactionAttribute::new()));

        let result = info.finalize(&DriveOutcome::StoppedEarly);
        assert!(matches!(result, Err(TransactionError::RollbackFailed { .. })));
        assert_eq!(info.state(), TransactionState::Failed);
        drop(info);
        assert_eq!(log.calls(), vec!["begin", "rollback"]);
    }

    #[test]
    fn dropping_active_info_rolls_back() {
        let log = Arc::new(CallLog::default());
        let info = begin(&log, Some(TransactionAttribute::new()));
        drop(info);
        assert_eq!(log.calls(), vec!["begin", "rollback"]);
    }

    #[derive(Clone, Copy, Debug)]
    enum Kind {
        Exhausted,
        StoppedEarly,
        FailedValidation,
        FailedStorage,
    }

    fn kind() -> impl Strategy<Value = Kind> {
        prop_oneof![
            Just(Kind::Exhausted),
            Just(Kind::StoppedEarly),
            Just(Kind::FailedValidation),
            Just(Kind::FailedStorage),
        ]
    }

    proptest! {
        #[test]
        fn decision_table(kind in kind(), has_status: bool, with_rule: bool) {
            let attribute = if with_rule {
                TransactionAttribute::new().with_rule(RollbackRule::no_rollback_for::<ValidationFailed>())
            } else {
                TransactionAttribute::new()
            };
            let outcome = match kind {
                Kind::Exhausted => DriveOutcome::Exhausted,
                Kind::StoppedEarly => DriveOutcome::StoppedEarly,
                Kind::FailedValidation => DriveOutcome::Failed(&ValidationFailed),
                Kind::FailedStorage => DriveOutcome::Failed(&StorageFailed),
            };

            let action = resolve(&outcome, Some(&attribute), has_status);

            let expected = match (has_status, kind) {
                (false, _) => CompletionAction::None,
                (true, Kind::Exhausted) => CompletionAction::Commit,
                (true, Kind::FailedValidation) if with_rule => CompletionAction::Commit,
                (true, _) => CompletionAction::Rollback,
            };
            prop_assert_eq!(action, expected);
        }
    }
}
