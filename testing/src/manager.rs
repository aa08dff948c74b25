//! In-memory transaction manager for fast, deterministic tests.
//!
//! Writes made through [`InMemoryTransactionManager::write`] while a
//! transaction is bound into the traversal context are staged per
//! transaction and only become visible in the committed store on commit.
//! Rollback discards them. Every begin, commit, and rollback is recorded so
//! tests can assert on the exact call sequence.

#![allow(clippy::unwrap_used)] // Test infrastructure uses unwrap for simplicity
#![allow(clippy::missing_panics_doc)] // Only poisoned locks panic

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};
use traverse_tx_core::attribute::TransactionAttribute;
use traverse_tx_core::context::TraverseContext;
use traverse_tx_core::error::{Result, TransactionError};
use traverse_tx_core::transaction::{
    PlatformTransactionManager, Propagation, TransactionId, TransactionStatus,
};

/// One manager call, in the order it happened.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TransactionEvent {
    /// A transaction began.
    Begin {
        /// Assigned id.
        id: TransactionId,
        /// Label passed to `begin`.
        label: String,
    },
    /// A transaction committed.
    Commit {
        /// The committed transaction.
        id: TransactionId,
    },
    /// A transaction rolled back.
    Rollback {
        /// The rolled back transaction.
        id: TransactionId,
    },
}

#[derive(Debug, Default)]
struct State {
    next_id: u64,
    active: Vec<TransactionId>,
    staged: HashMap<TransactionId, Vec<(String, String)>>,
    committed: BTreeMap<String, String>,
    events: Vec<TransactionEvent>,
    fail_commit: bool,
    fail_rollback: bool,
}

/// In-memory [`PlatformTransactionManager`] with a staged key/value store.
///
/// Every `begin` opens a new transaction. `MANDATORY` fails when no other
/// transaction is active and `NEVER` fails when one is.
///
/// Cloning shares the underlying state, so a test can keep one handle and
/// register another with the interceptor.
///
/// # Example
///
/// ```
/// use traverse_tx_core::attribute::TransactionAttribute;
/// use traverse_tx_core::context::TraverseContext;
/// use traverse_tx_core::transaction::PlatformTransactionManager;
/// use traverse_tx_testing::InMemoryTransactionManager;
///
/// let manager = InMemoryTransactionManager::new();
/// let ctx = TraverseContext::new();
///
/// let mut status = manager.begin(&TransactionAttribute::new(), "Ledger.export").unwrap();
/// let _binding = ctx.bind(status.binding());
/// manager.write(&ctx, "entry-1", "42").unwrap();
/// assert_eq!(manager.committed("entry-1"), None);
///
/// manager.commit(&mut status).unwrap();
/// assert_eq!(manager.committed("entry-1"), Some("42".to_string()));
/// ```
#[derive(Clone, Debug)]
pub struct InMemoryTransactionManager {
    name: String,
    state: Arc<Mutex<State>>,
}

impl Default for InMemoryTransactionManager {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryTransactionManager {
    /// Create a manager named `inMemoryTransactionManager`.
    #[must_use]
    pub fn new() -> Self {
        Self::with_name("inMemoryTransactionManager")
    }

    /// Create a manager with a custom diagnostic name.
    #[must_use]
    pub fn with_name(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            state: Arc::new(Mutex::new(State::default())),
        }
    }

    /// Make every following commit fail with `CommitFailed`.
    pub fn fail_commits(&self, fail: bool) {
        self.state.lock().unwrap().fail_commit = fail;
    }

    /// Make every following rollback fail with `RollbackFailed`.
    pub fn fail_rollbacks(&self, fail: bool) {
        self.state.lock().unwrap().fail_rollback = fail;
    }

    /// Write `key = value` in the transaction bound into `ctx`.
    ///
    /// Without a bound transaction the write is applied immediately.
    ///
    /// # Errors
    ///
    /// Returns `IllegalTransactionState` when the bound transaction is
    /// read-only or no longer active.
    pub fn write(&self, ctx: &TraverseContext, key: impl Into<String>, value: impl Into<String>) -> Result<()> {
        let bound = ctx.current_transaction();
        let mut state = self.state.lock().unwrap();

        match bound.as_ref().and_then(|tx| tx.id().map(|id| (id, tx.is_read_only()))) {
            Some((_, true)) => Err(TransactionError::IllegalTransactionState(
                "Cannot write in a read-only transaction".to_string(),
            )),
            Some((id, false)) => {
                if !state.active.contains(&id) {
                    return Err(TransactionError::IllegalTransactionState(format!(
                        "Transaction {id} is not active"
                    )));
                }
                state
                    .staged
                    .entry(id)
                    .or_default()
                    .push((key.into(), value.into()));
                Ok(())
            }
            None => {
                state.committed.insert(key.into(), value.into());
                Ok(())
            }
        }
    }

    /// Committed value for `key`.
    #[must_use]
    pub fn committed(&self, key: &str) -> Option<String> {
        self.state.lock().unwrap().committed.get(key).cloned()
    }

    /// Number of committed keys.
    #[must_use]
    pub fn committed_len(&self) -> usize {
        self.state.lock().unwrap().committed.len()
    }

    /// All recorded manager calls.
    #[must_use]
    pub fn events(&self) -> Vec<TransactionEvent> {
        self.state.lock().unwrap().events.clone()
    }

    /// Number of `begin` calls.
    #[must_use]
    pub fn begin_count(&self) -> usize {
        self.count(|e| matches!(e, TransactionEvent::Begin { .. }))
    }

    /// Number of successful commits.
    #[must_use]
    pub fn commit_count(&self) -> usize {
        self.count(|e| matches!(e, TransactionEvent::Commit { .. }))
    }

    /// Number of successful rollbacks.
    #[must_use]
    pub fn rollback_count(&self) -> usize {
        self.count(|e| matches!(e, TransactionEvent::Rollback { .. }))
    }

    /// Total number of manager calls recorded.
    #[must_use]
    pub fn call_count(&self) -> usize {
        self.state.lock().unwrap().events.len()
    }

    /// Transactions begun and not yet completed.
    #[must_use]
    pub fn active_count(&self) -> usize {
        self.state.lock().unwrap().active.len()
    }

    fn count(&self, predicate: impl Fn(&TransactionEvent) -> bool) -> usize {
        self.state
            .lock()
            .unwrap()
            .events
            .iter()
            .filter(|e| predicate(e))
            .count()
    }

    fn check_not_completed(status: &TransactionStatus) -> Result<()> {
        if status.is_completed() {
            return Err(TransactionError::IllegalTransactionState(
                "Transaction is already completed - do not call commit or rollback more than once per transaction"
                    .to_string(),
            ));
        }
        Ok(())
    }

    fn discard(state: &mut State, status: &mut TransactionStatus) {
        let id = status.id();
        state.staged.remove(&id);
        state.active.retain(|active| *active != id);
        state.events.push(TransactionEvent::Rollback { id });
        status.set_completed();
    }
}

impl PlatformTransactionManager for InMemoryTransactionManager {
    fn begin(&self, attribute: &TransactionAttribute, label: &str) -> Result<TransactionStatus> {
        let mut state = self.state.lock().unwrap();

        match attribute.propagation() {
            Propagation::Mandatory if state.active.is_empty() => {
                return Err(TransactionError::IllegalTransactionState(
                    "No existing transaction found for transaction marked with propagation 'mandatory'"
                        .to_string(),
                ));
            }
            Propagation::Never if !state.active.is_empty() => {
                return Err(TransactionError::IllegalTransactionState(
                    "Existing transaction found for transaction marked with propagation 'never'"
                        .to_string(),
                ));
            }
            _ => {}
        }

        state.next_id += 1;
        let id = TransactionId::new(state.next_id);
        state.active.push(id);
        state.events.push(TransactionEvent::Begin {
            id,
            label: label.to_string(),
        });

        Ok(TransactionStatus::new(id, label, true).with_read_only(attribute.is_read_only()))
    }

    fn commit(&self, status: &mut TransactionStatus) -> Result<()> {
        Self::check_not_completed(status)?;
        let mut state = self.state.lock().unwrap();

        if state.fail_commit {
            return Err(TransactionError::CommitFailed {
                label: status.label().to_string(),
                reason: "commit failure injected".to_string(),
            });
        }

        if status.is_rollback_only() {
            Self::discard(&mut state, status);
            return Ok(());
        }

        let id = status.id();
        let writes = state.staged.remove(&id).unwrap_or_default();
        state.committed.extend(writes);
        state.active.retain(|active| *active != id);
        state.events.push(TransactionEvent::Commit { id });
        status.set_completed();
        Ok(())
    }

    fn rollback(&self, status: &mut TransactionStatus) -> Result<()> {
        Self::check_not_completed(status)?;
        let mut state = self.state.lock().unwrap();

        if state.fail_rollback {
            return Err(TransactionError::RollbackFailed {
                label: status.label().to_string(),
                reason: "rollback failure injected".to_string(),
            });
        }

        Self::discard(&mut state, status);
        Ok(())
    }

    fn name(&self) -> &str {
        &self.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn commit_applies_staged_writes() {
        let manager = InMemoryTransactionManager::new();
        let ctx = TraverseContext::new();

        let mut status = manager.begin(&TransactionAttribute::new(), "Ledger.export").unwrap();
        {
            let _binding = ctx.bind(status.binding());
            manager.write(&ctx, "a", "1").unwrap();
            manager.write(&ctx, "b", "2").unwrap();
        }
        assert_eq!(manager.committed_len(), 0);

        manager.commit(&mut status).unwrap();
        assert_eq!(manager.committed("a"), Some("1".to_string()));
        assert_eq!(manager.committed("b"), Some("2".to_string()));
        assert_eq!(manager.active_count(), 0);
    }

    #[test]
    fn rollback_discards_staged_writes() {
        let manager = InMemoryTransactionManager::new();
        let ctx = TraverseContext::new();

        let mut status = manager.begin(&TransactionAttribute::new(), "Ledger.export").unwrap();
        let binding = ctx.bind(status.binding());
        manager.write(&ctx, "a", "1").unwrap();
        drop(binding);

        manager.rollback(&mut status).unwrap();
        assert_eq!(manager.committed("a"), None);
        assert_eq!(
            manager.events(),
            vec![
                TransactionEvent::Begin {
                    id: status.id(),
                    label: "Ledger.export".to_string()
                },
                TransactionEvent::Rollback { id: status.id() },
            ]
        );
    }

    #[test]
    fn completing_twice_is_illegal() {
        let manager = InMemoryTransactionManager::new();
        let mut status = manager.begin(&TransactionAttribute::new(), "Svc.find").unwrap();
        manager.commit(&mut status).unwrap();

        assert!(matches!(
            manager.rollback(&mut status),
            Err(TransactionError::IllegalTransactionState(_))
        ));
        assert_eq!(manager.call_count(), 2);
    }

    #[test]
    fn rollback_only_commit_rolls_back() {
        let manager = InMemoryTransactionManager::new();
        let mut status = manager.begin(&TransactionAttribute::new(), "Svc.find").unwrap();
        status.set_rollback_only();

        manager.commit(&mut status).unwrap();
        assert_eq!(manager.commit_count(), 0);
        assert_eq!(manager.rollback_count(), 1);
    }

    #[test]
    fn read_only_rejects_writes() {
        let manager = InMemoryTransactionManager::new();
        let ctx = TraverseContext::new();
        let status = manager
            .begin(&TransactionAttribute::new().with_read_only(true), "Svc.find")
            .unwrap();
        let _binding = ctx.bind(status.binding());

        assert!(matches!(
            manager.write(&ctx, "a", "1"),
            Err(TransactionError::IllegalTransactionState(_))
        ));
    }

    #[test]
    fn write_without_transaction_is_immediate() {
        let manager = InMemoryTransactionManager::new();
        manager.write(&TraverseContext::new(), "a", "1").unwrap();
        assert_eq!(manager.committed("a"), Some("1".to_string()));
        assert_eq!(manager.call_count(), 0);
    }

    #[test]
    fn mandatory_requires_active_transaction() {
        let manager = InMemoryTransactionManager::new();
        let mandatory = TransactionAttribute::new().with_propagation(Propagation::Mandatory);
        assert!(manager.begin(&mandatory, "Svc.find").is_err());

        let _outer = manager.begin(&TransactionAttribute::new(), "Svc.outer").unwrap();
        assert!(manager.begin(&mandatory, "Svc.find").is_ok());
    }

    #[test]
    fn injected_failures() {
        let manager = InMemoryTransactionManager::new();
        manager.fail_rollbacks(true);
        let mut status = manager.begin(&TransactionAttribute::new(), "Svc.find").unwrap();

        assert!(matches!(
            manager.rollback(&mut status),
            Err(TransactionError::RollbackFailed { .. })
        ));
        assert_eq!(manager.rollback_count(), 0);
        assert_eq!(manager.active_count(), 1);
    }
}
