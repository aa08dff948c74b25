//! Scripted traversables and the error type they fail with.

use std::fmt;
use std::ops::ControlFlow;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use thiserror::Error;
use traverse_tx_core::context::TraverseContext;
use traverse_tx_core::error::TransactionError;
use traverse_tx_core::traversable::{Traversable, TraverseMethod};

/// A domain validation failure, usually nested inside [`ExampleError`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("validation failed: {0}")]
pub struct ValidationError(pub String);

/// Error type for scripted sequences and targets.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ExampleError {
    /// Production failed after delivering `after` elements.
    #[error("production failed after {after} elements")]
    Production {
        /// Elements delivered before the failure.
        after: usize,
    },

    /// An element failed validation.
    #[error("element rejected")]
    Rejected(#[from] ValidationError),

    /// The target method failed before producing a sequence.
    #[error("target failed: {0}")]
    Target(String),

    /// Transaction infrastructure failed.
    #[error(transparent)]
    Transaction(#[from] TransactionError),
}

type Hook<V> = Arc<dyn Fn(&V, &TraverseContext) -> Result<(), ExampleError> + Send + Sync>;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Failure {
    Error,
    Rejected,
    Panic,
}

/// A restartable traversable over fixed elements with scripted failures.
///
/// Counts drives and produced elements so tests can check laziness and
/// early stopping.
///
/// # Example
///
/// ```
/// use std::ops::ControlFlow;
/// use traverse_tx_core::context::TraverseContext;
/// use traverse_tx_core::traversable::Traversable;
/// use traverse_tx_testing::ScriptedTraversable;
///
/// let scripted = ScriptedTraversable::new(vec![1, 2, 3]).fail_after(2);
/// let result = scripted.sequence(&mut |_| ControlFlow::Continue(()), &TraverseContext::new());
///
/// assert!(result.is_err());
/// assert_eq!(scripted.produced(), 2);
/// ```
pub struct ScriptedTraversable<V> {
    items: Vec<V>,
    failure: Option<(usize, Failure)>,
    hook: Option<Hook<V>>,
    drives: Arc<AtomicUsize>,
    produced: Arc<AtomicUsize>,
}

impl<V> ScriptedTraversable<V> {
    /// Traversable delivering `items` and then reporting exhaustion.
    #[must_use]
    pub fn new(items: Vec<V>) -> Self {
        Self {
            items,
            failure: None,
            hook: None,
            drives: Arc::new(AtomicUsize::new(0)),
            produced: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Fail with [`ExampleError::Production`] after `n` elements.
    #[must_use]
    pub fn fail_after(mut self, n: usize) -> Self {
        self.failure = Some((n, Failure::Error));
        self
    }

    /// Fail with [`ExampleError::Rejected`] after `n` elements.
    #[must_use]
    pub fn reject_after(mut self, n: usize) -> Self {
        self.failure = Some((n, Failure::Rejected));
        self
    }

    /// Panic after `n` elements.
    #[must_use]
    pub fn panic_after(mut self, n: usize) -> Self {
        self.failure = Some((n, Failure::Panic));
        self
    }

    /// Run `hook` for each element before it is delivered.
    ///
    /// The hook sees the drive's context, so it can write through the
    /// transaction bound by a transactional wrapper. A hook error ends the
    /// drive with that error.
    #[must_use]
    pub fn with_hook<F>(mut self, hook: F) -> Self
    where
        F: Fn(&V, &TraverseContext) -> Result<(), ExampleError> + Send + Sync + 'static,
    {
        self.hook = Some(Arc::new(hook));
        self
    }

    /// Number of times the sequence was driven.
    #[must_use]
    pub fn drives(&self) -> usize {
        self.drives.load(Ordering::SeqCst)
    }

    /// Number of elements produced over all drives.
    #[must_use]
    pub fn produced(&self) -> usize {
        self.produced.load(Ordering::SeqCst)
    }

    /// Shared handle on the drive counter, usable after the traversable is
    /// boxed away.
    #[must_use]
    pub fn drive_counter(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.drives)
    }

    /// Shared handle on the produced-element counter.
    #[must_use]
    pub fn produced_counter(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.produced)
    }

    #[allow(clippy::panic)]
    fn fail(&self, at: usize) -> Result<(), ExampleError> {
        match self.failure {
            Some((n, Failure::Error)) if n == at => Err(ExampleError::Production { after: at }),
            Some((n, Failure::Rejected)) if n == at => {
                Err(ValidationError(format!("element {at}")).into())
            }
            Some((n, Failure::Panic)) if n == at => panic!("scripted panic after {at} elements"),
            _ => Ok(()),
        }
    }
}

impl<V> Traversable<V> for ScriptedTraversable<V>
where
    V: Clone + Send + Sync,
{
    type Error = ExampleError;

    fn traverse(
        &self,
        _method: TraverseMethod,
        traverse: &mut dyn FnMut(V) -> ControlFlow<()>,
        ctx: &TraverseContext,
    ) -> Result<bool, ExampleError> {
        self.drives.fetch_add(1, Ordering::SeqCst);

        for (index, item) in self.items.iter().enumerate() {
            self.fail(index)?;
            if let Some(hook) = &self.hook {
                hook(item, ctx)?;
            }
            self.produced.fetch_add(1, Ordering::SeqCst);
            if traverse(item.clone()).is_break() {
                return Ok(false);
            }
        }

        self.fail(self.items.len())?;
        Ok(true)
    }
}

impl<V: fmt::Debug> fmt::Debug for ScriptedTraversable<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScriptedTraversable")
            .field("items", &self.items)
            .field("failure", &self.failure)
            .field("drives", &self.drives())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error;

    fn drive(scripted: &ScriptedTraversable<u32>, limit: usize) -> (Vec<u32>, Result<bool, ExampleError>) {
        let mut seen = Vec::new();
        let result = scripted.sequence(
            &mut |n| {
                seen.push(n);
                if seen.len() >= limit {
                    ControlFlow::Break(())
                } else {
                    ControlFlow::Continue(())
                }
            },
            &TraverseContext::new(),
        );
        (seen, result)
    }

    #[test]
    fn delivers_all_and_counts() {
        let scripted = ScriptedTraversable::new(vec![1, 2, 3]);
        assert_eq!(drive(&scripted, usize::MAX), (vec![1, 2, 3], Ok(true)));
        assert_eq!(drive(&scripted, 1), (vec![1], Ok(false)));
        assert_eq!(scripted.drives(), 2);
        assert_eq!(scripted.produced(), 4);
    }

    #[test]
    fn fails_after_n() {
        let scripted = ScriptedTraversable::new(vec![1, 2, 3]).fail_after(2);
        assert_eq!(
            drive(&scripted, usize::MAX),
            (vec![1, 2], Err(ExampleError::Production { after: 2 }))
        );
    }

    #[test]
    fn fails_after_last_element() {
        let scripted = ScriptedTraversable::new(vec![1]).fail_after(1);
        assert_eq!(
            drive(&scripted, usize::MAX),
            (vec![1], Err(ExampleError::Production { after: 1 }))
        );
    }

    #[test]
    fn rejection_nests_validation_error() {
        let scripted = ScriptedTraversable::new(vec![1, 2]).reject_after(1);
        let (_, result) = drive(&scripted, usize::MAX);
        let err = result.err();
        let source = err.as_ref().and_then(|e| e.source());
        assert!(source.is_some_and(|s| s.is::<ValidationError>()));
    }

    #[test]
    fn hook_error_ends_drive() {
        let scripted = ScriptedTraversable::new(vec![1, 2, 3]).with_hook(|n, _ctx| {
            if *n == 2 {
                Err(ExampleError::Target("hook".to_string()))
            } else {
                Ok(())
            }
        });
        assert_eq!(
            drive(&scripted, usize::MAX),
            (vec![1], Err(ExampleError::Target("hook".to_string())))
        );
    }

    #[test]
    fn transaction_errors_convert() {
        let err: ExampleError = TransactionError::System("down".to_string()).into();
        assert_eq!(err.to_string(), "Transaction system error: down");
    }
}
