//! Interceptor doubles.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use traverse_tx_core::error::TransactionError;
use traverse_tx_core::invocation::{Invocation, Returned};
use traverse_tx_runtime::interceptor::MethodInterceptor;

/// Counts the calls that reach it, then hands them to `inner`.
///
/// Put it in the delegate position of a gate to observe which calls were
/// delegated:
///
/// ```ignore
/// let recording = RecordingInterceptor::new(StandardTransactionInterceptor::new(support.clone()));
/// let delegated = recording.counter();
/// let gate = TraverseSupportInterceptor::new(recording, support, InterceptorConfig::default());
/// ```
#[derive(Clone, Debug)]
pub struct RecordingInterceptor<S> {
    inner: S,
    calls: Arc<AtomicUsize>,
}

impl<S> RecordingInterceptor<S> {
    /// Wrap `inner`.
    #[must_use]
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Number of calls received.
    #[must_use]
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Shared handle on the call counter.
    #[must_use]
    pub fn counter(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.calls)
    }
}

impl<S> MethodInterceptor for RecordingInterceptor<S>
where
    S: MethodInterceptor,
{
    fn invoke<T, V, E>(&self, invocation: Invocation<'_, T, V, E>) -> Result<Returned<T, V, E>, E>
    where
        V: 'static,
        E: From<TransactionError> + std::error::Error + Send + Sync + 'static,
    {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inner.invoke(invocation)
    }
}
