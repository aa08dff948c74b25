//! Push-style emission of a lazy sequence.
//!
//! [`Emittable`] is a transparent wrapper: as a [`Traversable`] it simply
//! delegates, so whatever transaction logic the inner sequence carries applies
//! unchanged. It can additionally be turned into a `futures` stream, which
//! drives the sequence on Tokio's blocking pool and forwards elements through
//! a bounded channel. Elements are produced only as the stream asks for them,
//! so dropping the stream stops the traversal early even when the channel
//! still has room.
//!
//! # Example
//!
//! ```no_run
//! use futures::StreamExt;
//! use traverse_tx_core::emission::Emittable;
//! use traverse_tx_core::traversable;
//!
//! # async fn example() {
//! let emittable = Emittable::new(traversable::from_fn(|| (1..=3).map(Ok::<_, std::io::Error>)));
//! let values: Vec<_> = emittable.stream().collect().await;
//! assert_eq!(values.len(), 3);
//! # }
//! ```

use crate::context::TraverseContext;
use crate::traversable::{Traversable, TraverseMethod};
use futures::stream::{self, BoxStream, StreamExt};
use std::fmt;
use std::ops::ControlFlow;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Channel capacity used by [`Emittable::stream`] unless overridden.
pub const DEFAULT_EMISSION_BUFFER: usize = 16;

/// A lazy sequence exposed for push-style delivery.
pub struct Emittable<V, E> {
    source: Arc<dyn Traversable<V, Error = E>>,
    buffer: usize,
}

impl<V, E> Emittable<V, E> {
    /// Wrap a traversable.
    pub fn new<T>(source: T) -> Self
    where
        T: Traversable<V, Error = E> + 'static,
    {
        Self {
            source: Arc::new(source),
            buffer: DEFAULT_EMISSION_BUFFER,
        }
    }

    /// Set the channel capacity used by [`stream`](Self::stream).
    #[must_use]
    pub const fn with_buffer(mut self, buffer: usize) -> Self {
        self.buffer = buffer;
        self
    }

    /// The channel capacity used by [`stream`](Self::stream).
    #[must_use]
    pub const fn buffer(&self) -> usize {
        self.buffer
    }

    /// Emit elements as a stream with the configured buffer.
    ///
    /// # Panics
    ///
    /// Panics when called outside a Tokio runtime.
    #[must_use]
    pub fn stream(&self) -> BoxStream<'static, Result<V, E>>
    where
        V: Send + 'static,
        E: Send + 'static,
    {
        self.emit(self.buffer)
    }

    /// Emit elements as a stream through a channel of `buffer` slots.
    ///
    /// The sequence is driven once, sequentially, with a fresh
    /// [`TraverseContext`]. A production error is delivered as the final
    /// item.
    ///
    /// Each poll of the stream grants demand for one element and the
    /// producer waits for that demand before forwarding. Dropping the stream
    /// withdraws the demand, so the next element delivery stops the
    /// traversal, which then reports an early stop.
    ///
    /// # Panics
    ///
    /// Panics when called outside a Tokio runtime.
    #[must_use]
    pub fn emit(&self, buffer: usize) -> BoxStream<'static, Result<V, E>>
    where
        V: Send + 'static,
        E: Send + 'static,
    {
        let (tx, rx) = mpsc::channel(buffer.max(1));
        let (demand_tx, mut demand_rx) = mpsc::unbounded_channel::<()>();
        let source = Arc::clone(&self.source);

        tokio::task::spawn_blocking(move || {
            let ctx = TraverseContext::new();
            let mut forward = |value: V| {
                if demand_rx.blocking_recv().is_none() {
                    return ControlFlow::Break(());
                }
                match tx.blocking_send(Ok(value)) {
                    Ok(()) => ControlFlow::Continue(()),
                    Err(_) => ControlFlow::Break(()),
                }
            };
            match source.sequence(&mut forward, &ctx) {
                Ok(exhausted) => {
                    tracing::trace!(exhausted, "Emission finished");
                }
                Err(err) => {
                    if tx.blocking_send(Err(err)).is_err() {
                        tracing::debug!("Emission error dropped, receiver is gone");
                    }
                }
            }
        });

        stream::unfold((rx, demand_tx), |(mut rx, demand)| async move {
            // The producer is gone once the traversal finished
            let _ = demand.send(());
            rx.recv().await.map(|item| (item, (rx, demand)))
        })
        .boxed()
    }
}

impl<V, E> Clone for Emittable<V, E> {
    fn clone(&self) -> Self {
        Self {
            source: Arc::clone(&self.source),
            buffer: self.buffer,
        }
    }
}

impl<V, E> fmt::Debug for Emittable<V, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Emittable(<traversable>)")
    }
}

impl<V, E> Traversable<V> for Emittable<V, E> {
    type Error = E;

    fn traverse(
        &self,
        method: TraverseMethod,
        traverse: &mut dyn FnMut(V) -> ControlFlow<()>,
        ctx: &TraverseContext,
    ) -> Result<bool, E> {
        self.source.traverse(method, traverse, ctx)
    }

    fn sequence(
        &self,
        traverse: &mut dyn FnMut(V) -> ControlFlow<()>,
        ctx: &TraverseContext,
    ) -> Result<bool, E> {
        self.source.sequence(traverse, ctx)
    }
}
