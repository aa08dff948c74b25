//! The lazy traversal abstraction.
//!
//! A [`Traversable`] is a pull-driven cursor: driving it pushes elements into a
//! callback until either the source is exhausted (`Ok(true)`), the callback
//! asks to stop (`Ok(false)`), or production fails (`Err`).
//!
//! # Example
//!
//! ```
//! use std::ops::ControlFlow;
//! use traverse_tx_core::context::TraverseContext;
//! use traverse_tx_core::traversable::{self, Traversable};
//!
//! let numbers = traversable::from_fn(|| (1..=3).map(Ok::<_, std::io::Error>));
//! let ctx = TraverseContext::new();
//!
//! let mut seen = Vec::new();
//! let exhausted = numbers
//!     .sequence(&mut |n| { seen.push(n); ControlFlow::Continue(()) }, &ctx)
//!     .unwrap();
//!
//! assert!(exhausted);
//! assert_eq!(seen, vec![1, 2, 3]);
//! ```

use crate::context::TraverseContext;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::marker::PhantomData;
use std::ops::ControlFlow;
use std::sync::Arc;

/// How the driver asked for the elements to be produced.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TraverseMethod {
    /// One element at a time, in order, on the driving thread.
    Sequence,
    /// The source may produce elements concurrently.
    Parallel,
}

impl TraverseMethod {
    /// Whether this is strictly sequential traversal.
    #[must_use]
    pub const fn is_sequence(self) -> bool {
        matches!(self, Self::Sequence)
    }
}

impl fmt::Display for TraverseMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Sequence => write!(f, "sequence"),
            Self::Parallel => write!(f, "parallel"),
        }
    }
}

/// A pull-based, possibly infinite sequence of values.
///
/// # Contract
///
/// - The callback is invoked once per produced element, in production order.
/// - The callback returns [`ControlFlow::Break`] to stop early; the source must
///   then stop producing and return `Ok(false)`.
/// - `Ok(true)` means the source was exhausted.
/// - Errors raised while producing are returned as-is; elements delivered before
///   the error stay delivered.
///
/// Re-driving a sequence after a terminal outcome is governed by the
/// implementation (some sources restart, some return nothing).
pub trait Traversable<V>: Send + Sync {
    /// Error raised while producing elements.
    type Error;

    /// Drive the sequence with the requested traversal method.
    ///
    /// # Errors
    ///
    /// Returns the implementation's production error.
    fn traverse(
        &self,
        method: TraverseMethod,
        traverse: &mut dyn FnMut(V) -> ControlFlow<()>,
        ctx: &TraverseContext,
    ) -> Result<bool, Self::Error>;

    /// Drive the sequence strictly sequentially.
    ///
    /// # Errors
    ///
    /// Returns the implementation's production error.
    fn sequence(
        &self,
        traverse: &mut dyn FnMut(V) -> ControlFlow<()>,
        ctx: &TraverseContext,
    ) -> Result<bool, Self::Error> {
        self.traverse(TraverseMethod::Sequence, traverse, ctx)
    }
}

/// Owned, type-erased traversable.
pub type BoxTraversable<V, E> = Box<dyn Traversable<V, Error = E>>;

impl<V, T> Traversable<V> for Box<T>
where
    T: Traversable<V> + ?Sized,
{
    type Error = T::Error;

    fn traverse(
        &self,
        method: TraverseMethod,
        traverse: &mut dyn FnMut(V) -> ControlFlow<()>,
        ctx: &TraverseContext,
    ) -> Result<bool, Self::Error> {
        (**self).traverse(method, traverse, ctx)
    }

    fn sequence(
        &self,
        traverse: &mut dyn FnMut(V) -> ControlFlow<()>,
        ctx: &TraverseContext,
    ) -> Result<bool, Self::Error> {
        (**self).sequence(traverse, ctx)
    }
}

impl<V, T> Traversable<V> for Arc<T>
where
    T: Traversable<V> + ?Sized,
{
    type Error = T::Error;

    fn traverse(
        &self,
        method: TraverseMethod,
        traverse: &mut dyn FnMut(V) -> ControlFlow<()>,
        ctx: &TraverseContext,
    ) -> Result<bool, Self::Error> {
        (**self).traverse(method, traverse, ctx)
    }

    fn sequence(
        &self,
        traverse: &mut dyn FnMut(V) -> ControlFlow<()>,
        ctx: &TraverseContext,
    ) -> Result<bool, Self::Error> {
        (**self).sequence(traverse, ctx)
    }
}

/// Restartable traversable backed by an iterator factory.
///
/// Every drive calls the factory again, so the sequence can be driven any
/// number of times. Created with [`from_fn`].
#[derive(Clone)]
pub struct FnTraversable<F> {
    factory: F,
}

impl<F> fmt::Debug for FnTraversable<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnTraversable").finish_non_exhaustive()
    }
}

/// Build a traversable from a factory producing `Result` items.
///
/// The first `Err` item ends the traversal with that error.
pub const fn from_fn<F, I, V, E>(factory: F) -> FnTraversable<F>
where
    F: Fn() -> I + Send + Sync,
    I: IntoIterator<Item = Result<V, E>>,
{
    FnTraversable { factory }
}

impl<F, I, V, E> Traversable<V> for FnTraversable<F>
where
    F: Fn() -> I + Send + Sync,
    I: IntoIterator<Item = Result<V, E>>,
{
    type Error = E;

    fn traverse(
        &self,
        _method: TraverseMethod,
        traverse: &mut dyn FnMut(V) -> ControlFlow<()>,
        _ctx: &TraverseContext,
    ) -> Result<bool, E> {
        for item in (self.factory)() {
            if traverse(item?).is_break() {
                return Ok(false);
            }
        }
        Ok(true)
    }
}

/// A traversable that is exhausted immediately.
pub struct Empty<E> {
    _error: PhantomData<fn() -> E>,
}

impl<E> fmt::Debug for Empty<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Empty")
    }
}

/// Create an [`Empty`] traversable.
#[must_use]
pub const fn empty<E>() -> Empty<E> {
    Empty {
        _error: PhantomData,
    }
}

impl<V, E> Traversable<V> for Empty<E> {
    type Error = E;

    fn traverse(
        &self,
        _method: TraverseMethod,
        _traverse: &mut dyn FnMut(V) -> ControlFlow<()>,
        _ctx: &TraverseContext,
    ) -> Result<bool, E> {
        Ok(true)
    }
}
