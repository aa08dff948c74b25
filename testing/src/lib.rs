//! # Traverse TX Testing
//!
//! Testing utilities for transactional traversals.
//!
//! This crate provides:
//! - [`InMemoryTransactionManager`]: records every begin/commit/rollback and
//!   stages writes until commit
//! - [`ScriptedTraversable`]: fixed elements with scripted errors, rejections,
//!   or panics
//! - [`RecordingInterceptor`]: counts calls delegated to it
//! - [`GateHarness`]: builds a dispatch gate over an in-memory manager
//! - Drive helpers and proptest strategies
//!
//! ## Example
//!
//! ```ignore
//! use traverse_tx_testing::{helpers, InMemoryTransactionManager, ScriptedTraversable};
//!
//! #[test]
//! fn exhaustion_commits() {
//!     let manager = InMemoryTransactionManager::new();
//!     let entries = gate_for(&manager).invoke(entries_invocation(vec![1, 2, 3]))?;
//!
//!     let (seen, result) = helpers::drive_all(&entries.into_traversable().unwrap());
//!     assert_eq!(seen, vec![1, 2, 3]);
//!     assert_eq!(manager.commit_count(), 1);
//! }
//! ```

/// In-memory transaction manager
pub mod manager;

/// Scripted traversables and errors
pub mod traversables;

/// Interceptor doubles
pub mod interceptors;

/// Fluent gate setup
pub mod harness;

/// Test helpers and utilities.
pub mod helpers {
    use std::ops::ControlFlow;
    use traverse_tx_core::context::TraverseContext;
    use traverse_tx_core::traversable::Traversable;

    /// Drive `source` to exhaustion with a fresh context.
    pub fn drive_all<V, T>(source: &T) -> (Vec<V>, Result<bool, T::Error>)
    where
        T: Traversable<V> + ?Sized,
    {
        drive_take(source, usize::MAX, &TraverseContext::new())
    }

    /// Drive `source` in `ctx`, stopping after `limit` elements.
    pub fn drive_take<V, T>(
        source: &T,
        limit: usize,
        ctx: &TraverseContext,
    ) -> (Vec<V>, Result<bool, T::Error>)
    where
        T: Traversable<V> + ?Sized,
    {
        let mut seen = Vec::new();
        if limit == 0 {
            let result = source.sequence(&mut |_| ControlFlow::Break(()), ctx);
            return (seen, result);
        }
        let result = source.sequence(
            &mut |value| {
                seen.push(value);
                if seen.len() >= limit {
                    ControlFlow::Break(())
                } else {
                    ControlFlow::Continue(())
                }
            },
            ctx,
        );
        (seen, result)
    }

    /// Install a test-friendly tracing subscriber honouring `RUST_LOG`.
    ///
    /// Safe to call from every test; only the first call installs.
    pub fn init_test_tracing() {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| "traverse_tx_runtime=debug".into()),
            )
            .with_test_writer()
            .try_init();
    }
}

/// Property-based testing utilities using proptest.
pub mod properties {
    use proptest::prelude::*;
    use std::time::Duration;
    use traverse_tx_core::attribute::TransactionAttribute;
    use traverse_tx_core::transaction::{Isolation, Propagation};

    /// Any propagation that begins a transaction without an outer one.
    pub fn standalone_propagation() -> impl Strategy<Value = Propagation> {
        prop_oneof![
            Just(Propagation::Required),
            Just(Propagation::RequiresNew),
            Just(Propagation::Nested),
            Just(Propagation::Supports),
            Just(Propagation::NotSupported),
        ]
    }

    /// Any isolation level.
    pub fn isolation() -> impl Strategy<Value = Isolation> {
        prop_oneof![
            Just(Isolation::Default),
            Just(Isolation::ReadUncommitted),
            Just(Isolation::ReadCommitted),
            Just(Isolation::RepeatableRead),
            Just(Isolation::Serializable),
        ]
    }

    /// Attributes without rollback rules or qualifiers.
    pub fn attribute() -> impl Strategy<Value = TransactionAttribute> {
        (
            standalone_propagation(),
            isolation(),
            any::<bool>(),
            proptest::option::of(1u64..600),
        )
            .prop_map(|(propagation, isolation, read_only, timeout)| {
                let attribute = TransactionAttribute::new()
                    .with_propagation(propagation)
                    .with_isolation(isolation)
                    .with_read_only(read_only);
                match timeout {
                    Some(secs) => attribute.with_timeout(Duration::from_secs(secs)),
                    None => attribute,
                }
            })
    }
}

// Re-export commonly used items
pub use harness::{Gate, GateHarness, calls};
pub use interceptors::RecordingInterceptor;
pub use manager::{InMemoryTransactionManager, TransactionEvent};
pub use traversables::{ExampleError, ScriptedTraversable, ValidationError};
