//! # Traverse TX Runtime
//!
//! Interceptors that tie a transaction to the consumption of a lazy traversal
//! instead of to the method call that produced it.
//!
//! ## Core Components
//!
//! - **TraverseSupportInterceptor**: dispatch gate; wraps lazy results,
//!   delegates everything else
//! - **TransactionalTraversable**: opens one transaction per drive and
//!   finalizes it from the drive's outcome
//! - **Completion**: decision table (commit on exhaustion, rollback on early
//!   stop or error) and the per-drive `TransactionInfo`
//! - **StandardTransactionInterceptor**: method-scoped transactions for
//!   immediate results
//!
//! ## Example
//!
//! ```ignore
//! use traverse_tx_runtime::{InterceptorConfig, MethodInterceptor, TraverseSupportInterceptor};
//!
//! let support = Arc::new(
//!     TransactionSupport::new(TransactionManagerResolver::new().with_default(manager))
//!         .with_attribute_source(Arc::new(source)),
//! );
//! let interceptor = TraverseSupportInterceptor::standard(support, InterceptorConfig::from_env()?);
//!
//! // The returned traversable commits only once a driver exhausts it
//! let entries = interceptor.invoke(invocation)?.into_traversable();
//! ```

/// Outcome resolution and per-drive transaction state
pub mod completion;

/// Interceptor configuration
pub mod config;

/// Dispatch gate and method-scoped interceptor
pub mod interceptor;

/// Prometheus metrics for observability
pub mod metrics;

/// Attribute and manager resolution
pub mod support;

/// The transactional traversal decorator
pub mod transactional;

pub use completion::{CompletionAction, DriveOutcome, TransactionInfo, TransactionState};
pub use config::{ConfigError, InterceptorConfig, UnsupportedManagerPolicy};
pub use interceptor::{MethodInterceptor, StandardTransactionInterceptor, TraverseSupportInterceptor};
pub use metrics::MetricsRecorder;
pub use support::{ManagerRef, TransactionManagerResolver, TransactionSupport};
pub use transactional::TransactionalTraversable;
