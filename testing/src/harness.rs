//! Fluent setup for dispatch gate tests.
//!
//! ```ignore
//! let gate = GateHarness::new()
//!     .with_attribute("find*", TransactionAttribute::new())
//!     .build();
//!
//! let returned = gate.invoke(calls::traversable("findEntries", ScriptedTraversable::new(vec![1, 2, 3])))?;
//! let (seen, result) = helpers::drive_all(&returned.into_traversable().unwrap());
//!
//! assert_eq!(gate.manager().commit_count(), 1);
//! assert_eq!(gate.delegated(), 0);
//! ```

use crate::interceptors::RecordingInterceptor;
use crate::manager::InMemoryTransactionManager;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use traverse_tx_core::attribute::{NameMatchAttributeSource, TransactionAttribute, TransactionAttributeSource};
use traverse_tx_core::error::TransactionError;
use traverse_tx_core::invocation::{Invocation, Returned};
use traverse_tx_runtime::config::InterceptorConfig;
use traverse_tx_runtime::interceptor::{
    MethodInterceptor, StandardTransactionInterceptor, TraverseSupportInterceptor,
};
use traverse_tx_runtime::support::{ManagerRef, TransactionManagerResolver, TransactionSupport};

/// The gate under test, with a recording delegate.
pub type RecordedGate = TraverseSupportInterceptor<RecordingInterceptor<StandardTransactionInterceptor>>;

/// Builder for a [`Gate`].
pub struct GateHarness {
    manager: InMemoryTransactionManager,
    attributes: NameMatchAttributeSource,
    source: Option<Arc<dyn TransactionAttributeSource>>,
    resolver: Option<TransactionManagerResolver>,
    config: InterceptorConfig,
}

impl Default for GateHarness {
    fn default() -> Self {
        Self::new()
    }
}

impl GateHarness {
    /// A harness whose default manager is a fresh [`InMemoryTransactionManager`].
    #[must_use]
    pub fn new() -> Self {
        Self {
            manager: InMemoryTransactionManager::new(),
            attributes: NameMatchAttributeSource::new(),
            source: None,
            resolver: None,
            config: InterceptorConfig::default(),
        }
    }

    /// Make methods matching `pattern` transactional.
    #[must_use]
    pub fn with_attribute(mut self, pattern: &str, attribute: TransactionAttribute) -> Self {
        self.attributes.add_method(pattern, attribute);
        self
    }

    /// Replace the name-pattern attributes with a custom source.
    #[must_use]
    pub fn with_source(mut self, source: Arc<dyn TransactionAttributeSource>) -> Self {
        self.source = Some(source);
        self
    }

    /// Replace the default resolver (which only holds the in-memory manager).
    #[must_use]
    pub fn with_resolver(mut self, resolver: TransactionManagerResolver) -> Self {
        self.resolver = Some(resolver);
        self
    }

    /// Set the gate configuration.
    #[must_use]
    pub fn with_config(mut self, config: InterceptorConfig) -> Self {
        self.config = config;
        self
    }

    /// Build the gate.
    #[must_use]
    pub fn build(self) -> Gate {
        let resolver = match self.resolver {
            Some(resolver) => resolver,
            None => TransactionManagerResolver::new()
                .with_default(ManagerRef::platform(self.manager.clone())),
        };
        let source: Arc<dyn TransactionAttributeSource> = match self.source {
            Some(source) => source,
            None => Arc::new(self.attributes),
        };
        let support = Arc::new(TransactionSupport::new(resolver).with_attribute_source(source));

        let recording = RecordingInterceptor::new(StandardTransactionInterceptor::new(Arc::clone(&support)));
        let delegated = recording.counter();

        Gate {
            manager: self.manager,
            interceptor: TraverseSupportInterceptor::new(recording, support, self.config),
            delegated,
        }
    }
}

/// A built gate plus the handles tests assert on.
#[derive(Debug)]
pub struct Gate {
    manager: InMemoryTransactionManager,
    interceptor: RecordedGate,
    delegated: Arc<AtomicUsize>,
}

impl Gate {
    /// Run an invocation through the gate.
    ///
    /// # Errors
    ///
    /// Returns whatever the gate returns.
    pub fn invoke<T, V, E>(&self, invocation: Invocation<'_, T, V, E>) -> Result<Returned<T, V, E>, E>
    where
        V: 'static,
        E: From<TransactionError> + std::error::Error + Send + Sync + 'static,
    {
        self.interceptor.invoke(invocation)
    }

    /// The default in-memory manager.
    #[must_use]
    pub const fn manager(&self) -> &InMemoryTransactionManager {
        &self.manager
    }

    /// The gate itself.
    #[must_use]
    pub const fn interceptor(&self) -> &RecordedGate {
        &self.interceptor
    }

    /// Calls the gate handed to its delegate.
    #[must_use]
    pub fn delegated(&self) -> usize {
        self.delegated.load(Ordering::SeqCst)
    }
}

/// Invocation builders for a `LedgerRepository` test target.
pub mod calls {
    use crate::traversables::{ExampleError, ScriptedTraversable};
    use std::sync::Arc;
    use traverse_tx_core::emission::Emittable;
    use traverse_tx_core::invocation::{Invocation, MethodDescriptor, Returned, TargetType};
    use traverse_tx_core::traversable::BoxTraversable;

    /// Declaring type used by every builder.
    pub const DECLARING_TYPE: &str = "LedgerRepository";
    /// Target type used by every builder.
    pub const TARGET_TYPE: &str = "InMemoryLedgerRepository";

    fn target() -> Option<TargetType> {
        Some(TargetType::new(TARGET_TYPE))
    }

    /// A method declared to return a traversable, returning `scripted`.
    pub fn traversable<V>(
        method: &str,
        scripted: ScriptedTraversable<V>,
    ) -> Invocation<'static, (), V, ExampleError>
    where
        V: Clone + Send + Sync + 'static,
    {
        let raw: BoxTraversable<V, ExampleError> = Box::new(scripted);
        Invocation::new(
            Arc::new(MethodDescriptor::traversable(DECLARING_TYPE, method)),
            target(),
            move || Ok(Returned::Traversable(Some(raw))),
        )
    }

    /// A method declared to return an emittable, returning `scripted`.
    pub fn emittable<V>(
        method: &str,
        scripted: ScriptedTraversable<V>,
    ) -> Invocation<'static, (), V, ExampleError>
    where
        V: Clone + Send + Sync + 'static,
    {
        let raw = Emittable::new(scripted);
        Invocation::new(
            Arc::new(MethodDescriptor::emittable(DECLARING_TYPE, method)),
            target(),
            move || Ok(Returned::Emittable(Some(raw))),
        )
    }

    /// A method declared to return a traversable that returns none.
    pub fn absent<V: 'static>(method: &str) -> Invocation<'static, (), V, ExampleError> {
        Invocation::new(
            Arc::new(MethodDescriptor::traversable(DECLARING_TYPE, method)),
            target(),
            || Ok(Returned::Traversable(None)),
        )
    }

    /// A method declared to return an emittable that returns none.
    pub fn absent_emittable<V: 'static>(method: &str) -> Invocation<'static, (), V, ExampleError> {
        Invocation::new(
            Arc::new(MethodDescriptor::emittable(DECLARING_TYPE, method)),
            target(),
            || Ok(Returned::Emittable(None)),
        )
    }

    /// A method returning an immediate value.
    pub fn immediate<T: 'static>(method: &str, value: T) -> Invocation<'static, T, (), ExampleError> {
        Invocation::new(
            Arc::new(MethodDescriptor::immediate(DECLARING_TYPE, method)),
            target(),
            move || Ok(Returned::Value(value)),
        )
    }

    /// A call with an explicit descriptor and target body.
    pub fn custom<'a, T, V, F>(
        method: MethodDescriptor,
        proceed: F,
    ) -> Invocation<'a, T, V, ExampleError>
    where
        F: FnOnce() -> Result<Returned<T, V, ExampleError>, ExampleError> + 'a,
    {
        Invocation::new(Arc::new(method), target(), proceed)
    }
}
