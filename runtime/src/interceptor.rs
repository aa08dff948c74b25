//! Method interceptors.
//!
//! [`StandardTransactionInterceptor`] is the conventional method-scoped path:
//! the transaction ends when the method returns. [`TraverseSupportInterceptor`]
//! is the dispatch gate in front of it. Calls declared to return a lazy
//! sequence are wrapped in a [`TransactionalTraversable`] so the transaction
//! tracks the consumption instead; everything else is delegated unchanged.

use crate::completion::TransactionInfo;
use crate::config::{InterceptorConfig, UnsupportedManagerPolicy};
use crate::metrics::DispatchMetrics;
use crate::support::{ManagerRef, TransactionSupport};
use crate::transactional::TransactionalTraversable;
use std::sync::Arc;
use traverse_tx_core::attribute::TransactionAttribute;
use traverse_tx_core::emission::Emittable;
use traverse_tx_core::error::TransactionError;
use traverse_tx_core::invocation::{Invocation, ReturnShape, Returned};
use traverse_tx_core::transaction::PlatformTransactionManager;
use traverse_tx_core::traversable::BoxTraversable;

/// Intercepts one method call.
///
/// Error types opt in with `From<TransactionError>`, so infrastructure
/// failures surface through the method's own error type.
pub trait MethodInterceptor: Send + Sync {
    /// Run the invocation, possibly inside a transaction.
    ///
    /// # Errors
    ///
    /// Returns the target's error, or a converted [`TransactionError`] when
    /// attribute resolution, manager lookup, or transaction handling fails.
    fn invoke<T, V, E>(&self, invocation: Invocation<'_, T, V, E>) -> Result<Returned<T, V, E>, E>
    where
        V: 'static,
        E: From<TransactionError> + std::error::Error + Send + Sync + 'static;
}

/// Method-scoped transactional interceptor.
///
/// Begins before the target runs and commits (or completes after the error)
/// as soon as it returns.
#[derive(Clone, Debug)]
pub struct StandardTransactionInterceptor {
    support: Arc<TransactionSupport>,
}

impl StandardTransactionInterceptor {
    /// Create an interceptor over shared support.
    #[must_use]
    pub const fn new(support: Arc<TransactionSupport>) -> Self {
        Self { support }
    }

    /// The shared attribute and manager support.
    #[must_use]
    pub const fn support(&self) -> &Arc<TransactionSupport> {
        &self.support
    }
}

impl MethodInterceptor for StandardTransactionInterceptor {
    fn invoke<T, V, E>(&self, invocation: Invocation<'_, T, V, E>) -> Result<Returned<T, V, E>, E>
    where
        V: 'static,
        E: From<TransactionError> + std::error::Error + Send + Sync + 'static,
    {
        let method = Arc::clone(invocation.method());
        let target = invocation.target().cloned();
        let attribute = self.support.resolve_attribute(&method, target.as_ref())?;
        let manager = self.support.determine_manager(attribute.as_deref())?;
        let joinpoint =
            TransactionSupport::joinpoint_identification(&method, target.as_ref(), attribute.as_deref());

        let platform = match manager {
            Some(ManagerRef::Platform(manager)) => Some(manager),
            Some(ManagerRef::Opaque { name }) if attribute.is_some() => {
                return Err(TransactionError::UnsupportedManager {
                    manager: name,
                    joinpoint,
                }
                .into());
            }
            _ => None,
        };

        let mut info = TransactionInfo::begin(platform.as_ref(), attribute, joinpoint)?;
        match invocation.proceed() {
            Ok(returned) => {
                info.commit_on_success()?;
                Ok(returned)
            }
            Err(err) => {
                if let Err(tx_err) = info.complete_after_error(&err) {
                    tracing::error!(
                        joinpoint = %info.joinpoint(),
                        error = %err,
                        transaction_error = %tx_err,
                        "Rollback failed after application error, returning the application error"
                    );
                }
                Err(err)
            }
        }
    }
}

/// Dispatch gate for lazily consumed results.
///
/// Immediate results go to the delegate. Traversable and emittable results
/// are returned wrapped, so each drive of the result runs in its own
/// transaction that commits on exhaustion and rolls back on early stop or
/// error.
///
/// # Example
///
/// ```ignore
/// let support = Arc::new(TransactionSupport::new(managers).with_attribute_source(source));
/// let interceptor = TraverseSupportInterceptor::standard(support, InterceptorConfig::default());
///
/// let returned = interceptor.invoke(invocation)?;
/// ```
#[derive(Clone, Debug)]
pub struct TraverseSupportInterceptor<S> {
    delegate: S,
    support: Arc<TransactionSupport>,
    config: InterceptorConfig,
}

impl TraverseSupportInterceptor<StandardTransactionInterceptor> {
    /// Gate in front of a [`StandardTransactionInterceptor`] sharing `support`.
    #[must_use]
    pub fn standard(support: Arc<TransactionSupport>, config: InterceptorConfig) -> Self {
        Self::new(
            StandardTransactionInterceptor::new(Arc::clone(&support)),
            support,
            config,
        )
    }
}

impl<S> TraverseSupportInterceptor<S> {
    /// Gate in front of an arbitrary delegate.
    #[must_use]
    pub const fn new(delegate: S, support: Arc<TransactionSupport>, config: InterceptorConfig) -> Self {
        Self {
            delegate,
            support,
            config,
        }
    }

    /// The interceptor immediate calls are delegated to.
    #[must_use]
    pub const fn delegate(&self) -> &S {
        &self.delegate
    }

    /// The active configuration.
    #[must_use]
    pub const fn config(&self) -> &InterceptorConfig {
        &self.config
    }

    fn wrap<V, E>(
        &self,
        raw: BoxTraversable<V, E>,
        manager: &Arc<dyn PlatformTransactionManager>,
        attribute: Option<Arc<TransactionAttribute>>,
        joinpoint: String,
    ) -> TransactionalTraversable<V, E> {
        TransactionalTraversable::new(raw, Arc::clone(manager), attribute, joinpoint)
            .with_sequential_advisory(self.config.sequential_advisory)
    }
}

impl<S> TraverseSupportInterceptor<S>
where
    S: MethodInterceptor,
{
    fn unsupported<T, V, E>(
        &self,
        invocation: Invocation<'_, T, V, E>,
        attribute: Option<&TransactionAttribute>,
        manager: Option<&ManagerRef>,
        joinpoint: String,
    ) -> Result<Returned<T, V, E>, E>
    where
        V: 'static,
        E: From<TransactionError> + std::error::Error + Send + Sync + 'static,
    {
        if attribute.is_none() {
            return self.delegate.invoke(invocation);
        }

        let manager = manager.map_or("<none>", ManagerRef::name).to_string();
        match self.config.unsupported_manager {
            UnsupportedManagerPolicy::Delegate => {
                tracing::warn!(
                    joinpoint = %joinpoint,
                    manager = %manager,
                    "Transaction manager cannot drive a lazy traversal, \
                     the transaction will end when the method returns"
                );
                DispatchMetrics::record_delegated(&manager);
                self.delegate.invoke(invocation)
            }
            UnsupportedManagerPolicy::Reject => {
                tracing::warn!(
                    joinpoint = %joinpoint,
                    manager = %manager,
                    "Rejecting lazy traversal without a supported transaction manager"
                );
                Err(TransactionError::UnsupportedManager { manager, joinpoint }.into())
            }
        }
    }
}

impl<S> MethodInterceptor for TraverseSupportInterceptor<S>
where
    S: MethodInterceptor,
{
    fn invoke<T, V, E>(&self, invocation: Invocation<'_, T, V, E>) -> Result<Returned<T, V, E>, E>
    where
        V: 'static,
        E: From<TransactionError> + std::error::Error + Send + Sync + 'static,
    {
        let method = Arc::clone(invocation.method());
        let declared = method.return_shape();
        if !declared.is_lazy() {
            return self.delegate.invoke(invocation);
        }

        let target = invocation.target().cloned();
        let attribute = self.support.resolve_attribute(&method, target.as_ref())?;
        let manager = self.support.determine_manager(attribute.as_deref())?;
        let joinpoint =
            TransactionSupport::joinpoint_identification(&method, target.as_ref(), attribute.as_deref());

        let Some(platform) = manager.as_ref().and_then(ManagerRef::as_platform).cloned() else {
            return self.unsupported(invocation, attribute.as_deref(), manager.as_ref(), joinpoint);
        };

        match (declared, invocation.proceed()?) {
            (ReturnShape::Traversable, Returned::Traversable(Some(raw))) => {
                let wrapped = self.wrap(raw, &platform, attribute, joinpoint);
                Ok(Returned::Traversable(Some(Box::new(wrapped))))
            }
            (ReturnShape::Emittable, Returned::Emittable(Some(raw))) => {
                let buffer = self.config.emission_buffer;
                let wrapped = self.wrap(Box::new(raw), &platform, attribute, joinpoint);
                Ok(Returned::Emittable(Some(Emittable::new(wrapped).with_buffer(buffer))))
            }
            (ReturnShape::Traversable, absent @ Returned::Traversable(None))
            | (ReturnShape::Emittable, absent @ Returned::Emittable(None)) => {
                tracing::trace!(joinpoint = %joinpoint, "Target returned no sequence, nothing to wrap");
                Ok(absent)
            }
            (_, other) => Err(TransactionError::ReturnShapeMismatch {
                joinpoint,
                declared,
                actual: other.shape(),
            }
            .into()),
        }
    }
}
