//! Attribute and manager resolution shared by both interceptors.
//!
//! Both the method-scoped interceptor and the traversal gate need the same
//! three answers for a call: which attribute applies, which manager drives it,
//! and how to label it in diagnostics. [`TransactionSupport`] provides them
//! and is shared behind `Arc`.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use traverse_tx_core::attribute::{TransactionAttribute, TransactionAttributeSource};
use traverse_tx_core::error::{Result, TransactionError};
use traverse_tx_core::invocation::{MethodDescriptor, TargetType};
use traverse_tx_core::transaction::PlatformTransactionManager;

/// A registered transaction manager.
#[derive(Clone)]
pub enum ManagerRef {
    /// A manager with synchronous begin/commit/rollback.
    Platform(Arc<dyn PlatformTransactionManager>),
    /// A manager registered for other interceptors (for example an async
    /// one) that cannot be driven from a traversal.
    Opaque {
        /// Name used in diagnostics.
        name: String,
    },
}

impl ManagerRef {
    /// Register a platform manager.
    pub fn platform<M>(manager: M) -> Self
    where
        M: PlatformTransactionManager + 'static,
    {
        Self::Platform(Arc::new(manager))
    }

    /// Register an opaque manager under `name`.
    #[must_use]
    pub fn opaque(name: impl Into<String>) -> Self {
        Self::Opaque { name: name.into() }
    }

    /// Name used in diagnostics.
    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            Self::Platform(manager) => manager.name(),
            Self::Opaque { name } => name,
        }
    }

    /// The platform manager, if this is one.
    #[must_use]
    pub const fn as_platform(&self) -> Option<&Arc<dyn PlatformTransactionManager>> {
        match self {
            Self::Platform(manager) => Some(manager),
            Self::Opaque { .. } => None,
        }
    }
}

impl fmt::Debug for ManagerRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Platform(manager) => write!(f, "ManagerRef::Platform({})", manager.name()),
            Self::Opaque { name } => write!(f, "ManagerRef::Opaque({name})"),
        }
    }
}

/// Default manager plus managers selectable by attribute qualifier.
#[derive(Clone, Debug, Default)]
pub struct TransactionManagerResolver {
    default: Option<ManagerRef>,
    named: HashMap<String, ManagerRef>,
}

impl TransactionManagerResolver {
    /// Create a resolver without any manager.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the default manager.
    #[must_use]
    pub fn with_default(mut self, manager: ManagerRef) -> Self {
        self.default = Some(manager);
        self
    }

    /// Register a manager selectable by qualifier.
    #[must_use]
    pub fn with_named(mut self, qualifier: impl Into<String>, manager: ManagerRef) -> Self {
        self.named.insert(qualifier.into(), manager);
        self
    }

    /// Pick the manager for an attribute.
    ///
    /// A qualifier on the attribute selects a named manager; otherwise the
    /// default manager is used. `Ok(None)` means no manager is configured.
    ///
    /// # Errors
    ///
    /// Returns `NoSuchManager` when the qualifier is unknown.
    pub fn determine(&self, attribute: Option<&TransactionAttribute>) -> Result<Option<ManagerRef>> {
        match attribute.and_then(TransactionAttribute::qualifier) {
            Some(qualifier) => self
                .named
                .get(qualifier)
                .cloned()
                .map(Some)
                .ok_or_else(|| TransactionError::NoSuchManager(qualifier.to_string())),
            None => Ok(self.default.clone()),
        }
    }
}

/// Attribute source and managers, shared by every interceptor.
#[derive(Clone, Default)]
pub struct TransactionSupport {
    attributes: Option<Arc<dyn TransactionAttributeSource>>,
    managers: TransactionManagerResolver,
}

impl TransactionSupport {
    /// Create support around a manager resolver, without an attribute source.
    #[must_use]
    pub fn new(managers: TransactionManagerResolver) -> Self {
        Self {
            attributes: None,
            managers,
        }
    }

    /// Set the attribute source.
    #[must_use]
    pub fn with_attribute_source(mut self, source: Arc<dyn TransactionAttributeSource>) -> Self {
        self.attributes = Some(source);
        self
    }

    /// Resolve the attribute for a call. Without a source nothing is transactional.
    ///
    /// # Errors
    ///
    /// Propagates the attribute source's error unchanged.
    pub fn resolve_attribute(
        &self,
        method: &MethodDescriptor,
        target: Option<&TargetType>,
    ) -> Result<Option<Arc<TransactionAttribute>>> {
        match &self.attributes {
            Some(source) => source.transaction_attribute(method, target),
            None => Ok(None),
        }
    }

    /// Pick the manager for an attribute.
    ///
    /// # Errors
    ///
    /// Returns `NoSuchManager` when the attribute's qualifier is unknown.
    pub fn determine_manager(
        &self,
        attribute: Option<&TransactionAttribute>,
    ) -> Result<Option<ManagerRef>> {
        self.managers.determine(attribute)
    }

    /// Diagnostic label for a call.
    ///
    /// Precedence: the descriptor's own identification, the attribute's
    /// descriptor, then `Type.method`.
    #[must_use]
    pub fn joinpoint_identification(
        method: &MethodDescriptor,
        target: Option<&TargetType>,
        attribute: Option<&TransactionAttribute>,
    ) -> String {
        method
            .identification()
            .or_else(|| attribute.and_then(TransactionAttribute::descriptor))
            .map_or_else(|| method.qualified_name(target), str::to_string)
    }
}

impl fmt::Debug for TransactionSupport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransactionSupport")
            .field("attributes", &self.attributes.is_some())
            .field("managers", &self.managers)
            .finish()
    }
}
