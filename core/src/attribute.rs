//! Transaction attributes and the sources that resolve them.
//!
//! A [`TransactionAttribute`] is the immutable configuration of one
//! transactional boundary: propagation, isolation, timeout, read-only flag,
//! the manager qualifier, and rollback rules. Attributes are resolved once per
//! call by a [`TransactionAttributeSource`] and shared behind `Arc`.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use traverse_tx_core::attribute::{NameMatchAttributeSource, TransactionAttribute, TransactionAttributeSource};
//! use traverse_tx_core::invocation::MethodDescriptor;
//!
//! let mut source = NameMatchAttributeSource::new();
//! source.add_method("find*", "PROPAGATION_REQUIRED,readOnly".parse().unwrap());
//!
//! let method = MethodDescriptor::traversable("LedgerService", "findEntries");
//! let attribute = source.transaction_attribute(&method, None).unwrap().unwrap();
//! assert!(attribute.is_read_only());
//! ```

use crate::error::Result;
use crate::invocation::{MethodDescriptor, TargetType};
use crate::transaction::{Isolation, Propagation};
use std::error::Error;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

/// Error type for [`TransactionAttribute`] parsing.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("Invalid transaction attribute: {0}")]
pub struct ParseAttributeError(String);

/// Whether a matching rule forces rollback or commit.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum RuleKind {
    Rollback,
    NoRollback,
}

/// A type-based rollback rule.
///
/// A rule matches an error when the error itself, or any error in its
/// `source()` chain, is of the rule's type. The match depth is the position in
/// that chain.
#[derive(Clone)]
pub struct RollbackRule {
    kind: RuleKind,
    type_name: &'static str,
    matcher: fn(&(dyn Error + 'static)) -> bool,
}

fn is_type<T: Error + 'static>(error: &(dyn Error + 'static)) -> bool {
    error.is::<T>()
}

impl RollbackRule {
    /// Roll back when an error of type `T` is found.
    #[must_use]
    pub fn rollback_for<T: Error + 'static>() -> Self {
        Self {
            kind: RuleKind::Rollback,
            type_name: std::any::type_name::<T>(),
            matcher: is_type::<T>,
        }
    }

    /// Commit despite an error of type `T`.
    #[must_use]
    pub fn no_rollback_for<T: Error + 'static>() -> Self {
        Self {
            kind: RuleKind::NoRollback,
            type_name: std::any::type_name::<T>(),
            matcher: is_type::<T>,
        }
    }

    /// Whether a match of this rule means rollback.
    #[must_use]
    pub fn is_rollback(&self) -> bool {
        self.kind == RuleKind::Rollback
    }

    /// The matched type's name.
    #[must_use]
    pub const fn type_name(&self) -> &'static str {
        self.type_name
    }

    /// Depth in the source chain at which this rule matches, if it does.
    #[must_use]
    pub fn depth(&self, error: &(dyn Error + 'static)) -> Option<usize> {
        let mut current = Some(error);
        let mut depth = 0;
        while let Some(err) = current {
            if (self.matcher)(err) {
                return Some(depth);
            }
            depth += 1;
            current = err.source();
        }
        None
    }
}

impl fmt::Debug for RollbackRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RollbackRule({self})")
    }
}

impl fmt::Display for RollbackRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            RuleKind::Rollback => write!(f, "-{}", self.type_name),
            RuleKind::NoRollback => write!(f, "+{}", self.type_name),
        }
    }
}

/// Immutable configuration for one transactional boundary.
#[derive(Clone, Debug, Default)]
pub struct TransactionAttribute {
    propagation: Propagation,
    isolation: Isolation,
    timeout: Option<Duration>,
    read_only: bool,
    name: Option<String>,
    qualifier: Option<String>,
    descriptor: Option<String>,
    rollback_rules: Vec<RollbackRule>,
}

impl TransactionAttribute {
    /// `PROPAGATION_REQUIRED`, `ISOLATION_DEFAULT`, read-write, no rules.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the propagation behavior.
    #[must_use]
    pub const fn with_propagation(mut self, propagation: Propagation) -> Self {
        self.propagation = propagation;
        self
    }

    /// Set the isolation level.
    #[must_use]
    pub const fn with_isolation(mut self, isolation: Isolation) -> Self {
        self.isolation = isolation;
        self
    }

    /// Set the timeout managers should honour.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Mark the transaction read-only.
    #[must_use]
    pub const fn with_read_only(mut self, read_only: bool) -> Self {
        self.read_only = read_only;
        self
    }

    /// Set an explicit transaction name.
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Select a named transaction manager.
    #[must_use]
    pub fn with_qualifier(mut self, qualifier: impl Into<String>) -> Self {
        self.qualifier = Some(qualifier.into());
        self
    }

    /// Attach a human-readable descriptor (used as joinpoint identification).
    #[must_use]
    pub fn with_descriptor(mut self, descriptor: impl Into<String>) -> Self {
        self.descriptor = Some(descriptor.into());
        self
    }

    /// Append a rollback rule. Earlier rules win ties.
    #[must_use]
    pub fn with_rule(mut self, rule: RollbackRule) -> Self {
        self.rollback_rules.push(rule);
        self
    }

    /// The propagation behavior.
    #[must_use]
    pub const fn propagation(&self) -> Propagation {
        self.propagation
    }

    /// The isolation level.
    #[must_use]
    pub const fn isolation(&self) -> Isolation {
        self.isolation
    }

    /// The timeout, if any.
    #[must_use]
    pub const fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// Whether the transaction is read-only.
    #[must_use]
    pub const fn is_read_only(&self) -> bool {
        self.read_only
    }

    /// The explicit transaction name, if any.
    #[must_use]
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// The manager qualifier, if any.
    #[must_use]
    pub fn qualifier(&self) -> Option<&str> {
        self.qualifier.as_deref()
    }

    /// The descriptor, if any.
    #[must_use]
    pub fn descriptor(&self) -> Option<&str> {
        self.descriptor.as_deref()
    }

    /// The rollback rules in declaration order.
    #[must_use]
    pub fn rollback_rules(&self) -> &[RollbackRule] {
        &self.rollback_rules
    }

    /// Decide whether `error` should roll the transaction back.
    ///
    /// The rule matching at the smallest source-chain depth wins; ties go to
    /// the rule declared first. Without a matching rule every error rolls back.
    #[must_use]
    pub fn rollback_on(&self, error: &(dyn Error + 'static)) -> bool {
        let mut winner: Option<(usize, &RollbackRule)> = None;
        for rule in &self.rollback_rules {
            if let Some(depth) = rule.depth(error) {
                if winner.is_none_or(|(best, _)| depth < best) {
                    winner = Some((depth, rule));
                }
            }
        }
        winner.is_none_or(|(_, rule)| rule.is_rollback())
    }
}

impl fmt::Display for TransactionAttribute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},{}", self.propagation, self.isolation)?;
        if let Some(timeout) = self.timeout {
            write!(f, ",timeout_{}", timeout.as_secs())?;
        }
        if self.read_only {
            write!(f, ",readOnly")?;
        }
        for rule in &self.rollback_rules {
            write!(f, ",{rule}")?;
        }
        Ok(())
    }
}

impl FromStr for TransactionAttribute {
    type Err = ParseAttributeError;

    /// Parse `PROPAGATION_*`, `ISOLATION_*`, `readOnly`, and `timeout_<secs>`
    /// tokens separated by commas. Rollback rules are type-based and must be
    /// added with [`TransactionAttribute::with_rule`].
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        if s.trim().is_empty() {
            return Err(ParseAttributeError("attribute cannot be empty".to_string()));
        }

        let mut attribute = Self::new();
        for token in s.split(',').map(str::trim) {
            if token.starts_with("PROPAGATION_") {
                attribute.propagation = token.parse().map_err(ParseAttributeError)?;
            } else if token.starts_with("ISOLATION_") {
                attribute.isolation = token.parse().map_err(ParseAttributeError)?;
            } else if token == "readOnly" {
                attribute.read_only = true;
            } else if let Some(secs) = token.strip_prefix("timeout_") {
                let secs = secs
                    .parse::<u64>()
                    .map_err(|e| ParseAttributeError(format!("{token}: {e}")))?;
                attribute.timeout = Some(Duration::from_secs(secs));
            } else if token.starts_with('+') || token.starts_with('-') {
                return Err(ParseAttributeError(format!(
                    "{token}: rollback rules are registered by type"
                )));
            } else {
                return Err(ParseAttributeError(format!("unknown token '{token}'")));
            }
        }
        Ok(attribute)
    }
}

/// Resolves the transaction attribute for an intercepted method.
pub trait TransactionAttributeSource: Send + Sync {
    /// Resolve the attribute for `method` on `target`.
    ///
    /// `Ok(None)` means the method is not transactional.
    ///
    /// # Errors
    ///
    /// Returns `AttributeResolution` when the source cannot decide.
    fn transaction_attribute(
        &self,
        method: &MethodDescriptor,
        target: Option<&TargetType>,
    ) -> Result<Option<Arc<TransactionAttribute>>>;
}

impl<F> TransactionAttributeSource for F
where
    F: Fn(&MethodDescriptor, Option<&TargetType>) -> Result<Option<Arc<TransactionAttribute>>>
        + Send
        + Sync,
{
    fn transaction_attribute(
        &self,
        method: &MethodDescriptor,
        target: Option<&TargetType>,
    ) -> Result<Option<Arc<TransactionAttribute>>> {
        self(method, target)
    }
}

/// Attribute source keyed by method-name patterns.
///
/// Patterns may contain `*` wildcards anywhere (`find*`, `*Report`,
/// `load*Page`). An exact name beats any pattern; among patterns the longest
/// one wins, and later registrations win ties.
#[derive(Clone, Debug, Default)]
pub struct NameMatchAttributeSource {
    mappings: Vec<(String, Arc<TransactionAttribute>)>,
}

impl NameMatchAttributeSource {
    /// Create an empty source.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Map a method-name pattern to an attribute.
    pub fn add_method(&mut self, pattern: impl Into<String>, attribute: TransactionAttribute) {
        self.mappings.push((pattern.into(), Arc::new(attribute)));
    }

    /// Builder-style variant of [`add_method`](Self::add_method).
    #[must_use]
    pub fn with_method(mut self, pattern: impl Into<String>, attribute: TransactionAttribute) -> Self {
        self.add_method(pattern, attribute);
        self
    }

    /// Number of registered patterns.
    #[must_use]
    pub fn len(&self) -> usize {
        self.mappings.len()
    }

    /// Whether no pattern is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.mappings.is_empty()
    }

    fn lookup(&self, name: &str) -> Option<Arc<TransactionAttribute>> {
        if let Some((_, attribute)) = self.mappings.iter().rev().find(|(p, _)| p == name) {
            return Some(Arc::clone(attribute));
        }

        let mut best: Option<&(String, Arc<TransactionAttribute>)> = None;
        for mapping in &self.mappings {
            if simple_match(&mapping.0, name)
                && best.is_none_or(|(pattern, _)| pattern.len() <= mapping.0.len())
            {
                best = Some(mapping);
            }
        }
        best.map(|(_, attribute)| Arc::clone(attribute))
    }
}

impl TransactionAttributeSource for NameMatchAttributeSource {
    fn transaction_attribute(
        &self,
        method: &MethodDescriptor,
        _target: Option<&TargetType>,
    ) -> Result<Option<Arc<TransactionAttribute>>> {
        Ok(self.lookup(method.name()))
    }
}

/// Match `text` against a pattern with `*` wildcards.
fn simple_match(pattern: &str, text: &str) -> bool {
    let Some((head, rest)) = pattern.split_once('*') else {
        return pattern == text;
    };
    let Some(text) = text.strip_prefix(head) else {
        return false;
    };
    if rest.is_empty() {
        return true;
    }
    (0..=text.len())
        .filter(|&i| text.is_char_boundary(i))
        .any(|i| simple_match(rest, &text[i..]))
}

/// Chains several sources; the first one returning an attribute wins.
#[derive(Clone, Default)]
pub struct CompositeAttributeSource {
    sources: Vec<Arc<dyn TransactionAttributeSource>>,
}

impl CompositeAttributeSource {
    /// Create an empty composite.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a source.
    #[must_use]
    pub fn with_source(mut self, source: Arc<dyn TransactionAttributeSource>) -> Self {
        self.sources.push(source);
        self
    }
}

impl fmt::Debug for CompositeAttributeSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompositeAttributeSource")
            .field("sources", &self.sources.len())
            .finish()
    }
}

impl TransactionAttributeSource for CompositeAttributeSource {
    fn transaction_attribute(
        &self,
        method: &MethodDescriptor,
        target: Option<&TargetType>,
    ) -> Result<Option<Arc<TransactionAttribute>>> {
        for source in &self.sources {
            if let Some(attribute) = source.transaction_attribute(method, target)? {
                return Ok(Some(attribute));
            }
        }
        Ok(None)
    }
}
