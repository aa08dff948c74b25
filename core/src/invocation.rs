//! Call descriptors for intercepted methods.
//!
//! A [`MethodDescriptor`] is built once when a method is registered and
//! records its [`ReturnShape`], so interceptors classify calls with a tag
//! instead of inspecting results. An [`Invocation`] pairs a descriptor with
//! the one-shot closure that runs the target.

use crate::emission::Emittable;
use crate::traversable::BoxTraversable;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// The declared shape of a method's result.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ReturnShape {
    /// A value available when the method returns.
    Immediate,
    /// A lazy sequence.
    Traversable,
    /// A lazy sequence wrapped for push-style emission.
    Emittable,
}

impl ReturnShape {
    /// Whether results of this shape are consumed after the call returns.
    #[must_use]
    pub const fn is_lazy(self) -> bool {
        matches!(self, Self::Traversable | Self::Emittable)
    }
}

impl fmt::Display for ReturnShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Immediate => write!(f, "an immediate value"),
            Self::Traversable => write!(f, "a traversable"),
            Self::Emittable => write!(f, "an emittable"),
        }
    }
}

/// The concrete type of the object a method was invoked on.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TargetType(String);

impl TargetType {
    /// Create a new `TargetType`.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Get the type name as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TargetType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for TargetType {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for TargetType {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl AsRef<str> for TargetType {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Registration-time description of an intercepted method.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct MethodDescriptor {
    declaring_type: String,
    name: String,
    return_shape: ReturnShape,
    identification: Option<String>,
}

impl MethodDescriptor {
    /// Describe a method with an explicit return shape.
    #[must_use]
    pub fn new(
        declaring_type: impl Into<String>,
        name: impl Into<String>,
        return_shape: ReturnShape,
    ) -> Self {
        Self {
            declaring_type: declaring_type.into(),
            name: name.into(),
            return_shape,
            identification: None,
        }
    }

    /// Describe a method returning an immediate value.
    #[must_use]
    pub fn immediate(declaring_type: impl Into<String>, name: impl Into<String>) -> Self {
        Self::new(declaring_type, name, ReturnShape::Immediate)
    }

    /// Describe a method returning a traversable.
    #[must_use]
    pub fn traversable(declaring_type: impl Into<String>, name: impl Into<String>) -> Self {
        Self::new(declaring_type, name, ReturnShape::Traversable)
    }

    /// Describe a method returning an emittable.
    #[must_use]
    pub fn emittable(declaring_type: impl Into<String>, name: impl Into<String>) -> Self {
        Self::new(declaring_type, name, ReturnShape::Emittable)
    }

    /// Attach a pre-existing identification, preferred over every other label.
    #[must_use]
    pub fn with_identification(mut self, identification: impl Into<String>) -> Self {
        self.identification = Some(identification.into());
        self
    }

    /// The declaring type's name.
    #[must_use]
    pub fn declaring_type(&self) -> &str {
        &self.declaring_type
    }

    /// The method name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The declared return shape.
    #[must_use]
    pub const fn return_shape(&self) -> ReturnShape {
        self.return_shape
    }

    /// The pre-existing identification, if any.
    #[must_use]
    pub fn identification(&self) -> Option<&str> {
        self.identification.as_deref()
    }

    /// `Type.method`, using the target type when known.
    #[must_use]
    pub fn qualified_name(&self, target: Option<&TargetType>) -> String {
        let owner = target.map_or(self.declaring_type.as_str(), TargetType::as_str);
        format!("{owner}.{}", self.name)
    }
}

/// What an intercepted method produced.
pub enum Returned<T, V, E> {
    /// An immediate value.
    Value(T),
    /// A lazy sequence, or `None` when the method produced nothing.
    Traversable(Option<BoxTraversable<V, E>>),
    /// An emission-wrapped sequence, or `None` when the method produced nothing.
    Emittable(Option<Emittable<V, E>>),
}

impl<T, V, E> Returned<T, V, E> {
    /// The shape of this result.
    #[must_use]
    pub const fn shape(&self) -> ReturnShape {
        match self {
            Self::Value(_) => ReturnShape::Immediate,
            Self::Traversable(_) => ReturnShape::Traversable,
            Self::Emittable(_) => ReturnShape::Emittable,
        }
    }

    /// Whether a lazy result is absent.
    #[must_use]
    pub const fn is_absent(&self) -> bool {
        matches!(self, Self::Traversable(None) | Self::Emittable(None))
    }

    /// Take the immediate value.
    #[must_use]
    pub fn into_value(self) -> Option<T> {
        match self {
            Self::Value(value) => Some(value),
            _ => None,
        }
    }

    /// Take the traversable.
    #[must_use]
    pub fn into_traversable(self) -> Option<BoxTraversable<V, E>> {
        match self {
            Self::Traversable(traversable) => traversable,
            _ => None,
        }
    }

    /// Take the emittable.
    #[must_use]
    pub fn into_emittable(self) -> Option<Emittable<V, E>> {
        match self {
            Self::Emittable(emittable) => emittable,
            _ => None,
        }
    }
}

// Manual Debug implementation since traversables don't implement Debug
impl<T: fmt::Debug, V, E> fmt::Debug for Returned<T, V, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Value(value) => f.debug_tuple("Returned::Value").field(value).finish(),
            Self::Traversable(None) => write!(f, "Returned::Traversable(None)"),
            Self::Traversable(Some(_)) => write!(f, "Returned::Traversable(<traversable>)"),
            Self::Emittable(None) => write!(f, "Returned::Emittable(None)"),
            Self::Emittable(Some(_)) => write!(f, "Returned::Emittable(<emittable>)"),
        }
    }
}

/// One intercepted call: descriptor, target, and the target invocation.
pub struct Invocation<'a, T, V, E> {
    method: Arc<MethodDescriptor>,
    target: Option<TargetType>,
    proceed: Box<dyn FnOnce() -> Result<Returned<T, V, E>, E> + 'a>,
}

impl<'a, T, V, E> Invocation<'a, T, V, E> {
    /// Create an invocation.
    pub fn new<F>(method: Arc<MethodDescriptor>, target: Option<TargetType>, proceed: F) -> Self
    where
        F: FnOnce() -> Result<Returned<T, V, E>, E> + 'a,
    {
        Self {
            method,
            target,
            proceed: Box::new(proceed),
        }
    }

    /// The intercepted method.
    #[must_use]
    pub fn method(&self) -> &Arc<MethodDescriptor> {
        &self.method
    }

    /// The target type, if the call has a receiver.
    #[must_use]
    pub const fn target(&self) -> Option<&TargetType> {
        self.target.as_ref()
    }

    /// Run the target method.
    ///
    /// # Errors
    ///
    /// Returns whatever the target method returns.
    pub fn proceed(self) -> Result<Returned<T, V, E>, E> {
        (self.proceed)()
    }
}

impl<T, V, E> fmt::Debug for Invocation<'_, T, V, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Invocation")
            .field("method", &self.method)
            .field("target", &self.target)
            .finish_non_exhaustive()
    }
}
