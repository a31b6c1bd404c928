//! Component and method identifiers used for dispatch lookups.

use std::borrow::Borrow;
use std::fmt;
use std::sync::Arc;

/// Opaque identifier of a deployed component.
///
/// Created once at registration time and looked up on every invocation, so it
/// clones by reference count and compares by content.
///
/// # Examples
///
/// ```rust
/// use ferrous_container::ComponentId;
///
/// let a = ComponentId::from("calculator");
/// let b = ComponentId::new(String::from("calculator"));
/// assert_eq!(a, b);
/// assert_eq!(a.as_str(), "calculator");
/// assert_eq!(a.to_string(), "calculator");
/// ```
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ComponentId(Arc<str>);

impl ComponentId {
    /// Creates an identifier from any string-like value.
    pub fn new(id: impl Into<Arc<str>>) -> Self {
        Self(id.into())
    }

    /// Borrow the identifier text.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for ComponentId {
    fn from(value: &str) -> Self {
        Self(Arc::from(value))
    }
}

impl From<String> for ComponentId {
    fn from(value: String) -> Self {
        Self(Arc::from(value))
    }
}

impl Borrow<str> for ComponentId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ComponentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for ComponentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ComponentId({:?})", &*self.0)
    }
}

/// Name of a dispatchable component method.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MethodSignature(Arc<str>);

impl MethodSignature {
    pub fn new(name: impl Into<Arc<str>>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for MethodSignature {
    fn from(value: &str) -> Self {
        Self(Arc::from(value))
    }
}

impl From<String> for MethodSignature {
    fn from(value: String) -> Self {
        Self(Arc::from(value))
    }
}

impl Borrow<str> for MethodSignature {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MethodSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for MethodSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MethodSignature({:?})", &*self.0)
    }
}
