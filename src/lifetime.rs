//! Component lifetime definitions.

/// How the container obtains an instance for an invocation.
///
/// # Lifetime Characteristics
///
/// - **Pooled**: Interchangeable instances reused across unrelated calls, one caller at a time
/// - **Request**: One instance per unit of work, cached on the handling thread
/// - **Singleton**: One instance for the whole container, calls serialized
///
/// # Examples
///
/// ```rust
/// use ferrous_container::{ComponentCollection, Lifetime};
///
/// struct Calculator;
///
/// let mut components = ComponentCollection::new();
/// components.add_pooled("calculator", || Ok(Calculator))
///     .method("ping", |_c: &mut Calculator, _args| Ok(Box::new(())));
///
/// let container = components.build().unwrap();
/// let descriptor = container.descriptor("calculator").unwrap();
/// assert_eq!(descriptor.lifetime, Lifetime::Pooled);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "config", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "config", serde(rename_all = "snake_case"))]
pub enum Lifetime {
    /// Instances checked out of a bounded pool for the duration of one call
    ///
    /// The instance is returned healthy after the call, or discarded when the
    /// call raised a system fault.
    Pooled,
    /// One instance per request cache, reused by every call in that request
    ///
    /// The instance lives until the owning `ThreadCorrelatedCache` is cleared
    /// or dropped.
    Request,
    /// Single instance per container, constructed on first use
    ///
    /// Calls are serialized on an internal lock. A system fault destroys the
    /// instance and the next call constructs a new one.
    Singleton,
}

impl Lifetime {
    /// Short lowercase label used in logs.
    pub fn label(&self) -> &'static str {
        match self {
            Lifetime::Pooled => "pooled",
            Lifetime::Request => "request",
            Lifetime::Singleton => "singleton",
        }
    }
}
