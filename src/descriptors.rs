//! Component descriptors and live managed instances.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use crate::config::PoolConfig;
use crate::internal::catch_panic;
use crate::key::{ComponentId, MethodSignature};
use crate::lifetime::Lifetime;
use crate::registration::{AnyObject, Callback, Registration};

/// Component descriptor for introspection and diagnostics
///
/// A snapshot of what was registered: identity, lifetime, implementation type,
/// the dispatchable methods and any pool overrides.
///
/// # Examples
///
/// ```rust
/// use ferrous_container::{ComponentCollection, Lifetime, PoolConfig};
///
/// struct Counter(u64);
///
/// let mut components = ComponentCollection::new();
/// components
///     .add_pooled("counter", || Ok(Counter(0)))
///     .method("increment", |c: &mut Counter, _args| { c.0 += 1; Ok(Box::new(c.0)) })
///     .method("get", |c: &mut Counter, _args| Ok(Box::new(c.0)))
///     .application_fault("Overflow")
///     .pool_config(PoolConfig { max_size: 4, ..PoolConfig::default() });
///
/// let container = components.build().unwrap();
/// let descriptor = container.descriptor("counter").unwrap();
///
/// assert_eq!(descriptor.lifetime, Lifetime::Pooled);
/// assert!(descriptor.type_name().ends_with("Counter"));
/// assert!(descriptor.has_method("increment"));
/// assert_eq!(descriptor.methods.len(), 2);
/// assert_eq!(descriptor.pool.as_ref().map(|p| p.max_size), Some(4));
/// ```
#[derive(Debug, Clone)]
pub struct ComponentDescriptor {
    pub id: ComponentId,
    pub lifetime: Lifetime,
    /// `std::any::type_name` of the implementation
    pub impl_type_name: &'static str,
    /// Dispatchable methods, sorted
    pub methods: Vec<MethodSignature>,
    /// Fault names declared as application faults
    pub application_faults: Vec<String>,
    /// Pool override, if the component registered one
    pub pool: Option<PoolConfig>,
}

impl ComponentDescriptor {
    pub fn type_name(&self) -> &'static str {
        self.impl_type_name
    }

    pub fn has_method(&self, method: &str) -> bool {
        self.methods.iter().any(|m| m.as_str() == method)
    }
}

/// A live component instance owned by the container.
///
/// Holds the type-erased object along with its lifecycle flags. Whoever owns
/// the `ManagedInstance` owns the object: a pool while idle, one lease while
/// checked out, a request cache while its request runs.
///
/// Teardown callbacks run exactly once, on [`ManagedInstance::destroy`] or on
/// drop, whichever comes first.
pub struct ManagedInstance {
    registration: Arc<Registration>,
    serial: u64,
    object: Option<Box<AnyObject>>,
    constructed: bool,
    destroyed: bool,
}

impl ManagedInstance {
    pub(crate) fn new(registration: Arc<Registration>, serial: u64, object: Box<AnyObject>) -> Self {
        Self {
            registration,
            serial,
            object: Some(object),
            constructed: false,
            destroyed: false,
        }
    }

    /// Owning component.
    pub fn component(&self) -> &ComponentId {
        &self.registration.id
    }

    /// Per-component instance number, starting at 1.
    pub fn serial(&self) -> u64 {
        self.serial
    }

    /// True once construction and post-construct callbacks completed.
    pub fn is_constructed(&self) -> bool {
        self.constructed
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed
    }

    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.object.as_ref().and_then(|o| o.downcast_ref::<T>())
    }

    pub fn downcast_mut<T: Any>(&mut self) -> Option<&mut T> {
        self.object.as_mut().and_then(|o| o.downcast_mut::<T>())
    }

    pub(crate) fn object_mut(&mut self) -> Option<&mut AnyObject> {
        self.object.as_deref_mut()
    }

    pub(crate) fn apply(&mut self, callback: &Callback) {
        if let Some(object) = self.object.as_deref_mut() {
            callback(object);
        }
    }

    pub(crate) fn mark_constructed(&mut self) {
        self.constructed = true;
    }

    /// Runs teardown callbacks in reverse registration order and drops the object.
    ///
    /// Idempotent. Panicking callbacks are logged and do not stop the others.
    pub fn destroy(&mut self) {
        if self.destroyed {
            return;
        }
        self.destroyed = true;
        if let Some(mut object) = self.object.take() {
            for callback in self.registration.teardown.iter().rev() {
                if let Err(panic) = catch_panic(|| callback(object.as_mut())) {
                    tracing::warn!(component = %self.registration.id, serial = self.serial, panic = %panic, "teardown callback panicked");
                }
            }
        }
    }
}

impl Drop for ManagedInstance {
    fn drop(&mut self) {
        self.destroy();
    }
}

impl fmt::Debug for ManagedInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ManagedInstance")
            .field("component", &self.registration.id)
            .field("serial", &self.serial)
            .field("constructed", &self.constructed)
            .field("destroyed", &self.destroyed)
            .finish()
    }
}
