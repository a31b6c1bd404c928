//! Component registration types.

use std::any::Any;
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::config::PoolConfig;
use crate::descriptors::{ComponentDescriptor, ManagedInstance};
use crate::dispatch::classify::FaultClassifier;
use crate::error::{ContainerError, ContainerResult, Fault};
use crate::internal::catch_panic;
use crate::key::{ComponentId, MethodSignature};
use crate::lifetime::Lifetime;
use crate::pool::{DiscardReason, InstanceSupplier};

/// Type-erased call arguments and return values.
pub type Payload = Box<dyn Any + Send>;

/// Unpacks a payload into the type a method expects.
///
/// A mismatch is reported as an application fault named `ArgumentMismatch`:
/// the caller sent the wrong thing, the instance is unaffected.
///
/// # Examples
///
/// ```
/// use ferrous_container::{unpack, Payload};
///
/// let args: Payload = Box::new((2i64, 3i64));
/// let (a, b): (i64, i64) = unpack(args).unwrap();
/// assert_eq!(a + b, 5);
///
/// let wrong: Payload = Box::new("text");
/// assert!(unpack::<u32>(wrong).is_err());
/// ```
pub fn unpack<T: Any>(payload: Payload) -> Result<T, Fault> {
    payload.downcast::<T>().map(|v| *v).map_err(|_| {
        Fault::application(
            "ArgumentMismatch",
            format!("expected payload of type {}", std::any::type_name::<T>()),
        )
    })
}

pub(crate) type AnyObject = dyn Any + Send;
pub(crate) type Constructor = Arc<dyn Fn() -> Result<Box<AnyObject>, Fault> + Send + Sync>;
pub(crate) type MethodFn = Arc<dyn Fn(&mut AnyObject, Payload) -> Result<Payload, Fault> + Send + Sync>;
pub(crate) type Callback = Arc<dyn Fn(&mut AnyObject) + Send + Sync>;

#[cfg(feature = "ahash")]
pub(crate) type Map<K, V> = ahash::AHashMap<K, V>;
#[cfg(not(feature = "ahash"))]
pub(crate) type Map<K, V> = std::collections::HashMap<K, V>;

/// Everything the container knows about one component.
pub(crate) struct Registration {
    pub(crate) id: ComponentId,
    pub(crate) lifetime: Lifetime,
    pub(crate) impl_type_name: &'static str,
    pub(crate) ctor: Constructor,
    pub(crate) post_construct: Vec<Callback>,
    pub(crate) teardown: Vec<Callback>,
    pub(crate) methods: Map<MethodSignature, MethodFn>,
    pub(crate) classifier: Option<Arc<dyn FaultClassifier>>,
    pub(crate) application_faults: HashSet<String>,
    pub(crate) pool: Option<PoolConfig>,
    serial: AtomicU64,
}

impl Registration {
    pub(crate) fn new(id: ComponentId, lifetime: Lifetime, impl_type_name: &'static str, ctor: Constructor) -> Self {
        Self {
            id,
            lifetime,
            impl_type_name,
            ctor,
            post_construct: Vec::new(),
            teardown: Vec::new(),
            methods: Map::default(),
            classifier: None,
            application_faults: HashSet::new(),
            pool: None,
            serial: AtomicU64::new(0),
        }
    }

    /// Runs the constructor and post-construct callbacks.
    ///
    /// Panics in user code become `Instantiation` errors; a partially built
    /// object is torn down before the error is returned.
    pub(crate) fn instantiate(self: &Arc<Self>) -> ContainerResult<ManagedInstance> {
        let failed = |reason: String| ContainerError::Instantiation { component: Some(self.id.clone()), reason };

        let object = match catch_panic(|| (self.ctor)()) {
            Ok(Ok(object)) => object,
            Ok(Err(fault)) => return Err(failed(fault.to_string())),
            Err(panic) => return Err(failed(format!("constructor panicked: {}", panic))),
        };

        let serial = self.serial.fetch_add(1, Ordering::Relaxed) + 1;
        let mut instance = ManagedInstance::new(self.clone(), serial, object);
        for callback in &self.post_construct {
            if let Err(panic) = catch_panic(|| instance.apply(callback)) {
                instance.destroy();
                return Err(failed(format!("post-construct callback panicked: {}", panic)));
            }
        }
        instance.mark_constructed();
        tracing::debug!(component = %self.id, serial, "constructed instance");
        Ok(instance)
    }

    pub(crate) fn descriptor(&self) -> ComponentDescriptor {
        let mut methods: Vec<MethodSignature> = self.methods.keys().cloned().collect();
        methods.sort();
        let mut application_faults: Vec<String> = self.application_faults.iter().cloned().collect();
        application_faults.sort();
        ComponentDescriptor {
            id: self.id.clone(),
            lifetime: self.lifetime,
            impl_type_name: self.impl_type_name,
            methods,
            application_faults,
            pool: self.pool.clone(),
        }
    }
}

/// Pool supplier backed by a registration.
pub(crate) struct ComponentSupplier {
    pub(crate) registration: Arc<Registration>,
}

impl InstanceSupplier<ManagedInstance> for ComponentSupplier {
    fn create(&self) -> ContainerResult<ManagedInstance> {
        self.registration.instantiate()
    }

    fn discard(&self, mut instance: ManagedInstance, reason: DiscardReason) {
        tracing::debug!(component = %self.registration.id, serial = instance.serial(), ?reason, "destroying instance");
        instance.destroy();
    }
}

/// Registrations in insertion order. Re-registering an id replaces it in place.
#[derive(Default)]
pub(crate) struct Registry {
    order: Vec<ComponentId>,
    by_id: Map<ComponentId, Registration>,
}

impl Registry {
    pub(crate) fn insert(&mut self, registration: Registration) -> &mut Registration {
        let id = registration.id.clone();
        if self.by_id.insert(id.clone(), registration).is_none() {
            self.order.push(id.clone());
        }
        match self.by_id.get_mut(&id) {
            Some(registration) => registration,
            None => unreachable!("registration inserted above"),
        }
    }

    pub(crate) fn get(&self, id: &str) -> Option<&Registration> {
        self.by_id.get(id)
    }

    pub(crate) fn get_mut(&mut self, id: &str) -> Option<&mut Registration> {
        self.by_id.get_mut(id)
    }

    pub(crate) fn len(&self) -> usize {
        self.order.len()
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = &Registration> {
        self.order.iter().filter_map(move |id| self.by_id.get(id))
    }

    pub(crate) fn into_ordered(mut self) -> Vec<Registration> {
        self.order.iter().filter_map(|id| self.by_id.remove(id)).collect()
    }
}
