//! Component collection: registration and container construction.
//!
//! A [`ComponentCollection`] gathers the deployment metadata for every
//! component (identity, lifetime, constructor, method table, teardown, fault
//! rules, pool settings) plus the invocation hooks, then builds an immutable
//! [`Container`].

use std::marker::PhantomData;
use std::sync::Arc;

use crate::config::{ContainerConfig, PoolConfig};
use crate::descriptors::ComponentDescriptor;
use crate::dispatch::classify::FaultClassifier;
use crate::dispatch::Container;
use crate::error::{ContainerResult, Fault};
use crate::hooks::{Hooks, InvocationHook};
use crate::key::{ComponentId, MethodSignature};
use crate::lifetime::Lifetime;
use crate::registration::{AnyObject, Callback, MethodFn, Payload, Registration, Registry};
use crate::traits::Dispose;

pub mod module_system;
pub use module_system::*;

/// Registered components and hooks, not yet running.
pub struct ComponentCollection {
    registry: Registry,
    hooks: Hooks,
    config: ContainerConfig,
}

impl ComponentCollection {
    /// Creates an empty collection with default configuration.
    pub fn new() -> Self {
        Self::with_config(ContainerConfig::default())
    }

    /// Creates an empty collection with the given container configuration.
    pub fn with_config(config: ContainerConfig) -> Self {
        Self {
            registry: Registry::default(),
            hooks: Hooks::default(),
            config,
        }
    }

    /// Container configuration, adjustable until `build`.
    pub fn config_mut(&mut self) -> &mut ContainerConfig {
        &mut self.config
    }

    // ----- Component Registrations -----

    /// Registers a pooled component.
    ///
    /// Instances are interchangeable and each serves one call at a time. The
    /// pool uses the container's default [`PoolConfig`] unless the builder
    /// sets one.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use ferrous_container::{ComponentCollection, CallContext, unpack};
    ///
    /// struct Calculator;
    ///
    /// let mut components = ComponentCollection::new();
    /// components
    ///     .add_pooled("calculator", || Ok(Calculator))
    ///     .method("add", |_c: &mut Calculator, args| {
    ///         let (a, b): (i64, i64) = unpack(args)?;
    ///         Ok(Box::new(a + b))
    ///     });
    ///
    /// let container = components.build().unwrap();
    /// let sum: i64 = container.call("calculator", "add", (2i64, 3i64), &CallContext::new()).unwrap();
    /// assert_eq!(sum, 5);
    /// ```
    pub fn add_pooled<T, F>(&mut self, id: impl Into<ComponentId>, ctor: F) -> RegistrationBuilder<'_, T>
    where
        T: Send + 'static,
        F: Fn() -> Result<T, Fault> + Send + Sync + 'static,
    {
        self.add_component(Lifetime::Pooled, id.into(), ctor)
    }

    /// Registers a request-scoped component.
    ///
    /// One instance per [`ThreadCorrelatedCache`](crate::ThreadCorrelatedCache),
    /// created on first use within the request and torn down when the
    /// request's cache is cleared.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use ferrous_container::{ComponentCollection, CallContext, unpack};
    ///
    /// struct Cart { items: u32 }
    ///
    /// let mut components = ComponentCollection::new();
    /// components
    ///     .add_request_scoped("cart", || Ok(Cart { items: 0 }))
    ///     .method("add", |cart: &mut Cart, _args| { cart.items += 1; Ok(Box::new(cart.items)) });
    ///
    /// let container = components.build().unwrap();
    /// let request = container.begin_request();
    /// let ctx = CallContext::new().with_request(&request);
    /// let _: u32 = container.call("cart", "add", (), &ctx).unwrap();
    /// let items: u32 = container.call("cart", "add", (), &ctx).unwrap();
    /// assert_eq!(items, 2);
    /// ```
    pub fn add_request_scoped<T, F>(&mut self, id: impl Into<ComponentId>, ctor: F) -> RegistrationBuilder<'_, T>
    where
        T: Send + 'static,
        F: Fn() -> Result<T, Fault> + Send + Sync + 'static,
    {
        self.add_component(Lifetime::Request, id.into(), ctor)
    }

    /// Registers a singleton component, constructed on first call.
    ///
    /// Calls are serialized. A system fault destroys the instance; the next
    /// call constructs a fresh one.
    pub fn add_singleton<T, F>(&mut self, id: impl Into<ComponentId>, ctor: F) -> RegistrationBuilder<'_, T>
    where
        T: Send + 'static,
        F: Fn() -> Result<T, Fault> + Send + Sync + 'static,
    {
        self.add_component(Lifetime::Singleton, id.into(), ctor)
    }

    fn add_component<T, F>(&mut self, lifetime: Lifetime, id: ComponentId, ctor: F) -> RegistrationBuilder<'_, T>
    where
        T: Send + 'static,
        F: Fn() -> Result<T, Fault> + Send + Sync + 'static,
    {
        let erased = move || -> Result<Box<AnyObject>, Fault> { ctor().map(|v| Box::new(v) as Box<AnyObject>) };
        let registration = Registration::new(id, lifetime, std::any::type_name::<T>(), Arc::new(erased));
        RegistrationBuilder {
            registration: self.registry.insert(registration),
            _marker: PhantomData,
        }
    }

    // ----- Hooks -----

    /// Adds an invocation hook. `before` runs in the order hooks were added.
    pub fn add_hook(&mut self, hook: Arc<dyn InvocationHook>) -> &mut Self {
        self.hooks.push(hook);
        self
    }

    // ----- Introspection -----

    pub fn len(&self) -> usize {
        self.registry.len()
    }

    pub fn is_empty(&self) -> bool {
        self.registry.len() == 0
    }

    pub fn contains(&self, id: &str) -> bool {
        self.registry.get(id).is_some()
    }

    pub fn hook_count(&self) -> usize {
        self.hooks.len()
    }

    /// Descriptors in registration order.
    pub fn descriptors(&self) -> Vec<ComponentDescriptor> {
        self.registry.iter().map(Registration::descriptor).collect()
    }

    /// Overrides the pool configuration of an already registered component.
    pub fn set_pool_config(&mut self, id: &str, config: PoolConfig) -> bool {
        match self.registry.get_mut(id) {
            Some(registration) => {
                registration.pool = Some(config);
                true
            }
            None => false,
        }
    }

    /// Builds the container.
    ///
    /// Validates every pool configuration, prefills pools that ask for it and
    /// starts sweepers for pools with age or idle limits.
    pub fn build(self) -> ContainerResult<Container> {
        Container::new(self.registry.into_ordered(), self.hooks, self.config)
    }
}

impl Default for ComponentCollection {
    fn default() -> Self {
        Self::new()
    }
}

/// Fluent configuration of one registered component.
pub struct RegistrationBuilder<'a, T> {
    registration: &'a mut Registration,
    _marker: PhantomData<fn() -> T>,
}

impl<'a, T: Send + 'static> RegistrationBuilder<'a, T> {
    /// Adds a dispatchable method. Re-adding a name replaces the previous body.
    pub fn method<F>(self, name: impl Into<MethodSignature>, body: F) -> Self
    where
        F: Fn(&mut T, Payload) -> Result<Payload, Fault> + Send + Sync + 'static,
    {
        let type_name = self.registration.impl_type_name;
        let erased: MethodFn = Arc::new(move |object: &mut AnyObject, args: Payload| match object.downcast_mut::<T>() {
            Some(target) => body(target, args),
            None => Err(Fault::system("TypeMismatch", format!("instance is not a {}", type_name))),
        });
        self.registration.methods.insert(name.into(), erased);
        self
    }

    /// Runs after construction, before the instance serves any call.
    pub fn post_construct<F>(self, callback: F) -> Self
    where
        F: Fn(&mut T) + Send + Sync + 'static,
    {
        self.registration.post_construct.push(typed_callback(callback));
        self
    }

    /// Runs when the instance is destroyed. Several callbacks run in reverse order.
    pub fn on_destroy<F>(self, callback: F) -> Self
    where
        F: Fn(&mut T) + Send + Sync + 'static,
    {
        self.registration.teardown.push(typed_callback(callback));
        self
    }

    /// Declares a fault name as an application fault.
    pub fn application_fault(self, name: impl Into<String>) -> Self {
        self.registration.application_faults.insert(name.into());
        self
    }

    /// Installs a classifier consulted before the declared fault names.
    pub fn fault_classifier<C: FaultClassifier + 'static>(self, classifier: C) -> Self {
        self.registration.classifier = Some(Arc::new(classifier));
        self
    }

    /// Pool settings for this component; ignored unless it is pooled.
    pub fn pool_config(self, config: PoolConfig) -> Self {
        self.registration.pool = Some(config);
        self
    }

    /// The component being configured.
    pub fn id(&self) -> &ComponentId {
        &self.registration.id
    }
}

impl<'a, T: Dispose + Send> RegistrationBuilder<'a, T> {
    /// Calls [`Dispose::dispose`] on destruction.
    pub fn disposable(self) -> Self {
        self.on_destroy(|value: &mut T| value.dispose())
    }
}

fn typed_callback<T, F>(callback: F) -> Callback
where
    T: 'static,
    F: Fn(&mut T) + Send + Sync + 'static,
{
    Arc::new(move |object: &mut AnyObject| {
        if let Some(target) = object.downcast_mut::<T>() {
            callback(target);
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Widget;

    #[test]
    fn reregistration_replaces_in_place() {
        let mut components = ComponentCollection::new();
        components.add_pooled("a", || Ok(Widget));
        components.add_singleton("b", || Ok(Widget));
        components.add_request_scoped("a", || Ok(Widget)).application_fault("Nope");

        let descriptors = components.descriptors();
        assert_eq!(descriptors.len(), 2);
        assert_eq!(descriptors[0].id.as_str(), "a");
        assert_eq!(descriptors[0].lifetime, Lifetime::Request);
        assert_eq!(descriptors[0].application_faults, vec!["Nope".to_string()]);
    }

    #[test]
    fn pool_config_can_be_set_after_registration() {
        let mut components = ComponentCollection::new();
        components.add_pooled("a", || Ok(Widget));
        assert!(components.set_pool_config("a", PoolConfig { max_size: 3, ..PoolConfig::default() }));
        assert!(!components.set_pool_config("missing", PoolConfig::default()));
        assert_eq!(components.descriptors()[0].pool.as_ref().map(|p| p.max_size), Some(3));
    }
}
