//! Invocation dispatch.
//!
//! [`Container::invoke`] routes a `(component, method, args)` call to an
//! instance obtained according to the component's lifetime, runs the
//! invocation hooks around it, classifies any fault, and releases the
//! instance according to the fault class.

use std::any::Any;
use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::Rc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::ReentrantMutex;

pub mod classify;
pub mod context;

pub use classify::FaultClassifier;
pub use context::CallContext;

use crate::config::ContainerConfig;
use crate::descriptors::{ComponentDescriptor, ManagedInstance};
use crate::error::{ContainerError, ContainerResult, Fault, FaultClass};
use crate::hooks::{Hooks, InvocationInfo, Outcome};
use crate::internal::catch_panic;
use crate::key::{ComponentId, MethodSignature};
use crate::lifetime::Lifetime;
use crate::metrics::{InvocationStats, MetricsCollector, Recorded};
use crate::pool::{InstancePool, Lease, PoolStats};
use crate::registration::{AnyObject, ComponentSupplier, Map, MethodFn, Payload, Registration};
use crate::request::ThreadCorrelatedCache;
use classify::Classification;

/// Result of reaching the target: the outer error means it was never reached.
type TargetResult = ContainerResult<Result<Payload, (Fault, FaultClass)>>;

enum Backing {
    Pooled(InstancePool<ManagedInstance>),
    Request,
    Singleton(ReentrantMutex<RefCell<Option<ManagedInstance>>>),
}

struct Component {
    registration: Arc<Registration>,
    backing: Backing,
}

struct ContainerInner {
    components: Map<ComponentId, Component>,
    order: Vec<ComponentId>,
    hooks: Hooks,
    config: ContainerConfig,
    metrics: MetricsCollector,
    call_ids: AtomicU64,
    shutting_down: AtomicBool,
}

/// Running container of managed components.
///
/// Built by [`ComponentCollection::build`](crate::ComponentCollection::build).
/// Cloning is cheap and every clone shares the same pools and singletons.
///
/// # Examples
///
/// ```
/// use ferrous_container::{ComponentCollection, CallContext, ContainerError, Fault, FaultClass, unpack};
///
/// struct Account { balance: i64 }
///
/// let mut components = ComponentCollection::new();
/// components
///     .add_pooled("account", || Ok(Account { balance: 10 }))
///     .application_fault("Overdrawn")
///     .method("withdraw", |a: &mut Account, args| {
///         let amount: i64 = unpack(args)?;
///         if amount > a.balance {
///             return Err(Fault::application("Overdrawn", format!("balance {}", a.balance)));
///         }
///         a.balance -= amount;
///         Ok(Box::new(a.balance))
///     });
///
/// let container = components.build().unwrap();
/// let ctx = CallContext::new().with_principal("teller");
///
/// let left: i64 = container.call("account", "withdraw", 4i64, &ctx).unwrap();
/// assert_eq!(left, 6);
///
/// let err = container.call::<_, i64>("account", "withdraw", 100i64, &ctx).unwrap_err();
/// assert_eq!(err.fault_class(), Some(FaultClass::Application));
/// ```
#[derive(Clone)]
pub struct Container {
    inner: Arc<ContainerInner>,
}

impl Container {
    pub(crate) fn new(registrations: Vec<Registration>, hooks: Hooks, config: ContainerConfig) -> ContainerResult<Self> {
        let mut components = Map::default();
        let mut order = Vec::with_capacity(registrations.len());

        for registration in registrations {
            let registration = Arc::new(registration);
            let id = registration.id.clone();
            let backing = match registration.lifetime {
                Lifetime::Pooled => {
                    let pool_config = registration.pool.clone().unwrap_or_else(|| config.pool.clone());
                    let supplier = Arc::new(ComponentSupplier { registration: registration.clone() });
                    let pool = InstancePool::labeled(pool_config, supplier, id.clone())?;
                    if pool.config().prefill {
                        pool.fill_to_min()?;
                    }
                    if !pool.config().max_age.is_zero() || !pool.config().idle_timeout.is_zero() {
                        pool.start()?;
                    }
                    Backing::Pooled(pool)
                }
                Lifetime::Request => Backing::Request,
                Lifetime::Singleton => Backing::Singleton(ReentrantMutex::new(RefCell::new(None))),
            };
            order.push(id.clone());
            components.insert(id, Component { registration, backing });
        }

        tracing::info!(components = order.len(), hooks = hooks.len(), "container built");
        Ok(Self {
            inner: Arc::new(ContainerInner {
                components,
                order,
                hooks,
                config,
                metrics: MetricsCollector::default(),
                call_ids: AtomicU64::new(0),
                shutting_down: AtomicBool::new(false),
            }),
        })
    }

    fn component(&self, id: &str) -> ContainerResult<&Component> {
        self.inner
            .components
            .get(id)
            .ok_or_else(|| ContainerError::NoSuchComponent(ComponentId::from(id)))
    }

    /// Invokes `method` on component `id`.
    ///
    /// Hooks run around the call; pooled instances are checked out and
    /// returned (or discarded after a system fault); request-scoped instances
    /// come from `ctx`'s request cache; singletons are locked for the call.
    pub fn invoke(&self, id: &str, method: &str, args: Payload, ctx: &CallContext<'_>) -> ContainerResult<Payload> {
        if self.inner.shutting_down.load(Ordering::Acquire) {
            return Err(ContainerError::ShuttingDown);
        }
        let component = self.component(id)?;
        let registration = &component.registration;
        let (signature, target) = registration.methods.get_key_value(method).ok_or_else(|| ContainerError::NoSuchMethod {
            component: registration.id.clone(),
            method: MethodSignature::from(method),
        })?;

        let info = InvocationInfo {
            component: &registration.id,
            method: signature,
            lifetime: registration.lifetime,
            principal: ctx.principal().or(self.inner.config.default_principal.as_deref()),
            call_id: self.inner.call_ids.fetch_add(1, Ordering::Relaxed) + 1,
        };

        let start = Instant::now();
        let started = match self.inner.hooks.before(&info) {
            Ok(started) => started,
            Err(err) => {
                self.inner.metrics.record(&registration.id, Recorded::Rejected, start.elapsed());
                return Err(err);
            }
        };

        let result = match &component.backing {
            Backing::Pooled(pool) => self.invoke_pooled(pool, registration, target, args),
            Backing::Request => self.invoke_request(ctx, registration, target, args),
            Backing::Singleton(cell) => self.invoke_singleton(cell, registration, target, args),
        };

        let (outcome, recorded) = match &result {
            Ok(Ok(_)) => (Outcome::Success, Recorded::Completed),
            Ok(Err((_, FaultClass::Application))) => (Outcome::Fault(FaultClass::Application), Recorded::ApplicationFault),
            Ok(Err((_, FaultClass::System))) => (Outcome::Fault(FaultClass::System), Recorded::SystemFault),
            Err(_) => (Outcome::Aborted, Recorded::Rejected),
        };
        let after = self.inner.hooks.after(&info, started, &outcome);
        self.inner.metrics.record(&registration.id, recorded, start.elapsed());

        match result {
            Err(err) => Err(err),
            Ok(Err((fault, class))) => Err(ContainerError::InvocationFault {
                component: registration.id.clone(),
                method: signature.clone(),
                fault,
                class,
            }),
            Ok(Ok(payload)) => after.map(|_| payload),
        }
    }

    /// Typed convenience over [`Container::invoke`].
    ///
    /// A return value of an unexpected type is an `IllegalState` error.
    pub fn call<A, R>(&self, id: &str, method: &str, args: A, ctx: &CallContext<'_>) -> ContainerResult<R>
    where
        A: Any + Send,
        R: Any,
    {
        let payload = self.invoke(id, method, Box::new(args), ctx)?;
        payload.downcast::<R>().map(|v| *v).map_err(|_| {
            ContainerError::IllegalState(format!(
                "{}.{} did not return a {}",
                id,
                method,
                std::any::type_name::<R>()
            ))
        })
    }

    fn invoke_pooled(
        &self,
        pool: &InstancePool<ManagedInstance>,
        registration: &Registration,
        target: &MethodFn,
        args: Payload,
    ) -> TargetResult {
        let mut lease = pool.checkout()?;
        let result = match lease.object_mut() {
            Some(object) => self.call_target(registration, object, target, args),
            None => Err((Fault::system("Destroyed", "pooled instance already destroyed"), FaultClass::System)),
        };
        let healthy = !matches!(result, Err((_, FaultClass::System)));
        if !healthy {
            tracing::debug!(component = %registration.id, serial = lease.serial(), "discarding instance after system fault");
        }
        lease.release(healthy);
        Ok(result)
    }

    fn invoke_request(
        &self,
        ctx: &CallContext<'_>,
        registration: &Arc<Registration>,
        target: &MethodFn,
        args: Payload,
    ) -> TargetResult {
        let request = ctx.request().ok_or_else(|| ContainerError::NoRequestScope(registration.id.clone()))?;
        let created = Cell::new(false);
        let cell: Rc<RefCell<ManagedInstance>> = request.get_or_create(registration.id.clone(), |_| {
            created.set(true);
            registration.instantiate()
        })?;
        if created.get() {
            if let Some(handle) = request.disposal_handle(registration.id.as_str()) {
                let owned = cell.clone();
                handle.push(move || owned.borrow_mut().destroy());
            }
        }

        let mut instance = cell.try_borrow_mut().map_err(|_| {
            ContainerError::IllegalState(format!("re-entrant call to request-scoped component {}", registration.id))
        })?;
        let result = match instance.object_mut() {
            Some(object) => self.call_target(registration, object, target, args),
            None => Err((Fault::system("Destroyed", "request instance already destroyed"), FaultClass::System)),
        };
        Ok(result)
    }

    fn invoke_singleton(
        &self,
        cell: &ReentrantMutex<RefCell<Option<ManagedInstance>>>,
        registration: &Arc<Registration>,
        target: &MethodFn,
        args: Payload,
    ) -> TargetResult {
        let guard = cell.lock();
        let mut slot = guard.try_borrow_mut().map_err(|_| {
            ContainerError::IllegalState(format!("re-entrant call to singleton component {}", registration.id))
        })?;
        if slot.is_none() {
            *slot = Some(registration.instantiate()?);
        }

        let result = match slot.as_mut().and_then(ManagedInstance::object_mut) {
            Some(object) => self.call_target(registration, object, target, args),
            None => Err((Fault::system("Destroyed", "singleton instance already destroyed"), FaultClass::System)),
        };
        if matches!(result, Err((_, FaultClass::System))) {
            if let Some(mut instance) = slot.take() {
                tracing::debug!(component = %registration.id, serial = instance.serial(), "destroying singleton after system fault");
                instance.destroy();
            }
        }
        Ok(result)
    }

    fn call_target(
        &self,
        registration: &Registration,
        object: &mut AnyObject,
        target: &MethodFn,
        args: Payload,
    ) -> Result<Payload, (Fault, FaultClass)> {
        match catch_panic(|| target(object, args)) {
            Ok(Ok(payload)) => Ok(payload),
            Ok(Err(fault)) => {
                let class = self.classification(registration).classify(&fault);
                Err((fault, class))
            }
            Err(panic) => Err((Fault::system("Panic", panic), FaultClass::System)),
        }
    }

    fn classification<'a>(&'a self, registration: &'a Registration) -> Classification<'a> {
        Classification {
            custom: registration.classifier.as_deref(),
            declared: &registration.application_faults,
            default: self.inner.config.default_fault_class,
        }
    }

    // ----- Pool facade -----

    fn pool(&self, id: &str) -> ContainerResult<&InstancePool<ManagedInstance>> {
        match &self.component(id)?.backing {
            Backing::Pooled(pool) => Ok(pool),
            _ => Err(ContainerError::IllegalState(format!("component {} is not pooled", id))),
        }
    }

    /// Checks an instance of pooled component `id` out directly.
    pub fn checkout(&self, id: &str) -> ContainerResult<Lease<ManagedInstance>> {
        if self.inner.shutting_down.load(Ordering::Acquire) {
            return Err(ContainerError::ShuttingDown);
        }
        self.pool(id)?.checkout()
    }

    /// Returns a lease from [`Container::checkout`]; unhealthy instances are destroyed.
    pub fn checkin(&self, lease: Lease<ManagedInstance>, healthy: bool) -> ContainerResult<()> {
        let pool = self.pool(lease.component().as_str())?;
        pool.checkin(lease, healthy);
        Ok(())
    }

    /// Retires every current instance of pooled component `id`.
    pub fn flush(&self, id: &str) -> ContainerResult<()> {
        self.pool(id)?.flush();
        Ok(())
    }

    pub fn pool_stats(&self, id: &str) -> ContainerResult<PoolStats> {
        Ok(self.pool(id)?.stats())
    }

    // ----- Requests -----

    /// Starts a unit of work on the current thread.
    ///
    /// Request-scoped components invoked with a context carrying this cache
    /// share their instances until it is cleared or dropped.
    pub fn begin_request(&self) -> ThreadCorrelatedCache {
        ThreadCorrelatedCache::new()
    }

    // ----- Introspection -----

    pub fn descriptor(&self, id: &str) -> Option<ComponentDescriptor> {
        self.inner.components.get(id).map(|c| c.registration.descriptor())
    }

    /// Descriptors in registration order.
    pub fn descriptors(&self) -> Vec<ComponentDescriptor> {
        self.inner
            .order
            .iter()
            .filter_map(|id| self.inner.components.get(id))
            .map(|c| c.registration.descriptor())
            .collect()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.inner.components.contains_key(id)
    }

    pub fn config(&self) -> &ContainerConfig {
        &self.inner.config
    }

    pub fn invocation_stats(&self, id: &str) -> Option<InvocationStats> {
        self.inner.metrics.get(id)
    }

    /// Components ordered by mean invocation time, slowest first.
    pub fn slowest_components(&self, limit: usize) -> Vec<(ComponentId, Duration)> {
        self.inner.metrics.slowest(limit)
    }

    // ----- Shutdown -----

    /// Stops accepting calls, closes every pool and destroys singletons.
    ///
    /// Each pool waits up to `timeout` for its outstanding leases. Returns
    /// true when every pool drained in time. Later calls return true at once.
    pub fn shutdown(&self, timeout: Duration) -> bool {
        if self.inner.shutting_down.swap(true, Ordering::AcqRel) {
            return true;
        }
        tracing::info!("container shutting down");

        let mut drained = true;
        for id in self.inner.order.iter().rev() {
            let component = match self.inner.components.get(id) {
                Some(component) => component,
                None => continue,
            };
            match &component.backing {
                Backing::Pooled(pool) => drained &= pool.close(timeout),
                Backing::Singleton(cell) => {
                    let guard = cell.lock();
                    let taken = guard.try_borrow_mut().ok().and_then(|mut slot| slot.take());
                    if let Some(mut instance) = taken {
                        instance.destroy();
                    }
                }
                Backing::Request => {}
            }
        }
        drained
    }

    /// Shuts down using the configured `shutdown_timeout`.
    pub fn close(&self) -> bool {
        self.shutdown(self.inner.config.shutdown_timeout)
    }

    pub fn is_shutting_down(&self) -> bool {
        self.inner.shutting_down.load(Ordering::Acquire)
    }
}

impl fmt::Debug for Container {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Container")
            .field("components", &self.inner.order)
            .field("hooks", &self.inner.hooks.len())
            .field("shutting_down", &self.is_shutting_down())
            .finish()
    }
}
