//! Per-request instance cache.
//!
//! A [`ThreadCorrelatedCache`] holds the request-scoped instances of one unit
//! of work. It is created on the thread handling the request, cannot leave
//! that thread (`!Send`), and disposes everything it holds when cleared or
//! dropped. Two requests, on the same thread or not, never share entries.

use std::any::Any;
use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::Rc;

use crate::error::{ContainerError, ContainerResult};
use crate::internal::DisposeBag;
use crate::key::ComponentId;
use crate::registration::Map;
use crate::traits::Dispose;

/// Teardown callbacks attached to one cached instance.
///
/// Clones share the same callbacks. Callbacks run in reverse registration
/// order, exactly once; later calls to [`DisposalHandle::dispose`] do nothing.
#[derive(Clone, Default)]
pub struct DisposalHandle {
    inner: Rc<DisposalInner>,
}

#[derive(Default)]
struct DisposalInner {
    bag: RefCell<DisposeBag>,
    disposed: Cell<bool>,
}

impl DisposalHandle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a teardown callback. On a disposed handle the callback runs immediately.
    pub fn push<F: FnOnce() + 'static>(&self, f: F) {
        if self.inner.disposed.get() {
            f();
        } else {
            self.inner.bag.borrow_mut().push(Box::new(f));
        }
    }

    /// Calls [`Dispose::dispose`] on `value` when the handle is disposed.
    pub fn register_disposer<T: Dispose>(&self, value: Rc<RefCell<T>>) {
        self.push(move || value.borrow_mut().dispose());
    }

    /// Runs pending callbacks. Idempotent.
    pub fn dispose(&self) {
        if self.inner.disposed.replace(true) {
            return;
        }
        let mut bag = std::mem::take(&mut *self.inner.bag.borrow_mut());
        if let Some(panic) = bag.run_all_reverse() {
            tracing::warn!(panic = %panic, "disposal callback panicked");
        }
    }

    pub fn is_disposed(&self) -> bool {
        self.inner.disposed.get()
    }

    /// Callbacks still waiting to run.
    pub fn pending(&self) -> usize {
        self.inner.bag.borrow().len()
    }
}

impl fmt::Debug for DisposalHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DisposalHandle")
            .field("pending", &self.pending())
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

/// A cached instance and its teardown.
pub struct ScopedCacheEntry {
    instance: Rc<dyn Any>,
    type_name: &'static str,
    disposal: DisposalHandle,
}

impl ScopedCacheEntry {
    pub fn disposal(&self) -> &DisposalHandle {
        &self.disposal
    }

    /// `std::any::type_name` of the cached value.
    pub fn type_name(&self) -> &'static str {
        self.type_name
    }
}

/// Request-scoped instance cache for one unit of work.
///
/// # Examples
///
/// ```
/// use ferrous_container::ThreadCorrelatedCache;
/// use std::rc::Rc;
///
/// struct Cart { items: Vec<&'static str> }
///
/// let request = ThreadCorrelatedCache::new();
/// let cart = request.get_or_create("cart", |_| Ok(Cart { items: Vec::new() })).unwrap();
/// cart.borrow_mut().items.push("apple");
///
/// // Same request, same instance.
/// let again = request.get_or_create("cart", |_| Ok(Cart { items: Vec::new() })).unwrap();
/// assert!(Rc::ptr_eq(&cart, &again));
/// assert_eq!(again.borrow().items, vec!["apple"]);
///
/// request.clear_for_thread();
/// assert!(request.is_empty());
/// ```
pub struct ThreadCorrelatedCache {
    entries: RefCell<Map<ComponentId, ScopedCacheEntry>>,
    order: RefCell<Vec<ComponentId>>,
}

impl ThreadCorrelatedCache {
    pub fn new() -> Self {
        Self {
            entries: RefCell::new(Map::default()),
            order: RefCell::new(Vec::new()),
        }
    }

    /// Returns the cached value for `id`, creating it with `factory` on first use.
    ///
    /// The factory receives the entry's disposal handle so it can register
    /// teardown. It runs at most once per id per request; a failed factory
    /// leaves nothing cached and its handle is disposed. Asking for an id with
    /// a different type than it was created with is an `IllegalState` error.
    pub fn get_or_create<V, F>(&self, id: impl Into<ComponentId>, factory: F) -> ContainerResult<Rc<RefCell<V>>>
    where
        V: 'static,
        F: FnOnce(&DisposalHandle) -> ContainerResult<V>,
    {
        let id = id.into();
        if let Some(existing) = self.lookup::<V>(&id)? {
            return Ok(existing);
        }

        let disposal = DisposalHandle::new();
        let value = match factory(&disposal) {
            Ok(value) => Rc::new(RefCell::new(value)),
            Err(err) => {
                disposal.dispose();
                return Err(err);
            }
        };

        // The factory may have populated the same id re-entrantly.
        if let Some(existing) = self.lookup::<V>(&id)? {
            disposal.dispose();
            return Ok(existing);
        }

        self.entries.borrow_mut().insert(
            id.clone(),
            ScopedCacheEntry {
                instance: value.clone(),
                type_name: std::any::type_name::<V>(),
                disposal,
            },
        );
        self.order.borrow_mut().push(id);
        Ok(value)
    }

    fn lookup<V: 'static>(&self, id: &ComponentId) -> ContainerResult<Option<Rc<RefCell<V>>>> {
        let entries = self.entries.borrow();
        match entries.get(id) {
            None => Ok(None),
            Some(entry) => match entry.instance.clone().downcast::<RefCell<V>>() {
                Ok(value) => Ok(Some(value)),
                Err(_) => Err(ContainerError::IllegalState(format!(
                    "request entry {} holds {}, not {}",
                    id,
                    entry.type_name,
                    std::any::type_name::<V>()
                ))),
            },
        }
    }

    /// Disposal handle for `id`, or `None` when nothing is cached under it.
    pub fn disposal_handle(&self, id: &str) -> Option<DisposalHandle> {
        self.entries.borrow().get(id).map(|e| e.disposal.clone())
    }

    /// Disposes every entry, most recently created first, and empties the cache.
    ///
    /// Calling it again on an empty cache does nothing.
    pub fn clear_for_thread(&self) {
        let order = std::mem::take(&mut *self.order.borrow_mut());
        if order.is_empty() {
            return;
        }
        let mut entries = std::mem::take(&mut *self.entries.borrow_mut());
        tracing::debug!(entries = order.len(), "clearing request cache");
        for id in order.iter().rev() {
            if let Some(entry) = entries.remove(id) {
                // Teardown may consult the cache; no borrow is held here.
                entry.disposal.dispose();
            }
        }
    }

    pub fn len(&self) -> usize {
        self.order.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.borrow().is_empty()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.entries.borrow().contains_key(id)
    }

    /// Cached ids in creation order.
    pub fn ids(&self) -> Vec<ComponentId> {
        self.order.borrow().clone()
    }
}

impl Default for ThreadCorrelatedCache {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for ThreadCorrelatedCache {
    fn drop(&mut self) {
        self.clear_for_thread();
    }
}

impl fmt::Debug for ThreadCorrelatedCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ThreadCorrelatedCache").field("ids", &self.ids()).finish()
    }
}
