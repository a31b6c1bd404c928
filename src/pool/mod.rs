//! Bounded instance pool with checkout/checkin, aging, flushing and sweeping.
//!
//! The pool owns every idle instance and the accounting for leased ones. A
//! successful [`InstancePool::checkout`] hands out a [`Lease`] that is the sole
//! owner of its instance until it is checked back in or discarded, so two
//! callers can never hold the same instance at once.
//!
//! Capacity accounting: `idle + leased + replacing <= max_size` at all times.
//! Overdraft leases (non-strict pools only) are tracked separately and are
//! either adopted on return, when room exists, or destroyed.

mod slot;
mod stats;
mod sweeper;

use std::collections::VecDeque;
use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::{Arc, Weak};
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::config::PoolConfig;
use crate::error::{ContainerError, ContainerResult};
use crate::key::ComponentId;
use slot::{offset_instant, replacement_offset, PoolSlot};
pub use stats::{PoolStats, SweepReport};
use stats::PoolCounters;
use sweeper::Sweeper;

/// Why the pool destroyed an instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DiscardReason {
    /// Returned overdraft instance with no room left in the pool
    Full,
    /// Idle longer than the idle timeout
    Idle,
    /// Older than the maximum age
    Aged,
    /// Created before the last flush
    Flushed,
    /// Checked in as unhealthy after a system fault
    Unhealthy,
    /// Pool closed
    Closed,
}

/// Creates and destroys the instances a pool manages.
///
/// # Examples
///
/// ```rust
/// use ferrous_container::{InstanceSupplier, DiscardReason, ContainerResult};
/// use std::sync::atomic::{AtomicUsize, Ordering};
///
/// struct Connections { opened: AtomicUsize }
///
/// impl InstanceSupplier<String> for Connections {
///     fn create(&self) -> ContainerResult<String> {
///         let n = self.opened.fetch_add(1, Ordering::SeqCst);
///         Ok(format!("conn-{}", n))
///     }
///
///     fn discard(&self, conn: String, reason: DiscardReason) {
///         println!("closing {} ({:?})", conn, reason);
///     }
/// }
/// ```
pub trait InstanceSupplier<T>: Send + Sync {
    /// Constructs a new instance. Failures leave no slot behind.
    fn create(&self) -> ContainerResult<T>;

    /// Destroys an instance the pool no longer wants.
    fn discard(&self, instance: T, reason: DiscardReason) {
        let _ = reason;
        drop(instance);
    }
}

struct FnSupplier<F> {
    create: F,
}

impl<T, F> InstanceSupplier<T> for FnSupplier<F>
where
    F: Fn() -> ContainerResult<T> + Send + Sync,
{
    fn create(&self) -> ContainerResult<T> {
        (self.create)()
    }
}

struct PoolState<T> {
    /// Front holds the most recently returned instance.
    idle: VecDeque<PoolSlot<T>>,
    /// Leases within capacity, including ones still constructing.
    leased: usize,
    overdraft: usize,
    /// Capacity reserved for staged replacements.
    replacing: usize,
    min_held: usize,
    version: u64,
    closed: bool,
    last_sweep: Option<Instant>,
}

impl<T> PoolState<T> {
    fn pooled(&self) -> usize {
        self.idle.len() + self.leased + self.replacing
    }

    fn in_flight(&self) -> usize {
        self.leased + self.overdraft + self.replacing
    }

    fn forget_min(&mut self, slot: &PoolSlot<T>) {
        if slot.min {
            self.min_held = self.min_held.saturating_sub(1);
        }
    }
}

enum Acquired<T> {
    Existing(PoolSlot<T>),
    Create { overdraft: bool, version: u64 },
}

pub(crate) struct Shared<T> {
    config: PoolConfig,
    label: Option<ComponentId>,
    supplier: Arc<dyn InstanceSupplier<T>>,
    state: Mutex<PoolState<T>>,
    available: Condvar,
    drained: Condvar,
    counters: PoolCounters,
}

impl<T: Send + 'static> Shared<T> {
    fn label(&self) -> &str {
        self.label.as_ref().map(|l| l.as_str()).unwrap_or("pool")
    }

    fn tag(&self, err: ContainerError) -> ContainerError {
        match &self.label {
            Some(id) => err.with_component(id),
            None => err,
        }
    }

    fn checkout(self: &Arc<Self>, timeout: Duration) -> ContainerResult<Lease<T>> {
        let start = Instant::now();
        let deadline = start.checked_add(timeout);
        let mut stale: Vec<(PoolSlot<T>, DiscardReason)> = Vec::new();

        let acquired = {
            let mut state = self.state.lock();
            loop {
                if state.closed {
                    break Err(ContainerError::ShuttingDown);
                }

                if let Some(slot) = state.idle.pop_front() {
                    let now = Instant::now();
                    let reason = if slot.version != state.version {
                        Some(DiscardReason::Flushed)
                    } else if slot.is_aged(self.config.max_age, now) {
                        Some(DiscardReason::Aged)
                    } else {
                        None
                    };
                    match reason {
                        Some(reason) => {
                            state.forget_min(&slot);
                            stale.push((slot, reason));
                            continue;
                        }
                        None => {
                            state.leased += 1;
                            break Ok(Acquired::Existing(slot));
                        }
                    }
                }

                if state.pooled() < self.config.max_size {
                    state.leased += 1;
                    break Ok(Acquired::Create { overdraft: false, version: state.version });
                }

                if !self.config.strict {
                    state.overdraft += 1;
                    PoolCounters::bump(&self.counters.overdrafts);
                    break Ok(Acquired::Create { overdraft: true, version: state.version });
                }

                let now = Instant::now();
                let expired = match deadline {
                    Some(deadline) => now >= deadline,
                    None => false,
                };
                if expired {
                    PoolCounters::bump(&self.counters.access_timeouts);
                    break Err(ContainerError::PoolExhausted {
                        component: None,
                        waited: now.saturating_duration_since(start),
                    });
                }
                match deadline {
                    Some(deadline) => {
                        self.available.wait_until(&mut state, deadline);
                    }
                    None => self.available.wait(&mut state),
                }
            }
        };

        if !stale.is_empty() {
            // Stale slots freed capacity other waiters can use.
            self.available.notify_all();
            for (slot, reason) in stale {
                self.destroy(slot.value, reason);
            }
        }

        match acquired {
            Err(ContainerError::PoolExhausted { waited, .. }) => {
                tracing::warn!(pool = self.label(), ?waited, "checkout timed out");
                Err(self.tag(ContainerError::PoolExhausted { component: None, waited }))
            }
            Err(e) => Err(self.tag(e)),
            Ok(Acquired::Existing(slot)) => {
                PoolCounters::bump(&self.counters.checkouts);
                Ok(Lease::new(slot, self.clone(), false))
            }
            Ok(Acquired::Create { overdraft, version }) => match self.supplier.create() {
                Ok(value) => {
                    PoolCounters::bump(&self.counters.created);
                    PoolCounters::bump(&self.counters.checkouts);
                    tracing::debug!(pool = self.label(), overdraft, "created pooled instance");
                    Ok(Lease::new(PoolSlot::new(value, version, Instant::now()), self.clone(), overdraft))
                }
                Err(e) => {
                    {
                        let mut state = self.state.lock();
                        if overdraft {
                            state.overdraft -= 1;
                        } else {
                            state.leased -= 1;
                        }
                        self.notify_released(&state);
                    }
                    self.available.notify_one();
                    tracing::warn!(pool = self.label(), error = %e, "instance construction failed");
                    Err(self.tag(e))
                }
            },
        }
    }

    fn release(&self, mut slot: PoolSlot<T>, overdraft: bool, healthy: bool) {
        let now = Instant::now();
        let mut replace_min = None;

        let discard = {
            let mut state = self.state.lock();
            if overdraft {
                state.overdraft -= 1;
            } else {
                state.leased -= 1;
            }

            let reason = if state.closed {
                Some(DiscardReason::Closed)
            } else if !healthy {
                Some(DiscardReason::Unhealthy)
            } else if slot.version != state.version {
                Some(DiscardReason::Flushed)
            } else if slot.is_aged(self.config.max_age, now) {
                Some(DiscardReason::Aged)
            } else if overdraft && state.pooled() >= self.config.max_size {
                Some(DiscardReason::Full)
            } else {
                None
            };

            match reason {
                None => {
                    slot.last_used = now;
                    if !slot.min && state.min_held < self.config.min_size {
                        slot.min = true;
                        state.min_held += 1;
                    }
                    state.idle.push_front(slot);
                    self.available.notify_one();
                    None
                }
                Some(reason) => {
                    state.forget_min(&slot);
                    let wants_replacement = match reason {
                        DiscardReason::Aged => slot.min || self.config.replace_aged,
                        DiscardReason::Flushed => slot.min || self.config.replace_flushed,
                        _ => false,
                    };
                    if wants_replacement && state.pooled() < self.config.max_size {
                        state.replacing += 1;
                        replace_min = Some(slot.min);
                    } else {
                        self.available.notify_one();
                    }
                    self.notify_released(&state);
                    Some((slot, reason))
                }
            }
        };

        if let Some((slot, reason)) = discard {
            self.destroy(slot.value, reason);
        }
        if let Some(min) = replace_min {
            if self.install_replacement(min, 0).is_ok() {
                PoolCounters::bump(&self.counters.replaced);
            }
        }
    }

    /// Builds a replacement into capacity already reserved in `replacing`.
    fn install_replacement(&self, min: bool, offset_ms: i64) -> ContainerResult<()> {
        let created = self.supplier.create();

        let mut state = self.state.lock();
        state.replacing -= 1;
        match created {
            Ok(value) => {
                PoolCounters::bump(&self.counters.created);
                if state.closed {
                    self.notify_released(&state);
                    drop(state);
                    self.destroy(value, DiscardReason::Closed);
                    return Err(ContainerError::ShuttingDown);
                }
                let now = Instant::now();
                let mut slot = PoolSlot::new(value, state.version, offset_instant(now, offset_ms));
                slot.last_used = now;
                if min && state.min_held < self.config.min_size {
                    slot.min = true;
                    state.min_held += 1;
                }
                state.idle.push_front(slot);
                self.available.notify_one();
                Ok(())
            }
            Err(e) => {
                self.notify_released(&state);
                self.available.notify_one();
                drop(state);
                tracing::warn!(pool = self.label(), error = %e, "replacement construction failed");
                Err(self.tag(e))
            }
        }
    }

    fn notify_released(&self, state: &PoolState<T>) {
        if state.closed && state.in_flight() == 0 {
            self.drained.notify_all();
        }
    }

    fn destroy(&self, value: T, reason: DiscardReason) {
        self.counters.record_discard(reason);
        tracing::debug!(pool = self.label(), ?reason, "discarding pooled instance");
        self.supplier.discard(value, reason);
    }

    fn evict_aged(&self) -> Option<SweepReport> {
        let due = {
            let state = self.state.lock();
            match state.last_sweep {
                Some(last) => last.elapsed() >= self.config.sweep_interval,
                None => true,
            }
        };
        if due {
            Some(self.sweep())
        } else {
            None
        }
    }

    fn sweep(&self) -> SweepReport {
        PoolCounters::bump(&self.counters.sweeps);
        let now = Instant::now();
        let mut report = SweepReport::default();
        let mut discards: Vec<(PoolSlot<T>, DiscardReason)> = Vec::new();
        // (min, still wanted after promotion)
        let mut replacements: Vec<bool> = Vec::new();

        {
            let mut state = self.state.lock();
            state.last_sweep = Some(now);
            if state.closed {
                return report;
            }

            let version = state.version;
            let mut keep: Vec<PoolSlot<T>> = Vec::with_capacity(state.idle.len());
            let drained: Vec<PoolSlot<T>> = state.idle.drain(..).collect();

            for slot in drained {
                let reason = if slot.version != version {
                    Some(DiscardReason::Flushed)
                } else if slot.is_aged(self.config.max_age, now) {
                    Some(DiscardReason::Aged)
                } else {
                    None
                };
                match reason {
                    Some(reason) => {
                        state.forget_min(&slot);
                        discards.push((slot, reason));
                    }
                    None => keep.push(slot),
                }
            }

            // Expired minimum slots are covered first by promoting survivors,
            // then by staged replacements.
            for (slot, reason) in &discards {
                let configured = match reason {
                    DiscardReason::Aged => self.config.replace_aged,
                    DiscardReason::Flushed => self.config.replace_flushed,
                    _ => false,
                };
                let mut needs_min = slot.min;
                if needs_min {
                    if let Some(survivor) = keep.iter_mut().find(|s| !s.min) {
                        survivor.min = true;
                        state.min_held += 1;
                        report.promoted += 1;
                        needs_min = false;
                    }
                }
                if needs_min || configured {
                    state.replacing += 1;
                    replacements.push(needs_min);
                }
            }

            for slot in keep {
                if !slot.min && slot.is_idle_expired(self.config.idle_timeout, now) {
                    discards.push((slot, DiscardReason::Idle));
                } else {
                    state.idle.push_back(slot);
                }
            }
        }
        self.available.notify_all();

        for (slot, reason) in discards {
            match reason {
                DiscardReason::Aged => report.aged += 1,
                DiscardReason::Flushed => report.flushed += 1,
                DiscardReason::Idle => report.idle += 1,
                _ => {}
            }
            self.destroy(slot.value, reason);
        }

        let count = replacements.len();
        for (index, min) in replacements.into_iter().enumerate() {
            let offset = replacement_offset(self.config.max_age, self.config.max_age_offset, index, count);
            if self.install_replacement(min, offset).is_ok() {
                PoolCounters::bump(&self.counters.replaced);
                report.replaced += 1;
            }
        }

        if report != SweepReport::default() {
            tracing::debug!(pool = self.label(), ?report, "sweep completed");
        }
        report
    }
}

/// Exclusive ownership of one pooled instance.
///
/// Dereferences to the instance. Return it with [`Lease::checkin`], destroy it
/// with [`Lease::discard`], or let it drop: a dropped lease is returned
/// healthy, unless the thread is unwinding from a panic, in which case the
/// instance is discarded.
pub struct Lease<T: Send + 'static> {
    slot: Option<PoolSlot<T>>,
    pool: Arc<Shared<T>>,
    overdraft: bool,
}

impl<T: Send + 'static> Lease<T> {
    fn new(slot: PoolSlot<T>, pool: Arc<Shared<T>>, overdraft: bool) -> Self {
        Self { slot: Some(slot), pool, overdraft }
    }

    /// Returns the instance to the idle set.
    pub fn checkin(self) {
        self.release(true);
    }

    /// Destroys the instance and frees its capacity.
    pub fn discard(self) {
        self.release(false);
    }

    /// Returns the instance when `healthy`, destroys it otherwise.
    pub fn release(mut self, healthy: bool) {
        if let Some(slot) = self.slot.take() {
            self.pool.release(slot, self.overdraft, healthy);
        }
    }

    /// True when this lease was granted beyond `max_size` by a non-strict pool.
    pub fn is_overdraft(&self) -> bool {
        self.overdraft
    }

    /// Time since the instance was created.
    pub fn age(&self) -> Duration {
        self.slot.as_ref().map(|s| s.age(Instant::now())).unwrap_or_default()
    }

    fn slot(&self) -> &PoolSlot<T> {
        match &self.slot {
            Some(slot) => slot,
            None => unreachable!("lease accessed after release"),
        }
    }

    fn slot_mut(&mut self) -> &mut PoolSlot<T> {
        match &mut self.slot {
            Some(slot) => slot,
            None => unreachable!("lease accessed after release"),
        }
    }
}

impl<T: Send + 'static> Deref for Lease<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.slot().value
    }
}

impl<T: Send + 'static> DerefMut for Lease<T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.slot_mut().value
    }
}

impl<T: Send + 'static> Drop for Lease<T> {
    fn drop(&mut self) {
        if let Some(slot) = self.slot.take() {
            self.pool.release(slot, self.overdraft, !thread::panicking());
        }
    }
}

impl<T: Send + fmt::Debug + 'static> fmt::Debug for Lease<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Lease")
            .field("value", &self.slot.as_ref().map(|s| &s.value))
            .field("overdraft", &self.overdraft)
            .finish()
    }
}

/// Bounded pool of reusable instances.
///
/// # Examples
///
/// ```rust
/// use ferrous_container::{InstancePool, PoolConfig};
/// use std::time::Duration;
///
/// let config = PoolConfig {
///     max_size: 2,
///     access_timeout: Duration::from_millis(50),
///     ..PoolConfig::default()
/// };
/// let pool = InstancePool::from_fn(config, || Ok(Vec::<u8>::with_capacity(1024))).unwrap();
///
/// let mut first = pool.checkout().unwrap();
/// first.extend_from_slice(b"hello");
/// let second = pool.checkout().unwrap();
///
/// // Strict pool at capacity: the third checkout times out.
/// assert!(pool.checkout().is_err());
///
/// first.checkin();
/// second.checkin();
/// assert_eq!(pool.stats().instances_idle, 2);
/// ```
pub struct InstancePool<T: Send + 'static> {
    shared: Arc<Shared<T>>,
    sweeper: Mutex<Option<Sweeper>>,
}

impl<T: Send + 'static> InstancePool<T> {
    /// Creates a pool after validating `config`.
    pub fn new(config: PoolConfig, supplier: Arc<dyn InstanceSupplier<T>>) -> ContainerResult<Self> {
        Self::build(config, supplier, None)
    }

    /// Creates a pool whose instances come from a closure and are simply dropped on discard.
    pub fn from_fn<F>(config: PoolConfig, create: F) -> ContainerResult<Self>
    where
        F: Fn() -> ContainerResult<T> + Send + Sync + 'static,
    {
        Self::new(config, Arc::new(FnSupplier { create }))
    }

    pub(crate) fn labeled(config: PoolConfig, supplier: Arc<dyn InstanceSupplier<T>>, label: ComponentId) -> ContainerResult<Self> {
        Self::build(config, supplier, Some(label))
    }

    fn build(config: PoolConfig, supplier: Arc<dyn InstanceSupplier<T>>, label: Option<ComponentId>) -> ContainerResult<Self> {
        config.validate()?;
        let shared = Arc::new(Shared {
            state: Mutex::new(PoolState {
                idle: VecDeque::with_capacity(config.max_size),
                leased: 0,
                overdraft: 0,
                replacing: 0,
                min_held: 0,
                version: 0,
                closed: false,
                last_sweep: None,
            }),
            config,
            label,
            supplier,
            available: Condvar::new(),
            drained: Condvar::new(),
            counters: PoolCounters::default(),
        });
        Ok(Self { shared, sweeper: Mutex::new(None) })
    }

    /// The configuration this pool was built with.
    pub fn config(&self) -> &PoolConfig {
        &self.shared.config
    }

    /// Checks out an instance, waiting up to the configured access timeout.
    pub fn checkout(&self) -> ContainerResult<Lease<T>> {
        self.shared.checkout(self.shared.config.access_timeout)
    }

    /// Checks out an instance, waiting up to `timeout` when the pool is at capacity.
    pub fn checkout_timeout(&self, timeout: Duration) -> ContainerResult<Lease<T>> {
        self.shared.checkout(timeout)
    }

    /// Returns a lease to the pool, or destroys its instance when not `healthy`.
    pub fn checkin(&self, lease: Lease<T>, healthy: bool) {
        debug_assert!(Arc::ptr_eq(&lease.pool, &self.shared), "lease returned to a foreign pool");
        lease.release(healthy);
    }

    /// Constructs instances until the minimum floor is reached.
    ///
    /// Returns how many instances were added.
    pub fn fill_to_min(&self) -> ContainerResult<usize> {
        let mut added = 0;
        loop {
            {
                let mut state = self.shared.state.lock();
                if state.closed {
                    return Err(ContainerError::ShuttingDown);
                }
                if state.min_held + state.replacing >= self.shared.config.min_size
                    || state.pooled() >= self.shared.config.max_size
                {
                    return Ok(added);
                }
                state.replacing += 1;
            }
            self.shared.install_replacement(true, 0)?;
            added += 1;
        }
    }

    /// Sweeps if at least one sweep interval has passed since the last sweep.
    pub fn evict_aged(&self) -> Option<SweepReport> {
        self.shared.evict_aged()
    }

    /// Sweeps now, regardless of the sweep interval.
    pub fn sweep(&self) -> SweepReport {
        self.shared.sweep()
    }

    /// Retires every existing instance; they are destroyed on return or at the next sweep.
    pub fn flush(&self) {
        PoolCounters::bump(&self.shared.counters.flushes);
        self.shared.state.lock().version += 1;
    }

    /// Starts the background sweeper. Calling it on a running pool is a no-op.
    pub fn start(&self) -> ContainerResult<()> {
        let mut sweeper = self.sweeper.lock();
        if sweeper.is_none() {
            let name = format!("ferrous-container-sweeper-{}", self.shared.label());
            *sweeper = Some(Sweeper::spawn(
                Arc::downgrade(&self.shared) as Weak<Shared<T>>,
                self.shared.config.sweep_interval,
                name,
            )?);
        }
        Ok(())
    }

    /// Stops the background sweeper if it is running.
    pub fn stop(&self) {
        if let Some(sweeper) = self.sweeper.lock().take() {
            sweeper.stop();
        }
    }

    /// True while the background sweeper runs.
    pub fn running(&self) -> bool {
        self.sweeper.lock().is_some()
    }

    /// Closes the pool.
    ///
    /// Stops the sweeper, fails pending and future checkouts with
    /// `ShuttingDown`, destroys idle instances, then waits up to `timeout` for
    /// outstanding leases to come back (they are destroyed on return).
    /// Returns true when every lease was returned in time.
    pub fn close(&self, timeout: Duration) -> bool {
        self.stop();

        let idle: Vec<PoolSlot<T>> = {
            let mut state = self.shared.state.lock();
            state.closed = true;
            state.min_held = 0;
            state.idle.drain(..).collect()
        };
        self.shared.available.notify_all();
        for slot in idle {
            self.shared.destroy(slot.value, DiscardReason::Closed);
        }

        let deadline = Instant::now().checked_add(timeout);
        let mut state = self.shared.state.lock();
        while state.in_flight() > 0 {
            match deadline {
                Some(deadline) => {
                    if self.shared.drained.wait_until(&mut state, deadline).timed_out() {
                        let clean = state.in_flight() == 0;
                        if !clean {
                            tracing::warn!(pool = self.shared.label(), outstanding = state.in_flight(), "pool closed with outstanding leases");
                        }
                        return clean;
                    }
                }
                None => self.shared.drained.wait(&mut state),
            }
        }
        tracing::info!(pool = self.shared.label(), "pool closed");
        true
    }

    /// True once `close` has been called.
    pub fn is_closed(&self) -> bool {
        self.shared.state.lock().closed
    }

    /// Snapshot of counters and gauges.
    pub fn stats(&self) -> PoolStats {
        let mut stats = {
            let state = self.shared.state.lock();
            PoolStats {
                instances_pooled: state.pooled(),
                instances_idle: state.idle.len(),
                instances_active: state.leased + state.overdraft,
                instances_overdraft: state.overdraft,
                minimum_instances: state.min_held,
                min_size: self.shared.config.min_size,
                max_size: self.shared.config.max_size,
                strict_pooling: self.shared.config.strict,
                ..PoolStats::default()
            }
        };
        stats.load_counters(&self.shared.counters);
        stats
    }
}

impl<T: Send + 'static> Drop for InstancePool<T> {
    fn drop(&mut self) {
        if let Some(sweeper) = self.sweeper.get_mut().take() {
            sweeper.stop();
        }
    }
}

impl<T: Send + 'static> fmt::Debug for InstancePool<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InstancePool")
            .field("label", &self.shared.label())
            .field("config", &self.shared.config)
            .field("stats", &self.stats())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn config(max: usize, min: usize) -> PoolConfig {
        PoolConfig {
            max_size: max,
            min_size: min,
            access_timeout: Duration::from_millis(20),
            ..PoolConfig::default()
        }
    }

    fn counting_pool(config: PoolConfig) -> (InstancePool<usize>, Arc<AtomicUsize>) {
        let counter = Arc::new(AtomicUsize::new(0));
        let c = counter.clone();
        let pool = InstancePool::from_fn(config, move || Ok(c.fetch_add(1, Ordering::SeqCst))).unwrap();
        (pool, counter)
    }

    #[test]
    fn reuses_most_recently_returned_instance() {
        let (pool, created) = counting_pool(config(3, 0));
        let a = pool.checkout().unwrap();
        let b = pool.checkout().unwrap();
        assert_eq!((*a, *b), (0, 1));
        a.checkin();
        b.checkin();

        let again = pool.checkout().unwrap();
        assert_eq!(*again, 1);
        assert_eq!(created.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn failed_construction_releases_capacity() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let a = attempts.clone();
        let pool = InstancePool::from_fn(config(1, 0), move || {
            if a.fetch_add(1, Ordering::SeqCst) == 0 {
                Err(ContainerError::Instantiation { component: None, reason: "boom".into() })
            } else {
                Ok(7u8)
            }
        })
        .unwrap();

        assert!(matches!(pool.checkout(), Err(ContainerError::Instantiation { .. })));
        assert_eq!(pool.stats().instances_pooled, 0);
        let lease = pool.checkout().unwrap();
        assert_eq!(*lease, 7);
    }

    #[test]
    fn flushed_idle_instances_are_not_handed_out() {
        let (pool, _) = counting_pool(config(2, 0));
        pool.checkout().unwrap().checkin();
        pool.flush();

        let fresh = pool.checkout().unwrap();
        assert_eq!(*fresh, 1);
        let stats = pool.stats();
        assert_eq!(stats.flushed, 1);
        assert_eq!(stats.flushes, 1);
    }

    #[test]
    fn min_slots_survive_idle_timeout() {
        let (pool, _) = counting_pool(PoolConfig {
            idle_timeout: Duration::from_millis(1),
            ..config(4, 1)
        });
        let leases: Vec<_> = (0..3).map(|_| pool.checkout().unwrap()).collect();
        for lease in leases {
            lease.checkin();
        }
        std::thread::sleep(Duration::from_millis(10));

        let report = pool.sweep();
        assert_eq!(report.idle, 2);
        let stats = pool.stats();
        assert_eq!(stats.instances_idle, 1);
        assert_eq!(stats.minimum_instances, 1);
    }

    #[test]
    fn evict_aged_respects_sweep_interval() {
        let (pool, _) = counting_pool(PoolConfig {
            sweep_interval: Duration::from_secs(3600),
            ..config(2, 0)
        });
        assert!(pool.evict_aged().is_some());
        assert!(pool.evict_aged().is_none());
        assert_eq!(pool.stats().sweeps, 1);
    }

    fn aging(max: usize, min: usize, max_age_ms: u64) -> PoolConfig {
        PoolConfig { max_age: Duration::from_millis(max_age_ms), ..config(max, min) }
    }

    #[test]
    fn aged_idle_instance_is_not_handed_out() {
        let (pool, _) = counting_pool(aging(2, 0, 50));
        pool.checkout().unwrap().checkin();
        std::thread::sleep(Duration::from_millis(80));

        let fresh = pool.checkout().unwrap();
        assert_eq!(*fresh, 1);
        assert_eq!(pool.stats().aged, 1);
    }

    #[test]
    fn sweep_replaces_aged_minimum_floor() {
        let (pool, created) = counting_pool(aging(3, 2, 100));
        assert_eq!(pool.fill_to_min().unwrap(), 2);
        std::thread::sleep(Duration::from_millis(150));

        let report = pool.sweep();
        assert_eq!(report.aged, 2);
        assert_eq!(report.replaced, 2);
        assert_eq!(report.promoted, 0);

        let stats = pool.stats();
        assert_eq!(stats.aged, 2);
        assert_eq!(stats.replaced, 2);
        assert_eq!(stats.instances_idle, 2);
        assert_eq!(stats.instances_pooled, 2);
        assert_eq!(stats.minimum_instances, 2);
        assert_eq!(created.load(Ordering::SeqCst), 4);
    }

    #[test]
    fn sweep_promotes_fresh_survivor_to_minimum() {
        let (pool, created) = counting_pool(aging(3, 1, 100));
        pool.fill_to_min().unwrap();
        std::thread::sleep(Duration::from_millis(60));

        // The floor instance is still young here; the second one is new.
        let floor = pool.checkout().unwrap();
        let extra = pool.checkout().unwrap();
        assert_eq!((*floor, *extra), (0, 1));
        floor.checkin();
        extra.checkin();
        std::thread::sleep(Duration::from_millis(60));

        let report = pool.sweep();
        assert_eq!(report.aged, 1);
        assert_eq!(report.promoted, 1);
        assert_eq!(report.replaced, 0);

        let stats = pool.stats();
        assert_eq!(stats.instances_idle, 1);
        assert_eq!(stats.minimum_instances, 1);
        assert_eq!(created.load(Ordering::SeqCst), 2);
        assert_eq!(*pool.checkout().unwrap(), 1);
    }

    #[test]
    fn staged_replacements_age_out_in_turn() {
        let (pool, _) = counting_pool(PoolConfig { max_age_offset: Some(1.0), ..aging(4, 2, 200) });
        pool.fill_to_min().unwrap();
        std::thread::sleep(Duration::from_millis(250));
        assert_eq!(pool.sweep().replaced, 2);

        // Offsets 0 and 100ms: only the first replacement is past max_age now.
        std::thread::sleep(Duration::from_millis(250));
        let report = pool.sweep();
        assert_eq!(report.aged, 1);
        assert_eq!(report.replaced, 1);
        assert_eq!(pool.stats().minimum_instances, 2);
    }

    #[test]
    fn aged_checkin_builds_replacement_when_configured() {
        let (pool, created) = counting_pool(PoolConfig { replace_aged: true, ..aging(2, 0, 50) });
        let lease = pool.checkout().unwrap();
        std::thread::sleep(Duration::from_millis(80));
        lease.checkin();

        let stats = pool.stats();
        assert_eq!(stats.aged, 1);
        assert_eq!(stats.replaced, 1);
        assert_eq!(stats.instances_idle, 1);
        assert_eq!(created.load(Ordering::SeqCst), 2);
        assert_eq!(*pool.checkout().unwrap(), 1);
    }

    #[test]
    fn failed_replacement_is_not_counted() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let a = attempts.clone();
        let pool = InstancePool::from_fn(PoolConfig { replace_aged: true, ..aging(2, 0, 50) }, move || {
            if a.fetch_add(1, Ordering::SeqCst) == 0 {
                Ok(0usize)
            } else {
                Err(ContainerError::Instantiation { component: None, reason: "backend down".into() })
            }
        })
        .unwrap();

        let lease = pool.checkout().unwrap();
        std::thread::sleep(Duration::from_millis(80));
        lease.checkin();

        let stats = pool.stats();
        assert_eq!(stats.aged, 1);
        assert_eq!(stats.replaced, 0);
        assert_eq!(stats.instances_pooled, 0);
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn background_sweeper_evicts_aged_instances() {
        let (pool, _) = counting_pool(PoolConfig { sweep_interval: Duration::from_millis(10), ..aging(2, 0, 30) });
        pool.checkout().unwrap().checkin();
        assert!(!pool.running());

        pool.start().unwrap();
        pool.start().unwrap();
        assert!(pool.running());

        let deadline = Instant::now() + Duration::from_secs(2);
        while pool.stats().aged == 0 && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(5));
        }
        pool.stop();
        assert!(!pool.running());

        let stats = pool.stats();
        assert_eq!(stats.aged, 1);
        assert_eq!(stats.instances_idle, 0);
        assert!(stats.sweeps >= 1);

        std::thread::sleep(Duration::from_millis(40));
        assert_eq!(pool.stats().sweeps, stats.sweeps);
    }
}
