//! Pool counters and statistics snapshots.

use std::sync::atomic::{AtomicU64, Ordering};

use super::DiscardReason;

/// Event counters updated without taking the pool lock.
#[derive(Debug, Default)]
pub(crate) struct PoolCounters {
    pub(crate) checkouts: AtomicU64,
    pub(crate) created: AtomicU64,
    pub(crate) sweeps: AtomicU64,
    pub(crate) flushes: AtomicU64,
    pub(crate) access_timeouts: AtomicU64,
    pub(crate) overdrafts: AtomicU64,
    pub(crate) replaced: AtomicU64,
    pub(crate) discarded_full: AtomicU64,
    pub(crate) idle_timeouts: AtomicU64,
    pub(crate) aged: AtomicU64,
    pub(crate) flushed: AtomicU64,
    pub(crate) unhealthy: AtomicU64,
    pub(crate) closed: AtomicU64,
}

impl PoolCounters {
    #[inline]
    pub(crate) fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_discard(&self, reason: DiscardReason) {
        let counter = match reason {
            DiscardReason::Full => &self.discarded_full,
            DiscardReason::Idle => &self.idle_timeouts,
            DiscardReason::Aged => &self.aged,
            DiscardReason::Flushed => &self.flushed,
            DiscardReason::Unhealthy => &self.unhealthy,
            DiscardReason::Closed => &self.closed,
        };
        Self::bump(counter);
    }
}

/// Point-in-time view of a pool.
///
/// Counters are monotonic since pool creation; gauges reflect the moment the
/// snapshot was taken.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "config", derive(serde::Serialize))]
pub struct PoolStats {
    pub checkouts: u64,
    pub created: u64,
    pub sweeps: u64,
    pub flushes: u64,
    pub access_timeouts: u64,
    pub overdrafts: u64,
    pub replaced: u64,
    pub discarded_full: u64,
    pub idle_timeouts: u64,
    pub aged: u64,
    pub flushed: u64,
    pub unhealthy: u64,
    pub closed: u64,
    /// Instances counted against `max_size` (idle + leased + being replaced)
    pub instances_pooled: usize,
    pub instances_idle: usize,
    /// Leases currently held, overdraft leases included
    pub instances_active: usize,
    pub instances_overdraft: usize,
    pub minimum_instances: usize,
    pub min_size: usize,
    pub max_size: usize,
    pub strict_pooling: bool,
}

impl PoolStats {
    pub(crate) fn load_counters(&mut self, counters: &PoolCounters) {
        let get = |c: &AtomicU64| c.load(Ordering::Relaxed);
        self.checkouts = get(&counters.checkouts);
        self.created = get(&counters.created);
        self.sweeps = get(&counters.sweeps);
        self.flushes = get(&counters.flushes);
        self.access_timeouts = get(&counters.access_timeouts);
        self.overdrafts = get(&counters.overdrafts);
        self.replaced = get(&counters.replaced);
        self.discarded_full = get(&counters.discarded_full);
        self.idle_timeouts = get(&counters.idle_timeouts);
        self.aged = get(&counters.aged);
        self.flushed = get(&counters.flushed);
        self.unhealthy = get(&counters.unhealthy);
        self.closed = get(&counters.closed);
    }

    /// Total instances destroyed for any reason.
    pub fn discarded(&self) -> u64 {
        self.discarded_full + self.idle_timeouts + self.aged + self.flushed + self.unhealthy + self.closed
    }
}

/// What one sweep did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub aged: usize,
    pub flushed: usize,
    pub idle: usize,
    /// Expired minimum slots covered by promoting a surviving instance
    pub promoted: usize,
    /// Replacements successfully constructed
    pub replaced: usize,
}
