//! Pool slot bookkeeping.

use std::time::{Duration, Instant};

/// One pooled instance plus the timestamps the sweeper needs.
///
/// A slot is owned either by the pool's idle list or by exactly one `Lease`.
pub(crate) struct PoolSlot<T> {
    pub(crate) value: T,
    pub(crate) created: Instant,
    pub(crate) last_used: Instant,
    pub(crate) version: u64,
    /// Counts toward the pool's minimum floor; immune to idle timeout.
    pub(crate) min: bool,
}

impl<T> PoolSlot<T> {
    pub(crate) fn new(value: T, version: u64, created: Instant) -> Self {
        Self {
            value,
            created,
            last_used: created,
            version,
            min: false,
        }
    }

    pub(crate) fn is_aged(&self, max_age: Duration, now: Instant) -> bool {
        !max_age.is_zero() && now.saturating_duration_since(self.created) > max_age
    }

    pub(crate) fn is_idle_expired(&self, idle_timeout: Duration, now: Instant) -> bool {
        !idle_timeout.is_zero() && now.saturating_duration_since(self.last_used) > idle_timeout
    }

    pub(crate) fn age(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.created)
    }
}

/// Shifts a creation timestamp by a signed millisecond offset.
///
/// Positive offsets make a replacement look younger so a batch of
/// replacements does not age out in the same sweep.
pub(crate) fn offset_instant(now: Instant, offset_ms: i64) -> Instant {
    let magnitude = Duration::from_millis(offset_ms.unsigned_abs());
    if offset_ms >= 0 {
        now.checked_add(magnitude).unwrap_or(now)
    } else {
        now.checked_sub(magnitude).unwrap_or(now)
    }
}

/// Creation offset for the `index`-th of `count` staged replacements.
pub(crate) fn replacement_offset(max_age: Duration, factor: Option<f64>, index: usize, count: usize) -> i64 {
    let max_age_ms = max_age.as_millis() as i64;
    match factor {
        Some(factor) if max_age_ms > 0 && count > 0 => {
            let spread = (max_age_ms / count as i64) as f64 * index as f64 * factor;
            (spread as i64) % max_age_ms
        }
        _ => 0,
    }
}
