//! Per-component invocation statistics.

use std::collections::HashMap;
use std::time::Duration;

use parking_lot::RwLock;

use crate::key::ComponentId;

const RECENT_WINDOW: usize = 100;

/// Timing and outcome counts for one component.
#[derive(Debug, Clone, PartialEq)]
pub struct InvocationStats {
    /// Completed invocations, faulted ones included
    pub count: u64,
    pub application_faults: u64,
    pub system_faults: u64,
    /// Calls refused before reaching the target (hooks, capacity, scope)
    pub rejected: u64,
    pub min_duration: Duration,
    pub max_duration: Duration,
    pub total_duration: Duration,
    /// Most recent durations, oldest first
    pub recent_times: Vec<Duration>,
}

impl Default for InvocationStats {
    fn default() -> Self {
        Self {
            count: 0,
            application_faults: 0,
            system_faults: 0,
            rejected: 0,
            min_duration: Duration::MAX,
            max_duration: Duration::ZERO,
            total_duration: Duration::ZERO,
            recent_times: Vec::with_capacity(RECENT_WINDOW),
        }
    }
}

impl InvocationStats {
    fn record(&mut self, duration: Duration) {
        self.count += 1;
        self.min_duration = self.min_duration.min(duration);
        self.max_duration = self.max_duration.max(duration);
        self.total_duration += duration;

        if self.recent_times.len() >= RECENT_WINDOW {
            self.recent_times.remove(0);
        }
        self.recent_times.push(duration);
    }

    /// Mean duration over every recorded call.
    pub fn average_duration(&self) -> Duration {
        if self.count == 0 {
            Duration::ZERO
        } else {
            let nanos = self.total_duration.as_nanos() / u128::from(self.count);
            Duration::from_nanos(u64::try_from(nanos).unwrap_or(u64::MAX))
        }
    }

    /// 95th percentile over the recent window.
    pub fn p95_duration(&self) -> Duration {
        if self.recent_times.is_empty() {
            return Duration::ZERO;
        }

        let mut sorted = self.recent_times.clone();
        sorted.sort();
        let index = (sorted.len() as f64 * 0.95) as usize;
        sorted.get(index.min(sorted.len() - 1)).copied().unwrap_or(Duration::ZERO)
    }

    /// Faults of either class.
    pub fn faults(&self) -> u64 {
        self.application_faults + self.system_faults
    }
}

/// How a dispatched call ended, as far as statistics care.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Recorded {
    Completed,
    ApplicationFault,
    SystemFault,
    Rejected,
}

#[derive(Debug, Default)]
pub(crate) struct MetricsCollector {
    invocations: RwLock<HashMap<ComponentId, InvocationStats>>,
}

impl MetricsCollector {
    pub(crate) fn record(&self, component: &ComponentId, outcome: Recorded, duration: Duration) {
        let mut all = self.invocations.write();
        let stats = all.entry(component.clone()).or_default();
        match outcome {
            Recorded::Rejected => {
                stats.rejected += 1;
                return;
            }
            Recorded::ApplicationFault => stats.application_faults += 1,
            Recorded::SystemFault => stats.system_faults += 1,
            Recorded::Completed => {}
        }
        stats.record(duration);
    }

    pub(crate) fn get(&self, component: &str) -> Option<InvocationStats> {
        self.invocations.read().get(component).cloned()
    }

    /// Components ordered by mean duration, slowest first.
    pub(crate) fn slowest(&self, limit: usize) -> Vec<(ComponentId, Duration)> {
        let mut all: Vec<_> = self
            .invocations
            .read()
            .iter()
            .filter(|(_, stats)| stats.count > 0)
            .map(|(id, stats)| (id.clone(), stats.average_duration()))
            .collect();
        all.sort_by(|a, b| b.1.cmp(&a.1));
        all.truncate(limit);
        all
    }
}
