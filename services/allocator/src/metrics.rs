//! In-process allocation metrics.
//!
//! Plain counters and gauges the allocator and discoverer update as they
//! work. An exporter reads them through [`Metrics::snapshot`].

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;

/// Running latency totals for one (method, strategy) pair.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LatencySummary {
    pub count: u64,
    pub total: Duration,
    pub max: Duration,
}

impl LatencySummary {
    fn observe(&mut self, elapsed: Duration) {
        self.count += 1;
        self.total += elapsed;
        self.max = self.max.max(elapsed);
    }

    pub fn mean(&self) -> Option<Duration> {
        u32::try_from(self.count)
            .ok()
            .filter(|n| *n > 0)
            .map(|n| self.total / n)
    }
}

#[derive(Debug, Default)]
pub struct Metrics {
    collectors_allocatable: AtomicU64,
    collectors_discovered: AtomicU64,
    targets_kept: AtomicU64,
    targets_unassigned: AtomicU64,
    targets_per_collector: Mutex<HashMap<String, u64>>,
    targets_discovered: Mutex<HashMap<String, u64>>,
    latencies: Mutex<HashMap<(&'static str, &'static str), LatencySummary>>,
}

/// A point-in-time copy of every metric.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MetricsSnapshot {
    pub collectors_allocatable: u64,
    pub collectors_discovered: u64,
    pub targets_kept: u64,
    pub targets_unassigned: u64,
    pub targets_per_collector: BTreeMap<String, u64>,
    pub targets_discovered: BTreeMap<String, u64>,
    pub latencies: BTreeMap<(&'static str, &'static str), LatencySummary>,
}

impl Metrics {
    pub fn set_collectors_allocatable(&self, n: usize) {
        self.collectors_allocatable.store(n as u64, Ordering::Relaxed);
    }

    pub fn set_collectors_discovered(&self, n: usize) {
        self.collectors_discovered.store(n as u64, Ordering::Relaxed);
    }

    /// Targets that survived filtering in the last reload.
    pub fn set_targets_kept(&self, n: usize) {
        self.targets_kept.store(n as u64, Ordering::Relaxed);
    }

    /// Targets the last reconciliation could not place.
    pub fn set_targets_unassigned(&self, n: usize) {
        self.targets_unassigned.store(n as u64, Ordering::Relaxed);
    }

    pub fn set_targets_per_collector<'a>(
        &self,
        counts: impl IntoIterator<Item = (&'a str, usize)>,
    ) {
        let mut gauge = self.targets_per_collector.lock();
        gauge.clear();
        gauge.extend(counts.into_iter().map(|(name, n)| (name.to_string(), n as u64)));
    }

    pub fn set_targets_discovered(&self, job: &str, n: usize) {
        self.targets_discovered.lock().insert(job.to_string(), n as u64);
    }

    /// Keep discovery counts only for `jobs`.
    pub fn retain_jobs<'a>(&self, jobs: impl IntoIterator<Item = &'a str>) {
        let keep: std::collections::HashSet<&str> = jobs.into_iter().collect();
        self.targets_discovered
            .lock()
            .retain(|job, _| keep.contains(job.as_str()));
    }

    pub fn observe_latency(&self, method: &'static str, strategy: &'static str, elapsed: Duration) {
        self.latencies
            .lock()
            .entry((method, strategy))
            .or_default()
            .observe(elapsed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            collectors_allocatable: self.collectors_allocatable.load(Ordering::Relaxed),
            collectors_discovered: self.collectors_discovered.load(Ordering::Relaxed),
            targets_kept: self.targets_kept.load(Ordering::Relaxed),
            targets_unassigned: self.targets_unassigned.load(Ordering::Relaxed),
            targets_per_collector: self
                .targets_per_collector
                .lock()
                .iter()
                .map(|(k, v)| (k.clone(), *v))
                .collect(),
            targets_discovered: self
                .targets_discovered
                .lock()
                .iter()
                .map(|(k, v)| (k.clone(), *v))
                .collect(),
            latencies: self
                .latencies
                .lock()
                .iter()
                .map(|(k, v)| (*k, *v))
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_latency_summary() {
        let metrics = Metrics::default();
        metrics.observe_latency("set_targets", "least-weighted", Duration::from_millis(4));
        metrics.observe_latency("set_targets", "least-weighted", Duration::from_millis(2));

        let snapshot = metrics.snapshot();
        let summary = snapshot.latencies[&("set_targets", "least-weighted")];
        assert_eq!(summary.count, 2);
        assert_eq!(summary.max, Duration::from_millis(4));
        assert_eq!(summary.mean(), Some(Duration::from_millis(3)));
    }

    #[test]
    fn test_targets_per_collector_replaces_previous_values() {
        let metrics = Metrics::default();
        metrics.set_targets_per_collector([("a", 3), ("b", 1)]);
        metrics.set_targets_per_collector([("b", 2)]);

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.targets_per_collector.len(), 1);
        assert_eq!(snapshot.targets_per_collector["b"], 2);
    }

    #[test]
    fn test_retain_jobs() {
        let metrics = Metrics::default();
        metrics.set_targets_discovered("a", 1);
        metrics.set_targets_discovered("b", 2);
        metrics.retain_jobs(["b"]);

        assert_eq!(
            metrics.snapshot().targets_discovered.keys().collect::<Vec<_>>(),
            vec!["b"]
        );
    }
}
