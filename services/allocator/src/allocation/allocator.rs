//! The allocator facade.
//!
//! Owns the fleet state and the active strategy behind one reader/writer
//! lock. The two mutation entry points, [`Allocator::set_targets`] and
//! [`Allocator::set_collectors`], diff the incoming snapshot against the
//! current one and hand only the affected targets to the strategy. Reads
//! return owned copies.
//!
//! # Invariants
//!
//! - A collector's `num_targets` equals the number of targets naming it
//! - A target's collector, when set, is a member of the current fleet
//! - An empty collector snapshot never wipes existing assignments

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use parking_lot::RwLock;
use ta_reconcile::diff_maps;
use tracing::{debug, info, instrument, warn};

use super::state::FleetState;
use super::strategy::{FleetView, Reallocation, Strategy};
use super::{AllocationError, Collector};
use crate::metrics::Metrics;
use crate::target::{ItemHash, TargetItem};

/// What one reconciliation pass did.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ReconcileStats {
    pub targets_added: usize,
    pub targets_removed: usize,
    pub collectors_added: usize,
    pub collectors_removed: usize,
    /// Targets run through the strategy.
    pub targets_placed: usize,
    /// Targets the strategy could not place; they were dropped.
    pub targets_unassigned: usize,
}

impl ReconcileStats {
    pub fn has_changes(&self) -> bool {
        self.targets_added > 0
            || self.targets_removed > 0
            || self.collectors_added > 0
            || self.collectors_removed > 0
    }
}

struct Inner {
    state: FleetState,
    strategy: Box<dyn Strategy>,
}

pub struct Allocator {
    inner: RwLock<Inner>,
    strategy_name: &'static str,
    metrics: Arc<Metrics>,
}

impl Allocator {
    pub fn new(strategy: Box<dyn Strategy>) -> Self {
        Self::with_metrics(strategy, Arc::new(Metrics::default()))
    }

    pub fn with_metrics(strategy: Box<dyn Strategy>, metrics: Arc<Metrics>) -> Self {
        Self {
            strategy_name: strategy.name(),
            inner: RwLock::new(Inner {
                state: FleetState::default(),
                strategy,
            }),
            metrics,
        }
    }

    pub fn strategy_name(&self) -> &'static str {
        self.strategy_name
    }

    pub fn metrics(&self) -> &Arc<Metrics> {
        &self.metrics
    }

    /// Install a new target snapshot.
    ///
    /// Removed targets release their collector. With no fleet yet, new
    /// targets are stored unassigned until collectors arrive.
    #[instrument(skip_all, fields(strategy = self.strategy_name, targets = targets.len()))]
    pub fn set_targets(&self, targets: HashMap<ItemHash, TargetItem>) -> ReconcileStats {
        let started = Instant::now();
        let mut stats = ReconcileStats::default();
        let mut guard = self.inner.write();
        let Inner { state, strategy } = &mut *guard;

        let changes = diff_maps(&state.targets, &targets);
        if changes.is_empty() {
            drop(guard);
            self.metrics
                .observe_latency("set_targets", self.strategy_name, started.elapsed());
            return stats;
        }

        let (additions, removals) = changes.into_parts();
        for hash in removals.keys() {
            state.remove_target(*hash);
        }
        stats.targets_removed = removals.len();
        stats.targets_added = additions.len();

        let added: Vec<ItemHash> = additions.keys().copied().collect();
        for (hash, mut item) in additions {
            item.set_collector(None);
            state.targets.insert(hash, item);
        }

        if state.collectors.is_empty() {
            debug!(
                unassigned = state.targets.len(),
                "No collectors yet, targets stored unassigned"
            );
        } else {
            let to_place = match strategy.reallocation() {
                Reallocation::Recompute => state.targets.keys().copied().collect(),
                Reallocation::Incremental | Reallocation::RebalanceOnCollectorChange => added,
            };
            self.place(state, &**strategy, to_place, &mut stats);
        }

        self.publish(state);
        drop(guard);

        self.metrics
            .observe_latency("set_targets", self.strategy_name, started.elapsed());
        debug!(
            added = stats.targets_added,
            removed = stats.targets_removed,
            unassigned = stats.targets_unassigned,
            "Targets reconciled"
        );
        stats
    }

    /// Install a new fleet snapshot.
    ///
    /// An empty snapshot is ignored: the last known fleet keeps its targets.
    #[instrument(skip_all, fields(strategy = self.strategy_name, collectors = collectors.len()))]
    pub fn set_collectors(&self, collectors: HashMap<String, Collector>) -> ReconcileStats {
        let started = Instant::now();
        let mut stats = ReconcileStats::default();
        if collectors.is_empty() {
            info!("No collector instances present, keeping last known fleet");
            return stats;
        }
        self.metrics.set_collectors_allocatable(collectors.len());

        let mut guard = self.inner.write();
        let Inner { state, strategy } = &mut *guard;

        let changes = diff_maps(&state.collectors, &collectors);
        if changes.is_empty() {
            return stats;
        }

        let (additions, removals) = changes.into_parts();
        stats.collectors_added = additions.len();
        stats.collectors_removed = removals.len();
        for name in removals.keys() {
            let orphans = state.remove_collector(name);
            debug!(collector = %name, orphans = orphans.len(), "Collector removed");
        }
        for (name, collector) in additions {
            state.collectors.insert(
                name,
                Collector {
                    num_targets: 0,
                    ..collector
                },
            );
        }

        for err in strategy.set_collectors(&state.collectors) {
            warn!(error = %err, "Collector left out of allocation topology");
        }

        let to_place = match strategy.reallocation() {
            Reallocation::Recompute => state.targets.keys().copied().collect(),
            Reallocation::Incremental => state.unassigned(),
            Reallocation::RebalanceOnCollectorChange => {
                state.reset_assignments();
                state.targets.keys().copied().collect()
            }
        };
        self.place(state, &**strategy, to_place, &mut stats);

        self.publish(state);
        drop(guard);

        self.metrics
            .observe_latency("set_collectors", self.strategy_name, started.elapsed());
        info!(
            added = stats.collectors_added,
            removed = stats.collectors_removed,
            placed = stats.targets_placed,
            unassigned = stats.targets_unassigned,
            "Collectors reconciled"
        );
        stats
    }

    /// Run `hashes` through the strategy. Targets it cannot place are
    /// dropped so no half-assigned target stays behind.
    fn place(
        &self,
        state: &mut FleetState,
        strategy: &dyn Strategy,
        hashes: Vec<ItemHash>,
        stats: &mut ReconcileStats,
    ) {
        let mut failed = 0;
        for hash in hashes {
            state.unassign(hash);
            let Some(item) = state.targets.get(&hash) else {
                continue;
            };
            let fleet = FleetView {
                collectors: &state.collectors,
                jobs: &state.jobs,
            };
            let decision = strategy
                .collector_for_target(fleet, item)
                .and_then(|name| match state.collectors.contains_key(&name) {
                    true => Ok(name),
                    false => Err(AllocationError::UnknownCollector(name)),
                });

            stats.targets_placed += 1;
            match decision {
                Ok(name) => state.assign(hash, &name),
                Err(err) => {
                    if let Some(item) = state.targets.remove(&hash) {
                        debug!(
                            job = item.job_name(),
                            target_url = item.target_url(),
                            hash = %hash,
                            error = %err,
                            "Could not assign target"
                        );
                    }
                    failed += 1;
                }
            }
        }

        if failed > 0 {
            info!(targets = failed, "Could not assign some targets");
        }
        stats.targets_unassigned += failed;
        self.metrics.set_targets_unassigned(failed);
    }

    fn publish(&self, state: &FleetState) {
        self.metrics.set_targets_per_collector(
            state
                .collectors
                .values()
                .map(|c| (c.name.as_str(), c.num_targets)),
        );
    }

    /// Copy of every target, keyed by hash.
    pub fn target_items(&self) -> HashMap<ItemHash, TargetItem> {
        self.inner.read().state.targets.clone()
    }

    /// Copy of the fleet, with current target counts.
    pub fn collectors(&self) -> HashMap<String, Collector> {
        self.inner.read().state.collectors.clone()
    }

    /// Targets of `job` assigned to `collector`.
    pub fn targets_for_collector_and_job(&self, collector: &str, job: &str) -> Vec<TargetItem> {
        let guard = self.inner.read();
        guard
            .state
            .jobs
            .targets(collector, job)
            .filter_map(|hash| guard.state.targets.get(&hash).cloned())
            .collect()
    }
}

impl std::fmt::Debug for Allocator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Allocator")
            .field("strategy", &self.strategy_name)
            .finish_non_exhaustive()
    }
}
