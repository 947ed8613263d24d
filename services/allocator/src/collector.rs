//! Collector fleet watcher.
//!
//! Turns the observed collector instances into the allocator's fleet,
//! rate-limited so a rolling restart does not cause one rebalance per pod.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, instrument};

use crate::allocation::{Allocator, Collector};

/// A collector instance as reported by the fleet source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectorInstance {
    pub name: String,

    /// Node the instance is scheduled on. Unscheduled instances are ignored.
    #[serde(default, alias = "node")]
    pub node_name: Option<String>,

    #[serde(default = "default_true")]
    pub running: bool,

    #[serde(default = "default_true")]
    pub ready: bool,

    /// When the instance stopped running or became unready.
    #[serde(skip)]
    pub not_ready_since: Option<Instant>,
}

fn default_true() -> bool {
    true
}

impl CollectorInstance {
    pub fn new(name: impl Into<String>, node_name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            node_name: Some(node_name.into()),
            running: true,
            ready: true,
            not_ready_since: None,
        }
    }

    pub fn not_ready_since(mut self, since: Instant) -> Self {
        self.ready = false;
        self.not_ready_since = Some(since);
        self
    }

    fn is_healthy(&self) -> bool {
        self.running && self.ready
    }
}

#[derive(Debug, Clone)]
pub struct WatcherConfig {
    /// Minimum time between two fleet updates pushed to the allocator.
    pub min_update_interval: Duration,
    /// How long an unhealthy instance keeps its targets. Zero disables the
    /// health check entirely.
    pub not_ready_grace_period: Duration,
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            min_update_interval: Duration::from_secs(5),
            not_ready_grace_period: Duration::ZERO,
        }
    }
}

pub struct CollectorWatcher {
    allocator: Arc<Allocator>,
    config: WatcherConfig,
}

impl CollectorWatcher {
    pub fn new(allocator: Arc<Allocator>, config: WatcherConfig) -> Self {
        Self { allocator, config }
    }

    /// Fleet the allocator should see at `now`.
    pub fn collectors_from(
        &self,
        instances: &[CollectorInstance],
        now: Instant,
    ) -> HashMap<String, Collector> {
        let grace = self.config.not_ready_grace_period;
        instances
            .iter()
            .filter(|instance| {
                if instance.node_name.is_none() {
                    debug!(collector = %instance.name, "Skipping unscheduled collector");
                    return false;
                }
                if grace.is_zero() || instance.is_healthy() {
                    return true;
                }
                match instance.not_ready_since {
                    Some(since) => now.saturating_duration_since(since) <= grace,
                    None => true,
                }
            })
            .map(|instance| {
                let mut collector = Collector::new(instance.name.clone());
                collector.node_name = instance.node_name.clone();
                (instance.name.clone(), collector)
            })
            .collect()
    }

    /// Push the current fleet to the allocator.
    pub fn apply(&self, instances: &[CollectorInstance]) {
        let collectors = self.collectors_from(instances, Instant::now());
        self.allocator
            .metrics()
            .set_collectors_discovered(collectors.len());
        let stats = self.allocator.set_collectors(collectors);
        if stats.has_changes() {
            info!(
                added = stats.collectors_added,
                removed = stats.collectors_removed,
                placed = stats.targets_placed,
                "Collector fleet updated"
            );
        }
    }

    /// Watch the fleet until shutdown.
    ///
    /// The current fleet is applied on the first tick; afterwards a change
    /// is applied at most once per `min_update_interval`.
    #[instrument(skip_all)]
    pub async fn run(
        self,
        mut fleet: watch::Receiver<Vec<CollectorInstance>>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        info!(
            min_update_interval_ms = self.config.min_update_interval.as_millis() as u64,
            "Starting collector watcher"
        );
        fleet.mark_changed();

        let mut ticker = tokio::time::interval(self.config.min_update_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if fleet.has_changed().unwrap_or(false) {
                        let instances = fleet.borrow_and_update().clone();
                        self.apply(&instances);
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("Collector watcher shutting down");
                        break;
                    }
                }
            }
        }
    }
}
