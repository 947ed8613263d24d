//! The strategy contract and the strategy registry.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use super::consistent_hashing::ConsistentHashingStrategy;
use super::job_average::JobAverageStrategy;
use super::least_weighted::LeastWeightedStrategy;
use super::per_node::PerNodeStrategy;
use super::per_zone::PerZoneStrategy;
use super::ring::RingConfig;
use super::state::JobIndex;
use super::topology::{NodeTopology, DEFAULT_CACHE_TTL};
use super::{AllocationError, Collector};
use crate::target::TargetItem;

pub const LEAST_WEIGHTED: &str = "least-weighted";
pub const JOB_AVERAGE: &str = "job-average";
pub const CONSISTENT_HASHING: &str = "consistent-hashing";
pub const PER_NODE: &str = "per-node";
pub const PER_ZONE: &str = "per-zone";

/// Which targets the allocator re-evaluates after a change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reallocation {
    /// Placement is a pure function of topology and target: every target is
    /// re-evaluated after any target or collector change.
    Recompute,
    /// Placement is running state: only new targets and targets whose
    /// collector went away are placed.
    Incremental,
    /// Like `Incremental` for target changes, but a collector change wipes
    /// every assignment and places all targets again.
    RebalanceOnCollectorChange,
}

/// Read-only view of the fleet handed to a strategy while it places a target.
#[derive(Clone, Copy)]
pub struct FleetView<'a> {
    pub collectors: &'a HashMap<String, Collector>,
    pub jobs: &'a JobIndex,
}

/// Decides which collector a target belongs to.
///
/// Strategies run inside the allocator's write lock and must not block.
pub trait Strategy: Send + Sync {
    fn name(&self) -> &'static str;

    fn reallocation(&self) -> Reallocation;

    /// Rebuild any internal topology for a new fleet.
    ///
    /// Collectors that cannot be placed in the topology are skipped and
    /// reported; the rest of the fleet is still usable.
    fn set_collectors(&mut self, collectors: &HashMap<String, Collector>) -> Vec<AllocationError>;

    fn collector_for_target(
        &self,
        fleet: FleetView<'_>,
        item: &TargetItem,
    ) -> Result<String, AllocationError>;

    /// Strategy to defer to for targets this one cannot place. Ignored by
    /// strategies that never defer.
    fn set_fallback_strategy(&mut self, _fallback: Box<dyn Strategy>) {}
}

/// Construction inputs shared by all strategies.
#[derive(Clone)]
pub struct StrategyOptions {
    pub ring: RingConfig,
    pub fallback_strategy: Option<String>,
    pub topology: Option<Arc<dyn NodeTopology>>,
    pub zone_cache_ttl: Duration,
}

impl Default for StrategyOptions {
    fn default() -> Self {
        Self {
            ring: RingConfig::default(),
            fallback_strategy: None,
            topology: None,
            zone_cache_ttl: DEFAULT_CACHE_TTL,
        }
    }
}

type Constructor = fn(&StrategyOptions) -> Result<Box<dyn Strategy>, AllocationError>;

const REGISTRY: &[(&str, Constructor)] = &[
    (LEAST_WEIGHTED, least_weighted),
    (JOB_AVERAGE, job_average),
    (CONSISTENT_HASHING, consistent_hashing),
    (PER_NODE, per_node),
    (PER_ZONE, per_zone),
];

fn least_weighted(_: &StrategyOptions) -> Result<Box<dyn Strategy>, AllocationError> {
    Ok(Box::new(LeastWeightedStrategy))
}

fn job_average(_: &StrategyOptions) -> Result<Box<dyn Strategy>, AllocationError> {
    Ok(Box::new(JobAverageStrategy))
}

fn consistent_hashing(options: &StrategyOptions) -> Result<Box<dyn Strategy>, AllocationError> {
    Ok(Box::new(ConsistentHashingStrategy::new(options.ring)))
}

fn per_node(_: &StrategyOptions) -> Result<Box<dyn Strategy>, AllocationError> {
    Ok(Box::new(PerNodeStrategy::default()))
}

fn per_zone(options: &StrategyOptions) -> Result<Box<dyn Strategy>, AllocationError> {
    let topology = options
        .topology
        .clone()
        .ok_or(AllocationError::MissingTopology(PER_ZONE))?;
    Ok(Box::new(PerZoneStrategy::new(
        topology,
        options.ring,
        options.zone_cache_ttl,
    )))
}

fn constructor(name: &str) -> Result<Constructor, AllocationError> {
    REGISTRY
        .iter()
        .find(|(registered, _)| *registered == name)
        .map(|(_, ctor)| *ctor)
        .ok_or_else(|| AllocationError::UnregisteredStrategy(name.to_string()))
}

/// Names of all registered strategies.
pub fn registered_strategies() -> impl Iterator<Item = &'static str> {
    REGISTRY.iter().map(|(name, _)| *name)
}

pub fn is_registered(name: &str) -> bool {
    registered_strategies().any(|registered| registered == name)
}

/// Build the strategy registered as `name`, wiring in its fallback.
pub fn new_strategy(
    name: &str,
    options: &StrategyOptions,
) -> Result<Box<dyn Strategy>, AllocationError> {
    let mut strategy = constructor(name)?(options)?;
    if let Some(fallback) = options.fallback_strategy.as_deref().filter(|f| !f.is_empty()) {
        strategy.set_fallback_strategy(constructor(fallback)?(options)?);
    }
    Ok(strategy)
}
