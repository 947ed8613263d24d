//! Zone-affinity allocation.
//!
//! Collectors are grouped by the zone of their node and each zone gets its
//! own consistent-hash ring. A target is hashed onto the ring of its own
//! node's zone. Zone answers are cached per collector name and per target
//! URL; a cached answer is only trusted while the node it was computed for
//! is still the current one.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::debug;

use super::ring::{Ring, RingConfig};
use super::strategy::{FleetView, Reallocation, Strategy, PER_ZONE};
use super::topology::{NodeTopology, TtlCache};
use super::{AllocationError, Collector};
use crate::target::TargetItem;

#[derive(Debug, Clone, PartialEq, Eq)]
struct ZonedNode {
    node: String,
    zone: String,
}

pub struct PerZoneStrategy {
    topology: Arc<dyn NodeTopology>,
    config: RingConfig,
    collector_zones: TtlCache<String, ZonedNode>,
    target_zones: Mutex<TtlCache<String, ZonedNode>>,
    rings: HashMap<String, Ring>,
}

impl PerZoneStrategy {
    pub fn new(topology: Arc<dyn NodeTopology>, config: RingConfig, cache_ttl: Duration) -> Self {
        Self {
            topology,
            config,
            collector_zones: TtlCache::new(cache_ttl),
            target_zones: Mutex::new(TtlCache::new(cache_ttl)),
            rings: HashMap::new(),
        }
    }

    fn collector_zone(&mut self, collector: &Collector) -> Result<String, AllocationError> {
        let node = collector
            .node_name
            .as_deref()
            .filter(|n| !n.is_empty())
            .ok_or_else(|| AllocationError::CollectorWithoutNode(collector.name.clone()))?;

        if let Some(cached) = self.collector_zones.get(&collector.name) {
            if cached.node == node {
                return Ok(cached.zone.clone());
            }
        }

        let zone = self.topology.zone_for_node(node)?;
        self.collector_zones.insert(
            collector.name.clone(),
            ZonedNode {
                node: node.to_string(),
                zone: zone.clone(),
            },
        );
        Ok(zone)
    }

    fn target_zone(&self, item: &TargetItem) -> Result<String, AllocationError> {
        let node = item
            .node_name()
            .ok_or_else(|| AllocationError::NoCollectorForTarget {
                job: item.job_name().to_string(),
                target: item.target_url().to_string(),
            })?;

        let url = item.target_url().to_string();
        if let Some(cached) = self.target_zones.lock().get(&url) {
            if cached.node == node {
                return Ok(cached.zone.clone());
            }
        }

        let zone = self.topology.zone_for_node(node)?;
        self.target_zones.lock().insert(
            url,
            ZonedNode {
                node: node.to_string(),
                zone: zone.clone(),
            },
        );
        Ok(zone)
    }
}

impl Strategy for PerZoneStrategy {
    fn name(&self) -> &'static str {
        PER_ZONE
    }

    fn reallocation(&self) -> Reallocation {
        Reallocation::Recompute
    }

    fn set_collectors(&mut self, collectors: &HashMap<String, Collector>) -> Vec<AllocationError> {
        self.collector_zones.prune();
        self.target_zones.lock().prune();

        let mut errors = Vec::new();
        let mut by_zone: BTreeMap<String, Vec<&str>> = BTreeMap::new();
        for collector in collectors.values() {
            match self.collector_zone(collector) {
                Ok(zone) => by_zone.entry(zone).or_default().push(&collector.name),
                Err(e) => errors.push(e),
            }
        }

        let config = self.config;
        self.rings = by_zone
            .into_iter()
            .map(|(zone, members)| {
                debug!(zone = %zone, collectors = members.len(), "Built zone ring");
                let ring = Ring::new(members, config);
                (zone, ring)
            })
            .collect();

        errors
    }

    fn collector_for_target(
        &self,
        fleet: FleetView<'_>,
        item: &TargetItem,
    ) -> Result<String, AllocationError> {
        let zone = self.target_zone(item)?;
        let member = self
            .rings
            .get(&zone)
            .and_then(|ring| ring.locate(item.target_url().as_bytes()))
            .ok_or_else(|| AllocationError::UnknownZone(zone.clone()))?;

        match fleet.collectors.contains_key(member) {
            true => Ok(member.to_string()),
            false => Err(AllocationError::UnknownCollector(member.to_string())),
        }
    }
}
