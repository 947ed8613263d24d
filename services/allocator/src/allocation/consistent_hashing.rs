//! Consistent-hashing allocation keyed on the target URL.

use std::collections::HashMap;

use super::ring::{Ring, RingConfig};
use super::strategy::{FleetView, Reallocation, Strategy, CONSISTENT_HASHING};
use super::{AllocationError, Collector};
use crate::target::TargetItem;

#[derive(Debug, Clone)]
pub struct ConsistentHashingStrategy {
    config: RingConfig,
    ring: Ring,
}

impl ConsistentHashingStrategy {
    pub fn new(config: RingConfig) -> Self {
        Self {
            config,
            ring: Ring::default(),
        }
    }
}

impl Default for ConsistentHashingStrategy {
    fn default() -> Self {
        Self::new(RingConfig::default())
    }
}

impl Strategy for ConsistentHashingStrategy {
    fn name(&self) -> &'static str {
        CONSISTENT_HASHING
    }

    fn reallocation(&self) -> Reallocation {
        Reallocation::Recompute
    }

    fn set_collectors(&mut self, collectors: &HashMap<String, Collector>) -> Vec<AllocationError> {
        self.ring = Ring::new(collectors.keys(), self.config);
        Vec::new()
    }

    fn collector_for_target(
        &self,
        fleet: FleetView<'_>,
        item: &TargetItem,
    ) -> Result<String, AllocationError> {
        let member = self
            .ring
            .locate(item.target_url().as_bytes())
            .ok_or_else(|| AllocationError::NoCollectorForTarget {
                job: item.job_name().to_string(),
                target: item.target_url().to_string(),
            })?;
        match fleet.collectors.contains_key(member) {
            true => Ok(member.to_string()),
            false => Err(AllocationError::UnknownCollector(member.to_string())),
        }
    }
}
