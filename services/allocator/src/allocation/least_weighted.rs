//! Least-weighted allocation: each new target goes to the collector with the
//! fewest targets.

use std::collections::HashMap;

use super::strategy::{FleetView, Reallocation, Strategy, LEAST_WEIGHTED};
use super::{AllocationError, Collector};
use crate::target::TargetItem;

#[derive(Debug, Default, Clone, Copy)]
pub struct LeastWeightedStrategy;

impl Strategy for LeastWeightedStrategy {
    fn name(&self) -> &'static str {
        LEAST_WEIGHTED
    }

    fn reallocation(&self) -> Reallocation {
        Reallocation::Incremental
    }

    fn set_collectors(&mut self, _: &HashMap<String, Collector>) -> Vec<AllocationError> {
        Vec::new()
    }

    fn collector_for_target(
        &self,
        fleet: FleetView<'_>,
        item: &TargetItem,
    ) -> Result<String, AllocationError> {
        // Ties go to the lexically smallest name so runs are reproducible.
        fleet
            .collectors
            .values()
            .min_by(|a, b| {
                a.num_targets
                    .cmp(&b.num_targets)
                    .then_with(|| a.name.cmp(&b.name))
            })
            .map(|c| c.name.clone())
            .ok_or_else(|| AllocationError::NoCollectorForTarget {
                job: item.job_name().to_string(),
                target: item.target_url().to_string(),
            })
    }
}
