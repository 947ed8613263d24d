//! Per-job balancing: each job's targets are spread evenly over the fleet.
//!
//! A target goes to the collector holding the fewest targets of the same
//! job, breaking ties on total load. A roster change cannot be repaired
//! incrementally without skewing some job, so the allocator rebalances
//! everything when collectors come or go.

use std::collections::HashMap;

use super::strategy::{FleetView, Reallocation, Strategy, JOB_AVERAGE};
use super::{AllocationError, Collector};
use crate::target::TargetItem;

#[derive(Debug, Default, Clone, Copy)]
pub struct JobAverageStrategy;

impl Strategy for JobAverageStrategy {
    fn name(&self) -> &'static str {
        JOB_AVERAGE
    }

    fn reallocation(&self) -> Reallocation {
        Reallocation::RebalanceOnCollectorChange
    }

    fn set_collectors(&mut self, _: &HashMap<String, Collector>) -> Vec<AllocationError> {
        Vec::new()
    }

    fn collector_for_target(
        &self,
        fleet: FleetView<'_>,
        item: &TargetItem,
    ) -> Result<String, AllocationError> {
        let job = item.job_name();
        fleet
            .collectors
            .values()
            .min_by(|a, b| {
                let a_key = (fleet.jobs.count(&a.name, job), a.num_targets);
                let b_key = (fleet.jobs.count(&b.name, job), b.num_targets);
                a_key.cmp(&b_key).then_with(|| a.name.cmp(&b.name))
            })
            .map(|c| c.name.clone())
            .ok_or_else(|| AllocationError::NoCollectorForTarget {
                job: job.to_string(),
                target: item.target_url().to_string(),
            })
    }
}
