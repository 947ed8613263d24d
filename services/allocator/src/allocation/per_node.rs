//! Node-affinity allocation: a target goes to the collector on its node.

use std::collections::HashMap;

use super::strategy::{FleetView, Reallocation, Strategy, PER_NODE};
use super::{AllocationError, Collector};
use crate::target::TargetItem;

#[derive(Default)]
pub struct PerNodeStrategy {
    collector_by_node: HashMap<String, String>,
    fallback: Option<Box<dyn Strategy>>,
}

impl Strategy for PerNodeStrategy {
    fn name(&self) -> &'static str {
        PER_NODE
    }

    fn reallocation(&self) -> Reallocation {
        Reallocation::Recompute
    }

    fn set_collectors(&mut self, collectors: &HashMap<String, Collector>) -> Vec<AllocationError> {
        let mut sorted: Vec<&Collector> = collectors.values().collect();
        sorted.sort_by(|a, b| a.name.cmp(&b.name));

        // With two collectors on one node the first by name keeps it.
        self.collector_by_node.clear();
        for collector in sorted {
            if let Some(node) = collector.node_name.as_deref().filter(|n| !n.is_empty()) {
                self.collector_by_node
                    .entry(node.to_string())
                    .or_insert_with(|| collector.name.clone());
            }
        }

        match self.fallback.as_mut() {
            Some(fallback) => fallback.set_collectors(collectors),
            None => Vec::new(),
        }
    }

    fn collector_for_target(
        &self,
        fleet: FleetView<'_>,
        item: &TargetItem,
    ) -> Result<String, AllocationError> {
        let local = item
            .node_name()
            .and_then(|node| self.collector_by_node.get(node));
        if let Some(collector) = local {
            return Ok(collector.clone());
        }

        match &self.fallback {
            Some(fallback) => fallback.collector_for_target(fleet, item),
            None => Err(AllocationError::NoCollectorForTarget {
                job: item.job_name().to_string(),
                target: item.target_url().to_string(),
            }),
        }
    }

    fn set_fallback_strategy(&mut self, fallback: Box<dyn Strategy>) {
        self.fallback = Some(fallback);
    }
}
