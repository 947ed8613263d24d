//! Fleet state owned by the allocator.

use std::collections::{HashMap, HashSet};

use super::Collector;
use crate::target::{ItemHash, TargetItem};

/// Assigned targets grouped by collector, then by job.
#[derive(Debug, Default, Clone)]
pub struct JobIndex(HashMap<String, HashMap<String, HashSet<ItemHash>>>);

impl JobIndex {
    /// Number of targets of `job` assigned to `collector`.
    pub fn count(&self, collector: &str, job: &str) -> usize {
        self.0
            .get(collector)
            .and_then(|jobs| jobs.get(job))
            .map_or(0, HashSet::len)
    }

    pub fn targets<'a>(
        &'a self,
        collector: &str,
        job: &str,
    ) -> impl Iterator<Item = ItemHash> + 'a {
        self.0
            .get(collector)
            .and_then(|jobs| jobs.get(job))
            .into_iter()
            .flat_map(|hashes| hashes.iter().copied())
    }

    fn insert(&mut self, collector: &str, job: &str, hash: ItemHash) {
        self.0
            .entry(collector.to_string())
            .or_default()
            .entry(job.to_string())
            .or_default()
            .insert(hash);
    }

    fn remove(&mut self, collector: &str, job: &str, hash: ItemHash) {
        let Some(jobs) = self.0.get_mut(collector) else {
            return;
        };
        if let Some(hashes) = jobs.get_mut(job) {
            hashes.remove(&hash);
            if hashes.is_empty() {
                jobs.remove(job);
            }
        }
        if jobs.is_empty() {
            self.0.remove(collector);
        }
    }

    fn take_collector(&mut self, collector: &str) -> Vec<ItemHash> {
        self.0
            .remove(collector)
            .into_iter()
            .flat_map(|jobs| jobs.into_values().flatten())
            .collect()
    }

    fn clear(&mut self) {
        self.0.clear();
    }
}

/// Collectors, targets and the assignment index between them.
///
/// Every mutation goes through methods that keep `num_targets`, the job
/// index and each target's collector name in agreement.
#[derive(Debug, Default)]
pub(crate) struct FleetState {
    pub collectors: HashMap<String, Collector>,
    pub targets: HashMap<ItemHash, TargetItem>,
    pub jobs: JobIndex,
}

impl FleetState {
    pub fn assign(&mut self, hash: ItemHash, collector: &str) {
        let Some(item) = self.targets.get_mut(&hash) else {
            return;
        };
        let Some(owner) = self.collectors.get_mut(collector) else {
            return;
        };
        owner.num_targets += 1;
        self.jobs.insert(collector, item.job_name(), hash);
        item.set_collector(Some(collector.to_string()));
    }

    pub fn unassign(&mut self, hash: ItemHash) {
        let Some(item) = self.targets.get_mut(&hash) else {
            return;
        };
        let Some(previous) = item.collector_name().map(str::to_string) else {
            return;
        };
        if let Some(owner) = self.collectors.get_mut(&previous) {
            owner.num_targets = owner.num_targets.saturating_sub(1);
        }
        self.jobs.remove(&previous, item.job_name(), hash);
        item.set_collector(None);
    }

    pub fn remove_target(&mut self, hash: ItemHash) -> Option<TargetItem> {
        self.unassign(hash);
        self.targets.remove(&hash)
    }

    /// Drop a collector and return the targets it was holding, now unassigned.
    pub fn remove_collector(&mut self, name: &str) -> Vec<ItemHash> {
        self.collectors.remove(name);
        let orphans = self.jobs.take_collector(name);
        for hash in &orphans {
            if let Some(item) = self.targets.get_mut(hash) {
                item.set_collector(None);
            }
        }
        orphans
    }

    /// Forget every assignment while keeping collectors and targets.
    pub fn reset_assignments(&mut self) {
        self.jobs.clear();
        for collector in self.collectors.values_mut() {
            collector.num_targets = 0;
        }
        for item in self.targets.values_mut() {
            item.set_collector(None);
        }
    }

    pub fn unassigned(&self) -> Vec<ItemHash> {
        self.targets
            .iter()
            .filter(|(_, item)| item.collector_name().is_none())
            .map(|(hash, _)| *hash)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ta_labels::labels;

    fn state_with(collectors: &[&str], targets: &[(&str, &str)]) -> (FleetState, Vec<ItemHash>) {
        let mut state = FleetState::default();
        for name in collectors {
            state.collectors.insert(name.to_string(), Collector::new(*name));
        }
        let mut hashes = Vec::new();
        for (job, url) in targets {
            let item = TargetItem::new(*job, *url, labels! { "__address__" => *url });
            hashes.push(item.hash());
            state.targets.insert(item.hash(), item);
        }
        (state, hashes)
    }

    #[test]
    fn test_assign_and_unassign_keep_counts() {
        let (mut state, hashes) = state_with(&["c0"], &[("a", "h:1"), ("a", "h:2")]);

        state.assign(hashes[0], "c0");
        state.assign(hashes[1], "c0");
        assert_eq!(state.collectors["c0"].num_targets, 2);
        assert_eq!(state.jobs.count("c0", "a"), 2);

        state.unassign(hashes[0]);
        assert_eq!(state.collectors["c0"].num_targets, 1);
        assert_eq!(state.jobs.count("c0", "a"), 1);
        assert_eq!(state.targets[&hashes[0]].collector_name(), None);
    }

    #[test]
    fn test_remove_collector_orphans_its_targets() {
        let (mut state, hashes) = state_with(&["c0", "c1"], &[("a", "h:1"), ("b", "h:2")]);
        state.assign(hashes[0], "c0");
        state.assign(hashes[1], "c1");

        let orphans = state.remove_collector("c0");

        assert_eq!(orphans, vec![hashes[0]]);
        assert_eq!(state.unassigned(), vec![hashes[0]]);
        assert_eq!(state.targets[&hashes[1]].collector_name(), Some("c1"));
    }

    #[test]
    fn test_assign_to_unknown_collector_is_ignored() {
        let (mut state, hashes) = state_with(&[], &[("a", "h:1")]);
        state.assign(hashes[0], "ghost");
        assert_eq!(state.targets[&hashes[0]].collector_name(), None);
    }
}
