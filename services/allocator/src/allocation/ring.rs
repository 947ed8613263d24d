//! Partitioned consistent-hash ring with bounded loads.
//!
//! Each member is hashed onto the ring `replication_factor` times. The key
//! space is cut into `partition_count` partitions and each partition is
//! owned by the first member clockwise from the partition's hash whose load
//! is still below `ceil(partition_count / members * load)`. Keys map to
//! partitions by `hash(key) % partition_count`, so adding or removing a
//! member only moves the partitions that member gains or loses.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use twox_hash::XxHash64;

/// Ring shape.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RingConfig {
    pub partition_count: usize,
    pub replication_factor: usize,
    /// Upper bound on a member's share of partitions, relative to the mean.
    pub load: f64,
}

impl Default for RingConfig {
    fn default() -> Self {
        Self {
            partition_count: 1061,
            replication_factor: 5,
            load: 1.1,
        }
    }
}

fn hash(bytes: &[u8]) -> u64 {
    XxHash64::oneshot(0, bytes)
}

#[derive(Debug, Clone, Default)]
pub struct Ring {
    members: Vec<Arc<str>>,
    /// Owner of each partition, indexed by partition id.
    partitions: Vec<Arc<str>>,
}

impl Ring {
    pub fn new<I, S>(members: I, config: RingConfig) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut members: Vec<Arc<str>> = members
            .into_iter()
            .map(|m| Arc::<str>::from(m.as_ref()))
            .collect();
        members.sort();
        members.dedup();

        if members.is_empty() || config.partition_count == 0 {
            return Self {
                members,
                partitions: Vec::new(),
            };
        }

        let replicas = config.replication_factor.max(1);
        let mut points: Vec<(u64, usize)> = Vec::with_capacity(members.len() * replicas);
        for (idx, member) in members.iter().enumerate() {
            for i in 0..replicas {
                points.push((hash(format!("{member}{i}").as_bytes()), idx));
            }
        }
        points.sort_unstable();

        let avg_load = average_load(config, members.len());
        let mut loads = vec![0usize; members.len()];
        let mut partitions = Vec::with_capacity(config.partition_count);

        for part in 0..config.partition_count {
            let key = hash(&(part as u64).to_le_bytes());
            let mut idx = points.partition_point(|(h, _)| *h < key);
            if idx >= points.len() {
                idx = 0;
            }
            let owner = claim(&points, idx, &mut loads, avg_load);
            partitions.push(Arc::clone(&members[owner]));
        }

        Self {
            members,
            partitions,
        }
    }

    /// Member owning `key`, or `None` on an empty ring.
    pub fn locate(&self, key: &[u8]) -> Option<&str> {
        if self.partitions.is_empty() {
            return None;
        }
        let part = hash(key) % self.partitions.len() as u64;
        self.partitions.get(part as usize).map(|m| &**m)
    }

    pub fn members(&self) -> impl Iterator<Item = &str> {
        self.members.iter().map(|m| &**m)
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }
}

fn average_load(config: RingConfig, members: usize) -> usize {
    let per_member = (config.partition_count / members) as f64;
    (per_member * config.load).ceil() as usize
}

/// Walk clockwise from `idx` to the first member with room for one more
/// partition. When every member is full the least loaded one takes it.
fn claim(points: &[(u64, usize)], mut idx: usize, loads: &mut [usize], avg_load: usize) -> usize {
    for _ in 0..points.len() {
        let member = points[idx].1;
        if loads[member] < avg_load {
            loads[member] += 1;
            return member;
        }
        idx = (idx + 1) % points.len();
    }

    let member = (0..loads.len())
        .min_by_key(|m| loads[*m])
        .unwrap_or_default();
    loads[member] += 1;
    member
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn names(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("collector-{i}")).collect()
    }

    fn partition_loads(ring: &Ring) -> HashMap<&str, usize> {
        let mut loads = HashMap::new();
        for owner in &ring.partitions {
            *loads.entry(&**owner).or_default() += 1;
        }
        loads
    }

    #[test]
    fn test_empty_ring_locates_nothing() {
        let ring = Ring::new(Vec::<String>::new(), RingConfig::default());
        assert!(ring.is_empty());
        assert_eq!(ring.locate(b"anything"), None);
    }

    #[test]
    fn test_single_member_owns_everything() {
        let ring = Ring::new(["only"], RingConfig::default());
        assert_eq!(ring.locate(b"a"), Some("only"));
        assert_eq!(partition_loads(&ring)["only"], 1061);
    }

    #[test]
    fn test_partition_loads_are_bounded() {
        let config = RingConfig::default();
        let ring = Ring::new(names(7), config);
        let bound = average_load(config, 7);

        let loads = partition_loads(&ring);
        assert_eq!(loads.values().sum::<usize>(), config.partition_count);
        for (member, load) in loads {
            assert!(load <= bound, "{member} owns {load} partitions, bound {bound}");
        }
    }

    #[test]
    fn test_member_order_does_not_matter() {
        let forward = Ring::new(names(5), RingConfig::default());
        let mut reversed_names = names(5);
        reversed_names.reverse();
        let reversed = Ring::new(reversed_names, RingConfig::default());

        for i in 0..200 {
            let key = format!("10.0.0.{i}:8080");
            assert_eq!(forward.locate(key.as_bytes()), reversed.locate(key.as_bytes()));
        }
    }

    #[test]
    fn test_more_members_than_partitions_still_assigns() {
        let config = RingConfig {
            partition_count: 3,
            ..Default::default()
        };
        let ring = Ring::new(names(10), config);
        assert!(ring.locate(b"k").is_some());
        assert_eq!(ring.partitions.len(), 3);
    }
}
