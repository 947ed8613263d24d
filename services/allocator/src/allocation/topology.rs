//! Node-to-zone topology for zone-aware allocation.
//!
//! Zones are not part of the discovery labels, so the per-zone strategy asks
//! a [`NodeTopology`] for them and keeps the answers in a [`TtlCache`].

use std::collections::HashMap;
use std::hash::Hash;
use std::time::{Duration, Instant};

use thiserror::Error;

/// How long node/zone answers stay cached.
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(120 * 60);

/// Errors from a topology source.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TopologyError {
    #[error("could not find the node {0:?} in the cluster")]
    NodeNotFound(String),

    #[error("node {0:?} carries no zone information")]
    ZoneUnsupported(String),

    #[error("topology source unavailable: {0}")]
    Unavailable(String),
}

/// Resolves the zone a node belongs to.
///
/// Called with the allocator's write lock held, so implementations backed
/// by a remote source must fail fast with [`TopologyError::Unavailable`].
pub trait NodeTopology: Send + Sync {
    fn zone_for_node(&self, node: &str) -> Result<String, TopologyError>;
}

/// A fixed node-to-zone map.
#[derive(Debug, Clone, Default)]
pub struct StaticTopology {
    zones: HashMap<String, String>,
}

impl StaticTopology {
    pub fn new(zones: HashMap<String, String>) -> Self {
        Self { zones }
    }
}

impl FromIterator<(String, String)> for StaticTopology {
    fn from_iter<I: IntoIterator<Item = (String, String)>>(iter: I) -> Self {
        Self::new(iter.into_iter().collect())
    }
}

impl NodeTopology for StaticTopology {
    fn zone_for_node(&self, node: &str) -> Result<String, TopologyError> {
        match self.zones.get(node) {
            None => Err(TopologyError::NodeNotFound(node.to_string())),
            Some(zone) if zone.is_empty() => Err(TopologyError::ZoneUnsupported(node.to_string())),
            Some(zone) => Ok(zone.clone()),
        }
    }
}

/// A map whose entries expire `ttl` after insertion.
#[derive(Debug)]
pub struct TtlCache<K, V> {
    ttl: Duration,
    entries: HashMap<K, (V, Instant)>,
}

impl<K: Eq + Hash, V> TtlCache<K, V> {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: HashMap::new(),
        }
    }

    pub fn get(&self, key: &K) -> Option<&V> {
        self.get_at(key, Instant::now())
    }

    pub fn get_at(&self, key: &K, now: Instant) -> Option<&V> {
        self.entries
            .get(key)
            .filter(|(_, inserted)| now.saturating_duration_since(*inserted) < self.ttl)
            .map(|(value, _)| value)
    }

    pub fn insert(&mut self, key: K, value: V) {
        self.insert_at(key, value, Instant::now());
    }

    pub fn insert_at(&mut self, key: K, value: V, now: Instant) {
        self.entries.insert(key, (value, now));
    }

    /// Drop expired entries.
    pub fn prune(&mut self) {
        self.prune_at(Instant::now());
    }

    pub fn prune_at(&mut self, now: Instant) {
        let ttl = self.ttl;
        self.entries
            .retain(|_, (_, inserted)| now.saturating_duration_since(*inserted) < ttl);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_static_topology() {
        let topology: StaticTopology = [
            ("node-0".to_string(), "zone-a".to_string()),
            ("node-1".to_string(), String::new()),
        ]
        .into_iter()
        .collect();

        assert_eq!(topology.zone_for_node("node-0"), Ok("zone-a".to_string()));
        assert_eq!(
            topology.zone_for_node("node-1"),
            Err(TopologyError::ZoneUnsupported("node-1".into()))
        );
        assert_eq!(
            topology.zone_for_node("node-9"),
            Err(TopologyError::NodeNotFound("node-9".into()))
        );
    }

    #[test]
    fn test_ttl_cache_expiry() {
        let start = Instant::now();
        let mut cache = TtlCache::new(Duration::from_secs(60));
        cache.insert_at("a", 1, start);
        cache.insert_at("b", 2, start + Duration::from_secs(30));

        assert_eq!(cache.get_at(&"a", start + Duration::from_secs(59)), Some(&1));
        assert_eq!(cache.get_at(&"a", start + Duration::from_secs(60)), None);

        cache.prune_at(start + Duration::from_secs(61));
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get_at(&"b", start + Duration::from_secs(61)), Some(&2));
    }
}
