//! Allocator configuration.
//!
//! Loaded from an optional YAML file with `TA__*` environment overrides on
//! top, e.g. `TA__ALLOCATION_STRATEGY=per-node` or `TA__RING__LOAD=1.25`.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, ensure, Context, Result};
use serde::{Deserialize, Serialize};

use crate::allocation::{
    is_registered, topology::NodeTopology, Collector, RingConfig, StrategyOptions,
    CONSISTENT_HASHING,
};
use crate::collector::WatcherConfig;
use crate::prehook::RELABEL_CONFIG;
use crate::target::{DiscovererConfig, ScrapeConfig};

pub const DEFAULT_CONFIG_FILE_PATH: &str = "/conf/targetallocator.yaml";

/// A statically configured collector.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StaticCollector {
    pub name: String,
    #[serde(default)]
    pub node: Option<String>,
}

impl From<&StaticCollector> for Collector {
    fn from(value: &StaticCollector) -> Self {
        let mut collector = Collector::new(value.name.clone());
        collector.node_name = value.node.clone();
        collector
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub allocation_strategy: String,
    /// Used by `per-node` for targets without a colocated collector.
    pub allocation_fallback_strategy: Option<String>,
    /// Empty disables filtering.
    pub filter_strategy: String,
    pub reload_interval_secs: u64,
    pub collector_min_update_interval_secs: u64,
    /// Zero disables the readiness check.
    pub collector_not_ready_grace_period_secs: u64,
    pub max_concurrent_jobs: usize,
    pub zone_cache_ttl_secs: u64,
    pub ring: RingConfig,
    pub log_level: String,
    pub scrape_configs: Vec<ScrapeConfig>,
    pub collectors: Vec<StaticCollector>,
    /// Node to zone, backing the per-zone strategy.
    pub node_zones: HashMap<String, String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            allocation_strategy: CONSISTENT_HASHING.to_string(),
            allocation_fallback_strategy: None,
            filter_strategy: RELABEL_CONFIG.to_string(),
            reload_interval_secs: 5,
            collector_min_update_interval_secs: 5,
            collector_not_ready_grace_period_secs: 0,
            max_concurrent_jobs: 16,
            zone_cache_ttl_secs: 7200,
            ring: RingConfig::default(),
            log_level: "info".to_string(),
            scrape_configs: Vec::new(),
            collectors: Vec::new(),
            node_zones: HashMap::new(),
        }
    }
}

impl Config {
    /// Load `path` (if it exists) and the environment, then validate.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let config: Config = config::Config::builder()
            .add_source(config::File::from(path).required(false))
            .add_source(
                config::Environment::with_prefix("TA")
                    .prefix_separator("__")
                    .separator("__"),
            )
            .build()
            .with_context(|| format!("failed to read configuration from {}", path.display()))?
            .try_deserialize()
            .context("invalid configuration")?;

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        ensure!(
            is_registered(&self.allocation_strategy),
            "unregistered allocation strategy: {}",
            self.allocation_strategy
        );
        if let Some(fallback) = self.fallback_strategy() {
            ensure!(
                is_registered(fallback),
                "unregistered fallback strategy: {fallback}"
            );
        }
        ensure!(self.ring.partition_count > 0, "ring.partition_count must be positive");
        ensure!(self.ring.replication_factor > 0, "ring.replication_factor must be positive");
        ensure!(self.ring.load > 1.0, "ring.load must be greater than 1.0");
        ensure!(self.max_concurrent_jobs > 0, "max_concurrent_jobs must be positive");

        for scrape in &self.scrape_configs {
            ensure!(!scrape.job_name.is_empty(), "scrape config without job_name");
            if let Err((index, e)) = ta_relabel::validate_all(&scrape.relabel_configs) {
                bail!("job {}: relabel_configs[{index}]: {e}", scrape.job_name);
            }
        }
        Ok(())
    }

    fn fallback_strategy(&self) -> Option<&str> {
        self.allocation_fallback_strategy
            .as_deref()
            .filter(|name| !name.is_empty())
    }

    pub fn strategy_options(&self, topology: Option<Arc<dyn NodeTopology>>) -> StrategyOptions {
        StrategyOptions {
            ring: self.ring,
            fallback_strategy: self.fallback_strategy().map(str::to_string),
            topology,
            zone_cache_ttl: Duration::from_secs(self.zone_cache_ttl_secs),
        }
    }

    pub fn discoverer_config(&self) -> DiscovererConfig {
        DiscovererConfig {
            reload_interval: Duration::from_secs(self.reload_interval_secs),
            max_concurrent_jobs: self.max_concurrent_jobs,
        }
    }

    pub fn watcher_config(&self) -> WatcherConfig {
        WatcherConfig {
            min_update_interval: Duration::from_secs(self.collector_min_update_interval_secs),
            not_ready_grace_period: Duration::from_secs(self.collector_not_ready_grace_period_secs),
        }
    }
}
