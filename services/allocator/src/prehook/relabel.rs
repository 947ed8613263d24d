//! Drops targets rejected by their job's relabel rules.

use std::collections::HashMap;
use std::sync::Arc;

use arc_swap::ArcSwap;
use ta_relabel::{process, RelabelConfig, Regexp, SHARD_PLACEHOLDER};
use tracing::{debug, warn};

use super::{Hook, RELABEL_CONFIG};
use crate::target::{ItemHash, TargetItem};

/// Shard index substituted for the sharding placeholder. Deployments are
/// never sharded, so it is always zero.
const SHARD: &str = "0";

/// Relabel-rule filter.
///
/// Rules live behind an [`ArcSwap`]: a reload in progress keeps the chain
/// it started with while a new configuration is installed.
pub struct RelabelConfigTargetFilter {
    configs: ArcSwap<HashMap<String, Vec<RelabelConfig>>>,
}

impl RelabelConfigTargetFilter {
    pub fn new() -> Self {
        Self {
            configs: ArcSwap::from_pointee(HashMap::new()),
        }
    }
}

impl Default for RelabelConfigTargetFilter {
    fn default() -> Self {
        Self::new()
    }
}

impl Hook for RelabelConfigTargetFilter {
    fn name(&self) -> &'static str {
        RELABEL_CONFIG
    }

    fn apply(&self, mut targets: HashMap<ItemHash, TargetItem>) -> HashMap<ItemHash, TargetItem> {
        let configs = self.configs.load();
        if configs.is_empty() {
            return targets;
        }

        let before = targets.len();
        targets.retain(|_, item| match configs.get(item.job_name()) {
            Some(chain) if !chain.is_empty() => process(item.labels(), chain).is_some(),
            _ => true,
        });

        debug!(
            kept = targets.len(),
            dropped = before - targets.len(),
            "Relabel filter applied"
        );
        targets
    }

    fn set_config(&self, configs: HashMap<String, Vec<RelabelConfig>>) {
        let configs: HashMap<String, Vec<RelabelConfig>> = configs
            .into_iter()
            .map(|(job, chain)| {
                let chain = chain.into_iter().map(|cfg| substitute_shard(&job, cfg)).collect();
                (job, chain)
            })
            .collect();
        self.configs.store(Arc::new(configs));
    }

    fn config(&self) -> Arc<HashMap<String, Vec<RelabelConfig>>> {
        self.configs.load_full()
    }
}

/// Rewrite the sharding placeholder in a rule's regex to the shard index;
/// left in place it would never match and would drop every target.
fn substitute_shard(job: &str, mut cfg: RelabelConfig) -> RelabelConfig {
    let pattern = cfg.regex.as_str();
    if !pattern.contains(SHARD_PLACEHOLDER) {
        return cfg;
    }
    match Regexp::new(&pattern.replace(SHARD_PLACEHOLDER, SHARD)) {
        Ok(regex) => cfg.regex = regex,
        Err(e) => warn!(job = %job, error = %e, "Could not substitute shard in relabel regex"),
    }
    cfg
}
