//! Pre-allocation hooks.
//!
//! A hook sees every reload's targets before the allocator does and may
//! drop some of them. Hooks are selected by name through [`new_filter`].

mod relabel;

use std::collections::HashMap;
use std::sync::Arc;

use ta_relabel::RelabelConfig;
use thiserror::Error;

use crate::target::{ItemHash, TargetItem};

pub use relabel::RelabelConfigTargetFilter;

/// Name of the relabel-rule filter.
pub const RELABEL_CONFIG: &str = "relabel-config";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FilterError {
    #[error("unregistered filter strategy: {0}")]
    Unregistered(String),
}

/// A filter stage between discovery and allocation.
pub trait Hook: Send + Sync {
    fn name(&self) -> &'static str;

    /// Drop the targets this hook rejects.
    fn apply(&self, targets: HashMap<ItemHash, TargetItem>) -> HashMap<ItemHash, TargetItem>;

    /// Replace the per-job rule chains.
    fn set_config(&self, configs: HashMap<String, Vec<RelabelConfig>>);

    fn config(&self) -> Arc<HashMap<String, Vec<RelabelConfig>>>;
}

/// Build the filter registered as `name`. An empty name disables filtering.
pub fn new_filter(name: &str) -> Result<Option<Arc<dyn Hook>>, FilterError> {
    match name {
        "" => Ok(None),
        RELABEL_CONFIG => Ok(Some(Arc::new(RelabelConfigTargetFilter::new()))),
        other => Err(FilterError::Unregistered(other.to_string())),
    }
}
