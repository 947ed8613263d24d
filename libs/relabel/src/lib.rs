//! Prometheus-compatible relabeling.
//!
//! A relabel rule ([`RelabelConfig`]) reads a set of source labels, joins
//! their values with a separator and then acts on the joined string: it can
//! rewrite or add labels, filter labels by name, or drop the whole target.
//! [`process`] runs an ordered chain of rules and yields either the
//! rewritten label set or `None` when the target was dropped.

mod config;
mod error;
mod process;

pub use config::{
    Action, RelabelConfig, Regexp, DEFAULT_REGEX, DEFAULT_REPLACEMENT, DEFAULT_SEPARATOR,
};
pub use error::RelabelError;
pub use process::process;

/// Placeholder that sharded deployments substitute in relabel rules.
pub const SHARD_PLACEHOLDER: &str = "$(SHARD)";

/// Validate every rule in a chain, returning the first error with its index.
pub fn validate_all(configs: &[RelabelConfig]) -> Result<(), (usize, RelabelError)> {
    configs
        .iter()
        .enumerate()
        .try_for_each(|(i, cfg)| cfg.validate().map_err(|e| (i, e)))
}
