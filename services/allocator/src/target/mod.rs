//! Scrape targets: configuration, discovery output and the canonical
//! [`TargetItem`] the allocator works on.

mod discovery;
mod group;
mod item;

pub use discovery::{
    process_target_groups, Discoverer, DiscovererConfig, DiscoveryError, EventSource,
    ScrapeConfigsUpdater, TargetSets,
};
pub use group::{ScrapeConfig, StaticConfig, TargetGroup};
pub use item::{ItemHash, TargetItem};
