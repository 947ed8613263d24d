//! Target allocator.
//!
//! Distributes discovered scrape targets across a fleet of collectors.
//! Discovery output flows through the [`target::Discoverer`] and an
//! optional filter [`prehook`] into the [`allocation::Allocator`]; fleet
//! changes arrive through the [`collector::CollectorWatcher`].

pub mod allocation;
pub mod collector;
pub mod config;
pub mod metrics;
pub mod prehook;
pub mod target;
