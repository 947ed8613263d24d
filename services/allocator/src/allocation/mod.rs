//! Target allocation.
//!
//! An [`Allocator`] keeps the current collectors and targets and decides,
//! through a pluggable [`Strategy`], which collector scrapes which target.
//!
//! Strategies fall into two families with different stability contracts:
//!
//! - **Pure-function** (`consistent-hashing`, `per-node`, `per-zone`): the
//!   answer depends only on the current topology and the target, so the
//!   allocator re-evaluates every target after a change and relies on the
//!   algorithm to keep churn low.
//! - **Incremental** (`least-weighted`, `job-average`): assignments are
//!   running state. Only new targets and targets orphaned by a departed
//!   collector are placed. `job-average` rebalances fully when the fleet
//!   changes shape.

mod allocator;
mod collector;
mod consistent_hashing;
mod error;
mod job_average;
mod least_weighted;
mod per_node;
mod per_zone;
mod ring;
mod state;
mod strategy;
pub mod topology;

pub use allocator::{Allocator, ReconcileStats};
pub use collector::Collector;
pub use consistent_hashing::ConsistentHashingStrategy;
pub use error::AllocationError;
pub use job_average::JobAverageStrategy;
pub use least_weighted::LeastWeightedStrategy;
pub use per_node::PerNodeStrategy;
pub use per_zone::PerZoneStrategy;
pub use ring::{Ring, RingConfig};
pub use state::JobIndex;
pub use strategy::{
    is_registered, new_strategy, registered_strategies, FleetView, Reallocation, Strategy,
    StrategyOptions, CONSISTENT_HASHING, JOB_AVERAGE, LEAST_WEIGHTED, PER_NODE, PER_ZONE,
};
