//! Error types for target allocation.

use thiserror::Error;

use super::topology::TopologyError;

/// Errors raised while building a strategy or placing a target.
///
/// Placement errors concern a single target or collector; the allocator
/// logs them and carries on with the rest of the batch.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AllocationError {
    /// The strategy had no collector to offer for this target.
    #[error("no collector available for target {target:?} in job {job:?}")]
    NoCollectorForTarget { job: String, target: String },

    /// The target's zone has no collectors.
    #[error("unknown zone {0:?}")]
    UnknownZone(String),

    /// The topology source does not know the node.
    #[error("could not find the node {0:?} in the cluster")]
    NodeNotFound(String),

    /// The node exists but carries no zone information.
    #[error("node {0:?} was found but it doesn't support zone awareness")]
    ZoneUnsupported(String),

    /// The topology source could not answer in time.
    #[error("topology lookup failed: {0}")]
    TopologyUnavailable(String),

    /// A collector has no node identity, so it cannot be placed in a zone.
    #[error("collector {0:?} is not scheduled on a node")]
    CollectorWithoutNode(String),

    /// The strategy picked a collector that is not part of the fleet.
    #[error("unknown collector {0:?}")]
    UnknownCollector(String),

    /// No strategy is registered under this name.
    #[error("unregistered strategy: {0}")]
    UnregisteredStrategy(String),

    /// The strategy needs a topology source and none was configured.
    #[error("strategy {0} requires a node topology source")]
    MissingTopology(&'static str),
}

impl From<TopologyError> for AllocationError {
    fn from(err: TopologyError) -> Self {
        match err {
            TopologyError::NodeNotFound(node) => AllocationError::NodeNotFound(node),
            TopologyError::ZoneUnsupported(node) => AllocationError::ZoneUnsupported(node),
            TopologyError::Unavailable(reason) => AllocationError::TopologyUnavailable(reason),
        }
    }
}
