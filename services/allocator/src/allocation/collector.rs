//! Fleet members.

/// A collector instance targets are assigned to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Collector {
    pub name: String,
    /// Node the collector runs on, used by the affinity strategies.
    pub node_name: Option<String>,
    /// Targets currently assigned. Maintained by the allocator.
    pub num_targets: usize,
}

impl Collector {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            node_name: None,
            num_targets: 0,
        }
    }

    pub fn on_node(mut self, node: impl Into<String>) -> Self {
        self.node_name = Some(node.into());
        self
    }
}

impl std::fmt::Display for Collector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.name)
    }
}
