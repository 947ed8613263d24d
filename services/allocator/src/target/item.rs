//! Canonical target records.

use std::fmt;
use std::hash::Hasher;
use std::sync::Arc;

use ta_labels::{names, Labels};
use twox_hash::XxHash64;

/// Stable identity of a target: same job and same labels, same hash.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ItemHash(u64);

impl ItemHash {
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl From<u64> for ItemHash {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

impl fmt::Display for ItemHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A discovered scrape target.
///
/// Only the assigned collector changes after creation; everything that
/// feeds the hash is fixed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetItem {
    job_name: String,
    target_url: String,
    labels: Arc<Labels>,
    collector_name: Option<String>,
    hash: ItemHash,
}

impl TargetItem {
    pub fn new(
        job_name: impl Into<String>,
        target_url: impl Into<String>,
        labels: impl Into<Arc<Labels>>,
    ) -> Self {
        let job_name = job_name.into();
        let labels = labels.into();
        let hash = labels_hash_with_job_name(&labels, &job_name);
        Self {
            job_name,
            target_url: target_url.into(),
            labels,
            collector_name: None,
            hash,
        }
    }

    pub fn job_name(&self) -> &str {
        &self.job_name
    }

    pub fn target_url(&self) -> &str {
        &self.target_url
    }

    pub fn labels(&self) -> &Labels {
        &self.labels
    }

    /// Collector this target is assigned to, if any.
    pub fn collector_name(&self) -> Option<&str> {
        self.collector_name.as_deref()
    }

    pub fn hash(&self) -> ItemHash {
        self.hash
    }

    pub(crate) fn set_collector(&mut self, collector: Option<String>) {
        self.collector_name = collector;
    }

    /// Node the target runs on, read from discovery labels.
    ///
    /// The pod, node and endpoint node labels are consulted in that order.
    /// Endpoint-slice addresses backed directly by a node fall back to the
    /// slice's target name.
    pub fn node_name(&self) -> Option<&str> {
        for label in names::NODE_LABELS {
            if let Some(node) = self.labels.get(label).filter(|v| !v.is_empty()) {
                return Some(node);
            }
        }

        if self.labels.get(names::ENDPOINTSLICE_ADDRESS_TARGET_KIND) != Some("Node") {
            return None;
        }
        self.labels
            .get(names::ENDPOINTSLICE_ADDRESS_TARGET_NAME)
            .filter(|v| !v.is_empty())
    }

    /// Endpoint slice the target was discovered through, if any.
    pub fn endpoint_slice_name(&self) -> Option<&str> {
        self.labels
            .get(names::ENDPOINTSLICE_NAME)
            .filter(|v| !v.is_empty())
    }
}

/// xxHash64 of the little-endian label fingerprint followed by the job name.
///
/// The address is already part of the labels, so the URL adds nothing.
fn labels_hash_with_job_name(labels: &Labels, job_name: &str) -> ItemHash {
    let mut hasher = XxHash64::with_seed(0);
    hasher.write(&labels.fingerprint().to_le_bytes());
    hasher.write(job_name.as_bytes());
    ItemHash(hasher.finish())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use ta_labels::labels;

    #[test]
    fn test_hash_depends_on_job_and_labels() {
        let lbls = labels! { "__address__" => "10.0.0.1:8080" };

        let a = TargetItem::new("job-a", "10.0.0.1:8080", lbls.clone());
        let b = TargetItem::new("job-b", "10.0.0.1:8080", lbls.clone());
        let again = TargetItem::new("job-a", "10.0.0.1:8080", lbls);

        assert_ne!(a.hash(), b.hash());
        assert_eq!(a.hash(), again.hash());
    }

    #[test]
    fn test_collector_does_not_affect_hash() {
        let mut item = TargetItem::new("job", "h:1", labels! { "__address__" => "h:1" });
        let before = item.hash();
        item.set_collector(Some("collector-0".into()));
        assert_eq!(item.hash(), before);
        assert_eq!(item.collector_name(), Some("collector-0"));
    }

    #[rstest]
    #[case::pod(names::POD_NODE_NAME, "node-a")]
    #[case::node(names::NODE_NAME, "node-b")]
    #[case::endpoint(names::ENDPOINT_NODE_NAME, "node-c")]
    fn test_node_name_from_label(#[case] label: &str, #[case] node: &str) {
        let item = TargetItem::new("job", "h:1", labels! { label => node });
        assert_eq!(item.node_name(), Some(node));
    }

    #[test]
    fn test_node_name_prefers_pod_label() {
        let item = TargetItem::new(
            "job",
            "h:1",
            labels! {
                names::ENDPOINT_NODE_NAME => "endpoint-node",
                names::POD_NODE_NAME => "pod-node",
            },
        );
        assert_eq!(item.node_name(), Some("pod-node"));
    }

    #[rstest]
    #[case::node_backed("Node", Some("node-x"))]
    #[case::pod_backed("Pod", None)]
    fn test_node_name_from_endpoint_slice(#[case] kind: &str, #[case] expected: Option<&str>) {
        let item = TargetItem::new(
            "job",
            "h:1",
            labels! {
                names::ENDPOINTSLICE_ADDRESS_TARGET_KIND => kind,
                names::ENDPOINTSLICE_ADDRESS_TARGET_NAME => "node-x",
                names::ENDPOINTSLICE_NAME => "slice-1",
            },
        );
        assert_eq!(item.node_name(), expected);
        assert_eq!(item.endpoint_slice_name(), Some("slice-1"));
    }

    #[test]
    fn test_no_node_labels() {
        let item = TargetItem::new("job", "h:1", labels! { "__address__" => "h:1" });
        assert_eq!(item.node_name(), None);
        assert_eq!(item.endpoint_slice_name(), None);
    }
}
