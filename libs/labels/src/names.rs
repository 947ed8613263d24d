//! Well-known label names.

/// The host:port a target is scraped on.
pub const ADDRESS: &str = "__address__";

/// Prefix of labels attached by service discovery.
pub const META_PREFIX: &str = "__meta_";

/// Node a discovered pod is scheduled on.
pub const POD_NODE_NAME: &str = "__meta_kubernetes_pod_node_name";

/// Node a discovered node target refers to.
pub const NODE_NAME: &str = "__meta_kubernetes_node_name";

/// Node hosting an endpoint address.
pub const ENDPOINT_NODE_NAME: &str = "__meta_kubernetes_endpoint_node_name";

/// Kind of object backing an endpoint-slice address.
pub const ENDPOINTSLICE_ADDRESS_TARGET_KIND: &str =
    "__meta_kubernetes_endpointslice_address_target_kind";

/// Name of the object backing an endpoint-slice address.
pub const ENDPOINTSLICE_ADDRESS_TARGET_NAME: &str =
    "__meta_kubernetes_endpointslice_address_target_name";

/// Name of the endpoint slice a target was discovered through.
pub const ENDPOINTSLICE_NAME: &str = "__meta_kubernetes_endpointslice_name";

/// Node-name labels, in lookup order.
pub const NODE_LABELS: [&str; 3] = [POD_NODE_NAME, NODE_NAME, ENDPOINT_NODE_NAME];

/// Returns true if `name` is a legal label name (`[a-zA-Z_][a-zA-Z0-9_]*`).
pub fn is_valid_label_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_label_name_validation() {
        assert!(is_valid_label_name("job"));
        assert!(is_valid_label_name("__address__"));
        assert!(is_valid_label_name("_x9"));
        assert!(!is_valid_label_name(""));
        assert!(!is_valid_label_name("9lives"));
        assert!(!is_valid_label_name("a-b"));
        assert!(!is_valid_label_name("${1}"));
    }
}
