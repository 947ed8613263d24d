//! Relabel chains as they appear in scrape configurations.

use ta_labels::labels;
use ta_relabel::{process, validate_all, Action, RelabelConfig, RelabelError};

fn parse(json: &str) -> Vec<RelabelConfig> {
    serde_json::from_str(json).expect("relabel chain parses")
}

#[test]
fn test_pod_annotation_chain() {
    let chain = parse(
        r#"[
            {"source_labels": ["__meta_kubernetes_pod_annotation_prometheus_io_scrape"],
             "action": "keep", "regex": "true"},
            {"source_labels": ["__address__", "__meta_kubernetes_pod_annotation_prometheus_io_port"],
             "action": "replace", "regex": "([^:]+)(?::\\d+)?;(\\d+)",
             "replacement": "$1:$2", "target_label": "__address__"},
            {"action": "labelmap", "regex": "__meta_kubernetes_pod_label_(.+)"}
        ]"#,
    );
    assert!(validate_all(&chain).is_ok());

    let scraped = labels! {
        "__address__" => "10.1.2.3:8080",
        "__meta_kubernetes_pod_annotation_prometheus_io_scrape" => "true",
        "__meta_kubernetes_pod_annotation_prometheus_io_port" => "9090",
        "__meta_kubernetes_pod_label_app" => "checkout",
    };
    let out = process(&scraped, &chain).expect("annotated pod is kept");
    assert_eq!(out.get("__address__"), Some("10.1.2.3:9090"));
    assert_eq!(out.get("app"), Some("checkout"));

    let ignored = labels! {
        "__address__" => "10.1.2.4:8080",
        "__meta_kubernetes_pod_annotation_prometheus_io_scrape" => "false",
    };
    assert!(process(&ignored, &chain).is_none());
}

#[test]
fn test_hashmod_sharding_chain() {
    let chain = parse(
        r#"[
            {"source_labels": ["__address__"], "action": "hashmod",
             "modulus": 2, "target_label": "__tmp_hash"},
            {"source_labels": ["__tmp_hash"], "action": "keep", "regex": "0"}
        ]"#,
    );

    let kept = (0..20)
        .map(|i| labels! { "__address__" => format!("10.0.0.{i}:9100") })
        .filter(|lbls| process(lbls, &chain).is_some())
        .count();

    // Roughly half the targets hash into shard 0.
    assert!(kept > 0 && kept < 20, "kept {kept} of 20");
}

#[test]
fn test_validation_reports_offending_rule() {
    let chain = vec![
        RelabelConfig {
            target_label: "ok".into(),
            ..Default::default()
        },
        RelabelConfig {
            action: Action::HashMod,
            target_label: "shard".into(),
            ..Default::default()
        },
    ];

    assert_eq!(validate_all(&chain), Err((1, RelabelError::ZeroModulus)));
}

#[test]
fn test_labeldrop_rejects_target_label() {
    let cfg = RelabelConfig {
        action: Action::LabelDrop,
        target_label: "x".into(),
        ..Default::default()
    };
    assert!(matches!(
        cfg.validate(),
        Err(RelabelError::UnexpectedField { field: "target_label", .. })
    ));
}

#[test]
fn test_uppercase_requires_valid_target() {
    let cfg = RelabelConfig {
        action: Action::Uppercase,
        target_label: "not-valid".into(),
        ..Default::default()
    };
    assert!(matches!(
        cfg.validate(),
        Err(RelabelError::InvalidTargetLabel { .. })
    ));
}
