//! Rule evaluation.

use md5::{Digest, Md5};
use ta_labels::{is_valid_label_name, Labels};

use crate::{Action, RelabelConfig};

/// Run `configs` over `labels` in order.
///
/// Returns `None` as soon as a rule drops the target, otherwise the
/// rewritten label set.
pub fn process(labels: &Labels, configs: &[RelabelConfig]) -> Option<Labels> {
    let mut lb = labels.clone();
    for cfg in configs {
        if !relabel(&mut lb, cfg) {
            return None;
        }
    }
    Some(lb)
}

/// Apply one rule in place. Returns false if the target is dropped.
fn relabel(lb: &mut Labels, cfg: &RelabelConfig) -> bool {
    let val = cfg
        .source_labels
        .iter()
        .map(|name| lb.get(name).unwrap_or_default())
        .collect::<Vec<_>>()
        .join(&cfg.separator);
    let regex = cfg.regex.regex();

    match cfg.action {
        Action::Drop => {
            if regex.is_match(&val) {
                return false;
            }
        }
        Action::Keep => {
            if !regex.is_match(&val) {
                return false;
            }
        }
        Action::DropEqual => {
            if lb.get(&cfg.target_label).unwrap_or_default() == val {
                return false;
            }
        }
        Action::KeepEqual => {
            if lb.get(&cfg.target_label).unwrap_or_default() != val {
                return false;
            }
        }
        Action::Replace => {
            let Some(caps) = regex.captures(&val) else {
                return true;
            };
            let mut target = String::new();
            caps.expand(&cfg.target_label, &mut target);
            if !is_valid_label_name(&target) {
                return true;
            }
            let mut res = String::new();
            caps.expand(&cfg.replacement, &mut res);
            if res.is_empty() {
                lb.remove(&target);
            } else {
                lb.insert(target, res);
            }
        }
        Action::Lowercase => {
            lb.insert(cfg.target_label.as_str(), val.to_lowercase());
        }
        Action::Uppercase => {
            lb.insert(cfg.target_label.as_str(), val.to_uppercase());
        }
        Action::HashMod => {
            let digest = Md5::digest(val.as_bytes());
            let mut tail = [0u8; 8];
            tail.copy_from_slice(&digest[8..]);
            let m = u64::from_be_bytes(tail) % cfg.modulus.max(1);
            lb.insert(cfg.target_label.as_str(), m.to_string());
        }
        Action::LabelMap => {
            let mapped: Vec<(String, String)> = lb
                .iter()
                .filter(|(name, _)| regex.is_match(name))
                .map(|(name, value)| {
                    let renamed = regex.replace_all(name, cfg.replacement.as_str());
                    (renamed.into_owned(), value.to_string())
                })
                .collect();
            for (name, value) in mapped {
                lb.insert(name, value);
            }
        }
        Action::LabelDrop => lb.retain(|name, _| !regex.is_match(name)),
        Action::LabelKeep => lb.retain(|name, _| regex.is_match(name)),
    }

    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Regexp;
    use rstest::rstest;
    use ta_labels::labels;

    fn rule(action: Action) -> RelabelConfig {
        RelabelConfig {
            action,
            ..Default::default()
        }
    }

    fn sample() -> Labels {
        labels! { "a" => "foo", "b" => "bar", "c" => "baz" }
    }

    #[test]
    fn test_no_rules_is_identity() {
        assert_eq!(process(&sample(), &[]), Some(sample()));
    }

    #[test]
    fn test_replace_with_capture_groups() {
        let cfg = RelabelConfig {
            source_labels: vec!["a".into(), "b".into()],
            regex: Regexp::new("f(.*);(.*)r").unwrap(),
            target_label: "d".into(),
            replacement: "ch${1}-ch${2}".into(),
            ..Default::default()
        };

        let out = process(&sample(), &[cfg]).unwrap();
        assert_eq!(out.get("d"), Some("choo-chba"));
    }

    #[test]
    fn test_replace_without_match_is_noop() {
        let cfg = RelabelConfig {
            source_labels: vec!["a".into()],
            regex: Regexp::new("nomatch").unwrap(),
            target_label: "d".into(),
            ..Default::default()
        };
        assert_eq!(process(&sample(), &[cfg]), Some(sample()));
    }

    #[test]
    fn test_replace_with_empty_result_deletes_target() {
        let cfg = RelabelConfig {
            source_labels: vec!["missing".into()],
            target_label: "a".into(),
            ..Default::default()
        };
        let out = process(&sample(), &[cfg]).unwrap();
        assert!(!out.contains("a"));
    }

    #[test]
    fn test_replace_into_invalid_label_name_is_skipped() {
        let cfg = RelabelConfig {
            source_labels: vec!["a".into()],
            target_label: "${1}-x".into(),
            ..Default::default()
        };
        assert_eq!(process(&sample(), &[cfg]), Some(sample()));
    }

    #[rstest]
    #[case::keep_match(Action::Keep, "f.*", true)]
    #[case::keep_miss(Action::Keep, "x.*", false)]
    #[case::drop_match(Action::Drop, "f.*", false)]
    #[case::drop_miss(Action::Drop, "x.*", true)]
    fn test_keep_and_drop(#[case] action: Action, #[case] pattern: &str, #[case] survives: bool) {
        let cfg = RelabelConfig {
            source_labels: vec!["a".into()],
            regex: Regexp::new(pattern).unwrap(),
            ..rule(action)
        };
        assert_eq!(process(&sample(), &[cfg]).is_some(), survives);
    }

    #[rstest]
    #[case::keepequal_same(Action::KeepEqual, "foo", true)]
    #[case::keepequal_diff(Action::KeepEqual, "bar", false)]
    #[case::dropequal_same(Action::DropEqual, "foo", false)]
    #[case::dropequal_diff(Action::DropEqual, "bar", true)]
    fn test_equality_filters(#[case] action: Action, #[case] other: &str, #[case] survives: bool) {
        let input = labels! { "a" => "foo", "other" => other };
        let cfg = RelabelConfig {
            source_labels: vec!["a".into()],
            target_label: "other".into(),
            ..rule(action)
        };
        assert_eq!(process(&input, &[cfg]).is_some(), survives);
    }

    #[test]
    fn test_hashmod() {
        let cfg = RelabelConfig {
            source_labels: vec!["c".into()],
            target_label: "d".into(),
            modulus: 1000,
            ..rule(Action::HashMod)
        };
        let out = process(&sample(), &[cfg]).unwrap();
        assert_eq!(out.get("d"), Some("976"));
    }

    #[rstest]
    #[case(Action::Lowercase, "FooBar", "foobar")]
    #[case(Action::Uppercase, "FooBar", "FOOBAR")]
    fn test_case_folding(#[case] action: Action, #[case] input: &str, #[case] expected: &str) {
        let cfg = RelabelConfig {
            source_labels: vec!["v".into()],
            target_label: "folded".into(),
            ..rule(action)
        };
        let out = process(&labels! { "v" => input }, &[cfg]).unwrap();
        assert_eq!(out.get("folded"), Some(expected));
        assert_eq!(out.get("v"), Some(input));
    }

    #[test]
    fn test_labelmap() {
        let input = labels! {
            "__meta_kubernetes_pod_label_app" => "api",
            "__meta_kubernetes_pod_label_tier" => "web",
            "job" => "pods",
        };
        let cfg = RelabelConfig {
            regex: Regexp::new("__meta_kubernetes_pod_label_(.+)").unwrap(),
            replacement: "$1".into(),
            ..rule(Action::LabelMap)
        };

        let out = process(&input, &[cfg]).unwrap();
        assert_eq!(out.get("app"), Some("api"));
        assert_eq!(out.get("tier"), Some("web"));
        assert_eq!(out.len(), 5);
    }

    #[rstest]
    #[case::labeldrop(Action::LabelDrop, &["a"])]
    #[case::labelkeep(Action::LabelKeep, &["b", "c"])]
    fn test_label_filters(#[case] action: Action, #[case] remaining: &[&str]) {
        let cfg = RelabelConfig {
            regex: Regexp::new("b|c").unwrap(),
            ..rule(action)
        };
        let out = process(&sample(), &[cfg]).unwrap();
        let names: Vec<&str> = out.iter().map(|(name, _)| name).collect();
        assert_eq!(names, remaining);
    }

    #[test]
    fn test_chain_stops_at_first_drop() {
        let drop_all = RelabelConfig {
            source_labels: vec!["a".into()],
            ..rule(Action::Drop)
        };
        let add = RelabelConfig {
            target_label: "never".into(),
            replacement: "set".into(),
            ..Default::default()
        };
        assert_eq!(process(&sample(), &[drop_all, add]), None);
    }
}
