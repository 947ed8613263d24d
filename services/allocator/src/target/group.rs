//! Scrape configuration and discovery output.

use serde::{Deserialize, Serialize};
use ta_labels::{names, Labels};
use ta_relabel::RelabelConfig;

/// One scrape job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScrapeConfig {
    pub job_name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scrape_interval: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metrics_path: Option<String>,

    /// Rules applied to discovered targets before allocation.
    #[serde(default)]
    pub relabel_configs: Vec<RelabelConfig>,

    /// Fixed target lists; the only discovery mechanism built in.
    #[serde(default)]
    pub static_configs: Vec<StaticConfig>,
}

impl ScrapeConfig {
    pub fn new(job_name: impl Into<String>) -> Self {
        Self {
            job_name: job_name.into(),
            scrape_interval: None,
            metrics_path: None,
            relabel_configs: Vec::new(),
            static_configs: Vec::new(),
        }
    }

    /// Target groups produced by this job's static configs.
    pub fn static_target_groups(&self) -> Vec<TargetGroup> {
        self.static_configs
            .iter()
            .enumerate()
            .map(|(i, sc)| sc.to_group(format!("{}/{}", self.job_name, i)))
            .collect()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StaticConfig {
    #[serde(default)]
    pub targets: Vec<String>,

    #[serde(default)]
    pub labels: Labels,
}

impl StaticConfig {
    fn to_group(&self, source: String) -> TargetGroup {
        TargetGroup {
            source,
            labels: self.labels.clone(),
            targets: self
                .targets
                .iter()
                .map(|address| {
                    let mut target = Labels::new();
                    target.insert(names::ADDRESS, address.as_str());
                    target
                })
                .collect(),
        }
    }
}

/// A batch of targets sharing a set of group-level labels.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TargetGroup {
    /// Identifies the group within its discovery mechanism.
    pub source: String,
    pub labels: Labels,
    pub targets: Vec<Labels>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_static_target_groups() {
        let config: ScrapeConfig = serde_json::from_value(serde_json::json!({
            "job_name": "node",
            "scrape_interval": "30s",
            "static_configs": [
                { "targets": ["10.0.0.1:9100", "10.0.0.2:9100"], "labels": { "env": "prod" } },
                { "targets": ["10.0.1.1:9100"] }
            ]
        }))
        .unwrap();

        let groups = config.static_target_groups();
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].source, "node/0");
        assert_eq!(groups[0].labels.get("env"), Some("prod"));
        assert_eq!(groups[0].targets[1].get(names::ADDRESS), Some("10.0.0.2:9100"));
        assert_eq!(groups[1].source, "node/1");
        assert!(groups[1].labels.is_empty());
        assert!(config.relabel_configs.is_empty());
    }
}
