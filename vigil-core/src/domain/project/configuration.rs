// src/domain/project/configuration.rs

use crate::domain::compliance::Severity;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use validator::{Validate, ValidationError};

#[derive(Debug, Deserialize, Serialize, Clone, Validate)]
pub struct ProjectConfig {
    pub name: String,
    pub version: String,
    #[serde(default = "default_profile")]
    pub profile: String,

    #[serde(rename = "target-path", default = "default_target_path")]
    pub target_path: String,

    #[serde(rename = "rule-paths", default = "default_rule_paths")]
    pub rule_paths: Vec<String>,

    #[serde(default)]
    pub database: DatabaseConfig,

    /// Asset name -> CSV file, registered as views at startup.
    #[serde(default)]
    pub sources: BTreeMap<String, String>,

    #[serde(flatten)]
    #[validate(nested)]
    pub engine: EngineConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

/// Everything the engine itself reads at runtime.
#[derive(Debug, Deserialize, Serialize, Clone, Default, Validate)]
pub struct EngineConfig {
    #[serde(default)]
    #[validate(nested)]
    pub evaluation: EvaluationConfig,
    #[serde(default)]
    #[validate(nested)]
    pub anomaly: AnomalyConfig,
    #[serde(default)]
    #[validate(nested)]
    pub monitoring: MonitoringConfig,
    #[serde(default)]
    #[validate(nested)]
    pub incidents: IncidentConfig,
    #[serde(default)]
    #[validate(nested)]
    pub remediation: RemediationConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone, Validate)]
#[serde(default)]
pub struct EvaluationConfig {
    #[validate(range(min = 1))]
    pub timeout_ms: u64,
    /// Sampling window for large assets. `None` reads everything.
    #[validate(range(min = 1))]
    pub sample_limit: Option<usize>,
    /// Rule id -> weight. Missing rules weigh 1.0 (plain mean).
    pub weights: HashMap<String, f64>,
}

impl Default for EvaluationConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 30_000,
            sample_limit: None,
            weights: HashMap::new(),
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone, Validate)]
#[serde(default)]
#[validate(schema(function = "validate_severity_tiers"))]
pub struct AnomalyConfig {
    #[validate(range(min = 0.1))]
    pub z_threshold: f64,
    #[validate(range(min = 1))]
    pub min_samples: u64,
    #[validate(range(min = 0.000001))]
    pub min_stddev: f64,
    pub major_z: f64,
    pub critical_z: f64,
    pub synthetic_severity: Severity,
}

impl Default for AnomalyConfig {
    fn default() -> Self {
        Self {
            z_threshold: 2.5,
            min_samples: 5,
            min_stddev: 0.01,
            major_z: 3.5,
            critical_z: 5.0,
            synthetic_severity: Severity::Major,
        }
    }
}

fn validate_severity_tiers(cfg: &AnomalyConfig) -> Result<(), ValidationError> {
    if cfg.major_z < cfg.z_threshold || cfg.critical_z < cfg.major_z {
        return Err(ValidationError::new("severity_tiers_out_of_order"));
    }
    Ok(())
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MonitoredPair {
    pub pack: String,
    pub asset: String,
}

#[derive(Debug, Deserialize, Serialize, Clone, Validate)]
#[serde(default)]
pub struct MonitoringConfig {
    /// At most one year.
    #[validate(range(min = 1, max = 31_536_000))]
    pub bucket_seconds: u64,
    #[validate(range(min = 1))]
    pub max_concurrency: usize,
    #[validate(range(max = 10))]
    pub max_retries: u32,
    /// Pairs registered at setup.
    pub pairs: Vec<MonitoredPair>,
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            bucket_seconds: 3600,
            max_concurrency: 8,
            max_retries: 2,
            pairs: Vec::new(),
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone, Validate)]
#[serde(default)]
pub struct IncidentConfig {
    #[validate(range(min = 1))]
    pub auto_close_after: u32,
    /// At most ten years.
    #[validate(range(min = 1, max = 87_600))]
    pub dedup_window_hours: u64,
}

impl Default for IncidentConfig {
    fn default() -> Self {
        Self {
            auto_close_after: 3,
            dedup_window_hours: 24,
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone, Validate)]
#[serde(default)]
pub struct RemediationConfig {
    #[validate(range(min = 1, max = 87_600))]
    pub escalate_after_hours: u64,
}

impl Default for RemediationConfig {
    fn default() -> Self {
        Self {
            escalate_after_hours: 24,
        }
    }
}

fn default_target_path() -> String {
    "target".to_string()
}
fn default_profile() -> String {
    "dev".to_string()
}
fn default_rule_paths() -> Vec<String> {
    vec!["rules".to_string()]
}
fn default_db_path() -> String {
    ":memory:".to_string()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        assert!(EngineConfig::default().validate().is_ok());
    }

    #[test]
    fn test_tiers_out_of_order_rejected() {
        let cfg = AnomalyConfig {
            major_z: 2.0,
            ..AnomalyConfig::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_windows_beyond_ten_years_rejected() {
        let incidents = IncidentConfig {
            dedup_window_hours: u64::MAX,
            ..IncidentConfig::default()
        };
        assert!(incidents.validate().is_err());

        let remediation = RemediationConfig {
            escalate_after_hours: 87_601,
        };
        assert!(remediation.validate().is_err());
        assert!(RemediationConfig { escalate_after_hours: 87_600 }.validate().is_ok());

        let monitoring = MonitoringConfig {
            bucket_seconds: u64::MAX,
            ..MonitoringConfig::default()
        };
        assert!(monitoring.validate().is_err());
    }

    #[test]
    fn test_project_yaml_with_sections() {
        let yaml = r#"
name: quickstart
version: "1.0"
sources:
  RAW.CUSTOMER: data/customer.csv
anomaly:
  z_threshold: 3.0
monitoring:
  pairs:
    - pack: baseline_pack
      asset: RAW.CUSTOMER
"#;
        let cfg: ProjectConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(cfg.target_path, "target");
        assert_eq!(cfg.engine.anomaly.z_threshold, 3.0);
        assert_eq!(cfg.engine.anomaly.min_samples, 5);
        assert_eq!(cfg.engine.monitoring.pairs.len(), 1);
        assert_eq!(cfg.database.path, ":memory:");
        assert!(cfg.validate().is_ok());
    }
}
