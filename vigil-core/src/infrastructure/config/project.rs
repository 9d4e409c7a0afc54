// vigil-core/src/infrastructure/config/project.rs

use anyhow::Context;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, instrument};
use validator::Validate;

use crate::domain::project::configuration::ProjectConfig;
use crate::infrastructure::error::InfrastructureError;

pub const CONFIG_CANDIDATES: [&str; 2] = ["vigil.yaml", "vigil_project_conf.yaml"];

#[instrument(skip(project_dir))]
pub fn load_project_config(project_dir: &Path) -> Result<ProjectConfig, InfrastructureError> {
    // 1. Discover the main file
    let config_path = find_main_config(project_dir)?;
    info!(path = ?config_path, "Loading project config");

    // 2. Base YAML
    let content = fs::read_to_string(&config_path)
        .with_context(|| format!("Failed to read project config at {:?}", config_path))?;
    let mut config: ProjectConfig = serde_yaml::from_str(&content)
        .with_context(|| format!("Failed to parse project config YAML at {:?}", config_path))?;

    // 3. Layering: VIGIL_TARGET_PATH=/tmp/run vigil monitor run
    apply_env_overrides(&mut config, |key| std::env::var(key).ok());

    // 4. Reject nonsense thresholds before anything runs with them
    config.validate()?;

    Ok(config)
}

pub fn find_main_config(root: &Path) -> Result<PathBuf, InfrastructureError> {
    for filename in CONFIG_CANDIDATES {
        let p = root.join(filename);
        if p.exists() {
            return Ok(p);
        }
    }
    Err(InfrastructureError::ConfigNotFound(format!(
        "No configuration file found in {:?}. Checked: {:?}",
        root, CONFIG_CANDIDATES
    )))
}

pub(crate) fn apply_env_overrides<F>(config: &mut ProjectConfig, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(val) = lookup("VIGIL_TARGET_PATH") {
        info!(old = ?config.target_path, new = ?val, "Overriding target path via ENV");
        config.target_path = val;
    }
    if let Some(val) = lookup("VIGIL_PROFILE") {
        info!(old = ?config.profile, new = ?val, "Overriding profile via ENV");
        config.profile = val;
    }
    if let Some(val) = lookup("VIGIL_DB_PATH") {
        info!(old = ?config.database.path, new = ?val, "Overriding database path via ENV");
        config.database.path = val;
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::tempdir;

    const MINIMAL: &str = "name: quickstart\nversion: '1.0'\n";

    #[test]
    fn test_missing_config_is_reported() {
        let dir = tempdir().unwrap();
        let err = load_project_config(dir.path()).unwrap_err();
        assert!(matches!(err, InfrastructureError::ConfigNotFound(_)));
    }

    #[test]
    fn test_loads_alternate_file_name_with_defaults() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("vigil_project_conf.yaml"), MINIMAL).unwrap();
        let cfg = load_project_config(dir.path()).unwrap();
        assert_eq!(cfg.name, "quickstart");
        assert_eq!(cfg.engine.anomaly.min_samples, 5);
        assert_eq!(cfg.engine.incidents.auto_close_after, 3);
    }

    #[test]
    fn test_invalid_thresholds_are_rejected() {
        let dir = tempdir().unwrap();
        let yaml = format!("{}anomaly:\n  min_samples: 0\n", MINIMAL);
        fs::write(dir.path().join("vigil.yaml"), yaml).unwrap();
        let err = load_project_config(dir.path()).unwrap_err();
        assert!(matches!(err, InfrastructureError::ConfigInvalid(_)));
    }

    #[test]
    fn test_env_overrides_are_layered() {
        let mut cfg: ProjectConfig = serde_yaml::from_str(MINIMAL).unwrap();
        let env: HashMap<&str, &str> =
            HashMap::from([("VIGIL_TARGET_PATH", "/tmp/out"), ("VIGIL_DB_PATH", "dq.duckdb")]);
        apply_env_overrides(&mut cfg, |k| env.get(k).map(|v| v.to_string()));
        assert_eq!(cfg.target_path, "/tmp/out");
        assert_eq!(cfg.database.path, "dq.duckdb");
        assert_eq!(cfg.profile, "dev");
    }
}
