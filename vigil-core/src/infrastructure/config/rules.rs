// vigil-core/src/infrastructure/config/rules.rs

use anyhow::Context;
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use walkdir::WalkDir;

use crate::domain::catalog::RuleDefinition;
use crate::infrastructure::error::InfrastructureError;

const RULE_EXTENSIONS: [&str; 2] = ["yaml", "yml"];

/// A rule file holds either a `rules:` list or a single definition.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RuleFile {
    Many { rules: Vec<RuleDefinition> },
    One(RuleDefinition),
}

/// Every rule definition under the configured rule folders, in path order.
/// Missing folders are skipped.
pub fn load_rule_definitions(
    project_dir: &Path,
    rule_paths: &[String],
) -> Result<Vec<RuleDefinition>, InfrastructureError> {
    let mut files: Vec<PathBuf> = Vec::new();
    for folder in rule_paths {
        let dir = project_dir.join(folder);
        if !dir.exists() {
            debug!(path = ?dir, "rule folder absent, skipping");
            continue;
        }
        for entry in WalkDir::new(&dir).follow_links(true).into_iter().filter_map(|e| e.ok()) {
            let path = entry.path();
            if path.is_file()
                && let Some(ext) = path.extension().and_then(|s| s.to_str())
                && RULE_EXTENSIONS.contains(&ext)
            {
                files.push(path.to_path_buf());
            }
        }
    }
    files.sort();

    let mut defs = Vec::new();
    for path in files {
        defs.extend(load_rule_file(&path)?);
    }
    info!(count = defs.len(), "rule definitions discovered");
    Ok(defs)
}

/// Definitions from one YAML file.
pub fn load_rule_file(path: &Path) -> Result<Vec<RuleDefinition>, InfrastructureError> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read rule file at {:?}", path))?;
    let parsed: RuleFile = serde_yaml::from_str(&content)
        .with_context(|| format!("Failed to parse rule file at {:?}", path))?;
    Ok(match parsed {
        RuleFile::Many { rules } => rules,
        RuleFile::One(def) => vec![def],
    })
}
