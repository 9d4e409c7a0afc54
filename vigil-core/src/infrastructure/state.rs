// vigil-core/src/infrastructure/state.rs

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Context;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument};

use crate::domain::audit::AuditRecord;
use crate::domain::catalog::{Rule, RulePack};
use crate::domain::compliance::DetectorState;
use crate::domain::evaluation::EvaluationResult;
use crate::domain::incident::Incident;
use crate::domain::integrity::{
    INITIAL_SCHEMA_VERSION, IntegrityReport, LATEST_SCHEMA_VERSION, MigrationBaseline,
};
use crate::domain::monitoring::{CycleReport, LedgerEntry, MonitoredPair};
use crate::domain::remediation::RemediationTask;
use crate::infrastructure::error::InfrastructureError;
use crate::infrastructure::fs::atomic_write;

pub const STATE_FILE: &str = "state.json";

/// Everything the engine needs to come back exactly where it stopped.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineSnapshot {
    pub schema_version: u32,
    #[serde(default)]
    pub initialized: bool,
    #[serde(default)]
    pub saved_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub id_counters: BTreeMap<String, u64>,
    #[serde(default)]
    pub rules: Vec<Rule>,
    #[serde(default)]
    pub packs: Vec<RulePack>,
    #[serde(default)]
    pub evaluations: Vec<EvaluationResult>,
    #[serde(default)]
    pub detector: DetectorState,
    #[serde(default)]
    pub incidents: Vec<Incident>,
    #[serde(default)]
    pub correlated_signals: Vec<String>,
    #[serde(default)]
    pub tasks: Vec<RemediationTask>,
    #[serde(default)]
    pub pairs: Vec<MonitoredPair>,
    #[serde(default)]
    pub ledger: Vec<LedgerEntry>,
    #[serde(default)]
    pub last_cycle: Option<CycleReport>,
    #[serde(default)]
    pub baselines: Vec<MigrationBaseline>,
    #[serde(default)]
    pub integrity_reports: Vec<IntegrityReport>,
    #[serde(default)]
    pub audit: Vec<AuditRecord>,
}

impl Default for EngineSnapshot {
    fn default() -> Self {
        Self {
            schema_version: INITIAL_SCHEMA_VERSION,
            initialized: false,
            saved_at: None,
            id_counters: BTreeMap::new(),
            rules: Vec::new(),
            packs: Vec::new(),
            evaluations: Vec::new(),
            detector: DetectorState::default(),
            incidents: Vec::new(),
            correlated_signals: Vec::new(),
            tasks: Vec::new(),
            pairs: Vec::new(),
            ledger: Vec::new(),
            last_cycle: None,
            baselines: Vec::new(),
            integrity_reports: Vec::new(),
            audit: Vec::new(),
        }
    }
}

pub fn state_path(target_dir: &Path) -> PathBuf {
    target_dir.join(STATE_FILE)
}

/// `Ok(None)` when no state was saved yet.
#[instrument]
pub fn load_state(path: &Path) -> Result<Option<EngineSnapshot>, InfrastructureError> {
    if !path.exists() {
        debug!("no state file yet");
        return Ok(None);
    }
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read state file at {:?}", path))?;
    let snapshot: EngineSnapshot = serde_json::from_str(&content)?;
    if snapshot.schema_version > LATEST_SCHEMA_VERSION {
        return Err(InfrastructureError::UnsupportedStateVersion {
            found: snapshot.schema_version,
            supported: LATEST_SCHEMA_VERSION,
        });
    }
    info!(
        schema = snapshot.schema_version,
        rules = snapshot.rules.len(),
        evaluations = snapshot.evaluations.len(),
        audit = snapshot.audit.len(),
        "state loaded"
    );
    Ok(Some(snapshot))
}

#[instrument(skip(snapshot))]
pub fn save_state(path: &Path, snapshot: &EngineSnapshot) -> Result<(), InfrastructureError> {
    let json = serde_json::to_string_pretty(snapshot)?;
    atomic_write(path, json)?;
    debug!(audit = snapshot.audit.len(), "state saved");
    Ok(())
}
