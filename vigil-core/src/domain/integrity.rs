//! Migration baselines and the integrity diff.
//!
//! A baseline freezes the shape of the catalog (rule versions and their approval
//! states, pack references) plus entity counts. `check` compares a baseline with the
//! live state and with the fold of the audit log. It never mutates anything.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::audit::{AuditRecord, EntityKind};
use crate::domain::catalog::{ApprovalState, PackState, Rule, RulePack, RuleRef};
use crate::domain::compliance::AnomalySignal;
use crate::domain::incident::Incident;
use crate::domain::remediation::RemediationTask;

/// Schema version written by a fresh `setup`.
pub const INITIAL_SCHEMA_VERSION: u32 = 1;
/// Newest schema this build reads and writes. `upgrade` walks towards it.
pub const LATEST_SCHEMA_VERSION: u32 = 2;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VersionState {
    pub version: u32,
    pub state: ApprovalState,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleSnapshot {
    pub id: String,
    pub versions: Vec<VersionState>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PackSnapshot {
    pub id: String,
    pub state: PackState,
    pub revision: u32,
    pub rules: Vec<RuleRef>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityCounts {
    pub rules: usize,
    pub packs: usize,
    pub evaluations: usize,
    pub signals: usize,
    pub incidents: usize,
    pub tasks: usize,
    pub audit_records: usize,
}

impl EntityCounts {
    fn pairs(&self) -> [(&'static str, usize); 7] {
        [
            ("rules", self.rules),
            ("packs", self.packs),
            ("evaluations", self.evaluations),
            ("signals", self.signals),
            ("incidents", self.incidents),
            ("tasks", self.tasks),
            ("audit_records", self.audit_records),
        ]
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MigrationBaseline {
    pub id: String,
    pub captured_at: DateTime<Utc>,
    pub captured_by: String,
    pub schema_version: u32,
    pub rules: Vec<RuleSnapshot>,
    pub packs: Vec<PackSnapshot>,
    pub counts: EntityCounts,
}

impl MigrationBaseline {
    pub fn capture(
        id: String,
        actor: &str,
        at: DateTime<Utc>,
        schema_version: u32,
        rules: &[Rule],
        packs: &[RulePack],
        counts: EntityCounts,
    ) -> Self {
        let rules = rules
            .iter()
            .map(|r| RuleSnapshot {
                id: r.id.clone(),
                versions: r
                    .versions
                    .iter()
                    .map(|v| VersionState {
                        version: v.version,
                        state: v.state,
                    })
                    .collect(),
            })
            .collect();
        let packs = packs
            .iter()
            .map(|p| PackSnapshot {
                id: p.id.clone(),
                state: p.state,
                revision: p.revision,
                rules: p.rules.clone(),
            })
            .collect();
        Self {
            id,
            captured_at: at,
            captured_by: actor.to_string(),
            schema_version,
            rules,
            packs,
            counts,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FindingKind {
    MissingRule,
    MissingPack,
    VersionRegression,
    OrphanedReference,
    UnapprovedActiveReference,
    DanglingTask,
    DanglingSignal,
    AuditMismatch,
    CountRegression,
}

impl fmt::Display for FindingKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FindingKind::MissingRule => "missing_rule",
            FindingKind::MissingPack => "missing_pack",
            FindingKind::VersionRegression => "version_regression",
            FindingKind::OrphanedReference => "orphaned_reference",
            FindingKind::UnapprovedActiveReference => "unapproved_active_reference",
            FindingKind::DanglingTask => "dangling_task",
            FindingKind::DanglingSignal => "dangling_signal",
            FindingKind::AuditMismatch => "audit_mismatch",
            FindingKind::CountRegression => "count_regression",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Finding {
    pub kind: FindingKind,
    pub entity_id: String,
    pub detail: String,
}

impl Finding {
    fn new(kind: FindingKind, entity_id: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            kind,
            entity_id: entity_id.into(),
            detail: detail.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntegrityReport {
    pub id: String,
    pub baseline_id: String,
    pub generated_at: DateTime<Utc>,
    pub findings: Vec<Finding>,
}

impl IntegrityReport {
    pub fn passed(&self) -> bool {
        self.findings.is_empty()
    }
}

/// Scores only; raw records never leave the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationDigest {
    pub id: String,
    pub pack_id: String,
    pub asset: String,
    pub run_at: DateTime<Utc>,
    pub quality_score: f64,
    pub pass_ratio: f64,
    pub partial: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiagnosticsReport {
    pub generated_at: DateTime<Utc>,
    pub window_hours: u32,
    pub schema_version: u32,
    pub evaluations: Vec<EvaluationDigest>,
    pub signals: Vec<AnomalySignal>,
    pub incidents: Vec<Incident>,
    pub tasks: Vec<RemediationTask>,
    pub audit: Vec<AuditRecord>,
}

/// Borrowed view of the live state handed to [`check`].
pub struct LiveState<'a> {
    pub rules: &'a [Rule],
    pub packs: &'a [RulePack],
    pub incidents: &'a [Incident],
    pub tasks: &'a [RemediationTask],
    pub signal_ids: &'a HashSet<String>,
    pub counts: EntityCounts,
    pub audit_replay: &'a BTreeMap<(EntityKind, String), String>,
}

pub fn check(baseline: &MigrationBaseline, live: &LiveState<'_>) -> Vec<Finding> {
    let mut findings = Vec::new();
    let rules: HashMap<&str, &Rule> = live.rules.iter().map(|r| (r.id.as_str(), r)).collect();
    let packs: HashMap<&str, &RulePack> = live.packs.iter().map(|p| (p.id.as_str(), p)).collect();

    for snap in &baseline.rules {
        let Some(rule) = rules.get(snap.id.as_str()) else {
            findings.push(Finding::new(
                FindingKind::MissingRule,
                &snap.id,
                "present in baseline, absent now",
            ));
            continue;
        };
        let before = snap.versions.iter().map(|v| v.version).max().unwrap_or(0);
        let now = rule.versions.iter().map(|v| v.version).max().unwrap_or(0);
        if now < before {
            findings.push(Finding::new(
                FindingKind::VersionRegression,
                &snap.id,
                format!("latest version went from v{} to v{}", before, now),
            ));
        }
    }

    for snap in &baseline.packs {
        if !packs.contains_key(snap.id.as_str()) {
            findings.push(Finding::new(
                FindingKind::MissingPack,
                &snap.id,
                "present in baseline, absent now",
            ));
        }
    }

    for pack in live.packs {
        for r in &pack.rules {
            match rules.get(r.rule_id.as_str()).and_then(|rule| rule.version(r.version)) {
                None => findings.push(Finding::new(
                    FindingKind::OrphanedReference,
                    &pack.id,
                    format!("references unknown rule version {}", r),
                )),
                Some(v) if pack.state == PackState::Active && v.state != ApprovalState::Approved => {
                    findings.push(Finding::new(
                        FindingKind::UnapprovedActiveReference,
                        &pack.id,
                        format!("active pack references {} in state {}", r, v.state),
                    ))
                }
                Some(_) => {}
            }
        }
    }

    let incident_ids: HashSet<&str> = live.incidents.iter().map(|i| i.id.as_str()).collect();
    for task in live.tasks {
        if !incident_ids.contains(task.incident_id.as_str()) {
            findings.push(Finding::new(
                FindingKind::DanglingTask,
                &task.id,
                format!("links to unknown incident {}", task.incident_id),
            ));
        }
    }
    for incident in live.incidents {
        for sid in &incident.signal_ids {
            if !live.signal_ids.contains(sid) {
                findings.push(Finding::new(
                    FindingKind::DanglingSignal,
                    &incident.id,
                    format!("links to unknown signal {}", sid),
                ));
            }
        }
    }

    let mut expected: Vec<(EntityKind, &str, String)> = Vec::new();
    expected.extend(live.rules.iter().map(|r| (EntityKind::Rule, r.id.as_str(), r.audit_state())));
    expected.extend(live.packs.iter().map(|p| (EntityKind::Pack, p.id.as_str(), p.audit_state())));
    expected.extend(
        live.incidents
            .iter()
            .map(|i| (EntityKind::Incident, i.id.as_str(), i.status.to_string())),
    );
    expected.extend(
        live.tasks
            .iter()
            .map(|t| (EntityKind::Task, t.id.as_str(), t.status.to_string())),
    );
    for (kind, id, state) in expected {
        match live.audit_replay.get(&(kind, id.to_string())) {
            Some(replayed) if *replayed == state => {}
            Some(replayed) => findings.push(Finding::new(
                FindingKind::AuditMismatch,
                id,
                format!("{} state is '{}' but audit replay gives '{}'", kind, state, replayed),
            )),
            None => findings.push(Finding::new(
                FindingKind::AuditMismatch,
                id,
                format!("{} has no audit history", kind),
            )),
        }
    }

    for ((name, before), (_, now)) in baseline.counts.pairs().into_iter().zip(live.counts.pairs()) {
        if now < before {
            findings.push(Finding::new(
                FindingKind::CountRegression,
                name,
                format!("{} dropped from {} to {}", name, before, now),
            ));
        }
    }

    findings
}
