//! Append-only audit trail shared by every stateful component.
//!
//! Records are keyed by (entity kind, entity id) with a per-entity version that
//! only ever grows. The current state of an entity can be rebuilt by folding its
//! history: the last `after` value wins. Integrity validation compares that fold
//! with the live state.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::{PoisonError, RwLock};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Rule,
    Pack,
    Incident,
    Task,
    MigrationBaseline,
    Engine,
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            EntityKind::Rule => "rule",
            EntityKind::Pack => "pack",
            EntityKind::Incident => "incident",
            EntityKind::Task => "task",
            EntityKind::MigrationBaseline => "migration_baseline",
            EntityKind::Engine => "engine",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditRecord {
    pub kind: EntityKind,
    pub entity_id: String,
    /// Monotonic per (kind, entity_id), starting at 1.
    pub version: u64,
    pub actor: String,
    pub at: DateTime<Utc>,
    pub action: String,
    pub before: Option<String>,
    pub after: String,
}

/// What a caller hands to [`AuditLog::append`]; the log assigns the version.
#[derive(Debug, Clone)]
pub struct AuditEvent<'a> {
    pub kind: EntityKind,
    pub entity_id: &'a str,
    pub actor: &'a str,
    pub at: DateTime<Utc>,
    pub action: &'a str,
    pub before: Option<String>,
    pub after: String,
}

#[derive(Debug, Default)]
struct AuditInner {
    records: Vec<AuditRecord>,
    versions: HashMap<(EntityKind, String), u64>,
}

#[derive(Debug, Default)]
pub struct AuditLog {
    inner: RwLock<AuditInner>,
}

impl AuditLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild a log from persisted records. Versions are recomputed from the
    /// highest version seen per entity.
    pub fn from_records(records: Vec<AuditRecord>) -> Self {
        let mut versions = HashMap::new();
        for r in &records {
            let v = versions.entry((r.kind, r.entity_id.clone())).or_insert(0);
            *v = (*v).max(r.version);
        }
        Self {
            inner: RwLock::new(AuditInner { records, versions }),
        }
    }

    pub fn append(&self, event: AuditEvent<'_>) -> AuditRecord {
        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        let key = (event.kind, event.entity_id.to_string());
        let version = inner.versions.get(&key).copied().unwrap_or(0) + 1;
        inner.versions.insert(key, version);

        let record = AuditRecord {
            kind: event.kind,
            entity_id: event.entity_id.to_string(),
            version,
            actor: event.actor.to_string(),
            at: event.at,
            action: event.action.to_string(),
            before: event.before,
            after: event.after,
        };
        tracing::debug!(
            kind = %record.kind,
            id = %record.entity_id,
            version,
            action = %record.action,
            "audit"
        );
        inner.records.push(record.clone());
        record
    }

    pub fn history(&self, kind: EntityKind, entity_id: &str) -> Vec<AuditRecord> {
        let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        inner
            .records
            .iter()
            .filter(|r| r.kind == kind && r.entity_id == entity_id)
            .cloned()
            .collect()
    }

    pub fn records_since(&self, since: DateTime<Utc>) -> Vec<AuditRecord> {
        let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        inner
            .records
            .iter()
            .filter(|r| r.at >= since)
            .cloned()
            .collect()
    }

    /// Fold every entity's history down to its last recorded state.
    pub fn replay(&self) -> BTreeMap<(EntityKind, String), String> {
        let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        let mut state = BTreeMap::new();
        for r in &inner.records {
            state.insert((r.kind, r.entity_id.clone()), r.after.clone());
        }
        state
    }

    pub fn len(&self) -> usize {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .records
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn records(&self) -> Vec<AuditRecord> {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .records
            .clone()
    }
}
