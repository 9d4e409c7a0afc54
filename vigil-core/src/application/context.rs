// vigil-core/src/application/context.rs

use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::application::ids::IdGenerator;
use crate::domain::audit::{AuditEvent, AuditLog, AuditRecord, EntityKind};
use crate::ports::clock::Clock;

/// What every service shares: time, identifiers and the audit trail.
#[derive(Clone)]
pub struct ServiceContext {
    pub audit: Arc<AuditLog>,
    pub clock: Arc<dyn Clock>,
    pub ids: Arc<IdGenerator>,
}

impl ServiceContext {
    pub fn new(audit: Arc<AuditLog>, clock: Arc<dyn Clock>, ids: Arc<IdGenerator>) -> Self {
        Self { audit, clock, ids }
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    pub fn next_id(&self, prefix: &str) -> String {
        self.ids.next(prefix)
    }

    pub fn record(
        &self,
        kind: EntityKind,
        entity_id: &str,
        actor: &str,
        action: &str,
        before: Option<String>,
        after: String,
    ) -> AuditRecord {
        self.audit.append(AuditEvent {
            kind,
            entity_id,
            actor,
            at: self.now(),
            action,
            before,
            after,
        })
    }
}

#[cfg(test)]
pub(crate) fn test_context() -> ServiceContext {
    ServiceContext::new(
        Arc::new(AuditLog::new()),
        Arc::new(crate::ports::clock::SystemClock),
        Arc::new(IdGenerator::default()),
    )
}
