// vigil-core/src/application/incidents.rs

use std::collections::{BTreeMap, HashSet};
use std::sync::{PoisonError, RwLock};

use tracing::{debug, info, instrument};

use crate::application::context::ServiceContext;
use crate::application::locks::KeyedLocks;
use crate::domain::audit::EntityKind;
use crate::domain::compliance::{AnomalySignal, SignalScope};
use crate::domain::error::DomainError;
use crate::domain::incident::{CorrelationReport, Incident, IncidentStatus};
use crate::domain::project::IncidentConfig;
use crate::error::Result;

/// Owns incidents. At most one active incident per dedup key.
pub struct IncidentManager {
    config: IncidentConfig,
    incidents: RwLock<BTreeMap<String, Incident>>,
    /// Signals already folded into an incident.
    correlated: RwLock<HashSet<String>>,
    key_locks: KeyedLocks,
    ctx: ServiceContext,
}

impl IncidentManager {
    pub fn new(config: IncidentConfig, ctx: ServiceContext) -> Self {
        Self::restore(config, ctx, Vec::new(), Vec::new())
    }

    pub fn restore(
        config: IncidentConfig,
        ctx: ServiceContext,
        incidents: Vec<Incident>,
        correlated: Vec<String>,
    ) -> Self {
        Self {
            config,
            incidents: RwLock::new(incidents.into_iter().map(|i| (i.id.clone(), i)).collect()),
            correlated: RwLock::new(correlated.into_iter().collect()),
            key_locks: KeyedLocks::new(),
            ctx,
        }
    }

    fn is_correlated(&self, signal_id: &str) -> bool {
        self.correlated
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(signal_id)
    }

    /// Fold signals into incidents: merge into the active incident sharing the
    /// dedup key, or open a new one. Signals seen before are ignored.
    #[instrument(skip(self, signals), fields(count = signals.len()))]
    pub async fn correlate(&self, signals: &[AnomalySignal], actor: &str) -> CorrelationReport {
        let mut report = CorrelationReport::default();
        for signal in signals {
            if self.is_correlated(&signal.id) {
                continue;
            }
            let key = Incident::dedup_key(
                &signal.asset,
                &signal.scope,
                signal.observed_at,
                self.config.dedup_window_hours,
            );
            let _guard = self.key_locks.acquire(&key).await;
            // Re-check under the key lock: a concurrent pass may have taken it.
            if self.is_correlated(&signal.id) {
                continue;
            }
            self.absorb(signal, key, actor, &mut report);
        }
        report
    }

    fn absorb(&self, signal: &AnomalySignal, key: String, actor: &str, report: &mut CorrelationReport) {
        let mut incidents = self.incidents.write().unwrap_or_else(PoisonError::into_inner);
        let existing = incidents
            .values_mut()
            .find(|i| i.dedup_key == key && i.status.is_active());

        if let Some(incident) = existing
            && incident.merge(signal).is_ok()
        {
            self.ctx.record(
                EntityKind::Incident,
                &incident.id,
                actor,
                &format!("merge {}", signal.id),
                Some(incident.status.to_string()),
                incident.status.to_string(),
            );
            debug!(incident = %incident.id, signal = %signal.id, "signal merged");
            report.merged.push(incident.id.clone());
        } else {
            let incident = Incident::open(self.ctx.next_id("INC"), signal, key, self.ctx.now());
            self.ctx.record(
                EntityKind::Incident,
                &incident.id,
                actor,
                "open",
                None,
                incident.status.to_string(),
            );
            info!(
                incident = %incident.id,
                asset = %incident.asset,
                scope = %incident.scope,
                severity = %incident.severity,
                "incident opened"
            );
            report.opened.push(incident.id.clone());
            incidents.insert(incident.id.clone(), incident);
        }
        self.correlated
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(signal.id.clone());
    }

    fn mutate<F>(&self, incident_id: &str, actor: &str, action: &str, f: F) -> Result<Incident>
    where
        F: FnOnce(&mut Incident) -> std::result::Result<IncidentStatus, DomainError>,
    {
        let mut incidents = self.incidents.write().unwrap_or_else(PoisonError::into_inner);
        let incident = incidents
            .get_mut(incident_id)
            .ok_or_else(|| DomainError::not_found("incident", incident_id))?;
        let from = f(incident)?;
        self.ctx.record(
            EntityKind::Incident,
            incident_id,
            actor,
            action,
            Some(from.to_string()),
            incident.status.to_string(),
        );
        info!(incident = incident_id, %from, to = %incident.status, actor, "incident {}", action);
        Ok(incident.clone())
    }

    pub fn acknowledge(&self, incident_id: &str, actor: &str) -> Result<Incident> {
        let at = self.ctx.now();
        self.mutate(incident_id, actor, "acknowledge", |i| i.acknowledge(actor, at))
    }

    pub fn resolve(&self, incident_id: &str, actor: &str, note: &str) -> Result<Incident> {
        let at = self.ctx.now();
        self.mutate(incident_id, actor, "resolve", |i| i.resolve(actor, note, at))
    }

    pub fn close(&self, incident_id: &str, actor: &str) -> Result<Incident> {
        let at = self.ctx.now();
        self.mutate(incident_id, actor, "close", |i| i.close(at))
    }

    /// A cycle saw no signal for (asset, scope). Returns the ids auto-closed.
    pub fn record_clean_observation(&self, asset: &str, scope: &SignalScope, actor: &str) -> Vec<String> {
        let at = self.ctx.now();
        let mut closed = Vec::new();
        let mut incidents = self.incidents.write().unwrap_or_else(PoisonError::into_inner);
        for incident in incidents
            .values_mut()
            .filter(|i| i.asset == asset && &i.scope == scope && i.status.is_active())
        {
            if incident.record_clean_cycle(self.config.auto_close_after, at) {
                self.ctx.record(
                    EntityKind::Incident,
                    &incident.id,
                    actor,
                    "auto_close",
                    Some(IncidentStatus::Open.to_string()),
                    incident.status.to_string(),
                );
                info!(incident = %incident.id, clean_cycles = incident.clean_cycles, "incident auto-closed");
                closed.push(incident.id.clone());
            }
        }
        closed
    }

    pub fn get(&self, incident_id: &str) -> Result<Incident> {
        self.incidents
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(incident_id)
            .cloned()
            .ok_or_else(|| DomainError::not_found("incident", incident_id).into())
    }

    /// Most recently opened incident on `asset` that is not closed.
    pub fn latest_open_for_asset(&self, asset: &str) -> Result<Incident> {
        self.incidents
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .filter(|i| i.asset == asset && i.status != IncidentStatus::Closed)
            .max_by(|a, b| a.opened_at.cmp(&b.opened_at).then_with(|| a.id.cmp(&b.id)))
            .cloned()
            .ok_or_else(|| DomainError::not_found("open incident for asset", asset).into())
    }

    pub fn incidents(&self) -> Vec<Incident> {
        self.incidents
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect()
    }

    pub fn correlated_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .correlated
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .cloned()
            .collect();
        ids.sort();
        ids
    }
}
