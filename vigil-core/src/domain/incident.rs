// vigil-core/src/domain/incident.rs

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::compliance::{AnomalySignal, Severity, SignalScope};
use crate::domain::error::DomainError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IncidentStatus {
    Open,
    Acknowledged,
    Resolved,
    Closed,
}

impl fmt::Display for IncidentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            IncidentStatus::Open => "open",
            IncidentStatus::Acknowledged => "acknowledged",
            IncidentStatus::Resolved => "resolved",
            IncidentStatus::Closed => "closed",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IncidentTransition {
    Acknowledge,
    Resolve,
    Close,
    /// Recovery observed for enough consecutive cycles.
    AutoClose,
}

impl fmt::Display for IncidentTransition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            IncidentTransition::Acknowledge => "acknowledge",
            IncidentTransition::Resolve => "resolve",
            IncidentTransition::Close => "close",
            IncidentTransition::AutoClose => "auto_close",
        };
        f.write_str(s)
    }
}

impl IncidentStatus {
    /// The incident lifecycle. Anything not listed here is illegal.
    pub fn apply(self, transition: IncidentTransition) -> Option<IncidentStatus> {
        use IncidentStatus as S;
        use IncidentTransition as T;
        match (self, transition) {
            (S::Open, T::Acknowledge) => Some(S::Acknowledged),
            (S::Open | S::Acknowledged, T::Resolve) => Some(S::Resolved),
            (S::Resolved, T::Close) => Some(S::Closed),
            (S::Open, T::AutoClose) => Some(S::Closed),
            _ => None,
        }
    }

    /// Open or acknowledged: the incident still owns its dedup key.
    pub fn is_active(self) -> bool {
        matches!(self, IncidentStatus::Open | IncidentStatus::Acknowledged)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CloseReason {
    Manual,
    AutoRecovered,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Incident {
    pub id: String,
    pub dedup_key: String,
    pub asset: String,
    pub scope: SignalScope,
    pub signal_ids: Vec<String>,
    pub severity: Severity,
    pub synthetic: bool,
    pub status: IncidentStatus,
    pub opened_at: DateTime<Utc>,
    #[serde(default)]
    pub acknowledged_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub acknowledged_by: Option<String>,
    #[serde(default)]
    pub resolved_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub resolved_by: Option<String>,
    #[serde(default)]
    pub resolution_note: Option<String>,
    #[serde(default)]
    pub closed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub close_reason: Option<CloseReason>,
    /// Consecutive cycles without a signal for this asset/scope.
    #[serde(default)]
    pub clean_cycles: u32,
    pub version: u64,
}

impl Incident {
    /// `asset::scope::window_start` where the window is `window_hours` wide.
    pub fn dedup_key(asset: &str, scope: &SignalScope, at: DateTime<Utc>, window_hours: u64) -> String {
        let window = i64::try_from(window_hours.max(1).saturating_mul(3600)).unwrap_or(i64::MAX);
        let ts = at.timestamp();
        let start = ts - ts.rem_euclid(window);
        format!("{}::{}::{}", asset, scope, start)
    }

    pub fn open(id: String, signal: &AnomalySignal, dedup_key: String, at: DateTime<Utc>) -> Self {
        Self {
            id,
            dedup_key,
            asset: signal.asset.clone(),
            scope: signal.scope.clone(),
            signal_ids: vec![signal.id.clone()],
            severity: signal.severity,
            synthetic: signal.synthetic,
            status: IncidentStatus::Open,
            opened_at: at,
            acknowledged_at: None,
            acknowledged_by: None,
            resolved_at: None,
            resolved_by: None,
            resolution_note: None,
            closed_at: None,
            close_reason: None,
            clean_cycles: 0,
            version: 1,
        }
    }

    /// Fold another signal into an active incident.
    pub fn merge(&mut self, signal: &AnomalySignal) -> Result<(), DomainError> {
        if !self.status.is_active() {
            return Err(DomainError::invalid_state(
                "incident",
                &self.id,
                self.status,
                "merge signal",
            ));
        }
        if !self.signal_ids.contains(&signal.id) {
            self.signal_ids.push(signal.id.clone());
        }
        self.severity = self.severity.max(signal.severity);
        self.clean_cycles = 0;
        self.version += 1;
        Ok(())
    }

    fn transition(&mut self, transition: IncidentTransition) -> Result<IncidentStatus, DomainError> {
        let from = self.status;
        let next = from.apply(transition).ok_or_else(|| {
            DomainError::invalid_state("incident", &self.id, from, transition.to_string())
        })?;
        self.status = next;
        self.version += 1;
        Ok(from)
    }

    pub fn acknowledge(&mut self, actor: &str, at: DateTime<Utc>) -> Result<IncidentStatus, DomainError> {
        let from = self.transition(IncidentTransition::Acknowledge)?;
        self.acknowledged_at = Some(at);
        self.acknowledged_by = Some(actor.to_string());
        Ok(from)
    }

    pub fn resolve(
        &mut self,
        actor: &str,
        note: &str,
        at: DateTime<Utc>,
    ) -> Result<IncidentStatus, DomainError> {
        if note.trim().is_empty() {
            return Err(DomainError::Precondition(format!(
                "resolving incident '{}' requires a resolution note",
                self.id
            )));
        }
        let from = self.transition(IncidentTransition::Resolve)?;
        self.resolved_at = Some(at);
        self.resolved_by = Some(actor.to_string());
        self.resolution_note = Some(note.trim().to_string());
        Ok(from)
    }

    pub fn close(&mut self, at: DateTime<Utc>) -> Result<IncidentStatus, DomainError> {
        let from = self.transition(IncidentTransition::Close)?;
        self.closed_at = Some(at);
        self.close_reason = Some(CloseReason::Manual);
        Ok(from)
    }

    /// Count a clean cycle. Returns true when this pushed an open incident into auto-close.
    pub fn record_clean_cycle(&mut self, auto_close_after: u32, at: DateTime<Utc>) -> bool {
        if !self.status.is_active() {
            return false;
        }
        self.clean_cycles += 1;
        self.version += 1;
        if self.clean_cycles >= auto_close_after
            && self.transition(IncidentTransition::AutoClose).is_ok()
        {
            self.closed_at = Some(at);
            self.close_reason = Some(CloseReason::AutoRecovered);
            return true;
        }
        false
    }
}

/// What one correlation pass did.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CorrelationReport {
    pub opened: Vec<String>,
    pub merged: Vec<String>,
    pub auto_closed: Vec<String>,
}

impl CorrelationReport {
    pub fn absorb(&mut self, other: CorrelationReport) {
        self.opened.extend(other.opened);
        self.merged.extend(other.merged);
        self.auto_closed.extend(other.auto_closed);
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn signal(id: &str, severity: Severity) -> AnomalySignal {
        AnomalySignal {
            id: id.into(),
            asset: "RAW.CUSTOMER".into(),
            scope: SignalScope::Aggregate("p".into()),
            observed_at: Utc::now(),
            observed: 0.4,
            expected_low: 0.9,
            expected_high: 1.0,
            z_score: 4.0,
            severity,
            synthetic: false,
            evaluation_id: None,
            cycle_label: None,
        }
    }

    fn open_incident() -> Incident {
        Incident::open(
            "INC-000001".into(),
            &signal("SIG-1", Severity::Minor),
            "k".into(),
            Utc::now(),
        )
    }

    #[test]
    fn test_transition_table() {
        use IncidentStatus as S;
        use IncidentTransition as T;
        assert_eq!(S::Open.apply(T::Acknowledge), Some(S::Acknowledged));
        assert_eq!(S::Acknowledged.apply(T::Acknowledge), None);
        assert_eq!(S::Acknowledged.apply(T::Resolve), Some(S::Resolved));
        assert_eq!(S::Open.apply(T::Close), None);
        assert_eq!(S::Open.apply(T::AutoClose), Some(S::Closed));
        assert_eq!(S::Acknowledged.apply(T::AutoClose), None);
        assert_eq!(S::Resolved.apply(T::Close), Some(S::Closed));
        assert_eq!(S::Closed.apply(T::Resolve), None);
    }

    #[test]
    fn test_resolve_requires_note() {
        let mut inc = open_incident();
        assert!(matches!(
            inc.resolve("ops", "  ", Utc::now()),
            Err(DomainError::Precondition(_))
        ));
        assert_eq!(inc.status, IncidentStatus::Open);
        inc.resolve("ops", "backfilled", Utc::now()).unwrap();
        assert_eq!(inc.status, IncidentStatus::Resolved);
    }

    #[test]
    fn test_merge_escalates_severity_and_resets_clean_cycles() {
        let mut inc = open_incident();
        inc.record_clean_cycle(3, Utc::now());
        inc.merge(&signal("SIG-2", Severity::Critical)).unwrap();
        assert_eq!(inc.signal_ids.len(), 2);
        assert_eq!(inc.severity, Severity::Critical);
        assert_eq!(inc.clean_cycles, 0);
    }

    #[test]
    fn test_auto_close_after_n_clean_cycles() {
        let mut inc = open_incident();
        assert!(!inc.record_clean_cycle(3, Utc::now()));
        assert!(!inc.record_clean_cycle(3, Utc::now()));
        assert!(inc.record_clean_cycle(3, Utc::now()));
        assert_eq!(inc.status, IncidentStatus::Closed);
        assert_eq!(inc.close_reason, Some(CloseReason::AutoRecovered));
    }

    #[test]
    fn test_acknowledged_incident_does_not_auto_close() {
        let mut inc = open_incident();
        inc.acknowledge("ops", Utc::now()).unwrap();
        for _ in 0..5 {
            assert!(!inc.record_clean_cycle(3, Utc::now()));
        }
        assert_eq!(inc.status, IncidentStatus::Acknowledged);
    }

    #[test]
    fn test_dedup_key_buckets_by_window() {
        let scope = SignalScope::Rule("r1".into());
        let a = Utc.with_ymd_and_hms(2026, 3, 1, 1, 0, 0).unwrap();
        let b = Utc.with_ymd_and_hms(2026, 3, 1, 23, 0, 0).unwrap();
        let c = Utc.with_ymd_and_hms(2026, 3, 2, 1, 0, 0).unwrap();
        assert_eq!(
            Incident::dedup_key("A", &scope, a, 24),
            Incident::dedup_key("A", &scope, b, 24)
        );
        assert_ne!(
            Incident::dedup_key("A", &scope, a, 24),
            Incident::dedup_key("A", &scope, c, 24)
        );
    }

    #[test]
    fn test_dedup_key_with_oversized_window_shares_one_bucket() {
        let scope = SignalScope::Rule("r1".into());
        let a = Utc.with_ymd_and_hms(2026, 3, 1, 1, 0, 0).unwrap();
        let b = Utc.with_ymd_and_hms(2031, 7, 9, 12, 0, 0).unwrap();
        assert_eq!(
            Incident::dedup_key("A", &scope, a, u64::MAX),
            Incident::dedup_key("A", &scope, b, u64::MAX)
        );
    }
}
