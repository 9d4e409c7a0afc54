// vigil-core/src/application/integrity.rs

use std::sync::{PoisonError, RwLock};

use chrono::{DateTime, Duration, Utc};
use tracing::{info, instrument, warn};

use crate::application::context::ServiceContext;
use crate::application::monitoring::Pipeline;
use crate::domain::audit::EntityKind;
use crate::domain::error::DomainError;
use crate::domain::integrity::{
    DiagnosticsReport, EntityCounts, EvaluationDigest, IntegrityReport, LATEST_SCHEMA_VERSION,
    LiveState, MigrationBaseline, check,
};
use crate::error::Result;

/// Migration guardrails. Reads every service, writes only its own baselines,
/// reports and the schema version.
pub struct IntegrityGuard {
    pipeline: Pipeline,
    schema_version: RwLock<u32>,
    baselines: RwLock<Vec<MigrationBaseline>>,
    reports: RwLock<Vec<IntegrityReport>>,
    ctx: ServiceContext,
}

impl IntegrityGuard {
    pub fn restore(
        pipeline: Pipeline,
        ctx: ServiceContext,
        schema_version: u32,
        baselines: Vec<MigrationBaseline>,
        reports: Vec<IntegrityReport>,
    ) -> Self {
        Self {
            pipeline,
            schema_version: RwLock::new(schema_version),
            baselines: RwLock::new(baselines),
            reports: RwLock::new(reports),
            ctx,
        }
    }

    pub fn schema_version(&self) -> u32 {
        *self.schema_version.read().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn baselines(&self) -> Vec<MigrationBaseline> {
        self.baselines
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn reports(&self) -> Vec<IntegrityReport> {
        self.reports
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn counts(&self) -> EntityCounts {
        EntityCounts {
            rules: self.pipeline.catalog.rules().len(),
            packs: self.pipeline.catalog.packs().len(),
            evaluations: self.pipeline.evaluator.len(),
            signals: self.pipeline.detector.signals().len(),
            incidents: self.pipeline.incidents.incidents().len(),
            tasks: self.pipeline.remediation.tasks().len(),
            audit_records: self.ctx.audit.len(),
        }
    }

    #[instrument(skip(self))]
    pub fn capture_baseline(&self, actor: &str) -> Result<MigrationBaseline> {
        let baseline = MigrationBaseline::capture(
            self.ctx.next_id("MB"),
            actor,
            self.ctx.now(),
            self.schema_version(),
            &self.pipeline.catalog.rules(),
            &self.pipeline.catalog.packs(),
            self.counts(),
        );
        self.ctx.record(
            EntityKind::MigrationBaseline,
            &baseline.id,
            actor,
            "capture",
            None,
            format!("schema:v{}", baseline.schema_version),
        );
        info!(
            baseline = %baseline.id,
            rules = baseline.rules.len(),
            packs = baseline.packs.len(),
            "📸 migration baseline captured"
        );
        self.baselines
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(baseline.clone());
        Ok(baseline)
    }

    /// Diff the live state against a baseline (the latest when `None`).
    #[instrument(skip(self))]
    pub fn validate_integrity(&self, baseline_id: Option<&str>) -> Result<IntegrityReport> {
        let baseline = {
            let baselines = self.baselines.read().unwrap_or_else(PoisonError::into_inner);
            match baseline_id {
                Some(id) => baselines.iter().find(|b| b.id == id).cloned(),
                None => baselines.last().cloned(),
            }
        }
        .ok_or_else(|| DomainError::not_found("migration baseline", baseline_id.unwrap_or("latest")))?;

        let rules = self.pipeline.catalog.rules();
        let packs = self.pipeline.catalog.packs();
        let incidents = self.pipeline.incidents.incidents();
        let tasks = self.pipeline.remediation.tasks();
        let signal_ids = self.pipeline.detector.signal_ids();
        let audit_replay = self.ctx.audit.replay();
        let live = LiveState {
            rules: &rules,
            packs: &packs,
            incidents: &incidents,
            tasks: &tasks,
            signal_ids: &signal_ids,
            counts: self.counts(),
            audit_replay: &audit_replay,
        };

        let report = IntegrityReport {
            id: self.ctx.next_id("IR"),
            baseline_id: baseline.id.clone(),
            generated_at: self.ctx.now(),
            findings: check(&baseline, &live),
        };
        if report.passed() {
            info!(report = %report.id, baseline = %baseline.id, "✅ integrity check passed");
        } else {
            for f in &report.findings {
                warn!(kind = %f.kind, entity = %f.entity_id, detail = %f.detail, "integrity finding");
            }
        }
        self.reports
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(report.clone());
        Ok(report)
    }

    pub fn export_diagnostics(&self, hours: u32) -> Result<DiagnosticsReport> {
        if hours == 0 {
            return Err(DomainError::Precondition("look-back window must be at least 1 hour".into()).into());
        }
        let now = self.ctx.now();
        // Windows reaching past the calendar's start cover everything.
        let since = Duration::try_hours(i64::from(hours))
            .and_then(|window| now.checked_sub_signed(window))
            .unwrap_or(DateTime::<Utc>::MIN_UTC);

        let evaluations = self
            .pipeline
            .evaluator
            .results()
            .into_iter()
            .filter(|r| r.run_at >= since)
            .map(|r| EvaluationDigest {
                id: r.id,
                pack_id: r.pack_id,
                asset: r.asset,
                run_at: r.run_at,
                quality_score: r.quality_score,
                pass_ratio: r.pass_ratio,
                partial: r.partial,
            })
            .collect();
        let signals = self
            .pipeline
            .detector
            .signals()
            .into_iter()
            .filter(|s| s.observed_at >= since)
            .collect();
        // Active incidents are always relevant, whatever their age.
        let incidents = self
            .pipeline
            .incidents
            .incidents()
            .into_iter()
            .filter(|i| i.opened_at >= since || i.status.is_active())
            .collect();
        let tasks = self
            .pipeline
            .remediation
            .tasks()
            .into_iter()
            .filter(|t| t.updated_at >= since)
            .collect();

        Ok(DiagnosticsReport {
            generated_at: now,
            window_hours: hours,
            schema_version: self.schema_version(),
            evaluations,
            signals,
            incidents,
            tasks,
            audit: self.ctx.audit.records_since(since),
        })
    }

    /// Move the state schema one version forward. Needs a baseline captured at the
    /// current version; the move is undone when the post-check has findings.
    #[instrument(skip(self))]
    pub fn upgrade(&self, actor: &str) -> Result<IntegrityReport> {
        let from = self.schema_version();
        if from >= LATEST_SCHEMA_VERSION {
            return Err(DomainError::Precondition(format!("state is already at schema v{}", from)).into());
        }
        let baseline_id = self
            .baselines
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .rev()
            .find(|b| b.schema_version == from)
            .map(|b| b.id.clone())
            .ok_or_else(|| {
                DomainError::Precondition(format!(
                    "capture a migration baseline at schema v{} before upgrading",
                    from
                ))
            })?;

        let to = from + 1;
        *self.schema_version.write().unwrap_or_else(PoisonError::into_inner) = to;
        let report = self.validate_integrity(Some(&baseline_id))?;
        if !report.passed() {
            *self.schema_version.write().unwrap_or_else(PoisonError::into_inner) = from;
            warn!(from, to, findings = report.findings.len(), "upgrade rolled back");
            return Err(DomainError::Consistency(format!(
                "upgrade to schema v{} rolled back: {} integrity finding(s) in {}",
                to,
                report.findings.len(),
                report.id
            ))
            .into());
        }

        self.ctx.record(
            EntityKind::Engine,
            "schema",
            actor,
            "upgrade",
            Some(format!("v{}", from)),
            format!("v{}", to),
        );
        info!(from, to, "⬆️  state schema upgraded");
        Ok(report)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::application::catalog::RuleCatalog;
    use crate::application::context::test_context;
    use crate::application::monitoring::test_pipeline;
    use crate::domain::integrity::{FindingKind, INITIAL_SCHEMA_VERSION};
    use crate::domain::project::EvaluationConfig;
    use crate::error::VigilError;
    use crate::infrastructure::adapters::InMemorySource;

    fn guard() -> IntegrityGuard {
        let ctx = test_context();
        let pipeline = test_pipeline(ctx.clone(), Arc::new(InMemorySource::new()), EvaluationConfig::default());
        IntegrityGuard::restore(pipeline, ctx, INITIAL_SCHEMA_VERSION, Vec::new(), Vec::new())
    }

    #[test]
    fn test_validate_without_baseline_is_not_found() {
        let err = guard().validate_integrity(None).unwrap_err();
        assert!(matches!(err, VigilError::Domain(DomainError::NotFound { .. })));
    }

    #[test]
    fn test_untouched_state_passes() {
        let g = guard();
        let baseline = g.capture_baseline("admin").unwrap();
        let report = g.validate_integrity(Some(&baseline.id)).unwrap();
        assert!(report.passed(), "{:?}", report.findings);
        assert_eq!(g.reports().len(), 1);
    }

    #[test]
    fn test_drift_is_reported() {
        let g = guard();
        g.capture_baseline("admin").unwrap();

        // Same baselines, but a catalog that lost its rule and pack and has no audit trail.
        let ctx = test_context();
        let mut pipeline = g.pipeline.clone();
        pipeline.catalog = Arc::new(RuleCatalog::new(ctx.clone()));
        let drifted = IntegrityGuard::restore(pipeline, ctx, INITIAL_SCHEMA_VERSION, g.baselines(), Vec::new());

        let report = drifted.validate_integrity(None).unwrap();
        let kinds: Vec<FindingKind> = report.findings.iter().map(|f| f.kind).collect();
        assert!(kinds.contains(&FindingKind::MissingRule));
        assert!(kinds.contains(&FindingKind::MissingPack));
        assert!(kinds.contains(&FindingKind::CountRegression));
    }

    #[test]
    fn test_diagnostics_window_must_be_positive() {
        let g = guard();
        assert!(g.export_diagnostics(0).is_err());
        let report = g.export_diagnostics(24).unwrap();
        assert_eq!(report.window_hours, 24);
        assert!(!report.audit.is_empty());
    }

    #[test]
    fn test_diagnostics_with_widest_window_covers_everything() {
        let g = guard();
        let report = g.export_diagnostics(u32::MAX).unwrap();
        assert_eq!(report.window_hours, u32::MAX);
        assert_eq!(report.audit.len(), g.export_diagnostics(24).unwrap().audit.len());
    }

    #[test]
    fn test_upgrade_requires_baseline_at_current_version() {
        let g = guard();
        let err = g.upgrade("admin").unwrap_err();
        assert!(matches!(err, VigilError::Domain(DomainError::Precondition(_))));

        g.capture_baseline("admin").unwrap();
        g.upgrade("admin").unwrap();
        assert_eq!(g.schema_version(), LATEST_SCHEMA_VERSION);

        let again = g.upgrade("admin").unwrap_err();
        assert!(matches!(again, VigilError::Domain(DomainError::Precondition(_))));
    }
}
