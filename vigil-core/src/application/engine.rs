// vigil-core/src/application/engine.rs

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, error, info, instrument, warn};

use crate::application::anomaly::AnomalyDetector;
use crate::application::catalog::RuleCatalog;
use crate::application::context::ServiceContext;
use crate::application::evaluation::EvaluationEngine;
use crate::application::ids::IdGenerator;
use crate::application::incidents::IncidentManager;
use crate::application::integrity::IntegrityGuard;
use crate::application::monitoring::{MonitoringScheduler, Pipeline};
use crate::application::remediation::{RemediationSummary, RemediationTracker};
use crate::domain::audit::{AuditLog, AuditRecord, EntityKind};
use crate::domain::catalog::{ApprovalState, PackState};
use crate::domain::compliance::{AnomalySignal, SyntheticObservation};
use crate::domain::error::DomainError;
use crate::domain::evaluation::EvaluationResult;
use crate::domain::incident::{CorrelationReport, Incident};
use crate::domain::integrity::{
    DiagnosticsReport, IntegrityReport, LATEST_SCHEMA_VERSION, MigrationBaseline,
};
use crate::domain::monitoring::{CycleReport, MonitoredPair};
use crate::domain::project::EngineConfig;
use crate::domain::remediation::{RemediationTask, TaskStatus};
use crate::error::Result;
use crate::infrastructure::adapters::DuckDbSource;
use crate::infrastructure::config::{load_project_config, load_rule_definitions};
use crate::infrastructure::state::{EngineSnapshot, load_state, save_state, state_path};
use crate::ports::clock::{Clock, SystemClock};
use crate::ports::source::AssetSource;

/// Where a project-backed engine reads rules and keeps its state.
#[derive(Debug, Clone)]
struct ProjectLayout {
    root: PathBuf,
    rule_paths: Vec<String>,
    state_path: PathBuf,
}

#[derive(Debug, Clone, Serialize)]
pub struct SetupReport {
    pub rules_created: Vec<String>,
    pub rules_existing: usize,
    pub pairs_registered: Vec<MonitoredPair>,
    /// Configured pairs whose pack does not exist yet. Run setup again once it does.
    pub pairs_pending: Vec<MonitoredPair>,
    pub schema_version: u32,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthStatus {
    pub initialized: bool,
    pub schema_version: u32,
    pub latest_schema_version: u32,
    pub source: String,
    pub source_error: Option<String>,
    pub assets: Vec<String>,
    pub rules: usize,
    pub approved_rules: usize,
    pub packs: usize,
    pub active_packs: usize,
    pub monitored_pairs: usize,
    pub evaluations: usize,
    pub signals: usize,
    pub active_incidents: usize,
    pub open_tasks: usize,
    pub audit_records: usize,
    pub last_cycle: Option<String>,
    pub last_cycle_at: Option<DateTime<Utc>>,
}

impl HealthStatus {
    pub fn healthy(&self) -> bool {
        self.initialized && self.source_error.is_none()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ReadinessCheck {
    pub name: &'static str,
    pub passed: bool,
    pub detail: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReadinessReport {
    pub checks: Vec<ReadinessCheck>,
}

impl ReadinessReport {
    pub fn ready(&self) -> bool {
        self.checks.iter().all(|c| c.passed)
    }
}

/// The one entry point: every operation of the engine goes through here.
pub struct Engine {
    config: EngineConfig,
    layout: Option<ProjectLayout>,
    initialized: AtomicBool,
    ctx: ServiceContext,
    pipeline: Pipeline,
    scheduler: MonitoringScheduler,
    integrity: IntegrityGuard,
    last_cycle: RwLock<Option<CycleReport>>,
}

impl Engine {
    /// Open a project directory: config, DuckDB source with the configured CSV
    /// views, and the saved state when there is one.
    #[instrument]
    pub fn open(project_dir: &Path) -> Result<Self> {
        let config = load_project_config(project_dir)?;

        let db_path = if config.database.path == ":memory:" {
            config.database.path.clone()
        } else {
            project_dir.join(&config.database.path).to_string_lossy().into_owned()
        };
        let source = DuckDbSource::new(&db_path)?;
        for (name, path) in &config.sources {
            let raw = Path::new(path);
            let absolute = if raw.is_absolute() {
                raw.to_path_buf()
            } else {
                project_dir.join(raw)
            };
            if absolute.exists() {
                source.register_csv(name, &absolute)?;
            } else {
                warn!(asset = %name, path = ?absolute, "⚠️  source file not found");
            }
        }

        let layout = ProjectLayout {
            root: project_dir.to_path_buf(),
            rule_paths: config.rule_paths.clone(),
            state_path: state_path(&project_dir.join(&config.target_path)),
        };
        let snapshot = load_state(&layout.state_path)?.unwrap_or_default();
        info!(project = %config.name, profile = %config.profile, "📂 project opened");

        Ok(Self::assemble(
            config.engine,
            Arc::new(source),
            Arc::new(SystemClock),
            snapshot,
            Some(layout),
        ))
    }

    /// An engine with no project behind it. Nothing is saved.
    pub fn with_source(config: EngineConfig, source: Arc<dyn AssetSource>, clock: Arc<dyn Clock>) -> Self {
        Self::restore(config, source, clock, EngineSnapshot::default())
    }

    pub fn restore(
        config: EngineConfig,
        source: Arc<dyn AssetSource>,
        clock: Arc<dyn Clock>,
        snapshot: EngineSnapshot,
    ) -> Self {
        Self::assemble(config, source, clock, snapshot, None)
    }

    fn assemble(
        config: EngineConfig,
        source: Arc<dyn AssetSource>,
        clock: Arc<dyn Clock>,
        snapshot: EngineSnapshot,
        layout: Option<ProjectLayout>,
    ) -> Self {
        let ctx = ServiceContext::new(
            Arc::new(AuditLog::from_records(snapshot.audit)),
            clock,
            Arc::new(IdGenerator::from_counters(snapshot.id_counters)),
        );
        let catalog = Arc::new(RuleCatalog::restore(ctx.clone(), snapshot.rules, snapshot.packs));
        let incidents = Arc::new(IncidentManager::restore(
            config.incidents.clone(),
            ctx.clone(),
            snapshot.incidents,
            snapshot.correlated_signals,
        ));
        let pipeline = Pipeline {
            evaluator: Arc::new(EvaluationEngine::restore(
                catalog.clone(),
                source,
                config.evaluation.clone(),
                ctx.clone(),
                snapshot.evaluations,
            )),
            detector: Arc::new(AnomalyDetector::restore(
                config.anomaly.clone(),
                ctx.clone(),
                snapshot.detector,
            )),
            remediation: Arc::new(RemediationTracker::restore(
                config.remediation.clone(),
                incidents.clone(),
                ctx.clone(),
                snapshot.tasks,
            )),
            incidents,
            catalog,
        };
        let scheduler = MonitoringScheduler::restore(
            config.monitoring.clone(),
            pipeline.clone(),
            ctx.clone(),
            snapshot.pairs,
            snapshot.ledger,
        );
        let integrity = IntegrityGuard::restore(
            pipeline.clone(),
            ctx.clone(),
            snapshot.schema_version,
            snapshot.baselines,
            snapshot.integrity_reports,
        );

        Self {
            config,
            layout,
            initialized: AtomicBool::new(snapshot.initialized),
            ctx,
            pipeline,
            scheduler,
            integrity,
            last_cycle: RwLock::new(snapshot.last_cycle),
        }
    }

    pub fn snapshot(&self) -> EngineSnapshot {
        EngineSnapshot {
            schema_version: self.integrity.schema_version(),
            initialized: self.is_initialized(),
            saved_at: Some(self.ctx.now()),
            id_counters: self.ctx.ids.counters(),
            rules: self.pipeline.catalog.rules(),
            packs: self.pipeline.catalog.packs(),
            evaluations: self.pipeline.evaluator.results(),
            detector: self.pipeline.detector.state(),
            incidents: self.pipeline.incidents.incidents(),
            correlated_signals: self.pipeline.incidents.correlated_ids(),
            tasks: self.pipeline.remediation.tasks(),
            pairs: self.scheduler.pairs(),
            ledger: self.scheduler.ledger(),
            last_cycle: self.last_cycle(),
            baselines: self.integrity.baselines(),
            integrity_reports: self.integrity.reports(),
            audit: self.ctx.audit.records(),
        }
    }

    /// Write the state file. Returns its path, or `None` for an engine without a project.
    pub fn save(&self) -> Result<Option<PathBuf>> {
        let Some(layout) = &self.layout else {
            return Ok(None);
        };
        let start = Instant::now();
        save_state(&layout.state_path, &self.snapshot())?;
        debug!(path = ?layout.state_path, elapsed = ?start.elapsed(), "state persisted");
        Ok(Some(layout.state_path.clone()))
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn catalog(&self) -> &Arc<RuleCatalog> {
        &self.pipeline.catalog
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::SeqCst)
    }

    // --- Lifecycle ---

    /// Load rule definitions from the project (new ids only) and register the
    /// configured pairs whose pack exists. Safe to run again.
    #[instrument(skip(self))]
    pub fn setup(&self, actor: &str) -> Result<SetupReport> {
        let definitions = match &self.layout {
            Some(layout) => load_rule_definitions(&layout.root, &layout.rule_paths)?,
            None => Vec::new(),
        };

        let mut rules_created = Vec::new();
        let mut rules_existing = 0;
        for def in definitions {
            if self.pipeline.catalog.rule(&def.id).is_ok() {
                rules_existing += 1;
                continue;
            }
            let rule = self.pipeline.catalog.create_rule(def, actor)?;
            rules_created.push(rule.id);
        }

        let mut pairs_registered = Vec::new();
        let mut pairs_pending = Vec::new();
        for pair in &self.config.monitoring.pairs {
            if self.pipeline.catalog.pack(&pair.pack).is_err() {
                warn!(%pair, "pack not created yet, pair left pending");
                pairs_pending.push(pair.clone());
                continue;
            }
            if self.scheduler.register_pair(&pair.pack, &pair.asset, actor)? {
                pairs_registered.push(pair.clone());
            }
        }

        let was = self.initialized.swap(true, Ordering::SeqCst);
        self.ctx.record(
            EntityKind::Engine,
            "engine",
            actor,
            "setup",
            Some(if was { "initialized" } else { "uninitialized" }.to_string()),
            "initialized".to_string(),
        );
        info!(
            created = rules_created.len(),
            existing = rules_existing,
            pairs = pairs_registered.len(),
            pending = pairs_pending.len(),
            "🛠️  setup complete"
        );
        Ok(SetupReport {
            rules_created,
            rules_existing,
            pairs_registered,
            pairs_pending,
            schema_version: self.integrity.schema_version(),
        })
    }

    pub async fn health_status(&self) -> HealthStatus {
        let (assets, source_error) = match self.pipeline.evaluator.source().list_assets().await {
            Ok(assets) => (assets, None),
            Err(e) => (Vec::new(), Some(e.to_string())),
        };
        let rules = self.pipeline.catalog.rules();
        let packs = self.pipeline.catalog.packs();
        let last = self.last_cycle();
        HealthStatus {
            initialized: self.is_initialized(),
            schema_version: self.integrity.schema_version(),
            latest_schema_version: LATEST_SCHEMA_VERSION,
            source: self.pipeline.evaluator.source_name().to_string(),
            source_error,
            assets,
            approved_rules: rules
                .iter()
                .filter(|r| r.versions.iter().any(|v| v.state == ApprovalState::Approved))
                .count(),
            rules: rules.len(),
            active_packs: packs.iter().filter(|p| p.state == PackState::Active).count(),
            packs: packs.len(),
            monitored_pairs: self.scheduler.pairs().len(),
            evaluations: self.pipeline.evaluator.len(),
            signals: self.pipeline.detector.signals().len(),
            active_incidents: self
                .pipeline
                .incidents
                .incidents()
                .iter()
                .filter(|i| i.status.is_active())
                .count(),
            open_tasks: self.pipeline.remediation.open_count(),
            audit_records: self.ctx.audit.len(),
            last_cycle: last.as_ref().map(|c| c.label.clone()),
            last_cycle_at: last.map(|c| c.finished_at),
        }
    }

    pub async fn readiness(&self) -> ReadinessReport {
        let mut checks = Vec::new();
        checks.push(ReadinessCheck {
            name: "initialized",
            passed: self.is_initialized(),
            detail: "setup has run".into(),
        });

        let active: Vec<String> = self
            .pipeline
            .catalog
            .packs()
            .into_iter()
            .filter(|p| p.state == PackState::Active)
            .map(|p| p.id)
            .collect();
        checks.push(ReadinessCheck {
            name: "active_pack",
            passed: !active.is_empty(),
            detail: if active.is_empty() {
                "no active rule pack".into()
            } else {
                active.join(", ")
            },
        });

        let assets = self.pipeline.evaluator.source().list_assets().await;
        checks.push(ReadinessCheck {
            name: "source",
            passed: assets.is_ok(),
            detail: match &assets {
                Ok(a) => format!("{} asset(s) on {}", a.len(), self.pipeline.evaluator.source_name()),
                Err(e) => e.to_string(),
            },
        });

        let assets = assets.unwrap_or_default();
        for pair in self.scheduler.pairs() {
            let pack_active = active.contains(&pair.pack);
            let asset_known = assets.iter().any(|a| a.eq_ignore_ascii_case(&pair.asset));
            checks.push(ReadinessCheck {
                name: "monitored_pair",
                passed: pack_active && asset_known,
                detail: match (pack_active, asset_known) {
                    (true, true) => pair.to_string(),
                    (false, _) => format!("{}: pack is not active", pair),
                    (true, false) => format!("{}: asset not found in source", pair),
                },
            });
        }
        ReadinessReport { checks }
    }

    /// Gate before turning monitoring on: fails with the unmet checks.
    pub async fn assert_ready_for_activation(&self) -> Result<ReadinessReport> {
        let report = self.readiness().await;
        if report.ready() {
            return Ok(report);
        }
        let failed: Vec<String> = report
            .checks
            .iter()
            .filter(|c| !c.passed)
            .map(|c| format!("{} ({})", c.name, c.detail))
            .collect();
        Err(DomainError::Precondition(format!("not ready for activation: {}", failed.join("; "))).into())
    }

    pub fn upgrade(&self, actor: &str) -> Result<IntegrityReport> {
        self.integrity.upgrade(actor)
    }

    // --- Rules and evaluation ---

    pub fn preview_rule_result(&self, rule_id: &str, sample: &Value) -> Result<bool> {
        self.pipeline.evaluator.preview_rule_result(rule_id, sample)
    }

    /// Manual evaluation. Shares the pair lock with monitoring cycles.
    #[instrument(skip(self))]
    pub async fn apply_rule_pack(&self, pack_id: &str, asset: &str) -> Result<EvaluationResult> {
        let start = Instant::now();
        let _guard = self.scheduler.lock_pair(&MonitoredPair::new(pack_id, asset)).await;
        let result = self.pipeline.evaluator.evaluate(pack_id, asset).await;
        match &result {
            Ok(r) => debug!(score = r.quality_score, elapsed = ?start.elapsed(), "✅ pack applied"),
            Err(e) => error!(error = %e, elapsed = ?start.elapsed(), "❌ pack application failed"),
        }
        result
    }

    pub fn evaluations(&self) -> Vec<EvaluationResult> {
        self.pipeline.evaluator.results()
    }

    pub fn evaluation(&self, id: &str) -> Result<EvaluationResult> {
        self.pipeline.evaluator.result(id)
    }

    // --- Anomalies and monitoring ---

    pub fn inject_synthetic_anomaly(&self, asset: &str, score: f64) -> Result<SyntheticObservation> {
        self.pipeline.detector.inject_synthetic_anomaly(asset, score)
    }

    /// Drain synthetic drills and analyze every evaluation not seen yet.
    pub fn detect_anomalies(&self) -> Vec<AnomalySignal> {
        self.pipeline
            .detector
            .detect_anomalies(&self.pipeline.evaluator.results())
    }

    pub fn signals(&self) -> Vec<AnomalySignal> {
        self.pipeline.detector.signals()
    }

    /// Fold every signal not correlated yet into incidents.
    pub async fn open_close_incidents(&self, actor: &str) -> CorrelationReport {
        let signals = self.pipeline.detector.signals();
        self.pipeline.incidents.correlate(&signals, actor).await
    }

    pub fn register_pair(&self, pack: &str, asset: &str, actor: &str) -> Result<bool> {
        self.scheduler.register_pair(pack, asset, actor)
    }

    pub fn unregister_pair(&self, pack: &str, asset: &str, actor: &str) -> Result<()> {
        self.scheduler.unregister_pair(pack, asset, actor)
    }

    pub fn pairs(&self) -> Vec<MonitoredPair> {
        self.scheduler.pairs()
    }

    pub async fn run_monitoring_cycle(&self, label: &str) -> Result<CycleReport> {
        let report = self.scheduler.run_cycle(label).await?;
        *self.last_cycle.write().unwrap_or_else(PoisonError::into_inner) = Some(report.clone());
        Ok(report)
    }

    pub fn last_cycle(&self) -> Option<CycleReport> {
        self.last_cycle
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Periodic cycles until `shutdown` is raised. State is saved after each cycle.
    pub async fn run_scheduled(
        &self,
        every: Duration,
        label_prefix: &str,
        shutdown: Arc<AtomicBool>,
        max_cycles: Option<u64>,
    ) -> u64 {
        self.scheduler
            .run_scheduled(every, label_prefix, shutdown, max_cycles, |report| {
                *self.last_cycle.write().unwrap_or_else(PoisonError::into_inner) = Some(report.clone());
                if let Err(e) = self.save() {
                    error!(error = %e, "could not persist state after cycle");
                }
            })
            .await
    }

    // --- Incidents ---

    pub fn incidents(&self) -> Vec<Incident> {
        self.pipeline.incidents.incidents()
    }

    pub fn incident(&self, id: &str) -> Result<Incident> {
        self.pipeline.incidents.get(id)
    }

    pub fn acknowledge_incident(&self, id: &str, actor: &str) -> Result<Incident> {
        self.pipeline.incidents.acknowledge(id, actor)
    }

    pub fn resolve_incident(&self, id: &str, actor: &str, note: &str) -> Result<Incident> {
        self.pipeline.incidents.resolve(id, actor, note)
    }

    pub fn close_incident(&self, id: &str, actor: &str) -> Result<Incident> {
        self.pipeline.incidents.close(id, actor)
    }

    // --- Remediation ---

    pub fn create_task(&self, incident_id: &str, description: &str, assignee: &str) -> Result<RemediationTask> {
        self.pipeline
            .remediation
            .create_task(incident_id, description, assignee)
    }

    pub fn create_task_for_latest_incident(
        &self,
        asset: &str,
        description: &str,
        assignee: &str,
    ) -> Result<RemediationTask> {
        self.pipeline
            .remediation
            .create_task_for_latest_incident(asset, description, assignee)
    }

    pub fn update_remediation_status(
        &self,
        task_id: &str,
        expected_version: Option<u64>,
        status: TaskStatus,
        note: &str,
    ) -> Result<RemediationTask> {
        self.pipeline
            .remediation
            .update_status(task_id, expected_version, status, note)
    }

    pub fn reassign_task(
        &self,
        task_id: &str,
        expected_version: Option<u64>,
        assignee: &str,
    ) -> Result<RemediationTask> {
        self.pipeline
            .remediation
            .reassign(task_id, expected_version, assignee)
    }

    pub fn complete_remediation_task(&self, task_id: &str, evidence: &str) -> Result<RemediationTask> {
        self.pipeline.remediation.complete_task(task_id, evidence)
    }

    pub fn get_remediation_summary(&self) -> RemediationSummary {
        self.pipeline.remediation.summary()
    }

    pub fn tasks(&self) -> Vec<RemediationTask> {
        self.pipeline.remediation.tasks()
    }

    pub fn task(&self, id: &str) -> Result<RemediationTask> {
        self.pipeline.remediation.task(id)
    }

    // --- Integrity ---

    pub fn export_diagnostics(&self, hours: u32) -> Result<DiagnosticsReport> {
        self.integrity.export_diagnostics(hours)
    }

    pub fn capture_migration_baseline(&self, actor: &str) -> Result<MigrationBaseline> {
        self.integrity.capture_baseline(actor)
    }

    pub fn validate_migration_integrity(&self, baseline_id: Option<&str>) -> Result<IntegrityReport> {
        self.integrity.validate_integrity(baseline_id)
    }

    pub fn schema_version(&self) -> u32 {
        self.integrity.schema_version()
    }

    pub fn audit_history(&self, kind: EntityKind, entity_id: &str) -> Vec<AuditRecord> {
        self.ctx.audit.history(kind, entity_id)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::domain::catalog::RuleDefinition;
    use crate::domain::evaluation::RulePredicate;
    use crate::infrastructure::adapters::InMemorySource;
    use serde_json::json;

    fn engine() -> Engine {
        let source = Arc::new(InMemorySource::new());
        source.put_json("RAW.CUSTOMER", vec![json!({"EMAIL": "a@x.io"}), json!({"EMAIL": "nope"})]);
        Engine::with_source(EngineConfig::default(), source, Arc::new(SystemClock))
    }

    fn approve_email(engine: &Engine) {
        let catalog = engine.catalog();
        catalog
            .create_rule(
                RuleDefinition {
                    id: "email_valid".into(),
                    name: "Email is valid".into(),
                    description: None,
                    target_asset_type: "table".into(),
                    predicate: RulePredicate::Email { column: "EMAIL".into() },
                },
                "author",
            )
            .unwrap();
        catalog.submit_for_approval("email_valid", "author").unwrap();
        catalog.approve("email_valid", "reviewer").unwrap();
        catalog.create_pack("baseline_pack", "admin").unwrap();
        catalog.add_rule_version("baseline_pack", "email_valid", 1, "admin").unwrap();
        catalog.promote("baseline_pack", "admin").unwrap();
    }

    #[tokio::test]
    async fn test_fresh_engine_is_not_ready() {
        let engine = engine();
        assert!(!engine.health_status().await.healthy());
        assert!(engine.assert_ready_for_activation().await.is_err());

        engine.setup("admin").unwrap();
        approve_email(&engine);
        engine.register_pair("baseline_pack", "RAW.CUSTOMER", "admin").unwrap();
        let report = engine.assert_ready_for_activation().await.unwrap();
        assert!(report.ready());
    }

    #[tokio::test]
    async fn test_snapshot_restores_every_service() {
        let engine = engine();
        engine.setup("admin").unwrap();
        approve_email(&engine);
        let result = engine.apply_rule_pack("baseline_pack", "RAW.CUSTOMER").await.unwrap();
        assert_eq!(result.quality_score, 0.5);

        let snapshot = engine.snapshot();
        let json = serde_json::to_string(&snapshot).unwrap();
        let back: EngineSnapshot = serde_json::from_str(&json).unwrap();
        let restored = Engine::restore(
            EngineConfig::default(),
            Arc::new(InMemorySource::new()),
            Arc::new(SystemClock),
            back,
        );

        assert!(restored.is_initialized());
        assert_eq!(restored.evaluations().len(), 1);
        assert_eq!(restored.catalog().rules().len(), 1);
        let baseline = restored.capture_migration_baseline("admin").unwrap();
        assert_eq!(baseline.id, "MB-000001");
        assert!(restored.validate_migration_integrity(None).unwrap().passed());
        assert_eq!(restored.snapshot().audit.len(), snapshot.audit.len() + 1);
    }

    #[test]
    fn test_engine_without_project_saves_nothing() {
        assert!(engine().save().unwrap().is_none());
    }
}
