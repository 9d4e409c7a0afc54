// vigil-core/src/application/monitoring.rs

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::StreamExt;
use tokio::sync::OwnedMutexGuard;
use tokio::time::MissedTickBehavior;
use tracing::{error, info, instrument, warn};

use crate::application::anomaly::AnomalyDetector;
use crate::application::catalog::RuleCatalog;
use crate::application::context::ServiceContext;
use crate::application::evaluation::{CycleTag, EvaluationEngine};
use crate::application::incidents::IncidentManager;
use crate::application::locks::KeyedLocks;
use crate::application::remediation::RemediationTracker;
use crate::domain::audit::EntityKind;
use crate::domain::catalog::PackState;
use crate::domain::compliance::{AnomalySignal, SignalScope};
use crate::domain::error::DomainError;
use crate::domain::evaluation::EvaluationResult;
use crate::domain::monitoring::{
    CycleKey, CycleReport, LedgerEntry, MonitoredPair, PairOutcome, PairStatus, bucket_start,
};
use crate::domain::project::MonitoringConfig;
use crate::error::Result;

const ACTOR: &str = "scheduler";

/// Services a cycle drives, in data-flow order.
#[derive(Clone)]
pub struct Pipeline {
    pub catalog: Arc<RuleCatalog>,
    pub evaluator: Arc<EvaluationEngine>,
    pub detector: Arc<AnomalyDetector>,
    pub incidents: Arc<IncidentManager>,
    pub remediation: Arc<RemediationTracker>,
}

struct PairRun {
    outcome: PairOutcome,
    /// Present only when this run committed a fresh evaluation.
    committed: Option<(EvaluationResult, Vec<AnomalySignal>)>,
}

pub struct MonitoringScheduler {
    config: MonitoringConfig,
    pairs: RwLock<BTreeSet<MonitoredPair>>,
    ledger: RwLock<HashMap<CycleKey, LedgerEntry>>,
    pair_locks: KeyedLocks,
    pipeline: Pipeline,
    ctx: ServiceContext,
}

impl MonitoringScheduler {
    pub fn new(config: MonitoringConfig, pipeline: Pipeline, ctx: ServiceContext) -> Self {
        Self::restore(config, pipeline, ctx, Vec::new(), Vec::new())
    }

    pub fn restore(
        config: MonitoringConfig,
        pipeline: Pipeline,
        ctx: ServiceContext,
        pairs: Vec<MonitoredPair>,
        ledger: Vec<LedgerEntry>,
    ) -> Self {
        Self {
            config,
            pairs: RwLock::new(pairs.into_iter().collect()),
            ledger: RwLock::new(ledger.into_iter().map(|e| (e.key.clone(), e)).collect()),
            pair_locks: KeyedLocks::new(),
            pipeline,
            ctx,
        }
    }

    /// Returns false when the pair was already registered.
    pub fn register_pair(&self, pack: &str, asset: &str, actor: &str) -> Result<bool> {
        self.pipeline.catalog.pack(pack)?;
        if asset.trim().is_empty() {
            return Err(DomainError::Precondition("asset is empty".into()).into());
        }
        let pair = MonitoredPair::new(pack, asset);
        let added = self
            .pairs
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(pair.clone());
        if added {
            self.ctx.record(
                EntityKind::Engine,
                "monitoring",
                actor,
                &format!("register {}", pair),
                None,
                format!("pairs:{}", self.pairs().len()),
            );
            info!(%pair, "pair registered for monitoring");
        }
        Ok(added)
    }

    pub fn unregister_pair(&self, pack: &str, asset: &str, actor: &str) -> Result<()> {
        let pair = MonitoredPair::new(pack, asset);
        let removed = self
            .pairs
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&pair);
        if !removed {
            return Err(DomainError::not_found("monitored pair", pair.to_string()).into());
        }
        self.ctx.record(
            EntityKind::Engine,
            "monitoring",
            actor,
            &format!("unregister {}", pair),
            None,
            format!("pairs:{}", self.pairs().len()),
        );
        info!(%pair, "pair unregistered");
        Ok(())
    }

    /// Exclusive access to one pair, shared with manual evaluations.
    pub async fn lock_pair(&self, pair: &MonitoredPair) -> OwnedMutexGuard<()> {
        self.pair_locks.acquire(&pair.lock_key()).await
    }

    pub fn pairs(&self) -> Vec<MonitoredPair> {
        self.pairs
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .cloned()
            .collect()
    }

    pub fn ledger(&self) -> Vec<LedgerEntry> {
        let mut entries: Vec<LedgerEntry> = self
            .ledger
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect();
        entries.sort_by(|a, b| a.key.cmp(&b.key));
        entries
    }

    /// One pass over every registered pair. Re-running the same label inside the
    /// same bucket re-evaluates nothing.
    #[instrument(skip(self))]
    pub async fn run_cycle(&self, label: &str) -> Result<CycleReport> {
        if label.trim().is_empty() {
            return Err(DomainError::Precondition("cycle label is empty".into()).into());
        }
        let started_at = self.ctx.now();
        let bucket = bucket_start(started_at, self.config.bucket_seconds);
        let pairs = self.pairs();
        info!(label, pairs = pairs.len(), %bucket, "🔄 monitoring cycle started");

        let runs = pairs
            .into_iter()
            .map(|pair| self.run_pair(pair, label, bucket));
        let mut runs: Vec<PairRun> = futures::stream::iter(runs)
            .buffer_unordered(self.config.max_concurrency.max(1))
            .collect()
            .await;
        runs.sort_by(|a, b| a.outcome.pair.cmp(&b.outcome.pair));

        let signals: Vec<AnomalySignal> = runs
            .iter()
            .filter_map(|r| r.committed.as_ref())
            .flat_map(|(_, s)| s.iter().cloned())
            .collect();
        let correlation = self.pipeline.incidents.correlate(&signals, ACTOR).await;

        // A metric reported by several packs counts as one clean observation per
        // cycle, and none if any pack flagged it.
        let flagged: HashSet<(&str, &SignalScope)> = signals.iter().map(|s| (s.asset.as_str(), &s.scope)).collect();
        let clean: BTreeSet<(String, SignalScope)> = runs
            .iter()
            .filter_map(|r| r.committed.as_ref())
            .flat_map(|(result, _)| {
                result
                    .metrics()
                    .into_iter()
                    .map(|(scope, _)| (result.asset.clone(), scope))
            })
            .filter(|(asset, scope)| !flagged.contains(&(asset.as_str(), scope)))
            .collect();
        let mut auto_closed = correlation.auto_closed;
        for (asset, scope) in &clean {
            auto_closed.extend(self.pipeline.incidents.record_clean_observation(asset, scope, ACTOR));
        }

        let finished_at = self.ctx.now();
        let tasks_escalated = self.pipeline.remediation.escalate_stale(finished_at);

        let report = CycleReport {
            label: label.to_string(),
            bucket,
            started_at,
            finished_at,
            outcomes: runs.into_iter().map(|r| r.outcome).collect(),
            incidents_opened: correlation.opened,
            incidents_merged: correlation.merged,
            incidents_auto_closed: auto_closed,
            tasks_escalated,
        };
        info!(
            label,
            committed = report.count(PairStatus::Committed),
            skipped = report.count(PairStatus::Skipped),
            failed = report.count(PairStatus::Failed),
            opened = report.incidents_opened.len(),
            "✅ monitoring cycle finished"
        );
        Ok(report)
    }

    async fn run_pair(&self, pair: MonitoredPair, label: &str, bucket: DateTime<Utc>) -> PairRun {
        let mut outcome = PairOutcome {
            pair: pair.clone(),
            status: PairStatus::Inactive,
            attempts: 0,
            evaluation_id: None,
            quality_score: None,
            signal_ids: Vec::new(),
            error: None,
        };

        match self.pipeline.catalog.pack(&pair.pack) {
            Ok(pack) if pack.state == PackState::Active => {}
            Ok(_) => return PairRun { outcome, committed: None },
            Err(e) => {
                outcome.status = PairStatus::Failed;
                outcome.error = Some(e.to_string());
                return PairRun { outcome, committed: None };
            }
        }

        let _guard = self.lock_pair(&pair).await;
        let key = CycleKey {
            label: label.to_string(),
            pair: pair.clone(),
            bucket,
        };
        if let Some(entry) = self
            .ledger
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&key)
        {
            outcome.status = PairStatus::Skipped;
            outcome.evaluation_id = Some(entry.evaluation_id.clone());
            outcome.signal_ids = entry.signal_ids.clone();
            return PairRun { outcome, committed: None };
        }

        let tag = CycleTag {
            label: label.to_string(),
            bucket,
        };
        let max_attempts = self.config.max_retries + 1;
        loop {
            outcome.attempts += 1;
            let attempt = self
                .pipeline
                .evaluator
                .run(&pair.pack, &pair.asset, Some(tag.clone()))
                .await;
            match attempt {
                Ok(result) if result.timed_out && outcome.attempts < max_attempts => {
                    warn!(%pair, attempt = outcome.attempts, "evaluation timed out, retrying");
                }
                Ok(result) if result.timed_out => {
                    warn!(%pair, attempts = outcome.attempts, "evaluation timed out, giving up");
                    outcome.status = PairStatus::Failed;
                    outcome.evaluation_id = Some(result.id.clone());
                    outcome.error = Some(format!("timeout after {} attempt(s)", outcome.attempts));
                    self.pipeline.evaluator.record(result);
                    return PairRun { outcome, committed: None };
                }
                Ok(result) => {
                    let signals = self.commit(key, &result);
                    outcome.status = PairStatus::Committed;
                    outcome.evaluation_id = Some(result.id.clone());
                    outcome.quality_score = Some(result.quality_score);
                    outcome.signal_ids = signals.iter().map(|s| s.id.clone()).collect();
                    return PairRun {
                        outcome,
                        committed: Some((result, signals)),
                    };
                }
                Err(e) if e.is_retryable() && outcome.attempts < max_attempts => {
                    warn!(%pair, error = %e, "retrying");
                }
                Err(e) => {
                    error!(%pair, error = %e, "pair failed");
                    outcome.status = PairStatus::Failed;
                    outcome.error = Some(e.to_string());
                    return PairRun { outcome, committed: None };
                }
            }
        }
    }

    /// Result, baseline update, signals and ledger entry land together: no await
    /// in here, so a dropped cycle future cannot stop halfway.
    fn commit(&self, key: CycleKey, result: &EvaluationResult) -> Vec<AnomalySignal> {
        self.pipeline.evaluator.record(result.clone());
        let signals = self.pipeline.detector.observe(result);
        let entry = LedgerEntry {
            key: key.clone(),
            evaluation_id: result.id.clone(),
            signal_ids: signals.iter().map(|s| s.id.clone()).collect(),
            committed_at: self.ctx.now(),
        };
        self.ledger
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key, entry);
        signals
    }

    /// Run cycles every `every` until `shutdown` is raised or `max_cycles` ran.
    /// A failing cycle is logged and the loop goes on.
    pub async fn run_scheduled<F>(
        &self,
        every: Duration,
        label_prefix: &str,
        shutdown: Arc<AtomicBool>,
        max_cycles: Option<u64>,
        mut on_cycle: F,
    ) -> u64
    where
        F: FnMut(&CycleReport) + Send,
    {
        let mut ticker = tokio::time::interval(every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut ran = 0u64;
        info!(every = ?every, label_prefix, "scheduler started");

        while !shutdown.load(Ordering::Relaxed) {
            if max_cycles.is_some_and(|max| ran >= max) {
                break;
            }
            ticker.tick().await;
            if shutdown.load(Ordering::Relaxed) {
                break;
            }
            let label = format!("{}-{}", label_prefix, self.ctx.now().format("%Y%m%dT%H%M%S"));
            match self.run_cycle(&label).await {
                Ok(report) => on_cycle(&report),
                Err(e) => error!(label, error = %e, "scheduled cycle failed"),
            }
            ran += 1;
        }
        info!(cycles = ran, "scheduler stopped");
        ran
    }
}

/// Fresh services with one approved `email` rule on column EMAIL, packed into
/// the active pack `p`.
#[cfg(test)]
#[allow(clippy::unwrap_used)]
pub(crate) fn test_pipeline(
    ctx: ServiceContext,
    source: Arc<dyn crate::ports::source::AssetSource>,
    eval: crate::domain::project::EvaluationConfig,
) -> Pipeline {
    use crate::domain::catalog::RuleDefinition;
    use crate::domain::evaluation::RulePredicate;
    use crate::domain::project::{AnomalyConfig, IncidentConfig, RemediationConfig};

    let catalog = Arc::new(RuleCatalog::new(ctx.clone()));
    catalog
        .create_rule(
            RuleDefinition {
                id: "email".into(),
                name: "email".into(),
                description: None,
                target_asset_type: "table".into(),
                predicate: RulePredicate::Email { column: "EMAIL".into() },
            },
            "author",
        )
        .unwrap();
    catalog.submit_for_approval("email", "author").unwrap();
    catalog.approve("email", "reviewer").unwrap();
    catalog.create_pack("p", "admin").unwrap();
    catalog.add_rule_version("p", "email", 1, "admin").unwrap();
    catalog.promote("p", "admin").unwrap();

    let incidents = Arc::new(IncidentManager::new(IncidentConfig::default(), ctx.clone()));
    Pipeline {
        evaluator: Arc::new(EvaluationEngine::new(catalog.clone(), source, eval, ctx.clone())),
        detector: Arc::new(AnomalyDetector::new(AnomalyConfig::default(), ctx.clone())),
        remediation: Arc::new(RemediationTracker::new(
            RemediationConfig::default(),
            incidents.clone(),
            ctx,
        )),
        incidents,
        catalog,
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::application::context::test_context;
    use crate::domain::project::EvaluationConfig;
    use crate::infrastructure::adapters::InMemorySource;
    use serde_json::json;

    fn build(source: Arc<InMemorySource>, eval: EvaluationConfig, monitoring: MonitoringConfig) -> MonitoringScheduler {
        let ctx = test_context();
        let pipeline = test_pipeline(ctx.clone(), source, eval);
        MonitoringScheduler::new(monitoring, pipeline, ctx)
    }

    fn customers() -> Arc<InMemorySource> {
        let source = Arc::new(InMemorySource::new());
        source.put_json("A", vec![json!({"EMAIL": "a@x.io"}), json!({"EMAIL": "bad"})]);
        source.put_json("B", vec![json!({"EMAIL": "b@x.io"})]);
        source
    }

    #[tokio::test]
    async fn test_same_label_and_bucket_is_idempotent() {
        let scheduler = build(customers(), EvaluationConfig::default(), MonitoringConfig::default());
        scheduler.register_pair("p", "A", "admin").unwrap();
        scheduler.register_pair("p", "B", "admin").unwrap();

        let first = scheduler.run_cycle("nightly").await.unwrap();
        assert_eq!(first.count(PairStatus::Committed), 2);
        let second = scheduler.run_cycle("nightly").await.unwrap();
        assert_eq!(second.count(PairStatus::Skipped), 2);
        assert_eq!(scheduler.pipeline.evaluator.len(), 2);
        assert_eq!(scheduler.ledger().len(), 2);
        assert_eq!(first.outcomes[0].evaluation_id, second.outcomes[0].evaluation_id);
    }

    #[tokio::test]
    async fn test_one_failing_pair_does_not_abort_the_cycle() {
        let scheduler = build(customers(), EvaluationConfig::default(), MonitoringConfig::default());
        scheduler.register_pair("p", "A", "admin").unwrap();
        scheduler.register_pair("p", "MISSING", "admin").unwrap();

        let report = scheduler.run_cycle("c1").await.unwrap();
        assert_eq!(report.count(PairStatus::Committed), 1);
        assert_eq!(report.count(PairStatus::Failed), 1);
    }

    #[tokio::test]
    async fn test_timeouts_are_retried_then_reported() {
        let source = customers();
        source.set_delay("A", Some(Duration::from_millis(300)));
        let eval = EvaluationConfig {
            timeout_ms: 10,
            ..EvaluationConfig::default()
        };
        let monitoring = MonitoringConfig {
            max_retries: 2,
            ..MonitoringConfig::default()
        };
        let scheduler = build(source, eval, monitoring);
        scheduler.register_pair("p", "A", "admin").unwrap();

        let report = scheduler.run_cycle("c1").await.unwrap();
        let outcome = &report.outcomes[0];
        assert_eq!(outcome.status, PairStatus::Failed);
        assert_eq!(outcome.attempts, 3);
        // the last partial attempt is kept, nothing is committed to the ledger
        assert_eq!(scheduler.pipeline.evaluator.len(), 1);
        assert!(scheduler.ledger().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_pack_cannot_be_registered() {
        let scheduler = build(customers(), EvaluationConfig::default(), MonitoringConfig::default());
        assert!(scheduler.register_pair("nope", "A", "admin").is_err());
        assert!(scheduler.register_pair("p", "A", "admin").unwrap());
        assert!(!scheduler.register_pair("p", "A", "admin").unwrap());
        scheduler.unregister_pair("p", "A", "admin").unwrap();
        assert!(scheduler.unregister_pair("p", "A", "admin").is_err());
    }

    fn add_pack(scheduler: &MonitoringScheduler, pack: &str, rules: &[&str]) {
        use crate::domain::catalog::RuleDefinition;
        use crate::domain::evaluation::RulePredicate;

        let catalog = &scheduler.pipeline.catalog;
        if catalog.rule("not_null").is_err() {
            catalog
                .create_rule(
                    RuleDefinition {
                        id: "not_null".into(),
                        name: "not_null".into(),
                        description: None,
                        target_asset_type: "table".into(),
                        predicate: RulePredicate::NotNull { column: "EMAIL".into() },
                    },
                    "author",
                )
                .unwrap();
            catalog.submit_for_approval("not_null", "author").unwrap();
            catalog.approve("not_null", "reviewer").unwrap();
        }
        catalog.create_pack(pack, "admin").unwrap();
        for rule in rules {
            catalog.add_rule_version(pack, rule, 1, "admin").unwrap();
        }
        catalog.promote(pack, "admin").unwrap();
    }

    #[tokio::test]
    async fn test_second_pack_on_a_warm_asset_starts_its_own_baseline() {
        let scheduler = build(customers(), EvaluationConfig::default(), MonitoringConfig::default());
        scheduler.register_pair("p", "A", "admin").unwrap();
        for n in 0..5 {
            let report = scheduler.run_cycle(&format!("warm-{}", n)).await.unwrap();
            assert!(report.incidents_opened.is_empty());
        }

        // `p` scores 0.5 on A; `strict` scores 1.0 there from its first run.
        add_pack(&scheduler, "strict", &["not_null"]);
        scheduler.register_pair("strict", "A", "admin").unwrap();
        let report = scheduler.run_cycle("both").await.unwrap();
        assert_eq!(report.count(PairStatus::Committed), 2);
        assert!(report.incidents_opened.is_empty());
        assert!(scheduler.pipeline.incidents.incidents().is_empty());
        assert!(scheduler.pipeline.detector.signals().is_empty());
    }

    #[tokio::test]
    async fn test_shared_rule_counts_one_clean_cycle_per_cycle() {
        let scheduler = build(customers(), EvaluationConfig::default(), MonitoringConfig::default());
        add_pack(&scheduler, "q", &["email", "not_null"]);
        scheduler.register_pair("p", "A", "admin").unwrap();
        scheduler.register_pair("q", "A", "admin").unwrap();

        let signal = AnomalySignal {
            id: "SIG-0".into(),
            asset: "A".into(),
            scope: SignalScope::Rule("email".into()),
            observed_at: Utc::now(),
            observed: 0.1,
            expected_low: 0.4,
            expected_high: 0.6,
            z_score: 8.0,
            severity: crate::domain::compliance::Severity::Critical,
            synthetic: false,
            evaluation_id: None,
            cycle_label: None,
        };
        scheduler.pipeline.incidents.correlate(&[signal], "system").await;

        scheduler.run_cycle("c1").await.unwrap();
        let incidents = scheduler.pipeline.incidents.incidents();
        assert_eq!(incidents.len(), 1);
        assert_eq!(incidents[0].clean_cycles, 1);
    }

    #[tokio::test]
    async fn test_run_scheduled_stops_after_max_cycles() {
        let scheduler = build(customers(), EvaluationConfig::default(), MonitoringConfig::default());
        scheduler.register_pair("p", "A", "admin").unwrap();
        let mut seen = 0;
        let ran = scheduler
            .run_scheduled(
                Duration::from_millis(5),
                "tick",
                Arc::new(AtomicBool::new(false)),
                Some(2),
                |_| seen += 1,
            )
            .await;
        assert_eq!(ran, 2);
        assert_eq!(seen, 2);
    }
}
