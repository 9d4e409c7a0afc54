// vigil-core/src/application/evaluation.rs

use std::sync::{Arc, PoisonError, RwLock};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde_json::Value;
use tracing::{debug, info, instrument, warn};

use crate::application::catalog::{ResolvedPack, RuleCatalog};
use crate::application::context::ServiceContext;
use crate::domain::error::DomainError;
use crate::domain::evaluation::result::aggregate_pass_ratio;
use crate::domain::evaluation::{EvaluationResult, RuleOutcome, quality_score};
use crate::domain::project::EvaluationConfig;
use crate::error::Result;
use crate::ports::source::{AssetSource, Record};

/// Where a run comes from when the scheduler drives it.
#[derive(Debug, Clone)]
pub struct CycleTag {
    pub label: String,
    pub bucket: DateTime<Utc>,
}

/// Runs active packs against assets and keeps the results.
pub struct EvaluationEngine {
    catalog: Arc<RuleCatalog>,
    source: Arc<dyn AssetSource>,
    config: EvaluationConfig,
    results: RwLock<Vec<EvaluationResult>>,
    ctx: ServiceContext,
}

impl EvaluationEngine {
    pub fn new(
        catalog: Arc<RuleCatalog>,
        source: Arc<dyn AssetSource>,
        config: EvaluationConfig,
        ctx: ServiceContext,
    ) -> Self {
        Self::restore(catalog, source, config, ctx, Vec::new())
    }

    pub fn restore(
        catalog: Arc<RuleCatalog>,
        source: Arc<dyn AssetSource>,
        config: EvaluationConfig,
        ctx: ServiceContext,
        results: Vec<EvaluationResult>,
    ) -> Self {
        Self {
            catalog,
            source,
            config,
            results: RwLock::new(results),
            ctx,
        }
    }

    pub fn source_name(&self) -> &str {
        self.source.source_name()
    }

    pub fn source(&self) -> &Arc<dyn AssetSource> {
        &self.source
    }

    /// Evaluate without storing. A timeout is not an error here: the result comes
    /// back with `timed_out` set so the caller decides between retry and record.
    #[instrument(skip(self, tag))]
    pub async fn run(&self, pack_id: &str, asset: &str, tag: Option<CycleTag>) -> Result<EvaluationResult> {
        let resolved = self.catalog.resolve_active(pack_id)?;
        let start = Instant::now();
        let budget = Duration::from_millis(self.config.timeout_ms);

        let fetched = tokio::time::timeout(
            budget,
            self.source.fetch_records(asset, self.config.sample_limit),
        )
        .await;

        let result = match fetched {
            Ok(records) => {
                let records = records?;
                let outcomes = Self::score(&resolved, &records);
                self.assemble(&resolved, asset, tag, outcomes, records.len() as u64, false)
            }
            Err(_) => {
                warn!(pack = pack_id, asset, millis = self.config.timeout_ms, "evaluation timed out");
                let outcomes = resolved
                    .rules
                    .iter()
                    .map(|r| RuleOutcome::failed_execution(&r.rule_id, r.version, "timeout"))
                    .collect();
                self.assemble(&resolved, asset, tag, outcomes, 0, true)
            }
        };

        debug!(
            pack = pack_id,
            asset,
            score = result.quality_score,
            elapsed = ?start.elapsed(),
            "evaluation finished"
        );
        Ok(result)
    }

    fn score(resolved: &ResolvedPack, records: &[Record]) -> Vec<RuleOutcome> {
        resolved
            .rules
            .iter()
            .map(|r| match r.predicate.check_batch(records) {
                Ok(counts) => RuleOutcome::from_counts(&r.rule_id, r.version, counts),
                Err(e) => {
                    warn!(rule = %r.rule_id, error = %e, "rule could not run");
                    RuleOutcome::failed_execution(&r.rule_id, r.version, e.to_string())
                }
            })
            .collect()
    }

    fn assemble(
        &self,
        resolved: &ResolvedPack,
        asset: &str,
        tag: Option<CycleTag>,
        outcomes: Vec<RuleOutcome>,
        records_evaluated: u64,
        timed_out: bool,
    ) -> EvaluationResult {
        let (cycle_label, bucket) = match tag {
            Some(t) => (Some(t.label), Some(t.bucket)),
            None => (None, None),
        };
        EvaluationResult {
            id: self.ctx.next_id("EVAL"),
            pack_id: resolved.pack.id.clone(),
            pack_revision: resolved.pack.revision,
            asset: asset.to_string(),
            run_at: self.ctx.now(),
            cycle_label,
            bucket,
            records_evaluated,
            pass_ratio: aggregate_pass_ratio(&outcomes),
            quality_score: quality_score(&outcomes, &self.config.weights),
            partial: outcomes.iter().any(RuleOutcome::is_failure),
            timed_out,
            rules: outcomes,
        }
    }

    /// Results are immutable once stored.
    pub fn record(&self, result: EvaluationResult) {
        info!(
            id = %result.id,
            pack = %result.pack_id,
            asset = %result.asset,
            score = result.quality_score,
            partial = result.partial,
            "evaluation recorded"
        );
        self.results
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(result);
    }

    /// Run and store. A timeout stores the partial result and reports `Timeout`.
    pub async fn evaluate(&self, pack_id: &str, asset: &str) -> Result<EvaluationResult> {
        let result = self.run(pack_id, asset, None).await?;
        let timed_out = result.timed_out;
        self.record(result.clone());
        if timed_out {
            return Err(DomainError::Timeout {
                asset: asset.to_string(),
                millis: self.config.timeout_ms,
            }
            .into());
        }
        Ok(result)
    }

    /// Dry run of the latest version of a rule on one sample. A scalar is bound to
    /// the rule's column; an object is used as the record. Nothing is stored.
    pub fn preview_rule_result(&self, rule_id: &str, sample: &Value) -> Result<bool> {
        let rule = self.catalog.rule(rule_id)?;
        let compiled = rule.latest()?.compile()?;
        let record = match sample {
            Value::Object(map) => map.clone(),
            scalar => {
                let mut record = Record::new();
                record.insert(compiled.predicate().column().to_string(), scalar.clone());
                record
            }
        };
        match compiled.check_batch(std::slice::from_ref(&record)) {
            Ok(counts) => Ok(counts.failed == 0),
            Err(e) => {
                debug!(rule = rule_id, error = %e, "preview sample rejected");
                Ok(false)
            }
        }
    }

    pub fn results(&self) -> Vec<EvaluationResult> {
        self.results
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn result(&self, id: &str) -> Result<EvaluationResult> {
        self.results
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .find(|r| r.id == id)
            .cloned()
            .ok_or_else(|| DomainError::not_found("evaluation", id).into())
    }

    pub fn len(&self) -> usize {
        self.results.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
