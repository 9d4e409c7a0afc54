// vigil-core/src/domain/evaluation/result.rs

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::predicate::PassCounts;
use crate::domain::compliance::SignalScope;

/// Outcome of one rule version inside an evaluation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleOutcome {
    pub rule_id: String,
    pub version: u32,
    pub passed: u64,
    pub failed: u64,
    pub evaluated: u64,
    pub pass_ratio: f64,
    /// Set when the rule could not run (malformed data, timeout). The ratio is then 0.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub error: Option<String>,
}

impl RuleOutcome {
    pub fn from_counts(rule_id: &str, version: u32, counts: PassCounts) -> Self {
        Self {
            rule_id: rule_id.to_string(),
            version,
            passed: counts.passed,
            failed: counts.failed,
            evaluated: counts.evaluated(),
            pass_ratio: counts.ratio(),
            error: None,
        }
    }

    pub fn failed_execution(rule_id: &str, version: u32, error: impl Into<String>) -> Self {
        Self {
            rule_id: rule_id.to_string(),
            version,
            passed: 0,
            failed: 0,
            evaluated: 0,
            pass_ratio: 0.0,
            error: Some(error.into()),
        }
    }

    pub fn is_failure(&self) -> bool {
        self.error.is_some()
    }
}

/// One run of a pack against an asset. Written once, never updated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationResult {
    pub id: String,
    pub pack_id: String,
    pub pack_revision: u32,
    pub asset: String,
    pub run_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub cycle_label: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub bucket: Option<DateTime<Utc>>,
    pub rules: Vec<RuleOutcome>,
    pub records_evaluated: u64,
    /// Σ passed / Σ evaluated across rules.
    pub pass_ratio: f64,
    /// Weighted mean of per-rule ratios, in [0, 1].
    pub quality_score: f64,
    /// At least one rule failed to execute.
    pub partial: bool,
    /// The source did not answer in time; rule outcomes are placeholders.
    #[serde(default)]
    pub timed_out: bool,
}

impl EvaluationResult {
    /// Per-rule ratios plus the pack's aggregate score, as anomaly metrics.
    pub fn metrics(&self) -> Vec<(SignalScope, f64)> {
        let mut out: Vec<(SignalScope, f64)> = self
            .rules
            .iter()
            .map(|r| (SignalScope::Rule(r.rule_id.clone()), r.pass_ratio))
            .collect();
        out.push((SignalScope::Aggregate(self.pack_id.clone()), self.quality_score));
        out
    }

    pub fn rule(&self, rule_id: &str) -> Option<&RuleOutcome> {
        self.rules.iter().find(|r| r.rule_id == rule_id)
    }
}

/// Combine per-rule ratios into one score. Rules without an explicit weight count as 1.0.
/// An empty pack scores 1.0.
pub fn quality_score(outcomes: &[RuleOutcome], weights: &HashMap<String, f64>) -> f64 {
    let (mut weighted, mut total) = (0.0, 0.0);
    for outcome in outcomes {
        let w = weights.get(&outcome.rule_id).copied().unwrap_or(1.0).max(0.0);
        weighted += w * outcome.pass_ratio;
        total += w;
    }
    if total <= f64::EPSILON {
        return 1.0;
    }
    (weighted / total).clamp(0.0, 1.0)
}

pub(crate) fn aggregate_pass_ratio(outcomes: &[RuleOutcome]) -> f64 {
    let passed: u64 = outcomes.iter().map(|o| o.passed).sum();
    let evaluated: u64 = outcomes.iter().map(|o| o.evaluated).sum();
    if evaluated == 0 {
        // Nothing ran: full pass unless some rule failed outright.
        return if outcomes.iter().any(RuleOutcome::is_failure) {
            0.0
        } else {
            1.0
        };
    }
    passed as f64 / evaluated as f64
}
