// vigil-core/src/domain/compliance/detect.rs

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use super::baseline::{Baseline, BaselineKey};
use super::signal::{AnomalySignal, Severity, SignalScope, SyntheticObservation};
use super::zscore::{Deviation, ZScoreCheck, ZScoreError};
use crate::domain::evaluation::EvaluationResult;
use crate::domain::project::AnomalyConfig;

/// Everything the detector keeps between runs.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DetectorState {
    pub baselines: Vec<(BaselineKey, Baseline)>,
    pub signals: Vec<AnomalySignal>,
    pub pending_synthetic: Vec<SyntheticObservation>,
    /// Evaluation ids already observed.
    pub analyzed: Vec<String>,
}

/// A metric that left its expected range.
#[derive(Debug, Clone, PartialEq)]
pub struct Detection {
    pub scope: SignalScope,
    pub observed: f64,
    pub deviation: Deviation,
    pub severity: Severity,
}

/// Compare every metric of `result` with its baseline. Read-only.
pub fn detect(
    result: &EvaluationResult,
    baselines: &HashMap<BaselineKey, Baseline>,
    policy: &AnomalyConfig,
) -> Vec<Detection> {
    result
        .metrics()
        .into_iter()
        .filter_map(|(scope, observed)| {
            let key = BaselineKey::new(&result.asset, scope.clone());
            let state = baselines.get(&key)?;
            match ZScoreCheck::validate(&scope.to_string(), observed, state, policy) {
                Err(ZScoreError::AnomalyDetected { severity, .. }) => Some(Detection {
                    deviation: ZScoreCheck::deviation(observed, state, policy),
                    scope,
                    observed,
                    severity,
                }),
                _ => None,
            }
        })
        .collect()
}

/// Detect, then fold the clean observations into the baselines.
/// Flagged values are left out so one bad run does not widen the band.
pub fn detect_and_update(
    result: &EvaluationResult,
    baselines: &mut HashMap<BaselineKey, Baseline>,
    policy: &AnomalyConfig,
) -> Vec<Detection> {
    let mut found = Vec::new();
    for (scope, observed) in result.metrics() {
        let key = BaselineKey::new(&result.asset, scope.clone());
        let previous = baselines.get(&key).copied();
        let (res, next) =
            ZScoreCheck::validate_and_update(&scope.to_string(), observed, previous, policy);
        if let (Err(ZScoreError::AnomalyDetected { severity, .. }), Some(state)) = (&res, previous) {
            found.push(Detection {
                deviation: ZScoreCheck::deviation(observed, &state, policy),
                scope,
                observed,
                severity: *severity,
            });
        }
        baselines.insert(key, next);
    }
    found
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::domain::evaluation::{PassCounts, RuleOutcome};
    use chrono::Utc;

    fn result(score: f64) -> EvaluationResult {
        let passed = (score * 100.0).round() as u64;
        let outcome = RuleOutcome::from_counts(
            "email",
            1,
            PassCounts {
                passed,
                failed: 100 - passed,
            },
        );
        EvaluationResult {
            id: "EVAL-1".into(),
            pack_id: "p".into(),
            pack_revision: 1,
            asset: "A".into(),
            run_at: Utc::now(),
            cycle_label: None,
            bucket: None,
            rules: vec![outcome],
            records_evaluated: 100,
            pass_ratio: score,
            quality_score: score,
            partial: false,
            timed_out: false,
        }
    }

    #[test]
    fn test_warm_up_is_ingested_silently() {
        let policy = AnomalyConfig::default();
        let mut baselines = HashMap::new();
        for _ in 0..4 {
            assert!(detect_and_update(&result(0.95), &mut baselines, &policy).is_empty());
        }
        let key = BaselineKey::new("A", SignalScope::Aggregate("p".into()));
        assert_eq!(baselines[&key].count, 4);
    }

    #[test]
    fn test_outlier_flags_rule_and_aggregate_without_ingestion() {
        let policy = AnomalyConfig::default();
        let mut baselines = HashMap::new();
        for _ in 0..6 {
            detect_and_update(&result(0.95), &mut baselines, &policy);
        }
        let before = baselines.clone();

        assert_eq!(detect(&result(0.40), &baselines, &policy).len(), 2);
        let found = detect_and_update(&result(0.40), &mut baselines, &policy);
        assert_eq!(found.len(), 2);
        assert!(found.iter().all(|d| d.severity == Severity::Critical));
        assert_eq!(before, baselines);
    }
}
