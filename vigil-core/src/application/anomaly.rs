// vigil-core/src/application/anomaly.rs

use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, PoisonError, RwLock};

use tracing::{info, instrument, warn};

use crate::application::context::ServiceContext;
use crate::domain::compliance::{
    AnomalySignal, Baseline, BaselineKey, Detection, DetectorState, SignalScope, SyntheticObservation, ZScoreCheck,
    detect, detect_and_update,
};
use crate::domain::error::DomainError;
use crate::domain::evaluation::EvaluationResult;
use crate::domain::project::AnomalyConfig;
use crate::error::Result;

pub struct AnomalyDetector {
    policy: AnomalyConfig,
    baselines: RwLock<HashMap<BaselineKey, Baseline>>,
    signals: RwLock<Vec<AnomalySignal>>,
    pending: Mutex<Vec<SyntheticObservation>>,
    analyzed: RwLock<HashSet<String>>,
    ctx: ServiceContext,
}

impl AnomalyDetector {
    pub fn new(policy: AnomalyConfig, ctx: ServiceContext) -> Self {
        Self::restore(policy, ctx, DetectorState::default())
    }

    pub fn restore(policy: AnomalyConfig, ctx: ServiceContext, state: DetectorState) -> Self {
        Self {
            policy,
            baselines: RwLock::new(state.baselines.into_iter().collect()),
            signals: RwLock::new(state.signals),
            pending: Mutex::new(state.pending_synthetic),
            analyzed: RwLock::new(state.analyzed.into_iter().collect()),
            ctx,
        }
    }

    pub fn state(&self) -> DetectorState {
        let mut baselines: Vec<(BaselineKey, Baseline)> = self
            .baselines
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(k, v)| (k.clone(), *v))
            .collect();
        baselines.sort_by(|a, b| a.0.cmp(&b.0));
        let mut analyzed: Vec<String> = self
            .analyzed
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .cloned()
            .collect();
        analyzed.sort();
        DetectorState {
            baselines,
            signals: self.signals(),
            pending_synthetic: self.pending_synthetic(),
            analyzed,
        }
    }

    /// Compare a result with the current baselines without touching them.
    pub fn detect(&self, result: &EvaluationResult) -> Vec<Detection> {
        let baselines = self.baselines.read().unwrap_or_else(PoisonError::into_inner);
        detect(result, &baselines, &self.policy)
    }

    fn signal_for(&self, result: &EvaluationResult, d: Detection) -> AnomalySignal {
        AnomalySignal {
            id: self.ctx.next_id("SIG"),
            asset: result.asset.clone(),
            scope: d.scope,
            observed_at: result.run_at,
            observed: d.observed,
            expected_low: d.deviation.expected_low,
            expected_high: d.deviation.expected_high,
            z_score: d.deviation.z_score,
            severity: d.severity,
            synthetic: false,
            evaluation_id: Some(result.id.clone()),
            cycle_label: result.cycle_label.clone(),
        }
    }

    /// Detect against the stored baselines, then update them. Each result is
    /// analyzed once; timed-out results carry no measurement and are skipped.
    #[instrument(skip(self, result), fields(evaluation = %result.id, asset = %result.asset))]
    pub fn observe(&self, result: &EvaluationResult) -> Vec<AnomalySignal> {
        let mut analyzed = self.analyzed.write().unwrap_or_else(PoisonError::into_inner);
        if !analyzed.insert(result.id.clone()) || result.timed_out {
            return Vec::new();
        }

        let detections = {
            let mut baselines = self.baselines.write().unwrap_or_else(PoisonError::into_inner);
            detect_and_update(result, &mut baselines, &self.policy)
        };
        let signals: Vec<AnomalySignal> = detections
            .into_iter()
            .map(|d| self.signal_for(result, d))
            .collect();
        for s in &signals {
            warn!(
                signal = %s.id,
                scope = %s.scope,
                observed = s.observed,
                z = s.z_score,
                severity = %s.severity,
                "anomaly detected"
            );
        }
        self.signals
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .extend(signals.iter().cloned());
        signals
    }

    #[instrument(skip(self))]
    pub fn inject_synthetic_anomaly(&self, asset: &str, score: f64) -> Result<SyntheticObservation> {
        if asset.trim().is_empty() {
            return Err(DomainError::Precondition("asset is empty".into()).into());
        }
        if !(0.0..=1.0).contains(&score) {
            return Err(DomainError::Precondition(format!(
                "synthetic score {} is outside [0, 1]",
                score
            ))
            .into());
        }
        let obs = SyntheticObservation {
            asset: asset.to_string(),
            score,
            requested_at: self.ctx.now(),
        };
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(obs.clone());
        info!(asset, score, "synthetic anomaly queued");
        Ok(obs)
    }

    /// Turn queued drills into signals and analyze every result not seen yet.
    pub fn detect_anomalies(&self, results: &[EvaluationResult]) -> Vec<AnomalySignal> {
        let drained: Vec<SyntheticObservation> =
            std::mem::take(&mut *self.pending.lock().unwrap_or_else(PoisonError::into_inner));

        let mut out = Vec::new();
        for obs in drained {
            let baseline = self.asset_aggregate(&obs.asset);
            let (low, high, z) = if baseline.count > 0 {
                let d = ZScoreCheck::deviation(obs.score, &baseline, &self.policy);
                (d.expected_low, d.expected_high, d.z_score)
            } else {
                (0.0, 1.0, 0.0)
            };
            let signal = AnomalySignal {
                id: self.ctx.next_id("SIG"),
                asset: obs.asset.clone(),
                scope: SignalScope::Synthetic,
                observed_at: self.ctx.now(),
                observed: obs.score,
                expected_low: low,
                expected_high: high,
                z_score: z,
                severity: self.policy.synthetic_severity,
                synthetic: true,
                evaluation_id: None,
                cycle_label: None,
            };
            info!(signal = %signal.id, asset = %signal.asset, "synthetic signal raised");
            self.signals
                .write()
                .unwrap_or_else(PoisonError::into_inner)
                .push(signal.clone());
            out.push(signal);
        }

        let mut pending: Vec<&EvaluationResult> = results.iter().collect();
        pending.sort_by_key(|r| r.run_at);
        for result in pending {
            out.extend(self.observe(result));
        }
        out
    }

    pub fn signals(&self) -> Vec<AnomalySignal> {
        self.signals
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn signal_ids(&self) -> HashSet<String> {
        self.signals
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|s| s.id.clone())
            .collect()
    }

    pub fn pending_synthetic(&self) -> Vec<SyntheticObservation> {
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Every pack's aggregate baseline on `asset`, combined.
    fn asset_aggregate(&self, asset: &str) -> Baseline {
        self.baselines
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|(k, _)| k.asset == asset && matches!(k.scope, SignalScope::Aggregate(_)))
            .fold(Baseline::default(), |acc, (_, b)| acc.merge(b))
    }

    pub fn baseline(&self, asset: &str, scope: SignalScope) -> Option<Baseline> {
        self.baselines
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&BaselineKey::new(asset, scope))
            .copied()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::application::context::test_context;
    use crate::domain::compliance::Severity;
    use crate::domain::evaluation::{PassCounts, RuleOutcome};
    use chrono::Utc;

    fn result(id: &str, score: f64) -> EvaluationResult {
        result_for("p", id, score)
    }

    fn result_for(pack: &str, id: &str, score: f64) -> EvaluationResult {
        let passed = (score * 100.0).round() as u64;
        EvaluationResult {
            id: id.into(),
            pack_id: pack.into(),
            pack_revision: 1,
            asset: "RAW.CUSTOMER".into(),
            run_at: Utc::now(),
            cycle_label: None,
            bucket: None,
            rules: vec![RuleOutcome::from_counts(
                "email",
                1,
                PassCounts { passed, failed: 100 - passed },
            )],
            records_evaluated: 100,
            pass_ratio: score,
            quality_score: score,
            partial: false,
            timed_out: false,
        }
    }

    fn aggregate(pack: &str) -> SignalScope {
        SignalScope::Aggregate(pack.into())
    }

    #[test]
    fn test_each_result_is_observed_once() {
        let detector = AnomalyDetector::new(AnomalyConfig::default(), test_context());
        let r = result("EVAL-1", 0.9);
        detector.observe(&r);
        detector.observe(&r);
        let b = detector.baseline("RAW.CUSTOMER", aggregate("p")).unwrap();
        assert_eq!(b.count, 1);
    }

    #[test]
    fn test_drop_after_warm_up_raises_signals() {
        let detector = AnomalyDetector::new(AnomalyConfig::default(), test_context());
        for i in 0..5 {
            assert!(detector.observe(&result(&format!("EVAL-{}", i), 0.95)).is_empty());
        }
        let signals = detector.observe(&result("EVAL-X", 0.30));
        assert_eq!(signals.len(), 2);
        assert!(signals.iter().all(|s| !s.synthetic && s.severity == Severity::Critical));
        assert_eq!(signals[0].evaluation_id.as_deref(), Some("EVAL-X"));
    }

    #[test]
    fn test_synthetic_injection_never_touches_baselines() {
        let detector = AnomalyDetector::new(AnomalyConfig::default(), test_context());
        detector.observe(&result("EVAL-1", 0.9));
        let before = detector.baseline("RAW.CUSTOMER", aggregate("p"));

        detector.inject_synthetic_anomaly("RAW.CUSTOMER", 0.1).unwrap();
        let signals = detector.detect_anomalies(&[]);
        assert_eq!(signals.len(), 1);
        assert!(signals[0].synthetic);
        assert_eq!(signals[0].scope, SignalScope::Synthetic);
        assert_eq!(signals[0].severity, Severity::Major);
        assert_eq!(detector.baseline("RAW.CUSTOMER", aggregate("p")), before);
        assert!(detector.pending_synthetic().is_empty());
    }

    #[test]
    fn test_packs_on_one_asset_keep_separate_aggregates() {
        let detector = AnomalyDetector::new(AnomalyConfig::default(), test_context());
        for i in 0..5 {
            detector.observe(&result_for("lenient", &format!("EVAL-L{}", i), 0.5));
        }
        // A stricter pack scoring far from the first pack's mean is not an anomaly.
        let mut strict = result_for("strict", "EVAL-S0", 1.0);
        strict.rules[0].rule_id = "not_null".into();
        let signals = detector.observe(&strict);
        assert!(signals.is_empty(), "{:?}", signals);
        assert_eq!(detector.baseline("RAW.CUSTOMER", aggregate("lenient")).unwrap().count, 5);
        assert_eq!(detector.baseline("RAW.CUSTOMER", aggregate("strict")).unwrap().count, 1);
    }

    #[test]
    fn test_synthetic_score_must_be_a_ratio() {
        let detector = AnomalyDetector::new(AnomalyConfig::default(), test_context());
        assert!(detector.inject_synthetic_anomaly("A", 1.5).is_err());
        assert!(detector.inject_synthetic_anomaly("", 0.5).is_err());
    }

    #[test]
    fn test_timed_out_results_carry_no_measurement() {
        let detector = AnomalyDetector::new(AnomalyConfig::default(), test_context());
        let mut r = result("EVAL-1", 0.0);
        r.timed_out = true;
        detector.observe(&r);
        assert!(detector.baseline("RAW.CUSTOMER", aggregate("p")).is_none());
    }
}
