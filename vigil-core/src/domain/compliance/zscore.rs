// vigil-core/src/domain/compliance/zscore.rs

use thiserror::Error;

use super::baseline::Baseline;
use super::signal::Severity;
use crate::domain::project::AnomalyConfig;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ZScoreError {
    #[error(
        "Z-Score anomaly detected on '{metric}': Score {z_score:.2} exceeds threshold {threshold:.2}. State: Mean {mean:.4}, StdDev {stddev:.4}, Current {current:.4}"
    )]
    AnomalyDetected {
        metric: String,
        z_score: f64,
        threshold: f64,
        current: f64,
        mean: f64,
        stddev: f64,
        severity: Severity,
    },
    #[error("Not enough history for Z-Score check on '{metric}' ({count}/{required} samples)")]
    NotEnoughHistory {
        metric: String,
        count: u64,
        required: u64,
    },
}

/// How far an observation sits from its baseline.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Deviation {
    pub z_score: f64,
    pub expected_low: f64,
    pub expected_high: f64,
}

pub struct ZScoreCheck;

impl ZScoreCheck {
    /// Distance in standard deviations. σ is floored at `min_stddev` so a perfectly
    /// flat history still yields a finite score.
    pub fn deviation(current_value: f64, state: &Baseline, policy: &AnomalyConfig) -> Deviation {
        let stddev = state.stddev().max(policy.min_stddev);
        let half_width = policy.z_threshold * stddev;
        Deviation {
            z_score: ((current_value - state.mean) / stddev).abs(),
            expected_low: (state.mean - half_width).max(0.0),
            expected_high: (state.mean + half_width).min(1.0),
        }
    }

    pub fn severity(z_score: f64, policy: &AnomalyConfig) -> Severity {
        if z_score >= policy.critical_z {
            Severity::Critical
        } else if z_score >= policy.major_z {
            Severity::Major
        } else {
            Severity::Minor
        }
    }

    /// Checks a new value against the historical distribution.
    /// Does NOT modify state: call `Baseline::observe` only if you accept the value.
    pub fn validate(
        metric_name: &str,
        current_value: f64,
        state: &Baseline,
        policy: &AnomalyConfig,
    ) -> Result<(), ZScoreError> {
        if state.count < policy.min_samples {
            return Err(ZScoreError::NotEnoughHistory {
                metric: metric_name.to_string(),
                count: state.count,
                required: policy.min_samples,
            });
        }

        let dev = Self::deviation(current_value, state, policy);
        if dev.z_score > policy.z_threshold {
            return Err(ZScoreError::AnomalyDetected {
                metric: metric_name.to_string(),
                z_score: dev.z_score,
                threshold: policy.z_threshold,
                current: current_value,
                mean: state.mean,
                stddev: state.stddev(),
                severity: Self::severity(dev.z_score, policy),
            });
        }
        Ok(())
    }

    /// Validates THEN updates state if clean.
    /// Returns the result and the new state (unchanged if anomaly detected).
    pub fn validate_and_update(
        metric_name: &str,
        current_value: f64,
        previous_state: Option<Baseline>,
        policy: &AnomalyConfig,
    ) -> (Result<(), ZScoreError>, Baseline) {
        let state = previous_state.unwrap_or_default();
        let res = Self::validate(metric_name, current_value, &state, policy);

        // Only clean values (or warm-up values) are ingested, so an anomaly never
        // pollutes the historical mean/variance.
        let new_state = match &res {
            Ok(()) | Err(ZScoreError::NotEnoughHistory { .. }) => {
                let mut next = state;
                next.observe(current_value);
                next
            }
            Err(ZScoreError::AnomalyDetected { .. }) => state,
        };

        (res, new_state)
    }
}
