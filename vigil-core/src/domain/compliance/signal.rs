// vigil-core/src/domain/compliance/signal.rs

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Clone, Copy, Hash, Default)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    #[default]
    Minor,
    Major,
    Critical,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Severity::Minor => "minor",
            Severity::Major => "major",
            Severity::Critical => "critical",
        };
        f.write_str(s)
    }
}

/// What a metric measures: one rule's pass ratio, or the quality score of one
/// pack. Packs sharing an asset keep separate aggregate baselines.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalScope {
    /// Pack id.
    Aggregate(String),
    Rule(String),
    /// Operator drills. No evaluation ever reports this scope.
    Synthetic,
}

impl fmt::Display for SignalScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SignalScope::Aggregate(pack) => write!(f, "aggregate:{}", pack),
            SignalScope::Rule(id) => write!(f, "rule:{}", id),
            SignalScope::Synthetic => f.write_str("synthetic"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnomalySignal {
    pub id: String,
    pub asset: String,
    pub scope: SignalScope,
    pub observed_at: DateTime<Utc>,
    pub observed: f64,
    pub expected_low: f64,
    pub expected_high: f64,
    pub z_score: f64,
    pub severity: Severity,
    /// Injected for drills; never touches a baseline.
    pub synthetic: bool,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub evaluation_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub cycle_label: Option<String>,
}

/// A drill requested by an operator, turned into a signal on the next detection pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyntheticObservation {
    pub asset: String,
    pub score: f64,
    pub requested_at: DateTime<Utc>,
}
