// vigil-core/src/domain/monitoring.rs

use std::fmt;

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

pub use crate::domain::project::MonitoredPair;

impl fmt::Display for MonitoredPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.pack, self.asset)
    }
}

impl MonitoredPair {
    pub fn new(pack: &str, asset: &str) -> Self {
        Self {
            pack: pack.to_string(),
            asset: asset.to_string(),
        }
    }

    /// Key used for the per-pair lock.
    pub fn lock_key(&self) -> String {
        format!("{}::{}", self.pack, self.asset)
    }
}

/// Start of the bucket containing `at`.
pub fn bucket_start(at: DateTime<Utc>, bucket_seconds: u64) -> DateTime<Utc> {
    let width = i64::try_from(bucket_seconds.max(1)).unwrap_or(i64::MAX);
    let ts = at.timestamp();
    Utc.timestamp_opt(ts - ts.rem_euclid(width), 0)
        .single()
        .unwrap_or(at)
}

/// Identity of one unit of cycle work. Committed at most once.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CycleKey {
    pub label: String,
    pub pair: MonitoredPair,
    pub bucket: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub key: CycleKey,
    pub evaluation_id: String,
    pub signal_ids: Vec<String>,
    pub committed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PairStatus {
    Committed,
    /// Already committed for this label and bucket.
    Skipped,
    /// Pack is not active.
    Inactive,
    Failed,
}

impl fmt::Display for PairStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PairStatus::Committed => "committed",
            PairStatus::Skipped => "skipped",
            PairStatus::Inactive => "inactive",
            PairStatus::Failed => "failed",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PairOutcome {
    pub pair: MonitoredPair,
    pub status: PairStatus,
    pub attempts: u32,
    #[serde(default)]
    pub evaluation_id: Option<String>,
    #[serde(default)]
    pub quality_score: Option<f64>,
    #[serde(default)]
    pub signal_ids: Vec<String>,
    #[serde(default)]
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CycleReport {
    pub label: String,
    pub bucket: DateTime<Utc>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub outcomes: Vec<PairOutcome>,
    pub incidents_opened: Vec<String>,
    pub incidents_merged: Vec<String>,
    pub incidents_auto_closed: Vec<String>,
    pub tasks_escalated: Vec<String>,
}

impl CycleReport {
    pub fn count(&self, status: PairStatus) -> usize {
        self.outcomes.iter().filter(|o| o.status == status).count()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_bucket_start_truncates() {
        let at = Utc.with_ymd_and_hms(2026, 5, 4, 10, 42, 13).unwrap();
        assert_eq!(
            bucket_start(at, 3600),
            Utc.with_ymd_and_hms(2026, 5, 4, 10, 0, 0).unwrap()
        );
        assert_eq!(bucket_start(at, 1), at);
    }

    #[test]
    fn test_bucket_start_with_oversized_width_is_epoch() {
        let at = Utc.with_ymd_and_hms(2026, 5, 4, 10, 42, 13).unwrap();
        assert_eq!(bucket_start(at, u64::MAX), Utc.timestamp_opt(0, 0).unwrap());
    }
}
