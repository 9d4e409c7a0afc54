// vigil-core/src/application/ids.rs

use std::collections::BTreeMap;
use std::sync::{Mutex, PoisonError};

/// Sequential, prefixed identifiers (`EVAL-000042`). Counters survive restarts
/// through the state file.
#[derive(Debug, Default)]
pub struct IdGenerator {
    counters: Mutex<BTreeMap<String, u64>>,
}

impl IdGenerator {
    pub fn from_counters(counters: BTreeMap<String, u64>) -> Self {
        Self {
            counters: Mutex::new(counters),
        }
    }

    pub fn next(&self, prefix: &str) -> String {
        let mut counters = self.counters.lock().unwrap_or_else(PoisonError::into_inner);
        let n = counters.entry(prefix.to_string()).or_insert(0);
        *n += 1;
        format!("{}-{:06}", prefix, n)
    }

    pub fn counters(&self) -> BTreeMap<String, u64> {
        self.counters
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}
