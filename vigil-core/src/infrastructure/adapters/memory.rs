// vigil-core/src/infrastructure/adapters/memory.rs

use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::sync::{PoisonError, RwLock};
use std::time::Duration;

use crate::domain::error::DomainError;
use crate::error::VigilError;
use crate::ports::source::{AssetSource, Record};

/// Assets held in memory. Used by tests and demos; a per-asset delay
/// simulates a slow warehouse.
#[derive(Debug, Default)]
pub struct InMemorySource {
    assets: RwLock<BTreeMap<String, Vec<Record>>>,
    delays: RwLock<HashMap<String, Duration>>,
}

impl InMemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the rows of `asset`.
    pub fn put(&self, asset: &str, records: Vec<Record>) {
        self.assets
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(asset.to_string(), records);
    }

    /// Convenience for JSON fixtures: every non-object value is skipped.
    pub fn put_json(&self, asset: &str, rows: Vec<serde_json::Value>) {
        let records = rows
            .into_iter()
            .filter_map(|v| match v {
                serde_json::Value::Object(map) => Some(map),
                _ => None,
            })
            .collect();
        self.put(asset, records);
    }

    pub fn set_delay(&self, asset: &str, delay: Option<Duration>) {
        let mut delays = self.delays.write().unwrap_or_else(PoisonError::into_inner);
        match delay {
            Some(d) => delays.insert(asset.to_string(), d),
            None => delays.remove(asset),
        };
    }
}

#[async_trait]
impl AssetSource for InMemorySource {
    async fn fetch_records(
        &self,
        asset: &str,
        limit: Option<usize>,
    ) -> Result<Vec<Record>, VigilError> {
        let delay = self
            .delays
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(asset)
            .copied();
        if let Some(d) = delay {
            tokio::time::sleep(d).await;
        }

        let assets = self.assets.read().unwrap_or_else(PoisonError::into_inner);
        let rows = assets
            .get(asset)
            .ok_or_else(|| DomainError::not_found("asset", asset))?;
        let take = limit.unwrap_or(rows.len());
        Ok(rows.iter().take(take).cloned().collect())
    }

    async fn list_assets(&self) -> Result<Vec<String>, VigilError> {
        Ok(self
            .assets
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect())
    }

    fn source_name(&self) -> &str {
        "memory"
    }
}
