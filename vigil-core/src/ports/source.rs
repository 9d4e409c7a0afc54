// vigil-core/src/ports/source.rs

// The engine only needs rows of a monitored asset, never how they are stored.
// DuckDB today, anything tomorrow: the adapter lives in infrastructure/adapters.

use crate::error::VigilError;
use async_trait::async_trait;

/// One row of a monitored asset, keyed by column name.
pub type Record = serde_json::Map<String, serde_json::Value>;

#[async_trait]
pub trait AssetSource: Send + Sync {
    /// Fetch the current records of `asset`, at most `limit` of them when a
    /// sampling window is configured.
    async fn fetch_records(
        &self,
        asset: &str,
        limit: Option<usize>,
    ) -> Result<Vec<Record>, VigilError>;

    /// Assets this source can serve (used by readiness checks).
    async fn list_assets(&self) -> Result<Vec<String>, VigilError>;

    fn source_name(&self) -> &str;
}
