// vigil-core/src/infrastructure/adapters/duckdb.rs

use async_trait::async_trait;
use duckdb::types::Value as DuckValue;
use duckdb::{Config, Connection};
use serde_json::{Number, Value};
use std::path::Path;
use std::sync::{Arc, Mutex};
use tracing::{debug, info, instrument};

use crate::error::VigilError;
use crate::infrastructure::error::{DatabaseError, InfrastructureError};
use crate::ports::source::{AssetSource, Record};

/// Reads monitored assets out of DuckDB: existing tables, or CSV files
/// registered as views.
pub struct DuckDbSource {
    conn: Arc<Mutex<Connection>>,
}

fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

impl DuckDbSource {
    pub fn new(db_path: &str) -> Result<Self, InfrastructureError> {
        let config = Config::default();
        let conn = if db_path == ":memory:" {
            Connection::open_in_memory_with_flags(config)?
        } else {
            Connection::open_with_flags(db_path, config)?
        };

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn execute(&self, sql: &str) -> Result<(), InfrastructureError> {
        let conn = self.conn.lock().map_err(|_| DatabaseError::Poisoned)?;
        conn.execute_batch(sql)?;
        Ok(())
    }

    /// Expose a CSV file as asset `name`.
    #[instrument(skip(self))]
    pub fn register_csv(&self, name: &str, path: &Path) -> Result<(), InfrastructureError> {
        let query = format!(
            "CREATE OR REPLACE VIEW {} AS SELECT * FROM read_csv_auto({})",
            quote_ident(name),
            quote_literal(&path.to_string_lossy())
        );
        self.execute(&query)?;
        info!(asset = name, "CSV source registered");
        Ok(())
    }

    fn read_blocking(
        conn: &Mutex<Connection>,
        asset: &str,
        limit: Option<usize>,
    ) -> Result<Vec<Record>, InfrastructureError> {
        let conn = conn.lock().map_err(|_| DatabaseError::Poisoned)?;
        let relation = quote_ident(asset);

        let mut describe = conn.prepare(&format!("DESCRIBE SELECT * FROM {}", relation))?;
        let columns = describe
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<String>, _>>()?;

        let sql = match limit {
            Some(n) => format!("SELECT * FROM {} LIMIT {}", relation, n),
            None => format!("SELECT * FROM {}", relation),
        };
        let mut stmt = conn.prepare(&sql)?;
        let mut rows = stmt.query([])?;

        let mut records = Vec::new();
        while let Some(row) = rows.next()? {
            let mut record = Record::new();
            for (idx, name) in columns.iter().enumerate() {
                let value: DuckValue = row.get(idx)?;
                record.insert(name.clone(), to_json(value));
            }
            records.push(record);
        }
        Ok(records)
    }

    fn list_blocking(conn: &Mutex<Connection>) -> Result<Vec<String>, InfrastructureError> {
        let conn = conn.lock().map_err(|_| DatabaseError::Poisoned)?;
        let mut stmt = conn.prepare("SELECT table_name FROM information_schema.tables ORDER BY table_name")?;
        let names = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<String>, _>>()?;
        Ok(names)
    }
}

fn float(v: f64) -> Value {
    Number::from_f64(v).map(Value::Number).unwrap_or(Value::Null)
}

fn to_json(value: DuckValue) -> Value {
    match value {
        DuckValue::Null => Value::Null,
        DuckValue::Boolean(b) => Value::Bool(b),
        DuckValue::TinyInt(i) => Value::from(i),
        DuckValue::SmallInt(i) => Value::from(i),
        DuckValue::Int(i) => Value::from(i),
        DuckValue::BigInt(i) => Value::from(i),
        DuckValue::HugeInt(i) => float(i as f64),
        DuckValue::UTinyInt(i) => Value::from(i),
        DuckValue::USmallInt(i) => Value::from(i),
        DuckValue::UInt(i) => Value::from(i),
        DuckValue::UBigInt(i) => Value::from(i),
        DuckValue::Float(f) => float(f as f64),
        DuckValue::Double(f) => float(f),
        DuckValue::Text(s) => Value::String(s),
        // dates, timestamps, nested types: textual form is enough for the checks
        other => Value::String(format!("{:?}", other)),
    }
}

#[async_trait]
impl AssetSource for DuckDbSource {
    async fn fetch_records(
        &self,
        asset: &str,
        limit: Option<usize>,
    ) -> Result<Vec<Record>, VigilError> {
        let conn = Arc::clone(&self.conn);
        let name = asset.to_string();
        let records = tokio::task::spawn_blocking(move || Self::read_blocking(&conn, &name, limit))
            .await
            .map_err(|e| InfrastructureError::Database(DatabaseError::Join(e.to_string())))??;
        debug!(asset, rows = records.len(), "records fetched");
        Ok(records)
    }

    async fn list_assets(&self) -> Result<Vec<String>, VigilError> {
        let conn = Arc::clone(&self.conn);
        let names = tokio::task::spawn_blocking(move || Self::list_blocking(&conn))
            .await
            .map_err(|e| InfrastructureError::Database(DatabaseError::Join(e.to_string())))??;
        Ok(names)
    }

    fn source_name(&self) -> &str {
        "duckdb"
    }
}
