// vigil-core/src/infrastructure/error.rs

use miette::Diagnostic;
use thiserror::Error;

#[derive(Error, Debug, Diagnostic)]
pub enum DatabaseError {
    #[error("DuckDB Engine Error: {0}")]
    #[diagnostic(
        code(vigil::infra::database::duckdb),
        help("An error occurred inside the SQL engine.")
    )]
    DuckDB(#[from] duckdb::Error),

    #[error("DuckDB connection mutex poisoned")]
    #[diagnostic(code(vigil::infra::database::poisoned))]
    Poisoned,

    #[error("Background query task failed: {0}")]
    #[diagnostic(code(vigil::infra::database::join))]
    Join(String),
}

#[derive(Error, Debug, Diagnostic)]
pub enum InfrastructureError {
    // --- DATABASE (Abstracted) ---
    #[error(transparent)]
    #[diagnostic(transparent)]
    Database(#[from] DatabaseError),

    // --- FILESYSTEM (IO) ---
    #[error("File System Error: {0}")]
    #[diagnostic(
        code(vigil::infra::io),
        help("Check file permissions or path validity.")
    )]
    Io(#[from] std::io::Error),

    // --- CONFIG / YAML ---
    #[error("YAML Parsing Error: {0}")]
    #[diagnostic(
        code(vigil::infra::yaml),
        help("Check your YAML syntax (indentation, types).")
    )]
    YamlError(#[from] serde_yaml::Error),

    #[error("JSON Error: {0}")]
    #[diagnostic(code(vigil::infra::json))]
    JsonError(#[from] serde_json::Error),

    #[error("Configuration Error: {0}")]
    #[diagnostic(code(vigil::infra::config))]
    ConfigError(String),

    #[error("Invalid configuration values: {0}")]
    #[diagnostic(
        code(vigil::infra::config_invalid),
        help("Thresholds must be positive and counts at least 1.")
    )]
    ConfigInvalid(#[from] validator::ValidationErrors),

    #[error("Project configuration not found at '{0}'")]
    #[diagnostic(code(vigil::infra::config_missing))]
    ConfigNotFound(String),

    #[error("State file schema v{found} is newer than supported v{supported}")]
    #[diagnostic(
        code(vigil::infra::state_version),
        help("Upgrade the vigil binary before opening this state file.")
    )]
    UnsupportedStateVersion { found: u32, supported: u32 },

    #[error(transparent)]
    #[diagnostic(code(vigil::infra::other))]
    Other(#[from] anyhow::Error),
}

// Manual implementation for shortcuts (e.g. `?` operator on duckdb calls)
impl From<duckdb::Error> for InfrastructureError {
    fn from(err: duckdb::Error) -> Self {
        InfrastructureError::Database(DatabaseError::DuckDB(err))
    }
}
