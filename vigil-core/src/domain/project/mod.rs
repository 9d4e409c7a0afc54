// vigil-core/src/domain/project/mod.rs

pub mod configuration;

pub use configuration::{
    AnomalyConfig, DatabaseConfig, EngineConfig, EvaluationConfig, IncidentConfig,
    MonitoredPair, MonitoringConfig, ProjectConfig, RemediationConfig,
};
