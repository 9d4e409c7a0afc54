// vigil-core/src/application/mod.rs

pub mod anomaly;
pub mod catalog;
pub mod context;
pub mod engine;
pub mod evaluation;
pub mod ids;
pub mod incidents;
pub mod integrity;
pub mod locks;
pub mod monitoring;
pub mod remediation;

// --- RE-EXPORTS (FACADE PATTERN) ---
// The CLI only needs `use vigil_core::application::Engine;`.

pub use anomaly::AnomalyDetector;
pub use catalog::RuleCatalog;
pub use engine::{Engine, HealthStatus, ReadinessCheck, ReadinessReport, SetupReport};
pub use evaluation::EvaluationEngine;
pub use incidents::IncidentManager;
pub use integrity::IntegrityGuard;
pub use monitoring::{MonitoringScheduler, Pipeline};
pub use remediation::{RemediationSummary, RemediationTracker};
