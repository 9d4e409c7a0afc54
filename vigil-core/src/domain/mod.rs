pub mod audit;
pub mod catalog;
pub mod compliance;
pub mod error;
pub mod evaluation;
pub mod incident;
pub mod integrity;
pub mod monitoring;
pub mod project;
pub mod remediation;

// Re-exports for shorter imports elsewhere
pub use error::DomainError;
