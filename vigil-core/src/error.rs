// vigil-core/src/error.rs

use crate::domain::error::DomainError;
use crate::infrastructure::error::InfrastructureError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum VigilError {
    // --- DOMAIN ERRORS (state machines, consistency, preconditions) ---
    #[error(transparent)]
    Domain(#[from] DomainError),

    // --- INFRASTRUCTURE ERRORS (IO, Parsing, Database) ---
    #[error(transparent)]
    Infrastructure(#[from] InfrastructureError),

    // --- GENERIC / APPLICATION ERRORS ---
    #[error("Internal Error: {0}")]
    InternalError(String),
}

impl VigilError {
    /// The domain error behind this failure, if any.
    pub fn as_domain(&self) -> Option<&DomainError> {
        match self {
            VigilError::Domain(e) => Some(e),
            _ => None,
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.as_domain().is_some_and(DomainError::is_retryable)
    }
}

// Manual implementation to avoid duplicate enum variant but keep ergonomics
impl From<std::io::Error> for VigilError {
    fn from(err: std::io::Error) -> Self {
        VigilError::Infrastructure(InfrastructureError::Io(err))
    }
}

pub type Result<T, E = VigilError> = std::result::Result<T, E>;
