// vigil-core/src/domain/error.rs

use miette::Diagnostic;
use thiserror::Error;

#[derive(Error, Debug, Diagnostic, Clone, PartialEq)]
pub enum DomainError {
    #[error("Invalid state transition on {entity} '{id}': cannot {action} from '{from}'")]
    #[diagnostic(
        code(vigil::domain::invalid_state),
        help("Check the current status of the {entity} before retrying.")
    )]
    InvalidState {
        entity: &'static str,
        id: String,
        from: String,
        action: String,
    },

    #[error("Consistency violation: {0}")]
    #[diagnostic(code(vigil::domain::consistency))]
    Consistency(String),

    #[error("Precondition failed: {0}")]
    #[diagnostic(code(vigil::domain::precondition))]
    Precondition(String),

    #[error("Conflict on {entity} '{id}': expected version {expected}, found {actual}")]
    #[diagnostic(
        code(vigil::domain::conflict),
        help("Re-read the {entity} and retry with the current version.")
    )]
    Conflict {
        entity: &'static str,
        id: String,
        expected: u64,
        actual: u64,
    },

    #[error("Evaluation of '{asset}' timed out after {millis} ms")]
    #[diagnostic(code(vigil::domain::timeout))]
    Timeout { asset: String, millis: u64 },

    #[error("{kind} '{id}' not found")]
    #[diagnostic(code(vigil::domain::not_found))]
    NotFound { kind: &'static str, id: String },

    #[error("Invalid rule definition: {0}")]
    #[diagnostic(
        code(vigil::domain::definition),
        help("Check the predicate column, regex syntax and bounds.")
    )]
    InvalidDefinition(String),
}

impl DomainError {
    pub fn not_found(kind: &'static str, id: impl Into<String>) -> Self {
        DomainError::NotFound {
            kind,
            id: id.into(),
        }
    }

    pub fn invalid_state(
        entity: &'static str,
        id: impl Into<String>,
        from: impl ToString,
        action: impl Into<String>,
    ) -> Self {
        DomainError::InvalidState {
            entity,
            id: id.into(),
            from: from.to_string(),
            action: action.into(),
        }
    }

    /// Only timeouts are worth retrying automatically.
    pub fn is_retryable(&self) -> bool {
        matches!(self, DomainError::Timeout { .. })
    }
}
