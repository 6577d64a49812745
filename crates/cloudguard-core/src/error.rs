//! Error types for the CloudGuard control core.

use std::time::Duration;

use thiserror::Error;

/// Result type alias for control core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors that can occur inside the control core.
///
/// None of these are fatal to the process: evaluation errors degrade to
/// "try again next tick", registry errors are returned to the caller.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    #[error("{operation} for {resource} timed out after {after:?}")]
    CollaboratorTimeout {
        operation: &'static str,
        resource: String,
        after: Duration,
    },

    #[error("{operation} for {resource} failed: {reason}")]
    Collaborator {
        operation: &'static str,
        resource: String,
        reason: String,
    },

    #[error("action {action} on {resource} failed: {reason}")]
    ActionFailure {
        action: String,
        resource: String,
        reason: String,
    },

    #[error("simulation failed: {0}")]
    SimulationFailure(String),

    #[error("invalid scaling policy: {0}")]
    InvalidPolicy(String),

    #[error("invalid healing rule: {0}")]
    InvalidRule(String),

    #[error("config error: {0}")]
    Config(String),
}

impl CoreError {
    /// Shorthand for a `NotFound` error.
    pub fn not_found(kind: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            kind,
            id: id.into(),
        }
    }

    /// Whether this error came from a collaborator that did not answer in time.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::CollaboratorTimeout { .. })
    }
}
