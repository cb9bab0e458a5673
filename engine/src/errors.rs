//! Error types and handling
//!
//! This module provides the closed error taxonomy used throughout the
//! foreman engine. Every error carries a stable machine-readable code so
//! that HTTP clients and workflow records can classify failures without
//! parsing display strings.
//!
//! Domain failures (a subtask that did not produce a useful result) are
//! *data*, recorded on the workflow record; they never surface as an
//! `EngineError`. Only malformed requests and infrastructure failures do.

use thiserror::Error;

/// Result type for engine operations
pub type Result<T> = std::result::Result<T, EngineError>;

/// Trait for engine error extensions
///
/// Provides additional context for errors: a user-friendly hint that is
/// safe to display to end users, and whether the error is recoverable.
pub trait ErrorExt {
    /// Returns a user-friendly hint for the error
    fn user_hint(&self) -> &str;

    /// Returns whether the error is recoverable
    ///
    /// Recoverable errors can be retried or worked around. Non-recoverable
    /// errors typically indicate a bug or require manual intervention.
    fn is_recoverable(&self) -> bool;
}

/// Main engine error type
///
/// # Error Categories
///
/// - **Validation**: request body rejected; never retried
/// - **Inference**: timeout, unreachable backend, or backend-reported error
/// - **Decomposition**: cyclic dependencies or an empty decomposition
/// - **PersonaStore**: persistence failure in the persona library
/// - **State**: illegal subtask state-machine transition (always a bug)
/// - **Cancelled / WorkflowTimeout**: surfaced as a terminal `cancelled`
///   workflow record by the orchestrator
/// - **Config / Io**: startup and filesystem failures
#[derive(Debug, Error)]
pub enum EngineError {
    /// Request body rejected by input validation
    #[error("validation error: {0}")]
    Validation(String),

    /// Inference request exceeded the total request timeout
    #[error("inference request timed out")]
    InferenceTimeout,

    /// Inference backend could not be reached
    #[error("inference backend unreachable: {0}")]
    InferenceUnreachable(String),

    /// Inference backend returned a non-2xx status
    #[error("inference backend error: {0}")]
    InferenceBackend(String),

    /// Cyclic dependency or empty decomposition
    #[error("decomposition error: {0}")]
    Decomposition(String),

    /// Persona library persistence or parse failure
    #[error("persona store error: {0}")]
    PersonaStore(String),

    /// Illegal subtask state-machine transition
    #[error("illegal state transition: {0}")]
    State(String),

    /// Workflow cancelled by the caller
    #[error("workflow cancelled")]
    Cancelled,

    /// Workflow exceeded its configured deadline
    #[error("workflow timed out after {0} seconds")]
    WorkflowTimeout(u64),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Generic IO error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl EngineError {
    /// Stable machine-readable code for this error kind
    ///
    /// These codes are part of the HTTP contract and are persisted in
    /// workflow records; they must never change meaning.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "ValidationError",
            Self::InferenceTimeout => "InferenceTimeout",
            Self::InferenceUnreachable(_) => "InferenceUnreachable",
            Self::InferenceBackend(_) => "InferenceBackend",
            Self::Decomposition(_) => "DecompositionError",
            Self::PersonaStore(_) => "PersonaStoreError",
            Self::State(_) => "StateError",
            Self::Cancelled => "Cancelled",
            Self::WorkflowTimeout(_) => "WorkflowTimeout",
            Self::Config(_) => "ConfigError",
            Self::Io(_) => "IoError",
        }
    }
}

impl ErrorExt for EngineError {
    fn user_hint(&self) -> &str {
        match self {
            Self::Validation(_) => "Check the request body against the API schema",
            Self::InferenceTimeout => "The model took too long to respond. Try again",
            Self::InferenceUnreachable(_) => {
                "Cannot reach the inference backend. Is the model server running?"
            }
            Self::InferenceBackend(_) => "The inference backend rejected the request",
            Self::Decomposition(_) => "The task could not be broken into executable subtasks",
            Self::PersonaStore(_) => "Persona library unavailable. Check the data directory",
            Self::State(_) => "Internal state error. Please report this",
            Self::Cancelled => "The workflow was cancelled before it finished",
            Self::WorkflowTimeout(_) => "The workflow ran past its deadline",
            Self::Config(_) => "Check your config.toml file for errors",
            Self::Io(_) => "File system operation failed",
        }
    }

    fn is_recoverable(&self) -> bool {
        match self {
            // A StateError is always a bug; validation failures need a
            // corrected request, not a retry.
            Self::State(_) | Self::Validation(_) => false,

            _ => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_are_stable() {
        assert_eq!(EngineError::Validation("x".into()).code(), "ValidationError");
        assert_eq!(EngineError::InferenceTimeout.code(), "InferenceTimeout");
        assert_eq!(
            EngineError::InferenceUnreachable("refused".into()).code(),
            "InferenceUnreachable"
        );
        assert_eq!(
            EngineError::Decomposition("cycle".into()).code(),
            "DecompositionError"
        );
        assert_eq!(EngineError::Cancelled.code(), "Cancelled");
        assert_eq!(EngineError::WorkflowTimeout(600).code(), "WorkflowTimeout");
    }

    #[test]
    fn test_recoverability() {
        assert!(!EngineError::State("pending -> completed".into()).is_recoverable());
        assert!(!EngineError::Validation("too long".into()).is_recoverable());
        assert!(EngineError::InferenceTimeout.is_recoverable());
        assert!(EngineError::PersonaStore("fsync".into()).is_recoverable());
    }

    #[test]
    fn test_display_includes_detail() {
        let err = EngineError::InferenceBackend("model not found".into());
        assert!(err.to_string().contains("model not found"));
    }
}
