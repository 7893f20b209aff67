//! Error handling for the recovery crate
//!
//! These are the recovery pipeline's own failures (missing executions,
//! bad checkpoints, invalid classifier patterns), not the upstream
//! errors the pipeline classifies.

use thiserror::Error;

/// Result type for recovery operations
pub type Result<T> = std::result::Result<T, RecoveryError>;

/// Failures raised by the recovery pipeline itself
#[derive(Error, Debug)]
pub enum RecoveryError {
    /// The referenced execution does not exist in the state store
    #[error("Execution not found: {0}")]
    ExecutionNotFound(String),

    /// The referenced checkpoint does not exist in the state store
    #[error("Checkpoint not found: {0}")]
    CheckpointNotFound(String),

    /// The referenced artifact does not exist in the state store
    #[error("Artifact not found: {0}")]
    ArtifactNotFound(String),

    /// The state store failed an operation
    #[error("State store error: {0}")]
    Store(String),

    /// A classifier pattern failed to compile
    #[error("Invalid pattern: {0}")]
    InvalidPattern(String),
}

impl RecoveryError {
    /// Create an execution-not-found error
    pub fn execution_not_found(execution_id: impl Into<String>) -> Self {
        RecoveryError::ExecutionNotFound(execution_id.into())
    }

    /// Create a checkpoint-not-found error
    pub fn checkpoint_not_found(checkpoint_id: impl Into<String>) -> Self {
        RecoveryError::CheckpointNotFound(checkpoint_id.into())
    }

    /// Create an artifact-not-found error
    pub fn artifact_not_found(artifact_id: impl Into<String>) -> Self {
        RecoveryError::ArtifactNotFound(artifact_id.into())
    }

    /// Create a state store error
    pub fn store(message: impl Into<String>) -> Self {
        RecoveryError::Store(message.into())
    }

    /// Create an invalid-pattern error
    pub fn invalid_pattern(message: impl Into<String>) -> Self {
        RecoveryError::InvalidPattern(message.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_messages_name_the_subject() {
        let err = RecoveryError::execution_not_found("exec-1");
        assert_eq!(err.to_string(), "Execution not found: exec-1");
    }
}
