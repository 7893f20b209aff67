//! # Recovery
//!
//! Error classification, rollback, and escalation for tool-driven agent
//! executions. This crate decides what happens after a failure surfaced
//! through the tool client: retry it, undo prior work, or hand the
//! decision to a human.
//!
//! The pipeline:
//!
//! 1. The [`ErrorClassifier`] maps an arbitrary error plus execution
//!    context to a category, severity, and suggested recovery strategy.
//! 2. A `rollback` suggestion drives the [`RollbackManager`], which
//!    restores a checkpoint and removes artifacts produced after it.
//! 3. Anything that cannot be resolved automatically becomes a pending
//!    escalation in the [`EscalationManager`], waiting for a human
//!    decision with a bounded response window.
//!
//! State lives behind the [`ExecutionStateStore`] capability trait; the
//! crate owns no persistent storage of its own.

// Re-export error handling
pub mod error;
pub use error::{RecoveryError, Result};

// Re-export the classifier
pub mod classify;
pub use classify::{
    ErrorCategory, ErrorClassification, ErrorClassifier, ErrorPattern, ErrorSeverity,
    RecoveryStrategy,
};

// Re-export structured errors and execution context
pub mod context;
pub use context::{ExecutionContext, StructuredError};

// Re-export the execution state capability
pub mod state;
pub use state::{
    ArtifactFilter, ArtifactRecord, Checkpoint, CheckpointOptions, ExecutionRecord,
    ExecutionStateStore, InMemoryStateStore,
};

// Re-export the rollback manager
pub mod rollback;
pub use rollback::{RollbackManager, RollbackOutcome, RollbackPoint};

// Re-export the escalation manager
pub mod escalation;
pub use escalation::{
    DecidedBy, EscalationHandler, EscalationLevel, EscalationManager, EscalationRequest,
    EscalationResponse, HandlerDecision,
};

// Re-export configuration
pub mod config;
pub use config::{EscalationConfig, RollbackConfig};

#[cfg(test)]
mod tests;
