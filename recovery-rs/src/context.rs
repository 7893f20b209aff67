//! Structured errors and execution context

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::classify::ErrorClassification;

/// Where in an execution a failure happened
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionContext {
    /// Execution the failure belongs to
    pub execution_id: String,

    /// Phase number that was running
    pub phase: u32,

    /// Agent that was executing, when known
    #[serde(default)]
    pub agent: Option<String>,

    /// Operation that failed, when known
    #[serde(default)]
    pub operation: Option<String>,

    /// Partial output produced before the failure
    #[serde(default)]
    pub partial_output: Option<Value>,

    /// Checkpoint the execution last passed, when known
    #[serde(default)]
    pub checkpoint_id: Option<String>,
}

impl ExecutionContext {
    /// Context for a failure in one phase of one execution
    pub fn new(execution_id: impl Into<String>, phase: u32) -> Self {
        Self {
            execution_id: execution_id.into(),
            phase,
            agent: None,
            operation: None,
            partial_output: None,
            checkpoint_id: None,
        }
    }

    /// Record which agent was executing
    pub fn with_agent(mut self, agent: impl Into<String>) -> Self {
        self.agent = Some(agent.into());
        self
    }

    /// Record which operation failed
    pub fn with_operation(mut self, operation: impl Into<String>) -> Self {
        self.operation = Some(operation.into());
        self
    }

    /// Attach partial output produced before the failure
    pub fn with_partial_output(mut self, output: Value) -> Self {
        self.partial_output = Some(output);
        self
    }

    /// Record the last checkpoint passed
    pub fn with_checkpoint(mut self, checkpoint_id: impl Into<String>) -> Self {
        self.checkpoint_id = Some(checkpoint_id.into());
        self
    }
}

/// One classified failure, the unit passed between the classifier and
/// the rollback/escalation managers
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StructuredError {
    /// Fresh id stamped at classification time
    pub id: String,

    /// When the failure was classified
    pub timestamp: DateTime<Utc>,

    /// Display message of the original error
    pub message: String,

    /// The classifier's verdict
    pub classification: ErrorClassification,

    /// Where the failure happened
    pub context: ExecutionContext,

    /// Messages of the error's source chain, outermost first
    pub chain: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn context_builders_accumulate() {
        let ctx = ExecutionContext::new("exec-1", 3)
            .with_agent("planner")
            .with_operation("tools/call")
            .with_checkpoint("cp-9");
        assert_eq!(ctx.execution_id, "exec-1");
        assert_eq!(ctx.phase, 3);
        assert_eq!(ctx.agent.as_deref(), Some("planner"));
        assert_eq!(ctx.checkpoint_id.as_deref(), Some("cp-9"));
        assert!(ctx.partial_output.is_none());
    }
}
