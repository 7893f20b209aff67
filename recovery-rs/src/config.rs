//! Configuration for the rollback and escalation managers

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::classify::{ErrorSeverity, RecoveryStrategy};

/// Rollback manager configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RollbackConfig {
    /// Act on `rollback` suggestions automatically
    pub auto_rollback: bool,

    /// Rollback points kept per execution; the oldest is evicted first
    pub max_rollback_points: usize,

    /// Phases eligible for automatic checkpointing; empty means all
    pub checkpoint_phases: Vec<u32>,
}

impl Default for RollbackConfig {
    fn default() -> Self {
        Self {
            auto_rollback: true,
            max_rollback_points: 10,
            checkpoint_phases: Vec::new(),
        }
    }
}

impl RollbackConfig {
    /// Whether a phase should be checkpointed automatically
    pub fn should_checkpoint(&self, phase: u32) -> bool {
        self.checkpoint_phases.is_empty() || self.checkpoint_phases.contains(&phase)
    }
}

/// Escalation manager configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EscalationConfig {
    /// Run automatic handlers before queueing for a human
    pub auto_escalate: bool,

    /// How long a pending escalation waits for a human, in milliseconds
    pub human_response_timeout_ms: u64,

    /// Action applied when the human response window elapses
    pub timeout_action: RecoveryStrategy,

    /// Escalations allowed per execution before forced abort
    pub max_escalations_per_execution: u32,

    /// Severities that trigger escalation at all
    pub escalation_severities: Vec<ErrorSeverity>,
}

impl Default for EscalationConfig {
    fn default() -> Self {
        Self {
            auto_escalate: true,
            human_response_timeout_ms: 300_000,
            timeout_action: RecoveryStrategy::Abort,
            max_escalations_per_execution: 5,
            escalation_severities: vec![
                ErrorSeverity::Error,
                ErrorSeverity::Critical,
                ErrorSeverity::Fatal,
            ],
        }
    }
}

impl EscalationConfig {
    /// Human response window as a `Duration`
    pub fn human_response_timeout(&self) -> Duration {
        Duration::from_millis(self.human_response_timeout_ms)
    }
}
