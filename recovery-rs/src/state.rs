//! Execution state capability
//!
//! The rollback manager owns no storage; it drives an
//! [`ExecutionStateStore`] implemented by the surrounding system. The
//! in-memory implementation here backs tests and demos.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::error::{RecoveryError, Result};

/// One tracked execution
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionRecord {
    pub id: String,
    /// Phase the execution is currently in
    pub current_phase: u32,
    /// Opaque execution state snapshot
    pub state: Value,
}

/// A restorable snapshot of execution state at one phase
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Checkpoint {
    pub id: String,
    pub execution_id: String,
    pub phase: u32,
    pub reason: String,
    pub state: Value,
    pub created_at: DateTime<Utc>,
}

/// Parameters for [`ExecutionStateStore::create_checkpoint`]
#[derive(Debug, Clone, Default)]
pub struct CheckpointOptions {
    /// Why the checkpoint was taken
    pub reason: String,
    /// Extra state merged into the snapshot
    pub additional_state: Option<Value>,
}

impl CheckpointOptions {
    pub fn with_reason(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
            additional_state: None,
        }
    }
}

/// One artifact produced during an execution
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArtifactRecord {
    pub id: String,
    pub execution_id: String,
    pub name: String,
    /// Phase that produced the artifact
    pub generated_by_phase: u32,
}

/// Filter for [`ExecutionStateStore::list_artifacts`]
#[derive(Debug, Clone, Default)]
pub struct ArtifactFilter {
    pub execution_id: Option<String>,
    pub generated_by_phase: Option<u32>,
    /// Only artifacts generated strictly after this phase
    pub phase_greater_than: Option<u32>,
}

impl ArtifactFilter {
    /// Every artifact of one execution
    pub fn for_execution(execution_id: impl Into<String>) -> Self {
        Self {
            execution_id: Some(execution_id.into()),
            ..Self::default()
        }
    }

    /// Restrict to artifacts generated strictly after `phase`
    pub fn after_phase(mut self, phase: u32) -> Self {
        self.phase_greater_than = Some(phase);
        self
    }

    fn matches(&self, artifact: &ArtifactRecord) -> bool {
        if let Some(execution_id) = &self.execution_id {
            if &artifact.execution_id != execution_id {
                return false;
            }
        }
        if let Some(phase) = self.generated_by_phase {
            if artifact.generated_by_phase != phase {
                return false;
            }
        }
        if let Some(phase) = self.phase_greater_than {
            if artifact.generated_by_phase <= phase {
                return false;
            }
        }
        true
    }
}

/// Capability interface to execution state, checkpoints, and artifacts
#[async_trait]
pub trait ExecutionStateStore: Send + Sync {
    /// Look an execution up by id
    async fn get_execution(&self, execution_id: &str) -> Result<Option<ExecutionRecord>>;

    /// Snapshot the execution's current state
    async fn create_checkpoint(
        &self,
        execution_id: &str,
        options: CheckpointOptions,
    ) -> Result<Checkpoint>;

    /// Restore an execution from a checkpoint, returning the restored
    /// record
    async fn resume_from_checkpoint(&self, checkpoint_id: &str) -> Result<ExecutionRecord>;

    /// List artifacts matching a filter
    async fn list_artifacts(&self, filter: ArtifactFilter) -> Result<Vec<ArtifactRecord>>;

    /// Delete one artifact
    async fn remove_artifact(&self, artifact_id: &str) -> Result<()>;
}

#[derive(Default)]
struct StoreInner {
    executions: HashMap<String, ExecutionRecord>,
    checkpoints: HashMap<String, Checkpoint>,
    artifacts: HashMap<String, ArtifactRecord>,
}

/// In-memory [`ExecutionStateStore`] for tests and demos
#[derive(Default)]
pub struct InMemoryStateStore {
    inner: Mutex<StoreInner>,
}

impl InMemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed an execution
    pub fn insert_execution(&self, execution: ExecutionRecord) {
        let mut inner = self.inner.lock().unwrap();
        inner.executions.insert(execution.id.clone(), execution);
    }

    /// Seed an artifact
    pub fn insert_artifact(&self, artifact: ArtifactRecord) {
        let mut inner = self.inner.lock().unwrap();
        inner.artifacts.insert(artifact.id.clone(), artifact);
    }

    /// Advance an execution to a phase, merging new state
    pub fn advance_phase(&self, execution_id: &str, phase: u32, state: Value) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        let execution = inner
            .executions
            .get_mut(execution_id)
            .ok_or_else(|| RecoveryError::execution_not_found(execution_id))?;
        execution.current_phase = phase;
        execution.state = merge(&execution.state, &state);
        Ok(())
    }
}

#[async_trait]
impl ExecutionStateStore for InMemoryStateStore {
    async fn get_execution(&self, execution_id: &str) -> Result<Option<ExecutionRecord>> {
        let inner = self.inner.lock().unwrap();
        Ok(inner.executions.get(execution_id).cloned())
    }

    async fn create_checkpoint(
        &self,
        execution_id: &str,
        options: CheckpointOptions,
    ) -> Result<Checkpoint> {
        let mut inner = self.inner.lock().unwrap();
        let execution = inner
            .executions
            .get(execution_id)
            .ok_or_else(|| RecoveryError::execution_not_found(execution_id))?;

        let state = match &options.additional_state {
            Some(extra) => merge(&execution.state, extra),
            None => execution.state.clone(),
        };
        let checkpoint = Checkpoint {
            id: Uuid::new_v4().to_string(),
            execution_id: execution_id.to_string(),
            phase: execution.current_phase,
            reason: options.reason,
            state,
            created_at: Utc::now(),
        };
        inner
            .checkpoints
            .insert(checkpoint.id.clone(), checkpoint.clone());
        Ok(checkpoint)
    }

    async fn resume_from_checkpoint(&self, checkpoint_id: &str) -> Result<ExecutionRecord> {
        let mut inner = self.inner.lock().unwrap();
        let checkpoint = inner
            .checkpoints
            .get(checkpoint_id)
            .cloned()
            .ok_or_else(|| RecoveryError::checkpoint_not_found(checkpoint_id))?;
        let execution = inner
            .executions
            .get_mut(&checkpoint.execution_id)
            .ok_or_else(|| RecoveryError::execution_not_found(&checkpoint.execution_id))?;
        execution.current_phase = checkpoint.phase;
        execution.state = checkpoint.state.clone();
        Ok(execution.clone())
    }

    async fn list_artifacts(&self, filter: ArtifactFilter) -> Result<Vec<ArtifactRecord>> {
        let inner = self.inner.lock().unwrap();
        let mut artifacts: Vec<_> = inner
            .artifacts
            .values()
            .filter(|a| filter.matches(a))
            .cloned()
            .collect();
        artifacts.sort_by(|a, b| {
            a.generated_by_phase
                .cmp(&b.generated_by_phase)
                .then_with(|| a.id.cmp(&b.id))
        });
        Ok(artifacts)
    }

    async fn remove_artifact(&self, artifact_id: &str) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        inner
            .artifacts
            .remove(artifact_id)
            .map(|_| ())
            .ok_or_else(|| RecoveryError::artifact_not_found(artifact_id))
    }
}

/// Shallow object merge; non-object values are replaced
fn merge(base: &Value, extra: &Value) -> Value {
    match (base, extra) {
        (Value::Object(base), Value::Object(extra)) => {
            let mut merged: Map<String, Value> = base.clone();
            for (key, value) in extra {
                merged.insert(key.clone(), value.clone());
            }
            Value::Object(merged)
        }
        _ => extra.clone(),
    }
}
