//! Rollback manager
//!
//! Tracks rollback points per execution and restores them on demand. A
//! rollback point ties a checkpoint to the phase it was taken in and
//! remembers which artifacts existed at that moment; rolling back
//! restores the checkpoint, removes artifacts generated after the
//! point's phase, and invalidates every later rollback point.
//!
//! `rollback` never fails with an error value: outcomes carry a
//! `success` flag and a description, so callers in the recovery path do
//! not need their own error handling for an operation whose whole job is
//! handling errors.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::classify::RecoveryStrategy;
use crate::config::RollbackConfig;
use crate::context::StructuredError;
use crate::error::{RecoveryError, Result};
use crate::state::{ArtifactFilter, CheckpointOptions, ExecutionStateStore};

/// A restorable point in one execution's history
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RollbackPoint {
    pub id: String,
    pub execution_id: String,
    /// Phase the execution was in when the point was created
    pub phase: u32,
    /// Checkpoint backing this point
    pub checkpoint_id: String,
    pub created_at: DateTime<Utc>,
    /// Artifacts that existed when the point was created
    pub artifact_ids: Vec<String>,
    /// Points can be marked non-restorable without being dropped
    pub can_rollback: bool,
    /// Rough cost estimate for restoring this point
    pub estimated_duration_ms: u64,
}

/// Result of one rollback attempt. Always returned, never raised.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RollbackOutcome {
    pub success: bool,
    /// Failure description when `success` is false
    pub error: Option<String>,
    pub rollback_point_id: Option<String>,
    pub execution_id: Option<String>,
    /// Artifacts removed because their phase was past the point
    pub removed_artifacts: Vec<String>,
    /// Artifacts that should have been removed but could not be
    pub failed_artifacts: Vec<String>,
    /// Checkpoint that was restored
    pub restored_checkpoint: Option<String>,
    pub duration_ms: u64,
}

impl RollbackOutcome {
    fn failure(error: impl Into<String>, duration_ms: u64) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
            rollback_point_id: None,
            execution_id: None,
            removed_artifacts: Vec::new(),
            failed_artifacts: Vec::new(),
            restored_checkpoint: None,
            duration_ms,
        }
    }
}

/// Creates, tracks, and restores rollback points
pub struct RollbackManager {
    store: Arc<dyn ExecutionStateStore>,
    config: RollbackConfig,
    points: Mutex<HashMap<String, Vec<RollbackPoint>>>,
}

impl RollbackManager {
    pub fn new(store: Arc<dyn ExecutionStateStore>, config: RollbackConfig) -> Self {
        Self {
            store,
            config,
            points: Mutex::new(HashMap::new()),
        }
    }

    /// Snapshot the execution's current state as a new rollback point.
    ///
    /// Fails when the execution does not exist. When the per-execution
    /// cap is exceeded the oldest point is evicted, FIFO by creation
    /// order.
    pub async fn create_rollback_point(
        &self,
        execution_id: &str,
        reason: impl Into<String>,
    ) -> Result<RollbackPoint> {
        let execution = self
            .store
            .get_execution(execution_id)
            .await?
            .ok_or_else(|| RecoveryError::execution_not_found(execution_id))?;

        let checkpoint = self
            .store
            .create_checkpoint(execution_id, CheckpointOptions::with_reason(reason))
            .await?;
        let artifacts = self
            .store
            .list_artifacts(ArtifactFilter::for_execution(execution_id))
            .await?;

        let point = RollbackPoint {
            id: Uuid::new_v4().to_string(),
            execution_id: execution_id.to_string(),
            phase: execution.current_phase,
            checkpoint_id: checkpoint.id,
            created_at: Utc::now(),
            artifact_ids: artifacts.iter().map(|a| a.id.clone()).collect(),
            can_rollback: true,
            estimated_duration_ms: 500 + 100 * artifacts.len() as u64,
        };

        let mut points = self.points.lock().unwrap();
        let entries = points.entry(execution_id.to_string()).or_default();
        entries.push(point.clone());
        while entries.len() > self.config.max_rollback_points {
            let evicted = entries.remove(0);
            log::debug!(
                "evicting oldest rollback point {} for execution '{}'",
                evicted.id,
                execution_id
            );
        }
        log::debug!(
            "created rollback point {} at phase {} for execution '{}'",
            point.id,
            point.phase,
            execution_id
        );
        Ok(point)
    }

    /// Mark a point restorable or not without dropping it. Returns false
    /// when the id is unknown.
    pub fn set_restorable(&self, rollback_point_id: &str, restorable: bool) -> bool {
        let mut points = self.points.lock().unwrap();
        for entries in points.values_mut() {
            if let Some(point) = entries.iter_mut().find(|p| p.id == rollback_point_id) {
                point.can_rollback = restorable;
                return true;
            }
        }
        false
    }

    /// Rollback points currently tracked for an execution, oldest first
    pub fn points_for(&self, execution_id: &str) -> Vec<RollbackPoint> {
        self.points
            .lock()
            .unwrap()
            .get(execution_id)
            .cloned()
            .unwrap_or_default()
    }

    /// Restore a rollback point by id.
    ///
    /// Restores the backing checkpoint, removes every artifact generated
    /// after the point's phase, and drops every later rollback point for
    /// that execution. Failures are reported in the outcome, never
    /// raised.
    pub async fn rollback(&self, rollback_point_id: &str) -> RollbackOutcome {
        let started = Instant::now();
        let elapsed = |s: Instant| s.elapsed().as_millis() as u64;

        let point = {
            let points = self.points.lock().unwrap();
            points
                .values()
                .flatten()
                .find(|p| p.id == rollback_point_id)
                .cloned()
        };
        let Some(point) = point else {
            return RollbackOutcome::failure("Rollback point not found", elapsed(started));
        };
        if !point.can_rollback {
            return RollbackOutcome::failure(
                format!("Rollback point {} is marked non-restorable", point.id),
                elapsed(started),
            );
        }

        let restored = match self.store.resume_from_checkpoint(&point.checkpoint_id).await {
            Ok(execution) => execution,
            Err(e) => {
                return RollbackOutcome::failure(
                    format!("Failed to restore checkpoint: {}", e),
                    elapsed(started),
                )
            }
        };

        let later_artifacts = match self
            .store
            .list_artifacts(ArtifactFilter::for_execution(&point.execution_id).after_phase(point.phase))
            .await
        {
            Ok(artifacts) => artifacts,
            Err(e) => {
                return RollbackOutcome::failure(
                    format!("Failed to list artifacts: {}", e),
                    elapsed(started),
                )
            }
        };

        let mut removed = Vec::new();
        let mut failed = Vec::new();
        for artifact in later_artifacts {
            match self.store.remove_artifact(&artifact.id).await {
                Ok(()) => removed.push(artifact.id),
                Err(e) => {
                    log::warn!("failed to remove artifact {}: {}", artifact.id, e);
                    failed.push(artifact.id);
                }
            }
        }

        // Later points reference state this rollback just discarded.
        {
            let mut points = self.points.lock().unwrap();
            if let Some(entries) = points.get_mut(&point.execution_id) {
                entries.retain(|p| p.phase <= point.phase);
            }
        }

        log::info!(
            "rolled execution '{}' back to phase {} ({} artifacts removed)",
            point.execution_id,
            point.phase,
            removed.len()
        );
        RollbackOutcome {
            success: true,
            error: None,
            rollback_point_id: Some(point.id),
            execution_id: Some(restored.id),
            removed_artifacts: removed,
            failed_artifacts: failed,
            restored_checkpoint: Some(point.checkpoint_id),
            duration_ms: elapsed(started),
        }
    }

    /// Restore the most recent restorable point for an execution
    pub async fn rollback_to_latest(&self, execution_id: &str) -> RollbackOutcome {
        let latest = {
            let points = self.points.lock().unwrap();
            points
                .get(execution_id)
                .and_then(|entries| entries.iter().rev().find(|p| p.can_rollback))
                .map(|p| p.id.clone())
        };
        match latest {
            Some(id) => self.rollback(&id).await,
            None => RollbackOutcome::failure(
                format!("No rollback points for execution '{}'", execution_id),
                0,
            ),
        }
    }

    /// Restore the most recent restorable point at exactly `phase`
    pub async fn rollback_to_phase(&self, execution_id: &str, phase: u32) -> RollbackOutcome {
        let target = self.find_point_at_phase(execution_id, phase);
        match target {
            Some(id) => self.rollback(&id).await,
            None => RollbackOutcome::failure(
                format!(
                    "No rollback point at phase {} for execution '{}'",
                    phase, execution_id
                ),
                0,
            ),
        }
    }

    /// Act on a classified error whose suggested strategy is `rollback`.
    ///
    /// Prefers a point at the phase before the failing one, falling back
    /// to the latest point. Returns `None` when the strategy is anything
    /// else, automatic rollback is disabled, or no point exists.
    pub async fn handle_error_with_rollback(
        &self,
        error: &StructuredError,
    ) -> Option<RollbackOutcome> {
        if !self.config.auto_rollback {
            return None;
        }
        if error.classification.strategy != RecoveryStrategy::Rollback {
            return None;
        }

        let execution_id = &error.context.execution_id;
        let preferred = error
            .context
            .phase
            .checked_sub(1)
            .and_then(|phase| self.find_point_at_phase(execution_id, phase));

        if let Some(id) = preferred {
            return Some(self.rollback(&id).await);
        }
        if self.points_for(execution_id).is_empty() {
            log::debug!(
                "no rollback points for execution '{}', leaving error to escalation",
                execution_id
            );
            return None;
        }
        Some(self.rollback_to_latest(execution_id).await)
    }

    fn find_point_at_phase(&self, execution_id: &str, phase: u32) -> Option<String> {
        let points = self.points.lock().unwrap();
        points
            .get(execution_id)?
            .iter()
            .rev()
            .find(|p| p.phase == phase && p.can_rollback)
            .map(|p| p.id.clone())
    }
}
