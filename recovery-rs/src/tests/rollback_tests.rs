//! Rollback manager behavior tests

use std::sync::Arc;

use chrono::Utc;
use mockall::mock;
use serde_json::json;

use crate::classify::{ErrorClassification, RecoveryStrategy};
use crate::config::RollbackConfig;
use crate::context::{ExecutionContext, StructuredError};
use crate::error::{RecoveryError, Result};
use crate::rollback::RollbackManager;
use crate::state::{
    ArtifactFilter, ArtifactRecord, Checkpoint, CheckpointOptions, ExecutionRecord,
    ExecutionStateStore, InMemoryStateStore,
};

mock! {
    pub StateStore {}

    #[async_trait::async_trait]
    impl ExecutionStateStore for StateStore {
        async fn get_execution(&self, execution_id: &str) -> Result<Option<ExecutionRecord>>;
        async fn create_checkpoint(
            &self,
            execution_id: &str,
            options: CheckpointOptions,
        ) -> Result<Checkpoint>;
        async fn resume_from_checkpoint(&self, checkpoint_id: &str) -> Result<ExecutionRecord>;
        async fn list_artifacts(&self, filter: ArtifactFilter) -> Result<Vec<ArtifactRecord>>;
        async fn remove_artifact(&self, artifact_id: &str) -> Result<()>;
    }
}

fn seeded_store() -> Arc<InMemoryStateStore> {
    let store = Arc::new(InMemoryStateStore::new());
    store.insert_execution(ExecutionRecord {
        id: "exec-1".to_string(),
        current_phase: 1,
        state: json!({ "phase": 1 }),
    });
    store
}

fn artifact(id: &str, phase: u32) -> ArtifactRecord {
    ArtifactRecord {
        id: id.to_string(),
        execution_id: "exec-1".to_string(),
        name: format!("artifact-{}", id),
        generated_by_phase: phase,
    }
}

fn rollback_error(execution_id: &str, phase: u32) -> StructuredError {
    StructuredError {
        id: "err-1".to_string(),
        timestamp: Utc::now(),
        message: "phase failed".to_string(),
        classification: ErrorClassification {
            strategy: RecoveryStrategy::Rollback,
            ..ErrorClassification::unknown()
        },
        context: ExecutionContext::new(execution_id, phase),
        chain: Vec::new(),
    }
}

#[tokio::test]
async fn creating_a_point_requires_a_known_execution() {
    let manager = RollbackManager::new(seeded_store(), RollbackConfig::default());
    let err = manager
        .create_rollback_point("ghost", "before phase")
        .await
        .unwrap_err();
    assert!(matches!(err, RecoveryError::ExecutionNotFound(_)));
}

#[tokio::test]
async fn point_cap_evicts_fifo() {
    let store = seeded_store();
    let config = RollbackConfig {
        max_rollback_points: 2,
        ..RollbackConfig::default()
    };
    let manager = RollbackManager::new(store, config);

    let first = manager
        .create_rollback_point("exec-1", "one")
        .await
        .unwrap();
    let second = manager
        .create_rollback_point("exec-1", "two")
        .await
        .unwrap();
    let third = manager
        .create_rollback_point("exec-1", "three")
        .await
        .unwrap();

    let ids: Vec<_> = manager
        .points_for("exec-1")
        .iter()
        .map(|p| p.id.clone())
        .collect();
    assert_eq!(ids, vec![second.id, third.id]);
    assert!(!ids.contains(&first.id));
}

#[tokio::test]
async fn rollback_restores_state_and_removes_later_artifacts() {
    let store = seeded_store();
    store.insert_artifact(artifact("a1", 1));
    let manager = RollbackManager::new(Arc::clone(&store) as Arc<dyn ExecutionStateStore>, RollbackConfig::default());

    let point = manager
        .create_rollback_point("exec-1", "end of phase 1")
        .await
        .unwrap();
    assert_eq!(point.phase, 1);
    assert_eq!(point.artifact_ids, vec!["a1"]);

    // Later phases produce more artifacts and more rollback points.
    store.advance_phase("exec-1", 2, json!({ "phase": 2 })).unwrap();
    store.insert_artifact(artifact("a2", 2));
    let later_point = manager
        .create_rollback_point("exec-1", "end of phase 2")
        .await
        .unwrap();
    store.advance_phase("exec-1", 3, json!({ "phase": 3 })).unwrap();
    store.insert_artifact(artifact("a3", 3));

    let outcome = manager.rollback(&point.id).await;
    assert!(outcome.success, "{:?}", outcome.error);
    assert_eq!(outcome.removed_artifacts, vec!["a2", "a3"]);
    assert!(outcome.failed_artifacts.is_empty());
    assert_eq!(outcome.restored_checkpoint.as_deref(), Some(point.checkpoint_id.as_str()));

    // Execution state is back at phase 1.
    let execution = store.get_execution("exec-1").await.unwrap().unwrap();
    assert_eq!(execution.current_phase, 1);
    assert_eq!(execution.state, json!({ "phase": 1 }));

    // Artifacts at or before the point survive.
    let remaining = store
        .list_artifacts(ArtifactFilter::for_execution("exec-1"))
        .await
        .unwrap();
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].id, "a1");

    // Later rollback points are no longer valid targets.
    let surviving: Vec<_> = manager
        .points_for("exec-1")
        .iter()
        .map(|p| p.id.clone())
        .collect();
    assert_eq!(surviving, vec![point.id]);
    let replay = manager.rollback(&later_point.id).await;
    assert!(!replay.success);
}

#[tokio::test]
async fn unknown_point_returns_a_failure_outcome() {
    let manager = RollbackManager::new(seeded_store(), RollbackConfig::default());
    let outcome = manager.rollback("nope").await;
    assert!(!outcome.success);
    assert_eq!(outcome.error.as_deref(), Some("Rollback point not found"));
    assert!(outcome.removed_artifacts.is_empty());
}

#[tokio::test]
async fn non_restorable_points_are_rejected() {
    let manager = RollbackManager::new(seeded_store(), RollbackConfig::default());
    let point = manager
        .create_rollback_point("exec-1", "pinned")
        .await
        .unwrap();

    assert!(manager.set_restorable(&point.id, false));
    let outcome = manager.rollback(&point.id).await;
    assert!(!outcome.success);
    assert!(outcome.error.unwrap().contains("non-restorable"));

    assert!(!manager.set_restorable("nope", false));
}

#[tokio::test]
async fn rollback_to_phase_and_latest_resolve_points() {
    let store = seeded_store();
    let manager = RollbackManager::new(Arc::clone(&store) as Arc<dyn ExecutionStateStore>, RollbackConfig::default());

    let phase1 = manager.create_rollback_point("exec-1", "p1").await.unwrap();
    store.advance_phase("exec-1", 2, json!({ "phase": 2 })).unwrap();
    let phase2 = manager.create_rollback_point("exec-1", "p2").await.unwrap();

    let outcome = manager.rollback_to_phase("exec-1", 2).await;
    assert!(outcome.success);
    assert_eq!(outcome.rollback_point_id.as_deref(), Some(phase2.id.as_str()));

    let outcome = manager.rollback_to_latest("exec-1").await;
    assert!(outcome.success);
    assert_eq!(outcome.rollback_point_id.as_deref(), Some(phase2.id.as_str()));

    let outcome = manager.rollback_to_phase("exec-1", 9).await;
    assert!(!outcome.success);
    let _ = phase1;

    let outcome = manager.rollback_to_latest("ghost").await;
    assert!(!outcome.success);
}

#[tokio::test]
async fn error_handling_prefers_the_previous_phase() {
    let store = seeded_store();
    let manager = RollbackManager::new(Arc::clone(&store) as Arc<dyn ExecutionStateStore>, RollbackConfig::default());

    let phase1 = manager.create_rollback_point("exec-1", "p1").await.unwrap();
    store.advance_phase("exec-1", 2, json!({ "phase": 2 })).unwrap();
    manager.create_rollback_point("exec-1", "p2").await.unwrap();

    // Failure in phase 2 rolls back to the phase-1 point.
    let outcome = manager
        .handle_error_with_rollback(&rollback_error("exec-1", 2))
        .await
        .unwrap();
    assert!(outcome.success);
    assert_eq!(outcome.rollback_point_id.as_deref(), Some(phase1.id.as_str()));
}

#[tokio::test]
async fn error_handling_ignores_other_strategies_and_missing_points() {
    let manager = RollbackManager::new(seeded_store(), RollbackConfig::default());

    let mut error = rollback_error("exec-1", 2);
    error.classification.strategy = RecoveryStrategy::Retry;
    assert!(manager.handle_error_with_rollback(&error).await.is_none());

    // Right strategy, but no points recorded.
    let error = rollback_error("exec-1", 2);
    assert!(manager.handle_error_with_rollback(&error).await.is_none());
}

#[tokio::test]
async fn error_handling_respects_the_auto_rollback_flag() {
    let store = seeded_store();
    let config = RollbackConfig {
        auto_rollback: false,
        ..RollbackConfig::default()
    };
    let manager = RollbackManager::new(store, config);
    manager.create_rollback_point("exec-1", "p1").await.unwrap();

    let error = rollback_error("exec-1", 2);
    assert!(manager.handle_error_with_rollback(&error).await.is_none());
}

#[tokio::test]
async fn checkpoint_restore_failures_are_reported_not_raised() {
    let mut store = MockStateStore::new();
    store.expect_get_execution().returning(|id| {
        Ok(Some(ExecutionRecord {
            id: id.to_string(),
            current_phase: 1,
            state: json!({}),
        }))
    });
    store.expect_create_checkpoint().returning(|id, options| {
        Ok(Checkpoint {
            id: "cp-1".to_string(),
            execution_id: id.to_string(),
            phase: 1,
            reason: options.reason,
            state: json!({}),
            created_at: Utc::now(),
        })
    });
    store.expect_list_artifacts().returning(|_| Ok(Vec::new()));
    store
        .expect_resume_from_checkpoint()
        .returning(|_| Err(RecoveryError::store("backend unavailable")));

    let manager = RollbackManager::new(Arc::new(store), RollbackConfig::default());
    let point = manager
        .create_rollback_point("exec-1", "before phase 2")
        .await
        .unwrap();

    let outcome = manager.rollback(&point.id).await;
    assert!(!outcome.success);
    assert!(outcome
        .error
        .unwrap()
        .contains("Failed to restore checkpoint"));
}
