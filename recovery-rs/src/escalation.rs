//! Escalation manager
//!
//! Decides whether a classified error can be resolved automatically or
//! must wait for a human. Automatic resolution runs through registered
//! [`EscalationHandler`]s in ascending minimum-severity order; anything
//! unresolved becomes a pending escalation with a bounded response
//! window and an immediate, non-blocking `wait` response.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::classify::{ErrorCategory, ErrorSeverity, RecoveryStrategy};
use crate::config::EscalationConfig;
use crate::context::StructuredError;

/// Authority tier required to decide a recovery action
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EscalationLevel {
    /// Resolvable by automatic handlers
    Auto,
    /// Needs a supervising agent
    Supervisor,
    /// Needs the owning team
    Team,
    /// Needs a human decision
    Human,
}

impl EscalationLevel {
    /// Level is derived purely from severity
    pub fn for_severity(severity: ErrorSeverity) -> Self {
        match severity {
            ErrorSeverity::Fatal => EscalationLevel::Human,
            ErrorSeverity::Critical => EscalationLevel::Team,
            ErrorSeverity::Error => EscalationLevel::Supervisor,
            _ => EscalationLevel::Auto,
        }
    }
}

/// One escalated failure awaiting a decision
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EscalationRequest {
    pub id: String,
    pub error: StructuredError,
    pub level: EscalationLevel,
    /// Candidate recovery actions, the classifier's suggestion first
    pub options: Vec<RecoveryStrategy>,
    pub created_at: DateTime<Utc>,
}

/// Who resolved an escalation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DecidedBy {
    System,
    Human,
}

/// The decision for one escalation request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EscalationResponse {
    pub request_id: String,
    pub action: RecoveryStrategy,
    pub decided_by: DecidedBy,
    pub decided_at: DateTime<Utc>,
    pub reason: Option<String>,
}

impl EscalationResponse {
    fn system(request_id: &str, action: RecoveryStrategy, reason: impl Into<String>) -> Self {
        Self {
            request_id: request_id.to_string(),
            action,
            decided_by: DecidedBy::System,
            decided_at: Utc::now(),
            reason: Some(reason.into()),
        }
    }
}

/// An automatic decision returned by a handler
#[derive(Debug, Clone)]
pub struct HandlerDecision {
    pub action: RecoveryStrategy,
    pub reason: String,
}

/// One rung of the automatic escalation ladder.
///
/// A handler is consulted when the error's severity is at least
/// `min_severity` and the request's level is at most `max_level`; it may
/// still decline by returning `None`, falling through to the next
/// handler.
#[async_trait]
pub trait EscalationHandler: Send + Sync {
    fn name(&self) -> &str;
    fn min_severity(&self) -> ErrorSeverity;
    fn max_level(&self) -> EscalationLevel;
    async fn handle(&self, request: &EscalationRequest) -> Option<HandlerDecision>;
}

/// Retries retryable errors at the `auto` level
struct AutoRetryHandler;

#[async_trait]
impl EscalationHandler for AutoRetryHandler {
    fn name(&self) -> &str {
        "auto-retry"
    }

    fn min_severity(&self) -> ErrorSeverity {
        ErrorSeverity::Debug
    }

    fn max_level(&self) -> EscalationLevel {
        EscalationLevel::Auto
    }

    async fn handle(&self, request: &EscalationRequest) -> Option<HandlerDecision> {
        request
            .error
            .classification
            .retryable
            .then(|| HandlerDecision {
                action: RecoveryStrategy::Retry,
                reason: "error is retryable".to_string(),
            })
    }
}

/// Skips warning-severity validation failures at the `auto` level
struct AutoSkipHandler;

#[async_trait]
impl EscalationHandler for AutoSkipHandler {
    fn name(&self) -> &str {
        "auto-skip"
    }

    fn min_severity(&self) -> ErrorSeverity {
        ErrorSeverity::Warning
    }

    fn max_level(&self) -> EscalationLevel {
        EscalationLevel::Auto
    }

    async fn handle(&self, request: &EscalationRequest) -> Option<HandlerDecision> {
        let classification = &request.error.classification;
        (classification.category == ErrorCategory::Validation
            && classification.severity == ErrorSeverity::Warning)
            .then(|| HandlerDecision {
                action: RecoveryStrategy::Skip,
                reason: "non-blocking validation failure".to_string(),
            })
    }
}

struct PendingEscalation {
    request: EscalationRequest,
    expires_at: Instant,
}

/// Routes classified errors to automatic handlers or a human queue
pub struct EscalationManager {
    config: EscalationConfig,
    handlers: Vec<Arc<dyn EscalationHandler>>,
    pending: Mutex<HashMap<String, PendingEscalation>>,
    counts: Mutex<HashMap<String, u32>>,
}

impl EscalationManager {
    /// Manager with the built-in auto-retry and auto-skip handlers
    pub fn new(config: EscalationConfig) -> Self {
        let mut manager = Self {
            config,
            handlers: Vec::new(),
            pending: Mutex::new(HashMap::new()),
            counts: Mutex::new(HashMap::new()),
        };
        manager.add_handler(Arc::new(AutoRetryHandler));
        manager.add_handler(Arc::new(AutoSkipHandler));
        manager
    }

    /// Register a handler; handlers are consulted in ascending
    /// `min_severity` order, registration order breaking ties
    pub fn add_handler(&mut self, handler: Arc<dyn EscalationHandler>) {
        self.handlers.push(handler);
        self.handlers.sort_by_key(|h| h.min_severity());
    }

    /// Whether an error of this severity should be escalated at all
    pub fn should_escalate(&self, severity: ErrorSeverity) -> bool {
        self.config.auto_escalate && self.config.escalation_severities.contains(&severity)
    }

    /// Escalate a classified error.
    ///
    /// Returns synchronously in every case: an automatic decision, an
    /// `abort` once the per-execution quota is exceeded, or a `wait`
    /// response while the request sits in the pending queue.
    pub async fn escalate(&self, error: StructuredError) -> EscalationResponse {
        let severity = error.classification.severity;
        let suggested = error.classification.strategy;
        let request = EscalationRequest {
            id: Uuid::new_v4().to_string(),
            level: EscalationLevel::for_severity(severity),
            options: candidate_options(suggested),
            created_at: Utc::now(),
            error,
        };

        let over_quota = {
            let mut counts = self.counts.lock().unwrap();
            let count = counts
                .entry(request.error.context.execution_id.clone())
                .or_insert(0);
            *count += 1;
            *count > self.config.max_escalations_per_execution
        };
        if over_quota {
            log::warn!(
                "escalation quota exceeded for execution '{}', aborting",
                request.error.context.execution_id
            );
            return EscalationResponse::system(
                &request.id,
                RecoveryStrategy::Abort,
                format!(
                    "exceeded {} escalations for this execution",
                    self.config.max_escalations_per_execution
                ),
            );
        }

        if self.config.auto_escalate {
            for handler in &self.handlers {
                if severity < handler.min_severity() || request.level > handler.max_level() {
                    continue;
                }
                if let Some(decision) = handler.handle(&request).await {
                    log::debug!(
                        "escalation {} resolved by handler '{}': {:?}",
                        request.id,
                        handler.name(),
                        decision.action
                    );
                    return EscalationResponse::system(&request.id, decision.action, decision.reason);
                }
            }
        }

        let request_id = request.id.clone();
        let expires_at = Instant::now() + self.config.human_response_timeout();
        log::info!(
            "escalation {} queued at level {:?} for execution '{}'",
            request_id,
            request.level,
            request.error.context.execution_id
        );
        self.pending.lock().unwrap().insert(
            request_id.clone(),
            PendingEscalation {
                request,
                expires_at,
            },
        );
        EscalationResponse::system(&request_id, RecoveryStrategy::Wait, "queued for human decision")
    }

    /// Requests currently waiting for a decision
    pub fn pending_requests(&self) -> Vec<EscalationRequest> {
        self.pending
            .lock()
            .unwrap()
            .values()
            .map(|p| p.request.clone())
            .collect()
    }

    /// Resolve a pending escalation with a human decision.
    ///
    /// Returns `None` when the id is unknown or already resolved.
    pub fn respond_to_escalation(
        &self,
        request_id: &str,
        action: RecoveryStrategy,
        reason: Option<String>,
    ) -> Option<EscalationResponse> {
        let pending = self.pending.lock().unwrap().remove(request_id)?;
        log::info!(
            "escalation {} resolved by human: {:?}",
            pending.request.id,
            action
        );
        Some(EscalationResponse {
            request_id: pending.request.id,
            action,
            decided_by: DecidedBy::Human,
            decided_at: Utc::now(),
            reason,
        })
    }

    /// Drop the bookkeeping for a finished execution: its quota counter
    /// and any escalations of it still waiting for a decision.
    pub fn clear_execution(&self, execution_id: &str) {
        self.counts.lock().unwrap().remove(execution_id);
        self.pending
            .lock()
            .unwrap()
            .retain(|_, p| p.request.error.context.execution_id != execution_id);
    }

    /// Resolve every pending escalation whose response window elapsed,
    /// applying the configured timeout action.
    ///
    /// Expiry is pull-based: the surrounding system must call this on a
    /// periodic cadence (shorter than `human_response_timeout_ms`, e.g.
    /// alongside its scheduler tick); nothing expires between calls.
    pub fn process_expired_escalations(&self) -> Vec<EscalationResponse> {
        let now = Instant::now();
        let expired: Vec<PendingEscalation> = {
            let mut pending = self.pending.lock().unwrap();
            let ids: Vec<String> = pending
                .iter()
                .filter(|(_, p)| p.expires_at <= now)
                .map(|(id, _)| id.clone())
                .collect();
            ids.into_iter().filter_map(|id| pending.remove(&id)).collect()
        };

        expired
            .into_iter()
            .map(|p| {
                log::warn!(
                    "escalation {} expired without a human response, applying {:?}",
                    p.request.id,
                    self.config.timeout_action
                );
                EscalationResponse::system(
                    &p.request.id,
                    self.config.timeout_action,
                    "human response window elapsed",
                )
            })
            .collect()
    }
}

/// Candidate actions offered alongside a request, suggestion first
fn candidate_options(suggested: RecoveryStrategy) -> Vec<RecoveryStrategy> {
    let mut options = vec![suggested];
    for option in [
        RecoveryStrategy::Retry,
        RecoveryStrategy::Rollback,
        RecoveryStrategy::Skip,
        RecoveryStrategy::Abort,
    ] {
        if option != suggested {
            options.push(option);
        }
    }
    options
}
