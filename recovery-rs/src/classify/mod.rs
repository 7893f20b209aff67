//! Error classification
//!
//! The classifier maps an arbitrary error to an [`ErrorClassification`]:
//! a category, a severity, retryability/recoverability flags, and a
//! suggested recovery strategy. It scans an ordered pattern table
//! (custom patterns registered through [`ErrorClassifier::add_pattern`]
//! first, then the built-ins) and returns the first match. When nothing
//! matches, a heuristic fallback inspects the error type and message
//! substrings, so category and severity are always set.

mod patterns;

use std::error::Error as StdError;

use chrono::Utc;
use regex::Regex;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use tool_client_sdk::ClientError;

use crate::context::{ExecutionContext, StructuredError};
use crate::error::{RecoveryError, Result};

/// Broad failure category
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorCategory {
    /// Temporary condition expected to clear on its own
    Transient,
    /// The input or produced data failed validation
    Validation,
    /// A resource limit was hit (memory, disk, rate limits)
    Resource,
    /// A programming fault in the failing component
    Logic,
    /// An upstream service misbehaved
    External,
    /// Security or integrity violation
    Critical,
    /// Nothing recognized the failure
    Unknown,
}

/// Failure severity, ordered from least to most severe
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorSeverity {
    Debug,
    Info,
    Warning,
    Error,
    Critical,
    Fatal,
}

/// Suggested recovery strategy attached to a classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecoveryStrategy {
    /// Retry the failed operation, optionally after a delay
    Retry,
    /// Restore a rollback point and undo later work
    Rollback,
    /// Skip the failed operation and continue
    Skip,
    /// Hand the decision up the escalation chain
    Escalate,
    /// Stop the execution
    Abort,
    /// Switch to an alternative implementation
    Fallback,
    /// Pause and re-attempt once the condition clears
    Wait,
    /// Take no action
    None,
}

/// The classifier's verdict for one error
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorClassification {
    pub category: ErrorCategory,
    pub severity: ErrorSeverity,
    /// Whether an immediate retry is worthwhile
    pub retryable: bool,
    /// Whether any automatic recovery path applies
    pub recoverable: bool,
    /// Id of the pattern that matched, when one did
    pub matched_pattern: Option<String>,
    pub strategy: RecoveryStrategy,
    /// Suggested delay before a retry
    pub retry_delay_ms: Option<u64>,
    /// Suggested retry budget
    pub max_retries: Option<u32>,
}

impl ErrorClassification {
    /// Classification for a missing or unrecognizable error.
    ///
    /// Unlike heuristic fallbacks, this is not marked recoverable: with
    /// no error at all there is nothing an automatic path can act on.
    pub fn unknown() -> Self {
        Self {
            category: ErrorCategory::Unknown,
            severity: ErrorSeverity::Error,
            retryable: false,
            recoverable: false,
            matched_pattern: None,
            strategy: RecoveryStrategy::Escalate,
            retry_delay_ms: None,
            max_retries: None,
        }
    }
}

/// One entry of the ordered pattern table.
///
/// The message regex is required; code and source-chain regexes narrow
/// the match further when present.
#[derive(Debug, Clone)]
pub struct ErrorPattern {
    /// Stable pattern id, recorded in `matched_pattern`
    pub id: String,
    message: Regex,
    code: Option<Regex>,
    chain: Option<Regex>,
    classification: ErrorClassification,
}

impl ErrorPattern {
    /// Build a pattern from a message regex and the classification it
    /// assigns
    pub fn new(
        id: impl Into<String>,
        message_pattern: &str,
        classification: ErrorClassification,
    ) -> Result<Self> {
        let message = Regex::new(message_pattern)
            .map_err(|e| RecoveryError::invalid_pattern(e.to_string()))?;
        Ok(Self {
            id: id.into(),
            message,
            code: None,
            chain: None,
            classification,
        })
    }

    /// Require the error code to match as well
    pub fn with_code(mut self, code_pattern: &str) -> Result<Self> {
        self.code = Some(
            Regex::new(code_pattern).map_err(|e| RecoveryError::invalid_pattern(e.to_string()))?,
        );
        Ok(self)
    }

    /// Require the source chain to match as well
    pub fn with_chain(mut self, chain_pattern: &str) -> Result<Self> {
        self.chain = Some(
            Regex::new(chain_pattern).map_err(|e| RecoveryError::invalid_pattern(e.to_string()))?,
        );
        Ok(self)
    }

    fn matches(&self, message: &str, code: Option<&str>, chain: &str) -> bool {
        if !self.message.is_match(message) {
            return false;
        }
        if let Some(code_re) = &self.code {
            match code {
                Some(code) if code_re.is_match(code) => {}
                _ => return false,
            }
        }
        if let Some(chain_re) = &self.chain {
            if !chain_re.is_match(chain) {
                return false;
            }
        }
        true
    }
}

/// Ordered-table error classifier with a heuristic fallback
#[derive(Debug, Default)]
pub struct ErrorClassifier {
    custom: Vec<ErrorPattern>,
}

impl ErrorClassifier {
    /// Classifier with only the built-in pattern table
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a custom pattern.
    ///
    /// Custom patterns are checked before the built-ins, in registration
    /// order; the first match wins.
    pub fn add_pattern(&mut self, pattern: ErrorPattern) {
        self.custom.push(pattern);
    }

    /// Classify an error. A missing error yields the `unknown`
    /// classification with an `escalate` suggestion.
    pub fn classify(&self, error: Option<&(dyn StdError + 'static)>) -> ErrorClassification {
        let Some(error) = error else {
            return ErrorClassification::unknown();
        };

        let message = error.to_string();
        let code = error.downcast_ref::<ClientError>().map(ClientError::code);
        let chain = source_chain(error).join(": ");

        for pattern in self.custom.iter().chain(patterns::built_in().iter()) {
            if pattern.matches(&message, code, &chain) {
                let mut classification = pattern.classification.clone();
                classification.matched_pattern = Some(pattern.id.clone());
                log::debug!("error matched pattern '{}': {}", pattern.id, message);
                return classification;
            }
        }

        self.heuristic(error, &message)
    }

    /// Whether an error is worth retrying, per its classification
    pub fn is_retryable(&self, error: Option<&(dyn StdError + 'static)>) -> bool {
        self.classify(error).retryable
    }

    /// Classify an error and wrap it with identity, timestamp, and
    /// execution context
    pub fn create_structured_error(
        &self,
        error: &(dyn StdError + 'static),
        context: ExecutionContext,
    ) -> StructuredError {
        StructuredError {
            id: Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            message: error.to_string(),
            classification: self.classify(Some(error)),
            context,
            chain: source_chain(error),
        }
    }

    /// Best-effort guess when no pattern matches.
    ///
    /// Heuristic results are always marked recoverable: an error we can
    /// describe at all is one the pipeline can at least escalate with
    /// context.
    fn heuristic(&self, error: &(dyn StdError + 'static), message: &str) -> ErrorClassification {
        let mut classification = ErrorClassification {
            recoverable: true,
            ..ErrorClassification::unknown()
        };

        if let Some(client) = error.downcast_ref::<ClientError>() {
            match client {
                ClientError::Connection(_) | ClientError::Timeout(_) => {
                    classification.category = ErrorCategory::Transient;
                    classification.severity = ErrorSeverity::Warning;
                    classification.retryable = true;
                    classification.strategy = RecoveryStrategy::Retry;
                    classification.retry_delay_ms = Some(1_000);
                    classification.max_retries = Some(3);
                }
                ClientError::ResourceExhausted(_) => {
                    classification.category = ErrorCategory::Resource;
                    classification.severity = ErrorSeverity::Warning;
                    classification.retryable = true;
                    classification.strategy = RecoveryStrategy::Wait;
                    classification.retry_delay_ms = Some(5_000);
                }
                ClientError::CircuitOpen(_) => {
                    classification.category = ErrorCategory::External;
                    classification.severity = ErrorSeverity::Warning;
                    classification.strategy = RecoveryStrategy::Wait;
                }
                ClientError::Validation(_) | ClientError::ToolNotFound(_) => {
                    classification.category = ErrorCategory::Validation;
                    classification.severity = ErrorSeverity::Warning;
                    classification.strategy = RecoveryStrategy::Escalate;
                }
                ClientError::ToolExecution(_) | ClientError::Protocol(_) => {
                    classification.category = ErrorCategory::External;
                    classification.strategy = RecoveryStrategy::Escalate;
                }
                _ => {
                    classification.category = ErrorCategory::Logic;
                    classification.strategy = RecoveryStrategy::Escalate;
                }
            }
            return classification;
        }

        let lowered = message.to_ascii_lowercase();
        if ["network", "socket", "connection", "timed out", "timeout"]
            .iter()
            .any(|s| lowered.contains(s))
        {
            classification.category = ErrorCategory::Transient;
            classification.severity = ErrorSeverity::Warning;
            classification.retryable = true;
            classification.strategy = RecoveryStrategy::Retry;
        } else if ["memory", "disk", "quota", "rate limit"]
            .iter()
            .any(|s| lowered.contains(s))
        {
            classification.category = ErrorCategory::Resource;
            classification.strategy = RecoveryStrategy::Wait;
        }
        classification
    }
}

/// Messages of the error's `source()` chain, outermost first
fn source_chain(error: &(dyn StdError + 'static)) -> Vec<String> {
    let mut chain = vec![error.to_string()];
    let mut current = error.source();
    while let Some(cause) = current {
        chain.push(cause.to_string());
        current = cause.source();
    }
    chain
}
