//! Built-in classifier pattern table
//!
//! A representative seed, scanned in order after any custom patterns;
//! deployments extend it through `ErrorClassifier::add_pattern`. Order
//! matters: security signatures come before the generic validation
//! pattern so an invalid signature is never downgraded to a validation
//! failure.

use once_cell::sync::Lazy;

use super::{ErrorCategory, ErrorClassification, ErrorPattern, ErrorSeverity, RecoveryStrategy};

/// The built-in patterns, in match order
pub(super) fn built_in() -> &'static [ErrorPattern] {
    &BUILT_IN
}

static BUILT_IN: Lazy<Vec<ErrorPattern>> = Lazy::new(|| {
    vec![
        pattern(
            "transient-timeout",
            r"(?i)\b(timed\s?out|timeout)\b",
            ErrorClassification {
                category: ErrorCategory::Transient,
                severity: ErrorSeverity::Warning,
                retryable: true,
                recoverable: true,
                matched_pattern: None,
                strategy: RecoveryStrategy::Retry,
                retry_delay_ms: Some(1_000),
                max_retries: Some(3),
            },
        ),
        pattern(
            "transient-connection",
            r"(?i)\b(connection (refused|reset|closed|failed|error)|broken pipe|network|socket|unreachable)\b",
            ErrorClassification {
                category: ErrorCategory::Transient,
                severity: ErrorSeverity::Warning,
                retryable: true,
                recoverable: true,
                matched_pattern: None,
                strategy: RecoveryStrategy::Retry,
                retry_delay_ms: Some(1_000),
                max_retries: Some(3),
            },
        ),
        pattern(
            "critical-security",
            r"(?i)\b(invalid signature|signature (mismatch|verification)|unauthorized|permission denied|access denied|tampered)\b",
            ErrorClassification {
                category: ErrorCategory::Critical,
                severity: ErrorSeverity::Critical,
                retryable: false,
                recoverable: false,
                matched_pattern: None,
                strategy: RecoveryStrategy::Abort,
                retry_delay_ms: None,
                max_retries: None,
            },
        ),
        pattern(
            "validation",
            r"(?i)\b(validation|invalid (input|argument|parameter|value)|schema|malformed|missing (field|parameter))\b",
            ErrorClassification {
                category: ErrorCategory::Validation,
                severity: ErrorSeverity::Warning,
                retryable: false,
                recoverable: true,
                matched_pattern: None,
                strategy: RecoveryStrategy::Escalate,
                retry_delay_ms: None,
                max_retries: None,
            },
        ),
        pattern(
            "resource-exhausted",
            r"(?i)\b(out of memory|no space left|disk full|quota exceeded|rate limit|too many requests|resource exhausted)\b",
            ErrorClassification {
                category: ErrorCategory::Resource,
                severity: ErrorSeverity::Error,
                retryable: true,
                recoverable: true,
                matched_pattern: None,
                strategy: RecoveryStrategy::Wait,
                retry_delay_ms: Some(5_000),
                max_retries: Some(2),
            },
        ),
        pattern(
            "external-service",
            r"(?i)\b(bad gateway|service unavailable|gateway timeout|upstream|50[234])\b",
            ErrorClassification {
                category: ErrorCategory::External,
                severity: ErrorSeverity::Error,
                retryable: true,
                recoverable: true,
                matched_pattern: None,
                strategy: RecoveryStrategy::Retry,
                retry_delay_ms: Some(2_000),
                max_retries: Some(3),
            },
        ),
        pattern(
            "logic-fault",
            r"(?i)\b(null pointer|undefined (variable|reference)|type error|reference error|division by zero|index out of (range|bounds)|assertion failed)\b",
            ErrorClassification {
                category: ErrorCategory::Logic,
                severity: ErrorSeverity::Error,
                retryable: false,
                recoverable: true,
                matched_pattern: None,
                strategy: RecoveryStrategy::Rollback,
                retry_delay_ms: None,
                max_retries: None,
            },
        ),
    ]
});

fn pattern(id: &str, message: &str, classification: ErrorClassification) -> ErrorPattern {
    ErrorPattern::new(id, message, classification).expect("built-in pattern compiles")
}
