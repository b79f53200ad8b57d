//! Failure classification.
//!
//! # Responsibilities
//! - Map an opaque failure (optional code, optional message) to a category
//! - Decide whether the failure is worth retrying
//!
//! # Design Decisions
//! - Pure and total: every input yields a classification
//! - Retry unless the failure is explicitly known to be permanent
//! - Codes match exactly, messages match case-insensitively

use std::borrow::Cow;
use std::fmt;

use serde::{Deserialize, Serialize};

const NETWORK_MESSAGES: &[&str] = &["network", "timeout", "fetch", "connection"];
const RATE_LIMIT_CODES: &[&str] = &["resource-exhausted", "too-many-requests"];
const RATE_LIMIT_MESSAGES: &[&str] = &["rate limit", "quota"];
const SERVER_CODES: &[&str] = &["internal", "unknown"];
const SERVER_MESSAGES: &[&str] = &["internal error", "service unavailable"];
const INTERRUPTED_CODES: &[&str] = &["aborted", "cancelled", "deadline-exceeded"];
const AUTH_CODES: &[&str] = &["permission-denied", "unauthenticated"];
const PERMANENT_CODES: &[&str] = &[
    "permission-denied",
    "unauthenticated",
    "not-found",
    "already-exists",
    "invalid-argument",
    "failed-precondition",
];

/// Anything the classifier can inspect.
///
/// Every method has a default so opaque error types can opt in with an empty
/// impl and be treated as "unknown, retryable".
pub trait Classify {
    /// Machine-readable code reported by the backend, e.g. `"unavailable"`.
    fn failure_code(&self) -> Option<&str> {
        None
    }

    /// Human-readable description.
    fn failure_message(&self) -> Option<Cow<'_, str>> {
        None
    }

    /// True when the failure was produced by an expired deadline.
    fn is_timeout(&self) -> bool {
        false
    }
}

impl<T: Classify + ?Sized> Classify for &T {
    fn failure_code(&self) -> Option<&str> {
        (**self).failure_code()
    }

    fn failure_message(&self) -> Option<Cow<'_, str>> {
        (**self).failure_message()
    }

    fn is_timeout(&self) -> bool {
        (**self).is_timeout()
    }
}

/// Failure taxonomy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorCategory {
    Network,
    RateLimit,
    Auth,
    Timeout,
    TransientServer,
    Permanent,
    Unknown,
}

impl ErrorCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCategory::Network => "network",
            ErrorCategory::RateLimit => "rate-limit",
            ErrorCategory::Auth => "auth",
            ErrorCategory::Timeout => "timeout",
            ErrorCategory::TransientServer => "transient-server",
            ErrorCategory::Permanent => "permanent",
            ErrorCategory::Unknown => "unknown",
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of classifying a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Classification {
    pub is_retryable: bool,
    pub category: ErrorCategory,
}

impl Classification {
    fn retryable(category: ErrorCategory) -> Self {
        Self { is_retryable: true, category }
    }

    fn fatal(category: ErrorCategory) -> Self {
        Self { is_retryable: false, category }
    }
}

/// Classify a failure. First matching rule wins.
pub fn classify<E: Classify + ?Sized>(failure: &E) -> Classification {
    let code = failure.failure_code();
    let message = failure
        .failure_message()
        .filter(|m| !m.is_empty())
        .map(|m| m.to_lowercase());

    if code.is_none() && message.is_none() {
        return Classification::retryable(ErrorCategory::Unknown);
    }

    let message = message.as_deref().unwrap_or("");
    let code_in = |set: &[&str]| code.is_some_and(|c| set.contains(&c));
    let message_has = |set: &[&str]| set.iter().any(|needle| message.contains(needle));

    if message_has(NETWORK_MESSAGES) || code == Some("unavailable") {
        let category = if failure.is_timeout() || message.contains("timeout") {
            ErrorCategory::Timeout
        } else {
            ErrorCategory::Network
        };
        return Classification::retryable(category);
    }

    if code_in(RATE_LIMIT_CODES) || message_has(RATE_LIMIT_MESSAGES) {
        return Classification::retryable(ErrorCategory::RateLimit);
    }

    if code_in(SERVER_CODES) || message_has(SERVER_MESSAGES) {
        return Classification::retryable(ErrorCategory::TransientServer);
    }

    if code_in(INTERRUPTED_CODES) {
        return Classification::retryable(ErrorCategory::TransientServer);
    }

    if code_in(PERMANENT_CODES) {
        let category = if code_in(AUTH_CODES) {
            ErrorCategory::Auth
        } else {
            ErrorCategory::Permanent
        };
        return Classification::fatal(category);
    }

    Classification::retryable(ErrorCategory::Unknown)
}

/// Shorthand for `classify(failure).is_retryable`.
pub fn is_retryable<E: Classify + ?Sized>(failure: &E) -> bool {
    classify(failure).is_retryable
}
