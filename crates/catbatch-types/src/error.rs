//! Structured error model for remote catalog calls.
//!
//! [`ServiceError`] carries a [`ServiceErrorKind`] plus the service's own
//! error code and message. Construct via kind-specific factory methods.
//! Whether a kind is skipped, retried or failed is decided by the engine's
//! classifier, not here.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Broad classification of a remote-call failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[non_exhaustive]
#[serde(rename_all = "snake_case")]
pub enum ServiceErrorKind {
    /// The entity or a dependent sub-resource does not exist.
    NotFound,
    /// Request rate exceeded.
    Throttled,
    /// The call did not complete in time.
    Timeout,
    /// Transport failure or server-side error.
    Unavailable,
    /// Missing credentials or insufficient permissions.
    AccessDenied,
    /// The service rejected the request arguments.
    InvalidInput,
    /// Conflicting concurrent modification.
    Conflict,
    /// Anything the adapter could not map.
    Internal,
}

impl fmt::Display for ServiceErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::NotFound => "not_found",
            Self::Throttled => "throttled",
            Self::Timeout => "timeout",
            Self::Unavailable => "unavailable",
            Self::AccessDenied => "access_denied",
            Self::InvalidInput => "invalid_input",
            Self::Conflict => "conflict",
            Self::Internal => "internal",
        };
        f.write_str(s)
    }
}

/// Error returned by a remote catalog call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[error("[{kind}] {code}: {message}")]
pub struct ServiceError {
    pub kind: ServiceErrorKind,
    pub code: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
}

impl ServiceError {
    #[must_use]
    pub fn new(
        kind: ServiceErrorKind,
        code: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            code: code.into(),
            message: message.into(),
            status: None,
        }
    }

    /// Entity (or dependent resource) not found.
    #[must_use]
    pub fn not_found(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ServiceErrorKind::NotFound, code, message)
    }

    /// Throttling / rate limit.
    #[must_use]
    pub fn throttled(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ServiceErrorKind::Throttled, code, message)
    }

    #[must_use]
    pub fn timeout(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ServiceErrorKind::Timeout, code, message)
    }

    /// Transport or 5xx failure.
    #[must_use]
    pub fn unavailable(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ServiceErrorKind::Unavailable, code, message)
    }

    #[must_use]
    pub fn access_denied(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ServiceErrorKind::AccessDenied, code, message)
    }

    #[must_use]
    pub fn invalid_input(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ServiceErrorKind::InvalidInput, code, message)
    }

    #[must_use]
    pub fn conflict(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ServiceErrorKind::Conflict, code, message)
    }

    #[must_use]
    pub fn internal(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ServiceErrorKind::Internal, code, message)
    }

    /// Attach the transport status code the error was mapped from.
    #[must_use]
    pub fn with_status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }

    #[must_use]
    pub fn is_not_found(&self) -> bool {
        self.kind == ServiceErrorKind::NotFound
    }
}
