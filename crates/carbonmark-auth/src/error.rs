//! Identity resolution error types.
//!
//! Two families live here:
//!
//! - [`AuthError`] is what callers of the resolver see. Every variant except
//!   `Configuration` renders as the same 401 response; the detailed cause is
//!   only available in logs and in the auth monitor.
//! - [`StoreError`] is what profile store collaborators return. Its
//!   transient/fatal split decides whether a strategy retries in place or
//!   escalates to the next strategy.

use std::time::Duration;

use axum::{
    Json,
    http::{HeaderMap, HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use serde_json::json;

/// The message shown to callers for every authentication failure.
pub const CREDENTIALS_REJECTED: &str = "Could not validate credentials";

// =============================================================================
// Auth Error
// =============================================================================

/// Errors surfaced by the identity resolver.
#[derive(Debug, Clone, thiserror::Error)]
pub enum AuthError {
    /// The request carried no bearer token.
    #[error("Missing bearer credentials")]
    MissingCredentials,

    /// The token verification gateway rejected the token.
    #[error("Invalid token: {message}")]
    InvalidToken {
        /// Description of why the token was rejected.
        message: String,
    },

    /// Every resolution strategy was exhausted for the subject.
    #[error("Unable to resolve profile for subject {subject_id}")]
    Unresolvable {
        /// The subject whose profile could not be resolved.
        subject_id: String,
    },

    /// The resolver is misconfigured.
    #[error("Configuration error: {message}")]
    Configuration {
        /// Description of the configuration error.
        message: String,
    },
}

impl AuthError {
    /// Creates a new `InvalidToken` error.
    #[must_use]
    pub fn invalid_token(message: impl Into<String>) -> Self {
        Self::InvalidToken {
            message: message.into(),
        }
    }

    /// Creates a new `Unresolvable` error.
    #[must_use]
    pub fn unresolvable(subject_id: impl Into<String>) -> Self {
        Self::Unresolvable {
            subject_id: subject_id.into(),
        }
    }

    /// Creates a new `Configuration` error.
    #[must_use]
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Returns the HTTP status code for this error.
    #[must_use]
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Configuration { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            _ => StatusCode::UNAUTHORIZED,
        }
    }

    /// Returns `true` if this error means the caller is not authenticated.
    #[must_use]
    pub fn is_rejection(&self) -> bool {
        self.status_code() == StatusCode::UNAUTHORIZED
    }
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let status = self.status_code();

        if self.is_rejection() {
            tracing::debug!(error = %self, "Rejecting request credentials");
        } else {
            tracing::error!(error = %self, "Identity resolver failure");
        }

        let detail = if self.is_rejection() {
            CREDENTIALS_REJECTED
        } else {
            "Internal server error"
        };

        let mut headers = HeaderMap::new();
        if status == StatusCode::UNAUTHORIZED {
            headers.insert(header::WWW_AUTHENTICATE, HeaderValue::from_static("Bearer"));
        }

        (status, headers, Json(json!({ "detail": detail }))).into_response()
    }
}

// =============================================================================
// Store Error
// =============================================================================

/// Errors returned by profile store collaborators.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    /// Connection reset, temporary unavailability, and similar.
    #[error("Transient store error: {message}")]
    Transient {
        /// Description of the failure.
        message: String,
    },

    /// A failure that retrying will not fix.
    #[error("Fatal store error: {message}")]
    Fatal {
        /// Description of the failure.
        message: String,
    },

    /// The query did not complete within its time budget.
    #[error("Store query timed out after {}ms", after.as_millis())]
    Timeout {
        /// The budget that was exceeded.
        after: Duration,
    },

    /// The call was rejected without reaching the store.
    #[error("Circuit breaker '{breaker}' is open")]
    CircuitOpen {
        /// Name of the open breaker.
        breaker: String,
    },
}

impl StoreError {
    /// Creates a new `Transient` error.
    #[must_use]
    pub fn transient(message: impl Into<String>) -> Self {
        Self::Transient {
            message: message.into(),
        }
    }

    /// Creates a new `Fatal` error.
    #[must_use]
    pub fn fatal(message: impl Into<String>) -> Self {
        Self::Fatal {
            message: message.into(),
        }
    }

    /// Returns `true` if retrying the same query may succeed.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient { .. } | Self::Timeout { .. })
    }
}

// =============================================================================
// Tests
// =============================================================================
