//! Authentication and session error types.
//!
//! Every variant carries only a generic, caller-safe description. The
//! specific cause of a rejection (which signature check failed, why a
//! session was dropped) is emitted through `tracing` at the point of
//! failure and never travels inside the error value.

use std::fmt;

/// Errors that can occur during authentication and session operations.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    /// The presented username or secret did not verify.
    ///
    /// Unknown users and wrong secrets are deliberately indistinguishable.
    #[error("Invalid credentials")]
    InvalidCredential,

    /// The access or refresh token is malformed, forged, expired, or revoked.
    #[error("Invalid token")]
    InvalidToken,

    /// A refresh token was presented after it had already been redeemed.
    ///
    /// This is a theft signal: the subject's whole chain has been revoked.
    #[error("Refresh token reuse detected")]
    ReuseDetected,

    /// The anti-forgery token is missing or was not issued for this session.
    #[error("CSRF token mismatch")]
    CsrfMismatch,

    /// The session does not exist, has expired, or no longer matches the client.
    #[error("Session not found")]
    SessionNotFound,

    /// The OAuth `state` parameter is unknown, expired, or already consumed.
    #[error("OAuth state mismatch")]
    OAuthStateMismatch,

    /// An external authentication step failed.
    #[error("Authentication failed")]
    AuthenticationFailed,

    /// An external call did not complete within its deadline.
    #[error("Upstream timeout during {operation}")]
    UpstreamTimeout {
        /// The bounded operation that timed out.
        operation: String,
    },

    /// An error occurred while storing or retrieving auth state.
    #[error("Storage error: {message}")]
    Storage {
        /// Description of the storage error.
        message: String,
    },

    /// The auth configuration is invalid.
    #[error("Configuration error: {message}")]
    Configuration {
        /// Description of the configuration error.
        message: String,
    },

    /// An unexpected internal error occurred.
    #[error("Internal error: {message}")]
    Internal {
        /// Description of the internal error.
        message: String,
    },
}

impl AuthError {
    /// Creates a new `UpstreamTimeout` error.
    #[must_use]
    pub fn upstream_timeout(operation: impl Into<String>) -> Self {
        Self::UpstreamTimeout {
            operation: operation.into(),
        }
    }

    /// Creates a new `Storage` error.
    #[must_use]
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage {
            message: message.into(),
        }
    }

    /// Creates a new `Configuration` error.
    #[must_use]
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Creates a new `Internal` error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Returns `true` if the failed operation may be retried by the caller.
    ///
    /// Only timeouts are retryable. Callers must still avoid replaying
    /// single-use inputs such as refresh tokens or authorization codes.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::UpstreamTimeout { .. })
    }

    /// Returns `true` if this is a client error (4xx category).
    #[must_use]
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            Self::InvalidCredential
                | Self::InvalidToken
                | Self::ReuseDetected
                | Self::CsrfMismatch
                | Self::SessionNotFound
                | Self::OAuthStateMismatch
                | Self::AuthenticationFailed
        )
    }

    /// Returns `true` if this is a server error (5xx category).
    #[must_use]
    pub fn is_server_error(&self) -> bool {
        matches!(
            self,
            Self::UpstreamTimeout { .. }
                | Self::Storage { .. }
                | Self::Configuration { .. }
                | Self::Internal { .. }
        )
    }

    /// Returns `true` if the error should be reported as a security event.
    #[must_use]
    pub fn is_security_event(&self) -> bool {
        matches!(
            self,
            Self::ReuseDetected | Self::CsrfMismatch | Self::OAuthStateMismatch
        )
    }

    /// Returns the error category for logging/monitoring purposes.
    #[must_use]
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::InvalidCredential | Self::AuthenticationFailed => ErrorCategory::Authentication,
            Self::InvalidToken | Self::ReuseDetected => ErrorCategory::Token,
            Self::SessionNotFound => ErrorCategory::Session,
            Self::CsrfMismatch => ErrorCategory::Forgery,
            Self::OAuthStateMismatch => ErrorCategory::Federation,
            Self::UpstreamTimeout { .. } | Self::Storage { .. } => ErrorCategory::Infrastructure,
            Self::Configuration { .. } => ErrorCategory::Configuration,
            Self::Internal { .. } => ErrorCategory::Internal,
        }
    }

    /// Returns the stable, machine-readable error code for this error.
    #[must_use]
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::InvalidCredential => "invalid_credentials",
            Self::InvalidToken => "invalid_token",
            Self::ReuseDetected => "invalid_grant",
            Self::CsrfMismatch => "csrf_mismatch",
            Self::SessionNotFound => "session_not_found",
            Self::OAuthStateMismatch => "invalid_state",
            Self::AuthenticationFailed => "access_denied",
            Self::UpstreamTimeout { .. } => "temporarily_unavailable",
            Self::Storage { .. } | Self::Configuration { .. } | Self::Internal { .. } => {
                "server_error"
            }
        }
    }

    /// Returns the description that is safe to show to the caller.
    ///
    /// Server-side variants hide their message; it is only logged.
    #[must_use]
    pub fn public_description(&self) -> String {
        match self {
            Self::Storage { .. } | Self::Configuration { .. } | Self::Internal { .. } => {
                "Internal server error".to_string()
            }
            Self::UpstreamTimeout { .. } => "Service temporarily unavailable".to_string(),
            other => other.to_string(),
        }
    }
}

impl From<crate::config::ConfigError> for AuthError {
    fn from(err: crate::config::ConfigError) -> Self {
        Self::configuration(err.to_string())
    }
}

/// Categories of authentication errors for logging and monitoring.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Identity verification failures.
    Authentication,
    /// Access and refresh token failures.
    Token,
    /// Server-side session failures.
    Session,
    /// Cross-site request forgery checks.
    Forgery,
    /// External identity provider flow failures.
    Federation,
    /// Infrastructure/storage errors.
    Infrastructure,
    /// Configuration errors.
    Configuration,
    /// Internal server errors.
    Internal,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Authentication => write!(f, "authentication"),
            Self::Token => write!(f, "token"),
            Self::Session => write!(f, "session"),
            Self::Forgery => write!(f, "forgery"),
            Self::Federation => write!(f, "federation"),
            Self::Infrastructure => write!(f, "infrastructure"),
            Self::Configuration => write!(f, "configuration"),
            Self::Internal => write!(f, "internal"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_is_generic() {
        assert_eq!(AuthError::InvalidCredential.to_string(), "Invalid credentials");
        assert_eq!(AuthError::InvalidToken.to_string(), "Invalid token");
        assert_eq!(AuthError::SessionNotFound.to_string(), "Session not found");
        assert_eq!(
            AuthError::upstream_timeout("code exchange").to_string(),
            "Upstream timeout during code exchange"
        );
    }

    #[test]
    fn test_only_timeouts_are_retryable() {
        assert!(AuthError::upstream_timeout("hash").is_retryable());
        assert!(!AuthError::ReuseDetected.is_retryable());
        assert!(!AuthError::InvalidToken.is_retryable());
        assert!(!AuthError::storage("down").is_retryable());
    }

    #[test]
    fn test_error_predicates() {
        assert!(AuthError::CsrfMismatch.is_client_error());
        assert!(!AuthError::CsrfMismatch.is_server_error());
        assert!(AuthError::storage("down").is_server_error());
        assert!(AuthError::ReuseDetected.is_security_event());
        assert!(!AuthError::InvalidCredential.is_security_event());
    }

    #[test]
    fn test_error_category() {
        assert_eq!(
            AuthError::InvalidCredential.category(),
            ErrorCategory::Authentication
        );
        assert_eq!(AuthError::ReuseDetected.category(), ErrorCategory::Token);
        assert_eq!(AuthError::SessionNotFound.category(), ErrorCategory::Session);
        assert_eq!(
            AuthError::upstream_timeout("x").category(),
            ErrorCategory::Infrastructure
        );
        assert_eq!(ErrorCategory::Forgery.to_string(), "forgery");
    }

    #[test]
    fn test_public_description_hides_internals() {
        let err = AuthError::storage("connection refused to 10.0.0.3");
        assert_eq!(err.public_description(), "Internal server error");
        assert_eq!(err.error_code(), "server_error");
        assert_eq!(
            AuthError::OAuthStateMismatch.public_description(),
            "OAuth state mismatch"
        );
    }
}
