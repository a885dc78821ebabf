//! Mapping of auth failures to HTTP responses.
//!
//! Bodies follow the OAuth 2.0 error shape
//! `{"error": "...", "error_description": "..."}` with generic descriptions
//! only.

use authlane_auth::AuthError;
use axum::{
    Json,
    http::{HeaderMap, HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use serde_json::json;

/// Seconds a client should wait before retrying after an upstream timeout.
const RETRY_AFTER_SECS: &str = "5";

#[derive(Debug)]
pub enum ApiError {
    /// A failure reported by the auth service.
    Auth(AuthError),
    /// No credentials were presented.
    Unauthenticated,
    /// The route exists but the feature is switched off.
    NotFound,
    /// The request body could not be understood.
    BadRequest(&'static str),
}

impl From<AuthError> for ApiError {
    fn from(err: AuthError) -> Self {
        Self::Auth(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code, description) = error_details(&self);

        if status.is_server_error() {
            if let Self::Auth(err) = &self {
                if err.is_retryable() {
                    tracing::warn!(error = %err, "Upstream unavailable");
                } else {
                    tracing::error!(error = %err, category = %err.category(), "Request failed");
                }
            }
        }

        let mut headers = HeaderMap::new();
        headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-store"));

        if status == StatusCode::UNAUTHORIZED {
            let www_auth = build_www_authenticate_header(code, &description);
            if let Ok(value) = HeaderValue::from_str(&www_auth) {
                headers.insert(header::WWW_AUTHENTICATE, value);
            }
        }
        if status == StatusCode::SERVICE_UNAVAILABLE {
            headers.insert(header::RETRY_AFTER, HeaderValue::from_static(RETRY_AFTER_SECS));
        }

        let body = json!({
            "error": code,
            "error_description": description,
        });
        (status, headers, Json(body)).into_response()
    }
}

/// Returns (HTTP status, error code, public description).
fn error_details(error: &ApiError) -> (StatusCode, &'static str, String) {
    match error {
        ApiError::Unauthenticated => (
            StatusCode::UNAUTHORIZED,
            "unauthorized",
            "Authentication required".to_string(),
        ),
        ApiError::NotFound => (
            StatusCode::NOT_FOUND,
            "not_found",
            "Not found".to_string(),
        ),
        ApiError::BadRequest(reason) => (
            StatusCode::BAD_REQUEST,
            "invalid_request",
            (*reason).to_string(),
        ),
        ApiError::Auth(err) => {
            let status = match err {
                AuthError::InvalidCredential
                | AuthError::InvalidToken
                | AuthError::ReuseDetected
                | AuthError::SessionNotFound
                | AuthError::AuthenticationFailed => StatusCode::UNAUTHORIZED,
                AuthError::CsrfMismatch => StatusCode::FORBIDDEN,
                AuthError::OAuthStateMismatch => StatusCode::BAD_REQUEST,
                AuthError::UpstreamTimeout { .. } => StatusCode::SERVICE_UNAVAILABLE,
                AuthError::Storage { .. }
                | AuthError::Configuration { .. }
                | AuthError::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            };
            (status, err.error_code(), err.public_description())
        }
    }
}

fn build_www_authenticate_header(error: &str, description: &str) -> String {
    if error == "unauthorized" {
        return "Bearer realm=\"authlane\"".to_string();
    }
    let escaped_desc = description.replace('\"', "\\\"");
    format!(
        "Bearer realm=\"authlane\", error=\"{}\", error_description=\"{}\"",
        error, escaped_desc
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        let cases = [
            (AuthError::InvalidToken, StatusCode::UNAUTHORIZED),
            (AuthError::ReuseDetected, StatusCode::UNAUTHORIZED),
            (AuthError::CsrfMismatch, StatusCode::FORBIDDEN),
            (AuthError::OAuthStateMismatch, StatusCode::BAD_REQUEST),
            (
                AuthError::upstream_timeout("oauth code exchange"),
                StatusCode::SERVICE_UNAVAILABLE,
            ),
            (AuthError::storage("db down"), StatusCode::INTERNAL_SERVER_ERROR),
        ];
        for (err, expected) in cases {
            assert_eq!(ApiError::from(err).into_response().status(), expected);
        }
    }

    #[test]
    fn test_unauthorized_has_www_authenticate() {
        let response = ApiError::from(AuthError::InvalidToken).into_response();
        let header = response
            .headers()
            .get(header::WWW_AUTHENTICATE)
            .unwrap()
            .to_str()
            .unwrap();
        assert!(header.contains("error=\"invalid_token\""));

        let response = ApiError::Unauthenticated.into_response();
        assert_eq!(
            response.headers().get(header::WWW_AUTHENTICATE).unwrap(),
            "Bearer realm=\"authlane\""
        );
    }

    #[test]
    fn test_timeout_has_retry_after() {
        let response = ApiError::from(AuthError::upstream_timeout("x")).into_response();
        assert_eq!(response.headers().get(header::RETRY_AFTER).unwrap(), "5");
    }

    #[test]
    fn test_server_errors_hide_details() {
        let (_, code, description) =
            error_details(&ApiError::from(AuthError::storage("connection refused")));
        assert_eq!(code, "server_error");
        assert!(!description.contains("connection refused"));
    }

    #[test]
    fn test_quotes_escaped() {
        let header = build_www_authenticate_header("invalid_token", "say \"hi\"");
        assert!(header.contains("\\\"hi\\\""));
    }
}
