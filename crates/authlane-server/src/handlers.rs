use authlane_auth::{AuthError, Logout, TokenPair, oauth::CallbackParams};
use axum::{
    Json,
    body::Bytes,
    extract::{Query, State},
    http::{HeaderMap, HeaderValue, StatusCode, header},
    response::{IntoResponse, Redirect, Response},
};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::{debug, warn};

use crate::error::ApiError;
use crate::extract::{Authenticated, ClientInfo, bearer_token, request_cookie};
use crate::state::AppState;

// =============================================================================
// Request/Response Types
// =============================================================================

#[derive(Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
    /// Start a cookie session instead of returning tokens.
    #[serde(default)]
    pub session: bool,
}

#[derive(Deserialize)]
pub struct RefreshRequest {
    pub refresh_token: String,
}

#[derive(Deserialize, Default)]
pub struct LogoutRequest {
    #[serde(default)]
    pub access_token: Option<String>,
    #[serde(default)]
    pub refresh_token: Option<String>,
}

#[derive(Serialize)]
pub struct SessionResponse {
    pub subject: String,
    pub csrf_token: String,
}

#[derive(Serialize)]
pub struct CsrfResponse {
    pub csrf_token: String,
}

#[derive(Serialize)]
pub struct MeResponse {
    pub subject: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    pub authenticated_via: &'static str,
}

// =============================================================================
// Helpers
// =============================================================================

fn with_cookie(mut response: Response, cookie: impl std::fmt::Display) -> Result<Response, ApiError> {
    let value = HeaderValue::from_str(&cookie.to_string())
        .map_err(|e| AuthError::internal(format!("invalid cookie header: {e}")))?;
    response.headers_mut().append(header::SET_COOKIE, value);
    Ok(response)
}

fn token_response(pair: TokenPair) -> Response {
    (
        [
            (header::CACHE_CONTROL, "no-store"),
            (header::PRAGMA, "no-cache"),
        ],
        Json(pair),
    )
        .into_response()
}

// =============================================================================
// Credentials and tokens
// =============================================================================

pub async fn login(
    State(state): State<AppState>,
    ClientInfo(fingerprint): ClientInfo,
    headers: HeaderMap,
    Json(req): Json<LoginRequest>,
) -> Result<Response, ApiError> {
    if !req.session {
        let pair = state.auth.login(&req.username, &req.password).await?;
        return Ok(token_response(pair));
    }

    let cookies = state.auth.cookies();
    let presented = request_cookie(&headers, cookies.session_name());
    let login = state
        .auth
        .login_session(
            &req.username,
            &req.password,
            &fingerprint,
            presented.as_deref(),
        )
        .await?;

    let body = SessionResponse {
        subject: login.session.subject().to_string(),
        csrf_token: login.csrf_token.value,
    };
    let response = (
        StatusCode::OK,
        [(header::CACHE_CONTROL, "no-store")],
        Json(body),
    )
        .into_response();
    with_cookie(response, cookies.session_cookie(&login.session_id))
}

pub async fn refresh(
    State(state): State<AppState>,
    Json(req): Json<RefreshRequest>,
) -> Result<Response, ApiError> {
    let pair = state.auth.refresh(&req.refresh_token).await?;
    Ok(token_response(pair))
}

/// Revokes whatever the client presents: an access token (body or bearer
/// header), a refresh token, and the session cookie. A session logout
/// needs the CSRF header.
pub async fn logout(
    State(state): State<AppState>,
    ClientInfo(fingerprint): ClientInfo,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, ApiError> {
    let req: LogoutRequest = if body.iter().all(u8::is_ascii_whitespace) {
        LogoutRequest::default()
    } else {
        serde_json::from_slice(&body).map_err(|_| ApiError::BadRequest("malformed logout body"))?
    };
    let access_token = req
        .access_token
        .or_else(|| bearer_token(&headers).flatten());

    let cookies = state.auth.cookies();
    let presented = request_cookie(&headers, cookies.session_name());
    let session_id = match presented {
        Some(id) => {
            let csrf = headers
                .get(state.csrf_header())
                .and_then(|h| h.to_str().ok());
            match state
                .auth
                .authenticate_session(&id, &fingerprint, "POST", csrf)
                .await
            {
                Ok(_) => Some(id),
                Err(AuthError::SessionNotFound) => None,
                Err(e) => return Err(e.into()),
            }
        }
        None => None,
    };
    let had_cookie = session_id.is_some();

    state
        .auth
        .logout(Logout {
            access_token,
            refresh_token: req.refresh_token,
            session_id,
        })
        .await?;

    let response = StatusCode::NO_CONTENT.into_response();
    if had_cookie {
        with_cookie(response, cookies.expired_session_cookie())
    } else {
        Ok(response)
    }
}

pub async fn issue_csrf(
    State(state): State<AppState>,
    ClientInfo(fingerprint): ClientInfo,
    headers: HeaderMap,
) -> Result<Json<CsrfResponse>, ApiError> {
    let session_id = request_cookie(&headers, state.auth.cookies().session_name())
        .ok_or(ApiError::Unauthenticated)?;
    let token = state.auth.issue_csrf(&session_id, &fingerprint).await?;
    Ok(Json(CsrfResponse {
        csrf_token: token.value,
    }))
}

// =============================================================================
// OAuth
// =============================================================================

pub async fn oauth_authorize(State(state): State<AppState>) -> Result<Response, ApiError> {
    if !state.auth.oauth_enabled() {
        return Err(ApiError::NotFound);
    }
    let redirect = state.auth.oauth_authorize().await?;
    let response = Redirect::to(redirect.url.as_str()).into_response();
    with_cookie(
        response,
        state.auth.cookies().oauth_state_cookie(&redirect.state),
    )
}

/// Completes the provider redirect. The `state` query parameter must match
/// the cookie set by [`oauth_authorize`], tying the callback to the browser
/// that started the flow.
pub async fn oauth_callback(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(params): Query<CallbackParams>,
) -> Result<Response, ApiError> {
    if !state.auth.oauth_enabled() {
        return Err(ApiError::NotFound);
    }
    let cookies = state.auth.cookies();
    let bound = request_cookie(&headers, cookies.oauth_state_name());
    if bound.is_none() || bound != params.state {
        warn!(
            has_cookie = bound.is_some(),
            "OAuth callback not bound to this browser"
        );
        return Err(AuthError::OAuthStateMismatch.into());
    }

    let pair = state.auth.oauth_callback(params).await?;
    debug!("OAuth login completed");
    with_cookie(token_response(pair), cookies.expired_oauth_state_cookie())
}

// =============================================================================
// Protected demo routes
// =============================================================================

pub async fn me(Authenticated(principal): Authenticated) -> Json<MeResponse> {
    Json(MeResponse {
        subject: principal.subject().to_string(),
        role: principal.role().map(ToString::to_string),
        email: principal.email().map(ToString::to_string),
        authenticated_via: principal.method(),
    })
}

pub async fn me_echo(
    Authenticated(principal): Authenticated,
    Json(body): Json<Value>,
) -> Json<Value> {
    Json(json!({
        "subject": principal.subject(),
        "echo": body,
    }))
}

// =============================================================================
// Public endpoints
// =============================================================================

pub async fn healthz() -> impl IntoResponse {
    (StatusCode::OK, Json(json!({"status":"ok"})))
}

pub async fn jwks(State(state): State<AppState>) -> impl IntoResponse {
    (
        [
            (header::CONTENT_TYPE, "application/json"),
            (header::CACHE_CONTROL, "public, max-age=300"),
        ],
        Json(state.auth.jwks()),
    )
}
