//! Request extractors for the two authentication modes.
//!
//! A request authenticates with `Authorization: Bearer <access token>` or,
//! when that header is absent, with the session cookie. Cookie-authenticated
//! requests using a non-idempotent method must also carry the CSRF header.

use std::convert::Infallible;
use std::net::SocketAddr;

use authlane_auth::cookie::find_cookie;
use authlane_auth::{AccessTokenClaims, ClientFingerprint, Session};
use axum::{
    extract::{ConnectInfo, FromRef, FromRequestParts},
    http::{
        HeaderMap,
        header::{AUTHORIZATION, COOKIE, USER_AGENT},
        request::Parts,
    },
};

use crate::error::ApiError;
use crate::state::AppState;

// =============================================================================
// Client fingerprint
// =============================================================================

/// Client attributes sessions are bound to.
///
/// The peer address is only known when the router is served with
/// `into_make_service_with_connect_info`.
pub struct ClientInfo(pub ClientFingerprint);

impl<S> FromRequestParts<S> for ClientInfo
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(Self(fingerprint(parts)))
    }
}

fn fingerprint(parts: &Parts) -> ClientFingerprint {
    let ip = parts
        .extensions
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().to_string());
    let user_agent = parts
        .headers
        .get(USER_AGENT)
        .and_then(|h| h.to_str().ok())
        .map(ToString::to_string);
    ClientFingerprint::new(ip, user_agent)
}

/// Value of cookie `name`, if the request carries it.
pub fn request_cookie(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get_all(COOKIE)
        .iter()
        .filter_map(|h| h.to_str().ok())
        .find_map(|h| find_cookie(h, name))
}

/// Token from an `Authorization: Bearer` header.
///
/// `Some(None)` means the header is present but not a usable bearer token.
pub fn bearer_token(headers: &HeaderMap) -> Option<Option<String>> {
    let header = headers.get(AUTHORIZATION)?;
    Some(
        header
            .to_str()
            .ok()
            .and_then(|h| h.split_once(' '))
            .filter(|(scheme, _)| scheme.eq_ignore_ascii_case("bearer"))
            .map(|(_, token)| token.trim())
            .filter(|t| !t.is_empty())
            .map(ToString::to_string),
    )
}

// =============================================================================
// Authenticated extractor
// =============================================================================

/// Who made the request.
#[derive(Debug, Clone)]
pub enum Principal {
    /// Authenticated with an access token.
    Bearer(AccessTokenClaims),
    /// Authenticated with a session cookie.
    Session(Session),
}

impl Principal {
    pub fn subject(&self) -> &str {
        match self {
            Self::Bearer(claims) => &claims.sub,
            Self::Session(session) => session.subject(),
        }
    }

    pub fn role(&self) -> Option<&str> {
        match self {
            Self::Bearer(claims) => claims.role.as_deref(),
            Self::Session(session) => session.identity.role.as_deref(),
        }
    }

    pub fn email(&self) -> Option<&str> {
        match self {
            Self::Bearer(claims) => claims.email.as_deref(),
            Self::Session(session) => session.identity.email.as_deref(),
        }
    }

    pub fn method(&self) -> &'static str {
        match self {
            Self::Bearer(_) => "bearer",
            Self::Session(_) => "session",
        }
    }
}

/// Axum extractor that rejects unauthenticated requests.
///
/// # Errors
///
/// Rejects with `ApiError` if:
/// - No bearer token or session cookie is present
/// - The bearer token does not verify (a session cookie is not tried instead)
/// - The session is unknown, expired or bound to another client
/// - A non-idempotent session request lacks a valid CSRF token
pub struct Authenticated(pub Principal);

impl<S> FromRequestParts<S> for Authenticated
where
    S: Send + Sync,
    AppState: FromRef<S>,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let state = AppState::from_ref(state);

        if let Some(token) = bearer_token(&parts.headers) {
            let token = token.ok_or(ApiError::Unauthenticated)?;
            let claims = state.auth.authenticate(&token).await?;
            return Ok(Self(Principal::Bearer(claims)));
        }

        let cookie_name = state.auth.cookies().session_name();
        let session_id =
            request_cookie(&parts.headers, cookie_name).ok_or(ApiError::Unauthenticated)?;
        let csrf = parts
            .headers
            .get(state.csrf_header())
            .and_then(|h| h.to_str().ok());

        let session = state
            .auth
            .authenticate_session(
                &session_id,
                &fingerprint(parts),
                parts.method.as_str(),
                csrf,
            )
            .await?;
        Ok(Self(Principal::Session(session)))
    }
}
