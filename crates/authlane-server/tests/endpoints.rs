//! Router-level tests driving the handlers with `tower::ServiceExt::oneshot`.

use std::sync::Arc;

use authlane_auth::credential::{HashError, PasswordHasher};
use authlane_auth::storage::InMemoryCredentialStore;
use authlane_auth::{AuthService, Identity};
use authlane_server::config::AppConfig;
use authlane_server::{AppState, build_router};
use axum::Router;
use axum::body::Body;
use axum::http::{HeaderMap, Request, StatusCode, header};
use http_body_util::BodyExt;
use serde_json::{Value, json};
use tower::ServiceExt;

struct PlainHasher;

impl PasswordHasher for PlainHasher {
    fn hash(&self, secret: &str) -> Result<String, HashError> {
        Ok(format!("plain${secret}"))
    }

    fn verify(&self, secret: &str, hash: &str) -> Result<bool, HashError> {
        Ok(hash == format!("plain${secret}"))
    }
}

fn test_config() -> AppConfig {
    let mut cfg = AppConfig::default();
    cfg.auth.signing.algorithm = "HS256".to_string();
    cfg.auth.signing.secret = Some("0123456789abcdef0123456789abcdef".to_string());
    cfg.auth.session.cookie.secure = false;
    cfg
}

fn app_with(cfg: AppConfig) -> Router {
    let users = InMemoryCredentialStore::new();
    users.insert(
        "alice",
        Identity::new("user-alice").with_role("admin"),
        "plain$wonderland",
    );
    users.insert("bob", Identity::new("user-bob"), "plain$builder");

    let auth = AuthService::builder(cfg.auth.clone())
        .with_hasher(Arc::new(PlainHasher))
        .with_credential_store(Arc::new(users))
        .build()
        .expect("auth service");
    build_router(AppState::new(Arc::new(auth), cfg))
}

fn app() -> Router {
    app_with(test_config())
}

async fn send(app: &Router, request: Request<Body>) -> (StatusCode, HeaderMap, Value) {
    let response = app.clone().oneshot(request).await.expect("response");
    let status = response.status();
    let headers = response.headers().clone();
    let bytes = response
        .into_body()
        .collect()
        .await
        .expect("body")
        .to_bytes();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).expect("json body")
    };
    (status, headers, body)
}

fn post_json(uri: &str, body: Value) -> Request<Body> {
    Request::post(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn session_cookie(headers: &HeaderMap) -> Option<String> {
    headers
        .get_all(header::SET_COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .find(|v| v.starts_with("authlane_session="))
        .and_then(|v| v.split(';').next())
        .map(ToString::to_string)
}

async fn bearer_login(app: &Router, username: &str, password: &str) -> Value {
    let (status, _, body) = send(
        app,
        post_json("/login", json!({"username": username, "password": password})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    body
}

async fn session_login(app: &Router, cookie: Option<&str>) -> (String, String) {
    let mut request = post_json(
        "/login",
        json!({"username": "alice", "password": "wonderland", "session": true}),
    );
    if let Some(cookie) = cookie {
        request
            .headers_mut()
            .insert(header::COOKIE, cookie.parse().unwrap());
    }
    let (status, headers, body) = send(app, request).await;
    assert_eq!(status, StatusCode::OK);
    let cookie = session_cookie(&headers).expect("session cookie");
    let csrf = body["csrf_token"].as_str().expect("csrf token").to_string();
    (cookie, csrf)
}

fn get_with(uri: &str, name: header::HeaderName, value: &str) -> Request<Body> {
    Request::get(uri)
        .header(name, value)
        .body(Body::empty())
        .unwrap()
}

// =============================================================================
// Public endpoints
// =============================================================================

#[tokio::test]
async fn healthz_ok() {
    let (status, _, body) = send(&app(), Request::get("/healthz").body(Body::empty()).unwrap()).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn jwks_lists_public_key() {
    let mut cfg = test_config();
    cfg.auth.signing.algorithm = "ES384".to_string();
    cfg.auth.signing.secret = None;
    let app = app_with(cfg);

    let (status, headers, body) =
        send(&app, Request::get("/.well-known/jwks.json").body(Body::empty()).unwrap()).await;
    assert_eq!(status, StatusCode::OK);
    assert!(headers.get(header::CACHE_CONTROL).is_some());
    let keys = body["keys"].as_array().expect("keys");
    assert_eq!(keys.len(), 1);
    assert_eq!(keys[0]["kty"], "EC");
    assert!(keys[0].get("d").is_none());
}

// =============================================================================
// Bearer flow
// =============================================================================

#[tokio::test]
async fn login_and_access_protected_route() {
    let app = app();
    let tokens = bearer_login(&app, "alice", "wonderland").await;
    assert_eq!(tokens["token_type"], "Bearer");
    assert_eq!(tokens["expires_in"], 900);

    let access = tokens["access_token"].as_str().unwrap();
    let (status, _, body) = send(
        &app,
        get_with("/me", header::AUTHORIZATION, &format!("Bearer {access}")),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["subject"], "user-alice");
    assert_eq!(body["role"], "admin");
    assert_eq!(body["authenticated_via"], "bearer");
}

#[tokio::test]
async fn bad_credentials_are_generic() {
    let app = app();
    let (wrong_pw, headers, body_a) = send(
        &app,
        post_json("/login", json!({"username": "alice", "password": "nope"})),
    )
    .await;
    let (unknown, _, body_b) = send(
        &app,
        post_json("/login", json!({"username": "mallory", "password": "nope"})),
    )
    .await;

    assert_eq!(wrong_pw, StatusCode::UNAUTHORIZED);
    assert_eq!(unknown, StatusCode::UNAUTHORIZED);
    assert_eq!(body_a, body_b);
    assert!(headers.get(header::WWW_AUTHENTICATE).is_some());
}

#[tokio::test]
async fn missing_and_forged_credentials_rejected() {
    let app = app();
    let (status, headers, _) = send(&app, Request::get("/me").body(Body::empty()).unwrap()).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(
        headers.get(header::WWW_AUTHENTICATE).unwrap(),
        "Bearer realm=\"authlane\""
    );

    let (status, _, body) = send(
        &app,
        get_with("/me", header::AUTHORIZATION, "Bearer not.a.token"),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "invalid_token");
}

#[tokio::test]
async fn refresh_rotation_and_reuse() {
    let app = app();
    let first = bearer_login(&app, "alice", "wonderland").await;
    let refresh_token = first["refresh_token"].as_str().unwrap();

    let (status, headers, second) =
        send(&app, post_json("/refresh", json!({"refresh_token": refresh_token}))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(headers.get(header::CACHE_CONTROL).unwrap(), "no-store");
    assert_ne!(second["refresh_token"], first["refresh_token"]);

    let (status, _, body) =
        send(&app, post_json("/refresh", json!({"refresh_token": refresh_token}))).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "invalid_grant");

    // The successor chain died with the reuse.
    let access = second["access_token"].as_str().unwrap();
    let (status, _, _) = send(
        &app,
        get_with("/me", header::AUTHORIZATION, &format!("Bearer {access}")),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn logout_revokes_presented_tokens() {
    let app = app();
    let tokens = bearer_login(&app, "alice", "wonderland").await;
    let access = tokens["access_token"].as_str().unwrap();
    let refresh_token = tokens["refresh_token"].as_str().unwrap();

    let mut request = post_json("/logout", json!({"refresh_token": refresh_token}));
    request.headers_mut().insert(
        header::AUTHORIZATION,
        format!("Bearer {access}").parse().unwrap(),
    );
    let (status, _, _) = send(&app, request).await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, _, _) = send(
        &app,
        get_with("/me", header::AUTHORIZATION, &format!("Bearer {access}")),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    let (status, _, _) =
        send(&app, post_json("/refresh", json!({"refresh_token": refresh_token}))).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    // Other users keep working.
    bearer_login(&app, "bob", "builder").await;
}

#[tokio::test]
async fn logout_without_anything_is_no_content() {
    let (status, _, _) = send(&app(), Request::post("/logout").body(Body::empty()).unwrap()).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
}

#[tokio::test]
async fn logout_with_malformed_body_is_bad_request() {
    let request = Request::post("/logout")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from("{not json"))
        .unwrap();
    let (status, _, body) = send(&app(), request).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "invalid_request");
}

// =============================================================================
// Session flow
// =============================================================================

#[tokio::test]
async fn session_cookie_attributes() {
    let app = app();
    let request = post_json(
        "/login",
        json!({"username": "alice", "password": "wonderland", "session": true}),
    );
    let (_, headers, _) = send(&app, request).await;
    let set_cookie = headers
        .get(header::SET_COOKIE)
        .unwrap()
        .to_str()
        .unwrap();
    assert!(set_cookie.contains("HttpOnly"));
    assert!(set_cookie.contains("SameSite=Strict"));
    assert!(set_cookie.contains("Max-Age="));
}

#[tokio::test]
async fn session_requires_csrf_for_unsafe_methods() {
    let app = app();
    let (cookie, csrf) = session_login(&app, None).await;

    let (status, _, body) = send(&app, get_with("/me", header::COOKIE, &cookie)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["authenticated_via"], "session");

    let mut request = post_json("/me/echo", json!({"hello": "world"}));
    request
        .headers_mut()
        .insert(header::COOKIE, cookie.parse().unwrap());
    let (status, _, body) = send(&app, request).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["error"], "csrf_mismatch");

    let mut request = post_json("/me/echo", json!({"hello": "world"}));
    request
        .headers_mut()
        .insert(header::COOKIE, cookie.parse().unwrap());
    request
        .headers_mut()
        .insert("x-csrf-token", csrf.parse().unwrap());
    let (status, _, body) = send(&app, request).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["echo"]["hello"], "world");
}

#[tokio::test]
async fn csrf_token_from_other_session_rejected() {
    let app = app();
    let (cookie_a, _) = session_login(&app, None).await;
    let (_, csrf_b) = session_login(&app, None).await;

    let mut request = post_json("/me/echo", json!({}));
    request
        .headers_mut()
        .insert(header::COOKIE, cookie_a.parse().unwrap());
    request
        .headers_mut()
        .insert("x-csrf-token", csrf_b.parse().unwrap());
    let (status, _, _) = send(&app, request).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn session_login_replaces_presented_cookie() {
    let app = app();
    let (old_cookie, _) = session_login(&app, None).await;
    let (new_cookie, _) = session_login(&app, Some(&old_cookie)).await;
    assert_ne!(old_cookie, new_cookie);

    let (status, _, body) = send(&app, get_with("/me", header::COOKIE, &old_cookie)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "session_not_found");
    let (status, _, _) = send(&app, get_with("/me", header::COOKIE, &new_cookie)).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn session_bound_to_user_agent() {
    let app = app();
    let mut request = post_json(
        "/login",
        json!({"username": "alice", "password": "wonderland", "session": true}),
    );
    request
        .headers_mut()
        .insert(header::USER_AGENT, "agent/1.0".parse().unwrap());
    let (_, headers, _) = send(&app, request).await;
    let cookie = session_cookie(&headers).unwrap();

    let request = Request::get("/me")
        .header(header::COOKIE, &cookie)
        .header(header::USER_AGENT, "agent/2.0")
        .body(Body::empty())
        .unwrap();
    let (status, _, _) = send(&app, request).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn extra_csrf_tokens_can_be_issued() {
    let app = app();
    let (cookie, _) = session_login(&app, None).await;
    let (status, _, body) = send(&app, get_with("/csrf", header::COOKIE, &cookie)).await;
    assert_eq!(status, StatusCode::OK);
    let csrf = body["csrf_token"].as_str().unwrap();

    let mut request = post_json("/me/echo", json!({}));
    request
        .headers_mut()
        .insert(header::COOKIE, cookie.parse().unwrap());
    request
        .headers_mut()
        .insert("x-csrf-token", csrf.parse().unwrap());
    let (status, _, _) = send(&app, request).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn session_logout_needs_csrf_and_clears_cookie() {
    let app = app();
    let (cookie, csrf) = session_login(&app, None).await;

    let request = Request::post("/logout")
        .header(header::COOKIE, &cookie)
        .body(Body::empty())
        .unwrap();
    let (status, _, _) = send(&app, request).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let request = Request::post("/logout")
        .header(header::COOKIE, &cookie)
        .header("x-csrf-token", &csrf)
        .body(Body::empty())
        .unwrap();
    let (status, headers, _) = send(&app, request).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    let cleared = headers
        .get(header::SET_COOKIE)
        .unwrap()
        .to_str()
        .unwrap();
    assert!(cleared.contains("Max-Age=0"));

    let (status, _, _) = send(&app, get_with("/me", header::COOKIE, &cookie)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn oauth_routes_hidden_when_disabled() {
    let (status, _, _) = send(
        &app(),
        Request::get("/oauth/authorize").body(Body::empty()).unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}
