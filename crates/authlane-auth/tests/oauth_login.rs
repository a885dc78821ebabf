//! OAuth authorization code + PKCE login through [`AuthService`] against a
//! mock identity provider.

use std::sync::Arc;

use authlane_auth::oauth::PkceChallenge;
use authlane_auth::prelude::*;
use time::Duration;
use url::Url;
use wiremock::matchers::{body_string_contains, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn oauth_config(idp: &MockServer) -> AuthConfig {
    let base = Url::parse(&idp.uri()).expect("mock server uri");

    let mut config = AuthConfig::default();
    config.signing.algorithm = "HS256".to_string();
    config.signing.secret = Some("0123456789abcdef0123456789abcdef".to_string());
    config.oauth.enabled = true;
    config.oauth.provider_name = "idp".to_string();
    config.oauth.client_id = "authlane-test".to_string();
    config.oauth.authorization_endpoint = Some(base.join("/authorize").expect("join"));
    config.oauth.token_endpoint = Some(base.join("/token").expect("join"));
    config.oauth.userinfo_endpoint = Some(base.join("/userinfo").expect("join"));
    config.oauth.redirect_uri =
        Some(Url::parse("https://app.test/oauth/callback").expect("redirect uri"));
    config
}

fn query_param(url: &Url, name: &str) -> String {
    url.query_pairs()
        .find(|(key, _)| key == name)
        .map(|(_, value)| value.into_owned())
        .unwrap_or_else(|| panic!("missing query parameter {name}"))
}

async fn mount_provider(idp: &MockServer) {
    Mock::given(method("POST"))
        .and(path("/token"))
        .and(body_string_contains("code=abc"))
        .and(body_string_contains("code_verifier="))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "access_token": "idp-access",
            "token_type": "Bearer",
            "expires_in": 300
        })))
        .mount(idp)
        .await;

    Mock::given(method("GET"))
        .and(path("/userinfo"))
        .and(header("authorization", "Bearer idp-access"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "sub": "42",
            "email": "u42@idp.test"
        })))
        .mount(idp)
        .await;
}

fn callback(state: &str, code: &str) -> CallbackParams {
    CallbackParams {
        state: Some(state.to_string()),
        code: Some(code.to_string()),
        ..Default::default()
    }
}

#[tokio::test]
async fn test_oauth_login_issues_tokens_once() {
    let idp = MockServer::start().await;
    mount_provider(&idp).await;
    let service = AuthService::builder(oauth_config(&idp)).build().unwrap();

    let redirect = service.oauth_authorize().await.unwrap();
    assert_eq!(query_param(&redirect.url, "state"), redirect.state);
    assert_eq!(query_param(&redirect.url, "code_challenge_method"), "S256");

    let pair = service
        .oauth_callback(callback(&redirect.state, "abc"))
        .await
        .unwrap();
    let claims = service.authenticate(&pair.access_token).await.unwrap();
    assert_eq!(claims.sub, "idp|42");
    assert_eq!(claims.email.as_deref(), Some("u42@idp.test"));
    assert_eq!(claims.role.as_deref(), Some("user"));

    // The state is single-use.
    let err = service
        .oauth_callback(callback(&redirect.state, "abc"))
        .await
        .unwrap_err();
    assert!(matches!(err, AuthError::OAuthStateMismatch));
}

#[tokio::test]
async fn test_oauth_verifier_matches_challenge_sent_to_provider() {
    let idp = MockServer::start().await;
    mount_provider(&idp).await;
    let service = AuthService::builder(oauth_config(&idp)).build().unwrap();

    let redirect = service.oauth_authorize().await.unwrap();
    let challenge = query_param(&redirect.url, "code_challenge");
    service
        .oauth_callback(callback(&redirect.state, "abc"))
        .await
        .unwrap();

    let requests = idp.received_requests().await.expect("request recording");
    let token_request = requests
        .iter()
        .find(|request| request.url.path() == "/token")
        .expect("token request");
    let verifier = url::form_urlencoded::parse(&token_request.body)
        .find(|(key, _)| key == "code_verifier")
        .map(|(_, value)| value.into_owned())
        .expect("code_verifier in token request");

    let verifier = authlane_auth::oauth::PkceVerifier::new(verifier).unwrap();
    assert_eq!(PkceChallenge::from_verifier(&verifier).as_str(), challenge);
}

#[tokio::test]
async fn test_oauth_forged_state_rejected_without_provider_call() {
    let idp = MockServer::start().await;
    let service = AuthService::builder(oauth_config(&idp)).build().unwrap();
    let _legit = service.oauth_authorize().await.unwrap();

    let err = service
        .oauth_callback(callback("forged-state", "abc"))
        .await
        .unwrap_err();
    assert!(matches!(err, AuthError::OAuthStateMismatch));
    assert!(idp.received_requests().await.unwrap_or_default().is_empty());
}

#[tokio::test]
async fn test_oauth_state_expires() {
    let idp = MockServer::start().await;
    mount_provider(&idp).await;
    let clock = Arc::new(ManualClock::starting_now());
    let service = AuthService::builder(oauth_config(&idp))
        .with_clock(clock.clone())
        .build()
        .unwrap();

    let redirect = service.oauth_authorize().await.unwrap();
    clock.advance(Duration::minutes(11));

    let err = service
        .oauth_callback(callback(&redirect.state, "abc"))
        .await
        .unwrap_err();
    assert!(matches!(err, AuthError::OAuthStateMismatch));
}

#[tokio::test]
async fn test_oauth_provider_rejects_code() {
    let idp = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/token"))
        .respond_with(ResponseTemplate::new(400).set_body_json(serde_json::json!({
            "error": "invalid_grant",
            "error_description": "code expired"
        })))
        .mount(&idp)
        .await;
    let service = AuthService::builder(oauth_config(&idp)).build().unwrap();

    let redirect = service.oauth_authorize().await.unwrap();
    let err = service
        .oauth_callback(callback(&redirect.state, "stale"))
        .await
        .unwrap_err();
    assert!(matches!(err, AuthError::AuthenticationFailed));
}

#[tokio::test]
async fn test_oauth_provider_timeout() {
    let idp = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/token"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_delay(std::time::Duration::from_secs(2))
                .set_body_json(serde_json::json!({
                    "access_token": "late",
                    "token_type": "Bearer"
                })),
        )
        .mount(&idp)
        .await;
    let mut config = oauth_config(&idp);
    config.oauth.request_timeout = std::time::Duration::from_millis(200);
    let service = AuthService::builder(config).build().unwrap();

    let redirect = service.oauth_authorize().await.unwrap();
    let err = service
        .oauth_callback(callback(&redirect.state, "abc"))
        .await
        .unwrap_err();
    assert!(matches!(err, AuthError::UpstreamTimeout { .. }));
    assert!(err.is_retryable());
}

#[tokio::test]
async fn test_oauth_federated_refresh_rotates() {
    let idp = MockServer::start().await;
    mount_provider(&idp).await;
    let service = AuthService::builder(oauth_config(&idp)).build().unwrap();

    let redirect = service.oauth_authorize().await.unwrap();
    let pair = service
        .oauth_callback(callback(&redirect.state, "abc"))
        .await
        .unwrap();

    let rotated = service.refresh(&pair.refresh_token).await.unwrap();
    let claims = service.authenticate(&rotated.access_token).await.unwrap();
    assert_eq!(claims.sub, "idp|42");
}
