use std::{env, fs, time::Duration};

use authlane_server::build_auth_service;
use authlane_server::config::loader::load_config;

#[test]
fn config_parsing_and_env_overrides_and_validation() {
    let dir = tempfile::tempdir().expect("tmp dir");
    let path = dir.path().join("authlane.toml");

    let toml_content = r#"
[server]
host = "127.0.0.1"
port = 8081
request_timeout_ms = 1000

[logging]
level = "debug"

[auth]
issuer = "https://auth.example.com"
audience = "https://api.example.com"

[auth.signing]
algorithm = "HS256"
secret = "0123456789abcdef0123456789abcdef"

[auth.tokens]
access_token_lifetime = "5m"
refresh_token_lifetime = "7d"
allowed_claims = ["tenant"]

[auth.session]
idle_timeout = "20m"
absolute_timeout = "8h"
bind_ip = true

[auth.session.cookie]
name = "sid"
secure = false

[[bootstrap.users]]
username = "alice"
password = "wonderland"
role = "admin"
"#;
    fs::write(&path, toml_content).expect("write toml");

    // 1) Valid config parses
    let cfg = load_config(path.to_str()).expect("should parse config");
    assert_eq!(cfg.server.port, 8081);
    assert_eq!(cfg.logging.level.to_ascii_lowercase(), "debug");
    assert_eq!(cfg.auth.issuer, "https://auth.example.com");
    assert_eq!(cfg.auth.tokens.access_token_lifetime, Duration::from_secs(300));
    assert_eq!(
        cfg.auth.tokens.refresh_token_lifetime,
        Duration::from_secs(7 * 24 * 3600)
    );
    assert_eq!(cfg.auth.tokens.allowed_claims, vec!["tenant".to_string()]);
    assert_eq!(cfg.auth.session.idle_timeout, Duration::from_secs(20 * 60));
    assert!(cfg.auth.session.bind_ip);
    assert_eq!(cfg.auth.session.cookie.name, "sid");
    assert!(!cfg.auth.session.cookie.secure);
    assert_eq!(cfg.bootstrap.users.len(), 1);
    assert_eq!(cfg.bootstrap.users[0].role.as_deref(), Some("admin"));
    // Unset sections keep their defaults
    assert_eq!(cfg.auth.csrf.header_name, "x-csrf-token");
    assert!(!cfg.auth.oauth.enabled);

    // 2) Env override should win over file
    unsafe {
        env::set_var("AUTHLANE__SERVER__PORT", "9090");
    }
    let cfg_env = load_config(path.to_str()).expect("should parse config with env overrides");
    assert_eq!(cfg_env.server.port, 9090);
    unsafe {
        env::remove_var("AUTHLANE__SERVER__PORT");
    }

    // 3) Invalid auth settings are rejected
    let bad = toml_content.replace(
        "secret = \"0123456789abcdef0123456789abcdef\"",
        "secret = \"short\"",
    );
    fs::write(&path, bad).expect("write bad toml");
    let err = load_config(path.to_str()).expect_err("short secret must be rejected");
    assert!(err.contains("signing.secret"), "unexpected error: {err}");

    // 4) Idle timeout above absolute timeout is rejected
    let bad = toml_content.replace("idle_timeout = \"20m\"", "idle_timeout = \"9h\"");
    fs::write(&path, bad).expect("write bad toml");
    assert!(load_config(path.to_str()).is_err());
}

#[test]
fn explicit_missing_file_is_an_error() {
    let dir = tempfile::tempdir().expect("tmp dir");
    let path = dir.path().join("absent.toml");
    let err = load_config(path.to_str()).expect_err("missing file must fail");
    assert!(err.contains("not found"));
}

#[test]
fn oauth_section_requires_endpoints() {
    let dir = tempfile::tempdir().expect("tmp dir");
    let path = dir.path().join("authlane.toml");
    fs::write(
        &path,
        r#"
[auth.oauth]
enabled = true
client_id = "app"
authorization_endpoint = "https://idp.example.com/authorize"
"#,
    )
    .expect("write toml");
    let err = load_config(path.to_str()).expect_err("incomplete oauth must fail");
    assert!(err.contains("oauth.token_endpoint"), "unexpected error: {err}");

    fs::write(
        &path,
        r#"
[auth.oauth]
enabled = true
client_id = "app"
authorization_endpoint = "https://idp.example.com/authorize"
token_endpoint = "https://idp.example.com/token"
userinfo_endpoint = "https://idp.example.com/userinfo"
redirect_uri = "https://app.example.com/oauth/callback"
scopes = ["openid", "profile"]
state_ttl = "5m"
"#,
    )
    .expect("write toml");
    let cfg = load_config(path.to_str()).expect("complete oauth parses");
    assert_eq!(cfg.auth.oauth.scopes, vec!["openid", "profile"]);
    assert_eq!(cfg.auth.oauth.state_ttl, Duration::from_secs(300));
}

#[test]
fn bootstrap_users_can_log_in() {
    let dir = tempfile::tempdir().expect("tmp dir");
    let path = dir.path().join("authlane.toml");
    fs::write(
        &path,
        r#"
[auth.signing]
algorithm = "HS256"
secret = "0123456789abcdef0123456789abcdef"

[auth.credentials]
verify_timeout = "60s"

[[bootstrap.users]]
username = "alice"
password = "wonderland"
subject = "user-1"
email = "alice@example.com"
"#,
    )
    .expect("write toml");
    let cfg = load_config(path.to_str()).expect("parse");
    let service = build_auth_service(&cfg).expect("service");

    let runtime = tokio::runtime::Runtime::new().expect("runtime");
    runtime.block_on(async {
        let pair = service.login("alice", "wonderland").await.expect("login");
        let claims = service.authenticate(&pair.access_token).await.expect("verify");
        assert_eq!(claims.sub, "user-1");
        assert_eq!(claims.email.as_deref(), Some("alice@example.com"));
        assert!(service.login("alice", "wrong").await.is_err());
    });
}
