use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use authlane_auth::credential::{Argon2Hasher, PasswordHasher};
use authlane_auth::storage::InMemoryCredentialStore;
use authlane_auth::{AuthService, Identity, Reaper};
use axum::{
    Router,
    routing::{get, post},
};
use tower::ServiceBuilder;
use tower::limit::ConcurrencyLimitLayer;
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};

use crate::{config::AppConfig, handlers, state::AppState};

pub fn build_router(state: AppState) -> Router {
    let body_limit = state.config.server.body_limit_bytes;
    let request_timeout = Duration::from_millis(state.config.server.request_timeout_ms);
    let max_in_flight = state.config.server.max_concurrent_requests;

    Router::new()
        // Public endpoints
        .route("/healthz", get(handlers::healthz))
        .route("/.well-known/jwks.json", get(handlers::jwks))
        // Credentials and tokens
        .route("/login", post(handlers::login))
        .route("/refresh", post(handlers::refresh))
        .route("/logout", post(handlers::logout))
        .route("/csrf", get(handlers::issue_csrf))
        // External provider
        .route("/oauth/authorize", get(handlers::oauth_authorize))
        .route("/oauth/callback", get(handlers::oauth_callback))
        // Protected demo routes
        .route("/me", get(handlers::me))
        .route("/me/echo", post(handlers::me_echo))
        .with_state(state)
        // Outermost first: trace -> concurrency limit -> timeout
        .layer(
            ServiceBuilder::new()
                .layer(
                    TraceLayer::new_for_http()
                        .make_span_with(|req: &axum::http::Request<_>| {
                            use tracing::field::Empty;
                            // Path only: callback query strings carry codes and state.
                            tracing::info_span!(
                                "http.request",
                                http.method = %req.method(),
                                http.path = %req.uri().path(),
                                http.status_code = Empty,
                            )
                        })
                        .on_response(
                            |res: &axum::http::Response<_>,
                             latency: Duration,
                             span: &tracing::Span| {
                                span.record(
                                    "http.status_code",
                                    tracing::field::display(res.status().as_u16()),
                                );
                                tracing::info!(
                                    http.status = %res.status().as_u16(),
                                    elapsed_ms = %latency.as_millis(),
                                    "request handled"
                                );
                            },
                        ),
                )
                .layer(ConcurrencyLimitLayer::new(max_in_flight))
                .layer(TimeoutLayer::new(request_timeout)),
        )
        .layer(axum::extract::DefaultBodyLimit::max(body_limit))
}

/// Builds the auth service, loading bootstrap users into an in-memory
/// credential store.
pub fn build_auth_service(cfg: &AppConfig) -> anyhow::Result<AuthService> {
    let hasher = Arc::new(Argon2Hasher::new());
    let users = InMemoryCredentialStore::new();

    for user in &cfg.bootstrap.users {
        let hash = hasher
            .hash(&user.password)
            .with_context(|| format!("hashing password for bootstrap user '{}'", user.username))?;
        let mut identity = Identity::new(user.subject.as_deref().unwrap_or(&user.username));
        if let Some(role) = &user.role {
            identity = identity.with_role(role.as_str());
        }
        if let Some(email) = &user.email {
            identity = identity.with_email(email.as_str());
        }
        users.insert(user.username.as_str(), identity, hash);
        tracing::info!(username = %user.username, "Bootstrap user loaded");
    }

    AuthService::builder(cfg.auth.clone())
        .with_hasher(hasher)
        .with_credential_store(Arc::new(users))
        .build()
        .context("building auth service")
}

pub struct AuthlaneServer {
    addr: SocketAddr,
    state: AppState,
}

pub struct ServerBuilder {
    addr: SocketAddr,
    config: AppConfig,
}

impl Default for ServerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ServerBuilder {
    pub fn new() -> Self {
        let cfg = AppConfig::default();
        Self {
            addr: cfg.addr(),
            config: cfg,
        }
    }

    pub fn with_addr(mut self, addr: SocketAddr) -> Self {
        self.addr = addr;
        self
    }

    pub fn with_config(mut self, cfg: AppConfig) -> Self {
        self.addr = cfg.addr();
        self.config = cfg;
        self
    }

    pub fn build(self) -> anyhow::Result<AuthlaneServer> {
        let auth = Arc::new(build_auth_service(&self.config)?);
        Ok(AuthlaneServer {
            addr: self.addr,
            state: AppState::new(auth, self.config),
        })
    }
}

impl AuthlaneServer {
    pub fn state(&self) -> &AppState {
        &self.state
    }

    pub async fn run(self) -> anyhow::Result<()> {
        let reaper_cfg = &self.state.config.auth.reaper;
        let reaper = reaper_cfg
            .enabled
            .then(|| Reaper::spawn(self.state.auth.clone(), reaper_cfg.interval));

        let listener = tokio::net::TcpListener::bind(self.addr).await?;
        tracing::info!("listening on {}", self.addr);
        let app = build_router(self.state.clone());
        let served = axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(shutdown_signal())
        .await;

        if let Some(reaper) = reaper {
            reaper.shutdown().await;
        }
        served?;
        Ok(())
    }
}

async fn shutdown_signal() {
    // Wait for Ctrl+C
    let _ = tokio::signal::ctrl_c().await;
    tracing::info!("shutdown signal received");
}
