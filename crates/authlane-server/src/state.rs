use std::sync::Arc;

use authlane_auth::AuthService;

use crate::config::AppConfig;

/// Shared handler state.
#[derive(Clone)]
pub struct AppState {
    pub auth: Arc<AuthService>,
    pub config: Arc<AppConfig>,
}

impl AppState {
    pub fn new(auth: Arc<AuthService>, config: AppConfig) -> Self {
        Self {
            auth,
            config: Arc::new(config),
        }
    }

    /// Name of the request header carrying the CSRF token.
    pub fn csrf_header(&self) -> &str {
        &self.config.auth.csrf.header_name
    }
}
