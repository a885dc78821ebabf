//! Authorization code + PKCE flow against an external provider.
//!
//! # Flow
//!
//! ```text
//! initiate ──► Initiated ──► CallbackReceived ──► Exchanged ──► Complete
//!                                  │                  │
//!                                  └──────────────────┴──► Failed
//! ```
//!
//! The `state` parameter is the only handle on a pending flow. It is stored
//! hashed and consumed by the first callback that presents it, whatever the
//! outcome, so a replayed callback always fails with `OAuthStateMismatch`.

use std::fmt;
use std::sync::Arc;
use std::time::Duration as StdDuration;

use serde::Deserialize;
use time::Duration;
use tracing::{debug, info, warn};
use url::Url;

use super::pkce::{CHALLENGE_METHOD, PkceVerifier};
use super::provider::{IdentityProvider, ProviderGrant};
use crate::clock::{SharedClock, to_time_duration};
use crate::config::OAuthClientConfig;
use crate::crypto::{generate_token, hash_token};
use crate::storage::OAuthStateStore;
use crate::types::OAuthFlowState;
use crate::{AuthError, AuthResult};

/// Phase of an authorization flow, as recorded in logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowPhase {
    /// Redirect issued, waiting for the callback.
    Initiated,
    /// Callback arrived and its state was consumed.
    CallbackReceived,
    /// The provider accepted the code.
    Exchanged,
    /// The external identity was handed back to the caller.
    Complete,
    /// The flow ended without an identity.
    Failed,
}

impl FlowPhase {
    /// Returns the label used in logs.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Initiated => "initiated",
            Self::CallbackReceived => "callback_received",
            Self::Exchanged => "exchanged",
            Self::Complete => "complete",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for FlowPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where to send the user agent to start a flow.
#[derive(Clone)]
pub struct AuthorizationRedirect {
    /// Provider authorization URL with all query parameters.
    pub url: Url,
    /// The `state` value, also bound to the browser by a cookie.
    pub state: String,
}

impl fmt::Debug for AuthorizationRedirect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthorizationRedirect")
            .field("authorization_endpoint", &self.url.path())
            .finish_non_exhaustive()
    }
}

/// Query parameters of the provider's redirect back to us.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CallbackParams {
    /// The `state` sent at initiation.
    pub state: Option<String>,
    /// Authorization code, on success.
    pub code: Option<String>,
    /// OAuth error code, on failure.
    pub error: Option<String>,
    /// Human-readable error description.
    pub error_description: Option<String>,
}

/// Drives authorization code flows with PKCE.
pub struct OAuthFlowCoordinator {
    provider: Arc<dyn IdentityProvider>,
    states: Arc<dyn OAuthStateStore>,
    clock: SharedClock,
    authorization_endpoint: Url,
    client_id: String,
    redirect_uri: Url,
    scopes: Vec<String>,
    state_ttl: Duration,
    exchange_timeout: StdDuration,
}

impl OAuthFlowCoordinator {
    /// Creates a coordinator from configuration.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::Configuration` if the authorization endpoint or
    /// redirect URI is missing.
    pub fn from_config(
        config: &OAuthClientConfig,
        provider: Arc<dyn IdentityProvider>,
        states: Arc<dyn OAuthStateStore>,
        clock: SharedClock,
    ) -> AuthResult<Self> {
        let authorization_endpoint = config
            .authorization_endpoint
            .clone()
            .ok_or_else(|| AuthError::configuration("oauth.authorization_endpoint is not set"))?;
        let redirect_uri = config
            .redirect_uri
            .clone()
            .ok_or_else(|| AuthError::configuration("oauth.redirect_uri is not set"))?;

        Ok(Self {
            provider,
            states,
            clock,
            authorization_endpoint,
            client_id: config.client_id.clone(),
            redirect_uri,
            scopes: config.scopes.clone(),
            state_ttl: to_time_duration(config.state_ttl),
            exchange_timeout: config.request_timeout,
        })
    }

    /// Returns the provider name.
    #[must_use]
    pub fn provider_name(&self) -> &str {
        self.provider.name()
    }

    /// Returns how long an initiated flow stays valid.
    #[must_use]
    pub fn state_ttl(&self) -> Duration {
        self.state_ttl
    }

    /// Starts a flow: stores the PKCE verifier under a fresh `state` and
    /// builds the provider authorization URL.
    ///
    /// # Errors
    ///
    /// Returns an error if the state cannot be stored.
    pub async fn initiate(&self) -> AuthResult<AuthorizationRedirect> {
        let state = generate_token();
        let verifier = PkceVerifier::generate();
        let challenge = verifier.challenge();

        self.states
            .insert(OAuthFlowState {
                state_hash: hash_token(&state),
                code_verifier: verifier,
                redirect_uri: self.redirect_uri.to_string(),
                created_at: self.clock.now(),
            })
            .await?;

        let mut url = self.authorization_endpoint.clone();
        url.query_pairs_mut()
            .append_pair("response_type", "code")
            .append_pair("client_id", &self.client_id)
            .append_pair("redirect_uri", self.redirect_uri.as_str())
            .append_pair("scope", &self.scopes.join(" "))
            .append_pair("state", &state)
            .append_pair("code_challenge", challenge.as_str())
            .append_pair("code_challenge_method", CHALLENGE_METHOD);

        debug!(
            provider = %self.provider.name(),
            phase = %FlowPhase::Initiated,
            "OAuth flow initiated"
        );
        Ok(AuthorizationRedirect { url, state })
    }

    /// Completes a flow from the provider's callback.
    ///
    /// # Errors
    ///
    /// - `AuthError::OAuthStateMismatch` if the state is missing, unknown,
    ///   already consumed or expired
    /// - `AuthError::AuthenticationFailed` if the provider reported an error,
    ///   sent no code, or rejected the exchange
    /// - `AuthError::UpstreamTimeout` if the exchange exceeded its deadline
    pub async fn handle_callback(&self, params: CallbackParams) -> AuthResult<ProviderGrant> {
        let provider = self.provider.name();

        let Some(state) = params.state.as_deref().filter(|s| !s.is_empty()) else {
            warn!(provider = %provider, phase = %FlowPhase::Failed, "OAuth callback without state");
            return Err(AuthError::OAuthStateMismatch);
        };

        let flow = match self.states.take(&hash_token(state)).await? {
            Some(flow) if !flow.is_expired_at(self.clock.now(), self.state_ttl) => flow,
            Some(_) => {
                warn!(provider = %provider, phase = %FlowPhase::Failed, "OAuth state expired");
                return Err(AuthError::OAuthStateMismatch);
            }
            None => {
                warn!(
                    provider = %provider,
                    phase = %FlowPhase::Failed,
                    "OAuth state unknown or already used"
                );
                return Err(AuthError::OAuthStateMismatch);
            }
        };
        debug!(provider = %provider, phase = %FlowPhase::CallbackReceived, "OAuth state consumed");

        if let Some(error) = params.error.as_deref() {
            info!(
                provider = %provider,
                phase = %FlowPhase::Failed,
                error = %error,
                description = params.error_description.as_deref().unwrap_or_default(),
                "Provider returned an authorization error"
            );
            return Err(AuthError::AuthenticationFailed);
        }
        let Some(code) = params.code.as_deref().filter(|c| !c.is_empty()) else {
            info!(provider = %provider, phase = %FlowPhase::Failed, "OAuth callback without code");
            return Err(AuthError::AuthenticationFailed);
        };

        let exchange = self
            .provider
            .exchange_code(code, &flow.code_verifier, &flow.redirect_uri);
        let grant = match tokio::time::timeout(self.exchange_timeout, exchange).await {
            Err(_) => {
                warn!(provider = %provider, phase = %FlowPhase::Failed, "Code exchange timed out");
                return Err(AuthError::upstream_timeout("oauth code exchange"));
            }
            Ok(Err(e)) if e.is_timeout() => {
                warn!(provider = %provider, phase = %FlowPhase::Failed, "Code exchange timed out");
                return Err(AuthError::upstream_timeout("oauth code exchange"));
            }
            Ok(Err(e)) => {
                warn!(
                    provider = %provider,
                    phase = %FlowPhase::Failed,
                    error = %e,
                    "Code exchange failed"
                );
                return Err(AuthError::AuthenticationFailed);
            }
            Ok(Ok(grant)) => grant,
        };
        debug!(provider = %provider, phase = %FlowPhase::Exchanged, "Code exchanged");

        info!(
            provider = %provider,
            phase = %FlowPhase::Complete,
            external_subject = %grant.subject,
            "OAuth login complete"
        );
        Ok(grant)
    }

    /// Drops flows whose callback never arrived.
    ///
    /// # Errors
    ///
    /// Returns an error if the cleanup operation fails.
    pub async fn prune(&self) -> AuthResult<u64> {
        self.states.prune(self.clock.now() - self.state_ttl).await
    }
}

impl fmt::Debug for OAuthFlowCoordinator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OAuthFlowCoordinator")
            .field("provider", &self.provider.name())
            .field("authorization_endpoint", &self.authorization_endpoint.as_str())
            .field("redirect_uri", &self.redirect_uri.as_str())
            .field("state_ttl", &self.state_ttl)
            .finish_non_exhaustive()
    }
}
