//! External identity provider client.
//!
//! The provider is the only network dependency of the auth core. It sits
//! behind the [`IdentityProvider`] trait so the flow coordinator can be
//! driven by a fake in tests.

use std::fmt;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Map, Value};
use url::Url;

use super::pkce::PkceVerifier;
use crate::config::OAuthClientConfig;

/// Errors that can occur while talking to the identity provider.
#[derive(Debug, thiserror::Error)]
pub enum IdpError {
    /// The provider client is not configured correctly.
    #[error("Provider configuration error: {0}")]
    Configuration(String),

    /// Token exchange with the provider failed.
    #[error("Token exchange failed: {0}")]
    TokenExchangeFailed(String),

    /// The provider returned an OAuth error.
    #[error("OAuth error from provider: {error} - {description}")]
    OAuthError {
        /// The OAuth error code.
        error: String,
        /// Optional error description.
        description: String,
    },

    /// The userinfo request failed or returned an unusable document.
    #[error("Userinfo request failed: {0}")]
    UserInfoFailed(String),

    /// A required field is missing from a provider response.
    #[error("Missing required field: {0}")]
    MissingField(String),

    /// A network error occurred.
    #[error("Network error: {0}")]
    NetworkError(#[from] reqwest::Error),
}

impl IdpError {
    /// Creates an `OAuthError` from a provider response.
    #[must_use]
    pub fn oauth_error(error: impl Into<String>, description: impl Into<String>) -> Self {
        Self::OAuthError {
            error: error.into(),
            description: description.into(),
        }
    }

    /// Returns `true` if the request to the provider timed out.
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::NetworkError(e) if e.is_timeout())
    }
}

/// What the provider vouches for after a successful code exchange.
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderGrant {
    /// Subject identifier at the provider.
    pub subject: String,

    /// Email address, if released.
    pub email: Option<String>,

    /// Remaining userinfo claims.
    pub claims: Map<String, Value>,
}

/// An OAuth 2.0 authorization server that accepts PKCE code exchanges.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Short provider name, used as the subject prefix of federated identities.
    fn name(&self) -> &str;

    /// Exchanges an authorization code for the user's identity.
    ///
    /// # Arguments
    ///
    /// * `code` - Authorization code from the callback
    /// * `verifier` - PKCE verifier stored when the flow was initiated
    /// * `redirect_uri` - Redirect URI sent in the authorization request
    ///
    /// # Errors
    ///
    /// Returns an error if the exchange or the userinfo lookup fails.
    async fn exchange_code(
        &self,
        code: &str,
        verifier: &PkceVerifier,
        redirect_uri: &str,
    ) -> Result<ProviderGrant, IdpError>;
}

/// OAuth token response from the provider.
#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    token_type: Option<String>,
}

/// OAuth error response from the provider.
#[derive(Deserialize)]
struct OAuthErrorResponse {
    error: String,
    error_description: Option<String>,
}

/// [`IdentityProvider`] over HTTP: form-encoded token exchange followed by
/// a bearer userinfo request.
pub struct HttpIdentityProvider {
    http_client: reqwest::Client,
    name: String,
    token_endpoint: Url,
    userinfo_endpoint: Url,
    client_id: String,
    client_secret: Option<String>,
}

impl HttpIdentityProvider {
    /// Creates a provider client from configuration.
    ///
    /// # Errors
    ///
    /// Returns `IdpError::Configuration` if an endpoint is missing or the
    /// HTTP client cannot be built.
    pub fn from_config(config: &OAuthClientConfig) -> Result<Self, IdpError> {
        let token_endpoint = config
            .token_endpoint
            .clone()
            .ok_or_else(|| IdpError::Configuration("token_endpoint is not set".to_string()))?;
        let userinfo_endpoint = config
            .userinfo_endpoint
            .clone()
            .ok_or_else(|| IdpError::Configuration("userinfo_endpoint is not set".to_string()))?;

        let http_client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| IdpError::Configuration(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            http_client,
            name: config.provider_name.clone(),
            token_endpoint,
            userinfo_endpoint,
            client_id: config.client_id.clone(),
            client_secret: config.client_secret.clone(),
        })
    }

    async fn fetch_userinfo(&self, access_token: &str) -> Result<ProviderGrant, IdpError> {
        let response = self
            .http_client
            .get(self.userinfo_endpoint.as_str())
            .bearer_auth(access_token)
            .header("Accept", "application/json")
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(IdpError::UserInfoFailed(format!(
                "HTTP {}",
                response.status()
            )));
        }

        let mut claims: Map<String, Value> = response.json().await.map_err(|e| {
            IdpError::UserInfoFailed(format!("Failed to parse userinfo response: {e}"))
        })?;

        let subject = match claims.remove("sub") {
            Some(Value::String(sub)) if !sub.is_empty() => sub,
            _ => return Err(IdpError::MissingField("sub".to_string())),
        };
        let email = match claims.remove("email") {
            Some(Value::String(email)) => Some(email),
            _ => None,
        };

        Ok(ProviderGrant {
            subject,
            email,
            claims,
        })
    }
}

#[async_trait]
impl IdentityProvider for HttpIdentityProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn exchange_code(
        &self,
        code: &str,
        verifier: &PkceVerifier,
        redirect_uri: &str,
    ) -> Result<ProviderGrant, IdpError> {
        let mut params = vec![
            ("grant_type", "authorization_code"),
            ("code", code),
            ("redirect_uri", redirect_uri),
            ("client_id", self.client_id.as_str()),
            ("code_verifier", verifier.as_str()),
        ];
        if let Some(secret) = &self.client_secret {
            params.push(("client_secret", secret.as_str()));
        }

        tracing::debug!(
            provider = %self.name,
            endpoint = %self.token_endpoint,
            "Exchanging authorization code"
        );

        let response = self
            .http_client
            .post(self.token_endpoint.as_str())
            .form(&params)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();

            if let Ok(oauth_error) = serde_json::from_str::<OAuthErrorResponse>(&body) {
                return Err(IdpError::oauth_error(
                    oauth_error.error,
                    oauth_error.error_description.unwrap_or_default(),
                ));
            }

            return Err(IdpError::TokenExchangeFailed(format!("HTTP {status}")));
        }

        let token: TokenResponse = response.json().await.map_err(|e| {
            IdpError::TokenExchangeFailed(format!("Failed to parse token response: {e}"))
        })?;

        if let Some(token_type) = token.token_type.as_deref()
            && !token_type.eq_ignore_ascii_case("bearer")
        {
            return Err(IdpError::TokenExchangeFailed(format!(
                "unsupported token type {token_type}"
            )));
        }

        self.fetch_userinfo(&token.access_token).await
    }
}

impl fmt::Debug for HttpIdentityProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpIdentityProvider")
            .field("name", &self.name)
            .field("token_endpoint", &self.token_endpoint.as_str())
            .field("userinfo_endpoint", &self.userinfo_endpoint.as_str())
            .field("client_id", &self.client_id)
            .finish_non_exhaustive()
    }
}
