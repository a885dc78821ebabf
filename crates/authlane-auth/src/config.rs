//! Authentication and session configuration.
//!
//! All sections deserialize with defaults, so a deployment only needs to
//! override what differs. Durations use humantime notation (`"15m"`, `"14d"`).
//!
//! # Example (TOML)
//!
//! ```toml
//! [auth]
//! issuer = "https://auth.example.com"
//! audience = "https://api.example.com"
//!
//! [auth.signing]
//! algorithm = "HS256"
//! secret = "change-me-to-at-least-32-bytes-of-entropy"
//!
//! [auth.tokens]
//! access_token_lifetime = "15m"
//! refresh_token_lifetime = "14d"
//! ```

use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::token::jwt::SigningAlgorithm;

/// Largest accepted `tokens.clock_skew`.
pub const MAX_CLOCK_SKEW: Duration = Duration::from_secs(5 * 60);

/// Largest accepted `tokens.access_token_lifetime`.
pub const MAX_ACCESS_TOKEN_LIFETIME: Duration = Duration::from_secs(24 * 3600);

/// Largest accepted refresh, chain, session and state lifetime.
pub const MAX_LONG_LIFETIME: Duration = Duration::from_secs(366 * 24 * 3600);

/// Root authentication configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AuthConfig {
    /// Value of the `iss` claim in issued access tokens.
    pub issuer: String,

    /// Value of the `aud` claim in issued access tokens.
    pub audience: String,

    /// Token signing keys and algorithm.
    pub signing: SigningConfig,

    /// Token lifetimes and claim policy.
    pub tokens: TokenConfig,

    /// Server-side session settings.
    pub session: SessionConfig,

    /// Anti-forgery token settings.
    pub csrf: CsrfConfig,

    /// Credential verification settings.
    pub credentials: CredentialConfig,

    /// External identity provider settings.
    pub oauth: OAuthClientConfig,

    /// Background cleanup settings.
    pub reaper: ReaperConfig,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            issuer: "http://localhost:8080".to_string(),
            audience: "http://localhost:8080".to_string(),
            signing: SigningConfig::default(),
            tokens: TokenConfig::default(),
            session: SessionConfig::default(),
            csrf: CsrfConfig::default(),
            credentials: CredentialConfig::default(),
            oauth: OAuthClientConfig::default(),
            reaper: ReaperConfig::default(),
        }
    }
}

/// Token signing configuration.
///
/// Exactly one algorithm is accepted per deployment. Tokens presenting any
/// other `alg` header are rejected before their signature is inspected.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SigningConfig {
    /// Signing algorithm.
    /// Supported: "HS256", "RS256", "RS384", "ES384"
    pub algorithm: String,

    /// Key ID placed in the `kid` header. Generated when absent.
    pub key_id: Option<String>,

    /// Shared secret for HS256.
    pub secret: Option<String>,

    /// PEM-encoded private key (PKCS#8) for RS*/ES384.
    pub private_key_pem: Option<String>,

    /// PEM-encoded public key (SPKI) for RS*/ES384.
    pub public_key_pem: Option<String>,

    /// Generate a throwaway asymmetric key pair at startup when no key
    /// material is configured. Tokens do not survive a restart.
    pub generate_ephemeral: bool,

    /// Keys that no longer sign but still verify tokens issued before a rotation.
    pub retired_keys: Vec<RetiredKeyConfig>,
}

impl Default for SigningConfig {
    fn default() -> Self {
        Self {
            algorithm: "ES384".to_string(),
            key_id: None,
            secret: None,
            private_key_pem: None,
            public_key_pem: None,
            generate_ephemeral: true,
            retired_keys: Vec::new(),
        }
    }
}

impl SigningConfig {
    /// Parses the configured algorithm.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidValue` for an unsupported algorithm name.
    pub fn parsed_algorithm(&self) -> Result<SigningAlgorithm, ConfigError> {
        SigningAlgorithm::parse(&self.algorithm).ok_or_else(|| {
            ConfigError::InvalidValue(format!(
                "Invalid signing algorithm: '{}'. Must be HS256, RS256, RS384, or ES384",
                self.algorithm
            ))
        })
    }
}

/// A verification-only key retained after rotation.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RetiredKeyConfig {
    /// Key ID the retired tokens carry in their header.
    pub kid: String,

    /// Shared secret (HS256).
    #[serde(default)]
    pub secret: Option<String>,

    /// PEM-encoded public key (RS*/ES384).
    #[serde(default)]
    pub public_key_pem: Option<String>,
}

/// Token lifetime and claim configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TokenConfig {
    /// Access token lifetime. Keep this short; revocation relies on it.
    #[serde(with = "humantime_serde")]
    pub access_token_lifetime: Duration,

    /// Refresh token lifetime, counted from each rotation.
    #[serde(with = "humantime_serde")]
    pub refresh_token_lifetime: Duration,

    /// Upper bound on a whole rotation chain, counted from the login that
    /// started it. `None` lets a chain live as long as it keeps rotating.
    #[serde(default, with = "humantime_serde")]
    pub max_chain_lifetime: Option<Duration>,

    /// Tolerated clock difference between issuer and verifier.
    #[serde(with = "humantime_serde")]
    pub clock_skew: Duration,

    /// Custom identity attributes that may be copied into access tokens.
    /// Anything else is dropped at issue time.
    pub allowed_claims: Vec<String>,
}

impl Default for TokenConfig {
    fn default() -> Self {
        Self {
            access_token_lifetime: Duration::from_secs(15 * 60),
            refresh_token_lifetime: Duration::from_secs(14 * 24 * 3600),
            max_chain_lifetime: None,
            clock_skew: Duration::from_secs(30),
            allowed_claims: Vec::new(),
        }
    }
}

/// Server-side session configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Inactivity after which a session is dropped.
    #[serde(with = "humantime_serde")]
    pub idle_timeout: Duration,

    /// Maximum session age regardless of activity.
    #[serde(with = "humantime_serde")]
    pub absolute_timeout: Duration,

    /// Bind sessions to the client IP address seen at login.
    pub bind_ip: bool,

    /// Bind sessions to the User-Agent seen at login.
    pub bind_user_agent: bool,

    /// Session cookie attributes.
    pub cookie: SessionCookieConfig,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            idle_timeout: Duration::from_secs(30 * 60),
            absolute_timeout: Duration::from_secs(12 * 3600),
            bind_ip: false,
            bind_user_agent: true,
            cookie: SessionCookieConfig::default(),
        }
    }
}

/// Session cookie attributes.
///
/// `HttpOnly` and `SameSite=Strict` are always set; only transport and
/// scoping attributes are configurable.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SessionCookieConfig {
    /// Session cookie name.
    pub name: String,

    /// Name of the short-lived cookie binding an OAuth redirect to the browser.
    pub oauth_state_name: String,

    /// Set the `Secure` attribute. Disable only for plain-HTTP development.
    pub secure: bool,

    /// Cookie path.
    pub path: String,

    /// Cookie domain.
    pub domain: Option<String>,
}

impl Default for SessionCookieConfig {
    fn default() -> Self {
        Self {
            name: "authlane_session".to_string(),
            oauth_state_name: "authlane_oauth".to_string(),
            secure: true,
            path: "/".to_string(),
            domain: None,
        }
    }
}

/// Anti-forgery token configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CsrfConfig {
    /// Number of live tokens kept per session; the oldest is evicted first.
    pub max_tokens_per_session: usize,

    /// Lifetime of a single token.
    #[serde(with = "humantime_serde")]
    pub token_ttl: Duration,

    /// Request header carrying the token.
    pub header_name: String,
}

impl Default for CsrfConfig {
    fn default() -> Self {
        Self {
            max_tokens_per_session: 4,
            token_ttl: Duration::from_secs(2 * 3600),
            header_name: "x-csrf-token".to_string(),
        }
    }
}

/// Credential verification configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CredentialConfig {
    /// Deadline for a single password hash verification.
    #[serde(with = "humantime_serde")]
    pub verify_timeout: Duration,
}

impl Default for CredentialConfig {
    fn default() -> Self {
        Self {
            verify_timeout: Duration::from_secs(5),
        }
    }
}

/// External identity provider (authorization code + PKCE) configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct OAuthClientConfig {
    /// Enable the OAuth login flow.
    pub enabled: bool,

    /// Short provider name, used as the subject prefix of federated identities.
    pub provider_name: String,

    /// Provider authorization endpoint.
    pub authorization_endpoint: Option<Url>,

    /// Provider token endpoint.
    pub token_endpoint: Option<Url>,

    /// Provider userinfo endpoint.
    pub userinfo_endpoint: Option<Url>,

    /// Client ID registered with the provider.
    pub client_id: String,

    /// Client secret for confidential clients.
    pub client_secret: Option<String>,

    /// Redirect URI registered with the provider.
    pub redirect_uri: Option<Url>,

    /// Scopes requested at authorization.
    pub scopes: Vec<String>,

    /// How long an initiated flow may wait for its callback.
    #[serde(with = "humantime_serde")]
    pub state_ttl: Duration,

    /// Deadline for each request to the provider.
    #[serde(with = "humantime_serde")]
    pub request_timeout: Duration,

    /// Role assigned to federated identities.
    pub default_role: Option<String>,
}

impl Default for OAuthClientConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            provider_name: "idp".to_string(),
            authorization_endpoint: None,
            token_endpoint: None,
            userinfo_endpoint: None,
            client_id: String::new(),
            client_secret: None,
            redirect_uri: None,
            scopes: vec!["openid".to_string(), "email".to_string()],
            state_ttl: Duration::from_secs(10 * 60),
            request_timeout: Duration::from_secs(10),
            default_role: Some("user".to_string()),
        }
    }
}

/// Background cleanup configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ReaperConfig {
    /// Run the periodic cleanup task.
    pub enabled: bool,

    /// Interval between cleanup passes.
    #[serde(with = "humantime_serde")]
    pub interval: Duration,
}

impl Default for ReaperConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval: Duration::from_secs(60),
        }
    }
}

/// Configuration error.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// An invalid configuration value was provided.
    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),

    /// A required configuration value is missing.
    #[error("Missing required configuration: {0}")]
    Missing(String),
}

impl AuthConfig {
    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns a `ConfigError` if:
    /// - The issuer or audience is empty
    /// - The signing algorithm is not supported, or its key material is missing
    /// - A lifetime is zero, or the refresh lifetime is shorter than the access lifetime
    /// - The clock skew or a lifetime exceeds its ceiling
    /// - The session idle timeout exceeds the absolute timeout
    /// - The OAuth flow is enabled without its endpoints and client ID
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.issuer.trim().is_empty() {
            return Err(ConfigError::InvalidValue(
                "issuer cannot be empty".to_string(),
            ));
        }
        if self.audience.trim().is_empty() {
            return Err(ConfigError::InvalidValue(
                "audience cannot be empty".to_string(),
            ));
        }

        let algorithm = self.signing.parsed_algorithm()?;
        if algorithm.is_hmac() {
            match self.signing.secret.as_deref() {
                None | Some("") => {
                    return Err(ConfigError::Missing("signing.secret".to_string()));
                }
                Some(secret) if secret.len() < 32 => {
                    return Err(ConfigError::InvalidValue(
                        "signing.secret must be at least 32 bytes".to_string(),
                    ));
                }
                Some(_) => {}
            }
        } else if self.signing.private_key_pem.is_none() && !self.signing.generate_ephemeral {
            return Err(ConfigError::Missing(
                "signing.private_key_pem (or signing.generate_ephemeral = true)".to_string(),
            ));
        }

        let tokens = &self.tokens;
        if tokens.access_token_lifetime.is_zero() {
            return Err(ConfigError::InvalidValue(
                "tokens.access_token_lifetime must be > 0".to_string(),
            ));
        }
        if tokens.refresh_token_lifetime < tokens.access_token_lifetime {
            return Err(ConfigError::InvalidValue(
                "tokens.refresh_token_lifetime must be >= tokens.access_token_lifetime"
                    .to_string(),
            ));
        }
        if tokens.max_chain_lifetime.is_some_and(|d| d.is_zero()) {
            return Err(ConfigError::InvalidValue(
                "tokens.max_chain_lifetime must be > 0".to_string(),
            ));
        }
        if tokens.clock_skew > MAX_CLOCK_SKEW {
            return Err(ConfigError::InvalidValue(format!(
                "tokens.clock_skew must be <= {}s",
                MAX_CLOCK_SKEW.as_secs()
            )));
        }
        if tokens.access_token_lifetime > MAX_ACCESS_TOKEN_LIFETIME {
            return Err(ConfigError::InvalidValue(format!(
                "tokens.access_token_lifetime must be <= {}s",
                MAX_ACCESS_TOKEN_LIFETIME.as_secs()
            )));
        }
        for (name, lifetime) in [
            ("tokens.refresh_token_lifetime", Some(tokens.refresh_token_lifetime)),
            ("tokens.max_chain_lifetime", tokens.max_chain_lifetime),
            ("session.absolute_timeout", Some(self.session.absolute_timeout)),
            ("csrf.token_ttl", Some(self.csrf.token_ttl)),
            ("oauth.state_ttl", Some(self.oauth.state_ttl)),
        ] {
            if lifetime.is_some_and(|d| d > MAX_LONG_LIFETIME) {
                return Err(ConfigError::InvalidValue(format!(
                    "{name} must be <= {}s",
                    MAX_LONG_LIFETIME.as_secs()
                )));
            }
        }

        if self.session.idle_timeout.is_zero() {
            return Err(ConfigError::InvalidValue(
                "session.idle_timeout must be > 0".to_string(),
            ));
        }
        if self.session.idle_timeout > self.session.absolute_timeout {
            return Err(ConfigError::InvalidValue(
                "session.idle_timeout must be <= session.absolute_timeout".to_string(),
            ));
        }

        if self.csrf.max_tokens_per_session == 0 {
            return Err(ConfigError::InvalidValue(
                "csrf.max_tokens_per_session must be > 0".to_string(),
            ));
        }
        if self.credentials.verify_timeout.is_zero() {
            return Err(ConfigError::InvalidValue(
                "credentials.verify_timeout must be > 0".to_string(),
            ));
        }

        if self.oauth.enabled {
            let oauth = &self.oauth;
            if oauth.authorization_endpoint.is_none() {
                return Err(ConfigError::Missing(
                    "oauth.authorization_endpoint".to_string(),
                ));
            }
            if oauth.token_endpoint.is_none() {
                return Err(ConfigError::Missing("oauth.token_endpoint".to_string()));
            }
            if oauth.userinfo_endpoint.is_none() {
                return Err(ConfigError::Missing("oauth.userinfo_endpoint".to_string()));
            }
            if oauth.redirect_uri.is_none() {
                return Err(ConfigError::Missing("oauth.redirect_uri".to_string()));
            }
            if oauth.client_id.is_empty() {
                return Err(ConfigError::Missing("oauth.client_id".to_string()));
            }
            if oauth.request_timeout.is_zero() || oauth.state_ttl.is_zero() {
                return Err(ConfigError::InvalidValue(
                    "oauth timeouts must be > 0".to_string(),
                ));
            }
        }

        if self.reaper.enabled && self.reaper.interval.is_zero() {
            return Err(ConfigError::InvalidValue(
                "reaper.interval must be > 0".to_string(),
            ));
        }

        Ok(())
    }
}
