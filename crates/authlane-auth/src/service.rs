//! The auth service facade.
//!
//! [`AuthService`] wires the components together for the two client styles
//! the crate supports:
//!
//! - **Bearer tokens**: `login` / `refresh` / `authenticate` / `logout`
//! - **Browser sessions**: `login_session` / `authenticate_session`, with a
//!   CSRF token per session
//!
//! plus the external provider login (`oauth_authorize` / `oauth_callback`)
//! and maintenance (`prune_expired`). Every piece of state lives in the
//! injected stores; the service itself holds none.

use std::fmt;
use std::sync::Arc;

use time::{Duration, OffsetDateTime};
use tracing::{debug, info};

use crate::clock::{SharedClock, SystemClock, to_time_duration};
use crate::config::AuthConfig;
use crate::cookie::CookiePolicy;
use crate::credential::{Argon2Hasher, CredentialVerifier, PasswordHasher};
use crate::csrf::{CsrfGuard, CsrfToken};
use crate::oauth::{
    AuthorizationRedirect, CallbackParams, HttpIdentityProvider, IdentityProvider,
    OAuthFlowCoordinator, ProviderGrant,
};
use crate::revocation::RevocationRegistry;
use crate::session::SessionManager;
use crate::storage::{
    CredentialStore, CsrfStore, InMemoryCredentialStore, InMemoryCsrfStore,
    InMemoryOAuthStateStore, InMemoryRefreshTokenStore, InMemoryRevocationStore,
    InMemorySessionStore, OAuthStateStore, RefreshTokenStore, RevocationStore, SessionStore,
};
use crate::token::{
    AccessTokenClaims, Jwks, JwtService, RefreshRotator, SigningKeyPair, TokenIssuer, TokenPair,
    TokenVerifier,
};
use crate::types::{ClientFingerprint, Identity, Session};
use crate::{AuthError, AuthResult};

// =============================================================================
// Request / Response Types
// =============================================================================

/// Result of a session login.
#[derive(Clone)]
pub struct SessionLogin {
    /// Session id for the session cookie.
    pub session_id: String,
    /// CSRF token for the client to echo on state-changing requests.
    pub csrf_token: CsrfToken,
    /// The stored session.
    pub session: Session,
}

impl fmt::Debug for SessionLogin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionLogin")
            .field("csrf_token", &self.csrf_token)
            .field("session", &self.session)
            .finish_non_exhaustive()
    }
}

/// What a client hands back when logging out. Every part is optional.
#[derive(Clone, Default)]
pub struct Logout {
    /// Access token to revoke until it expires.
    pub access_token: Option<String>,
    /// Refresh token whose family is revoked.
    pub refresh_token: Option<String>,
    /// Session to destroy.
    pub session_id: Option<String>,
}

impl fmt::Debug for Logout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Logout")
            .field("access_token", &self.access_token.is_some())
            .field("refresh_token", &self.refresh_token.is_some())
            .field("session_id", &self.session_id.is_some())
            .finish()
    }
}

/// Number of expired entries removed by [`AuthService::prune_expired`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PruneReport {
    /// Revocation entries.
    pub revocations: u64,
    /// Refresh tokens.
    pub refresh_tokens: u64,
    /// Sessions.
    pub sessions: u64,
    /// CSRF tokens.
    pub csrf_tokens: u64,
    /// Pending OAuth flows.
    pub oauth_states: u64,
}

impl PruneReport {
    /// Total number of removed entries.
    #[must_use]
    pub fn total(&self) -> u64 {
        self.revocations + self.refresh_tokens + self.sessions + self.csrf_tokens + self.oauth_states
    }
}

// =============================================================================
// Builder
// =============================================================================

/// Builds an [`AuthService`].
///
/// Every store defaults to its in-memory implementation, the clock to the
/// system clock and the hasher to Argon2id.
pub struct AuthServiceBuilder {
    config: AuthConfig,
    clock: Option<SharedClock>,
    signing_key: Option<SigningKeyPair>,
    hasher: Option<Arc<dyn PasswordHasher>>,
    credentials: Option<Arc<dyn CredentialStore>>,
    refresh_tokens: Option<Arc<dyn RefreshTokenStore>>,
    revocations: Option<Arc<dyn RevocationStore>>,
    sessions: Option<Arc<dyn SessionStore>>,
    csrf: Option<Arc<dyn CsrfStore>>,
    oauth_states: Option<Arc<dyn OAuthStateStore>>,
    identity_provider: Option<Arc<dyn IdentityProvider>>,
}

impl AuthServiceBuilder {
    /// Sets the time source.
    #[must_use]
    pub fn with_clock(mut self, clock: SharedClock) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Signs with `key` instead of the key described by the configuration.
    #[must_use]
    pub fn with_signing_key(mut self, key: SigningKeyPair) -> Self {
        self.signing_key = Some(key);
        self
    }

    /// Sets the password hasher.
    #[must_use]
    pub fn with_hasher(mut self, hasher: Arc<dyn PasswordHasher>) -> Self {
        self.hasher = Some(hasher);
        self
    }

    /// Sets the credential store.
    #[must_use]
    pub fn with_credential_store(mut self, store: Arc<dyn CredentialStore>) -> Self {
        self.credentials = Some(store);
        self
    }

    /// Sets the refresh token store.
    #[must_use]
    pub fn with_refresh_token_store(mut self, store: Arc<dyn RefreshTokenStore>) -> Self {
        self.refresh_tokens = Some(store);
        self
    }

    /// Sets the revocation store.
    #[must_use]
    pub fn with_revocation_store(mut self, store: Arc<dyn RevocationStore>) -> Self {
        self.revocations = Some(store);
        self
    }

    /// Sets the session store.
    #[must_use]
    pub fn with_session_store(mut self, store: Arc<dyn SessionStore>) -> Self {
        self.sessions = Some(store);
        self
    }

    /// Sets the CSRF token store.
    #[must_use]
    pub fn with_csrf_store(mut self, store: Arc<dyn CsrfStore>) -> Self {
        self.csrf = Some(store);
        self
    }

    /// Sets the pending OAuth flow store.
    #[must_use]
    pub fn with_oauth_state_store(mut self, store: Arc<dyn OAuthStateStore>) -> Self {
        self.oauth_states = Some(store);
        self
    }

    /// Uses `provider` for OAuth logins instead of the HTTP provider built
    /// from configuration.
    #[must_use]
    pub fn with_identity_provider(mut self, provider: Arc<dyn IdentityProvider>) -> Self {
        self.identity_provider = Some(provider);
        self
    }

    /// Validates the configuration and assembles the service.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::Configuration` if the configuration is invalid or
    /// a signing key or provider client cannot be built.
    pub fn build(self) -> AuthResult<AuthService> {
        let config = self.config;
        config.validate()?;

        let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock));

        let jwt = match self.signing_key {
            Some(key) => JwtService::new(key, config.issuer.clone(), config.audience.clone()),
            None => JwtService::from_config(&config.signing, config.issuer.clone(), config.audience.clone())
                .map_err(|e| AuthError::configuration(format!("signing key: {e}")))?,
        };
        let jwt = Arc::new(jwt);

        let refresh_store = self
            .refresh_tokens
            .unwrap_or_else(|| Arc::new(InMemoryRefreshTokenStore::new()));
        let revocations = RevocationRegistry::new(
            self.revocations
                .unwrap_or_else(|| Arc::new(InMemoryRevocationStore::new())),
            clock.clone(),
        );

        let csrf = Arc::new(CsrfGuard::new(
            self.csrf.unwrap_or_else(|| Arc::new(InMemoryCsrfStore::new())),
            clock.clone(),
            &config.csrf,
        ));
        let sessions = Arc::new(
            SessionManager::new(
                self.sessions
                    .unwrap_or_else(|| Arc::new(InMemorySessionStore::new())),
                clock.clone(),
                &config.session,
            )
            .with_csrf(csrf.clone()),
        );

        let issuer = Arc::new(TokenIssuer::new(
            jwt.clone(),
            refresh_store.clone(),
            clock.clone(),
            &config.tokens,
        ));
        let verifier = TokenVerifier::new(
            jwt.clone(),
            revocations.clone(),
            clock.clone(),
            config.tokens.clock_skew,
        );
        let rotator = RefreshRotator::new(
            refresh_store,
            issuer.clone(),
            revocations.clone(),
            clock.clone(),
            config.tokens.clock_skew,
        )
        .with_sessions(sessions.clone());

        let credentials = CredentialVerifier::new(
            self.credentials
                .unwrap_or_else(|| Arc::new(InMemoryCredentialStore::new())),
            self.hasher.unwrap_or_else(|| Arc::new(Argon2Hasher)),
            config.credentials.verify_timeout,
        )?;

        let oauth = if config.oauth.enabled {
            let provider: Arc<dyn IdentityProvider> = match self.identity_provider {
                Some(provider) => provider,
                None => Arc::new(
                    HttpIdentityProvider::from_config(&config.oauth)
                        .map_err(|e| AuthError::configuration(e.to_string()))?,
                ),
            };
            Some(OAuthFlowCoordinator::from_config(
                &config.oauth,
                provider,
                self.oauth_states
                    .unwrap_or_else(|| Arc::new(InMemoryOAuthStateStore::new())),
                clock.clone(),
            )?)
        } else {
            None
        };

        let cookies = CookiePolicy::new(&config.session, &config.oauth);

        info!(
            issuer = %config.issuer,
            algorithm = %jwt.algorithm(),
            kid = %jwt.current_kid(),
            oauth = oauth.is_some(),
            "Auth service initialized"
        );

        Ok(AuthService {
            clock_skew: to_time_duration(config.tokens.clock_skew),
            config,
            clock,
            jwt,
            credentials,
            issuer,
            verifier,
            rotator,
            revocations,
            sessions,
            csrf,
            oauth,
            cookies,
        })
    }
}

// =============================================================================
// Service
// =============================================================================

/// Token, session and federated login operations.
pub struct AuthService {
    config: AuthConfig,
    clock: SharedClock,
    clock_skew: Duration,
    jwt: Arc<JwtService>,
    credentials: CredentialVerifier,
    issuer: Arc<TokenIssuer>,
    verifier: TokenVerifier,
    rotator: RefreshRotator,
    revocations: RevocationRegistry,
    sessions: Arc<SessionManager>,
    csrf: Arc<CsrfGuard>,
    oauth: Option<OAuthFlowCoordinator>,
    cookies: CookiePolicy,
}

impl AuthService {
    /// Starts building a service for `config`.
    #[must_use]
    pub fn builder(config: AuthConfig) -> AuthServiceBuilder {
        AuthServiceBuilder {
            config,
            clock: None,
            signing_key: None,
            hasher: None,
            credentials: None,
            refresh_tokens: None,
            revocations: None,
            sessions: None,
            csrf: None,
            oauth_states: None,
            identity_provider: None,
        }
    }

    // -------------------------------------------------------------------------
    // Bearer tokens
    // -------------------------------------------------------------------------

    /// Verifies credentials and issues a token pair starting a new family.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::InvalidCredential` if the credentials do not
    /// verify, or `AuthError::UpstreamTimeout` if hashing exceeded its deadline.
    pub async fn login(&self, username: &str, secret: &str) -> AuthResult<TokenPair> {
        let identity = self.credentials.verify(username, secret).await?;
        self.issuer.issue_pair(&identity).await
    }

    /// Rotates a refresh token.
    ///
    /// # Errors
    ///
    /// See [`RefreshRotator::rotate`].
    pub async fn refresh(&self, refresh_token: &str) -> AuthResult<TokenPair> {
        self.rotator.rotate(refresh_token).await
    }

    /// Verifies an access token.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::InvalidToken` for any rejected token.
    pub async fn authenticate(&self, access_token: &str) -> AuthResult<AccessTokenClaims> {
        self.verifier.verify(access_token).await
    }

    // -------------------------------------------------------------------------
    // Browser sessions
    // -------------------------------------------------------------------------

    /// Verifies credentials and creates a server-side session.
    ///
    /// A session id presented by the client is destroyed, never adopted.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::InvalidCredential` if the credentials do not
    /// verify, or a storage error.
    pub async fn login_session(
        &self,
        username: &str,
        secret: &str,
        fingerprint: &ClientFingerprint,
        presented_id: Option<&str>,
    ) -> AuthResult<SessionLogin> {
        let identity = self.credentials.verify(username, secret).await?;
        let created = self
            .sessions
            .create(identity, fingerprint, presented_id)
            .await?;
        let csrf_token = self.csrf.issue(&created.id).await?;

        Ok(SessionLogin {
            session_id: created.id,
            csrf_token,
            session: created.session,
        })
    }

    /// Validates a session request and records activity.
    ///
    /// Non-idempotent methods must carry a CSRF token issued for this
    /// session.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::SessionNotFound` if the session is unknown,
    /// expired or bound to another client, or `AuthError::CsrfMismatch`.
    pub async fn authenticate_session(
        &self,
        session_id: &str,
        fingerprint: &ClientFingerprint,
        method: &str,
        csrf_token: Option<&str>,
    ) -> AuthResult<Session> {
        self.sessions.get(session_id, fingerprint).await?;
        self.csrf.protect(method, session_id, csrf_token).await?;
        self.sessions.touch(session_id, fingerprint).await
    }

    /// Issues an additional CSRF token for a live session.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::SessionNotFound` if the session is not live.
    pub async fn issue_csrf(
        &self,
        session_id: &str,
        fingerprint: &ClientFingerprint,
    ) -> AuthResult<CsrfToken> {
        self.sessions.get(session_id, fingerprint).await?;
        self.csrf.issue(session_id).await
    }

    // -------------------------------------------------------------------------
    // Logout
    // -------------------------------------------------------------------------

    /// Revokes whatever the client presents.
    ///
    /// Invalid or unknown parts are skipped silently, so the outcome never
    /// reveals which of them existed.
    ///
    /// # Errors
    ///
    /// Returns an error only if a store operation fails.
    pub async fn logout(&self, request: Logout) -> AuthResult<()> {
        if let Some(token) = request.access_token.as_deref() {
            match self.verifier.verify(token).await {
                Ok(claims) => {
                    let until = OffsetDateTime::from_unix_timestamp(claims.exp)
                        .map_err(|e| AuthError::internal(format!("exp out of range: {e}")))?
                        + self.clock_skew;
                    self.revocations.revoke_token(&claims.jti, until).await?;
                }
                Err(AuthError::InvalidToken) => debug!("Ignoring invalid access token at logout"),
                Err(e) => return Err(e),
            }
        }

        if let Some(token) = request.refresh_token.as_deref() {
            self.rotator.revoke_family_by_value(token).await?;
        }

        if let Some(session_id) = request.session_id.as_deref() {
            self.sessions.destroy(session_id).await?;
        }

        info!(
            access_token = request.access_token.is_some(),
            refresh_token = request.refresh_token.is_some(),
            session = request.session_id.is_some(),
            "Logout processed"
        );
        Ok(())
    }

    /// Revokes every token and session of `subject`.
    ///
    /// # Errors
    ///
    /// Returns an error if a store operation fails.
    pub async fn revoke_subject(&self, subject: &str) -> AuthResult<()> {
        self.rotator.revoke_chain(subject, None).await
    }

    // -------------------------------------------------------------------------
    // External provider
    // -------------------------------------------------------------------------

    /// Starts an OAuth login.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::Configuration` if OAuth login is disabled.
    pub async fn oauth_authorize(&self) -> AuthResult<AuthorizationRedirect> {
        self.oauth()?.initiate().await
    }

    /// Completes an OAuth login and issues a token pair for the federated
    /// identity.
    ///
    /// # Errors
    ///
    /// See [`OAuthFlowCoordinator::handle_callback`].
    pub async fn oauth_callback(&self, params: CallbackParams) -> AuthResult<TokenPair> {
        let oauth = self.oauth()?;
        let grant = oauth.handle_callback(params).await?;
        let identity = self.federated_identity(oauth.provider_name(), grant);
        self.issuer.issue_pair(&identity).await
    }

    fn oauth(&self) -> AuthResult<&OAuthFlowCoordinator> {
        self.oauth
            .as_ref()
            .ok_or_else(|| AuthError::configuration("OAuth login is not enabled"))
    }

    fn federated_identity(&self, provider: &str, grant: ProviderGrant) -> Identity {
        let mut identity = Identity::new(format!("{provider}|{}", grant.subject));
        identity.role = self.config.oauth.default_role.clone();
        identity.email = grant.email;
        identity.attributes = grant.claims;
        identity
    }

    // -------------------------------------------------------------------------
    // Maintenance
    // -------------------------------------------------------------------------

    /// Removes expired entries from every store.
    ///
    /// Correctness never depends on this; expired entries are already
    /// ignored on read.
    ///
    /// # Errors
    ///
    /// Returns an error if a cleanup operation fails.
    pub async fn prune_expired(&self) -> AuthResult<PruneReport> {
        let report = PruneReport {
            revocations: self.revocations.prune().await?,
            refresh_tokens: self.rotator.prune().await?,
            sessions: self.sessions.prune().await?,
            csrf_tokens: self.csrf.prune().await?,
            oauth_states: match &self.oauth {
                Some(oauth) => oauth.prune().await?,
                None => 0,
            },
        };
        debug!(
            revocations = report.revocations,
            refresh_tokens = report.refresh_tokens,
            sessions = report.sessions,
            csrf_tokens = report.csrf_tokens,
            oauth_states = report.oauth_states,
            "Expired auth state pruned"
        );
        Ok(report)
    }

    // -------------------------------------------------------------------------
    // Accessors
    // -------------------------------------------------------------------------

    /// Public keys for verifying issued tokens.
    #[must_use]
    pub fn jwks(&self) -> Jwks {
        self.jwt.jwks()
    }

    /// The signing service, for key rotation.
    #[must_use]
    pub fn jwt(&self) -> &Arc<JwtService> {
        &self.jwt
    }

    /// Cookie attributes for the session flow.
    #[must_use]
    pub fn cookies(&self) -> &CookiePolicy {
        &self.cookies
    }

    /// The configuration the service was built from.
    #[must_use]
    pub fn config(&self) -> &AuthConfig {
        &self.config
    }

    /// Returns `true` if OAuth login is enabled.
    #[must_use]
    pub fn oauth_enabled(&self) -> bool {
        self.oauth.is_some()
    }

    /// The service's time source.
    #[must_use]
    pub fn clock(&self) -> &SharedClock {
        &self.clock
    }
}

impl fmt::Debug for AuthService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthService")
            .field("jwt", &self.jwt)
            .field("sessions", &self.sessions)
            .field("oauth", &self.oauth)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::credential::HashError;

    /// Cheap deterministic hasher so tests don't pay for Argon2.
    struct PlainHasher;

    impl PasswordHasher for PlainHasher {
        fn hash(&self, secret: &str) -> Result<String, HashError> {
            Ok(format!("plain${secret}"))
        }

        fn verify(&self, secret: &str, hash: &str) -> Result<bool, HashError> {
            Ok(hash == format!("plain${secret}"))
        }
    }

    fn service() -> (AuthService, Arc<ManualClock>) {
        let mut config = AuthConfig::default();
        config.signing.algorithm = "HS256".to_string();
        config.signing.secret = Some("0123456789abcdef0123456789abcdef".to_string());

        let users = InMemoryCredentialStore::new();
        users.insert(
            "alice",
            Identity::new("user-alice").with_role("admin"),
            "plain$wonderland".to_string(),
        );

        let clock = Arc::new(ManualClock::starting_now());
        let service = AuthService::builder(config)
            .with_clock(clock.clone())
            .with_hasher(Arc::new(PlainHasher))
            .with_credential_store(Arc::new(users))
            .build()
            .unwrap();
        (service, clock)
    }

    #[tokio::test]
    async fn test_login_and_authenticate() {
        let (service, _) = service();
        let pair = service.login("alice", "wonderland").await.unwrap();
        let claims = service.authenticate(&pair.access_token).await.unwrap();
        assert_eq!(claims.sub, "user-alice");
        assert_eq!(claims.role.as_deref(), Some("admin"));

        let err = service.login("alice", "wrong").await.unwrap_err();
        assert!(matches!(err, AuthError::InvalidCredential));
    }

    #[tokio::test]
    async fn test_logout_revokes_everything_presented() {
        let (service, _) = service();
        let pair = service.login("alice", "wonderland").await.unwrap();

        service
            .logout(Logout {
                access_token: Some(pair.access_token.clone()),
                refresh_token: Some(pair.refresh_token.clone()),
                session_id: None,
            })
            .await
            .unwrap();

        assert!(matches!(
            service.authenticate(&pair.access_token).await.unwrap_err(),
            AuthError::InvalidToken
        ));
        assert!(matches!(
            service.refresh(&pair.refresh_token).await.unwrap_err(),
            AuthError::InvalidToken
        ));
    }

    #[tokio::test]
    async fn test_logout_is_idempotent_and_quiet() {
        let (service, _) = service();
        let request = Logout {
            access_token: Some("garbage".to_string()),
            refresh_token: Some("unknown".to_string()),
            session_id: Some("missing".to_string()),
        };
        service.logout(request.clone()).await.unwrap();
        service.logout(request).await.unwrap();
        service.logout(Logout::default()).await.unwrap();
    }

    #[tokio::test]
    async fn test_session_flow_requires_csrf() {
        let (service, _) = service();
        let fingerprint = ClientFingerprint::new(None, Some("test-agent".to_string()));
        let login = service
            .login_session("alice", "wonderland", &fingerprint, None)
            .await
            .unwrap();

        service
            .authenticate_session(&login.session_id, &fingerprint, "GET", None)
            .await
            .unwrap();
        let err = service
            .authenticate_session(&login.session_id, &fingerprint, "POST", None)
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::CsrfMismatch));

        let session = service
            .authenticate_session(
                &login.session_id,
                &fingerprint,
                "POST",
                Some(&login.csrf_token.value),
            )
            .await
            .unwrap();
        assert_eq!(session.subject(), "user-alice");
    }

    #[tokio::test]
    async fn test_idle_session_expires() {
        let (service, clock) = service();
        let fingerprint = ClientFingerprint::default();
        let login = service
            .login_session("alice", "wonderland", &fingerprint, None)
            .await
            .unwrap();

        clock.advance(Duration::minutes(31));
        let err = service
            .authenticate_session(&login.session_id, &fingerprint, "GET", None)
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::SessionNotFound));
    }

    #[tokio::test]
    async fn test_prune_expired() {
        let (service, clock) = service();
        service
            .login_session("alice", "wonderland", &ClientFingerprint::default(), None)
            .await
            .unwrap();
        service.login("alice", "wonderland").await.unwrap();

        clock.advance(Duration::days(15));
        let report = service.prune_expired().await.unwrap();
        assert_eq!(report.sessions, 1);
        assert_eq!(report.refresh_tokens, 1);
        assert_eq!(report.csrf_tokens, 0);
        assert_eq!(report.total(), 2);
    }

    #[tokio::test]
    async fn test_oauth_disabled() {
        let (service, _) = service();
        assert!(!service.oauth_enabled());
        let err = service.oauth_authorize().await.unwrap_err();
        assert!(matches!(err, AuthError::Configuration { .. }));
    }

    #[test]
    fn test_invalid_config_rejected() {
        let mut config = AuthConfig::default();
        config.signing.algorithm = "HS256".to_string();
        let err = AuthService::builder(config).build().unwrap_err();
        assert!(matches!(err, AuthError::Configuration { .. }));
    }

    #[test]
    fn test_jwks_lists_no_symmetric_keys() {
        let (service, _) = service();
        assert!(service.jwks().keys.is_empty());
    }
}
