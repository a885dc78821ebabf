//! Access and refresh token minting.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use time::{Duration, OffsetDateTime};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::clock::{SharedClock, to_time_duration};
use crate::config::TokenConfig;
use crate::crypto::{generate_token, hash_token};
use crate::storage::RefreshTokenStore;
use crate::token::claims::{AccessTokenClaims, ClaimsPolicy};
use crate::token::jwt::JwtService;
use crate::types::{Identity, RefreshTokenRecord, RefreshTokenStatus};
use crate::{AuthError, AuthResult};

/// Which token to mint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    /// Short-lived signed JWT.
    Access,
    /// Opaque single-use refresh token starting a new family.
    Refresh,
}

/// A freshly signed access token.
#[derive(Debug, Clone)]
pub struct IssuedAccessToken {
    /// Compact JWT.
    pub token: String,
    /// The signed claims.
    pub claims: AccessTokenClaims,
    /// When the token expires.
    pub expires_at: OffsetDateTime,
}

/// A freshly minted refresh token.
///
/// `value` is the only copy of the plaintext; the store keeps its hash.
#[derive(Clone)]
pub struct IssuedRefreshToken {
    /// Plaintext token handed to the client.
    pub value: String,
    /// The stored record.
    pub record: RefreshTokenRecord,
}

impl std::fmt::Debug for IssuedRefreshToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IssuedRefreshToken")
            .field("record", &self.record)
            .finish_non_exhaustive()
    }
}

/// Result of [`TokenIssuer::issue`].
#[derive(Debug, Clone)]
pub enum IssuedToken {
    /// An access token.
    Access(IssuedAccessToken),
    /// A refresh token.
    Refresh(IssuedRefreshToken),
}

/// Access/refresh token pair returned to clients.
#[derive(Clone, Serialize, Deserialize)]
pub struct TokenPair {
    /// Signed access token.
    pub access_token: String,

    /// Opaque refresh token.
    pub refresh_token: String,

    /// Always `"Bearer"`.
    pub token_type: String,

    /// Access token lifetime in seconds.
    pub expires_in: u64,

    /// Refresh token lifetime in seconds.
    pub refresh_expires_in: u64,
}

impl std::fmt::Debug for TokenPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenPair")
            .field("token_type", &self.token_type)
            .field("expires_in", &self.expires_in)
            .field("refresh_expires_in", &self.refresh_expires_in)
            .finish_non_exhaustive()
    }
}

fn whole_seconds(duration: Duration) -> u64 {
    u64::try_from(duration.whole_seconds()).unwrap_or(0)
}

/// Mints access tokens and refresh tokens.
pub struct TokenIssuer {
    jwt: Arc<JwtService>,
    refresh_tokens: Arc<dyn RefreshTokenStore>,
    clock: SharedClock,
    policy: ClaimsPolicy,
    access_ttl: Duration,
    refresh_ttl: Duration,
    max_chain_lifetime: Option<Duration>,
}

impl TokenIssuer {
    /// Creates an issuer.
    #[must_use]
    pub fn new(
        jwt: Arc<JwtService>,
        refresh_tokens: Arc<dyn RefreshTokenStore>,
        clock: SharedClock,
        config: &TokenConfig,
    ) -> Self {
        Self {
            jwt,
            refresh_tokens,
            clock,
            policy: ClaimsPolicy::new(config.allowed_claims.iter().cloned()),
            access_ttl: to_time_duration(config.access_token_lifetime),
            refresh_ttl: to_time_duration(config.refresh_token_lifetime),
            max_chain_lifetime: config.max_chain_lifetime.map(to_time_duration),
        }
    }

    /// Access token lifetime.
    #[must_use]
    pub fn access_ttl(&self) -> Duration {
        self.access_ttl
    }

    /// Refresh token lifetime.
    #[must_use]
    pub fn refresh_ttl(&self) -> Duration {
        self.refresh_ttl
    }

    /// Mints a token of the requested kind.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::Internal` if signing fails, or `AuthError::Storage`
    /// if the refresh record cannot be stored.
    pub async fn issue(&self, identity: &Identity, kind: TokenKind) -> AuthResult<IssuedToken> {
        match kind {
            TokenKind::Access => self.issue_access(identity).map(IssuedToken::Access),
            TokenKind::Refresh => self.issue_refresh(identity).await.map(IssuedToken::Refresh),
        }
    }

    /// Signs an access token for `identity`.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::Internal` if signing fails.
    pub fn issue_access(&self, identity: &Identity) -> AuthResult<IssuedAccessToken> {
        let now = self.clock.now();
        let expires_at = now + self.access_ttl;

        let claims = AccessTokenClaims {
            iss: self.jwt.issuer().to_string(),
            sub: identity.subject.clone(),
            aud: self.jwt.audience().to_string(),
            exp: expires_at.unix_timestamp(),
            iat: now.unix_timestamp(),
            nbf: now.unix_timestamp(),
            jti: Uuid::new_v4().to_string(),
            role: identity.role.clone(),
            email: identity.email.clone(),
            ext: self.policy.filter(identity),
        };

        let token = self
            .jwt
            .encode(&claims)
            .map_err(|e| AuthError::internal(format!("failed to sign access token: {e}")))?;

        debug!(subject = %claims.sub, jti = %claims.jti, "Access token issued");

        Ok(IssuedAccessToken {
            token,
            claims,
            expires_at,
        })
    }

    /// Mints a refresh token that starts a new family.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::Storage` if the record cannot be stored.
    pub async fn issue_refresh(&self, identity: &Identity) -> AuthResult<IssuedRefreshToken> {
        let now = self.clock.now();
        self.store_refresh(Uuid::new_v4(), Uuid::new_v4(), now, identity.clone(), now)
            .await
    }

    /// Mints the successor of a redeemed refresh token in the same family.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::InvalidToken` if the family has outlived the
    /// configured chain lifetime, or `AuthError::Storage` on store failure.
    pub async fn issue_successor(
        &self,
        previous: &RefreshTokenRecord,
        successor_id: Uuid,
    ) -> AuthResult<IssuedRefreshToken> {
        let now = self.clock.now();
        self.store_refresh(
            successor_id,
            previous.family_id,
            previous.family_started_at,
            previous.identity.clone(),
            now,
        )
        .await
    }

    async fn store_refresh(
        &self,
        id: Uuid,
        family_id: Uuid,
        family_started_at: OffsetDateTime,
        identity: Identity,
        now: OffsetDateTime,
    ) -> AuthResult<IssuedRefreshToken> {
        let mut expires_at = now + self.refresh_ttl;
        if let Some(max_chain) = self.max_chain_lifetime {
            expires_at = expires_at.min(family_started_at + max_chain);
        }
        if expires_at <= now {
            warn!(
                subject = %identity.subject,
                family_id = %family_id,
                "Refresh chain exceeded its maximum lifetime"
            );
            return Err(AuthError::InvalidToken);
        }

        let value = generate_token();
        let record = RefreshTokenRecord {
            id,
            token_hash: hash_token(&value),
            family_id,
            family_started_at,
            identity,
            issued_at: now,
            expires_at,
            status: RefreshTokenStatus::Active,
            replaced_by: None,
        };

        self.refresh_tokens.insert(record.clone()).await?;
        debug!(
            subject = %record.subject(),
            family_id = %family_id,
            token_id = %id,
            "Refresh token issued"
        );

        Ok(IssuedRefreshToken { value, record })
    }

    /// Issues an access token and a refresh token starting a new family.
    ///
    /// # Errors
    ///
    /// See [`issue_access`](Self::issue_access) and
    /// [`issue_refresh`](Self::issue_refresh).
    pub async fn issue_pair(&self, identity: &Identity) -> AuthResult<TokenPair> {
        let access = self.issue_access(identity)?;
        let refresh = self.issue_refresh(identity).await?;
        info!(subject = %identity.subject, family_id = %refresh.record.family_id, "Token pair issued");
        Ok(self.pair(access, refresh))
    }

    /// Issues an access token and the successor of a redeemed refresh token.
    ///
    /// # Errors
    ///
    /// See [`issue_access`](Self::issue_access) and
    /// [`issue_successor`](Self::issue_successor).
    pub async fn issue_successor_pair(
        &self,
        previous: &RefreshTokenRecord,
        successor_id: Uuid,
    ) -> AuthResult<TokenPair> {
        let refresh = self.issue_successor(previous, successor_id).await?;
        let access = self.issue_access(&previous.identity)?;
        Ok(self.pair(access, refresh))
    }

    fn pair(&self, access: IssuedAccessToken, refresh: IssuedRefreshToken) -> TokenPair {
        let now = self.clock.now();
        TokenPair {
            access_token: access.token,
            refresh_token: refresh.value,
            token_type: "Bearer".to_string(),
            expires_in: whole_seconds(access.expires_at - now),
            refresh_expires_in: whole_seconds(refresh.record.expires_at - now),
        }
    }
}

impl std::fmt::Debug for TokenIssuer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenIssuer")
            .field("jwt", &self.jwt)
            .field("access_ttl", &self.access_ttl)
            .field("refresh_ttl", &self.refresh_ttl)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{Clock, ManualClock};
    use crate::storage::InMemoryRefreshTokenStore;
    use crate::token::jwt::SigningKeyPair;

    fn issuer_with(config: TokenConfig) -> (TokenIssuer, Arc<ManualClock>, Arc<InMemoryRefreshTokenStore>) {
        let jwt = Arc::new(JwtService::new(
            SigningKeyPair::from_secret("k1", b"0123456789abcdef0123456789abcdef").unwrap(),
            "https://auth.test",
            "https://api.test",
        ));
        let clock = Arc::new(ManualClock::starting_now());
        let store = Arc::new(InMemoryRefreshTokenStore::new());
        let issuer = TokenIssuer::new(jwt, store.clone(), clock.clone(), &config);
        (issuer, clock, store)
    }

    #[test]
    fn test_access_token_claims() {
        let (issuer, clock, _) = issuer_with(TokenConfig {
            allowed_claims: vec!["tenant".to_string()],
            ..TokenConfig::default()
        });
        let identity = Identity::new("u1")
            .with_role("admin")
            .with_attribute("tenant", "acme")
            .with_attribute("secret_flag", true);

        let access = issuer.issue_access(&identity).unwrap();
        let now = clock.now().unix_timestamp();

        assert_eq!(access.claims.iss, "https://auth.test");
        assert_eq!(access.claims.aud, "https://api.test");
        assert_eq!(access.claims.iat, now);
        assert_eq!(access.claims.nbf, now);
        assert_eq!(access.claims.exp, now + 900);
        assert_eq!(access.claims.role.as_deref(), Some("admin"));
        assert_eq!(access.claims.ext.len(), 1);
        assert!(Uuid::parse_str(&access.claims.jti).is_ok());
    }

    #[test]
    fn test_jti_unique() {
        let (issuer, _, _) = issuer_with(TokenConfig::default());
        let identity = Identity::new("u1");
        let a = issuer.issue_access(&identity).unwrap();
        let b = issuer.issue_access(&identity).unwrap();
        assert_ne!(a.claims.jti, b.claims.jti);
        assert_ne!(a.token, b.token);
    }

    #[tokio::test]
    async fn test_refresh_record_stores_hash_only() {
        let (issuer, _, store) = issuer_with(TokenConfig::default());
        let refresh = issuer.issue_refresh(&Identity::new("u1")).await.unwrap();

        assert_eq!(refresh.value.len(), 43);
        assert_ne!(refresh.record.token_hash, refresh.value);
        let stored = store
            .find_by_hash(&hash_token(&refresh.value))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.id, refresh.record.id);
        assert_eq!(stored.status, RefreshTokenStatus::Active);
    }

    #[tokio::test]
    async fn test_issue_dispatches_on_kind() {
        let (issuer, _, store) = issuer_with(TokenConfig::default());
        let identity = Identity::new("u1");

        assert!(matches!(
            issuer.issue(&identity, TokenKind::Access).await.unwrap(),
            IssuedToken::Access(_)
        ));
        assert!(matches!(
            issuer.issue(&identity, TokenKind::Refresh).await.unwrap(),
            IssuedToken::Refresh(_)
        ));
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_pair_lifetimes() {
        let (issuer, _, _) = issuer_with(TokenConfig::default());
        let pair = issuer.issue_pair(&Identity::new("u1")).await.unwrap();
        assert_eq!(pair.token_type, "Bearer");
        assert_eq!(pair.expires_in, 900);
        assert_eq!(pair.refresh_expires_in, 14 * 24 * 3600);
    }

    #[tokio::test]
    async fn test_successor_capped_by_chain_lifetime() {
        let (issuer, clock, _) = issuer_with(TokenConfig {
            refresh_token_lifetime: std::time::Duration::from_secs(3600),
            max_chain_lifetime: Some(std::time::Duration::from_secs(5400)),
            ..TokenConfig::default()
        });
        let first = issuer.issue_refresh(&Identity::new("u1")).await.unwrap();

        clock.advance(Duration::minutes(60));
        let second = issuer.issue_successor(&first.record, Uuid::new_v4()).await.unwrap();
        assert_eq!(second.record.family_id, first.record.family_id);
        assert_eq!(
            second.record.expires_at,
            first.record.family_started_at + Duration::minutes(90)
        );

        clock.advance(Duration::minutes(31));
        let err = issuer
            .issue_successor(&second.record, Uuid::new_v4())
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::InvalidToken));
    }
}
