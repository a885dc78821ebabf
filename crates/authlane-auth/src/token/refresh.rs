//! Refresh token rotation with reuse detection.
//!
//! Each refresh token is single use. Redeeming it mints a successor in the
//! same family (rotation chain). Presenting a token that was already
//! redeemed means two parties hold it, so the whole subject is cut off:
//! every refresh token of the subject is revoked, its outstanding access
//! tokens are revoked through the registry, and its sessions are destroyed.
//!
//! ```text
//! Active ──redeem──► Used(successor) ──presented again──► ReuseDetected
//!    │                                                        │
//!    └──logout / chain revocation──► Revoked ◄────────────────┘
//! ```

use std::fmt;
use std::sync::Arc;

use time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::clock::{SharedClock, to_time_duration};
use crate::crypto::hash_token;
use crate::revocation::RevocationRegistry;
use crate::session::SessionManager;
use crate::storage::{Redemption, RefreshTokenStore};
use crate::token::issuer::{TokenIssuer, TokenPair};
use crate::{AuthError, AuthResult};

/// Redeems refresh tokens and reacts to reuse.
pub struct RefreshRotator {
    store: Arc<dyn RefreshTokenStore>,
    issuer: Arc<TokenIssuer>,
    revocations: RevocationRegistry,
    sessions: Option<Arc<SessionManager>>,
    clock: SharedClock,
    clock_skew: Duration,
}

impl RefreshRotator {
    /// Creates a rotator.
    ///
    /// `clock_skew` extends subject revocations so that access tokens still
    /// inside the verifier's leeway are covered.
    #[must_use]
    pub fn new(
        store: Arc<dyn RefreshTokenStore>,
        issuer: Arc<TokenIssuer>,
        revocations: RevocationRegistry,
        clock: SharedClock,
        clock_skew: std::time::Duration,
    ) -> Self {
        Self {
            store,
            issuer,
            revocations,
            sessions: None,
            clock,
            clock_skew: to_time_duration(clock_skew),
        }
    }

    /// Destroys the subject's sessions when reuse is detected.
    #[must_use]
    pub fn with_sessions(mut self, sessions: Arc<SessionManager>) -> Self {
        self.sessions = Some(sessions);
        self
    }

    /// Redeems `value` and returns a fresh token pair in the same family.
    ///
    /// The presented token is dead once this returns, whatever the outcome.
    ///
    /// # Errors
    ///
    /// - `AuthError::ReuseDetected` if the token was already redeemed (the
    ///   subject's chain has been revoked) or is unknown
    /// - `AuthError::InvalidToken` if the token is revoked, expired, or its
    ///   family outlived the maximum chain lifetime
    /// - `AuthError::Storage` if a store operation fails
    pub async fn rotate(&self, value: &str) -> AuthResult<TokenPair> {
        let successor = Uuid::new_v4();
        let now = self.clock.now();

        match self.store.redeem(&hash_token(value), successor, now).await? {
            Redemption::Redeemed(record) => {
                let pair = self.issuer.issue_successor_pair(&record, successor).await?;
                info!(
                    subject = %record.subject(),
                    family_id = %record.family_id,
                    token_id = %record.id,
                    successor = %successor,
                    "Refresh token rotated"
                );
                Ok(pair)
            }
            Redemption::AlreadyUsed(record) => {
                warn!(
                    subject = %record.subject(),
                    family_id = %record.family_id,
                    token_id = %record.id,
                    "Refresh token reuse detected, revoking subject chain"
                );
                self.revoke_chain(record.subject(), Some(record.family_id))
                    .await?;
                Err(AuthError::ReuseDetected)
            }
            Redemption::NotFound => {
                warn!("Unknown refresh token presented");
                Err(AuthError::ReuseDetected)
            }
            Redemption::Revoked(record) => {
                debug!(
                    subject = %record.subject(),
                    family_id = %record.family_id,
                    reason = "revoked",
                    "Refresh token rejected"
                );
                Err(AuthError::InvalidToken)
            }
            Redemption::Expired(record) => {
                debug!(
                    subject = %record.subject(),
                    family_id = %record.family_id,
                    reason = "expired",
                    "Refresh token rejected"
                );
                Err(AuthError::InvalidToken)
            }
        }
    }

    /// Revokes everything issued to `subject`: refresh tokens (tombstoning
    /// `family_id` when given), access tokens issued up to now, and sessions.
    ///
    /// # Errors
    ///
    /// Returns an error if a store operation fails.
    pub async fn revoke_chain(&self, subject: &str, family_id: Option<Uuid>) -> AuthResult<()> {
        let now = self.clock.now();
        let refresh_until = now + self.issuer.refresh_ttl();

        let mut refresh_revoked = 0;
        if let Some(family_id) = family_id {
            refresh_revoked += self.store.revoke_family(family_id, refresh_until).await?;
        }
        refresh_revoked += self.store.revoke_subject(subject, refresh_until).await?;

        self.revocations
            .revoke_subject(subject, now + self.issuer.access_ttl() + self.clock_skew)
            .await?;

        let sessions_destroyed = match &self.sessions {
            Some(sessions) => sessions.destroy_subject(subject).await?,
            None => 0,
        };

        info!(
            subject = %subject,
            refresh_revoked,
            sessions_destroyed,
            "Subject chain revoked"
        );
        Ok(())
    }

    /// Revokes the family of the refresh token `value`, if it exists.
    ///
    /// # Returns
    ///
    /// Returns `true` if the token was known.
    ///
    /// # Errors
    ///
    /// Returns an error if a store operation fails.
    pub async fn revoke_family_by_value(&self, value: &str) -> AuthResult<bool> {
        let Some(record) = self.store.find_by_hash(&hash_token(value)).await? else {
            return Ok(false);
        };

        let until = self.clock.now() + self.issuer.refresh_ttl();
        let revoked = self.store.revoke_family(record.family_id, until).await?;
        debug!(
            subject = %record.subject(),
            family_id = %record.family_id,
            revoked,
            "Refresh family revoked"
        );
        Ok(true)
    }

    /// Deletes expired refresh tokens and family tombstones.
    ///
    /// # Errors
    ///
    /// Returns an error if the cleanup operation fails.
    pub async fn prune(&self) -> AuthResult<u64> {
        self.store.prune(self.clock.now()).await
    }
}

impl fmt::Debug for RefreshRotator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RefreshRotator")
            .field("issuer", &self.issuer)
            .field("destroys_sessions", &self.sessions.is_some())
            .field("clock_skew", &self.clock_skew)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{Clock, ManualClock};
    use crate::config::{SessionConfig, TokenConfig};
    use crate::storage::{InMemoryRefreshTokenStore, InMemoryRevocationStore, InMemorySessionStore};
    use crate::token::jwt::{JwtService, SigningKeyPair};
    use crate::types::{ClientFingerprint, Identity, RefreshTokenStatus};

    struct Fixture {
        rotator: RefreshRotator,
        issuer: Arc<TokenIssuer>,
        store: Arc<InMemoryRefreshTokenStore>,
        registry: RevocationRegistry,
        sessions: Arc<SessionManager>,
        clock: Arc<ManualClock>,
    }

    fn fixture() -> Fixture {
        let clock = Arc::new(ManualClock::starting_now());
        let jwt = Arc::new(JwtService::new(
            SigningKeyPair::from_secret("k1", b"0123456789abcdef0123456789abcdef").unwrap(),
            "https://auth.test",
            "https://api.test",
        ));
        let store = Arc::new(InMemoryRefreshTokenStore::new());
        let config = TokenConfig::default();
        let issuer = Arc::new(TokenIssuer::new(jwt, store.clone(), clock.clone(), &config));
        let registry =
            RevocationRegistry::new(Arc::new(InMemoryRevocationStore::new()), clock.clone());
        let sessions = Arc::new(SessionManager::new(
            Arc::new(InMemorySessionStore::new()),
            clock.clone(),
            &SessionConfig::default(),
        ));
        let rotator = RefreshRotator::new(
            store.clone(),
            issuer.clone(),
            registry.clone(),
            clock.clone(),
            config.clock_skew,
        )
        .with_sessions(sessions.clone());

        Fixture {
            rotator,
            issuer,
            store,
            registry,
            sessions,
            clock,
        }
    }

    async fn status_of(store: &InMemoryRefreshTokenStore, value: &str) -> RefreshTokenStatus {
        store
            .find_by_hash(&hash_token(value))
            .await
            .unwrap()
            .unwrap()
            .status
    }

    #[tokio::test]
    async fn test_rotation_keeps_family() {
        let f = fixture();
        let first = f.issuer.issue_refresh(&Identity::new("u1")).await.unwrap();

        let pair = f.rotator.rotate(&first.value).await.unwrap();
        assert_ne!(pair.refresh_token, first.value);

        let old = f
            .store
            .find_by_hash(&hash_token(&first.value))
            .await
            .unwrap()
            .unwrap();
        let new = f
            .store
            .find_by_hash(&hash_token(&pair.refresh_token))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(old.status, RefreshTokenStatus::Used);
        assert_eq!(old.replaced_by, Some(new.id));
        assert_eq!(new.family_id, old.family_id);
        assert_eq!(new.status, RefreshTokenStatus::Active);
    }

    #[tokio::test]
    async fn test_reuse_revokes_subject() {
        let f = fixture();
        let identity = Identity::new("u1");
        let first = f.issuer.issue_refresh(&identity).await.unwrap();
        let other_family = f.issuer.issue_refresh(&identity).await.unwrap();
        let session = f
            .sessions
            .create(identity.clone(), &ClientFingerprint::default(), None)
            .await
            .unwrap();

        let pair = f.rotator.rotate(&first.value).await.unwrap();
        let err = f.rotator.rotate(&first.value).await.unwrap_err();
        assert!(matches!(err, AuthError::ReuseDetected));

        assert_eq!(status_of(&f.store, &pair.refresh_token).await, RefreshTokenStatus::Revoked);
        assert_eq!(status_of(&f.store, &other_family.value).await, RefreshTokenStatus::Revoked);
        assert_eq!(status_of(&f.store, &first.value).await, RefreshTokenStatus::Used);
        assert!(
            f.registry
                .is_revoked("any", "u1", f.clock.now())
                .await
                .unwrap()
        );
        assert!(matches!(
            f.sessions
                .get(&session.id, &ClientFingerprint::default())
                .await
                .unwrap_err(),
            AuthError::SessionNotFound
        ));

        // The successor is dead too.
        let err = f.rotator.rotate(&pair.refresh_token).await.unwrap_err();
        assert!(matches!(err, AuthError::InvalidToken));
    }

    #[tokio::test]
    async fn test_unknown_token_is_reuse() {
        let f = fixture();
        let err = f.rotator.rotate("never-issued").await.unwrap_err();
        assert!(matches!(err, AuthError::ReuseDetected));
    }

    #[tokio::test]
    async fn test_expired_token_is_invalid() {
        let f = fixture();
        let first = f.issuer.issue_refresh(&Identity::new("u1")).await.unwrap();
        f.clock.advance(Duration::days(15));

        let err = f.rotator.rotate(&first.value).await.unwrap_err();
        assert!(matches!(err, AuthError::InvalidToken));
        assert_eq!(status_of(&f.store, &first.value).await, RefreshTokenStatus::Active);
        assert_eq!(f.rotator.prune().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_revoke_family_by_value() {
        let f = fixture();
        let first = f.issuer.issue_refresh(&Identity::new("u1")).await.unwrap();
        let pair = f.rotator.rotate(&first.value).await.unwrap();

        assert!(f.rotator.revoke_family_by_value(&first.value).await.unwrap());
        assert!(!f.rotator.revoke_family_by_value("unknown").await.unwrap());

        let err = f.rotator.rotate(&pair.refresh_token).await.unwrap_err();
        assert!(matches!(err, AuthError::InvalidToken));
    }
}
