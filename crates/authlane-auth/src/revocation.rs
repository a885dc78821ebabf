//! Revocation registry.
//!
//! Access tokens are stateless, so revoking one before it expires means
//! remembering its `jti` (or its subject) until the token would have expired
//! on its own. Entries never outlive that point: `until` is always the latest
//! expiry of anything the entry revokes.
//!
//! Subject entries revoke every token of the subject issued at or before the
//! revocation, compared at the one-second granularity of the `iat` claim.

use std::sync::Arc;

use time::OffsetDateTime;
use tracing::{debug, info};

use crate::AuthResult;
use crate::clock::SharedClock;
use crate::storage::RevocationStore;
use crate::types::{RevocationEntry, RevocationTarget};

/// Tracks revoked access tokens and subjects.
#[derive(Clone)]
pub struct RevocationRegistry {
    store: Arc<dyn RevocationStore>,
    clock: SharedClock,
}

impl RevocationRegistry {
    /// Creates a registry over `store`.
    #[must_use]
    pub fn new(store: Arc<dyn RevocationStore>, clock: SharedClock) -> Self {
        Self { store, clock }
    }

    /// Revokes a token or subject until `until`.
    ///
    /// A revocation whose `until` has already passed is a no-op.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage operation fails.
    pub async fn revoke(&self, target: RevocationTarget, until: OffsetDateTime) -> AuthResult<()> {
        let now = self.clock.now();
        if until <= now {
            debug!(revocation = %target, "Skipping revocation of already expired tokens");
            return Ok(());
        }

        info!(revocation = %target, until = %until, "Revoking");
        self.store
            .insert(RevocationEntry {
                target,
                revoked_at: now,
                expires_at: until,
            })
            .await
    }

    /// Revokes a single access token by `jti`.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage operation fails.
    pub async fn revoke_token(&self, jti: &str, until: OffsetDateTime) -> AuthResult<()> {
        self.revoke(RevocationTarget::Token(jti.to_string()), until)
            .await
    }

    /// Revokes every access token of `subject` issued up to now.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage operation fails.
    pub async fn revoke_subject(&self, subject: &str, until: OffsetDateTime) -> AuthResult<()> {
        self.revoke(RevocationTarget::Subject(subject.to_string()), until)
            .await
    }

    /// Returns `true` if the token `jti` of `subject`, issued at `issued_at`,
    /// is revoked.
    ///
    /// Expired entries are ignored and removed.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage operation fails.
    pub async fn is_revoked(
        &self,
        jti: &str,
        subject: &str,
        issued_at: OffsetDateTime,
    ) -> AuthResult<bool> {
        let now = self.clock.now();

        if self
            .live_entry(&RevocationTarget::Token(jti.to_string()), now)
            .await?
            .is_some()
        {
            return Ok(true);
        }

        let subject_entry = self
            .live_entry(&RevocationTarget::Subject(subject.to_string()), now)
            .await?;
        Ok(subject_entry
            .is_some_and(|entry| issued_at.unix_timestamp() <= entry.revoked_at.unix_timestamp()))
    }

    async fn live_entry(
        &self,
        target: &RevocationTarget,
        now: OffsetDateTime,
    ) -> AuthResult<Option<RevocationEntry>> {
        match self.store.get(target).await? {
            Some(entry) if entry.is_expired_at(now) => {
                self.store.remove_expired(target, now).await?;
                Ok(None)
            }
            other => Ok(other),
        }
    }

    /// Removes every expired entry.
    ///
    /// # Returns
    ///
    /// Returns the number of entries removed.
    ///
    /// # Errors
    ///
    /// Returns an error if the cleanup operation fails.
    pub async fn prune(&self) -> AuthResult<u64> {
        self.store.prune(self.clock.now()).await
    }
}

impl std::fmt::Debug for RevocationRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RevocationRegistry")
            .field("clock", &self.clock)
            .finish_non_exhaustive()
    }
}
