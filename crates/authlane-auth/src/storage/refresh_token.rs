//! Refresh token storage trait.
//!
//! # Security Considerations
//!
//! - Tokens are stored as SHA-256 hashes only
//! - Redemption must be atomic: lookup and marking happen in one step
//! - Revocation must be atomic and immediate
//! - Expired tokens should be cleaned up periodically

use async_trait::async_trait;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::AuthResult;
use crate::types::RefreshTokenRecord;

/// Outcome of an atomic redemption attempt.
#[derive(Debug, Clone)]
pub enum Redemption {
    /// The token was active and is now marked used. Carries the record as
    /// it was before redemption.
    Redeemed(RefreshTokenRecord),
    /// The token had already been redeemed.
    AlreadyUsed(RefreshTokenRecord),
    /// The token was revoked.
    Revoked(RefreshTokenRecord),
    /// The token was active but past its expiry. It is left untouched.
    Expired(RefreshTokenRecord),
    /// No token with this hash exists.
    NotFound,
}

/// Storage trait for refresh tokens.
///
/// Implementations must make [`redeem`](Self::redeem) a compare-and-swap on
/// the token: of any number of concurrent redemptions of the same hash,
/// exactly one may observe [`Redemption::Redeemed`].
#[async_trait]
pub trait RefreshTokenStore: Send + Sync {
    /// Stores a new refresh token.
    ///
    /// If the token's family has been revoked, the token is stored as
    /// revoked.
    ///
    /// # Errors
    ///
    /// Returns an error if the hash already exists or the storage operation
    /// fails.
    async fn insert(&self, record: RefreshTokenRecord) -> AuthResult<()>;

    /// Finds a refresh token by its hash, regardless of status.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage operation fails.
    async fn find_by_hash(&self, token_hash: &str) -> AuthResult<Option<RefreshTokenRecord>>;

    /// Atomically redeems a token.
    ///
    /// An active, unexpired token is marked used and its successor id is
    /// recorded. Every other state is reported without modification.
    ///
    /// # Atomicity
    ///
    /// The status check and the transition to used must happen as a single
    /// operation with respect to concurrent callers on the same hash.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage operation fails.
    async fn redeem(
        &self,
        token_hash: &str,
        successor: Uuid,
        now: OffsetDateTime,
    ) -> AuthResult<Redemption>;

    /// Revokes every active token of a family and tombstones the family so
    /// that later inserts into it are born revoked.
    ///
    /// # Arguments
    ///
    /// * `family_id` - The rotation chain to revoke
    /// * `until` - How long the tombstone must be kept
    ///
    /// # Returns
    ///
    /// Returns the number of tokens revoked.
    ///
    /// # Errors
    ///
    /// Returns an error if the operation fails.
    async fn revoke_family(&self, family_id: Uuid, until: OffsetDateTime) -> AuthResult<u64>;

    /// Revokes every active token issued to a subject, across all families.
    ///
    /// Used tokens keep their status so that a later presentation is still
    /// recognised as reuse. Every family the subject holds is remembered
    /// until `until`, so a successor inserted by a rotation that redeemed
    /// before this call is stored as revoked.
    ///
    /// # Returns
    ///
    /// Returns the number of tokens revoked.
    ///
    /// # Errors
    ///
    /// Returns an error if the operation fails.
    async fn revoke_subject(&self, subject: &str, until: OffsetDateTime) -> AuthResult<u64>;

    /// Deletes tokens and tombstones that expired before `now`.
    ///
    /// # Returns
    ///
    /// Returns the number of tokens deleted.
    ///
    /// # Errors
    ///
    /// Returns an error if the cleanup operation fails.
    async fn prune(&self, now: OffsetDateTime) -> AuthResult<u64>;
}
