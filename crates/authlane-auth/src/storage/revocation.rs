//! Revocation entry storage trait.

use async_trait::async_trait;
use time::OffsetDateTime;

use crate::AuthResult;
use crate::types::{RevocationEntry, RevocationTarget};

/// Storage trait for revocation entries.
///
/// Lookups sit on the hot path of every access token verification, so
/// implementations should be a single hash-keyed read.
#[async_trait]
pub trait RevocationStore: Send + Sync {
    /// Records a revocation.
    ///
    /// An existing entry for the same target is merged, keeping the later
    /// `revoked_at` and the later `expires_at`.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage operation fails.
    async fn insert(&self, entry: RevocationEntry) -> AuthResult<()>;

    /// Looks up the entry for a target.
    ///
    /// Expired entries may still be returned; callers check expiry.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage operation fails.
    async fn get(&self, target: &RevocationTarget) -> AuthResult<Option<RevocationEntry>>;

    /// Removes the entry for a target if it expired before `now`.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage operation fails.
    async fn remove_expired(&self, target: &RevocationTarget, now: OffsetDateTime)
    -> AuthResult<bool>;

    /// Deletes every entry that expired before `now`.
    ///
    /// # Returns
    ///
    /// Returns the number of entries deleted.
    ///
    /// # Errors
    ///
    /// Returns an error if the cleanup operation fails.
    async fn prune(&self, now: OffsetDateTime) -> AuthResult<u64>;
}
