//! Pending OAuth flow storage trait.

use async_trait::async_trait;
use time::OffsetDateTime;

use crate::AuthResult;
use crate::types::OAuthFlowState;

/// Storage trait for OAuth flow state, keyed by `state` hash.
#[async_trait]
pub trait OAuthStateStore: Send + Sync {
    /// Stores a pending flow.
    ///
    /// # Errors
    ///
    /// Returns an error if the state hash already exists or the storage
    /// operation fails.
    async fn insert(&self, state: OAuthFlowState) -> AuthResult<()>;

    /// Removes and returns a pending flow.
    ///
    /// # Atomicity
    ///
    /// Lookup and removal are one operation: of concurrent callers with the
    /// same hash, at most one receives the state.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage operation fails.
    async fn take(&self, state_hash: &str) -> AuthResult<Option<OAuthFlowState>>;

    /// Drops flows created before `cutoff`.
    ///
    /// # Returns
    ///
    /// Returns the number of flows deleted.
    ///
    /// # Errors
    ///
    /// Returns an error if the cleanup operation fails.
    async fn prune(&self, cutoff: OffsetDateTime) -> AuthResult<u64>;
}
