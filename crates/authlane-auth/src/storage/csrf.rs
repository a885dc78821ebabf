//! Anti-forgery token storage trait.

use async_trait::async_trait;
use time::OffsetDateTime;

use crate::AuthResult;

/// A stored CSRF token digest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CsrfRecord {
    /// SHA-256 hash of the token value.
    pub token_hash: String,

    /// When the token was issued.
    pub created_at: OffsetDateTime,
}

/// Storage trait for CSRF tokens, keyed by session id hash.
#[async_trait]
pub trait CsrfStore: Send + Sync {
    /// Appends a token to the session's window, evicting the oldest tokens
    /// beyond `max_tokens`.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage operation fails.
    async fn push(&self, session_key: &str, record: CsrfRecord, max_tokens: usize)
    -> AuthResult<()>;

    /// Returns the session's live window, oldest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage operation fails.
    async fn list(&self, session_key: &str) -> AuthResult<Vec<CsrfRecord>>;

    /// Drops every token of a session.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage operation fails.
    async fn remove_session(&self, session_key: &str) -> AuthResult<()>;

    /// Drops tokens created before `cutoff`.
    ///
    /// # Returns
    ///
    /// Returns the number of tokens deleted.
    ///
    /// # Errors
    ///
    /// Returns an error if the cleanup operation fails.
    async fn prune(&self, cutoff: OffsetDateTime) -> AuthResult<u64>;
}
