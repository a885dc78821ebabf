//! Server-side session storage trait.

use async_trait::async_trait;
use time::OffsetDateTime;

use crate::AuthResult;
use crate::types::Session;

/// Storage trait for server-side sessions, keyed by session id hash.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Stores a new session.
    ///
    /// # Errors
    ///
    /// Returns an error if the id hash already exists or the storage
    /// operation fails.
    async fn insert(&self, session: Session) -> AuthResult<()>;

    /// Finds a session by id hash.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage operation fails.
    async fn get(&self, id_hash: &str) -> AuthResult<Option<Session>>;

    /// Sets `last_activity` to `at` if the session still exists.
    ///
    /// # Returns
    ///
    /// Returns the updated session, or `None` if it no longer exists.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage operation fails.
    async fn touch(&self, id_hash: &str, at: OffsetDateTime) -> AuthResult<Option<Session>>;

    /// Removes a session.
    ///
    /// # Returns
    ///
    /// Returns the removed session, if it existed.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage operation fails.
    async fn remove(&self, id_hash: &str) -> AuthResult<Option<Session>>;

    /// Removes every session of a subject.
    ///
    /// # Returns
    ///
    /// Returns the id hashes of the removed sessions.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage operation fails.
    async fn remove_by_subject(&self, subject: &str) -> AuthResult<Vec<String>>;

    /// Removes sessions idle since before `idle_cutoff` or created before
    /// `absolute_cutoff`.
    ///
    /// # Returns
    ///
    /// Returns the id hashes of the removed sessions.
    ///
    /// # Errors
    ///
    /// Returns an error if the cleanup operation fails.
    async fn prune(
        &self,
        idle_cutoff: OffsetDateTime,
        absolute_cutoff: OffsetDateTime,
    ) -> AuthResult<Vec<String>>;
}
