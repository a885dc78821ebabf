//! Server-side sessions.
//!
//! The client holds an opaque 256-bit session id; the store only sees its
//! SHA-256 hash. Expiry (idle and absolute) and fingerprint binding are
//! enforced on every read, so no background sweep is needed for
//! correctness. Records found expired or mismatched are destroyed on the
//! spot.

use std::fmt;
use std::sync::Arc;

use time::Duration;
use tracing::{debug, info, warn};

use crate::clock::{SharedClock, to_time_duration};
use crate::config::SessionConfig;
use crate::crypto::{generate_token, hash_token};
use crate::csrf::CsrfGuard;
use crate::storage::SessionStore;
use crate::types::{ClientFingerprint, Identity, Session};
use crate::{AuthError, AuthResult};

/// A freshly created session and the id to hand to the client.
#[derive(Clone)]
pub struct NewSession {
    /// Plaintext session id. Only the client keeps it.
    pub id: String,
    /// The stored record.
    pub session: Session,
}

impl fmt::Debug for NewSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NewSession")
            .field("session", &self.session)
            .finish_non_exhaustive()
    }
}

/// Creates, validates and destroys sessions.
pub struct SessionManager {
    store: Arc<dyn SessionStore>,
    clock: SharedClock,
    csrf: Option<Arc<CsrfGuard>>,
    idle_timeout: Duration,
    absolute_timeout: Duration,
    bind_ip: bool,
    bind_user_agent: bool,
}

impl SessionManager {
    /// Creates a manager.
    #[must_use]
    pub fn new(store: Arc<dyn SessionStore>, clock: SharedClock, config: &SessionConfig) -> Self {
        Self {
            store,
            clock,
            csrf: None,
            idle_timeout: to_time_duration(config.idle_timeout),
            absolute_timeout: to_time_duration(config.absolute_timeout),
            bind_ip: config.bind_ip,
            bind_user_agent: config.bind_user_agent,
        }
    }

    /// Forgets a session's CSRF tokens whenever the session is destroyed.
    #[must_use]
    pub fn with_csrf(mut self, csrf: Arc<CsrfGuard>) -> Self {
        self.csrf = Some(csrf);
        self
    }

    /// Creates a session for `identity`.
    ///
    /// A fresh id is always generated. If the client presented an id, that
    /// session is destroyed and the id is never reused.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage operation fails.
    pub async fn create(
        &self,
        identity: Identity,
        fingerprint: &ClientFingerprint,
        presented_id: Option<&str>,
    ) -> AuthResult<NewSession> {
        if let Some(presented) = presented_id {
            let presented_hash = hash_token(presented);
            if self.store.remove(&presented_hash).await?.is_some() {
                info!("Replacing existing session at login");
            } else {
                warn!("Ignoring unknown client-supplied session id at login");
            }
            self.forget_csrf(&presented_hash).await?;
        }

        let now = self.clock.now();
        let id = generate_token();
        let session = Session {
            id_hash: hash_token(&id),
            identity,
            created_at: now,
            last_activity: now,
            fingerprint: fingerprint.digest(self.bind_ip, self.bind_user_agent),
        };

        self.store.insert(session.clone()).await?;
        info!(subject = %session.subject(), "Session created");

        Ok(NewSession { id, session })
    }

    /// Returns the live session for `id`.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::SessionNotFound` if the session does not exist,
    /// has expired, or was created for a different client.
    pub async fn get(&self, id: &str, fingerprint: &ClientFingerprint) -> AuthResult<Session> {
        let id_hash = hash_token(id);
        let Some(session) = self.store.get(&id_hash).await? else {
            debug!("Session not found");
            return Err(AuthError::SessionNotFound);
        };

        let now = self.clock.now();
        if let Some(reason) = session.expiry_reason(now, self.idle_timeout, self.absolute_timeout) {
            info!(subject = %session.subject(), reason, "Session expired");
            self.destroy_hashed(&id_hash).await?;
            return Err(AuthError::SessionNotFound);
        }

        let presented = fingerprint.digest(self.bind_ip, self.bind_user_agent);
        if !session.fingerprint.matches(&presented) {
            warn!(subject = %session.subject(), "Session fingerprint mismatch");
            self.destroy_hashed(&id_hash).await?;
            return Err(AuthError::SessionNotFound);
        }

        Ok(session)
    }

    /// Validates the session and records activity, sliding the idle expiry.
    ///
    /// # Errors
    ///
    /// Same as [`get`](Self::get).
    pub async fn touch(&self, id: &str, fingerprint: &ClientFingerprint) -> AuthResult<Session> {
        let session = self.get(id, fingerprint).await?;
        self.store
            .touch(&session.id_hash, self.clock.now())
            .await?
            .ok_or(AuthError::SessionNotFound)
    }

    /// Destroys a session. Unknown ids are ignored.
    ///
    /// # Returns
    ///
    /// Returns `true` if a session was removed.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage operation fails.
    pub async fn destroy(&self, id: &str) -> AuthResult<bool> {
        self.destroy_hashed(&hash_token(id)).await
    }

    async fn destroy_hashed(&self, id_hash: &str) -> AuthResult<bool> {
        let removed = self.store.remove(id_hash).await?;
        self.forget_csrf(id_hash).await?;
        if let Some(session) = &removed {
            debug!(subject = %session.subject(), "Session destroyed");
        }
        Ok(removed.is_some())
    }

    /// Destroys every session of `subject`.
    ///
    /// # Returns
    ///
    /// Returns the number of sessions removed.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage operation fails.
    pub async fn destroy_subject(&self, subject: &str) -> AuthResult<usize> {
        let removed = self.store.remove_by_subject(subject).await?;
        for id_hash in &removed {
            self.forget_csrf(id_hash).await?;
        }
        if !removed.is_empty() {
            info!(subject = %subject, count = removed.len(), "Sessions destroyed");
        }
        Ok(removed.len())
    }

    /// Removes every expired session.
    ///
    /// # Returns
    ///
    /// Returns the number of sessions removed.
    ///
    /// # Errors
    ///
    /// Returns an error if the cleanup operation fails.
    pub async fn prune(&self) -> AuthResult<u64> {
        let now = self.clock.now();
        let removed = self
            .store
            .prune(now - self.idle_timeout, now - self.absolute_timeout)
            .await?;
        for id_hash in &removed {
            self.forget_csrf(id_hash).await?;
        }
        Ok(removed.len() as u64)
    }

    async fn forget_csrf(&self, id_hash: &str) -> AuthResult<()> {
        match &self.csrf {
            Some(csrf) => csrf.forget_hashed(id_hash).await,
            None => Ok(()),
        }
    }
}

impl fmt::Debug for SessionManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionManager")
            .field("idle_timeout", &self.idle_timeout)
            .field("absolute_timeout", &self.absolute_timeout)
            .field("bind_ip", &self.bind_ip)
            .field("bind_user_agent", &self.bind_user_agent)
            .finish_non_exhaustive()
    }
}
