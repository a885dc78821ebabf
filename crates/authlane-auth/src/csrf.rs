//! Anti-forgery tokens for cookie-authenticated requests.
//!
//! Tokens are bound to one session: the store is keyed by the session id
//! hash, so a token issued for session A is simply absent from session B's
//! window. Each session keeps a small window of live tokens (several tabs may
//! hold different ones); the oldest is evicted when the window is full.
//!
//! CSRF checks are independent of authentication. A valid session does not
//! excuse a missing token on a state-changing request.

use std::fmt;
use std::sync::Arc;

use time::{Duration, OffsetDateTime};
use tracing::{debug, warn};

use crate::clock::{SharedClock, to_time_duration};
use crate::config::CsrfConfig;
use crate::crypto::{constant_time_eq, generate_token, hash_token};
use crate::storage::{CsrfRecord, CsrfStore};
use crate::{AuthError, AuthResult};

/// Methods that never change state and are not checked.
pub const SAFE_METHODS: &[&str] = &["GET", "HEAD", "OPTIONS", "TRACE"];

/// Returns `true` for methods exempt from CSRF checks.
#[must_use]
pub fn is_safe_method(method: &str) -> bool {
    SAFE_METHODS
        .iter()
        .any(|safe| safe.eq_ignore_ascii_case(method))
}

/// A freshly issued CSRF token.
#[derive(Clone)]
pub struct CsrfToken {
    /// Token value for the client to echo back in a header.
    pub value: String,
    /// When the token was issued.
    pub created_at: OffsetDateTime,
}

impl fmt::Debug for CsrfToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CsrfToken")
            .field("created_at", &self.created_at)
            .finish_non_exhaustive()
    }
}

/// Issues and checks per-session CSRF tokens.
pub struct CsrfGuard {
    store: Arc<dyn CsrfStore>,
    clock: SharedClock,
    max_tokens: usize,
    ttl: Duration,
}

impl CsrfGuard {
    /// Creates a guard.
    #[must_use]
    pub fn new(store: Arc<dyn CsrfStore>, clock: SharedClock, config: &CsrfConfig) -> Self {
        Self {
            store,
            clock,
            max_tokens: config.max_tokens_per_session.max(1),
            ttl: to_time_duration(config.token_ttl),
        }
    }

    /// Issues a token for `session_id`.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage operation fails.
    pub async fn issue(&self, session_id: &str) -> AuthResult<CsrfToken> {
        let value = generate_token();
        let created_at = self.clock.now();

        self.store
            .push(
                &hash_token(session_id),
                CsrfRecord {
                    token_hash: hash_token(&value),
                    created_at,
                },
                self.max_tokens,
            )
            .await?;

        debug!("CSRF token issued");
        Ok(CsrfToken { value, created_at })
    }

    /// Returns `true` if `presented` is a live token issued for `session_id`.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage operation fails.
    pub async fn verify(&self, session_id: &str, presented: &str) -> AuthResult<bool> {
        if presented.is_empty() {
            return Ok(false);
        }

        let now = self.clock.now();
        let presented_hash = hash_token(presented);
        let window = self.store.list(&hash_token(session_id)).await?;

        // Every live entry is compared so the scan time does not depend on
        // which slot matched.
        let matched = window.iter().fold(false, |matched, record| {
            let live = record.created_at + self.ttl > now;
            let equal = constant_time_eq(record.token_hash.as_bytes(), presented_hash.as_bytes());
            matched | (live & equal)
        });

        Ok(matched)
    }

    /// Rejects state-changing requests that lack a valid token.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::CsrfMismatch` if `method` is not safe and
    /// `presented` does not verify for `session_id`.
    pub async fn protect(
        &self,
        method: &str,
        session_id: &str,
        presented: Option<&str>,
    ) -> AuthResult<()> {
        if is_safe_method(method) {
            return Ok(());
        }

        let verified = match presented {
            Some(token) => self.verify(session_id, token).await?,
            None => false,
        };

        if verified {
            Ok(())
        } else {
            warn!(
                method = %method,
                token_present = presented.is_some(),
                "CSRF check failed"
            );
            Err(AuthError::CsrfMismatch)
        }
    }

    /// Drops every token of a session.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage operation fails.
    pub async fn forget(&self, session_id: &str) -> AuthResult<()> {
        self.forget_hashed(&hash_token(session_id)).await
    }

    /// Drops every token of a session given its id hash.
    pub(crate) async fn forget_hashed(&self, session_hash: &str) -> AuthResult<()> {
        self.store.remove_session(session_hash).await
    }

    /// Removes expired tokens.
    ///
    /// # Errors
    ///
    /// Returns an error if the cleanup operation fails.
    pub async fn prune(&self) -> AuthResult<u64> {
        self.store.prune(self.clock.now() - self.ttl).await
    }
}

impl fmt::Debug for CsrfGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CsrfGuard")
            .field("max_tokens", &self.max_tokens)
            .field("ttl", &self.ttl)
            .finish_non_exhaustive()
    }
}
