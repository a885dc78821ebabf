//! Server-side session record.

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::types::{FingerprintDigest, Identity};

/// Authenticated session state held by a [`SessionStore`].
///
/// The store is keyed by `id_hash`, the SHA-256 digest of the opaque
/// session identifier held by the client. The identifier itself is
/// never persisted.
///
/// [`SessionStore`]: crate::storage::SessionStore
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    /// SHA-256 hash of the session identifier.
    pub id_hash: String,

    /// Authenticated identity.
    pub identity: Identity,

    /// When the session was created.
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,

    /// Last time the session was used.
    #[serde(with = "time::serde::rfc3339")]
    pub last_activity: OffsetDateTime,

    /// Client fingerprint recorded at creation.
    #[serde(default)]
    pub fingerprint: FingerprintDigest,
}

impl Session {
    /// Returns the session's subject.
    #[must_use]
    pub fn subject(&self) -> &str {
        &self.identity.subject
    }

    /// Returns why the session is no longer usable at `now`, if it isn't.
    #[must_use]
    pub fn expiry_reason(
        &self,
        now: OffsetDateTime,
        idle_timeout: time::Duration,
        absolute_timeout: time::Duration,
    ) -> Option<&'static str> {
        if now - self.created_at > absolute_timeout {
            Some("absolute timeout")
        } else if now - self.last_activity > idle_timeout {
            Some("idle timeout")
        } else {
            None
        }
    }
}
