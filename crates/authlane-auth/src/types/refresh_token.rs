//! Refresh token domain type.
//!
//! # Security
//!
//! - Refresh tokens are stored as SHA-256 hashes, never plaintext
//! - Every token belongs to a family (rotation chain) with at most one
//!   active member
//! - A token is redeemed at most once; a second presentation is a theft signal

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::types::Identity;

/// Lifecycle status of a refresh token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RefreshTokenStatus {
    /// Redeemable.
    Active,
    /// Redeemed once; any further presentation is reuse.
    Used,
    /// Revoked by logout or chain revocation.
    Revoked,
}

/// Refresh token record as persisted by a [`RefreshTokenStore`].
///
/// [`RefreshTokenStore`]: crate::storage::RefreshTokenStore
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshTokenRecord {
    /// Unique identifier of this token.
    pub id: Uuid,

    /// SHA-256 hash of the token value handed to the client.
    pub token_hash: String,

    /// Rotation chain this token belongs to.
    pub family_id: Uuid,

    /// When the chain was started by a login.
    #[serde(with = "time::serde::rfc3339")]
    pub family_started_at: OffsetDateTime,

    /// Identity the token was issued to.
    pub identity: Identity,

    /// When this token was issued.
    #[serde(with = "time::serde::rfc3339")]
    pub issued_at: OffsetDateTime,

    /// When this token expires.
    #[serde(with = "time::serde::rfc3339")]
    pub expires_at: OffsetDateTime,

    /// Current status.
    pub status: RefreshTokenStatus,

    /// Successor minted when this token was redeemed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replaced_by: Option<Uuid>,
}

impl RefreshTokenRecord {
    /// Returns the subject of the token's identity.
    #[must_use]
    pub fn subject(&self) -> &str {
        &self.identity.subject
    }

    /// Returns `true` if the token has expired at `now`.
    #[must_use]
    pub fn is_expired_at(&self, now: OffsetDateTime) -> bool {
        now >= self.expires_at
    }

    /// Returns `true` if the token can be redeemed at `now`.
    #[must_use]
    pub fn is_redeemable_at(&self, now: OffsetDateTime) -> bool {
        self.status == RefreshTokenStatus::Active && !self.is_expired_at(now)
    }
}
