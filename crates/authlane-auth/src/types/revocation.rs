//! Revocation registry entries.

use std::fmt;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

/// What a revocation entry applies to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum RevocationTarget {
    /// A single access token, by `jti`.
    Token(String),
    /// Every access token of a subject issued at or before `revoked_at`.
    Subject(String),
}

impl fmt::Display for RevocationTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Token(jti) => write!(f, "token:{jti}"),
            Self::Subject(subject) => write!(f, "subject:{subject}"),
        }
    }
}

/// A revocation that stays in force until the revoked tokens would have
/// expired anyway.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RevocationEntry {
    /// What is revoked.
    pub target: RevocationTarget,

    /// When the revocation was recorded.
    #[serde(with = "time::serde::rfc3339")]
    pub revoked_at: OffsetDateTime,

    /// When the entry can be pruned.
    #[serde(with = "time::serde::rfc3339")]
    pub expires_at: OffsetDateTime,
}

impl RevocationEntry {
    /// Returns `true` once the entry no longer needs to be kept.
    #[must_use]
    pub fn is_expired_at(&self, now: OffsetDateTime) -> bool {
        now >= self.expires_at
    }

    /// Combines two entries for the same target, keeping the later cutoff
    /// and the later expiry.
    #[must_use]
    pub fn merge(self, other: RevocationEntry) -> RevocationEntry {
        RevocationEntry {
            target: self.target,
            revoked_at: self.revoked_at.max(other.revoked_at),
            expires_at: self.expires_at.max(other.expires_at),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::Duration;

    #[test]
    fn test_merge_keeps_latest() {
        let t0 = time::macros::datetime!(2024-05-01 12:00 UTC);
        let a = RevocationEntry {
            target: RevocationTarget::Subject("u".into()),
            revoked_at: t0,
            expires_at: t0 + Duration::minutes(20),
        };
        let b = RevocationEntry {
            target: RevocationTarget::Subject("u".into()),
            revoked_at: t0 + Duration::minutes(5),
            expires_at: t0 + Duration::minutes(10),
        };
        let merged = a.merge(b);
        assert_eq!(merged.revoked_at, t0 + Duration::minutes(5));
        assert_eq!(merged.expires_at, t0 + Duration::minutes(20));
    }

    #[test]
    fn test_target_display() {
        assert_eq!(RevocationTarget::Token("abc".into()).to_string(), "token:abc");
        assert_eq!(RevocationTarget::Subject("u1".into()).to_string(), "subject:u1");
    }
}
