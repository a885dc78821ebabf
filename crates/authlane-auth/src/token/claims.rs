//! Access token claims and the custom-claim allow-list.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::types::Identity;

/// Claim names the issuer always sets itself.
pub const RESERVED_CLAIMS: &[&str] = &["iss", "sub", "aud", "exp", "nbf", "iat", "jti", "role", "email"];

/// Access token claims.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AccessTokenClaims {
    /// Issuer.
    pub iss: String,

    /// Subject.
    pub sub: String,

    /// Audience.
    pub aud: String,

    /// Expiration time (Unix timestamp).
    pub exp: i64,

    /// Issued at (Unix timestamp).
    pub iat: i64,

    /// Not before (Unix timestamp).
    pub nbf: i64,

    /// JWT ID, the revocation handle of this token.
    pub jti: String,

    /// Coarse role name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,

    /// Email address.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,

    /// Allow-listed custom claims.
    #[serde(flatten)]
    pub ext: Map<String, Value>,
}

impl AccessTokenClaims {
    /// Rebuilds the identity the token was issued for.
    #[must_use]
    pub fn identity(&self) -> Identity {
        Identity {
            subject: self.sub.clone(),
            role: self.role.clone(),
            email: self.email.clone(),
            attributes: self.ext.clone(),
        }
    }
}

/// Filters identity attributes down to the configured allow-list.
#[derive(Debug, Clone, Default)]
pub struct ClaimsPolicy {
    allowed: HashSet<String>,
}

impl ClaimsPolicy {
    /// Creates a policy from allowed claim names. Reserved names are ignored.
    #[must_use]
    pub fn new<I, S>(allowed: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let allowed = allowed
            .into_iter()
            .map(Into::into)
            .filter(|name: &String| {
                let reserved = RESERVED_CLAIMS.contains(&name.as_str());
                if reserved {
                    warn!(claim = %name, "Reserved claim cannot be allow-listed");
                }
                !reserved
            })
            .collect();
        Self { allowed }
    }

    /// Returns `true` if `name` may be copied into a token.
    #[must_use]
    pub fn allows(&self, name: &str) -> bool {
        self.allowed.contains(name)
    }

    /// Returns the attributes of `identity` that may enter a token.
    #[must_use]
    pub fn filter(&self, identity: &Identity) -> Map<String, Value> {
        let mut ext = Map::new();
        for (key, value) in &identity.attributes {
            if self.allows(key) {
                ext.insert(key.clone(), value.clone());
            } else {
                debug!(
                    subject = %identity.subject,
                    claim = %key,
                    "Dropping claim not on allow-list"
                );
            }
        }
        ext
    }
}
