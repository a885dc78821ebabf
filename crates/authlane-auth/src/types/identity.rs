//! Identity and client fingerprint types.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::crypto::{constant_time_eq, hash_token};

/// A verified identity: an opaque subject plus minimal claims.
///
/// Identities are immutable once embedded in a token. `attributes` carry
/// optional custom claims; only keys on the configured allow-list ever
/// reach an access token.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Identity {
    /// Opaque subject identifier.
    pub subject: String,

    /// Coarse role name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,

    /// Email address.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,

    /// Custom claims, filtered at issue time.
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub attributes: Map<String, Value>,
}

impl Identity {
    /// Creates an identity with no claims besides the subject.
    #[must_use]
    pub fn new(subject: impl Into<String>) -> Self {
        Self {
            subject: subject.into(),
            role: None,
            email: None,
            attributes: Map::new(),
        }
    }

    /// Sets the role.
    #[must_use]
    pub fn with_role(mut self, role: impl Into<String>) -> Self {
        self.role = Some(role.into());
        self
    }

    /// Sets the email.
    #[must_use]
    pub fn with_email(mut self, email: impl Into<String>) -> Self {
        self.email = Some(email.into());
        self
    }

    /// Adds a custom attribute.
    #[must_use]
    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }
}

/// What the server could observe about a client on a given request.
///
/// Both fields are best effort; proxies and browsers may omit them.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClientFingerprint {
    /// Remote IP address.
    pub ip: Option<String>,

    /// User-Agent header.
    pub user_agent: Option<String>,
}

impl ClientFingerprint {
    /// Creates a fingerprint from optional parts.
    #[must_use]
    pub fn new(ip: Option<String>, user_agent: Option<String>) -> Self {
        Self { ip, user_agent }
    }

    /// Digests the fields the session policy binds to.
    #[must_use]
    pub fn digest(&self, bind_ip: bool, bind_user_agent: bool) -> FingerprintDigest {
        FingerprintDigest {
            ip: self.ip.as_deref().filter(|_| bind_ip).map(hash_token),
            user_agent: self
                .user_agent
                .as_deref()
                .filter(|_| bind_user_agent)
                .map(hash_token),
        }
    }
}

/// SHA-256 digests of the bound fingerprint fields, as stored with a session.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FingerprintDigest {
    /// Digest of the IP address, when bound.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip: Option<String>,

    /// Digest of the User-Agent, when bound.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
}

impl FingerprintDigest {
    /// Returns `true` if `presented` is consistent with this recorded digest.
    ///
    /// A field recorded at creation must be present and equal later.
    /// Fields that were not recorded are not compared.
    #[must_use]
    pub fn matches(&self, presented: &FingerprintDigest) -> bool {
        field_matches(self.ip.as_deref(), presented.ip.as_deref())
            && field_matches(self.user_agent.as_deref(), presented.user_agent.as_deref())
    }
}

fn field_matches(recorded: Option<&str>, presented: Option<&str>) -> bool {
    match (recorded, presented) {
        (None, _) => true,
        (Some(_), None) => false,
        (Some(recorded), Some(presented)) => {
            constant_time_eq(recorded.as_bytes(), presented.as_bytes())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fingerprint(ip: Option<&str>, ua: Option<&str>) -> ClientFingerprint {
        ClientFingerprint::new(ip.map(str::to_string), ua.map(str::to_string))
    }

    #[test]
    fn test_identity_builder() {
        let identity = Identity::new("user-1")
            .with_role("admin")
            .with_email("a@example.com")
            .with_attribute("tenant", "acme");
        assert_eq!(identity.subject, "user-1");
        assert_eq!(identity.role.as_deref(), Some("admin"));
        assert_eq!(identity.attributes["tenant"], "acme");
    }

    #[test]
    fn test_digest_respects_binding() {
        let fp = fingerprint(Some("10.0.0.1"), Some("curl/8"));
        let digest = fp.digest(false, true);
        assert!(digest.ip.is_none());
        assert_eq!(digest.user_agent, Some(hash_token("curl/8")));
    }

    #[test]
    fn test_matching_fingerprint() {
        let recorded = fingerprint(Some("10.0.0.1"), Some("curl/8")).digest(true, true);
        let same = fingerprint(Some("10.0.0.1"), Some("curl/8")).digest(true, true);
        assert!(recorded.matches(&same));
    }

    #[test]
    fn test_changed_user_agent_mismatches() {
        let recorded = fingerprint(None, Some("firefox")).digest(true, true);
        let other = fingerprint(None, Some("chrome")).digest(true, true);
        assert!(!recorded.matches(&other));
    }

    #[test]
    fn test_missing_recorded_field_mismatches() {
        let recorded = fingerprint(Some("10.0.0.1"), None).digest(true, true);
        let missing = fingerprint(None, None).digest(true, true);
        assert!(!recorded.matches(&missing));
    }

    #[test]
    fn test_unrecorded_field_is_ignored() {
        let recorded = fingerprint(None, None).digest(true, true);
        let presented = fingerprint(Some("10.0.0.9"), Some("anything")).digest(true, true);
        assert!(recorded.matches(&presented));
    }
}
