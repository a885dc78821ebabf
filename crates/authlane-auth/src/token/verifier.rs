//! Access token verification.
//!
//! Every rejection surfaces as the same opaque [`AuthError::InvalidToken`].
//! The specific [`TokenRejection`] is only written to the log.

use std::fmt;
use std::sync::Arc;

use time::{Duration, OffsetDateTime};
use tracing::{debug, warn};

use crate::clock::{SharedClock, to_time_duration};
use crate::revocation::RevocationRegistry;
use crate::token::claims::AccessTokenClaims;
use crate::token::jwt::{JwtError, JwtService};
use crate::{AuthError, AuthResult};

/// Why a token was rejected. Internal diagnostic only.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenRejection {
    /// Not a parseable JWT.
    Malformed,
    /// Header algorithm is not the pinned one.
    AlgorithmMismatch,
    /// No key with the header's `kid`.
    UnknownKey,
    /// Signature does not verify.
    BadSignature,
    /// Issuer, audience or required claims are wrong.
    BadClaims,
    /// Past `exp` plus leeway.
    Expired,
    /// Before `nbf` minus leeway.
    NotYetValid,
    /// The token or its subject is revoked.
    Revoked,
}

impl TokenRejection {
    /// Returns the label used in logs.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Malformed => "malformed",
            Self::AlgorithmMismatch => "algorithm_mismatch",
            Self::UnknownKey => "unknown_key",
            Self::BadSignature => "bad_signature",
            Self::BadClaims => "bad_claims",
            Self::Expired => "expired",
            Self::NotYetValid => "not_yet_valid",
            Self::Revoked => "revoked",
        }
    }

    /// Returns `true` for rejections that suggest tampering rather than
    /// ordinary expiry.
    #[must_use]
    pub fn is_suspicious(&self) -> bool {
        matches!(
            self,
            Self::AlgorithmMismatch | Self::BadSignature | Self::UnknownKey
        )
    }
}

impl fmt::Display for TokenRejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<&JwtError> for TokenRejection {
    fn from(err: &JwtError) -> Self {
        match err {
            JwtError::Expired => Self::Expired,
            JwtError::NotYetValid => Self::NotYetValid,
            JwtError::InvalidSignature => Self::BadSignature,
            JwtError::AlgorithmMismatch { .. } => Self::AlgorithmMismatch,
            JwtError::MissingKeyId | JwtError::KeyNotFound { .. } => Self::UnknownKey,
            JwtError::InvalidClaims { .. } => Self::BadClaims,
            _ => Self::Malformed,
        }
    }
}

/// Validates access tokens.
///
/// Verification takes `&self`, holds no locks of its own and has no side
/// effects beyond lazy removal of expired revocation entries.
#[derive(Clone)]
pub struct TokenVerifier {
    jwt: Arc<JwtService>,
    revocations: RevocationRegistry,
    clock: SharedClock,
    leeway: Duration,
}

impl TokenVerifier {
    /// Creates a verifier tolerating `clock_skew` on time claims.
    #[must_use]
    pub fn new(
        jwt: Arc<JwtService>,
        revocations: RevocationRegistry,
        clock: SharedClock,
        clock_skew: std::time::Duration,
    ) -> Self {
        Self {
            jwt,
            revocations,
            clock,
            leeway: to_time_duration(clock_skew),
        }
    }

    /// Verifies `token` and returns its claims.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::InvalidToken` on any rejection, or
    /// `AuthError::Storage` if the revocation lookup fails.
    pub async fn verify(&self, token: &str) -> AuthResult<AccessTokenClaims> {
        let claims = match self.check(token) {
            Ok(claims) => claims,
            Err(rejection) => return Err(reject(rejection, None)),
        };

        let issued_at = OffsetDateTime::from_unix_timestamp(claims.iat)
            .map_err(|_| reject(TokenRejection::BadClaims, Some(&claims.sub)))?;
        if self
            .revocations
            .is_revoked(&claims.jti, &claims.sub, issued_at)
            .await?
        {
            return Err(reject(TokenRejection::Revoked, Some(&claims.sub)));
        }

        debug!(subject = %claims.sub, jti = %claims.jti, "Access token verified");
        Ok(claims)
    }

    /// Signature, claim and time checks, without the revocation lookup.
    fn check(&self, token: &str) -> Result<AccessTokenClaims, TokenRejection> {
        let data = self
            .jwt
            .decode::<AccessTokenClaims>(token)
            .map_err(|e| TokenRejection::from(&e))?;
        let claims = data.claims;

        let now = self.clock.now().unix_timestamp();
        let leeway = self.leeway.whole_seconds();

        if now > claims.exp.saturating_add(leeway) {
            return Err(TokenRejection::Expired);
        }
        if claims.nbf > now.saturating_add(leeway) {
            return Err(TokenRejection::NotYetValid);
        }

        Ok(claims)
    }
}

fn reject(rejection: TokenRejection, subject: Option<&str>) -> AuthError {
    if rejection.is_suspicious() {
        warn!(reason = %rejection, subject = ?subject, "Access token rejected");
    } else {
        debug!(reason = %rejection, subject = ?subject, "Access token rejected");
    }
    AuthError::InvalidToken
}

impl fmt::Debug for TokenVerifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenVerifier")
            .field("jwt", &self.jwt)
            .field("leeway", &self.leeway)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::clock::{Clock, ManualClock};
    use crate::storage::InMemoryRevocationStore;
    use crate::token::jwt::SigningKeyPair;

    const SECRET: &[u8] = b"0123456789abcdef0123456789abcdef";

    struct Fixture {
        verifier: TokenVerifier,
        jwt: Arc<JwtService>,
        clock: Arc<ManualClock>,
        registry: RevocationRegistry,
    }

    fn fixture() -> Fixture {
        let jwt = Arc::new(JwtService::new(
            SigningKeyPair::from_secret("k1", SECRET).unwrap(),
            "https://auth.test",
            "https://api.test",
        ));
        let clock = Arc::new(ManualClock::starting_now());
        let registry = RevocationRegistry::new(Arc::new(InMemoryRevocationStore::new()), clock.clone());
        let verifier = TokenVerifier::new(
            jwt.clone(),
            registry.clone(),
            clock.clone(),
            std::time::Duration::from_secs(30),
        );
        Fixture {
            verifier,
            jwt,
            clock,
            registry,
        }
    }

    fn sign(f: &Fixture, exp_offset: i64, nbf_offset: i64) -> String {
        let now = f.clock.now().unix_timestamp();
        f.jwt
            .encode(&json!({
                "iss": "https://auth.test",
                "aud": "https://api.test",
                "sub": "u1",
                "iat": now,
                "nbf": now + nbf_offset,
                "exp": now + exp_offset,
                "jti": "jti-1",
            }))
            .unwrap()
    }

    #[tokio::test]
    async fn test_valid_token() {
        let f = fixture();
        let claims = f.verifier.verify(&sign(&f, 900, 0)).await.unwrap();
        assert_eq!(claims.sub, "u1");
        assert_eq!(claims.jti, "jti-1");
    }

    #[tokio::test]
    async fn test_expiry_boundary_with_leeway() {
        let f = fixture();
        let token = sign(&f, 0, 0);

        // exp = now: accepted through the whole leeway window.
        f.verifier.verify(&token).await.unwrap();
        f.clock.advance(Duration::seconds(30));
        f.verifier.verify(&token).await.unwrap();

        f.clock.advance(Duration::seconds(1));
        let err = f.verifier.verify(&token).await.unwrap_err();
        assert!(matches!(err, AuthError::InvalidToken));
    }

    #[tokio::test]
    async fn test_not_yet_valid() {
        let f = fixture();
        f.verifier.verify(&sign(&f, 900, 30)).await.unwrap();
        let err = f.verifier.verify(&sign(&f, 900, 31)).await.unwrap_err();
        assert!(matches!(err, AuthError::InvalidToken));
    }

    #[tokio::test]
    async fn test_revoked_token() {
        let f = fixture();
        let token = sign(&f, 900, 0);
        f.registry
            .revoke_token("jti-1", f.clock.now() + Duration::minutes(15))
            .await
            .unwrap();

        let err = f.verifier.verify(&token).await.unwrap_err();
        assert!(matches!(err, AuthError::InvalidToken));
    }

    #[tokio::test]
    async fn test_every_failure_is_the_same_error() {
        let f = fixture();
        let expired = sign(&f, -3600, 0);
        let garbage = "not.a.jwt".to_string();
        let truncated = sign(&f, 900, 0)[..40].to_string();

        let messages: Vec<String> = [
            f.verifier.verify(&expired).await.unwrap_err(),
            f.verifier.verify(&garbage).await.unwrap_err(),
            f.verifier.verify(&truncated).await.unwrap_err(),
        ]
        .iter()
        .map(ToString::to_string)
        .collect();

        assert!(messages.iter().all(|m| m == "Invalid token"));
    }

    #[test]
    fn test_rejection_mapping() {
        assert_eq!(TokenRejection::from(&JwtError::InvalidSignature), TokenRejection::BadSignature);
        assert_eq!(TokenRejection::from(&JwtError::MissingKeyId), TokenRejection::UnknownKey);
        assert_eq!(
            TokenRejection::from(&JwtError::decoding_error("x")),
            TokenRejection::Malformed
        );
        assert!(TokenRejection::AlgorithmMismatch.is_suspicious());
        assert!(!TokenRejection::Expired.is_suspicious());
    }
}
