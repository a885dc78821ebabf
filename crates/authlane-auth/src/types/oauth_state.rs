//! Pending OAuth authorization flow state.

use time::OffsetDateTime;

use crate::oauth::pkce::PkceVerifier;

/// State recorded when an authorization redirect is issued, consumed
/// exactly once when the provider calls back.
#[derive(Debug, Clone)]
pub struct OAuthFlowState {
    /// SHA-256 hash of the `state` parameter.
    pub state_hash: String,

    /// PKCE verifier for the code exchange.
    pub code_verifier: PkceVerifier,

    /// Redirect URI the provider was told to use.
    pub redirect_uri: String,

    /// When the flow was initiated.
    pub created_at: OffsetDateTime,
}

impl OAuthFlowState {
    /// Returns `true` if the flow is older than `ttl` at `now`.
    #[must_use]
    pub fn is_expired_at(&self, now: OffsetDateTime, ttl: time::Duration) -> bool {
        now - self.created_at > ttl
    }
}
