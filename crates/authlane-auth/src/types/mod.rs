//! Domain types for identities, tokens, sessions and flow state.

pub mod identity;
pub mod oauth_state;
pub mod refresh_token;
pub mod revocation;
pub mod session;

pub use identity::{ClientFingerprint, FingerprintDigest, Identity};
pub use oauth_state::OAuthFlowState;
pub use refresh_token::{RefreshTokenRecord, RefreshTokenStatus};
pub use revocation::{RevocationEntry, RevocationTarget};
pub use session::Session;
