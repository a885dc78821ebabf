//! Storage traits for auth state.
//!
//! Components never hold state in globals; every piece of mutable state
//! lives behind one of these traits and is injected at construction. The
//! [`memory`] module provides process-local implementations.

pub mod credential;
pub mod csrf;
pub mod memory;
pub mod oauth_state;
pub mod refresh_token;
pub mod revocation;
pub mod session;

pub use credential::{CredentialStore, StoredCredential};
pub use csrf::{CsrfRecord, CsrfStore};
pub use memory::{
    InMemoryCredentialStore, InMemoryCsrfStore, InMemoryOAuthStateStore,
    InMemoryRefreshTokenStore, InMemoryRevocationStore, InMemorySessionStore,
};
pub use oauth_state::OAuthStateStore;
pub use refresh_token::{Redemption, RefreshTokenStore};
pub use revocation::RevocationStore;
pub use session::SessionStore;
