//! # authlane-auth
//!
//! Token and session lifecycle management for HTTP services.
//!
//! This crate provides:
//! - Credential verification against stored Argon2 hashes
//! - Short-lived signed access tokens (JWT) with a pinned algorithm
//! - Single-use rotating refresh tokens with reuse detection
//! - A revocation registry for access tokens and subjects
//! - Server-side sessions with idle/absolute expiry and client binding
//! - Per-session CSRF tokens
//! - OAuth 2.0 authorization code + PKCE login through an external provider
//!
//! ## Overview
//!
//! [`AuthService`] is the entry point. It is assembled from injectable
//! stores (see [`storage`]), a [`Clock`](clock::Clock) and a
//! [`PasswordHasher`](credential::PasswordHasher); the in-memory defaults
//! are suitable for a single process.
//!
//! ## Modules
//!
//! - [`config`] - Auth configuration
//! - [`credential`] - Username/secret verification
//! - [`token`] - Access token issuance and verification, refresh rotation
//! - [`revocation`] - Revoked tokens and subjects
//! - [`session`] - Server-side sessions
//! - [`csrf`] - Anti-forgery tokens
//! - [`oauth`] - External provider login with PKCE
//! - [`storage`] - Storage traits and in-memory implementations
//! - [`service`] - The facade wiring everything together
//! - [`reaper`] - Background cleanup of expired state

pub mod clock;
pub mod config;
pub mod cookie;
pub mod credential;
pub mod crypto;
pub mod csrf;
pub mod error;
pub mod oauth;
pub mod reaper;
pub mod revocation;
pub mod service;
pub mod session;
pub mod storage;
pub mod token;
pub mod types;

pub use config::{AuthConfig, ConfigError};
pub use error::{AuthError, ErrorCategory};
pub use reaper::{Reaper, ReaperHandle};
pub use service::{AuthService, AuthServiceBuilder, Logout, PruneReport, SessionLogin};
pub use token::{AccessTokenClaims, TokenPair};
pub use types::{ClientFingerprint, Identity, Session};

/// Type alias for authentication results.
pub type AuthResult<T> = Result<T, AuthError>;

/// Prelude module for convenient imports.
///
/// ```ignore
/// use authlane_auth::prelude::*;
/// ```
pub mod prelude {
    pub use crate::AuthResult;
    pub use crate::clock::{Clock, ManualClock, SharedClock, SystemClock};
    pub use crate::config::{AuthConfig, ConfigError};
    pub use crate::cookie::{CookiePolicy, find_cookie};
    pub use crate::credential::{Argon2Hasher, CredentialVerifier, PasswordHasher};
    pub use crate::csrf::{CsrfGuard, CsrfToken, is_safe_method};
    pub use crate::error::{AuthError, ErrorCategory};
    pub use crate::oauth::{
        AuthorizationRedirect, CallbackParams, HttpIdentityProvider, IdentityProvider,
        OAuthFlowCoordinator, ProviderGrant,
    };
    pub use crate::reaper::{Reaper, ReaperHandle};
    pub use crate::revocation::RevocationRegistry;
    pub use crate::service::{AuthService, AuthServiceBuilder, Logout, PruneReport, SessionLogin};
    pub use crate::session::{NewSession, SessionManager};
    pub use crate::storage::{
        CredentialStore, CsrfStore, InMemoryCredentialStore, InMemoryCsrfStore,
        InMemoryOAuthStateStore, InMemoryRefreshTokenStore, InMemoryRevocationStore,
        InMemorySessionStore, OAuthStateStore, RefreshTokenStore, RevocationStore, SessionStore,
    };
    pub use crate::token::{
        AccessTokenClaims, Jwks, JwtService, RefreshRotator, SigningAlgorithm, SigningKeyPair,
        TokenIssuer, TokenPair, TokenVerifier,
    };
    pub use crate::types::{ClientFingerprint, Identity, Session};
}
