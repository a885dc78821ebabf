//! Reference HTTP server for `authlane-auth`.
//!
//! Exposes bearer-token and cookie-session login, refresh rotation, logout,
//! the OAuth authorization code + PKCE login, and a JWKS document.

pub mod config;
pub mod error;
pub mod extract;
pub mod handlers;
pub mod observability;
pub mod server;
pub mod state;

pub use server::{AuthlaneServer, ServerBuilder, build_auth_service, build_router};
pub use state::AppState;
