//! OAuth 2.0 login through an external identity provider.
//!
//! This server is the *client* here: it sends users to the provider with a
//! PKCE challenge and exchanges the returned code for the user's external
//! identity.

pub mod flow;
pub mod pkce;
pub mod provider;

pub use flow::{AuthorizationRedirect, CallbackParams, FlowPhase, OAuthFlowCoordinator};
pub use pkce::{PkceChallenge, PkceError, PkceVerifier};
pub use provider::{HttpIdentityProvider, IdentityProvider, IdpError, ProviderGrant};
