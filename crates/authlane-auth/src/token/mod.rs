//! Access and refresh tokens.
//!
//! - [`jwt`]: signing keys, the key ring and compact JWT encoding
//! - [`claims`]: access token claims and the custom claim allow-list
//! - [`issuer`]: minting access tokens and refresh token records
//! - [`verifier`]: access token validation, including revocation
//! - [`refresh`]: single-use refresh rotation with reuse detection

pub mod claims;
pub mod issuer;
pub mod jwt;
pub mod refresh;
pub mod verifier;

pub use claims::{AccessTokenClaims, ClaimsPolicy};
pub use issuer::{IssuedAccessToken, IssuedRefreshToken, IssuedToken, TokenIssuer, TokenKind, TokenPair};
pub use jwt::{Jwk, Jwks, JwtError, JwtService, SigningAlgorithm, SigningKeyPair, VerificationKey};
pub use refresh::RefreshRotator;
pub use verifier::{TokenRejection, TokenVerifier};
