//! Credential lookup trait.

use async_trait::async_trait;

use crate::AuthResult;
use crate::types::Identity;

/// A user's identity and stored password hash.
#[derive(Debug, Clone)]
pub struct StoredCredential {
    /// Identity returned on successful verification.
    pub identity: Identity,

    /// PHC-formatted password hash.
    pub password_hash: String,
}

/// Read access to the user credential directory.
///
/// User profiles live outside this crate; this trait is the only view the
/// credential verifier needs.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Finds the credential for a username.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage operation fails.
    async fn find_credential(&self, username: &str) -> AuthResult<Option<StoredCredential>>;
}
