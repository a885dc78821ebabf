//! Username and secret verification.
//!
//! [`CredentialVerifier`] checks a presented secret against the stored hash
//! and returns the user's [`Identity`]. Unknown users, wrong secrets and
//! unreadable stored hashes all produce the same
//! [`AuthError::InvalidCredential`], and unknown users still pay for one hash
//! verification against a dummy hash so response times do not reveal which
//! usernames exist.

pub mod hasher;

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

pub use hasher::{Argon2Hasher, HashError, PasswordHasher};

use crate::crypto::generate_token;
use crate::storage::CredentialStore;
use crate::types::Identity;
use crate::{AuthError, AuthResult};

/// Verifies username/secret pairs.
pub struct CredentialVerifier {
    store: Arc<dyn CredentialStore>,
    hasher: Arc<dyn PasswordHasher>,
    timeout: Duration,
    dummy_hash: String,
}

impl CredentialVerifier {
    /// Creates a verifier.
    ///
    /// Computes the dummy hash used for unknown users, so construction costs
    /// one hash operation.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::Internal` if the dummy hash cannot be computed.
    pub fn new(
        store: Arc<dyn CredentialStore>,
        hasher: Arc<dyn PasswordHasher>,
        timeout: Duration,
    ) -> AuthResult<Self> {
        let dummy_hash = hasher
            .hash(&generate_token())
            .map_err(|e| AuthError::internal(format!("failed to compute dummy hash: {e}")))?;

        Ok(Self {
            store,
            hasher,
            timeout,
            dummy_hash,
        })
    }

    /// Verifies a secret for `username`.
    ///
    /// # Errors
    ///
    /// - `AuthError::InvalidCredential` for an unknown user or wrong secret
    /// - `AuthError::UpstreamTimeout` if verification exceeds its deadline
    /// - `AuthError::Storage` if the credential lookup fails
    pub async fn verify(&self, username: &str, secret: &str) -> AuthResult<Identity> {
        let credential = self.store.find_credential(username).await?;

        let (hash, identity) = match credential {
            Some(stored) => (stored.password_hash, Some(stored.identity)),
            None => (self.dummy_hash.clone(), None),
        };

        let hasher = self.hasher.clone();
        let dummy_hash = self.dummy_hash.clone();
        let secret = secret.to_owned();
        let task = tokio::task::spawn_blocking(move || match hasher.verify(&secret, &hash) {
            // An unreadable stored hash still pays for one full verification.
            Err(e) => {
                let _ = hasher.verify(&secret, &dummy_hash);
                Err(e)
            }
            outcome => outcome,
        });

        let outcome = match tokio::time::timeout(self.timeout, task).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(join_error)) => {
                return Err(AuthError::internal(format!(
                    "credential verification task failed: {join_error}"
                )));
            }
            Err(_) => {
                warn!(
                    timeout_ms = self.timeout.as_millis() as u64,
                    "Credential verification timed out"
                );
                return Err(AuthError::upstream_timeout("credential verification"));
            }
        };

        match (outcome, identity) {
            (Ok(true), Some(identity)) => {
                debug!(subject = %identity.subject, "Credential verified");
                Ok(identity)
            }
            (Ok(_), known) => {
                info!(known_user = known.is_some(), "Credential rejected");
                Err(AuthError::InvalidCredential)
            }
            (Err(e), _) => {
                warn!(error = %e, "Stored password hash is unreadable");
                Err(AuthError::InvalidCredential)
            }
        }
    }
}

impl std::fmt::Debug for CredentialVerifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialVerifier")
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}
