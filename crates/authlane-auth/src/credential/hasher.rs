//! Password hashing.
//!
//! Hashes are stored in PHC string format. The default [`Argon2Hasher`]
//! uses Argon2id with default parameters and a fresh `OsRng` salt per hash.

use argon2::{
    Argon2,
    password_hash::{
        PasswordHash, PasswordHasher as _, PasswordVerifier as _, SaltString, rand_core::OsRng,
    },
};

/// Errors produced while hashing or parsing a stored hash.
#[derive(Debug, thiserror::Error)]
pub enum HashError {
    /// The stored hash is not a valid PHC string.
    #[error("Malformed password hash: {0}")]
    MalformedHash(String),

    /// Hashing itself failed.
    #[error("Password hashing failed: {0}")]
    Hashing(String),
}

/// A slow, salted one-way function for user secrets.
///
/// Both operations are CPU-bound and synchronous; callers run them on the
/// blocking pool.
pub trait PasswordHasher: Send + Sync {
    /// Hashes a secret for storage.
    ///
    /// # Errors
    ///
    /// Returns `HashError::Hashing` if hashing fails (rare).
    fn hash(&self, secret: &str) -> Result<String, HashError>;

    /// Checks a secret against a stored hash.
    ///
    /// # Returns
    ///
    /// `Ok(true)` if the secret matches, `Ok(false)` otherwise.
    ///
    /// # Errors
    ///
    /// Returns `HashError::MalformedHash` if `hash` cannot be parsed.
    fn verify(&self, secret: &str, hash: &str) -> Result<bool, HashError>;
}

/// Argon2id password hasher.
#[derive(Debug, Default, Clone, Copy)]
pub struct Argon2Hasher;

impl Argon2Hasher {
    /// Creates a hasher with default Argon2id parameters.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl PasswordHasher for Argon2Hasher {
    fn hash(&self, secret: &str) -> Result<String, HashError> {
        let salt = SaltString::generate(&mut OsRng);
        let hash = Argon2::default()
            .hash_password(secret.as_bytes(), &salt)
            .map_err(|e| HashError::Hashing(e.to_string()))?;
        Ok(hash.to_string())
    }

    fn verify(&self, secret: &str, hash: &str) -> Result<bool, HashError> {
        let parsed = PasswordHash::new(hash).map_err(|e| HashError::MalformedHash(e.to_string()))?;
        Ok(Argon2::default()
            .verify_password(secret.as_bytes(), &parsed)
            .is_ok())
    }
}
