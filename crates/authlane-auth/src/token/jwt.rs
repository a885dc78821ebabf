//! JWT signing keys and encoding/decoding.
//!
//! One algorithm is pinned per deployment. Decoding checks the header
//! `alg` against the pinned algorithm before any key is touched and selects
//! the verification key by `kid`, so tokens signed before a key rotation keep
//! verifying for as long as the previous key is retained.
//!
//! ## Supported Algorithms
//!
//! - **HS256**: HMAC with SHA-256 (shared secret, single-service deployments)
//! - **RS256**: RSA with SHA-256 (widely compatible)
//! - **RS384**: RSA with SHA-384
//! - **ES384**: ECDSA with P-384 curve (smaller keys)
//!
//! There is no unsigned variant; a token whose header says `"none"` cannot
//! even be parsed.
//!
//! ## Example
//!
//! ```ignore
//! use authlane_auth::token::jwt::{JwtService, SigningKeyPair};
//!
//! let key_pair = SigningKeyPair::generate_ec()?;
//! let jwt = JwtService::new(key_pair, "https://auth.example.com", "https://api.example.com");
//!
//! let token = jwt.encode(&claims)?;
//! let data = jwt.decode::<AccessTokenClaims>(&token)?;
//! ```

use std::fmt;
use std::sync::Arc;

use arc_swap::ArcSwap;
use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use jsonwebtoken::{
    Algorithm, DecodingKey, EncodingKey, Header, TokenData, Validation, decode, decode_header,
    encode,
};
use p384::SecretKey as EcSecretKey;
use p384::ecdsa::{SigningKey as EcSigningKey, VerifyingKey as EcVerifyingKey};
use p384::pkcs8::{
    DecodePrivateKey as EcDecodePrivateKey, DecodePublicKey as EcDecodePublicKey,
    EncodePrivateKey as EcEncodePrivateKey,
};
use rand::rngs::OsRng;
use rsa::pkcs1::DecodeRsaPrivateKey;
use rsa::pkcs8::{DecodePrivateKey, DecodePublicKey, EncodePublicKey, LineEnding};
use rsa::traits::PublicKeyParts;
use rsa::{RsaPrivateKey, RsaPublicKey};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use tracing::{info, warn};

use crate::config::{RetiredKeyConfig, SigningConfig};

// ============================================================================
// Error Types
// ============================================================================

/// Errors that can occur during JWT operations.
#[derive(Debug, thiserror::Error)]
pub enum JwtError {
    /// Failed to encode a token.
    #[error("Failed to encode token: {message}")]
    EncodingError {
        /// Description of the encoding error.
        message: String,
    },

    /// Failed to decode a token.
    #[error("Failed to decode token: {message}")]
    DecodingError {
        /// Description of the decoding error.
        message: String,
    },

    /// The token has expired.
    #[error("Token expired")]
    Expired,

    /// The token is not valid yet.
    #[error("Token not yet valid")]
    NotYetValid,

    /// The token signature is invalid.
    #[error("Invalid signature")]
    InvalidSignature,

    /// The header names an algorithm other than the pinned one.
    #[error("Algorithm mismatch: expected {expected}, found {found}")]
    AlgorithmMismatch {
        /// The pinned algorithm.
        expected: String,
        /// The algorithm named in the header.
        found: String,
    },

    /// The header carries no `kid`.
    #[error("Missing key ID")]
    MissingKeyId,

    /// The token claims are invalid.
    #[error("Invalid claims: {message}")]
    InvalidClaims {
        /// Description of why claims are invalid.
        message: String,
    },

    /// The specified key was not found.
    #[error("Key not found: {kid}")]
    KeyNotFound {
        /// The key ID that was not found.
        kid: String,
    },

    /// Failed to generate a cryptographic key.
    #[error("Key generation error: {message}")]
    KeyGenerationError {
        /// Description of the key generation error.
        message: String,
    },

    /// Invalid key format or data.
    #[error("Invalid key: {message}")]
    InvalidKey {
        /// Description of why the key is invalid.
        message: String,
    },
}

impl JwtError {
    /// Creates a new `EncodingError`.
    #[must_use]
    pub fn encoding_error(message: impl Into<String>) -> Self {
        Self::EncodingError {
            message: message.into(),
        }
    }

    /// Creates a new `DecodingError`.
    #[must_use]
    pub fn decoding_error(message: impl Into<String>) -> Self {
        Self::DecodingError {
            message: message.into(),
        }
    }

    /// Creates a new `InvalidClaims` error.
    #[must_use]
    pub fn invalid_claims(message: impl Into<String>) -> Self {
        Self::InvalidClaims {
            message: message.into(),
        }
    }

    /// Creates a new `KeyNotFound` error.
    #[must_use]
    pub fn key_not_found(kid: impl Into<String>) -> Self {
        Self::KeyNotFound { kid: kid.into() }
    }

    /// Creates a new `KeyGenerationError`.
    #[must_use]
    pub fn key_generation_error(message: impl Into<String>) -> Self {
        Self::KeyGenerationError {
            message: message.into(),
        }
    }

    /// Creates a new `InvalidKey` error.
    #[must_use]
    pub fn invalid_key(message: impl Into<String>) -> Self {
        Self::InvalidKey {
            message: message.into(),
        }
    }

    /// Returns `true` if this is a validation error (expired, invalid signature, etc.).
    #[must_use]
    pub fn is_validation_error(&self) -> bool {
        matches!(
            self,
            Self::Expired
                | Self::NotYetValid
                | Self::InvalidSignature
                | Self::AlgorithmMismatch { .. }
                | Self::InvalidClaims { .. }
        )
    }

    /// Returns `true` if this is a key-related error.
    #[must_use]
    pub fn is_key_error(&self) -> bool {
        matches!(
            self,
            Self::KeyNotFound { .. }
                | Self::MissingKeyId
                | Self::KeyGenerationError { .. }
                | Self::InvalidKey { .. }
        )
    }
}

impl From<jsonwebtoken::errors::Error> for JwtError {
    fn from(err: jsonwebtoken::errors::Error) -> Self {
        use jsonwebtoken::errors::ErrorKind;

        match err.kind() {
            ErrorKind::ExpiredSignature => Self::Expired,
            ErrorKind::ImmatureSignature => Self::NotYetValid,
            ErrorKind::InvalidSignature => Self::InvalidSignature,
            ErrorKind::InvalidToken
            | ErrorKind::InvalidAlgorithm
            | ErrorKind::InvalidAlgorithmName
            | ErrorKind::MissingAlgorithm => Self::decoding_error(err.to_string()),
            ErrorKind::InvalidAudience
            | ErrorKind::InvalidIssuer
            | ErrorKind::InvalidSubject
            | ErrorKind::MissingRequiredClaim(_) => Self::invalid_claims(err.to_string()),
            ErrorKind::InvalidRsaKey(_)
            | ErrorKind::InvalidEcdsaKey
            | ErrorKind::InvalidKeyFormat => Self::invalid_key(err.to_string()),
            _ => Self::decoding_error(err.to_string()),
        }
    }
}

// ============================================================================
// Signing Algorithm
// ============================================================================

/// Supported signing algorithms for JWT tokens.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SigningAlgorithm {
    /// HMAC with SHA-256 (shared secret).
    HS256,
    /// RSA with SHA-256 (widely compatible).
    RS256,
    /// RSA with SHA-384.
    RS384,
    /// ECDSA with P-384 curve.
    ES384,
}

impl SigningAlgorithm {
    /// Parses an algorithm name as used in JWT headers.
    #[must_use]
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "HS256" => Some(Self::HS256),
            "RS256" => Some(Self::RS256),
            "RS384" => Some(Self::RS384),
            "ES384" => Some(Self::ES384),
            _ => None,
        }
    }

    /// Converts to the `jsonwebtoken` Algorithm type.
    #[must_use]
    pub fn to_jwt_algorithm(self) -> Algorithm {
        match self {
            Self::HS256 => Algorithm::HS256,
            Self::RS256 => Algorithm::RS256,
            Self::RS384 => Algorithm::RS384,
            Self::ES384 => Algorithm::ES384,
        }
    }

    /// Returns the algorithm name as used in JWK/JWT headers.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::HS256 => "HS256",
            Self::RS256 => "RS256",
            Self::RS384 => "RS384",
            Self::ES384 => "ES384",
        }
    }

    /// Returns `true` for the shared-secret algorithm.
    #[must_use]
    pub fn is_hmac(&self) -> bool {
        matches!(self, Self::HS256)
    }

    /// Returns `true` if this is an RSA-based algorithm.
    #[must_use]
    pub fn is_rsa(&self) -> bool {
        matches!(self, Self::RS256 | Self::RS384)
    }

    /// Returns `true` if this is an EC-based algorithm.
    #[must_use]
    pub fn is_ec(&self) -> bool {
        matches!(self, Self::ES384)
    }
}

impl fmt::Display for SigningAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ============================================================================
// JWKS Types
// ============================================================================

/// JSON Web Key Set.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Jwks {
    /// The keys in this set.
    pub keys: Vec<Jwk>,
}

/// JSON Web Key (public part only).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Jwk {
    /// Key type ("RSA" or "EC").
    pub kty: String,

    /// Key ID.
    pub kid: String,

    /// Key use ("sig" for signing).
    #[serde(rename = "use")]
    pub use_: String,

    /// Algorithm.
    pub alg: String,

    /// RSA modulus (base64url encoded).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub n: Option<String>,

    /// RSA exponent (base64url encoded).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub e: Option<String>,

    /// EC curve name.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub crv: Option<String>,

    /// EC x coordinate (base64url encoded).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub x: Option<String>,

    /// EC y coordinate (base64url encoded).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub y: Option<String>,
}

/// Public key data for JWKS export.
#[derive(Clone)]
enum PublicKeyData {
    Rsa { n: Vec<u8>, e: Vec<u8> },
    Ec { x: Vec<u8>, y: Vec<u8> },
    /// Shared secrets are never published.
    Symmetric,
}

impl PublicKeyData {
    fn to_jwk(&self, kid: &str, algorithm: SigningAlgorithm) -> Option<Jwk> {
        match self {
            Self::Rsa { n, e } => Some(Jwk {
                kty: "RSA".to_string(),
                kid: kid.to_string(),
                use_: "sig".to_string(),
                alg: algorithm.as_str().to_string(),
                n: Some(URL_SAFE_NO_PAD.encode(n)),
                e: Some(URL_SAFE_NO_PAD.encode(e)),
                crv: None,
                x: None,
                y: None,
            }),
            Self::Ec { x, y } => Some(Jwk {
                kty: "EC".to_string(),
                kid: kid.to_string(),
                use_: "sig".to_string(),
                alg: algorithm.as_str().to_string(),
                n: None,
                e: None,
                crv: Some("P-384".to_string()),
                x: Some(URL_SAFE_NO_PAD.encode(x)),
                y: Some(URL_SAFE_NO_PAD.encode(y)),
            }),
            Self::Symmetric => None,
        }
    }
}

fn ec_decoding_parts(
    verifying_key: &EcVerifyingKey,
) -> Result<(DecodingKey, PublicKeyData), JwtError> {
    let point = verifying_key.to_encoded_point(false);
    let x = point
        .x()
        .ok_or_else(|| JwtError::invalid_key("Missing x coordinate"))?;
    let y = point
        .y()
        .ok_or_else(|| JwtError::invalid_key("Missing y coordinate"))?;

    let x_b64 = URL_SAFE_NO_PAD.encode(x.as_slice());
    let y_b64 = URL_SAFE_NO_PAD.encode(y.as_slice());
    let decoding_key = DecodingKey::from_ec_components(&x_b64, &y_b64)
        .map_err(|e| JwtError::invalid_key(e.to_string()))?;

    Ok((
        decoding_key,
        PublicKeyData::Ec {
            x: x.to_vec(),
            y: y.to_vec(),
        },
    ))
}

fn rsa_decoding_parts(public_key: &RsaPublicKey) -> Result<(DecodingKey, PublicKeyData), JwtError> {
    let public_pem = public_key
        .to_public_key_pem(LineEnding::LF)
        .map_err(|e| JwtError::invalid_key(e.to_string()))?;
    let decoding_key = DecodingKey::from_rsa_pem(public_pem.as_bytes())
        .map_err(|e| JwtError::invalid_key(e.to_string()))?;

    Ok((
        decoding_key,
        PublicKeyData::Rsa {
            n: public_key.n().to_bytes_be(),
            e: public_key.e().to_bytes_be(),
        },
    ))
}

// ============================================================================
// Signing Key Pair
// ============================================================================

/// A signing key for JWT operations.
pub struct SigningKeyPair {
    /// Key ID.
    pub kid: String,

    /// Signing algorithm.
    pub algorithm: SigningAlgorithm,

    /// Encoding key (private key or shared secret) for signing.
    encoding_key: EncodingKey,

    /// Decoding key (public key or shared secret) for verification.
    decoding_key: DecodingKey,

    /// Public key data for JWKS export.
    public_key_data: PublicKeyData,

    /// When the key was created.
    pub created_at: OffsetDateTime,
}

impl SigningKeyPair {
    /// Creates an HS256 key from a shared secret.
    ///
    /// # Errors
    /// Returns an error if the secret is shorter than 32 bytes.
    pub fn from_secret(kid: impl Into<String>, secret: &[u8]) -> Result<Self, JwtError> {
        if secret.len() < 32 {
            return Err(JwtError::invalid_key(
                "HS256 secret must be at least 32 bytes",
            ));
        }

        Ok(Self {
            kid: kid.into(),
            algorithm: SigningAlgorithm::HS256,
            encoding_key: EncodingKey::from_secret(secret),
            decoding_key: DecodingKey::from_secret(secret),
            public_key_data: PublicKeyData::Symmetric,
            created_at: OffsetDateTime::now_utc(),
        })
    }

    /// Generates a fresh asymmetric key pair for `algorithm`.
    ///
    /// # Errors
    /// Returns an error for HS256 (a secret cannot be generated for other
    /// services to share) or if key generation fails.
    pub fn generate(algorithm: SigningAlgorithm) -> Result<Self, JwtError> {
        match algorithm {
            SigningAlgorithm::HS256 => Err(JwtError::invalid_key(
                "HS256 keys must be configured, not generated",
            )),
            SigningAlgorithm::RS256 | SigningAlgorithm::RS384 => Self::generate_rsa(algorithm),
            SigningAlgorithm::ES384 => Self::generate_ec(),
        }
    }

    /// Generates a new RSA key pair.
    ///
    /// # Arguments
    /// * `algorithm` - The signing algorithm (must be RS256 or RS384)
    ///
    /// # Errors
    /// Returns an error if key generation fails or algorithm is not RSA-based.
    pub fn generate_rsa(algorithm: SigningAlgorithm) -> Result<Self, JwtError> {
        if !algorithm.is_rsa() {
            return Err(JwtError::invalid_key(format!(
                "Algorithm {} is not RSA-based",
                algorithm
            )));
        }

        let bits = 2048;
        let private_key = RsaPrivateKey::new(&mut OsRng, bits)
            .map_err(|e| JwtError::key_generation_error(e.to_string()))?;

        let private_pem = rsa::pkcs8::EncodePrivateKey::to_pkcs8_pem(&private_key, LineEnding::LF)
            .map_err(|e| JwtError::key_generation_error(e.to_string()))?;
        let encoding_key = EncodingKey::from_rsa_pem(private_pem.as_bytes())
            .map_err(|e| JwtError::key_generation_error(e.to_string()))?;

        let (decoding_key, public_key_data) = rsa_decoding_parts(&private_key.to_public_key())?;

        Ok(Self {
            kid: uuid::Uuid::new_v4().to_string(),
            algorithm,
            encoding_key,
            decoding_key,
            public_key_data,
            created_at: OffsetDateTime::now_utc(),
        })
    }

    /// Generates a new EC key pair using P-384 curve.
    ///
    /// # Errors
    /// Returns an error if key generation fails.
    pub fn generate_ec() -> Result<Self, JwtError> {
        let secret_key = EcSecretKey::random(&mut OsRng);
        Self::from_ec_secret(uuid::Uuid::new_v4().to_string(), &secret_key)
            .map_err(|e| JwtError::key_generation_error(e.to_string()))
    }

    fn from_ec_secret(kid: String, secret_key: &EcSecretKey) -> Result<Self, JwtError> {
        // jsonwebtoken only reads PKCS#8 EC keys
        let private_pem = secret_key
            .to_pkcs8_pem(LineEnding::LF)
            .map_err(|e| JwtError::invalid_key(e.to_string()))?;
        let encoding_key = EncodingKey::from_ec_pem(private_pem.as_bytes())
            .map_err(|e| JwtError::invalid_key(e.to_string()))?;

        let signing_key = EcSigningKey::from(secret_key);
        let (decoding_key, public_key_data) = ec_decoding_parts(signing_key.verifying_key())?;

        Ok(Self {
            kid,
            algorithm: SigningAlgorithm::ES384,
            encoding_key,
            decoding_key,
            public_key_data,
            created_at: OffsetDateTime::now_utc(),
        })
    }

    /// Loads a key pair from PEM strings.
    ///
    /// The private key may be PKCS#8 or the algorithm's traditional format
    /// (PKCS#1 for RSA, SEC1 for EC). The public key is derived from the
    /// private key when `public_pem` is `None`.
    ///
    /// # Errors
    /// Returns an error if the PEM data is invalid or the algorithm is HS256.
    pub fn from_pem(
        kid: impl Into<String>,
        algorithm: SigningAlgorithm,
        private_pem: &str,
        public_pem: Option<&str>,
    ) -> Result<Self, JwtError> {
        let kid = kid.into();

        if algorithm.is_ec() {
            let secret_key = EcSecretKey::from_pkcs8_pem(private_pem)
                .or_else(|_| EcSecretKey::from_sec1_pem(private_pem))
                .map_err(|e| JwtError::invalid_key(e.to_string()))?;
            return Self::from_ec_secret(kid, &secret_key);
        }

        if !algorithm.is_rsa() {
            return Err(JwtError::invalid_key(format!(
                "Algorithm {} does not use PEM keys",
                algorithm
            )));
        }

        let encoding_key = EncodingKey::from_rsa_pem(private_pem.as_bytes())
            .map_err(|e| JwtError::invalid_key(e.to_string()))?;

        let public_key = match public_pem {
            Some(pem) => RsaPublicKey::from_public_key_pem(pem)
                .map_err(|e| JwtError::invalid_key(e.to_string()))?,
            None => RsaPrivateKey::from_pkcs8_pem(private_pem)
                .or_else(|_| RsaPrivateKey::from_pkcs1_pem(private_pem))
                .map_err(|e| JwtError::invalid_key(e.to_string()))?
                .to_public_key(),
        };
        let (decoding_key, public_key_data) = rsa_decoding_parts(&public_key)?;

        Ok(Self {
            kid,
            algorithm,
            encoding_key,
            decoding_key,
            public_key_data,
            created_at: OffsetDateTime::now_utc(),
        })
    }

    /// Builds the signing key described by configuration.
    ///
    /// # Errors
    /// Returns an error if the configured key material is missing or invalid.
    pub fn from_config(config: &SigningConfig) -> Result<Self, JwtError> {
        let algorithm = config
            .parsed_algorithm()
            .map_err(|e| JwtError::invalid_key(e.to_string()))?;
        let kid = config
            .key_id
            .clone()
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

        if algorithm.is_hmac() {
            let secret = config
                .secret
                .as_deref()
                .ok_or_else(|| JwtError::invalid_key("signing.secret is required for HS256"))?;
            return Self::from_secret(kid, secret.as_bytes());
        }

        match config.private_key_pem.as_deref() {
            Some(pem) => Self::from_pem(kid, algorithm, pem, config.public_key_pem.as_deref()),
            None if config.generate_ephemeral => {
                warn!(
                    algorithm = %algorithm,
                    "No signing key configured, generating an ephemeral key pair"
                );
                Self::generate(algorithm).map(|key| key.with_kid(kid))
            }
            None => Err(JwtError::invalid_key("no signing key configured")),
        }
    }

    /// Replaces the key ID.
    #[must_use]
    pub fn with_kid(mut self, kid: impl Into<String>) -> Self {
        self.kid = kid.into();
        self
    }

    /// Returns the verification half of this key.
    #[must_use]
    pub fn verification_key(&self) -> VerificationKey {
        VerificationKey {
            kid: self.kid.clone(),
            algorithm: self.algorithm,
            decoding_key: self.decoding_key.clone(),
            public_key_data: self.public_key_data.clone(),
        }
    }

    /// Exports the public key as a JWK. Shared secrets have none.
    #[must_use]
    pub fn to_jwk(&self) -> Option<Jwk> {
        self.public_key_data.to_jwk(&self.kid, self.algorithm)
    }
}

impl fmt::Debug for SigningKeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SigningKeyPair")
            .field("kid", &self.kid)
            .field("algorithm", &self.algorithm)
            .field("created_at", &self.created_at)
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Verification Key
// ============================================================================

/// A key that verifies but no longer signs, kept after a rotation.
#[derive(Clone)]
pub struct VerificationKey {
    /// Key ID.
    pub kid: String,

    /// Algorithm the key verifies.
    pub algorithm: SigningAlgorithm,

    decoding_key: DecodingKey,

    public_key_data: PublicKeyData,
}

impl VerificationKey {
    /// Creates an HS256 verification key from a shared secret.
    #[must_use]
    pub fn from_secret(kid: impl Into<String>, secret: &[u8]) -> Self {
        Self {
            kid: kid.into(),
            algorithm: SigningAlgorithm::HS256,
            decoding_key: DecodingKey::from_secret(secret),
            public_key_data: PublicKeyData::Symmetric,
        }
    }

    /// Loads a public key from SPKI PEM.
    ///
    /// # Errors
    /// Returns an error if the PEM data is invalid or the algorithm is HS256.
    pub fn from_public_pem(
        kid: impl Into<String>,
        algorithm: SigningAlgorithm,
        public_pem: &str,
    ) -> Result<Self, JwtError> {
        let (decoding_key, public_key_data) = if algorithm.is_rsa() {
            let public_key = RsaPublicKey::from_public_key_pem(public_pem)
                .map_err(|e| JwtError::invalid_key(e.to_string()))?;
            rsa_decoding_parts(&public_key)?
        } else if algorithm.is_ec() {
            let verifying_key = EcVerifyingKey::from_public_key_pem(public_pem)
                .map_err(|e| JwtError::invalid_key(e.to_string()))?;
            ec_decoding_parts(&verifying_key)?
        } else {
            return Err(JwtError::invalid_key(format!(
                "Algorithm {} does not use PEM keys",
                algorithm
            )));
        };

        Ok(Self {
            kid: kid.into(),
            algorithm,
            decoding_key,
            public_key_data,
        })
    }

    /// Builds a retired key from configuration.
    ///
    /// # Errors
    /// Returns an error if the key material is missing or invalid.
    pub fn from_config(
        algorithm: SigningAlgorithm,
        config: &RetiredKeyConfig,
    ) -> Result<Self, JwtError> {
        if algorithm.is_hmac() {
            let secret = config.secret.as_deref().ok_or_else(|| {
                JwtError::invalid_key(format!("retired key '{}' has no secret", config.kid))
            })?;
            return Ok(Self::from_secret(config.kid.clone(), secret.as_bytes()));
        }

        let pem = config.public_key_pem.as_deref().ok_or_else(|| {
            JwtError::invalid_key(format!("retired key '{}' has no public key", config.kid))
        })?;
        Self::from_public_pem(config.kid.clone(), algorithm, pem)
    }

    /// Exports the public key as a JWK. Shared secrets have none.
    #[must_use]
    pub fn to_jwk(&self) -> Option<Jwk> {
        self.public_key_data.to_jwk(&self.kid, self.algorithm)
    }
}

impl fmt::Debug for VerificationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VerificationKey")
            .field("kid", &self.kid)
            .field("algorithm", &self.algorithm)
            .finish_non_exhaustive()
    }
}

// ============================================================================
// JWT Service
// ============================================================================

/// Active signing key plus retained verification keys.
struct KeyRing {
    active: Arc<SigningKeyPair>,
    retired: Vec<VerificationKey>,
}

impl KeyRing {
    fn decoding_key(&self, kid: &str) -> Option<&DecodingKey> {
        if self.active.kid == kid {
            return Some(&self.active.decoding_key);
        }
        self.retired
            .iter()
            .find(|key| key.kid == kid)
            .map(|key| &key.decoding_key)
    }
}

/// Service for encoding and decoding JWT tokens.
///
/// This service is thread-safe (`Send + Sync`) and can be shared across
/// async tasks. The key ring is swapped atomically on rotation; decoding
/// never waits on a lock.
pub struct JwtService {
    keys: ArcSwap<KeyRing>,
    algorithm: SigningAlgorithm,
    issuer: String,
    audience: String,
}

impl JwtService {
    /// Creates a new JWT service.
    ///
    /// # Arguments
    /// * `signing_key` - The key to sign with; its algorithm becomes the pinned algorithm
    /// * `issuer` - The `iss` value issued and required
    /// * `audience` - The `aud` value issued and required
    #[must_use]
    pub fn new(
        signing_key: SigningKeyPair,
        issuer: impl Into<String>,
        audience: impl Into<String>,
    ) -> Self {
        Self {
            algorithm: signing_key.algorithm,
            keys: ArcSwap::from_pointee(KeyRing {
                active: Arc::new(signing_key),
                retired: Vec::new(),
            }),
            issuer: issuer.into(),
            audience: audience.into(),
        }
    }

    /// Builds the service from the signing section of the configuration.
    ///
    /// # Errors
    /// Returns an error if any configured key is missing or invalid.
    pub fn from_config(
        config: &SigningConfig,
        issuer: impl Into<String>,
        audience: impl Into<String>,
    ) -> Result<Self, JwtError> {
        let signing_key = SigningKeyPair::from_config(config)?;
        let algorithm = signing_key.algorithm;
        let retired = config
            .retired_keys
            .iter()
            .map(|retired| VerificationKey::from_config(algorithm, retired))
            .collect::<Result<Vec<_>, _>>()?;

        let service = Self::new(signing_key, issuer, audience);
        service.retain_keys(retired)?;
        Ok(service)
    }

    /// Adds verification-only keys.
    ///
    /// # Errors
    /// Returns an error if a key's algorithm differs from the pinned one.
    pub fn retain_keys(&self, keys: Vec<VerificationKey>) -> Result<(), JwtError> {
        if let Some(key) = keys.iter().find(|key| key.algorithm != self.algorithm) {
            return Err(JwtError::invalid_key(format!(
                "retained key '{}' uses {}, expected {}",
                key.kid, key.algorithm, self.algorithm
            )));
        }

        self.keys.rcu(|ring| {
            let mut retired = ring.retired.clone();
            retired.extend(keys.iter().cloned());
            KeyRing {
                active: ring.active.clone(),
                retired,
            }
        });
        Ok(())
    }

    /// Makes `signing_key` the active key. The previous key keeps verifying
    /// until [`retire_key`](Self::retire_key) drops it.
    ///
    /// # Errors
    /// Returns an error if the key's algorithm differs from the pinned one.
    pub fn rotate_key(&self, signing_key: SigningKeyPair) -> Result<(), JwtError> {
        if signing_key.algorithm != self.algorithm {
            return Err(JwtError::invalid_key(format!(
                "new key uses {}, expected {}",
                signing_key.algorithm, self.algorithm
            )));
        }

        let new_kid = signing_key.kid.clone();
        let active = Arc::new(signing_key);
        self.keys.rcu(|ring| {
            let mut retired = Vec::with_capacity(ring.retired.len() + 1);
            retired.push(ring.active.verification_key());
            retired.extend(ring.retired.iter().cloned());
            KeyRing {
                active: active.clone(),
                retired,
            }
        });

        info!(kid = %new_kid, "Signing key rotated");
        Ok(())
    }

    /// Stops accepting tokens signed by a retained key.
    ///
    /// Returns `true` if the key was retained.
    pub fn retire_key(&self, kid: &str) -> bool {
        let mut removed = false;
        self.keys.rcu(|ring| {
            let retired: Vec<_> = ring
                .retired
                .iter()
                .filter(|key| key.kid != kid)
                .cloned()
                .collect();
            removed = retired.len() != ring.retired.len();
            KeyRing {
                active: ring.active.clone(),
                retired,
            }
        });
        removed
    }

    /// Encodes claims into a JWT string with the active key.
    ///
    /// # Errors
    /// Returns an error if encoding fails.
    pub fn encode<T: Serialize>(&self, claims: &T) -> Result<String, JwtError> {
        let ring = self.keys.load();
        let mut header = Header::new(self.algorithm.to_jwt_algorithm());
        header.kid = Some(ring.active.kid.clone());

        encode(&header, claims, &ring.active.encoding_key)
            .map_err(|e| JwtError::encoding_error(e.to_string()))
    }

    /// Decodes a JWT string and checks its signature, issuer and audience.
    ///
    /// Time-based claims are not checked here; callers compare `exp` and
    /// `nbf` against their own clock.
    ///
    /// # Errors
    /// Returns an error if the header, key lookup, signature or claims fail.
    pub fn decode<T: DeserializeOwned>(&self, token: &str) -> Result<TokenData<T>, JwtError> {
        let header = decode_header(token)?;
        let expected = self.algorithm.to_jwt_algorithm();
        if header.alg != expected {
            return Err(JwtError::AlgorithmMismatch {
                expected: self.algorithm.as_str().to_string(),
                found: format!("{:?}", header.alg),
            });
        }

        let kid = header.kid.ok_or(JwtError::MissingKeyId)?;
        let ring = self.keys.load();
        let decoding_key = ring
            .decoding_key(&kid)
            .ok_or_else(|| JwtError::key_not_found(&kid))?;

        let mut validation = Validation::new(expected);
        validation.set_issuer(&[&self.issuer]);
        validation.set_audience(&[&self.audience]);
        validation.set_required_spec_claims(&["exp", "iss", "aud", "sub"]);
        validation.validate_exp = false;
        validation.validate_nbf = false;

        decode(token, decoding_key, &validation).map_err(JwtError::from)
    }

    /// Returns the pinned algorithm.
    #[must_use]
    pub fn algorithm(&self) -> SigningAlgorithm {
        self.algorithm
    }

    /// Returns the current signing key ID.
    #[must_use]
    pub fn current_kid(&self) -> String {
        self.keys.load().active.kid.clone()
    }

    /// Returns the issuer.
    #[must_use]
    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    /// Returns the audience.
    #[must_use]
    pub fn audience(&self) -> &str {
        &self.audience
    }

    /// Returns the JWKS containing the active and retained public keys.
    #[must_use]
    pub fn jwks(&self) -> Jwks {
        let ring = self.keys.load();
        let keys = std::iter::once(ring.active.to_jwk())
            .chain(ring.retired.iter().map(VerificationKey::to_jwk))
            .flatten()
            .collect();
        Jwks { keys }
    }
}

impl fmt::Debug for JwtService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JwtService")
            .field("algorithm", &self.algorithm)
            .field("issuer", &self.issuer)
            .field("audience", &self.audience)
            .field("kid", &self.current_kid())
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Tests
// ============================================================================
