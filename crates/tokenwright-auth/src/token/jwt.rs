//! JWT signing.
//!
//! The grant handlers only see the [`TokenSigner`] trait. [`JwtService`] is the
//! `jsonwebtoken` backed implementation, holding one key pair that is shared
//! read-only across concurrent requests.
//!
//! ## Supported Algorithms
//!
//! - **RS256**: RSA with SHA-256
//! - **RS384**: RSA with SHA-384
//! - **ES384**: ECDSA with the P-384 curve
//!
//! ## Example
//!
//! ```ignore
//! use tokenwright_auth::token::jwt::{JwtService, SigningKeyPair, SigningAlgorithm, TokenSigner};
//!
//! let key_pair = SigningKeyPair::generate_ec()?;
//! let signer = JwtService::new(key_pair);
//!
//! let jwt = signer.sign(&claims, Some("at+jwt"))?;
//! let verified = signer.verify(&jwt)?;
//! ```

use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use p384::SecretKey as EcSecretKey;
use p384::ecdsa::SigningKey as EcSigningKey;
use p384::pkcs8::EncodePrivateKey as EcEncodePrivateKey;
use rand::rngs::OsRng;
use rsa::RsaPrivateKey;
use rsa::pkcs8::{EncodePublicKey, LineEnding};
use serde::{Deserialize, Serialize};

use crate::config::SigningConfig;

/// A JWT claim set.
pub type Claims = serde_json::Map<String, serde_json::Value>;

// ============================================================================
// Error Types
// ============================================================================

/// Failures of signing, verification and key handling.
#[derive(Debug, thiserror::Error)]
pub enum JwtError {
    #[error("cannot sign token: {0}")]
    Signing(String),

    #[error("malformed token: {0}")]
    Malformed(String),

    #[error("invalid signature")]
    InvalidSignature,

    #[error("cannot generate key: {0}")]
    KeyGeneration(String),

    #[error("invalid key: {0}")]
    InvalidKey(String),
}

impl JwtError {
    /// Whether a presented token was refused.
    #[must_use]
    pub fn is_rejected(&self) -> bool {
        matches!(self, Self::Malformed(_) | Self::InvalidSignature)
    }

    /// Whether the signing key is at fault.
    #[must_use]
    pub fn is_key_error(&self) -> bool {
        matches!(self, Self::KeyGeneration(_) | Self::InvalidKey(_))
    }
}

impl From<jsonwebtoken::errors::Error> for JwtError {
    fn from(err: jsonwebtoken::errors::Error) -> Self {
        use jsonwebtoken::errors::ErrorKind;

        match err.kind() {
            ErrorKind::InvalidSignature => Self::InvalidSignature,
            ErrorKind::InvalidRsaKey(_) | ErrorKind::InvalidEcdsaKey | ErrorKind::InvalidKeyFormat => {
                Self::InvalidKey(err.to_string())
            }
            _ => Self::Malformed(err.to_string()),
        }
    }
}

// ============================================================================
// Signer Trait
// ============================================================================

/// Signs claim sets into compact JWTs and verifies tokens this issuer signed.
///
/// Implementations must be safe to share across concurrent requests.
pub trait TokenSigner: Send + Sync {
    /// Sign a claim set, optionally setting the `typ` header.
    ///
    /// # Errors
    /// Returns an error if the claims cannot be signed.
    fn sign(&self, claims: &Claims, token_type: Option<&str>) -> Result<String, JwtError>;

    /// Verify the signature of a compact JWT and return its claims.
    ///
    /// Expiry is not checked: callers resolve tokens through the store, which
    /// owns their lifetime.
    ///
    /// # Errors
    /// Returns an error if the token is malformed or the signature is invalid.
    fn verify(&self, token: &str) -> Result<Claims, JwtError>;
}

// ============================================================================
// Signing Algorithm
// ============================================================================

/// Supported signing algorithms for JWT tokens.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum SigningAlgorithm {
    /// RSA with SHA-256.
    #[default]
    RS256,
    /// RSA with SHA-384.
    RS384,
    /// ECDSA with P-384 curve.
    ES384,
}

impl SigningAlgorithm {
    /// Converts to the `jsonwebtoken` Algorithm type.
    #[must_use]
    pub fn to_jwt_algorithm(self) -> Algorithm {
        match self {
            Self::RS256 => Algorithm::RS256,
            Self::RS384 => Algorithm::RS384,
            Self::ES384 => Algorithm::ES384,
        }
    }

    /// Returns the algorithm name as used in JWT headers.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RS256 => "RS256",
            Self::RS384 => "RS384",
            Self::ES384 => "ES384",
        }
    }

    /// Returns `true` if this is an RSA-based algorithm.
    #[must_use]
    pub fn is_rsa(&self) -> bool {
        matches!(self, Self::RS256 | Self::RS384)
    }
}

impl fmt::Display for SigningAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for SigningAlgorithm {
    type Err = JwtError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "RS256" => Ok(Self::RS256),
            "RS384" => Ok(Self::RS384),
            "ES384" => Ok(Self::ES384),
            other => Err(JwtError::InvalidKey(format!(
                "unsupported signing algorithm {other}"
            ))),
        }
    }
}

// ============================================================================
// Signing Key Pair
// ============================================================================

/// A signing key pair for JWT operations.
#[derive(Debug)]
pub struct SigningKeyPair {
    /// Key ID, published in the `kid` header.
    pub kid: String,

    /// Signing algorithm.
    pub algorithm: SigningAlgorithm,

    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
}

impl SigningKeyPair {
    /// Generates a new 2048-bit RSA key pair.
    ///
    /// # Errors
    /// Returns an error if key generation fails or algorithm is not RSA-based.
    pub fn generate_rsa(algorithm: SigningAlgorithm) -> Result<Self, JwtError> {
        if !algorithm.is_rsa() {
            return Err(JwtError::InvalidKey(format!(
                "Algorithm {algorithm} is not RSA-based"
            )));
        }

        let private_key = RsaPrivateKey::new(&mut OsRng, 2048)
            .map_err(|e| JwtError::KeyGeneration(e.to_string()))?;
        let private_pem = private_key
            .to_pkcs8_pem(LineEnding::LF)
            .map_err(|e| JwtError::KeyGeneration(e.to_string()))?;
        let public_pem = private_key
            .to_public_key()
            .to_public_key_pem(LineEnding::LF)
            .map_err(|e| JwtError::KeyGeneration(e.to_string()))?;

        Self::from_pem(
            uuid::Uuid::new_v4().to_string(),
            algorithm,
            &private_pem,
            &public_pem,
        )
    }

    /// Generates a new EC key pair on the P-384 curve.
    ///
    /// # Errors
    /// Returns an error if key generation fails.
    pub fn generate_ec() -> Result<Self, JwtError> {
        let secret_key = EcSecretKey::random(&mut OsRng);
        let private_pem = secret_key
            .to_pkcs8_pem(LineEnding::LF)
            .map_err(|e| JwtError::KeyGeneration(e.to_string()))?;
        let encoding_key = EncodingKey::from_ec_pem(private_pem.as_bytes())
            .map_err(|e| JwtError::KeyGeneration(e.to_string()))?;
        let decoding_key = ec_decoding_key(&secret_key)?;

        Ok(Self {
            kid: uuid::Uuid::new_v4().to_string(),
            algorithm: SigningAlgorithm::ES384,
            encoding_key,
            decoding_key,
        })
    }

    /// Loads a key pair from PEM strings.
    ///
    /// For ES384 the public key is derived from the private key and
    /// `public_pem` is ignored.
    ///
    /// # Errors
    /// Returns an error if the PEM data is invalid.
    pub fn from_pem(
        kid: impl Into<String>,
        algorithm: SigningAlgorithm,
        private_pem: &str,
        public_pem: &str,
    ) -> Result<Self, JwtError> {
        let (encoding_key, decoding_key) = if algorithm.is_rsa() {
            let encoding_key = EncodingKey::from_rsa_pem(private_pem.as_bytes())
                .map_err(|e| JwtError::InvalidKey(e.to_string()))?;
            let decoding_key = DecodingKey::from_rsa_pem(public_pem.as_bytes())
                .map_err(|e| JwtError::InvalidKey(e.to_string()))?;
            (encoding_key, decoding_key)
        } else {
            let encoding_key = EncodingKey::from_ec_pem(private_pem.as_bytes())
                .map_err(|e| JwtError::InvalidKey(e.to_string()))?;
            let secret_key = EcSecretKey::from_sec1_pem(private_pem)
                .or_else(|_| {
                    use p384::pkcs8::DecodePrivateKey;
                    EcSecretKey::from_pkcs8_pem(private_pem)
                })
                .map_err(|e| JwtError::InvalidKey(e.to_string()))?;
            (encoding_key, ec_decoding_key(&secret_key)?)
        };

        Ok(Self {
            kid: kid.into(),
            algorithm,
            encoding_key,
            decoding_key,
        })
    }

    /// Loads or generates a key pair as described by the signing configuration.
    ///
    /// Without key paths an ephemeral key is generated; tokens signed with it
    /// do not survive a restart.
    ///
    /// # Errors
    /// Returns an error if a key file cannot be read or parsed.
    pub fn from_config(config: &SigningConfig) -> Result<Self, JwtError> {
        let Some(private_path) = &config.private_key_pem_path else {
            tracing::warn!(
                algorithm = %config.algorithm,
                "No signing key configured, generating an ephemeral key"
            );
            return match config.algorithm {
                SigningAlgorithm::ES384 => Self::generate_ec(),
                algorithm => Self::generate_rsa(algorithm),
            };
        };

        let private_pem = std::fs::read_to_string(private_path).map_err(|e| {
            JwtError::InvalidKey(format!("cannot read {}: {e}", private_path.display()))
        })?;
        let public_pem = match &config.public_key_pem_path {
            Some(path) => std::fs::read_to_string(path).map_err(|e| {
                JwtError::InvalidKey(format!("cannot read {}: {e}", path.display()))
            })?,
            None if config.algorithm.is_rsa() => {
                return Err(JwtError::InvalidKey(
                    "RSA signing requires public_key_pem_path".into(),
                ));
            }
            None => String::new(),
        };
        let kid = config
            .key_id
            .clone()
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

        Self::from_pem(kid, config.algorithm, &private_pem, &public_pem)
    }
}

fn ec_decoding_key(secret_key: &EcSecretKey) -> Result<DecodingKey, JwtError> {
    let signing_key = EcSigningKey::from(secret_key);
    let point = signing_key.verifying_key().to_encoded_point(false);
    let x = point
        .x()
        .ok_or_else(|| JwtError::InvalidKey("Missing x coordinate".into()))?;
    let y = point
        .y()
        .ok_or_else(|| JwtError::InvalidKey("Missing y coordinate".into()))?;

    let x_b64 = URL_SAFE_NO_PAD.encode(x.as_slice());
    let y_b64 = URL_SAFE_NO_PAD.encode(y.as_slice());
    DecodingKey::from_ec_components(&x_b64, &y_b64).map_err(|e| JwtError::InvalidKey(e.to_string()))
}

// ============================================================================
// JWT Service
// ============================================================================

/// `jsonwebtoken` backed [`TokenSigner`].
///
/// This service is thread-safe (`Send + Sync`) and can be shared across
/// async tasks.
pub struct JwtService {
    signing_key: SigningKeyPair,
}

impl JwtService {
    /// Creates a new JWT service.
    #[must_use]
    pub fn new(signing_key: SigningKeyPair) -> Self {
        Self { signing_key }
    }

    /// Returns the current signing key ID.
    #[must_use]
    pub fn current_kid(&self) -> &str {
        &self.signing_key.kid
    }

    /// Returns the signing algorithm.
    #[must_use]
    pub fn algorithm(&self) -> SigningAlgorithm {
        self.signing_key.algorithm
    }
}

impl TokenSigner for JwtService {
    fn sign(&self, claims: &Claims, token_type: Option<&str>) -> Result<String, JwtError> {
        let mut header = Header::new(self.signing_key.algorithm.to_jwt_algorithm());
        header.kid = Some(self.signing_key.kid.clone());
        if let Some(typ) = token_type {
            header.typ = Some(typ.to_string());
        }

        encode(&header, claims, &self.signing_key.encoding_key)
            .map_err(|e| JwtError::Signing(e.to_string()))
    }

    fn verify(&self, token: &str) -> Result<Claims, JwtError> {
        let mut validation = Validation::new(self.signing_key.algorithm.to_jwt_algorithm());
        validation.validate_exp = false;
        validation.validate_aud = false;
        validation.required_spec_claims = HashSet::new();

        decode::<Claims>(token, &self.signing_key.decoding_key, &validation)
            .map(|data| data.claims)
            .map_err(JwtError::from)
    }
}

// ============================================================================
// Tests
// ============================================================================
