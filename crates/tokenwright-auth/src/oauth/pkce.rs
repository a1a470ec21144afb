//! PKCE (Proof Key for Code Exchange) verification.
//!
//! Implements RFC 7636 with both the `plain` and `S256` methods. A code whose
//! challenge was stored without a method is treated as `plain`, as the RFC
//! prescribes for authorization requests that omit `code_challenge_method`.
//!
//! # Example
//!
//! ```
//! use tokenwright_auth::oauth::{PkceChallenge, PkceChallengeMethod, PkceVerifier};
//!
//! let verifier = PkceVerifier::generate();
//! let challenge = PkceChallenge::from_verifier(&verifier, PkceChallengeMethod::S256);
//!
//! assert!(challenge.verify(&verifier, PkceChallengeMethod::S256).is_ok());
//! ```

use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

/// Maximum verifier length allowed by RFC 7636.
pub const MAX_VERIFIER_LENGTH: usize = 128;

/// Why a verifier was refused.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PkceError {
    /// Empty, or longer than [`MAX_VERIFIER_LENGTH`].
    #[error("code_verifier must be 1 to 128 characters long, got {0}")]
    VerifierLength(usize),

    /// A character outside `[A-Za-z0-9-._~]`.
    #[error("code_verifier contains a character outside the unreserved set")]
    VerifierCharset,

    #[error("unknown code_challenge_method {0:?}")]
    UnknownMethod(String),

    /// The verifier does not hash to the stored challenge.
    #[error("code_verifier does not match the code_challenge")]
    Mismatch,
}

impl PkceError {
    /// Returns `true` if the verifier could not be parsed at all.
    #[must_use]
    pub fn is_malformed_verifier(&self) -> bool {
        matches!(self, Self::VerifierLength(_) | Self::VerifierCharset)
    }
}

// =============================================================================
// PKCE Challenge Method
// =============================================================================

/// How a challenge was derived from its verifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum PkceChallengeMethod {
    /// The challenge is the verifier itself.
    #[default]
    Plain,
    /// SHA-256 hash of the verifier, base64url encoded without padding.
    S256,
}

impl PkceChallengeMethod {
    /// Parse a `code_challenge_method` value. Names are case-sensitive.
    ///
    /// # Errors
    ///
    /// Returns `PkceError::UnknownMethod` for anything but `plain`/`S256`.
    pub fn parse(method: &str) -> Result<Self, PkceError> {
        match method {
            "plain" => Ok(Self::Plain),
            "S256" => Ok(Self::S256),
            other => Err(PkceError::UnknownMethod(other.to_string())),
        }
    }

    /// Resolve an optional stored method, falling back to `plain`.
    ///
    /// # Errors
    ///
    /// Returns `PkceError::UnknownMethod` for unknown method names.
    pub fn parse_or_default(method: Option<&str>) -> Result<Self, PkceError> {
        method
            .filter(|m| !m.is_empty())
            .map_or(Ok(Self::default()), Self::parse)
    }

    /// Wire name of the method.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Plain => "plain",
            Self::S256 => "S256",
        }
    }
}

impl std::fmt::Display for PkceChallengeMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// PKCE Verifier
// =============================================================================

/// PKCE code verifier as presented at the token endpoint.
///
/// Uses the RFC 7636 §4.1 unreserved characters
/// `[A-Z] / [a-z] / [0-9] / "-" / "." / "_" / "~"`. The 43 character lower
/// bound is not enforced at the token endpoint.
#[derive(Debug, Clone)]
pub struct PkceVerifier(String);

impl PkceVerifier {
    /// Create a verifier from a presented string.
    ///
    /// # Errors
    ///
    /// Returns an error if the verifier is empty, longer than 128 characters
    /// or contains characters outside the unreserved set.
    pub fn new(verifier: impl Into<String>) -> Result<Self, PkceError> {
        let verifier = verifier.into();
        if !(1..=MAX_VERIFIER_LENGTH).contains(&verifier.len()) {
            return Err(PkceError::VerifierLength(verifier.len()));
        }
        if !verifier.bytes().all(is_unreserved) {
            return Err(PkceError::VerifierCharset);
        }
        Ok(Self(verifier))
    }

    /// A random 43-character verifier, as a client would create one.
    #[must_use]
    pub fn generate() -> Self {
        Self(URL_SAFE_NO_PAD.encode(rand::random::<[u8; 32]>()))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

fn is_unreserved(b: u8) -> bool {
    b.is_ascii_alphanumeric() || matches!(b, b'-' | b'.' | b'_' | b'~')
}

// =============================================================================
// PKCE Challenge
// =============================================================================

/// PKCE code challenge as stored with the authorization code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PkceChallenge(String);

impl PkceChallenge {
    /// Wrap a stored challenge value.
    #[must_use]
    pub fn new(challenge: impl Into<String>) -> Self {
        Self(challenge.into())
    }

    /// Compute the challenge for a verifier with the given method.
    ///
    /// `S256` computes `BASE64URL(SHA256(ASCII(code_verifier)))`.
    #[must_use]
    pub fn from_verifier(verifier: &PkceVerifier, method: PkceChallengeMethod) -> Self {
        match method {
            PkceChallengeMethod::Plain => Self(verifier.0.clone()),
            PkceChallengeMethod::S256 => {
                Self(URL_SAFE_NO_PAD.encode(Sha256::digest(verifier.0.as_bytes())))
            }
        }
    }

    /// Check `verifier` against this challenge in constant time.
    ///
    /// # Errors
    ///
    /// Returns `PkceError::Mismatch` if the verifier does not match.
    pub fn verify(
        &self,
        verifier: &PkceVerifier,
        method: PkceChallengeMethod,
    ) -> Result<(), PkceError> {
        let computed = Self::from_verifier(verifier, method);
        if computed.0.as_bytes().ct_eq(self.0.as_bytes()).into() {
            Ok(())
        } else {
            Err(PkceError::Mismatch)
        }
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // RFC 7636 Appendix B
    const RFC_VERIFIER: &str = "dBjftJeZ4CVP-mB92K27uhbUJU1p1r_wW1gFWFOEjXk";
    const RFC_CHALLENGE: &str = "E9Melhoa2OwvFrEMTJguCHaoeK1t8URWbuGJSstw-cM";

    #[test]
    fn test_s256_rfc_vector() {
        let verifier = PkceVerifier::new(RFC_VERIFIER).unwrap();
        let challenge = PkceChallenge::from_verifier(&verifier, PkceChallengeMethod::S256);
        assert_eq!(challenge.as_str(), RFC_CHALLENGE);

        let stored = PkceChallenge::new(RFC_CHALLENGE);
        assert!(stored.verify(&verifier, PkceChallengeMethod::S256).is_ok());
    }

    #[test]
    fn test_plain_method() {
        let verifier = PkceVerifier::new("xyz").unwrap();
        let stored = PkceChallenge::new("xyz");
        assert!(stored.verify(&verifier, PkceChallengeMethod::Plain).is_ok());

        let wrong = PkceVerifier::new("wrong").unwrap();
        assert!(matches!(
            stored.verify(&wrong, PkceChallengeMethod::Plain),
            Err(PkceError::Mismatch)
        ));
    }

    #[test]
    fn test_short_verifier_with_s256() {
        let verifier = PkceVerifier::new("xyz").unwrap();
        let stored = PkceChallenge::from_verifier(&verifier, PkceChallengeMethod::S256);
        assert!(stored.verify(&verifier, PkceChallengeMethod::S256).is_ok());

        let wrong = PkceVerifier::new("wrong").unwrap();
        assert_eq!(
            stored.verify(&wrong, PkceChallengeMethod::S256),
            Err(PkceError::Mismatch)
        );
    }

    #[test]
    fn test_method_mismatch_fails() {
        let verifier = PkceVerifier::new(RFC_VERIFIER).unwrap();
        let stored = PkceChallenge::new(RFC_CHALLENGE);
        assert!(stored.verify(&verifier, PkceChallengeMethod::Plain).is_err());
    }

    #[test]
    fn test_verifier_validation() {
        assert!(matches!(
            PkceVerifier::new(""),
            Err(PkceError::VerifierLength(0))
        ));
        assert!(matches!(
            PkceVerifier::new("a".repeat(129)),
            Err(PkceError::VerifierLength(129))
        ));
        assert!(PkceVerifier::new("a".repeat(128)).is_ok());
        assert!(PkceVerifier::new("has space").unwrap_err().is_malformed_verifier());
        assert!(PkceVerifier::new("abc+def").is_err());
        assert!(PkceVerifier::new("a-b.c_d~e").is_ok());
    }

    #[test]
    fn test_generated_verifiers_are_valid() {
        let first = PkceVerifier::generate();
        assert_eq!(first.as_str().len(), 43);
        assert!(PkceVerifier::new(first.as_str()).is_ok());
        assert_ne!(first.as_str(), PkceVerifier::generate().as_str());
    }

    #[test]
    fn test_method_parsing() {
        assert_eq!(PkceChallengeMethod::parse("S256").unwrap(), PkceChallengeMethod::S256);
        assert_eq!(PkceChallengeMethod::parse("plain").unwrap(), PkceChallengeMethod::Plain);
        assert!(PkceChallengeMethod::parse("s256").is_err());
        assert_eq!(
            PkceChallengeMethod::parse_or_default(None).unwrap(),
            PkceChallengeMethod::Plain
        );
        assert_eq!(
            PkceChallengeMethod::parse_or_default(Some("")).unwrap(),
            PkceChallengeMethod::Plain
        );
        assert_eq!(PkceChallengeMethod::S256.to_string(), "S256");
    }
}
