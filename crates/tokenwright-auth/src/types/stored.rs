//! Persisted token records.

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use super::grant::EntityId;
use super::token::OAuthToken;

/// A code, access token or refresh token as held by the token store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredToken {
    /// Lookup key: the code or token value, or the `jti` of a JWT access token.
    pub key: String,

    /// Entity the grant belongs to.
    pub owner: EntityId,

    /// Internal record the artifact was minted from.
    pub token: OAuthToken,

    /// When the artifact was created.
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,

    /// When the artifact expires (None = no expiration).
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        with = "time::serde::rfc3339::option"
    )]
    pub expires_at: Option<OffsetDateTime>,
}

impl StoredToken {
    /// Create a record.
    #[must_use]
    pub fn new(
        key: impl Into<String>,
        owner: EntityId,
        token: OAuthToken,
        created_at: OffsetDateTime,
        expires_at: Option<OffsetDateTime>,
    ) -> Self {
        Self {
            key: key.into(),
            owner,
            token,
            created_at,
            expires_at,
        }
    }

    /// Returns `true` if the record has expired at `now`.
    #[must_use]
    pub fn is_expired_at(&self, now: OffsetDateTime) -> bool {
        self.expires_at.is_some_and(|exp| now >= exp)
    }

    /// Returns `true` if the record belongs to `owner`'s grant for `client`,
    /// optionally restricted to one rotation chain.
    #[must_use]
    pub fn belongs_to(&self, client: EntityId, owner: EntityId, chain: Option<&str>) -> bool {
        self.owner == owner
            && self.token.client_id == client
            && chain.is_none_or(|c| self.token.first_refresh_rolling_token.as_deref() == Some(c))
    }
}

/// Lowercase hex SHA-256 of a token value.
///
/// Stores key records by this digest so that a leaked store does not leak
/// usable tokens.
#[must_use]
pub fn hash_token(token: &str) -> String {
    use sha2::{Digest, Sha256};
    hex::encode(Sha256::digest(token.as_bytes()))
}

/// A fresh opaque token value: 32 random bytes, base64url without padding.
#[must_use]
pub fn generate_token_value() -> String {
    use base64::Engine;
    base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(rand::random::<[u8; 32]>())
}
