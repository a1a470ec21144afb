//! Access token minting.
//!
//! An access token is either an opaque bearer value or a signed JWT. Which
//! one is minted is decided per request by [`AccessTokenFormat::uses_jwt`].

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::error::{GrantError, GrantResult};
use crate::types::{OAuthToken, generate_token_value};

use super::jwt::{Claims, TokenSigner};

/// `typ` header of JWT access tokens (RFC 9068).
pub const JWT_ACCESS_TOKEN_TYPE: &str = "at+jwt";

/// Media types that select a JWT access token under
/// [`AccessTokenFormat::AsRequested`].
pub const JWT_MEDIA_TYPES: [&str; 2] = ["application/at+jwt", "application/jwt"];

/// Configured access token format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AccessTokenFormat {
    /// Opaque bearer tokens.
    #[default]
    Plain,
    /// Signed JWT access tokens.
    Jwt,
    /// JWT when the request's accept hint names a JWT media type, else plain.
    AsRequested,
}

impl AccessTokenFormat {
    /// Returns `true` if a JWT should be minted for the given accept hint.
    #[must_use]
    pub fn uses_jwt(self, accept: Option<&str>) -> bool {
        match self {
            Self::Plain => false,
            Self::Jwt => true,
            Self::AsRequested => accept.is_some_and(|hint| {
                let hint = hint.to_ascii_lowercase();
                JWT_MEDIA_TYPES.iter().any(|m| hint.contains(m))
            }),
        }
    }
}

/// A minted access token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AccessToken {
    /// Opaque bearer value.
    Bearer {
        /// Token value.
        value: String,
    },
    /// Signed JWT.
    Jwt {
        /// Compact serialization.
        value: String,
        /// The `jti` claim.
        jti: String,
    },
}

impl AccessToken {
    /// The value handed to the client.
    #[must_use]
    pub fn value(&self) -> &str {
        match self {
            Self::Bearer { value } | Self::Jwt { value, .. } => value,
        }
    }

    /// Store key: the `jti` for JWTs, the raw value otherwise.
    #[must_use]
    pub fn key(&self) -> &str {
        match self {
            Self::Bearer { value } => value,
            Self::Jwt { jti, .. } => jti,
        }
    }

    /// Returns `true` for JWT access tokens.
    #[must_use]
    pub fn is_jwt(&self) -> bool {
        matches!(self, Self::Jwt { .. })
    }
}

/// Returns `true` if the value looks like a compact JWS (three segments).
#[must_use]
pub fn is_compact_jwt(value: &str) -> bool {
    let mut parts = value.split('.');
    let segments = [parts.next(), parts.next(), parts.next()];
    parts.next().is_none() && segments.iter().all(|s| s.is_some_and(|s| !s.is_empty()))
}

/// Renders an audience list as the `aud` claim: a string for one value, an
/// array otherwise.
#[must_use]
pub fn audience_claim(audience: &[String]) -> Value {
    match audience {
        [single] => Value::String(single.clone()),
        many => Value::Array(many.iter().cloned().map(Value::String).collect()),
    }
}

/// Mints access tokens in the configured format.
#[derive(Clone)]
pub struct AccessTokenFactory {
    format: AccessTokenFormat,
    signer: Arc<dyn TokenSigner>,
}

impl AccessTokenFactory {
    /// Create a factory.
    #[must_use]
    pub fn new(format: AccessTokenFormat, signer: Arc<dyn TokenSigner>) -> Self {
        Self { format, signer }
    }

    /// The configured format.
    #[must_use]
    pub fn format(&self) -> AccessTokenFormat {
        self.format
    }

    /// Mint an access token for `token` issued at `issued_at`.
    ///
    /// # Errors
    ///
    /// - `invalid_request` if the stored user info is not a JSON object and
    ///   the token carries attributes
    /// - `server_error` if the JWT cannot be signed
    pub fn create(
        &self,
        token: &OAuthToken,
        issued_at: OffsetDateTime,
        accept: Option<&str>,
    ) -> GrantResult<AccessToken> {
        if !self.format.uses_jwt(accept) {
            return Ok(AccessToken::Bearer {
                value: generate_token_value(),
            });
        }

        let jti = Uuid::new_v4().to_string();
        let claims = jwt_claims(token, issued_at, &jti)?;
        let value = self
            .signer
            .sign(&claims, Some(JWT_ACCESS_TOKEN_TYPE))
            .map_err(|e| {
                tracing::error!(error = %e, "Cannot sign access token");
                GrantError::server_error("server configuration problem")
            })?;
        Ok(AccessToken::Jwt { value, jti })
    }

    /// Resolve a presented access token to its store key.
    ///
    /// JWTs are verified against the issuer key and keyed by `jti`; any other
    /// value is its own key.
    ///
    /// # Errors
    ///
    /// Returns `invalid_request` with `"wrong subject_token"` if a JWT fails
    /// verification or has no `jti`.
    pub fn resolve_key(&self, presented: &str) -> GrantResult<String> {
        if !is_compact_jwt(presented) {
            return Ok(presented.to_string());
        }
        let claims = self.signer.verify(presented).map_err(|e| {
            tracing::debug!(error = %e, "Presented JWT failed verification");
            GrantError::invalid_request("wrong subject_token")
        })?;
        match claims.get("jti") {
            Some(Value::String(jti)) => Ok(jti.clone()),
            _ => Err(GrantError::invalid_request("wrong subject_token")),
        }
    }
}

impl std::fmt::Debug for AccessTokenFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccessTokenFactory")
            .field("format", &self.format)
            .finish_non_exhaustive()
    }
}

fn jwt_claims(token: &OAuthToken, issued_at: OffsetDateTime, jti: &str) -> GrantResult<Claims> {
    let iat = issued_at.unix_timestamp();
    let exp = iat.saturating_add(i64::try_from(token.token_validity).unwrap_or(i64::MAX));

    let mut claims = Claims::new();
    claims.insert("sub".into(), Value::String(token.subject.clone()));
    claims.insert("iss".into(), Value::String(token.issuer_uri.clone()));
    claims.insert("aud".into(), audience_claim(&token.audience_or_client()));
    claims.insert("iat".into(), Value::from(iat));
    claims.insert("exp".into(), Value::from(exp));
    claims.insert("jti".into(), Value::String(jti.to_string()));
    claims.insert("scope".into(), Value::String(token.effective_scope_string()));
    claims.insert("client_id".into(), Value::String(token.client_username.clone()));

    if token.attributes_in_access_token {
        if let Some(user_info) = &token.user_info {
            let attributes: Claims = serde_json::from_str(user_info).map_err(|e| {
                tracing::debug!(error = %e, "Stored user info is not a claim set");
                GrantError::invalid_request("Invalid user info claim set")
            })?;
            for (name, value) in attributes {
                claims.entry(name).or_insert(value);
            }
        }
    }
    Ok(claims)
}
