//! Re-derivation of OpenID Connect ID tokens.
//!
//! A refreshed or exchanged grant gets a fresh ID token built from the one
//! issued at authorization time: the nonce is carried over, issuer, audience
//! and lifetime come from the new grant.

use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use serde_json::Value;
use time::OffsetDateTime;

use crate::error::{GrantError, GrantResult};
use crate::types::OAuthToken;

use super::access::audience_claim;
use super::jwt::{Claims, JwtError, TokenSigner};

/// Claims owned by the ID token itself; user info never replaces them.
const REGISTERED_CLAIMS: [&str; 6] = ["iss", "sub", "aud", "exp", "iat", "nonce"];

/// Decode the claims of a compact JWT without checking its signature.
///
/// Only used on ID tokens read back from this issuer's own store.
///
/// # Errors
///
/// Returns `JwtError::Malformed` if the value is not a JWT with a JSON
/// object payload.
pub fn decode_unverified(token: &str) -> Result<Claims, JwtError> {
    let mut parts = token.split('.');
    let payload = match (parts.next(), parts.next(), parts.next(), parts.next()) {
        (Some(_), Some(payload), Some(_), None) => payload,
        _ => return Err(JwtError::Malformed("not a compact JWT".into())),
    };
    let bytes = URL_SAFE_NO_PAD
        .decode(payload)
        .map_err(|e| JwtError::Malformed(e.to_string()))?;
    serde_json::from_slice(&bytes).map_err(|e| JwtError::Malformed(e.to_string()))
}

/// Whether user-info claims go into a re-derived ID token.
///
/// Records carrying the explicit flag follow it. Older records fall back to
/// the original `response_type`: only a pure `id_token` flow embeds claims.
#[must_use]
pub fn user_info_in_id_token(token: &OAuthToken) -> bool {
    match token.attributes_in_id_token {
        Some(flag) => flag,
        None => token.response_type.as_deref().is_some_and(|rt| {
            let mut values = rt.split_whitespace();
            values.next() == Some("id_token") && values.next().is_none()
        }),
    }
}

/// Parameters of a re-derived ID token.
#[derive(Debug)]
pub struct IdTokenParams<'a> {
    /// ID token issued with the original grant.
    pub previous: &'a str,
    /// Subject.
    pub subject: &'a str,
    /// Issuer identifier.
    pub issuer: &'a str,
    /// Audience values.
    pub audience: &'a [String],
    /// Issue time.
    pub issued_at: OffsetDateTime,
    /// Lifetime in seconds.
    pub validity: u64,
    /// User-info claims to embed, if any.
    pub user_info: Option<&'a Claims>,
}

/// Build and sign a new ID token from a previous one.
///
/// # Errors
///
/// Returns `server_error` if the previous token cannot be parsed or the new
/// one cannot be signed.
pub fn rederive_id_token(signer: &dyn TokenSigner, params: &IdTokenParams<'_>) -> GrantResult<String> {
    let previous = decode_unverified(params.previous).map_err(|e| {
        tracing::error!(error = %e, "Can not parse the internal id token");
        GrantError::server_error(e.to_string())
    })?;

    let iat = params.issued_at.unix_timestamp();
    let exp = iat.saturating_add(i64::try_from(params.validity).unwrap_or(i64::MAX));

    let mut claims = Claims::new();
    claims.insert("iss".into(), Value::String(params.issuer.to_string()));
    claims.insert("sub".into(), Value::String(params.subject.to_string()));
    claims.insert("aud".into(), audience_claim(params.audience));
    claims.insert("exp".into(), Value::from(exp));
    claims.insert("iat".into(), Value::from(iat));
    if let Some(nonce) = previous.get("nonce") {
        claims.insert("nonce".into(), nonce.clone());
    }

    if let Some(user_info) = params.user_info {
        for (name, value) in user_info {
            if !REGISTERED_CLAIMS.contains(&name.as_str()) {
                claims.insert(name.clone(), value.clone());
            }
        }
    }

    signer.sign(&claims, None).map_err(|e| {
        tracing::error!(error = %e, "Cannot create new id token");
        GrantError::server_error(e.to_string())
    })
}
