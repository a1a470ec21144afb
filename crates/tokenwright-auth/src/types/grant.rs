//! Grant identifiers, client kinds and the authenticated caller.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// RFC 8693 token type identifier for access tokens.
pub const ACCESS_TOKEN_TYPE: &str = "urn:ietf:params:oauth:token-type:access_token";

/// RFC 8693 token type identifier for OpenID Connect ID tokens.
pub const ID_TOKEN_TYPE: &str = "urn:ietf:params:oauth:token-type:id_token";

/// Scope a subject token must carry to be exchangeable. Never propagated to
/// derived tokens.
pub const EXCHANGE_SCOPE: &str = "token-exchange";

/// OpenID Connect scope that triggers ID token issuance.
pub const OPENID_SCOPE: &str = "openid";

/// Scope that requests a refresh token under the `offline_access` policy.
pub const OFFLINE_ACCESS_SCOPE: &str = "offline_access";

/// Identifier of an entity (user or client) in the identity directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityId(pub i64);

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for EntityId {
    fn from(value: i64) -> Self {
        Self(value)
    }
}

/// OAuth 2.0 client kinds (RFC 6749 §2.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClientType {
    /// Client able to keep its credentials confidential.
    #[default]
    Confidential,
    /// Client that cannot authenticate, e.g. a browser or native app.
    Public,
}

impl ClientType {
    /// Returns `true` for public clients.
    #[must_use]
    pub fn is_public(&self) -> bool {
        matches!(self, Self::Public)
    }
}

/// Grants served by the token endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum GrantType {
    /// `authorization_code` (RFC 6749 §4.1).
    #[serde(rename = "authorization_code")]
    AuthorizationCode,
    /// `refresh_token` (RFC 6749 §6).
    #[serde(rename = "refresh_token")]
    RefreshToken,
    /// `client_credentials` (RFC 6749 §4.4).
    #[serde(rename = "client_credentials")]
    ClientCredentials,
    /// Token exchange (RFC 8693).
    #[serde(rename = "urn:ietf:params:oauth:grant-type:token-exchange")]
    TokenExchange,
}

impl GrantType {
    /// Returns the OAuth 2.0 grant_type parameter value.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AuthorizationCode => "authorization_code",
            Self::RefreshToken => "refresh_token",
            Self::ClientCredentials => "client_credentials",
            Self::TokenExchange => "urn:ietf:params:oauth:grant-type:token-exchange",
        }
    }
}

impl fmt::Display for GrantType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for GrantType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "authorization_code" => Ok(Self::AuthorizationCode),
            "refresh_token" => Ok(Self::RefreshToken),
            "client_credentials" => Ok(Self::ClientCredentials),
            "urn:ietf:params:oauth:grant-type:token-exchange" => Ok(Self::TokenExchange),
            other => Err(other.to_string()),
        }
    }
}

/// An authenticated client session established by the transport layer.
///
/// Public clients calling the token endpoint have no session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientSession {
    /// Entity id of the authenticated client.
    pub entity_id: EntityId,
    /// OAuth `client_id` of the client.
    pub username: String,
    /// Display name, if the client registration has one.
    pub display_name: Option<String>,
}

impl ClientSession {
    /// Create a session for the given client entity.
    #[must_use]
    pub fn new(entity_id: impl Into<EntityId>, username: impl Into<String>) -> Self {
        Self {
            entity_id: entity_id.into(),
            username: username.into(),
            display_name: None,
        }
    }

    /// Sets the display name.
    #[must_use]
    pub fn with_display_name(mut self, name: impl Into<String>) -> Self {
        self.display_name = Some(name.into());
        self
    }
}
