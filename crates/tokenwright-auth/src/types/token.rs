//! Internal token record.
//!
//! [`OAuthToken`] is never sent to clients. It is stored alongside every code,
//! access token and refresh token and is the input from which access, refresh
//! and ID tokens are minted.

use serde::{Deserialize, Serialize};

use super::grant::{ClientType, EntityId, OPENID_SCOPE};
use super::scope::RequestedScope;

/// PKCE parameters captured at the authorization endpoint.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PkceInfo {
    /// The `code_challenge` request parameter.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code_challenge: Option<String>,

    /// The `code_challenge_method` request parameter.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code_challenge_method: Option<String>,
}

impl PkceInfo {
    /// Create PKCE info with a challenge and an optional method.
    #[must_use]
    pub fn new(challenge: impl Into<String>, method: Option<&str>) -> Self {
        Self {
            code_challenge: Some(challenge.into()),
            code_challenge_method: method.map(str::to_string),
        }
    }
}

/// Restricts the values of one identity attribute in issued claims.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttributeFilter {
    /// Attribute (claim) name.
    pub attribute_name: String,
    /// Values that may be released.
    pub values: Vec<String>,
}

/// Internal token record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OAuthToken {
    /// Subject identity (the `sub` claim).
    pub subject: String,

    /// Entity id of the client the token is issued to.
    pub client_id: EntityId,

    /// OAuth `client_id` string of the client.
    pub client_username: String,

    /// Display name of the client.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_name: Option<String>,

    /// Kind of client.
    #[serde(default)]
    pub client_type: ClientType,

    /// Scope strings as originally requested.
    #[serde(default)]
    pub requested_scope: Vec<String>,

    /// Scopes actually granted, in order.
    #[serde(default)]
    pub effective_scope: Vec<RequestedScope>,

    /// Audience values.
    #[serde(default)]
    pub audience: Vec<String>,

    /// Issuer identifier.
    pub issuer_uri: String,

    /// Access token lifetime in seconds.
    pub token_validity: u64,

    /// Upper bound in seconds for lifetime extension, 0 when disabled.
    #[serde(default)]
    pub max_extended_validity: u64,

    /// Minted access token value.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_token: Option<String>,

    /// Minted refresh token value.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,

    /// Signed ID token, when issued.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub openid_token: Option<String>,

    /// Serialized user-info claim set (JSON object).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_info: Option<String>,

    /// Claim value filters in force for this grant.
    #[serde(default)]
    pub attribute_value_filters: Vec<AttributeFilter>,

    /// PKCE parameters of the authorization request.
    #[serde(default)]
    pub pkce: PkceInfo,

    /// `redirect_uri` of the authorization request.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub redirect_uri: Option<String>,

    /// `response_type` of the authorization request.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_type: Option<String>,

    /// Grant that produced this token.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub grant_type: Option<String>,

    /// Id of the refresh-token rotation chain this token belongs to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub first_refresh_rolling_token: Option<String>,

    /// Whether user-info claims go into ID tokens. `None` on records created
    /// before the flag existed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attributes_in_id_token: Option<bool>,

    /// Whether user-info claims are merged into JWT access tokens.
    #[serde(default)]
    pub attributes_in_access_token: bool,
}

impl OAuthToken {
    /// Create a record for a client with empty scope and grant data.
    #[must_use]
    pub fn new(
        subject: impl Into<String>,
        client_id: EntityId,
        client_username: impl Into<String>,
        issuer_uri: impl Into<String>,
        token_validity: u64,
    ) -> Self {
        Self {
            subject: subject.into(),
            client_id,
            client_username: client_username.into(),
            client_name: None,
            client_type: ClientType::Confidential,
            requested_scope: Vec::new(),
            effective_scope: Vec::new(),
            audience: Vec::new(),
            issuer_uri: issuer_uri.into(),
            token_validity,
            max_extended_validity: 0,
            access_token: None,
            refresh_token: None,
            openid_token: None,
            user_info: None,
            attribute_value_filters: Vec::new(),
            pkce: PkceInfo::default(),
            redirect_uri: None,
            response_type: None,
            grant_type: None,
            first_refresh_rolling_token: None,
            attributes_in_id_token: None,
            attributes_in_access_token: false,
        }
    }

    /// Space-joined names of the effective scopes.
    #[must_use]
    pub fn effective_scope_string(&self) -> String {
        self.effective_scope
            .iter()
            .map(|s| s.scope.as_str())
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Returns `true` if `name` is among the effective scopes.
    #[must_use]
    pub fn has_effective_scope(&self, name: &str) -> bool {
        self.effective_scope.iter().any(|s| s.scope == name)
    }

    /// Returns `true` if `name` was among the originally requested scopes.
    #[must_use]
    pub fn has_requested_scope(&self, name: &str) -> bool {
        self.requested_scope.iter().any(|s| s == name)
    }

    /// Returns `true` if the grant is an OpenID Connect one.
    #[must_use]
    pub fn is_openid(&self) -> bool {
        self.has_requested_scope(OPENID_SCOPE)
    }

    /// Audience for minted tokens, falling back to the client.
    #[must_use]
    pub fn audience_or_client(&self) -> Vec<String> {
        if self.audience.is_empty() {
            vec![self.client_username.clone()]
        } else {
            self.audience.clone()
        }
    }
}
