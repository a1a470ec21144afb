//! Token endpoint request and response types.
//!
//! # Supported Grant Types
//!
//! - `authorization_code` - Exchange authorization code for tokens
//! - `refresh_token` - Refresh an access token
//! - `client_credentials` - Machine-to-machine authentication
//! - `urn:ietf:params:oauth:grant-type:token-exchange` - RFC 8693 impersonation

use serde::{Deserialize, Serialize};

use crate::error::{GrantError, GrantResult};
use crate::types::GrantType;

/// Token request parameters.
///
/// Different fields are required depending on the `grant_type`:
///
/// - `authorization_code`: code, (optional) redirect_uri, code_verifier
/// - `refresh_token`: refresh_token, (optional) scope
/// - `client_credentials`: (optional) scope
/// - token exchange: subject_token, subject_token_type, audience and the
///   optional requested_token_type, scope and resource values
///
/// Client authentication happens before this request is parsed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TokenRequest {
    /// OAuth 2.0 grant type.
    pub grant_type: String,

    /// Authorization code (for authorization_code grant).
    pub code: Option<String>,

    /// Redirect URI (must match authorization request).
    pub redirect_uri: Option<String>,

    /// PKCE code verifier (for authorization_code grant).
    pub code_verifier: Option<String>,

    /// Refresh token (for refresh_token grant).
    pub refresh_token: Option<String>,

    /// Requested scope (space-separated).
    pub scope: Option<String>,

    /// Token to exchange.
    pub subject_token: Option<String>,

    /// Type identifier of `subject_token`.
    pub subject_token_type: Option<String>,

    /// Type of token the client wants back.
    pub requested_token_type: Option<String>,

    /// Client the new token is issued for.
    pub audience: Option<String>,

    /// Delegation actor token (rejected).
    pub actor_token: Option<String>,

    /// Type of `actor_token` (rejected).
    pub actor_token_type: Option<String>,

    /// Additional audience values; may repeat.
    pub resource: Vec<String>,
}

impl TokenRequest {
    /// Parse an `application/x-www-form-urlencoded` body.
    ///
    /// `resource` may repeat; for any other parameter the last occurrence wins.
    ///
    /// # Errors
    ///
    /// Returns `invalid_request` if `grant_type` is missing.
    pub fn from_form(body: &[u8]) -> GrantResult<Self> {
        let mut request = Self::default();
        let mut grant_type = None;
        for (name, value) in url::form_urlencoded::parse(body) {
            let value = value.into_owned();
            match name.as_ref() {
                "grant_type" => grant_type = Some(value),
                "code" => request.code = Some(value),
                "redirect_uri" => request.redirect_uri = Some(value),
                "code_verifier" => request.code_verifier = Some(value),
                "refresh_token" => request.refresh_token = Some(value),
                "scope" => request.scope = Some(value),
                "subject_token" => request.subject_token = Some(value),
                "subject_token_type" => request.subject_token_type = Some(value),
                "requested_token_type" => request.requested_token_type = Some(value),
                "audience" => request.audience = Some(value),
                "actor_token" => request.actor_token = Some(value),
                "actor_token_type" => request.actor_token_type = Some(value),
                "resource" => request.resource.push(value),
                _ => {}
            }
        }
        request.grant_type =
            grant_type.ok_or_else(|| GrantError::invalid_request("missing grant_type"))?;
        Ok(request)
    }

    /// Validate the parameters required by the grant type.
    ///
    /// # Errors
    ///
    /// - `unsupported_grant_type` for unknown grants
    /// - `invalid_request` when a required parameter is missing
    pub fn into_grant(self) -> GrantResult<GrantRequest> {
        let grant_type: GrantType = self
            .grant_type
            .parse()
            .map_err(GrantError::unsupported_grant_type)?;

        match grant_type {
            GrantType::AuthorizationCode => {
                Ok(GrantRequest::AuthorizationCode(AuthorizationCodeRequest {
                    code: required(self.code, "code")?,
                    redirect_uri: self.redirect_uri,
                    code_verifier: self.code_verifier,
                }))
            }
            GrantType::RefreshToken => Ok(GrantRequest::RefreshToken(RefreshTokenRequest {
                refresh_token: required(self.refresh_token, "refresh_token")?,
                scope: self.scope,
            })),
            GrantType::ClientCredentials => {
                Ok(GrantRequest::ClientCredentials(ClientCredentialsRequest {
                    scope: self.scope,
                }))
            }
            GrantType::TokenExchange => Ok(GrantRequest::TokenExchange(TokenExchangeRequest {
                subject_token: required(self.subject_token, "subject_token")?,
                subject_token_type: required(self.subject_token_type, "subject_token_type")?,
                requested_token_type: self.requested_token_type,
                audience: self.audience,
                scope: self.scope,
                actor_token: self.actor_token,
                actor_token_type: self.actor_token_type,
                resources: self.resource,
            })),
        }
    }
}

fn required(value: Option<String>, name: &str) -> GrantResult<String> {
    match value {
        Some(v) if !v.is_empty() => Ok(v),
        _ => Err(GrantError::invalid_request(format!("missing {name}"))),
    }
}

/// A validated token request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GrantRequest {
    /// `authorization_code` grant.
    AuthorizationCode(AuthorizationCodeRequest),
    /// `refresh_token` grant.
    RefreshToken(RefreshTokenRequest),
    /// `client_credentials` grant.
    ClientCredentials(ClientCredentialsRequest),
    /// Token exchange grant.
    TokenExchange(TokenExchangeRequest),
}

impl GrantRequest {
    /// Grant type of the request.
    #[must_use]
    pub fn grant_type(&self) -> GrantType {
        match self {
            Self::AuthorizationCode(_) => GrantType::AuthorizationCode,
            Self::RefreshToken(_) => GrantType::RefreshToken,
            Self::ClientCredentials(_) => GrantType::ClientCredentials,
            Self::TokenExchange(_) => GrantType::TokenExchange,
        }
    }
}

/// `authorization_code` grant parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthorizationCodeRequest {
    /// The authorization code.
    pub code: String,
    /// Redirect URI sent with the authorization request.
    pub redirect_uri: Option<String>,
    /// PKCE verifier.
    pub code_verifier: Option<String>,
}

/// `refresh_token` grant parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefreshTokenRequest {
    /// The refresh token.
    pub refresh_token: String,
    /// Requested scope; `None` keeps the original grant.
    pub scope: Option<String>,
}

/// `client_credentials` grant parameters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClientCredentialsRequest {
    /// Requested scope.
    pub scope: Option<String>,
}

/// Token exchange parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenExchangeRequest {
    /// Token to exchange.
    pub subject_token: String,
    /// Type identifier of the subject token.
    pub subject_token_type: String,
    /// Requested token type identifier.
    pub requested_token_type: Option<String>,
    /// OAuth `client_id` of the target client.
    pub audience: Option<String>,
    /// Requested scope.
    pub scope: Option<String>,
    /// Actor token (rejected).
    pub actor_token: Option<String>,
    /// Actor token type (rejected).
    pub actor_token_type: Option<String>,
    /// Additional audience values.
    pub resources: Vec<String>,
}

/// Successful token response.
///
/// # Example Response
///
/// ```json
/// {
///   "access_token": "eyJhbG...",
///   "token_type": "Bearer",
///   "expires_in": 3600,
///   "scope": "openid profile",
///   "refresh_token": "abc123..."
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenResponse {
    /// The access token.
    pub access_token: String,

    /// Token type, always "Bearer".
    pub token_type: String,

    /// Access token lifetime in seconds.
    pub expires_in: u64,

    /// Granted scopes (space-separated).
    pub scope: String,

    /// Refresh token, when one was issued or rotated.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,

    /// ID token, for OpenID Connect grants.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id_token: Option<String>,

    /// Type of the issued token (token exchange only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub issued_token_type: Option<String>,
}

impl TokenResponse {
    /// Creates a new token response.
    #[must_use]
    pub fn new(access_token: String, expires_in: u64, scope: String) -> Self {
        Self {
            access_token,
            token_type: "Bearer".to_string(),
            expires_in,
            scope,
            refresh_token: None,
            id_token: None,
            issued_token_type: None,
        }
    }

    /// Sets the refresh token.
    #[must_use]
    pub fn with_refresh_token(mut self, token: Option<String>) -> Self {
        self.refresh_token = token;
        self
    }

    /// Sets the ID token.
    #[must_use]
    pub fn with_id_token(mut self, token: Option<String>) -> Self {
        self.id_token = token;
        self
    }

    /// Sets the issued token type.
    #[must_use]
    pub fn with_issued_token_type(mut self, token_type: impl Into<String>) -> Self {
        self.issued_token_type = Some(token_type.into());
        self
    }
}

/// Token endpoint error body.
///
/// ```json
/// {
///   "error": "invalid_grant",
///   "error_description": "wrong code"
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenErrorBody {
    /// OAuth 2.0 error code.
    pub error: String,

    /// Human-readable error description.
    pub error_description: String,
}

impl From<&GrantError> for TokenErrorBody {
    fn from(err: &GrantError) -> Self {
        Self {
            error: err.oauth_error_code().to_string(),
            error_description: err.public_description(),
        }
    }
}
