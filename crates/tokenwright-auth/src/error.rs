//! Grant processing error types.
//!
//! Every failure a grant handler can produce is expressed as a [`GrantError`].
//! Variants map one-to-one onto the OAuth 2.0 error codes of RFC 6749 §5.2,
//! plus a handful of server-side variants that all surface as `server_error`.

use std::fmt;

/// Generic description returned to callers for server-side failures.
pub const SERVER_ERROR_DESCRIPTION: &str = "internal server error";

/// Result type for grant processing.
pub type GrantResult<T> = Result<T, GrantError>;

/// Errors that can occur while processing a token grant.
#[derive(Debug, thiserror::Error)]
pub enum GrantError {
    /// The request is missing a parameter, has an unsupported value or is malformed.
    #[error("invalid_request: {message}")]
    InvalidRequest {
        message: String,
    },

    /// The authorization code or refresh token is invalid, expired, revoked
    /// or was issued to another client.
    #[error("invalid_grant: {message}")]
    InvalidGrant {
        message: String,
    },

    /// The requested scope is invalid, unknown or exceeds the original grant.
    #[error("invalid_scope: {message}")]
    InvalidScope {
        message: String,
    },

    /// The client is not allowed to use this grant on the presented artifact.
    #[error("unauthorized_client: {message}")]
    UnauthorizedClient {
        message: String,
    },

    /// The grant type is not supported by this issuer.
    #[error("unsupported_grant_type: {grant_type}")]
    UnsupportedGrantType {
        /// The `grant_type` value as sent.
        grant_type: String,
    },

    /// The client did not authenticate, or authenticated as a different
    /// kind of client than the grant requires.
    #[error("invalid_client: {message}")]
    InvalidClient {
        message: String,
    },

    /// The resource owner or the attribute translation policy denied the grant.
    #[error("access_denied: {message}")]
    AccessDenied {
        message: String,
    },

    /// Generic server failure.
    #[error("server_error: {message}")]
    ServerError {
        message: String,
    },

    /// An error occurred while reading or writing the token store.
    #[error("token store failure: {message}")]
    Storage {
        message: String,
    },

    /// A JWT could not be signed or decoded.
    #[error("signing failure: {message}")]
    Signing {
        message: String,
    },

    /// The issuer configuration is invalid.
    #[error("issuer misconfigured: {message}")]
    Configuration {
        message: String,
    },

    /// The identity attribute backend failed.
    #[error("identity backend failure: {message}")]
    IdentityBackend {
        message: String,
    },
}

impl GrantError {
    /// Creates a new `InvalidRequest` error.
    #[must_use]
    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::InvalidRequest {
            message: message.into(),
        }
    }

    /// Creates a new `InvalidGrant` error.
    #[must_use]
    pub fn invalid_grant(message: impl Into<String>) -> Self {
        Self::InvalidGrant {
            message: message.into(),
        }
    }

    /// Creates a new `InvalidScope` error.
    #[must_use]
    pub fn invalid_scope(message: impl Into<String>) -> Self {
        Self::InvalidScope {
            message: message.into(),
        }
    }

    /// Creates a new `UnauthorizedClient` error.
    #[must_use]
    pub fn unauthorized_client(message: impl Into<String>) -> Self {
        Self::UnauthorizedClient {
            message: message.into(),
        }
    }

    /// Creates a new `UnsupportedGrantType` error.
    #[must_use]
    pub fn unsupported_grant_type(grant_type: impl Into<String>) -> Self {
        Self::UnsupportedGrantType {
            grant_type: grant_type.into(),
        }
    }

    /// Creates a new `InvalidClient` error.
    #[must_use]
    pub fn invalid_client(message: impl Into<String>) -> Self {
        Self::InvalidClient {
            message: message.into(),
        }
    }

    /// Creates a new `AccessDenied` error.
    #[must_use]
    pub fn access_denied(message: impl Into<String>) -> Self {
        Self::AccessDenied {
            message: message.into(),
        }
    }

    /// Creates a new `ServerError` error.
    #[must_use]
    pub fn server_error(message: impl Into<String>) -> Self {
        Self::ServerError {
            message: message.into(),
        }
    }

    /// Creates a new `Storage` error.
    #[must_use]
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage {
            message: message.into(),
        }
    }

    /// Creates a new `Signing` error.
    #[must_use]
    pub fn signing(message: impl Into<String>) -> Self {
        Self::Signing {
            message: message.into(),
        }
    }

    /// Creates a new `Configuration` error.
    #[must_use]
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Creates a new `IdentityBackend` error.
    #[must_use]
    pub fn identity_backend(message: impl Into<String>) -> Self {
        Self::IdentityBackend {
            message: message.into(),
        }
    }

    /// Returns `true` if the caller caused this error (HTTP 400).
    #[must_use]
    pub fn is_client_error(&self) -> bool {
        matches!(self.category(), ErrorCategory::Client)
    }

    /// Returns `true` if this is a client authentication or authorization
    /// failure (HTTP 401/403).
    #[must_use]
    pub fn is_authorization_error(&self) -> bool {
        matches!(self.category(), ErrorCategory::Authorization)
    }

    /// Returns `true` if this is a server-side failure (HTTP 500).
    #[must_use]
    pub fn is_server_error(&self) -> bool {
        matches!(self.category(), ErrorCategory::Server)
    }

    /// Returns the taxonomy bucket of this error.
    #[must_use]
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::InvalidRequest { .. }
            | Self::InvalidGrant { .. }
            | Self::InvalidScope { .. }
            | Self::UnauthorizedClient { .. }
            | Self::UnsupportedGrantType { .. } => ErrorCategory::Client,
            Self::InvalidClient { .. } | Self::AccessDenied { .. } => {
                ErrorCategory::Authorization
            }
            Self::ServerError { .. }
            | Self::Storage { .. }
            | Self::Signing { .. }
            | Self::Configuration { .. }
            | Self::IdentityBackend { .. } => ErrorCategory::Server,
        }
    }

    /// Returns the OAuth 2.0 error code for this error.
    #[must_use]
    pub fn oauth_error_code(&self) -> &'static str {
        match self {
            Self::InvalidRequest { .. } => "invalid_request",
            Self::InvalidGrant { .. } => "invalid_grant",
            Self::InvalidScope { .. } => "invalid_scope",
            Self::UnauthorizedClient { .. } => "unauthorized_client",
            Self::UnsupportedGrantType { .. } => "unsupported_grant_type",
            Self::InvalidClient { .. } => "invalid_client",
            Self::AccessDenied { .. } => "access_denied",
            Self::ServerError { .. }
            | Self::Storage { .. }
            | Self::Signing { .. }
            | Self::Configuration { .. }
            | Self::IdentityBackend { .. } => "server_error",
        }
    }

    /// Returns the HTTP status code used when rendering this error.
    #[must_use]
    pub fn http_status(&self) -> u16 {
        match self {
            Self::InvalidClient { .. } => 401,
            Self::AccessDenied { .. } => 403,
            _ if self.is_server_error() => 500,
            _ => 400,
        }
    }

    /// Returns the description that may be shown to the caller.
    ///
    /// Server-side details are replaced with a generic text.
    #[must_use]
    pub fn public_description(&self) -> String {
        match self {
            Self::InvalidRequest { message }
            | Self::InvalidGrant { message }
            | Self::InvalidScope { message }
            | Self::UnauthorizedClient { message }
            | Self::InvalidClient { message }
            | Self::AccessDenied { message } => message.clone(),
            Self::UnsupportedGrantType { grant_type } => {
                format!("unsupported grant type: {grant_type}")
            }
            _ => SERVER_ERROR_DESCRIPTION.to_string(),
        }
    }
}

/// Buckets of the grant error taxonomy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Caller-caused request errors.
    Client,
    /// Client authentication or access-denied errors.
    Authorization,
    /// Signing, configuration or backend failures.
    Server,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Client => write!(f, "client"),
            Self::Authorization => write!(f, "authorization"),
            Self::Server => write!(f, "server"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = GrantError::invalid_grant("wrong code");
        assert_eq!(err.to_string(), "invalid_grant: wrong code");

        let err = GrantError::unsupported_grant_type("password");
        assert_eq!(err.to_string(), "unsupported_grant_type: password");

        let err = GrantError::signing("key missing");
        assert_eq!(err.to_string(), "signing failure: key missing");
    }

    #[test]
    fn test_error_predicates() {
        let err = GrantError::invalid_scope("wrong scope");
        assert!(err.is_client_error());
        assert!(!err.is_server_error());

        let err = GrantError::access_denied("denied by profile");
        assert!(err.is_authorization_error());
        assert!(!err.is_client_error());

        let err = GrantError::storage("connection reset");
        assert!(err.is_server_error());
        assert!(!err.is_client_error());
    }

    #[test]
    fn test_http_status() {
        assert_eq!(GrantError::invalid_request("x").http_status(), 400);
        assert_eq!(GrantError::invalid_grant("x").http_status(), 400);
        assert_eq!(GrantError::invalid_scope("x").http_status(), 400);
        assert_eq!(GrantError::unauthorized_client("x").http_status(), 400);
        assert_eq!(GrantError::invalid_client("x").http_status(), 401);
        assert_eq!(GrantError::access_denied("x").http_status(), 403);
        assert_eq!(GrantError::server_error("x").http_status(), 500);
        assert_eq!(GrantError::identity_backend("x").http_status(), 500);
    }

    #[test]
    fn test_oauth_error_code() {
        assert_eq!(
            GrantError::unauthorized_client("x").oauth_error_code(),
            "unauthorized_client"
        );
        assert_eq!(
            GrantError::configuration("x").oauth_error_code(),
            "server_error"
        );
        assert_eq!(
            GrantError::unsupported_grant_type("x").oauth_error_code(),
            "unsupported_grant_type"
        );
    }

    #[test]
    fn test_public_description_hides_server_details() {
        let err = GrantError::storage("password=hunter2 rejected by replica");
        assert_eq!(err.public_description(), SERVER_ERROR_DESCRIPTION);

        let err = GrantError::invalid_grant("missing PKCE");
        assert_eq!(err.public_description(), "missing PKCE");
    }

    #[test]
    fn test_error_category_display() {
        assert_eq!(ErrorCategory::Client.to_string(), "client");
        assert_eq!(ErrorCategory::Authorization.to_string(), "authorization");
        assert_eq!(ErrorCategory::Server.to_string(), "server");
    }
}
