//! # tokenwright-auth
//!
//! Token issuance core of an OAuth 2.0 / OpenID Connect authorization
//! server.
//!
//! This crate provides:
//! - The token endpoint grants: authorization code with PKCE, refresh token
//!   with rotation, client credentials and RFC 8693 token exchange
//! - Scope resolution with wildcard patterns and claim filters
//! - Opaque and RFC 9068 JWT access tokens
//! - A storage interface with atomic code consumption and refresh rotation
//!
//! ## Overview
//!
//! A request enters through [`http::token_handler`] (or
//! [`grant::dispatch`] when embedding), is validated into a
//! [`oauth::GrantRequest`] and handed to the matching grant handler. Client
//! authentication, the authorization endpoint and the identity attribute
//! engine live outside this crate and are reached through
//! [`types::ClientSession`], the [`storage::TokenStore`] and the
//! [`claims::IdentityProvider`].
//!
//! ## Modules
//!
//! - [`config`] - Issuer configuration and its loader
//! - [`grant`] - Grant handlers and the shared derivation
//! - [`oauth`] - Token endpoint protocol types and PKCE
//! - [`scope`] - Scope matching and resolution
//! - [`claims`] - Attribute provider and user-info claims
//! - [`token`] - Access token formats, ID tokens and signing
//! - [`storage`] - Token store interface
//! - [`audit`] - Grant statistics
//! - [`http`] - Axum handler for the token endpoint
//! - [`observability`] - Tracing setup

pub mod audit;
pub mod claims;
pub mod config;
pub mod error;
pub mod grant;
pub mod http;
pub mod oauth;
pub mod observability;
pub mod scope;
pub mod storage;
pub mod token;
pub mod types;

#[cfg(any(test, feature = "test-util"))]
pub mod testing;

pub use config::{ConfigError, IssuerConfig, ReloadableIssuerConfig};
pub use error::{ErrorCategory, GrantError, GrantResult};
pub use grant::{GrantContext, dispatch};
pub use http::{token_handler, token_router};
pub use oauth::{GrantRequest, TokenErrorBody, TokenRequest, TokenResponse};
pub use storage::{RotationOutcome, StoreError, StoreResult, TokenStore};
pub use types::{ClientSession, ClientType, EntityId, GrantType, OAuthToken, StoredToken};

/// Prelude module for convenient imports.
///
/// ```ignore
/// use tokenwright_auth::prelude::*;
/// ```
pub mod prelude {
    pub use crate::audit::{GrantOutcome, TokenStatistics};
    pub use crate::claims::{DynamicAttribute, IdentityError, IdentityProvider, TranslationResult};
    pub use crate::config::{IssuerConfig, ReloadableIssuerConfig};
    pub use crate::error::{GrantError, GrantResult};
    pub use crate::grant::{ClientEntity, DirectoryError, EntityDirectory, GrantContext, dispatch};
    pub use crate::http::{token_handler, token_router};
    pub use crate::oauth::{GrantRequest, TokenRequest, TokenResponse};
    pub use crate::storage::{RotationOutcome, StoreError, StoreResult, TokenStore};
    pub use crate::token::{AccessTokenFormat, JwtService, SigningKeyPair, TokenSigner};
    pub use crate::types::{
        ClientSession, ClientType, EntityId, GrantType, OAuthToken, ScopeDefinition, StoredToken,
    };
}
