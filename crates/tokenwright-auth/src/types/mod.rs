//! Common types used across the issuance modules.
//!
//! ## Domain Types
//!
//! - [`OAuthToken`] - Internal token record carried through every grant
//! - [`RequestedScope`] / [`ScopeDefinition`] - Effective scopes and the catalogue entries behind them
//! - [`GrantType`] - Supported token endpoint grants
//! - [`StoredToken`] - A persisted code, access or refresh token

pub mod grant;
pub mod scope;
pub mod stored;
pub mod token;

pub use grant::{
    ACCESS_TOKEN_TYPE, ClientSession, ClientType, EntityId, EXCHANGE_SCOPE, GrantType,
    ID_TOKEN_TYPE, OFFLINE_ACCESS_SCOPE, OPENID_SCOPE,
};
pub use scope::{RequestedScope, ScopeDefinition};
pub use stored::{StoredToken, generate_token_value, hash_token};
pub use token::{AttributeFilter, OAuthToken, PkceInfo};
