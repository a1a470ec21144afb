//! OAuth 2.0 protocol types.
//!
//! - [`pkce`] - RFC 7636 challenge verification
//! - [`token`] - token endpoint requests, responses and error bodies

pub mod pkce;
pub mod token;

pub use pkce::{PkceChallenge, PkceChallengeMethod, PkceError, PkceVerifier};
pub use token::{
    AuthorizationCodeRequest, ClientCredentialsRequest, GrantRequest, RefreshTokenRequest,
    TokenErrorBody, TokenExchangeRequest, TokenRequest, TokenResponse,
};
