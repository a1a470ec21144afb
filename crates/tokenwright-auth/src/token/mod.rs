//! Token minting and signing.
//!
//! - [`jwt`] - signing keys and the [`TokenSigner`] seam
//! - [`access`] - plain and JWT access tokens
//! - [`id_token`] - re-derived OpenID Connect ID tokens

pub mod access;
pub mod id_token;
pub mod jwt;

pub use access::{AccessToken, AccessTokenFactory, AccessTokenFormat, is_compact_jwt};
pub use id_token::{IdTokenParams, rederive_id_token, user_info_in_id_token};
pub use jwt::{Claims, JwtError, JwtService, SigningAlgorithm, SigningKeyPair, TokenSigner};
