//! Identity attributes and user-info claims.
//!
//! - [`provider`] - the external attribute translation engine
//! - [`builder`] - user-info claim sets restricted by scope and claim filters

pub mod builder;
pub mod provider;

pub use builder::{ClaimsBuilder, to_user_info_json};
pub use provider::{
    DynamicAttribute, IdentityError, IdentityProvider, TranslationResult, UserInfoRequest,
};
