//! Identity attribute provider interface.
//!
//! The attribute translation engine lives outside this crate. Grant handlers
//! only see [`IdentityProvider`], which returns the attributes of the owner as
//! released to a given client.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::IssuerConfig;
use crate::error::GrantError;
use crate::types::{EntityId, GrantType};

/// Parameters of an attribute lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserInfoRequest {
    /// Entity whose attributes are released.
    pub owner: EntityId,
    /// Entity id of the client, rendered as a string.
    pub client_id: String,
    /// Group the client must belong to.
    pub clients_group: String,
    /// Group the owner must belong to.
    pub users_group: String,
    /// Output translation profile, if configured.
    pub output_profile: Option<String>,
    /// Grant on whose behalf the lookup runs.
    pub grant_type: GrantType,
}

impl UserInfoRequest {
    /// Build a lookup for `owner` as seen by `client`, using the configured
    /// groups and output profile.
    #[must_use]
    pub fn new(
        owner: EntityId,
        client: EntityId,
        grant_type: GrantType,
        config: &IssuerConfig,
    ) -> Self {
        Self {
            owner,
            client_id: client.to_string(),
            clients_group: config.clients_group.clone(),
            users_group: config.users_group.clone(),
            output_profile: config.output_profile.clone(),
            grant_type,
        }
    }
}

/// One released attribute with its values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DynamicAttribute {
    /// Attribute (claim) name.
    pub name: String,
    /// Attribute values.
    pub values: Vec<Value>,
}

impl DynamicAttribute {
    /// Create an attribute.
    #[must_use]
    pub fn new(name: impl Into<String>, values: Vec<Value>) -> Self {
        Self {
            name: name.into(),
            values,
        }
    }

    /// Create an attribute with string values.
    #[must_use]
    pub fn strings<I, S>(name: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(
            name,
            values.into_iter().map(|v| Value::String(v.into())).collect(),
        )
    }
}

/// Outcome of the attribute translation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TranslationResult {
    /// Released attributes.
    pub attributes: Vec<DynamicAttribute>,
}

impl TranslationResult {
    /// Create a result from attributes.
    #[must_use]
    pub fn new(attributes: Vec<DynamicAttribute>) -> Self {
        Self { attributes }
    }
}

/// Errors reported by the identity provider.
#[derive(Debug, thiserror::Error)]
pub enum IdentityError {
    /// The translation profile refused to release attributes.
    #[error("Denied by translation profile: {0}")]
    PolicyDenied(String),

    /// The owner or the client is not a member of a required group.
    #[error("Entity is not a member of required group: {0}")]
    IllegalGroup(String),

    /// The backend failed.
    #[error("Identity backend failure: {0}")]
    Backend(String),
}

impl From<IdentityError> for GrantError {
    fn from(err: IdentityError) -> Self {
        match err {
            IdentityError::PolicyDenied(message) => {
                tracing::debug!(%message, "Attribute release denied by translation profile");
                GrantError::access_denied(message)
            }
            IdentityError::IllegalGroup(message) => {
                tracing::warn!(%message, "Entity trying to access OAuth resource is not a member of required group");
                GrantError::access_denied(message)
            }
            IdentityError::Backend(message) => {
                tracing::error!(%message, "Identity engine problem when handling client request");
                GrantError::identity_backend(message)
            }
        }
    }
}

/// Source of identity attributes.
///
/// Implementations are provided by the embedding server. The lookup is
/// "unsafe" in the sense that it bypasses the caller's own authorization:
/// the grant handlers have already authenticated the client.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Fetch the attributes of `request.owner` as released to the client.
    ///
    /// # Errors
    ///
    /// Returns an [`IdentityError`] describing why attributes cannot be
    /// released.
    async fn user_info_unsafe(
        &self,
        request: &UserInfoRequest,
    ) -> Result<TranslationResult, IdentityError>;
}
