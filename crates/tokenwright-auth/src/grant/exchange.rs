//! Token exchange grant (RFC 8693), impersonation only.
//!
//! A client holding an access token granted with the `token-exchange` scope
//! trades it for a token aimed at another client (the audience). Delegation
//! through `actor_token` is not supported.

use async_trait::async_trait;
use time::OffsetDateTime;

use super::derive::DeriveRequest;
use super::refresh_policy::create_refresh_token;
use super::{GrantContext, IssuedGrant, token_response};
use crate::error::{GrantError, GrantResult};
use crate::oauth::{TokenExchangeRequest, TokenResponse};
use crate::scope::parse_scope;
use crate::types::{
    ACCESS_TOKEN_TYPE, ClientSession, ClientType, EXCHANGE_SCOPE, EntityId, GrantType,
    ID_TOKEN_TYPE,
};

// ============================================================================
// Directory
// ============================================================================

/// A registered OAuth client as seen by the directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientEntity {
    /// Entity id of the client.
    pub entity_id: EntityId,
    /// OAuth `client_id`.
    pub username: String,
    /// Display name.
    pub name: Option<String>,
    /// Client kind.
    pub client_type: ClientType,
    /// Group whose members may obtain tokens for this client.
    pub authorized_group: String,
}

/// Errors raised by directory lookups.
#[derive(Debug, thiserror::Error)]
pub enum DirectoryError {
    /// No client with this identifier.
    #[error("Client not found: {0}")]
    NotFound(String),

    /// The entity exists but is not a usable client.
    #[error("Invalid client: {0}")]
    Invalid(String),

    /// The directory failed.
    #[error("Directory error: {0}")]
    Backend(String),
}

/// Lookup of clients and group membership.
#[async_trait]
pub trait EntityDirectory: Send + Sync {
    /// Resolve a client by its OAuth `client_id`.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` or `Invalid` for unusable identifiers and
    /// `Backend` on failures.
    async fn resolve_client(&self, username: &str) -> Result<ClientEntity, DirectoryError>;

    /// Returns `true` if `entity` belongs to `group`.
    ///
    /// # Errors
    ///
    /// Returns `Backend` on failures.
    async fn is_member(&self, entity: EntityId, group: &str) -> Result<bool, DirectoryError>;
}

fn audience_error(err: DirectoryError) -> GrantError {
    match err {
        DirectoryError::NotFound(_) | DirectoryError::Invalid(_) => {
            tracing::debug!(error = %err, "Audience lookup failed");
            GrantError::invalid_request("wrong audience")
        }
        DirectoryError::Backend(message) => {
            tracing::error!(error = %message, "Client directory failure");
            GrantError::server_error(message)
        }
    }
}

// ============================================================================
// Handler
// ============================================================================

/// Exchanges access tokens for tokens aimed at another client.
#[derive(Debug, Clone)]
pub struct TokenExchangeHandler {
    ctx: GrantContext,
}

impl TokenExchangeHandler {
    /// Create a handler.
    #[must_use]
    pub fn new(ctx: GrantContext) -> Self {
        Self { ctx }
    }

    /// Perform the exchange.
    ///
    /// # Errors
    ///
    /// - `invalid_request` for unsupported token types, actor tokens, an
    ///   unknown or unauthorized audience and unknown subject tokens
    /// - `unsupported_grant_type` if no client directory is configured
    /// - `invalid_client` without an authenticated client
    /// - `unauthorized_client` if the subject token lacks the exchange scope
    /// - `invalid_scope` if more scope than the subject token holds is
    ///   requested
    /// - `server_error` on backend failures
    pub async fn exchange(
        &self,
        session: Option<&ClientSession>,
        request: &TokenExchangeRequest,
        accept: Option<&str>,
    ) -> GrantResult<TokenResponse> {
        self.issue(session, request, accept)
            .await
            .map(|issued| issued.response)
    }

    pub(crate) async fn issue(
        &self,
        session: Option<&ClientSession>,
        request: &TokenExchangeRequest,
        accept: Option<&str>,
    ) -> GrantResult<IssuedGrant> {
        // 1. Token types
        if request.subject_token_type != ACCESS_TOKEN_TYPE {
            return Err(GrantError::invalid_request("unsupported subject_token_type"));
        }
        let requested_type = request.requested_token_type.as_deref().unwrap_or(ACCESS_TOKEN_TYPE);
        if requested_type != ACCESS_TOKEN_TYPE && requested_type != ID_TOKEN_TYPE {
            return Err(GrantError::invalid_request("unsupported requested_token_type"));
        }
        if request.actor_token.is_some() {
            return Err(GrantError::invalid_request("unsupported actor_token"));
        }
        if request.actor_token_type.is_some() {
            return Err(GrantError::invalid_request("unsupported actor_token_type"));
        }

        let directory = self
            .ctx
            .directory()
            .ok_or_else(|| GrantError::unsupported_grant_type(GrantType::TokenExchange.as_str()))?;
        let session = session.ok_or_else(|| GrantError::invalid_client("not authenticated"))?;

        // 2. The caller must be authorized for the audience
        let audience_name = request
            .audience
            .as_deref()
            .ok_or_else(|| GrantError::invalid_request("wrong audience"))?;
        let audience = directory
            .resolve_client(audience_name)
            .await
            .map_err(audience_error)?;
        if !directory
            .is_member(session.entity_id, &audience.authorized_group)
            .await
            .map_err(audience_error)?
        {
            tracing::debug!(
                caller = %session.entity_id,
                audience = %audience.username,
                "Caller not authorized for audience"
            );
            return Err(GrantError::invalid_request("wrong audience"));
        }

        // 3. Subject token
        let config = self.ctx.config();
        let factory = self.ctx.access_token_factory(&config);
        let key = factory.resolve_key(&request.subject_token)?;
        let subject = self
            .ctx
            .store()
            .read_access_token(&key)
            .await?
            .ok_or_else(|| GrantError::invalid_request("wrong subject_token"))?;
        if !subject.token.has_requested_scope(EXCHANGE_SCOPE) {
            return Err(GrantError::unauthorized_client(format!(
                "subject_token must have {EXCHANGE_SCOPE} scope"
            )));
        }

        // 4. Derive; the exchange scope is not passed on
        let requested: Vec<String> = request
            .scope
            .as_deref()
            .map(parse_scope)
            .unwrap_or_else(|| subject.token.requested_scope.clone())
            .into_iter()
            .filter(|s| s != EXCHANGE_SCOPE)
            .collect();
        let mut audiences = vec![audience.username.clone()];
        audiences.extend(request.resources.iter().cloned());

        let now = OffsetDateTime::now_utc();
        let derive = DeriveRequest {
            previous: &subject.token,
            requested_scopes: &requested,
            client: session.entity_id,
            owner: subject.owner,
            audience: &audiences,
            create_id_token: requested_type == ID_TOKEN_TYPE,
            grant_type: GrantType::TokenExchange,
        };
        let mut token = self.ctx.deriver().derive(&config, &derive, now).await?;
        token.client_id = session.entity_id;
        token.client_username.clone_from(&audience.username);
        token.audience = audiences;
        token.grant_type = Some(GrantType::TokenExchange.as_str().to_string());

        // 5. Mint and persist
        let access = factory.create(&token, now, accept)?;
        token.access_token = Some(access.value().to_string());
        let refresh = create_refresh_token(
            &config.refresh_token,
            self.ctx.store().as_ref(),
            now,
            &mut token,
            subject.owner,
        )
        .await?;
        self.ctx
            .store_access_token(&token, &access, subject.owner, now)
            .await?;

        tracing::info!(
            caller = %session.entity_id,
            audience = %audience.username,
            owner = %subject.owner,
            "Exchanged access token"
        );
        Ok(IssuedGrant {
            response: token_response(&token, &access, refresh)
                .with_issued_token_type(ACCESS_TOKEN_TYPE),
            client: session.entity_id,
            client_username: session.username.clone(),
            owner: subject.owner,
        })
    }
}
