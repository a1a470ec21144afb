//! Token endpoint grant handlers.
//!
//! Each handler validates one grant, derives the internal token record,
//! mints tokens and persists them. The handlers share a [`GrantContext`]
//! holding the collaborators of the issuer.
//!
//! - [`authorization_code`] - code exchange with PKCE
//! - [`refresh`] - refresh with rotation and reuse detection
//! - [`client_credentials`] - tokens for the client itself
//! - [`exchange`] - RFC 8693 impersonation
//! - [`derive`] - new token from an old one, shared by refresh and exchange
//! - [`refresh_policy`] - when refresh tokens are issued

pub mod authorization_code;
pub mod client_credentials;
pub mod derive;
pub mod exchange;
pub mod refresh;
pub mod refresh_policy;

use std::sync::Arc;

use time::OffsetDateTime;

pub use authorization_code::AuthorizationCodeHandler;
pub use client_credentials::ClientCredentialsHandler;
pub use derive::{DeriveRequest, TokenDeriver};
pub use exchange::{ClientEntity, DirectoryError, EntityDirectory, TokenExchangeHandler};
pub use refresh::RefreshTokenHandler;
pub use refresh_policy::create_refresh_token;

use crate::audit::{GrantOutcome, TokenStatistics, TracingStatistics, report};
use crate::claims::IdentityProvider;
use crate::config::{IssuerConfig, ReloadableIssuerConfig};
use crate::error::GrantResult;
use crate::oauth::{GrantRequest, TokenResponse};
use crate::storage::TokenStore;
use crate::token::{AccessToken, AccessTokenFactory, TokenSigner};
use crate::types::{ClientSession, EntityId, GrantType, OAuthToken, StoredToken};

/// Collaborators shared by all grant handlers.
#[derive(Clone)]
pub struct GrantContext {
    config: ReloadableIssuerConfig,
    store: Arc<dyn TokenStore>,
    identity: Arc<dyn IdentityProvider>,
    signer: Arc<dyn TokenSigner>,
    statistics: Arc<dyn TokenStatistics>,
    directory: Option<Arc<dyn EntityDirectory>>,
}

impl GrantContext {
    /// Create a context reporting statistics through tracing.
    #[must_use]
    pub fn new(
        config: impl Into<ReloadableIssuerConfig>,
        store: Arc<dyn TokenStore>,
        identity: Arc<dyn IdentityProvider>,
        signer: Arc<dyn TokenSigner>,
    ) -> Self {
        Self {
            config: config.into(),
            store,
            identity,
            signer,
            statistics: Arc::new(TracingStatistics),
            directory: None,
        }
    }

    /// Enable token exchange with the given client directory.
    #[must_use]
    pub fn with_directory(mut self, directory: Arc<dyn EntityDirectory>) -> Self {
        self.directory = Some(directory);
        self
    }

    /// Replace the statistics collector.
    #[must_use]
    pub fn with_statistics(mut self, statistics: Arc<dyn TokenStatistics>) -> Self {
        self.statistics = statistics;
        self
    }

    /// Snapshot of the current configuration.
    #[must_use]
    pub fn config(&self) -> Arc<IssuerConfig> {
        self.config.current()
    }

    /// The reloadable configuration handle.
    #[must_use]
    pub fn reloadable_config(&self) -> &ReloadableIssuerConfig {
        &self.config
    }

    /// The token store.
    #[must_use]
    pub fn store(&self) -> &Arc<dyn TokenStore> {
        &self.store
    }

    /// The identity attribute provider.
    #[must_use]
    pub fn identity(&self) -> &Arc<dyn IdentityProvider> {
        &self.identity
    }

    /// The token signer.
    #[must_use]
    pub fn signer(&self) -> &Arc<dyn TokenSigner> {
        &self.signer
    }

    /// The statistics collector.
    #[must_use]
    pub fn statistics(&self) -> &Arc<dyn TokenStatistics> {
        &self.statistics
    }

    /// The client directory, when token exchange is enabled.
    #[must_use]
    pub fn directory(&self) -> Option<&Arc<dyn EntityDirectory>> {
        self.directory.as_ref()
    }

    /// Access token factory for the given configuration snapshot.
    #[must_use]
    pub fn access_token_factory(&self, config: &IssuerConfig) -> AccessTokenFactory {
        AccessTokenFactory::new(config.access_token_format, Arc::clone(&self.signer))
    }

    /// Token deriver over this context's collaborators.
    #[must_use]
    pub fn deriver(&self) -> TokenDeriver {
        TokenDeriver::new(Arc::clone(&self.identity), Arc::clone(&self.signer))
    }

    /// Persist a minted access token with expiry `now + token_validity`.
    pub(crate) async fn store_access_token(
        &self,
        token: &OAuthToken,
        access: &AccessToken,
        owner: EntityId,
        now: OffsetDateTime,
    ) -> GrantResult<()> {
        let expires_at = now + std::time::Duration::from_secs(token.token_validity);
        let record = StoredToken::new(access.key(), owner, token.clone(), now, Some(expires_at));
        self.store.store_access_token(record).await?;
        Ok(())
    }
}

impl std::fmt::Debug for GrantContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GrantContext")
            .field("config", &self.config)
            .field("token_exchange", &self.directory.is_some())
            .finish_non_exhaustive()
    }
}

/// Tokens issued by a handler together with the grant they were issued on.
#[derive(Debug, Clone)]
pub(crate) struct IssuedGrant {
    pub(crate) response: TokenResponse,
    pub(crate) client: EntityId,
    pub(crate) client_username: String,
    pub(crate) owner: EntityId,
}

impl IssuedGrant {
    /// Issued on behalf of `owner` to the client recorded in `token`.
    pub(crate) fn new(token: &OAuthToken, owner: EntityId, response: TokenResponse) -> Self {
        Self {
            response,
            client: token.client_id,
            client_username: token.client_username.clone(),
            owner,
        }
    }
}

/// Build the response for a minted token.
#[must_use]
pub(crate) fn token_response(
    token: &OAuthToken,
    access: &AccessToken,
    refresh_token: Option<String>,
) -> TokenResponse {
    TokenResponse::new(
        access.value().to_string(),
        token.token_validity,
        token.effective_scope_string(),
    )
    .with_refresh_token(refresh_token)
    .with_id_token(token.openid_token.clone())
}

/// Dispatch a validated request to its handler and report the outcome.
///
/// # Errors
///
/// Returns the handler's error.
pub async fn dispatch(
    ctx: &GrantContext,
    session: Option<&ClientSession>,
    request: GrantRequest,
    accept: Option<&str>,
) -> GrantResult<TokenResponse> {
    let grant_type = request.grant_type();
    let result = match &request {
        GrantRequest::AuthorizationCode(r) => {
            AuthorizationCodeHandler::new(ctx.clone())
                .issue(session, r, accept)
                .await
        }
        GrantRequest::RefreshToken(r) => {
            RefreshTokenHandler::new(ctx.clone())
                .issue(session, r, accept)
                .await
        }
        GrantRequest::ClientCredentials(r) => {
            ClientCredentialsHandler::new(ctx.clone())
                .issue(session, r, accept)
                .await
        }
        GrantRequest::TokenExchange(r) => {
            TokenExchangeHandler::new(ctx.clone())
                .issue(session, r, accept)
                .await
        }
    };
    if let Err(e) = &result {
        if e.is_server_error() {
            tracing::error!(error = %e, %grant_type, "Token request failed on the server side");
        } else {
            tracing::debug!(error = %e, %grant_type, "Token request rejected");
        }
    }
    record_outcome(ctx, grant_type, session, &result).await;
    result.map(|issued| issued.response)
}

/// Report a terminal outcome, ignoring collector failures.
///
/// Successful grants report the client and owner of the grant; failures
/// report the authenticated client, if any.
async fn record_outcome(
    ctx: &GrantContext,
    grant_type: GrantType,
    session: Option<&ClientSession>,
    result: &GrantResult<IssuedGrant>,
) {
    let outcome = match result {
        Ok(issued) => GrantOutcome::issued(grant_type)
            .client(issued.client, issued.client_username.clone())
            .owner(issued.owner),
        Err(e) => {
            let failed = GrantOutcome::failed(grant_type, e);
            match session {
                Some(session) => failed.client(session.entity_id, session.username.clone()),
                None => failed,
            }
        }
    };
    report(ctx.statistics.as_ref(), outcome).await;
}
