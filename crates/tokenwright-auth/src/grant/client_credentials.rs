//! Client credentials grant (RFC 6749 §4.4).
//!
//! The client acts on its own behalf: it is both the subject and the owner
//! of the grant. Scopes the issuer does not offer are dropped rather than
//! rejected.

use time::OffsetDateTime;

use super::{GrantContext, IssuedGrant, token_response};
use crate::claims::{ClaimsBuilder, UserInfoRequest, to_user_info_json};
use crate::error::{GrantError, GrantResult};
use crate::oauth::{ClientCredentialsRequest, TokenResponse};
use crate::scope::{ScopeResolver, filters_from_scopes, parse_scope, scopes_without_filters};
use crate::types::{ClientSession, GrantType, OAuthToken};

/// Issues tokens to authenticated clients.
#[derive(Debug, Clone)]
pub struct ClientCredentialsHandler {
    ctx: GrantContext,
}

impl ClientCredentialsHandler {
    /// Create a handler.
    #[must_use]
    pub fn new(ctx: GrantContext) -> Self {
        Self { ctx }
    }

    /// Issue an access token for the calling client.
    ///
    /// # Errors
    ///
    /// - `invalid_client` without an authenticated client
    /// - `access_denied` if the client's attributes may not be released
    /// - `server_error` on backend failures
    pub async fn exchange(
        &self,
        session: Option<&ClientSession>,
        request: &ClientCredentialsRequest,
        accept: Option<&str>,
    ) -> GrantResult<TokenResponse> {
        self.issue(session, request, accept)
            .await
            .map(|issued| issued.response)
    }

    pub(crate) async fn issue(
        &self,
        session: Option<&ClientSession>,
        request: &ClientCredentialsRequest,
        accept: Option<&str>,
    ) -> GrantResult<IssuedGrant> {
        let session = session.ok_or_else(|| GrantError::invalid_client("not authenticated"))?;
        let config = self.ctx.config();
        let now = OffsetDateTime::now_utc();

        let requested = request.scope.as_deref().map(parse_scope).unwrap_or_default();
        let names = scopes_without_filters(&requested);
        let filters = filters_from_scopes(&requested);

        let mut token = OAuthToken::new(
            session.username.as_str(),
            session.entity_id,
            session.username.as_str(),
            config.issuer.as_str(),
            config.access_token_validity_secs(),
        );
        token.client_name.clone_from(&session.display_name);
        token.max_extended_validity = config.max_extended_validity_secs();
        token.effective_scope = ScopeResolver::new(config.scopes.clone()).resolve_requested(&names);
        token.requested_scope = names;
        token.grant_type = Some(GrantType::ClientCredentials.as_str().to_string());

        let lookup = UserInfoRequest::new(
            session.entity_id,
            session.entity_id,
            GrantType::ClientCredentials,
            &config,
        );
        let attributes = self.ctx.identity().user_info_unsafe(&lookup).await?;
        let user_info =
            ClaimsBuilder::new(&token.subject, &token.effective_scope, &filters).build(&attributes);
        token.user_info = Some(to_user_info_json(&user_info));
        token.attribute_value_filters = filters;

        let access = self.ctx.access_token_factory(&config).create(&token, now, accept)?;
        token.access_token = Some(access.value().to_string());
        self.ctx
            .store_access_token(&token, &access, session.entity_id, now)
            .await?;

        tracing::info!(
            client_id = %session.entity_id,
            scope = %token.effective_scope_string(),
            "Issued client credentials token"
        );
        Ok(IssuedGrant::new(
            &token,
            session.entity_id,
            token_response(&token, &access, None),
        ))
    }
}
