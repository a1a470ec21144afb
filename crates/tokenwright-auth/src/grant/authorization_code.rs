//! Authorization code grant (RFC 6749 §4.1.3) with PKCE (RFC 7636).

use time::OffsetDateTime;

use super::refresh_policy::create_refresh_token;
use super::{GrantContext, IssuedGrant, token_response};
use crate::error::{GrantError, GrantResult};
use crate::oauth::{
    AuthorizationCodeRequest, PkceChallenge, PkceChallengeMethod, PkceVerifier, TokenResponse,
};
use crate::types::{ClientSession, ClientType, GrantType, PkceInfo};

/// Exchanges authorization codes for tokens.
#[derive(Debug, Clone)]
pub struct AuthorizationCodeHandler {
    ctx: GrantContext,
}

impl AuthorizationCodeHandler {
    /// Create a handler.
    #[must_use]
    pub fn new(ctx: GrantContext) -> Self {
        Self { ctx }
    }

    /// Exchange a code.
    ///
    /// The code is consumed before any other check, so a failed exchange
    /// still burns it.
    ///
    /// # Errors
    ///
    /// - `invalid_grant` for unknown codes, client mismatch, PKCE or
    ///   redirect URI failures
    /// - `invalid_client` if a confidential client is not authenticated
    /// - `server_error` on signing or storage failures
    pub async fn exchange(
        &self,
        session: Option<&ClientSession>,
        request: &AuthorizationCodeRequest,
        accept: Option<&str>,
    ) -> GrantResult<TokenResponse> {
        self.issue(session, request, accept)
            .await
            .map(|issued| issued.response)
    }

    pub(crate) async fn issue(
        &self,
        session: Option<&ClientSession>,
        request: &AuthorizationCodeRequest,
        accept: Option<&str>,
    ) -> GrantResult<IssuedGrant> {
        let store = self.ctx.store();

        // 1. Consume the code
        let record = store
            .consume_authorization_code(&request.code)
            .await?
            .ok_or_else(|| GrantError::invalid_grant("wrong code"))?;
        let owner = record.owner;
        let mut token = record.token;

        // 2. The code must have been issued to the caller
        match (token.client_type, session) {
            (ClientType::Confidential, None) => {
                return Err(GrantError::invalid_client("not authenticated"));
            }
            (_, Some(session)) if session.entity_id != token.client_id => {
                tracing::warn!(
                    caller = %session.entity_id,
                    client_id = %token.client_id,
                    "Authorization code presented by another client"
                );
                return Err(GrantError::invalid_grant("wrong code"));
            }
            _ => {}
        }

        // 3. PKCE
        if token.client_type.is_public() && token.pkce.code_challenge.is_none() {
            return Err(GrantError::invalid_grant("missing mandatory PKCE"));
        }
        verify_pkce(&token.pkce, request.code_verifier.as_deref())?;

        // 4. Redirect URI must repeat the one used at the authorization endpoint
        if let Some(expected) = &token.redirect_uri {
            if request.redirect_uri.as_deref() != Some(expected.as_str()) {
                return Err(GrantError::invalid_grant("wrong redirect_uri"));
            }
        }

        // 5. Mint and persist
        let config = self.ctx.config();
        let now = OffsetDateTime::now_utc();
        token.grant_type = Some(GrantType::AuthorizationCode.as_str().to_string());
        let access = self.ctx.access_token_factory(&config).create(&token, now, accept)?;
        token.access_token = Some(access.value().to_string());

        let refresh =
            create_refresh_token(&config.refresh_token, store.as_ref(), now, &mut token, owner)
                .await?;
        self.ctx.store_access_token(&token, &access, owner, now).await?;

        tracing::info!(
            client_id = %token.client_id,
            %owner,
            jwt = access.is_jwt(),
            refresh = refresh.is_some(),
            "Exchanged authorization code"
        );
        Ok(IssuedGrant::new(&token, owner, token_response(&token, &access, refresh)))
    }
}

/// Check a presented verifier against the challenge stored with the code.
///
/// # Errors
///
/// Returns `invalid_grant` with:
/// - `"missing PKCE"` if a challenge exists and no verifier was sent
/// - `"unexpected PKCE"` if a verifier was sent without a challenge
/// - `"PKCE verification error"` if the verifier does not match
pub fn verify_pkce(pkce: &PkceInfo, verifier: Option<&str>) -> GrantResult<()> {
    match (&pkce.code_challenge, verifier) {
        (None, None) => Ok(()),
        (Some(_), None) => Err(GrantError::invalid_grant("missing PKCE")),
        (None, Some(_)) => Err(GrantError::invalid_grant("unexpected PKCE")),
        (Some(challenge), Some(verifier)) => {
            let method = PkceChallengeMethod::parse_or_default(pkce.code_challenge_method.as_deref())
                .map_err(|e| {
                    tracing::warn!(error = %e, "Stored PKCE method is not supported");
                    GrantError::invalid_grant("PKCE verification error")
                })?;
            PkceVerifier::new(verifier)
                .and_then(|v| PkceChallenge::new(challenge.as_str()).verify(&v, method))
                .map_err(|e| {
                    tracing::debug!(error = %e, "PKCE check failed");
                    GrantError::invalid_grant("PKCE verification error")
                })
        }
    }
}
