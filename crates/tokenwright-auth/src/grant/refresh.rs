//! Refresh token grant (RFC 6749 §6).
//!
//! With rotation enabled every refresh replaces the presented token with a
//! successor in the same chain. The replaced token stays behind as a
//! tombstone; presenting it again is treated as theft and revokes the
//! whole chain.

use time::OffsetDateTime;

use super::derive::DeriveRequest;
use super::refresh_policy::ensure_rotation_chain;
use super::{GrantContext, IssuedGrant, token_response};
use crate::config::RefreshTokenRotation;
use crate::error::{GrantError, GrantResult};
use crate::oauth::{RefreshTokenRequest, TokenResponse};
use crate::scope::parse_scope;
use crate::storage::RotationOutcome;
use crate::types::{ClientSession, ClientType, GrantType, StoredToken, generate_token_value};

const ALREADY_USED: &str = "refresh token has already been used";

/// Refreshes access tokens.
#[derive(Debug, Clone)]
pub struct RefreshTokenHandler {
    ctx: GrantContext,
}

impl RefreshTokenHandler {
    /// Create a handler.
    #[must_use]
    pub fn new(ctx: GrantContext) -> Self {
        Self { ctx }
    }

    /// Refresh a grant.
    ///
    /// # Errors
    ///
    /// - `invalid_request` if a rotated token is presented again
    /// - `invalid_grant` for unknown tokens or tokens of another client
    /// - `invalid_client` if a confidential client is not authenticated
    /// - `invalid_scope` if more scope than originally granted is requested
    /// - `access_denied` if attributes may no longer be released
    /// - `server_error` on backend failures
    pub async fn refresh(
        &self,
        session: Option<&ClientSession>,
        request: &RefreshTokenRequest,
        accept: Option<&str>,
    ) -> GrantResult<TokenResponse> {
        self.issue(session, request, accept)
            .await
            .map(|issued| issued.response)
    }

    pub(crate) async fn issue(
        &self,
        session: Option<&ClientSession>,
        request: &RefreshTokenRequest,
        accept: Option<&str>,
    ) -> GrantResult<IssuedGrant> {
        let config = self.ctx.config();
        let store = self.ctx.store();
        let now = OffsetDateTime::now_utc();

        // 1. Reuse of a rotated token revokes its chain
        if config.refresh_token.rotation != RefreshTokenRotation::Disabled {
            if let Some(used) = store.get_used_refresh_token(&request.refresh_token).await? {
                // Without a chain id the whole (client, owner) family goes.
                let chain = used.token.first_refresh_rolling_token.as_deref();
                let revoked = store
                    .revoke_chain(used.token.client_id, used.owner, chain)
                    .await?;
                tracing::warn!(
                    client_id = %used.token.client_id,
                    owner = %used.owner,
                    chain_known = chain.is_some(),
                    revoked,
                    "Rotated refresh token reused, chain revoked"
                );
                return Err(GrantError::invalid_request(ALREADY_USED));
            }
        }

        // 2. Active token issued to the caller
        let record = store
            .read_refresh_token(&request.refresh_token)
            .await?
            .ok_or_else(|| GrantError::invalid_grant("wrong refresh token"))?;
        match (session, record.token.client_type) {
            (Some(session), _) if session.entity_id != record.token.client_id => {
                tracing::warn!(
                    caller = %session.entity_id,
                    client_id = %record.token.client_id,
                    "Refresh token presented by another client"
                );
                return Err(GrantError::invalid_grant("wrong refresh token"));
            }
            (None, ClientType::Confidential) => {
                return Err(GrantError::invalid_client("not authenticated"));
            }
            _ => {}
        }

        // 3. Derive from the stored grant
        let requested = request
            .scope
            .as_deref()
            .map(parse_scope)
            .unwrap_or_else(|| record.token.requested_scope.clone());
        let audience = record.token.audience_or_client();
        let derive = DeriveRequest {
            previous: &record.token,
            requested_scopes: &requested,
            client: record.token.client_id,
            owner: record.owner,
            audience: &audience,
            create_id_token: true,
            grant_type: GrantType::RefreshToken,
        };
        let mut token = self.ctx.deriver().derive(&config, &derive, now).await?;
        token.grant_type = Some(GrantType::RefreshToken.as_str().to_string());

        // 4. Mint
        let access = self.ctx.access_token_factory(&config).create(&token, now, accept)?;
        token.access_token = Some(access.value().to_string());

        // 5. Persist; the access record must exist before the successor does
        let successor_value = if config.refresh_token.rotates_for(token.client_type) {
            ensure_rotation_chain(&config.refresh_token, &mut token);
            let value = generate_token_value();
            token.refresh_token = Some(value.clone());
            Some(value)
        } else {
            token.refresh_token = Some(request.refresh_token.clone());
            None
        };
        self.ctx
            .store_access_token(&token, &access, record.owner, now)
            .await?;

        // 6. Rotate
        let refresh = match successor_value {
            Some(value) => {
                let successor = StoredToken::new(
                    value.clone(),
                    record.owner,
                    token.clone(),
                    now,
                    config.refresh_token.expiry(now),
                );
                let outcome = store
                    .rotate_refresh_token(&request.refresh_token, successor)
                    .await;
                if !matches!(outcome, Ok(RotationOutcome::Rotated)) {
                    store.remove_access_token(access.key()).await?;
                }
                match outcome? {
                    RotationOutcome::Rotated => Some(value),
                    RotationOutcome::AlreadyUsed => {
                        tracing::debug!(
                            client_id = %token.client_id,
                            "Lost refresh rotation race"
                        );
                        return Err(GrantError::invalid_request(ALREADY_USED));
                    }
                    RotationOutcome::NotFound => {
                        return Err(GrantError::invalid_grant("wrong refresh token"));
                    }
                }
            }
            None => None,
        };

        tracing::info!(
            client_id = %token.client_id,
            owner = %record.owner,
            rotated = refresh.is_some(),
            "Refreshed access token"
        );
        Ok(IssuedGrant::new(&token, record.owner, token_response(&token, &access, refresh)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{IssuerConfig, RefreshTokenConfig, RefreshTokenIssuePolicy};
    use crate::storage::TokenStore;
    use crate::testing::{TEST_CLIENT, TEST_OWNER, TestEnvironment};
    use crate::types::EntityId;

    fn env(rotation: RefreshTokenRotation) -> TestEnvironment {
        TestEnvironment::new(IssuerConfig {
            refresh_token: RefreshTokenConfig {
                issue_policy: RefreshTokenIssuePolicy::Always,
                rotation,
                ..RefreshTokenConfig::default()
            },
            ..IssuerConfig::default()
        })
    }

    async fn seed(env: &TestEnvironment, value: &str, client_type: ClientType) -> StoredToken {
        let mut record = env.grant_record(value, client_type);
        record.token.refresh_token = Some(value.into());
        if client_type.is_public() {
            record.token.first_refresh_rolling_token = Some("chain-1".into());
        }
        env.store.store_refresh_token(record.clone()).await.unwrap();
        record
    }

    fn request(value: &str, scope: Option<&str>) -> RefreshTokenRequest {
        RefreshTokenRequest {
            refresh_token: value.into(),
            scope: scope.map(Into::into),
        }
    }

    #[tokio::test]
    async fn test_refresh_without_rotation() {
        let env = env(RefreshTokenRotation::Disabled);
        seed(&env, "r1", ClientType::Confidential).await;
        let handler = RefreshTokenHandler::new(env.ctx.clone());

        let first = handler
            .refresh(Some(&env.session()), &request("r1", None), None)
            .await
            .unwrap();
        assert_eq!(first.scope, "openid email");
        assert!(first.refresh_token.is_none());
        assert!(first.id_token.is_some());

        let second = handler
            .refresh(Some(&env.session()), &request("r1", Some("email")), None)
            .await
            .unwrap();
        assert_eq!(second.scope, "email");
        assert!(second.id_token.is_none());
        assert_ne!(first.access_token, second.access_token);

        let stored = env
            .store
            .read_access_token(&second.access_token)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.owner, TEST_OWNER);
        assert_eq!(stored.token.refresh_token.as_deref(), Some("r1"));
        assert_eq!(stored.token.grant_type.as_deref(), Some("refresh_token"));
    }

    #[tokio::test]
    async fn test_rederived_id_token_keeps_nonce() {
        let env = env(RefreshTokenRotation::Disabled);
        seed(&env, "r1", ClientType::Confidential).await;

        let response = RefreshTokenHandler::new(env.ctx.clone())
            .refresh(Some(&env.session()), &request("r1", None), None)
            .await
            .unwrap();
        let claims = env.signer.verify(response.id_token.as_deref().unwrap()).unwrap();
        assert_eq!(claims["nonce"], "n-1");
        assert_eq!(claims["aud"], "app");
        assert_eq!(claims["iss"], "http://localhost:8080/oauth2");
    }

    #[tokio::test]
    async fn test_refresh_rejects_wider_scope() {
        let env = env(RefreshTokenRotation::Disabled);
        seed(&env, "r1", ClientType::Confidential).await;

        let err = RefreshTokenHandler::new(env.ctx.clone())
            .refresh(Some(&env.session()), &request("r1", Some("email profile")), None)
            .await
            .unwrap_err();
        assert_eq!(err.oauth_error_code(), "invalid_scope");
    }

    #[tokio::test]
    async fn test_refresh_client_checks() {
        let env = env(RefreshTokenRotation::Disabled);
        seed(&env, "r1", ClientType::Confidential).await;
        let handler = RefreshTokenHandler::new(env.ctx.clone());

        let err = handler.refresh(None, &request("r1", None), None).await.unwrap_err();
        assert_eq!(err.oauth_error_code(), "invalid_client");

        let other = ClientSession::new(EntityId(99), "other");
        let err = handler
            .refresh(Some(&other), &request("r1", None), None)
            .await
            .unwrap_err();
        assert_eq!(err.oauth_error_code(), "invalid_grant");

        let err = handler
            .refresh(Some(&env.session()), &request("unknown", None), None)
            .await
            .unwrap_err();
        assert_eq!(err.public_description(), "wrong refresh token");
    }

    #[tokio::test]
    async fn test_rotation_and_reuse_detection() {
        let env = env(RefreshTokenRotation::PublicClients);
        seed(&env, "r1", ClientType::Public).await;
        let handler = RefreshTokenHandler::new(env.ctx.clone());

        let rotated = handler.refresh(None, &request("r1", None), None).await.unwrap();
        let r2 = rotated.refresh_token.clone().unwrap();
        assert_ne!(r2, "r1");
        let successor = env.store.read_refresh_token(&r2).await.unwrap().unwrap();
        assert_eq!(
            successor.token.first_refresh_rolling_token.as_deref(),
            Some("chain-1")
        );

        let err = handler.refresh(None, &request("r1", None), None).await.unwrap_err();
        assert_eq!(err.oauth_error_code(), "invalid_request");
        assert_eq!(err.public_description(), ALREADY_USED);

        assert!(env.store.read_refresh_token(&r2).await.unwrap().is_none());
        assert!(
            env.store
                .read_access_token(&rotated.access_token)
                .await
                .unwrap()
                .is_none()
        );
        let err = handler.refresh(None, &request(&r2, None), None).await.unwrap_err();
        assert_eq!(err.oauth_error_code(), "invalid_grant");
    }

    #[tokio::test]
    async fn test_confidential_rotation_starts_chain() {
        let env = env(RefreshTokenRotation::AllClients);
        seed(&env, "r1", ClientType::Confidential).await;

        let response = RefreshTokenHandler::new(env.ctx.clone())
            .refresh(Some(&env.session()), &request("r1", None), None)
            .await
            .unwrap();
        let value = response.refresh_token.unwrap();
        let successor = env.store.read_refresh_token(&value).await.unwrap().unwrap();
        assert!(successor.token.first_refresh_rolling_token.is_some());
        assert_eq!(successor.token.client_id, TEST_CLIENT);
        assert!(env.store.get_used_refresh_token("r1").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_reuse_of_unchained_token_revokes_family() {
        let env = env(RefreshTokenRotation::AllClients);
        let original = seed(&env, "r1", ClientType::Confidential).await;
        assert!(original.token.first_refresh_rolling_token.is_none());
        let handler = RefreshTokenHandler::new(env.ctx.clone());

        let rotated = handler
            .refresh(Some(&env.session()), &request("r1", None), None)
            .await
            .unwrap();
        let r2 = rotated.refresh_token.clone().unwrap();

        let err = handler
            .refresh(Some(&env.session()), &request("r1", None), None)
            .await
            .unwrap_err();
        assert_eq!(err.public_description(), ALREADY_USED);
        assert!(env.store.read_refresh_token(&r2).await.unwrap().is_none());
        assert!(
            env.store
                .read_access_token(&rotated.access_token)
                .await
                .unwrap()
                .is_none()
        );
    }
}
