//! Derivation of a new token record from an existing one.
//!
//! Refresh and token exchange both start from a stored record and produce a
//! new one with re-resolved scopes, fresh user info, an optional re-derived
//! ID token and lifetimes taken from the current configuration.

use std::sync::Arc;

use time::OffsetDateTime;

use crate::claims::{ClaimsBuilder, IdentityProvider, UserInfoRequest, to_user_info_json};
use crate::config::IssuerConfig;
use crate::error::GrantResult;
use crate::scope::{
    complete_missing_attributes, filters_from_scopes, map_to_effective_scopes,
    merge_preserving_last, scopes_without_filters,
};
use crate::token::{IdTokenParams, TokenSigner, rederive_id_token, user_info_in_id_token};
use crate::types::{EntityId, GrantType, OAuthToken, OPENID_SCOPE};

/// Input of a derivation.
#[derive(Debug)]
pub struct DeriveRequest<'a> {
    /// Record the new token is derived from.
    pub previous: &'a OAuthToken,
    /// Newly requested scope values, claim filters included.
    pub requested_scopes: &'a [String],
    /// Client the attributes are released to.
    pub client: EntityId,
    /// Owner of the grant.
    pub owner: EntityId,
    /// Audience of the re-derived ID token.
    pub audience: &'a [String],
    /// Whether an ID token may be issued.
    pub create_id_token: bool,
    /// Grant performing the derivation.
    pub grant_type: GrantType,
}

/// Derives token records.
#[derive(Clone)]
pub struct TokenDeriver {
    identity: Arc<dyn IdentityProvider>,
    signer: Arc<dyn TokenSigner>,
}

impl TokenDeriver {
    /// Create a deriver.
    #[must_use]
    pub fn new(identity: Arc<dyn IdentityProvider>, signer: Arc<dyn TokenSigner>) -> Self {
        Self { identity, signer }
    }

    /// Derive a new record.
    ///
    /// The result has no access or refresh token value; callers mint those.
    ///
    /// # Errors
    ///
    /// - `invalid_scope` ("wrong scope") if any requested scope is not covered
    ///   by the previous grant
    /// - `access_denied` if the attribute policy refuses the release
    /// - `server_error` on backend or signing failures
    pub async fn derive(
        &self,
        config: &IssuerConfig,
        request: &DeriveRequest<'_>,
        now: OffsetDateTime,
    ) -> GrantResult<OAuthToken> {
        let mut token = request.previous.clone();

        // 1. Claim filters are not scopes
        let filtered = scopes_without_filters(request.requested_scopes);

        // 2. Resolve against the previous grant; no partial grants
        let previous_scopes =
            complete_missing_attributes(&config.scopes, &request.previous.effective_scope);
        let effective = map_to_effective_scopes(&previous_scopes, &filtered)?;
        token.requested_scope.clone_from(&filtered);

        // 3. Current attributes of the owner
        let lookup =
            UserInfoRequest::new(request.owner, request.client, request.grant_type, config);
        let attributes = self.identity.user_info_unsafe(&lookup).await?;
        token.effective_scope = effective;

        // 4. Filters from this request win over the stored ones
        let filters = merge_preserving_last(
            &token.attribute_value_filters,
            &filters_from_scopes(request.requested_scopes),
        );

        // 5. User info restricted to the granted attributes
        let user_info =
            ClaimsBuilder::new(&token.subject, &token.effective_scope, &filters).build(&attributes);
        token.user_info = Some(to_user_info_json(&user_info));
        token.attribute_value_filters = filters;

        // 6. ID token
        let openid = filtered.iter().any(|s| s == OPENID_SCOPE);
        token.openid_token = match (&request.previous.openid_token, openid && request.create_id_token)
        {
            (Some(previous), true) => {
                let embed = user_info_in_id_token(&token);
                let params = IdTokenParams {
                    previous,
                    subject: &token.subject,
                    issuer: &config.issuer,
                    audience: request.audience,
                    issued_at: now,
                    validity: config.access_token_validity_secs(),
                    user_info: embed.then_some(&user_info),
                };
                Some(rederive_id_token(self.signer.as_ref(), &params)?)
            }
            _ => None,
        };

        // 7. Lifetimes and issuer follow the current configuration
        token.max_extended_validity = config.max_extended_validity_secs();
        token.token_validity = config.access_token_validity_secs();
        token.issuer_uri.clone_from(&config.issuer);
        token.access_token = None;
        token.refresh_token = None;

        tracing::debug!(
            client_id = %request.client,
            owner = %request.owner,
            grant_type = %request.grant_type,
            scopes = token.effective_scope.len(),
            "Derived token from previous grant"
        );
        Ok(token)
    }
}

impl std::fmt::Debug for TokenDeriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenDeriver").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::claims::{DynamicAttribute, IdentityError};
    use crate::testing::{StaticIdentityProvider, test_signer};
    use crate::token::id_token::decode_unverified;
    use crate::types::{AttributeFilter, RequestedScope, ScopeDefinition};
    use serde_json::{Value, json};
    use std::time::Duration;

    fn config() -> IssuerConfig {
        IssuerConfig {
            issuer: "https://issuer.example".into(),
            access_token_validity: Duration::from_secs(900),
            max_extended_access_token_validity: Duration::from_secs(7200),
            scopes: vec![ScopeDefinition::new("profile", ["name", "locale"])],
            ..IssuerConfig::default()
        }
    }

    fn identity() -> StaticIdentityProvider {
        StaticIdentityProvider::new(vec![
            DynamicAttribute::strings("email", ["alice@example.com"]),
            DynamicAttribute::strings("name", ["Alice"]),
            DynamicAttribute::strings("groups", ["/a", "/b"]),
            DynamicAttribute::strings("doc", ["d1"]),
        ])
    }

    fn previous(signer: &dyn TokenSigner) -> OAuthToken {
        let mut token = OAuthToken::new("alice", EntityId(42), "app", "https://old", 60);
        token.requested_scope = vec!["openid".into(), "email".into(), "read:*".into()];
        token.effective_scope = vec![
            RequestedScope::from_definition(ScopeDefinition::new("openid", Vec::<String>::new())),
            RequestedScope::from_definition(ScopeDefinition::new("email", ["email", "groups"])),
            RequestedScope::from_definition(ScopeDefinition::new("read:*", ["doc"])),
        ];
        token.access_token = Some("old-access".into());
        token.refresh_token = Some("old-refresh".into());
        let id_claims = match json!({"sub": "alice", "nonce": "abc", "iss": "https://old"}) {
            Value::Object(map) => map,
            _ => unreachable!(),
        };
        token.openid_token = Some(signer.sign(&id_claims, None).unwrap());
        token.attributes_in_id_token = Some(true);
        token
    }

    fn request<'a>(
        previous: &'a OAuthToken,
        scopes: &'a [String],
        audience: &'a [String],
    ) -> DeriveRequest<'a> {
        DeriveRequest {
            previous,
            requested_scopes: scopes,
            client: EntityId(42),
            owner: EntityId(7),
            audience,
            create_id_token: true,
            grant_type: GrantType::RefreshToken,
        }
    }

    fn names(values: &[&str]) -> Vec<String> {
        values.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn test_derive_resets_and_reconfigures() {
        let signer = test_signer();
        let deriver = TokenDeriver::new(Arc::new(identity()), signer.clone());
        let previous = previous(signer.as_ref());
        let scopes = names(&["email", "read:docs"]);
        let audience = names(&["app"]);

        let token = deriver
            .derive(&config(), &request(&previous, &scopes, &audience), OffsetDateTime::now_utc())
            .await
            .unwrap();

        assert_eq!(token.requested_scope, scopes);
        assert_eq!(token.effective_scope_string(), "email read:docs");
        assert_eq!(token.effective_scope[1].definition.name, "read:*");
        assert_eq!(token.token_validity, 900);
        assert_eq!(token.max_extended_validity, 7200);
        assert_eq!(token.issuer_uri, "https://issuer.example");
        assert!(token.access_token.is_none());
        assert!(token.refresh_token.is_none());
        assert!(token.openid_token.is_none());

        let user_info: Value = serde_json::from_str(token.user_info.as_deref().unwrap()).unwrap();
        assert_eq!(user_info["sub"], "alice");
        assert_eq!(user_info["email"], "alice@example.com");
        assert_eq!(user_info["doc"], "d1");
        assert!(user_info.get("name").is_none());
    }

    #[tokio::test]
    async fn test_derive_rejects_unknown_scope() {
        let signer = test_signer();
        let identity = Arc::new(identity());
        let deriver = TokenDeriver::new(identity.clone(), signer.clone());
        let previous = previous(signer.as_ref());
        let scopes = names(&["email", "write:docs"]);
        let audience = names(&["app"]);

        let err = deriver
            .derive(&config(), &request(&previous, &scopes, &audience), OffsetDateTime::now_utc())
            .await
            .unwrap_err();
        assert_eq!(err.oauth_error_code(), "invalid_scope");
        assert_eq!(err.public_description(), "wrong scope");
        assert_eq!(identity.calls(), 0);
    }

    #[tokio::test]
    async fn test_derive_rederives_id_token() {
        let signer = test_signer();
        let deriver = TokenDeriver::new(Arc::new(identity()), signer.clone());
        let previous = previous(signer.as_ref());
        let scopes = names(&["openid", "email"]);
        let audience = names(&["app", "api"]);
        let now = OffsetDateTime::now_utc();

        let token = deriver
            .derive(&config(), &request(&previous, &scopes, &audience), now)
            .await
            .unwrap();

        let id_token = token.openid_token.as_deref().unwrap();
        let claims = signer.verify(id_token).unwrap();
        assert_eq!(claims["nonce"], "abc");
        assert_eq!(claims["iss"], "https://issuer.example");
        assert_eq!(claims["aud"], json!(["app", "api"]));
        assert_eq!(claims["exp"], now.unix_timestamp() + 900);
        assert_eq!(claims["email"], "alice@example.com");
    }

    #[tokio::test]
    async fn test_derive_without_id_token_permission() {
        let signer = test_signer();
        let deriver = TokenDeriver::new(Arc::new(identity()), signer.clone());
        let previous = previous(signer.as_ref());
        let scopes = names(&["openid", "email"]);
        let audience = names(&["app"]);
        let mut request = request(&previous, &scopes, &audience);
        request.create_id_token = false;

        let token = deriver
            .derive(&config(), &request, OffsetDateTime::now_utc())
            .await
            .unwrap();
        assert!(token.openid_token.is_none());
    }

    #[tokio::test]
    async fn test_derive_id_token_without_user_info() {
        let signer = test_signer();
        let deriver = TokenDeriver::new(Arc::new(identity()), signer.clone());
        let mut previous = previous(signer.as_ref());
        previous.attributes_in_id_token = None;
        previous.response_type = Some("code".into());
        let scopes = names(&["openid", "email"]);
        let audience = names(&["app"]);

        let token = deriver
            .derive(&config(), &request(&previous, &scopes, &audience), OffsetDateTime::now_utc())
            .await
            .unwrap();
        let claims = decode_unverified(token.openid_token.as_deref().unwrap()).unwrap();
        assert!(!claims.contains_key("email"));
    }

    #[tokio::test]
    async fn test_derive_merges_filters() {
        let signer = test_signer();
        let deriver = TokenDeriver::new(Arc::new(identity()), signer.clone());
        let mut previous = previous(signer.as_ref());
        previous.attribute_value_filters = vec![
            AttributeFilter {
                attribute_name: "groups".into(),
                values: vec!["/a".into()],
            },
            AttributeFilter {
                attribute_name: "email".into(),
                values: vec!["alice@example.com".into()],
            },
        ];
        let scopes = names(&["email", "claim_filter:groups:/b"]);
        let audience = names(&["app"]);

        let token = deriver
            .derive(&config(), &request(&previous, &scopes, &audience), OffsetDateTime::now_utc())
            .await
            .unwrap();

        assert_eq!(token.requested_scope, names(&["email"]));
        assert_eq!(token.attribute_value_filters.len(), 2);
        assert_eq!(token.attribute_value_filters[0].attribute_name, "groups");
        assert_eq!(token.attribute_value_filters[0].values, names(&["/b"]));
        let user_info: Value = serde_json::from_str(token.user_info.as_deref().unwrap()).unwrap();
        assert_eq!(user_info["groups"], "/b");
    }

    #[tokio::test]
    async fn test_derive_completes_legacy_scopes() {
        let signer = test_signer();
        let deriver = TokenDeriver::new(Arc::new(identity()), signer.clone());
        let mut previous = previous(signer.as_ref());
        let mut legacy = RequestedScope::from_definition(ScopeDefinition::new("profile", Vec::<String>::new()));
        legacy.definition.attributes = None;
        previous.effective_scope.push(legacy);
        let scopes = names(&["profile"]);
        let audience = names(&["app"]);

        let token = deriver
            .derive(&config(), &request(&previous, &scopes, &audience), OffsetDateTime::now_utc())
            .await
            .unwrap();
        assert_eq!(
            token.effective_scope[0].definition.attribute_names(),
            names(&["name", "locale"])
        );
        let user_info: Value = serde_json::from_str(token.user_info.as_deref().unwrap()).unwrap();
        assert_eq!(user_info["name"], "Alice");
    }

    #[tokio::test]
    async fn test_derive_maps_identity_errors() {
        let signer = test_signer();
        let previous = previous(signer.as_ref());
        let scopes = names(&["email"]);
        let audience = names(&["app"]);

        let denied = StaticIdentityProvider::failing(|| IdentityError::PolicyDenied("no".into()));
        let deriver = TokenDeriver::new(Arc::new(denied), signer.clone());
        let err = deriver
            .derive(&config(), &request(&previous, &scopes, &audience), OffsetDateTime::now_utc())
            .await
            .unwrap_err();
        assert_eq!(err.oauth_error_code(), "access_denied");

        let broken = StaticIdentityProvider::failing(|| IdentityError::Backend("down".into()));
        let deriver = TokenDeriver::new(Arc::new(broken), signer.clone());
        let err = deriver
            .derive(&config(), &request(&previous, &scopes, &audience), OffsetDateTime::now_utc())
            .await
            .unwrap_err();
        assert!(err.is_server_error());
    }
}
