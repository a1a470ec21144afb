//! End-to-end grant flows against the in-memory store.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use time::OffsetDateTime;
use tokenwright_auth::config::{IssuerConfig, RefreshTokenConfig, RefreshTokenIssuePolicy, RefreshTokenRotation};
use tokenwright_auth::grant::{ClientEntity, GrantContext, dispatch};
use tokenwright_auth::oauth::{PkceChallenge, PkceChallengeMethod, PkceVerifier, TokenRequest, TokenResponse};
use tokenwright_auth::testing::{
    RecordingStatistics, StaticDirectory, TEST_CLIENT, TEST_OWNER, grant_record, test_config,
    test_identity, test_signer,
};
use tokenwright_auth::token::{AccessTokenFormat, TokenSigner};
use tokenwright_auth::types::{
    ClientSession, ClientType, EXCHANGE_SCOPE, EntityId, PkceInfo, RequestedScope, ScopeDefinition,
};
use tokenwright_auth::{GrantResult, RotationOutcome, StoreResult, StoredToken, TokenStore};
use tokenwright_auth_memory::MemoryTokenStore;

struct Harness {
    ctx: GrantContext,
    store: Arc<MemoryTokenStore>,
    signer: Arc<dyn TokenSigner>,
    statistics: Arc<RecordingStatistics>,
}

impl Harness {
    fn new(config: IssuerConfig) -> Self {
        let store = Arc::new(MemoryTokenStore::new());
        let signer = test_signer();
        let statistics = Arc::new(RecordingStatistics::new());
        let directory = StaticDirectory::new()
            .with_client(ClientEntity {
                entity_id: EntityId(100),
                username: "backend".into(),
                name: Some("Backend".into()),
                client_type: ClientType::Confidential,
                authorized_group: "/backend-callers".into(),
            })
            .with_member(TEST_CLIENT, "/backend-callers");
        let ctx = GrantContext::new(
            config,
            store.clone(),
            Arc::new(test_identity()),
            signer.clone(),
        )
        .with_statistics(statistics.clone())
        .with_directory(Arc::new(directory));
        Self {
            ctx,
            store,
            signer,
            statistics,
        }
    }

    fn session(&self) -> ClientSession {
        ClientSession::new(TEST_CLIENT, "app")
    }

    async fn post(&self, session: Option<&ClientSession>, form: &str) -> GrantResult<TokenResponse> {
        let grant = TokenRequest::from_form(form.as_bytes())?.into_grant()?;
        dispatch(&self.ctx, session, grant, None).await
    }
}

fn rotating_config(rotation: RefreshTokenRotation) -> IssuerConfig {
    IssuerConfig {
        refresh_token: RefreshTokenConfig {
            issue_policy: RefreshTokenIssuePolicy::Always,
            rotation,
            ..RefreshTokenConfig::default()
        },
        ..test_config()
    }
}

/// Revokes the chain of every token right after rotating it, as a replay of
/// the rotated value arriving between the rotation and the response would.
struct RevokeAfterRotation {
    inner: Arc<MemoryTokenStore>,
}

#[async_trait]
impl TokenStore for RevokeAfterRotation {
    async fn store_authorization_code(&self, record: StoredToken) -> StoreResult<()> {
        self.inner.store_authorization_code(record).await
    }

    async fn consume_authorization_code(&self, code: &str) -> StoreResult<Option<StoredToken>> {
        self.inner.consume_authorization_code(code).await
    }

    async fn store_access_token(&self, record: StoredToken) -> StoreResult<()> {
        self.inner.store_access_token(record).await
    }

    async fn read_access_token(&self, key: &str) -> StoreResult<Option<StoredToken>> {
        self.inner.read_access_token(key).await
    }

    async fn remove_access_token(&self, key: &str) -> StoreResult<()> {
        self.inner.remove_access_token(key).await
    }

    async fn store_refresh_token(&self, record: StoredToken) -> StoreResult<()> {
        self.inner.store_refresh_token(record).await
    }

    async fn read_refresh_token(&self, value: &str) -> StoreResult<Option<StoredToken>> {
        self.inner.read_refresh_token(value).await
    }

    async fn get_used_refresh_token(&self, value: &str) -> StoreResult<Option<StoredToken>> {
        self.inner.get_used_refresh_token(value).await
    }

    async fn rotate_refresh_token(
        &self,
        old_value: &str,
        successor: StoredToken,
    ) -> StoreResult<RotationOutcome> {
        let outcome = self.inner.rotate_refresh_token(old_value, successor).await?;
        if outcome == RotationOutcome::Rotated {
            if let Some(used) = self.inner.get_used_refresh_token(old_value).await? {
                self.inner
                    .revoke_chain(
                        used.token.client_id,
                        used.owner,
                        used.token.first_refresh_rolling_token.as_deref(),
                    )
                    .await?;
            }
        }
        Ok(outcome)
    }

    async fn revoke_chain(
        &self,
        client: EntityId,
        owner: EntityId,
        chain: Option<&str>,
    ) -> StoreResult<u64> {
        self.inner.revoke_chain(client, owner, chain).await
    }

    async fn cleanup_expired(&self, now: OffsetDateTime) -> StoreResult<u64> {
        self.inner.cleanup_expired(now).await
    }
}

fn s256(verifier: &str) -> String {
    let verifier = PkceVerifier::new(verifier).unwrap();
    PkceChallenge::from_verifier(&verifier, PkceChallengeMethod::S256)
        .as_str()
        .to_string()
}

#[tokio::test]
async fn confidential_code_is_exchanged_once() {
    let h = Harness::new(test_config());
    let mut record = grant_record(h.signer.as_ref(), "abc123", ClientType::Confidential);
    record.token.redirect_uri = Some("https://cb".into());
    h.store.store_authorization_code(record).await.unwrap();
    let form = "grant_type=authorization_code&code=abc123&redirect_uri=https%3A%2F%2Fcb";

    let response = h.post(Some(&h.session()), form).await.unwrap();
    assert_eq!(response.expires_in, 3600);
    assert!(response.refresh_token.is_none());
    assert!(!response.access_token.is_empty());

    let err = h.post(Some(&h.session()), form).await.unwrap_err();
    assert_eq!(err.oauth_error_code(), "invalid_grant");
    assert_eq!(h.store.access_token_count(), 1);

    let outcomes = h.statistics.outcomes();
    assert_eq!(outcomes.len(), 2);
    assert!(outcomes[0].is_success());
    assert!(!outcomes[1].is_success());
}

#[tokio::test]
async fn public_client_pkce() {
    let h = Harness::new(test_config());
    for code in ["good", "bad"] {
        let mut record = grant_record(h.signer.as_ref(), code, ClientType::Public);
        record.token.pkce = PkceInfo::new(s256("xyz"), Some("S256"));
        h.store.store_authorization_code(record).await.unwrap();
    }
    let redirect = "&redirect_uri=https%3A%2F%2Fapp.example%2Fcb";

    let ok = h
        .post(None, &format!("grant_type=authorization_code&code=good&code_verifier=xyz{redirect}"))
        .await;
    assert!(ok.is_ok());

    let err = h
        .post(None, &format!("grant_type=authorization_code&code=bad&code_verifier=wrong{redirect}"))
        .await
        .unwrap_err();
    assert_eq!(err.oauth_error_code(), "invalid_grant");
    assert_eq!(err.public_description(), "PKCE verification error");
    assert_eq!(h.store.access_token_count(), 1);
    assert_eq!(h.store.code_count(), 0);

    let retry = h
        .post(None, &format!("grant_type=authorization_code&code=bad&code_verifier=xyz{redirect}"))
        .await
        .unwrap_err();
    assert_eq!(retry.public_description(), "wrong code");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_code_exchange_has_one_winner() {
    let h = Arc::new(Harness::new(test_config()));
    h.store
        .store_authorization_code(grant_record(h.signer.as_ref(), "race", ClientType::Confidential))
        .await
        .unwrap();

    let mut tasks = Vec::new();
    for _ in 0..16 {
        let h = h.clone();
        tasks.push(tokio::spawn(async move {
            let session = h.session();
            h.post(
                Some(&session),
                "grant_type=authorization_code&code=race&redirect_uri=https%3A%2F%2Fapp.example%2Fcb",
            )
            .await
        }));
    }
    let mut wins = 0;
    for task in tasks {
        match task.await.unwrap() {
            Ok(_) => wins += 1,
            Err(e) => assert_eq!(e.public_description(), "wrong code"),
        }
    }
    assert_eq!(wins, 1);
    assert_eq!(h.store.access_token_count(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_refresh_rotates_once() {
    let h = Arc::new(Harness::new(rotating_config(RefreshTokenRotation::AllClients)));
    let mut record = grant_record(h.signer.as_ref(), "shared", ClientType::Confidential);
    record.token.first_refresh_rolling_token = Some("chain".into());
    h.store.store_refresh_token(record).await.unwrap();

    let mut tasks = Vec::new();
    for _ in 0..16 {
        let h = h.clone();
        tasks.push(tokio::spawn(async move {
            let session = h.session();
            h.post(Some(&session), "grant_type=refresh_token&refresh_token=shared")
                .await
        }));
    }
    let mut wins = 0;
    for task in tasks {
        match task.await.unwrap() {
            Ok(response) => {
                assert!(response.refresh_token.is_some());
                wins += 1;
            }
            // Late requests may find the chain already revoked by an earlier loser.
            Err(e) => assert!(
                matches!(
                    e.public_description().as_str(),
                    "refresh token has already been used" | "wrong refresh token"
                ),
                "{e}"
            ),
        }
    }
    assert_eq!(wins, 1);
}

#[tokio::test]
async fn rotated_token_reuse_revokes_family() {
    let h = Harness::new(rotating_config(RefreshTokenRotation::PublicClients));
    let mut record = grant_record(h.signer.as_ref(), "code", ClientType::Public);
    record.token.pkce = PkceInfo::new("plain-verifier", None);
    h.store.store_authorization_code(record).await.unwrap();

    let issued = h
        .post(
            None,
            "grant_type=authorization_code&code=code&code_verifier=plain-verifier\
             &redirect_uri=https%3A%2F%2Fapp.example%2Fcb",
        )
        .await
        .unwrap();
    let r1 = issued.refresh_token.unwrap();

    let refreshed = h
        .post(None, &format!("grant_type=refresh_token&refresh_token={r1}&scope=email"))
        .await
        .unwrap();
    assert_eq!(refreshed.scope, "email");
    let r2 = refreshed.refresh_token.unwrap();

    let again = h
        .post(None, &format!("grant_type=refresh_token&refresh_token={r2}"))
        .await
        .unwrap();
    let r3 = again.refresh_token.unwrap();
    assert!(
        h.store
            .read_access_token(&again.access_token)
            .await
            .unwrap()
            .is_some()
    );

    let reuse = h
        .post(None, &format!("grant_type=refresh_token&refresh_token={r1}"))
        .await
        .unwrap_err();
    assert_eq!(reuse.oauth_error_code(), "invalid_request");

    assert!(h.store.read_refresh_token(&r3).await.unwrap().is_none());
    assert!(
        h.store
            .read_access_token(&again.access_token)
            .await
            .unwrap()
            .is_none()
    );
    let err = h
        .post(None, &format!("grant_type=refresh_token&refresh_token={r3}"))
        .await
        .unwrap_err();
    assert_eq!(err.oauth_error_code(), "invalid_grant");
}

#[tokio::test]
async fn reuse_of_unchained_token_revokes_family() {
    let h = Harness::new(rotating_config(RefreshTokenRotation::AllClients));
    let mut record = grant_record(h.signer.as_ref(), "r1", ClientType::Confidential);
    record.token.refresh_token = Some("r1".into());
    assert!(record.token.first_refresh_rolling_token.is_none());
    h.store.store_refresh_token(record).await.unwrap();

    let refreshed = h
        .post(Some(&h.session()), "grant_type=refresh_token&refresh_token=r1")
        .await
        .unwrap();
    let r2 = refreshed.refresh_token.unwrap();

    let reuse = h
        .post(Some(&h.session()), "grant_type=refresh_token&refresh_token=r1")
        .await
        .unwrap_err();
    assert_eq!(reuse.oauth_error_code(), "invalid_request");
    assert_eq!(reuse.public_description(), "refresh token has already been used");

    assert!(h.store.read_refresh_token(&r2).await.unwrap().is_none());
    assert!(
        h.store
            .read_access_token(&refreshed.access_token)
            .await
            .unwrap()
            .is_none()
    );
    assert_eq!(h.store.refresh_token_count(), 0);
}

#[tokio::test]
async fn revocation_racing_rotation_reaches_new_tokens() {
    let memory = Arc::new(MemoryTokenStore::new());
    let signer = test_signer();
    let ctx = GrantContext::new(
        rotating_config(RefreshTokenRotation::AllClients),
        Arc::new(RevokeAfterRotation {
            inner: memory.clone(),
        }),
        Arc::new(test_identity()),
        signer.clone(),
    );
    let mut record = grant_record(signer.as_ref(), "r1", ClientType::Confidential);
    record.token.refresh_token = Some("r1".into());
    memory.store_refresh_token(record).await.unwrap();

    let session = ClientSession::new(TEST_CLIENT, "app");
    let grant = TokenRequest::from_form(b"grant_type=refresh_token&refresh_token=r1")
        .unwrap()
        .into_grant()
        .unwrap();
    let response = dispatch(&ctx, Some(&session), grant, None).await.unwrap();
    let r2 = response.refresh_token.unwrap();

    assert!(memory.read_refresh_token(&r2).await.unwrap().is_none());
    assert!(
        memory
            .read_access_token(&response.access_token)
            .await
            .unwrap()
            .is_none()
    );
    assert_eq!(memory.access_token_count(), 0);
    assert_eq!(memory.refresh_token_count(), 0);
}

#[tokio::test]
async fn outcomes_carry_client_and_owner() {
    let h = Harness::new(test_config());
    let mut record = grant_record(h.signer.as_ref(), "code", ClientType::Public);
    record.token.pkce = PkceInfo::new("plain-verifier", None);
    h.store.store_authorization_code(record).await.unwrap();

    h.post(
        None,
        "grant_type=authorization_code&code=code&code_verifier=plain-verifier\
         &redirect_uri=https%3A%2F%2Fapp.example%2Fcb",
    )
    .await
    .unwrap();
    h.post(None, "grant_type=authorization_code&code=code")
        .await
        .unwrap_err();

    let outcomes = h.statistics.outcomes();
    assert_eq!(outcomes.len(), 2);
    assert!(outcomes[0].is_success());
    assert_eq!(outcomes[0].owner, Some(TEST_OWNER));
    assert_eq!(outcomes[0].client, Some(TEST_CLIENT));
    assert_eq!(outcomes[0].client_username.as_deref(), Some("app"));
    assert!(!outcomes[1].is_success());
    assert_eq!(outcomes[1].owner, None);
    assert_eq!(outcomes[1].client, None);
}

#[tokio::test]
async fn exact_scope_wins_over_wildcard() {
    let h = Harness::new(rotating_config(RefreshTokenRotation::Disabled));
    let mut record = grant_record(h.signer.as_ref(), "r1", ClientType::Confidential);
    record.token.requested_scope = vec!["read:*".into(), "read:special".into()];
    record.token.effective_scope = vec![
        RequestedScope::new("read:*", ScopeDefinition::new("read:*", ["doc"]), true),
        RequestedScope::from_definition(ScopeDefinition::new("read:special", ["name"])),
    ];
    h.store.store_refresh_token(record).await.unwrap();

    let response = h
        .post(
            Some(&h.session()),
            "grant_type=refresh_token&refresh_token=r1&scope=read%3Aspecial+read%3Aother",
        )
        .await
        .unwrap();
    assert_eq!(response.scope, "read:special read:other");

    let stored = h
        .store
        .read_access_token(&response.access_token)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.token.effective_scope[0].definition.name, "read:special");
    assert_eq!(stored.token.effective_scope[1].definition.name, "read:*");
    let user_info: Value = serde_json::from_str(stored.token.user_info.as_deref().unwrap()).unwrap();
    assert_eq!(user_info["name"], "Alice");
    assert_eq!(user_info["doc"], serde_json::json!(["d1", "d2"]));
}

#[tokio::test]
async fn unresolvable_scope_mints_nothing() {
    let h = Harness::new(rotating_config(RefreshTokenRotation::AllClients));
    let mut record = grant_record(h.signer.as_ref(), "r1", ClientType::Confidential);
    record.token.first_refresh_rolling_token = Some("chain".into());
    h.store.store_refresh_token(record).await.unwrap();

    let err = h
        .post(Some(&h.session()), "grant_type=refresh_token&refresh_token=r1&scope=email+admin")
        .await
        .unwrap_err();
    assert_eq!(err.oauth_error_code(), "invalid_scope");
    assert_eq!(h.store.access_token_count(), 0);
    assert_eq!(h.store.refresh_token_count(), 1);
    assert!(h.store.read_refresh_token("r1").await.unwrap().is_some());
}

#[tokio::test]
async fn jwt_access_token_claims() {
    let h = Harness::new(IssuerConfig {
        access_token_format: AccessTokenFormat::Jwt,
        access_token_validity: Duration::from_secs(900),
        ..test_config()
    });

    let mut ids = Vec::new();
    for _ in 0..3 {
        let response = h
            .post(Some(&h.session()), "grant_type=client_credentials&scope=email+read%3Adocs")
            .await
            .unwrap();
        let claims = h.signer.verify(&response.access_token).unwrap();
        let iat = claims["iat"].as_i64().unwrap();
        assert_eq!(claims["exp"].as_i64().unwrap(), iat + 900);
        assert_eq!(claims["scope"], response.scope.as_str());
        assert_eq!(claims["scope"], "email read:docs");
        assert_eq!(claims["client_id"], "app");
        ids.push(claims["jti"].as_str().unwrap().to_string());
    }
    ids.sort();
    ids.dedup();
    assert_eq!(ids.len(), 3);
}

#[tokio::test]
async fn token_exchange_flow() {
    let h = Harness::new(test_config());
    let mut subject = grant_record(h.signer.as_ref(), "subject", ClientType::Confidential);
    subject.token.requested_scope.push(EXCHANGE_SCOPE.into());
    h.store.store_access_token(subject).await.unwrap();

    let response = h
        .post(
            Some(&h.session()),
            "grant_type=urn%3Aietf%3Aparams%3Aoauth%3Agrant-type%3Atoken-exchange\
             &subject_token=subject\
             &subject_token_type=urn%3Aietf%3Aparams%3Aoauth%3Atoken-type%3Aaccess_token\
             &audience=backend&resource=https%3A%2F%2Fa.example&resource=https%3A%2F%2Fb.example",
        )
        .await
        .unwrap();
    assert_eq!(
        response.issued_token_type.as_deref(),
        Some("urn:ietf:params:oauth:token-type:access_token")
    );

    let stored = h
        .store
        .read_access_token(&response.access_token)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.owner, TEST_OWNER);
    assert_eq!(
        stored.token.audience,
        vec!["backend", "https://a.example", "https://b.example"]
    );
}

#[tokio::test]
async fn exchange_requires_exchange_scope() {
    let h = Harness::new(test_config());
    h.store
        .store_access_token(grant_record(h.signer.as_ref(), "plain", ClientType::Confidential))
        .await
        .unwrap();

    let err = h
        .post(
            Some(&h.session()),
            "grant_type=urn%3Aietf%3Aparams%3Aoauth%3Agrant-type%3Atoken-exchange\
             &subject_token=plain\
             &subject_token_type=urn%3Aietf%3Aparams%3Aoauth%3Atoken-type%3Aaccess_token\
             &audience=backend",
        )
        .await
        .unwrap_err();
    assert_eq!(err.oauth_error_code(), "unauthorized_client");
    assert_eq!(
        err.public_description(),
        "subject_token must have token-exchange scope"
    );
    assert_eq!(h.store.access_token_count(), 1);
}
