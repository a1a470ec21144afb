//! In-process collaborators for tests.
//!
//! Enabled for this crate's unit tests and, through the `test-util` feature,
//! for downstream test suites.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use time::OffsetDateTime;

use crate::audit::{GrantOutcome, StatisticsError, TokenStatistics};
use crate::claims::{DynamicAttribute, IdentityError, IdentityProvider, TranslationResult, UserInfoRequest};
use crate::config::IssuerConfig;
use crate::grant::{ClientEntity, DirectoryError, EntityDirectory, GrantContext};
use crate::storage::{RotationOutcome, StoreResult, TokenStore};
use crate::token::{Claims, JwtService, SigningKeyPair, TokenSigner};
use crate::types::{
    ClientSession, ClientType, EntityId, OAuthToken, RequestedScope, ScopeDefinition, StoredToken,
};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// ES384 signer with a freshly generated key.
///
/// # Panics
///
/// Panics if key generation fails.
#[must_use]
pub fn test_signer() -> Arc<dyn TokenSigner> {
    let key = SigningKeyPair::generate_ec().expect("generate test signing key");
    Arc::new(JwtService::new(key))
}

// ============================================================================
// Identity
// ============================================================================

type ErrorFactory = Box<dyn Fn() -> IdentityError + Send + Sync>;

/// Identity provider returning fixed attributes for every owner.
pub struct StaticIdentityProvider {
    attributes: Vec<DynamicAttribute>,
    failure: Option<ErrorFactory>,
    calls: AtomicUsize,
    last_request: Mutex<Option<UserInfoRequest>>,
}

impl StaticIdentityProvider {
    /// Provider releasing `attributes`.
    #[must_use]
    pub fn new(attributes: Vec<DynamicAttribute>) -> Self {
        Self {
            attributes,
            failure: None,
            calls: AtomicUsize::new(0),
            last_request: Mutex::new(None),
        }
    }

    /// Provider failing every lookup with the error built by `failure`.
    #[must_use]
    pub fn failing<F>(failure: F) -> Self
    where
        F: Fn() -> IdentityError + Send + Sync + 'static,
    {
        Self {
            failure: Some(Box::new(failure)),
            ..Self::new(Vec::new())
        }
    }

    /// Number of lookups served so far.
    #[must_use]
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// The most recent lookup.
    #[must_use]
    pub fn last_request(&self) -> Option<UserInfoRequest> {
        lock(&self.last_request).clone()
    }
}

#[async_trait]
impl IdentityProvider for StaticIdentityProvider {
    async fn user_info_unsafe(
        &self,
        request: &UserInfoRequest,
    ) -> Result<TranslationResult, IdentityError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        *lock(&self.last_request) = Some(request.clone());
        match &self.failure {
            Some(failure) => Err(failure()),
            None => Ok(TranslationResult::new(self.attributes.clone())),
        }
    }
}

// ============================================================================
// Directory
// ============================================================================

/// Client directory backed by fixed registrations.
#[derive(Debug, Default)]
pub struct StaticDirectory {
    clients: HashMap<String, ClientEntity>,
    memberships: HashSet<(EntityId, String)>,
}

impl StaticDirectory {
    /// Empty directory.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a client.
    #[must_use]
    pub fn with_client(mut self, client: ClientEntity) -> Self {
        self.clients.insert(client.username.clone(), client);
        self
    }

    /// Make `entity` a member of `group`.
    #[must_use]
    pub fn with_member(mut self, entity: EntityId, group: impl Into<String>) -> Self {
        self.memberships.insert((entity, group.into()));
        self
    }
}

#[async_trait]
impl EntityDirectory for StaticDirectory {
    async fn resolve_client(&self, username: &str) -> Result<ClientEntity, DirectoryError> {
        self.clients
            .get(username)
            .cloned()
            .ok_or_else(|| DirectoryError::NotFound(username.to_string()))
    }

    async fn is_member(&self, entity: EntityId, group: &str) -> Result<bool, DirectoryError> {
        Ok(self.memberships.contains(&(entity, group.to_string())))
    }
}

// ============================================================================
// Statistics
// ============================================================================

/// Statistics collector keeping every outcome in memory.
#[derive(Debug, Default)]
pub struct RecordingStatistics {
    outcomes: Mutex<Vec<GrantOutcome>>,
    fail: bool,
}

impl RecordingStatistics {
    /// Collector accepting every outcome.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Collector rejecting every outcome.
    #[must_use]
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    /// Outcomes recorded so far.
    #[must_use]
    pub fn outcomes(&self) -> Vec<GrantOutcome> {
        lock(&self.outcomes).clone()
    }
}

#[async_trait]
impl TokenStatistics for RecordingStatistics {
    async fn record(&self, outcome: GrantOutcome) -> Result<(), StatisticsError> {
        if self.fail {
            return Err(StatisticsError("collector unavailable".into()));
        }
        lock(&self.outcomes).push(outcome);
        Ok(())
    }
}

// ============================================================================
// Store
// ============================================================================

#[derive(Debug, Default)]
struct MockState {
    codes: HashMap<String, StoredToken>,
    access: HashMap<String, StoredToken>,
    refresh: HashMap<String, (StoredToken, bool)>,
}

/// Single-lock token store.
#[derive(Debug, Default)]
pub struct MockTokenStore {
    state: Mutex<MockState>,
}

impl MockTokenStore {
    /// Empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of access token records.
    #[must_use]
    pub fn access_token_count(&self) -> usize {
        lock(&self.state).access.len()
    }
}

fn live(record: &StoredToken) -> bool {
    !record.is_expired_at(OffsetDateTime::now_utc())
}

#[async_trait]
impl TokenStore for MockTokenStore {
    async fn store_authorization_code(&self, record: StoredToken) -> StoreResult<()> {
        lock(&self.state).codes.insert(record.key.clone(), record);
        Ok(())
    }

    async fn consume_authorization_code(&self, code: &str) -> StoreResult<Option<StoredToken>> {
        Ok(lock(&self.state).codes.remove(code).filter(live))
    }

    async fn store_access_token(&self, record: StoredToken) -> StoreResult<()> {
        lock(&self.state).access.insert(record.key.clone(), record);
        Ok(())
    }

    async fn read_access_token(&self, key: &str) -> StoreResult<Option<StoredToken>> {
        Ok(lock(&self.state).access.get(key).filter(|r| live(r)).cloned())
    }

    async fn remove_access_token(&self, key: &str) -> StoreResult<()> {
        lock(&self.state).access.remove(key);
        Ok(())
    }

    async fn store_refresh_token(&self, record: StoredToken) -> StoreResult<()> {
        lock(&self.state)
            .refresh
            .insert(record.key.clone(), (record, false));
        Ok(())
    }

    async fn read_refresh_token(&self, value: &str) -> StoreResult<Option<StoredToken>> {
        Ok(lock(&self.state)
            .refresh
            .get(value)
            .filter(|(r, rotated)| !rotated && live(r))
            .map(|(r, _)| r.clone()))
    }

    async fn get_used_refresh_token(&self, value: &str) -> StoreResult<Option<StoredToken>> {
        Ok(lock(&self.state)
            .refresh
            .get(value)
            .filter(|(r, rotated)| *rotated && live(r))
            .map(|(r, _)| r.clone()))
    }

    async fn rotate_refresh_token(
        &self,
        old_value: &str,
        successor: StoredToken,
    ) -> StoreResult<RotationOutcome> {
        let mut state = lock(&self.state);
        match state.refresh.get_mut(old_value) {
            Some((record, rotated)) if live(record) => {
                if *rotated {
                    return Ok(RotationOutcome::AlreadyUsed);
                }
                *rotated = true;
                if record.token.first_refresh_rolling_token.is_none() {
                    record.token.first_refresh_rolling_token =
                        successor.token.first_refresh_rolling_token.clone();
                }
            }
            _ => return Ok(RotationOutcome::NotFound),
        }
        state
            .refresh
            .insert(successor.key.clone(), (successor, false));
        Ok(RotationOutcome::Rotated)
    }

    async fn revoke_chain(
        &self,
        client: EntityId,
        owner: EntityId,
        chain: Option<&str>,
    ) -> StoreResult<u64> {
        let mut state = lock(&self.state);
        let before = state.access.len() + state.refresh.len();
        state.access.retain(|_, r| !r.belongs_to(client, owner, chain));
        state
            .refresh
            .retain(|_, (r, _)| !r.belongs_to(client, owner, chain));
        let after = state.access.len() + state.refresh.len();
        Ok((before - after) as u64)
    }

    async fn cleanup_expired(&self, now: OffsetDateTime) -> StoreResult<u64> {
        let mut state = lock(&self.state);
        let before = state.codes.len() + state.access.len() + state.refresh.len();
        state.codes.retain(|_, r| !r.is_expired_at(now));
        state.access.retain(|_, r| !r.is_expired_at(now));
        state.refresh.retain(|_, (r, _)| !r.is_expired_at(now));
        let after = state.codes.len() + state.access.len() + state.refresh.len();
        Ok((before - after) as u64)
    }
}

// ============================================================================
// Environment
// ============================================================================

/// Client entity used by [`TestEnvironment::session`].
pub const TEST_CLIENT: EntityId = EntityId(42);
/// Owner of the records built by [`TestEnvironment::grant_record`].
pub const TEST_OWNER: EntityId = EntityId(7);

/// Issuer configuration with a small scope catalogue.
#[must_use]
pub fn test_config() -> IssuerConfig {
    IssuerConfig {
        issuer: "https://issuer.example/oauth2".into(),
        access_token_validity: Duration::from_secs(3600),
        scopes: vec![
            ScopeDefinition::new("openid", Vec::<String>::new()),
            ScopeDefinition::new("email", ["email"]),
            ScopeDefinition::new("profile", ["name"]),
            ScopeDefinition::new("offline_access", Vec::<String>::new()),
            ScopeDefinition::new("token-exchange", Vec::<String>::new()),
            ScopeDefinition::new("read:*", ["doc"]),
        ],
        ..IssuerConfig::default()
    }
}

/// Identity provider releasing `email`, `name` and a two-valued `doc`.
#[must_use]
pub fn test_identity() -> StaticIdentityProvider {
    StaticIdentityProvider::new(vec![
        DynamicAttribute::strings("email", ["alice@example.com"]),
        DynamicAttribute::strings("name", ["Alice"]),
        DynamicAttribute::strings("doc", ["d1", "d2"]),
    ])
}

/// A [`GrantContext`] wired to in-process collaborators.
pub struct TestEnvironment {
    /// The context under test.
    pub ctx: GrantContext,
    /// Its store.
    pub store: Arc<MockTokenStore>,
    /// Its signer.
    pub signer: Arc<dyn TokenSigner>,
    /// Its identity provider.
    pub identity: Arc<StaticIdentityProvider>,
    /// Its statistics collector.
    pub statistics: Arc<RecordingStatistics>,
}

impl std::fmt::Debug for StaticIdentityProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StaticIdentityProvider")
            .field("attributes", &self.attributes)
            .field("calls", &self.calls())
            .finish_non_exhaustive()
    }
}

impl Default for TestEnvironment {
    fn default() -> Self {
        Self::new(IssuerConfig::default())
    }
}

impl TestEnvironment {
    /// Environment with `config`; an empty scope catalogue is replaced by the
    /// one of [`test_config`].
    #[must_use]
    pub fn new(mut config: IssuerConfig) -> Self {
        if config.scopes.is_empty() {
            config.scopes = test_config().scopes;
        }
        let store = Arc::new(MockTokenStore::new());
        let signer = test_signer();
        let identity = Arc::new(test_identity());
        let statistics = Arc::new(RecordingStatistics::new());
        let ctx = GrantContext::new(config, store.clone(), identity.clone(), signer.clone())
            .with_statistics(statistics.clone());
        Self {
            ctx,
            store,
            signer,
            identity,
            statistics,
        }
    }

    /// Enable token exchange with `directory`.
    #[must_use]
    pub fn with_directory(mut self, directory: StaticDirectory) -> Self {
        self.ctx = self.ctx.with_directory(Arc::new(directory));
        self
    }

    /// Session of [`TEST_CLIENT`].
    #[must_use]
    pub fn session(&self) -> ClientSession {
        ClientSession::new(TEST_CLIENT, "app").with_display_name("Test App")
    }

    /// See [`grant_record`].
    #[must_use]
    pub fn grant_record(&self, key: &str, client_type: ClientType) -> StoredToken {
        grant_record(self.signer.as_ref(), key, client_type)
    }
}

/// A grant of `openid email` by [`TEST_OWNER`] to [`TEST_CLIENT`], stored
/// under `key` for ten minutes, with an ID token signed by `signer`.
///
/// # Panics
///
/// Panics if the ID token cannot be signed.
#[must_use]
pub fn grant_record(signer: &dyn TokenSigner, key: &str, client_type: ClientType) -> StoredToken {
    let mut token = OAuthToken::new("alice", TEST_CLIENT, "app", "https://issuer.example/oauth2", 3600);
    token.client_type = client_type;
    token.requested_scope = vec!["openid".into(), "email".into()];
    token.effective_scope = vec![
        RequestedScope::from_definition(ScopeDefinition::new("openid", Vec::<String>::new())),
        RequestedScope::from_definition(ScopeDefinition::new("email", ["email"])),
    ];
    token.redirect_uri = Some("https://app.example/cb".into());
    token.user_info = Some(json!({"sub": "alice", "email": "alice@example.com"}).to_string());

    let mut id_claims = Claims::new();
    id_claims.insert("sub".into(), json!("alice"));
    id_claims.insert("nonce".into(), json!("n-1"));
    token.openid_token = Some(signer.sign(&id_claims, None).expect("sign test ID token"));

    let now = OffsetDateTime::now_utc();
    StoredToken::new(key, TEST_OWNER, token, now, Some(now + Duration::from_secs(600)))
}
