//! In-memory token store for tokenwright-auth.
//!
//! This crate provides an implementation of the `TokenStore` trait from
//! `tokenwright-auth` on top of `dashmap`. Records are keyed by the SHA-256
//! hash of the token value. Single-key read-modify-write sequences (code
//! consumption and refresh rotation) run under the shard lock of that key,
//! which makes them atomic with respect to concurrent requests.
//!
//! Rotated refresh tokens are kept as tombstones for reuse detection and
//! purged by [`TokenStore::cleanup_expired`] once they are older than the
//! tombstone retention, even when refresh tokens themselves never expire.
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use tokenwright_auth::GrantContext;
//! use tokenwright_auth_memory::MemoryTokenStore;
//!
//! let store = Arc::new(MemoryTokenStore::new());
//! let ctx = GrantContext::new(config, store.clone(), identity, signer);
//! let _cleanup = tokenwright_auth_memory::spawn_cleanup(store, Duration::from_secs(60));
//! ```

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use time::OffsetDateTime;
use tokio::task::JoinHandle;

use tokenwright_auth::storage::{RotationOutcome, StoreResult, TokenStore};
use tokenwright_auth::types::{EntityId, StoredToken, hash_token};

/// How long rotated refresh tokens are kept by default.
pub const DEFAULT_TOMBSTONE_RETENTION: time::Duration = time::Duration::days(30);

/// A refresh token and when it was rotated out, if it was.
#[derive(Debug, Clone)]
struct RefreshEntry {
    record: StoredToken,
    rotated_at: Option<OffsetDateTime>,
}

impl RefreshEntry {
    fn active(record: StoredToken) -> Self {
        Self {
            record,
            rotated_at: None,
        }
    }

    fn is_tombstone(&self) -> bool {
        self.rotated_at.is_some()
    }
}

/// Token store holding everything in concurrent maps.
#[derive(Debug)]
pub struct MemoryTokenStore {
    codes: DashMap<String, StoredToken>,
    access: DashMap<String, StoredToken>,
    refresh: DashMap<String, RefreshEntry>,
    tombstone_retention: time::Duration,
}

impl Default for MemoryTokenStore {
    fn default() -> Self {
        Self {
            codes: DashMap::new(),
            access: DashMap::new(),
            refresh: DashMap::new(),
            tombstone_retention: DEFAULT_TOMBSTONE_RETENTION,
        }
    }
}

impl MemoryTokenStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Keep rotated refresh tokens for `retention` after their rotation.
    #[must_use]
    pub fn with_tombstone_retention(mut self, retention: time::Duration) -> Self {
        self.tombstone_retention = retention;
        self
    }

    /// Number of stored authorization codes.
    #[must_use]
    pub fn code_count(&self) -> usize {
        self.codes.len()
    }

    /// Number of stored access tokens.
    #[must_use]
    pub fn access_token_count(&self) -> usize {
        self.access.len()
    }

    /// Number of stored refresh tokens, rotated ones included.
    #[must_use]
    pub fn refresh_token_count(&self) -> usize {
        self.refresh.len()
    }
}

fn live(record: &StoredToken) -> bool {
    !record.is_expired_at(OffsetDateTime::now_utc())
}

#[async_trait]
impl TokenStore for MemoryTokenStore {
    async fn store_authorization_code(&self, record: StoredToken) -> StoreResult<()> {
        self.codes.insert(hash_token(&record.key), record);
        Ok(())
    }

    async fn consume_authorization_code(&self, code: &str) -> StoreResult<Option<StoredToken>> {
        Ok(self
            .codes
            .remove(&hash_token(code))
            .map(|(_, record)| record)
            .filter(live))
    }

    async fn store_access_token(&self, record: StoredToken) -> StoreResult<()> {
        self.access.insert(hash_token(&record.key), record);
        Ok(())
    }

    async fn read_access_token(&self, key: &str) -> StoreResult<Option<StoredToken>> {
        Ok(self
            .access
            .get(&hash_token(key))
            .filter(|r| live(r.value()))
            .map(|r| r.value().clone()))
    }

    async fn remove_access_token(&self, key: &str) -> StoreResult<()> {
        self.access.remove(&hash_token(key));
        Ok(())
    }

    async fn store_refresh_token(&self, record: StoredToken) -> StoreResult<()> {
        self.refresh
            .insert(hash_token(&record.key), RefreshEntry::active(record));
        Ok(())
    }

    async fn read_refresh_token(&self, value: &str) -> StoreResult<Option<StoredToken>> {
        Ok(self
            .refresh
            .get(&hash_token(value))
            .filter(|e| !e.is_tombstone() && live(&e.record))
            .map(|e| e.record.clone()))
    }

    async fn get_used_refresh_token(&self, value: &str) -> StoreResult<Option<StoredToken>> {
        Ok(self
            .refresh
            .get(&hash_token(value))
            .filter(|e| e.is_tombstone() && live(&e.record))
            .map(|e| e.record.clone()))
    }

    async fn rotate_refresh_token(
        &self,
        old_value: &str,
        successor: StoredToken,
    ) -> StoreResult<RotationOutcome> {
        // The successor goes in first: once the tombstone is visible, a
        // reuse revocation must find it. No guard is held while inserting.
        let successor_key = hash_token(&successor.key);
        let chain = successor.token.first_refresh_rolling_token.clone();
        self.refresh
            .insert(successor_key.clone(), RefreshEntry::active(successor));

        // The guard holds the shard lock until the tombstone is written.
        let outcome = match self.refresh.get_mut(&hash_token(old_value)) {
            Some(entry) if !live(&entry.record) => RotationOutcome::NotFound,
            Some(entry) if entry.is_tombstone() => RotationOutcome::AlreadyUsed,
            Some(mut entry) => {
                entry.rotated_at = Some(OffsetDateTime::now_utc());
                if entry.record.token.first_refresh_rolling_token.is_none() {
                    entry.record.token.first_refresh_rolling_token = chain;
                }
                RotationOutcome::Rotated
            }
            None => RotationOutcome::NotFound,
        };
        if outcome != RotationOutcome::Rotated {
            self.refresh.remove(&successor_key);
        }
        Ok(outcome)
    }

    async fn revoke_chain(
        &self,
        client: EntityId,
        owner: EntityId,
        chain: Option<&str>,
    ) -> StoreResult<u64> {
        let mut removed = 0u64;
        self.refresh.retain(|_, e| {
            let keep = !e.record.belongs_to(client, owner, chain);
            removed += u64::from(!keep);
            keep
        });
        self.access.retain(|_, r| {
            let keep = !r.belongs_to(client, owner, chain);
            removed += u64::from(!keep);
            keep
        });
        tracing::debug!(%client, %owner, ?chain, removed, "Revoked refresh chain");
        Ok(removed)
    }

    async fn cleanup_expired(&self, now: OffsetDateTime) -> StoreResult<u64> {
        let retention = self.tombstone_retention;
        let before = self.codes.len() + self.access.len() + self.refresh.len();
        self.codes.retain(|_, r| !r.is_expired_at(now));
        self.access.retain(|_, r| !r.is_expired_at(now));
        self.refresh.retain(|_, e| {
            !e.record.is_expired_at(now) && e.rotated_at.is_none_or(|at| now - at < retention)
        });
        let after = self.codes.len() + self.access.len() + self.refresh.len();
        Ok(before.saturating_sub(after) as u64)
    }
}

/// Spawn a task purging expired records every `interval`.
///
/// The task runs until the returned handle is aborted.
pub fn spawn_cleanup(store: Arc<dyn TokenStore>, interval: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            match store.cleanup_expired(OffsetDateTime::now_utc()).await {
                Ok(0) => {}
                Ok(removed) => tracing::debug!(removed, "Purged expired tokens"),
                Err(e) => tracing::warn!(error = %e, "Token cleanup failed"),
            }
        }
    })
}
