//! Token store interface.
//!
//! The store persists authorization codes, access tokens and refresh tokens.
//! Two sequences must run as single atomic operations in every backend:
//!
//! - consuming an authorization code (read-and-remove)
//! - rotating a refresh token (check-unused, mark-used, insert successor)
//!
//! Under concurrent duplicate requests exactly one caller observes the
//! artifact available.
//!
//! # Implementations
//!
//! - `tokenwright-auth-memory` - in-process concurrent map backend

use async_trait::async_trait;
use time::OffsetDateTime;

use crate::error::GrantError;
use crate::types::{EntityId, StoredToken};

/// Errors raised by store backends.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The backend could not be reached or failed.
    #[error("Store backend error: {0}")]
    Backend(String),

    /// A record could not be (de)serialized.
    #[error("Store serialization error: {0}")]
    Serialization(String),
}

impl StoreError {
    /// Create a `Backend` error.
    #[must_use]
    pub fn backend(message: impl Into<String>) -> Self {
        Self::Backend(message.into())
    }
}

impl From<StoreError> for GrantError {
    fn from(err: StoreError) -> Self {
        tracing::error!(error = %err, "Token store failure");
        GrantError::storage(err.to_string())
    }
}

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Outcome of an atomic refresh-token rotation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RotationOutcome {
    /// The presented token was active; it is now a tombstone and the
    /// successor is active.
    Rotated,
    /// The presented token had already been rotated by another request.
    AlreadyUsed,
    /// No active or rotated token with this value exists.
    NotFound,
}

/// Persistence of codes and tokens.
///
/// Reads never return expired records.
#[async_trait]
pub trait TokenStore: Send + Sync {
    /// Store an authorization code record keyed by the code value.
    ///
    /// # Errors
    ///
    /// Returns an error if the record cannot be stored.
    async fn store_authorization_code(&self, record: StoredToken) -> StoreResult<()>;

    /// Atomically read and remove an authorization code.
    ///
    /// Of two concurrent calls for the same code at most one returns the
    /// record.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend fails.
    async fn consume_authorization_code(&self, code: &str) -> StoreResult<Option<StoredToken>>;

    /// Store an access token record keyed by [`StoredToken::key`].
    ///
    /// # Errors
    ///
    /// Returns an error if the record cannot be stored.
    async fn store_access_token(&self, record: StoredToken) -> StoreResult<()>;

    /// Read an access token by its key (raw value or JWT `jti`).
    ///
    /// # Errors
    ///
    /// Returns an error if the backend fails.
    async fn read_access_token(&self, key: &str) -> StoreResult<Option<StoredToken>>;

    /// Remove an access token.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend fails.
    async fn remove_access_token(&self, key: &str) -> StoreResult<()>;

    /// Store an active refresh token keyed by its value.
    ///
    /// # Errors
    ///
    /// Returns an error if the record cannot be stored.
    async fn store_refresh_token(&self, record: StoredToken) -> StoreResult<()>;

    /// Read an active refresh token by value.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend fails.
    async fn read_refresh_token(&self, value: &str) -> StoreResult<Option<StoredToken>>;

    /// Look up a rotated-out refresh token (tombstone) by value.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend fails.
    async fn get_used_refresh_token(&self, value: &str) -> StoreResult<Option<StoredToken>>;

    /// Atomically turn the active token `old_value` into a tombstone and
    /// store `successor` as active.
    ///
    /// The successor must be visible to [`TokenStore::revoke_chain`] no
    /// later than the tombstone. A tombstone without a chain id takes the
    /// successor's. On any outcome other than `Rotated` the successor is
    /// not stored.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend fails.
    async fn rotate_refresh_token(
        &self,
        old_value: &str,
        successor: StoredToken,
    ) -> StoreResult<RotationOutcome>;

    /// Remove every access and refresh record (active and rotated) of one
    /// rotation chain. Without a chain id every record of (client, owner)
    /// is removed. Returns the number of removed records.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend fails.
    async fn revoke_chain(
        &self,
        client: EntityId,
        owner: EntityId,
        chain: Option<&str>,
    ) -> StoreResult<u64>;

    /// Purge records expired at `now`. Returns the number of removed records.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend fails.
    async fn cleanup_expired(&self, now: OffsetDateTime) -> StoreResult<u64>;
}
