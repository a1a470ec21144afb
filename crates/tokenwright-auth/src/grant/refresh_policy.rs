//! Refresh token issuance.

use time::OffsetDateTime;
use uuid::Uuid;

use crate::config::{RefreshTokenConfig, RefreshTokenIssuePolicy};
use crate::error::GrantResult;
use crate::storage::TokenStore;
use crate::types::{EntityId, OAuthToken, OFFLINE_ACCESS_SCOPE, StoredToken, generate_token_value};

/// Returns `true` if a refresh token should accompany `token`.
///
/// Public clients only get refresh tokens when rotation covers them.
#[must_use]
pub fn should_issue(config: &RefreshTokenConfig, token: &OAuthToken) -> bool {
    if token.client_type.is_public() && !config.rotates_for(token.client_type) {
        return false;
    }
    match config.issue_policy {
        RefreshTokenIssuePolicy::Never => false,
        RefreshTokenIssuePolicy::Always => true,
        RefreshTokenIssuePolicy::OfflineAccess => token.has_effective_scope(OFFLINE_ACCESS_SCOPE),
    }
}

/// Start a rotation chain on `token` if its client rotates and none exists.
pub fn ensure_rotation_chain(config: &RefreshTokenConfig, token: &mut OAuthToken) {
    if config.rotates_for(token.client_type) && token.first_refresh_rolling_token.is_none() {
        token.first_refresh_rolling_token = Some(Uuid::new_v4().to_string());
    }
}

/// Mint and persist a refresh token for `token` if the policy allows it.
///
/// On success the value is recorded in `token.refresh_token` and returned.
///
/// # Errors
///
/// Returns `server_error` if the token cannot be stored.
pub async fn create_refresh_token(
    config: &RefreshTokenConfig,
    store: &dyn TokenStore,
    now: OffsetDateTime,
    token: &mut OAuthToken,
    owner: EntityId,
) -> GrantResult<Option<String>> {
    if !should_issue(config, token) {
        return Ok(None);
    }
    ensure_rotation_chain(config, token);

    let value = generate_token_value();
    token.refresh_token = Some(value.clone());
    let record = StoredToken::new(value.clone(), owner, token.clone(), now, config.expiry(now));
    store.store_refresh_token(record).await?;

    tracing::debug!(
        client_id = %token.client_id,
        %owner,
        rotating = token.first_refresh_rolling_token.is_some(),
        "Issued refresh token"
    );
    Ok(Some(value))
}
