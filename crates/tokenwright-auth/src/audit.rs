//! Grant statistics.
//!
//! Every terminal outcome of the token endpoint is reported to a
//! [`TokenStatistics`] collector. Reporting is best effort: a failing
//! collector is logged and never changes the response.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::error::GrantError;
use crate::types::{EntityId, GrantType};

/// Outcome category of a grant request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum GrantStatus {
    /// Tokens were issued.
    Issued,
    /// The request failed with an OAuth error code.
    Failed {
        /// OAuth error code.
        error: String,
    },
}

/// A reported grant outcome.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GrantOutcome {
    /// Grant type of the request.
    pub grant_type: GrantType,
    /// Client entity, when known.
    pub client: Option<EntityId>,
    /// OAuth `client_id` of the client, when known.
    pub client_username: Option<String>,
    /// Owner of the grant, when known.
    pub owner: Option<EntityId>,
    /// Result of the request.
    #[serde(flatten)]
    pub status: GrantStatus,
    /// When the outcome was recorded.
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
}

impl GrantOutcome {
    /// Outcome of a grant that issued tokens.
    #[must_use]
    pub fn issued(grant_type: GrantType) -> Self {
        Self {
            grant_type,
            client: None,
            client_username: None,
            owner: None,
            status: GrantStatus::Issued,
            timestamp: OffsetDateTime::now_utc(),
        }
    }

    /// Outcome of a failed grant.
    #[must_use]
    pub fn failed(grant_type: GrantType, error: &GrantError) -> Self {
        Self {
            status: GrantStatus::Failed {
                error: error.oauth_error_code().to_string(),
            },
            ..Self::issued(grant_type)
        }
    }

    /// Sets the client.
    #[must_use]
    pub fn client(mut self, entity: EntityId, username: impl Into<String>) -> Self {
        self.client = Some(entity);
        self.client_username = Some(username.into());
        self
    }

    /// Sets the owner.
    #[must_use]
    pub fn owner(mut self, owner: EntityId) -> Self {
        self.owner = Some(owner);
        self
    }

    /// Returns `true` if tokens were issued.
    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self.status, GrantStatus::Issued)
    }
}

/// Error reported by a statistics collector.
#[derive(Debug, thiserror::Error)]
#[error("Statistics collector failure: {0}")]
pub struct StatisticsError(pub String);

/// Collector of grant outcomes.
#[async_trait]
pub trait TokenStatistics: Send + Sync {
    /// Record one outcome.
    ///
    /// # Errors
    ///
    /// Returns an error if the outcome cannot be recorded.
    async fn record(&self, outcome: GrantOutcome) -> Result<(), StatisticsError>;
}

/// Collector emitting each outcome as a tracing event.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingStatistics;

#[async_trait]
impl TokenStatistics for TracingStatistics {
    async fn record(&self, outcome: GrantOutcome) -> Result<(), StatisticsError> {
        match &outcome.status {
            GrantStatus::Issued => tracing::info!(
                target: "tokenwright::statistics",
                grant_type = %outcome.grant_type,
                client_id = outcome.client_username.as_deref().unwrap_or("-"),
                owner = outcome.owner.map(|o| o.0),
                "Token issued"
            ),
            GrantStatus::Failed { error } => tracing::info!(
                target: "tokenwright::statistics",
                grant_type = %outcome.grant_type,
                client_id = outcome.client_username.as_deref().unwrap_or("-"),
                owner = outcome.owner.map(|o| o.0),
                error = %error,
                "Token request failed"
            ),
        }
        Ok(())
    }
}

/// Report an outcome, logging and swallowing collector failures.
pub async fn report(statistics: &dyn TokenStatistics, outcome: GrantOutcome) {
    let grant_type = outcome.grant_type;
    if let Err(e) = statistics.record(outcome).await {
        tracing::warn!(error = %e, %grant_type, "Cannot record grant statistics");
    }
}
