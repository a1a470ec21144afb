//! Issuer configuration.
//!
//! Every derived token re-reads lifetimes and issuer from the current
//! configuration, so changes apply on the next refresh or exchange.

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::token::access::AccessTokenFormat;
use crate::token::jwt::SigningAlgorithm;
use crate::types::{ClientType, ScopeDefinition};

/// Root configuration of the token issuer.
///
/// # Example (TOML)
///
/// ```toml
/// issuer = "https://idp.example.com/oauth2"
/// access_token_validity = "1h"
/// access_token_format = "as_requested"
///
/// [refresh_token]
/// issue_policy = "offline_access"
/// rotation = "public_clients"
/// validity = "30d"
///
/// [[scopes]]
/// name = "profile"
/// attributes = ["name", "locale"]
/// ```
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct IssuerConfig {
    /// Issuer identifier (the `iss` claim).
    pub issuer: String,

    /// Access token lifetime.
    #[serde(with = "humantime_serde")]
    pub access_token_validity: Duration,

    /// Upper bound for access token lifetime extension; zero disables it.
    #[serde(with = "humantime_serde")]
    pub max_extended_access_token_validity: Duration,

    /// Format of minted access tokens.
    pub access_token_format: AccessTokenFormat,

    /// Refresh token issuance and rotation.
    pub refresh_token: RefreshTokenConfig,

    /// Group under which OAuth clients are registered.
    pub clients_group: String,

    /// Group whose members may be issued tokens.
    pub users_group: String,

    /// Output translation profile applied to released attributes.
    pub output_profile: Option<String>,

    /// Token signing key.
    pub signing: SigningConfig,

    /// Active scope catalogue.
    pub scopes: Vec<ScopeDefinition>,
}

impl Default for IssuerConfig {
    fn default() -> Self {
        Self {
            issuer: "http://localhost:8080/oauth2".to_string(),
            access_token_validity: Duration::from_secs(3600),
            max_extended_access_token_validity: Duration::ZERO,
            access_token_format: AccessTokenFormat::default(),
            refresh_token: RefreshTokenConfig::default(),
            clients_group: "/oauth-clients".to_string(),
            users_group: "/".to_string(),
            output_profile: None,
            signing: SigningConfig::default(),
            scopes: Vec::new(),
        }
    }
}

/// When refresh tokens are issued.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RefreshTokenIssuePolicy {
    /// Never issue refresh tokens.
    #[default]
    Never,
    /// Issue a refresh token with every access token.
    Always,
    /// Issue only when `offline_access` is granted.
    OfflineAccess,
}

/// Which clients get refresh-token rotation with reuse detection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RefreshTokenRotation {
    /// Refresh tokens are reusable until they expire.
    #[default]
    Disabled,
    /// Rotate for public clients only.
    PublicClients,
    /// Rotate for every client.
    AllClients,
}

/// Refresh token settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RefreshTokenConfig {
    /// When refresh tokens are issued.
    pub issue_policy: RefreshTokenIssuePolicy,

    /// Refresh token lifetime; zero means unlimited.
    #[serde(with = "humantime_serde")]
    pub validity: Duration,

    /// Rotation with reuse detection.
    pub rotation: RefreshTokenRotation,
}

impl Default for RefreshTokenConfig {
    fn default() -> Self {
        Self {
            issue_policy: RefreshTokenIssuePolicy::Never,
            validity: Duration::ZERO,
            rotation: RefreshTokenRotation::Disabled,
        }
    }
}

impl RefreshTokenConfig {
    /// Returns `true` if tokens of this client kind rotate on use.
    #[must_use]
    pub fn rotates_for(&self, client_type: ClientType) -> bool {
        match self.rotation {
            RefreshTokenRotation::Disabled => false,
            RefreshTokenRotation::PublicClients => client_type.is_public(),
            RefreshTokenRotation::AllClients => true,
        }
    }

    /// Expiry of a refresh token created at `now`.
    #[must_use]
    pub fn expiry(&self, now: OffsetDateTime) -> Option<OffsetDateTime> {
        if self.validity.is_zero() {
            None
        } else {
            Some(now + self.validity)
        }
    }
}

/// Token signing key configuration.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct SigningConfig {
    /// Signing algorithm.
    pub algorithm: SigningAlgorithm,

    /// PEM file with the private key. An ephemeral key is generated when unset.
    pub private_key_pem_path: Option<PathBuf>,

    /// PEM file with the public key (required for RSA keys).
    pub public_key_pem_path: Option<PathBuf>,

    /// Key id published in the `kid` header.
    pub key_id: Option<String>,
}

/// Configuration error.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// A value is present but invalid.
    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),

    /// A required value is missing.
    #[error("Missing required configuration: {0}")]
    Missing(String),

    /// The configuration sources could not be read or deserialized.
    #[error("Cannot load configuration: {0}")]
    Load(String),
}

impl IssuerConfig {
    /// Access token lifetime in whole seconds.
    #[must_use]
    pub fn access_token_validity_secs(&self) -> u64 {
        self.access_token_validity.as_secs()
    }

    /// Maximum extended lifetime in whole seconds.
    #[must_use]
    pub fn max_extended_validity_secs(&self) -> u64 {
        self.max_extended_access_token_validity.as_secs()
    }

    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidValue` describing the first problem found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.issuer.is_empty() {
            return Err(ConfigError::Missing("issuer".to_string()));
        }
        match url::Url::parse(&self.issuer) {
            Ok(url) if matches!(url.scheme(), "http" | "https") => {}
            _ => {
                return Err(ConfigError::InvalidValue(format!(
                    "issuer must be an http(s) URL, got '{}'",
                    self.issuer
                )));
            }
        }

        if self.access_token_validity.as_secs() == 0 {
            return Err(ConfigError::InvalidValue(
                "access_token_validity must be at least one second".to_string(),
            ));
        }

        if !self.max_extended_access_token_validity.is_zero()
            && self.max_extended_access_token_validity < self.access_token_validity
        {
            return Err(ConfigError::InvalidValue(
                "max_extended_access_token_validity must not be shorter than access_token_validity"
                    .to_string(),
            ));
        }

        let mut seen = HashSet::new();
        for scope in &self.scopes {
            if scope.name.is_empty() || scope.name.chars().any(char::is_whitespace) {
                return Err(ConfigError::InvalidValue(format!(
                    "invalid scope name '{}'",
                    scope.name
                )));
            }
            if !seen.insert(scope.name.as_str()) {
                return Err(ConfigError::InvalidValue(format!(
                    "duplicate scope '{}'",
                    scope.name
                )));
            }
        }

        Ok(())
    }
}

/// Issuer configuration behind an `ArcSwap`.
///
/// Readers take a snapshot per request; a replacement is picked up by the
/// next grant without blocking requests in flight.
#[derive(Debug, Clone)]
pub struct ReloadableIssuerConfig {
    inner: Arc<ArcSwap<IssuerConfig>>,
}

impl ReloadableIssuerConfig {
    /// Wrap a configuration.
    #[must_use]
    pub fn new(config: IssuerConfig) -> Self {
        Self {
            inner: Arc::new(ArcSwap::from_pointee(config)),
        }
    }

    /// Snapshot of the current configuration.
    #[must_use]
    pub fn current(&self) -> Arc<IssuerConfig> {
        self.inner.load_full()
    }

    /// Validate and install a new configuration.
    ///
    /// # Errors
    ///
    /// Returns the validation error; the current configuration stays in place.
    pub fn replace(&self, config: IssuerConfig) -> Result<(), ConfigError> {
        config.validate()?;
        tracing::info!(issuer = %config.issuer, "Issuer configuration replaced");
        self.inner.store(Arc::new(config));
        Ok(())
    }
}

impl From<IssuerConfig> for ReloadableIssuerConfig {
    fn from(config: IssuerConfig) -> Self {
        Self::new(config)
    }
}

/// Loading from files and the environment.
pub mod loader {
    use super::{ConfigError, IssuerConfig};
    use config::{Config, Environment, File};
    use std::path::PathBuf;

    /// Default configuration file looked up when no path is given.
    pub const DEFAULT_CONFIG_FILE: &str = "tokenwright.toml";

    /// Prefix of environment overrides, e.g. `TOKENWRIGHT__ISSUER`.
    pub const ENV_PREFIX: &str = "TOKENWRIGHT";

    /// Load configuration from an optional file plus environment overrides,
    /// then validate it.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Load` if a source cannot be read or deserialized
    /// and the validation error otherwise.
    pub fn load_config(path: Option<&str>) -> Result<IssuerConfig, ConfigError> {
        let mut builder = Config::builder();
        let file = PathBuf::from(path.unwrap_or(DEFAULT_CONFIG_FILE));
        if file.exists() {
            builder = builder.add_source(File::from(file));
        } else if path.is_some() {
            return Err(ConfigError::Load(format!(
                "config file {} not found",
                file.display()
            )));
        }
        // Environment variable overrides, e.g., TOKENWRIGHT__REFRESH_TOKEN__ROTATION=all_clients
        builder = builder.add_source(
            Environment::with_prefix(ENV_PREFIX)
                .try_parsing(true)
                .separator("__"),
        );
        let cfg = builder
            .build()
            .map_err(|e| ConfigError::Load(format!("config build error: {e}")))?;
        let merged: IssuerConfig = cfg
            .try_deserialize()
            .map_err(|e| ConfigError::Load(format!("config deserialize error: {e}")))?;
        merged.validate()?;
        tracing::debug!(issuer = %merged.issuer, scopes = merged.scopes.len(), "Loaded issuer configuration");
        Ok(merged)
    }
}
