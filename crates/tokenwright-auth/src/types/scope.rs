//! Scope catalogue entries and effective scopes.

use serde::{Deserialize, Serialize};

/// A scope offered by the issuer, as configured in the active catalogue.
///
/// A definition whose name contains `*` is a pattern and subsumes every
/// concrete scope name it matches.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScopeDefinition {
    /// Scope name or wildcard pattern.
    pub name: String,

    /// Human-readable description shown on consent screens.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Identity attributes released when this scope is granted.
    ///
    /// `None` only on records persisted before attribute lists were stored;
    /// see [`crate::scope::complete_missing_attributes`].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attributes: Option<Vec<String>>,
}

impl ScopeDefinition {
    /// Create a definition releasing the given attributes.
    #[must_use]
    pub fn new<I, S>(name: impl Into<String>, attributes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name: name.into(),
            description: None,
            attributes: Some(attributes.into_iter().map(Into::into).collect()),
        }
    }

    /// Sets the description.
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Returns `true` if the name is a wildcard pattern.
    #[must_use]
    pub fn is_pattern(&self) -> bool {
        crate::scope::is_wildcard(&self.name)
    }

    /// Attribute names, empty when unset.
    #[must_use]
    pub fn attribute_names(&self) -> &[String] {
        self.attributes.as_deref().unwrap_or_default()
    }
}

/// A scope granted on a token, together with the definition it resolved to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestedScope {
    /// The scope name as granted.
    pub scope: String,

    /// `true` if the granted name is itself a wildcard that later requests may
    /// narrow.
    #[serde(default)]
    pub pattern: bool,

    /// Definition backing this scope.
    pub definition: ScopeDefinition,
}

impl RequestedScope {
    /// Create an effective scope.
    #[must_use]
    pub fn new(scope: impl Into<String>, definition: ScopeDefinition, pattern: bool) -> Self {
        Self {
            scope: scope.into(),
            pattern,
            definition,
        }
    }

    /// Create an effective scope granted under its own definition's name.
    #[must_use]
    pub fn from_definition(definition: ScopeDefinition) -> Self {
        let pattern = definition.is_pattern();
        Self {
            scope: definition.name.clone(),
            pattern,
            definition,
        }
    }
}
