//! Mapping of requested scope names to effective scopes.

use std::collections::HashMap;
use std::sync::Arc;

use crate::error::{GrantError, GrantResult};
use crate::types::{RequestedScope, ScopeDefinition};

use super::matcher::{is_subset_of_pattern, is_wildcard};

/// Resolve newly requested names against the scopes of a previous grant.
///
/// Non-pattern scopes are looked up exactly; pattern scopes are tried in
/// order and the first one subsuming the name wins. Exact matches take
/// precedence over patterns. A single unresolvable name fails the whole call
/// with `invalid_scope`, so a derived grant is never partial.
///
/// # Errors
///
/// Returns `GrantError::InvalidScope` with `"wrong scope"` if any name is not
/// covered by `previous`.
pub fn map_to_effective_scopes(
    previous: &[RequestedScope],
    requested: &[String],
) -> GrantResult<Vec<RequestedScope>> {
    let mut exact: HashMap<&str, &RequestedScope> = HashMap::new();
    let mut patterns: Vec<&RequestedScope> = Vec::new();
    for scope in previous {
        if scope.pattern {
            patterns.push(scope);
        } else {
            exact.entry(scope.scope.as_str()).or_insert(scope);
        }
    }

    let mut effective: Vec<RequestedScope> = Vec::with_capacity(requested.len());
    for name in requested {
        if effective.iter().any(|s| &s.scope == name) {
            continue;
        }

        let matched = exact.get(name.as_str()).copied().or_else(|| {
            patterns
                .iter()
                .copied()
                .find(|p| is_subset_of_pattern(name, &p.scope))
        });

        let Some(matched) = matched else {
            tracing::debug!(scope = %name, "Requested scope not covered by previous grant");
            return Err(GrantError::invalid_scope("wrong scope"));
        };

        let pattern = matched.pattern && is_wildcard(name);
        effective.push(RequestedScope::new(
            name.clone(),
            matched.definition.clone(),
            pattern,
        ));
    }
    Ok(effective)
}

/// Fill in attribute lists missing on previously persisted effective scopes.
///
/// Each scope without attributes is looked up by exact definition name in the
/// active catalogue. Scopes no longer offered get an empty list.
#[must_use]
pub fn complete_missing_attributes(
    catalogue: &[ScopeDefinition],
    scopes: &[RequestedScope],
) -> Vec<RequestedScope> {
    scopes
        .iter()
        .map(|scope| {
            if scope.definition.attributes.is_some() {
                return scope.clone();
            }
            let attributes = catalogue
                .iter()
                .find(|d| d.name == scope.definition.name)
                .and_then(|d| d.attributes.clone())
                .unwrap_or_default();
            let mut definition = scope.definition.clone();
            definition.attributes = Some(attributes);
            RequestedScope::new(scope.scope.clone(), definition, scope.pattern)
        })
        .collect()
}

/// Resolves scopes against the active scope catalogue.
#[derive(Debug, Clone)]
pub struct ScopeResolver {
    catalogue: Arc<[ScopeDefinition]>,
}

impl ScopeResolver {
    /// Create a resolver for the given catalogue.
    #[must_use]
    pub fn new(catalogue: impl Into<Arc<[ScopeDefinition]>>) -> Self {
        Self {
            catalogue: catalogue.into(),
        }
    }

    /// The active catalogue.
    #[must_use]
    pub fn catalogue(&self) -> &[ScopeDefinition] {
        &self.catalogue
    }

    /// Resolve names requested in a fresh grant against the catalogue.
    ///
    /// Names the catalogue does not offer are dropped.
    #[must_use]
    pub fn resolve_requested(&self, requested: &[String]) -> Vec<RequestedScope> {
        let mut effective: Vec<RequestedScope> = Vec::new();
        for name in requested {
            if effective.iter().any(|s| &s.scope == name) {
                continue;
            }
            let exact = self
                .catalogue
                .iter()
                .find(|d| !d.is_pattern() && &d.name == name);
            let matched = exact.or_else(|| {
                self.catalogue
                    .iter()
                    .find(|d| d.is_pattern() && is_subset_of_pattern(name, &d.name))
            });
            match matched {
                Some(definition) => {
                    let pattern = definition.is_pattern() && is_wildcard(name);
                    let mut definition = definition.clone();
                    definition.attributes.get_or_insert_with(Vec::new);
                    effective.push(RequestedScope::new(name.clone(), definition, pattern));
                }
                None => tracing::debug!(scope = %name, "Dropping scope not offered by issuer"),
            }
        }
        effective
    }

    /// See [`complete_missing_attributes`].
    #[must_use]
    pub fn complete_missing_attributes(&self, scopes: &[RequestedScope]) -> Vec<RequestedScope> {
        complete_missing_attributes(&self.catalogue, scopes)
    }
}
