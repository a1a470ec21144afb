//! Scope resolution.
//!
//! - [`matcher`] - wildcard scope patterns
//! - [`filter`] - `claim_filter:` pseudo-scopes restricting released values
//! - [`resolver`] - requested names to effective scopes

pub mod filter;
pub mod matcher;
pub mod resolver;

pub use filter::{
    CLAIM_FILTER_PREFIX, filters_from_scopes, merge_preserving_last, scopes_without_filters,
};
pub use matcher::{ScopeMatcher, is_subset_of_pattern, is_wildcard};
pub use resolver::{ScopeResolver, complete_missing_attributes, map_to_effective_scopes};

/// Split a space-delimited `scope` parameter, dropping duplicates.
#[must_use]
pub fn parse_scope(scope: &str) -> Vec<String> {
    let mut result: Vec<String> = Vec::new();
    for value in scope.split_whitespace() {
        if !result.iter().any(|v| v == value) {
            result.push(value.to_string());
        }
    }
    result
}
