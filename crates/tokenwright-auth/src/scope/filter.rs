//! Claim value filters carried in the `scope` parameter.
//!
//! A requested scope of the form `claim_filter:<attribute>:<value>` is not a
//! scope. It limits the values of `<attribute>` released in claims to the
//! listed ones. Several entries for one attribute accumulate.

use indexmap::IndexMap;

use crate::types::AttributeFilter;

/// Prefix marking a claim filter pseudo-scope.
pub const CLAIM_FILTER_PREFIX: &str = "claim_filter:";

/// Returns `true` if the scope value is a claim filter.
#[must_use]
pub fn is_claim_filter(scope: &str) -> bool {
    scope.starts_with(CLAIM_FILTER_PREFIX)
}

/// Requested scopes with claim filters removed, order preserved.
#[must_use]
pub fn scopes_without_filters(scopes: &[String]) -> Vec<String> {
    scopes
        .iter()
        .filter(|s| !is_claim_filter(s))
        .cloned()
        .collect()
}

/// Collect the claim filters declared in requested scopes.
///
/// Entries without a `:` separating attribute and value are ignored.
#[must_use]
pub fn filters_from_scopes(scopes: &[String]) -> Vec<AttributeFilter> {
    let mut grouped: IndexMap<String, Vec<String>> = IndexMap::new();
    for scope in scopes {
        let Some(body) = scope.strip_prefix(CLAIM_FILTER_PREFIX) else {
            continue;
        };
        let Some((attribute, value)) = body.split_once(':') else {
            tracing::debug!(scope = %scope, "Ignoring malformed claim filter");
            continue;
        };
        if attribute.is_empty() {
            continue;
        }
        let values = grouped.entry(attribute.to_string()).or_default();
        if !values.iter().any(|v| v == value) {
            values.push(value.to_string());
        }
    }
    grouped
        .into_iter()
        .map(|(attribute_name, values)| AttributeFilter {
            attribute_name,
            values,
        })
        .collect()
}

/// Merge two filter lists keyed by attribute name; entries of `newer` replace
/// entries of `older`.
#[must_use]
pub fn merge_preserving_last(
    older: &[AttributeFilter],
    newer: &[AttributeFilter],
) -> Vec<AttributeFilter> {
    let mut merged: IndexMap<&str, &AttributeFilter> = IndexMap::new();
    for filter in older.iter().chain(newer) {
        merged.insert(filter.attribute_name.as_str(), filter);
    }
    merged.into_values().cloned().collect()
}
