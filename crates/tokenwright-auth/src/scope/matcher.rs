//! Wildcard scope matching.
//!
//! A pattern scope contains one or more `*`, each matching any (possibly
//! empty) run of characters. The requested name is matched literally, so a
//! requested pattern such as `read:*` is subsumed by `read:*` or `*` but not by
//! `read:docs*`.

use std::collections::HashMap;
use std::sync::{LazyLock, RwLock};

use regex::Regex;

const WILDCARD: char = '*';

static SHARED: LazyLock<ScopeMatcher> = LazyLock::new(ScopeMatcher::new);

/// Returns `true` if the scope name is a wildcard pattern.
#[must_use]
pub fn is_wildcard(scope: &str) -> bool {
    scope.contains(WILDCARD)
}

/// Returns `true` if `requested` is covered by the wildcard `pattern`.
///
/// Uses a process-wide matcher with a compiled-pattern cache.
#[must_use]
pub fn is_subset_of_pattern(requested: &str, pattern: &str) -> bool {
    SHARED.is_subset(requested, pattern)
}

/// Pattern matcher with regex caching.
///
/// This struct is thread-safe and can be shared across requests.
pub struct ScopeMatcher {
    regex_cache: RwLock<HashMap<String, Regex>>,
}

impl Default for ScopeMatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl ScopeMatcher {
    /// Create a new matcher.
    #[must_use]
    pub fn new() -> Self {
        Self {
            regex_cache: RwLock::new(HashMap::new()),
        }
    }

    /// Returns `true` if `requested` is covered by `pattern`.
    ///
    /// A pattern without wildcards only covers an identical name.
    #[must_use]
    pub fn is_subset(&self, requested: &str, pattern: &str) -> bool {
        if !is_wildcard(pattern) {
            return requested == pattern;
        }
        self.get_or_compile(pattern)
            .map(|re| re.is_match(requested))
            .unwrap_or(false)
    }

    fn get_or_compile(&self, pattern: &str) -> Option<Regex> {
        if let Some(re) = self
            .regex_cache
            .read()
            .ok()
            .and_then(|cache| cache.get(pattern).cloned())
        {
            return Some(re);
        }

        let body = pattern
            .split(WILDCARD)
            .map(regex::escape)
            .collect::<Vec<_>>()
            .join(".*");
        let re = Regex::new(&format!("^{body}$")).ok()?;
        if let Ok(mut cache) = self.regex_cache.write() {
            cache.insert(pattern.to_string(), re.clone());
        }

        Some(re)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_wildcard() {
        assert!(is_wildcard("read:*"));
        assert!(is_wildcard("*"));
        assert!(!is_wildcard("read:docs"));
    }

    #[test]
    fn test_concrete_name_under_pattern() {
        assert!(is_subset_of_pattern("read:docs", "read:*"));
        assert!(is_subset_of_pattern("read:", "read:*"));
        assert!(is_subset_of_pattern("anything", "*"));
        assert!(!is_subset_of_pattern("write:docs", "read:*"));
        assert!(!is_subset_of_pattern("xread:docs", "read:*"));
    }

    #[test]
    fn test_inner_and_multiple_wildcards() {
        assert!(is_subset_of_pattern("api.v1.read", "api.*.read"));
        assert!(!is_subset_of_pattern("api.v1.write", "api.*.read"));
        assert!(is_subset_of_pattern("a-b-c", "a*b*c"));
    }

    #[test]
    fn test_regex_metacharacters_are_literal() {
        assert!(is_subset_of_pattern("files(1).read", "files(*).read"));
        assert!(!is_subset_of_pattern("filesX1Y.read", "files(*).read"));
        assert!(!is_subset_of_pattern("readXdocs", "read.*"));
    }

    #[test]
    fn test_requested_pattern_against_pattern() {
        assert!(is_subset_of_pattern("read:*", "read:*"));
        assert!(is_subset_of_pattern("read:a*", "read:*"));
        assert!(!is_subset_of_pattern("read:*", "read:docs*"));
    }

    #[test]
    fn test_non_pattern_is_exact() {
        let matcher = ScopeMatcher::new();
        assert!(matcher.is_subset("email", "email"));
        assert!(!matcher.is_subset("emails", "email"));
    }
}
