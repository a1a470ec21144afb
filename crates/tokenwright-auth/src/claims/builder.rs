//! User-info claim set construction.

use std::collections::HashSet;

use serde_json::Value;

use crate::token::jwt::Claims;
use crate::types::{AttributeFilter, RequestedScope};

use super::provider::{DynamicAttribute, TranslationResult};

/// Builds the user-info claim set released for a grant.
///
/// Only attributes declared by the effective scopes are released, and
/// attributes covered by a claim filter keep only the filtered values.
#[derive(Debug)]
pub struct ClaimsBuilder<'a> {
    subject: &'a str,
    requested: HashSet<&'a str>,
    filters: &'a [AttributeFilter],
}

impl<'a> ClaimsBuilder<'a> {
    /// Create a builder for `subject` restricted to the attributes of `scopes`.
    #[must_use]
    pub fn new(
        subject: &'a str,
        scopes: &'a [RequestedScope],
        filters: &'a [AttributeFilter],
    ) -> Self {
        let requested = scopes
            .iter()
            .flat_map(|s| s.definition.attribute_names())
            .map(String::as_str)
            .collect();
        Self {
            subject,
            requested,
            filters,
        }
    }

    /// Attributes of `result` that may be released, with filters applied.
    #[must_use]
    pub fn filter_attributes(&self, result: &TranslationResult) -> Vec<DynamicAttribute> {
        result
            .attributes
            .iter()
            .filter(|a| self.requested.contains(a.name.as_str()))
            .filter_map(|a| self.apply_filter(a))
            .collect()
    }

    /// Build the user-info claim set: `sub` plus the released attributes.
    ///
    /// Single-valued attributes become scalar claims, multi-valued ones
    /// arrays. Attributes without values are skipped.
    #[must_use]
    pub fn build(&self, result: &TranslationResult) -> Claims {
        let mut claims = Claims::new();
        claims.insert("sub".to_string(), Value::String(self.subject.to_string()));
        for attribute in self.filter_attributes(result) {
            if attribute.name == "sub" {
                continue;
            }
            let value = match attribute.values.len() {
                0 => continue,
                1 => attribute.values.into_iter().next().unwrap_or(Value::Null),
                _ => Value::Array(attribute.values),
            };
            claims.insert(attribute.name, value);
        }
        claims
    }

    fn apply_filter(&self, attribute: &DynamicAttribute) -> Option<DynamicAttribute> {
        let Some(filter) = self
            .filters
            .iter()
            .find(|f| f.attribute_name == attribute.name)
        else {
            return Some(attribute.clone());
        };
        let values: Vec<Value> = attribute
            .values
            .iter()
            .filter(|v| filter.values.iter().any(|allowed| value_matches(v, allowed)))
            .cloned()
            .collect();
        if values.is_empty() {
            None
        } else {
            Some(DynamicAttribute::new(attribute.name.clone(), values))
        }
    }
}

fn value_matches(value: &Value, allowed: &str) -> bool {
    match value {
        Value::String(s) => s == allowed,
        other => other.to_string() == allowed,
    }
}

/// Serialize a claim set to the JSON stored on token records.
#[must_use]
pub fn to_user_info_json(claims: &Claims) -> String {
    Value::Object(claims.clone()).to_string()
}
