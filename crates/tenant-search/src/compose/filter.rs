//! Column filtering and value rendering for composition.

use crate::config::IndexConfig;
use crate::models::{FieldMap, TableInformation};
use serde_json::Value;

/// What to do with a table that has no declared [`TableInformation`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AllowListPolicy {
    /// Undeclared tables admit no columns.
    Strict,
    /// Undeclared tables admit every column that survives the other rules.
    Open,
}

/// Decides which fields of an entity are searchable and how they read as text.
#[derive(Debug, Clone, Copy)]
pub struct FieldFilter<'a> {
    table_info: Option<&'a TableInformation>,
    policy: AllowListPolicy,
    keep_identity: bool,
}

/// Output of [`FieldFilter::apply`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FilteredFields {
    /// Surviving fields with sanitized values.
    pub fields: FieldMap,
    /// Text rendering of each surviving field, in key order.
    pub values: Vec<(String, String)>,
}

impl FilteredFields {
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl<'a> FieldFilter<'a> {
    pub fn strict(table_info: Option<&'a TableInformation>) -> Self {
        Self {
            table_info,
            policy: AllowListPolicy::Strict,
            keep_identity: false,
        }
    }

    pub fn open(table_info: Option<&'a TableInformation>) -> Self {
        Self {
            table_info,
            policy: AllowListPolicy::Open,
            keep_identity: false,
        }
    }

    /// Keep the identity column (used for documents resolved by id).
    pub fn keep_identity(mut self, keep: bool) -> Self {
        self.keep_identity = keep;
        self
    }

    /// Whether a column name passes the deny-set, identity and allow-list rules.
    pub fn admits(&self, key: &str) -> bool {
        if is_audit_field(key) {
            return false;
        }
        if !self.keep_identity && key.eq_ignore_ascii_case(IndexConfig::IDENTITY_FIELD) {
            return false;
        }
        match (self.table_info, self.policy) {
            (Some(info), _) => info.allows(key),
            (None, AllowListPolicy::Strict) => false,
            (None, AllowListPolicy::Open) => true,
        }
    }

    pub fn apply(&self, fields: &FieldMap) -> FilteredFields {
        let mut out = FilteredFields::default();
        for (key, value) in fields {
            if !self.admits(key) {
                continue;
            }
            let Some((clean, text)) = render_value(value) else {
                continue;
            };
            out.values.push((key.clone(), text));
            out.fields.insert(key.clone(), clean);
        }
        out
    }
}

/// Audit columns never contribute to search text.
pub fn is_audit_field(key: &str) -> bool {
    IndexConfig::AUDIT_FIELDS
        .iter()
        .any(|f| f.eq_ignore_ascii_case(key))
}

/// Sanitize a value and render it as text.
///
/// Returns `None` for values that carry nothing searchable: `null`, blank
/// strings, and empty arrays or objects.
pub fn render_value(value: &Value) -> Option<(Value, String)> {
    match value {
        Value::Null => None,
        Value::String(s) => {
            let clean = strip_nul(s);
            if clean.trim().is_empty() {
                None
            } else {
                Some((Value::String(clean.clone()), clean))
            }
        }
        Value::Bool(_) | Value::Number(_) => Some((value.clone(), value.to_string())),
        Value::Array(items) if items.is_empty() => None,
        Value::Object(map) if map.is_empty() => None,
        Value::Array(_) | Value::Object(_) => {
            let clean = strip_nul_deep(value);
            let text = clean.to_string();
            Some((clean, text))
        }
    }
}

/// The FTS tokenizer and the JSON column both choke on embedded NULs.
fn strip_nul(s: &str) -> String {
    s.replace('\0', "")
}

fn strip_nul_deep(value: &Value) -> Value {
    match value {
        Value::String(s) => Value::String(strip_nul(s)),
        Value::Array(items) => Value::Array(items.iter().map(strip_nul_deep).collect()),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (strip_nul(k), strip_nul_deep(v)))
                .collect(),
        ),
        other => other.clone(),
    }
}
