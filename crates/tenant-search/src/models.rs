//! Data model shared by the composer, the store and the query engine.

use crate::error::{Result, SearchError};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::LazyLock;

/// Structured attribute bag of one entity.
///
/// Ordered by key so that text assembled from it is reproducible.
pub type FieldMap = BTreeMap<String, serde_json::Value>;

static SLUG_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_][A-Za-z0-9_-]{0,62}$").unwrap());

/// Validated tenant slug, used as the schema name of the tenant's tables.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TenantSlug(String);

impl TenantSlug {
    /// Validate a slug.
    ///
    /// Only ASCII letters, digits, `_` and `-` are accepted, and SQLite's own
    /// schema names are refused, so the slug can be quoted as an identifier.
    pub fn parse(slug: &str) -> Result<Self> {
        if !SLUG_PATTERN.is_match(slug) {
            return Err(SearchError::invalid_input(
                "tenant",
                format!("invalid tenant slug: {:?}", slug),
            ));
        }
        if slug.eq_ignore_ascii_case("main") || slug.eq_ignore_ascii_case("temp") {
            return Err(SearchError::invalid_input(
                "tenant",
                format!("reserved tenant slug: {}", slug),
            ));
        }
        Ok(Self(slug.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The slug as a quoted schema identifier, e.g. `"acme"`.
    pub fn schema(&self) -> String {
        format!("\"{}\"", self.0)
    }
}

impl TryFrom<String> for TenantSlug {
    type Error = SearchError;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(&value)
    }
}

impl From<TenantSlug> for String {
    fn from(slug: TenantSlug) -> Self {
        slug.0
    }
}

impl fmt::Display for TenantSlug {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Allow-list of the columns of a logical table that are meaningful for search.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableInformation {
    pub table: String,
    pub columns: Vec<String>,
}

impl TableInformation {
    pub fn new<I, S>(table: impl Into<String>, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            table: table.into(),
            columns: columns.into_iter().map(Into::into).collect(),
        }
    }

    pub fn allows(&self, column: &str) -> bool {
        self.columns.iter().any(|c| c == column)
    }
}

/// A declared edge of the relation graph.
///
/// `table.foreign_field` identifies a row of `related_table` through
/// `related_table.mapping_field` (or its id when the mapping field is `id`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RelatedInfo {
    pub table: String,
    pub related_table: String,
    pub foreign_field: String,
    pub mapping_field: String,
}

impl RelatedInfo {
    pub fn new(
        table: impl Into<String>,
        related_table: impl Into<String>,
        foreign_field: impl Into<String>,
        mapping_field: impl Into<String>,
    ) -> Self {
        Self {
            table: table.into(),
            related_table: related_table.into(),
            foreign_field: foreign_field.into(),
            mapping_field: mapping_field.into(),
        }
    }
}

/// A row of a tenant's `search_indices` table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchIndexRecord {
    pub id: String,
    pub table: String,
    pub action: serde_json::Value,
    pub search_field: FieldMap,
    pub text: String,
    pub updated_at: String,
}

/// A row of a tenant's `internal_search_indices` table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InternalSearchIndexRecord {
    pub id: String,
    pub table: String,
    pub search_field: FieldMap,
    pub text: String,
    pub updated_at: String,
}

/// One result of a global or field search.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    pub id: String,
    pub table: String,
    pub action: serde_json::Value,
}

/// One raw entity handed to batch indexing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    pub id: String,
    pub fields: FieldMap,
}

impl Entity {
    pub fn new(id: impl Into<String>, fields: FieldMap) -> Self {
        Self {
            id: id.into(),
            fields,
        }
    }
}

/// Result of an index call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum IndexOutcome {
    /// The row was written.
    Indexed { id: String },
    /// The composed text was empty; nothing was written.
    Skipped { id: String },
}

impl IndexOutcome {
    pub fn id(&self) -> &str {
        match self {
            IndexOutcome::Indexed { id } | IndexOutcome::Skipped { id } => id,
        }
    }

    pub fn is_indexed(&self) -> bool {
        matches!(self, IndexOutcome::Indexed { .. })
    }
}

/// Counters reported by batch indexing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchSummary {
    pub chunks: usize,
    pub indexed: usize,
    pub skipped: usize,
}
