//! Read paths: FTS5 prefix search and structured field search.

use crate::error::{Result, SearchError};
use crate::models::{FieldMap, SearchHit, TenantSlug};
use crate::pagination::Pagination;
use regex::Regex;
use rusqlite::{Connection, Row, ToSql};
use serde_json::Value;
use std::sync::LazyLock;
use tracing::debug;

/// Tokens FTS5 accepts unquoted.
static FTS5_BAREWORD: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^[A-Za-z0-9]+$").unwrap());

/// Operators of the FTS5 query syntax (case-sensitive).
const FTS5_KEYWORDS: [&str; 4] = ["AND", "OR", "NOT", "NEAR"];

/// Trim and collapse runs of whitespace into single spaces.
pub fn normalize_query(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Escape a term for FTS5 queries.
///
/// Plain alphanumeric terms pass through; anything else, operators included,
/// is wrapped in quotes with embedded quotes doubled.
pub fn escape_fts5_term(term: &str) -> String {
    if FTS5_BAREWORD.is_match(term) && !FTS5_KEYWORDS.contains(&term) {
        term.to_string()
    } else {
        format!("\"{}\"", term.replace('"', "\"\""))
    }
}

/// Build an FTS5 prefix query that requires every term.
///
/// - "acme order" → `acme* AND order*`
/// - "a-1 OR" → `"a-1"* AND "OR"*`
///
/// Terms without a single letter or digit cannot produce a token and are
/// dropped, so the result may be empty.
pub fn build_prefix_query(text: &str) -> String {
    normalize_query(text)
        .split(' ')
        .filter(|term| term.chars().any(char::is_alphanumeric))
        .map(|term| format!("{}*", escape_fts5_term(term)))
        .collect::<Vec<_>>()
        .join(" AND ")
}

/// Queries over one tenant's indexes.
pub struct QueryEngine<'c> {
    conn: &'c Connection,
    tenant: &'c TenantSlug,
}

impl<'c> QueryEngine<'c> {
    pub fn new(conn: &'c Connection, tenant: &'c TenantSlug) -> Self {
        Self { conn, tenant }
    }

    /// Prefix search over the search index, ordered by id then table.
    pub fn search(&self, text: &str, pagination: Pagination) -> Result<Vec<SearchHit>> {
        let Some(fts_query) = self.prepare_query(text)? else {
            return Ok(Vec::new());
        };
        let window = pagination.window();
        let s = self.tenant.schema();

        let sql = format!(
            "SELECT s.id, s.table_info, s.action_info
             FROM {s}.search_indices s
             WHERE (s.id, s.table_info) IN (
                 SELECT id, table_info FROM {s}.search_indices_fts
                 WHERE search_indices_fts MATCH ?1
             )
             ORDER BY s.id, s.table_info
             LIMIT ?2 OFFSET ?3"
        );

        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(
            rusqlite::params![fts_query, window.limit, window.offset],
            row_to_hit,
        )?;

        let mut hits = Vec::new();
        for row in rows {
            hits.push(row?);
        }

        debug!(
            "Search {:?} in tenant {} returned {} hits",
            fts_query,
            self.tenant,
            hits.len()
        );
        Ok(hits)
    }

    /// Prefix search over the internal index of one table. Returns ids.
    pub fn internal_search(
        &self,
        text: &str,
        table: &str,
        pagination: Pagination,
    ) -> Result<Vec<String>> {
        let Some(fts_query) = self.prepare_query(text)? else {
            return Ok(Vec::new());
        };
        let window = pagination.window();
        let s = self.tenant.schema();

        let sql = format!(
            "SELECT s.id
             FROM {s}.internal_search_indices s
             WHERE s.table_info = ?1
               AND (s.id, s.table_info) IN (
                   SELECT id, table_info FROM {s}.internal_search_indices_fts
                   WHERE internal_search_indices_fts MATCH ?2
               )
             ORDER BY s.id
             LIMIT ?3 OFFSET ?4"
        );

        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(
            rusqlite::params![table, fts_query, window.limit, window.offset],
            |row| row.get::<_, String>(0),
        )?;

        let mut ids = Vec::new();
        for row in rows {
            ids.push(row?);
        }
        Ok(ids)
    }

    /// Rows whose structured fields start with every given value.
    ///
    /// Keys and values are bound as parameters; values are compared as
    /// case-sensitive text prefixes. An empty map matches every row.
    pub fn search_by_field(&self, fields: &FieldMap, pagination: Pagination) -> Result<Vec<SearchHit>> {
        let window = pagination.window();

        let mut where_parts = Vec::with_capacity(fields.len());
        let mut params_vec: Vec<Box<dyn ToSql>> = Vec::with_capacity(fields.len() * 2 + 2);

        for (key, value) in fields {
            let key_idx = params_vec.len() + 1;
            let value_idx = key_idx + 1;
            where_parts.push(format!(
                "substr((SELECT CAST(j.value AS TEXT) FROM json_each(s.search_field) j
                         WHERE j.key = ?{key_idx}), 1, length(?{value_idx})) = ?{value_idx}"
            ));
            params_vec.push(Box::new(key.clone()));
            params_vec.push(Box::new(expected_text(value)));
        }

        let where_clause = if where_parts.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", where_parts.join(" AND "))
        };
        let limit_idx = params_vec.len() + 1;
        params_vec.push(Box::new(window.limit));
        params_vec.push(Box::new(window.offset));

        let sql = format!(
            "SELECT s.id, s.table_info, s.action_info
             FROM {}.search_indices s
             {}
             ORDER BY s.id, s.table_info
             LIMIT ?{} OFFSET ?{}",
            self.tenant.schema(),
            where_clause,
            limit_idx,
            limit_idx + 1
        );

        let mut stmt = self.conn.prepare(&sql)?;
        let params_refs: Vec<&dyn ToSql> = params_vec.iter().map(|p| p.as_ref()).collect();
        let rows = stmt.query_map(params_refs.as_slice(), row_to_hit)?;

        let mut hits = Vec::new();
        for row in rows {
            hits.push(row?);
        }

        debug!(
            "Field search over {} keys in tenant {} returned {} hits",
            fields.len(),
            self.tenant,
            hits.len()
        );
        Ok(hits)
    }

    /// Validate raw search text and turn it into an FTS5 query.
    ///
    /// `None` means the text had no searchable token.
    fn prepare_query(&self, text: &str) -> Result<Option<String>> {
        if normalize_query(text).is_empty() {
            return Err(SearchError::invalid_input("query", "search text is empty"));
        }
        let fts_query = build_prefix_query(text);
        if fts_query.is_empty() {
            debug!("Search text {:?} has no searchable token", text);
            return Ok(None);
        }
        Ok(Some(fts_query))
    }
}

/// Text an expected field value is compared as.
///
/// Mirrors how `json_each` exposes stored values: booleans are integers and
/// `null` carries no text, which turns the predicate into "field present".
fn expected_text(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Bool(b) => String::from(if *b { "1" } else { "0" }),
        other => other.to_string(),
    }
}

fn row_to_hit(row: &Row) -> rusqlite::Result<SearchHit> {
    let action_json: String = row.get(2)?;
    Ok(SearchHit {
        id: row.get(0)?,
        table: row.get(1)?,
        action: serde_json::from_str(&action_json).unwrap_or(Value::Null),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{attach, IndexStore, SchemaConfig, TenantSchema};
    use serde_json::json;

    fn create_test_store() -> (Connection, TenantSlug) {
        let conn = Connection::open_in_memory().unwrap();
        let tenant = TenantSlug::parse("acme").unwrap();
        attach(&conn, &tenant, ":memory:").unwrap();
        TenantSchema::new(&tenant, &SchemaConfig::default())
            .ensure_setup(&conn)
            .unwrap();
        (conn, tenant)
    }

    fn fields(value: Value) -> FieldMap {
        serde_json::from_value(value).unwrap()
    }

    fn seed(conn: &Connection, tenant: &TenantSlug, table: &str, id: &str, raw: Value, text: &str) {
        IndexStore::new(conn, tenant)
            .upsert_search(table, id, &json!({"open": id}), &fields(raw), text)
            .unwrap();
    }

    #[test]
    fn test_normalize_query() {
        assert_eq!(normalize_query("  acme \t  order\n"), "acme order");
        assert_eq!(normalize_query("   "), "");
    }

    #[test]
    fn test_escape_simple_term() {
        assert_eq!(escape_fts5_term("order"), "order");
        assert_eq!(escape_fts5_term("100"), "100");
    }

    #[test]
    fn test_escape_special_terms() {
        assert_eq!(escape_fts5_term("a-1"), "\"a-1\"");
        assert_eq!(escape_fts5_term("v1.5"), "\"v1.5\"");
        assert_eq!(escape_fts5_term("say\"hi"), "\"say\"\"hi\"");
        assert_eq!(escape_fts5_term("NEAR"), "\"NEAR\"");
        assert_eq!(escape_fts5_term("near"), "near");
    }

    #[test]
    fn test_build_prefix_query() {
        assert_eq!(build_prefix_query("acme"), "acme*");
        assert_eq!(build_prefix_query(" acme   order "), "acme* AND order*");
        assert_eq!(build_prefix_query("a-1 OR x"), "\"a-1\"* AND \"OR\"* AND x*");
        assert_eq!(build_prefix_query("- \"\" ()"), "");
    }

    #[test]
    fn test_search_prefix_and_conjunction() {
        let (conn, tenant) = create_test_store();
        seed(&conn, &tenant, "orders", "o1", json!({"amount": "100"}), "100 shipped");
        seed(&conn, &tenant, "orders", "o2", json!({"amount": "1000"}), "1000 pending");
        seed(&conn, &tenant, "customers", "c1", json!({"name": "Ada"}), "Ada Lovelace");

        let engine = QueryEngine::new(&conn, &tenant);

        let hits = engine.search("100", Pagination::default()).unwrap();
        let ids: Vec<_> = hits.iter().map(|h| h.id.as_str()).collect();
        assert_eq!(ids, vec!["o1", "o2"]);
        assert_eq!(hits[0].table, "orders");
        assert_eq!(hits[0].action, json!({"open": "o1"}));

        let hits = engine.search("100 ship", Pagination::default()).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, "o1");

        // Tokenizer folds case and diacritics
        let hits = engine.search("lové", Pagination::default()).unwrap();
        assert_eq!(hits[0].id, "c1");

        assert!(engine.search("nothing", Pagination::default()).unwrap().is_empty());
    }

    #[test]
    fn test_search_empty_text_rejected() {
        let (conn, tenant) = create_test_store();
        let engine = QueryEngine::new(&conn, &tenant);
        assert!(matches!(
            engine.search("  \n ", Pagination::default()),
            Err(SearchError::InvalidInput { .. })
        ));
        // Punctuation only is not an error, just nothing to find
        assert!(engine.search("--", Pagination::default()).unwrap().is_empty());
    }

    #[test]
    fn test_search_operator_text_is_literal() {
        let (conn, tenant) = create_test_store();
        seed(&conn, &tenant, "notes", "n1", json!({}), "cats OR dogs");
        let engine = QueryEngine::new(&conn, &tenant);

        let hits = engine.search("cats OR", Pagination::default()).unwrap();
        assert_eq!(hits.len(), 1);
        assert!(engine
            .search("NOT \"cats", Pagination::default())
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_search_pagination() {
        let (conn, tenant) = create_test_store();
        for i in 0..20 {
            seed(
                &conn,
                &tenant,
                "orders",
                &format!("o{:02}", i),
                json!({}),
                "shared text",
            );
        }
        let engine = QueryEngine::new(&conn, &tenant);

        assert_eq!(engine.search("shared", Pagination::default()).unwrap().len(), 15);

        let page = engine
            .search("shared", Pagination::page(2).with_page_size(6))
            .unwrap();
        let ids: Vec<_> = page.iter().map(|h| h.id.as_str()).collect();
        assert_eq!(ids, vec!["o06", "o07", "o08", "o09", "o10", "o11"]);

        let tail = engine.search("shared", Pagination::page(2)).unwrap();
        assert_eq!(tail.len(), 5);

        // Far past the end is empty, never a wrapped offset
        assert!(engine
            .search("shared", Pagination::new(Some(i64::MAX), Some(i64::MAX)))
            .unwrap()
            .is_empty());
        assert!(engine
            .search_by_field(&FieldMap::new(), Pagination::page(i64::MAX))
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_internal_search_filters_table() {
        let (conn, tenant) = create_test_store();
        let store = IndexStore::new(&conn, &tenant);
        store
            .upsert_internal("orders", "o1", &FieldMap::new(), "acme widget")
            .unwrap();
        store
            .upsert_internal("customers", "c1", &FieldMap::new(), "acme corp")
            .unwrap();

        let engine = QueryEngine::new(&conn, &tenant);
        assert_eq!(
            engine
                .internal_search("acme", "orders", Pagination::default())
                .unwrap(),
            vec!["o1"]
        );
        assert!(engine
            .internal_search("corp", "orders", Pagination::default())
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_search_by_field_prefix() {
        let (conn, tenant) = create_test_store();
        seed(&conn, &tenant, "orders", "o1", json!({"amount": "100", "status": "open"}), "x");
        seed(&conn, &tenant, "orders", "o2", json!({"amount": "1000", "status": "closed"}), "x");
        seed(&conn, &tenant, "orders", "o3", json!({"amount": 250, "paid": true}), "x");

        let engine = QueryEngine::new(&conn, &tenant);
        let ids = |query: Value| -> Vec<String> {
            engine
                .search_by_field(&fields(query), Pagination::default())
                .unwrap()
                .into_iter()
                .map(|h| h.id)
                .collect()
        };

        assert_eq!(ids(json!({"amount": "100"})), vec!["o1", "o2"]);
        assert_eq!(ids(json!({"amount": "10", "status": "op"})), vec!["o1"]);
        assert_eq!(ids(json!({"amount": 25})), vec!["o3"]);
        assert_eq!(ids(json!({"paid": true})), vec!["o3"]);
        // Case-sensitive
        assert!(ids(json!({"status": "Open"})).is_empty());
        // Missing field never matches
        assert!(ids(json!({"missing": "x"})).is_empty());
        // No predicates matches everything
        assert_eq!(ids(json!({})), vec!["o1", "o2", "o3"]);
    }

    #[test]
    fn test_search_by_field_is_injection_safe() {
        let (conn, tenant) = create_test_store();
        seed(&conn, &tenant, "orders", "o1", json!({"status": "open"}), "x");
        let engine = QueryEngine::new(&conn, &tenant);

        let hostile = fields(json!({
            "status') OR 1=1 --": "x",
            "status": "open' OR '1'='1",
        }));
        assert!(engine
            .search_by_field(&hostile, Pagination::default())
            .unwrap()
            .is_empty());

        // Wildcards are literal
        assert!(engine
            .search_by_field(&fields(json!({"status": "%"})), Pagination::default())
            .unwrap()
            .is_empty());

        let store = IndexStore::new(&conn, &tenant);
        assert!(store.get_search("orders", "o1").unwrap().is_some());
    }
}
