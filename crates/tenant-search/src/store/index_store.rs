//! Upsert, delete and read access to a tenant's document tables.

use super::schema::IndexKind;
use crate::compose::RelatedDocuments;
use crate::error::{Result, SearchError};
use crate::models::{FieldMap, InternalSearchIndexRecord, SearchIndexRecord, TenantSlug};
use chrono::{SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use tracing::debug;

/// Document store of one tenant.
///
/// Borrowing the connection keeps the store usable inside a transaction
/// (a `rusqlite::Transaction` derefs to `Connection`).
pub struct IndexStore<'c> {
    pub(crate) conn: &'c Connection,
    pub(crate) tenant: &'c TenantSlug,
}

impl<'c> IndexStore<'c> {
    pub fn new(conn: &'c Connection, tenant: &'c TenantSlug) -> Self {
        Self { conn, tenant }
    }

    /// Insert or replace a search document keyed by `(id, table)`.
    pub fn upsert_search(
        &self,
        table: &str,
        id: &str,
        action: &serde_json::Value,
        fields: &FieldMap,
        text: &str,
    ) -> Result<String> {
        ensure_text(table, id, text)?;
        let action_json = serde_json::to_string(action)?;
        let fields_json = serde_json::to_string(fields)?;

        self.conn.execute(
            &format!(
                "INSERT INTO {}.search_indices
                     (id, table_info, action_info, search_field, tsv_text, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                 ON CONFLICT(id, table_info) DO UPDATE SET
                     action_info=excluded.action_info,
                     search_field=excluded.search_field,
                     tsv_text=excluded.tsv_text,
                     updated_at=excluded.updated_at",
                self.tenant.schema()
            ),
            params![id, table, action_json, fields_json, text, timestamp()],
        )?;

        debug!("Upserted search document: {}/{}/{}", self.tenant, table, id);
        Ok(id.to_string())
    }

    /// Insert or replace an internal document keyed by `(id, table)`.
    pub fn upsert_internal(
        &self,
        table: &str,
        id: &str,
        fields: &FieldMap,
        text: &str,
    ) -> Result<String> {
        ensure_text(table, id, text)?;
        let fields_json = serde_json::to_string(fields)?;

        self.conn.execute(
            &internal_upsert_sql(self.tenant),
            params![id, table, fields_json, text, timestamp()],
        )?;

        debug!("Upserted internal document: {}/{}/{}", self.tenant, table, id);
        Ok(id.to_string())
    }

    /// Hard-delete a document. Exactly one row must be affected.
    pub fn delete(&self, kind: IndexKind, table: &str, id: &str) -> Result<String> {
        let rows_affected = self.conn.execute(
            &format!(
                "DELETE FROM {}.{} WHERE id = ?1 AND table_info = ?2",
                self.tenant.schema(),
                kind.table_name()
            ),
            params![id, table],
        )?;

        if rows_affected == 0 {
            return Err(SearchError::NotFound {
                table: table.to_string(),
                id: id.to_string(),
            });
        }

        debug!("Deleted {}: {}/{}/{}", kind.table_name(), self.tenant, table, id);
        Ok(id.to_string())
    }

    /// Get a search document.
    pub fn get_search(&self, table: &str, id: &str) -> Result<Option<SearchIndexRecord>> {
        let result = self
            .conn
            .query_row(
                &format!(
                    "SELECT id, table_info, action_info, search_field, tsv_text, updated_at
                     FROM {}.search_indices WHERE id = ?1 AND table_info = ?2",
                    self.tenant.schema()
                ),
                params![id, table],
                row_to_search_record,
            )
            .optional()?;

        Ok(result)
    }

    /// Get an internal document.
    pub fn get_internal(&self, table: &str, id: &str) -> Result<Option<InternalSearchIndexRecord>> {
        let result = self
            .conn
            .query_row(
                &format!(
                    "SELECT id, table_info, search_field, tsv_text, updated_at
                     FROM {}.internal_search_indices WHERE id = ?1 AND table_info = ?2",
                    self.tenant.schema()
                ),
                params![id, table],
                row_to_internal_record,
            )
            .optional()?;

        Ok(result)
    }

    /// Get the count of documents of one kind.
    pub fn count(&self, kind: IndexKind) -> Result<usize> {
        let count: i64 = self.conn.query_row(
            &format!(
                "SELECT COUNT(*) FROM {}.{}",
                self.tenant.schema(),
                kind.table_name()
            ),
            [],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }
}

impl RelatedDocuments for IndexStore<'_> {
    fn fields_by_id(&self, table: &str, id: &str) -> Result<Option<String>> {
        let raw = self
            .conn
            .query_row(
                &format!(
                    "SELECT search_field FROM {}.internal_search_indices
                     WHERE table_info = ?1 AND id = ?2",
                    self.tenant.schema()
                ),
                params![table, id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(raw)
    }

    fn latest_fields_by_value(
        &self,
        table: &str,
        field: &str,
        value: &str,
    ) -> Result<Option<String>> {
        let raw = self
            .conn
            .query_row(
                &format!(
                    "SELECT search_field FROM {}.internal_search_indices
                     WHERE table_info = ?1
                       AND (SELECT CAST(j.value AS TEXT) FROM json_each(search_field) j
                            WHERE j.key = ?2) = ?3
                     ORDER BY updated_at DESC, id DESC
                     LIMIT 1",
                    self.tenant.schema()
                ),
                params![table, field, value],
                |row| row.get(0),
            )
            .optional()?;
        Ok(raw)
    }
}

/// Upsert statement for internal documents, shared with batch indexing.
pub(crate) fn internal_upsert_sql(tenant: &TenantSlug) -> String {
    format!(
        "INSERT INTO {}.internal_search_indices
             (id, table_info, search_field, tsv_text, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5)
         ON CONFLICT(id, table_info) DO UPDATE SET
             search_field=excluded.search_field,
             tsv_text=excluded.tsv_text,
             updated_at=excluded.updated_at",
        tenant.schema()
    )
}

/// Write time, sortable as text.
pub(crate) fn timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Empty documents are never persisted.
pub(crate) fn ensure_text(table: &str, id: &str, text: &str) -> Result<()> {
    if text.trim().is_empty() {
        return Err(SearchError::invalid_input(
            "text",
            format!("refusing to store empty text for {}/{}", table, id),
        ));
    }
    Ok(())
}

fn decode_fields(raw: &str) -> FieldMap {
    serde_json::from_str(raw).unwrap_or_default()
}

fn row_to_search_record(row: &Row) -> rusqlite::Result<SearchIndexRecord> {
    let action_json: String = row.get(2)?;
    let fields_json: String = row.get(3)?;

    Ok(SearchIndexRecord {
        id: row.get(0)?,
        table: row.get(1)?,
        action: serde_json::from_str(&action_json).unwrap_or(serde_json::Value::Null),
        search_field: decode_fields(&fields_json),
        text: row.get(4)?,
        updated_at: row.get(5)?,
    })
}

fn row_to_internal_record(row: &Row) -> rusqlite::Result<InternalSearchIndexRecord> {
    let fields_json: String = row.get(2)?;

    Ok(InternalSearchIndexRecord {
        id: row.get(0)?,
        table: row.get(1)?,
        search_field: decode_fields(&fields_json),
        text: row.get(3)?,
        updated_at: row.get(4)?,
    })
}
