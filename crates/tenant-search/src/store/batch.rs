//! Chunked bulk indexing into the internal index.

use super::index_store::{ensure_text, internal_upsert_sql, timestamp, IndexStore};
use crate::compose::{Composition, DocumentComposer};
use crate::config::IndexConfig;
use crate::error::{Result, SearchError};
use crate::models::{BatchSummary, Entity, TenantSlug};
use rusqlite::{params, Connection};
use tracing::{debug, info};

/// Composes and upserts many entities of one table.
///
/// Chunks are processed in order, each inside its own transaction. The first
/// failing chunk is rolled back and aborts the rest of the batch; earlier
/// chunks stay committed.
pub struct BatchIndexer<'c> {
    conn: &'c Connection,
    tenant: &'c TenantSlug,
    chunk_size: usize,
}

impl<'c> BatchIndexer<'c> {
    pub fn new(conn: &'c Connection, tenant: &'c TenantSlug) -> Self {
        Self {
            conn,
            tenant,
            chunk_size: IndexConfig::BATCH_CHUNK_SIZE,
        }
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    pub fn index_batch(&self, table: &str, entities: &[Entity]) -> Result<BatchSummary> {
        let mut summary = BatchSummary::default();

        for (chunk, entities) in entities.chunks(self.chunk_size).enumerate() {
            let (indexed, skipped) =
                self.index_chunk(table, entities)
                    .map_err(|e| SearchError::BatchChunk {
                        chunk,
                        source: Box::new(e),
                    })?;

            summary.chunks += 1;
            summary.indexed += indexed;
            summary.skipped += skipped;
            debug!(
                "Batch chunk {} of {}: {} indexed, {} skipped",
                chunk, table, indexed, skipped
            );
        }

        info!(
            "Batch indexed {} {} documents for tenant {} ({} skipped, {} chunks)",
            summary.indexed, table, self.tenant, summary.skipped, summary.chunks
        );
        Ok(summary)
    }

    fn index_chunk(&self, table: &str, entities: &[Entity]) -> Result<(usize, usize)> {
        let store = IndexStore::new(self.conn, self.tenant);
        let composer = DocumentComposer::new(&store, &store);

        let mut documents = Vec::with_capacity(entities.len());
        let mut skipped = 0;
        for entity in entities {
            if entity.id.is_empty() {
                return Err(SearchError::invalid_input("id", "entity id is empty"));
            }
            match composer.compose(table, &entity.fields)? {
                Composition::Document(doc) => documents.push((entity.id.as_str(), doc)),
                Composition::Empty(_) => skipped += 1,
            }
        }

        if documents.is_empty() {
            return Ok((0, skipped));
        }

        // Dropping the transaction on error rolls the chunk back.
        let tx = self.conn.unchecked_transaction()?;
        {
            let mut stmt = tx.prepare_cached(&internal_upsert_sql(self.tenant))?;
            let written_at = timestamp();
            for (id, doc) in &documents {
                ensure_text(table, id, &doc.text)?;
                let fields_json = serde_json::to_string(&doc.fields)?;
                stmt.execute(params![id, table, fields_json, doc.text, written_at])?;
            }
        }
        tx.commit()?;

        Ok((documents.len(), skipped))
    }
}
