//! Public client API.
//!
//! [`SearchClient`] owns the single SQLite connection and exposes every
//! operation on a tenant by slug.

mod builder;

pub use builder::SearchClientBuilder;

use crate::compose::{Composition, DocumentComposer};
use crate::config::ClientConfig;
use crate::error::{Result, SearchError};
use crate::models::{
    BatchSummary, Entity, FieldMap, IndexOutcome, InternalSearchIndexRecord, RelatedInfo,
    SearchHit, SearchIndexRecord, TableInformation, TenantSlug,
};
use crate::pagination::Pagination;
use crate::query::QueryEngine;
use crate::store::{
    attach, is_attached, BatchIndexer, IndexKind, IndexStore, SchemaConfig, TenantSchema,
    TenantStats,
};
use rusqlite::Connection;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{debug, info};

/// Multi-tenant search client.
///
/// All calls are synchronous and serialize on one connection. After
/// [`close`](Self::close) every call fails with
/// [`SearchError::ConnectionUnavailable`].
///
/// # Example
///
/// ```rust,ignore
/// use tenant_search::{Pagination, SearchClient};
/// use serde_json::json;
///
/// let client = SearchClient::in_memory()?;
/// client.provision_tenant("acme")?;
///
/// let fields = serde_json::from_value(json!({"amount": "100"}))?;
/// client.index("acme", "e1", "orders", &json!({"a": 1}), &fields)?;
///
/// let hits = client.search("acme", "100", Pagination::default())?;
/// assert_eq!(hits[0].id, "e1");
/// ```
pub struct SearchClient {
    conn: Mutex<Option<Connection>>,
    config: ClientConfig,
    schema_config: SchemaConfig,
}

impl SearchClient {
    /// Open a client with the given configuration.
    pub fn open(config: ClientConfig) -> Result<Self> {
        config.validate()?;

        let conn = match &config.database_path {
            Some(path) => {
                if let Some(parent) = path.parent() {
                    ensure_dir(parent)?;
                }
                let conn = Connection::open(path)?;
                conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;
                info!("Opened search database at {}", path.display());
                conn
            }
            None => {
                debug!("Opened in-memory search database");
                Connection::open_in_memory()?
            }
        };
        conn.busy_timeout(config.busy_timeout)?;
        conn.execute_batch("PRAGMA temp_store=MEMORY;")?;

        Ok(Self {
            conn: Mutex::new(Some(conn)),
            config,
            schema_config: SchemaConfig::default(),
        })
    }

    /// Open a client that keeps every tenant in memory.
    pub fn in_memory() -> Result<Self> {
        Self::open(ClientConfig::default())
    }

    /// Open a client configured from `TENANT_SEARCH_*` environment variables.
    pub fn from_env() -> Result<Self> {
        Self::open(ClientConfig::from_env()?)
    }

    pub fn builder() -> SearchClientBuilder {
        SearchClientBuilder::new()
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    // ========================================
    // Tenants
    // ========================================

    /// Attach a tenant, creating its database and tables when missing.
    ///
    /// Safe to call for a tenant that is already provisioned.
    pub fn provision_tenant(&self, tenant: &str) -> Result<()> {
        let slug = TenantSlug::parse(tenant)?;
        self.with_connection(|conn| {
            if !is_attached(conn, &slug)? {
                let location = self.tenant_location(&slug)?;
                attach(conn, &slug, &location)?;
            }
            TenantSchema::new(&slug, &self.schema_config).ensure_setup(conn)?;
            info!("Provisioned tenant {}", slug);
            Ok(())
        })
    }

    /// Attach the existing database of a tenant.
    ///
    /// Fails with [`SearchError::TenantNotFound`] when no database file exists
    /// for the tenant. In-memory clients have nothing to attach.
    pub fn attach_tenant(&self, tenant: &str) -> Result<()> {
        let slug = TenantSlug::parse(tenant)?;
        self.with_connection(|conn| {
            if is_attached(conn, &slug)? {
                return Ok(());
            }
            let path = self
                .tenant_path(&slug)
                .filter(|p| p.is_file())
                .ok_or_else(|| SearchError::TenantNotFound {
                    slug: slug.to_string(),
                })?;
            attach(conn, &slug, &path.to_string_lossy())?;
            TenantSchema::new(&slug, &self.schema_config).ensure_setup(conn)
        })
    }

    /// Detach a tenant. Returns whether it was attached.
    pub fn detach_tenant(&self, tenant: &str) -> Result<bool> {
        let slug = TenantSlug::parse(tenant)?;
        self.with_connection(|conn| {
            if !is_attached(conn, &slug)? {
                return Ok(false);
            }
            conn.execute("DETACH DATABASE ?1", [slug.as_str()])?;
            info!("Detached tenant {}", slug);
            Ok(true)
        })
    }

    pub fn tenant_stats(&self, tenant: &str) -> Result<TenantStats> {
        self.with_tenant(tenant, |conn, slug| {
            TenantSchema::new(slug, &self.schema_config).get_stats(conn)
        })
    }

    /// Drop and repopulate both FTS5 tables from the document tables.
    pub fn rebuild_tenant_index(&self, tenant: &str) -> Result<()> {
        self.with_tenant(tenant, |conn, slug| {
            TenantSchema::new(slug, &self.schema_config).rebuild(conn)
        })
    }

    pub fn optimize_tenant_index(&self, tenant: &str) -> Result<()> {
        self.with_tenant(tenant, |conn, slug| {
            TenantSchema::new(slug, &self.schema_config).optimize(conn)
        })
    }

    // ========================================
    // Relation catalog
    // ========================================

    pub fn register_table(&self, tenant: &str, info: &TableInformation) -> Result<()> {
        self.with_tenant(tenant, |conn, slug| {
            IndexStore::new(conn, slug).register_table(info)
        })
    }

    pub fn register_relation(&self, tenant: &str, relation: &RelatedInfo) -> Result<()> {
        self.with_tenant(tenant, |conn, slug| {
            IndexStore::new(conn, slug).register_relation(relation)
        })
    }

    pub fn remove_relation(&self, tenant: &str, relation: &RelatedInfo) -> Result<bool> {
        self.with_tenant(tenant, |conn, slug| {
            IndexStore::new(conn, slug).remove_relation(relation)
        })
    }

    // ========================================
    // Queries
    // ========================================

    /// Prefix search over a tenant's search index.
    ///
    /// Empty or whitespace-only text is rejected with
    /// [`SearchError::InvalidInput`].
    pub fn search(&self, tenant: &str, query: &str, pagination: Pagination) -> Result<Vec<SearchHit>> {
        self.with_tenant(tenant, |conn, slug| {
            QueryEngine::new(conn, slug).search(query, pagination)
        })
    }

    /// Prefix search over the internal index of one table, returning ids.
    pub fn internal_search(
        &self,
        tenant: &str,
        query: &str,
        table: &str,
        pagination: Pagination,
    ) -> Result<Vec<String>> {
        self.with_tenant(tenant, |conn, slug| {
            QueryEngine::new(conn, slug).internal_search(query, table, pagination)
        })
    }

    /// Search documents whose fields start with the given values.
    pub fn search_by_field(
        &self,
        tenant: &str,
        fields: &FieldMap,
        pagination: Pagination,
    ) -> Result<Vec<SearchHit>> {
        self.with_tenant(tenant, |conn, slug| {
            QueryEngine::new(conn, slug).search_by_field(fields, pagination)
        })
    }

    // ========================================
    // Writes
    // ========================================

    /// Index a search document from the entity's own fields.
    ///
    /// Tables without a declared allow-list keep every non-audit column.
    pub fn index(
        &self,
        tenant: &str,
        id: &str,
        table: &str,
        action: &serde_json::Value,
        fields: &FieldMap,
    ) -> Result<IndexOutcome> {
        validate_key(table, id)?;
        self.with_tenant(tenant, |conn, slug| {
            let store = IndexStore::new(conn, slug);
            match DocumentComposer::new(&store, &store).compose_standalone(table, fields)? {
                Composition::Document(doc) => {
                    let id = store.upsert_search(table, id, action, &doc.fields, &doc.text)?;
                    Ok(IndexOutcome::Indexed { id })
                }
                Composition::Empty(_) => {
                    debug!("Nothing searchable in {}/{}, skipped", table, id);
                    Ok(IndexOutcome::Skipped { id: id.to_string() })
                }
            }
        })
    }

    /// Compose an internal document, following declared relations.
    pub fn index_internal(
        &self,
        tenant: &str,
        id: &str,
        table: &str,
        fields: &FieldMap,
    ) -> Result<IndexOutcome> {
        validate_key(table, id)?;
        self.with_tenant(tenant, |conn, slug| {
            let store = IndexStore::new(conn, slug);
            match DocumentComposer::new(&store, &store).compose(table, fields)? {
                Composition::Document(doc) => {
                    if doc.stats.skipped_relations > 0 {
                        debug!(
                            "Indexed {}/{} with {} unresolved relations",
                            table, id, doc.stats.skipped_relations
                        );
                    }
                    let id = store.upsert_internal(table, id, &doc.fields, &doc.text)?;
                    Ok(IndexOutcome::Indexed { id })
                }
                Composition::Empty(_) => {
                    debug!("Nothing searchable in internal {}/{}, skipped", table, id);
                    Ok(IndexOutcome::Skipped { id: id.to_string() })
                }
            }
        })
    }

    /// Compose and write many entities of one table in chunks.
    ///
    /// Stops at the first failing chunk; chunks before it stay written.
    pub fn index_batch_internal(
        &self,
        tenant: &str,
        table: &str,
        entities: &[Entity],
    ) -> Result<BatchSummary> {
        if table.is_empty() {
            return Err(SearchError::invalid_input("table", "table name is empty"));
        }
        self.with_tenant(tenant, |conn, slug| {
            BatchIndexer::new(conn, slug)
                .with_chunk_size(self.config.batch_chunk_size)
                .index_batch(table, entities)
        })
    }

    /// Delete a search document. Fails with [`SearchError::NotFound`] if absent.
    pub fn delete(&self, tenant: &str, id: &str, table: &str) -> Result<String> {
        self.with_tenant(tenant, |conn, slug| {
            IndexStore::new(conn, slug).delete(IndexKind::Search, table, id)
        })
    }

    /// Delete an internal document. Fails with [`SearchError::NotFound`] if absent.
    pub fn delete_internal(&self, tenant: &str, id: &str, table: &str) -> Result<String> {
        self.with_tenant(tenant, |conn, slug| {
            IndexStore::new(conn, slug).delete(IndexKind::Internal, table, id)
        })
    }

    pub fn get_search_record(
        &self,
        tenant: &str,
        table: &str,
        id: &str,
    ) -> Result<Option<SearchIndexRecord>> {
        self.with_tenant(tenant, |conn, slug| {
            IndexStore::new(conn, slug).get_search(table, id)
        })
    }

    pub fn get_internal_record(
        &self,
        tenant: &str,
        table: &str,
        id: &str,
    ) -> Result<Option<InternalSearchIndexRecord>> {
        self.with_tenant(tenant, |conn, slug| {
            IndexStore::new(conn, slug).get_internal(table, id)
        })
    }

    // ========================================
    // Lifecycle
    // ========================================

    /// Close the connection. Closing twice is a no-op.
    pub fn close(&self) -> Result<()> {
        let mut guard = self.conn.lock().map_err(|_| SearchError::ConnectionUnavailable {
            message: "connection lock poisoned".to_string(),
        })?;

        if let Some(conn) = guard.take() {
            conn.close().map_err(|(_, e)| SearchError::from(e))?;
            info!("Closed search client");
        }
        Ok(())
    }

    pub fn is_closed(&self) -> bool {
        self.conn.lock().map(|guard| guard.is_none()).unwrap_or(true)
    }

    // ========================================
    // Helpers
    // ========================================

    fn with_connection<T>(&self, f: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
        let guard = self.conn.lock().map_err(|_| SearchError::ConnectionUnavailable {
            message: "connection lock poisoned".to_string(),
        })?;
        let conn = guard.as_ref().ok_or_else(|| SearchError::ConnectionUnavailable {
            message: "client is closed".to_string(),
        })?;
        f(conn)
    }

    /// Run `f` against an attached tenant.
    fn with_tenant<T>(
        &self,
        tenant: &str,
        f: impl FnOnce(&Connection, &TenantSlug) -> Result<T>,
    ) -> Result<T> {
        let slug = TenantSlug::parse(tenant)?;
        self.with_connection(|conn| {
            if !is_attached(conn, &slug)? {
                return Err(SearchError::TenantNotFound {
                    slug: slug.to_string(),
                });
            }
            f(conn, &slug)
        })
    }

    /// Database file of a tenant, `None` for in-memory clients.
    fn tenant_path(&self, slug: &TenantSlug) -> Option<PathBuf> {
        self.config
            .resolved_tenants_dir()
            .map(|dir| dir.join(format!("{}.db", slug.as_str())))
    }

    /// Where `provision_tenant` attaches a tenant from.
    fn tenant_location(&self, slug: &TenantSlug) -> Result<String> {
        match self.tenant_path(slug) {
            Some(path) => {
                if let Some(parent) = path.parent() {
                    ensure_dir(parent)?;
                }
                Ok(path.to_string_lossy().into_owned())
            }
            None => Ok(":memory:".to_string()),
        }
    }
}

fn validate_key(table: &str, id: &str) -> Result<()> {
    if table.is_empty() {
        return Err(SearchError::invalid_input("table", "table name is empty"));
    }
    if id.is_empty() {
        return Err(SearchError::invalid_input("id", "id is empty"));
    }
    Ok(())
}

fn ensure_dir(dir: &Path) -> Result<()> {
    if dir.as_os_str().is_empty() || dir.exists() {
        return Ok(());
    }
    std::fs::create_dir_all(dir).map_err(|e| SearchError::Io {
        message: format!("Failed to create directory {}", dir.display()),
        path: Some(dir.to_path_buf()),
        source: Some(e),
    })
}
