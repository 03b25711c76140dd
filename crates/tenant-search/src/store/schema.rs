//! Tenant schema setup and FTS5 maintenance.
//!
//! A tenant is an attached SQLite database named after its slug. It holds the
//! two document tables, one FTS5 table per document table (kept in sync by
//! triggers), and the relation catalog.

use crate::config::QueryConfig;
use crate::error::Result;
use crate::models::TenantSlug;
use rusqlite::{params, Connection};
use tracing::{debug, info};

/// The two document tables of a tenant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IndexKind {
    /// Externally facing documents with an action payload.
    Search,
    /// Composition sources for relation traversal.
    Internal,
}

impl IndexKind {
    pub const ALL: [IndexKind; 2] = [IndexKind::Search, IndexKind::Internal];

    pub fn table_name(&self) -> &'static str {
        match self {
            IndexKind::Search => "search_indices",
            IndexKind::Internal => "internal_search_indices",
        }
    }

    pub fn fts_table_name(&self) -> &'static str {
        match self {
            IndexKind::Search => "search_indices_fts",
            IndexKind::Internal => "internal_search_indices_fts",
        }
    }
}

/// Configuration for tenant FTS5 tables.
#[derive(Debug, Clone)]
pub struct SchemaConfig {
    /// Tokenizer configuration.
    pub tokenizer: String,
}

impl Default for SchemaConfig {
    fn default() -> Self {
        Self {
            tokenizer: QueryConfig::FTS5_TOKENIZER.to_string(),
        }
    }
}

/// Manager for one tenant's schema.
pub struct TenantSchema<'a> {
    tenant: &'a TenantSlug,
    config: &'a SchemaConfig,
}

impl<'a> TenantSchema<'a> {
    pub fn new(tenant: &'a TenantSlug, config: &'a SchemaConfig) -> Self {
        Self { tenant, config }
    }

    /// Check if a table of the tenant exists.
    pub fn table_exists(&self, conn: &Connection, table: &str) -> Result<bool> {
        let count: i64 = conn.query_row(
            &format!(
                "SELECT COUNT(*) FROM {}.sqlite_master WHERE type='table' AND name=?1",
                self.tenant.schema()
            ),
            [table],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    /// Check if the FTS5 sync triggers exist for every document table.
    pub fn triggers_exist(&self, conn: &Connection) -> Result<bool> {
        for kind in IndexKind::ALL {
            for suffix in ["ai", "au", "ad"] {
                let trigger_name = format!("{}_{}", kind.table_name(), suffix);
                let count: i64 = conn.query_row(
                    &format!(
                        "SELECT COUNT(*) FROM {}.sqlite_master WHERE type='trigger' AND name=?1",
                        self.tenant.schema()
                    ),
                    [&trigger_name],
                    |row| row.get(0),
                )?;
                if count == 0 {
                    return Ok(false);
                }
            }
        }
        Ok(true)
    }

    /// Ensure the tenant schema is fully set up.
    pub fn ensure_setup(&self, conn: &Connection) -> Result<()> {
        self.create_tables(conn)?;

        for kind in IndexKind::ALL {
            if !self.table_exists(conn, kind.fts_table_name())? {
                self.create_fts_table(conn, kind)?;
                self.populate_fts(conn, kind)?;
            }
        }

        if !self.triggers_exist(conn)? {
            // Triggers missing - the FTS tables may be stale
            for kind in IndexKind::ALL {
                self.populate_fts(conn, kind)?;
            }
        }

        self.create_triggers(conn)?;
        Ok(())
    }

    /// Create document and catalog tables.
    pub fn create_tables(&self, conn: &Connection) -> Result<()> {
        let s = self.tenant.schema();
        conn.execute_batch(&format!(
            r#"
            CREATE TABLE IF NOT EXISTS {s}.search_indices (
                id TEXT NOT NULL,
                table_info TEXT NOT NULL,
                action_info TEXT NOT NULL DEFAULT '{{}}',
                search_field TEXT NOT NULL,
                tsv_text TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                PRIMARY KEY (id, table_info)
            );

            CREATE TABLE IF NOT EXISTS {s}.internal_search_indices (
                id TEXT NOT NULL,
                table_info TEXT NOT NULL,
                search_field TEXT NOT NULL,
                tsv_text TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                PRIMARY KEY (id, table_info)
            );

            -- Index for most-recent related lookups
            CREATE INDEX IF NOT EXISTS {s}.idx_internal_search_recent
                ON internal_search_indices(table_info, updated_at);

            CREATE TABLE IF NOT EXISTS {s}.related_infos (
                table_info TEXT NOT NULL,
                related_table TEXT NOT NULL,
                foreign_field TEXT NOT NULL,
                mapping_field TEXT NOT NULL,
                PRIMARY KEY (table_info, related_table, foreign_field, mapping_field)
            );

            CREATE TABLE IF NOT EXISTS {s}.table_informations (
                table_info TEXT PRIMARY KEY,
                columns TEXT NOT NULL
            );
            "#
        ))?;
        debug!("Ensured tables for tenant {}", self.tenant);
        Ok(())
    }

    /// Create the FTS5 virtual table of a document table.
    pub fn create_fts_table(&self, conn: &Connection, kind: IndexKind) -> Result<()> {
        let sql = format!(
            "CREATE VIRTUAL TABLE IF NOT EXISTS {}.{} USING fts5(
                id UNINDEXED,
                table_info UNINDEXED,
                tsv_text,
                tokenize='{}'
            )",
            self.tenant.schema(),
            kind.fts_table_name(),
            self.config.tokenizer
        );

        conn.execute(&sql, [])?;
        info!(
            "Created FTS5 table: {}.{}",
            self.tenant,
            kind.fts_table_name()
        );
        Ok(())
    }

    /// Create triggers to keep each FTS5 table in sync with its document table.
    pub fn create_triggers(&self, conn: &Connection) -> Result<()> {
        let s = self.tenant.schema();
        for kind in IndexKind::ALL {
            let table = kind.table_name();
            let fts = kind.fts_table_name();

            // Trigger bodies resolve unqualified names inside the tenant schema.
            conn.execute_batch(&format!(
                "CREATE TRIGGER IF NOT EXISTS {s}.{table}_ai AFTER INSERT ON {table} BEGIN
                    INSERT INTO {fts} (id, table_info, tsv_text)
                    VALUES (NEW.id, NEW.table_info, NEW.tsv_text);
                END;

                CREATE TRIGGER IF NOT EXISTS {s}.{table}_au AFTER UPDATE ON {table} BEGIN
                    DELETE FROM {fts} WHERE id = OLD.id AND table_info = OLD.table_info;
                    INSERT INTO {fts} (id, table_info, tsv_text)
                    VALUES (NEW.id, NEW.table_info, NEW.tsv_text);
                END;

                CREATE TRIGGER IF NOT EXISTS {s}.{table}_ad AFTER DELETE ON {table} BEGIN
                    DELETE FROM {fts} WHERE id = OLD.id AND table_info = OLD.table_info;
                END;"
            ))?;
        }

        debug!("Created FTS5 triggers for tenant {}", self.tenant);
        Ok(())
    }

    /// Populate an FTS5 table from its document table.
    pub fn populate_fts(&self, conn: &Connection, kind: IndexKind) -> Result<()> {
        let s = self.tenant.schema();
        let table = kind.table_name();
        let fts = kind.fts_table_name();

        conn.execute_batch(&format!(
            "DELETE FROM {s}.{fts};
             INSERT INTO {s}.{fts} (id, table_info, tsv_text)
             SELECT id, table_info, tsv_text FROM {s}.{table};"
        ))?;

        info!("Populated {}.{} from {}", self.tenant, fts, table);
        Ok(())
    }

    /// Rebuild both FTS5 tables completely.
    pub fn rebuild(&self, conn: &Connection) -> Result<()> {
        let s = self.tenant.schema();
        for kind in IndexKind::ALL {
            let table = kind.table_name();
            conn.execute_batch(&format!(
                "DROP TRIGGER IF EXISTS {s}.{table}_ai;
                 DROP TRIGGER IF EXISTS {s}.{table}_au;
                 DROP TRIGGER IF EXISTS {s}.{table}_ad;
                 DROP TABLE IF EXISTS {s}.{fts};",
                fts = kind.fts_table_name()
            ))?;
            self.create_fts_table(conn, kind)?;
            self.populate_fts(conn, kind)?;
        }
        self.create_triggers(conn)?;

        info!("Rebuilt FTS5 index for tenant {}", self.tenant);
        Ok(())
    }

    /// Optimize both FTS5 tables.
    pub fn optimize(&self, conn: &Connection) -> Result<()> {
        for kind in IndexKind::ALL {
            let fts = kind.fts_table_name();
            conn.execute(
                &format!(
                    "INSERT INTO {}.{fts}({fts}) VALUES('optimize')",
                    self.tenant.schema()
                ),
                [],
            )?;
        }
        debug!("Optimized FTS5 index for tenant {}", self.tenant);
        Ok(())
    }

    /// Get row counts of the tenant's tables.
    pub fn get_stats(&self, conn: &Connection) -> Result<TenantStats> {
        let s = self.tenant.schema();
        let count = |table: &str| -> Result<usize> {
            let n: i64 =
                conn.query_row(&format!("SELECT COUNT(*) FROM {s}.{table}"), [], |row| {
                    row.get(0)
                })?;
            Ok(n as usize)
        };

        Ok(TenantStats {
            tenant: self.tenant.to_string(),
            search_rows: count(IndexKind::Search.table_name())?,
            internal_rows: count(IndexKind::Internal.table_name())?,
            search_fts_rows: count(IndexKind::Search.fts_table_name())?,
            internal_fts_rows: count(IndexKind::Internal.fts_table_name())?,
            relations: count("related_infos")?,
            tokenizer: self.config.tokenizer.clone(),
        })
    }
}

/// Statistics about one tenant's index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TenantStats {
    pub tenant: String,
    pub search_rows: usize,
    pub internal_rows: usize,
    pub search_fts_rows: usize,
    pub internal_fts_rows: usize,
    pub relations: usize,
    pub tokenizer: String,
}

/// Check whether the tenant database is attached to the connection.
pub fn is_attached(conn: &Connection, tenant: &TenantSlug) -> Result<bool> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM pragma_database_list WHERE name = ?1",
        [tenant.as_str()],
        |row| row.get(0),
    )?;
    Ok(count > 0)
}

/// Attach a tenant database under its slug.
///
/// `location` is a file path or `:memory:`.
pub fn attach(conn: &Connection, tenant: &TenantSlug, location: &str) -> Result<()> {
    conn.execute("ATTACH DATABASE ?1 AS ?2", params![location, tenant.as_str()])?;
    if location != ":memory:" {
        conn.execute_batch(&format!(
            "PRAGMA {s}.journal_mode=WAL; PRAGMA {s}.synchronous=NORMAL;",
            s = tenant.schema()
        ))?;
    }
    info!("Attached tenant {} ({})", tenant, location);
    Ok(())
}
