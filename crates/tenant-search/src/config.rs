//! Centralized configuration for tenant-search.
//!
//! Fixed behavioral constants live on [`IndexConfig`] and [`QueryConfig`];
//! everything a deployment may want to change lives on [`ClientConfig`].

use crate::error::{Result, SearchError};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Composition and indexing constants.
pub struct IndexConfig;

impl IndexConfig {
    /// Maximum number of relation levels walked while composing a document.
    pub const MAX_RELATION_DEPTH: usize = 5;
    /// Default number of entities per batch chunk.
    pub const BATCH_CHUNK_SIZE: usize = 10_000;
    /// Name of the identity column.
    pub const IDENTITY_FIELD: &'static str = "id";
    /// Audit columns that never contribute to searchable text.
    pub const AUDIT_FIELDS: &'static [&'static str] = &[
        "created_at",
        "modified_at",
        "updated_at",
        "creator_id",
        "modifier_id",
        "deleted_at",
    ];
}

/// Query constants.
pub struct QueryConfig;

impl QueryConfig {
    pub const DEFAULT_PAGE_SIZE: i64 = 15;
    pub const FTS5_TOKENIZER: &'static str = "unicode61 remove_diacritics 1";
}

/// Runtime configuration for a [`crate::SearchClient`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", default)]
pub struct ClientConfig {
    /// Main database file. `None` keeps everything in memory.
    pub database_path: Option<PathBuf>,
    /// Directory holding one database file per tenant.
    ///
    /// Defaults to the directory of `database_path`.
    pub tenants_dir: Option<PathBuf>,
    /// Entities per chunk in batch indexing.
    pub batch_chunk_size: usize,
    /// How long SQLite waits on a locked database.
    pub busy_timeout: Duration,
}

impl ClientConfig {
    pub const ENV_DATABASE_PATH: &'static str = "TENANT_SEARCH_DATABASE_PATH";
    pub const ENV_TENANTS_DIR: &'static str = "TENANT_SEARCH_TENANTS_DIR";
    pub const ENV_BATCH_CHUNK_SIZE: &'static str = "TENANT_SEARCH_BATCH_CHUNK_SIZE";
    pub const ENV_BUSY_TIMEOUT_MS: &'static str = "TENANT_SEARCH_BUSY_TIMEOUT_MS";

    /// Default busy timeout (30 seconds).
    pub const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_secs(30);

    /// Load configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(path) = lookup(Self::ENV_DATABASE_PATH).filter(|v| !v.trim().is_empty()) {
            config.database_path = Some(PathBuf::from(path.trim()));
        }
        if let Some(dir) = lookup(Self::ENV_TENANTS_DIR).filter(|v| !v.trim().is_empty()) {
            config.tenants_dir = Some(PathBuf::from(dir.trim()));
        }
        if let Some(raw) = lookup(Self::ENV_BATCH_CHUNK_SIZE) {
            config.batch_chunk_size = parse_env(Self::ENV_BATCH_CHUNK_SIZE, &raw)?;
        }
        if let Some(raw) = lookup(Self::ENV_BUSY_TIMEOUT_MS) {
            config.busy_timeout = Duration::from_millis(parse_env(Self::ENV_BUSY_TIMEOUT_MS, &raw)?);
        }

        config.validate()?;
        Ok(config)
    }

    /// Reject values the client cannot operate with.
    pub fn validate(&self) -> Result<()> {
        if self.batch_chunk_size == 0 {
            return Err(SearchError::Config {
                message: "batch_chunk_size must be greater than zero".to_string(),
            });
        }
        if self.database_path.is_none() && self.tenants_dir.is_some() {
            return Err(SearchError::Config {
                message: "tenants_dir requires a database_path".to_string(),
            });
        }
        Ok(())
    }

    /// Directory where tenant database files are created.
    pub fn resolved_tenants_dir(&self) -> Option<PathBuf> {
        self.tenants_dir.clone().or_else(|| {
            self.database_path
                .as_ref()
                .and_then(|p| p.parent())
                .map(|p| p.to_path_buf())
        })
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            database_path: None,
            tenants_dir: None,
            batch_chunk_size: IndexConfig::BATCH_CHUNK_SIZE,
            busy_timeout: Self::DEFAULT_BUSY_TIMEOUT,
        }
    }
}

fn parse_env<T: std::str::FromStr>(key: &str, raw: &str) -> Result<T> {
    raw.trim().parse().map_err(|_| SearchError::Config {
        message: format!("{} has an invalid value: {:?}", key, raw),
    })
}
