//! Builder for configuring a SearchClient.

use std::path::PathBuf;
use std::time::Duration;

use crate::api::SearchClient;
use crate::config::ClientConfig;
use crate::error::Result;

/// Builder for configuring a [`SearchClient`].
///
/// # Example
///
/// ```rust,ignore
/// use tenant_search::SearchClient;
///
/// let client = SearchClient::builder()
///     .database_path("./data/search.db")
///     .tenants_dir("./data/tenants")
///     .batch_chunk_size(5_000)
///     .build()?;
/// ```
#[derive(Debug, Clone, Default)]
pub struct SearchClientBuilder {
    config: ClientConfig,
}

impl SearchClientBuilder {
    /// Create a builder with default settings (everything in memory).
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from an existing configuration.
    pub fn from_config(config: ClientConfig) -> Self {
        Self { config }
    }

    /// Store the main database in a file.
    ///
    /// Tenant databases go next to it unless [`tenants_dir`](Self::tenants_dir) is set.
    pub fn database_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.database_path = Some(path.into());
        self
    }

    /// Directory for per-tenant database files.
    pub fn tenants_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.tenants_dir = Some(dir.into());
        self
    }

    /// Entities per transaction in batch indexing.
    ///
    /// Default: 10,000
    pub fn batch_chunk_size(mut self, size: usize) -> Self {
        self.config.batch_chunk_size = size;
        self
    }

    /// How long a statement waits on a locked database.
    ///
    /// Default: 30 seconds
    pub fn busy_timeout(mut self, timeout: Duration) -> Self {
        self.config.busy_timeout = timeout;
        self
    }

    pub fn build(self) -> Result<SearchClient> {
        SearchClient::open(self.config)
    }
}
