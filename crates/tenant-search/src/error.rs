//! Error types for tenant-search.
//!
//! Every failure surfaced by the client is a [`SearchError`]. Two outcomes that
//! look like failures are deliberately *not* errors: a composition that yields
//! no text (see [`crate::IndexOutcome::Skipped`]) and a related document that
//! cannot be resolved while composing (dropped and counted instead).

use std::path::PathBuf;
use thiserror::Error;

/// Main error type for tenant-search.
#[derive(Debug, Error)]
pub enum SearchError {
    // Connection errors
    #[error("Store connection unavailable: {message}")]
    ConnectionUnavailable { message: String },

    // Database errors
    #[error("Database error: {message}")]
    Database {
        message: String,
        #[source]
        source: Option<rusqlite::Error>,
    },

    #[error("Tenant not found: {slug}")]
    TenantNotFound { slug: String },

    #[error("Record not found: {table}/{id}")]
    NotFound { table: String, id: String },

    // Serialization errors
    #[error("JSON error: {message}")]
    Json {
        message: String,
        #[source]
        source: Option<serde_json::Error>,
    },

    // Validation errors
    #[error("Invalid input for {field}: {message}")]
    InvalidInput { field: String, message: String },

    // IO errors
    #[error("IO error: {message}")]
    Io {
        message: String,
        path: Option<PathBuf>,
        #[source]
        source: Option<std::io::Error>,
    },

    // Configuration errors
    #[error("Configuration error: {message}")]
    Config { message: String },

    // Batch errors
    #[error("Batch chunk {chunk} failed: {source}")]
    BatchChunk {
        chunk: usize,
        #[source]
        source: Box<SearchError>,
    },
}

/// Result type alias for tenant-search operations.
pub type Result<T> = std::result::Result<T, SearchError>;

impl From<rusqlite::Error> for SearchError {
    fn from(err: rusqlite::Error) -> Self {
        SearchError::Database {
            message: err.to_string(),
            source: Some(err),
        }
    }
}

impl From<serde_json::Error> for SearchError {
    fn from(err: serde_json::Error) -> Self {
        SearchError::Json {
            message: err.to_string(),
            source: Some(err),
        }
    }
}

impl SearchError {
    /// Create an invalid-input error for a named argument.
    pub fn invalid_input(field: impl Into<String>, message: impl Into<String>) -> Self {
        SearchError::InvalidInput {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Check if this error is likely transient.
    ///
    /// Nothing in this crate retries; the flag is for callers that do.
    pub fn is_retryable(&self) -> bool {
        match self {
            SearchError::ConnectionUnavailable { .. } => true,
            SearchError::Database {
                source: Some(rusqlite::Error::SqliteFailure(err, _)),
                ..
            } => matches!(
                err.code,
                rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked
            ),
            SearchError::BatchChunk { source, .. } => source.is_retryable(),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = SearchError::NotFound {
            table: "orders".into(),
            id: "e1".into(),
        };
        assert_eq!(err.to_string(), "Record not found: orders/e1");

        let err = SearchError::invalid_input("query", "please provide the search string");
        assert_eq!(
            err.to_string(),
            "Invalid input for query: please provide the search string"
        );
    }

    #[test]
    fn test_batch_chunk_wraps_source() {
        let err = SearchError::BatchChunk {
            chunk: 3,
            source: Box::new(SearchError::ConnectionUnavailable {
                message: "closed".into(),
            }),
        };
        assert!(err.to_string().starts_with("Batch chunk 3 failed"));
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn test_retryable_errors() {
        assert!(SearchError::ConnectionUnavailable {
            message: "closed".into()
        }
        .is_retryable());
        assert!(!SearchError::NotFound {
            table: "t".into(),
            id: "1".into()
        }
        .is_retryable());

        let busy = rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_BUSY),
            None,
        );
        assert!(SearchError::from(busy).is_retryable());
    }
}
