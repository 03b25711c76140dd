//! Page parameters for the read paths.

use crate::config::QueryConfig;
use serde::{Deserialize, Serialize};

/// Caller-supplied paging, 1-based.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pagination {
    pub page: Option<i64>,
    pub page_size: Option<i64>,
}

/// Resolved `OFFSET`/`LIMIT` pair, in SQLite's integer type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageWindow {
    pub offset: i64,
    pub limit: i64,
}

impl Pagination {
    pub fn new(page: Option<i64>, page_size: Option<i64>) -> Self {
        Self { page, page_size }
    }

    pub fn page(page: i64) -> Self {
        Self {
            page: Some(page),
            page_size: None,
        }
    }

    pub fn with_page_size(mut self, page_size: i64) -> Self {
        self.page_size = Some(page_size);
        self
    }

    /// Convert to an offset and limit.
    ///
    /// The limit is replaced only by a positive page size; the offset moves only
    /// for pages after the first. Offsets past `i64::MAX` are capped there.
    pub fn window(&self) -> PageWindow {
        let limit = match self.page_size {
            Some(size) if size > 0 => size,
            _ => QueryConfig::DEFAULT_PAGE_SIZE,
        };
        let offset = match self.page {
            Some(page) if page > 1 => (page - 1).saturating_mul(limit),
            _ => 0,
        };
        PageWindow { offset, limit }
    }
}
