//! SQLite storage for tenant indexes.
//!
//! Each tenant lives in its own attached database. Everything in this module
//! operates on a borrowed [`rusqlite::Connection`] plus the tenant slug, so
//! the same code runs on a plain connection or inside a transaction.
//!
//! - [`TenantSchema`] creates and maintains tables, FTS5 mirrors and triggers
//! - [`IndexStore`] upserts, deletes and reads documents and the relation catalog
//! - [`BatchIndexer`] composes and writes entities in chunked transactions

mod batch;
mod catalog;
mod index_store;
mod schema;

pub use batch::BatchIndexer;
pub use index_store::IndexStore;
pub use schema::{attach, is_attached, IndexKind, SchemaConfig, TenantSchema, TenantStats};
