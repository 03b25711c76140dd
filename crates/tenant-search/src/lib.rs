//! tenant-search - Multi-tenant, relation-aware document indexing on SQLite FTS5.
//!
//! Each tenant is an attached SQLite database holding two document indexes:
//! a public search index (documents with an action payload) and an internal
//! index used as the source for relation traversal. Writing an internal
//! document composes its searchable text from its own allow-listed columns
//! plus the text of related documents, found by walking the tenant's
//! declared relation graph.
//!
//! # Example
//!
//! ```rust,ignore
//! use serde_json::json;
//! use tenant_search::{Pagination, RelatedInfo, SearchClient, TableInformation};
//!
//! fn main() -> tenant_search::Result<()> {
//!     let client = SearchClient::in_memory()?;
//!     client.provision_tenant("acme")?;
//!
//!     client.register_table("acme", &TableInformation::new("customers", ["name"]))?;
//!     client.register_table("acme", &TableInformation::new("orders", ["customer_id", "amount"]))?;
//!     client.register_relation("acme", &RelatedInfo::new("orders", "customers", "customer_id", "id"))?;
//!
//!     let customer = serde_json::from_value(json!({"name": "Ada Lovelace"}))?;
//!     client.index_internal("acme", "c1", "customers", &customer)?;
//!
//!     let order = serde_json::from_value(json!({"customer_id": "c1", "amount": "100"}))?;
//!     client.index_internal("acme", "o1", "orders", &order)?;
//!
//!     let ids = client.internal_search("acme", "lovelace", "orders", Pagination::default())?;
//!     assert_eq!(ids, vec!["o1"]);
//!
//!     client.close()
//! }
//! ```

pub mod compose;
pub mod config;
pub mod error;
pub mod models;
pub mod pagination;
pub mod query;
pub mod store;

mod api;

// Re-export commonly used types
pub use api::{SearchClient, SearchClientBuilder};
pub use compose::{AllowListPolicy, Composition, CompositionStats, DocumentComposer};
pub use config::{ClientConfig, IndexConfig, QueryConfig};
pub use error::{Result, SearchError};
pub use models::{
    BatchSummary, Entity, FieldMap, IndexOutcome, InternalSearchIndexRecord, RelatedInfo,
    SearchHit, SearchIndexRecord, TableInformation, TenantSlug,
};
pub use pagination::{PageWindow, Pagination};
pub use store::{IndexKind, TenantStats};
