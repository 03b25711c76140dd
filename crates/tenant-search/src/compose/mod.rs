//! Document composition.
//!
//! Turns the raw field map of one entity into the text stored in the FTS5
//! index. Composition filters the entity's own columns, then walks the
//! declared relation graph breadth-first (bounded by
//! [`IndexConfig::MAX_RELATION_DEPTH`](crate::config::IndexConfig::MAX_RELATION_DEPTH))
//! and appends the already indexed text of related entities.
//!
//! The composer only reads; it never writes. Storage is reached through the
//! [`RelationCatalog`] and [`RelatedDocuments`] traits, which the SQLite
//! [`IndexStore`](crate::store::IndexStore) implements for one tenant.

mod composer;
mod filter;

pub use composer::{
    ComposedDocument, Composition, CompositionStats, DocumentComposer, RelatedDocuments,
    RelationCatalog,
};
pub use filter::{is_audit_field, render_value, AllowListPolicy, FieldFilter, FilteredFields};
