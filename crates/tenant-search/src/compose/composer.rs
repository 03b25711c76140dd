//! Relation-aware document composition.

use super::filter::FieldFilter;
use crate::config::IndexConfig;
use crate::error::Result;
use crate::models::{FieldMap, RelatedInfo, TableInformation};
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use tracing::{debug, warn};

/// Read access to the declared relation graph and column allow-lists.
pub trait RelationCatalog {
    /// Allow-list for a table, `None` when the table was never declared.
    fn table_information(&self, table: &str) -> Result<Option<TableInformation>>;

    /// Every edge whose source is one of `tables`.
    fn relations_from(&self, tables: &[String]) -> Result<Vec<RelatedInfo>>;
}

/// Read access to previously indexed internal documents.
///
/// Both lookups return the stored structured field map as raw JSON; decoding
/// is the composer's job so that a corrupt row only costs one fragment.
pub trait RelatedDocuments {
    fn fields_by_id(&self, table: &str, id: &str) -> Result<Option<String>>;

    /// The most recently written row of `table` whose `field` equals `value`.
    fn latest_fields_by_value(&self, table: &str, field: &str, value: &str)
        -> Result<Option<String>>;
}

/// Counters describing one composition.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CompositionStats {
    /// Relation levels walked.
    pub levels: usize,
    /// Related documents that contributed to the document.
    pub resolved_relations: usize,
    /// Related documents that could not be fetched or decoded.
    pub skipped_relations: usize,
}

/// A document ready to be written.
#[derive(Debug, Clone, PartialEq)]
pub struct ComposedDocument {
    /// Searchable text.
    pub text: String,
    /// The entity's own fields after filtering.
    pub fields: FieldMap,
    pub stats: CompositionStats,
}

/// Result of [`DocumentComposer::compose`].
#[derive(Debug, Clone, PartialEq)]
pub enum Composition {
    Document(ComposedDocument),
    /// Nothing searchable survived; callers treat this as a successful no-op.
    Empty(CompositionStats),
}

impl Composition {
    pub fn is_empty(&self) -> bool {
        matches!(self, Composition::Empty(_))
    }

    pub fn stats(&self) -> CompositionStats {
        match self {
            Composition::Document(doc) => doc.stats,
            Composition::Empty(stats) => *stats,
        }
    }

    pub fn into_document(self) -> Option<ComposedDocument> {
        match self {
            Composition::Document(doc) => Some(doc),
            Composition::Empty(_) => None,
        }
    }
}

/// Builds searchable text for an entity, pulling in text of related entities.
pub struct DocumentComposer<'a, C: ?Sized, D: ?Sized> {
    catalog: &'a C,
    documents: &'a D,
}

/// Values seen so far, keyed by `(table, field)`.
type LookupMap = HashMap<(String, String), String>;

impl<'a, C, D> DocumentComposer<'a, C, D>
where
    C: RelationCatalog + ?Sized,
    D: RelatedDocuments + ?Sized,
{
    pub fn new(catalog: &'a C, documents: &'a D) -> Self {
        Self { catalog, documents }
    }

    /// Compose an internal document: allow-list is strict and relations are expanded.
    pub fn compose(&self, table: &str, raw_fields: &FieldMap) -> Result<Composition> {
        let mut infos = HashMap::new();
        let mut stats = CompositionStats::default();
        let mut parts: Vec<String> = Vec::new();
        let mut lookup = LookupMap::new();

        let info = self.table_information(&mut infos, table)?;
        let local = FieldFilter::strict(info.as_ref()).apply(raw_fields);
        for (key, value) in &local.values {
            parts.push(value.clone());
            lookup.insert((table.to_string(), key.clone()), value.clone());
        }

        self.expand_relations(table, &mut infos, &mut lookup, &mut parts, &mut stats)?;

        Ok(finish(parts, local.fields, stats))
    }

    /// Compose a document from the entity's own fields only.
    ///
    /// Undeclared tables keep every column; declared ones are still filtered.
    pub fn compose_standalone(&self, table: &str, raw_fields: &FieldMap) -> Result<Composition> {
        let info = self.catalog.table_information(table)?;
        let local = FieldFilter::open(info.as_ref()).apply(raw_fields);
        let parts = local.values.iter().map(|(_, v)| v.clone()).collect();
        Ok(finish(parts, local.fields, CompositionStats::default()))
    }

    fn table_information(
        &self,
        cache: &mut HashMap<String, Option<TableInformation>>,
        table: &str,
    ) -> Result<Option<TableInformation>> {
        if let Some(info) = cache.get(table) {
            return Ok(info.clone());
        }
        let info = self.catalog.table_information(table)?;
        cache.insert(table.to_string(), info.clone());
        Ok(info)
    }

    /// Breadth-first walk of the relation graph.
    ///
    /// Level `n` resolves the edges leaving tables first reached at level
    /// `n - 1`. A table is expanded at most once, and no more than
    /// `MAX_RELATION_DEPTH` levels are walked.
    ///
    /// Because visits are tracked per table, a self-referential relation
    /// (`employees.manager_id -> employees.id`) resolves a single hop: the
    /// direct manager is composed in, the manager's manager is not.
    fn expand_relations(
        &self,
        table: &str,
        infos: &mut HashMap<String, Option<TableInformation>>,
        lookup: &mut LookupMap,
        parts: &mut Vec<String>,
        stats: &mut CompositionStats,
    ) -> Result<()> {
        let mut visited: HashSet<String> = HashSet::from([table.to_string()]);
        let mut frontier = vec![table.to_string()];

        while !frontier.is_empty() && stats.levels < IndexConfig::MAX_RELATION_DEPTH {
            stats.levels += 1;

            let mut edges = self.catalog.relations_from(&frontier)?;
            edges.sort();
            edges.dedup();

            let mut next = Vec::new();
            for edge in edges {
                if visited.insert(edge.related_table.clone()) {
                    next.push(edge.related_table.clone());
                }

                let key = (edge.table.clone(), edge.foreign_field.clone());
                let Some(term) = lookup.get(&key).cloned() else {
                    continue;
                };

                let Some(fields) = self.fetch_related(&edge, &term, stats) else {
                    continue;
                };

                let info = self.table_information(infos, &edge.related_table)?;
                let related = FieldFilter::strict(info.as_ref())
                    .keep_identity(true)
                    .apply(&fields);
                for (field, value) in related.values {
                    parts.push(value.clone());
                    // The closest entity of a table owns its lookup slot.
                    lookup
                        .entry((edge.related_table.clone(), field))
                        .or_insert(value);
                }
                stats.resolved_relations += 1;
            }

            frontier = next;
        }

        Ok(())
    }

    /// Fetch and decode the document an edge points at.
    ///
    /// Misses and failures are counted and logged, never returned.
    fn fetch_related(
        &self,
        edge: &RelatedInfo,
        term: &str,
        stats: &mut CompositionStats,
    ) -> Option<FieldMap> {
        let by_id = edge
            .mapping_field
            .eq_ignore_ascii_case(IndexConfig::IDENTITY_FIELD);

        let raw = if by_id {
            self.documents.fields_by_id(&edge.related_table, term)
        } else {
            self.documents
                .latest_fields_by_value(&edge.related_table, &edge.mapping_field, term)
        };

        let raw = match raw {
            Ok(Some(raw)) => raw,
            Ok(None) => {
                debug!(
                    "No {} document for {}.{} = {}",
                    edge.related_table, edge.table, edge.foreign_field, term
                );
                stats.skipped_relations += 1;
                return None;
            }
            Err(e) => {
                warn!(
                    "Skipping related {} document for {}.{}: {}",
                    edge.related_table, edge.table, edge.foreign_field, e
                );
                stats.skipped_relations += 1;
                return None;
            }
        };

        match serde_json::from_str::<FieldMap>(&raw) {
            Ok(mut fields) => {
                if by_id {
                    fields
                        .entry(IndexConfig::IDENTITY_FIELD.to_string())
                        .or_insert_with(|| Value::String(term.to_string()));
                }
                Some(fields)
            }
            Err(e) => {
                warn!(
                    "Skipping undecodable {} document ({} = {}): {}",
                    edge.related_table, edge.mapping_field, term, e
                );
                stats.skipped_relations += 1;
                None
            }
        }
    }
}

fn finish(parts: Vec<String>, fields: FieldMap, stats: CompositionStats) -> Composition {
    let text = parts.join(" ");
    if text.trim().is_empty() {
        Composition::Empty(stats)
    } else {
        Composition::Document(ComposedDocument {
            text,
            fields,
            stats,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SearchError;
    use serde_json::json;
    use std::cell::Cell;

    /// In-memory catalog and document source.
    #[derive(Default)]
    struct MemoryStore {
        tables: HashMap<String, TableInformation>,
        relations: Vec<RelatedInfo>,
        // (table, id, raw json), later entries are more recent
        documents: Vec<(String, String, String)>,
        relation_calls: Cell<usize>,
        fail_lookups: bool,
        fail_catalog: bool,
    }

    impl MemoryStore {
        fn table(mut self, table: &str, columns: &[&str]) -> Self {
            self.tables.insert(
                table.to_string(),
                TableInformation::new(table, columns.iter().copied()),
            );
            self
        }

        fn relation(mut self, table: &str, related: &str, foreign: &str, mapping: &str) -> Self {
            self.relations
                .push(RelatedInfo::new(table, related, foreign, mapping));
            self
        }

        fn document(mut self, table: &str, id: &str, fields: Value) -> Self {
            self.documents
                .push((table.to_string(), id.to_string(), fields.to_string()));
            self
        }

        fn raw_document(mut self, table: &str, id: &str, raw: &str) -> Self {
            self.documents
                .push((table.to_string(), id.to_string(), raw.to_string()));
            self
        }
    }

    impl RelationCatalog for MemoryStore {
        fn table_information(&self, table: &str) -> Result<Option<TableInformation>> {
            Ok(self.tables.get(table).cloned())
        }

        fn relations_from(&self, tables: &[String]) -> Result<Vec<RelatedInfo>> {
            if self.fail_catalog {
                return Err(SearchError::ConnectionUnavailable {
                    message: "catalog offline".into(),
                });
            }
            self.relation_calls.set(self.relation_calls.get() + 1);
            Ok(self
                .relations
                .iter()
                .filter(|r| tables.contains(&r.table))
                .cloned()
                .collect())
        }
    }

    impl RelatedDocuments for MemoryStore {
        fn fields_by_id(&self, table: &str, id: &str) -> Result<Option<String>> {
            if self.fail_lookups {
                return Err(SearchError::ConnectionUnavailable {
                    message: "lookup offline".into(),
                });
            }
            Ok(self
                .documents
                .iter()
                .find(|(t, i, _)| t == table && i == id)
                .map(|(_, _, raw)| raw.clone()))
        }

        fn latest_fields_by_value(
            &self,
            table: &str,
            field: &str,
            value: &str,
        ) -> Result<Option<String>> {
            if self.fail_lookups {
                return Err(SearchError::ConnectionUnavailable {
                    message: "lookup offline".into(),
                });
            }
            Ok(self
                .documents
                .iter()
                .rev()
                .filter(|(t, _, _)| t == table)
                .find(|(_, _, raw)| {
                    serde_json::from_str::<FieldMap>(raw)
                        .ok()
                        .and_then(|m| m.get(field).cloned())
                        .map(|v| match v {
                            Value::String(s) => s == value,
                            other => other.to_string() == value,
                        })
                        .unwrap_or(false)
                })
                .map(|(_, _, raw)| raw.clone()))
        }
    }

    fn fields(value: Value) -> FieldMap {
        serde_json::from_value(value).unwrap()
    }

    fn compose(store: &MemoryStore, table: &str, raw: Value) -> Composition {
        DocumentComposer::new(store, store)
            .compose(table, &fields(raw))
            .unwrap()
    }

    #[test]
    fn test_local_text_in_key_order() {
        let store = MemoryStore::default().table("orders", &["amount", "status", "note"]);
        let doc = compose(
            &store,
            "orders",
            json!({"status": "open", "amount": "100", "note": "rush"}),
        )
        .into_document()
        .unwrap();

        assert_eq!(doc.text, "100 rush open");
        assert_eq!(doc.fields.len(), 3);
    }

    #[test]
    fn test_audit_columns_never_in_text() {
        let store = MemoryStore::default().table(
            "orders",
            &["amount", "created_at", "modified_at", "creator_id", "modifier_id", "deleted_at"],
        );
        let doc = compose(
            &store,
            "orders",
            json!({
                "amount": "100",
                "created_at": "stamp-created",
                "modified_at": "stamp-modified",
                "creator_id": "user-creator",
                "modifier_id": "user-modifier",
                "deleted_at": "stamp-deleted",
            }),
        )
        .into_document()
        .unwrap();

        assert_eq!(doc.text, "100");
        assert!(!doc.fields.contains_key("creator_id"));
    }

    #[test]
    fn test_everything_filtered_is_empty() {
        let store = MemoryStore::default().table("orders", &["amount"]);
        let result = compose(
            &store,
            "orders",
            json!({"id": "o1", "amount": "", "created_at": "now", "other": "x"}),
        );
        assert!(result.is_empty());
    }

    #[test]
    fn test_blank_values_compose_to_empty() {
        let store = MemoryStore::default().table("orders", &["note", "memo"]);
        let result = compose(&store, "orders", json!({"note": "   ", "memo": "\u{0}\t"}));
        assert!(result.is_empty());
    }

    #[test]
    fn test_undeclared_table_is_empty() {
        let store = MemoryStore::default();
        assert!(compose(&store, "orders", json!({"amount": "100"})).is_empty());
    }

    #[test]
    fn test_standalone_keeps_undeclared_columns() {
        let store = MemoryStore::default();
        let doc = DocumentComposer::new(&store, &store)
            .compose_standalone("orders", &fields(json!({"amount": "100", "id": "e1"})))
            .unwrap()
            .into_document()
            .unwrap();
        assert_eq!(doc.text, "100");
    }

    #[test]
    fn test_relation_by_id() {
        let store = MemoryStore::default()
            .table("orders", &["customer_id", "amount"])
            .table("customers", &["name"])
            .relation("orders", "customers", "customer_id", "id")
            .document("customers", "c1", json!({"name": "Ada Lovelace"}));

        let doc = compose(
            &store,
            "orders",
            json!({"customer_id": "c1", "amount": "100"}),
        )
        .into_document()
        .unwrap();

        assert_eq!(doc.text, "100 c1 Ada Lovelace");
        assert_eq!(doc.stats.resolved_relations, 1);
        // Related text does not leak into the stored field map.
        assert!(!doc.fields.contains_key("name"));
    }

    #[test]
    fn test_relation_by_mapping_field_most_recent_wins() {
        let store = MemoryStore::default()
            .table("orders", &["sku"])
            .table("products", &["sku", "title"])
            .relation("orders", "products", "sku", "sku")
            .document("products", "p1", json!({"sku": "A-1", "title": "old"}))
            .document("products", "p2", json!({"sku": "A-1", "title": "new"}));

        let doc = compose(&store, "orders", json!({"sku": "A-1"}))
            .into_document()
            .unwrap();
        assert_eq!(doc.text, "A-1 A-1 new");
    }

    #[test]
    fn test_depth_bound_stops_at_five_hops() {
        let mut store = MemoryStore::default().table("t0", &["next", "label"]);
        for hop in 1..=6 {
            let table = format!("t{}", hop);
            store = store
                .table(&table, &["code", "next", "label"])
                .relation(&format!("t{}", hop - 1), &table, "next", "code")
                .document(
                    &table,
                    &format!("r{}", hop),
                    json!({
                        "code": format!("c{}", hop),
                        "next": format!("c{}", hop + 1),
                        "label": format!("hop{}", hop),
                    }),
                );
        }

        let doc = compose(&store, "t0", json!({"next": "c1", "label": "hop0"}))
            .into_document()
            .unwrap();

        for hop in 0..=5 {
            assert!(doc.text.contains(&format!("hop{}", hop)), "missing hop{}", hop);
        }
        assert!(!doc.text.contains("hop6"));
        assert_eq!(doc.stats.levels, 5);
        assert_eq!(doc.stats.resolved_relations, 5);
    }

    #[test]
    fn test_cycle_expands_each_table_once() {
        let store = MemoryStore::default()
            .table("a", &["b_ref", "name"])
            .table("b", &["code", "a_ref", "name"])
            .relation("a", "b", "b_ref", "code")
            .relation("b", "a", "a_ref", "id")
            .document("b", "b1", json!({"code": "B", "a_ref": "a2", "name": "bee"}))
            .document("a", "a2", json!({"b_ref": "B", "name": "other-a"}));

        let doc = compose(&store, "a", json!({"b_ref": "B", "name": "first-a"}))
            .into_document()
            .unwrap();

        assert!(doc.text.contains("bee"));
        assert!(doc.text.contains("other-a"));
        // a -> b, then b -> a; `a` is already visited so the walk ends.
        assert_eq!(store.relation_calls.get(), 2);
        assert_eq!(doc.stats.levels, 2);
    }

    #[test]
    fn test_self_reference_resolves_one_hop() {
        let store = MemoryStore::default()
            .table("employees", &["name", "manager_id", "title"])
            .relation("employees", "employees", "manager_id", "id")
            .document("employees", "e2", json!({"manager_id": "e3", "title": "dev"}))
            .document("employees", "e3", json!({"manager_id": "ceo", "title": "vp"}))
            .document("employees", "ceo", json!({"title": "chief"}));

        let doc = compose(
            &store,
            "employees",
            json!({"name": "ann", "manager_id": "e2", "title": "intern"}),
        )
        .into_document()
        .unwrap();

        assert_eq!(doc.text, "e2 ann intern e3 dev");
        assert!(!doc.text.contains("vp"));
        assert!(!doc.text.contains("chief"));
        assert_eq!(store.relation_calls.get(), 1);
        assert_eq!(doc.stats.resolved_relations, 1);
    }

    #[test]
    fn test_undecodable_related_document_is_skipped() {
        let store = MemoryStore::default()
            .table("orders", &["customer_id", "amount"])
            .table("customers", &["name"])
            .relation("orders", "customers", "customer_id", "id")
            .raw_document("customers", "c1", "{not json");

        let doc = compose(
            &store,
            "orders",
            json!({"customer_id": "c1", "amount": "100"}),
        )
        .into_document()
        .unwrap();

        assert_eq!(doc.text, "100 c1");
        assert_eq!(doc.stats.skipped_relations, 1);
        assert_eq!(doc.stats.resolved_relations, 0);
    }

    #[test]
    fn test_lookup_failures_are_skipped() {
        let mut store = MemoryStore::default()
            .table("orders", &["customer_id"])
            .table("customers", &["name"])
            .relation("orders", "customers", "customer_id", "id");
        store.fail_lookups = true;

        let result = compose(&store, "orders", json!({"customer_id": "c1"}));
        assert_eq!(result.stats().skipped_relations, 1);
        assert!(!result.is_empty());
    }

    #[test]
    fn test_missing_related_document_is_skipped() {
        let store = MemoryStore::default()
            .table("orders", &["customer_id"])
            .table("customers", &["name"])
            .relation("orders", "customers", "customer_id", "id");

        let result = compose(&store, "orders", json!({"customer_id": "ghost"}));
        assert_eq!(result.stats().skipped_relations, 1);
    }

    #[test]
    fn test_catalog_failure_propagates() {
        let mut store = MemoryStore::default().table("orders", &["amount"]);
        store.fail_catalog = true;

        let result = DocumentComposer::new(&store, &store)
            .compose("orders", &fields(json!({"amount": "100"})));
        assert!(matches!(
            result,
            Err(SearchError::ConnectionUnavailable { .. })
        ));
    }

    #[test]
    fn test_composition_is_deterministic() {
        let store = MemoryStore::default()
            .table("orders", &["customer_id", "amount", "status"])
            .table("customers", &["name", "city"])
            .relation("orders", "customers", "customer_id", "id")
            .document("customers", "c1", json!({"city": "London", "name": "Ada"}));
        let raw = json!({"status": "open", "customer_id": "c1", "amount": "100"});

        let first = compose(&store, "orders", raw.clone());
        let second = compose(&store, "orders", raw);
        assert_eq!(first, second);
    }
}
