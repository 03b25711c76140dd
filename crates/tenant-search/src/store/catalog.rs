//! Relation catalog backed by the tenant's `related_infos` and
//! `table_informations` tables.

use super::index_store::IndexStore;
use crate::compose::RelationCatalog;
use crate::error::{Result, SearchError};
use crate::models::{RelatedInfo, TableInformation};
use rusqlite::{params, OptionalExtension};
use tracing::{debug, warn};

impl IndexStore<'_> {
    /// Declare or replace the allow-list of a table.
    pub fn register_table(&self, info: &TableInformation) -> Result<()> {
        if info.table.is_empty() {
            return Err(SearchError::invalid_input("table", "table name is empty"));
        }
        let columns_json = serde_json::to_string(&info.columns)?;

        self.conn.execute(
            &format!(
                "INSERT INTO {}.table_informations (table_info, columns) VALUES (?1, ?2)
                 ON CONFLICT(table_info) DO UPDATE SET columns=excluded.columns",
                self.tenant.schema()
            ),
            params![info.table, columns_json],
        )?;

        debug!("Registered table {} for tenant {}", info.table, self.tenant);
        Ok(())
    }

    /// Declare a relation edge. Declaring an existing edge again is a no-op.
    pub fn register_relation(&self, relation: &RelatedInfo) -> Result<()> {
        for (field, value) in [
            ("table", &relation.table),
            ("related_table", &relation.related_table),
            ("foreign_field", &relation.foreign_field),
            ("mapping_field", &relation.mapping_field),
        ] {
            if value.is_empty() {
                return Err(SearchError::invalid_input(field, "must not be empty"));
            }
        }

        self.conn.execute(
            &format!(
                "INSERT OR IGNORE INTO {}.related_infos
                     (table_info, related_table, foreign_field, mapping_field)
                 VALUES (?1, ?2, ?3, ?4)",
                self.tenant.schema()
            ),
            params![
                relation.table,
                relation.related_table,
                relation.foreign_field,
                relation.mapping_field
            ],
        )?;

        debug!(
            "Registered relation {}.{} -> {}.{} for tenant {}",
            relation.table,
            relation.foreign_field,
            relation.related_table,
            relation.mapping_field,
            self.tenant
        );
        Ok(())
    }

    /// Remove a relation edge. Returns whether it existed.
    pub fn remove_relation(&self, relation: &RelatedInfo) -> Result<bool> {
        let rows_affected = self.conn.execute(
            &format!(
                "DELETE FROM {}.related_infos
                 WHERE table_info = ?1 AND related_table = ?2
                   AND foreign_field = ?3 AND mapping_field = ?4",
                self.tenant.schema()
            ),
            params![
                relation.table,
                relation.related_table,
                relation.foreign_field,
                relation.mapping_field
            ],
        )?;
        Ok(rows_affected > 0)
    }
}

impl RelationCatalog for IndexStore<'_> {
    fn table_information(&self, table: &str) -> Result<Option<TableInformation>> {
        let columns_json: Option<String> = self
            .conn
            .query_row(
                &format!(
                    "SELECT columns FROM {}.table_informations WHERE table_info = ?1",
                    self.tenant.schema()
                ),
                [table],
                |row| row.get(0),
            )
            .optional()?;

        let Some(columns_json) = columns_json else {
            return Ok(None);
        };

        match serde_json::from_str::<Vec<String>>(&columns_json) {
            Ok(columns) => Ok(Some(TableInformation {
                table: table.to_string(),
                columns,
            })),
            Err(e) => {
                // Treated like an undeclared table: nothing is searchable.
                warn!("Unreadable column list for table {}: {}", table, e);
                Ok(None)
            }
        }
    }

    fn relations_from(&self, tables: &[String]) -> Result<Vec<RelatedInfo>> {
        if tables.is_empty() {
            return Ok(Vec::new());
        }

        let placeholders: Vec<_> = (1..=tables.len()).map(|i| format!("?{}", i)).collect();
        let sql = format!(
            "SELECT table_info, related_table, foreign_field, mapping_field
             FROM {}.related_infos
             WHERE table_info IN ({})
             ORDER BY table_info, related_table, foreign_field, mapping_field",
            self.tenant.schema(),
            placeholders.join(",")
        );

        let mut stmt = self.conn.prepare(&sql)?;
        let params_refs: Vec<&dyn rusqlite::ToSql> =
            tables.iter().map(|t| t as &dyn rusqlite::ToSql).collect();

        let rows = stmt.query_map(params_refs.as_slice(), |row| {
            Ok(RelatedInfo {
                table: row.get(0)?,
                related_table: row.get(1)?,
                foreign_field: row.get(2)?,
                mapping_field: row.get(3)?,
            })
        })?;

        let mut relations = Vec::new();
        for row in rows {
            relations.push(row?);
        }
        Ok(relations)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::TenantSlug;
    use crate::store::schema::{attach, SchemaConfig, TenantSchema};
    use rusqlite::Connection;

    fn create_test_store() -> (Connection, TenantSlug) {
        let conn = Connection::open_in_memory().unwrap();
        let tenant = TenantSlug::parse("acme").unwrap();
        attach(&conn, &tenant, ":memory:").unwrap();
        TenantSchema::new(&tenant, &SchemaConfig::default())
            .ensure_setup(&conn)
            .unwrap();
        (conn, tenant)
    }

    #[test]
    fn test_register_and_read_table() {
        let (conn, tenant) = create_test_store();
        let store = IndexStore::new(&conn, &tenant);

        assert!(store.table_information("orders").unwrap().is_none());

        store
            .register_table(&TableInformation::new("orders", ["amount"]))
            .unwrap();
        store
            .register_table(&TableInformation::new("orders", ["amount", "status"]))
            .unwrap();

        let info = store.table_information("orders").unwrap().unwrap();
        assert_eq!(info.columns, vec!["amount", "status"]);
    }

    #[test]
    fn test_corrupt_column_list_is_undeclared() {
        let (conn, tenant) = create_test_store();
        conn.execute(
            "INSERT INTO \"acme\".table_informations VALUES ('orders', 'nope')",
            [],
        )
        .unwrap();
        let store = IndexStore::new(&conn, &tenant);
        assert!(store.table_information("orders").unwrap().is_none());
    }

    #[test]
    fn test_relations_from() {
        let (conn, tenant) = create_test_store();
        let store = IndexStore::new(&conn, &tenant);

        let order_customer = RelatedInfo::new("orders", "customers", "customer_id", "id");
        let order_product = RelatedInfo::new("orders", "products", "sku", "sku");
        let customer_region = RelatedInfo::new("customers", "regions", "region", "code");
        for relation in [&order_customer, &order_product, &customer_region] {
            store.register_relation(relation).unwrap();
        }
        // Duplicate declaration is ignored
        store.register_relation(&order_customer).unwrap();

        let from_orders = store.relations_from(&["orders".to_string()]).unwrap();
        assert_eq!(from_orders, vec![order_customer.clone(), order_product.clone()]);

        let from_both = store
            .relations_from(&["orders".to_string(), "customers".to_string()])
            .unwrap();
        assert_eq!(from_both.len(), 3);

        assert!(store.relations_from(&[]).unwrap().is_empty());

        assert!(store.remove_relation(&order_product).unwrap());
        assert!(!store.remove_relation(&order_product).unwrap());
        assert_eq!(
            store.relations_from(&["orders".to_string()]).unwrap(),
            vec![order_customer]
        );
    }

    #[test]
    fn test_register_relation_validates() {
        let (conn, tenant) = create_test_store();
        let store = IndexStore::new(&conn, &tenant);
        let result = store.register_relation(&RelatedInfo::new("orders", "", "a", "b"));
        assert!(matches!(result, Err(SearchError::InvalidInput { .. })));
    }
}
