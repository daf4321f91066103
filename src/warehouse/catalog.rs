//! Catalog lookups: table listing and column metadata.
//!
//! `public` is accepted as an alias for SQLite's `main` schema so prompts
//! written for PostgreSQL keep working.

use crate::warehouse::{QueryExecutor, WarehouseError};
use serde_json::Value;

const LIST_TABLES: &str = "SELECT name AS table_name
     FROM pragma_table_list
     WHERE schema = ?1
       AND type IN ('table', 'view')
       AND name NOT LIKE 'sqlite_%'
     ORDER BY name";

const DESCRIBE_TABLE: &str = "SELECT name AS column_name,
            type AS data_type,
            CASE WHEN \"notnull\" = 1 THEN 'NO' ELSE 'YES' END AS is_nullable
     FROM pragma_table_info(?1, ?2)
     ORDER BY cid";

fn schema_name(schema: &str) -> &str {
    match schema {
        "" | "public" => "main",
        other => other,
    }
}

/// Table names in the given schema, sorted.
pub fn list_tables(db: &dyn QueryExecutor, schema: &str) -> Result<Vec<String>, WarehouseError> {
    let rows = db.query(LIST_TABLES, &[schema_name(schema)])?;
    Ok(rows
        .into_iter()
        .filter_map(|mut r| match r.remove("table_name") {
            Some(Value::String(s)) => Some(s),
            _ => None,
        })
        .collect())
}

/// Column metadata (`column_name`, `data_type`, `is_nullable`) in ordinal order.
pub fn describe_table(
    db: &dyn QueryExecutor,
    table: &str,
    schema: &str,
) -> Result<Vec<crate::warehouse::Row>, WarehouseError> {
    db.query(DESCRIBE_TABLE, &[table, schema_name(schema)])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::warehouse::SqliteWarehouse;
    use serde_json::json;

    fn seeded() -> SqliteWarehouse {
        let db = SqliteWarehouse::open_memory().unwrap();
        db.execute_batch(
            "CREATE TABLE stock_quotes (stock_id TEXT NOT NULL, \"AskPrice1\" REAL);
             CREATE TABLE companies (stock_id TEXT);
             CREATE VIEW v_quotes AS SELECT * FROM stock_quotes;",
        )
        .unwrap();
        db
    }

    #[test]
    fn lists_tables_and_views_for_public_alias() {
        let db = seeded();
        let tables = list_tables(&db, "public").unwrap();
        assert_eq!(tables, vec!["companies", "stock_quotes", "v_quotes"]);
        assert!(list_tables(&db, "nope").unwrap().is_empty());
    }

    #[test]
    fn describes_columns_in_order() {
        let db = seeded();
        let cols = describe_table(&db, "stock_quotes", "public").unwrap();
        assert_eq!(cols.len(), 2);
        assert_eq!(cols[0]["column_name"], json!("stock_id"));
        assert_eq!(cols[0]["is_nullable"], json!("NO"));
        assert_eq!(cols[1]["column_name"], json!("AskPrice1"));
        assert_eq!(cols[1]["data_type"], json!("REAL"));
    }
}
