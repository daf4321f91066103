//! CSV bulk import into an existing warehouse table.

use crate::warehouse::{quote_ident, SqliteWarehouse, WarehouseError};
use rusqlite::params_from_iter;
use std::path::Path;
use tracing::info;

/// Load a headed CSV into `table`, one transaction for the whole file.
///
/// Header names are used as column names. With `truncate`, existing rows are
/// deleted first. Returns the number of rows inserted.
pub fn import_csv(
    db: &SqliteWarehouse,
    csv_path: &Path,
    table: &str,
    truncate: bool,
) -> Result<usize, WarehouseError> {
    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_path(csv_path)?;

    let columns: Vec<String> = reader
        .headers()?
        .iter()
        .map(|h| h.trim_start_matches('\u{feff}').to_string())
        .collect();
    if columns.is_empty() {
        return Err(WarehouseError::Invalid(format!(
            "{} has no header row",
            csv_path.display()
        )));
    }

    let insert = format!(
        "INSERT INTO {} ({}) VALUES ({})",
        quote_ident(table),
        columns.iter().map(|c| quote_ident(c)).collect::<Vec<_>>().join(", "),
        (1..=columns.len()).map(|i| format!("?{i}")).collect::<Vec<_>>().join(", "),
    );

    let count = db.with_transaction(|tx| {
        if truncate {
            tx.execute(&format!("DELETE FROM {}", quote_ident(table)), [])?;
        }
        let mut stmt = tx.prepare(&insert)?;
        let mut count = 0;
        for record in reader.records() {
            let record = record?;
            stmt.execute(params_from_iter(record.iter()))?;
            count += 1;
        }
        Ok(count)
    })?;

    info!("Imported {} rows into {}", count, table);
    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::warehouse::QueryExecutor;
    use serde_json::json;

    #[test]
    fn imports_aliases_and_truncates_on_request() {
        let dir = tempfile::tempdir().unwrap();
        let csv_path = dir.path().join("alias.csv");
        std::fs::write(&csv_path, "stock_id,alias\n2330,台積電\n2330,TSMC\n2317,鴻海\n").unwrap();

        let db = SqliteWarehouse::open_memory().unwrap();
        db.execute_batch("CREATE TABLE stock_alias (stock_id TEXT, alias TEXT);")
            .unwrap();

        assert_eq!(import_csv(&db, &csv_path, "stock_alias", false).unwrap(), 3);
        assert_eq!(import_csv(&db, &csv_path, "stock_alias", true).unwrap(), 3);

        let rows = db
            .query("SELECT count(*) AS n FROM stock_alias", &[])
            .unwrap();
        assert_eq!(rows[0]["n"], json!(3));
    }

    #[test]
    fn failed_import_rolls_back() {
        let dir = tempfile::tempdir().unwrap();
        let csv_path = dir.path().join("bad.csv");
        std::fs::write(&csv_path, "stock_id,missing_col\n2330,x\n").unwrap();

        let db = SqliteWarehouse::open_memory().unwrap();
        db.execute_batch("CREATE TABLE stock_alias (stock_id TEXT, alias TEXT);")
            .unwrap();
        assert!(import_csv(&db, &csv_path, "stock_alias", false).is_err());
    }
}
