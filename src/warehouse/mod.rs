//! Warehouse access for backend processes: the query-execution seam,
//! catalog lookups, schema-description files, and CSV bulk import.

pub mod catalog;
pub mod database;
pub mod import;
pub mod schema_csv;

pub use database::SqliteWarehouse;

use thiserror::Error;

/// One result row, column name to JSON value, in column order.
pub type Row = serde_json::Map<String, serde_json::Value>;

#[derive(Debug, Error)]
pub enum WarehouseError {
    #[error("database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("connection lock poisoned")]
    Poisoned,

    #[error("{0}")]
    Invalid(String),
}

/// Anything that can run a SQL statement with positional text parameters.
///
/// Connection pooling, if any, lives behind this trait.
pub trait QueryExecutor: Send + Sync {
    fn query(&self, sql: &str, params: &[&str]) -> Result<Vec<Row>, WarehouseError>;
}

/// Quote an identifier taken from configuration for interpolation into SQL.
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identifiers_are_quoted_and_escaped() {
        assert_eq!(quote_ident("stock_alias"), "\"stock_alias\"");
        assert_eq!(quote_ident("we\"ird"), "\"we\"\"ird\"");
    }
}
