//! SQLite-backed query executor.

use crate::warehouse::{QueryExecutor, Row, WarehouseError};
use rusqlite::types::ValueRef;
use rusqlite::{params_from_iter, Connection, OpenFlags};
use serde_json::Value;
use std::path::Path;
use std::sync::Mutex;
use tracing::{debug, info};

/// The warehouse database a backend process queries.
pub struct SqliteWarehouse {
    conn: Mutex<Connection>,
}

impl SqliteWarehouse {
    /// Open an existing database file read-only.
    pub fn open_read_only(path: &Path) -> Result<Self, WarehouseError> {
        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;
        info!("Opened warehouse {} (read-only)", path.display());
        Ok(Self::from_connection(conn))
    }

    /// Open (or create) a database file for writing. Used by bulk import.
    pub fn open_writable(path: &Path) -> Result<Self, WarehouseError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;
        Ok(Self::from_connection(conn))
    }

    /// Open an in-memory database (for testing).
    pub fn open_memory() -> Result<Self, WarehouseError> {
        Ok(Self::from_connection(Connection::open_in_memory()?))
    }

    fn from_connection(conn: Connection) -> Self {
        Self {
            conn: Mutex::new(conn),
        }
    }

    /// Run one or more statements without returning rows.
    pub fn execute_batch(&self, sql: &str) -> Result<(), WarehouseError> {
        let conn = self.lock()?;
        conn.execute_batch(sql)?;
        Ok(())
    }

    /// Run `f` inside a transaction, committing only if it succeeds.
    pub fn with_transaction<T>(
        &self,
        f: impl FnOnce(&rusqlite::Transaction<'_>) -> Result<T, WarehouseError>,
    ) -> Result<T, WarehouseError> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        let out = f(&tx)?;
        tx.commit()?;
        Ok(out)
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>, WarehouseError> {
        self.conn.lock().map_err(|_| WarehouseError::Poisoned)
    }
}

impl QueryExecutor for SqliteWarehouse {
    fn query(&self, sql: &str, params: &[&str]) -> Result<Vec<Row>, WarehouseError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(sql)?;

        let columns: Vec<String> = stmt.column_names().iter().map(|c| c.to_string()).collect();

        let mut rows = stmt.query(params_from_iter(params.iter()))?;
        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            let mut record = Row::new();
            for (idx, name) in columns.iter().enumerate() {
                record.insert(name.clone(), to_json(row.get_ref(idx)?));
            }
            out.push(record);
        }

        debug!("Query returned {} rows", out.len());
        Ok(out)
    }
}

fn to_json(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => Value::from(i),
        ValueRef::Real(f) => serde_json::Number::from_f64(f)
            .map(Value::Number)
            .unwrap_or(Value::Null),
        ValueRef::Text(t) => Value::String(String::from_utf8_lossy(t).into_owned()),
        ValueRef::Blob(b) => Value::String(hex::encode(b)),
    }
}
