//! Schema-description files: CSVs that explain a table's columns
//! (column name, explanation, datatype), maintained outside the warehouse.

use crate::warehouse::{Row, WarehouseError};
use serde_json::Value;
use std::path::Path;
use tracing::debug;

/// Names of the `.csv` files in `dir`, sorted.
pub fn list_files(dir: &Path) -> Result<Vec<String>, WarehouseError> {
    if !dir.exists() {
        debug!("Schema directory does not exist: {:?}", dir);
        return Ok(Vec::new());
    }

    let mut files = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        let is_csv = path
            .extension()
            .map(|e| e.eq_ignore_ascii_case("csv"))
            .unwrap_or(false);
        if path.is_file() && is_csv {
            if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
                files.push(name.to_string());
            }
        }
    }
    files.sort();
    Ok(files)
}

/// Rows of one description file, keyed by its header.
///
/// `file` must be a bare file name inside `dir`; `.csv` is appended when
/// missing.
pub fn read_file(dir: &Path, file: &str) -> Result<Vec<Row>, WarehouseError> {
    let bare = Path::new(file)
        .file_name()
        .and_then(|n| n.to_str())
        .filter(|n| *n == file && !n.starts_with('.'))
        .ok_or_else(|| WarehouseError::Invalid(format!("not a plain file name: {file}")))?;

    let name = if bare.to_ascii_lowercase().ends_with(".csv") {
        bare.to_string()
    } else {
        format!("{bare}.csv")
    };

    let path = dir.join(&name);
    if !path.is_file() {
        return Err(WarehouseError::Invalid(format!("no schema file named {name}")));
    }

    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .trim(csv::Trim::All)
        .from_path(&path)?;

    let headers: Vec<String> = reader
        .headers()?
        .iter()
        .map(|h| h.trim_start_matches('\u{feff}').to_string())
        .collect();

    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record?;
        let mut row = Row::new();
        for (idx, header) in headers.iter().enumerate() {
            let cell = record.get(idx).unwrap_or_default();
            row.insert(header.clone(), Value::String(cell.to_string()));
        }
        rows.push(row);
    }

    debug!("Read {} rows from {}", rows.len(), path.display());
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn fixture() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("stock_quotes.csv"),
            "\u{feff}column,explanation,datatype\nAskPrice1,best ask,numeric\nRefPrice,reference price\n",
        )
        .unwrap();
        std::fs::write(dir.path().join("notes.txt"), "ignored").unwrap();
        dir
    }

    #[test]
    fn lists_only_csv_files() {
        let dir = fixture();
        assert_eq!(list_files(dir.path()).unwrap(), vec!["stock_quotes.csv"]);
        assert!(list_files(&dir.path().join("missing")).unwrap().is_empty());
    }

    #[test]
    fn reads_rows_keyed_by_header() {
        let dir = fixture();
        let rows = read_file(dir.path(), "stock_quotes").unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0]["column"], json!("AskPrice1"));
        assert_eq!(rows[0]["datatype"], json!("numeric"));
        assert_eq!(rows[1]["datatype"], json!(""));
    }

    #[test]
    fn rejects_paths_outside_the_directory() {
        let dir = fixture();
        assert!(read_file(dir.path(), "../etc/passwd").is_err());
        assert!(read_file(dir.path(), "sub/stock_quotes.csv").is_err());
        assert!(read_file(dir.path(), "absent.csv").is_err());
    }
}
