//! Tool sets hosted by `serve --backend <kind>`.
//!
//! Handlers are synchronous (the executor is blocking); the host runs them on
//! the blocking pool. Every failure comes back as a structured payload with
//! `is_error` set, never as a transport error.

use crate::config::{AppConfig, BackendKind};
use crate::guard::{dialect, QueryGuard};
use crate::resolver::{CategoryResolver, EntityResolver};
use crate::tools::{tool_definitions, ToolDescriptor};
use crate::warehouse::{catalog, schema_csv, QueryExecutor, SqliteWarehouse};
use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Number, Value};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{error, warn};

/// Outcome of one tool call.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolOutput {
    pub payload: Value,
    pub is_error: bool,
}

impl ToolOutput {
    pub fn ok(payload: Value) -> Self {
        Self {
            payload,
            is_error: false,
        }
    }

    pub fn error(message: impl std::fmt::Display) -> Self {
        Self {
            payload: json!({ "error": message.to_string() }),
            is_error: true,
        }
    }

    /// Error payload echoing the statement it concerns.
    pub fn sql_error(message: impl std::fmt::Display, sql: &str) -> Self {
        Self {
            payload: json!({ "error": message.to_string(), "sql": sql }),
            is_error: true,
        }
    }
}

/// A named group of tools served by one backend process.
pub trait ToolSet: Send + Sync {
    fn kind(&self) -> BackendKind;

    fn call(&self, name: &str, args: &Value) -> ToolOutput;

    fn tool_names(&self) -> &'static [&'static str] {
        self.kind().tool_names()
    }

    /// Descriptors of the hosted tools, as reported by `tools/list`.
    fn descriptors(&self) -> Vec<ToolDescriptor> {
        let names = self.tool_names();
        tool_definitions()
            .into_iter()
            .filter(|d| names.contains(&d.name.as_str()))
            .collect()
    }
}

/// Open the resources a backend kind needs and build its tool set.
pub fn build_toolset(kind: BackendKind, config: &AppConfig) -> Result<Arc<dyn ToolSet>> {
    let open_db = || -> Result<Arc<dyn QueryExecutor>> {
        let path = config.resolved_db_path();
        let db = SqliteWarehouse::open_read_only(Path::new(&path))
            .with_context(|| format!("Failed to open warehouse at {path}"))?;
        Ok(Arc::new(db))
    };

    let toolset: Arc<dyn ToolSet> = match kind {
        BackendKind::Warehouse => Arc::new(WarehouseTools::new(open_db()?, config)),
        BackendKind::Mssql => Arc::new(MssqlTools {
            sql: SqlRunner {
                db: open_db()?,
                guard: QueryGuard::new(&dialect::RESTRICTIVE),
                default_limit: config.warehouse.default_limit,
                truncate: false,
            },
        }),
        BackendKind::Calc => Arc::new(CalcTools),
    };
    Ok(toolset)
}

fn parse_args<T: DeserializeOwned>(name: &str, args: &Value) -> Result<T, ToolOutput> {
    let args = if args.is_null() { json!({}) } else { args.clone() };
    serde_json::from_value(args)
        .map_err(|e| ToolOutput::error(format!("invalid arguments for {name}: {e}")))
}

fn rows_payload<T: serde::Serialize>(rows: T) -> ToolOutput {
    match serde_json::to_value(rows) {
        Ok(v) => ToolOutput::ok(v),
        Err(e) => ToolOutput::error(e),
    }
}

// ---------------------------------------------------------------------------
// Guarded SQL execution
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct QuerySqlArgs {
    sql: String,
    limit: Option<i64>,
}

struct SqlRunner {
    db: Arc<dyn QueryExecutor>,
    guard: QueryGuard,
    default_limit: i64,
    truncate: bool,
}

impl SqlRunner {
    fn run(&self, args: QuerySqlArgs) -> ToolOutput {
        let limit = args.limit.unwrap_or(self.default_limit);
        let sql = match self.guard.guard(&args.sql, limit) {
            Ok(sql) => sql,
            Err(e) => {
                warn!("Rejected statement: {}", e);
                return ToolOutput::sql_error(e, &args.sql);
            }
        };

        match self.db.query(&sql, &[]) {
            Ok(mut rows) => {
                if self.truncate && limit > 0 {
                    rows.truncate(usize::try_from(limit).unwrap_or(usize::MAX));
                }
                rows_payload(rows)
            }
            Err(e) => {
                error!("SQL failed: {}\n{}", e, sql);
                ToolOutput::sql_error(e, &sql)
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Warehouse (generic dialect, catalog, schema files, resolvers)
// ---------------------------------------------------------------------------

fn default_schema() -> String {
    "public".into()
}

#[derive(Debug, Deserialize)]
struct ListTablesArgs {
    #[serde(default = "default_schema")]
    schema: String,
}

#[derive(Debug, Deserialize)]
struct DescribeTableArgs {
    table: String,
    #[serde(default = "default_schema")]
    schema: String,
}

#[derive(Debug, Deserialize)]
struct ReadSchemaArgs {
    file: Option<String>,
}

#[derive(Debug, Deserialize)]
struct KeywordArgs {
    keyword: String,
}

#[derive(Debug, Deserialize)]
struct IdArgs {
    id: String,
}

#[derive(Debug, Deserialize)]
struct CategoryArgs {
    category_id: String,
}

pub struct WarehouseTools {
    sql: SqlRunner,
    entities: EntityResolver,
    categories: CategoryResolver,
    schema_dir: PathBuf,
}

impl WarehouseTools {
    pub fn new(db: Arc<dyn QueryExecutor>, config: &AppConfig) -> Self {
        Self {
            sql: SqlRunner {
                db,
                guard: QueryGuard::new(&dialect::GENERIC),
                default_limit: config.warehouse.default_limit,
                truncate: true,
            },
            entities: EntityResolver::from_config(&config.entity),
            categories: CategoryResolver::from_config(&config.category),
            schema_dir: PathBuf::from(config.resolved_schema_dir()),
        }
    }

    fn db(&self) -> &dyn QueryExecutor {
        self.sql.db.as_ref()
    }

    fn dispatch(&self, name: &str, args: &Value) -> Result<ToolOutput, ToolOutput> {
        let out = match name {
            "list_tables" => {
                let a: ListTablesArgs = parse_args(name, args)?;
                rows_payload(catalog::list_tables(self.db(), &a.schema).map_err(ToolOutput::error)?)
            }
            "describe_table" => {
                let a: DescribeTableArgs = parse_args(name, args)?;
                rows_payload(
                    catalog::describe_table(self.db(), &a.table, &a.schema)
                        .map_err(ToolOutput::error)?,
                )
            }
            "query_sql" => self.sql.run(parse_args(name, args)?),
            "read_schema_csv" => {
                let a: ReadSchemaArgs = parse_args(name, args)?;
                match a.file.as_deref().map(str::trim).filter(|f| !f.is_empty()) {
                    None => rows_payload(
                        schema_csv::list_files(&self.schema_dir).map_err(ToolOutput::error)?,
                    ),
                    Some(file) => rows_payload(
                        schema_csv::read_file(&self.schema_dir, file).map_err(ToolOutput::error)?,
                    ),
                }
            }
            "resolve_entity_by_name" => {
                let a: KeywordArgs = parse_args(name, args)?;
                let found = self
                    .entities
                    .resolve(self.db(), &a.keyword)
                    .map_err(ToolOutput::error)?;
                ToolOutput::ok(found.to_payload())
            }
            "resolve_name_by_entity" => {
                let a: IdArgs = parse_args(name, args)?;
                let found = self
                    .entities
                    .representative_name(self.db(), &a.id)
                    .map_err(ToolOutput::error)?;
                ToolOutput::ok(match found {
                    Some(n) => json!({ "id": a.id.trim(), "name": n }),
                    None => json!({}),
                })
            }
            "resolve_category" => {
                let a: KeywordArgs = parse_args(name, args)?;
                let found = self
                    .categories
                    .resolve(self.db(), &a.keyword)
                    .map_err(ToolOutput::error)?;
                ToolOutput::ok(found.to_payload())
            }
            "list_entities_by_category" => {
                let a: CategoryArgs = parse_args(name, args)?;
                rows_payload(
                    self.entities
                        .members_of(self.db(), &a.category_id, self.sql.default_limit)
                        .map_err(ToolOutput::error)?,
                )
            }
            other => ToolOutput::error(format!("unknown tool: {other}")),
        };
        Ok(out)
    }
}

impl ToolSet for WarehouseTools {
    fn kind(&self) -> BackendKind {
        BackendKind::Warehouse
    }

    fn call(&self, name: &str, args: &Value) -> ToolOutput {
        self.dispatch(name, args).unwrap_or_else(|failure| failure)
    }
}

// ---------------------------------------------------------------------------
// MSSQL (restrictive dialect)
// ---------------------------------------------------------------------------

pub struct MssqlTools {
    sql: SqlRunner,
}

impl ToolSet for MssqlTools {
    fn kind(&self) -> BackendKind {
        BackendKind::Mssql
    }

    fn call(&self, name: &str, args: &Value) -> ToolOutput {
        match name {
            "query_sql_mssql" => match parse_args(name, args) {
                Ok(a) => self.sql.run(a),
                Err(failure) => failure,
            },
            other => ToolOutput::error(format!("unknown tool: {other}")),
        }
    }
}

// ---------------------------------------------------------------------------
// Calculator
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct AddArgs {
    a: Number,
    b: Number,
}

/// The reference tool set: one `add` tool.
pub struct CalcTools;

impl CalcTools {
    fn add(a: &Number, b: &Number) -> Value {
        if let (Some(x), Some(y)) = (a.as_i64(), b.as_i64()) {
            if let Some(sum) = x.checked_add(y) {
                return json!(sum);
            }
        }
        let sum = a.as_f64().unwrap_or(0.0) + b.as_f64().unwrap_or(0.0);
        json!(sum)
    }
}

impl ToolSet for CalcTools {
    fn kind(&self) -> BackendKind {
        BackendKind::Calc
    }

    fn call(&self, name: &str, args: &Value) -> ToolOutput {
        match name {
            "add" => match parse_args::<AddArgs>(name, args) {
                Ok(a) => ToolOutput::ok(json!({ "result": Self::add(&a.a, &a.b) })),
                Err(failure) => failure,
            },
            other => ToolOutput::error(format!("unknown tool: {other}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::WarehouseConfig;

    fn seeded() -> Arc<dyn QueryExecutor> {
        let db = SqliteWarehouse::open_memory().unwrap();
        db.execute_batch(
            "CREATE TABLE companies (
                stock_id TEXT, ticker TEXT, short_name TEXT,
                full_name TEXT, english_name TEXT, industry_id TEXT);
             INSERT INTO companies VALUES
                ('2330', '2330', '台積電', '台灣積體電路製造', 'TSMC', '24'),
                ('2303', '2303', '聯電', '聯華電子', 'UMC', '24'),
                ('2317', '2317', '鴻海', '鴻海精密工業', 'Hon Hai', '31');
             CREATE TABLE industries (industry_id TEXT, industry_name TEXT);
             INSERT INTO industries VALUES ('24', '半導體業'), ('31', '其他電子業');
             CREATE TABLE prices (stock_id TEXT, close REAL);
             INSERT INTO prices VALUES ('2330', 1000.0), ('2330', 1010.0), ('2330', 990.0);",
        )
        .unwrap();
        Arc::new(db)
    }

    fn config() -> AppConfig {
        AppConfig {
            warehouse: WarehouseConfig {
                default_limit: 2,
                schema_dir: "/nonexistent-schema-dir".into(),
                ..WarehouseConfig::default()
            },
            ..AppConfig::default()
        }
    }

    fn warehouse() -> WarehouseTools {
        WarehouseTools::new(seeded(), &config())
    }

    #[test]
    fn query_sql_bounds_and_truncates() {
        let out = warehouse().call("query_sql", &json!({"sql": "SELECT close FROM prices"}));
        assert!(!out.is_error);
        assert_eq!(out.payload.as_array().unwrap().len(), 2);

        let out = warehouse().call(
            "query_sql",
            &json!({"sql": "SELECT close FROM prices LIMIT 3", "limit": 1}),
        );
        assert_eq!(out.payload.as_array().unwrap().len(), 1);
    }

    #[test]
    fn query_sql_refuses_writes_with_echo() {
        let out = warehouse().call("query_sql", &json!({"sql": "DELETE FROM prices"}));
        assert!(out.is_error);
        assert_eq!(out.payload["sql"], "DELETE FROM prices");
        assert!(out.payload["error"].as_str().unwrap().contains("delete"));
    }

    #[test]
    fn executor_failure_echoes_rewritten_sql() {
        let out = warehouse().call("query_sql", &json!({"sql": "SELECT * FROM missing"}));
        assert!(out.is_error);
        assert_eq!(out.payload["sql"], "SELECT * FROM missing LIMIT 2");
    }

    #[test]
    fn resolvers_answer_with_data_or_empty_object() {
        let tools = warehouse();
        let hit = tools.call("resolve_entity_by_name", &json!({"keyword": "TSMC"}));
        assert_eq!(hit.payload["id"], "2330");

        let miss = tools.call("resolve_entity_by_name", &json!({"keyword": "Nonexistent"}));
        assert!(!miss.is_error);
        assert_eq!(miss.payload, json!({}));

        let name = tools.call("resolve_name_by_entity", &json!({"id": "2303"}));
        assert_eq!(name.payload, json!({"id": "2303", "name": "聯電"}));

        let category = tools.call("resolve_category", &json!({"keyword": "半導體"}));
        assert_eq!(category.payload["id"], "24");

        let members = tools.call("list_entities_by_category", &json!({"category_id": "24"}));
        let ids: Vec<_> = members
            .payload
            .as_array()
            .unwrap()
            .iter()
            .map(|r| r["id"].as_str().unwrap().to_string())
            .collect();
        assert_eq!(ids, vec!["2303", "2330"]);
    }

    #[test]
    fn catalog_tools() {
        let tools = warehouse();
        let tables = tools.call("list_tables", &json!({}));
        let tables = tables.payload.as_array().unwrap();
        assert!(tables.contains(&json!("prices")));

        let cols = tools.call("describe_table", &json!({"table": "prices"}));
        assert_eq!(cols.payload[0]["column_name"], "stock_id");
    }

    #[test]
    fn missing_schema_dir_is_an_error_payload() {
        let out = warehouse().call("read_schema_csv", &json!({}));
        assert!(out.is_error);
        assert!(out.payload["error"].is_string());
    }

    #[test]
    fn bad_arguments_are_error_payloads() {
        let out = warehouse().call("describe_table", &json!({"schema": "public"}));
        assert!(out.is_error);
        assert!(out.payload["error"].as_str().unwrap().contains("describe_table"));
    }

    #[test]
    fn mssql_uses_restrictive_dialect() {
        let tools = MssqlTools {
            sql: SqlRunner {
                db: seeded(),
                guard: QueryGuard::new(&dialect::RESTRICTIVE),
                default_limit: 500,
                truncate: false,
            },
        };
        let out = tools.call(
            "query_sql_mssql",
            &json!({"sql": "SELECT * FROM prices LIMIT 1"}),
        );
        // LIMIT is not a recognized bound here, so TOP is injected and SQLite
        // rejects the result.
        assert!(out.is_error);
        assert_eq!(out.payload["sql"], "SELECT TOP (500) * FROM prices LIMIT 1");

        let out = tools.call("query_sql_mssql", &json!({"sql": "UPDATE prices SET close = 0"}));
        assert!(out.is_error);
        assert_eq!(out.payload["sql"], "UPDATE prices SET close = 0");
    }

    #[test]
    fn add_keeps_integers_integral() {
        assert_eq!(
            CalcTools.call("add", &json!({"a": 2, "b": 3})).payload,
            json!({"result": 5})
        );
        assert_eq!(
            CalcTools.call("add", &json!({"a": 0.5, "b": 2})).payload,
            json!({"result": 2.5})
        );
        assert!(CalcTools.call("add", &json!({"a": 1})).is_error);
    }

    #[test]
    fn descriptors_follow_kind() {
        let names: Vec<_> = CalcTools.descriptors().into_iter().map(|d| d.name).collect();
        assert_eq!(names, vec!["add"]);
        assert_eq!(warehouse().descriptors().len(), 8);
    }
}
