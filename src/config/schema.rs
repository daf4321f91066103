//! Configuration schema for warehouse-agent.toml.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Root configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Log level (debug, info, warn, error).
    pub log_level: String,

    /// Optional file replacing the built-in system prompt.
    pub system_prompt_path: Option<String>,

    /// Language-model endpoint settings.
    pub model: ModelConfig,

    /// Turn limits for the orchestrator.
    pub orchestrator: OrchestratorConfig,

    /// Tool-providing backend processes, by name.
    pub backends: BTreeMap<String, BackendConfig>,

    /// Tool name -> backend name.
    pub routes: BTreeMap<String, String>,

    /// Warehouse the backend processes query.
    pub warehouse: WarehouseConfig,

    /// Entity table layout for name resolution.
    pub entity: EntityConfig,

    /// Category table layout for name resolution.
    pub category: CategoryConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        let backends = BTreeMap::from([
            ("warehouse".to_string(), BackendConfig::of_kind(BackendKind::Warehouse)),
            ("mssql".to_string(), BackendConfig::of_kind(BackendKind::Mssql)),
            ("calc".to_string(), BackendConfig::of_kind(BackendKind::Calc)),
        ]);

        let mut routes = BTreeMap::new();
        for kind in [BackendKind::Warehouse, BackendKind::Mssql, BackendKind::Calc] {
            for tool in kind.tool_names() {
                routes.insert(tool.to_string(), kind.to_string());
            }
        }

        Self {
            log_level: "warn".into(),
            system_prompt_path: None,
            model: ModelConfig::default(),
            orchestrator: OrchestratorConfig::default(),
            backends,
            routes,
            warehouse: WarehouseConfig::default(),
            entity: EntityConfig::default(),
            category: CategoryConfig::default(),
        }
    }
}

impl AppConfig {
    /// Resolve a path that may contain `~` to an absolute path.
    pub fn resolve_path(&self, path: &str) -> String {
        shellexpand::tilde(path).into_owned()
    }

    /// Resolved warehouse database path.
    pub fn resolved_db_path(&self) -> String {
        self.resolve_path(&self.warehouse.db_path)
    }

    /// Resolved schema-description directory.
    pub fn resolved_schema_dir(&self) -> String {
        self.resolve_path(&self.warehouse.schema_dir)
    }
}

// ---------------------------------------------------------------------------
// Model
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelProvider {
    /// Azure OpenAI: deployment-scoped URL, `api-key` header.
    Azure,
    /// OpenAI-compatible: `/v1/chat/completions`, bearer token.
    Openai,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    pub provider: ModelProvider,

    /// Endpoint base URL (`AOAI_URL`).
    pub endpoint: String,

    /// API key (`AOAI_KEY`).
    pub api_key: String,

    /// Deployment (Azure) or model name (OpenAI) (`AOAI_DEPLOYMENT`).
    pub deployment: String,

    /// Azure API version (`OPENAI_API_VERSION`).
    pub api_version: String,

    pub temperature: f64,

    pub max_tokens: u32,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            provider: ModelProvider::Azure,
            endpoint: String::new(),
            api_key: String::new(),
            deployment: "pgdemo-gpt4".into(),
            api_version: "2024-06-01".into(),
            temperature: 0.2,
            max_tokens: 4096,
        }
    }
}

// ---------------------------------------------------------------------------
// Orchestrator
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Maximum model calls per user turn before giving up.
    pub max_tool_iterations: u32,

    /// Wall-clock budget for one user turn.
    pub turn_timeout_secs: u64,

    /// History kept between turns (system message excluded).
    pub max_history_messages: usize,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_tool_iterations: 16,
            turn_timeout_secs: 180,
            max_history_messages: 60,
        }
    }
}

// ---------------------------------------------------------------------------
// Backends
// ---------------------------------------------------------------------------

/// Which tool set a backend process hosts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    /// Generic-dialect SQL, catalog, schema files, and resolvers.
    Warehouse,
    /// Restrictive-dialect (T-SQL) queries.
    Mssql,
    /// Reference calculator.
    Calc,
}

impl std::fmt::Display for BackendKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Warehouse => write!(f, "warehouse"),
            Self::Mssql => write!(f, "mssql"),
            Self::Calc => write!(f, "calc"),
        }
    }
}

impl BackendKind {
    /// Tools hosted by this kind of backend.
    pub fn tool_names(&self) -> &'static [&'static str] {
        match self {
            Self::Warehouse => &[
                "list_tables",
                "describe_table",
                "query_sql",
                "read_schema_csv",
                "resolve_entity_by_name",
                "resolve_name_by_entity",
                "resolve_category",
                "list_entities_by_category",
            ],
            Self::Mssql => &["query_sql_mssql"],
            Self::Calc => &["add"],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    pub kind: BackendKind,

    /// Executable to spawn. Empty means this binary.
    pub command: String,

    /// Arguments. Empty means `serve --backend <kind>`.
    pub args: Vec<String>,

    /// Budget for a single request/response exchange.
    pub request_timeout_secs: u64,

    /// Extra environment for the process.
    pub env: BTreeMap<String, String>,
}

impl BackendConfig {
    pub fn of_kind(kind: BackendKind) -> Self {
        Self {
            kind,
            command: String::new(),
            args: Vec::new(),
            request_timeout_secs: 60,
            env: BTreeMap::new(),
        }
    }
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self::of_kind(BackendKind::Warehouse)
    }
}

// ---------------------------------------------------------------------------
// Warehouse and resolver layout
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WarehouseConfig {
    /// Path to the SQLite warehouse file.
    pub db_path: String,

    /// Row bound applied when a query carries none.
    pub default_limit: i64,

    /// Directory of schema-description CSV files.
    pub schema_dir: String,
}

impl Default for WarehouseConfig {
    fn default() -> Self {
        Self {
            db_path: "~/.warehouse-agent/warehouse.db".into(),
            default_limit: 500,
            schema_dir: "~/.warehouse-agent/schema".into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EntityConfig {
    pub table: String,
    pub id_field: String,
    /// Canonical short code (ticker).
    pub code_field: String,
    /// Name fields searched by stages 2 and 3, in preference order.
    pub alias_fields: Vec<String>,
    /// Foreign key into the category table.
    pub category_field: String,
}

impl Default for EntityConfig {
    fn default() -> Self {
        Self {
            table: "companies".into(),
            id_field: "stock_id".into(),
            code_field: "ticker".into(),
            alias_fields: vec![
                "short_name".into(),
                "full_name".into(),
                "english_name".into(),
            ],
            category_field: "industry_id".into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CategoryConfig {
    pub table: String,
    pub id_field: String,
    pub code_field: String,
    pub name_field: String,
}

impl Default for CategoryConfig {
    fn default() -> Self {
        Self {
            table: "industries".into(),
            id_field: "industry_id".into(),
            code_field: "industry_id".into(),
            name_field: "industry_name".into(),
        }
    }
}
