pub mod schema;

pub use schema::{
    AppConfig, BackendConfig, BackendKind, CategoryConfig, EntityConfig, ModelConfig,
    ModelProvider, OrchestratorConfig, WarehouseConfig,
};

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Config file name inside the home directory.
pub const CONFIG_FILE: &str = "warehouse-agent.toml";

/// Default home directory (~/.warehouse-agent).
pub fn default_home_dir() -> PathBuf {
    directories::BaseDirs::new()
        .map(|d| d.home_dir().join(".warehouse-agent"))
        .unwrap_or_else(|| PathBuf::from(".warehouse-agent"))
}

/// Load config from the given path, or return defaults, then apply
/// environment overrides.
pub fn load_config(path: &Path) -> Result<AppConfig> {
    let mut config = if path.exists() {
        let contents = std::fs::read_to_string(path).context("Failed to read config file")?;
        toml::from_str(&contents).context("Failed to parse config (TOML)")?
    } else {
        debug!("No config at {}, using defaults", path.display());
        AppConfig::default()
    };
    apply_env_overrides(&mut config, |key| std::env::var(key).ok());
    Ok(config)
}

/// Save config to the given path (TOML format).
pub fn save_config(config: &AppConfig, path: &Path) -> Result<()> {
    let contents = toml::to_string_pretty(config).context("Failed to serialize config")?;
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, contents).context("Failed to write config file")?;
    Ok(())
}

/// Overlay model credentials from the environment (`.env` included, once
/// loaded). Non-empty variables win over the file.
pub fn apply_env_overrides(config: &mut AppConfig, var: impl Fn(&str) -> Option<String>) {
    let get = |key: &str| var(key).filter(|v| !v.trim().is_empty());
    let model = &mut config.model;

    match model.provider {
        ModelProvider::Azure => {
            if let Some(v) = get("AOAI_KEY") {
                model.api_key = v;
            }
            if let Some(v) = get("AOAI_URL") {
                model.endpoint = v;
            }
            if let Some(v) = get("AOAI_DEPLOYMENT") {
                model.deployment = v;
            }
            if let Some(v) = get("OPENAI_API_VERSION") {
                model.api_version = v;
            }
        }
        ModelProvider::Openai => {
            if let Some(v) = get("OPENAI_API_KEY") {
                model.api_key = v;
            }
            if let Some(v) = get("OPENAI_BASE_URL") {
                model.endpoint = v;
            }
        }
    }
}
