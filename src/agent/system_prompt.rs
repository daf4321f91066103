//! System prompt builder.
//!
//! Layers (in order):
//! 1. Ground rules (built in, or replaced by `system_prompt_path`)
//! 2. Dynamic status (row limit, entity table, routed backends)

use crate::config::AppConfig;
use anyhow::{Context, Result};
use std::collections::BTreeSet;
use std::path::Path;
use tracing::debug;

/// Built-in ground rules for the warehouse assistant.
const GROUND_RULES: &str = r#"
You are a bilingual (中文 / English) financial-data assistant.

Your mission:
• Help users explore Taiwanese stock fundamentals and prices.
• For stock data use the table "stock_quotes": "AskPrice1" is the current
  price, "RefPrice" the reference (opening) price.

**Ground rules**:
• NEVER execute INSERT / UPDATE / DELETE or any other write.
• NEVER guess a stock id: always call `resolve_entity_by_name` first. If it
  returns {}, ask the user to clarify instead of guessing.
• For industries, call `resolve_category`, then `list_entities_by_category`.
• ALWAYS call `describe_table` before `query_sql` on a table.
• If a query could return many rows, aggregate or add a LIMIT.
• Column names that contain capitals must be double-quoted, e.g. "AskPrice1".
• `query_sql_mssql` speaks T-SQL: use TOP or OFFSET/FETCH, never LIMIT.
• When outputting a stock id, call `resolve_name_by_entity` and append the
  name after the id, e.g. "2330 台積電".
• If data is unavailable, say so and suggest an alternative metric.
• If a tool returns an "error" field, explain the problem in plain words and
  correct your request.
"#;

/// Build the complete system prompt.
pub fn build_system_prompt(config: &AppConfig) -> Result<String> {
    let mut prompt = String::with_capacity(4096);

    match &config.system_prompt_path {
        Some(path) if !path.trim().is_empty() => {
            let resolved = config.resolve_path(path);
            let custom = std::fs::read_to_string(Path::new(&resolved))
                .with_context(|| format!("Failed to read system prompt {resolved}"))?;
            prompt.push_str(custom.trim());
            prompt.push('\n');
        }
        _ => prompt.push_str(GROUND_RULES),
    }

    let backends: BTreeSet<&str> = config.routes.values().map(String::as_str).collect();
    prompt.push_str("\n# Current Status\n\n");
    prompt.push_str(&format!(
        "- **Default row limit**: {}\n",
        config.warehouse.default_limit
    ));
    prompt.push_str(&format!(
        "- **Entity table**: {} (id field `{}`)\n",
        config.entity.table, config.entity.id_field
    ));
    prompt.push_str(&format!(
        "- **Backends**: {}\n",
        backends.into_iter().collect::<Vec<_>>().join(", ")
    ));

    debug!("System prompt: {} chars", prompt.len());
    Ok(prompt)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_prompt_has_rules_and_status() {
        let prompt = build_system_prompt(&AppConfig::default()).unwrap();
        assert!(prompt.contains("resolve_entity_by_name"));
        assert!(prompt.contains("**Default row limit**: 500"));
        assert!(prompt.contains("calc, mssql, warehouse"));
    }

    #[test]
    fn custom_prompt_replaces_rules() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("prompt.md");
        std::fs::write(&path, "Answer in haiku.\n").unwrap();

        let config = AppConfig {
            system_prompt_path: Some(path.display().to_string()),
            ..AppConfig::default()
        };
        let prompt = build_system_prompt(&config).unwrap();
        assert!(prompt.starts_with("Answer in haiku."));
        assert!(!prompt.contains("Ground rules"));
    }

    #[test]
    fn missing_custom_prompt_is_an_error() {
        let config = AppConfig {
            system_prompt_path: Some("/nonexistent/prompt.md".into()),
            ..AppConfig::default()
        };
        assert!(build_system_prompt(&config).is_err());
    }
}
