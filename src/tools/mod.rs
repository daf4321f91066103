pub mod traits;

pub use traits::{ToolDescriptor, ToolInvoker};

use crate::types::ToolCall;
use serde_json::{json, Value};
use std::collections::HashMap;
use thiserror::Error;

// ---------------------------------------------------------------------------
// Tool definitions advertised to the model
// ---------------------------------------------------------------------------

/// Build the full tool set advertised to the model every turn.
pub fn tool_definitions() -> Vec<ToolDescriptor> {
    vec![
        ToolDescriptor {
            name: "list_tables".into(),
            description: "Return an array of table names in the specified schema.".into(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "schema": {"type": "string", "default": "public"}
                }
            }),
        },
        ToolDescriptor {
            name: "describe_table".into(),
            description: "Get column info (name, data type, nullability) for a table.".into(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "table": {"type": "string"},
                    "schema": {"type": "string", "default": "public"}
                },
                "required": ["table"]
            }),
        },
        ToolDescriptor {
            name: "query_sql".into(),
            description: "Run a read-only SELECT / WITH / EXPLAIN query and return rows. \
                          Queries without a LIMIT are capped at `limit` rows."
                .into(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "sql": {"type": "string"},
                    "limit": {"type": "integer", "default": 500}
                },
                "required": ["sql"]
            }),
        },
        ToolDescriptor {
            name: "query_sql_mssql".into(),
            description: "Run a read-only T-SQL statement (SELECT / WITH) against the \
                          Microsoft SQL Server warehouse and return rows as JSON. \
                          LIMIT is not supported. If the query omits TOP/FETCH, the tool \
                          injects TOP (<limit>) or appends OFFSET 0 ROWS FETCH NEXT <limit> \
                          ROWS ONLY when the query is ordered."
                .into(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "sql": {"type": "string"},
                    "limit": {"type": "integer", "default": 500}
                },
                "required": ["sql"]
            }),
        },
        ToolDescriptor {
            name: "read_schema_csv".into(),
            description: "Read a schema-description file (column name, explanation, \
                          datatype). Without `file`, list the available files."
                .into(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "file": {"type": "string"}
                }
            }),
        },
        ToolDescriptor {
            name: "resolve_entity_by_name".into(),
            description: "Translate a company name, alias, or ticker to its internal ID. \
                          Returns {} when nothing matches; ask the user to clarify then."
                .into(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "keyword": {"type": "string"}
                },
                "required": ["keyword"]
            }),
        },
        ToolDescriptor {
            name: "resolve_name_by_entity".into(),
            description: "Return the common name for a given internal ID.".into(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "id": {"type": "string"}
                },
                "required": ["id"]
            }),
        },
        ToolDescriptor {
            name: "resolve_category".into(),
            description: "Translate an industry name or code to its category ID. \
                          Returns {} when nothing matches."
                .into(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "keyword": {"type": "string"}
                },
                "required": ["keyword"]
            }),
        },
        ToolDescriptor {
            name: "list_entities_by_category".into(),
            description: "List the entities (ID and name) in a resolved category.".into(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "category_id": {"type": "string"}
                },
                "required": ["category_id"]
            }),
        },
        ToolDescriptor {
            name: "add".into(),
            description: "Add two numbers and return the sum.".into(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "a": {"type": "number"},
                    "b": {"type": "number"}
                },
                "required": ["a", "b"]
            }),
        },
    ]
}

// ---------------------------------------------------------------------------
// Argument validation
// ---------------------------------------------------------------------------

/// A tool call the model produced that cannot be dispatched.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MalformedToolCall {
    #[error("tool `{name}` is not available")]
    NotAdvertised { name: String },

    #[error("arguments for `{name}` are not valid JSON: {reason}")]
    InvalidJson { name: String, reason: String },

    #[error("arguments for `{name}` must be a JSON object")]
    NotAnObject { name: String },

    #[error("arguments for `{name}` do not match its schema: {}", errors.join("; "))]
    SchemaViolation { name: String, errors: Vec<String> },
}

#[derive(Debug, Error)]
#[error("tool `{name}` has an invalid parameter schema: {reason}")]
pub struct InvalidSchema {
    pub name: String,
    pub reason: String,
}

/// The advertised tools together with compiled argument validators.
pub struct ToolCatalog {
    descriptors: Vec<ToolDescriptor>,
    validators: HashMap<String, jsonschema::Validator>,
}

impl ToolCatalog {
    pub fn new(descriptors: Vec<ToolDescriptor>) -> Result<Self, InvalidSchema> {
        let mut validators = HashMap::new();
        for d in &descriptors {
            let validator = jsonschema::validator_for(&d.parameters).map_err(|e| InvalidSchema {
                name: d.name.clone(),
                reason: e.to_string(),
            })?;
            validators.insert(d.name.clone(), validator);
        }
        Ok(Self {
            descriptors,
            validators,
        })
    }

    pub fn descriptors(&self) -> &[ToolDescriptor] {
        &self.descriptors
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.descriptors.iter().map(|d| d.name.as_str())
    }

    /// Parse and check a call's arguments. Empty argument text counts as `{}`.
    pub fn validate(&self, call: &ToolCall) -> Result<Value, MalformedToolCall> {
        let validator =
            self.validators
                .get(&call.name)
                .ok_or_else(|| MalformedToolCall::NotAdvertised {
                    name: call.name.clone(),
                })?;

        let raw = call.arguments.trim();
        let args: Value = if raw.is_empty() {
            json!({})
        } else {
            serde_json::from_str(raw).map_err(|e| MalformedToolCall::InvalidJson {
                name: call.name.clone(),
                reason: e.to_string(),
            })?
        };

        if !args.is_object() {
            return Err(MalformedToolCall::NotAnObject {
                name: call.name.clone(),
            });
        }

        let errors: Vec<String> = validator
            .iter_errors(&args)
            .map(|e| {
                let path = e.instance_path.to_string();
                if path.is_empty() {
                    e.to_string()
                } else {
                    format!("{}: {}", path, e)
                }
            })
            .collect();

        if errors.is_empty() {
            Ok(args)
        } else {
            Err(MalformedToolCall::SchemaViolation {
                name: call.name.clone(),
                errors,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn call(name: &str, arguments: &str) -> ToolCall {
        ToolCall {
            id: "call_1".into(),
            name: name.into(),
            arguments: arguments.into(),
        }
    }

    fn catalog() -> ToolCatalog {
        ToolCatalog::new(tool_definitions()).unwrap()
    }

    #[test]
    fn advertised_names_are_unique_and_complete() {
        let catalog = catalog();
        let mut names: Vec<_> = catalog.names().collect();
        names.sort();
        names.dedup();
        assert_eq!(names.len(), 10);
        assert!(names.contains(&"query_sql_mssql"));
        assert!(names.contains(&"list_entities_by_category"));
    }

    #[test]
    fn every_parameter_schema_declares_an_object() {
        for d in tool_definitions() {
            assert_eq!(d.parameters["type"], "object", "{}", d.name);
        }
    }

    #[test]
    fn accepts_valid_arguments() {
        let args = catalog()
            .validate(&call("query_sql", r#"{"sql": "select 1", "limit": 5}"#))
            .unwrap();
        assert_eq!(args["limit"], 5);

        let args = catalog().validate(&call("list_tables", "")).unwrap();
        assert_eq!(args, json!({}));
    }

    #[test]
    fn rejects_missing_required_and_wrong_types() {
        let err = catalog()
            .validate(&call("describe_table", r#"{"schema": "public"}"#))
            .unwrap_err();
        assert!(matches!(err, MalformedToolCall::SchemaViolation { .. }));
        assert!(err.to_string().contains("table"));

        let err = catalog()
            .validate(&call("add", r#"{"a": "one", "b": 2}"#))
            .unwrap_err();
        assert!(matches!(err, MalformedToolCall::SchemaViolation { .. }));
    }

    #[test]
    fn rejects_unparseable_and_unknown() {
        assert!(matches!(
            catalog().validate(&call("add", "{\"a\": 1,")),
            Err(MalformedToolCall::InvalidJson { .. })
        ));
        assert!(matches!(
            catalog().validate(&call("add", "[1, 2]")),
            Err(MalformedToolCall::NotAnObject { .. })
        ));
        assert!(matches!(
            catalog().validate(&call("drop_everything", "{}")),
            Err(MalformedToolCall::NotAdvertised { .. })
        ));
    }
}
