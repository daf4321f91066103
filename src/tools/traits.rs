//! Tool descriptor and the invocation seam the orchestrator talks to.

use crate::router::RouterError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Definition of a tool exposed to the language model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDescriptor {
    pub name: String,
    pub description: String,
    /// JSON Schema for the tool's arguments.
    pub parameters: serde_json::Value,
}

/// Something that can run a named tool with validated arguments.
#[async_trait]
pub trait ToolInvoker: Send + Sync {
    async fn invoke(
        &self,
        name: &str,
        args: &serde_json::Value,
    ) -> Result<serde_json::Value, RouterError>;
}
