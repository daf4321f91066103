//! Tool-providing backend processes.
//!
//! The chat process owns one [`BackendSession`] per configured backend; each
//! session spawns its process on first use and speaks the
//! [`protocol`](crate::protocol) over the child's stdin/stdout. The same
//! binary, started as `serve --backend <kind>`, is the other end: it hosts a
//! [`ToolSet`] through [`serve`].

pub mod server;
pub mod session;
pub mod toolsets;

pub use server::serve;
pub use session::{BackendSession, Connection};
pub use toolsets::{build_toolset, ToolOutput, ToolSet};

use crate::tools::ToolDescriptor;
use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

/// Transport or protocol failure on a backend channel.
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("failed to start backend `{backend}`: {source}")]
    Spawn {
        backend: String,
        #[source]
        source: std::io::Error,
    },

    #[error("I/O error on backend channel: {0}")]
    Io(#[from] std::io::Error),

    #[error("backend closed the channel")]
    Closed,

    #[error("backend did not answer `{method}` within {secs}s")]
    Timeout { method: String, secs: u64 },

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("backend rejected `{method}`: {message} (code {code})")]
    Rejected {
        method: String,
        code: i64,
        message: String,
    },
}

impl BackendError {
    /// Whether the channel is still usable after this error.
    pub fn keeps_channel(&self) -> bool {
        matches!(self, Self::Rejected { .. })
    }
}

/// One backend as seen by the router.
#[async_trait]
pub trait Backend: Send + Sync {
    fn name(&self) -> &str;

    /// Run `tool` and return its structured payload.
    async fn call(&self, tool: &str, args: &Value) -> Result<Value, BackendError>;

    /// Tools the backend reports hosting.
    async fn list_tools(&self) -> Result<Vec<ToolDescriptor>, BackendError>;

    /// Tear down any live channel.
    async fn shutdown(&self) {}
}
