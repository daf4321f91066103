//! Client side of a backend channel.

use crate::backend::{Backend, BackendError};
use crate::config::BackendConfig;
use crate::protocol::{
    self, CallToolParams, CallToolResult, RpcRequest, RpcResponse, METHOD_INITIALIZE,
    METHOD_INITIALIZED, METHOD_TOOLS_CALL, METHOD_TOOLS_LIST,
};
use crate::tools::ToolDescriptor;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader, Lines};
use tokio::process::{Child, Command};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

type BoxReader = Box<dyn AsyncRead + Send + Unpin>;
type BoxWriter = Box<dyn AsyncWrite + Send + Unpin>;

const CLIENT_NAME: &str = env!("CARGO_PKG_NAME");
const CLIENT_VERSION: &str = env!("CARGO_PKG_VERSION");

// ---------------------------------------------------------------------------
// Connection: an initialized request/response channel
// ---------------------------------------------------------------------------

/// A duplex channel that has completed the initialization handshake.
pub struct Connection {
    writer: BoxWriter,
    reader: Lines<BufReader<BoxReader>>,
    next_id: u64,
    timeout: Duration,
}

#[derive(Debug, Deserialize)]
struct ToolsListResult {
    tools: Vec<ListedTool>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListedTool {
    name: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    input_schema: Value,
}

impl Connection {
    /// Wrap a reader/writer pair and run the handshake. No call is possible
    /// before this returns.
    pub async fn open(
        reader: BoxReader,
        writer: BoxWriter,
        timeout: Duration,
    ) -> Result<Self, BackendError> {
        let mut conn = Self {
            writer,
            reader: BufReader::new(reader).lines(),
            next_id: 1,
            timeout,
        };

        let info = conn
            .request(
                METHOD_INITIALIZE,
                Some(protocol::initialize_params(CLIENT_NAME, CLIENT_VERSION)),
            )
            .await?;
        debug!("Backend initialized: {}", info["serverInfo"]);

        conn.send(&RpcRequest::notification(METHOD_INITIALIZED)).await?;
        Ok(conn)
    }

    pub async fn call_tool(&mut self, name: &str, args: &Value) -> Result<CallToolResult, BackendError> {
        let params = serde_json::to_value(CallToolParams {
            name: name.to_string(),
            arguments: args.clone(),
        })
        .map_err(|e| BackendError::Protocol(e.to_string()))?;

        let result = self.request(METHOD_TOOLS_CALL, Some(params)).await?;
        serde_json::from_value(result)
            .map_err(|e| BackendError::Protocol(format!("malformed tools/call result: {e}")))
    }

    pub async fn list_tools(&mut self) -> Result<Vec<ToolDescriptor>, BackendError> {
        let result = self.request(METHOD_TOOLS_LIST, None).await?;
        let listed: ToolsListResult = serde_json::from_value(result)
            .map_err(|e| BackendError::Protocol(format!("malformed tools/list result: {e}")))?;
        Ok(listed
            .tools
            .into_iter()
            .map(|t| ToolDescriptor {
                name: t.name,
                description: t.description,
                parameters: t.input_schema,
            })
            .collect())
    }

    async fn send(&mut self, message: &RpcRequest) -> Result<(), BackendError> {
        let line =
            protocol::encode_line(message).map_err(|e| BackendError::Protocol(e.to_string()))?;
        self.writer.write_all(line.as_bytes()).await?;
        self.writer.flush().await?;
        Ok(())
    }

    /// Send one request and wait for its response. Calls never overlap on a
    /// connection, so anything else arriving meanwhile is logged and skipped.
    async fn request(&mut self, method: &str, params: Option<Value>) -> Result<Value, BackendError> {
        let id = self.next_id;
        self.next_id += 1;
        self.send(&RpcRequest::new(id, method, params)).await?;

        let timeout = self.timeout;
        let response = tokio::time::timeout(timeout, self.read_response(id))
            .await
            .map_err(|_| BackendError::Timeout {
                method: method.to_string(),
                secs: timeout.as_secs(),
            })??;

        match response.error {
            Some(err) => Err(BackendError::Rejected {
                method: method.to_string(),
                code: err.code,
                message: err.message,
            }),
            None => Ok(response.result.unwrap_or(Value::Null)),
        }
    }

    async fn read_response(&mut self, id: u64) -> Result<RpcResponse, BackendError> {
        loop {
            let Some(line) = self.reader.next_line().await? else {
                return Err(BackendError::Closed);
            };
            if line.trim().is_empty() {
                continue;
            }

            let frame: Value = serde_json::from_str(&line)
                .map_err(|e| BackendError::Protocol(format!("unparseable frame: {e}")))?;
            if frame.get("method").is_some() {
                debug!("Ignoring backend message: {}", frame["method"]);
                continue;
            }

            let response: RpcResponse = serde_json::from_value(frame)
                .map_err(|e| BackendError::Protocol(format!("malformed response: {e}")))?;
            if response.id == Some(id) {
                return Ok(response);
            }
            warn!("Discarding response for unexpected request id {:?}", response.id);
        }
    }
}

impl CallToolResult {
    /// The structured payload, falling back to the first text block.
    pub fn payload(self) -> Value {
        if !self.structured_content.is_null() {
            return self.structured_content;
        }
        self.content
            .into_iter()
            .find_map(|block| block.get("text").and_then(Value::as_str).map(str::to_string))
            .map(|text| serde_json::from_str(&text).unwrap_or(Value::String(text)))
            .unwrap_or(Value::Null)
    }
}

// ---------------------------------------------------------------------------
// BackendSession: owns one subprocess and its connection
// ---------------------------------------------------------------------------

struct Live {
    child: Child,
    conn: Connection,
}

/// A backend process, spawned on first use and reused across calls.
///
/// Calls are serialized on the session's channel; independent sessions can be
/// driven concurrently.
pub struct BackendSession {
    name: String,
    command: String,
    args: Vec<String>,
    env: BTreeMap<String, String>,
    timeout: Duration,
    live: Mutex<Option<Live>>,
}

impl BackendSession {
    /// Build a session from config. An empty `command` re-runs this binary
    /// as `serve --backend <kind>`, passing `config_path` along.
    pub fn new(name: &str, cfg: &BackendConfig, config_path: Option<PathBuf>) -> Self {
        let args = if cfg.command.is_empty() && cfg.args.is_empty() {
            let mut args = Vec::new();
            if let Some(path) = config_path {
                args.push("--config".to_string());
                args.push(path.display().to_string());
            }
            args.extend([
                "serve".to_string(),
                "--backend".to_string(),
                cfg.kind.to_string(),
            ]);
            args
        } else {
            cfg.args.clone()
        };

        Self {
            name: name.to_string(),
            command: cfg.command.clone(),
            args,
            env: cfg.env.clone(),
            timeout: Duration::from_secs(cfg.request_timeout_secs.max(1)),
            live: Mutex::new(None),
        }
    }

    async fn spawn(&self) -> Result<Live, BackendError> {
        let spawn_err = |source| BackendError::Spawn {
            backend: self.name.clone(),
            source,
        };

        let program = if self.command.is_empty() {
            std::env::current_exe().map_err(spawn_err)?
        } else {
            PathBuf::from(shellexpand::tilde(&self.command).into_owned())
        };

        info!("Starting backend '{}': {} {}", self.name, program.display(), self.args.join(" "));

        let mut command = Command::new(&program);
        command
            .args(&self.args)
            .envs(&self.env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true);
        // Own process group: a Ctrl-C at the terminal cancels the turn, not
        // the backends.
        #[cfg(unix)]
        command.process_group(0);
        let mut child = command.spawn().map_err(spawn_err)?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| BackendError::Protocol("child stdin not captured".into()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| BackendError::Protocol("child stdout not captured".into()))?;

        let conn = Connection::open(Box::new(stdout), Box::new(stdin), self.timeout).await?;
        Ok(Live { child, conn })
    }

    /// The live connection, starting the process if there is none or the
    /// previous one has exited.
    async fn ensure_live<'s>(
        &self,
        slot: &'s mut Option<Live>,
    ) -> Result<&'s mut Connection, BackendError> {
        let exited = match slot.as_mut() {
            Some(live) => matches!(live.child.try_wait(), Ok(Some(_))),
            None => false,
        };
        if exited {
            warn!("Backend '{}' exited, restarting it", self.name);
            *slot = None;
        }
        if slot.is_none() {
            *slot = Some(self.spawn().await?);
        }
        match slot {
            Some(live) => Ok(&mut live.conn),
            None => Err(BackendError::Closed),
        }
    }

    /// A transport failure tears the process down so the next call starts
    /// afresh.
    fn settle<T>(&self, slot: &mut Option<Live>, result: &Result<T, BackendError>) {
        let Err(e) = result else {
            return;
        };
        if e.keeps_channel() {
            return;
        }
        warn!("Backend '{}' failed, dropping its process: {}", self.name, e);
        if let Some(mut dead) = slot.take() {
            let _ = dead.child.start_kill();
        }
    }
}

#[async_trait]
impl Backend for BackendSession {
    fn name(&self) -> &str {
        &self.name
    }

    async fn call(&self, tool: &str, args: &Value) -> Result<Value, BackendError> {
        let mut slot = self.live.lock().await;
        let result = self.ensure_live(&mut slot).await?.call_tool(tool, args).await;
        self.settle(&mut slot, &result);

        let result = result?;
        if result.is_error {
            debug!("Backend '{}' returned an error payload for {}", self.name, tool);
        }
        Ok(result.payload())
    }

    async fn list_tools(&self) -> Result<Vec<ToolDescriptor>, BackendError> {
        let mut slot = self.live.lock().await;
        let result = self.ensure_live(&mut slot).await?.list_tools().await;
        self.settle(&mut slot, &result);
        result
    }

    async fn shutdown(&self) {
        let Some(mut live) = self.live.lock().await.take() else {
            return;
        };
        // Closing stdin lets a well-behaved server exit on its own.
        drop(live.conn);
        match tokio::time::timeout(Duration::from_secs(2), live.child.wait()).await {
            Ok(_) => debug!("Backend '{}' exited", self.name),
            Err(_) => {
                warn!("Backend '{}' did not exit, killing it", self.name);
                let _ = live.child.kill().await;
            }
        }
    }
}
