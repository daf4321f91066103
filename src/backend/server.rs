//! Server side of a backend channel: hosts a [`ToolSet`] over any duplex
//! byte stream (stdin/stdout in production).

use crate::backend::ToolSet;
use crate::protocol::{
    self, CallToolParams, CallToolResult, RpcRequest, RpcResponse, INVALID_PARAMS,
    INVALID_REQUEST, METHOD_INITIALIZE, METHOD_INITIALIZED, METHOD_NOT_FOUND, METHOD_TOOLS_CALL,
    METHOD_TOOLS_LIST, PARSE_ERROR, SERVER_NOT_INITIALIZED,
};
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tracing::{debug, info, warn};

/// Serve requests until the reader reaches end of input.
///
/// Only protocol frames are written to `writer`; diagnostics go to the log.
pub async fn serve<R, W>(reader: R, mut writer: W, tools: Arc<dyn ToolSet>) -> std::io::Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut lines = BufReader::new(reader).lines();
    let mut host = Host {
        tools,
        initialized: false,
    };

    info!("Serving {} tools", host.tools.kind());
    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }

        let response = match serde_json::from_str::<RpcRequest>(&line) {
            Ok(request) => host.handle(request).await,
            Err(e) => {
                warn!("Unparseable request: {}", e);
                Some(RpcResponse::failure(None, PARSE_ERROR, format!("Parse error: {e}")))
            }
        };

        if let Some(response) = response {
            let frame = protocol::encode_line(&response)
                .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
            writer.write_all(frame.as_bytes()).await?;
            writer.flush().await?;
        }
    }

    debug!("Input closed, backend exiting");
    Ok(())
}

struct Host {
    tools: Arc<dyn ToolSet>,
    initialized: bool,
}

impl Host {
    /// Answer one message; notifications get no response.
    async fn handle(&mut self, request: RpcRequest) -> Option<RpcResponse> {
        if request.jsonrpc != protocol::JSONRPC_VERSION {
            return Some(RpcResponse::failure(
                request.id,
                INVALID_REQUEST,
                "Unsupported jsonrpc version",
            ));
        }

        let Some(id) = request.id else {
            if request.method != METHOD_INITIALIZED {
                debug!("Ignoring notification {}", request.method);
            }
            return None;
        };
        let id = Some(id);

        let response = match request.method.as_str() {
            METHOD_INITIALIZE => {
                self.initialized = true;
                let name = format!("{}-{}", env!("CARGO_PKG_NAME"), self.tools.kind());
                RpcResponse::success(
                    id,
                    protocol::initialize_result(&name, env!("CARGO_PKG_VERSION")),
                )
            }
            METHOD_TOOLS_LIST | METHOD_TOOLS_CALL if !self.initialized => RpcResponse::failure(
                id,
                SERVER_NOT_INITIALIZED,
                "Session not initialized",
            ),
            METHOD_TOOLS_LIST => RpcResponse::success(id, self.list()),
            METHOD_TOOLS_CALL => match serde_json::from_value::<CallToolParams>(
                request.params.unwrap_or(Value::Null),
            ) {
                Ok(params) => self.call(id, params).await,
                Err(e) => RpcResponse::failure(id, INVALID_PARAMS, format!("Invalid params: {e}")),
            },
            other => RpcResponse::failure(id, METHOD_NOT_FOUND, format!("Method not found: {other}")),
        };
        Some(response)
    }

    fn list(&self) -> Value {
        let tools: Vec<Value> = self
            .tools
            .descriptors()
            .into_iter()
            .map(|d| {
                json!({
                    "name": d.name,
                    "description": d.description,
                    "inputSchema": d.parameters,
                })
            })
            .collect();
        json!({ "tools": tools })
    }

    async fn call(&self, id: Option<u64>, params: CallToolParams) -> RpcResponse {
        if !self.tools.tool_names().contains(&params.name.as_str()) {
            return RpcResponse::failure(id, INVALID_PARAMS, format!("Unknown tool: {}", params.name));
        }

        info!("tools/call {} {}", params.name, params.arguments);
        let tools = Arc::clone(&self.tools);
        let CallToolParams { name, arguments } = params;
        let output = tokio::task::spawn_blocking(move || tools.call(&name, &arguments)).await;

        let result = match output {
            Ok(out) => {
                debug!("Tool result: {} bytes", out.payload.to_string().len());
                CallToolResult::new(out.payload, out.is_error)
            }
            Err(e) => {
                warn!("Tool task failed: {}", e);
                CallToolResult::new(json!({ "error": format!("tool failed: {e}") }), true)
            }
        };

        match serde_json::to_value(result) {
            Ok(v) => RpcResponse::success(id, v),
            Err(e) => RpcResponse::failure(id, protocol::INVALID_REQUEST, e.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::toolsets::CalcTools;
    use tokio::io::{duplex, AsyncBufReadExt, AsyncWriteExt, BufReader};

    /// Drive the host with raw frames and collect one response line per frame
    /// that expects an answer.
    async fn exchange(frames: &[&str], answers: usize) -> Vec<Value> {
        let (client, server) = duplex(64 * 1024);
        let (server_rx, server_tx) = tokio::io::split(server);
        tokio::spawn(serve(server_rx, server_tx, Arc::new(CalcTools)));

        let (rx, mut tx) = tokio::io::split(client);
        for frame in frames {
            tx.write_all(frame.as_bytes()).await.unwrap();
            tx.write_all(b"\n").await.unwrap();
        }
        tx.flush().await.unwrap();

        let mut lines = BufReader::new(rx).lines();
        let mut out = Vec::new();
        for _ in 0..answers {
            let line = lines.next_line().await.unwrap().unwrap();
            out.push(serde_json::from_str(&line).unwrap());
        }
        out
    }

    #[tokio::test]
    async fn refuses_calls_before_initialize() {
        let out = exchange(
            &[r#"{"jsonrpc":"2.0","id":1,"method":"tools/call","params":{"name":"add","arguments":{"a":1,"b":2}}}"#],
            1,
        )
        .await;
        assert_eq!(out[0]["id"], 1);
        assert_eq!(out[0]["error"]["code"], SERVER_NOT_INITIALIZED);
    }

    #[tokio::test]
    async fn notifications_get_no_answer() {
        let out = exchange(
            &[
                r#"{"jsonrpc":"2.0","id":1,"method":"initialize","params":{}}"#,
                r#"{"jsonrpc":"2.0","method":"notifications/initialized"}"#,
                r#"{"jsonrpc":"2.0","id":2,"method":"tools/call","params":{"name":"add","arguments":{"a":1,"b":2}}}"#,
            ],
            2,
        )
        .await;
        assert_eq!(out[0]["result"]["serverInfo"]["name"], "warehouse-agent-calc");
        assert_eq!(out[1]["id"], 2);
        assert_eq!(out[1]["result"]["structuredContent"], json!({"result": 3}));
        assert_eq!(out[1]["result"]["isError"], false);
    }

    #[tokio::test]
    async fn bad_frames_and_methods() {
        let out = exchange(
            &[
                "not json",
                r#"{"jsonrpc":"2.0","id":7,"method":"resources/list"}"#,
                r#"{"jsonrpc":"2.0","id":8,"method":"initialize"}"#,
                r#"{"jsonrpc":"2.0","id":9,"method":"tools/call","params":{"arguments":{}}}"#,
            ],
            4,
        )
        .await;
        assert_eq!(out[0]["error"]["code"], PARSE_ERROR);
        assert_eq!(out[1]["error"]["code"], METHOD_NOT_FOUND);
        assert!(out[2]["result"].is_object());
        assert_eq!(out[3]["error"]["code"], INVALID_PARAMS);
    }

    #[tokio::test]
    async fn tool_errors_are_flagged_results() {
        let out = exchange(
            &[
                r#"{"jsonrpc":"2.0","id":1,"method":"initialize"}"#,
                r#"{"jsonrpc":"2.0","id":2,"method":"tools/call","params":{"name":"add","arguments":{"a":"x"}}}"#,
            ],
            2,
        )
        .await;
        assert_eq!(out[1]["result"]["isError"], true);
        assert!(out[1]["result"]["structuredContent"]["error"].is_string());
    }
}
