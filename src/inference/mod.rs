//! Chat-completions client for OpenAI and Azure OpenAI.
//!
//! Supports tool use in the OpenAI function-calling format, including the
//! older single `function_call` response field.

use crate::config::{ModelConfig, ModelProvider};
use crate::tools::ToolDescriptor;
use crate::types::{Message, ModelAction, TokenUsage, ToolCall};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

const OPENAI_DEFAULT_BASE: &str = "https://api.openai.com";

/// First Azure API version that accepts `tools` / `tool_calls`.
const AZURE_TOOLS_SINCE: &str = "2023-12-01";

/// How tool use is expressed on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WireFormat {
    /// `tools`, `tool_calls`, and `role: "tool"` results.
    Tools,
    /// `functions`, `function_call`, and `role: "function"` results.
    Functions,
}

#[derive(Debug, Error)]
pub enum InferenceError {
    #[error("model endpoint is not configured (set AOAI_URL / AOAI_KEY or [model] in the config)")]
    NotConfigured,

    #[error("inference request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("inference failed ({status}): {body}")]
    Status { status: u16, body: String },

    #[error("model returned no choices")]
    Empty,
}

/// The conversational model as seen by the orchestrator.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    /// Given the conversation and the advertised tools, decide what to do next.
    async fn next_action(
        &self,
        messages: &[Message],
        tools: &[ToolDescriptor],
    ) -> Result<ModelAction, InferenceError>;
}

// -- OpenAI-compatible request/response types --------------------------------

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    model: Option<&'a str>,
    messages: Vec<MessagePayload>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<ToolPayload<'a>>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    functions: Option<Vec<FunctionPayload<'a>>>,
    max_tokens: u32,
    temperature: f64,
}

#[derive(Debug, Serialize)]
struct MessagePayload {
    role: &'static str,
    content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_calls: Option<Vec<ToolCallPayload>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    function_call: Option<FunctionCallPayload>,
}

#[derive(Debug, Serialize)]
struct ToolPayload<'a> {
    r#type: &'a str,
    function: FunctionPayload<'a>,
}

#[derive(Debug, Serialize)]
struct FunctionPayload<'a> {
    name: &'a str,
    description: &'a str,
    parameters: &'a serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ToolCallPayload {
    #[serde(default)]
    id: String,
    #[serde(default = "function_type")]
    r#type: String,
    function: FunctionCallPayload,
}

fn function_type() -> String {
    "function".into()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct FunctionCallPayload {
    name: String,
    #[serde(default)]
    arguments: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
    usage: Option<UsagePayload>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    content: Option<String>,
    #[serde(default)]
    tool_calls: Vec<ToolCallPayload>,
    function_call: Option<FunctionCallPayload>,
}

#[derive(Debug, Deserialize)]
struct UsagePayload {
    prompt_tokens: u32,
    completion_tokens: u32,
    total_tokens: u32,
}

/// A parsed completion.
#[derive(Debug, Clone)]
pub struct Completion {
    pub action: ModelAction,
    pub usage: TokenUsage,
}

/// Inference client for one configured deployment.
#[derive(Debug, Clone)]
pub struct InferenceClient {
    config: ModelConfig,
    http: reqwest::Client,
}

impl InferenceClient {
    pub fn new(config: &ModelConfig) -> Self {
        Self {
            config: config.clone(),
            http: reqwest::Client::new(),
        }
    }

    fn url(&self) -> Result<String, InferenceError> {
        let endpoint = self.config.endpoint.trim().trim_end_matches('/');
        match self.config.provider {
            ModelProvider::Azure => {
                if endpoint.is_empty() {
                    return Err(InferenceError::NotConfigured);
                }
                Ok(format!(
                    "{}/openai/deployments/{}/chat/completions?api-version={}",
                    endpoint, self.config.deployment, self.config.api_version
                ))
            }
            ModelProvider::Openai => {
                let base = if endpoint.is_empty() {
                    OPENAI_DEFAULT_BASE
                } else {
                    endpoint
                };
                Ok(format!("{}/v1/chat/completions", base.trim_end_matches("/v1")))
            }
        }
    }

    fn wire_format(&self) -> WireFormat {
        match self.config.provider {
            ModelProvider::Azure if self.config.api_version.as_str() < AZURE_TOOLS_SINCE => {
                WireFormat::Functions
            }
            _ => WireFormat::Tools,
        }
    }

    fn request<'a>(&'a self, messages: &[Message], tools: &'a [ToolDescriptor]) -> ChatRequest<'a> {
        let model = match self.config.provider {
            ModelProvider::Azure => None,
            ModelProvider::Openai => Some(self.config.deployment.as_str()),
        };
        let format = self.wire_format();
        let (tools, functions) = match format {
            WireFormat::Tools => (tool_payloads(tools), None),
            WireFormat::Functions => (None, function_payloads(tools)),
        };
        ChatRequest {
            model,
            messages: to_payloads(messages, format),
            tools,
            functions,
            max_tokens: self.config.max_tokens,
            temperature: self.config.temperature,
        }
    }

    /// Run one completion with tool support.
    pub async fn chat(
        &self,
        messages: &[Message],
        tools: &[ToolDescriptor],
    ) -> Result<Completion, InferenceError> {
        if self.config.api_key.trim().is_empty() {
            return Err(InferenceError::NotConfigured);
        }
        let url = self.url()?;

        let request = self.request(messages, tools);

        debug!(
            "Inference request: {} messages, {} tools, deployment {}",
            messages.len(),
            tools.len(),
            self.config.deployment
        );

        let builder = self.http.post(&url).json(&request);
        let builder = match self.config.provider {
            ModelProvider::Azure => builder.header("api-key", &self.config.api_key),
            ModelProvider::Openai => builder.bearer_auth(&self.config.api_key),
        };

        let resp = builder.send().await?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(InferenceError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let body: ChatResponse = resp.json().await?;
        let completion = parse_response(body)?;
        debug!(
            "Inference usage: {} prompt + {} completion = {} tokens",
            completion.usage.prompt_tokens,
            completion.usage.completion_tokens,
            completion.usage.total_tokens
        );
        Ok(completion)
    }
}

#[async_trait]
impl LanguageModel for InferenceClient {
    async fn next_action(
        &self,
        messages: &[Message],
        tools: &[ToolDescriptor],
    ) -> Result<ModelAction, InferenceError> {
        Ok(self.chat(messages, tools).await?.action)
    }
}

fn to_payloads(messages: &[Message], format: WireFormat) -> Vec<MessagePayload> {
    messages
        .iter()
        .map(|m| match m {
            Message::System { content } => text_payload("system", content),
            Message::User { content } => text_payload("user", content),
            Message::Assistant { content } => text_payload("assistant", content),
            Message::ToolCall { call } => {
                let function = FunctionCallPayload {
                    name: call.name.clone(),
                    arguments: call.arguments.clone(),
                };
                match format {
                    WireFormat::Tools => MessagePayload {
                        tool_calls: Some(vec![ToolCallPayload {
                            id: call.id.clone(),
                            r#type: function_type(),
                            function,
                        }]),
                        ..empty_payload("assistant")
                    },
                    WireFormat::Functions => MessagePayload {
                        function_call: Some(function),
                        ..empty_payload("assistant")
                    },
                }
            }
            Message::ToolResult {
                call_id,
                name,
                payload,
            } => match format {
                WireFormat::Tools => MessagePayload {
                    content: Some(payload.to_string()),
                    tool_call_id: Some(call_id.clone()),
                    ..empty_payload("tool")
                },
                WireFormat::Functions => MessagePayload {
                    content: Some(payload.to_string()),
                    name: Some(name.clone()),
                    ..empty_payload("function")
                },
            },
        })
        .collect()
}

fn empty_payload(role: &'static str) -> MessagePayload {
    MessagePayload {
        role,
        content: None,
        name: None,
        tool_calls: None,
        tool_call_id: None,
        function_call: None,
    }
}

fn text_payload(role: &'static str, content: &str) -> MessagePayload {
    MessagePayload {
        content: Some(content.to_string()),
        ..empty_payload(role)
    }
}

fn tool_payloads(tools: &[ToolDescriptor]) -> Option<Vec<ToolPayload<'_>>> {
    if tools.is_empty() {
        return None;
    }
    Some(
        tools
            .iter()
            .map(|t| ToolPayload {
                r#type: "function",
                function: FunctionPayload {
                    name: &t.name,
                    description: &t.description,
                    parameters: &t.parameters,
                },
            })
            .collect(),
    )
}

fn function_payloads(tools: &[ToolDescriptor]) -> Option<Vec<FunctionPayload<'_>>> {
    if tools.is_empty() {
        return None;
    }
    Some(
        tools
            .iter()
            .map(|t| FunctionPayload {
                name: &t.name,
                description: &t.description,
                parameters: &t.parameters,
            })
            .collect(),
    )
}

fn new_call_id() -> String {
    format!("call_{}", ulid::Ulid::new())
}

fn parse_response(body: ChatResponse) -> Result<Completion, InferenceError> {
    let usage = body
        .usage
        .map(|u| TokenUsage {
            prompt_tokens: u.prompt_tokens,
            completion_tokens: u.completion_tokens,
            total_tokens: u.total_tokens,
        })
        .unwrap_or_default();

    let choice = body.choices.into_iter().next().ok_or(InferenceError::Empty)?;
    let message = choice.message;

    let mut calls: Vec<ToolCall> = message
        .tool_calls
        .into_iter()
        .map(|tc| ToolCall {
            id: if tc.id.is_empty() { new_call_id() } else { tc.id },
            name: tc.function.name,
            arguments: tc.function.arguments,
        })
        .collect();

    if calls.is_empty() {
        if let Some(f) = message.function_call {
            calls.push(ToolCall {
                id: new_call_id(),
                name: f.name,
                arguments: f.arguments,
            });
        }
    }

    let action = if calls.is_empty() {
        ModelAction::Answer(message.content.unwrap_or_default())
    } else {
        ModelAction::CallTools(calls)
    };
    Ok(Completion { action, usage })
}
