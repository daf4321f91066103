//! Per-turn orchestration: Think → Act → Observe until the model answers.
//!
//! For each user message the orchestrator:
//! 1. Sends the history and advertised tools to the model
//! 2. On a text answer, records it and returns it
//! 3. On tool calls, validates and dispatches each in request order,
//!    appending a call/result pair per call
//! 4. Repeats, bounded by an iteration cap and a wall-clock deadline

use crate::agent::context;
use crate::backend::BackendError;
use crate::config::OrchestratorConfig;
use crate::inference::{InferenceError, LanguageModel};
use crate::router::RouterError;
use crate::tools::{MalformedToolCall, ToolCatalog, ToolInvoker};
use crate::types::{Message, ModelAction, OrchestratorState, ToolCall};
use serde_json::{json, Value};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Which bound a runaway turn hit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopLimit {
    Iterations(u32),
    Deadline(Duration),
}

impl fmt::Display for LoopLimit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Iterations(n) => write!(f, "limit of {n} model calls"),
            Self::Deadline(d) => write!(f, "deadline of {}s", d.as_secs()),
        }
    }
}

/// Why a turn ended without an answer.
#[derive(Debug, Error)]
pub enum TurnError {
    #[error("the model produced an invalid tool call: {0}")]
    MalformedToolCall(#[from] MalformedToolCall),

    #[error("backend `{backend}` unavailable: {source}")]
    BackendUnavailable {
        backend: String,
        #[source]
        source: BackendError,
    },

    #[error("no backend serves tool `{0}`; the route table is misconfigured")]
    UnknownTool(String),

    #[error("the turn exceeded its {limit}")]
    ToolLoopExceeded { limit: LoopLimit },

    #[error("model call failed: {0}")]
    Inference(#[from] InferenceError),

    #[error("turn cancelled")]
    Cancelled,
}

impl TurnError {
    /// Fatal errors mean the deployment is broken; everything else can be
    /// retried with another message.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::UnknownTool(_))
    }
}

/// Drives one conversation.
pub struct Orchestrator {
    model: Arc<dyn LanguageModel>,
    tools: Arc<dyn ToolInvoker>,
    catalog: ToolCatalog,
    config: OrchestratorConfig,
    history: Vec<Message>,
    state: OrchestratorState,
}

impl Orchestrator {
    pub fn new(
        model: Arc<dyn LanguageModel>,
        tools: Arc<dyn ToolInvoker>,
        catalog: ToolCatalog,
        system_prompt: impl Into<String>,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            model,
            tools,
            catalog,
            config,
            history: vec![Message::system(system_prompt)],
            state: OrchestratorState::AwaitingUser,
        }
    }

    pub fn history(&self) -> &[Message] {
        &self.history
    }

    pub fn state(&self) -> OrchestratorState {
        self.state
    }

    /// Process one user message and return the model's answer.
    ///
    /// History accumulated during a failed turn is kept, so the model sees
    /// its own earlier requests when the user asks it to try again.
    pub async fn run_turn(
        &mut self,
        input: &str,
        cancel: &CancellationToken,
    ) -> Result<String, TurnError> {
        context::trim_history(&mut self.history, self.config.max_history_messages);
        self.history.push(Message::user(input));

        let budget = Duration::from_secs(self.config.turn_timeout_secs.max(1));
        let deadline = Instant::now() + budget;

        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(TurnError::Cancelled),
            r = tokio::time::timeout_at(deadline, self.drive()) => r.unwrap_or(Err(
                TurnError::ToolLoopExceeded { limit: LoopLimit::Deadline(budget) },
            )),
        };

        if let Err(e) = &result {
            warn!("Turn ended without an answer in state {}: {}", self.state, e);
        }
        self.state = OrchestratorState::AwaitingUser;
        result
    }

    async fn drive(&mut self) -> Result<String, TurnError> {
        let max = self.config.max_tool_iterations.max(1);

        for iteration in 1..=max {
            self.state = OrchestratorState::ModelThinking;
            debug!("Model call {}/{} ({} messages)", iteration, max, self.history.len());
            let action = self
                .model
                .next_action(&self.history, self.catalog.descriptors())
                .await?;

            match action {
                ModelAction::Answer(text) => {
                    self.state = OrchestratorState::AnsweredToUser;
                    self.history.push(Message::assistant(text.clone()));
                    return Ok(text);
                }
                ModelAction::CallTools(calls) => {
                    self.state = OrchestratorState::ToolDispatch;
                    for call in calls {
                        self.dispatch(call).await?;
                    }
                }
            }
        }

        Err(TurnError::ToolLoopExceeded {
            limit: LoopLimit::Iterations(max),
        })
    }

    /// Validate and run one call. The call and its result (or error payload)
    /// are appended together, so the history is well formed even if the turn
    /// is abandoned mid-dispatch.
    async fn dispatch(&mut self, call: ToolCall) -> Result<(), TurnError> {
        let args = match self.catalog.validate(&call) {
            Ok(args) => args,
            Err(e) => {
                warn!("Malformed tool call {}: {}", call.name, e);
                self.record(call, json!({ "error": e.to_string() }));
                return Err(e.into());
            }
        };

        info!("Tool: {}({})", call.name, args);
        match self.tools.invoke(&call.name, &args).await {
            Ok(payload) => {
                debug!("Tool result: {} bytes", payload.to_string().len());
                self.record(call, payload);
                Ok(())
            }
            Err(RouterError::UnknownTool(name)) => {
                error!("Advertised tool '{}' has no route", name);
                self.record(call, json!({ "error": format!("no backend serves tool {name}") }));
                Err(TurnError::UnknownTool(name))
            }
            Err(RouterError::Backend { backend, source }) => {
                warn!("Backend '{}' failed on {}: {}", backend, call.name, source);
                self.record(call, json!({ "error": source.to_string() }));
                Err(TurnError::BackendUnavailable { backend, source })
            }
        }
    }

    fn record(&mut self, call: ToolCall, payload: Value) {
        let result = Message::tool_result(&call, payload);
        self.history.push(Message::ToolCall { call });
        self.history.push(result);
    }
}
