//! Shared types used across the warehouse agent.

use serde::{Deserialize, Serialize};
use std::fmt;

// ---------------------------------------------------------------------------
// Orchestrator state machine
// ---------------------------------------------------------------------------

/// States a conversation moves through while a turn is processed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum OrchestratorState {
    /// Blocked on the next user input.
    #[default]
    AwaitingUser,
    /// Waiting on the language model's next action.
    ModelThinking,
    /// Running a tool call through the router.
    ToolDispatch,
    /// A text answer is being handed back to the caller.
    AnsweredToUser,
}

impl fmt::Display for OrchestratorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AwaitingUser => write!(f, "awaiting_user"),
            Self::ModelThinking => write!(f, "model_thinking"),
            Self::ToolDispatch => write!(f, "tool_dispatch"),
            Self::AnsweredToUser => write!(f, "answered_to_user"),
        }
    }
}

// ---------------------------------------------------------------------------
// Conversation
// ---------------------------------------------------------------------------

/// A tool call request from the model.
///
/// `arguments` is kept as the raw JSON text the model produced; it is only
/// parsed once the orchestrator validates it against the tool's schema.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub arguments: String,
}

/// One entry in the conversation history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "role", rename_all = "snake_case")]
pub enum Message {
    System {
        content: String,
    },
    User {
        content: String,
    },
    Assistant {
        content: String,
    },
    ToolCall {
        call: ToolCall,
    },
    ToolResult {
        call_id: String,
        name: String,
        payload: serde_json::Value,
    },
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self::System {
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::User {
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::Assistant {
            content: content.into(),
        }
    }

    pub fn tool_result(call: &ToolCall, payload: serde_json::Value) -> Self {
        Self::ToolResult {
            call_id: call.id.clone(),
            name: call.name.clone(),
            payload,
        }
    }

    pub fn is_user(&self) -> bool {
        matches!(self, Self::User { .. })
    }
}

/// What the model wants to do next.
#[derive(Debug, Clone, PartialEq)]
pub enum ModelAction {
    /// A final natural-language answer for the user.
    Answer(String),
    /// One or more tool invocations, in request order.
    CallTools(Vec<ToolCall>),
}

/// Token usage from an inference call.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}
