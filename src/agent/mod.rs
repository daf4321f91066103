//! Conversation orchestration: the per-turn state machine that alternates
//! between the language model and routed tool calls.

pub mod context;
pub mod loop_;
pub mod system_prompt;

pub use loop_::{LoopLimit, Orchestrator, TurnError};
