//! Conversation history maintenance between turns.

use crate::types::Message;
use tracing::debug;

/// Drop the oldest turns until at most `max` non-system messages remain.
///
/// Cuts only land on a user message, so a tool call is never separated from
/// its result. Leading system messages are always kept. If even the latest
/// turn is longer than `max`, that turn is kept whole.
pub fn trim_history(history: &mut Vec<Message>, max: usize) {
    let start = history
        .iter()
        .take_while(|m| matches!(m, Message::System { .. }))
        .count();
    let len = history.len();
    if len - start <= max {
        return;
    }

    let cut = (start..len)
        .find(|&i| history[i].is_user() && len - i <= max)
        .or_else(|| (start..len).rev().find(|&i| history[i].is_user()));

    if let Some(cut) = cut {
        debug!("Trimming {} messages from history", cut - start);
        history.drain(start..cut);
    }
}

/// Whether every tool call is immediately followed by its result.
pub fn is_well_formed(history: &[Message]) -> bool {
    let mut iter = history.iter().peekable();
    while let Some(m) = iter.next() {
        match m {
            Message::ToolCall { call } => match iter.next() {
                Some(Message::ToolResult { call_id, name, .. })
                    if *call_id == call.id && *name == call.name => {}
                _ => return false,
            },
            Message::ToolResult { .. } => return false,
            _ => {}
        }
    }
    true
}
