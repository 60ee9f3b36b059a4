//! Token estimation utilities.
//!
//! Uses a character-based heuristic: ~4 characters per token, rounded up.
//! Counting is by `char`, so multi-byte scripts are not over-charged.

use inkwell_core::{ChatMessage, PromptMessage};

/// Per-message overhead for role name and delimiters in the wire format.
pub const MESSAGE_OVERHEAD: usize = 4;

/// Estimate the token count for a string.
pub fn estimate_tokens(text: &str) -> usize {
    text.chars().count().div_ceil(4)
}

/// Estimate tokens for a prompt message including overhead.
pub fn estimate_prompt_tokens(message: &PromptMessage) -> usize {
    MESSAGE_OVERHEAD + estimate_tokens(&message.content)
}

/// Estimate tokens for a stored chat message including overhead.
pub fn estimate_message_tokens(message: &ChatMessage) -> usize {
    MESSAGE_OVERHEAD + estimate_tokens(&message.content)
}

/// Estimate tokens for a slice of chat messages.
pub fn estimate_messages_tokens(messages: &[ChatMessage]) -> usize {
    messages.iter().map(estimate_message_tokens).sum()
}
