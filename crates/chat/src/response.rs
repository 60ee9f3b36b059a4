//! The response surface of a chat turn.
//!
//! A turn yields zero or more `chunk` values followed by exactly one
//! terminal value: `complete` on success, `error` on failure.

use inkwell_core::EntryReference;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChatResponse {
    /// Incremental assistant text.
    Chunk { content: String },

    /// The assistant message was stored.
    Complete {
        session_id: String,
        message_id: String,
        full_response: String,
        citations: Vec<EntryReference>,
    },

    /// The turn failed; no assistant message was stored.
    Error {
        error: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        session_id: Option<String>,
    },
}

impl ChatResponse {
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::Chunk { .. } => "chunk",
            Self::Complete { .. } => "complete",
            Self::Error { .. } => "error",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Chunk { .. })
    }
}
