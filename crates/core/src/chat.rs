//! Chat session, message, and citation domain types.
//!
//! These are the core value objects that flow through a turn:
//! user message → retrieval → prompt → assistant message → citations.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::id;
use crate::temporal::TemporalFilter;

/// The role of a message author.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// The journal owner
    User,
    /// The AI assistant
    Assistant,
    /// System instructions. Only ever appears in assembled prompts, never in
    /// stored session history.
    System,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
            Self::System => "system",
        }
    }
}

/// A chat session with its rolling context state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatSession {
    pub id: String,

    /// Optional title (auto-generated from the first message when absent)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub last_accessed: DateTime<Utc>,

    /// Rolling summary of conversation older than the context window.
    /// Written only by the summarization trigger.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context_summary: Option<String>,

    /// How many of the oldest messages `context_summary` already covers.
    #[serde(default)]
    pub summarized_message_count: usize,

    /// Sticky temporal filter applied to retrieval.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temporal_filter: Option<TemporalFilter>,

    /// Number of distinct entries cited in this session (derived).
    #[serde(default)]
    pub entry_count: usize,

    /// Per-session model override.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub persona_id: Option<String>,
}

impl ChatSession {
    pub fn new() -> Self {
        let now = Utc::now();
        Self {
            id: id::session_id(),
            title: None,
            created_at: now,
            updated_at: now,
            last_accessed: now,
            context_summary: None,
            summarized_message_count: 0,
            temporal_filter: None,
            entry_count: 0,
            model_name: None,
            persona_id: None,
        }
    }

    /// Refresh `last_accessed` and `updated_at`.
    pub fn touch(&mut self) {
        let now = Utc::now();
        self.updated_at = now;
        self.last_accessed = now;
    }

    /// How many of the first `history_len` messages the summary stands in
    /// for. Zero when there is no summary.
    pub fn summarized_prefix(&self, history_len: usize) -> usize {
        if self.context_summary.is_some() {
            self.summarized_message_count.min(history_len)
        } else {
            0
        }
    }
}

impl Default for ChatSession {
    fn default() -> Self {
        Self::new()
    }
}

/// Derive a session title from the first user message: first non-empty
/// line, capped at 60 characters.
pub fn title_from_message(content: &str) -> String {
    const MAX_CHARS: usize = 60;
    let line = content
        .lines()
        .map(str::trim)
        .find(|l| !l.is_empty())
        .unwrap_or("New chat");
    if line.chars().count() <= MAX_CHARS {
        return line.to_string();
    }
    let truncated: String = line.chars().take(MAX_CHARS - 1).collect();
    format!("{}…", truncated.trim_end())
}

/// A single, immutable message in a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: String,

    pub session_id: String,

    pub role: Role,

    pub content: String,

    pub created_at: DateTime<Utc>,

    /// Optional metadata (detected intent, model, citation count, ...)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Map<String, serde_json::Value>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_count: Option<usize>,
}

impl ChatMessage {
    fn new(session_id: &str, role: Role, content: impl Into<String>) -> Self {
        Self {
            id: id::message_id(),
            session_id: session_id.to_string(),
            role,
            content: content.into(),
            created_at: Utc::now(),
            metadata: None,
            token_count: None,
        }
    }

    /// Create a new user message.
    pub fn user(session_id: &str, content: impl Into<String>) -> Self {
        Self::new(session_id, Role::User, content)
    }

    /// Create a new assistant message.
    pub fn assistant(session_id: &str, content: impl Into<String>) -> Self {
        Self::new(session_id, Role::Assistant, content)
    }

    pub fn with_token_count(mut self, tokens: usize) -> Self {
        self.token_count = Some(tokens);
        self
    }

    /// Attach one metadata key.
    pub fn with_meta(mut self, key: &str, value: impl Into<serde_json::Value>) -> Self {
        self.metadata
            .get_or_insert_with(serde_json::Map::new)
            .insert(key.to_string(), value.into());
        self
    }

    pub fn meta(&self, key: &str) -> Option<&serde_json::Value> {
        self.metadata.as_ref()?.get(key)
    }
}

/// A citation binding an assistant message to a journal entry (chunk).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntryReference {
    pub message_id: String,

    pub entry_id: String,

    /// Similarity between the turn's query and the cited material (0–1).
    pub similarity_score: f32,

    /// Index of the chunk within the entry, when the entry was chunked.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chunk_index: Option<usize>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entry_title: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entry_snippet: Option<String>,
}

impl EntryReference {
    /// Identity of a reference: one per (message, entry, chunk).
    pub fn key(&self) -> (&str, &str, Option<usize>) {
        (&self.message_id, &self.entry_id, self.chunk_index)
    }
}

/// A chat persona. Personas are managed elsewhere; the core only reads
/// their system prompt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Persona {
    pub id: String,
    pub name: String,
    pub description: String,
    pub system_prompt: String,
    #[serde(default = "default_icon")]
    pub icon: String,
    #[serde(default)]
    pub is_default: bool,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

fn default_icon() -> String {
    "🤖".into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_user_message() {
        let msg = ChatMessage::user("chat-1", "What did I write yesterday?");
        assert_eq!(msg.role, Role::User);
        assert_eq!(msg.session_id, "chat-1");
        assert!(msg.metadata.is_none());
    }

    #[test]
    fn metadata_accumulates() {
        let msg = ChatMessage::user("chat-1", "hi")
            .with_meta("intent", "temporal_query")
            .with_meta("temporal_filter", "yesterday");
        assert_eq!(msg.meta("intent").unwrap(), "temporal_query");
        assert_eq!(msg.metadata.as_ref().unwrap().len(), 2);
    }

    #[test]
    fn session_touch_moves_timestamps() {
        let mut session = ChatSession::new();
        let before = session.last_accessed;
        session.touch();
        assert!(session.last_accessed >= before);
        assert_eq!(session.updated_at, session.last_accessed);
    }

    #[test]
    fn summarized_prefix_needs_a_summary() {
        let mut session = ChatSession::new();
        session.summarized_message_count = 8;
        assert_eq!(session.summarized_prefix(10), 0);

        session.context_summary = Some("Earlier talk about sleep.".into());
        assert_eq!(session.summarized_prefix(10), 8);
        assert_eq!(session.summarized_prefix(5), 5);
    }

    #[test]
    fn title_truncates_long_first_line() {
        assert_eq!(title_from_message("\n  Coding progress \nmore"), "Coding progress");
        let long = "a".repeat(100);
        let title = title_from_message(&long);
        assert_eq!(title.chars().count(), 60);
        assert!(title.ends_with('…'));
        assert_eq!(title_from_message("   "), "New chat");
    }

    #[test]
    fn role_serializes_lowercase() {
        let msg = ChatMessage::assistant("chat-1", "ok");
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains(r#""role":"assistant""#));
    }

    #[test]
    fn session_defaults_deserialize() {
        let json = r#"{
            "id": "chat-20250509123456",
            "created_at": "2025-05-09T12:34:56Z",
            "updated_at": "2025-05-09T12:45:30Z",
            "last_accessed": "2025-05-09T12:45:30Z",
            "temporal_filter": "past_week",
            "entry_count": 3
        }"#;
        let session: ChatSession = serde_json::from_str(json).unwrap();
        assert_eq!(session.temporal_filter, Some(TemporalFilter::PastWeek));
        assert_eq!(session.entry_count, 3);
        assert_eq!(session.summarized_message_count, 0);
    }
}
