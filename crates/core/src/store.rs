//! Collaborator traits: entry store, similarity index, session persistence.
//!
//! The chat core never owns storage. It reads entries, asks an index for
//! coarse similarity rankings, and appends messages and citations through
//! these traits. Implementations: in-memory (`inkwell-memory`), test stubs.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::chat::{ChatMessage, ChatSession, EntryReference, Persona};
use crate::error::StoreError;
use crate::journal::JournalEntry;
use crate::search::{MessageSearchResult, PaginatedSearchResults};
use crate::temporal::TimeRange;

/// Read access to journal entries.
#[async_trait]
pub trait EntryStore: Send + Sync {
    /// Fetch one entry by id.
    async fn get(&self, entry_id: &str) -> Result<Option<JournalEntry>, StoreError>;

    /// Ids of all entries whose `created_at` falls inside `range`.
    async fn search_by_time_range(&self, range: TimeRange) -> Result<Vec<String>, StoreError>;
}

/// An id with a similarity score.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredId {
    pub id: String,
    pub score: f32,
}

/// A vector similarity index over journal entries.
#[async_trait]
pub trait SimilarityIndex: Send + Sync {
    /// Rank entries by similarity to `query`, highest first.
    ///
    /// `candidates` restricts the search to the given ids; `None` searches
    /// every indexed entry.
    async fn similar(
        &self,
        query: &[f32],
        candidates: Option<&[String]>,
        top_k: usize,
    ) -> Result<Vec<ScoredId>, StoreError>;
}

/// Persistence of sessions, messages, and citations.
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn get_session(&self, session_id: &str) -> Result<Option<ChatSession>, StoreError>;

    /// Insert or replace a session record.
    async fn save_session(&self, session: &ChatSession) -> Result<(), StoreError>;

    /// Append a message. Messages are never edited.
    async fn append_message(&self, message: &ChatMessage) -> Result<(), StoreError>;

    /// All messages of a session in total order (`created_at`, then
    /// insertion order).
    async fn messages(&self, session_id: &str) -> Result<Vec<ChatMessage>, StoreError>;

    /// Persist citations. Callers pass only references not stored yet.
    async fn save_references(&self, references: &[EntryReference]) -> Result<(), StoreError>;

    /// All citations attached to messages of a session.
    async fn references(&self, session_id: &str) -> Result<Vec<EntryReference>, StoreError>;

    /// Sessions whose title, summary, or messages contain `query`, best
    /// match first. A blank query matches nothing.
    async fn search_sessions(
        &self,
        query: &str,
        limit: usize,
        offset: usize,
    ) -> Result<PaginatedSearchResults, StoreError>;

    /// Messages of one session containing `query`, in conversation order.
    async fn search_messages(
        &self,
        session_id: &str,
        query: &str,
    ) -> Result<Vec<MessageSearchResult>, StoreError>;

    /// Look up a persona. Stores without personas return `None`.
    async fn get_persona(&self, _persona_id: &str) -> Result<Option<Persona>, StoreError> {
        Ok(None)
    }
}
