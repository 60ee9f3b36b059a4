//! In-memory stores: useful for testing and ephemeral sessions.

use async_trait::async_trait;
use inkwell_core::error::StoreError;
use inkwell_core::search;
use inkwell_core::{
    ChatMessage, ChatSession, EntryReference, EntryStore, JournalEntry, MessageSearchResult,
    PaginatedSearchResults, Persona, SearchQuery, SessionStore, TimeRange,
};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Journal entries kept in a map keyed by entry id.
pub struct InMemoryEntryStore {
    entries: Arc<RwLock<HashMap<String, JournalEntry>>>,
}

impl InMemoryEntryStore {
    pub fn new() -> Self {
        Self {
            entries: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Insert or replace an entry. Returns its id.
    pub async fn insert(&self, entry: JournalEntry) -> String {
        let id = entry.id.clone();
        self.entries.write().await.insert(id.clone(), entry);
        id
    }

    pub async fn remove(&self, entry_id: &str) -> bool {
        self.entries.write().await.remove(entry_id).is_some()
    }

    pub async fn count(&self) -> usize {
        self.entries.read().await.len()
    }
}

impl Default for InMemoryEntryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EntryStore for InMemoryEntryStore {
    async fn get(&self, entry_id: &str) -> Result<Option<JournalEntry>, StoreError> {
        Ok(self.entries.read().await.get(entry_id).cloned())
    }

    async fn search_by_time_range(&self, range: TimeRange) -> Result<Vec<String>, StoreError> {
        let entries = self.entries.read().await;
        let mut hits: Vec<&JournalEntry> = entries
            .values()
            .filter(|e| range.contains(e.created_at))
            .collect();
        // Newest first, id as tie-break so results are stable across calls
        hits.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(hits.into_iter().map(|e| e.id.clone()).collect())
    }
}

#[derive(Default)]
struct SessionTables {
    sessions: HashMap<String, ChatSession>,
    messages: HashMap<String, Vec<ChatMessage>>,
    references: Vec<EntryReference>,
    personas: HashMap<String, Persona>,
}

/// Sessions, messages, citations, and personas held in process memory.
pub struct InMemorySessionStore {
    tables: Arc<RwLock<SessionTables>>,
}

impl InMemorySessionStore {
    pub fn new() -> Self {
        Self {
            tables: Arc::new(RwLock::new(SessionTables::default())),
        }
    }

    pub async fn add_persona(&self, persona: Persona) {
        self.tables
            .write()
            .await
            .personas
            .insert(persona.id.clone(), persona);
    }

    /// Delete a session with its messages and citations.
    pub async fn delete_session(&self, session_id: &str) -> bool {
        let mut tables = self.tables.write().await;
        let removed_ids: Vec<String> = tables
            .messages
            .remove(session_id)
            .unwrap_or_default()
            .into_iter()
            .map(|m| m.id)
            .collect();
        tables
            .references
            .retain(|r| !removed_ids.contains(&r.message_id));
        tables.sessions.remove(session_id).is_some()
    }

    /// Sessions ordered by most recent activity.
    pub async fn list_sessions(&self) -> Vec<ChatSession> {
        let tables = self.tables.read().await;
        let mut sessions: Vec<ChatSession> = tables.sessions.values().cloned().collect();
        sessions.sort_by(|a, b| b.last_accessed.cmp(&a.last_accessed));
        sessions
    }
}

impl Default for InMemorySessionStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn get_session(&self, session_id: &str) -> Result<Option<ChatSession>, StoreError> {
        Ok(self.tables.read().await.sessions.get(session_id).cloned())
    }

    async fn save_session(&self, session: &ChatSession) -> Result<(), StoreError> {
        self.tables
            .write()
            .await
            .sessions
            .insert(session.id.clone(), session.clone());
        Ok(())
    }

    async fn append_message(&self, message: &ChatMessage) -> Result<(), StoreError> {
        let mut tables = self.tables.write().await;
        if !tables.sessions.contains_key(&message.session_id) {
            return Err(StoreError::NotFound(format!(
                "session {}",
                message.session_id
            )));
        }
        tables
            .messages
            .entry(message.session_id.clone())
            .or_default()
            .push(message.clone());
        Ok(())
    }

    async fn messages(&self, session_id: &str) -> Result<Vec<ChatMessage>, StoreError> {
        let tables = self.tables.read().await;
        let mut messages = tables.messages.get(session_id).cloned().unwrap_or_default();
        // Stable sort keeps insertion order for equal timestamps
        messages.sort_by_key(|m| m.created_at);
        Ok(messages)
    }

    async fn save_references(&self, references: &[EntryReference]) -> Result<(), StoreError> {
        let mut tables = self.tables.write().await;
        for reference in references {
            let exists = tables.references.iter().any(|r| r.key() == reference.key());
            if !exists {
                tables.references.push(reference.clone());
            }
        }
        Ok(())
    }

    async fn references(&self, session_id: &str) -> Result<Vec<EntryReference>, StoreError> {
        let tables = self.tables.read().await;
        let Some(messages) = tables.messages.get(session_id) else {
            return Ok(Vec::new());
        };
        Ok(tables
            .references
            .iter()
            .filter(|r| messages.iter().any(|m| m.id == r.message_id))
            .cloned()
            .collect())
    }

    async fn search_sessions(
        &self,
        query: &str,
        limit: usize,
        offset: usize,
    ) -> Result<PaginatedSearchResults, StoreError> {
        let Some(compiled) = SearchQuery::new(query) else {
            return Ok(PaginatedSearchResults::page(Vec::new(), query, limit, offset));
        };

        let tables = self.tables.read().await;
        let mut ranked: Vec<_> = tables
            .sessions
            .values()
            .filter_map(|session| {
                let messages = tables
                    .messages
                    .get(&session.id)
                    .map(Vec::as_slice)
                    .unwrap_or_default();
                compiled.match_session(session, messages)
            })
            .collect();
        search::rank(&mut ranked);
        Ok(PaginatedSearchResults::page(
            ranked,
            compiled.as_str(),
            limit,
            offset,
        ))
    }

    async fn search_messages(
        &self,
        session_id: &str,
        query: &str,
    ) -> Result<Vec<MessageSearchResult>, StoreError> {
        let Some(compiled) = SearchQuery::new(query) else {
            return Ok(Vec::new());
        };
        let messages = self.messages(session_id).await?;
        Ok(compiled.match_messages(&messages))
    }

    async fn get_persona(&self, persona_id: &str) -> Result<Option<Persona>, StoreError> {
        Ok(self.tables.read().await.personas.get(persona_id).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use inkwell_core::TemporalFilter;

    #[tokio::test]
    async fn insert_and_get_entry() {
        let store = InMemoryEntryStore::new();
        let id = store
            .insert(JournalEntry::new("Hike", "Walked the ridge trail"))
            .await;

        let entry = store.get(&id).await.unwrap().unwrap();
        assert_eq!(entry.title, "Hike");
        assert!(store.get("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn time_range_search_filters_and_orders() {
        let store = InMemoryEntryStore::new();
        let now = Utc::now();
        let recent = store
            .insert(JournalEntry::new("Recent", "a").created(now - Duration::days(2)))
            .await;
        let newest = store
            .insert(JournalEntry::new("Newest", "b").created(now - Duration::hours(1)))
            .await;
        store
            .insert(JournalEntry::new("Old", "c").created(now - Duration::days(40)))
            .await;

        let ids = store
            .search_by_time_range(TemporalFilter::PastWeek.range(now))
            .await
            .unwrap();
        assert_eq!(ids, vec![newest, recent]);
    }

    #[tokio::test]
    async fn append_requires_session() {
        let store = InMemorySessionStore::new();
        let msg = ChatMessage::user("chat-missing", "hello");
        let err = store.append_message(&msg).await.unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
    }

    #[tokio::test]
    async fn messages_keep_insertion_order() {
        let store = InMemorySessionStore::new();
        let session = ChatSession::new();
        store.save_session(&session).await.unwrap();

        let first = ChatMessage::user(&session.id, "one");
        let mut second = ChatMessage::assistant(&session.id, "two");
        second.created_at = first.created_at;
        store.append_message(&first).await.unwrap();
        store.append_message(&second).await.unwrap();

        let messages = store.messages(&session.id).await.unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].content, "one");
        assert_eq!(messages[1].content, "two");
    }

    #[tokio::test]
    async fn references_are_deduplicated_and_scoped() {
        let store = InMemorySessionStore::new();
        let session = ChatSession::new();
        store.save_session(&session).await.unwrap();
        let msg = ChatMessage::assistant(&session.id, "See [Entry e1]");
        store.append_message(&msg).await.unwrap();

        let reference = EntryReference {
            message_id: msg.id.clone(),
            entry_id: "e1".into(),
            similarity_score: 0.9,
            chunk_index: None,
            entry_title: Some("Hike".into()),
            entry_snippet: None,
        };
        store
            .save_references(&[reference.clone(), reference.clone()])
            .await
            .unwrap();
        store.save_references(&[reference]).await.unwrap();

        assert_eq!(store.references(&session.id).await.unwrap().len(), 1);
        assert!(store.references("chat-other").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn delete_session_cascades() {
        let store = InMemorySessionStore::new();
        let session = ChatSession::new();
        store.save_session(&session).await.unwrap();
        store
            .append_message(&ChatMessage::user(&session.id, "hi"))
            .await
            .unwrap();

        assert!(store.delete_session(&session.id).await);
        assert!(store.get_session(&session.id).await.unwrap().is_none());
        assert!(store.messages(&session.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn search_sessions_ranks_and_paginates() {
        let store = InMemorySessionStore::new();

        let mut by_title = ChatSession::new();
        by_title.title = Some("Sleep routine".into());
        store.save_session(&by_title).await.unwrap();

        let mut by_summary = ChatSession::new();
        by_summary.title = Some("Evenings".into());
        by_summary.context_summary = Some("Talked about SLEEP and caffeine.".into());
        store.save_session(&by_summary).await.unwrap();

        let by_message = ChatSession::new();
        store.save_session(&by_message).await.unwrap();
        store
            .append_message(&ChatMessage::user(&by_message.id, "I could not sleep"))
            .await
            .unwrap();

        let unrelated = ChatSession::new();
        store.save_session(&unrelated).await.unwrap();
        store
            .append_message(&ChatMessage::user(&unrelated.id, "Went hiking"))
            .await
            .unwrap();

        let page = store.search_sessions("sleep", 2, 0).await.unwrap();
        assert_eq!(page.total, 3);
        assert!(page.has_next);
        assert!(!page.has_previous);
        let ids: Vec<&str> = page.results.iter().map(|r| r.session.id.as_str()).collect();
        assert_eq!(ids, vec![by_title.id.as_str(), by_summary.id.as_str()]);

        let rest = store.search_sessions("sleep", 2, 2).await.unwrap();
        assert_eq!(rest.results.len(), 1);
        assert_eq!(rest.results[0].session.id, by_message.id);
        assert_eq!(rest.results[0].match_type.as_str(), "message_content");
        assert_eq!(rest.results[0].matched_messages.len(), 1);
        assert!(rest.has_previous);

        let blank = store.search_sessions("  ", 10, 0).await.unwrap();
        assert_eq!(blank.total, 0);
    }

    #[tokio::test]
    async fn search_messages_within_session() {
        let store = InMemorySessionStore::new();
        let session = ChatSession::new();
        store.save_session(&session).await.unwrap();
        for message in [
            ChatMessage::user(&session.id, "How was the trip?"),
            ChatMessage::assistant(&session.id, "You loved Lisbon."),
        ] {
            store.append_message(&message).await.unwrap();
        }

        let hits = store.search_messages(&session.id, "lisbon").await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].highlighted_content, "You loved **Lisbon**.");
        assert_eq!(hits[0].context_before.as_deref(), Some("How was the trip?"));
        assert!(hits[0].context_after.is_none());
        assert!(store.search_messages("chat-other", "lisbon").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn persona_lookup() {
        let store = InMemorySessionStore::new();
        assert!(store.get_persona("p1").await.unwrap().is_none());

        store
            .add_persona(Persona {
                id: "p1".into(),
                name: "Coach".into(),
                description: "Encouraging".into(),
                system_prompt: "Be encouraging.".into(),
                icon: "🏃".into(),
                is_default: false,
                created_at: Utc::now(),
                updated_at: None,
            })
            .await;
        let persona = store.get_persona("p1").await.unwrap().unwrap();
        assert_eq!(persona.system_prompt, "Be encouraging.");
    }
}
