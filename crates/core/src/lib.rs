//! # Inkwell Core
//!
//! Domain types, collaborator traits, and error definitions for the Inkwell
//! journal chat core. This crate has **no I/O**; it defines the model that
//! the other crates implement against.
//!
//! Storage, embeddings, and the LLM are collaborators expressed as traits
//! here. Implementations live in their own crates, so tests can swap in
//! scripted stubs and deployments can swap backends.

pub mod chat;
pub mod error;
pub mod event;
pub mod id;
pub mod journal;
pub mod provider;
pub mod search;
pub mod store;
pub mod temporal;

// Re-export key types at crate root for ergonomics
pub use chat::{ChatMessage, ChatSession, EntryReference, Persona, Role};
pub use error::{ChatError, Error, ProviderError, Result, StoreError};
pub use event::{DomainEvent, EventBus};
pub use journal::JournalEntry;
pub use provider::{PromptMessage, Provider, ProviderRequest, ProviderResponse, StreamChunk};
pub use search::{
    ChatSearchResult, MatchType, MessageSearchResult, PaginatedSearchResults, SearchQuery,
};
pub use store::{EntryStore, ScoredId, SessionStore, SimilarityIndex};
pub use temporal::{TemporalFilter, TimeRange};
