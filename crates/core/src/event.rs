//! Domain event system: structured observability for chat turns.
//!
//! Every turn transition and every failure (including the ones absorbed by
//! the pipeline) is published here. Subscribers can log, count, or forward
//! events without coupling to the pipeline.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;

/// Turn transitions and absorbed failures.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum DomainEvent {
    /// A user message was accepted and appended
    TurnStarted {
        session_id: String,
        message_id: String,
        timestamp: DateTime<Utc>,
    },

    /// The session's turn state machine moved
    StateChanged {
        session_id: String,
        state: String,
        timestamp: DateTime<Utc>,
    },

    /// Retrieval finished (possibly with zero excerpts)
    RetrievalCompleted {
        session_id: String,
        excerpts: usize,
        temporal_filter: Option<String>,
        timestamp: DateTime<Utc>,
    },

    /// Embedding/index unavailable; the turn continues without excerpts
    RetrievalDegraded {
        session_id: String,
        reason: String,
        timestamp: DateTime<Utc>,
    },

    /// The assistant reply was stored
    ResponseGenerated {
        session_id: String,
        message_id: String,
        model: String,
        tokens_used: Option<u32>,
        citations: usize,
        timestamp: DateTime<Utc>,
    },

    /// Generation failed after exhausting retries
    GenerationFailed {
        session_id: String,
        attempts: u32,
        reason: String,
        timestamp: DateTime<Utc>,
    },

    /// The response consumer went away mid-generation
    TurnCancelled {
        session_id: String,
        timestamp: DateTime<Utc>,
    },

    /// The model cited an entry it was not given
    CitationRejected {
        session_id: String,
        message_id: String,
        entry_id: String,
        timestamp: DateTime<Utc>,
    },

    /// The rolling summary was replaced
    SummaryUpdated {
        session_id: String,
        messages_covered: usize,
        timestamp: DateTime<Utc>,
    },

    /// Summarization failed and will be retried on the next qualifying turn
    SummarizationDeferred {
        session_id: String,
        reason: String,
        timestamp: DateTime<Utc>,
    },
}

impl DomainEvent {
    /// Short event name for logs and metrics labels.
    pub fn name(&self) -> &'static str {
        match self {
            Self::TurnStarted { .. } => "turn_started",
            Self::StateChanged { .. } => "state_changed",
            Self::RetrievalCompleted { .. } => "retrieval_completed",
            Self::RetrievalDegraded { .. } => "retrieval_degraded",
            Self::ResponseGenerated { .. } => "response_generated",
            Self::GenerationFailed { .. } => "generation_failed",
            Self::TurnCancelled { .. } => "turn_cancelled",
            Self::CitationRejected { .. } => "citation_rejected",
            Self::SummaryUpdated { .. } => "summary_updated",
            Self::SummarizationDeferred { .. } => "summarization_deferred",
        }
    }
}

/// Fan-out of [`DomainEvent`]s over `tokio::sync::broadcast`.
///
/// Slow subscribers lag and lose the oldest events; publishers never block.
pub struct EventBus {
    sender: broadcast::Sender<Arc<DomainEvent>>,
}

impl EventBus {
    /// `capacity` events are buffered per subscriber.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn publish(&self, event: DomainEvent) {
        // No subscribers is fine
        let _ = self.sender.send(Arc::new(event));
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Arc<DomainEvent>> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}
