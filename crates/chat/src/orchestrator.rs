//! Chat orchestrator: sequences retrieval, prompt assembly, generation,
//! citation, and summarization for one turn at a time per session.
//!
//! # Turn lifecycle
//!
//! ```text
//! idle ──user message──▶ retrieving ──results──▶ generating ──stream end──▶ citing ──▶ idle
//!                             │                       │
//!                             └──── failure ──────────┴──▶ idle (error response)
//! ```
//!
//! The user message is appended before retrieval starts and is never rolled
//! back. The assistant message and its citations are written only once the
//! stream has finished. A turn whose consumer goes away, or whose
//! [`CancelHandle`] fires, stores nothing beyond the user message.
//!
//! Appending the assistant message commits the turn. If storing its
//! citations fails afterwards, the `complete` response carries no citations
//! and `entry_count` keeps counting only what was stored. A failed session
//! write is logged; `entry_count` is recomputed from stored citations on the
//! next turn.

use std::collections::HashMap;
use std::pin::Pin;
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::task::{Context, Poll};

use chrono::Utc;
use futures::Stream;
use inkwell_config::{AppConfig, ConfigError, ConfigSnapshot};
use inkwell_core::chat::title_from_message;
use inkwell_core::error::{ChatError, StoreError};
use inkwell_core::provider::Usage;
use inkwell_core::{
    ChatMessage, ChatSession, DomainEvent, EntryStore, Error, EventBus, Provider, ProviderRequest,
    SessionStore, SimilarityIndex, TemporalFilter,
};
use tokio::sync::{mpsc, watch};
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, error, info, warn};

use crate::citation::CitationTracker;
use crate::context::token;
use crate::context::{ContextWindowManager, WindowInput};
use crate::response::ChatResponse;
use crate::retrieval::{RetrievalEngine, RetrievalQuery};
use crate::retry::RetryPolicy;
use crate::summarizer::SummarizationTrigger;

/// Responses buffered between the turn task and its consumer.
const RESPONSE_BUFFER: usize = 64;

/// Where a session's current turn is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TurnState {
    Idle,
    Retrieving,
    Generating,
    Citing,
}

impl TurnState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Retrieving => "retrieving",
            Self::Generating => "generating",
            Self::Citing => "citing",
        }
    }
}

/// One incoming user message.
#[derive(Debug, Clone, Default)]
pub struct TurnRequest {
    /// Existing session to continue. `None` or an unknown id starts a new one.
    pub session_id: Option<String>,
    pub message: String,
    /// Per-turn filter override; becomes the session's sticky filter.
    pub temporal_filter: Option<TemporalFilter>,
}

impl TurnRequest {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            ..Self::default()
        }
    }

    pub fn in_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    pub fn with_filter(mut self, filter: TemporalFilter) -> Self {
        self.temporal_filter = Some(filter);
        self
    }
}

/// Cancels the turn it was issued for.
#[derive(Debug, Clone)]
pub struct CancelHandle {
    sender: Arc<watch::Sender<bool>>,
}

impl CancelHandle {
    fn new() -> (Self, watch::Receiver<bool>) {
        let (tx, rx) = watch::channel(false);
        (
            Self {
                sender: Arc::new(tx),
            },
            rx,
        )
    }

    pub fn cancel(&self) {
        self.sender.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.sender.borrow()
    }
}

/// Responses of a streaming turn. Dropping it cancels the turn.
pub struct TurnStream {
    inner: ReceiverStream<ChatResponse>,
    cancel: CancelHandle,
}

impl TurnStream {
    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }
}

impl Stream for TurnStream {
    type Item = ChatResponse;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.inner).poll_next(cx)
    }
}

pub struct ChatOrchestrator {
    retrieval: RetrievalEngine,
    sessions: Arc<dyn SessionStore>,
    provider: Arc<dyn Provider>,
    citations: CitationTracker,
    config: RwLock<ConfigSnapshot>,
    events: Arc<EventBus>,
    locks: LockRegistry,
    states: Mutex<HashMap<String, TurnState>>,
}

impl ChatOrchestrator {
    /// `provider` serves chat, summaries, and embeddings.
    pub fn new(
        entries: Arc<dyn EntryStore>,
        index: Arc<dyn SimilarityIndex>,
        sessions: Arc<dyn SessionStore>,
        provider: Arc<dyn Provider>,
        config: ConfigSnapshot,
    ) -> Self {
        Self {
            retrieval: RetrievalEngine::new(entries, index, Arc::clone(&provider)),
            sessions,
            provider,
            citations: CitationTracker::new(),
            config: RwLock::new(config),
            events: Arc::new(EventBus::default()),
            locks: Mutex::new(HashMap::new()),
            states: Mutex::new(HashMap::new()),
        }
    }

    /// Publish domain events on a shared bus.
    pub fn with_event_bus(mut self, events: Arc<EventBus>) -> Self {
        self.events = events;
        self
    }

    pub fn events(&self) -> &Arc<EventBus> {
        &self.events
    }

    /// The configuration new turns will start with.
    pub fn config(&self) -> ConfigSnapshot {
        Arc::clone(&self.config.read().unwrap_or_else(PoisonError::into_inner))
    }

    /// Replace the configuration. Turns already running keep their snapshot.
    pub fn set_config(&self, config: AppConfig) -> Result<(), ConfigError> {
        config.validate()?;
        *self.config.write().unwrap_or_else(PoisonError::into_inner) = Arc::new(config);
        info!("Chat configuration updated");
        Ok(())
    }

    pub fn state(&self, session_id: &str) -> TurnState {
        self.states
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(session_id)
            .copied()
            .unwrap_or(TurnState::Idle)
    }

    /// Run a turn to completion and collect every response it produced.
    pub async fn respond(&self, request: TurnRequest) -> Vec<ChatResponse> {
        let (tx, mut rx) = mpsc::channel(RESPONSE_BUFFER);
        let (_cancel, cancel_rx) = CancelHandle::new();

        let collect = async {
            let mut responses = Vec::new();
            while let Some(response) = rx.recv().await {
                responses.push(response);
            }
            responses
        };

        let ((), responses) = tokio::join!(self.run_turn(request, tx, cancel_rx), collect);
        responses
    }

    /// Run a turn in the background, streaming its responses.
    pub fn stream(self: &Arc<Self>, request: TurnRequest) -> TurnStream {
        let (tx, rx) = mpsc::channel(RESPONSE_BUFFER);
        let (cancel, cancel_rx) = CancelHandle::new();

        let this = Arc::clone(self);
        tokio::spawn(async move {
            this.run_turn(request, tx, cancel_rx).await;
        });

        TurnStream {
            inner: ReceiverStream::new(rx),
            cancel,
        }
    }

    async fn run_turn(
        &self,
        request: TurnRequest,
        tx: mpsc::Sender<ChatResponse>,
        mut cancel: watch::Receiver<bool>,
    ) {
        let config = self.config();

        let session_id = match self.resolve_session(&request).await {
            Ok(id) => id,
            Err(e) => {
                error!(error = %e, "Failed to open chat session");
                let _ = tx
                    .send(ChatResponse::Error {
                        error: user_facing(&e),
                        session_id: None,
                    })
                    .await;
                return;
            }
        };

        let lease = self.session_lock(&session_id);
        let result = {
            let _guard = lease.lock.lock().await;
            let result = self
                .turn(&config, &session_id, &request, &tx, &mut cancel)
                .await;
            self.set_state(&session_id, TurnState::Idle);
            result
        };
        drop(lease);

        let Err(e) = result else {
            return;
        };

        match &e {
            Error::Chat(ChatError::Cancelled) => {
                info!(session_id = %session_id, "Turn cancelled, partial response discarded");
                self.events.publish(DomainEvent::TurnCancelled {
                    session_id: session_id.clone(),
                    timestamp: Utc::now(),
                });
            }
            Error::Chat(ChatError::GenerationFailed { attempts, reason }) => {
                error!(session_id = %session_id, attempts, reason = %reason, "Generation failed");
                self.events.publish(DomainEvent::GenerationFailed {
                    session_id: session_id.clone(),
                    attempts: *attempts,
                    reason: reason.clone(),
                    timestamp: Utc::now(),
                });
            }
            other => {
                error!(session_id = %session_id, error = %other, "Turn failed");
            }
        }

        // Consumer may already be gone
        let _ = tx.try_send(ChatResponse::Error {
            error: user_facing(&e),
            session_id: Some(session_id),
        });
    }

    /// Id of the session the turn belongs to, creating it when needed.
    async fn resolve_session(&self, request: &TurnRequest) -> Result<String, Error> {
        if let Some(id) = &request.session_id {
            if self.sessions.get_session(id).await?.is_some() {
                return Ok(id.clone());
            }
            debug!(session_id = %id, "Unknown session, starting a new one");
        }

        let mut session = ChatSession::new();
        session.title = Some(title_from_message(&request.message));
        self.sessions.save_session(&session).await?;
        info!(session_id = %session.id, "Chat session created");
        Ok(session.id)
    }

    async fn turn(
        &self,
        config: &AppConfig,
        session_id: &str,
        request: &TurnRequest,
        tx: &mpsc::Sender<ChatResponse>,
        cancel: &mut watch::Receiver<bool>,
    ) -> Result<(), Error> {
        let mut session = self
            .sessions
            .get_session(session_id)
            .await?
            .ok_or_else(|| StoreError::NotFound(session_id.to_string()))?;
        let history = self.sessions.messages(session_id).await?;

        // ── idle → retrieving ─────────────────────────────────────────────
        let detected = TemporalFilter::detect(&request.message);
        let filter = match request.temporal_filter {
            Some(filter) => {
                session.temporal_filter = Some(filter);
                Some(filter)
            }
            None => session.temporal_filter.or(detected),
        };

        let mut user = ChatMessage::user(session_id, request.message.as_str())
            .with_token_count(token::estimate_tokens(&request.message))
            .with_meta(
                "intent",
                if filter.is_some() {
                    "temporal_query"
                } else {
                    "general"
                },
            );
        if let Some(filter) = filter {
            user = user.with_meta("temporal_filter", filter.as_str());
        }
        self.sessions.append_message(&user).await?;
        if session.title.is_none() {
            session.title = Some(title_from_message(&request.message));
        }

        info!(
            session_id,
            message_id = %user.id,
            history = history.len(),
            filter = filter.map(|f| f.as_str()).unwrap_or("none"),
            "Turn started"
        );
        self.events.publish(DomainEvent::TurnStarted {
            session_id: session_id.to_string(),
            message_id: user.id.clone(),
            timestamp: Utc::now(),
        });

        self.set_state(session_id, TurnState::Retrieving);
        let retrieval = self
            .retrieval
            .retrieve(
                &RetrievalQuery {
                    text: &request.message,
                    limit: config.chat.retrieval_limit,
                    temporal_filter: filter,
                    now: Utc::now(),
                },
                config,
            )
            .await;
        if let Some(reason) = &retrieval.degraded {
            self.events.publish(DomainEvent::RetrievalDegraded {
                session_id: session_id.to_string(),
                reason: reason.to_string(),
                timestamp: Utc::now(),
            });
        }
        self.events.publish(DomainEvent::RetrievalCompleted {
            session_id: session_id.to_string(),
            excerpts: retrieval.excerpts.len(),
            temporal_filter: filter.map(|f| f.as_str().to_string()),
            timestamp: Utc::now(),
        });

        if is_cancelled(tx, cancel) {
            return Err(ChatError::Cancelled.into());
        }

        // ── retrieving → generating ───────────────────────────────────────
        self.set_state(session_id, TurnState::Generating);
        let system_prompt = self.system_prompt(&session, config).await;
        let covered = session.summarized_prefix(history.len());
        let assembly = ContextWindowManager::new(&config.chat).build_prompt(&WindowInput {
            system_prompt: &system_prompt,
            summary: session.context_summary.as_deref(),
            history: &history[covered..],
            excerpts: &retrieval.excerpts,
            user_message: &request.message,
        });
        let model = session
            .model_name
            .clone()
            .unwrap_or_else(|| config.llm.chat_model().to_string());
        let provider_request = ProviderRequest {
            model: model.clone(),
            messages: assembly.messages.clone(),
            temperature: config.chat.temperature,
            max_tokens: Some(config.chat.max_tokens),
            stream: true,
        };

        let policy = RetryPolicy::from_config(&config.llm);
        let started = tokio::select! {
            biased;
            _ = cancelled(tx, cancel) => return Err(ChatError::Cancelled.into()),
            started = policy.run("generate", || self.provider.stream(provider_request.clone())) => started,
        };
        let mut chunks = started.map_err(|e| ChatError::GenerationFailed {
            attempts: e.attempts,
            reason: e.last_error.to_string(),
        })?;

        let mut full_response = String::new();
        let mut usage: Option<Usage> = None;
        loop {
            let next = tokio::select! {
                biased;
                _ = cancelled(tx, cancel) => return Err(ChatError::Cancelled.into()),
                next = tokio::time::timeout(policy.timeout, chunks.recv()) => next,
            };
            let chunk = match next {
                Ok(Some(Ok(chunk))) => chunk,
                Ok(Some(Err(e))) => {
                    return Err(ChatError::GenerationFailed {
                        attempts: 1,
                        reason: e.to_string(),
                    }
                    .into());
                }
                // Channel closed without a done marker
                Ok(None) => break,
                Err(_) => {
                    return Err(ChatError::GenerationFailed {
                        attempts: 1,
                        reason: format!(
                            "model stalled for {}s mid-stream",
                            policy.timeout.as_secs_f64()
                        ),
                    }
                    .into());
                }
            };

            if let Some(text) = chunk.content.filter(|t| !t.is_empty()) {
                full_response.push_str(&text);
                if tx.send(ChatResponse::Chunk { content: text }).await.is_err() {
                    return Err(ChatError::Cancelled.into());
                }
            }
            if chunk.usage.is_some() {
                usage = chunk.usage;
            }
            if chunk.done {
                break;
            }
        }

        if full_response.trim().is_empty() {
            return Err(ChatError::GenerationFailed {
                attempts: 1,
                reason: "model returned an empty response".into(),
            }
            .into());
        }

        // ── generating → citing ───────────────────────────────────────────
        self.set_state(session_id, TurnState::Citing);
        let assistant = ChatMessage::assistant(session_id, full_response.as_str())
            .with_token_count(token::estimate_tokens(&full_response));
        let existing = self.sessions.references(session_id).await?;
        let outcome =
            self.citations
                .record(&assistant.id, &assembly.included_excerpts, &full_response, &existing);
        let assistant = assistant
            .with_meta("model", model.as_str())
            .with_meta("citation_count", outcome.references.len());

        self.sessions.append_message(&assistant).await?;

        // The reply is stored from here on; later write failures only lose
        // bookkeeping, so the turn still completes.
        let saved = self.sessions.save_references(&outcome.references).await;
        let (citations, entry_count) = match saved {
            Ok(()) => (outcome.references, outcome.entry_count),
            Err(e) => {
                warn!(
                    session_id,
                    message_id = %assistant.id,
                    error = %e,
                    "Failed to store citations"
                );
                (Vec::new(), CitationTracker::entry_count(&existing))
            }
        };
        for rejected in &outcome.rejected {
            if let ChatError::InvalidCitation { entry_id, .. } = rejected {
                self.events.publish(DomainEvent::CitationRejected {
                    session_id: session_id.to_string(),
                    message_id: assistant.id.clone(),
                    entry_id: entry_id.clone(),
                    timestamp: Utc::now(),
                });
            }
        }

        session.entry_count = entry_count;
        session.touch();
        if let Err(e) = self.sessions.save_session(&session).await {
            warn!(session_id, error = %e, "Failed to store session after reply");
        }

        info!(
            session_id,
            message_id = %assistant.id,
            model = %model,
            citations = citations.len(),
            entry_count = session.entry_count,
            "Response stored"
        );
        self.events.publish(DomainEvent::ResponseGenerated {
            session_id: session_id.to_string(),
            message_id: assistant.id.clone(),
            model,
            tokens_used: usage.map(|u| u.total_tokens),
            citations: citations.len(),
            timestamp: Utc::now(),
        });

        let _ = tx
            .send(ChatResponse::Complete {
                session_id: session_id.to_string(),
                message_id: assistant.id.clone(),
                full_response,
                citations,
            })
            .await;

        // ── citing → idle ─────────────────────────────────────────────────
        self.maybe_summarize(config, &mut session, &history).await;
        Ok(())
    }

    /// Fold windowed-out history into the rolling summary when the trigger
    /// fires. Failures leave the session as it was.
    async fn maybe_summarize(
        &self,
        config: &AppConfig,
        session: &mut ChatSession,
        history: &[ChatMessage],
    ) {
        let trigger = SummarizationTrigger::new(&config.chat);
        let Some(plan) = trigger.plan(session, history) else {
            return;
        };

        info!(
            session_id = %session.id,
            messages = plan.messages.len(),
            dropped_tokens = plan.dropped_tokens,
            "Summarizing windowed-out history"
        );

        match trigger
            .summarize(
                self.provider.as_ref(),
                &plan,
                session.context_summary.as_deref(),
                &config.llm,
            )
            .await
        {
            Ok(summary) => {
                let previous = (
                    session.context_summary.replace(summary),
                    session.summarized_message_count,
                );
                session.summarized_message_count = plan.covers_through;
                session.touch();
                if let Err(e) = self.sessions.save_session(session).await {
                    warn!(session_id = %session.id, error = %e, "Failed to store summary");
                    session.context_summary = previous.0;
                    session.summarized_message_count = previous.1;
                    self.defer_summary(&session.id, e.to_string());
                    return;
                }
                self.events.publish(DomainEvent::SummaryUpdated {
                    session_id: session.id.clone(),
                    messages_covered: plan.covers_through,
                    timestamp: Utc::now(),
                });
            }
            Err(e) => {
                warn!(session_id = %session.id, error = %e, "Summarization deferred");
                self.defer_summary(&session.id, e.to_string());
            }
        }
    }

    fn defer_summary(&self, session_id: &str, reason: String) {
        self.events.publish(DomainEvent::SummarizationDeferred {
            session_id: session_id.to_string(),
            reason,
            timestamp: Utc::now(),
        });
    }

    /// Persona prompt, then the LLM override, then the chat default.
    async fn system_prompt(&self, session: &ChatSession, config: &AppConfig) -> String {
        if let Some(persona_id) = &session.persona_id {
            match self.sessions.get_persona(persona_id).await {
                Ok(Some(persona)) if !persona.system_prompt.trim().is_empty() => {
                    return persona.system_prompt;
                }
                Ok(_) => debug!(persona_id = %persona_id, "Persona missing, using default prompt"),
                Err(e) => warn!(persona_id = %persona_id, error = %e, "Persona lookup failed"),
            }
        }

        config
            .llm
            .system_prompt
            .as_ref()
            .filter(|p| !p.trim().is_empty())
            .cloned()
            .unwrap_or_else(|| config.chat.system_prompt.clone())
    }

    fn session_lock(&self, session_id: &str) -> SessionLease<'_> {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        SessionLease {
            registry: &self.locks,
            session_id: session_id.to_string(),
            lock: Arc::clone(locks.entry(session_id.to_string()).or_default()),
        }
    }

    fn set_state(&self, session_id: &str, state: TurnState) {
        {
            let mut states = self.states.lock().unwrap_or_else(PoisonError::into_inner);
            match state {
                TurnState::Idle => states.remove(session_id),
                _ => states.insert(session_id.to_string(), state),
            };
        }
        debug!(session_id, state = state.as_str(), "Turn state changed");
        self.events.publish(DomainEvent::StateChanged {
            session_id: session_id.to_string(),
            state: state.as_str().to_string(),
            timestamp: Utc::now(),
        });
    }
}

type LockRegistry = Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>;

/// A claim on a session's turn lock. The registry entry goes away with the
/// last claim.
struct SessionLease<'a> {
    registry: &'a LockRegistry,
    session_id: String,
    lock: Arc<tokio::sync::Mutex<()>>,
}

impl Drop for SessionLease<'_> {
    fn drop(&mut self) {
        let mut locks = self.registry.lock().unwrap_or_else(PoisonError::into_inner);
        // Claims are only handed out under the registry lock, so the count
        // cannot grow while it is held.
        let last = locks
            .get(&self.session_id)
            .is_some_and(|l| Arc::ptr_eq(l, &self.lock) && Arc::strong_count(l) == 2);
        if last {
            locks.remove(&self.session_id);
        }
    }
}

/// Resolves once the consumer has gone away or the turn was cancelled.
async fn cancelled(tx: &mpsc::Sender<ChatResponse>, cancel: &mut watch::Receiver<bool>) {
    tokio::select! {
        _ = tx.closed() => {}
        _ = async {
            let handle_dropped = cancel.wait_for(|c| *c).await.is_err();
            if handle_dropped {
                std::future::pending::<()>().await;
            }
        } => {}
    }
}

fn is_cancelled(tx: &mpsc::Sender<ChatResponse>, cancel: &watch::Receiver<bool>) -> bool {
    tx.is_closed() || *cancel.borrow()
}

fn user_facing(error: &Error) -> String {
    match error {
        Error::Chat(e) => e.to_string(),
        other => other.to_string(),
    }
}
