//! # Inkwell Chat
//!
//! The retrieval-augmented conversation core. For each user message it
//! decides what enters the LLM prompt (recent turns, a rolling summary,
//! retrieved journal excerpts), keeps the prompt inside its token budget,
//! compresses old history into summaries, and binds every reply to the
//! entries it was grounded on.
//!
//! Components:
//! - [`RetrievalEngine`] ranks journal excerpts, honoring temporal filters
//! - [`ContextWindowManager`] assembles the bounded prompt
//! - [`SummarizationTrigger`] decides when to compress history
//! - [`CitationTracker`] records entry references per assistant message
//! - [`ChatOrchestrator`] runs the turn state machine

pub mod chunking;
pub mod citation;
pub mod context;
pub mod orchestrator;
pub mod response;
pub mod retrieval;
pub mod retry;
pub mod summarizer;

#[cfg(test)]
pub(crate) mod test_helpers;

pub use citation::{CitationOutcome, CitationTracker};
pub use context::{AssemblyMetadata, ContextWindowManager, PromptAssembly, WindowInput};
pub use orchestrator::{CancelHandle, ChatOrchestrator, TurnRequest, TurnState, TurnStream};
pub use response::ChatResponse;
pub use retrieval::{Excerpt, Retrieval, RetrievalEngine, RetrievalQuery};
pub use retry::{RetryExhausted, RetryPolicy};
pub use summarizer::{SummarizationTrigger, SummaryPlan};
