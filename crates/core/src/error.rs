//! Error types for the Inkwell domain.
//!
//! One `thiserror` enum per bounded context, folded into [`Error`] through
//! `#[from]` conversions.

use thiserror::Error;

/// The top-level error type for all Inkwell operations.
#[derive(Debug, Error)]
pub enum Error {
    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Chat error: {0}")]
    Chat(#[from] ChatError),

    #[error("Configuration error: {message}")]
    Config { message: String },
}

/// Crate-wide result.
pub type Result<T> = std::result::Result<T, Error>;

/// Failures of the LLM / embedding service.
#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    #[error("API request failed: {message} (status: {status_code})")]
    ApiError { status_code: u16, message: String },

    #[error("Model not found: {0}")]
    ModelNotFound(String),

    #[error("Stream interrupted: {0}")]
    StreamInterrupted(String),

    #[error("Provider not configured: {0}")]
    NotConfigured(String),

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Network error: {0}")]
    Network(String),
}

/// Failures of the entry, index, or session stores.
#[derive(Debug, Clone, Error)]
pub enum StoreError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Query failed: {0}")]
    QueryFailed(String),
}

/// The failure taxonomy of a chat turn.
///
/// Only [`ChatError::GenerationFailed`] is ever surfaced to the user; the
/// rest are absorbed by the pipeline and reported as domain events.
#[derive(Debug, Clone, Error)]
pub enum ChatError {
    /// Embedding or similarity service unavailable. Retrieval degrades to an
    /// empty context.
    #[error("Retrieval unavailable: {0}")]
    RetrievalUnavailable(String),

    /// The LLM call failed after exhausting retries.
    #[error("Generation failed after {attempts} attempt(s): {reason}")]
    GenerationFailed { attempts: u32, reason: String },

    /// A summarization pass failed; deferred to the next qualifying turn.
    #[error("Summarization failed: {0}")]
    SummarizationFailed(String),

    /// A citation that was not part of the turn's retrieved set.
    #[error("Invalid citation: entry {entry_id} was not retrieved for message {message_id}")]
    InvalidCitation { message_id: String, entry_id: String },

    /// Configuration rejected at load time.
    #[error("Invalid configuration: {0}")]
    ConfigurationInvalid(String),

    /// The response consumer went away mid-generation.
    #[error("Turn cancelled")]
    Cancelled,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_error_displays_correctly() {
        let err = Error::Provider(ProviderError::ApiError {
            status_code: 503,
            message: "model loading".into(),
        });
        assert!(err.to_string().contains("503"));
        assert!(err.to_string().contains("model loading"));
    }

    #[test]
    fn generation_failure_reports_attempts() {
        let err = Error::Chat(ChatError::GenerationFailed {
            attempts: 3,
            reason: "connection refused".into(),
        });
        let msg = err.to_string();
        assert!(msg.contains("3 attempt"));
        assert!(msg.contains("connection refused"));
    }

    #[test]
    fn store_error_converts() {
        fn fails() -> Result<()> {
            Err(StoreError::NotFound("chat-1".into()))?
        }
        assert!(matches!(fails(), Err(Error::Store(StoreError::NotFound(_)))));
    }
}
