//! Configuration loading, validation, and management for Inkwell.
//!
//! Loads configuration from `~/.inkwell/config.toml` with environment
//! variable overrides. Validates all settings at load time so that an
//! invalid configuration never reaches a chat turn.
//!
//! The loaded [`AppConfig`] is shared as an immutable snapshot
//! ([`ConfigSnapshot`]); a turn reads the snapshot it started with and never
//! observes later changes.

pub mod logging;

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

/// Immutable configuration handed to each turn.
pub type ConfigSnapshot = Arc<AppConfig>;

/// Everything the chat core reads: `[llm]` and `[chat]` tables.
///
/// Maps directly to `~/.inkwell/config.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// LLM and embedding service settings
    #[serde(default)]
    pub llm: LlmConfig,

    /// Chat context management settings
    #[serde(default)]
    pub chat: ChatConfig,
}

/// LLM service settings (single instance keyed `"default"`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    #[serde(default = "default_id")]
    pub id: String,

    /// Fallback model for every operation
    #[serde(default = "default_model_name")]
    pub model_name: String,

    #[serde(default = "default_embedding_model")]
    pub embedding_model: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chat_model: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub analysis_model: Option<String>,

    /// Retries after the first attempt of an embedding or LLM call
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Fixed delay between retries, in seconds
    #[serde(default = "default_retry_delay")]
    pub retry_delay: f64,

    /// Per-attempt timeout, in seconds
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    #[serde(default = "default_temperature")]
    pub temperature: f32,

    #[serde(default = "default_llm_max_tokens")]
    pub max_tokens: u32,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,

    /// Retrieval cut-off (0–1)
    #[serde(default = "default_min_similarity")]
    pub min_similarity: f32,

    /// Base URL of the Ollama server
    #[serde(default = "default_base_url")]
    pub base_url: String,
}

/// Longest accepted pause between retries, in seconds.
pub const MAX_RETRY_DELAY_SECS: f64 = 300.0;

fn default_id() -> String {
    "default".into()
}
fn default_model_name() -> String {
    "qwen3:latest".into()
}
fn default_embedding_model() -> String {
    "nomic-embed-text:latest".into()
}
fn default_max_retries() -> u32 {
    2
}
fn default_retry_delay() -> f64 {
    1.0
}
fn default_request_timeout() -> u64 {
    120
}
fn default_temperature() -> f32 {
    0.7
}
fn default_llm_max_tokens() -> u32 {
    1000
}
fn default_min_similarity() -> f32 {
    0.5
}
fn default_base_url() -> String {
    "http://localhost:11434".into()
}

impl LlmConfig {
    /// Model for chat answers: `chat_model`, else `model_name`.
    pub fn chat_model(&self) -> &str {
        self.chat_model.as_deref().unwrap_or(&self.model_name)
    }

    /// Model for summaries: `analysis_model`, else `model_name`.
    pub fn analysis_model(&self) -> &str {
        self.analysis_model.as_deref().unwrap_or(&self.model_name)
    }

    /// Clamped to `0..=MAX_RETRY_DELAY_SECS`; never panics on odd values.
    pub fn retry_delay(&self) -> Duration {
        Duration::try_from_secs_f64(self.retry_delay.clamp(0.0, MAX_RETRY_DELAY_SECS))
            .unwrap_or_default()
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            id: default_id(),
            model_name: default_model_name(),
            embedding_model: default_embedding_model(),
            chat_model: None,
            analysis_model: None,
            max_retries: default_max_retries(),
            retry_delay: default_retry_delay(),
            request_timeout_secs: default_request_timeout(),
            temperature: default_temperature(),
            max_tokens: default_llm_max_tokens(),
            system_prompt: None,
            min_similarity: default_min_similarity(),
            base_url: default_base_url(),
        }
    }
}

/// Chat context management settings (single instance keyed `"default"`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatConfig {
    #[serde(default = "default_id")]
    pub id: String,

    #[serde(default = "default_system_prompt")]
    pub system_prompt: String,

    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Upper bound on verbatim messages kept in a windowed prompt
    #[serde(default = "default_max_history")]
    pub max_history: usize,

    /// Maximum number of excerpts to retrieve
    #[serde(default = "default_retrieval_limit")]
    pub retrieval_limit: usize,

    /// Maximum characters per chunk
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,

    /// Characters shared by consecutive chunks
    #[serde(default = "default_chunk_overlap")]
    pub chunk_overlap: usize,

    /// Allow several chunks of one entry in a single retrieval
    #[serde(default = "default_true")]
    pub use_enhanced_retrieval: bool,

    /// Maximum tokens in a chat response
    #[serde(default = "default_chat_max_tokens")]
    pub max_tokens: u32,

    /// Maximum tokens for the entire assembled prompt
    #[serde(default = "default_max_context_tokens")]
    pub max_context_tokens: usize,

    /// Windowed-out token estimate that triggers summarization
    #[serde(default = "default_summary_threshold")]
    pub conversation_summary_threshold: usize,

    /// Recent messages kept verbatim
    #[serde(default = "default_context_window_size")]
    pub context_window_size: usize,

    #[serde(default = "default_true")]
    pub use_context_windowing: bool,

    /// Minimum messages before summarization is considered
    #[serde(default = "default_min_messages_for_summary")]
    pub min_messages_for_summary: usize,

    #[serde(default = "default_summary_prompt")]
    pub summary_prompt: String,
}

fn default_system_prompt() -> String {
    "You are an AI assistant for a personal journaling app. Help the user explore their \
     journal entries and answer questions about their content. When referencing journal \
     entries, cite them as [Entry <id>] using the entry IDs provided."
        .into()
}
fn default_max_history() -> usize {
    10
}
fn default_retrieval_limit() -> usize {
    5
}
fn default_chunk_size() -> usize {
    500
}
fn default_chunk_overlap() -> usize {
    100
}
fn default_true() -> bool {
    true
}
fn default_chat_max_tokens() -> u32 {
    2048
}
fn default_max_context_tokens() -> usize {
    4096
}
fn default_summary_threshold() -> usize {
    2000
}
fn default_context_window_size() -> usize {
    10
}
fn default_min_messages_for_summary() -> usize {
    6
}
fn default_summary_prompt() -> String {
    "Summarize the key points of this conversation so far in 3-4 sentences:".into()
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            id: default_id(),
            system_prompt: default_system_prompt(),
            temperature: default_temperature(),
            max_history: default_max_history(),
            retrieval_limit: default_retrieval_limit(),
            chunk_size: default_chunk_size(),
            chunk_overlap: default_chunk_overlap(),
            use_enhanced_retrieval: true,
            max_tokens: default_chat_max_tokens(),
            max_context_tokens: default_max_context_tokens(),
            conversation_summary_threshold: default_summary_threshold(),
            context_window_size: default_context_window_size(),
            use_context_windowing: true,
            min_messages_for_summary: default_min_messages_for_summary(),
            summary_prompt: default_summary_prompt(),
        }
    }
}

impl AppConfig {
    /// Load configuration from the default path (~/.inkwell/config.toml).
    ///
    /// Environment overrides (highest priority):
    /// - `INKWELL_MODEL` → `llm.model_name`
    /// - `INKWELL_CHAT_MODEL` → `llm.chat_model`
    /// - `INKWELL_OLLAMA_URL` → `llm.base_url`
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::config_dir().join("config.toml");
        let mut config = Self::load_from(&config_path)?;

        if let Ok(model) = std::env::var("INKWELL_MODEL") {
            config.llm.model_name = model;
        }
        if let Ok(model) = std::env::var("INKWELL_CHAT_MODEL") {
            config.llm.chat_model = Some(model);
        }
        if let Ok(url) = std::env::var("INKWELL_OLLAMA_URL") {
            config.llm.base_url = url;
        }

        config.validate()?;
        Ok(config)
    }

    /// Load from `path`; a missing file yields the defaults.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::info!("No config file found at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        Self::from_toml_str(&content).map_err(|e| match e {
            ConfigError::ParseError { reason, .. } => ConfigError::ParseError {
                path: path.to_path_buf(),
                reason,
            },
            other => other,
        })
    }

    /// Parse and validate configuration from TOML text.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content).map_err(|e| ConfigError::ParseError {
            path: PathBuf::from("<inline>"),
            reason: e.to_string(),
        })?;

        config.validate()?;
        Ok(config)
    }

    /// `~/.inkwell`
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".inkwell")
    }

    /// Reject values the pipeline cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let chat = &self.chat;
        let llm = &self.llm;

        if chat.chunk_size == 0 {
            return Err(ConfigError::ValidationError(
                "chat.chunk_size must be > 0".into(),
            ));
        }

        if chat.chunk_overlap >= chat.chunk_size {
            return Err(ConfigError::ValidationError(format!(
                "chat.chunk_overlap ({}) must be smaller than chat.chunk_size ({})",
                chat.chunk_overlap, chat.chunk_size
            )));
        }

        if chat.max_context_tokens == 0 {
            return Err(ConfigError::ValidationError(
                "chat.max_context_tokens must be > 0".into(),
            ));
        }

        if chat.context_window_size == 0 {
            return Err(ConfigError::ValidationError(
                "chat.context_window_size must be > 0".into(),
            ));
        }

        for (name, temperature) in [("chat", chat.temperature), ("llm", llm.temperature)] {
            if !(0.0..=2.0).contains(&temperature) {
                return Err(ConfigError::ValidationError(format!(
                    "{name}.temperature must be between 0.0 and 2.0"
                )));
            }
        }

        if !(0.0..=1.0).contains(&llm.min_similarity) {
            return Err(ConfigError::ValidationError(
                "llm.min_similarity must be between 0.0 and 1.0".into(),
            ));
        }

        if !(0.0..=MAX_RETRY_DELAY_SECS).contains(&llm.retry_delay) {
            return Err(ConfigError::ValidationError(format!(
                "llm.retry_delay must be between 0 and {MAX_RETRY_DELAY_SECS} seconds"
            )));
        }

        if llm.request_timeout_secs == 0 {
            return Err(ConfigError::ValidationError(
                "llm.request_timeout_secs must be > 0".into(),
            ));
        }

        if chat.min_messages_for_summary < chat.context_window_size {
            tracing::warn!(
                min_messages_for_summary = chat.min_messages_for_summary,
                context_window_size = chat.context_window_size,
                "min_messages_for_summary is below context_window_size; summaries may fire \
                 before any message leaves the window"
            );
        }

        Ok(())
    }

    /// Freeze this configuration into a shareable snapshot.
    pub fn snapshot(self) -> ConfigSnapshot {
        Arc::new(self)
    }

    /// Generate a default config TOML string.
    pub fn default_toml() -> String {
        toml::to_string_pretty(&Self::default()).unwrap_or_default()
    }
}

fn dirs_home() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var("USERPROFILE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("C:\\Users\\Default"))
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/tmp"))
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {path}: {reason}")]
    ReadError { path: PathBuf, reason: String },

    #[error("Failed to parse config file at {path}: {reason}")]
    ParseError { path: PathBuf, reason: String },

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}

impl From<ConfigError> for inkwell_core::Error {
    fn from(err: ConfigError) -> Self {
        match err {
            ConfigError::ValidationError(reason) => {
                inkwell_core::ChatError::ConfigurationInvalid(reason).into()
            }
            other => inkwell_core::Error::Config {
                message: other.to_string(),
            },
        }
    }
}
