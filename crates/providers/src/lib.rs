//! LLM and embedding provider implementations for Inkwell.
//!
//! All providers implement the `inkwell_core::Provider` trait.

pub mod ollama;

pub use ollama::OllamaProvider;
