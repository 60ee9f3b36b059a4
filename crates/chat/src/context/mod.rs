//! Prompt assembly under a token budget.
//!
//! See [`window`] for the section order and trim strategy.

pub mod token;
pub mod window;

pub use window::{
    AssemblyMetadata, ContextWindowManager, DropInfo, LayerStats, PromptAssembly, WindowInput,
};
