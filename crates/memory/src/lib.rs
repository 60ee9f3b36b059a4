//! Store implementations for Inkwell.
//!
//! Everything here lives in process memory. Persistent backends implement
//! the same `inkwell-core` traits.

pub mod in_memory;
pub mod vector;

pub use in_memory::{InMemoryEntryStore, InMemorySessionStore};
pub use vector::{InMemoryIndex, cosine_similarity};
