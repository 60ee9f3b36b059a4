//! Citation tracker: binds the excerpts a reply was grounded on to the
//! assistant message, and polices entry ids the model mentions.

use std::collections::{BTreeSet, HashSet};
use std::sync::LazyLock;

use inkwell_core::EntryReference;
use inkwell_core::error::ChatError;
use regex::Regex;
use tracing::{debug, warn};

use crate::retrieval::Excerpt;

/// `[Entry <id>` as taught by the excerpt block; anything after the id
/// (chunk, score) is ignored.
static ENTRY_MENTION: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"\[Entry\s+([^\]\s|,]+)").ok());

/// Result of recording one assistant message's citations.
#[derive(Debug, Clone, Default)]
pub struct CitationOutcome {
    /// References not stored yet, deduplicated.
    pub references: Vec<EntryReference>,
    /// Mentions of entries the model was not given.
    pub rejected: Vec<ChatError>,
    /// Distinct entries referenced across the session, new ones included.
    pub entry_count: usize,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct CitationTracker;

impl CitationTracker {
    pub fn new() -> Self {
        Self
    }

    /// Distinct entry ids mentioned in `text`, in order of appearance.
    pub fn mentions(&self, text: &str) -> Vec<String> {
        let Some(re) = ENTRY_MENTION.as_ref() else {
            return Vec::new();
        };
        let mut seen = HashSet::new();
        re.captures_iter(text)
            .filter_map(|c| c.get(1))
            .map(|m| m.as_str().to_string())
            .filter(|id| seen.insert(id.clone()))
            .collect()
    }

    /// Distinct entries cited by `references`.
    pub fn entry_count(references: &[EntryReference]) -> usize {
        distinct_entries(references.iter())
    }

    /// Build references for `message_id` from the excerpts in its prompt.
    ///
    /// `existing` holds every reference already stored for the session.
    pub fn record(
        &self,
        message_id: &str,
        included: &[Excerpt],
        response_text: &str,
        existing: &[EntryReference],
    ) -> CitationOutcome {
        let mut keys: HashSet<(String, Option<usize>)> = existing
            .iter()
            .filter(|r| r.message_id == message_id)
            .map(|r| (r.entry_id.clone(), r.chunk_index))
            .collect();

        let references: Vec<EntryReference> = included
            .iter()
            .filter(|e| keys.insert((e.entry_id.clone(), e.chunk_index)))
            .map(|e| EntryReference {
                message_id: message_id.to_string(),
                entry_id: e.entry_id.clone(),
                similarity_score: e.score,
                chunk_index: e.chunk_index,
                entry_title: Some(e.entry_title.clone()),
                entry_snippet: Some(e.snippet.clone()),
            })
            .collect();

        let given: HashSet<&str> = included.iter().map(|e| e.entry_id.as_str()).collect();
        let rejected: Vec<ChatError> = self
            .mentions(response_text)
            .into_iter()
            .filter(|id| !given.contains(id.as_str()))
            .map(|entry_id| {
                warn!(message_id, entry_id = %entry_id, "Dropping citation of entry not in context");
                ChatError::InvalidCitation {
                    message_id: message_id.to_string(),
                    entry_id,
                }
            })
            .collect();

        let entry_count = distinct_entries(existing.iter().chain(references.iter()));

        debug!(
            message_id,
            new_references = references.len(),
            rejected = rejected.len(),
            entry_count,
            "Citations recorded"
        );

        CitationOutcome {
            references,
            rejected,
            entry_count,
        }
    }
}

fn distinct_entries<'a>(references: impl Iterator<Item = &'a EntryReference>) -> usize {
    references
        .map(|r| r.entry_id.as_str())
        .collect::<BTreeSet<_>>()
        .len()
}
