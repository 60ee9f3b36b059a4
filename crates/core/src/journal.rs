//! Journal entries: the material the assistant answers from.
//!
//! Entries are owned by the entry store. The chat core only reads them, so
//! the mutators here are value-returning: each produces a new version with a
//! refreshed `updated_at` and leaves the original untouched. The store is
//! responsible for applying the new version.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::id;

/// A single journal entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JournalEntry {
    /// Timestamp-derived, lexicographically sortable id.
    pub id: String,

    pub title: String,

    /// Markdown body.
    pub content: String,

    pub created_at: DateTime<Utc>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,

    /// Set-like; order carries no meaning.
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub tags: BTreeSet<String>,

    /// Folder / notebook path, e.g. `personal/thoughts`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub folder: Option<String>,

    #[serde(default)]
    pub favorite: bool,

    /// Ids of images attached to this entry.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub images: Vec<String>,

    /// Free-form provenance (e.g. the chat session an entry was saved from).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_metadata: Option<serde_json::Value>,
}

impl JournalEntry {
    /// Create a new entry with a fresh id, stamped now.
    pub fn new(title: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            id: id::entry_id(),
            title: title.into(),
            content: content.into(),
            created_at: Utc::now(),
            updated_at: None,
            tags: BTreeSet::new(),
            folder: None,
            favorite: false,
            images: Vec::new(),
            source_metadata: None,
        }
    }

    /// Builder-style creation timestamp override (imports, tests).
    pub fn created(mut self, at: DateTime<Utc>) -> Self {
        self.created_at = at;
        self
    }

    /// New version with replaced content.
    pub fn with_content(&self, content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            updated_at: Some(Utc::now()),
            ..self.clone()
        }
    }

    /// New version with `tag` added. Adding a present tag is a no-op.
    pub fn with_tag(&self, tag: impl Into<String>) -> Self {
        let tag = tag.into();
        if self.tags.contains(&tag) {
            return self.clone();
        }
        let mut next = self.clone();
        next.tags.insert(tag);
        next.updated_at = Some(Utc::now());
        next
    }

    /// New version with `tag` removed. Removing an absent tag is a no-op.
    pub fn without_tag(&self, tag: &str) -> Self {
        if !self.tags.contains(tag) {
            return self.clone();
        }
        let mut next = self.clone();
        next.tags.remove(tag);
        next.updated_at = Some(Utc::now());
        next
    }

    /// New version with the favorite flag flipped.
    pub fn with_favorite_toggled(&self) -> Self {
        Self {
            favorite: !self.favorite,
            updated_at: Some(Utc::now()),
            ..self.clone()
        }
    }

    /// Last modification time, falling back to creation.
    pub fn last_modified(&self) -> DateTime<Utc> {
        self.updated_at.unwrap_or(self.created_at)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_entry_has_sortable_id() {
        let entry = JournalEntry::new("Day one", "# Today\n\nA good day.");
        assert_eq!(entry.id.len(), 23);
        assert!(entry.updated_at.is_none());
        assert!(!entry.favorite);
    }

    #[test]
    fn content_update_returns_new_version() {
        let original = JournalEntry::new("t", "before");
        let updated = original.with_content("after");
        assert_eq!(original.content, "before");
        assert_eq!(updated.content, "after");
        assert!(updated.updated_at.is_some());
        assert_eq!(updated.id, original.id);
    }

    #[test]
    fn tags_behave_like_a_set() {
        let entry = JournalEntry::new("t", "c").with_tag("daily").with_tag("coding");
        let again = entry.with_tag("daily");
        assert_eq!(again.tags.len(), 2);
        assert_eq!(again.updated_at, entry.updated_at);

        let removed = entry.without_tag("daily");
        assert!(!removed.tags.contains("daily"));

        let untouched = removed.without_tag("missing");
        assert_eq!(untouched, removed);
    }

    #[test]
    fn favorite_toggles() {
        let entry = JournalEntry::new("t", "c");
        let fav = entry.with_favorite_toggled();
        assert!(fav.favorite);
        assert!(!fav.with_favorite_toggled().favorite);
    }

    #[test]
    fn serde_skips_empty_fields() {
        let entry = JournalEntry::new("t", "c");
        let json = serde_json::to_string(&entry).unwrap();
        assert!(!json.contains("tags"));
        assert!(!json.contains("images"));
        let back: JournalEntry = serde_json::from_str(&json).unwrap();
        assert_eq!(back, entry);
    }
}
