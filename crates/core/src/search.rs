//! Chat history search: which sessions mention a phrase, and where.
//!
//! Matching is a case-insensitive literal match. A session matches on its
//! title, its rolling summary, or the content of its messages, checked in
//! that order; the first hit decides the [`MatchType`] and base relevance.

use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};

use crate::chat::{ChatMessage, ChatSession};

/// Matched messages kept per session result.
pub const MAX_MATCHED_MESSAGES: usize = 3;

/// Characters of context shown on each side of a highlighted match.
const SNIPPET_RADIUS: usize = 40;

/// Characters of a neighbouring message shown as context.
const CONTEXT_CHARS: usize = 100;

/// Where a session matched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchType {
    SessionTitle,
    ContextSummary,
    MessageContent,
}

impl MatchType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SessionTitle => "session_title",
            Self::ContextSummary => "context_summary",
            Self::MessageContent => "message_content",
        }
    }

    fn base_score(&self) -> f32 {
        match self {
            Self::SessionTitle => 1.0,
            Self::ContextSummary => 0.7,
            Self::MessageContent => 0.4,
        }
    }
}

/// One session matching a search.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatSearchResult {
    pub session: ChatSession,
    pub match_type: MatchType,
    pub relevance_score: f32,
    /// Up to [`MAX_MATCHED_MESSAGES`] messages containing the query.
    #[serde(default)]
    pub matched_messages: Vec<ChatMessage>,
    /// Excerpts around each match with the hit wrapped in `**`.
    #[serde(default)]
    pub highlighted_snippets: Vec<String>,
}

/// One message matching a search within a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageSearchResult {
    pub message: ChatMessage,
    pub highlighted_content: String,
    pub relevance_score: f32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context_before: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context_after: Option<String>,
}

/// A page of session search results.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaginatedSearchResults {
    pub results: Vec<ChatSearchResult>,
    /// Matches across all pages.
    pub total: usize,
    pub limit: usize,
    pub offset: usize,
    pub query: String,
    pub has_next: bool,
    pub has_previous: bool,
}

impl PaginatedSearchResults {
    /// Cut one page out of the full, ranked match list.
    pub fn page(ranked: Vec<ChatSearchResult>, query: &str, limit: usize, offset: usize) -> Self {
        let total = ranked.len();
        let results = ranked.into_iter().skip(offset).take(limit).collect();
        Self {
            results,
            total,
            limit,
            offset,
            query: query.to_string(),
            has_next: offset.saturating_add(limit) < total,
            has_previous: offset > 0,
        }
    }
}

/// A compiled search phrase.
#[derive(Debug, Clone)]
pub struct SearchQuery {
    text: String,
    pattern: Regex,
}

impl SearchQuery {
    /// `None` for a blank query.
    pub fn new(text: &str) -> Option<Self> {
        let text = text.trim();
        if text.is_empty() {
            return None;
        }
        let pattern = RegexBuilder::new(&regex::escape(text))
            .case_insensitive(true)
            .build()
            .ok()?;
        Some(Self {
            text: text.to_string(),
            pattern,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.text
    }

    pub fn matches(&self, haystack: &str) -> bool {
        self.pattern.is_match(haystack)
    }

    /// The whole text with every match wrapped in `**`.
    pub fn highlight(&self, haystack: &str) -> String {
        self.pattern.replace_all(haystack, "**$0**").into_owned()
    }

    /// A short excerpt around the first match, highlighted.
    pub fn snippet(&self, haystack: &str) -> Option<String> {
        let hit = self.pattern.find(haystack)?;
        let start = back_chars(haystack, hit.start(), SNIPPET_RADIUS);
        let end = forward_chars(haystack, hit.end(), SNIPPET_RADIUS);

        let mut out = String::new();
        if start > 0 {
            out.push('…');
        }
        out.push_str(&haystack[start..hit.start()]);
        out.push_str("**");
        out.push_str(hit.as_str());
        out.push_str("**");
        out.push_str(&haystack[hit.end()..end]);
        if end < haystack.len() {
            out.push('…');
        }
        Some(out)
    }

    /// Score `session` against the query. `messages` is its full history.
    pub fn match_session(
        &self,
        session: &ChatSession,
        messages: &[ChatMessage],
    ) -> Option<ChatSearchResult> {
        let matched: Vec<&ChatMessage> =
            messages.iter().filter(|m| self.matches(&m.content)).collect();

        let title = session.title.as_deref().filter(|t| self.matches(t));
        let summary = session
            .context_summary
            .as_deref()
            .filter(|s| self.matches(s));
        let match_type = if title.is_some() {
            MatchType::SessionTitle
        } else if summary.is_some() {
            MatchType::ContextSummary
        } else if !matched.is_empty() {
            MatchType::MessageContent
        } else {
            return None;
        };

        let mut highlighted_snippets: Vec<String> = title
            .into_iter()
            .chain(summary)
            .filter_map(|text| self.snippet(text))
            .collect();
        highlighted_snippets.extend(
            matched
                .iter()
                .take(MAX_MATCHED_MESSAGES)
                .filter_map(|m| self.snippet(&m.content)),
        );

        // Matching messages add to the score, up to five of them
        let relevance_score = match_type.base_score() + 0.05 * matched.len().min(5) as f32;

        Some(ChatSearchResult {
            session: session.clone(),
            match_type,
            relevance_score,
            matched_messages: matched
                .into_iter()
                .take(MAX_MATCHED_MESSAGES)
                .cloned()
                .collect(),
            highlighted_snippets,
        })
    }

    /// Every message of one session containing the query, in order, with
    /// its neighbours as context.
    pub fn match_messages(&self, messages: &[ChatMessage]) -> Vec<MessageSearchResult> {
        messages
            .iter()
            .enumerate()
            .filter(|(_, m)| self.matches(&m.content))
            .map(|(i, message)| {
                let hits = self.pattern.find_iter(&message.content).count();
                MessageSearchResult {
                    message: message.clone(),
                    highlighted_content: self.highlight(&message.content),
                    relevance_score: (hits as f32 * 0.25).min(1.0),
                    context_before: i
                        .checked_sub(1)
                        .map(|j| preview(&messages[j].content)),
                    context_after: messages.get(i + 1).map(|m| preview(&m.content)),
                }
            })
            .collect()
    }
}

/// Rank session matches: score, then most recently accessed, then id.
pub fn rank(results: &mut [ChatSearchResult]) {
    results.sort_by(|a, b| {
        b.relevance_score
            .total_cmp(&a.relevance_score)
            .then_with(|| b.session.last_accessed.cmp(&a.session.last_accessed))
            .then_with(|| a.session.id.cmp(&b.session.id))
    });
}

fn preview(text: &str) -> String {
    let end = forward_chars(text, 0, CONTEXT_CHARS);
    if end < text.len() {
        format!("{}…", &text[..end])
    } else {
        text.to_string()
    }
}

/// Byte offset `n` characters before `from`, clamped to the start.
fn back_chars(text: &str, from: usize, n: usize) -> usize {
    text[..from]
        .char_indices()
        .rev()
        .nth(n.saturating_sub(1))
        .map_or(0, |(i, _)| i)
}

/// Byte offset `n` characters after `from`, clamped to the end.
fn forward_chars(text: &str, from: usize, n: usize) -> usize {
    text[from..]
        .char_indices()
        .nth(n)
        .map_or(text.len(), |(i, _)| from + i)
}
