//! Retrieval engine: ranks journal excerpts against a query.
//!
//! # Flow
//!
//! 1. Resolve the temporal filter and collect in-range entry ids
//! 2. Embed the query
//! 3. Coarse preselection through the similarity index
//! 4. Chunk each candidate entry, embed the chunks, score by cosine similarity
//! 5. Threshold, collapse to one chunk per entry (unless enhanced), sort, truncate
//!
//! Retrieval never fails a turn. Embedding or index outages yield an empty
//! result with the cause attached.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use inkwell_config::AppConfig;
use inkwell_core::error::ChatError;
use inkwell_core::provider::EmbeddingRequest;
use inkwell_core::{EntryStore, JournalEntry, Provider, SimilarityIndex, TemporalFilter};
use inkwell_memory::cosine_similarity;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::chunking::{self, split_text};
use crate::retry::RetryPolicy;

/// Snippets shown with citations are cut to this many characters.
pub const SNIPPET_CHARS: usize = 200;

/// Index preselection fetches this many entries per requested excerpt.
const PRESELECT_FACTOR: usize = 4;

/// A scored piece of a journal entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Excerpt {
    pub entry_id: String,
    pub entry_title: String,
    pub entry_created_at: DateTime<Utc>,
    /// Set only when the entry was split into several chunks.
    pub chunk_index: Option<usize>,
    pub score: f32,
    /// Full chunk text, as injected into the prompt.
    pub text: String,
    pub snippet: String,
}

/// What to retrieve for one turn.
#[derive(Debug, Clone)]
pub struct RetrievalQuery<'a> {
    pub text: &'a str,
    pub limit: usize,
    pub temporal_filter: Option<TemporalFilter>,
    pub now: DateTime<Utc>,
}

/// Excerpts plus the reason retrieval degraded, if it did.
#[derive(Debug, Clone, Default)]
pub struct Retrieval {
    pub excerpts: Vec<Excerpt>,
    pub degraded: Option<ChatError>,
}

impl Retrieval {
    fn degraded(reason: impl Into<String>) -> Self {
        Self {
            excerpts: Vec::new(),
            degraded: Some(ChatError::RetrievalUnavailable(reason.into())),
        }
    }
}

pub struct RetrievalEngine {
    entries: Arc<dyn EntryStore>,
    index: Arc<dyn SimilarityIndex>,
    embedder: Arc<dyn Provider>,
}

impl RetrievalEngine {
    pub fn new(
        entries: Arc<dyn EntryStore>,
        index: Arc<dyn SimilarityIndex>,
        embedder: Arc<dyn Provider>,
    ) -> Self {
        Self {
            entries,
            index,
            embedder,
        }
    }

    /// Rank excerpts for `query`, highest score first.
    pub async fn retrieve(&self, query: &RetrievalQuery<'_>, config: &AppConfig) -> Retrieval {
        if query.limit == 0 || query.text.trim().is_empty() {
            return Retrieval::default();
        }

        let range = query.temporal_filter.map(|f| f.range(query.now));

        // Filter first, rank second
        let candidates = match range {
            Some(range) => match self.entries.search_by_time_range(range).await {
                Ok(ids) if ids.is_empty() => {
                    debug!(filter = ?query.temporal_filter, "No entries in time range");
                    return Retrieval::default();
                }
                Ok(ids) => Some(ids),
                Err(e) => {
                    warn!(error = %e, "Time range lookup failed");
                    return Retrieval::degraded(e.to_string());
                }
            },
            None => None,
        };

        let policy = RetryPolicy::from_config(&config.llm);
        let model = &config.llm.embedding_model;

        let query_vector = match self.embed(&policy, model, vec![query.text.to_string()]).await {
            Ok(mut vectors) if !vectors.is_empty() => vectors.swap_remove(0),
            Ok(_) => return Retrieval::degraded("embedding service returned no vector"),
            Err(reason) => {
                warn!(reason = %reason, "Query embedding unavailable, continuing without excerpts");
                return Retrieval::degraded(reason);
            }
        };

        let top_k = query.limit.saturating_mul(PRESELECT_FACTOR);
        let hits = match self
            .index
            .similar(&query_vector, candidates.as_deref(), top_k)
            .await
        {
            Ok(hits) => hits,
            Err(e) => {
                warn!(error = %e, "Similarity index unavailable");
                return Retrieval::degraded(e.to_string());
            }
        };

        let mut scored = Vec::new();
        for hit in hits {
            let entry = match self.entries.get(&hit.id).await {
                Ok(Some(entry)) => entry,
                Ok(None) => {
                    debug!(entry_id = %hit.id, "Indexed entry no longer exists");
                    continue;
                }
                Err(e) => {
                    warn!(entry_id = %hit.id, error = %e, "Failed to load entry");
                    continue;
                }
            };
            if range.is_some_and(|r| !r.contains(entry.created_at)) {
                continue;
            }

            match self
                .score_entry(&policy, model, &entry, &query_vector, config)
                .await
            {
                Ok(excerpts) => scored.extend(excerpts),
                Err(reason) => {
                    warn!(entry_id = %entry.id, reason = %reason, "Skipping entry, chunk embedding failed");
                }
            }
        }

        let excerpts = rank(
            scored,
            config.llm.min_similarity,
            config.chat.use_enhanced_retrieval,
            query.limit,
        );

        info!(
            excerpts = excerpts.len(),
            filter = query.temporal_filter.map(|f| f.as_str()).unwrap_or("none"),
            "Retrieval complete"
        );

        Retrieval {
            excerpts,
            degraded: None,
        }
    }

    async fn score_entry(
        &self,
        policy: &RetryPolicy,
        model: &str,
        entry: &JournalEntry,
        query_vector: &[f32],
        config: &AppConfig,
    ) -> Result<Vec<Excerpt>, String> {
        if entry.content.trim().is_empty() {
            return Ok(Vec::new());
        }

        let chunks = split_text(
            &entry.content,
            config.chat.chunk_size,
            config.chat.chunk_overlap,
        );
        let was_split = chunks.len() > 1;

        let inputs: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
        let vectors = self.embed(policy, model, inputs).await?;
        if vectors.len() != chunks.len() {
            return Err(format!(
                "expected {} chunk vectors, got {}",
                chunks.len(),
                vectors.len()
            ));
        }

        Ok(chunks
            .into_iter()
            .zip(vectors)
            .map(|(chunk, vector)| Excerpt {
                entry_id: entry.id.clone(),
                entry_title: entry.title.clone(),
                entry_created_at: entry.created_at,
                chunk_index: was_split.then_some(chunk.chunk_index),
                score: cosine_similarity(query_vector, &vector),
                snippet: chunking::snippet(&chunk.text, SNIPPET_CHARS),
                text: chunk.text,
            })
            .collect())
    }

    async fn embed(
        &self,
        policy: &RetryPolicy,
        model: &str,
        inputs: Vec<String>,
    ) -> Result<Vec<Vec<f32>>, String> {
        policy
            .run("embed", || {
                self.embedder.embed(EmbeddingRequest {
                    model: model.to_string(),
                    inputs: inputs.clone(),
                })
            })
            .await
            .map(|response| response.embeddings)
            .map_err(|e| e.to_string())
    }
}

/// Threshold, collapse, order, truncate.
///
/// Ordering: score descending, then entry creation time descending, then
/// chunk index ascending, then entry id.
pub fn rank(
    mut excerpts: Vec<Excerpt>,
    min_similarity: f32,
    enhanced: bool,
    limit: usize,
) -> Vec<Excerpt> {
    excerpts.retain(|e| e.score >= min_similarity);
    excerpts.sort_by(compare);

    if !enhanced {
        // Sorted, so the first excerpt seen per entry is its best
        let mut seen = HashSet::new();
        excerpts.retain(|e| seen.insert(e.entry_id.clone()));
    }

    excerpts.truncate(limit);
    excerpts
}

fn compare(a: &Excerpt, b: &Excerpt) -> std::cmp::Ordering {
    b.score
        .total_cmp(&a.score)
        .then_with(|| b.entry_created_at.cmp(&a.entry_created_at))
        .then_with(|| a.chunk_index.cmp(&b.chunk_index))
        .then_with(|| a.entry_id.cmp(&b.entry_id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::{ScriptedProvider, unit_vector};
    use chrono::Duration;
    use inkwell_memory::{InMemoryEntryStore, InMemoryIndex};

    fn excerpt(entry_id: &str, chunk_index: Option<usize>, score: f32) -> Excerpt {
        Excerpt {
            entry_id: entry_id.into(),
            entry_title: entry_id.to_uppercase(),
            entry_created_at: DateTime::<Utc>::from_timestamp(1_700_000_000, 0).unwrap(),
            chunk_index,
            score,
            text: format!("text of {entry_id}"),
            snippet: format!("text of {entry_id}"),
        }
    }

    struct Fixture {
        entries: Arc<InMemoryEntryStore>,
        index: Arc<InMemoryIndex>,
        provider: Arc<ScriptedProvider>,
    }

    impl Fixture {
        fn new() -> Self {
            let provider = ScriptedProvider::new();
            provider.set_vector("query", unit_vector(1.0));
            Self {
                entries: Arc::new(InMemoryEntryStore::new()),
                index: Arc::new(InMemoryIndex::new()),
                provider: Arc::new(provider),
            }
        }

        async fn add(&self, entry: JournalEntry, score: f32) -> String {
            self.provider.set_vector(&entry.content, unit_vector(score));
            self.index.upsert(entry.id.clone(), unit_vector(score)).await;
            self.entries.insert(entry).await
        }

        fn engine(&self) -> RetrievalEngine {
            RetrievalEngine::new(
                self.entries.clone(),
                self.index.clone(),
                self.provider.clone(),
            )
        }
    }

    fn query(limit: usize, filter: Option<TemporalFilter>) -> RetrievalQuery<'static> {
        RetrievalQuery {
            text: "query",
            limit,
            temporal_filter: filter,
            now: Utc::now(),
        }
    }

    fn config() -> AppConfig {
        let mut config = AppConfig::default();
        config.llm.retry_delay = 0.0;
        config
    }

    #[tokio::test]
    async fn threshold_keeps_only_relevant_entries_in_order() {
        let fx = Fixture::new();
        let a = fx.add(JournalEntry::new("A", "alpha"), 0.9).await;
        let b = fx.add(JournalEntry::new("B", "bravo"), 0.6).await;
        fx.add(JournalEntry::new("C", "charlie"), 0.3).await;

        let result = fx.engine().retrieve(&query(5, None), &config()).await;
        assert!(result.degraded.is_none());
        let ids: Vec<&str> = result.excerpts.iter().map(|e| e.entry_id.as_str()).collect();
        assert_eq!(ids, vec![a.as_str(), b.as_str()]);
        assert!((result.excerpts[0].score - 0.9).abs() < 1e-4);
        assert!(result.excerpts[0].chunk_index.is_none());
    }

    #[tokio::test]
    async fn temporal_filter_restricts_before_ranking() {
        let fx = Fixture::new();
        let now = Utc::now();
        let recent = fx
            .add(
                JournalEntry::new("Recent", "recent").created(now - Duration::hours(2)),
                0.6,
            )
            .await;
        fx.add(
            JournalEntry::new("Old", "old").created(now - Duration::days(60)),
            0.95,
        )
        .await;

        let result = fx
            .engine()
            .retrieve(&query(5, Some(TemporalFilter::PastWeek)), &config())
            .await;
        assert_eq!(result.excerpts.len(), 1);
        assert_eq!(result.excerpts[0].entry_id, recent);
    }

    #[tokio::test]
    async fn empty_time_range_returns_nothing() {
        let fx = Fixture::new();
        fx.add(
            JournalEntry::new("Old", "old").created(Utc::now() - Duration::days(60)),
            0.95,
        )
        .await;

        let result = fx
            .engine()
            .retrieve(&query(5, Some(TemporalFilter::Today)), &config())
            .await;
        assert!(result.excerpts.is_empty());
        assert!(result.degraded.is_none());
        assert_eq!(fx.provider.embed_calls(), 0);
    }

    #[tokio::test]
    async fn embedding_outage_degrades_to_empty() {
        let fx = Fixture::new();
        fx.add(JournalEntry::new("A", "alpha"), 0.9).await;
        fx.provider.set_embeddings_down(true);

        let result = fx.engine().retrieve(&query(5, None), &config()).await;
        assert!(result.excerpts.is_empty());
        assert!(matches!(
            result.degraded,
            Some(ChatError::RetrievalUnavailable(_))
        ));
        // Initial attempt plus two retries
        assert_eq!(fx.provider.embed_calls(), 3);
    }

    #[tokio::test]
    async fn long_entries_are_chunked_and_tagged() {
        let fx = Fixture::new();
        let mut config = config();
        config.chat.chunk_size = 10;
        config.chat.chunk_overlap = 2;

        let entry = JournalEntry::new("Long", "aaaaaaaaaabbbbbbbbbb");
        // Chunks: "aaaaaaaaaa", "aabbbbbbbb", "bbbb"
        fx.provider.set_vector("aaaaaaaaaa", unit_vector(0.55));
        fx.provider.set_vector("aabbbbbbbb", unit_vector(0.8));
        fx.provider.set_vector("bbbb", unit_vector(0.7));
        fx.index.upsert(entry.id.clone(), unit_vector(0.8)).await;
        fx.entries.insert(entry).await;

        let single = fx.engine().retrieve(&query(5, None), &config).await;
        assert_eq!(single.excerpts.len(), 1);
        assert_eq!(single.excerpts[0].chunk_index, Some(1));

        config.chat.use_enhanced_retrieval = true;
        let multi = fx.engine().retrieve(&query(5, None), &config).await;
        let chunks: Vec<Option<usize>> = multi.excerpts.iter().map(|e| e.chunk_index).collect();
        assert_eq!(chunks, vec![Some(1), Some(2), Some(0)]);
    }

    #[tokio::test]
    async fn missing_entries_are_skipped() {
        let fx = Fixture::new();
        fx.index.upsert("ghost", unit_vector(0.99)).await;
        let a = fx.add(JournalEntry::new("A", "alpha"), 0.7).await;

        let result = fx.engine().retrieve(&query(5, None), &config()).await;
        assert_eq!(result.excerpts.len(), 1);
        assert_eq!(result.excerpts[0].entry_id, a);
    }

    #[test]
    fn rank_breaks_ties_by_recency_then_chunk() {
        let mut older = excerpt("older", Some(0), 0.8);
        older.entry_created_at -= Duration::days(1);
        let newer_second = excerpt("newer", Some(1), 0.8);
        let newer_first = excerpt("newer", Some(0), 0.8);

        let ranked = rank(
            vec![older, newer_second, newer_first],
            0.5,
            true,
            10,
        );
        let keys: Vec<(&str, Option<usize>)> = ranked
            .iter()
            .map(|e| (e.entry_id.as_str(), e.chunk_index))
            .collect();
        assert_eq!(
            keys,
            vec![("newer", Some(0)), ("newer", Some(1)), ("older", Some(0))]
        );
    }

    #[test]
    fn rank_collapses_to_best_chunk_per_entry() {
        let ranked = rank(
            vec![
                excerpt("a", Some(0), 0.6),
                excerpt("a", Some(1), 0.9),
                excerpt("b", None, 0.7),
            ],
            0.5,
            false,
            10,
        );
        assert_eq!(ranked.len(), 2);
        assert_eq!(ranked[0].chunk_index, Some(1));
        assert_eq!(ranked[1].entry_id, "b");
    }

    #[test]
    fn rank_truncates_to_limit() {
        let ranked = rank(
            (0..10)
                .map(|i| excerpt(&format!("e{i}"), None, 0.5 + i as f32 * 0.01))
                .collect(),
            0.0,
            false,
            3,
        );
        assert_eq!(ranked.len(), 3);
        assert_eq!(ranked[0].entry_id, "e9");
    }
}
