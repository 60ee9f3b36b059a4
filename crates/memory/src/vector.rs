//! Vector similarity and an in-memory similarity index.

use async_trait::async_trait;
use inkwell_core::error::StoreError;
use inkwell_core::{ScoredId, SimilarityIndex};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Compute cosine similarity between two vectors.
///
/// Returns a value in [-1, 1] where 1 = identical, 0 = orthogonal, -1 = opposite.
/// Returns 0.0 if the vectors are empty, differ in length, or either is zero.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let (dot, norm_a, norm_b) = a.iter().zip(b).fold((0.0f64, 0.0f64, 0.0f64), |acc, (x, y)| {
        let (x, y) = (f64::from(*x), f64::from(*y));
        (acc.0 + x * y, acc.1 + x * x, acc.2 + y * y)
    });

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < 1e-10 {
        return 0.0;
    }

    (dot / denom) as f32
}

/// Entry-level embeddings searched by brute force.
pub struct InMemoryIndex {
    vectors: Arc<RwLock<HashMap<String, Vec<f32>>>>,
}

impl InMemoryIndex {
    pub fn new() -> Self {
        Self {
            vectors: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Insert or replace the embedding of an entry.
    pub async fn upsert(&self, entry_id: impl Into<String>, embedding: Vec<f32>) {
        self.vectors.write().await.insert(entry_id.into(), embedding);
    }

    pub async fn remove(&self, entry_id: &str) -> bool {
        self.vectors.write().await.remove(entry_id).is_some()
    }

    pub async fn len(&self) -> usize {
        self.vectors.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.vectors.read().await.is_empty()
    }
}

impl Default for InMemoryIndex {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SimilarityIndex for InMemoryIndex {
    async fn similar(
        &self,
        query: &[f32],
        candidates: Option<&[String]>,
        top_k: usize,
    ) -> Result<Vec<ScoredId>, StoreError> {
        let vectors = self.vectors.read().await;

        let mut scored: Vec<ScoredId> = match candidates {
            Some(ids) => ids
                .iter()
                .filter_map(|id| {
                    vectors.get(id).map(|v| ScoredId {
                        id: id.clone(),
                        score: cosine_similarity(query, v),
                    })
                })
                .collect(),
            None => vectors
                .iter()
                .map(|(id, v)| ScoredId {
                    id: id.clone(),
                    score: cosine_similarity(query, v),
                })
                .collect(),
        };

        scored.sort_by(|a, b| b.score.total_cmp(&a.score).then_with(|| a.id.cmp(&b.id)));
        scored.dedup_by(|a, b| a.id == b.id);
        scored.truncate(top_k);
        Ok(scored)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cosine_identical_vectors() {
        let v = vec![1.0, 2.0, 3.0];
        assert!((cosine_similarity(&v, &v) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn cosine_orthogonal_vectors() {
        let sim = cosine_similarity(&[1.0, 0.0, 0.0], &[0.0, 1.0, 0.0]);
        assert!(sim.abs() < 1e-6);
    }

    #[test]
    fn cosine_degenerate_inputs() {
        assert_eq!(cosine_similarity(&[], &[]), 0.0);
        assert_eq!(cosine_similarity(&[1.0, 2.0], &[1.0, 2.0, 3.0]), 0.0);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 2.0]), 0.0);
    }

    #[test]
    fn cosine_known_value() {
        // 1 / sqrt(2)
        let sim = cosine_similarity(&[1.0, 1.0], &[1.0, 0.0]);
        assert!((sim - 0.7071).abs() < 0.001);
    }

    #[tokio::test]
    async fn index_ranks_by_similarity() {
        let index = InMemoryIndex::new();
        index.upsert("a", vec![0.0, 1.0]).await;
        index.upsert("b", vec![1.0, 0.0]).await;
        index.upsert("c", vec![0.5, 0.5]).await;

        let hits = index.similar(&[1.0, 0.0], None, 10).await.unwrap();
        let ids: Vec<&str> = hits.iter().map(|h| h.id.as_str()).collect();
        assert_eq!(ids, vec!["b", "c", "a"]);
    }

    #[tokio::test]
    async fn index_restricts_to_candidates() {
        let index = InMemoryIndex::new();
        index.upsert("a", vec![1.0, 0.0]).await;
        index.upsert("b", vec![0.9, 0.1]).await;

        let candidates = vec!["b".to_string(), "unknown".to_string()];
        let hits = index
            .similar(&[1.0, 0.0], Some(&candidates), 10)
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, "b");
    }

    #[tokio::test]
    async fn index_respects_top_k() {
        let index = InMemoryIndex::new();
        for i in 0..10 {
            index.upsert(format!("e{i}"), vec![1.0, i as f32 * 0.1]).await;
        }
        assert_eq!(index.similar(&[1.0, 0.0], None, 3).await.unwrap().len(), 3);
        assert_eq!(index.len().await, 10);
    }
}
