//! In-memory vector index backend.
//!
//! A pure-Rust cosine-similarity index over partitioned quote entries.
//! Useful for tests, demos, and small deployments; production deployments
//! plug an ANN engine in behind the same [`VectorIndex`] trait.

use async_trait::async_trait;
use promptweave_core::error::IndexError;
use promptweave_core::index::VectorIndex;
use promptweave_core::quote::{QuoteHit, QuoteItem};
use tokio::sync::RwLock;

/// Compute cosine similarity between two vectors.
///
/// Returns a value in [-1, 1] where 1 = identical, 0 = orthogonal.
/// Returns 0.0 if either vector is zero-length or empty.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;

    for (x, y) in a.iter().zip(b.iter()) {
        let x = *x as f64;
        let y = *y as f64;
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < 1e-10 {
        return 0.0;
    }

    (dot / denom) as f32
}

/// One stored entry: a quote, its embedding, and the partition it lives in.
#[derive(Debug, Clone)]
pub struct IndexEntry {
    pub partition: String,
    pub embedding: Vec<f32>,
    pub quote: QuoteItem,
}

/// An in-memory cosine-similarity index.
#[derive(Default)]
pub struct InMemoryIndex {
    entries: RwLock<Vec<IndexEntry>>,
}

impl InMemoryIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert one entry.
    pub async fn insert(&self, entry: IndexEntry) {
        self.entries.write().await.push(entry);
    }

    /// Bulk-load entries, e.g. from a fixture file.
    pub async fn load(&self, entries: Vec<IndexEntry>) {
        self.entries.write().await.extend(entries);
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

#[async_trait]
impl VectorIndex for InMemoryIndex {
    async fn search(
        &self,
        vector: &[f32],
        partitions: &[String],
        limit: usize,
        threshold: f32,
    ) -> std::result::Result<Vec<QuoteHit>, IndexError> {
        if vector.is_empty() {
            return Err(IndexError::QueryFailed("empty query vector".into()));
        }

        let entries = self.entries.read().await;

        let mut scored: Vec<QuoteHit> = entries
            .iter()
            .filter(|e| partitions.contains(&e.partition))
            .filter_map(|e| {
                let score = cosine_similarity(&e.embedding, vector);
                (score >= threshold).then(|| QuoteHit {
                    quote: e.quote.clone(),
                    score,
                })
            })
            .collect();

        scored.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        scored.truncate(limit);

        Ok(scored)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(id: &str, partition: &str, embedding: Vec<f32>) -> IndexEntry {
        IndexEntry {
            partition: partition.into(),
            embedding,
            quote: QuoteItem::new(id, format!("Q {id}"), format!("A {id}"), "test"),
        }
    }

    #[test]
    fn cosine_identical_vectors() {
        let v = vec![1.0, 2.0, 3.0];
        assert!((cosine_similarity(&v, &v) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn cosine_orthogonal_vectors() {
        let a = vec![1.0, 0.0, 0.0];
        let b = vec![0.0, 1.0, 0.0];
        assert!(cosine_similarity(&a, &b).abs() < 1e-6);
    }

    #[test]
    fn cosine_zero_vector() {
        let a = vec![0.0, 0.0];
        let b = vec![1.0, 2.0];
        assert_eq!(cosine_similarity(&a, &b), 0.0);
    }

    #[test]
    fn cosine_mismatched_lengths() {
        assert_eq!(cosine_similarity(&[1.0, 2.0], &[1.0, 2.0, 3.0]), 0.0);
    }

    #[tokio::test]
    async fn search_ranks_by_similarity() {
        let index = InMemoryIndex::new();
        index.insert(entry("a", "kb1", vec![0.0, 1.0])).await;
        index.insert(entry("b", "kb1", vec![1.0, 0.0])).await;
        index.insert(entry("c", "kb1", vec![0.7, 0.7])).await;

        let hits = index
            .search(&[1.0, 0.0], &["kb1".into()], 10, 0.0)
            .await
            .unwrap();

        assert_eq!(hits.len(), 3);
        assert_eq!(hits[0].quote.id, "b");
        assert_eq!(hits[1].quote.id, "c");
        assert_eq!(hits[2].quote.id, "a");
    }

    #[tokio::test]
    async fn search_respects_partitions() {
        let index = InMemoryIndex::new();
        index.insert(entry("a", "kb1", vec![1.0, 0.0])).await;
        index.insert(entry("b", "kb2", vec![1.0, 0.0])).await;

        let hits = index
            .search(&[1.0, 0.0], &["kb2".into()], 10, 0.0)
            .await
            .unwrap();

        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].quote.id, "b");
    }

    #[tokio::test]
    async fn search_respects_threshold_and_limit() {
        let index = InMemoryIndex::new();
        index.insert(entry("a", "kb1", vec![1.0, 0.0])).await;
        index.insert(entry("b", "kb1", vec![0.9, 0.1])).await;
        index.insert(entry("c", "kb1", vec![0.0, 1.0])).await;

        let hits = index
            .search(&[1.0, 0.0], &["kb1".into()], 10, 0.8)
            .await
            .unwrap();
        assert_eq!(hits.len(), 2);

        let hits = index
            .search(&[1.0, 0.0], &["kb1".into()], 1, 0.8)
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].quote.id, "a");
    }

    #[tokio::test]
    async fn search_rejects_empty_vector() {
        let index = InMemoryIndex::new();
        assert!(index.search(&[], &["kb1".into()], 10, 0.0).await.is_err());
    }
}
