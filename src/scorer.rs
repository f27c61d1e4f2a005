use std::sync::Arc;

use serde::Serialize;

use crate::{error::Result, upstream::Embedder};

/// Which similarity strategy produced a score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ScorerKind {
    Lexical,
    Embedding,
}

/// A pluggable similarity strategy used by the document store.
///
/// Implementations score every candidate text against one query and must
/// return one value in `[0, 1]` per text, in input order.
pub trait Scorer: Send + Sync {
    fn kind(&self) -> ScorerKind;

    fn score_batch(&self, query: &str, texts: &[&str]) -> Result<Vec<f32>>;
}

/// Cosine similarity between `embed(query)` and `embed(text)`, clamped to
/// `[0, 1]` (anti-correlated texts score 0).
pub struct EmbeddingScorer {
    embedder: Arc<dyn Embedder>,
}

impl EmbeddingScorer {
    pub fn new(embedder: Arc<dyn Embedder>) -> Self {
        Self { embedder }
    }
}

impl Scorer for EmbeddingScorer {
    fn kind(&self) -> ScorerKind {
        ScorerKind::Embedding
    }

    fn score_batch(&self, query: &str, texts: &[&str]) -> Result<Vec<f32>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let query_vec = self.embedder.embed(query)?;
        let owned: Vec<String> = texts.iter().map(|t| t.to_string()).collect();
        let text_vecs = self.embedder.embed_batch(&owned)?;
        Ok(text_vecs
            .iter()
            .map(|v| cosine_similarity(&query_vec, v).clamp(0.0, 1.0))
            .collect())
    }
}

impl std::fmt::Debug for EmbeddingScorer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EmbeddingScorer").finish_non_exhaustive()
    }
}

/// Cosine similarity of two vectors; 0 when either is empty, zero-length or
/// the dimensions differ.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let (mut dot, mut norm_a, mut norm_b) = (0.0f32, 0.0f32, 0.0f32);
    for (x, y) in a.iter().zip(b) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a.sqrt() * norm_b.sqrt())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;

    /// Two-dimensional embedder: counts of 'a' and 'b'.
    struct LetterEmbedder;

    impl Embedder for LetterEmbedder {
        fn embed(&self, text: &str) -> Result<Vec<f32>> {
            let a = text.matches('a').count() as f32;
            let b = text.matches('b').count() as f32;
            Ok(vec![a, b])
        }
    }

    struct DownEmbedder;

    impl Embedder for DownEmbedder {
        fn embed(&self, _text: &str) -> Result<Vec<f32>> {
            Err(Error::upstream("embedding service unavailable"))
        }
    }

    #[test]
    fn cosine_identical_and_orthogonal() {
        let same = cosine_similarity(&[1.0, 0.0], &[2.0, 0.0]);
        assert!((same - 1.0).abs() < 1e-6);
        assert!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).abs() < 1e-6);
        assert_eq!(cosine_similarity(&[1.0], &[1.0, 0.0]), 0.0);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 0.0]), 0.0);
    }

    #[test]
    fn embedding_scores_are_clamped_and_ordered() {
        let scorer = EmbeddingScorer::new(Arc::new(LetterEmbedder));
        let scores = scorer.score_batch("aaa", &["aa", "bb", "ab"]).unwrap();
        assert!((scores[0] - 1.0).abs() < 1e-6);
        assert_eq!(scores[1], 0.0);
        assert!(scores[2] > 0.0 && scores[2] < 1.0);
        for s in scores {
            assert!((0.0..=1.0).contains(&s));
        }
    }

    #[test]
    fn embedding_failure_is_upstream() {
        let scorer = EmbeddingScorer::new(Arc::new(DownEmbedder));
        let err = scorer.score_batch("q", &["t"]).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Upstream);
    }
}
