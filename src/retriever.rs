//! Retrieval strategies behind one `retrieve(query) -> ranked chunks` call.
//!
//! [`Retriever`] is a closed set of variants. Query rewriting and
//! compression wrap another retriever and reshape its output.

use std::{collections::HashSet, sync::Arc};

use rayon::prelude::*;
use serde::Serialize;

use crate::{
    config::{validate_threshold, validate_top_k},
    error::{Error, Result, with_fallback},
    lexical::LexicalScorer,
    record::{ChunkId, RetrievalResult},
    store::DocumentStore,
    upstream::{Embedder, Generator, VectorIndex},
};

/// The most query variations a rewrite produces, the original included.
pub const MAX_QUERY_VARIATIONS: usize = 4;

/// Answer a compression prompt gives when nothing in a chunk is relevant.
pub const NO_OUTPUT: &str = "NO_OUTPUT";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RetrieverKind {
    Lexical,
    Embedding,
    QueryRewrite,
    Compression,
}

/// One member of a retriever set.
pub enum Retriever {
    Lexical(LexicalRetriever),
    Embedding(EmbeddingRetriever),
    QueryRewrite(QueryRewriteRetriever),
    Compression(CompressionRetriever),
}

impl Retriever {
    pub fn kind(&self) -> RetrieverKind {
        match self {
            Self::Lexical(_) => RetrieverKind::Lexical,
            Self::Embedding(_) => RetrieverKind::Embedding,
            Self::QueryRewrite(_) => RetrieverKind::QueryRewrite,
            Self::Compression(_) => RetrieverKind::Compression,
        }
    }

    /// Up to `top_k` chunks for `query`, best first, ranked from 1.
    ///
    /// Query rewriting may return more than `top_k`: it merges the results
    /// of every variation.
    pub fn retrieve(
        &self,
        store: &DocumentStore,
        query: &str,
        top_k: usize,
    ) -> Result<Vec<RetrievalResult>> {
        validate_top_k(top_k)?;
        match self {
            Self::Lexical(r) => r.retrieve(store, query, top_k),
            Self::Embedding(r) => r.retrieve(store, query, top_k),
            Self::QueryRewrite(r) => r.retrieve(store, query, top_k),
            Self::Compression(r) => r.retrieve(store, query, top_k),
        }
    }
}

impl std::fmt::Debug for Retriever {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Lexical(r) => r.fmt(f),
            Self::Embedding(r) => r.fmt(f),
            Self::QueryRewrite(r) => r.fmt(f),
            Self::Compression(r) => r.fmt(f),
        }
    }
}

impl From<LexicalRetriever> for Retriever {
    fn from(r: LexicalRetriever) -> Self {
        Self::Lexical(r)
    }
}

impl From<EmbeddingRetriever> for Retriever {
    fn from(r: EmbeddingRetriever) -> Self {
        Self::Embedding(r)
    }
}

impl From<QueryRewriteRetriever> for Retriever {
    fn from(r: QueryRewriteRetriever) -> Self {
        Self::QueryRewrite(r)
    }
}

impl From<CompressionRetriever> for Retriever {
    fn from(r: CompressionRetriever) -> Self {
        Self::Compression(r)
    }
}

/// Reassign 1-based ranks in list order.
fn rerank(results: &mut [RetrievalResult]) {
    for (i, r) in results.iter_mut().enumerate() {
        r.rank = i + 1;
    }
}

/// Store search with query expansion and substring counting.
#[derive(Debug, Clone)]
pub struct LexicalRetriever {
    scorer: LexicalScorer,
    threshold: f32,
}

impl LexicalRetriever {
    pub fn new(threshold: f32) -> Result<Self> {
        Self::with_scorer(LexicalScorer::default(), threshold)
    }

    pub fn with_scorer(scorer: LexicalScorer, threshold: f32) -> Result<Self> {
        validate_threshold(threshold)?;
        Ok(Self { scorer, threshold })
    }

    fn retrieve(
        &self,
        store: &DocumentStore,
        query: &str,
        top_k: usize,
    ) -> Result<Vec<RetrievalResult>> {
        store.search_with(&self.scorer, query, top_k, self.threshold)
    }
}

/// Nearest neighbours from an external vector index, resolved against the
/// store.
///
/// Index hits whose chunk is no longer stored are skipped. With a lexical
/// fallback configured, an upstream failure is retried lexically.
pub struct EmbeddingRetriever {
    embedder: Arc<dyn Embedder>,
    index: Arc<dyn VectorIndex>,
    fallback: Option<LexicalRetriever>,
}

impl EmbeddingRetriever {
    pub fn new(
        embedder: Arc<dyn Embedder>,
        index: Arc<dyn VectorIndex>,
    ) -> Self {
        Self {
            embedder,
            index,
            fallback: None,
        }
    }

    pub fn with_fallback(mut self, fallback: LexicalRetriever) -> Self {
        self.fallback = Some(fallback);
        self
    }

    fn retrieve(
        &self,
        store: &DocumentStore,
        query: &str,
        top_k: usize,
    ) -> Result<Vec<RetrievalResult>> {
        let primary = self.semantic(store, query, top_k);
        match &self.fallback {
            Some(lexical) => {
                with_fallback(primary, || lexical.retrieve(store, query, top_k))
            }
            None => primary,
        }
    }

    fn semantic(
        &self,
        store: &DocumentStore,
        query: &str,
        top_k: usize,
    ) -> Result<Vec<RetrievalResult>> {
        let vector = self.embedder.embed(query)?;
        let hits = self.index.similarity_search(&vector, top_k)?;

        let mut results = Vec::with_capacity(hits.len());
        for (id, score) in hits.into_iter().take(top_k) {
            let Some(chunk) = store.get(&id) else {
                tracing::warn!(%id, "vector index returned an unknown chunk");
                continue;
            };
            let score = if score.is_nan() {
                0.0
            } else {
                score.clamp(0.0, 1.0)
            };
            results.push(RetrievalResult::new(chunk.clone(), score, 0));
        }
        rerank(&mut results);
        Ok(results)
    }
}

impl std::fmt::Debug for EmbeddingRetriever {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EmbeddingRetriever")
            .field("fallback", &self.fallback.is_some())
            .finish_non_exhaustive()
    }
}

/// Runs the question and up to three generated paraphrases through an inner
/// retriever and merges the results, first occurrence wins.
pub struct QueryRewriteRetriever {
    generator: Arc<dyn Generator>,
    inner: Box<Retriever>,
}

impl QueryRewriteRetriever {
    pub fn new(generator: Arc<dyn Generator>, inner: Retriever) -> Self {
        Self {
            generator,
            inner: Box::new(inner),
        }
    }

    /// The original question followed by its generated paraphrases.
    ///
    /// Never fails: a generation error yields just the original question.
    pub fn variations(&self, question: &str) -> Vec<String> {
        match self.generator.generate(&rewrite_prompt(question)) {
            Ok(response) => parse_variations(question, &response),
            Err(e) => {
                tracing::warn!(
                    error = %e,
                    "query rewrite failed, using original question"
                );
                vec![question.to_string()]
            }
        }
    }

    fn retrieve(
        &self,
        store: &DocumentStore,
        query: &str,
        top_k: usize,
    ) -> Result<Vec<RetrievalResult>> {
        let variations = self.variations(query);
        tracing::debug!(?variations, "query variations");

        let mut seen: HashSet<ChunkId> = HashSet::new();
        let mut merged = Vec::new();
        let mut first_error = None;
        let mut succeeded = 0;

        for variation in &variations {
            match self.inner.retrieve(store, variation, top_k) {
                Ok(results) => {
                    succeeded += 1;
                    merged.extend(
                        results
                            .into_iter()
                            .filter(|r| seen.insert(r.chunk.id.clone())),
                    );
                }
                Err(e) => {
                    tracing::warn!(
                        %variation,
                        error = %e,
                        "variation retrieval failed"
                    );
                    first_error.get_or_insert(e);
                }
            }
        }

        if succeeded == 0
            && let Some(e) = first_error
        {
            return Err(e);
        }
        rerank(&mut merged);
        Ok(merged)
    }
}

impl std::fmt::Debug for QueryRewriteRetriever {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryRewriteRetriever")
            .field("inner", &self.inner)
            .finish_non_exhaustive()
    }
}

pub fn rewrite_prompt(question: &str) -> String {
    format!(
        "Given the following question about research papers, generate 3 \
         different ways to ask the same question to improve search results. \
         Focus on different aspects, synonyms, and related concepts.\n\n\
         Original question: {question}\n\n\
         Answer with exactly 3 numbered lines:\n\
         1. ...\n2. ...\n3. ..."
    )
}

/// Parse a paraphrase response into the variation list.
///
/// Lines numbered `1.` to `3.` (or `1)` to `3)`) are kept, minus any that
/// repeat the question. The question always comes first and the list holds
/// at most [`MAX_QUERY_VARIATIONS`] entries.
///
/// # Examples
///
/// ```
/// use docrag::retriever::parse_variations;
///
/// let response = "1. What is self-attention?\n2) How does attention work?";
/// assert_eq!(
///     parse_variations("attention", response),
///     vec![
///         "attention",
///         "What is self-attention?",
///         "How does attention work?",
///     ]
/// );
/// assert_eq!(
///     parse_variations("attention", "no list here"),
///     vec!["attention"]
/// );
/// ```
pub fn parse_variations(question: &str, response: &str) -> Vec<String> {
    let mut variations = vec![question.to_string()];
    for line in response.lines() {
        if variations.len() >= MAX_QUERY_VARIATIONS {
            break;
        }
        let line = line.trim();
        let mut chars = line.chars();
        let (Some('1'..='3'), Some('.' | ')')) = (chars.next(), chars.next())
        else {
            continue;
        };
        let variation = chars.as_str().trim();
        if !variation.is_empty() && variation != question.trim() {
            variations.push(variation.to_string());
        }
    }
    variations
}

/// Shrinks each candidate from an inner retriever to its query-relevant
/// span with one generation call per chunk.
///
/// Candidates whose extraction comes back empty or [`NO_OUTPUT`] are
/// dropped. A failed extraction keeps the chunk whole.
pub struct CompressionRetriever {
    generator: Arc<dyn Generator>,
    inner: Box<Retriever>,
    fetch_multiplier: usize,
}

impl CompressionRetriever {
    pub fn new(
        generator: Arc<dyn Generator>,
        inner: Retriever,
        fetch_multiplier: usize,
    ) -> Result<Self> {
        if fetch_multiplier == 0 {
            return Err(Error::validation(
                "compression fetch multiplier must be greater than 0",
            ));
        }
        Ok(Self {
            generator,
            inner: Box::new(inner),
            fetch_multiplier,
        })
    }

    fn retrieve(
        &self,
        store: &DocumentStore,
        query: &str,
        top_k: usize,
    ) -> Result<Vec<RetrievalResult>> {
        let fetch = top_k.saturating_mul(self.fetch_multiplier);
        let candidates = self.inner.retrieve(store, query, fetch)?;
        let fetched = candidates.len();

        let mut compressed: Vec<RetrievalResult> = candidates
            .into_par_iter()
            .filter_map(|candidate| self.compress(query, candidate))
            .collect();
        compressed.truncate(top_k);
        rerank(&mut compressed);

        tracing::debug!(
            fetched,
            kept = compressed.len(),
            "compressed candidates"
        );
        Ok(compressed)
    }

    fn compress(
        &self,
        query: &str,
        mut candidate: RetrievalResult,
    ) -> Option<RetrievalResult> {
        let prompt = compression_prompt(query, &candidate.chunk.text);
        match self.generator.generate(&prompt) {
            Ok(answer) => {
                let answer = answer.trim();
                if answer.is_empty() || answer == NO_OUTPUT {
                    return None;
                }
                candidate.excerpt = Some(answer.to_string());
                Some(candidate)
            }
            Err(e) => {
                tracing::warn!(
                    id = %candidate.chunk.id,
                    error = %e,
                    "compression failed, keeping whole chunk"
                );
                Some(candidate)
            }
        }
    }
}

impl std::fmt::Debug for CompressionRetriever {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompressionRetriever")
            .field("inner", &self.inner)
            .field("fetch_multiplier", &self.fetch_multiplier)
            .finish_non_exhaustive()
    }
}

pub fn compression_prompt(question: &str, context: &str) -> String {
    format!(
        "Given the following question and context, extract only the relevant \
         information that helps answer the question. If none of the context \
         is relevant, answer {NO_OUTPUT}.\n\n\
         Question: {question}\n\n\
         Context: {context}\n\n\
         Relevant information:"
    )
}
