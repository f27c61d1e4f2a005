//! Priority-ordered combination of several retrievers.
//!
//! Members run independently (in parallel) and their lists are
//! concatenated in member order: the whole list of the first member comes
//! before anything from the second. Later copies of a chunk, by id or by
//! content, are dropped and the combined list keeps `2 * top_k` entries.

use std::collections::HashSet;

use rayon::prelude::*;
use serde::Serialize;

use crate::{
    config::validate_top_k,
    error::{Error, ErrorReport, Result},
    record::{ChunkId, ContentHash, RetrievalResult},
    retriever::{Retriever, RetrieverKind},
    store::DocumentStore,
};

#[derive(Debug)]
pub struct Ensemble {
    members: Vec<Retriever>,
}

/// A member that failed during one ensemble call.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MemberFailure {
    pub retriever: RetrieverKind,
    /// Position of the member in priority order.
    pub position: usize,
    pub error: ErrorReport,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct EnsembleOutcome {
    pub results: Vec<RetrievalResult>,
    pub failures: Vec<MemberFailure>,
    pub total_members: usize,
}

impl EnsembleOutcome {
    /// `Some` when at least one member failed while others succeeded.
    pub fn partial_failure(&self) -> Option<Error> {
        if self.failures.is_empty() {
            return None;
        }
        Some(Error::PartialRetrieval {
            failed: self.failures.len(),
            total: self.total_members,
        })
    }
}

impl Ensemble {
    /// Members are given in priority order. At least one is required.
    pub fn new(members: Vec<Retriever>) -> Result<Self> {
        if members.is_empty() {
            return Err(Error::validation(
                "an ensemble needs at least one retriever",
            ));
        }
        Ok(Self { members })
    }

    pub fn kinds(&self) -> Vec<RetrieverKind> {
        self.members.iter().map(Retriever::kind).collect()
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Run every member and combine their results.
    ///
    /// A failing member contributes nothing and is reported in
    /// [`EnsembleOutcome::failures`]. Only when every member fails is an
    /// error returned: the error of the highest-priority member.
    ///
    /// With a single member, its output is returned as is.
    pub fn retrieve(
        &self,
        store: &DocumentStore,
        query: &str,
        top_k: usize,
    ) -> Result<EnsembleOutcome> {
        validate_top_k(top_k)?;

        if let [only] = self.members.as_slice() {
            return Ok(EnsembleOutcome {
                results: only.retrieve(store, query, top_k)?,
                failures: Vec::new(),
                total_members: 1,
            });
        }

        // Ordered collect: priority order regardless of completion order.
        let outputs: Vec<Result<Vec<RetrievalResult>>> = self
            .members
            .par_iter()
            .map(|member| member.retrieve(store, query, top_k))
            .collect();

        let mut lists = Vec::with_capacity(outputs.len());
        let mut failures = Vec::new();
        let mut first_error = None;
        for (position, (member, output)) in
            self.members.iter().zip(outputs).enumerate()
        {
            match output {
                Ok(results) => lists.push(results),
                Err(e) => {
                    tracing::warn!(
                        retriever = ?member.kind(),
                        position,
                        error = %e,
                        "retriever failed, continuing without it"
                    );
                    failures.push(MemberFailure {
                        retriever: member.kind(),
                        position,
                        error: e.report(),
                    });
                    first_error.get_or_insert(e);
                }
            }
        }

        if lists.is_empty()
            && let Some(e) = first_error
        {
            tracing::error!(
                members = self.members.len(),
                "every retriever failed"
            );
            return Err(e);
        }

        let results = combine(lists, top_k);
        tracing::debug!(
            results = results.len(),
            failed = failures.len(),
            "ensemble retrieval"
        );
        Ok(EnsembleOutcome {
            results,
            failures,
            total_members: self.members.len(),
        })
    }
}

/// Concatenate ranked lists in the given order, drop repeated chunks and
/// keep the first `2 * top_k`.
///
/// A result repeats an earlier one when it has the same chunk id or
/// contributes the same text.
pub fn combine(
    lists: Vec<Vec<RetrievalResult>>,
    top_k: usize,
) -> Vec<RetrievalResult> {
    let limit = top_k.saturating_mul(2);
    let mut seen_ids: HashSet<ChunkId> = HashSet::new();
    let mut seen_content: HashSet<ContentHash> = HashSet::new();

    let mut combined: Vec<RetrievalResult> = Vec::new();
    for result in lists.into_iter().flatten() {
        if combined.len() == limit {
            break;
        }
        let new_id = !seen_ids.contains(&result.chunk.id);
        let new_content = !seen_content.contains(&result.content_hash());
        if new_id && new_content {
            seen_ids.insert(result.chunk.id.clone());
            seen_content.insert(result.content_hash());
            combined.push(result);
        }
    }

    for (i, r) in combined.iter_mut().enumerate() {
        r.rank = i + 1;
    }
    combined
}

#[cfg(test)]
mod tests {
    use std::{collections::BTreeMap, sync::Arc};

    use proptest::prelude::*;

    use super::*;
    use crate::{
        config::ChunkingConfig,
        error::ErrorKind,
        record::{ChunkRecord, NewDocument},
        retriever::{EmbeddingRetriever, LexicalRetriever},
        upstream::{Embedder, VectorIndex},
    };

    fn result(doc: &str, index: usize, text: &str) -> RetrievalResult {
        let record = ChunkRecord {
            id: ChunkId::new(doc, index),
            text: text.to_string(),
            source_document_id: doc.to_string(),
            source_path: String::new(),
            chunk_index: index,
            total_chunks_in_document: index + 1,
            char_length: text.chars().count(),
            extraction_method: "unknown".to_string(),
            extra_metadata: BTreeMap::new(),
            created_at: 0,
        };
        RetrievalResult::new(record, 0.5, 1)
    }

    fn ids(results: &[RetrievalResult]) -> Vec<&str> {
        results.iter().map(|r| r.chunk.id.as_str()).collect()
    }

    fn test_store() -> (tempfile::TempDir, DocumentStore) {
        let tmp = tempfile::tempdir().unwrap();
        let mut store = DocumentStore::open_lexical(
            &tmp.path().join("chunks.redb"),
            ChunkingConfig::default(),
        )
        .unwrap();
        store
            .add(&[
                NewDocument::new("attn", "Self-attention relates positions."),
                NewDocument::new("food", "Unrelated text about cooking."),
            ])
            .unwrap();
        (tmp, store)
    }

    struct DownEmbedder;

    impl Embedder for DownEmbedder {
        fn embed(&self, _text: &str) -> Result<Vec<f32>> {
            Err(Error::upstream("embedding service unavailable"))
        }
    }

    struct EmptyIndex;

    impl VectorIndex for EmptyIndex {
        fn similarity_search(
            &self,
            _vector: &[f32],
            _top_k: usize,
        ) -> Result<Vec<(ChunkId, f32)>> {
            Ok(Vec::new())
        }
    }

    fn failing() -> Retriever {
        EmbeddingRetriever::new(Arc::new(DownEmbedder), Arc::new(EmptyIndex))
            .into()
    }

    fn lexical(threshold: f32) -> Retriever {
        LexicalRetriever::new(threshold).unwrap().into()
    }

    #[test]
    fn combine_is_priority_ordered() {
        let a = vec![result("a", 0, "alpha"), result("a", 1, "beta")];
        let b = vec![result("b", 0, "gamma"), result("a", 0, "alpha")];
        let combined = combine(vec![b, a], 5);
        assert_eq!(ids(&combined), vec!["b_0", "a_0", "a_1"]);
        assert_eq!(combined[2].rank, 3);
    }

    #[test]
    fn combine_drops_same_content_under_other_ids() {
        let a = vec![result("a", 0, "shared text")];
        let b = vec![result("b", 0, "shared text"), result("b", 1, "own text")];
        let combined = combine(vec![a, b], 5);
        assert_eq!(ids(&combined), vec!["a_0", "b_1"]);
    }

    #[test]
    fn combine_keeps_twice_top_k() {
        let list: Vec<RetrievalResult> =
            (0..10).map(|i| result("d", i, &format!("text {i}"))).collect();
        assert_eq!(combine(vec![list], 3).len(), 6);
    }

    #[test]
    fn empty_ensemble_is_rejected() {
        let err = Ensemble::new(Vec::new()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
    }

    #[test]
    fn single_member_output_is_unchanged() {
        let (_tmp, store) = test_store();
        let ensemble = Ensemble::new(vec![lexical(0.0)]).unwrap();
        let outcome = ensemble.retrieve(&store, "attention", 1).unwrap();
        let direct = lexical(0.0).retrieve(&store, "attention", 1).unwrap();
        assert_eq!(outcome.results, direct);
        assert!(outcome.partial_failure().is_none());

        let err = Ensemble::new(vec![failing()])
            .unwrap()
            .retrieve(&store, "attention", 1)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Upstream);
    }

    #[test]
    fn failed_member_is_reported_not_fatal() {
        let (_tmp, store) = test_store();
        let ensemble = Ensemble::new(vec![failing(), lexical(0.5)]).unwrap();
        let outcome = ensemble.retrieve(&store, "attention", 3).unwrap();

        assert_eq!(ids(&outcome.results), vec!["attn_0"]);
        assert_eq!(outcome.failures.len(), 1);
        assert_eq!(outcome.failures[0].retriever, RetrieverKind::Embedding);
        assert_eq!(outcome.failures[0].position, 0);
        assert_eq!(
            outcome.partial_failure().unwrap().kind(),
            ErrorKind::PartialRetrievalFailure
        );
    }

    #[test]
    fn all_members_failing_is_an_error() {
        let (_tmp, store) = test_store();
        let ensemble = Ensemble::new(vec![failing(), failing()]).unwrap();
        let err = ensemble.retrieve(&store, "attention", 3).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Upstream);
    }

    #[test]
    fn overlapping_members_yield_each_chunk_once() {
        let (_tmp, store) = test_store();
        let ensemble =
            Ensemble::new(vec![lexical(0.0), lexical(0.0), lexical(0.5)])
                .unwrap();
        assert_eq!(
            ensemble.kinds(),
            vec![RetrieverKind::Lexical; 3]
        );
        let outcome = ensemble.retrieve(&store, "attention", 5).unwrap();
        assert_eq!(ids(&outcome.results), vec!["attn_0", "food_0"]);
    }

    proptest! {
        #[test]
        fn combined_ids_are_unique(
            lists in prop::collection::vec(
                prop::collection::vec((0usize..4, 0usize..4), 0..8),
                1..4,
            ),
            top_k in 1usize..6,
        ) {
            let lists: Vec<Vec<RetrievalResult>> = lists
                .into_iter()
                .map(|list| {
                    list.into_iter()
                        .map(|(d, i)| {
                            result(&format!("d{d}"), i, &format!("t{d}-{i}"))
                        })
                        .collect()
                })
                .collect();
            let combined = combine(lists, top_k);

            prop_assert!(combined.len() <= 2 * top_k);
            let unique: HashSet<&str> = ids(&combined).into_iter().collect();
            prop_assert_eq!(unique.len(), combined.len());
            for (i, r) in combined.iter().enumerate() {
                prop_assert_eq!(r.rank, i + 1);
            }
        }
    }
}
