//! The retrieval system facade.
//!
//! [`RagSystem`] owns a [`DocumentStore`], an [`Ensemble`] and, optionally,
//! a local [`VectorDb`] kept in step with the store. Every operation returns
//! a [`Response`]: callers see a success flag, a machine-readable error kind
//! and warnings for degraded paths, never a bare [`Error`].

use std::{collections::HashSet, path::PathBuf, sync::Arc};

use serde::Serialize;

use crate::{
    config::RagConfig,
    context::{AssembledContext, assemble},
    data_dir::DataDir,
    ensemble::Ensemble,
    error::{Error, ErrorReport, Response, Result},
    ingestion::extract_all,
    record::{NewDocument, RetrievalResult},
    retriever::{LexicalRetriever, RetrieverKind},
    store::{AddSummary, DeleteSummary, DocumentStore, StoreStats},
    upstream::{Embedder, Extractor},
    vector_db::{VectorDb, index_chunks},
};

/// Embeds newly added chunks into a local vector database.
struct Indexer {
    embedder: Arc<dyn Embedder>,
    db: Arc<VectorDb>,
}

pub struct RagSystem {
    config: RagConfig,
    store: DocumentStore,
    ensemble: Ensemble,
    indexer: Option<Indexer>,
}

/// Outcome of [`RagSystem::ingest_paths`].
#[derive(Debug, Clone, Default, Serialize)]
pub struct IngestReport {
    pub summary: AddSummary,
    pub extracted: Vec<PathBuf>,
    pub failed: Vec<PathBuf>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SystemStats {
    pub config: RagConfig,
    pub retrievers: Vec<RetrieverKind>,
    pub vector_index: bool,
    pub store: StoreStats,
}

impl RagSystem {
    pub fn new(
        config: RagConfig,
        store: DocumentStore,
        ensemble: Ensemble,
    ) -> Result<Self> {
        config.validate()?;
        if store.chunking() != &config.chunking {
            tracing::warn!(
                store = ?store.chunking(),
                config = ?config.chunking,
                "store chunking differs from configuration"
            );
        }
        Ok(Self {
            config,
            store,
            ensemble,
            indexer: None,
        })
    }

    /// Store under `data_dir`, queried by one lexical retriever.
    pub fn open_lexical(data_dir: &DataDir, config: RagConfig) -> Result<Self> {
        config.validate()?;
        let store =
            DocumentStore::open_lexical(&data_dir.store_db(), config.chunking)?;
        let lexical = LexicalRetriever::new(config.similarity_threshold)?;
        let ensemble = Ensemble::new(vec![lexical.into()])?;
        Self::new(config, store, ensemble)
    }

    /// Embed the chunks of every ingested document into `db`, and drop the
    /// vectors of deleted chunks.
    pub fn with_vector_index(
        mut self,
        embedder: Arc<dyn Embedder>,
        db: Arc<VectorDb>,
    ) -> Self {
        self.indexer = Some(Indexer { embedder, db });
        self
    }

    pub fn config(&self) -> &RagConfig {
        &self.config
    }

    pub fn store(&self) -> &DocumentStore {
        &self.store
    }

    /// Chunk and store `documents`.
    ///
    /// A vector indexing failure after the store commit is reported as a
    /// warning: the chunks stay stored and remain reachable lexically.
    pub fn ingest(
        &mut self,
        documents: &[NewDocument],
    ) -> Response<AddSummary> {
        let summary = match self.store.add(documents) {
            Ok(summary) => summary,
            Err(e) => return Response::failed(&e),
        };

        let mut response = Response::ok(summary.clone());
        if summary.chunks_added > 0
            && let Err(e) = self.sync_vectors(documents)
        {
            tracing::warn!(error = %e, "vector indexing failed");
            response = response.with_warning(e.report());
        }
        response
    }

    fn sync_vectors(&self, documents: &[NewDocument]) -> Result<()> {
        let Some(indexer) = &self.indexer else {
            return Ok(());
        };
        let names: HashSet<&str> =
            documents.iter().map(|d| d.file_name.as_str()).collect();
        let chunks = self
            .store
            .list()
            .filter(|c| names.contains(c.source_document_id.as_str()));
        index_chunks(indexer.embedder.as_ref(), &indexer.db, chunks)?;
        self.prune_vectors()
    }

    fn prune_vectors(&self) -> Result<()> {
        let Some(indexer) = &self.indexer else {
            return Ok(());
        };
        let live = self.store.list().map(|c| c.id.clone()).collect();
        indexer.db.prune(&live)?;
        Ok(())
    }

    /// Extract every path with `extractor` and ingest what succeeded.
    ///
    /// Extraction failures become warnings. The call fails only when
    /// nothing could be extracted or the store write fails.
    pub fn ingest_paths(
        &mut self,
        extractor: &dyn Extractor,
        paths: &[PathBuf],
    ) -> Response<IngestReport> {
        let mut report = IngestReport::default();
        let mut documents = Vec::new();
        let mut warnings = Vec::new();
        let mut first_error = None;

        for (path, extracted) in extract_all(extractor, paths) {
            match extracted {
                Ok(doc) => {
                    report.extracted.push(path);
                    documents.push(doc);
                }
                Err(e) => {
                    tracing::warn!(
                        path = %path.display(),
                        error = %e,
                        "extraction failed"
                    );
                    warnings.push(ErrorReport {
                        kind: e.kind(),
                        message: format!("{}: {e}", path.display()),
                    });
                    report.failed.push(path);
                    first_error.get_or_insert(e);
                }
            }
        }

        if documents.is_empty()
            && let Some(e) = first_error
        {
            let mut response = Response::failed(&e);
            response.warnings = warnings;
            return response;
        }

        let ingested = self.ingest(&documents);
        let mut response = match ingested.data {
            Some(summary) => {
                report.summary = summary;
                Response::ok(report)
            }
            None => Response {
                success: false,
                data: None,
                error: ingested.error,
                warnings: Vec::new(),
            },
        };
        response.warnings = warnings;
        response.warnings.extend(ingested.warnings);
        response
    }

    /// Direct store search with the configured threshold.
    pub fn search(
        &self,
        query: &str,
        top_k: Option<usize>,
    ) -> Response<Vec<RetrievalResult>> {
        self.store
            .search(
                query,
                top_k.unwrap_or(self.config.top_k),
                self.config.similarity_threshold,
            )
            .into()
    }

    /// Ensemble retrieval: up to `2 * top_k` deduplicated chunks.
    ///
    /// Members that failed are listed as warnings, preceded by a
    /// partial-retrieval warning.
    pub fn retrieve(&self, query: &str) -> Response<Vec<RetrievalResult>> {
        let top_k = self.config.top_k;
        let outcome = match self.ensemble.retrieve(&self.store, query, top_k) {
            Ok(outcome) => outcome,
            Err(e) => return Response::failed(&e),
        };

        let mut response = Response::ok(Vec::new());
        if let Some(partial) = outcome.partial_failure() {
            response = response.with_warning(partial.report());
        }
        for failure in outcome.failures {
            response = response.with_warning(failure.error);
        }
        response.data = Some(outcome.results);
        response
    }

    /// Retrieve and assemble the generation context for `query`.
    ///
    /// Finding nothing relevant is reported as `NotFound`.
    pub fn context(&self, query: &str) -> Response<AssembledContext> {
        let retrieved = self.retrieve(query);
        let Some(results) = retrieved.data else {
            return Response {
                success: false,
                data: None,
                error: retrieved.error,
                warnings: retrieved.warnings,
            };
        };

        let mut response = if results.is_empty() {
            Response::failed(&Error::NotFound {
                kind: "relevant documents for query",
                name: query.to_string(),
            })
        } else {
            Response::ok(assemble(&results))
        };
        response.warnings = retrieved.warnings;
        response
    }

    /// Delete every chunk of the named documents.
    ///
    /// Matching nothing succeeds with a `NotFound` warning.
    pub fn delete(&mut self, file_names: &[String]) -> Response<DeleteSummary> {
        let summary = match self.store.delete(file_names) {
            Ok(summary) => summary,
            Err(e) => return Response::failed(&e),
        };

        let mut response = Response::ok(summary.clone());
        if summary.is_no_match() {
            let e = Error::NotFound {
                kind: "document",
                name: file_names.join(", "),
            };
            return response.with_warning(e.report());
        }
        if let Err(e) = self.prune_vectors() {
            tracing::warn!(error = %e, "vector pruning failed");
            response = response.with_warning(e.report());
        }
        response
    }

    pub fn clear(&mut self) -> Response<()> {
        if let Err(e) = self.store.clear() {
            return Response::failed(&e);
        }
        let mut response = Response::ok(());
        if let Err(e) = self.prune_vectors() {
            tracing::warn!(error = %e, "vector pruning failed");
            response = response.with_warning(e.report());
        }
        response
    }

    pub fn stats(&self) -> Response<StoreStats> {
        Response::ok(self.store.stats())
    }

    pub fn system_stats(&self) -> Response<SystemStats> {
        Response::ok(SystemStats {
            config: self.config,
            retrievers: self.ensemble.kinds(),
            vector_index: self.indexer.is_some(),
            store: self.store.stats(),
        })
    }
}

impl std::fmt::Debug for RagSystem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RagSystem")
            .field("config", &self.config)
            .field("store", &self.store)
            .field("ensemble", &self.ensemble)
            .field("vector_index", &self.indexer.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::ChunkingConfig,
        error::ErrorKind,
        ingestion::PlainTextExtractor,
        record::ChunkId,
        retriever::EmbeddingRetriever,
    };

    fn config(threshold: f32) -> RagConfig {
        RagConfig {
            chunking: ChunkingConfig {
                chunk_size: 45,
                overlap: 0,
                sentence_margin: 10,
            },
            top_k: 2,
            similarity_threshold: threshold,
            ..RagConfig::default()
        }
    }

    fn test_system(threshold: f32) -> (tempfile::TempDir, RagSystem) {
        let tmp = tempfile::tempdir().unwrap();
        let data_dir = DataDir::resolve(Some(tmp.path())).unwrap();
        let system =
            RagSystem::open_lexical(&data_dir, config(threshold)).unwrap();
        (tmp, system)
    }

    fn documents() -> Vec<NewDocument> {
        vec![
            NewDocument::new(
                "doc1",
                "Attention mechanisms improve translation. \
                 The model uses self-attention.",
            ),
            NewDocument::new("doc2", "Unrelated text about cooking."),
        ]
    }

    /// Counts of 'a', 't' and 'k'.
    struct LetterEmbedder;

    impl Embedder for LetterEmbedder {
        fn embed(&self, text: &str) -> Result<Vec<f32>> {
            let lower = text.to_lowercase();
            Ok(['a', 't', 'k']
                .iter()
                .map(|c| lower.matches(*c).count() as f32)
                .collect())
        }
    }

    struct DownEmbedder;

    impl Embedder for DownEmbedder {
        fn embed(&self, _text: &str) -> Result<Vec<f32>> {
            Err(Error::upstream("embedding service unavailable"))
        }
    }

    #[test]
    fn ingest_then_retrieve_and_assemble() {
        let (_tmp, mut system) = test_system(0.5);
        let added = system.ingest(&documents());
        assert!(added.success);
        assert_eq!(added.data.unwrap().chunks_added, 3);

        let retrieved = system.retrieve("attention");
        assert!(retrieved.success);
        assert!(retrieved.warnings.is_empty());
        let results = retrieved.data.unwrap();
        assert_eq!(results.len(), 2);
        assert!(results.iter().all(|r| r.chunk.source_document_id == "doc1"));

        let context = system.context("attention").data.unwrap();
        assert_eq!(
            context.text,
            "Attention mechanisms improve translation.\n\n---\n\n\
             The model uses self-attention."
        );
        assert_eq!(context.sources.len(), 2);
    }

    #[test]
    fn context_without_matches_is_not_found() {
        let (_tmp, mut system) = test_system(0.5);
        system.ingest(&documents());
        let response = system.context("quantum chromodynamics");
        assert!(!response.success);
        assert_eq!(response.error_kind(), Some(ErrorKind::NotFound));
    }

    #[test]
    fn invalid_input_is_a_failed_response() {
        let (_tmp, mut system) = test_system(0.5);
        let response = system.ingest(&[NewDocument::new("", "orphan text")]);
        assert!(!response.success);
        assert_eq!(response.error_kind(), Some(ErrorKind::Validation));

        let response = system.search("attention", Some(0));
        assert_eq!(response.error_kind(), Some(ErrorKind::Validation));
    }

    #[test]
    fn delete_reports_no_match_as_warning() {
        let (_tmp, mut system) = test_system(0.5);
        system.ingest(&documents());

        let response = system.delete(&["ghost".to_string()]);
        assert!(response.success);
        assert!(response.data.unwrap().is_no_match());
        assert_eq!(response.warnings[0].kind, ErrorKind::NotFound);

        let response = system.delete(&["doc1".to_string()]);
        assert_eq!(response.data.unwrap().deleted_count, 2);
        assert_eq!(system.stats().data.unwrap().total_chunks, 1);

        assert!(system.clear().success);
        assert_eq!(system.stats().data.unwrap().total_chunks, 0);
    }

    #[test]
    fn ingest_paths_skips_failed_extractions() {
        let (tmp, mut system) = test_system(0.5);
        let good = tmp.path().join("notes.md");
        std::fs::write(&good, "# Notes\n\nSelf-attention notes.").unwrap();
        let missing = tmp.path().join("missing.md");

        let paths = [missing.clone(), good.clone()];
        let response = system.ingest_paths(&PlainTextExtractor, &paths);
        assert!(response.success);
        assert_eq!(response.warnings.len(), 1);
        assert_eq!(response.warnings[0].kind, ErrorKind::StorageIo);
        let report = response.data.unwrap();
        assert_eq!(report.extracted, vec![good]);
        assert_eq!(report.failed, vec![missing.clone()]);
        assert!(report.summary.chunks_added >= 1);

        let response = system.ingest_paths(&PlainTextExtractor, &[missing]);
        assert!(!response.success);
        assert_eq!(response.error_kind(), Some(ErrorKind::StorageIo));
    }

    #[test]
    fn vector_index_follows_store_mutations() {
        let tmp = tempfile::tempdir().unwrap();
        let data_dir = DataDir::resolve(Some(tmp.path())).unwrap();
        let db = Arc::new(VectorDb::open(&data_dir.vectors_db()).unwrap());
        let mut system = RagSystem::open_lexical(&data_dir, config(0.5))
            .unwrap()
            .with_vector_index(Arc::new(LetterEmbedder), db.clone());

        system.ingest(&documents());
        assert_eq!(db.list_ids().unwrap().len(), 3);

        system.delete(&["doc1".to_string()]);
        assert_eq!(db.list_ids().unwrap(), vec![ChunkId::new("doc2", 0)]);

        system.clear();
        assert!(db.list_ids().unwrap().is_empty());
        assert!(system.system_stats().data.unwrap().vector_index);
    }

    #[test]
    fn indexing_failure_keeps_chunks_and_warns() {
        let tmp = tempfile::tempdir().unwrap();
        let data_dir = DataDir::resolve(Some(tmp.path())).unwrap();
        let db = Arc::new(VectorDb::open(&data_dir.vectors_db()).unwrap());
        let mut system = RagSystem::open_lexical(&data_dir, config(0.5))
            .unwrap()
            .with_vector_index(Arc::new(DownEmbedder), db);

        let response = system.ingest(&documents());
        assert!(response.success);
        assert_eq!(response.warnings[0].kind, ErrorKind::Upstream);
        assert_eq!(system.stats().data.unwrap().total_chunks, 3);
    }

    #[test]
    fn partial_failure_surfaces_as_warnings() {
        let tmp = tempfile::tempdir().unwrap();
        let data_dir = DataDir::resolve(Some(tmp.path())).unwrap();
        let cfg = config(0.5);
        let store =
            DocumentStore::open_lexical(&data_dir.store_db(), cfg.chunking)
                .unwrap();
        let db = Arc::new(VectorDb::open(&data_dir.vectors_db()).unwrap());
        let ensemble = Ensemble::new(vec![
            EmbeddingRetriever::new(Arc::new(DownEmbedder), db).into(),
            LexicalRetriever::new(0.5).unwrap().into(),
        ])
        .unwrap();
        let mut system = RagSystem::new(cfg, store, ensemble).unwrap();
        system.ingest(&documents());

        let response = system.retrieve("attention");
        assert!(response.success);
        assert_eq!(response.data.unwrap().len(), 2);
        let kinds: Vec<ErrorKind> =
            response.warnings.iter().map(|w| w.kind).collect();
        assert_eq!(
            kinds,
            vec![ErrorKind::PartialRetrievalFailure, ErrorKind::Upstream]
        );

        let stats = system.system_stats().data.unwrap();
        assert_eq!(
            stats.retrievers,
            vec![RetrieverKind::Embedding, RetrieverKind::Lexical]
        );
        assert!(!stats.vector_index);
    }
}
