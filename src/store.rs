//! The document store: chunk records of every ingested document, kept in
//! insertion order and mirrored to a redb database.
//!
//! Every mutation runs as one redb write transaction. The in-memory
//! collection is replaced only after that transaction commits, so a failed
//! write leaves the store exactly as it was last persisted.
//!
//! Re-adding a document whose `file_name` is already stored replaces all of
//! its previous chunks.

use std::{
    collections::{BTreeMap, HashSet},
    path::Path,
};

use redb::{Database, ReadableDatabase, ReadableTable, TableDefinition};
use serde::Serialize;

use crate::{
    chunking::chunk_with,
    config::{ChunkingConfig, validate_threshold, validate_top_k},
    error::{Error, Result},
    lexical::LexicalScorer,
    record::{
        ChunkId,
        ChunkRecord,
        NewDocument,
        RetrievalResult,
        UNKNOWN_EXTRACTION_METHOD,
        unix_now,
    },
    scorer::{Scorer, ScorerKind},
};

/// Insertion sequence -> JSON-encoded [`ChunkRecord`].
const CHUNKS: TableDefinition<u64, &[u8]> = TableDefinition::new("chunks");

#[derive(Debug, Clone)]
struct StoredChunk {
    seq: u64,
    record: ChunkRecord,
}

/// Outcome of [`DocumentStore::add`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AddSummary {
    pub chunks_added: usize,
    pub documents_processed: usize,
    /// Documents without any text to chunk.
    pub documents_skipped: usize,
    /// Previously stored chunks dropped because their document was re-added.
    pub chunks_replaced: usize,
}

/// Outcome of [`DocumentStore::delete`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DeleteSummary {
    pub deleted_count: usize,
    /// Requested names that matched at least one chunk.
    pub deleted_documents: Vec<String>,
}

impl DeleteSummary {
    pub fn is_no_match(&self) -> bool {
        self.deleted_count == 0
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StoreStats {
    pub total_chunks: usize,
    pub unique_source_documents: usize,
    /// Source documents in first-insertion order.
    pub source_documents: Vec<String>,
    /// Per document, the `total_chunks_in_document` recorded on its chunks.
    pub chunks_per_document: BTreeMap<String, usize>,
    /// Sum of `total_chunks_in_document` over all stored chunks.
    pub estimated_total_chunks: usize,
}

pub struct DocumentStore {
    db: Database,
    chunks: Vec<StoredChunk>,
    next_seq: u64,
    chunking: ChunkingConfig,
    scorer: Box<dyn Scorer>,
}

impl DocumentStore {
    /// Open or create a store at `path`, loading every persisted chunk.
    ///
    /// Any read or decode failure is returned; a store is never opened with
    /// a partial view of its data.
    pub fn open(
        path: &Path,
        chunking: ChunkingConfig,
        scorer: Box<dyn Scorer>,
    ) -> Result<Self> {
        chunking.validate()?;
        let db = Database::create(path)?;
        let store = Self::from_database(db, chunking, scorer)?;
        tracing::debug!(
            path = %path.display(),
            chunks = store.len(),
            scorer = ?store.scorer_kind(),
            "opened document store"
        );
        Ok(store)
    }

    fn from_database(
        db: Database,
        chunking: ChunkingConfig,
        scorer: Box<dyn Scorer>,
    ) -> Result<Self> {
        let txn = db.begin_write()?;
        txn.open_table(CHUNKS)?;
        txn.commit()?;

        let chunks = Self::load(&db)?;
        let next_seq = chunks.last().map_or(0, |c| c.seq + 1);

        Ok(Self {
            db,
            chunks,
            next_seq,
            chunking,
            scorer,
        })
    }

    /// Open a store that scores with the default [`LexicalScorer`].
    ///
    /// # Examples
    ///
    /// ```
    /// # let tmp = tempfile::tempdir().unwrap();
    /// use docrag::{DocumentStore, NewDocument, config::ChunkingConfig};
    ///
    /// let mut store = DocumentStore::open_lexical(
    ///     &tmp.path().join("chunks.redb"),
    ///     ChunkingConfig::default(),
    /// )
    /// .unwrap();
    /// store
    ///     .add(&[NewDocument::new("notes.md", "Self-attention is neat.")])
    ///     .unwrap();
    /// let hits = store.search("attention", 5, 0.0).unwrap();
    /// assert_eq!(hits[0].chunk.source_document_id, "notes.md");
    /// ```
    pub fn open_lexical(path: &Path, chunking: ChunkingConfig) -> Result<Self> {
        Self::open(path, chunking, Box::new(LexicalScorer::default()))
    }

    fn load(db: &Database) -> Result<Vec<StoredChunk>> {
        let txn = db.begin_read()?;
        let table = txn.open_table(CHUNKS)?;
        let mut chunks = Vec::new();
        for entry in table.iter()? {
            let (k, v) = entry?;
            let record: ChunkRecord = serde_json::from_slice(v.value())?;
            chunks.push(StoredChunk {
                seq: k.value(),
                record,
            });
        }
        Ok(chunks)
    }

    /// Apply removals and inserts in a single transaction.
    fn persist(
        &self,
        removals: &[u64],
        inserts: &[(u64, Vec<u8>)],
    ) -> Result<()> {
        let txn = self.db.begin_write()?;
        {
            let mut table = txn.open_table(CHUNKS)?;
            for &seq in removals {
                table.remove(seq)?;
            }
            for (seq, bytes) in inserts {
                table.insert(*seq, bytes.as_slice())?;
            }
        }
        txn.commit()?;
        Ok(())
    }

    pub fn chunking(&self) -> &ChunkingConfig {
        &self.chunking
    }

    pub fn scorer_kind(&self) -> ScorerKind {
        self.scorer.kind()
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    /// All chunks in insertion order.
    pub fn list(&self) -> impl Iterator<Item = &ChunkRecord> {
        self.chunks.iter().map(|c| &c.record)
    }

    pub fn get(&self, id: &ChunkId) -> Option<&ChunkRecord> {
        self.list().find(|r| &r.id == id)
    }

    /// Chunks of one source document, in chunk order.
    pub fn document_chunks(
        &self,
        file_name: &str,
    ) -> Result<Vec<&ChunkRecord>> {
        let mut chunks: Vec<&ChunkRecord> = self
            .list()
            .filter(|r| r.source_document_id == file_name)
            .collect();
        if chunks.is_empty() {
            return Err(Error::NotFound {
                kind: "document",
                name: file_name.to_string(),
            });
        }
        chunks.sort_by_key(|r| r.chunk_index);
        Ok(chunks)
    }

    /// Source document names in first-insertion order.
    pub fn source_documents(&self) -> Vec<String> {
        let mut seen = HashSet::new();
        self.list()
            .filter(|r| seen.insert(r.source_document_id.as_str()))
            .map(|r| r.source_document_id.clone())
            .collect()
    }

    /// Chunk every document and append the chunks, replacing any chunks
    /// previously stored for the same `file_name`.
    ///
    /// Documents without text are skipped. Nothing changes, on disk or in
    /// memory, unless the whole batch is persisted.
    pub fn add(&mut self, documents: &[NewDocument]) -> Result<AddSummary> {
        if let Some(doc) =
            documents.iter().find(|d| d.file_name.trim().is_empty())
        {
            return Err(Error::validation(format!(
                "document without a file name ({} chars of text)",
                doc.text.chars().count()
            )));
        }

        let mut summary = AddSummary {
            documents_processed: documents.len(),
            ..AddSummary::default()
        };
        let mut pending: Vec<ChunkRecord> = Vec::new();

        for doc in documents {
            let pieces = chunk_with(&doc.text, &self.chunking)?;
            if pieces.is_empty() {
                tracing::debug!(
                    file = %doc.file_name,
                    "skipping empty document"
                );
                summary.documents_skipped += 1;
                continue;
            }

            // A later copy of the same document in one batch wins.
            pending.retain(|r| r.source_document_id != doc.file_name);

            let total = pieces.len();
            let created_at = unix_now();
            let extraction_method = doc
                .extraction_method
                .clone()
                .unwrap_or_else(|| UNKNOWN_EXTRACTION_METHOD.to_string());
            for (chunk_index, text) in pieces.into_iter().enumerate() {
                pending.push(ChunkRecord {
                    id: ChunkId::new(&doc.file_name, chunk_index),
                    char_length: text.chars().count(),
                    text,
                    source_document_id: doc.file_name.clone(),
                    source_path: doc.path.clone().unwrap_or_default(),
                    chunk_index,
                    total_chunks_in_document: total,
                    extraction_method: extraction_method.clone(),
                    extra_metadata: doc.metadata.clone(),
                    created_at,
                });
            }
        }

        if pending.is_empty() {
            return Ok(summary);
        }

        let incoming: HashSet<&str> = pending
            .iter()
            .map(|r| r.source_document_id.as_str())
            .collect();
        let (replaced, mut kept): (Vec<StoredChunk>, Vec<StoredChunk>) = self
            .chunks
            .iter()
            .cloned()
            .partition(|c| {
                incoming.contains(c.record.source_document_id.as_str())
            });

        let mut inserts = Vec::with_capacity(pending.len());
        let mut seq = self.next_seq;
        for record in pending {
            inserts.push((seq, serde_json::to_vec(&record)?));
            kept.push(StoredChunk { seq, record });
            seq += 1;
        }
        let removals: Vec<u64> = replaced.iter().map(|c| c.seq).collect();

        self.persist(&removals, &inserts)?;

        summary.chunks_added = inserts.len();
        summary.chunks_replaced = removals.len();
        self.chunks = kept;
        self.next_seq = seq;

        tracing::info!(
            chunks_added = summary.chunks_added,
            chunks_replaced = summary.chunks_replaced,
            documents = summary.documents_processed,
            "added documents to store"
        );
        Ok(summary)
    }

    /// Rank stored chunks against `query` with the store's active scorer.
    pub fn search(
        &self,
        query: &str,
        top_k: usize,
        threshold: f32,
    ) -> Result<Vec<RetrievalResult>> {
        self.search_with(self.scorer.as_ref(), query, top_k, threshold)
    }

    /// Rank stored chunks with an explicit scorer.
    ///
    /// Drops results scoring below `threshold`, returns at most `top_k`
    /// in descending score order; equal scores keep insertion order.
    pub fn search_with(
        &self,
        scorer: &dyn Scorer,
        query: &str,
        top_k: usize,
        threshold: f32,
    ) -> Result<Vec<RetrievalResult>> {
        validate_top_k(top_k)?;
        validate_threshold(threshold)?;
        if self.chunks.is_empty() {
            return Ok(Vec::new());
        }

        let texts: Vec<&str> =
            self.chunks.iter().map(|c| c.record.text.as_str()).collect();
        let scores = scorer.score_batch(query, &texts)?;
        if scores.len() != texts.len() {
            return Err(Error::upstream(format!(
                "{:?} scorer returned {} scores for {} chunks",
                scorer.kind(),
                scores.len(),
                texts.len()
            )));
        }

        let mut scored: Vec<(usize, f32)> = scores
            .into_iter()
            .enumerate()
            .filter(|(_, score)| !score.is_nan())
            .map(|(i, score)| (i, score.clamp(0.0, 1.0)))
            .filter(|(_, score)| *score >= threshold)
            .collect();

        // Stable sort, so ties stay in insertion order.
        scored.sort_by(|a, b| {
            b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal)
        });
        scored.truncate(top_k);

        let results: Vec<RetrievalResult> = scored
            .into_iter()
            .enumerate()
            .map(|(rank, (i, score))| {
                let record = self.chunks[i].record.clone();
                RetrievalResult::new(record, score, rank + 1)
            })
            .collect();

        tracing::debug!(
            query,
            results = results.len(),
            scorer = ?scorer.kind(),
            "store search"
        );
        Ok(results)
    }

    /// Remove every chunk belonging to one of `file_names`.
    ///
    /// Matching nothing is not an error: the summary reports zero deletions
    /// and nothing is written.
    pub fn delete<I, S>(&mut self, file_names: I) -> Result<DeleteSummary>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let names: HashSet<String> = file_names
            .into_iter()
            .map(|s| s.as_ref().to_string())
            .collect();

        let (removed, kept): (Vec<StoredChunk>, Vec<StoredChunk>) = self
            .chunks
            .iter()
            .cloned()
            .partition(|c| names.contains(&c.record.source_document_id));

        if removed.is_empty() {
            tracing::info!(?names, "no matching documents to delete");
            return Ok(DeleteSummary::default());
        }

        let removals: Vec<u64> = removed.iter().map(|c| c.seq).collect();
        self.persist(&removals, &[])?;

        let mut deleted_documents = Vec::new();
        for c in &removed {
            if !deleted_documents.contains(&c.record.source_document_id) {
                deleted_documents.push(c.record.source_document_id.clone());
            }
        }
        self.chunks = kept;

        tracing::info!(
            deleted = removals.len(),
            documents = ?deleted_documents,
            "deleted chunks"
        );
        Ok(DeleteSummary {
            deleted_count: removals.len(),
            deleted_documents,
        })
    }

    /// Remove every chunk.
    pub fn clear(&mut self) -> Result<()> {
        let removals: Vec<u64> = self.chunks.iter().map(|c| c.seq).collect();
        self.persist(&removals, &[])?;
        self.chunks.clear();
        tracing::info!(removed = removals.len(), "cleared document store");
        Ok(())
    }

    pub fn stats(&self) -> StoreStats {
        let source_documents = self.source_documents();
        let mut chunks_per_document = BTreeMap::new();
        let mut estimated_total_chunks = 0;
        for record in self.list() {
            chunks_per_document
                .entry(record.source_document_id.clone())
                .or_insert(record.total_chunks_in_document);
            estimated_total_chunks += record.total_chunks_in_document;
        }

        StoreStats {
            total_chunks: self.chunks.len(),
            unique_source_documents: source_documents.len(),
            source_documents,
            chunks_per_document,
            estimated_total_chunks,
        }
    }
}

impl std::fmt::Debug for DocumentStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DocumentStore")
            .field("chunks", &self.chunks.len())
            .field("scorer", &self.scorer.kind())
            .finish_non_exhaustive()
    }
}
