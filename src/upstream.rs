//! Interfaces of the external collaborators the retrieval core calls into.
//!
//! Implementations live outside this crate (model clients, PDF extractors,
//! hosted vector indexes). They report their own failures as
//! [`Error::Upstream`](crate::error::Error::Upstream).

use std::path::Path;

use crate::{
    error::Result,
    record::{ChunkId, NewDocument},
};

/// Text generation: `generate(prompt) -> text`.
pub trait Generator: Send + Sync {
    fn generate(&self, prompt: &str) -> Result<String>;
}

/// Text embedding: `embed(text) -> vector`.
pub trait Embedder: Send + Sync {
    fn embed(&self, text: &str) -> Result<Vec<f32>>;

    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        texts.iter().map(|t| self.embed(t)).collect()
    }
}

/// A semantic index over chunk vectors.
pub trait VectorIndex: Send + Sync {
    /// Ids of the `top_k` nearest chunks with a similarity in `[0, 1]`,
    /// best first.
    fn similarity_search(
        &self,
        vector: &[f32],
        top_k: usize,
    ) -> Result<Vec<(ChunkId, f32)>>;
}

/// Turns a file into a document ready for chunking.
pub trait Extractor: Send + Sync {
    fn extract(&self, path: &Path) -> Result<NewDocument>;
}
