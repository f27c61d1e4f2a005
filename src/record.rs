use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// A stable chunk identifier derived from (source document, chunk index).
///
/// # Examples
///
/// ```
/// use docrag::record::ChunkId;
///
/// let id = ChunkId::new("paper.pdf", 3);
/// assert_eq!(id.as_str(), "paper.pdf_3");
/// assert_eq!(id.to_string(), "paper.pdf_3");
/// ```
#[derive(
    Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct ChunkId(String);

impl ChunkId {
    pub fn new(source_document_id: &str, chunk_index: usize) -> Self {
        Self(format!("{source_document_id}_{chunk_index}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for ChunkId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl std::fmt::Display for ChunkId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Content identity of a piece of text, used to deduplicate results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ContentHash([u8; 32]);

impl ContentHash {
    pub fn of(text: &str) -> Self {
        Self(*blake3::hash(text.as_bytes()).as_bytes())
    }
}

/// A stored span of a source document.
///
/// Records are built only by the store's add path and never change
/// afterwards; replacing a document deletes its records and adds new ones.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkRecord {
    pub id: ChunkId,
    pub text: String,
    /// The `file_name` of the document this chunk came from.
    pub source_document_id: String,
    #[serde(default)]
    pub source_path: String,
    pub chunk_index: usize,
    pub total_chunks_in_document: usize,
    /// Length of `text` in characters.
    pub char_length: usize,
    pub extraction_method: String,
    #[serde(default)]
    pub extra_metadata: BTreeMap<String, String>,
    /// Seconds since the Unix epoch.
    pub created_at: u64,
}

/// A document handed to the store for chunking.
///
/// Mirrors what an extractor produces: the text plus where it came from.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NewDocument {
    pub text: String,
    pub file_name: String,
    pub path: Option<String>,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
    pub extraction_method: Option<String>,
}

impl NewDocument {
    pub fn new(file_name: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            file_name: file_name.into(),
            ..Self::default()
        }
    }

    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    pub fn with_metadata(
        mut self,
        key: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn with_extraction_method(mut self, method: impl Into<String>) -> Self {
        self.extraction_method = Some(method.into());
        self
    }
}

/// One ranked hit produced for a query. Never persisted.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RetrievalResult {
    pub chunk: ChunkRecord,
    /// Similarity in `[0, 1]`.
    pub score: f32,
    /// 1-based position in the list that produced this result.
    pub rank: usize,
    /// Query-relevant span extracted from the chunk, when compressed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub excerpt: Option<String>,
}

impl RetrievalResult {
    pub fn new(chunk: ChunkRecord, score: f32, rank: usize) -> Self {
        Self {
            chunk,
            score,
            rank,
            excerpt: None,
        }
    }

    pub fn distance(&self) -> f32 {
        1.0 - self.score
    }

    /// The text this result contributes to a generation context.
    pub fn context_text(&self) -> &str {
        self.excerpt.as_deref().unwrap_or(&self.chunk.text)
    }

    pub fn content_hash(&self) -> ContentHash {
        ContentHash::of(self.context_text())
    }
}

pub const UNKNOWN_EXTRACTION_METHOD: &str = "unknown";

/// Current time as seconds since the Unix epoch.
pub(crate) fn unix_now() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
