//! Explicit configuration for the retrieval core.
//!
//! Nothing in the library reads the environment on its own. The binary calls
//! [`RagConfig::from_env`] once and passes the result down to each component.

use serde::Serialize;

use crate::error::{Error, Result};

/// Default chunk size in characters.
pub const DEFAULT_CHUNK_SIZE: usize = 1000;

/// Default overlap between adjacent chunks in characters.
pub const DEFAULT_CHUNK_OVERLAP: usize = 200;

/// Characters searched on either side of a nominal cut for a sentence end.
pub const DEFAULT_SENTENCE_MARGIN: usize = 100;

pub const DEFAULT_TOP_K: usize = 5;
pub const DEFAULT_SIMILARITY_THRESHOLD: f32 = 0.7;

/// Compression retrievers fetch this many times `top_k` candidates.
pub const DEFAULT_COMPRESSION_FETCH_MULTIPLIER: usize = 2;

pub const CHUNK_SIZE_ENV_VAR: &str = "DOCRAG_CHUNK_SIZE";
pub const CHUNK_OVERLAP_ENV_VAR: &str = "DOCRAG_CHUNK_OVERLAP";
pub const TOP_K_ENV_VAR: &str = "DOCRAG_TOP_K";
pub const THRESHOLD_ENV_VAR: &str = "DOCRAG_SIMILARITY_THRESHOLD";

/// Chunker settings.
///
/// # Examples
///
/// ```
/// use docrag::config::ChunkingConfig;
///
/// let config = ChunkingConfig::new(500, 50).unwrap();
/// assert_eq!(config.sentence_margin, 100);
/// assert!(ChunkingConfig::new(100, 100).is_err());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ChunkingConfig {
    /// Nominal chunk size in characters.
    pub chunk_size: usize,
    /// Characters shared between adjacent chunks.
    pub overlap: usize,
    /// Lookback/lookahead used when snapping a cut to a sentence end.
    pub sentence_margin: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            overlap: DEFAULT_CHUNK_OVERLAP,
            sentence_margin: DEFAULT_SENTENCE_MARGIN,
        }
    }
}

impl ChunkingConfig {
    pub fn new(chunk_size: usize, overlap: usize) -> Result<Self> {
        let config = Self {
            chunk_size,
            overlap,
            sentence_margin: DEFAULT_SENTENCE_MARGIN,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn with_sentence_margin(mut self, margin: usize) -> Self {
        self.sentence_margin = margin;
        self
    }

    pub fn validate(&self) -> Result<()> {
        validate_chunking(self.chunk_size, self.overlap)
    }
}

pub(crate) fn validate_chunking(
    chunk_size: usize,
    overlap: usize,
) -> Result<()> {
    if chunk_size == 0 {
        return Err(Error::validation("chunk size must be greater than 0"));
    }
    if overlap >= chunk_size {
        return Err(Error::validation(format!(
            "chunk overlap ({overlap}) must be smaller than chunk size \
             ({chunk_size})"
        )));
    }
    Ok(())
}

pub(crate) fn validate_top_k(top_k: usize) -> Result<()> {
    if top_k == 0 {
        return Err(Error::validation("top_k must be greater than 0"));
    }
    Ok(())
}

pub(crate) fn validate_threshold(threshold: f32) -> Result<()> {
    if !(0.0..=1.0).contains(&threshold) {
        return Err(Error::validation(format!(
            "similarity threshold must be within [0, 1], got {threshold}"
        )));
    }
    Ok(())
}

/// Top-level settings shared by the store, retrievers and ensemble.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct RagConfig {
    pub chunking: ChunkingConfig,
    /// Results requested from each retriever; the ensemble keeps `2 * top_k`.
    pub top_k: usize,
    /// Minimum score a store search result must reach.
    pub similarity_threshold: f32,
    pub compression_fetch_multiplier: usize,
}

impl Default for RagConfig {
    fn default() -> Self {
        Self {
            chunking: ChunkingConfig::default(),
            top_k: DEFAULT_TOP_K,
            similarity_threshold: DEFAULT_SIMILARITY_THRESHOLD,
            compression_fetch_multiplier: DEFAULT_COMPRESSION_FETCH_MULTIPLIER,
        }
    }
}

impl RagConfig {
    pub fn validate(&self) -> Result<()> {
        self.chunking.validate()?;
        validate_top_k(self.top_k)?;
        validate_threshold(self.similarity_threshold)?;
        if self.compression_fetch_multiplier == 0 {
            return Err(Error::validation(
                "compression fetch multiplier must be greater than 0",
            ));
        }
        Ok(())
    }

    /// Resolve settings from `DOCRAG_*` environment variables on top of the
    /// defaults. Meant to be called once by the binary.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = Self::default();
        if let Some(v) = lookup(CHUNK_SIZE_ENV_VAR) {
            config.chunking.chunk_size = parse_var(CHUNK_SIZE_ENV_VAR, &v)?;
        }
        if let Some(v) = lookup(CHUNK_OVERLAP_ENV_VAR) {
            config.chunking.overlap = parse_var(CHUNK_OVERLAP_ENV_VAR, &v)?;
        }
        if let Some(v) = lookup(TOP_K_ENV_VAR) {
            config.top_k = parse_var(TOP_K_ENV_VAR, &v)?;
        }
        if let Some(v) = lookup(THRESHOLD_ENV_VAR) {
            config.similarity_threshold = parse_var(THRESHOLD_ENV_VAR, &v)?;
        }
        config.validate()?;
        Ok(config)
    }
}

fn parse_var<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value.trim().parse().map_err(|_| {
        Error::Config(format!("{key} has an invalid value: {value:?}"))
    })
}
