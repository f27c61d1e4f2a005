//! docrag - the retrieval core of a document question-answering system.
//!
//! Documents are split into overlapping, sentence-aware chunks and kept in a
//! [redb](https://github.com/cberner/redb)-backed [`DocumentStore`]. Queries
//! run through one or more retrievers (lexical, embedding, query rewriting,
//! contextual compression) whose ranked lists an [`Ensemble`] merges into a
//! deduplicated candidate set for generation.
//!
//! Language models, embedding services and PDF extraction stay outside the
//! crate, behind the traits in [`upstream`].
//!
//! # Quick start
//!
//! ```no_run
//! use docrag::{DataDir, NewDocument, RagSystem, config::RagConfig};
//!
//! let data_dir = DataDir::resolve(None).unwrap();
//! let mut system =
//!     RagSystem::open_lexical(&data_dir, RagConfig::default()).unwrap();
//!
//! system.ingest(&[NewDocument::new(
//!     "attention.md",
//!     "Attention mechanisms improve translation. \
//!      The model uses self-attention.",
//! )]);
//!
//! let context = system.context("attention");
//! if let Some(context) = context.data {
//!     println!("{}", context.text);
//!     for source in &context.sources {
//!         println!(
//!             "[{}] {} #{}",
//!             source.rank, source.file_name, source.chunk_index
//!         );
//!     }
//! }
//! ```

pub mod chunking;
pub mod cli;
pub mod config;
pub mod context;
pub mod data_dir;
pub mod ensemble;
pub mod error;
pub mod ingestion;
pub mod lexical;
pub mod rag;
pub mod record;
pub mod retriever;
pub mod scorer;
pub mod store;
pub mod upstream;
pub mod vector_db;

pub use data_dir::DataDir;
pub use ensemble::Ensemble;
pub use error::{Error, ErrorKind, Response, Result};
pub use rag::RagSystem;
pub use record::{ChunkId, ChunkRecord, NewDocument, RetrievalResult};
pub use retriever::{Retriever, RetrieverKind};
pub use store::DocumentStore;
pub use vector_db::VectorDb;
