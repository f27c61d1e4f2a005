use serde::Serialize;

use crate::record::RetrievalResult;

/// Placed between the texts of consecutive results.
pub const CONTEXT_SEPARATOR: &str = "\n\n---\n\n";

/// Where one part of an assembled context came from.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Source {
    pub file_name: String,
    pub chunk_index: usize,
    pub rank: usize,
    pub score: f32,
}

/// Generation context built from a final candidate list.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AssembledContext {
    pub text: String,
    pub sources: Vec<Source>,
    /// Length of `text` in characters.
    pub context_length: usize,
}

impl AssembledContext {
    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }
}

/// Join the results' texts (excerpts where present) in list order.
///
/// # Examples
///
/// ```
/// use docrag::context::assemble;
///
/// let context = assemble(&[]);
/// assert!(context.is_empty());
/// assert_eq!(context.context_length, 0);
/// ```
pub fn assemble(results: &[RetrievalResult]) -> AssembledContext {
    let text = results
        .iter()
        .map(RetrievalResult::context_text)
        .collect::<Vec<_>>()
        .join(CONTEXT_SEPARATOR);

    let sources = results
        .iter()
        .enumerate()
        .map(|(i, r)| Source {
            file_name: r.chunk.source_document_id.clone(),
            chunk_index: r.chunk.chunk_index,
            rank: i + 1,
            score: r.score,
        })
        .collect();

    AssembledContext {
        context_length: text.chars().count(),
        text,
        sources,
    }
}
