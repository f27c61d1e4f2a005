//! Query expansion and the substring-count similarity used as the default
//! scoring strategy.
//!
//! The score is `min(10 * (matches / words) * (matches / terms), 1.0)`,
//! where `matches` counts non-overlapping occurrences of every expanded term
//! in the lower-cased chunk, `words` is the whitespace-split length of the
//! chunk and `terms` the number of expanded terms (duplicates included).

use rayon::prelude::*;

use crate::{
    error::Result,
    scorer::{Scorer, ScorerKind},
};

/// Curated synonym table for research-paper questions.
const DEFAULT_SYNONYMS: &[(&str, &[&str])] = &[
    (
        "attention",
        &[
            "attention",
            "self-attention",
            "attention mechanism",
            "attentional",
        ],
    ),
    (
        "transformer",
        &["transformer", "transformer model", "attention is all you need"],
    ),
    (
        "neural",
        &["neural", "neural network", "deep learning", "machine learning"],
    ),
    ("encoder", &["encoder", "decoder", "encoder-decoder", "sequence"]),
    (
        "reference",
        &["reference", "citation", "cite", "paper", "publication"],
    ),
    (
        "list",
        &["list", "enumeration", "items", "references", "bibliography"],
    ),
    ("model", &["model", "architecture", "network", "system"]),
    (
        "learning",
        &["learning", "training", "machine learning", "deep learning"],
    ),
    ("network", &["network", "neural network", "architecture", "model"]),
];

/// Expands a raw query with related terms from a fixed synonym table.
#[derive(Debug, Clone)]
pub struct QueryExpander {
    synonyms: Vec<(String, Vec<String>)>,
}

impl Default for QueryExpander {
    fn default() -> Self {
        Self::new(DEFAULT_SYNONYMS.iter().map(|(base, related)| {
            (base.to_string(), related.iter().map(|s| s.to_string()).collect())
        }))
    }
}

impl QueryExpander {
    /// Build an expander from `(base term, related terms)` pairs. Base terms
    /// are matched case-insensitively; table order is kept.
    pub fn new(
        synonyms: impl IntoIterator<Item = (String, Vec<String>)>,
    ) -> Self {
        let synonyms = synonyms
            .into_iter()
            .map(|(base, related)| {
                (
                    base.to_lowercase(),
                    related.into_iter().map(|t| t.to_lowercase()).collect(),
                )
            })
            .collect();
        Self { synonyms }
    }

    /// An expander with an empty table: the query is its only term.
    pub fn empty() -> Self {
        Self {
            synonyms: Vec::new(),
        }
    }

    /// The lower-cased query followed by the related terms of every base
    /// term contained in it.
    ///
    /// # Examples
    ///
    /// ```
    /// use docrag::lexical::QueryExpander;
    ///
    /// let terms = QueryExpander::default().expand("Attention?");
    /// assert_eq!(terms[0], "attention?");
    /// assert!(terms.contains(&"self-attention".to_string()));
    /// assert!(QueryExpander::default().expand("   ").is_empty());
    /// ```
    pub fn expand(&self, query: &str) -> Vec<String> {
        let query_lower = query.to_lowercase();
        if query_lower.trim().is_empty() {
            return Vec::new();
        }

        let mut terms = vec![query_lower.clone()];
        for (base, related) in &self.synonyms {
            if query_lower.contains(base.as_str()) {
                terms.extend(related.iter().cloned());
            }
        }
        terms
    }
}

/// Similarity of a chunk against already-expanded query terms.
///
/// Always within `[0, 1]`; exactly `0.0` when no term occurs.
pub fn similarity(terms: &[String], text: &str) -> f32 {
    let term_count = terms.len();
    let word_count = text.split_whitespace().count();
    if term_count == 0 || word_count == 0 {
        return 0.0;
    }

    let text_lower = text.to_lowercase();
    let total_matches: usize = terms
        .iter()
        .filter(|term| !term.is_empty())
        .map(|term| text_lower.matches(term.as_str()).count())
        .sum();
    if total_matches == 0 {
        return 0.0;
    }

    let matches = total_matches as f64;
    let score =
        10.0 * (matches / word_count as f64) * (matches / term_count as f64);
    score.min(1.0) as f32
}

/// Lexical scoring strategy: query expansion plus [`similarity`].
#[derive(Debug, Clone, Default)]
pub struct LexicalScorer {
    expander: QueryExpander,
}

impl LexicalScorer {
    pub fn new(expander: QueryExpander) -> Self {
        Self { expander }
    }

    pub fn expander(&self) -> &QueryExpander {
        &self.expander
    }
}

impl Scorer for LexicalScorer {
    fn kind(&self) -> ScorerKind {
        ScorerKind::Lexical
    }

    fn score_batch(&self, query: &str, texts: &[&str]) -> Result<Vec<f32>> {
        let terms = self.expander.expand(query);
        tracing::debug!(?terms, candidates = texts.len(), "lexical scoring");
        Ok(texts.par_iter().map(|text| similarity(&terms, text)).collect())
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    fn terms(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn expansion_keeps_query_first_and_adds_synonyms() {
        let expanded = QueryExpander::default().expand("Neural attention");
        assert_eq!(expanded[0], "neural attention");
        // "attention" entry precedes "neural" in the table
        assert_eq!(expanded[1], "attention");
        assert!(expanded.contains(&"deep learning".to_string()));
        assert_eq!(expanded.len(), 1 + 4 + 4);
    }

    #[test]
    fn expansion_matches_substrings() {
        // "networks" contains the base term "network" but not "neural"
        let expanded = QueryExpander::default().expand("networks");
        assert!(expanded.contains(&"architecture".to_string()));
        assert!(!expanded.contains(&"deep learning".to_string()));
    }

    #[test]
    fn query_is_matched_verbatim() {
        let expanded = QueryExpander::empty().expand("Attention ");
        assert_eq!(expanded, terms(&["attention "]));
        // The trailing space only matches where a word follows
        assert_eq!(similarity(&expanded, "self-attention"), 0.0);
        assert!(similarity(&expanded, "attention is all") > 0.0);
    }

    #[test]
    fn custom_table_is_case_insensitive() {
        let expander = QueryExpander::new([(
            "GPU".to_string(),
            vec!["CUDA".to_string(), "accelerator".to_string()],
        )]);
        assert_eq!(
            expander.expand("gpu memory"),
            terms(&["gpu memory", "cuda", "accelerator"])
        );
        assert_eq!(QueryExpander::empty().expand("gpu"), terms(&["gpu"]));
    }

    #[test]
    fn similarity_follows_the_formula() {
        // 2 matches over 4 words, 2 terms: 10 * 0.5 * 1.0 = 5.0 -> capped
        assert_eq!(similarity(&terms(&["cat", "dog"]), "cat and dog ran"), 1.0);

        // 1 match over 20 words, 2 terms: 10 * 0.05 * 0.5 = 0.25
        let text = format!("cat {}", "filler ".repeat(19));
        let score = similarity(&terms(&["cat", "dog"]), &text);
        assert!((score - 0.25).abs() < 1e-6, "got {score}");
    }

    #[test]
    fn similarity_counts_repeated_terms() {
        // Duplicated terms count twice toward matches and terms
        let text = format!("attention {}", "x ".repeat(99));
        let single = similarity(&terms(&["attention"]), &text);
        let doubled = similarity(&terms(&["attention", "attention"]), &text);
        assert!((single - 0.1).abs() < 1e-6);
        assert!((doubled - 0.2).abs() < 1e-6);
    }

    #[test]
    fn similarity_is_case_insensitive() {
        let score = similarity(&terms(&["attention"]), "ATTENTION Attention");
        assert_eq!(score, 1.0);
    }

    #[test]
    fn no_occurrence_scores_zero() {
        assert_eq!(similarity(&terms(&["quantum"]), "cooking pasta"), 0.0);
        assert_eq!(similarity(&[], "anything"), 0.0);
        assert_eq!(similarity(&terms(&["x"]), "   "), 0.0);
    }

    #[test]
    fn blank_query_scores_zero_everywhere() {
        let scorer = LexicalScorer::default();
        let scores = scorer.score_batch("  ", &["some text", ""]).unwrap();
        assert_eq!(scores, vec![0.0, 0.0]);
    }

    #[test]
    fn scorer_ranks_on_topic_text_higher() {
        let scorer = LexicalScorer::default();
        let scores = scorer
            .score_batch(
                "attention",
                &[
                    "Attention mechanisms improve translation.",
                    "Unrelated text about cooking.",
                ],
            )
            .unwrap();
        assert!(scores[0] > scores[1]);
        assert_eq!(scores[1], 0.0);
    }

    proptest! {
        #[test]
        fn score_stays_in_unit_interval(
            query in "[a-z ]{0,30}",
            text in "[a-zA-Z .]{0,300}",
        ) {
            let expanded = QueryExpander::default().expand(&query);
            let score = similarity(&expanded, &text);
            prop_assert!((0.0..=1.0).contains(&score));
        }
    }
}
