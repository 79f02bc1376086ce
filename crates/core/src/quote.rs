//! Retrieved passages ("quotes") considered for prompt inclusion.

use serde::{Deserialize, Serialize};

/// One retrieved passage. `id` is the dedup key across fresh vector-index
/// hits and fixed quotes carried over from prior turns.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuoteItem {
    pub id: String,
    pub question: String,
    pub answer: String,

    /// Human-readable source label (collection name, file, URL).
    #[serde(default)]
    pub source: String,
}

impl QuoteItem {
    pub fn new(
        id: impl Into<String>,
        question: impl Into<String>,
        answer: impl Into<String>,
        source: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            question: question.into(),
            answer: answer.into(),
            source: source.into(),
        }
    }
}

/// A vector-index hit: a quote plus its similarity score.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuoteHit {
    pub quote: QuoteItem,

    /// Cosine similarity to the query vector, in [-1, 1].
    pub score: f32,
}
