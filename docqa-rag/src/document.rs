//! Data types for documents, chunks, search results, and answers.

use serde::{Deserialize, Serialize};

/// A source document with its extracted plain text.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SourceDocument {
    id: String,
    text: String,
}

impl SourceDocument {
    /// Create a document. `id` must be unique within one indexing run.
    pub fn new(id: impl Into<String>, text: impl Into<String>) -> Self {
        Self { id: id.into(), text: text.into() }
    }

    /// The unique identifier, e.g. the file name.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// The full plain text.
    pub fn text(&self) -> &str {
        &self.text
    }
}

/// A segment of a [`SourceDocument`] carrying a copy of the document's full text.
///
/// Chunks are only created by the chunking module (and by storage when an
/// index is loaded back), which guarantees `full_text` equals the text of the
/// document named by `source_id`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Chunk {
    text: String,
    source_id: String,
    full_text: String,
}

impl Chunk {
    pub(crate) fn new(text: String, source_id: String, full_text: String) -> Self {
        Self { text, source_id, full_text }
    }

    /// The chunk's own text.
    pub fn text(&self) -> &str {
        &self.text
    }

    /// The `id` of the document this chunk came from.
    pub fn source_id(&self) -> &str {
        &self.source_id
    }

    /// The complete text of the originating document.
    pub fn full_text(&self) -> &str {
        &self.full_text
    }
}

/// A [`Chunk`] paired with its embedding vector.
#[derive(Debug, Clone, PartialEq)]
pub struct EmbeddedChunk {
    /// The chunk.
    pub chunk: Chunk,
    /// The embedding of `chunk.text()`.
    pub vector: Vec<f32>,
}

/// A retrieved [`Chunk`] paired with its distance to the query.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryResult {
    /// The retrieved chunk.
    pub chunk: Chunk,
    /// Squared Euclidean distance to the query (lower is closer).
    pub score: f32,
}

/// Whether a distance score is close enough to be accepted as an answer.
///
/// Scores are distances, so a candidate clears the threshold when it is
/// strictly below it. Every threshold decision goes through this function.
pub fn clears_threshold(score: f32, threshold: f32) -> bool {
    score < threshold
}

/// How a query was resolved.
#[derive(Debug, Clone, PartialEq)]
pub enum AnswerOutcome {
    /// A chunk cleared the threshold.
    Matched {
        /// The document the accepted chunk came from.
        source_id: String,
        /// Distance of the accepted chunk.
        score: f32,
    },
    /// The index returned no neighbours.
    NoResults,
    /// Neighbours were found but none cleared the threshold.
    BelowThreshold {
        /// Distance of the closest neighbour.
        best_score: Option<f32>,
    },
}

/// The payload returned by [`RetrievalEngine::answer`](crate::RetrievalEngine::answer).
///
/// A matched answer always carries the full document; the two "no answer"
/// outcomes never do.
#[derive(Debug, Clone, PartialEq)]
pub struct Answer {
    message: String,
    full_document: Option<String>,
    outcome: AnswerOutcome,
    index_rebuilt: bool,
}

impl Answer {
    pub(crate) fn matched(result: &QueryResult) -> Self {
        Self {
            message: format!("**Answer:** {}", result.chunk.text()),
            full_document: Some(result.chunk.full_text().to_string()),
            outcome: AnswerOutcome::Matched {
                source_id: result.chunk.source_id().to_string(),
                score: result.score,
            },
            index_rebuilt: false,
        }
    }

    pub(crate) fn no_results() -> Self {
        Self {
            message: "Apologies, I couldn't find relevant information.".to_string(),
            full_document: None,
            outcome: AnswerOutcome::NoResults,
            index_rebuilt: false,
        }
    }

    pub(crate) fn below_threshold(query: &str, best_score: Option<f32>) -> Self {
        Self {
            message: format!(
                "Sorry, we do not offer information on '{}' at this time.",
                query.to_lowercase()
            ),
            full_document: None,
            outcome: AnswerOutcome::BelowThreshold { best_score },
            index_rebuilt: false,
        }
    }

    pub(crate) fn with_rebuilt(mut self, rebuilt: bool) -> Self {
        self.index_rebuilt = rebuilt;
        self
    }

    /// The human-readable message.
    pub fn message(&self) -> &str {
        &self.message
    }

    /// The full source document for a matched answer.
    pub fn full_document(&self) -> Option<&str> {
        self.full_document.as_deref()
    }

    /// How the query was resolved.
    pub fn outcome(&self) -> &AnswerOutcome {
        &self.outcome
    }

    /// Returns `true` if a chunk cleared the threshold.
    pub fn is_match(&self) -> bool {
        matches!(self.outcome, AnswerOutcome::Matched { .. })
    }

    /// Returns `true` if this call rebuilt the persisted index before answering.
    pub fn index_rebuilt(&self) -> bool {
        self.index_rebuilt
    }

    /// Split into the `(message, full_document)` pair shown to users.
    pub fn into_parts(self) -> (String, Option<String>) {
        (self.message, self.full_document)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(score: f32) -> QueryResult {
        QueryResult {
            chunk: Chunk::new("refunds take 5 days".into(), "faq.txt".into(), "FAQ body".into()),
            score,
        }
    }

    #[test]
    fn threshold_is_strict() {
        assert!(clears_threshold(0.3, 0.6));
        assert!(!clears_threshold(0.6, 0.6));
        assert!(!clears_threshold(0.7, 0.6));
    }

    #[test]
    fn matched_answer_carries_document() {
        let answer = Answer::matched(&result(0.2));
        assert_eq!(answer.message(), "**Answer:** refunds take 5 days");
        assert_eq!(answer.full_document(), Some("FAQ body"));
        assert!(answer.is_match());
        assert!(!answer.index_rebuilt());
    }

    #[test]
    fn no_answer_outcomes_have_no_document() {
        let empty = Answer::no_results();
        let below = Answer::below_threshold("Shipping To MARS", Some(1.2)).with_rebuilt(true);

        assert!(empty.full_document().is_none());
        assert!(below.full_document().is_none());
        assert_ne!(empty.message(), below.message());
        assert!(below.message().contains("'shipping to mars'"));
        assert!(below.index_rebuilt());
        assert_eq!(below.into_parts().1, None);
    }
}
