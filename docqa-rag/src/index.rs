//! In-memory vector index with exact nearest-neighbour search.
//!
//! [`VectorIndex`] is immutable once built. It is replaced wholesale on
//! every rebuild and shared between concurrent queries behind an `Arc`.

use std::cmp::Ordering;

use tracing::debug;

use crate::document::{EmbeddedChunk, QueryResult};
use crate::embedding::EmbeddingProvider;
use crate::error::{IndexFault, RagError, Result};

/// A flat index over embedded chunks, scored by squared Euclidean distance.
#[derive(Debug, Clone, PartialEq)]
pub struct VectorIndex {
    dimensions: usize,
    model_id: String,
    entries: Vec<EmbeddedChunk>,
}

impl VectorIndex {
    /// Build an index from a non-empty batch of embedded chunks.
    ///
    /// # Errors
    ///
    /// - [`RagError::EmptyCorpus`] if `embedded` is empty.
    /// - [`RagError::CapabilityUnavailable`] if vectors are empty, disagree
    ///   in length, or contain non-finite components.
    pub fn build(embedded: Vec<EmbeddedChunk>, model_id: impl Into<String>) -> Result<Self> {
        let model_id = model_id.into();
        let Some(first) = embedded.first() else {
            return Err(RagError::EmptyCorpus("cannot build an index from zero chunks".into()));
        };
        let dimensions = first.vector.len();
        if dimensions == 0 {
            return Err(RagError::CapabilityUnavailable {
                provider: model_id,
                message: "embedder returned zero-length vectors".into(),
            });
        }

        for (position, entry) in embedded.iter().enumerate() {
            if entry.vector.len() != dimensions {
                return Err(RagError::CapabilityUnavailable {
                    provider: model_id,
                    message: format!(
                        "vector {position} has {} components, expected {dimensions}",
                        entry.vector.len()
                    ),
                });
            }
            if entry.vector.iter().any(|x| !x.is_finite()) {
                return Err(RagError::CapabilityUnavailable {
                    provider: model_id,
                    message: format!("vector {position} contains non-finite components"),
                });
            }
        }

        debug!(
            chunk_count = embedded.len(),
            dimensions,
            model_id = %model_id,
            "built vector index"
        );
        Ok(Self { dimensions, model_id, entries: embedded })
    }

    /// The vector dimension every entry (and every query) must have.
    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    /// The embedding model the index was built with.
    pub fn model_id(&self) -> &str {
        &self.model_id
    }

    /// Number of indexed chunks. Always at least one.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Always `false`; an index cannot be built from zero chunks.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The indexed entries in build order.
    pub fn entries(&self) -> &[EmbeddedChunk] {
        &self.entries
    }

    /// Check that the active embedder produces vectors this index can answer.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::IndexUnavailable`] with [`IndexFault::Incompatible`]
    /// on a dimension or model mismatch.
    pub fn ensure_compatible(
        &self,
        embedder: &dyn EmbeddingProvider,
        location: &str,
    ) -> Result<()> {
        let expected = (embedder.dimensions(), embedder.model_id());
        if expected.0 != self.dimensions || expected.1 != self.model_id {
            return Err(RagError::IndexUnavailable {
                location: location.to_string(),
                fault: IndexFault::Incompatible {
                    expected: format!("{} ({} dims)", expected.1, expected.0),
                    found: format!("{} ({} dims)", self.model_id, self.dimensions),
                },
            });
        }
        Ok(())
    }

    /// Return the `top_k` entries closest to `query`, closest first.
    ///
    /// Ties keep build order, so results are reproducible.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::DimensionMismatch`] if `query` has the wrong length.
    pub fn search(&self, query: &[f32], top_k: usize) -> Result<Vec<QueryResult>> {
        if query.len() != self.dimensions {
            return Err(RagError::DimensionMismatch {
                expected: self.dimensions,
                found: query.len(),
            });
        }

        let mut scored: Vec<(f32, usize)> = self
            .entries
            .iter()
            .enumerate()
            .map(|(position, entry)| (squared_l2(&entry.vector, query), position))
            .collect();

        scored.sort_by(|a, b| match a.0.total_cmp(&b.0) {
            Ordering::Equal => a.1.cmp(&b.1),
            other => other,
        });
        scored.truncate(top_k);

        Ok(scored
            .into_iter()
            .map(|(score, position)| QueryResult {
                chunk: self.entries[position].chunk.clone(),
                score,
            })
            .collect())
    }
}

/// Squared Euclidean distance between two equal-length vectors.
fn squared_l2(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b.iter()).map(|(x, y)| (x - y) * (x - y)).sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::Chunk;

    fn entry(text: &str, vector: Vec<f32>) -> EmbeddedChunk {
        EmbeddedChunk {
            chunk: Chunk::new(text.into(), "doc.txt".into(), "full".into()),
            vector,
        }
    }

    #[test]
    fn build_rejects_zero_chunks() {
        let err = VectorIndex::build(Vec::new(), "m").unwrap_err();
        assert!(matches!(err, RagError::EmptyCorpus(_)));
    }

    #[test]
    fn build_rejects_ragged_vectors() {
        let err = VectorIndex::build(vec![entry("a", vec![1.0, 0.0]), entry("b", vec![1.0])], "m")
            .unwrap_err();
        assert!(matches!(err, RagError::CapabilityUnavailable { .. }));
    }

    #[test]
    fn search_orders_by_ascending_distance() {
        let index = VectorIndex::build(
            vec![
                entry("far", vec![3.0, 0.0]),
                entry("near", vec![0.5, 0.0]),
                entry("mid", vec![1.5, 0.0]),
            ],
            "m",
        )
        .unwrap();

        let results = index.search(&[0.0, 0.0], 2).unwrap();
        let texts: Vec<&str> = results.iter().map(|r| r.chunk.text()).collect();
        assert_eq!(texts, vec!["near", "mid"]);
        assert!((results[0].score - 0.25).abs() < 1e-6);
        assert!((results[1].score - 2.25).abs() < 1e-6);
    }

    #[test]
    fn ties_keep_build_order() {
        let index =
            VectorIndex::build(vec![entry("first", vec![1.0]), entry("second", vec![-1.0])], "m")
                .unwrap();
        let results = index.search(&[0.0], 5).unwrap();
        assert_eq!(results[0].chunk.text(), "first");
        assert_eq!(results.len(), 2);
    }

    #[test]
    fn search_rejects_wrong_dimension() {
        let index = VectorIndex::build(vec![entry("a", vec![1.0, 0.0])], "m").unwrap();
        assert!(matches!(
            index.search(&[1.0], 1),
            Err(RagError::DimensionMismatch { expected: 2, found: 1 })
        ));
    }
}
