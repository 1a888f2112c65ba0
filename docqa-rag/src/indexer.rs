//! The rebuild pipeline: fetch → chunk → embed → build → save.
//!
//! An [`Indexer`] owns every collaborator needed to replace the persisted
//! index wholesale. Each [`RetrievalEngine`](crate::RetrievalEngine) owns one
//! and exposes it through [`indexer()`](crate::RetrievalEngine::indexer).
//! Rebuilds against the same storage location are serialized through a
//! process-wide lock registry, so two engines (or a query on one engine and
//! a direct [`Indexer::rebuild`] on another) never interleave their writes.

use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex, OnceLock, PoisonError};
use std::time::{Duration, Instant};

use tokio::sync::Mutex;
use tracing::{error, info};

use crate::chunking::Chunker;
use crate::config::RagConfig;
use crate::document::EmbeddedChunk;
use crate::embedding::EmbeddingProvider;
use crate::error::{RagError, Result};
use crate::index::VectorIndex;
use crate::ingest::{DocumentSource, TextExtractor, collect_documents};
use crate::storage::IndexStore;

type LockRegistry = StdMutex<HashMap<String, Arc<Mutex<()>>>>;

static BUILD_LOCKS: OnceLock<LockRegistry> = OnceLock::new();

/// The exclusive build lock for a storage location.
///
/// Locks live in this process only. Two processes sharing one index
/// directory can both rebuild and both save; the atomic rename in
/// [`IndexStore::save`] keeps every load consistent, but the last save wins.
pub(crate) fn build_lock(location: &str) -> Arc<Mutex<()>> {
    let registry = BUILD_LOCKS.get_or_init(Default::default);
    let mut locks = registry.lock().unwrap_or_else(PoisonError::into_inner);
    locks.entry(location.to_string()).or_default().clone()
}

/// Summary of a completed rebuild.
#[derive(Debug, Clone, PartialEq)]
pub struct BuildReport {
    /// Number of source documents indexed.
    pub document_count: usize,
    /// Number of chunks embedded and stored.
    pub chunk_count: usize,
    /// Embedding dimension of the new index.
    pub dimensions: usize,
    /// Wall-clock time of the whole cycle.
    pub elapsed: Duration,
}

/// Runs full rebuilds of the persisted index.
pub struct Indexer {
    config: RagConfig,
    chunker: Arc<dyn Chunker>,
    embedder: Arc<dyn EmbeddingProvider>,
    source: Arc<dyn DocumentSource>,
    extractor: Arc<dyn TextExtractor>,
    store: Arc<dyn IndexStore>,
}

impl Indexer {
    pub(crate) fn new(
        config: RagConfig,
        chunker: Arc<dyn Chunker>,
        embedder: Arc<dyn EmbeddingProvider>,
        source: Arc<dyn DocumentSource>,
        extractor: Arc<dyn TextExtractor>,
        store: Arc<dyn IndexStore>,
    ) -> Self {
        Self { config, chunker, embedder, source, extractor, store }
    }

    /// The store this indexer writes to.
    pub fn store(&self) -> &Arc<dyn IndexStore> {
        &self.store
    }

    /// The embedding provider used for chunks.
    pub fn embedder(&self) -> &Arc<dyn EmbeddingProvider> {
        &self.embedder
    }

    /// Rebuild and save the index, holding the location's build lock.
    ///
    /// Engines pick the new index up on their next query, since the stored
    /// stamp changes with every save.
    ///
    /// # Errors
    ///
    /// Propagates ingestion, [`RagError::EmptyCorpus`],
    /// [`RagError::CapabilityUnavailable`] and storage failures unchanged.
    pub async fn rebuild(&self) -> Result<BuildReport> {
        let lock = build_lock(self.store.location());
        let _guard = lock.lock().await;
        self.rebuild_locked().await
    }

    /// Rebuild without taking the lock. The caller must hold it.
    pub(crate) async fn rebuild_locked(&self) -> Result<BuildReport> {
        let started = Instant::now();
        let location = self.store.location();
        info!(location, "rebuilding vector index");

        let documents = collect_documents(self.source.as_ref(), self.extractor.as_ref()).await?;
        if documents.is_empty() {
            error!(location, "no source documents to index");
            return Err(RagError::EmptyCorpus("the document source returned no documents".into()));
        }

        let chunks = self.chunker.chunk(&documents);
        if chunks.is_empty() {
            error!(location, document_count = documents.len(), "documents produced no chunks");
            return Err(RagError::EmptyCorpus("the documents produced no chunks".into()));
        }

        let mut embedded = Vec::with_capacity(chunks.len());
        for batch in chunks.chunks(self.config.embed_batch_size) {
            let texts: Vec<&str> = batch.iter().map(|c| c.text()).collect();
            let vectors = self.embedder.embed_batch(&texts).await.map_err(|e| {
                error!(location, error = %e, "embedding failed during rebuild");
                e
            })?;
            self.check_vectors(&vectors, texts.len())?;
            embedded.extend(
                batch
                    .iter()
                    .cloned()
                    .zip(vectors)
                    .map(|(chunk, vector)| EmbeddedChunk { chunk, vector }),
            );
        }

        let index = VectorIndex::build(embedded, self.embedder.model_id())?;
        self.store.save(&index).await.map_err(|e| {
            error!(location, error = %e, "failed to save rebuilt index");
            e
        })?;

        let report = BuildReport {
            document_count: documents.len(),
            chunk_count: index.len(),
            dimensions: index.dimensions(),
            elapsed: started.elapsed(),
        };
        info!(
            location,
            document_count = report.document_count,
            chunk_count = report.chunk_count,
            dimensions = report.dimensions,
            elapsed_ms = report.elapsed.as_millis() as u64,
            "vector index rebuilt"
        );
        Ok(report)
    }

    fn check_vectors(&self, vectors: &[Vec<f32>], expected_count: usize) -> Result<()> {
        let provider = self.embedder.model_id();
        if vectors.len() != expected_count {
            return Err(RagError::CapabilityUnavailable {
                provider,
                message: format!(
                    "returned {} vectors for {expected_count} texts",
                    vectors.len()
                ),
            });
        }
        let dimensions = self.embedder.dimensions();
        if let Some(bad) = vectors.iter().find(|v| v.len() != dimensions) {
            return Err(RagError::CapabilityUnavailable {
                provider,
                message: format!("returned a {}-dim vector, expected {dimensions}", bad.len()),
            });
        }
        Ok(())
    }
}
