//! Retrieval engine: load-or-rebuild, nearest-neighbour search, threshold policy.
//!
//! Every call to [`RetrievalEngine::answer`] re-checks the persisted index:
//!
//! 1. **Missing**: rebuild, then load.
//! 2. **Present but unloadable** (corrupt or incompatible): rebuild, then
//!    load once more. A second failure is fatal.
//! 3. **Loaded**: answer the query.
//!
//! The loaded index is cached together with the store stamp it was read
//! from and reused only while the stamp is unchanged.
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use docqa_rag::{
//!     DirectorySource, FileIndexStore, HashingEmbeddingProvider, RagConfig, RetrievalEngine,
//! };
//!
//! let engine = RetrievalEngine::builder()
//!     .config(RagConfig::default())
//!     .embedding_provider(Arc::new(HashingEmbeddingProvider::default()))
//!     .document_source(Arc::new(DirectorySource::new("./docs")))
//!     .index_store(Arc::new(FileIndexStore::new("./vector_index")))
//!     .build()?;
//!
//! let answer = engine.answer("How do refunds work?", 0.6).await?;
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};

use crate::chunking::{Chunker, RecursiveChunker};
use crate::config::RagConfig;
use crate::document::{Answer, QueryResult, clears_threshold};
use crate::embedding::EmbeddingProvider;
use crate::error::{IndexFault, RagError, Result};
use crate::index::VectorIndex;
use crate::indexer::{BuildReport, Indexer, build_lock};
use crate::ingest::{DocumentSource, PlainTextExtractor, TextExtractor};
use crate::storage::{IndexStamp, IndexStore};

/// Counters describing what the engine has done so far.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EngineStats {
    /// Completed rebuild-and-save cycles.
    pub rebuilds: u64,
    /// Times the persisted index was read from the store.
    pub loads: u64,
}

#[derive(Default)]
struct Counters {
    rebuilds: AtomicU64,
    loads: AtomicU64,
}

struct LoadedIndex {
    stamp: IndexStamp,
    index: Arc<VectorIndex>,
}

/// Answers questions from the persisted index, rebuilding it when needed.
///
/// Construct one via [`RetrievalEngine::builder()`]. The engine is `Send +
/// Sync`; share it behind an `Arc` to serve concurrent queries.
pub struct RetrievalEngine {
    config: RagConfig,
    indexer: Indexer,
    cache: RwLock<Option<LoadedIndex>>,
    counters: Counters,
}

impl RetrievalEngine {
    /// Create a new [`RetrievalEngineBuilder`].
    pub fn builder() -> RetrievalEngineBuilder {
        RetrievalEngineBuilder::default()
    }

    /// Return a reference to the engine configuration.
    pub fn config(&self) -> &RagConfig {
        &self.config
    }

    /// The indexer used for rebuilds.
    pub fn indexer(&self) -> &Indexer {
        &self.indexer
    }

    /// A snapshot of the engine counters.
    pub fn stats(&self) -> EngineStats {
        EngineStats {
            rebuilds: self.counters.rebuilds.load(Ordering::Relaxed),
            loads: self.counters.loads.load(Ordering::Relaxed),
        }
    }

    /// Answer using the configured default threshold.
    pub async fn answer_with_default_threshold(&self, query: &str) -> Result<Answer> {
        self.answer(query, self.config.score_threshold).await
    }

    /// Answer a question.
    ///
    /// May rebuild the persisted index first (see the module docs); when it
    /// does, [`Answer::index_rebuilt`] is `true`. "No answer" outcomes are
    /// returned as `Ok` with no document.
    ///
    /// # Errors
    ///
    /// - [`RagError::InvalidQuery`] for an empty query.
    /// - [`RagError::IndexBuildFailed`] if a required rebuild failed or the
    ///   rebuilt index still could not be loaded.
    /// - [`RagError::QueryFailed`] if embedding or searching the query failed.
    pub async fn answer(&self, query: &str, score_threshold: f32) -> Result<Answer> {
        if query.trim().is_empty() {
            return Err(RagError::InvalidQuery);
        }
        let started = Instant::now();

        let (index, rebuilt) = self.ensure_index().await?;

        let embedding = self.indexer.embedder().embed(query).await.map_err(|e| {
            error!(error = %e, "embedding failed during query");
            RagError::QueryFailed(Box::new(e))
        })?;

        let results = index.search(&embedding, self.config.top_k).map_err(|e| {
            error!(error = %e, "vector search failed");
            RagError::QueryFailed(Box::new(e))
        })?;

        let answer = select_answer(query, &results, score_threshold).with_rebuilt(rebuilt);
        info!(
            result_count = results.len(),
            matched = answer.is_match(),
            index_rebuilt = rebuilt,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "query answered"
        );
        Ok(answer)
    }

    /// Force a full rebuild, regardless of the current index state.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::IndexBuildFailed`] wrapping the underlying failure.
    pub async fn reindex(&self) -> Result<BuildReport> {
        let report = self.indexer.rebuild().await.map_err(|e| self.build_failed(e))?;
        self.record_rebuild().await;
        Ok(report)
    }

    async fn rebuild_holding_lock(&self) -> Result<BuildReport> {
        let report = self.indexer.rebuild_locked().await.map_err(|e| self.build_failed(e))?;
        self.record_rebuild().await;
        Ok(report)
    }

    fn build_failed(&self, e: RagError) -> RagError {
        error!(location = self.indexer.store().location(), error = %e, "rebuild failed");
        RagError::IndexBuildFailed(Box::new(e))
    }

    async fn record_rebuild(&self) {
        self.counters.rebuilds.fetch_add(1, Ordering::Relaxed);
        *self.cache.write().await = None;
    }

    /// Resolve the index state machine, rebuilding at most once.
    async fn ensure_index(&self) -> Result<(Arc<VectorIndex>, bool)> {
        let location = self.indexer.store().location();

        match self.try_load().await {
            Ok(Some(index)) => return Ok((index, false)),
            Ok(None) => warn!(location, "vector index missing, rebuilding before answering"),
            Err(e) if e.is_index_unavailable() => {
                warn!(location, error = %e, "vector index unloadable, rebuilding before answering");
            }
            Err(e) => return Err(RagError::QueryFailed(Box::new(e))),
        }

        let lock = build_lock(location);
        let _guard = lock.lock().await;

        // Another caller may have finished a rebuild while this one waited.
        if let Ok(Some(index)) = self.try_load().await {
            debug!(location, "using index rebuilt by a concurrent caller");
            return Ok((index, false));
        }

        self.rebuild_holding_lock().await?;

        match self.try_load().await {
            Ok(Some(index)) => Ok((index, true)),
            Ok(None) => Err(RagError::IndexBuildFailed(Box::new(RagError::IndexUnavailable {
                location: location.to_string(),
                fault: IndexFault::Missing,
            }))),
            Err(e) => {
                error!(location, error = %e, "rebuilt index still cannot be loaded");
                Err(RagError::IndexBuildFailed(Box::new(e)))
            }
        }
    }

    /// Returns `Ok(None)` when nothing is persisted.
    ///
    /// The cached index is reused while the store stamp is unchanged; see
    /// [`IndexStamp`] for what a stamp cannot detect.
    async fn try_load(&self) -> Result<Option<Arc<VectorIndex>>> {
        let store = self.indexer.store();
        let Some(stamp) = store.stamp().await? else {
            *self.cache.write().await = None;
            return Ok(None);
        };

        if let Some(loaded) = self.cache.read().await.as_ref() {
            if loaded.stamp == stamp {
                return Ok(Some(Arc::clone(&loaded.index)));
            }
        }

        let index = store.load().await?;
        index.ensure_compatible(self.indexer.embedder().as_ref(), store.location())?;
        let index = Arc::new(index);
        self.counters.loads.fetch_add(1, Ordering::Relaxed);
        *self.cache.write().await = Some(LoadedIndex { stamp, index: Arc::clone(&index) });
        Ok(Some(index))
    }
}

/// Apply the first-acceptable-match policy to results sorted closest first.
fn select_answer(query: &str, results: &[QueryResult], score_threshold: f32) -> Answer {
    if results.is_empty() {
        return Answer::no_results();
    }
    match results.iter().find(|r| clears_threshold(r.score, score_threshold)) {
        Some(accepted) => Answer::matched(accepted),
        None => Answer::below_threshold(query, results.first().map(|r| r.score)),
    }
}

/// Builder for constructing a [`RetrievalEngine`].
///
/// `embedding_provider`, `document_source` and `index_store` are required.
/// The config defaults to [`RagConfig::default()`], the chunker to a
/// [`RecursiveChunker`] sized from the config, and the extractor to
/// [`PlainTextExtractor`].
#[derive(Default)]
pub struct RetrievalEngineBuilder {
    config: Option<RagConfig>,
    embedding_provider: Option<Arc<dyn EmbeddingProvider>>,
    document_source: Option<Arc<dyn DocumentSource>>,
    text_extractor: Option<Arc<dyn TextExtractor>>,
    index_store: Option<Arc<dyn IndexStore>>,
    chunker: Option<Arc<dyn Chunker>>,
}

impl RetrievalEngineBuilder {
    /// Set the engine configuration.
    pub fn config(mut self, config: RagConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Set the embedding provider used for both chunks and queries.
    pub fn embedding_provider(mut self, provider: Arc<dyn EmbeddingProvider>) -> Self {
        self.embedding_provider = Some(provider);
        self
    }

    /// Set where source files come from.
    pub fn document_source(mut self, source: Arc<dyn DocumentSource>) -> Self {
        self.document_source = Some(source);
        self
    }

    /// Set the text extractor.
    pub fn text_extractor(mut self, extractor: Arc<dyn TextExtractor>) -> Self {
        self.text_extractor = Some(extractor);
        self
    }

    /// Set where the index is persisted.
    pub fn index_store(mut self, store: Arc<dyn IndexStore>) -> Self {
        self.index_store = Some(store);
        self
    }

    /// Override the chunker.
    pub fn chunker(mut self, chunker: Arc<dyn Chunker>) -> Self {
        self.chunker = Some(chunker);
        self
    }

    /// Build the [`RetrievalEngine`].
    ///
    /// # Errors
    ///
    /// Returns [`RagError::ConfigError`] if a required field is missing or
    /// the config is invalid.
    pub fn build(self) -> Result<RetrievalEngine> {
        let config = self.config.unwrap_or_default();
        config.validate()?;
        let embedder = self
            .embedding_provider
            .ok_or_else(|| RagError::ConfigError("embedding_provider is required".to_string()))?;
        let source = self
            .document_source
            .ok_or_else(|| RagError::ConfigError("document_source is required".to_string()))?;
        let store = self
            .index_store
            .ok_or_else(|| RagError::ConfigError("index_store is required".to_string()))?;
        let extractor = self.text_extractor.unwrap_or_else(|| Arc::new(PlainTextExtractor));
        let chunker =
            self.chunker.unwrap_or_else(|| Arc::new(RecursiveChunker::from_config(&config)));

        Ok(RetrievalEngine {
            indexer: Indexer::new(config.clone(), chunker, embedder, source, extractor, store),
            config,
            cache: RwLock::new(None),
            counters: Counters::default(),
        })
    }
}
