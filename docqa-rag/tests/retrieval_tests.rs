//! End-to-end tests for the retrieval engine's load-or-rebuild state machine.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use docqa_rag::{
    AnswerOutcome, EmbeddingProvider, FileIndexStore, FileRef, HashingEmbeddingProvider,
    IndexFault, IndexStamp, IndexStore, RagConfig, RagError, Result, RetrievalEngine,
    VectorIndex,
};

/// Serves documents from memory and counts listings (one per rebuild).
struct MemorySource {
    documents: Vec<(String, String)>,
    listings: AtomicUsize,
    delay: Duration,
}

impl MemorySource {
    fn new(documents: &[(&str, &str)]) -> Self {
        Self {
            documents: documents
                .iter()
                .map(|(id, text)| (id.to_string(), text.to_string()))
                .collect(),
            listings: AtomicUsize::new(0),
            delay: Duration::ZERO,
        }
    }

    fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

#[async_trait]
impl docqa_rag::DocumentSource for MemorySource {
    async fn list_source_files(&self) -> Result<Vec<FileRef>> {
        self.listings.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        Ok(self.documents.iter().map(|(id, _)| FileRef::new(id.clone())).collect())
    }

    async fn fetch_content(&self, file: &FileRef) -> Result<Vec<u8>> {
        let (_, text) = self.documents.iter().find(|(id, _)| *id == file.id).unwrap();
        Ok(text.as_bytes().to_vec())
    }
}

/// Returns fixed vectors for known texts so distances are exact.
struct LookupEmbedder {
    vectors: HashMap<String, Vec<f32>>,
}

impl LookupEmbedder {
    fn new(entries: &[(&str, Vec<f32>)]) -> Self {
        Self { vectors: entries.iter().map(|(t, v)| (t.to_string(), v.clone())).collect() }
    }
}

#[async_trait]
impl EmbeddingProvider for LookupEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        Ok(self.vectors.get(text).cloned().unwrap_or_else(|| vec![10.0, 10.0]))
    }

    fn dimensions(&self) -> usize {
        2
    }

    fn model_id(&self) -> String {
        "lookup-2".to_string()
    }
}

/// An embedder whose backend is down.
struct OfflineEmbedder;

#[async_trait]
impl EmbeddingProvider for OfflineEmbedder {
    async fn embed(&self, _text: &str) -> Result<Vec<f32>> {
        Err(RagError::CapabilityUnavailable {
            provider: "offline".into(),
            message: "connection refused".into(),
        })
    }

    fn dimensions(&self) -> usize {
        2
    }

    fn model_id(&self) -> String {
        "offline".to_string()
    }
}

/// Wraps a store and counts successful saves.
struct CountingStore<S> {
    inner: S,
    saves: AtomicUsize,
}

impl<S> CountingStore<S> {
    fn new(inner: S) -> Self {
        Self { inner, saves: AtomicUsize::new(0) }
    }

    fn saves(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl<S: IndexStore> IndexStore for CountingStore<S> {
    fn location(&self) -> &str {
        self.inner.location()
    }

    async fn stamp(&self) -> Result<Option<IndexStamp>> {
        self.inner.stamp().await
    }

    async fn load(&self) -> Result<VectorIndex> {
        self.inner.load().await
    }

    async fn save(&self, index: &VectorIndex) -> Result<()> {
        self.inner.save(index).await?;
        self.saves.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// A store whose persisted bytes never deserialize.
struct BrokenStore {
    location: String,
}

#[async_trait]
impl IndexStore for BrokenStore {
    fn location(&self) -> &str {
        &self.location
    }

    async fn stamp(&self) -> Result<Option<IndexStamp>> {
        Ok(Some(IndexStamp { modified: None, len: 3 }))
    }

    async fn load(&self) -> Result<VectorIndex> {
        Err(RagError::IndexUnavailable {
            location: self.location.clone(),
            fault: IndexFault::Corrupt("unreadable".into()),
        })
    }

    async fn save(&self, _index: &VectorIndex) -> Result<()> {
        Ok(())
    }
}

const HOURS: &str = "We open at nine and close at five.";
const QUERY: &str = "When do you open?";

fn hours_embedder() -> Arc<LookupEmbedder> {
    Arc::new(LookupEmbedder::new(&[(HOURS, vec![0.0, 0.0]), (QUERY, vec![0.3f32.sqrt(), 0.0])]))
}

fn engine(
    source: Arc<dyn docqa_rag::DocumentSource>,
    embedder: Arc<dyn EmbeddingProvider>,
    store: Arc<dyn IndexStore>,
) -> RetrievalEngine {
    RetrievalEngine::builder()
        .config(RagConfig::default())
        .embedding_provider(embedder)
        .document_source(source)
        .index_store(store)
        .build()
        .unwrap()
}

fn file_store(dir: &Path) -> Arc<CountingStore<FileIndexStore>> {
    Arc::new(CountingStore::new(FileIndexStore::new(dir.join("vector_index"))))
}

#[tokio::test]
async fn close_chunk_is_accepted_and_returns_full_document() {
    let dir = tempfile::tempdir().unwrap();
    let source = Arc::new(MemorySource::new(&[("hours.txt", HOURS)]));
    let engine = engine(source, hours_embedder(), file_store(dir.path()));

    let answer = engine.answer(QUERY, 0.6).await.unwrap();

    assert_eq!(answer.message(), format!("**Answer:** {HOURS}"));
    assert_eq!(answer.full_document(), Some(HOURS));
    match answer.outcome() {
        AnswerOutcome::Matched { source_id, score } => {
            assert_eq!(source_id, "hours.txt");
            assert!((score - 0.3).abs() < 1e-5);
        }
        other => panic!("unexpected outcome: {other:?}"),
    }
}

#[tokio::test]
async fn strict_threshold_reports_no_relevant_result() {
    let dir = tempfile::tempdir().unwrap();
    let source = Arc::new(MemorySource::new(&[("hours.txt", HOURS)]));
    let engine = engine(source, hours_embedder(), file_store(dir.path()));

    let answer = engine.answer(QUERY, 0.1).await.unwrap();

    assert_eq!(
        answer.message(),
        "Sorry, we do not offer information on 'when do you open?' at this time."
    );
    assert!(answer.full_document().is_none());
    assert!(matches!(answer.outcome(), AnswerOutcome::BelowThreshold { .. }));
}

#[tokio::test]
async fn missing_index_is_built_exactly_once() {
    let dir = tempfile::tempdir().unwrap();
    let source = Arc::new(MemorySource::new(&[("hours.txt", HOURS)]));
    let store = file_store(dir.path());
    let engine = engine(source.clone(), hours_embedder(), store.clone());

    let first = engine.answer(QUERY, 0.6).await.unwrap();
    let second = engine.answer(QUERY, 0.6).await.unwrap();

    assert!(first.index_rebuilt());
    assert!(!second.index_rebuilt());
    assert_eq!(first.message(), second.message());
    assert_eq!(store.saves(), 1);
    assert_eq!(source.listings.load(Ordering::SeqCst), 1);
    assert_eq!(engine.stats().rebuilds, 1);
    assert_eq!(engine.stats().loads, 1);
}

#[tokio::test]
async fn existing_index_is_reused_across_engines() {
    let dir = tempfile::tempdir().unwrap();
    let source = Arc::new(MemorySource::new(&[("hours.txt", HOURS)]));
    let store = file_store(dir.path());

    engine(source.clone(), hours_embedder(), store.clone()).answer(QUERY, 0.6).await.unwrap();
    let restarted = engine(source.clone(), hours_embedder(), store.clone());
    let answer = restarted.answer(QUERY, 0.6).await.unwrap();

    assert!(!answer.index_rebuilt());
    assert_eq!(store.saves(), 1);
    assert_eq!(restarted.stats().rebuilds, 0);
}

#[tokio::test]
async fn corrupt_index_file_is_rebuilt_before_answering() {
    let dir = tempfile::tempdir().unwrap();
    let index_dir = dir.path().join("vector_index");
    std::fs::create_dir_all(&index_dir).unwrap();
    std::fs::write(index_dir.join(docqa_rag::storage::INDEX_FILE_NAME), b"garbage").unwrap();

    let source = Arc::new(MemorySource::new(&[("hours.txt", HOURS)]));
    let store = file_store(dir.path());
    let engine = engine(source, hours_embedder(), store.clone());

    let answer = engine.answer(QUERY, 0.6).await.unwrap();

    assert!(answer.index_rebuilt());
    assert!(answer.is_match());
    assert_eq!(store.saves(), 1);
}

#[tokio::test]
async fn persistently_broken_store_fails_after_one_rebuild() {
    let source = Arc::new(MemorySource::new(&[("hours.txt", HOURS)]));
    let store = Arc::new(CountingStore::new(BrokenStore { location: "broken://index".into() }));
    let engine = engine(source.clone(), hours_embedder(), store.clone());

    let err = engine.answer(QUERY, 0.6).await.unwrap_err();

    assert!(err.is_build_failure());
    assert!(matches!(
        err.root_cause(),
        RagError::IndexUnavailable { fault: IndexFault::Corrupt(_), .. }
    ));
    assert_eq!(store.saves(), 1);
    assert_eq!(source.listings.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn empty_corpus_is_fatal_and_writes_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let source = Arc::new(MemorySource::new(&[]));
    let store = file_store(dir.path());
    let engine = engine(source, hours_embedder(), store.clone());

    let err = engine.answer(QUERY, 0.6).await.unwrap_err();

    assert!(err.to_string().starts_with("could not build the index"));
    assert!(matches!(err.root_cause(), RagError::EmptyCorpus(_)));
    assert_eq!(store.saves(), 0);
    assert!(!dir.path().join("vector_index").exists());
}

#[tokio::test]
async fn unreachable_embedder_is_fatal() {
    let dir = tempfile::tempdir().unwrap();
    let source = Arc::new(MemorySource::new(&[("hours.txt", HOURS)]));
    let engine = engine(source, Arc::new(OfflineEmbedder), file_store(dir.path()));

    let err = engine.answer(QUERY, 0.6).await.unwrap_err();

    assert!(err.is_build_failure());
    assert!(matches!(err.root_cause(), RagError::CapabilityUnavailable { .. }));
}

#[tokio::test]
async fn empty_query_is_rejected_without_touching_the_index() {
    let dir = tempfile::tempdir().unwrap();
    let source = Arc::new(MemorySource::new(&[("hours.txt", HOURS)]));
    let store = file_store(dir.path());
    let engine = engine(source, hours_embedder(), store.clone());

    assert!(matches!(engine.answer("   ", 0.6).await, Err(RagError::InvalidQuery)));
    assert_eq!(store.saves(), 0);
}

#[tokio::test]
async fn index_from_another_embedder_is_rebuilt() {
    let dir = tempfile::tempdir().unwrap();
    let source = Arc::new(MemorySource::new(&[("hours.txt", HOURS)]));
    let store = file_store(dir.path());

    engine(source.clone(), hours_embedder(), store.clone()).answer(QUERY, 0.6).await.unwrap();

    let switched =
        engine(source.clone(), Arc::new(HashingEmbeddingProvider::new(32)), store.clone());
    let answer = switched.answer(QUERY, 2.0).await.unwrap();

    assert!(answer.index_rebuilt());
    assert_eq!(store.saves(), 2);
    assert_eq!(store.load().await.unwrap().dimensions(), 32);
}

#[tokio::test]
async fn deleted_index_is_noticed_on_next_call() {
    let dir = tempfile::tempdir().unwrap();
    let source = Arc::new(MemorySource::new(&[("hours.txt", HOURS)]));
    let store = file_store(dir.path());
    let engine = engine(source, hours_embedder(), store.clone());

    engine.answer(QUERY, 0.6).await.unwrap();
    std::fs::remove_dir_all(dir.path().join("vector_index")).unwrap();
    let answer = engine.answer(QUERY, 0.6).await.unwrap();

    assert!(answer.index_rebuilt());
    assert_eq!(store.saves(), 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_triggers_build_once() {
    let dir = tempfile::tempdir().unwrap();
    let source =
        Arc::new(MemorySource::new(&[("hours.txt", HOURS)]).with_delay(Duration::from_millis(100)));
    let store = file_store(dir.path());
    let first = engine(source.clone(), hours_embedder(), store.clone());
    let second = engine(source.clone(), hours_embedder(), store.clone());

    let (a, b) = tokio::join!(first.answer(QUERY, 0.6), second.answer(QUERY, 0.6));
    let (a, b) = (a.unwrap(), b.unwrap());

    assert_eq!(store.saves(), 1);
    assert_eq!(source.listings.load(Ordering::SeqCst), 1);
    assert!(a.index_rebuilt() ^ b.index_rebuilt());
    assert_eq!(a.full_document(), b.full_document());
    assert!(store.load().await.is_ok());
}

#[tokio::test]
async fn answers_are_always_consistent() {
    let dir = tempfile::tempdir().unwrap();
    let source = Arc::new(MemorySource::new(&[
        ("billing.txt", "Invoices are emailed on the first business day of each month."),
        ("vpn.txt", "Connect to the VPN with the company client before opening the wiki."),
        ("leave.txt", "Annual leave requests need manager approval two weeks ahead."),
    ]));
    let engine =
        engine(source, Arc::new(HashingEmbeddingProvider::new(128)), file_store(dir.path()));

    for query in ["When are invoices emailed?", "vpn client", "parking permits", "leave approval"] {
        for threshold in [0.0, 0.5, 1.0, 1.5, 4.0] {
            let answer = engine.answer(query, threshold).await.unwrap();
            let has_document = answer.full_document().is_some();
            assert_eq!(answer.is_match(), has_document, "{query} @ {threshold}");
            if !answer.is_match() {
                assert!(!answer.message().starts_with("**Answer:**"));
            }
        }
    }
    assert_eq!(engine.stats().rebuilds, 1);
}

#[tokio::test]
async fn reindex_replaces_the_index_on_demand() {
    let dir = tempfile::tempdir().unwrap();
    let source = Arc::new(MemorySource::new(&[("hours.txt", HOURS)]));
    let store = file_store(dir.path());
    let engine = engine(source, hours_embedder(), store.clone());

    let report = engine.reindex().await.unwrap();
    let answer = engine.answer(QUERY, 0.6).await.unwrap();

    assert_eq!(report.document_count, 1);
    assert_eq!(report.chunk_count, 1);
    assert_eq!(report.dimensions, 2);
    assert!(!answer.index_rebuilt());
    assert_eq!(store.saves(), 1);
}

#[tokio::test]
async fn direct_rebuild_is_shared_with_a_concurrent_query() {
    let dir = tempfile::tempdir().unwrap();
    let store = file_store(dir.path());
    let querying_source = Arc::new(MemorySource::new(&[("hours.txt", HOURS)]));
    let rebuilding_source = Arc::new(
        MemorySource::new(&[("hours-v2.txt", HOURS)]).with_delay(Duration::from_millis(50)),
    );
    let querying = engine(querying_source.clone(), hours_embedder(), store.clone());
    let rebuilding = engine(rebuilding_source.clone(), hours_embedder(), store.clone());

    let (report, answer) =
        tokio::join!(rebuilding.indexer().rebuild(), querying.answer(QUERY, 0.6));
    let (report, answer) = (report.unwrap(), answer.unwrap());

    assert_eq!(report.document_count, 1);
    assert_eq!(store.saves(), 1);
    assert_eq!(querying_source.listings.load(Ordering::SeqCst), 0);
    assert!(!answer.index_rebuilt());
    assert!(matches!(
        answer.outcome(),
        AnswerOutcome::Matched { source_id, .. } if source_id == "hours-v2.txt"
    ));

    let next = querying.answer(QUERY, 0.6).await.unwrap();
    assert!(!next.index_rebuilt());
    assert_eq!(next.outcome(), answer.outcome());
    assert_eq!(querying.stats().rebuilds, 0);
    assert_eq!(querying.stats().loads, 1);
}
