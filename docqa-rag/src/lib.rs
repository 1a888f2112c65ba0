//! # docqa-rag
//!
//! Question answering over a private document collection.
//!
//! The write path turns source files into a persisted vector index:
//! [`DocumentSource`] → [`TextExtractor`] → [`Chunker`] →
//! [`EmbeddingProvider`] → [`VectorIndex`] → [`IndexStore`].
//!
//! The read path is [`RetrievalEngine::answer`]: it loads the persisted
//! index (rebuilding it when missing or unloadable), searches for the
//! nearest chunks, and returns the first one whose distance is below the
//! caller's threshold together with its full source document.
//!
//! Scores are squared Euclidean distances: lower is closer. See
//! [`clears_threshold`].
//!
//! ## Features
//!
//! - `openai`: [`openai::OpenAIEmbeddingProvider`], a remote embedding backend.
//! - `candle`: [`candle::CandleEmbeddingProvider`], a local sentence-transformer
//!   run in-process.

pub mod chunking;
pub mod config;
pub mod document;
pub mod embedding;
pub mod engine;
pub mod error;
pub mod index;
pub mod indexer;
pub mod ingest;
pub mod query;
pub mod storage;

#[cfg(feature = "openai")]
pub mod openai;

#[cfg(feature = "candle")]
pub mod candle;

pub use chunking::{Chunker, RecursiveChunker};
pub use config::{RagConfig, RagConfigBuilder};
pub use document::{
    Answer, AnswerOutcome, Chunk, EmbeddedChunk, QueryResult, SourceDocument, clears_threshold,
};
pub use embedding::{EmbeddingProvider, HashingEmbeddingProvider};
pub use engine::{EngineStats, RetrievalEngine, RetrievalEngineBuilder};
pub use error::{IndexFault, RagError, Result};
pub use index::VectorIndex;
pub use indexer::{BuildReport, Indexer};
pub use ingest::{
    DirectorySource, DocumentSource, FileRef, FormatTag, PlainTextExtractor, TextExtractor,
    collect_documents,
};
pub use query::{QueryRejection, validate_query};
pub use storage::{FileIndexStore, IndexStamp, IndexStore};

#[cfg(feature = "openai")]
pub use openai::OpenAIEmbeddingProvider;

#[cfg(feature = "candle")]
pub use candle::{CandleEmbeddingProvider, LocalModelConfig};
