//! # Local Directory Example
//!
//! Answers questions over the `.txt` files in a directory. The first run
//! builds `./vector_index`; later runs reuse it, and a deleted or damaged
//! index is rebuilt on the next question.
//!
//! Uses `HashingEmbeddingProvider` so it runs with **zero API keys**.
//!
//! Run: `cargo run --example local_directory -- ./documents "What are the office hours?"`

use std::sync::Arc;

use docqa_rag::{
    DirectorySource, FileIndexStore, HashingEmbeddingProvider, RagConfig, RetrievalEngine,
    validate_query,
};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let mut args = std::env::args().skip(1);
    let documents = args.next().unwrap_or_else(|| "./documents".to_string());
    let question = args.next().unwrap_or_else(|| "What are the office hours?".to_string());

    let query = match validate_query(&question) {
        Ok(query) => query,
        Err(rejection) => {
            println!("{}", rejection.user_message());
            return Ok(());
        }
    };

    let engine = RetrievalEngine::builder()
        .config(RagConfig::default())
        .embedding_provider(Arc::new(HashingEmbeddingProvider::default()))
        .document_source(Arc::new(DirectorySource::new(documents)))
        .index_store(Arc::new(FileIndexStore::new("./vector_index")))
        .build()?;

    let answer = engine.answer_with_default_threshold(query).await?;
    println!("{}", answer.message());
    if let Some(document) = answer.full_document() {
        println!("\n--- source document ---\n{document}");
    }
    if answer.index_rebuilt() {
        println!("\n(index was rebuilt to answer this question)");
    }

    let stats = engine.stats();
    println!("rebuilds: {}, loads: {}", stats.rebuilds, stats.loads);
    Ok(())
}
