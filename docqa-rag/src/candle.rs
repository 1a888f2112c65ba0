//! Local sentence-transformer embeddings running on Candle.
//!
//! Only available with the `candle` feature. The model is fetched once from
//! the Hugging Face Hub (or the local hub cache) and runs on the CPU, so
//! repeated calls on the same input produce identical vectors.
//!
//! Any BERT-architecture sentence-transformer works. Sentences are
//! mean-pooled over the attention mask and L2-normalised.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use candle_core::{DType, Device, Tensor};
use candle_nn::VarBuilder;
use candle_transformers::models::bert::{BertModel, Config};
use hf_hub::api::tokio::{ApiBuilder, ApiRepo};
use hf_hub::{Repo, RepoType};
use serde::{Deserialize, Serialize};
use tokenizers::Tokenizer;
use tracing::{debug, info};

use crate::embedding::EmbeddingProvider;
use crate::error::{RagError, Result};

const PROVIDER: &str = "candle";

/// Hub repository used when none is configured.
pub const DEFAULT_MODEL_REPO: &str = "sentence-transformers/all-MiniLM-L6-v2";

/// Which local model to run and how.
///
/// The repository and revision are part of
/// [`model_id`](EmbeddingProvider::model_id), so switching models makes the
/// persisted index incompatible and triggers a rebuild.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct LocalModelConfig {
    /// Hugging Face Hub repository of a BERT-architecture sentence-transformer.
    pub model_repo: String,
    /// Git revision of the repository.
    pub revision: String,
    /// Tokens per input; longer inputs are truncated.
    pub max_tokens: usize,
    /// Hub cache directory. `None` uses the hub's default location.
    pub cache_dir: Option<PathBuf>,
}

impl Default for LocalModelConfig {
    fn default() -> Self {
        Self {
            model_repo: DEFAULT_MODEL_REPO.to_string(),
            revision: "main".to_string(),
            max_tokens: 256,
            cache_dir: None,
        }
    }
}

impl LocalModelConfig {
    /// Check that the parameters are usable.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::ConfigError`] for an empty repository or revision,
    /// or a zero token limit.
    pub fn validate(&self) -> Result<()> {
        if self.model_repo.trim().is_empty() {
            return Err(RagError::ConfigError("model_repo must not be empty".to_string()));
        }
        if self.revision.trim().is_empty() {
            return Err(RagError::ConfigError("revision must not be empty".to_string()));
        }
        if self.max_tokens == 0 {
            return Err(RagError::ConfigError("max_tokens must be greater than zero".to_string()));
        }
        Ok(())
    }
}

fn model_id_for(config: &LocalModelConfig, dimensions: usize) -> String {
    format!("{PROVIDER}/{}@{}/{dimensions}", config.model_repo, config.revision)
}

fn unavailable(message: impl Into<String>) -> RagError {
    RagError::CapabilityUnavailable { provider: PROVIDER.into(), message: message.into() }
}

/// Only `hidden_size` is needed before the model is built.
#[derive(Deserialize)]
struct HiddenSize {
    hidden_size: usize,
}

struct LoadedModel {
    model: BertModel,
    tokenizer: Tokenizer,
    device: Device,
}

/// An [`EmbeddingProvider`] running a sentence-transformer in-process.
///
/// # Example
///
/// ```rust,ignore
/// use docqa_rag::candle::{CandleEmbeddingProvider, LocalModelConfig};
///
/// let provider = CandleEmbeddingProvider::load(LocalModelConfig::default()).await?;
/// assert_eq!(provider.dimensions(), 384);
/// ```
pub struct CandleEmbeddingProvider {
    config: LocalModelConfig,
    dimensions: usize,
    inner: Arc<LoadedModel>,
}

impl CandleEmbeddingProvider {
    /// Download (or reuse from the cache) and load the configured model.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::ConfigError`] for an invalid config and
    /// [`RagError::CapabilityUnavailable`] if the model cannot be fetched or
    /// loaded.
    pub async fn load(config: LocalModelConfig) -> Result<Self> {
        config.validate()?;
        info!(
            model = %config.model_repo,
            revision = %config.revision,
            "loading local embedding model"
        );

        let mut builder = ApiBuilder::new();
        if let Some(dir) = &config.cache_dir {
            builder = builder.with_cache_dir(dir.clone());
        }
        let api = builder.build().map_err(|e| unavailable(format!("cannot reach model hub: {e}")))?;
        let repo = api.repo(Repo::with_revision(
            config.model_repo.clone(),
            RepoType::Model,
            config.revision.clone(),
        ));

        let tokenizer_path = fetch(&repo, "tokenizer.json").await?;
        let config_path = fetch(&repo, "config.json").await?;
        let weights_path = fetch(&repo, "model.safetensors").await?;

        let (loaded, dimensions) = tokio::task::spawn_blocking(move || {
            load_model(&tokenizer_path, &config_path, &weights_path)
        })
        .await
        .map_err(|e| unavailable(format!("model loading task failed: {e}")))??;

        info!(model = %config.model_repo, dimensions, "local embedding model ready");
        Ok(Self { config, dimensions, inner: Arc::new(loaded) })
    }

    /// The configuration the model was loaded with.
    pub fn config(&self) -> &LocalModelConfig {
        &self.config
    }
}

async fn fetch(repo: &ApiRepo, file: &str) -> Result<PathBuf> {
    debug!(file, "fetching model file");
    repo.get(file).await.map_err(|e| unavailable(format!("cannot fetch {file}: {e}")))
}

fn load_model(
    tokenizer_path: &Path,
    config_path: &Path,
    weights_path: &Path,
) -> Result<(LoadedModel, usize)> {
    let tokenizer = Tokenizer::from_file(tokenizer_path)
        .map_err(|e| unavailable(format!("cannot load tokenizer: {e}")))?;

    let raw = std::fs::read_to_string(config_path)
        .map_err(|e| unavailable(format!("cannot read model config: {e}")))?;
    let bert_config: Config = serde_json::from_str(&raw)
        .map_err(|e| unavailable(format!("unsupported model config: {e}")))?;
    let HiddenSize { hidden_size } = serde_json::from_str(&raw)
        .map_err(|e| unavailable(format!("model config has no hidden_size: {e}")))?;

    let weights = std::fs::read(weights_path)
        .map_err(|e| unavailable(format!("cannot read model weights: {e}")))?;
    let device = Device::Cpu;
    let vb = VarBuilder::from_buffered_safetensors(weights, DType::F32, &device)
        .map_err(|e| unavailable(format!("cannot load model weights: {e}")))?;
    let model = BertModel::load(vb, &bert_config)
        .map_err(|e| unavailable(format!("cannot build BERT model: {e}")))?;

    Ok((LoadedModel { model, tokenizer, device }, hidden_size))
}

impl LoadedModel {
    fn embed(&self, texts: &[String], max_tokens: usize) -> Result<Vec<Vec<f32>>> {
        let encodings = self
            .tokenizer
            .encode_batch(texts.to_vec(), true)
            .map_err(|e| unavailable(format!("tokenization failed: {e}")))?;

        let max_len = encodings.iter().map(|e| e.len()).max().unwrap_or(0).min(max_tokens).max(1);
        let mut ids = Vec::with_capacity(texts.len() * max_len);
        let mut mask = Vec::with_capacity(texts.len() * max_len);
        for encoding in &encodings {
            let tokens = encoding.get_ids();
            let len = tokens.len().min(max_len);
            ids.extend_from_slice(&tokens[..len]);
            mask.extend(std::iter::repeat_n(1u32, len));
            ids.extend(std::iter::repeat_n(0u32, max_len - len));
            mask.extend(std::iter::repeat_n(0u32, max_len - len));
        }

        self.forward(ids, mask, (texts.len(), max_len))
            .map_err(|e| unavailable(format!("inference failed: {e}")))
    }

    fn forward(
        &self,
        ids: Vec<u32>,
        mask: Vec<u32>,
        shape: (usize, usize),
    ) -> candle_core::Result<Vec<Vec<f32>>> {
        let input_ids = Tensor::from_vec(ids, shape, &self.device)?;
        let attention_mask = Tensor::from_vec(mask, shape, &self.device)?;
        let token_type_ids = input_ids.zeros_like()?;
        let hidden = self.model.forward(&input_ids, &token_type_ids, Some(&attention_mask))?;
        normalize(&mean_pool(&hidden, &attention_mask)?)?.to_vec2::<f32>()
    }
}

/// Average token embeddings `(batch, tokens, hidden)` over unmasked tokens.
fn mean_pool(hidden: &Tensor, attention_mask: &Tensor) -> candle_core::Result<Tensor> {
    let mask = attention_mask.to_dtype(DType::F32)?.unsqueeze(2)?;
    let summed = hidden.broadcast_mul(&mask)?.sum(1)?;
    let counts = mask.sum(1)?.clamp(1e-9, f64::MAX)?;
    summed.broadcast_div(&counts)
}

fn normalize(embeddings: &Tensor) -> candle_core::Result<Tensor> {
    let norm = embeddings.sqr()?.sum_keepdim(1)?.sqrt()?.clamp(1e-12, f64::MAX)?;
    embeddings.broadcast_div(&norm)
}

#[async_trait]
impl EmbeddingProvider for CandleEmbeddingProvider {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self.embed_batch(&[text])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| unavailable("model returned no embedding"))
    }

    async fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        debug!(provider = PROVIDER, batch_size = texts.len(), "embedding batch");

        let inner = Arc::clone(&self.inner);
        let owned: Vec<String> = texts.iter().map(|t| t.to_string()).collect();
        let max_tokens = self.config.max_tokens;
        tokio::task::spawn_blocking(move || inner.embed(&owned, max_tokens))
            .await
            .map_err(|e| unavailable(format!("inference task failed: {e}")))?
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn model_id(&self) -> String {
        model_id_for(&self.config, self.dimensions)
    }
}
