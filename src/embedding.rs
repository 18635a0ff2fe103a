//! # Embedding providers
//!
//! Converts text into fixed-length `f32` vectors. Two interchangeable
//! strategies exist, chosen once from [`EmbeddingConfig::backend`]:
//!
//! - [`RemoteEmbedder`]: an OpenAI-compatible `/embeddings` endpoint
//!   (e.g. `text-embedding-3-small`, 1536-d).
//! - [`LocalEmbedder`]: an in-process BERT sentence encoder run with Candle
//!   (e.g. `all-MiniLM-L6-v2`, 384-d), mean pooled and L2 normalised.
//!
//! An index is built with exactly one strategy and must be queried with the
//! same one. Each provider reports its [`EmbeddingSpace`]; the index records
//! the space it was built in and retrieval refuses to pair mismatched spaces.
//!
//! If the configured strategy cannot run, construction or the call fails with
//! [`Error::EmbeddingUnavailable`]. There is no fallback to another strategy
//! or to synthetic vectors.
//!
//! ```no_run
//! use vestra::config::EmbeddingConfig;
//! use vestra::embedding::build_provider;
//!
//! # async fn demo() -> vestra::error::Result<()> {
//! let provider = build_provider(&EmbeddingConfig::local())?;
//! let vectors = provider
//!     .embed(&["navy wool blazer".to_string(), "silk scarf".to_string()])
//!     .await?;
//! assert_eq!(vectors.len(), 2);
//! assert_eq!(vectors[0].len(), provider.dimension());
//! # Ok(()) }
//! ```

use async_trait::async_trait;
use candle_core::{DType, Device, Tensor};
use candle_nn::VarBuilder;
use candle_transformers::models::bert::{BertModel, Config, DTYPE};
use hf_hub::{Repo, RepoType, api::sync::Api};
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, HeaderMap, HeaderValue};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokenizers::{Tokenizer, TruncationParams};
use tracing::{debug, info};

use crate::config::{EmbeddingBackend, EmbeddingConfig};
use crate::error::{Error, Result};

/// Identifies a semantic space: who produced the vectors, with which model,
/// at which dimension. Two spaces are compatible only when all three match.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmbeddingSpace {
    pub provider: String,
    pub model: String,
    pub dimension: usize,
}

impl EmbeddingSpace {
    pub fn new(provider: impl Into<String>, model: impl Into<String>, dimension: usize) -> Self {
        Self {
            provider: provider.into(),
            model: model.into(),
            dimension,
        }
    }
}

impl fmt::Display for EmbeddingSpace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}@{}", self.provider, self.model, self.dimension)
    }
}

/// Text to vector conversion.
///
/// `embed` returns one vector per input, in input order, each exactly
/// `dimension()` long.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    fn space(&self) -> &EmbeddingSpace;

    fn dimension(&self) -> usize {
        self.space().dimension
    }

    /// Embed a single query string.
    async fn embed_query(&self, text: &str) -> Result<Vec<f32>> {
        self.embed(&[text.to_string()])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| Error::EmbeddingUnavailable("provider returned no vector".into()))
    }
}

/// Construct the provider selected by `config.backend`.
pub fn build_provider(config: &EmbeddingConfig) -> Result<Arc<dyn EmbeddingProvider>> {
    info!(
        "Using {:?} embeddings ({}, dim={})",
        config.backend, config.model, config.dimension
    );
    let provider: Arc<dyn EmbeddingProvider> = match config.backend {
        EmbeddingBackend::Remote => Arc::new(RemoteEmbedder::new(config)?),
        EmbeddingBackend::Local => Arc::new(LocalEmbedder::load(config)?),
    };
    Ok(provider)
}

fn unavailable<E: fmt::Display>(context: &'static str) -> impl FnOnce(E) -> Error {
    move |e| Error::EmbeddingUnavailable(format!("{context}: {e}"))
}

/// Embeddings client for OpenAI-compatible endpoints.
pub struct RemoteEmbedder {
    client: reqwest::Client,
    endpoint: String,
    space: EmbeddingSpace,
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingDatum>,
}

#[derive(Deserialize)]
struct EmbeddingDatum {
    index: usize,
    embedding: Vec<f32>,
}

impl RemoteEmbedder {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let api_key = config.resolved_api_key().ok_or_else(|| {
            Error::EmbeddingUnavailable("no API key configured for remote embeddings".into())
        })?;

        let mut headers = HeaderMap::new();
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {}", api_key.trim()))
                .map_err(unavailable("invalid API key"))?,
        );
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        let client = reqwest::Client::builder()
            .timeout(config.timeout())
            .default_headers(headers)
            .build()
            .map_err(unavailable("failed to build HTTP client"))?;

        Ok(Self {
            client,
            endpoint: format!("{}/embeddings", config.api_base.trim_end_matches('/')),
            space: EmbeddingSpace::new("remote", config.model.clone(), config.dimension),
        })
    }
}

#[async_trait]
impl EmbeddingProvider for RemoteEmbedder {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        debug!("POST {} ({} inputs)", self.endpoint, texts.len());
        let response = self
            .client
            .post(&self.endpoint)
            .json(&EmbeddingRequest {
                model: &self.space.model,
                input: texts,
            })
            .send()
            .await
            .map_err(unavailable("embedding request failed"))?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<body unavailable>".to_string());
            return Err(Error::EmbeddingUnavailable(format!(
                "embedding endpoint returned {status}: {body}"
            )));
        }

        let mut parsed: EmbeddingResponse = response
            .json()
            .await
            .map_err(unavailable("malformed embedding response"))?;
        parsed.data.sort_by_key(|d| d.index);

        if parsed.data.len() != texts.len() {
            return Err(Error::EmbeddingUnavailable(format!(
                "endpoint returned {} embeddings for {} inputs",
                parsed.data.len(),
                texts.len()
            )));
        }

        let vectors: Vec<Vec<f32>> = parsed.data.into_iter().map(|d| d.embedding).collect();
        for v in &vectors {
            if v.len() != self.space.dimension {
                return Err(Error::DimensionMismatch {
                    expected: self.space.dimension,
                    actual: v.len(),
                });
            }
        }
        Ok(vectors)
    }

    fn space(&self) -> &EmbeddingSpace {
        &self.space
    }
}

/// Sentence embeddings model using Candle (pure Rust).
pub struct SentenceEncoder {
    model: BertModel,
    tokenizer: Tokenizer,
    device: Device,
    hidden_size: usize,
}

impl SentenceEncoder {
    /// Load from a directory holding `config.json`, `tokenizer.json` and
    /// `model.safetensors`, or fetch those files from the Hugging Face Hub.
    pub fn load(model_id: &str, local_dir: Option<&Path>) -> Result<Self> {
        let device = Device::Cpu;

        let (config_file, tokenizer_file, weights_file) = match local_dir {
            Some(dir) => (
                dir.join("config.json"),
                dir.join("tokenizer.json"),
                dir.join("model.safetensors"),
            ),
            None => fetch_from_hub(model_id)?,
        };
        for file in [&config_file, &tokenizer_file, &weights_file] {
            if !file.is_file() {
                return Err(Error::EmbeddingUnavailable(format!(
                    "model file missing: {}",
                    file.display()
                )));
            }
        }

        let raw_config = std::fs::read_to_string(&config_file)?;
        let hidden_size = serde_json::from_str::<serde_json::Value>(&raw_config)?
            .get("hidden_size")
            .and_then(|v| v.as_u64())
            .ok_or_else(|| Error::EmbeddingUnavailable("config.json lacks hidden_size".into()))?
            as usize;
        let config: Config = serde_json::from_str(&raw_config)?;

        let mut tokenizer =
            Tokenizer::from_file(&tokenizer_file).map_err(unavailable("failed to load tokenizer"))?;
        tokenizer
            .with_truncation(Some(TruncationParams {
                max_length: 512,
                ..Default::default()
            }))
            .map_err(unavailable("failed to configure truncation"))?;

        let vb = unsafe {
            VarBuilder::from_mmaped_safetensors(&[weights_file], DTYPE, &device)
                .map_err(unavailable("failed to map weights"))?
        };
        let model = BertModel::load(vb, &config).map_err(unavailable("failed to build model"))?;

        Ok(Self {
            model,
            tokenizer,
            device,
            hidden_size,
        })
    }

    pub fn hidden_size(&self) -> usize {
        self.hidden_size
    }

    pub fn encode_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        texts
            .iter()
            .map(|t| self.encode(t).map_err(unavailable("inference failed")))
            .collect()
    }

    /// Encode text into a unit-length embedding.
    fn encode(&self, text: &str) -> candle_core::Result<Vec<f32>> {
        let tokens = self
            .tokenizer
            .encode(text, true)
            .map_err(|e| candle_core::Error::Msg(format!("tokenization error: {e}")))?;

        let token_ids = Tensor::new(tokens.get_ids(), &self.device)?.unsqueeze(0)?;
        let token_type_ids = Tensor::new(tokens.get_type_ids(), &self.device)?.unsqueeze(0)?;

        let output = self.model.forward(&token_ids, &token_type_ids, None)?;
        let pooled = self.mean_pooling(&output, tokens.get_attention_mask())?;
        let normalized = self.normalize(&pooled)?;
        normalized.to_vec1::<f32>()
    }

    /// Mean over token embeddings weighted by the attention mask.
    fn mean_pooling(&self, embeddings: &Tensor, attention_mask: &[u32]) -> candle_core::Result<Tensor> {
        // [1, seq_len, 1] for broadcasting against [1, seq_len, hidden]
        let mask = Tensor::new(attention_mask, &self.device)?
            .to_dtype(DType::F32)?
            .unsqueeze(0)?
            .unsqueeze(2)?;

        let sum = embeddings.broadcast_mul(&mask)?.sum(1)?;
        let count = mask.sum(1)?.clamp(1f32, f32::INFINITY)?;
        sum.broadcast_div(&count)?.squeeze(0)
    }

    fn normalize(&self, tensor: &Tensor) -> candle_core::Result<Tensor> {
        let norm = tensor.sqr()?.sum_all()?.sqrt()?;
        tensor.broadcast_div(&norm)
    }
}

fn fetch_from_hub(model_id: &str) -> Result<(PathBuf, PathBuf, PathBuf)> {
    info!("Fetching {} from the Hugging Face Hub", model_id);
    let repo = Repo::with_revision(model_id.to_string(), RepoType::Model, "main".to_string());
    let api = Api::new().map_err(unavailable("hub unavailable"))?;
    let api_repo = api.repo(repo);
    Ok((
        api_repo.get("config.json").map_err(unavailable("config.json"))?,
        api_repo.get("tokenizer.json").map_err(unavailable("tokenizer.json"))?,
        api_repo
            .get("model.safetensors")
            .map_err(unavailable("model.safetensors"))?,
    ))
}

/// In-process encoder provider. Inference runs on the blocking pool.
pub struct LocalEmbedder {
    encoder: Arc<SentenceEncoder>,
    space: EmbeddingSpace,
}

impl LocalEmbedder {
    pub fn load(config: &EmbeddingConfig) -> Result<Self> {
        let encoder = SentenceEncoder::load(&config.model, config.local_model_dir.as_deref())?;
        if encoder.hidden_size() != config.dimension {
            return Err(Error::DimensionMismatch {
                expected: config.dimension,
                actual: encoder.hidden_size(),
            });
        }
        Ok(Self {
            encoder: Arc::new(encoder),
            space: EmbeddingSpace::new("local", config.model.clone(), config.dimension),
        })
    }
}

#[async_trait]
impl EmbeddingProvider for LocalEmbedder {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let encoder = Arc::clone(&self.encoder);
        let texts = texts.to_vec();
        tokio::task::spawn_blocking(move || encoder.encode_batch(&texts))
            .await
            .map_err(unavailable("encoder task failed"))?
    }

    fn space(&self) -> &EmbeddingSpace {
        &self.space
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! Deterministic stand-in for a real model: each vocabulary word owns one
    //! axis, plus a constant bias axis so no text maps to the zero vector.

    use super::*;

    pub struct KeywordEmbedder {
        vocab: Vec<&'static str>,
        space: EmbeddingSpace,
    }

    impl KeywordEmbedder {
        pub fn new(vocab: &[&'static str]) -> Self {
            Self {
                vocab: vocab.to_vec(),
                space: EmbeddingSpace::new("test", "keywords", vocab.len() + 1),
            }
        }

        pub fn vector(&self, text: &str) -> Vec<f32> {
            let text = text.to_lowercase();
            let words: Vec<&str> = text
                .split(|c: char| !c.is_alphanumeric())
                .filter(|w| !w.is_empty())
                .collect();
            let mut v: Vec<f32> = self
                .vocab
                .iter()
                .map(|term| words.iter().filter(|w| *w == term).count() as f32)
                .collect();
            v.push(0.1);
            v
        }
    }

    #[async_trait]
    impl EmbeddingProvider for KeywordEmbedder {
        async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            Ok(texts.iter().map(|t| self.vector(t)).collect())
        }

        fn space(&self) -> &EmbeddingSpace {
            &self.space
        }
    }
}
