//! This module provides functionality for loading and handling the application's configuration.
//!
//! It defines the `VestraConfig` struct, which holds the configuration parameters,
//! and a `load_config` function to load the configuration from a YAML file.
//! Every field has a default, so a partial file only overrides what it names.
//!
//! # Examples
//!
//! Loading the configuration from a file:
//!
//! ```no_run
//! use vestra::config::{VestraConfig, load_config};
//!
//! let config: VestraConfig = load_config("/path/to/config.yaml").unwrap();
//! println!("{:?}", config.retrieval);
//! ```

use serde::{Deserialize, Serialize};
use std::{env, fs, path::PathBuf, time::Duration};

use tracing::*;

use crate::error::{Error, Result};
use crate::filter::FilterKind;

/// Multiplier applied to `k` when querying the vector index so the filter
/// chain has headroom. Too small a factor silently shortens result lists.
pub const DEFAULT_OVER_FETCH_FACTOR: usize = 4;

/// Default number of products a retrieval returns.
pub const DEFAULT_K: usize = 8;

/// Represents the application's configuration.
#[derive(Serialize, Deserialize, Debug, PartialEq, Clone)]
#[serde(default)]
pub struct VestraConfig {
    pub embedding: EmbeddingConfig,

    pub index: IndexConfig,

    /// SQLite database holding the versioned catalog.
    pub catalog_db_url: String,

    pub retrieval: RetrievalConfig,

    pub dedup: DedupConfig,

    pub composer: ComposerConfig,
}

impl Default for VestraConfig {
    fn default() -> Self {
        Self {
            embedding: EmbeddingConfig::default(),
            index: IndexConfig::default(),
            catalog_db_url: "vestra.db".to_string(),
            retrieval: RetrievalConfig::default(),
            dedup: DedupConfig::default(),
            composer: ComposerConfig::default(),
        }
    }
}

/// Which embedding strategy backs the index. Never mixed within one index.
#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Clone, Copy, Default)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingBackend {
    /// Hosted, OpenAI-compatible `/embeddings` endpoint.
    #[default]
    Remote,
    /// In-process BERT sentence encoder.
    Local,
}

#[derive(Serialize, Deserialize, Debug, PartialEq, Clone)]
#[serde(default)]
pub struct EmbeddingConfig {
    pub backend: EmbeddingBackend,

    /// Base URL of the embeddings API (remote backend).
    pub api_base: String,

    /// API key; falls back to `OPENAI_API_KEY` when unset.
    pub api_key: Option<String>,

    /// Remote model name, or Hugging Face repo id for the local backend.
    pub model: String,

    /// Declared vector dimension. Static per provider configuration.
    pub dimension: usize,

    pub timeout_secs: u64,

    /// Texts per request when building the index.
    pub batch_size: usize,

    /// Directory holding `config.json`, `tokenizer.json` and
    /// `model.safetensors`; downloaded from the hub when unset.
    pub local_model_dir: Option<PathBuf>,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            backend: EmbeddingBackend::Remote,
            api_base: "https://api.openai.com/v1".to_string(),
            api_key: None,
            model: "text-embedding-3-small".to_string(),
            dimension: 1536,
            timeout_secs: 30,
            batch_size: 64,
            local_model_dir: None,
        }
    }
}

impl EmbeddingConfig {
    /// Defaults for the local MiniLM encoder.
    pub fn local() -> Self {
        Self {
            backend: EmbeddingBackend::Local,
            model: "sentence-transformers/all-MiniLM-L6-v2".to_string(),
            dimension: 384,
            batch_size: 32,
            ..Self::default()
        }
    }

    pub fn resolved_api_key(&self) -> Option<String> {
        resolve_key(&self.api_key)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Clone, Copy, Default)]
#[serde(rename_all = "lowercase")]
pub enum IndexKind {
    /// Exact brute-force inner-product search.
    #[default]
    Flat,
    /// HNSW candidate generation with exact re-scoring.
    Hnsw,
}

#[derive(Serialize, Deserialize, Debug, PartialEq, Clone)]
#[serde(default)]
pub struct IndexConfig {
    pub path: PathBuf,
    pub kind: IndexKind,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("product_index.bin"),
            kind: IndexKind::Flat,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, PartialEq, Clone)]
#[serde(default)]
pub struct RetrievalConfig {
    pub default_k: usize,

    pub over_fetch_factor: usize,

    /// Filter chain, applied in this order.
    pub filters: Vec<FilterKind>,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            default_k: DEFAULT_K,
            over_fetch_factor: DEFAULT_OVER_FETCH_FACTOR,
            filters: vec![FilterKind::Gender, FilterKind::Budget],
        }
    }
}

#[derive(Serialize, Deserialize, Debug, PartialEq, Clone)]
#[serde(default)]
pub struct DedupConfig {
    pub enabled: bool,

    /// Maximum number of remembered result fingerprints.
    pub max_entries: u64,

    pub ttl_secs: u64,
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            max_entries: 1024,
            ttl_secs: 3600,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, PartialEq, Clone)]
#[serde(default)]
pub struct ComposerConfig {
    /// When false, every lookbook is the deterministic local composition.
    pub enabled: bool,

    pub api_base: String,

    pub api_key: Option<String>,

    pub model: String,

    pub max_tokens: u32,

    pub temperature: f32,

    pub timeout_secs: u64,

    /// Prior conversation turns handed to the model.
    pub history_turns: usize,

    /// Token budget for those turns (cl100k).
    pub history_max_tokens: usize,

    /// Items in the local fallback lookbook.
    pub fallback_items: usize,

    /// Prompt template name under `<config_dir>/templates/`; built-in when unset.
    pub template: Option<String>,
}

impl Default for ComposerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            api_base: "https://api.openai.com/v1".to_string(),
            api_key: None,
            model: "gpt-4o-mini".to_string(),
            max_tokens: 450,
            temperature: 0.25,
            timeout_secs: 60,
            history_turns: 10,
            history_max_tokens: 1024,
            fallback_items: 4,
            template: None,
        }
    }
}

impl ComposerConfig {
    pub fn resolved_api_key(&self) -> Option<String> {
        resolve_key(&self.api_key)
    }
}

fn resolve_key(configured: &Option<String>) -> Option<String> {
    configured
        .clone()
        .filter(|k| !k.trim().is_empty())
        .or_else(|| env::var("OPENAI_API_KEY").ok())
        .filter(|k| !k.trim().is_empty())
}

impl VestraConfig {
    /// Reject values that would make retrieval meaningless.
    pub fn validate(&self) -> Result<()> {
        if self.embedding.dimension == 0 {
            return Err(Error::Config("embedding.dimension must be positive".into()));
        }
        if self.embedding.batch_size == 0 {
            return Err(Error::Config("embedding.batch_size must be positive".into()));
        }
        if self.retrieval.over_fetch_factor == 0 {
            return Err(Error::Config(
                "retrieval.over_fetch_factor must be at least 1".into(),
            ));
        }
        if self.catalog_db_url.trim().is_empty() {
            return Err(Error::Config("catalog_db_url is empty".into()));
        }
        Ok(())
    }
}

/// Loads the application's configuration from a YAML file.
///
/// # Returns
///
/// - `Ok(VestraConfig)`: The loaded and validated configuration.
/// - `Err(Error)`: The file could not be read, parsed, or failed validation.
pub fn load_config(file: &str) -> Result<VestraConfig> {
    debug!("Loading config: {:?}", file);
    let content = fs::read_to_string(file)?;
    let config: VestraConfig = serde_yaml::from_str(&content)?;
    config.validate()?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_load_config_valid_file() {
        let mut temp_file = NamedTempFile::new().unwrap();
        writeln!(
            temp_file,
            r#"
catalog_db_url: "vestra.db"
embedding:
  backend: local
  model: "sentence-transformers/all-MiniLM-L6-v2"
  dimension: 384
index:
  path: "index_local.bin"
  kind: hnsw
retrieval:
  over_fetch_factor: 6
  filters: [budget, gender]
dedup:
  enabled: true
"#
        )
        .unwrap();

        let config = load_config(temp_file.path().to_str().unwrap()).unwrap();
        assert_eq!(config.catalog_db_url, "vestra.db");
        assert_eq!(config.embedding.backend, EmbeddingBackend::Local);
        assert_eq!(config.embedding.dimension, 384);
        assert_eq!(config.index.kind, IndexKind::Hnsw);
        assert_eq!(config.retrieval.over_fetch_factor, 6);
        assert_eq!(config.retrieval.default_k, DEFAULT_K);
        assert_eq!(
            config.retrieval.filters,
            vec![FilterKind::Budget, FilterKind::Gender]
        );
        assert!(config.dedup.enabled);
        assert_eq!(config.dedup.max_entries, 1024);
        assert_eq!(config.composer.model, "gpt-4o-mini");
    }

    #[test]
    fn test_load_config_invalid_file() {
        assert!(load_config("non/existent/path").is_err());
    }

    #[test]
    fn test_load_config_invalid_format() {
        let mut temp_file = NamedTempFile::new().unwrap();
        writeln!(temp_file, r#"invalid: config: format"#).unwrap();
        assert!(load_config(temp_file.path().to_str().unwrap()).is_err());
    }

    #[test]
    fn test_zero_over_fetch_is_rejected() {
        let mut temp_file = NamedTempFile::new().unwrap();
        writeln!(
            temp_file,
            "catalog_db_url: \"x.db\"\nretrieval:\n  over_fetch_factor: 0"
        )
        .unwrap();
        assert!(matches!(
            load_config(temp_file.path().to_str().unwrap()),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn test_explicit_key_wins_over_environment() {
        let cfg = EmbeddingConfig {
            api_key: Some("from-file".into()),
            ..EmbeddingConfig::default()
        };
        assert_eq!(cfg.resolved_api_key().as_deref(), Some("from-file"));
    }
}
