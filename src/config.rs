//! Runtime configuration.
//!
//! Loaded from `config.json` in the data directory (every field optional),
//! then overridden from the environment, then validated before any
//! component is built. The API key is only ever read from the environment.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::{
    chunking::ChunkingConfig,
    error::{Error, Result},
    generator::DecodingParams,
    model_manager::DEFAULT_MODEL_ID,
    preamble::Language,
};

pub const ENDPOINT_ENV_VAR: &str = "HYDRAG_ENDPOINT";
pub const MODEL_ENV_VAR: &str = "HYDRAG_MODEL";
pub const API_KEY_ENV_VAR: &str = "HYDRAG_API_KEY";
pub const RERANK_MODEL_ENV_VAR: &str = "HYDRAG_RERANK_MODEL";

const DEFAULT_ENDPOINT: &str =
    "https://inference.generativeai.us-chicago-1.oci.oraclecloud.com";
const DEFAULT_EMBED_MODEL: &str = "cohere.embed-multilingual-v3.0";
const DEFAULT_CHAT_MODEL: &str = "cohere.command-r-plus";

/// Which chat API family the generator speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GeneratorFamily {
    /// Documents are passed natively and answers carry citation spans.
    #[default]
    Grounded,
    /// Plain system/user messages; the context is inlined, no citations.
    Messages,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "backend", rename_all = "snake_case")]
pub enum RerankBackend {
    /// Local ColBERT late-interaction scoring.
    Colbert { model: String },
    /// Remote rerank service.
    Http { endpoint: String, model: String },
}

impl Default for RerankBackend {
    fn default() -> Self {
        RerankBackend::Colbert {
            model: DEFAULT_MODEL_ID.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    pub endpoint: String,
    pub model: String,
    /// Texts per embedding request.
    pub batch_size: usize,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            model: DEFAULT_EMBED_MODEL.to_string(),
            batch_size: 90,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneratorConfig {
    pub family: GeneratorFamily,
    pub endpoint: String,
    pub model: String,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            family: GeneratorFamily::Grounded,
            endpoint: DEFAULT_ENDPOINT.to_string(),
            model: DEFAULT_CHAT_MODEL.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalConfig {
    pub top_k: usize,
    /// Chunks kept after reranking.
    pub top_n: usize,
    pub rerank: bool,
    pub reranker: RerankBackend,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: 8,
            top_n: 4,
            rerank: false,
            reranker: RerankBackend::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    pub connect_timeout_secs: u64,
    pub timeout_secs: u64,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            connect_timeout_secs: 10,
            timeout_secs: 240,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RagConfig {
    pub chunking: ChunkingConfig,
    pub embedding: EmbeddingConfig,
    pub generator: GeneratorConfig,
    pub decoding: DecodingParams,
    pub retrieval: RetrievalConfig,
    pub language: Language,
    pub default_collection: String,
    /// Tenant identifier forwarded to the inference service, if it needs one.
    pub compartment_id: Option<String>,
    pub http: HttpConfig,
    #[serde(skip)]
    pub api_key: Option<String>,
}

impl Default for RagConfig {
    fn default() -> Self {
        Self {
            chunking: ChunkingConfig::default(),
            embedding: EmbeddingConfig::default(),
            generator: GeneratorConfig::default(),
            decoding: DecodingParams::default(),
            retrieval: RetrievalConfig::default(),
            language: Language::default(),
            default_collection: "MY_BOOKS".to_string(),
            compartment_id: None,
            http: HttpConfig::default(),
            api_key: None,
        }
    }
}

impl RagConfig {
    /// Load the configuration file if it exists, apply environment
    /// overrides, and validate the result.
    pub fn load(path: &Path) -> Result<Self> {
        let mut config = if path.exists() {
            let contents = std::fs::read_to_string(path)?;
            Self::from_json(&contents).map_err(|e| match e {
                Error::Config(reason) => {
                    Error::Config(format!("{}: {reason}", path.display()))
                }
                other => other,
            })?
        } else {
            Self::default()
        };

        config.apply_overrides(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Parse a configuration document. Unknown keys and unknown backend
    /// selectors are rejected.
    pub fn from_json(contents: &str) -> Result<Self> {
        serde_json::from_str(contents)
            .map_err(|e| Error::Config(format!("invalid configuration: {e}")))
    }

    /// Apply overrides from a key lookup (the process environment in
    /// production).
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(endpoint) = lookup(ENDPOINT_ENV_VAR) {
            self.embedding.endpoint.clone_from(&endpoint);
            self.generator.endpoint = endpoint;
        }
        if let Some(model) = lookup(MODEL_ENV_VAR) {
            self.generator.model = model;
        }
        if let Some(key) = lookup(API_KEY_ENV_VAR)
            && !key.is_empty()
        {
            self.api_key = Some(key);
        }
        if let Some(model) = lookup(RERANK_MODEL_ENV_VAR) {
            match &mut self.retrieval.reranker {
                RerankBackend::Colbert { model: m }
                | RerankBackend::Http { model: m, .. } => *m = model,
            }
        }
    }

    pub fn validate(&self) -> Result<()> {
        self.chunking.validate()?;
        self.decoding.validate()?;

        if self.embedding.batch_size == 0 {
            return Err(Error::Config(
                "embedding.batch_size must be at least 1".into(),
            ));
        }
        if self.retrieval.top_k == 0 {
            return Err(Error::Config("retrieval.top_k must be at least 1".into()));
        }
        if self.retrieval.top_n == 0 || self.retrieval.top_n > self.retrieval.top_k
        {
            return Err(Error::Config(format!(
                "retrieval.top_n ({}) must be between 1 and top_k ({})",
                self.retrieval.top_n, self.retrieval.top_k
            )));
        }
        if self.http.connect_timeout_secs == 0 || self.http.timeout_secs == 0 {
            return Err(Error::Config("HTTP timeouts must be positive".into()));
        }
        if self.default_collection.trim().is_empty() {
            return Err(Error::Config(
                "default_collection must not be empty".into(),
            ));
        }
        Ok(())
    }
}
