use candle_core::{Device, Tensor};
use pylate_rs::ColBERT;
use tracing::info;

use crate::error::{Error, Result};

pub const DEFAULT_MODEL_ID: &str = "lightonai/GTE-ModernColBERT-v1";

/// Select the best available compute device.
///
/// Uses CUDA when compiled with the `cuda` feature, Metal when compiled with
/// the `metal` feature, and falls back to CPU otherwise.
fn default_device() -> Device {
    #[cfg(feature = "cuda")]
    {
        if let Ok(device) = Device::new_cuda(0) {
            return device;
        }
    }

    #[cfg(feature = "metal")]
    {
        if let Ok(device) = Device::new_metal(0) {
            return device;
        }
    }

    Device::Cpu
}

/// Owns the ColBERT reranking model, loading it on first use.
pub struct ModelManager {
    model: Option<ColBERT>,
    model_id: String,
}

impl ModelManager {
    /// The model is not loaded until the first call to `encode_documents`
    /// or `encode_query`.
    pub fn new(model_id: String) -> Self {
        Self {
            model: None,
            model_id,
        }
    }

    /// Returns the model ID that will be (or has been) loaded.
    pub fn model_id(&self) -> &str {
        &self.model_id
    }

    pub fn is_loaded(&self) -> bool {
        self.model.is_some()
    }

    /// Ensures the model is loaded, downloading from HuggingFace Hub if needed.
    fn ensure_loaded(&mut self) -> Result<&mut ColBERT> {
        if self.model.is_none() {
            info!(model = %self.model_id, "loading reranking model");
            let colbert: ColBERT = ColBERT::from(&self.model_id)
                .with_device(default_device())
                .try_into()
                .map_err(|e| {
                    Error::Model(format!(
                        "failed to load {}: {e}",
                        self.model_id
                    ))
                })?;
            self.model = Some(colbert);
        }

        self.model
            .as_mut()
            .ok_or_else(|| Error::Model("model failed to load".into()))
    }

    /// Encodes passages into token-level embeddings, shape `[B, T, D]`.
    pub fn encode_documents(&mut self, texts: &[String]) -> Result<Tensor> {
        let model = self.ensure_loaded()?;
        model
            .encode(texts, false)
            .map_err(|e| Error::Model(format!("passage encoding failed: {e}")))
    }

    /// Encodes a query string into a `[Q, D]` token embedding matrix.
    pub fn encode_query(&mut self, query: &str) -> Result<Tensor> {
        let model = self.ensure_loaded()?;
        let embeddings = model
            .encode(&[query.to_string()], true)
            .map_err(|e| Error::Model(format!("query encoding failed: {e}")))?;
        // [1, Q, D] -> [Q, D]
        embeddings
            .squeeze(0)
            .map_err(|e| Error::Model(format!("unexpected query shape: {e}")))
    }
}

impl std::fmt::Debug for ModelManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelManager")
            .field("model_id", &self.model_id)
            .field("loaded", &self.is_loaded())
            .finish()
    }
}
