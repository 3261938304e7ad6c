use std::sync::Mutex;

use candle_core::{Device, Tensor};
use pylate_rs::ColBERT;
use tracing::info;

use crate::{
    config_db::ConfigDb,
    embedder::QueryEmbedder,
    embedding::MultiVectorEmbedding,
    error::{Error, Result},
};

pub const DEFAULT_MODEL_ID: &str = "lightonai/GTE-ModernColBERT-v1";
/// Token vector width of [`DEFAULT_MODEL_ID`] after its projection layer.
pub const DEFAULT_MODEL_DIMENSION: usize = 128;
pub const MODEL_ENV_VAR: &str = "PAGEBERT_MODEL";

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

/// Manages the ColBERT model lifecycle, loading it on first use.
pub struct ModelManager {
    model: Option<ColBERT>,
    model_id: String,
}

/// Resolve the model ID from, in order of priority:
/// 1. An explicit ID (from --model)
/// 2. The `PAGEBERT_MODEL` environment variable
/// 3. The `model` setting in config.db
/// 4. The default model (`lightonai/GTE-ModernColBERT-v1`)
pub fn resolve_model_id(
    explicit: Option<&str>,
    config_db: &ConfigDb,
) -> Result<String> {
    if let Some(id) = explicit {
        return Ok(id.to_string());
    }
    if let Ok(id) = std::env::var(MODEL_ENV_VAR) {
        return Ok(id);
    }
    config_db.get_setting_or("model", DEFAULT_MODEL_ID)
}

impl ModelManager {
    /// Creates a `ModelManager` for the given model ID. Nothing is loaded
    /// until the first query is encoded.
    pub fn with_model_id(model_id: String) -> Self {
        Self {
            model: None,
            model_id,
        }
    }

    pub fn model_id(&self) -> &str {
        &self.model_id
    }

    pub fn is_loaded(&self) -> bool {
        self.model.is_some()
    }

    /// Ensures the model is loaded, downloading from HuggingFace Hub if needed.
    fn ensure_loaded(&mut self) -> Result<&mut ColBERT> {
        if self.model.is_none() {
            info!(model = %self.model_id, "loading ColBERT model");
            let colbert: ColBERT = ColBERT::from(&self.model_id)
                .with_device(default_device())
                .try_into()
                .map_err(|e| {
                    Error::EmbeddingFailure(format!(
                        "failed to load model {}: {e}",
                        self.model_id
                    ))
                })?;
            self.model = Some(colbert);
        }

        self.model.as_mut().ok_or_else(|| {
            Error::EmbeddingFailure("model failed to initialize".to_string())
        })
    }

    /// Encodes a query string into ColBERT token-level embeddings.
    ///
    /// Returns a 2D tensor of shape `[Q, D]` where Q is the number of query
    /// tokens and D is the embedding dimension.
    pub fn encode_query(&mut self, query: &str) -> Result<Tensor> {
        let model = self.ensure_loaded()?;
        let embeddings = model
            .encode(&[query.to_string()], true)
            .map_err(|e| Error::EmbeddingFailure(e.to_string()))?;
        // Squeeze the batch dimension: [1, Q, D] -> [Q, D]
        embeddings
            .squeeze(0)
            .map_err(|e| Error::EmbeddingFailure(e.to_string()))
    }
}

/// [`QueryEmbedder`] backed by a lazily loaded ColBERT model.
///
/// Inference needs exclusive access to the model, so concurrent requests
/// serialize on the embedding step only.
pub struct ColbertEmbedder {
    model: Mutex<ModelManager>,
}

impl ColbertEmbedder {
    pub fn new(model: ModelManager) -> Self {
        Self {
            model: Mutex::new(model),
        }
    }

    /// Load the model now instead of on the first query.
    pub fn preload(&self) -> Result<()> {
        let mut model = self.model.lock().map_err(|_| {
            Error::EmbeddingFailure("model lock poisoned".to_string())
        })?;
        model.ensure_loaded().map(|_| ())
    }
}

impl QueryEmbedder for ColbertEmbedder {
    fn embed_query(&self, text: &str) -> Result<MultiVectorEmbedding> {
        let mut model = self.model.lock().map_err(|_| {
            Error::EmbeddingFailure("model lock poisoned".to_string())
        })?;

        let rows = model
            .encode_query(text)?
            .to_dtype(candle_core::DType::F32)
            .and_then(|t| t.to_vec2::<f32>())
            .map_err(|e| {
                Error::EmbeddingFailure(format!(
                    "unexpected query embedding tensor: {e}"
                ))
            })?;

        MultiVectorEmbedding::from_rows(rows)
            .map_err(|e| Error::EmbeddingFailure(e.to_string()))
    }
}
