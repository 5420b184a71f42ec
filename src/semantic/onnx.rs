//! Sentence-transformer embeddings through ONNX Runtime.
//!
//! Model and tokenizer files are fetched once through `hf-hub` into the
//! configured cache directory; later sessions reuse the cached files.

use std::path::Path;
use std::sync::Mutex;

use anyhow::{Context, Result, anyhow};
use ndarray::{Array2, Axis, Ix2};
use ort::execution_providers::{CPUExecutionProvider, CUDAExecutionProvider};
use ort::session::Session;
use ort::session::builder::GraphOptimizationLevel;
use ort::value::Value;
use tokenizers::Tokenizer;
use tracing::{info, warn};

use super::{EmbeddingProvider, normalize_vector};
use crate::util::ensure_directory;

const ONNX_MODEL_FILE: &str = "onnx/model.onnx";
const TOKENIZER_FILE: &str = "tokenizer.json";

pub struct OnnxEmbeddingModel {
    session: Mutex<Session>,
    tokenizer: Tokenizer,
    model_id: String,
    dimensions: usize,
}

impl std::fmt::Debug for OnnxEmbeddingModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OnnxEmbeddingModel")
            .field("model_id", &self.model_id)
            .field("dimensions", &self.dimensions)
            .finish_non_exhaustive()
    }
}

impl OnnxEmbeddingModel {
    pub fn from_hub(model_name: &str, cache_dir: &Path) -> Result<Self> {
        ensure_directory(cache_dir)?;
        let api = hf_hub::api::sync::ApiBuilder::new()
            .with_cache_dir(cache_dir.to_path_buf())
            .build()
            .context("failed to create hf-hub client")?;
        let repo = api.model(model_name.to_string());

        let model_path = repo
            .get(ONNX_MODEL_FILE)
            .with_context(|| format!("failed to fetch {model_name}/{ONNX_MODEL_FILE}"))?;
        let tokenizer_path = repo
            .get(TOKENIZER_FILE)
            .with_context(|| format!("failed to fetch {model_name}/{TOKENIZER_FILE}"))?;

        Self::from_files(model_name, &model_path, &tokenizer_path)
    }

    pub fn from_files(model_name: &str, model_path: &Path, tokenizer_path: &Path) -> Result<Self> {
        let cuda_result = Session::builder()
            .context("failed to create session builder")?
            .with_execution_providers([CUDAExecutionProvider::default().build()])
            .context("failed to set CUDA execution provider")?
            .with_optimization_level(GraphOptimizationLevel::Level3)
            .context("failed to set optimization level")?
            .commit_from_file(model_path);

        let session = match cuda_result {
            Ok(session) => {
                info!(model = %model_name, "onnx embedding model loaded on accelerator");
                session
            }
            Err(err) => {
                warn!(error = %err, "accelerator execution provider failed; using cpu");
                Session::builder()
                    .context("failed to create session builder")?
                    .with_execution_providers([CPUExecutionProvider::default().build()])
                    .context("failed to set CPU execution provider")?
                    .with_optimization_level(GraphOptimizationLevel::Level3)
                    .context("failed to set optimization level")?
                    .commit_from_file(model_path)
                    .with_context(|| {
                        format!("failed to load onnx model from {}", model_path.display())
                    })?
            }
        };

        let tokenizer = Tokenizer::from_file(tokenizer_path)
            .map_err(|err| anyhow!("failed to load tokenizer: {err}"))?;

        let mut model = Self {
            session: Mutex::new(session),
            tokenizer,
            model_id: model_name.to_string(),
            dimensions: 0,
        };
        model.dimensions = model.run_pooled("dimension check")?.len();

        Ok(model)
    }

    fn run_pooled(&self, text: &str) -> Result<Vec<f32>> {
        let encoding = self
            .tokenizer
            .encode(text, true)
            .map_err(|err| anyhow!("tokenization failed: {err}"))?;

        let input_ids: Vec<i64> = encoding.get_ids().iter().map(|&id| id as i64).collect();
        let attention_mask: Vec<i64> = encoding
            .get_attention_mask()
            .iter()
            .map(|&mask| mask as i64)
            .collect();
        let token_type_ids = vec![0_i64; input_ids.len()];
        let sequence_len = input_ids.len();

        let input_ids_array = Array2::from_shape_vec((1, sequence_len), input_ids)
            .context("failed to create input_ids array")?;
        let attention_mask_array = Array2::from_shape_vec((1, sequence_len), attention_mask.clone())
            .context("failed to create attention_mask array")?;
        let token_type_ids_array = Array2::from_shape_vec((1, sequence_len), token_type_ids)
            .context("failed to create token_type_ids array")?;

        let mut session = self
            .session
            .lock()
            .map_err(|_| anyhow!("onnx session lock poisoned"))?;
        let outputs = session.run(ort::inputs![
            "input_ids" => Value::from_array(input_ids_array)?,
            "attention_mask" => Value::from_array(attention_mask_array)?,
            "token_type_ids" => Value::from_array(token_type_ids_array)?
        ])?;

        let output_array = outputs[0]
            .try_extract_array::<f32>()
            .context("failed to extract output tensor")?;
        let tokens = output_array
            .index_axis(Axis(0), 0)
            .into_dimensionality::<Ix2>()
            .context("unexpected output tensor rank")?;
        let hidden_dim = tokens.ncols();

        let mut pooled = vec![0.0_f32; hidden_dim];
        let mut mask_total = 0.0_f32;
        for (position, mask) in attention_mask.iter().enumerate() {
            let weight = *mask as f32;
            mask_total += weight;
            for (dim, value) in pooled.iter_mut().enumerate() {
                *value += tokens[[position, dim]] * weight;
            }
        }
        for value in &mut pooled {
            *value /= mask_total.max(1e-9);
        }

        normalize_vector(&mut pooled);
        Ok(pooled)
    }
}

impl EmbeddingProvider for OnnxEmbeddingModel {
    fn model_id(&self) -> &str {
        &self.model_id
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let embedding = self.run_pooled(text)?;
        if embedding.len() != self.dimensions {
            anyhow::bail!(
                "unexpected embedding dimension {} (expected {})",
                embedding.len(),
                self.dimensions
            );
        }
        Ok(embedding)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    #[ignore] // downloads model files on first run
    fn hub_model_embeds_with_expected_dimension() {
        let cache_dir = std::env::temp_dir().join(super::super::DEFAULT_MODEL_CACHE_DIR);
        let model = OnnxEmbeddingModel::from_hub(super::super::DEFAULT_ONNX_MODEL_NAME, &cache_dir)
            .unwrap();
        let embedding = model.embed("CREATE TABLE users (user_id SERIAL)").unwrap();
        assert_eq!(embedding.len(), 384);
    }
}
