use std::num::NonZeroU32;
use std::path::{Path, PathBuf};

use anyhow::{Result, anyhow};
use chrono::Utc;
use llama_cpp_2::context::params::LlamaContextParams;
use llama_cpp_2::llama_backend::LlamaBackend;
use llama_cpp_2::llama_batch::LlamaBatch;
use llama_cpp_2::model::params::LlamaModelParams;
use llama_cpp_2::model::{AddBos, LlamaModel, Special};
use llama_cpp_2::sampling::LlamaSampler;
use tracing::{debug, info, warn};

use super::device::{DeviceKind, DevicePlan};
use super::downloader::{ensure_gguf_model, fetch_gguf};
use super::{
    GenerationProvider, GenerationSettings, SamplingConfig, WeightsSource, load_attempts,
};

const PROMPT_BATCH: usize = 512;
const PENALTY_WINDOW: i32 = 64;

/// GGUF model loaded through llama.cpp. The KV cache lives in a context that
/// is created per call and dropped before `generate` returns.
pub struct LlamaSession {
    backend: LlamaBackend,
    model: LlamaModel,
    model_id: String,
    device: DeviceKind,
    context_size: u32,
}

impl LlamaSession {
    /// Walks [`load_attempts`] in order and keeps the first weights that load.
    /// The last failure is returned when every attempt fails.
    pub fn load(settings: &GenerationSettings, plan: &DevicePlan) -> Result<Self> {
        let backend =
            LlamaBackend::init().map_err(|err| anyhow!("failed to initialize llama backend: {err}"))?;
        let attempts = load_attempts(plan, settings.fallback_filename.as_deref());

        let mut last_error = None;
        for (position, attempt) in attempts.iter().enumerate() {
            let path = match &attempt.weights {
                WeightsSource::Primary => ensure_gguf_model(settings)?,
                WeightsSource::Fallback(filename) => fetch_gguf(settings, filename)?,
            };

            match load_weights(&backend, &path, attempt.gpu_layers) {
                Ok(model) => {
                    return Ok(Self::ready(backend, model, &path, attempt.device, settings));
                }
                Err(err) => {
                    if position + 1 < attempts.len() {
                        warn!(
                            error = %err,
                            device = attempt.device.as_str(),
                            "accelerated load failed; falling back to cpu"
                        );
                    }
                    last_error = Some(err);
                }
            }
        }

        Err(last_error.unwrap_or_else(|| anyhow!("no weights load was attempted")))
    }

    fn ready(
        backend: LlamaBackend,
        model: LlamaModel,
        path: &Path,
        device: DeviceKind,
        settings: &GenerationSettings,
    ) -> Self {
        let model_id = model_id_for(path);
        info!(
            model_id = %model_id,
            device = device.as_str(),
            path = %path.display(),
            "generation session ready"
        );
        Self {
            backend,
            model,
            model_id,
            device,
            context_size: settings.context_size,
        }
    }

}

impl GenerationProvider for LlamaSession {
    fn model_id(&self) -> &str {
        &self.model_id
    }

    fn generate(&mut self, prompt: &str, sampling: &SamplingConfig) -> Result<String> {
        let prompt = sanitize_prompt(prompt);
        let tokens = self
            .model
            .str_to_token(&prompt, AddBos::Always)
            .map_err(|err| anyhow!("tokenization failed: {err}"))?;
        if tokens.is_empty() {
            return Ok(String::new());
        }

        let needed = (tokens.len() + sampling.max_new_tokens) as u32;
        let n_ctx = self.context_size.max(needed);
        let ctx_params = LlamaContextParams::default()
            .with_n_ctx(NonZeroU32::new(n_ctx))
            .with_n_batch(PROMPT_BATCH.max(tokens.len()) as u32);
        let mut context = self
            .model
            .new_context(&self.backend, ctx_params)
            .map_err(|err| anyhow!("failed to create generation context: {err}"))?;

        let mut batch = LlamaBatch::new(PROMPT_BATCH.max(tokens.len()), 1);
        let last = tokens.len() - 1;
        for (position, token) in tokens.iter().enumerate() {
            batch
                .add(*token, position as i32, &[0], position == last)
                .map_err(|err| anyhow!("failed to add prompt token: {err}"))?;
        }
        context
            .decode(&mut batch)
            .map_err(|err| anyhow!("prompt decode failed: {err}"))?;

        let mut sampler = build_sampler(sampling);
        let mut output = String::new();
        let mut position = tokens.len() as i32;
        let mut generated = 0usize;

        while generated < sampling.max_new_tokens {
            let token = sampler.sample(&context, batch.n_tokens() - 1);
            sampler.accept(token);
            if self.model.is_eog_token(token) {
                break;
            }

            // Partial multi-byte pieces are skipped; the decode below still advances.
            if let Ok(piece) = self.model.token_to_str(token, Special::Plaintext) {
                output.push_str(&piece);
            }
            generated += 1;

            batch.clear();
            batch
                .add(token, position, &[0], true)
                .map_err(|err| anyhow!("failed to add generated token: {err}"))?;
            context
                .decode(&mut batch)
                .map_err(|err| anyhow!("decode failed: {err}"))?;
            position += 1;
        }

        drop(context);
        debug!(
            device = self.device.as_str(),
            prompt_tokens = tokens.len(),
            generated_tokens = generated,
            "generation finished; context released"
        );

        Ok(output)
    }
}

fn load_weights(backend: &LlamaBackend, path: &Path, gpu_layers: i32) -> Result<LlamaModel> {
    // Negative layer counts mean "all"; llama.cpp clamps oversized values.
    let layers = u32::try_from(gpu_layers).unwrap_or(u32::MAX);
    let params = LlamaModelParams::default().with_n_gpu_layers(layers);
    LlamaModel::load_from_file(backend, path, &params)
        .map_err(|err| anyhow!("failed to load {}: {err}", path.display()))
}

fn build_sampler(sampling: &SamplingConfig) -> LlamaSampler {
    let penalties = LlamaSampler::penalties(PENALTY_WINDOW, sampling.repetition_penalty, 0.0, 0.0);
    if sampling.do_sample {
        LlamaSampler::chain_simple([
            penalties,
            LlamaSampler::temp(sampling.temperature),
            LlamaSampler::top_p(sampling.top_p, 1),
            LlamaSampler::dist(Utc::now().timestamp_subsec_nanos()),
        ])
    } else {
        LlamaSampler::chain_simple([penalties, LlamaSampler::greedy()])
    }
}

fn sanitize_prompt(prompt: &str) -> String {
    prompt
        .chars()
        .filter(|character| *character != '\0')
        .collect()
}

fn model_id_for(path: &Path) -> String {
    path.file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_else(|| PathBuf::from(path).display().to_string())
}
