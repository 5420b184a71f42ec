use std::path::PathBuf;

use anyhow::Result;
use tracing::info;

pub mod device;
#[cfg(feature = "llama")]
mod downloader;
#[cfg(feature = "llama")]
mod llama;

use device::DeviceKind;

pub use device::{DevicePlan, plan_device};
#[cfg(feature = "llama")]
pub use llama::LlamaSession;

pub const DEFAULT_GGUF_REPO_ID: &str = "defog/sqlcoder-7b-2";
pub const DEFAULT_GGUF_FILENAME: &str = "sqlcoder-7b-q5_k_m.gguf";
pub const DEFAULT_CONTEXT_SIZE: u32 = 4096;

/// Fixed sampling profile used for both SQL and answer generation.
/// Sampling is stochastic, so output is not reproducible across calls.
#[derive(Debug, Clone, PartialEq)]
pub struct SamplingConfig {
    pub max_new_tokens: usize,
    pub do_sample: bool,
    pub temperature: f32,
    pub top_p: f32,
    pub repetition_penalty: f32,
}

impl Default for SamplingConfig {
    fn default() -> Self {
        Self {
            max_new_tokens: 512,
            do_sample: true,
            temperature: 0.7,
            top_p: 0.95,
            repetition_penalty: 1.1,
        }
    }
}

/// `prompt -> text` capability. `generate` takes `&mut self`: one session
/// serves at most one generation at a time, and implementations release
/// their per-call scratch memory before returning.
pub trait GenerationProvider {
    fn model_id(&self) -> &str;

    fn generate(&mut self, prompt: &str, sampling: &SamplingConfig) -> Result<String>;
}

impl<T: GenerationProvider + ?Sized> GenerationProvider for Box<T> {
    fn model_id(&self) -> &str {
        (**self).model_id()
    }

    fn generate(&mut self, prompt: &str, sampling: &SamplingConfig) -> Result<String> {
        (**self).generate(prompt, sampling)
    }
}

#[derive(Debug, Clone)]
#[cfg_attr(not(feature = "llama"), allow(dead_code))]
pub struct GenerationSettings {
    /// Local GGUF file; skips the hub download when set.
    pub model_path: Option<PathBuf>,
    pub repo_id: String,
    pub filename: String,
    /// Lower-precision weights tried on CPU when the accelerator load fails.
    pub fallback_filename: Option<String>,
    pub cache_dir: PathBuf,
    pub context_size: u32,
    pub force_cpu: bool,
}

/// Which GGUF file a load attempt reads.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(not(feature = "llama"), allow(dead_code))]
pub enum WeightsSource {
    Primary,
    Fallback(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(not(feature = "llama"), allow(dead_code))]
pub struct LoadAttempt {
    pub device: DeviceKind,
    pub gpu_layers: i32,
    pub weights: WeightsSource,
}

/// Ordered weight loads for `plan`. An accelerated plan tries the accelerator
/// first and then exactly one host load, on `fallback_filename` when given.
/// A host plan loads the primary weights once.
#[cfg_attr(not(feature = "llama"), allow(dead_code))]
pub fn load_attempts(plan: &DevicePlan, fallback_filename: Option<&str>) -> Vec<LoadAttempt> {
    let host = |weights| LoadAttempt {
        device: DeviceKind::Cpu,
        gpu_layers: 0,
        weights,
    };

    if !plan.is_accelerated() {
        return vec![host(WeightsSource::Primary)];
    }

    let retry = match fallback_filename {
        Some(filename) => WeightsSource::Fallback(filename.to_string()),
        None => WeightsSource::Primary,
    };
    vec![
        LoadAttempt {
            device: plan.kind,
            gpu_layers: plan.gpu_layers,
            weights: WeightsSource::Primary,
        },
        host(retry),
    ]
}

/// Loads tokenizer and weights once. The caller owns the returned session for
/// the rest of the process.
pub fn initialize_generation(settings: &GenerationSettings) -> Result<Box<dyn GenerationProvider>> {
    let plan = plan_device(settings.force_cpu);
    info!(
        device = plan.kind.as_str(),
        gpu_layers = plan.gpu_layers,
        "generation device selected"
    );
    load_session(settings, &plan)
}

#[cfg(feature = "llama")]
fn load_session(
    settings: &GenerationSettings,
    plan: &DevicePlan,
) -> Result<Box<dyn GenerationProvider>> {
    Ok(Box::new(LlamaSession::load(settings, plan)?))
}

#[cfg(not(feature = "llama"))]
fn load_session(
    _settings: &GenerationSettings,
    _plan: &DevicePlan,
) -> Result<Box<dyn GenerationProvider>> {
    anyhow::bail!("no generation backend compiled in; rebuild with `--features llama`")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn accelerated() -> DevicePlan {
        DevicePlan {
            kind: DeviceKind::Cuda,
            gpu_layers: -1,
        }
    }

    #[test]
    fn host_plan_loads_the_primary_weights_once() {
        let attempts = load_attempts(&DevicePlan::cpu(), Some("sqlcoder-7b-q2_k.gguf"));
        assert_eq!(
            attempts,
            vec![LoadAttempt {
                device: DeviceKind::Cpu,
                gpu_layers: 0,
                weights: WeightsSource::Primary,
            }]
        );
    }

    #[test]
    fn accelerated_plan_retries_the_primary_weights_on_the_host() {
        let attempts = load_attempts(&accelerated(), None);
        assert_eq!(attempts.len(), 2);
        assert_eq!(attempts[0].device, DeviceKind::Cuda);
        assert_eq!(attempts[0].gpu_layers, -1);
        assert_eq!(attempts[0].weights, WeightsSource::Primary);
        assert_eq!(
            attempts[1],
            LoadAttempt {
                device: DeviceKind::Cpu,
                gpu_layers: 0,
                weights: WeightsSource::Primary,
            }
        );
    }

    #[test]
    fn accelerated_plan_retries_with_fallback_weights_when_configured() {
        let attempts = load_attempts(&accelerated(), Some("sqlcoder-7b-q2_k.gguf"));
        assert_eq!(attempts.len(), 2);
        assert_eq!(attempts[0].weights, WeightsSource::Primary);
        assert_eq!(attempts[1].device, DeviceKind::Cpu);
        assert_eq!(
            attempts[1].weights,
            WeightsSource::Fallback("sqlcoder-7b-q2_k.gguf".to_string())
        );
    }

    #[test]
    fn zero_offloaded_layers_count_as_a_host_plan() {
        let plan = DevicePlan {
            kind: DeviceKind::Metal,
            gpu_layers: 0,
        };
        assert_eq!(load_attempts(&plan, None).len(), 1);
    }

    #[test]
    fn default_sampling_matches_the_fixed_profile() {
        let sampling = SamplingConfig::default();
        assert_eq!(sampling.max_new_tokens, 512);
        assert!(sampling.do_sample);
        assert_eq!(sampling.temperature, 0.7);
        assert_eq!(sampling.top_p, 0.95);
        assert_eq!(sampling.repetition_penalty, 1.1);
    }

    #[cfg(not(feature = "llama"))]
    #[test]
    fn initialize_without_backend_fails_with_hint() {
        let settings = GenerationSettings {
            model_path: None,
            repo_id: DEFAULT_GGUF_REPO_ID.to_string(),
            filename: DEFAULT_GGUF_FILENAME.to_string(),
            fallback_filename: None,
            cache_dir: std::env::temp_dir(),
            context_size: DEFAULT_CONTEXT_SIZE,
            force_cpu: true,
        };
        let err = initialize_generation(&settings).err().expect("should fail");
        assert!(err.to_string().contains("--features llama"));
    }
}
