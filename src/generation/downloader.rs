use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use hf_hub::api::sync::ApiBuilder;
use tracing::info;

use super::GenerationSettings;
use crate::util::ensure_directory;

/// Primary weights: an explicit `model_path` wins over the hub download.
pub fn ensure_gguf_model(settings: &GenerationSettings) -> Result<PathBuf> {
    if let Some(path) = settings.model_path.as_ref() {
        if !path.is_file() {
            bail!("generation model file not found: {}", path.display());
        }
        return Ok(path.clone());
    }

    fetch_gguf(settings, &settings.filename)
}

/// Fetches `filename` from the configured repo into (or reuses it from) the
/// hub cache.
pub fn fetch_gguf(settings: &GenerationSettings, filename: &str) -> Result<PathBuf> {
    ensure_directory(&settings.cache_dir)?;
    info!(
        repo_id = %settings.repo_id,
        filename,
        cache_dir = %settings.cache_dir.display(),
        "resolving generation model"
    );

    let api = ApiBuilder::new()
        .with_cache_dir(settings.cache_dir.clone())
        .build()
        .context("failed to create hf-hub api")?;
    let path = api
        .model(settings.repo_id.clone())
        .get(filename)
        .with_context(|| format!("failed to download {}/{}", settings.repo_id, filename))?;

    info!(path = %path.display(), "generation model available");
    Ok(path)
}
