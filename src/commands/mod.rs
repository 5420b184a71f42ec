use std::time::Duration;

use anyhow::Result;

use crate::cli::{EmbeddingArgs, GenerationArgs, PipelineArgs, SchemaArgs};
use crate::executor::QueryExecutor;
use crate::generation::{GenerationProvider, GenerationSettings, initialize_generation};
use crate::index::{IndexOptions, VectorIndex, build_or_load_index};
use crate::pipeline::RagPipeline;
use crate::semantic::{EmbeddingProvider, EmbeddingSettings, initialize_embeddings};
use crate::util::read_text_file;

pub mod ask;
pub mod index;
pub mod repl;
pub mod seed;
pub mod status;

pub type SessionPipeline = RagPipeline<Box<dyn EmbeddingProvider>, Box<dyn GenerationProvider>>;

pub fn embedding_settings(args: &EmbeddingArgs) -> EmbeddingSettings {
    EmbeddingSettings {
        backend: args.embedding_backend,
        model_name: args.embedding_model.clone(),
        cache_dir: args.embedding_cache_dir.clone(),
    }
}

pub fn generation_settings(args: &GenerationArgs) -> GenerationSettings {
    GenerationSettings {
        model_path: args.model_path.clone(),
        repo_id: args.model_repo.clone(),
        filename: args.model_file.clone(),
        fallback_filename: args.fallback_model_file.clone(),
        cache_dir: args.model_cache_dir.clone(),
        context_size: args.context_size,
        force_cpu: args.force_cpu,
    }
}

pub fn index_options(args: &SchemaArgs) -> IndexOptions {
    IndexOptions {
        refresh_mode: args.refresh_mode,
        chunk_size: args.chunk_size,
        chunk_overlap: args.chunk_overlap,
        schema_label: args.schema_path.display().to_string(),
        ..IndexOptions::new(args.index_dir.clone())
    }
}

/// Reads the schema file and loads (or builds) its index for `embedder`.
pub fn load_schema_index<E>(args: &SchemaArgs, embedder: &E) -> Result<VectorIndex>
where
    E: EmbeddingProvider + ?Sized,
{
    let schema_text = read_text_file(&args.schema_path)?;
    build_or_load_index(&schema_text, &index_options(args), embedder)
}

/// Loads both model sessions and the index once; the pipeline owns them for
/// the rest of the process.
pub fn build_pipeline(args: &PipelineArgs) -> Result<SessionPipeline> {
    let embedder = initialize_embeddings(&embedding_settings(&args.embedding))?;
    let index = load_schema_index(&args.schema, &embedder)?;
    let generator = initialize_generation(&generation_settings(&args.generation))?;
    let executor = QueryExecutor::new(
        &args.database.database_url,
        Duration::from_millis(args.database.busy_timeout_ms),
    );

    Ok(RagPipeline::new(index, embedder, generator, executor)
        .with_top_k(args.top_k)
        .with_dialect(args.dialect))
}
