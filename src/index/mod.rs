use std::path::PathBuf;
use std::time::Instant;

use anyhow::{Context, Result, bail};
use chrono::Utc;
use tracing::{info, warn};

use crate::cli::IndexRefreshMode;
use crate::model::{IndexBuildManifest, RetrievedChunk, SchemaChunk};
use crate::semantic::{EmbeddingProvider, cosine_similarity};
use crate::util::{now_utc_string, sha256_text, utc_compact_string, write_json_pretty};

mod chunking;
mod store;

pub use chunking::{DEFAULT_CHUNK_OVERLAP, DEFAULT_CHUNK_SIZE, split_schema_text};
pub use store::{
    IndexStoreStatus, index_db_path, open_index_connection, open_index_read_only, read_store_status,
};

use store::{discard_store, load_index, replace_index};

#[derive(Debug, Clone)]
pub struct IndexedChunk {
    pub chunk: SchemaChunk,
    pub embedding: Vec<f32>,
}

/// Schema chunks and their embeddings, all produced by one embedding model.
#[derive(Debug, Clone)]
pub struct VectorIndex {
    model_id: String,
    dimensions: usize,
    schema_sha256: String,
    entries: Vec<IndexedChunk>,
}

impl VectorIndex {
    pub fn new(
        model_id: String,
        dimensions: usize,
        schema_sha256: String,
        entries: Vec<IndexedChunk>,
    ) -> Self {
        Self {
            model_id,
            dimensions,
            schema_sha256,
            entries,
        }
    }

    pub fn model_id(&self) -> &str {
        &self.model_id
    }

    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    pub fn schema_sha256(&self) -> &str {
        &self.schema_sha256
    }

    pub fn entries(&self) -> &[IndexedChunk] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Cosine ranking of every chunk against `query`; highest score first,
    /// equal scores keep source order.
    pub fn similarity_search(&self, query: &[f32], k: usize) -> Vec<RetrievedChunk> {
        let mut scored = self
            .entries
            .iter()
            .map(|entry| RetrievedChunk {
                ordinal: entry.chunk.ordinal,
                score: cosine_similarity(query, &entry.embedding),
                text: entry.chunk.text.clone(),
            })
            .collect::<Vec<RetrievedChunk>>();

        scored.sort_by(|left, right| {
            right
                .score
                .total_cmp(&left.score)
                .then(left.ordinal.cmp(&right.ordinal))
        });
        scored.truncate(k);
        scored
    }
}

#[derive(Debug, Clone)]
pub struct IndexOptions {
    pub persist_dir: PathBuf,
    pub refresh_mode: IndexRefreshMode,
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    /// Recorded in the build manifest only.
    pub schema_label: String,
}

impl IndexOptions {
    pub fn new(persist_dir: PathBuf) -> Self {
        Self {
            persist_dir,
            refresh_mode: IndexRefreshMode::Missing,
            chunk_size: DEFAULT_CHUNK_SIZE,
            chunk_overlap: DEFAULT_CHUNK_OVERLAP,
            schema_label: String::new(),
        }
    }
}

/// Loads the persisted index for the embedder's model, or builds and persists
/// one from `schema_text`. An unreadable store is discarded and rebuilt.
pub fn build_or_load_index<E>(
    schema_text: &str,
    options: &IndexOptions,
    embedder: &E,
) -> Result<VectorIndex>
where
    E: EmbeddingProvider + ?Sized,
{
    let schema_sha256 = sha256_text(schema_text);

    if options.refresh_mode == IndexRefreshMode::Missing {
        match try_load(options, embedder) {
            Ok(Some(index)) => {
                if index.schema_sha256() != schema_sha256 {
                    warn!(
                        persist_dir = %options.persist_dir.display(),
                        "schema text changed since the index was built; run `index --refresh-mode full` to re-embed"
                    );
                }
                info!(
                    model_id = %index.model_id(),
                    chunks = index.len(),
                    "loaded existing schema index"
                );
                return Ok(index);
            }
            Ok(None) => {
                info!(
                    persist_dir = %options.persist_dir.display(),
                    model_id = %embedder.model_id(),
                    "no persisted schema index; building"
                );
            }
            Err(err) => {
                warn!(
                    error = %err,
                    persist_dir = %options.persist_dir.display(),
                    "persisted schema index unreadable; rebuilding"
                );
                discard_store(&options.persist_dir)?;
            }
        }
    }

    build_index(schema_text, &schema_sha256, options, embedder)
}

fn try_load<E>(options: &IndexOptions, embedder: &E) -> Result<Option<VectorIndex>>
where
    E: EmbeddingProvider + ?Sized,
{
    if !index_db_path(&options.persist_dir).exists() {
        return Ok(None);
    }

    let connection = open_index_connection(&options.persist_dir)?;
    let Some(index) = load_index(&connection, embedder.model_id())? else {
        return Ok(None);
    };

    if index.dimensions() != embedder.dimensions() {
        bail!(
            "index has {} dimensions but embedding model '{}' produces {}",
            index.dimensions(),
            embedder.model_id(),
            embedder.dimensions()
        );
    }

    Ok(Some(index))
}

fn build_index<E>(
    schema_text: &str,
    schema_sha256: &str,
    options: &IndexOptions,
    embedder: &E,
) -> Result<VectorIndex>
where
    E: EmbeddingProvider + ?Sized,
{
    let started = Instant::now();
    let started_at = now_utc_string();

    let chunks = split_schema_text(schema_text, options.chunk_size, options.chunk_overlap);
    if chunks.is_empty() {
        bail!("schema text is empty; nothing to index");
    }

    let texts = chunks
        .iter()
        .map(|chunk| chunk.text.clone())
        .collect::<Vec<String>>();
    let embeddings = embedder
        .embed_batch(&texts)
        .context("failed to embed schema chunks")?;
    if embeddings.len() != chunks.len() {
        bail!(
            "embedding model returned {} vectors for {} chunks",
            embeddings.len(),
            chunks.len()
        );
    }

    let entries = chunks
        .into_iter()
        .zip(embeddings)
        .map(|(chunk, embedding)| IndexedChunk { chunk, embedding })
        .collect::<Vec<IndexedChunk>>();
    if let Some(entry) = entries
        .iter()
        .find(|entry| entry.embedding.len() != embedder.dimensions())
    {
        bail!(
            "chunk {} embedded to {} dimensions, expected {}",
            entry.chunk.ordinal,
            entry.embedding.len(),
            embedder.dimensions()
        );
    }

    let index = VectorIndex::new(
        embedder.model_id().to_string(),
        embedder.dimensions(),
        schema_sha256.to_string(),
        entries,
    );

    let mut connection = match open_index_connection(&options.persist_dir) {
        Ok(connection) => connection,
        Err(err) => {
            warn!(
                error = %err,
                persist_dir = %options.persist_dir.display(),
                "schema index store unusable; recreating"
            );
            discard_store(&options.persist_dir)?;
            open_index_connection(&options.persist_dir)?
        }
    };
    replace_index(
        &mut connection,
        &index,
        options.chunk_size,
        options.chunk_overlap,
    )?;

    let duration_ms = started.elapsed().as_millis();
    let manifest = IndexBuildManifest {
        manifest_version: 1,
        run_id: format!("index-{}", utc_compact_string(Utc::now())),
        generated_at: started_at,
        model_id: index.model_id().to_string(),
        embedding_dim: index.dimensions(),
        schema_path: options.schema_label.clone(),
        schema_sha256: schema_sha256.to_string(),
        chunk_size: options.chunk_size,
        chunk_overlap: options.chunk_overlap,
        chunk_count: index.len(),
        refresh_mode: options.refresh_mode.as_str().to_string(),
        duration_ms,
        status: "completed".to_string(),
    };
    let manifest_path = options.persist_dir.join("manifests").join(format!(
        "index_build_{}.json",
        utc_compact_string(Utc::now())
    ));
    write_json_pretty(&manifest_path, &manifest)?;

    info!(
        model_id = %index.model_id(),
        chunks = index.len(),
        duration_ms,
        manifest = %manifest_path.display(),
        "schema index built"
    );

    Ok(index)
}
