use anyhow::{Context, Result, bail};
use tracing::debug;

use crate::index::VectorIndex;
use crate::model::RetrievalResult;
use crate::semantic::EmbeddingProvider;

pub const DEFAULT_TOP_K: usize = 3;

/// Embeds `question` and returns the `k` nearest schema chunks. Fewer than
/// `k` come back only when the index holds fewer chunks.
pub fn retrieve<E>(
    index: &VectorIndex,
    embedder: &E,
    question: &str,
    k: usize,
) -> Result<RetrievalResult>
where
    E: EmbeddingProvider + ?Sized,
{
    if k == 0 {
        bail!("top_k must be at least 1");
    }
    if index.is_empty() {
        bail!("schema index has no chunks");
    }
    if embedder.model_id() != index.model_id() {
        bail!(
            "question embedder '{}' does not match index model '{}'",
            embedder.model_id(),
            index.model_id()
        );
    }

    let query = embedder
        .embed(question)
        .context("failed to embed question")?;
    let chunks = index.similarity_search(&query, k);

    debug!(
        k,
        returned = chunks.len(),
        ordinals = ?chunks.iter().map(|chunk| chunk.ordinal).collect::<Vec<usize>>(),
        scores = ?chunks.iter().map(|chunk| chunk.score).collect::<Vec<f64>>(),
        "retrieved schema context"
    );

    Ok(RetrievalResult { chunks })
}
