use anyhow::Result;
use tracing::info;

use super::{embedding_settings, load_schema_index};
use crate::cli::IndexArgs;
use crate::semantic::initialize_embeddings;

pub fn run(args: IndexArgs) -> Result<()> {
    info!(
        schema_path = %args.schema.schema_path.display(),
        index_dir = %args.schema.index_dir.display(),
        refresh_mode = args.schema.refresh_mode.as_str(),
        "index requested"
    );

    let embedder = initialize_embeddings(&embedding_settings(&args.embedding))?;
    let index = load_schema_index(&args.schema, &embedder)?;

    println!(
        "schema index ready: {} chunks, model {}, {} dimensions",
        index.len(),
        index.model_id(),
        index.dimensions()
    );
    Ok(())
}
