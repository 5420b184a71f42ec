use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

use crate::executor::{DEFAULT_BUSY_TIMEOUT_MS, DEFAULT_DATABASE_URL};
use crate::generation::{DEFAULT_CONTEXT_SIZE, DEFAULT_GGUF_FILENAME, DEFAULT_GGUF_REPO_ID};
use crate::index::{DEFAULT_CHUNK_OVERLAP, DEFAULT_CHUNK_SIZE};
use crate::retrieval::DEFAULT_TOP_K;

#[derive(Parser, Debug)]
#[command(
    name = "sqlrag",
    version,
    about = "Answer natural-language questions over a SQL database using retrieved schema context"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Build the schema index, or confirm an existing one loads.
    Index(IndexArgs),
    /// Answer a single question.
    Ask(AskArgs),
    /// Answer questions read from stdin until `quit`.
    Repl(ReplArgs),
    /// Create the bundled schema in the target database and load sample rows.
    Seed(SeedArgs),
    /// Report schema index state and database table row counts.
    Status(StatusArgs),
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
pub enum IndexRefreshMode {
    Missing,
    Full,
}

impl IndexRefreshMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Missing => "missing",
            Self::Full => "full",
        }
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
pub enum EmbeddingBackend {
    LocalHash,
    Onnx,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
pub enum SqlDialect {
    Sqlite,
    Postgres,
}

impl SqlDialect {
    pub fn display_name(self) -> &'static str {
        match self {
            Self::Sqlite => "SQLite",
            Self::Postgres => "PostgreSQL",
        }
    }
}

#[derive(Args, Debug, Clone)]
pub struct SchemaArgs {
    #[arg(long, env = "SQLRAG_SCHEMA_PATH", default_value = "database/schema.sql")]
    pub schema_path: PathBuf,

    #[arg(long, env = "SQLRAG_INDEX_DIR", default_value = "tmp/schema_index")]
    pub index_dir: PathBuf,

    #[arg(long, value_enum, default_value_t = IndexRefreshMode::Missing)]
    pub refresh_mode: IndexRefreshMode,

    #[arg(long, default_value_t = DEFAULT_CHUNK_SIZE)]
    pub chunk_size: usize,

    #[arg(long, default_value_t = DEFAULT_CHUNK_OVERLAP)]
    pub chunk_overlap: usize,
}

#[derive(Args, Debug, Clone)]
pub struct EmbeddingArgs {
    #[arg(long, value_enum, default_value_t = EmbeddingBackend::LocalHash)]
    pub embedding_backend: EmbeddingBackend,

    /// Hub repository for the onnx backend.
    #[arg(long)]
    pub embedding_model: Option<String>,

    /// Hub cache for the onnx backend; defaults to `<tmp>/sentence_transformers_cache`.
    #[arg(long)]
    pub embedding_cache_dir: Option<PathBuf>,
}

#[derive(Args, Debug, Clone)]
pub struct GenerationArgs {
    /// Local GGUF file; skips the hub download.
    #[arg(long, env = "SQLRAG_MODEL_PATH")]
    pub model_path: Option<PathBuf>,

    #[arg(long, env = "SQLRAG_MODEL_REPO", default_value = DEFAULT_GGUF_REPO_ID)]
    pub model_repo: String,

    #[arg(long, env = "SQLRAG_MODEL_FILE", default_value = DEFAULT_GGUF_FILENAME)]
    pub model_file: String,

    /// Lower-precision weights used for the cpu retry after an accelerator load failure.
    #[arg(long)]
    pub fallback_model_file: Option<String>,

    #[arg(long, default_value = "tmp/gguf_cache")]
    pub model_cache_dir: PathBuf,

    #[arg(long, default_value_t = DEFAULT_CONTEXT_SIZE)]
    pub context_size: u32,

    #[arg(long, default_value_t = false)]
    pub force_cpu: bool,
}

#[derive(Args, Debug, Clone)]
pub struct DatabaseArgs {
    #[arg(long, env = "SQLRAG_DATABASE_URL", default_value = DEFAULT_DATABASE_URL)]
    pub database_url: String,

    #[arg(long, default_value_t = DEFAULT_BUSY_TIMEOUT_MS)]
    pub busy_timeout_ms: u64,
}

#[derive(Args, Debug, Clone)]
pub struct PipelineArgs {
    #[command(flatten)]
    pub schema: SchemaArgs,

    #[command(flatten)]
    pub embedding: EmbeddingArgs,

    #[command(flatten)]
    pub generation: GenerationArgs,

    #[command(flatten)]
    pub database: DatabaseArgs,

    #[arg(long, default_value_t = DEFAULT_TOP_K)]
    pub top_k: usize,

    #[arg(long, value_enum, default_value_t = SqlDialect::Sqlite)]
    pub dialect: SqlDialect,
}

#[derive(Args, Debug, Clone)]
pub struct IndexArgs {
    #[command(flatten)]
    pub schema: SchemaArgs,

    #[command(flatten)]
    pub embedding: EmbeddingArgs,
}

#[derive(Args, Debug, Clone)]
pub struct AskArgs {
    #[command(flatten)]
    pub pipeline: PipelineArgs,

    #[arg(long)]
    pub question: String,

    /// Print the full turn (retrieval, SQL, outcome, answer) as JSON.
    #[arg(long, default_value_t = false)]
    pub json: bool,
}

#[derive(Args, Debug, Clone)]
pub struct ReplArgs {
    #[command(flatten)]
    pub pipeline: PipelineArgs,
}

#[derive(Args, Debug, Clone)]
pub struct SeedArgs {
    #[command(flatten)]
    pub database: DatabaseArgs,

    #[arg(long, default_value_t = 1000)]
    pub users: usize,
}

#[derive(Args, Debug, Clone)]
pub struct StatusArgs {
    #[command(flatten)]
    pub schema: SchemaArgs,

    #[command(flatten)]
    pub embedding: EmbeddingArgs,

    #[command(flatten)]
    pub database: DatabaseArgs,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn ask_parses_defaults() {
        let cli = Cli::try_parse_from(["sqlrag", "ask", "--question", "how many users?"]).unwrap();
        let Commands::Ask(args) = cli.command else {
            panic!("expected ask");
        };
        assert_eq!(args.question, "how many users?");
        assert_eq!(args.pipeline.top_k, 3);
        assert_eq!(args.pipeline.dialect, SqlDialect::Sqlite);
        assert_eq!(args.pipeline.schema.refresh_mode, IndexRefreshMode::Missing);
        assert_eq!(
            args.pipeline.embedding.embedding_backend,
            EmbeddingBackend::LocalHash
        );
        assert!(!args.json);
        assert_eq!(args.pipeline.embedding.embedding_cache_dir, None);
    }

    #[test]
    fn index_accepts_full_refresh() {
        let cli = Cli::try_parse_from(["sqlrag", "index", "--refresh-mode", "full"]).unwrap();
        let Commands::Index(args) = cli.command else {
            panic!("expected index");
        };
        assert_eq!(args.schema.refresh_mode, IndexRefreshMode::Full);
    }
}
