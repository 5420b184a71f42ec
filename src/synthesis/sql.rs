use anyhow::{Context, Result};
use regex::Regex;
use tracing::{info, warn};

use crate::cli::SqlDialect;
use crate::generation::{GenerationProvider, SamplingConfig};
use crate::model::{RetrievalResult, SqlCandidate};

pub fn build_sql_prompt(context: &str, question: &str, dialect: SqlDialect) -> String {
    let dialect = dialect.display_name();
    format!(
        "You are an SQL expert. Given the following {dialect} schema:\n\
         {context}\n\n\
         Generate an optimized SQL query to answer the user question: \"{question}\"\n\n\
         Ensure that:\n\
         - Table names and column names are exactly as defined in the schema.\n\
         - Only indexed fields are used for filtering.\n\
         - The SQL query is syntactically correct for {dialect}.\n\
         - The query returns precise results without unnecessary joins.\n\n\
         Provide only the SQL query as output.\n"
    )
}

/// One generation call over the retrieved schema context. The model output is
/// trimmed of scaffolding but not parsed.
pub fn synthesize_sql<G>(
    generator: &mut G,
    question: &str,
    retrieval: &RetrievalResult,
    dialect: SqlDialect,
    sampling: &SamplingConfig,
) -> Result<SqlCandidate>
where
    G: GenerationProvider + ?Sized,
{
    if retrieval.is_empty() {
        warn!("no schema context retrieved; generating SQL without it");
    }
    let prompt = build_sql_prompt(&retrieval.context_text(), question, dialect);
    let raw = generator
        .generate(&prompt, sampling)
        .context("SQL generation failed")?;
    let sql = clean_sql_output(&raw, &prompt)?;

    info!(sql = %sql, "generated SQL");
    Ok(SqlCandidate::new(sql))
}

/// Drops an echoed prompt prefix and Markdown fences, then trims.
pub fn clean_sql_output(raw: &str, prompt: &str) -> Result<String> {
    let body = raw.strip_prefix(prompt).unwrap_or(raw);

    let fenced = Regex::new(r"(?s)```[A-Za-z]*[ \t]*\r?\n?(.*?)```")
        .context("failed to compile SQL fence regex")?;
    if let Some(captures) = fenced.captures(body) {
        if let Some(inner) = captures.get(1) {
            return Ok(inner.as_str().trim().to_string());
        }
    }

    // An unterminated fence still marks where the SQL starts.
    let opening = Regex::new(r"^\s*```[A-Za-z]*").context("failed to compile SQL fence regex")?;
    Ok(opening.replace(body, "").trim().to_string())
}
