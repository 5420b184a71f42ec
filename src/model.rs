use std::fmt;

use serde::Serialize;

/// Bounded substring of the schema description. `start` is the character
/// offset of the first character in the source text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SchemaChunk {
    pub ordinal: usize,
    pub start: usize,
    pub text: String,
}

#[cfg(test)]
impl SchemaChunk {
    pub fn char_len(&self) -> usize {
        self.text.chars().count()
    }

    pub fn end(&self) -> usize {
        self.start + self.char_len()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RetrievedChunk {
    pub ordinal: usize,
    pub score: f64,
    pub text: String,
}

/// Top-k schema chunks, most relevant first.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RetrievalResult {
    pub chunks: Vec<RetrievedChunk>,
}

impl RetrievalResult {
    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    pub fn ordinals(&self) -> Vec<usize> {
        self.chunks.iter().map(|chunk| chunk.ordinal).collect()
    }

    /// Chunk texts joined by newlines, in retrieval order.
    pub fn context_text(&self) -> String {
        self.chunks
            .iter()
            .map(|chunk| chunk.text.as_str())
            .collect::<Vec<&str>>()
            .join("\n")
    }
}

/// Generated SQL, trimmed but otherwise unvalidated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct SqlCandidate(String);

impl SqlCandidate {
    pub fn new(sql: impl Into<String>) -> Self {
        Self(sql.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SqlCandidate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Result of running one statement. Exactly one state holds; failures are
/// data here, never an `Err`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum QueryOutcome {
    Rows {
        columns: Vec<String>,
        rows: Vec<String>,
    },
    NoRows,
    Failed {
        message: String,
    },
}

impl QueryOutcome {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Rows { .. } => "rows",
            Self::NoRows => "no_rows",
            Self::Failed { .. } => "failed",
        }
    }

    #[cfg(test)]
    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Failed { .. })
    }

    /// Text shown to the answer model and to the user.
    pub fn render(&self) -> String {
        match self {
            Self::Rows { rows, .. } => {
                let mut out = String::from("Results:\n");
                for row in rows {
                    out.push_str(row);
                    out.push('\n');
                }
                out
            }
            Self::NoRows => "No results found.".to_string(),
            Self::Failed { message } => format!("Error executing query: {message}"),
        }
    }
}

/// One full question/answer cycle with its intermediate artifacts.
#[derive(Debug, Clone, Serialize)]
pub struct PipelineTurn {
    pub question: String,
    pub retrieval: RetrievalResult,
    pub sql: SqlCandidate,
    pub outcome: QueryOutcome,
    pub answer: String,
    pub duration_ms: u128,
}

#[derive(Debug, Clone, Serialize)]
pub struct IndexBuildManifest {
    pub manifest_version: u32,
    pub run_id: String,
    pub generated_at: String,
    pub model_id: String,
    pub embedding_dim: usize,
    pub schema_path: String,
    pub schema_sha256: String,
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    pub chunk_count: usize,
    pub refresh_mode: String,
    pub duration_ms: u128,
    pub status: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_distinguishes_the_three_outcomes() {
        let rows = QueryOutcome::Rows {
            columns: vec!["username".to_string(), "email".to_string()],
            rows: vec!["('alice', 'alice@example.com')".to_string()],
        };
        assert_eq!(rows.render(), "Results:\n('alice', 'alice@example.com')\n");
        assert_eq!(QueryOutcome::NoRows.render(), "No results found.");
        assert_eq!(
            QueryOutcome::Failed {
                message: "no such table: missing".to_string()
            }
            .render(),
            "Error executing query: no such table: missing"
        );
    }

    #[test]
    fn outcome_serializes_with_kind_tag() {
        let value = serde_json::to_value(QueryOutcome::NoRows).unwrap();
        assert_eq!(value["kind"], "no_rows");
    }

    #[test]
    fn context_text_joins_chunks_in_retrieval_order() {
        let result = RetrievalResult {
            chunks: vec![
                RetrievedChunk {
                    ordinal: 4,
                    score: 0.9,
                    text: "CREATE TABLE users (...);".to_string(),
                },
                RetrievedChunk {
                    ordinal: 1,
                    score: 0.4,
                    text: "CREATE TABLE orders (...);".to_string(),
                },
            ],
        };
        assert_eq!(
            result.context_text(),
            "CREATE TABLE users (...);\nCREATE TABLE orders (...);"
        );
        assert_eq!(result.ordinals(), vec![4, 1]);
    }
}
