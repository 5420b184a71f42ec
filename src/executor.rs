use std::path::PathBuf;
use std::time::{Duration, Instant};

use rusqlite::types::ValueRef;
use rusqlite::{Connection, OpenFlags, Row};
use tracing::{info, warn};

use crate::model::QueryOutcome;

pub const DEFAULT_DATABASE_URL: &str = "sqlite://database/shop.sqlite";
pub const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5_000;

const EMPTY_SQL_MESSAGE: &str = "empty SQL statement";

/// Where `parse_database_url` says to connect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DatabaseTarget {
    Path(PathBuf),
    Uri(String),
}

/// Accepts `sqlite://<path>`, `sqlite:<path>`, `file:` URIs, and bare paths.
pub fn parse_database_url(url: &str) -> DatabaseTarget {
    let url = url.trim();
    if url.starts_with("file:") {
        return DatabaseTarget::Uri(url.to_string());
    }
    let path = url
        .strip_prefix("sqlite://")
        .or_else(|| url.strip_prefix("sqlite:"))
        .unwrap_or(url);
    DatabaseTarget::Path(PathBuf::from(path))
}

/// Runs generated SQL against the target database. Every call opens its own
/// connection and closes it before returning; failures come back as
/// [`QueryOutcome::Failed`] rather than `Err`.
#[derive(Debug, Clone)]
pub struct QueryExecutor {
    target: DatabaseTarget,
    busy_timeout: Duration,
}

impl QueryExecutor {
    pub fn new(database_url: &str, busy_timeout: Duration) -> Self {
        Self {
            target: parse_database_url(database_url),
            busy_timeout,
        }
    }

    pub fn execute(&self, sql: &str) -> QueryOutcome {
        let started = Instant::now();
        let outcome = if is_blank_sql(sql) {
            QueryOutcome::Failed {
                message: EMPTY_SQL_MESSAGE.to_string(),
            }
        } else {
            match self.run(sql) {
                Ok((_, rows)) if rows.is_empty() => QueryOutcome::NoRows,
                Ok((columns, rows)) => QueryOutcome::Rows { columns, rows },
                Err(err) => QueryOutcome::Failed {
                    message: err.to_string(),
                },
            }
        };

        let duration_ms = started.elapsed().as_millis();
        match &outcome {
            QueryOutcome::Failed { message } => {
                warn!(error = %message, duration_ms, "query failed");
            }
            QueryOutcome::Rows { rows, .. } => {
                info!(rows = rows.len(), duration_ms, "query returned rows");
            }
            QueryOutcome::NoRows => {
                info!(duration_ms, "query returned no rows");
            }
        }
        outcome
    }

    /// Opens a read-write connection without creating missing databases.
    pub fn open(&self) -> rusqlite::Result<Connection> {
        let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
            | OpenFlags::SQLITE_OPEN_URI
            | OpenFlags::SQLITE_OPEN_NO_MUTEX;
        let connection = match &self.target {
            DatabaseTarget::Path(path) => Connection::open_with_flags(path, flags)?,
            DatabaseTarget::Uri(uri) => Connection::open_with_flags(uri, flags)?,
        };
        connection.busy_timeout(self.busy_timeout)?;
        Ok(connection)
    }

    fn run(&self, sql: &str) -> rusqlite::Result<(Vec<String>, Vec<String>)> {
        let connection = self.open()?;
        let mut statement = connection.prepare(sql)?;
        let columns = statement
            .column_names()
            .into_iter()
            .map(str::to_string)
            .collect::<Vec<String>>();
        let column_count = columns.len();

        let mut rows = statement.query([])?;
        let mut formatted = Vec::<String>::new();
        while let Some(row) = rows.next()? {
            formatted.push(format_row(row, column_count)?);
        }
        Ok((columns, formatted))
    }
}

/// True when `sql` holds nothing but whitespace and `--` or `/* */` comments.
fn is_blank_sql(sql: &str) -> bool {
    let mut rest = sql;
    loop {
        rest = rest.trim_start();
        if let Some(comment) = rest.strip_prefix("--") {
            rest = comment.split_once('\n').map_or("", |(_, tail)| tail);
        } else if let Some(comment) = rest.strip_prefix("/*") {
            rest = comment.split_once("*/").map_or("", |(_, tail)| tail);
        } else {
            return rest.is_empty();
        }
    }
}

/// Tuple-style row text: `(938, 'alice', NULL)`, `(1,)` for one column.
fn format_row(row: &Row<'_>, column_count: usize) -> rusqlite::Result<String> {
    let mut values = Vec::<String>::with_capacity(column_count);
    for index in 0..column_count {
        values.push(format_value(row.get_ref(index)?));
    }

    Ok(match values.as_slice() {
        [single] => format!("({single},)"),
        _ => format!("({})", values.join(", ")),
    })
}

fn format_value(value: ValueRef<'_>) -> String {
    match value {
        ValueRef::Null => "NULL".to_string(),
        ValueRef::Integer(number) => number.to_string(),
        ValueRef::Real(number) if number.is_finite() && number.fract() == 0.0 => {
            format!("{number:.1}")
        }
        ValueRef::Real(number) => number.to_string(),
        ValueRef::Text(bytes) => {
            let text = String::from_utf8_lossy(bytes);
            format!("'{}'", text.replace('\\', "\\\\").replace('\'', "\\'"))
        }
        ValueRef::Blob(bytes) => format!("<blob {} bytes>", bytes.len()),
    }
}
