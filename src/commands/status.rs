use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use rusqlite::Connection;
use tracing::{info, warn};

use super::embedding_settings;
use crate::cli::StatusArgs;
use crate::executor::QueryExecutor;
use crate::index::{IndexStoreStatus, index_db_path, open_index_read_only, read_store_status};
use crate::semantic::initialize_embeddings;
use crate::util::{read_text_file, sha256_text};

pub fn run(args: StatusArgs) -> Result<()> {
    let index_dir = &args.schema.index_dir;
    info!(index_dir = %index_dir.display(), "status requested");

    let embedder = initialize_embeddings(&embedding_settings(&args.embedding))?;
    let db_path = index_db_path(index_dir);

    if !db_path.exists() {
        warn!(path = %db_path.display(), "schema index missing");
    } else {
        match stored_index_status(index_dir, embedder.model_id()) {
            Ok(Some(status)) => {
                let schema_current = read_text_file(&args.schema.schema_path)
                    .map(|text| sha256_text(&text) == status.schema_sha256)
                    .unwrap_or(false);
                info!(
                    model_id = %status.model_id,
                    dimensions = status.dimensions,
                    chunks = status.chunk_count,
                    schema_sha256 = %status.schema_sha256,
                    schema_current,
                    created_at = %status.created_at,
                    "schema index status"
                );
            }
            Ok(None) => {
                warn!(model_id = %embedder.model_id(), "no index for this embedding model");
            }
            Err(err) => {
                warn!(
                    path = %db_path.display(),
                    error = %format!("{err:#}"),
                    "schema index unreadable; the next build will recreate it"
                );
            }
        }
    }

    if let Some(manifest) = latest_manifest(&index_dir.join("manifests"))? {
        info!(path = %manifest, "latest build manifest");
    }

    let executor = QueryExecutor::new(
        &args.database.database_url,
        Duration::from_millis(args.database.busy_timeout_ms),
    );
    match executor.open() {
        Ok(conn) => {
            for (table, rows) in table_row_counts(&conn)? {
                info!(table = %table, rows, "database table");
            }
        }
        Err(err) => {
            warn!(
                database_url = %args.database.database_url,
                error = %err,
                "database unavailable"
            );
        }
    }

    Ok(())
}

fn stored_index_status(index_dir: &Path, model_id: &str) -> Result<Option<IndexStoreStatus>> {
    let conn = open_index_read_only(index_dir)?;
    read_store_status(&conn, model_id)
}

fn latest_manifest(manifest_dir: &Path) -> Result<Option<String>> {
    if !manifest_dir.exists() {
        return Ok(None);
    }

    let mut names = fs::read_dir(manifest_dir)
        .with_context(|| format!("failed to read {}", manifest_dir.display()))?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| path.extension().is_some_and(|extension| extension == "json"))
        .map(|path| path.display().to_string())
        .collect::<Vec<String>>();
    names.sort();
    Ok(names.pop())
}

pub fn table_row_counts(conn: &Connection) -> Result<Vec<(String, i64)>> {
    let tables = {
        let mut statement = conn.prepare(
            "SELECT name FROM sqlite_master
             WHERE type = 'table' AND name NOT LIKE 'sqlite_%'
             ORDER BY name",
        )?;
        statement
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<rusqlite::Result<Vec<String>>>()?
    };

    let mut counts = Vec::with_capacity(tables.len());
    for table in tables {
        let count = query_count(conn, &format!("SELECT COUNT(*) FROM \"{table}\""))?;
        counts.push((table, count));
    }
    Ok(counts)
}

fn query_count(conn: &Connection, sql: &str) -> Result<i64> {
    let count = conn.query_row(sql, [], |row| row.get(0))?;
    Ok(count)
}
