use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use rusqlite::{Connection, OpenFlags, OptionalExtension, params};

use super::{IndexedChunk, VectorIndex};
use crate::model::SchemaChunk;
use crate::semantic::{decode_embedding_blob, encode_embedding_blob};
use crate::util::{ensure_directory, now_utc_string, sha256_text};

pub const INDEX_DB_FILE: &str = "schema_index.sqlite";
pub const INDEX_STORE_VERSION: &str = "1";

#[derive(Debug, Clone)]
pub struct IndexStoreStatus {
    pub model_id: String,
    pub dimensions: usize,
    pub schema_sha256: String,
    pub chunk_count: usize,
    pub created_at: String,
}

pub fn index_db_path(persist_dir: &Path) -> PathBuf {
    persist_dir.join(INDEX_DB_FILE)
}

pub fn open_index_connection(persist_dir: &Path) -> Result<Connection> {
    ensure_directory(persist_dir)?;
    let db_path = index_db_path(persist_dir);
    let connection = Connection::open_with_flags(
        &db_path,
        OpenFlags::SQLITE_OPEN_READ_WRITE
            | OpenFlags::SQLITE_OPEN_CREATE
            | OpenFlags::SQLITE_OPEN_NO_MUTEX,
    )
    .with_context(|| format!("failed to open schema index: {}", db_path.display()))?;

    connection
        .pragma_update(None, "journal_mode", "WAL")
        .context("failed to set journal_mode=WAL for schema index")?;
    connection
        .pragma_update(None, "synchronous", "NORMAL")
        .context("failed to set synchronous=NORMAL for schema index")?;

    ensure_index_schema(&connection)?;
    Ok(connection)
}

/// Opens an existing store without creating, migrating, or changing its
/// journal mode.
pub fn open_index_read_only(persist_dir: &Path) -> Result<Connection> {
    let db_path = index_db_path(persist_dir);
    Connection::open_with_flags(
        &db_path,
        OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
    )
    .with_context(|| format!("failed to open schema index: {}", db_path.display()))
}

pub fn ensure_index_schema(connection: &Connection) -> Result<()> {
    connection.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS metadata (
          key TEXT PRIMARY KEY,
          value TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS embedding_models (
          model_id TEXT PRIMARY KEY,
          dimensions INTEGER NOT NULL,
          schema_sha256 TEXT NOT NULL,
          chunk_size INTEGER NOT NULL,
          chunk_overlap INTEGER NOT NULL,
          created_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS schema_chunks (
          model_id TEXT NOT NULL,
          ordinal INTEGER NOT NULL,
          start_offset INTEGER NOT NULL,
          text TEXT NOT NULL,
          text_hash TEXT NOT NULL,
          embedding BLOB NOT NULL,
          embedding_dim INTEGER NOT NULL,
          PRIMARY KEY(model_id, ordinal),
          FOREIGN KEY(model_id) REFERENCES embedding_models(model_id)
        );
        ",
    )?;

    connection.execute(
        "INSERT INTO metadata(key, value) VALUES('store_version', ?1)
         ON CONFLICT(key) DO UPDATE SET value=excluded.value",
        [INDEX_STORE_VERSION],
    )?;

    Ok(())
}

/// Returns `Ok(None)` when no index exists for `model_id`, and an error when
/// stored rows cannot be decoded.
pub fn load_index(connection: &Connection, model_id: &str) -> Result<Option<VectorIndex>> {
    let Some(status) = read_store_status(connection, model_id)? else {
        return Ok(None);
    };
    if status.chunk_count == 0 {
        return Ok(None);
    }

    let mut statement = connection.prepare(
        "
        SELECT ordinal, start_offset, text, embedding, embedding_dim
        FROM schema_chunks
        WHERE model_id = ?1
        ORDER BY ordinal ASC
        ",
    )?;
    let mut rows = statement.query([model_id])?;

    let mut entries = Vec::<IndexedChunk>::with_capacity(status.chunk_count);
    while let Some(row) = rows.next()? {
        let ordinal = row.get::<_, i64>(0)? as usize;
        let row_dim = row.get::<_, i64>(4)? as usize;
        if row_dim != status.dimensions {
            bail!(
                "chunk {ordinal} has {row_dim} dimensions, index declares {}",
                status.dimensions
            );
        }

        let blob = row.get::<_, Vec<u8>>(3)?;
        let Some(embedding) = decode_embedding_blob(&blob, status.dimensions) else {
            bail!("chunk {ordinal} embedding blob is corrupt");
        };

        entries.push(IndexedChunk {
            chunk: SchemaChunk {
                ordinal,
                start: row.get::<_, i64>(1)? as usize,
                text: row.get(2)?,
            },
            embedding,
        });
    }

    Ok(Some(VectorIndex::new(
        status.model_id,
        status.dimensions,
        status.schema_sha256,
        entries,
    )))
}

/// Replaces every row for the index's model in one transaction, so a failed
/// write never leaves a partial index behind.
pub fn replace_index(
    connection: &mut Connection,
    index: &VectorIndex,
    chunk_size: usize,
    chunk_overlap: usize,
) -> Result<()> {
    let tx = connection.transaction()?;

    tx.execute(
        "DELETE FROM schema_chunks WHERE model_id = ?1",
        [index.model_id()],
    )?;
    tx.execute(
        "
        INSERT INTO embedding_models(model_id, dimensions, schema_sha256, chunk_size, chunk_overlap, created_at)
        VALUES(?1, ?2, ?3, ?4, ?5, ?6)
        ON CONFLICT(model_id) DO UPDATE SET
          dimensions=excluded.dimensions,
          schema_sha256=excluded.schema_sha256,
          chunk_size=excluded.chunk_size,
          chunk_overlap=excluded.chunk_overlap,
          created_at=excluded.created_at
        ",
        params![
            index.model_id(),
            index.dimensions() as i64,
            index.schema_sha256(),
            chunk_size as i64,
            chunk_overlap as i64,
            now_utc_string(),
        ],
    )?;

    {
        let mut insert = tx.prepare(
            "
            INSERT INTO schema_chunks(model_id, ordinal, start_offset, text, text_hash, embedding, embedding_dim)
            VALUES(?1, ?2, ?3, ?4, ?5, ?6, ?7)
            ",
        )?;
        for entry in index.entries() {
            insert.execute(params![
                index.model_id(),
                entry.chunk.ordinal as i64,
                entry.chunk.start as i64,
                entry.chunk.text,
                sha256_text(&entry.chunk.text),
                encode_embedding_blob(&entry.embedding),
                entry.embedding.len() as i64,
            ])?;
        }
    }

    tx.commit()?;
    Ok(())
}

pub fn read_store_status(connection: &Connection, model_id: &str) -> Result<Option<IndexStoreStatus>> {
    let model_row = connection
        .query_row(
            "
            SELECT dimensions, schema_sha256, created_at
            FROM embedding_models
            WHERE model_id = ?1
            LIMIT 1
            ",
            [model_id],
            |row| {
                Ok((
                    row.get::<_, i64>(0)? as usize,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                ))
            },
        )
        .optional()?;

    let Some((dimensions, schema_sha256, created_at)) = model_row else {
        return Ok(None);
    };

    let chunk_count: i64 = connection.query_row(
        "SELECT COUNT(*) FROM schema_chunks WHERE model_id = ?1",
        [model_id],
        |row| row.get(0),
    )?;

    Ok(Some(IndexStoreStatus {
        model_id: model_id.to_string(),
        dimensions,
        schema_sha256,
        chunk_count: chunk_count.max(0) as usize,
        created_at,
    }))
}

/// Removes an unreadable store along with its WAL side files.
pub fn discard_store(persist_dir: &Path) -> Result<()> {
    let db_path = index_db_path(persist_dir);
    for suffix in ["", "-wal", "-shm"] {
        let path = PathBuf::from(format!("{}{suffix}", db_path.display()));
        if path.exists() {
            fs::remove_file(&path)
                .with_context(|| format!("failed to remove {}", path.display()))?;
        }
    }
    Ok(())
}
