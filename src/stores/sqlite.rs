//! SQLite-backed vector index using the `sqlite-vec` extension.
//!
//! Chunks live in a plain `chunks` table keyed by chunk id; their vectors
//! sit in `chunk_embeddings` as `vec_f32` blobs and are ranked with
//! `vec_distance_cosine`. An `index_meta` table pins the embedder identity
//! and dimension the index was built with, so a mismatched provider is
//! rejected at open instead of corrupting search results.

use std::mem::transmute;
use std::os::raw::c_char;
use std::path::Path;
use std::sync::OnceLock;

use async_trait::async_trait;
use tokio_rusqlite::{Connection, OptionalExtension, ffi};
use tracing::warn;

use super::{IndexEntry, SearchFilter, VectorBackend};
use crate::types::RagError;

const META_EMBEDDER_ID: &str = "embedder_id";
const META_EMBEDDER_DIMENSIONS: &str = "embedder_dimensions";

#[derive(Clone)]
pub struct SqliteVectorIndex {
    conn: Connection,
    dimensions: usize,
}

impl SqliteVectorIndex {
    /// Opens (creating if necessary) an index at `path` for the given
    /// embedder identity.
    ///
    /// An existing index built with a different embedder id or dimension is
    /// a fatal configuration error; changing the embedder requires a full
    /// re-index into a fresh database.
    pub async fn open(
        path: impl AsRef<Path>,
        embedder_id: &str,
        dimensions: usize,
    ) -> Result<Self, RagError> {
        register_sqlite_vec()?;
        let location = path.as_ref().display().to_string();
        let conn = Connection::open(path)
            .await
            .map_err(|err| RagError::Storage(err.to_string()))?;
        Self::initialize(conn, embedder_id, dimensions, location).await
    }

    /// In-memory index, mostly for tests.
    pub async fn open_in_memory(embedder_id: &str, dimensions: usize) -> Result<Self, RagError> {
        register_sqlite_vec()?;
        let conn = Connection::open_in_memory()
            .await
            .map_err(|err| RagError::Storage(err.to_string()))?;
        Self::initialize(conn, embedder_id, dimensions, ":memory:".to_string()).await
    }

    async fn initialize(
        conn: Connection,
        embedder_id: &str,
        dimensions: usize,
        location: String,
    ) -> Result<Self, RagError> {
        conn.call(|conn| {
            conn.query_row("SELECT vec_version()", [], |row| row.get::<_, String>(0))?;
            conn.execute_batch(
                "CREATE TABLE IF NOT EXISTS chunks (
                     chunk_id     TEXT PRIMARY KEY,
                     source_id    TEXT NOT NULL,
                     fingerprint  TEXT NOT NULL,
                     section_path TEXT NOT NULL,
                     ordinal      INTEGER NOT NULL,
                     content      TEXT NOT NULL,
                     metadata     TEXT NOT NULL
                 );
                 CREATE INDEX IF NOT EXISTS chunks_source_idx ON chunks(source_id);
                 CREATE TABLE IF NOT EXISTS chunk_embeddings (
                     chunk_id  TEXT PRIMARY KEY,
                     embedding BLOB NOT NULL
                 );
                 CREATE TABLE IF NOT EXISTS index_meta (
                     key   TEXT PRIMARY KEY,
                     value TEXT NOT NULL
                 );",
            )?;
            Ok(())
        })
        .await
        .map_err(|err: tokio_rusqlite::Error| RagError::Storage(err.to_string()))?;

        let stored: Option<(String, String)> = conn
            .call(|conn| {
                let id = conn
                    .query_row(
                        "SELECT value FROM index_meta WHERE key = ?",
                        [META_EMBEDDER_ID],
                        |row| row.get::<_, String>(0),
                    )
                    .optional()?;
                let dims = conn
                    .query_row(
                        "SELECT value FROM index_meta WHERE key = ?",
                        [META_EMBEDDER_DIMENSIONS],
                        |row| row.get::<_, String>(0),
                    )
                    .optional()?;
                Ok(id.zip(dims))
            })
            .await
            .map_err(|err: tokio_rusqlite::Error| RagError::Storage(err.to_string()))?;

        match stored {
            Some((stored_id, stored_dims)) => {
                let stored_dims: usize = stored_dims.parse().unwrap_or(0);
                if stored_id != embedder_id || stored_dims != dimensions {
                    return Err(RagError::Config(format!(
                        "index at {location} was built with embedder '{stored_id}' \
                         ({stored_dims} dims) but '{embedder_id}' ({dimensions} dims) \
                         was supplied; a full re-index is required"
                    )));
                }
            }
            None => {
                let embedder_id = embedder_id.to_string();
                conn.call(move |conn| {
                    conn.execute(
                        "INSERT INTO index_meta (key, value) VALUES (?1, ?2)",
                        (META_EMBEDDER_ID, embedder_id),
                    )?;
                    conn.execute(
                        "INSERT INTO index_meta (key, value) VALUES (?1, ?2)",
                        (META_EMBEDDER_DIMENSIONS, dimensions.to_string()),
                    )?;
                    Ok(())
                })
                .await
                .map_err(|err: tokio_rusqlite::Error| RagError::Storage(err.to_string()))?;
            }
        }

        Ok(Self { conn, dimensions })
    }

    /// Underlying connection, for queries the trait does not cover.
    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    pub fn dimensions(&self) -> usize {
        self.dimensions
    }
}

fn register_sqlite_vec() -> Result<(), RagError> {
    static REGISTERED: OnceLock<Result<(), String>> = OnceLock::new();

    let result = REGISTERED.get_or_init(|| unsafe {
        type ExtensionInit = unsafe extern "C" fn(
            *mut ffi::sqlite3,
            *mut *mut c_char,
            *const ffi::sqlite3_api_routines,
        ) -> i32;

        let init: unsafe extern "C" fn() = sqlite_vec::sqlite3_vec_init;
        let init = transmute::<unsafe extern "C" fn(), ExtensionInit>(init);
        let rc = ffi::sqlite3_auto_extension(Some(init));
        if rc == 0 {
            Ok(())
        } else {
            Err(format!(
                "failed to register sqlite-vec extension (code {rc})"
            ))
        }
    });

    result.clone().map_err(RagError::Storage)
}

#[async_trait]
impl VectorBackend for SqliteVectorIndex {
    async fn upsert(&self, entries: Vec<IndexEntry>) -> Result<(), RagError> {
        if entries.is_empty() {
            return Ok(());
        }

        // Serialize vectors up front so the connection closure only runs SQL.
        let mut rows = Vec::with_capacity(entries.len());
        for entry in entries {
            let Some(embedding) = entry.embedding.as_ref() else {
                warn!(chunk_id = %entry.chunk_id, "skipping entry without embedding");
                continue;
            };
            if embedding.len() != self.dimensions {
                warn!(
                    chunk_id = %entry.chunk_id,
                    got = embedding.len(),
                    expected = self.dimensions,
                    "skipping entry with malformed embedding"
                );
                continue;
            }
            let embedding_json = serde_json::to_string(embedding)
                .map_err(|err| RagError::Storage(err.to_string()))?;
            rows.push((entry, embedding_json));
        }
        if rows.is_empty() {
            return Ok(());
        }

        self.conn
            .call(move |conn| {
                let tx = conn
                    .transaction()?;
                for (entry, embedding_json) in &rows {
                    tx.execute(
                        "INSERT OR REPLACE INTO chunks
                             (chunk_id, source_id, fingerprint, section_path, ordinal, content, metadata)
                         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                        (
                            &entry.chunk_id,
                            &entry.source_id,
                            &entry.fingerprint,
                            &entry.section_path,
                            entry.ordinal as i64,
                            &entry.text,
                            entry.metadata.to_string(),
                        ),
                    )?;
                    tx.execute(
                        "DELETE FROM chunk_embeddings WHERE chunk_id = ?1",
                        [&entry.chunk_id],
                    )?;
                    tx.execute(
                        "INSERT INTO chunk_embeddings (chunk_id, embedding) VALUES (?1, vec_f32(?2))",
                        (&entry.chunk_id, embedding_json),
                    )?;
                }
                tx.commit()?;
                Ok(())
            })
            .await
            .map_err(|err: tokio_rusqlite::Error| RagError::Storage(err.to_string()))
    }

    async fn delete_by_source_id(&self, source_id: &str) -> Result<usize, RagError> {
        let source_id = source_id.to_string();

        self.conn
            .call(move |conn| {
                let tx = conn
                    .transaction()?;
                tx.execute(
                    "DELETE FROM chunk_embeddings WHERE chunk_id IN
                         (SELECT chunk_id FROM chunks WHERE source_id = ?1)",
                    [&source_id],
                )?;
                let deleted = tx
                    .execute("DELETE FROM chunks WHERE source_id = ?1", [&source_id])?;
                tx.commit()?;
                Ok(deleted)
            })
            .await
            .map_err(|err: tokio_rusqlite::Error| RagError::Storage(err.to_string()))
    }

    async fn search(
        &self,
        query: &[f32],
        k: usize,
        filter: &SearchFilter,
    ) -> Result<Vec<(IndexEntry, f32)>, RagError> {
        if k == 0 {
            return Ok(Vec::new());
        }
        if query.len() != self.dimensions {
            return Err(RagError::Config(format!(
                "query vector has {} dims, index expects {}",
                query.len(),
                self.dimensions
            )));
        }
        let embedding_json =
            serde_json::to_string(query).map_err(|err| RagError::Storage(err.to_string()))?;
        let source_filter = filter.source_id.clone();
        let prefix_filter = filter.section_path_prefix.clone();

        self.conn
            .call(move |conn| {
                let mut stmt = conn
                    .prepare(
                        "SELECT c.chunk_id, c.source_id, c.fingerprint, c.section_path,
                                c.ordinal, c.content, c.metadata,
                                vec_distance_cosine(e.embedding, vec_f32(?1)) AS distance
                         FROM chunks c
                         JOIN chunk_embeddings e ON c.chunk_id = e.chunk_id
                         WHERE (?2 IS NULL OR c.source_id = ?2)
                           AND (?3 IS NULL OR substr(c.section_path, 1, length(?3)) = ?3)
                         ORDER BY distance ASC, c.chunk_id ASC
                         LIMIT ?4",
                    )?;

                let rows = stmt
                    .query_map(
                        (&embedding_json, &source_filter, &prefix_filter, k as i64),
                        |row| {
                            let entry = IndexEntry {
                                chunk_id: row.get(0)?,
                                source_id: row.get(1)?,
                                fingerprint: row.get(2)?,
                                section_path: row.get(3)?,
                                ordinal: row.get::<_, i64>(4)? as usize,
                                text: row.get(5)?,
                                metadata: row
                                    .get::<_, String>(6)
                                    .map(|raw| serde_json::from_str(&raw).unwrap_or_default())
                                    .unwrap_or_default(),
                                embedding: None,
                            };
                            let distance: f32 = row.get(7)?;
                            Ok((entry, 1.0 - distance))
                        },
                    )?;

                let mut results = Vec::new();
                for row in rows {
                    results.push(row?);
                }
                Ok(results)
            })
            .await
            .map_err(|err: tokio_rusqlite::Error| RagError::Storage(err.to_string()))
    }

    async fn entries_by_source_id(&self, source_id: &str) -> Result<Vec<IndexEntry>, RagError> {
        let source_id = source_id.to_string();

        self.conn
            .call(move |conn| {
                let mut stmt = conn
                    .prepare(
                        "SELECT chunk_id, source_id, fingerprint, section_path,
                                ordinal, content, metadata
                         FROM chunks WHERE source_id = ?1
                         ORDER BY ordinal ASC",
                    )?;

                let rows = stmt
                    .query_map([&source_id], |row| {
                        Ok(IndexEntry {
                            chunk_id: row.get(0)?,
                            source_id: row.get(1)?,
                            fingerprint: row.get(2)?,
                            section_path: row.get(3)?,
                            ordinal: row.get::<_, i64>(4)? as usize,
                            text: row.get(5)?,
                            metadata: row
                                .get::<_, String>(6)
                                .map(|raw| serde_json::from_str(&raw).unwrap_or_default())
                                .unwrap_or_default(),
                            embedding: None,
                        })
                    })?;

                let mut results = Vec::new();
                for row in rows {
                    results.push(row?);
                }
                Ok(results)
            })
            .await
            .map_err(|err: tokio_rusqlite::Error| RagError::Storage(err.to_string()))
    }

    async fn count(&self) -> Result<usize, RagError> {
        self.conn
            .call(|conn| {
                let count: i64 = conn
                    .query_row("SELECT COUNT(*) FROM chunks", [], |row| row.get(0))?;
                Ok(count as usize)
            })
            .await
            .map_err(|err: tokio_rusqlite::Error| RagError::Storage(err.to_string()))
    }
}
