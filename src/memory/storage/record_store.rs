//! `SQLite` record store pairing each JSON payload with its embedding.
//!
//! Two tables per store: `{table}` holds the serialized entity, `{table}_vectors`
//! holds the embedding as little-endian `f32` bytes. Every write touches both
//! tables inside one transaction.

use std::path::Path;

use chrono::Utc;
use serde::de::DeserializeOwned;
use tokio_rusqlite::Connection;
use tracing::{debug, warn};

use crate::memory::core::errors::{MemoryError, MemoryResult};

/// A payload row together with its raw embedding, as loaded from disk.
#[derive(Clone, Debug)]
pub struct RawRecord {
    /// Entity identifier.
    pub id: String,
    /// Serialized entity.
    pub payload: String,
    /// Raw embedding bytes, if a vector row exists.
    pub embedding: Option<Vec<u8>>,
}

/// One write in a batch.
#[derive(Clone, Debug)]
pub struct RecordWrite {
    /// Entity identifier.
    pub id: String,
    /// Serialized entity.
    pub payload: String,
    /// New embedding; `None` keeps the stored vector.
    pub embedding: Option<Vec<f32>>,
}

impl RecordWrite {
    /// Payload-only write.
    #[must_use]
    pub const fn payload(id: String, payload: String) -> Self {
        Self {
            id,
            payload,
            embedding: None,
        }
    }

    /// Payload and embedding write.
    #[must_use]
    pub const fn with_embedding(id: String, payload: String, embedding: Vec<f32>) -> Self {
        Self {
            id,
            payload,
            embedding: Some(embedding),
        }
    }
}

/// Persistent store for one entity type.
pub struct SqliteRecordStore {
    conn: Connection,
    table: String,
}

impl SqliteRecordStore {
    /// Open (and create if needed) the database at `path` with tables named after `table`.
    ///
    /// # Errors
    /// Returns an error if the table name is invalid or the database cannot be opened.
    pub async fn open(path: &Path, table: &str) -> MemoryResult<Self> {
        if table.is_empty() || !table.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
            return Err(MemoryError::InvalidConfig(format!(
                "invalid table name: {table}"
            )));
        }
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let conn = Connection::open(path).await?;
        let table = table.to_string();
        let table_name = table.clone();

        conn.call(move |conn| {
            conn.busy_timeout(std::time::Duration::from_secs(5))?;
            conn.execute_batch(&format!(
                "CREATE TABLE IF NOT EXISTS {table_name} (
                    id TEXT PRIMARY KEY,
                    payload TEXT NOT NULL,
                    updated_at INTEGER NOT NULL
                );
                CREATE TABLE IF NOT EXISTS {table_name}_vectors (
                    id TEXT PRIMARY KEY,
                    dims INTEGER NOT NULL,
                    embedding BLOB NOT NULL
                );"
            ))?;
            Ok(())
        })
        .await?;

        debug!(path = %path.display(), table = %table, "Opened record store");
        Ok(Self { conn, table })
    }

    /// Load every payload with its embedding bytes.
    ///
    /// # Errors
    /// Returns an error if the query fails.
    pub async fn load_all(&self) -> MemoryResult<Vec<RawRecord>> {
        let table = self.table.clone();
        let rows = self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare(&format!(
                    "SELECT p.id, p.payload, v.embedding
                     FROM {table} p LEFT JOIN {table}_vectors v ON v.id = p.id
                     ORDER BY p.rowid"
                ))?;
                let rows = stmt
                    .query_map([], |row| {
                        Ok(RawRecord {
                            id: row.get(0)?,
                            payload: row.get(1)?,
                            embedding: row.get(2)?,
                        })
                    })?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(rows)
            })
            .await?;
        Ok(rows)
    }

    /// Insert or replace one record and its embedding atomically.
    ///
    /// # Errors
    /// Returns an error if the transaction fails; nothing is written in that case.
    pub async fn upsert(&self, id: String, payload: String, embedding: Vec<f32>) -> MemoryResult<()> {
        self.write_batch(vec![RecordWrite::with_embedding(id, payload, embedding)])
            .await
    }

    /// Apply several writes in one transaction.
    ///
    /// # Errors
    /// Returns an error if the transaction fails; nothing is written in that case.
    pub async fn write_batch(&self, writes: Vec<RecordWrite>) -> MemoryResult<()> {
        if writes.is_empty() {
            return Ok(());
        }
        let table = self.table.clone();
        let updated_at = Utc::now().timestamp_millis();
        self.conn
            .call(move |conn| {
                let tx = conn.transaction()?;
                for write in writes {
                    tx.execute(
                        &format!(
                            "INSERT OR REPLACE INTO {table} (id, payload, updated_at)
                             VALUES (?1, ?2, ?3)"
                        ),
                        rusqlite::params![write.id, write.payload, updated_at],
                    )?;
                    if let Some(embedding) = write.embedding {
                        let dims = i64::try_from(embedding.len())
                            .map_err(|err| tokio_rusqlite::Error::Other(Box::new(err)))?;
                        tx.execute(
                            &format!(
                                "INSERT OR REPLACE INTO {table}_vectors (id, dims, embedding)
                                 VALUES (?1, ?2, ?3)"
                            ),
                            rusqlite::params![write.id, dims, encode_vector(&embedding)],
                        )?;
                    }
                }
                tx.commit()?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    /// Delete a record and its embedding. Returns whether a payload row existed.
    ///
    /// # Errors
    /// Returns an error if the transaction fails.
    pub async fn delete(&self, id: &str) -> MemoryResult<bool> {
        let table = self.table.clone();
        let id = id.to_string();
        let removed = self
            .conn
            .call(move |conn| {
                let tx = conn.transaction()?;
                let removed = tx.execute(
                    &format!("DELETE FROM {table} WHERE id = ?1"),
                    rusqlite::params![id],
                )?;
                tx.execute(
                    &format!("DELETE FROM {table}_vectors WHERE id = ?1"),
                    rusqlite::params![id],
                )?;
                tx.commit()?;
                Ok(removed > 0)
            })
            .await?;
        Ok(removed)
    }

    /// Delete several records in one transaction. Returns how many payload rows were removed.
    ///
    /// # Errors
    /// Returns an error if the transaction fails; nothing is deleted in that case.
    pub async fn delete_many(&self, ids: Vec<String>) -> MemoryResult<usize> {
        if ids.is_empty() {
            return Ok(0);
        }
        let table = self.table.clone();
        let removed = self
            .conn
            .call(move |conn| {
                let tx = conn.transaction()?;
                let mut removed = 0;
                for id in &ids {
                    removed += tx.execute(
                        &format!("DELETE FROM {table} WHERE id = ?1"),
                        rusqlite::params![id],
                    )?;
                    tx.execute(
                        &format!("DELETE FROM {table}_vectors WHERE id = ?1"),
                        rusqlite::params![id],
                    )?;
                }
                tx.commit()?;
                Ok(removed)
            })
            .await?;
        Ok(removed)
    }

    /// Number of stored payloads.
    ///
    /// # Errors
    /// Returns an error if the query fails.
    pub async fn count(&self) -> MemoryResult<usize> {
        let table = self.table.clone();
        let count = self
            .conn
            .call(move |conn| {
                let count: i64 =
                    conn.query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| {
                        row.get(0)
                    })?;
                Ok(count)
            })
            .await?;
        Ok(usize::try_from(count).unwrap_or(0))
    }
}

/// Decode loaded rows into entities with their embeddings.
///
/// Rows whose payload does not parse, or whose embedding is missing or not
/// `ndims` long, are skipped with a warning.
#[must_use]
pub fn decode_records<T: DeserializeOwned>(
    rows: Vec<RawRecord>,
    ndims: usize,
    store: &str,
) -> Vec<(T, Vec<f32>)> {
    let mut decoded = Vec::with_capacity(rows.len());
    for row in rows {
        let entity: T = match serde_json::from_str(&row.payload) {
            Ok(entity) => entity,
            Err(err) => {
                warn!(store, id = %row.id, %err, "Skipping corrupt record");
                continue;
            }
        };
        match row.embedding.as_deref().and_then(decode_vector) {
            Some(vector) if vector.len() == ndims => decoded.push((entity, vector)),
            _ => warn!(store, id = %row.id, "Skipping record with missing or malformed embedding"),
        }
    }
    decoded
}

/// Encode a vector as little-endian bytes.
#[must_use]
pub fn encode_vector(vector: &[f32]) -> Vec<u8> {
    vector.iter().flat_map(|v| v.to_le_bytes()).collect()
}

/// Decode little-endian bytes; `None` if the length is not a multiple of four.
#[must_use]
pub fn decode_vector(bytes: &[u8]) -> Option<Vec<f32>> {
    if bytes.len() % 4 != 0 {
        return None;
    }
    Some(
        bytes
            .chunks_exact(4)
            .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
            .collect(),
    )
}
