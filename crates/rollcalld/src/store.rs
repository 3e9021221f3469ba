//! SQLite-backed [`GalleryStore`].
//!
//! One row per identity. Embeddings are stored as little-endian `f32` blobs
//! alongside their dimension so a truncated blob is detected on load.

use std::path::Path;

use chrono::{DateTime, SecondsFormat, Utc};
use rollcall_core::{
    CorruptReference, Embedding, GalleryStore, IdentityId, ReferenceEntry, StoreError,
};
use rusqlite::{params, Connection};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS reference_embeddings (
    identity_id TEXT PRIMARY KEY NOT NULL,
    dimension   INTEGER NOT NULL,
    embedding   BLOB NOT NULL,
    enrolled_at TEXT NOT NULL
);
";

pub struct SqliteStore {
    conn: Connection,
}

impl SqliteStore {
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(StoreError::backend)?;
        }
        let conn = Connection::open(path).map_err(StoreError::backend)?;
        tracing::info!(path = %path.display(), "opened gallery database");
        Self::init(conn)
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::init(Connection::open_in_memory().map_err(StoreError::backend)?)
    }

    fn init(conn: Connection) -> Result<Self, StoreError> {
        conn.execute_batch(SCHEMA).map_err(StoreError::backend)?;
        Ok(Self { conn })
    }
}

impl GalleryStore for SqliteStore {
    fn load(&mut self) -> Result<Vec<Result<ReferenceEntry, CorruptReference>>, StoreError> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT identity_id, dimension, embedding, enrolled_at
                 FROM reference_embeddings ORDER BY identity_id",
            )
            .map_err(StoreError::backend)?;

        let rows = stmt
            .query_map([], |row| {
                Ok(RawRow {
                    identity_id: row.get(0)?,
                    dimension: row.get(1)?,
                    embedding: row.get(2)?,
                    enrolled_at: row.get(3)?,
                })
            })
            .map_err(StoreError::backend)?;

        let mut out = Vec::new();
        for row in rows {
            let row = row.map_err(StoreError::backend)?;
            out.push(row.decode());
        }
        Ok(out)
    }

    fn save(&mut self, entry: &ReferenceEntry) -> Result<(), StoreError> {
        self.conn
            .execute(
                "INSERT INTO reference_embeddings (identity_id, dimension, embedding, enrolled_at)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(identity_id) DO UPDATE SET
                     dimension = excluded.dimension,
                     embedding = excluded.embedding,
                     enrolled_at = excluded.enrolled_at",
                params![
                    entry.identity_id.as_str(),
                    entry.embedding.dimension() as i64,
                    encode_embedding(&entry.embedding),
                    entry.enrolled_at.to_rfc3339_opts(SecondsFormat::Nanos, true),
                ],
            )
            .map_err(StoreError::backend)?;
        Ok(())
    }

    fn remove(&mut self, identity_id: &IdentityId) -> Result<bool, StoreError> {
        let changed = self
            .conn
            .execute(
                "DELETE FROM reference_embeddings WHERE identity_id = ?1",
                params![identity_id.as_str()],
            )
            .map_err(StoreError::backend)?;
        Ok(changed > 0)
    }
}

struct RawRow {
    identity_id: String,
    dimension: i64,
    embedding: Vec<u8>,
    enrolled_at: String,
}

impl RawRow {
    fn decode(self) -> Result<ReferenceEntry, CorruptReference> {
        let corrupt = |reason: String| CorruptReference {
            identity_id: self.identity_id.clone(),
            reason,
        };

        let identity_id =
            IdentityId::new(self.identity_id.as_str()).map_err(|e| corrupt(e.to_string()))?;
        if self.embedding.len() % 4 != 0 {
            return Err(corrupt(format!(
                "blob length {} is not a multiple of 4",
                self.embedding.len()
            )));
        }
        let values = decode_embedding(&self.embedding);
        if values.len() as i64 != self.dimension {
            return Err(corrupt(format!(
                "blob holds {} values but row records dimension {}",
                values.len(),
                self.dimension
            )));
        }
        let embedding = Embedding::new(values).map_err(|e| corrupt(e.to_string()))?;
        let enrolled_at = DateTime::parse_from_rfc3339(&self.enrolled_at)
            .map_err(|e| corrupt(format!("bad enrolled_at '{}': {e}", self.enrolled_at)))?
            .with_timezone(&Utc);

        Ok(ReferenceEntry {
            identity_id,
            embedding,
            enrolled_at,
        })
    }
}

fn encode_embedding(embedding: &Embedding) -> Vec<u8> {
    embedding
        .values()
        .iter()
        .flat_map(|v| v.to_le_bytes())
        .collect()
}

fn decode_embedding(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect()
}
