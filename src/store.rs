//! SQLite persistence for [`VectorIndex`].
//!
//! An index directory holds a single `index.sqlite` file with two tables:
//!
//! ```text
//! meta    (key TEXT PRIMARY KEY, value TEXT)
//! entries (position INTEGER PRIMARY KEY, chunk_id, source_name,
//!          sequence_index, text, hash, vector BLOB)
//! ```
//!
//! Vectors are stored as little-endian `f32` BLOBs (see
//! [`vec_to_blob`]). `position` is the insertion order and is what search
//! tie-breaking relies on after a reload.
//!
//! # Copy-on-write
//!
//! [`IndexStore::save`] writes a fresh file next to the live one and renames
//! it into place only once it is complete. A process that already loaded the
//! previous index keeps using it; the next [`IndexStore::load`] sees the new
//! one. Concurrent saves to the same directory are not coordinated: the
//! last rename wins.

use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use sqlx::Row;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::embedding::{blob_to_vec, vec_to_blob};
use crate::error::IndexError;
use crate::index::{IndexEntry, IndexMeta, VectorIndex};
use crate::models::Chunk;

pub const INDEX_FILE: &str = "index.sqlite";
const FORMAT_VERSION: &str = "1";

/// Handle to a persisted index location.
#[derive(Debug, Clone)]
pub struct IndexStore {
    dir: PathBuf,
}

impl IndexStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn index_path(&self) -> PathBuf {
        self.dir.join(INDEX_FILE)
    }

    pub fn exists(&self) -> bool {
        self.index_path().is_file()
    }

    /// Persist `index`, replacing whatever was there before.
    pub async fn save(&self, index: &VectorIndex) -> Result<(), IndexError> {
        std::fs::create_dir_all(&self.dir)?;
        let tmp_path = self
            .dir
            .join(format!(".index-{}.sqlite.tmp", uuid::Uuid::new_v4()));

        if let Err(e) = write_index(&tmp_path, index).await {
            let _ = std::fs::remove_file(&tmp_path);
            return Err(e);
        }

        std::fs::rename(&tmp_path, self.index_path()).inspect_err(|_| {
            let _ = std::fs::remove_file(&tmp_path);
        })?;
        tracing::info!(
            path = %self.index_path().display(),
            chunks = index.len(),
            "index persisted"
        );
        Ok(())
    }

    /// Load the persisted index.
    ///
    /// Returns `Ok(None)` when nothing was ever saved here. A file that
    /// exists but cannot be read back consistently is
    /// [`IndexError::Corrupt`].
    pub async fn load(&self) -> Result<Option<VectorIndex>, IndexError> {
        let path = self.index_path();
        if !path.is_file() {
            tracing::debug!(path = %path.display(), "no persisted index");
            return Ok(None);
        }

        let pool = connect(&path, false).await?;
        let result = read_index(&pool).await;
        pool.close().await;
        result.map(Some)
    }
}

async fn connect(path: &Path, create: bool) -> Result<SqlitePool, IndexError> {
    let mut options = SqliteConnectOptions::new()
        .filename(path)
        .create_if_missing(create)
        .read_only(!create);
    // Rollback journal keeps the finished index a single self-contained file.
    if create {
        options = options.journal_mode(SqliteJournalMode::Delete);
    }

    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect_with(options)
        .await?;
    Ok(pool)
}

async fn write_index(path: &Path, index: &VectorIndex) -> Result<(), IndexError> {
    let pool = connect(path, true).await?;

    sqlx::query(
        r#"
        CREATE TABLE meta (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL
        )
        "#,
    )
    .execute(&pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE entries (
            position INTEGER PRIMARY KEY,
            chunk_id TEXT NOT NULL,
            source_name TEXT NOT NULL,
            sequence_index INTEGER NOT NULL,
            text TEXT NOT NULL,
            hash TEXT NOT NULL,
            vector BLOB NOT NULL
        )
        "#,
    )
    .execute(&pool)
    .await?;

    let meta = index.meta();
    let pairs: [(&str, String); 8] = [
        ("format_version", FORMAT_VERSION.to_string()),
        ("model", meta.model.clone()),
        ("dims", meta.dims.to_string()),
        ("metric", meta.metric.clone()),
        ("max_chars", meta.max_chars.to_string()),
        ("overlap_chars", meta.overlap_chars.to_string()),
        ("built_at", meta.built_at.to_rfc3339()),
        ("chunk_count", meta.chunk_count.to_string()),
    ];

    let mut tx = pool.begin().await?;
    for (key, value) in pairs {
        sqlx::query("INSERT INTO meta (key, value) VALUES (?, ?)")
            .bind(key)
            .bind(value)
            .execute(&mut *tx)
            .await?;
    }
    for (position, entry) in index.entries().iter().enumerate() {
        sqlx::query(
            r#"
            INSERT INTO entries (position, chunk_id, source_name, sequence_index, text, hash, vector)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(position as i64)
        .bind(&entry.chunk.id)
        .bind(&entry.chunk.source_name)
        .bind(entry.chunk.sequence_index)
        .bind(&entry.chunk.text)
        .bind(&entry.chunk.hash)
        .bind(vec_to_blob(&entry.vector))
        .execute(&mut *tx)
        .await?;
    }
    tx.commit().await?;

    pool.close().await;
    Ok(())
}

async fn read_index(pool: &SqlitePool) -> Result<VectorIndex, IndexError> {
    let meta_rows = sqlx::query("SELECT key, value FROM meta")
        .fetch_all(pool)
        .await?;
    let mut values: HashMap<String, String> = HashMap::new();
    for row in &meta_rows {
        values.insert(row.try_get("key")?, row.try_get("value")?);
    }

    let field = |key: &str| -> Result<&String, IndexError> {
        values
            .get(key)
            .ok_or_else(|| IndexError::Corrupt(format!("meta is missing '{}'", key)))
    };
    let number = |key: &str| -> Result<usize, IndexError> {
        field(key)?
            .parse()
            .map_err(|_| IndexError::Corrupt(format!("meta '{}' is not a number", key)))
    };

    let version = field("format_version")?;
    if version != FORMAT_VERSION {
        return Err(IndexError::Corrupt(format!(
            "unsupported index format version {}",
            version
        )));
    }

    let built_at = DateTime::parse_from_rfc3339(field("built_at")?)
        .map_err(|e| IndexError::Corrupt(format!("meta 'built_at': {}", e)))?
        .with_timezone(&Utc);

    let meta = IndexMeta {
        model: field("model")?.clone(),
        dims: number("dims")?,
        metric: field("metric")?.clone(),
        max_chars: number("max_chars")?,
        overlap_chars: number("overlap_chars")?,
        built_at,
        chunk_count: number("chunk_count")?,
    };

    let rows = sqlx::query(
        r#"
        SELECT chunk_id, source_name, sequence_index, text, hash, vector
        FROM entries
        ORDER BY position ASC
        "#,
    )
    .fetch_all(pool)
    .await?;

    let mut entries = Vec::with_capacity(rows.len());
    for row in &rows {
        let blob: Vec<u8> = row.try_get("vector")?;
        if blob.len() % 4 != 0 {
            return Err(IndexError::Corrupt(format!(
                "vector BLOB of {} bytes is not a whole number of f32 values",
                blob.len()
            )));
        }
        entries.push(IndexEntry {
            chunk: Chunk {
                id: row.try_get("chunk_id")?,
                source_name: row.try_get("source_name")?,
                sequence_index: row.try_get("sequence_index")?,
                text: row.try_get("text")?,
                hash: row.try_get("hash")?,
            },
            vector: blob_to_vec(&blob),
        });
    }

    VectorIndex::from_parts(meta, entries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk::chunk_text;
    use crate::config::ChunkingConfig;
    use crate::embedding::HashEmbedder;
    use tempfile::TempDir;

    async fn sample_index(embedder: &HashEmbedder) -> VectorIndex {
        let mut chunks = chunk_text("policy.md", "Discount code SAVE20 grants 20% off", 100, 20);
        chunks.extend(chunk_text("ui.txt", "Apply button is labeled 'Apply'", 100, 20));
        VectorIndex::build(chunks, embedder, &ChunkingConfig::default(), 16)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_load_absent_returns_none() {
        let tmp = TempDir::new().unwrap();
        let store = IndexStore::new(tmp.path().join("never-built"));
        assert!(store.load().await.unwrap().is_none());
        assert!(!store.exists());
    }

    #[tokio::test]
    async fn test_save_then_load_preserves_entries_and_meta() {
        let tmp = TempDir::new().unwrap();
        let embedder = HashEmbedder::new(64);
        let index = sample_index(&embedder).await;

        let store = IndexStore::new(tmp.path());
        store.save(&index).await.unwrap();
        let loaded = store.load().await.unwrap().unwrap();

        assert_eq!(loaded.entries(), index.entries());
        assert_eq!(loaded.meta().model, index.meta().model);
        assert_eq!(loaded.meta().dims, 64);
        assert_eq!(loaded.meta().chunk_count, 2);
    }

    #[tokio::test]
    async fn test_save_replaces_previous_index_and_leaves_no_temp_files() {
        let tmp = TempDir::new().unwrap();
        let embedder = HashEmbedder::new(32);
        let store = IndexStore::new(tmp.path());

        store.save(&sample_index(&embedder).await).await.unwrap();
        let single = VectorIndex::build(
            chunk_text("only.txt", "just one chunk", 100, 20),
            &embedder,
            &ChunkingConfig::default(),
            16,
        )
        .await
        .unwrap();
        store.save(&single).await.unwrap();

        let loaded = store.load().await.unwrap().unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded.entries()[0].chunk.source_name, "only.txt");

        let names: Vec<String> = std::fs::read_dir(tmp.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec![INDEX_FILE.to_string()]);
    }

    #[tokio::test]
    async fn test_loaded_index_answers_like_the_original() {
        let tmp = TempDir::new().unwrap();
        let embedder = HashEmbedder::new(128);
        let index = sample_index(&embedder).await;
        let store = IndexStore::new(tmp.path());
        store.save(&index).await.unwrap();
        let loaded = store.load().await.unwrap().unwrap();

        let before = index.search_text(&embedder, "discount code behavior", 2).await.unwrap();
        let after = loaded.search_text(&embedder, "discount code behavior", 2).await.unwrap();
        let ids = |hits: &[crate::models::ScoredChunk]| {
            hits.iter().map(|h| h.chunk.id.clone()).collect::<Vec<_>>()
        };
        assert_eq!(ids(&before), ids(&after));
        for (b, a) in before.iter().zip(after.iter()) {
            assert!((b.score - a.score).abs() < 1e-6);
        }
    }

    #[tokio::test]
    async fn test_garbage_file_is_an_error_not_absent() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(tmp.path().join(INDEX_FILE), b"not a database").unwrap();
        let store = IndexStore::new(tmp.path());
        assert!(store.load().await.is_err());
    }
}
