//! In-memory vector index over embedded chunks.
//!
//! A [`VectorIndex`] pairs every [`Chunk`] with its embedding, in chunk
//! sequence order, and answers brute-force cosine nearest-neighbour queries.
//! Entries are never mutated after [`VectorIndex::build`]; a rebuild produces
//! a new index (see [`crate::knowledge`]).
//!
//! # Ranking
//!
//! Results are sorted by descending cosine similarity with a stable sort, so
//! equal scores keep insertion order. The metric is recorded in
//! [`IndexMeta::metric`] and checked again when an index is reloaded.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::config::ChunkingConfig;
use crate::embedding::{cosine_similarity, embed_checked, embed_query, Embedder};
use crate::error::IndexError;
use crate::models::{Chunk, ScoredChunk};

/// The only similarity metric an index is ever built with.
pub const METRIC_COSINE: &str = "cosine";

/// Facts about how an index was built, persisted alongside the vectors.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IndexMeta {
    pub model: String,
    pub dims: usize,
    pub metric: String,
    pub max_chars: usize,
    pub overlap_chars: usize,
    pub built_at: DateTime<Utc>,
    pub chunk_count: usize,
}

/// A chunk and its embedding.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexEntry {
    pub chunk: Chunk,
    pub vector: Vec<f32>,
}

#[derive(Debug, Clone)]
pub struct VectorIndex {
    meta: IndexMeta,
    entries: Vec<IndexEntry>,
}

impl VectorIndex {
    /// Embed `chunks` in order, `batch_size` at a time, and index them.
    ///
    /// Fails with [`IndexError::Empty`] for an empty chunk list and with
    /// [`IndexError::Embed`] on the first failed batch. Nothing is retried.
    pub async fn build(
        chunks: Vec<Chunk>,
        embedder: &dyn Embedder,
        chunking: &ChunkingConfig,
        batch_size: usize,
    ) -> Result<Self, IndexError> {
        if chunks.is_empty() {
            return Err(IndexError::Empty);
        }
        if batch_size == 0 {
            return Err(IndexError::Config("batch_size must be > 0".into()));
        }

        let mut entries = Vec::with_capacity(chunks.len());
        let total_batches = chunks.len().div_ceil(batch_size);
        for (batch_no, batch) in chunks.chunks(batch_size).enumerate() {
            let texts: Vec<String> = batch.iter().map(|c| c.text.clone()).collect();
            let vectors = embed_checked(embedder, &texts).await?;
            tracing::debug!(
                batch = batch_no + 1,
                of = total_batches,
                size = batch.len(),
                "embedded batch"
            );
            entries.extend(
                batch
                    .iter()
                    .cloned()
                    .zip(vectors)
                    .map(|(chunk, vector)| IndexEntry { chunk, vector }),
            );
        }

        let meta = IndexMeta {
            model: embedder.model_name().to_string(),
            dims: embedder.dims(),
            metric: METRIC_COSINE.to_string(),
            max_chars: chunking.max_chars,
            overlap_chars: chunking.overlap_chars,
            built_at: Utc::now(),
            chunk_count: entries.len(),
        };
        tracing::info!(chunks = meta.chunk_count, model = %meta.model, dims = meta.dims, "index built");

        Ok(Self { meta, entries })
    }

    /// Reassemble an index from persisted parts, checking every vector
    /// against the recorded dimension.
    pub fn from_parts(meta: IndexMeta, entries: Vec<IndexEntry>) -> Result<Self, IndexError> {
        if meta.metric != METRIC_COSINE {
            return Err(IndexError::Corrupt(format!(
                "unsupported metric '{}'",
                meta.metric
            )));
        }
        if entries.len() != meta.chunk_count {
            return Err(IndexError::Corrupt(format!(
                "meta records {} chunks, found {}",
                meta.chunk_count,
                entries.len()
            )));
        }
        if let Some(bad) = entries.iter().find(|e| e.vector.len() != meta.dims) {
            return Err(IndexError::Corrupt(format!(
                "chunk {} has a {}-dim vector, expected {}",
                bad.chunk.id,
                bad.vector.len(),
                meta.dims
            )));
        }
        Ok(Self { meta, entries })
    }

    pub fn meta(&self) -> &IndexMeta {
        &self.meta
    }

    pub fn entries(&self) -> &[IndexEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Reject an embedder that cannot produce vectors comparable to the
    /// stored ones. Both cases are fatal configuration errors.
    pub fn check_embedder(&self, embedder: &dyn Embedder) -> Result<(), IndexError> {
        if embedder.dims() != self.meta.dims {
            return Err(IndexError::DimensionMismatch {
                index: self.meta.dims,
                embedder: embedder.dims(),
            });
        }
        if embedder.model_name() != self.meta.model {
            return Err(IndexError::EmbedderMismatch {
                index: self.meta.model.clone(),
                embedder: embedder.model_name().to_string(),
            });
        }
        Ok(())
    }

    /// The `k` entries most similar to `query`, best first.
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<ScoredChunk>, IndexError> {
        if query.len() != self.meta.dims {
            return Err(IndexError::DimensionMismatch {
                index: self.meta.dims,
                embedder: query.len(),
            });
        }
        if k == 0 {
            return Ok(Vec::new());
        }

        let mut scored: Vec<(usize, f32)> = self
            .entries
            .iter()
            .enumerate()
            .map(|(i, e)| (i, cosine_similarity(query, &e.vector)))
            .collect();

        // Stable: equal scores stay in insertion order.
        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(k);

        Ok(scored
            .into_iter()
            .map(|(i, score)| ScoredChunk {
                chunk: self.entries[i].chunk.clone(),
                score,
            })
            .collect())
    }

    /// Embed `query` with `embedder` and search.
    pub async fn search_text(
        &self,
        embedder: &dyn Embedder,
        query: &str,
        k: usize,
    ) -> Result<Vec<ScoredChunk>, IndexError> {
        self.check_embedder(embedder)?;
        let query_vec = embed_query(embedder, query).await?;
        self.search(&query_vec, k)
    }
}
