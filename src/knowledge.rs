//! The process-wide active index.
//!
//! A [`KnowledgeBase`] owns the [`IndexStore`] for one index location and
//! the index currently served from it. Readers take an `Arc` snapshot with
//! [`KnowledgeBase::current`] and keep using it for the rest of their
//! request, so a concurrent [`KnowledgeBase::rebuild`] never tears a search
//! in progress: the new index is persisted first and then swapped in.
//!
//! Builds are serialized: a second [`KnowledgeBase::rebuild`] waits until
//! the first has persisted and swapped, so the served index and the file on
//! disk always come from the same build.
//!
//! Lifecycle: absent → built (in memory) → persisted → reloadable.

use serde::Serialize;
use std::path::Path;
use std::sync::{Arc, RwLock};
use tokio::sync::Mutex;

use crate::config::ChunkingConfig;
use crate::embedding::Embedder;
use crate::error::IndexError;
use crate::index::{IndexMeta, VectorIndex};
use crate::models::Chunk;
use crate::store::IndexStore;

pub struct KnowledgeBase {
    store: IndexStore,
    active: RwLock<Option<Arc<VectorIndex>>>,
    /// Held across build, save and swap.
    build_lock: Mutex<()>,
}

/// What `qah status` and `GET /status` report.
#[derive(Debug, Clone, Serialize)]
pub struct KnowledgeStatus {
    pub index_path: String,
    pub built: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub meta: Option<IndexMeta>,
}

impl KnowledgeBase {
    /// Open the index location, loading a persisted index if there is one.
    /// An absent index is a normal state.
    pub async fn open(dir: &Path) -> Result<Self, IndexError> {
        let store = IndexStore::new(dir);
        let loaded = store.load().await?;
        if loaded.is_none() {
            tracing::info!(path = %dir.display(), "no knowledge base built yet");
        }
        Ok(Self {
            store,
            active: RwLock::new(loaded.map(Arc::new)),
            build_lock: Mutex::new(()),
        })
    }

    pub fn store(&self) -> &IndexStore {
        &self.store
    }

    /// Snapshot of the active index, or `None` before the first build.
    pub fn current(&self) -> Option<Arc<VectorIndex>> {
        self.active
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Build a new index from `chunks`, persist it, then make it active.
    ///
    /// On failure the previously active index stays in place both in memory
    /// and on disk. Concurrent calls run one at a time, in call order.
    pub async fn rebuild(
        &self,
        chunks: Vec<Chunk>,
        embedder: &dyn Embedder,
        chunking: &ChunkingConfig,
        batch_size: usize,
    ) -> Result<Arc<VectorIndex>, IndexError> {
        let _build = self.build_lock.lock().await;
        let index = VectorIndex::build(chunks, embedder, chunking, batch_size).await?;
        self.store.save(&index).await?;

        let index = Arc::new(index);
        let previous = self
            .active
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .replace(index.clone());
        if let Some(old) = previous {
            tracing::info!(
                old_chunks = old.len(),
                new_chunks = index.len(),
                "active index replaced"
            );
        }
        Ok(index)
    }

    pub fn status(&self) -> KnowledgeStatus {
        let current = self.current();
        KnowledgeStatus {
            index_path: self.store.index_path().display().to_string(),
            built: current.is_some(),
            meta: current.map(|index| index.meta().clone()),
        }
    }
}
