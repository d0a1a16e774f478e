//! Top-k retrieval and context formatting.
//!
//! [`retrieve`] is a pure read against a [`VectorIndex`]. The resulting
//! [`Retrieval`] renders the context block handed to the prompt templates:
//! each chunk's text followed by a `(Source: <name>)` marker, in rank order,
//! separated by blank lines.

use anyhow::{bail, Result};

use crate::config::Config;
use crate::embedding::{create_embedder, Embedder};
use crate::error::IndexError;
use crate::index::VectorIndex;
use crate::knowledge::KnowledgeBase;
use crate::models::ScoredChunk;

/// Ranked chunks returned for one query.
#[derive(Debug, Clone, Default)]
pub struct Retrieval {
    pub chunks: Vec<ScoredChunk>,
}

impl Retrieval {
    /// Chunk texts with attribution markers, best match first.
    pub fn context_block(&self) -> String {
        self.chunks
            .iter()
            .map(|hit| format!("{}\n(Source: {})", hit.chunk.text, hit.chunk.source_name))
            .collect::<Vec<_>>()
            .join("\n\n")
    }

    /// Distinct source names in rank order.
    pub fn sources(&self) -> Vec<String> {
        let mut sources: Vec<String> = Vec::new();
        for hit in &self.chunks {
            if !sources.contains(&hit.chunk.source_name) {
                sources.push(hit.chunk.source_name.clone());
            }
        }
        sources
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }
}

/// The `k` chunks of `index` nearest to `query`.
pub async fn retrieve(
    index: &VectorIndex,
    embedder: &dyn Embedder,
    query: &str,
    k: usize,
) -> Result<Retrieval, IndexError> {
    let chunks = index.search_text(embedder, query, k).await?;
    tracing::debug!(k, hits = chunks.len(), "retrieved context");
    Ok(Retrieval { chunks })
}

/// `qah search`: print the ranked chunks for a query.
pub async fn run_search(config: &Config, query: &str, k: Option<usize>) -> Result<()> {
    if query.trim().is_empty() {
        println!("No results.");
        return Ok(());
    }
    if !config.embedding.is_enabled() {
        bail!("Search requires embeddings. Set [embedding] provider in config.");
    }

    let kb = KnowledgeBase::open(&config.index.path).await?;
    let Some(index) = kb.current() else {
        bail!(
            "No knowledge base at {}. Run `qah build <paths>` first.",
            config.index.path.display()
        );
    };

    let embedder = create_embedder(&config.embedding)?;
    let k = k.unwrap_or(config.retrieval.test_case_k);
    let retrieval = retrieve(&index, embedder.as_ref(), query, k).await?;

    if retrieval.is_empty() {
        println!("No results.");
        return Ok(());
    }

    for (i, hit) in retrieval.chunks.iter().enumerate() {
        println!(
            "{}. [{:.2}] {} #{}",
            i + 1,
            hit.score,
            hit.chunk.source_name,
            hit.chunk.sequence_index
        );
        println!(
            "    excerpt: \"{}\"",
            excerpt(&hit.chunk.text, 240).replace('\n', " ").trim()
        );
        println!("    id: {}", hit.chunk.id);
        println!();
    }
    Ok(())
}

fn excerpt(text: &str, max_chars: usize) -> String {
    text.chars().take(max_chars).collect()
}
