//! Knowledge-base build pipeline.
//!
//! Coordinates the build phase: loader → chunker → embedding → index →
//! persist → swap. Loading is best-effort; the build itself is all or
//! nothing and replaces the previous index wholesale.

use anyhow::{bail, Result};
use std::path::PathBuf;
use std::sync::Arc;

use crate::chunk::chunk_document;
use crate::config::Config;
use crate::embedding::{create_embedder, Embedder};
use crate::error::IndexError;
use crate::index::VectorIndex;
use crate::knowledge::KnowledgeBase;
use crate::loader::{load_documents, LoadReport};
use crate::models::Chunk;

/// Result of a successful build.
#[derive(Debug)]
pub struct BuildOutcome {
    pub load: LoadReport,
    pub chunks: usize,
    pub index: Arc<VectorIndex>,
}

/// Load and chunk `paths` without embedding anything.
pub fn prepare_chunks(config: &Config, paths: &[PathBuf]) -> (LoadReport, Vec<Chunk>) {
    chunk_report(config, load_documents(paths))
}

/// Chunk every document in `report`, in document order.
pub fn chunk_report(config: &Config, report: LoadReport) -> (LoadReport, Vec<Chunk>) {
    let chunks: Vec<Chunk> = report
        .documents
        .iter()
        .flat_map(|doc| chunk_document(doc, &config.chunking))
        .collect();
    tracing::info!(
        documents = report.documents.len(),
        failures = report.failures.len(),
        skipped = report.skipped.len(),
        chunks = chunks.len(),
        "documents loaded"
    );
    (report, chunks)
}

/// Build a new index from `paths` and make it the active one in `kb`.
///
/// Fails with [`IndexError::Empty`] when no file yielded any text; the
/// previous index is left untouched in that case.
pub async fn build_knowledge_base(
    kb: &KnowledgeBase,
    config: &Config,
    embedder: &dyn Embedder,
    paths: &[PathBuf],
) -> Result<BuildOutcome, IndexError> {
    build_from_report(kb, config, embedder, load_documents(paths)).await
}

/// Build from documents that were already loaded, from disk, from
/// uploaded buffers, or a merge of both.
pub async fn build_from_report(
    kb: &KnowledgeBase,
    config: &Config,
    embedder: &dyn Embedder,
    report: LoadReport,
) -> Result<BuildOutcome, IndexError> {
    let (load, chunks) = chunk_report(config, report);
    let chunk_count = chunks.len();
    let index = kb
        .rebuild(chunks, embedder, &config.chunking, config.embedding.batch_size)
        .await?;
    Ok(BuildOutcome {
        load,
        chunks: chunk_count,
        index,
    })
}

fn print_load_summary(report: &LoadReport) {
    println!("  documents: {}", report.documents.len());
    for doc in &report.documents {
        println!("    {} ({})", doc.source_name, doc.format.as_str());
    }
    if !report.skipped.is_empty() {
        println!("  skipped (unsupported): {}", report.skipped.join(", "));
    }
    if !report.failures.is_empty() {
        println!("  failed: {}", report.failures.len());
        for failure in &report.failures {
            println!("    {}: {}", failure.source_name, failure.error);
        }
    }
}

/// `qah build`: rebuild the knowledge base from files and directories.
pub async fn run_build(config: &Config, paths: &[PathBuf], dry_run: bool) -> Result<()> {
    if paths.is_empty() {
        bail!("No input paths given");
    }

    if dry_run {
        let (report, chunks) = prepare_chunks(config, paths);
        println!("build (dry-run)");
        print_load_summary(&report);
        println!("  estimated chunks: {}", chunks.len());
        return Ok(());
    }

    if !config.embedding.is_enabled() {
        bail!("Building requires embeddings. Set [embedding] provider in config.");
    }

    let embedder = create_embedder(&config.embedding)?;
    let kb = KnowledgeBase::open(&config.index.path).await?;
    let outcome = build_knowledge_base(&kb, config, embedder.as_ref(), paths).await?;
    let meta = outcome.index.meta();

    println!("build {}", config.index.path.display());
    print_load_summary(&outcome.load);
    println!("  chunks indexed: {}", outcome.chunks);
    println!("  model: {} ({} dims, {})", meta.model, meta.dims, meta.metric);
    println!("ok");
    Ok(())
}

/// `qah status`: report whether a knowledge base exists and how it was built.
pub async fn run_status(config: &Config) -> Result<()> {
    let kb = KnowledgeBase::open(&config.index.path).await?;
    let status = kb.status();

    println!("QA Harness — Knowledge Base");
    println!("===========================");
    println!();
    println!("  Index:       {}", status.index_path);
    match status.meta {
        None => {
            println!("  Status:      not built");
            println!();
            println!("Run `qah build <paths>` to create it.");
        }
        Some(meta) => {
            println!("  Status:      built");
            println!("  Built at:    {}", meta.built_at.format("%Y-%m-%d %H:%M:%S UTC"));
            println!("  Chunks:      {}", meta.chunk_count);
            println!("  Model:       {}", meta.model);
            println!("  Dimensions:  {}", meta.dims);
            println!("  Metric:      {}", meta.metric);
            println!(
                "  Chunking:    {} chars, {} overlap",
                meta.max_chars, meta.overlap_chars
            );
        }
    }
    Ok(())
}
