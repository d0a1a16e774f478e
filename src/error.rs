//! Typed errors for the library seams.
//!
//! | Error | Raised by | Policy |
//! |-------|-----------|--------|
//! | [`LoadError`] | loader, per file | absorbed into the load report |
//! | [`EmbedError`] | embedding capability | surfaced, never retried |
//! | [`ModelError`] | model capability | surfaced, never retried |
//! | [`IndexError`] | build, persistence, search | configuration variants are fatal |
//! | [`GenerationError`] | orchestrator | carries the task kind and cause |
//!
//! A missing persisted index is not an error: `load` returns `Ok(None)`.

use std::time::Duration;
use thiserror::Error;

use crate::models::TaskKind;

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("unsupported extension: {0}")]
    UnsupportedExtension(String),
    #[error("read failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("file is not valid UTF-8")]
    NotUtf8,
    #[error("markup parse failed: {0}")]
    Markup(String),
    #[error("document is empty after normalization")]
    Empty,
}

#[derive(Debug, Error)]
pub enum EmbedError {
    #[error("embedding call timed out after {}s", .0.as_secs_f64())]
    Timeout(Duration),
    #[error("embedding provider error: {0}")]
    Provider(String),
    #[error("embedding provider returned {returned} vectors for {requested} inputs")]
    CountMismatch { requested: usize, returned: usize },
    #[error("embedding dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },
    #[error("embedding provider is disabled")]
    Disabled,
}

impl EmbedError {
    /// Timeouts and provider failures may succeed on a later attempt; the
    /// rest are configuration problems.
    pub fn is_transient(&self) -> bool {
        matches!(self, EmbedError::Timeout(_) | EmbedError::Provider(_))
    }
}

#[derive(Debug, Error)]
pub enum ModelError {
    #[error("model call timed out after {}s", .0.as_secs_f64())]
    Timeout(Duration),
    #[error("model provider error: {0}")]
    Provider(String),
    #[error("model returned an empty response")]
    EmptyResponse,
    #[error("model provider is disabled")]
    Disabled,
}

#[derive(Debug, Error)]
pub enum IndexError {
    #[error("index configuration error: {0}")]
    Config(String),
    #[error("index dimension mismatch: index holds {index}-dim vectors, embedder produces {embedder}")]
    DimensionMismatch { index: usize, embedder: usize },
    #[error("index was built with embedding model '{index}', but the active embedder is '{embedder}'")]
    EmbedderMismatch { index: String, embedder: String },
    #[error("cannot build an index from zero chunks")]
    Empty,
    #[error(transparent)]
    Embed(#[from] EmbedError),
    #[error("index storage error: {0}")]
    Storage(#[from] sqlx::Error),
    #[error("index io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("persisted index is corrupt: {0}")]
    Corrupt(String),
}

impl IndexError {
    /// Configuration errors are fatal and must not be retried.
    pub fn is_fatal(&self) -> bool {
        match self {
            IndexError::Config(_)
            | IndexError::DimensionMismatch { .. }
            | IndexError::EmbedderMismatch { .. }
            | IndexError::Corrupt(_) => true,
            IndexError::Embed(e) => !e.is_transient(),
            _ => false,
        }
    }
}

/// Why a generation call failed.
#[derive(Debug, Error)]
pub enum GenerationFailure {
    #[error("retrieval failed: {0}")]
    Retrieval(#[from] IndexError),
    #[error(transparent)]
    Model(#[from] ModelError),
    #[error("script generation requires reference markup")]
    MissingMarkup,
    #[error("model output is not a test-case list: {reason}")]
    MalformedOutput { reason: String, raw_output: String },
    #[error("output cites sources that were not retrieved: {}", unknown_sources.join(", "))]
    Ungrounded {
        unknown_sources: Vec<String>,
        raw_output: String,
    },
}

/// A failed generation call, tagged with the task that was requested.
#[derive(Debug, Error)]
#[error("{task_kind} failed: {cause}")]
pub struct GenerationError {
    pub task_kind: TaskKind,
    #[source]
    pub cause: GenerationFailure,
}

impl GenerationError {
    pub fn new(task_kind: TaskKind, cause: impl Into<GenerationFailure>) -> Self {
        Self {
            task_kind,
            cause: cause.into(),
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(
            self.cause,
            GenerationFailure::Model(ModelError::Timeout(_))
                | GenerationFailure::Retrieval(IndexError::Embed(EmbedError::Timeout(_)))
        )
    }
}
