//! Error taxonomy for the ingestion and retrieval pipeline.
//!
//! Per-row and per-file problems never surface here as hard failures:
//! unreadable files are logged and skipped, malformed dates become empty
//! strings, and malformed resolved flags become
//! [`ResolvedStatus::Unknown`](crate::models::ResolvedStatus::Unknown).
//! The variants below are the pipeline-level conditions a caller must
//! handle explicitly.

use std::path::PathBuf;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A single source file could not be parsed. Logged and skipped by the
    /// reader; only returned from single-file entry points.
    #[error("cannot read source {file}: {reason}")]
    SourceUnreadable { file: String, reason: String },

    /// The input directory produced zero usable tables.
    #[error("no readable ticket sources in {}", dir.display())]
    NoUsableSources { dir: PathBuf },

    /// The unified snapshot was requested but has not been written yet.
    #[error("unified snapshot not found at {}; run `tix unify` first", path.display())]
    SnapshotNotFound { path: PathBuf },

    #[error("documents file not found at {}; run `tix documents` first", path.display())]
    DocumentsNotFound { path: PathBuf },

    /// No document survived id/text filtering before embedding.
    #[error("no indexable documents (every document has an empty id or text)")]
    EmptyDocumentSet,

    /// Load was attempted before any index was built.
    #[error("index not found at {}; run `tix build` first", path.display())]
    IndexNotFound { path: PathBuf },

    /// The persisted index artifacts disagree with each other or are malformed.
    #[error("index artifacts are corrupt: {reason}")]
    IndexCorrupt { reason: String },

    /// Building or querying needs an embedding provider and none is configured.
    #[error("embedding is disabled; set [embedding] provider in config")]
    EmbeddingDisabled,

    /// The caller handed the index a vector of the wrong width.
    #[error("query vector has {got} dimensions, index expects {expected}")]
    DimensionMismatch { expected: usize, got: usize },

    /// An external capability (embedding or text generation) failed.
    #[error(transparent)]
    Provider(#[from] anyhow::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Csv(#[from] csv::Error),
}

impl Error {
    pub(crate) fn corrupt(reason: impl Into<String>) -> Self {
        Error::IndexCorrupt {
            reason: reason.into(),
        }
    }
}
