//! Error taxonomy for the docqa library.
//!
//! Library functions return [`Result<T>`]; the CLI wraps these in
//! `anyhow::Error` with extra context at the edge.

use std::path::PathBuf;

use thiserror::Error;

/// Errors produced by parsing, chunking, indexing, retrieval and generation.
#[derive(Debug, Error)]
pub enum RagError {
    /// The file extension is not one of the supported document formats.
    #[error("unsupported file type '{extension}': {}", path.display())]
    UnsupportedFileType { path: PathBuf, extension: String },

    /// Parsing succeeded but produced no text. Rejected before chunking.
    #[error("document has no extractable text: {}", path.display())]
    EmptyDocument { path: PathBuf },

    /// The document is malformed for its declared format.
    #[error("failed to parse {}: {message}", path.display())]
    Parse { path: PathBuf, message: String },

    /// `chunk_size` is zero or `chunk_overlap >= chunk_size`.
    #[error("invalid chunk configuration: chunk_size={chunk_size}, chunk_overlap={chunk_overlap} (overlap must be smaller than size, size must be > 0)")]
    InvalidChunkConfig {
        chunk_size: usize,
        chunk_overlap: usize,
    },

    /// A persisted index exists but cannot be opened or read.
    #[error("index at {} is unavailable: {message}", dir.display())]
    IndexUnavailable { dir: PathBuf, message: String },

    /// Vector dimensions or embedding model disagree with the index.
    #[error("embedding mismatch: {0}")]
    EmbeddingMismatch(String),

    /// The embedding provider failed to produce vectors.
    #[error("embedding error ({provider}): {message}")]
    Embedding { provider: String, message: String },

    /// The text-generation backend failed or timed out.
    #[error("generation failed ({provider}): {message}")]
    GenerationFailure { provider: String, message: String },

    /// Configuration is invalid.
    #[error("configuration error: {0}")]
    Config(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Storage failure inside an index that was otherwise readable.
    #[error("index storage error: {0}")]
    Storage(#[from] sqlx::Error),
}

/// Convenience result alias for library operations.
pub type Result<T> = std::result::Result<T, RagError>;

impl RagError {
    pub(crate) fn parse(path: impl Into<PathBuf>, message: impl ToString) -> Self {
        RagError::Parse {
            path: path.into(),
            message: message.to_string(),
        }
    }

    pub(crate) fn embedding(provider: impl Into<String>, message: impl ToString) -> Self {
        RagError::Embedding {
            provider: provider.into(),
            message: message.to_string(),
        }
    }

    pub(crate) fn generation(provider: impl Into<String>, message: impl ToString) -> Self {
        RagError::GenerationFailure {
            provider: provider.into(),
            message: message.to_string(),
        }
    }
}
