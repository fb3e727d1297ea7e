//! Failure kinds for decoding, extraction, index persistence, builds and queries.
//!
//! Extraction failures are recovered per file during builds (counted, skipped)
//! and surfaced as typed errors on the single-input query path.

use std::path::PathBuf;

use thiserror::Error;

/// Audio could not be turned into a mono waveform.
#[derive(Debug, Error)]
pub enum AudioError {
    /// The file could not be opened.
    #[error("Failed to open {path}: {source}")]
    Open {
        path: PathBuf,
        source: std::io::Error,
    },
    /// The container or codec rejected the data.
    #[error("Failed to decode {path}: {message}")]
    Decode { path: PathBuf, message: String },
    /// Decoding succeeded but produced no samples.
    #[error("No audio samples in {path}")]
    Empty { path: PathBuf },
}

/// A feature vector could not be produced.
#[derive(Debug, Error)]
pub enum ExtractError {
    #[error(transparent)]
    Decode(#[from] AudioError),
    /// The signal (or its features) cannot yield a finite vector.
    #[error("Degenerate signal: {0}")]
    NumericDegenerate(String),
    /// The embedding model failed to load or run.
    #[error("Embedding model error: {0}")]
    Model(String),
}

/// Index persistence and shape failures.
#[derive(Debug, Error)]
pub enum IndexError {
    /// No persisted index at this location. Callers decide whether to build.
    #[error("No index found at {path}")]
    NotFound { path: PathBuf },
    /// A vector's dimension differs from the index dimension.
    #[error("Dimension mismatch: index has {expected} dims, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },
    /// Persisted artifacts are inconsistent with each other.
    #[error("Corrupt index at {path}: {reason}")]
    Corrupt { path: PathBuf, reason: String },
    #[error("Index IO failed at {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Invalid index JSON at {path}: {source}")]
    Json {
        path: PathBuf,
        source: serde_json::Error,
    },
    /// An index needs at least one entry.
    #[error("Cannot create an index without entries")]
    Empty,
}

/// Failures that abort an index build as a whole.
#[derive(Debug, Error)]
pub enum BuildError {
    #[error("Invalid corpus directory {path}: {reason}")]
    InvalidCorpus { path: PathBuf, reason: String },
    /// The cancel flag was raised; nothing was published.
    #[error("Index build canceled")]
    Canceled,
    /// Every supported file failed or was rejected.
    #[error("No usable samples among {attempted} files")]
    NoUsableSamples { attempted: usize },
    /// The extractor could not be prepared (e.g. missing model weights).
    #[error(transparent)]
    Extractor(#[from] ExtractError),
    #[error(transparent)]
    Index(#[from] IndexError),
}

/// Failures surfaced to query callers.
#[derive(Debug, Error)]
pub enum QueryError {
    /// The engine has no index loaded yet.
    #[error("Similarity engine has no index loaded")]
    NotReady,
    #[error(transparent)]
    Extract(#[from] ExtractError),
    /// The query vector is unusable (empty, NaN after sanitizing).
    #[error("Invalid query: {0}")]
    InvalidQuery(String),
    /// The query vector was produced for a different method or model.
    #[error("Query has {actual} dims but the index expects {expected}")]
    DimensionMismatch { expected: usize, actual: usize },
    #[error(transparent)]
    Index(#[from] IndexError),
}

impl IndexError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn corrupt(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::Corrupt {
            path: path.into(),
            reason: reason.into(),
        }
    }
}
