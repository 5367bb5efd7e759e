//! Error types for the satellite precipitation pipeline.

use std::path::PathBuf;

use thiserror::Error;

/// Primary error type for pipeline operations.
///
/// Variants are grouped by how the pipeline reacts to them: fetch failures are
/// absorbed per item, shape and payload errors abort the run, cache and render
/// errors fail only the artifact branch they occurred in.
#[derive(Debug, Error)]
pub enum SatError {
    // === Recoverable ===
    #[error("Fetch failed for {uri}: {message}")]
    FetchFailure { uri: String, message: String },

    // === Fatal to the run ===
    #[error("Shape mismatch for {context}: expected {expected}, got {actual}")]
    ShapeMismatch {
        context: String,
        expected: String,
        actual: String,
    },

    #[error("Invalid payload {path}: {message}")]
    Payload { path: PathBuf, message: String },

    #[error("No records inside the bounding box in {0}")]
    NoData(PathBuf),

    // === Fatal to one artifact branch ===
    #[error("Cache I/O failed for {path}: {message}")]
    CacheIo { path: PathBuf, message: String },

    #[error("Rendering failed for {path}: {message}")]
    Render { path: PathBuf, message: String },

    // === Raised at entry, before any I/O ===
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Run cancelled")]
    Cancelled,

    #[error("Worker task failed: {0}")]
    Worker(String),
}

impl SatError {
    pub fn fetch(uri: impl Into<String>, message: impl ToString) -> Self {
        Self::FetchFailure {
            uri: uri.into(),
            message: message.to_string(),
        }
    }

    pub fn shape_mismatch(
        context: impl Into<String>,
        expected: impl Into<String>,
        actual: impl Into<String>,
    ) -> Self {
        Self::ShapeMismatch {
            context: context.into(),
            expected: expected.into(),
            actual: actual.into(),
        }
    }

    pub fn payload(path: impl Into<PathBuf>, message: impl ToString) -> Self {
        Self::Payload {
            path: path.into(),
            message: message.to_string(),
        }
    }

    pub fn cache_io(path: impl Into<PathBuf>, message: impl ToString) -> Self {
        Self::CacheIo {
            path: path.into(),
            message: message.to_string(),
        }
    }

    pub fn render(path: impl Into<PathBuf>, message: impl ToString) -> Self {
        Self::Render {
            path: path.into(),
            message: message.to_string(),
        }
    }

    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }

    /// Whether this error must abort the whole run.
    ///
    /// Cache and render failures only lose the artifact they belong to, and
    /// fetch failures are absorbed by the fetcher.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            SatError::ShapeMismatch { .. }
                | SatError::Payload { .. }
                | SatError::NoData(_)
                | SatError::Configuration(_)
                | SatError::Cancelled
                | SatError::Worker(_)
        )
    }
}
