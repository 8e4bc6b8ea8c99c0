//! Error types for the diffract library.

use std::path::PathBuf;
use thiserror::Error;

use crate::pipeline::Stage;

/// Main error type for diffract operations.
#[derive(Debug, Error)]
pub enum DiffractError {
    /// Error reading or accessing a file.
    #[error("IO error for '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Invalid or missing configuration. Always raised before a stage runs.
    #[error("Configuration error: {0}")]
    Config(String),

    /// A dataset could not be built or registered.
    #[error("Dataset error: {0}")]
    Dataset(String),

    /// Lookup of a collection that is not in the registry.
    #[error("Peak collection '{0}' not found")]
    CollectionNotFound(String),

    /// Lookup of a dataset that is not in the registry.
    #[error("Dataset '{0}' not found")]
    DatasetNotFound(String),

    /// Lookup of a unit cell tag that is not in the registry.
    #[error("Unit cell '{0}' not found")]
    CellNotFound(String),

    /// A stage was handed a collection whose kind it cannot consume,
    /// or a registration tried to change a collection's kind.
    #[error("Collection '{collection}' of kind {kind} cannot be used by {stage}")]
    InvalidCollectionKind {
        collection: String,
        kind: String,
        stage: String,
    },

    /// A stage needs a unit cell on the collection but none is assigned.
    #[error("{stage}: collection '{collection}' has no assigned unit cell")]
    UnassignedCell { stage: Stage, collection: String },

    /// The reduction engine faulted for a reason other than insufficient data.
    #[error("{stage}: engine failure: {message}")]
    Engine { stage: Stage, message: String },

    /// A stage produced an artifact the rest of the pipeline cannot use.
    #[error("{stage} aborted on '{collection}': {count} of {total} peaks ({reason})")]
    StageAborted {
        stage: Stage,
        collection: String,
        count: usize,
        total: usize,
        reason: String,
    },

    /// The autoindex window reached its maximum without a matching cell.
    #[error("Autoindexing failed after {attempts} attempts (last window frames {last_start}..{last_end})")]
    AutoindexFailed {
        attempts: usize,
        last_start: usize,
        last_end: usize,
    },

    /// The run was cancelled before the named stage started.
    #[error("Run cancelled before {stage}")]
    Cancelled { stage: Stage },

    /// Error saving or loading an experiment archive.
    #[error("Persistence error: {0}")]
    Persistence(String),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Registry invariant violated.
    #[error("Validation error: {0}")]
    Validation(String),
}

impl DiffractError {
    /// True for errors raised before any pipeline stage executed.
    pub fn is_configuration(&self) -> bool {
        matches!(self, DiffractError::Config(_))
    }
}

/// Result type alias for diffract operations.
pub type Result<T> = std::result::Result<T, DiffractError>;
