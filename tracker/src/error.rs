//! Error types for the annotation tracker.

use tether_anchors::{AnchorError, DocumentId};
use thiserror::Error;

/// Result type alias for tracker operations.
pub type Result<T> = std::result::Result<T, TrackerError>;

/// Errors that can occur while tracking annotations.
#[derive(Error, Debug)]
pub enum TrackerError {
    /// Store rejected the operation.
    #[error(transparent)]
    Anchor(#[from] AnchorError),

    /// A retag batch is already running for the document.
    #[error("a retag is already running for {0}")]
    RetagInFlight(DocumentId),

    /// The host reports no selection to annotate.
    #[error("no selection in {0}")]
    NoSelection(DocumentId),

    /// The document host could not serve the request.
    #[error("document host error: {0}")]
    Host(String),

    /// Storage operation failed.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// Serialization/deserialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Invalid configuration file.
    #[error("config error: {0}")]
    Config(#[from] toml::de::Error),

    /// IO error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Storage-specific errors.
#[derive(Error, Debug)]
pub enum StorageError {
    /// Failed to create storage directory.
    #[error("failed to create directory: {0}")]
    CreateDirectory(String),

    /// Failed to read an annotation file.
    #[error("failed to read file: {0}")]
    ReadFile(String),

    /// Failed to write an annotation file.
    #[error("failed to write file: {0}")]
    WriteFile(String),

    /// The document id does not name a file.
    #[error("not a file path: {0}")]
    InvalidPath(String),
}
