//! Error types for annotation anchors and the annotation store.

use thiserror::Error;

/// Result type alias for anchor operations.
pub type Result<T> = std::result::Result<T, AnchorError>;

/// Errors that can occur while creating or storing annotation anchors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AnchorError {
    /// Span does not fit inside its document.
    #[error("span {start}..{end} is out of bounds for a document of {len} bytes")]
    OutOfBounds { start: usize, end: usize, len: usize },

    /// Offset falls inside a multi-byte character.
    #[error("offset {0} is not on a character boundary")]
    NotCharBoundary(usize),

    /// Document is not open in the store.
    #[error("document not open: {0}")]
    DocumentNotOpen(String),

    /// Annotation id is unknown for the document.
    #[error("annotation not found: {0}")]
    AnnotationNotFound(String),

    /// Annotation id is already taken in the document.
    #[error("annotation already exists: {0}")]
    DuplicateId(String),
}
