//! # Annotation Anchors
//!
//! This crate holds the synchronous core of annotation tracking: the
//! annotation record, the per-document store that owns it, and the text
//! algorithms that keep anchors pointing at the right span.
//!
//! ## Features
//!
//! - **Anchors**: metadata bound to a byte range of a document snapshot
//! - **Offset Adjustment**: cheap shifting for edits that do not touch an anchor
//! - **Span Matching**: whitespace-tolerant search mapped back to source offsets
//! - **Delimited Snippets**: the anchor-in-context payload sent for relocation
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                       Annotation Anchors                        │
//! ├─────────────────────────────────────────────────────────────────┤
//! │  Edit ──► adjust() ──► AnnotationStore ──► DocumentSnapshot     │
//! │                              │                                  │
//! │                              ▼                                  │
//! │  find_span() ◄── normalize()     DelimitedSnippet               │
//! └─────────────────────────────────────────────────────────────────┘
//! ```

pub mod adjust;
pub mod annotation;
pub mod delimit;
pub mod error;
pub mod normalize;
pub mod store;

pub use adjust::{Adjustment, Edit, EditPlacement, adjust, placement};
pub use annotation::{Annotation, AnnotationId, DocumentText, OriginalAnchor, validate_span};
pub use delimit::{DEFAULT_DELIMITER, DelimitedSnippet, free_delimiter};
pub use error::{AnchorError, Result};
pub use normalize::{NormalizedText, find_span, normalize};
pub use store::{AnnotationStore, DocumentId, DocumentSnapshot};
