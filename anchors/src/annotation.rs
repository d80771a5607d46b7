//! The annotation record and its anchor.

use std::fmt;
use std::ops::Range;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{AnchorError, Result};

/// Shared, immutable document text. Many annotations of one document point at
/// the same snapshot, so it is reference counted rather than copied.
pub type DocumentText = Arc<str>;

/// Opaque annotation identifier, stable across retags.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AnnotationId(String);

impl AnnotationId {
    /// Generate a fresh random identifier.
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AnnotationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for AnnotationId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for AnnotationId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Creation-time anchor. Captured once and never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OriginalAnchor {
    pub document: DocumentText,
    pub start: usize,
    pub end: usize,
}

/// Metadata bound to a span of a document snapshot.
///
/// `start..end` is a half-open byte range into `document` and always lies on
/// character boundaries. `document` is the text the offsets are valid
/// against, which is not necessarily the live text of the owning document:
/// when the two differ the annotation is stale and needs a retag.
///
/// Records are replaced by value. Every method that changes the anchor
/// returns a new record and leaves `id`, `tool`, `metadata` and `original`
/// untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Annotation {
    id: AnnotationId,
    start: usize,
    end: usize,
    document: DocumentText,
    tool: String,
    #[serde(default)]
    metadata: Map<String, Value>,
    original: OriginalAnchor,
}

impl Annotation {
    /// Create an annotation over `start..end` of `document`.
    ///
    /// The creation-time anchor is captured as `original`.
    pub fn new(
        document: impl Into<DocumentText>,
        start: usize,
        end: usize,
        tool: impl Into<String>,
    ) -> Result<Self> {
        let document = document.into();
        validate_span(&document, start, end)?;

        Ok(Self {
            id: AnnotationId::generate(),
            start,
            end,
            original: OriginalAnchor {
                document: document.clone(),
                start,
                end,
            },
            document,
            tool: tool.into(),
            metadata: Map::new(),
        })
    }

    /// Set the identifier.
    pub fn with_id(mut self, id: impl Into<AnnotationId>) -> Self {
        self.id = id.into();
        self
    }

    /// Set the tool tag.
    pub fn with_tool(mut self, tool: impl Into<String>) -> Self {
        self.tool = tool.into();
        self
    }

    /// Replace the metadata map.
    pub fn with_metadata(mut self, metadata: Map<String, Value>) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn id(&self) -> &AnnotationId {
        &self.id
    }

    pub fn start(&self) -> usize {
        self.start
    }

    pub fn end(&self) -> usize {
        self.end
    }

    pub fn span(&self) -> Range<usize> {
        self.start..self.end
    }

    pub fn document(&self) -> &DocumentText {
        &self.document
    }

    pub fn tool(&self) -> &str {
        &self.tool
    }

    pub fn metadata(&self) -> &Map<String, Value> {
        &self.metadata
    }

    pub fn original(&self) -> &OriginalAnchor {
        &self.original
    }

    /// The text currently covered by the anchor.
    pub fn anchor_text(&self) -> &str {
        &self.document[self.start..self.end]
    }

    /// An empty selection carries no text to relocate.
    pub fn is_degenerate(&self) -> bool {
        self.start == self.end
    }

    /// Whether the anchor needs a retag against `current_text`.
    pub fn is_stale(&self, current_text: &str) -> bool {
        self.is_degenerate() || &*self.document != current_text
    }

    /// Whether the stored anchor is the same as `other`'s: same document
    /// snapshot and same offsets.
    pub fn same_anchor(&self, other: &Annotation) -> bool {
        self.start == other.start && self.end == other.end && self.document == other.document
    }

    /// Return a copy anchored at `start..end` of `document`.
    pub fn with_anchor(
        &self,
        document: impl Into<DocumentText>,
        start: usize,
        end: usize,
    ) -> Result<Self> {
        let document = document.into();
        validate_span(&document, start, end)?;
        Ok(Self {
            start,
            end,
            document,
            ..self.clone()
        })
    }

    /// Return a copy anchored at the creation-time triple.
    pub fn restored_to_original(&self) -> Self {
        Self {
            start: self.original.start,
            end: self.original.end,
            document: self.original.document.clone(),
            ..self.clone()
        }
    }

    /// Return a copy carrying `update`'s tool and metadata while keeping this
    /// record's anchor and creation-time triple.
    pub fn merged_with(&self, update: &Annotation) -> Self {
        Self {
            tool: update.tool.clone(),
            metadata: update.metadata.clone(),
            ..self.clone()
        }
    }

    /// Check both the live and the creation-time anchor.
    ///
    /// Records decoded from storage bypass [`Annotation::new`], so callers
    /// loading persisted data run this before trusting them.
    pub fn validate(&self) -> Result<()> {
        validate_span(&self.document, self.start, self.end)?;
        validate_span(&self.original.document, self.original.start, self.original.end)
    }

    pub(crate) fn shifted(&self, diff: isize, document: &DocumentText) -> Self {
        Self {
            start: self.start.saturating_add_signed(diff),
            end: self.end.saturating_add_signed(diff),
            document: document.clone(),
            ..self.clone()
        }
    }

    pub(crate) fn advanced(&self, document: &DocumentText) -> Self {
        Self {
            document: document.clone(),
            ..self.clone()
        }
    }
}

/// Check that `start..end` is a valid half-open range of `document`.
pub fn validate_span(document: &str, start: usize, end: usize) -> Result<()> {
    if start > end || end > document.len() {
        return Err(AnchorError::OutOfBounds {
            start,
            end,
            len: document.len(),
        });
    }
    for offset in [start, end] {
        if !document.is_char_boundary(offset) {
            return Err(AnchorError::NotCharBoundary(offset));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_new_captures_original() {
        let ann = Annotation::new("hello world", 6, 11, "comment").unwrap();

        assert_eq!(ann.anchor_text(), "world");
        assert_eq!(ann.original().start, 6);
        assert_eq!(ann.original().end, 11);
        assert_eq!(&*ann.original().document, "hello world");
    }

    #[test]
    fn test_new_rejects_bad_spans() {
        assert_eq!(
            Annotation::new("abc", 2, 1, "t").unwrap_err(),
            AnchorError::OutOfBounds {
                start: 2,
                end: 1,
                len: 3
            }
        );
        assert!(Annotation::new("abc", 0, 4, "t").is_err());
        assert_eq!(
            Annotation::new("h★llo", 2, 4, "t").unwrap_err(),
            AnchorError::NotCharBoundary(2)
        );
    }

    #[test]
    fn test_staleness() {
        let ann = Annotation::new("abc", 0, 1, "t").unwrap();
        assert!(!ann.is_stale("abc"));
        assert!(ann.is_stale("abcd"));

        let empty = Annotation::new("abc", 1, 1, "t").unwrap();
        assert!(empty.is_degenerate());
        assert!(empty.is_stale("abc"));
    }

    #[test]
    fn test_with_anchor_keeps_identity() {
        let mut metadata = Map::new();
        metadata.insert("color".to_string(), Value::from("red"));
        let ann = Annotation::new("abc", 0, 1, "t")
            .unwrap()
            .with_metadata(metadata.clone());

        let moved = ann.with_anchor("xxabc", 2, 3).unwrap();
        assert_eq!(moved.id(), ann.id());
        assert_eq!(moved.metadata(), &metadata);
        assert_eq!(moved.original(), ann.original());
        assert_eq!(moved.anchor_text(), "a");

        assert!(ann.with_anchor("x", 0, 2).is_err());
    }

    #[test]
    fn test_wire_shape() {
        let ann = Annotation::new("abc", 1, 2, "color")
            .unwrap()
            .with_id("a-1");
        let json = serde_json::to_value(&ann).unwrap();

        assert_eq!(
            json,
            serde_json::json!({
                "id": "a-1",
                "start": 1,
                "end": 2,
                "document": "abc",
                "tool": "color",
                "metadata": {},
                "original": { "document": "abc", "start": 1, "end": 2 }
            })
        );

        let back: Annotation = serde_json::from_value(json).unwrap();
        assert_eq!(back, ann);
    }
}
