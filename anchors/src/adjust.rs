//! Incremental offset adjustment.
//!
//! Edits that leave an annotation's text alone only move its offsets, which
//! is cheap to compute. Edits that touch the annotated text are not guessed
//! at: the annotation keeps its old snapshot and becomes stale, to be
//! relocated by a retag later.

use std::ops::Range;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::annotation::{Annotation, DocumentText};

/// A single text replacement reported by the document host.
///
/// `range_start` and `range_old_length` are byte offsets into the text as it
/// was before this edit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Edit {
    pub range_start: usize,
    pub range_old_length: usize,
    pub new_text: String,
}

impl Edit {
    /// Insert `text` at `at`.
    pub fn insert(at: usize, text: impl Into<String>) -> Self {
        Self {
            range_start: at,
            range_old_length: 0,
            new_text: text.into(),
        }
    }

    /// Delete `range`.
    pub fn delete(range: Range<usize>) -> Self {
        Self::replace(range, "")
    }

    /// Replace `range` with `text`.
    pub fn replace(range: Range<usize>, text: impl Into<String>) -> Self {
        Self {
            range_start: range.start,
            range_old_length: range.end.saturating_sub(range.start),
            new_text: text.into(),
        }
    }

    /// The replaced range, clamped to `text` and widened to character
    /// boundaries. Hosts should never send anything else, but a bad range
    /// must not take the tracker down.
    pub fn clamped_range(&self, text: &str) -> Range<usize> {
        let start = floor_char_boundary(text, self.range_start.min(text.len()));
        let end = self
            .range_start
            .saturating_add(self.range_old_length)
            .clamp(start, text.len());
        start..ceil_char_boundary(text, end)
    }

    /// Apply the edit to `text`.
    pub fn apply(&self, text: &str) -> String {
        let range = self.clamped_range(text);
        let mut out = String::with_capacity(text.len() - range.len() + self.new_text.len());
        out.push_str(&text[..range.start]);
        out.push_str(&self.new_text);
        out.push_str(&text[range.end..]);
        out
    }
}

/// Where an annotation sits relative to an edit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EditPlacement {
    /// Ends at or before the edit.
    Before,
    /// Starts at or after the edit.
    After,
    /// Shares text with the edit.
    Overlapping,
}

/// Classify `span` against the replaced range `edit`.
pub fn placement(span: &Range<usize>, edit: &Range<usize>) -> EditPlacement {
    if span.end <= edit.start {
        EditPlacement::Before
    } else if span.start >= edit.end {
        EditPlacement::After
    } else {
        EditPlacement::Overlapping
    }
}

/// Result of running a batch of edits over an annotation list.
#[derive(Debug, Clone)]
pub struct Adjustment {
    /// Text after every edit.
    pub text: DocumentText,

    /// Annotations in their original order.
    pub annotations: Vec<Annotation>,

    /// Number of times an annotation's offsets moved.
    pub shifted: usize,

    /// Number of annotations left stale by an overlapping edit.
    pub invalidated: usize,

    touched: bool,
}

impl Adjustment {
    /// Whether any annotation record was replaced.
    pub fn changed(&self) -> bool {
        self.touched
    }
}

/// Apply `edits` in order to `previous`, carrying `annotations` along.
///
/// Each edit is interpreted against the text produced by the edits before
/// it. Only annotations whose snapshot equals the text at the moment of an
/// edit take part in it; already stale annotations are left untouched.
pub fn adjust(previous: &DocumentText, edits: &[Edit], annotations: &[Annotation]) -> Adjustment {
    let mut text = previous.clone();
    let mut annotations = annotations.to_vec();
    let mut shifted = 0;
    let mut invalidated = 0;
    let mut touched = false;

    for edit in edits {
        let range = edit.clamped_range(&text);
        let diff = edit.new_text.len() as isize - range.len() as isize;
        let next: DocumentText = Arc::from(edit.apply(&text));

        for annotation in &mut annotations {
            if !in_sync(annotation.document(), &text) {
                continue;
            }
            *annotation = match placement(&annotation.span(), &range) {
                EditPlacement::Before => annotation.advanced(&next),
                EditPlacement::After => {
                    if diff != 0 {
                        shifted += 1;
                    }
                    annotation.shifted(diff, &next)
                }
                EditPlacement::Overlapping => {
                    debug!(
                        "Edit at {}..{} overlaps annotation {}, leaving it stale",
                        range.start,
                        range.end,
                        annotation.id()
                    );
                    invalidated += 1;
                    continue;
                }
            };
            touched = true;
        }

        text = next;
    }

    Adjustment {
        text,
        annotations,
        shifted,
        invalidated,
        touched,
    }
}

fn in_sync(document: &DocumentText, text: &DocumentText) -> bool {
    Arc::ptr_eq(document, text) || **document == **text
}

fn floor_char_boundary(text: &str, mut index: usize) -> usize {
    while !text.is_char_boundary(index) {
        index -= 1;
    }
    index
}

fn ceil_char_boundary(text: &str, mut index: usize) -> usize {
    while !text.is_char_boundary(index) {
        index += 1;
    }
    index
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn doc(text: &str) -> DocumentText {
        Arc::from(text)
    }

    #[test]
    fn test_annotation_after_insert_is_shifted() {
        let previous = doc("abcdef");
        let ann = Annotation::new(previous.clone(), 4, 6, "t").unwrap();

        let out = adjust(&previous, &[Edit::insert(2, "XY")], &[ann]);

        assert_eq!(&*out.text, "abXYcdef");
        assert_eq!(out.annotations[0].span(), 6..8);
        assert_eq!(&**out.annotations[0].document(), "abXYcdef");
        assert_eq!(out.annotations[0].anchor_text(), "ef");
        assert_eq!(out.shifted, 1);
        assert!(out.changed());
    }

    #[test]
    fn test_annotation_before_edit_keeps_offsets() {
        let previous = doc("abcdef");
        let ann = Annotation::new(previous.clone(), 0, 2, "t").unwrap();

        let out = adjust(&previous, &[Edit::replace(3..5, "ZZZ")], &[ann]);

        assert_eq!(out.annotations[0].span(), 0..2);
        assert_eq!(&**out.annotations[0].document(), "abcZZZf");
    }

    #[test]
    fn test_overlapping_edit_leaves_annotation_stale() {
        let previous = doc("abcdef");
        let ann = Annotation::new(previous.clone(), 1, 5, "t").unwrap();

        let out = adjust(&previous, &[Edit::replace(3..4, "")], &[ann.clone()]);

        assert_eq!(&*out.text, "abcef");
        assert_eq!(out.annotations[0], ann);
        assert!(out.annotations[0].is_stale(&out.text));
        assert_eq!(out.invalidated, 1);
        assert!(!out.changed());
    }

    #[test]
    fn test_edits_compose_in_order() {
        let previous = doc("one two three");
        let ann = Annotation::new(previous.clone(), 8, 13, "t").unwrap();

        let edits = [Edit::insert(0, ">> "), Edit::delete(3..7), Edit::insert(4, "2")];
        let out = adjust(&previous, &edits, &[ann]);

        assert_eq!(&*out.text, ">> t2wo three");
        assert_eq!(out.annotations[0].anchor_text(), "three");
        assert_eq!(out.annotations[0].span(), 8..13);
        assert_eq!(out.shifted, 3);
    }

    #[test]
    fn test_stale_annotation_is_not_touched() {
        let previous = doc("abc");
        let stale = Annotation::new("something else", 0, 4, "t").unwrap();

        let out = adjust(&previous, &[Edit::insert(0, "x")], &[stale.clone()]);

        assert_eq!(out.annotations[0], stale);
    }

    #[test]
    fn test_insert_at_boundaries() {
        let previous = doc("abcdef");
        let ann = Annotation::new(previous.clone(), 2, 4, "t").unwrap();

        let at_start = adjust(&previous, &[Edit::insert(2, "_")], &[ann.clone()]);
        assert_eq!(at_start.annotations[0].anchor_text(), "cd");
        assert_eq!(at_start.annotations[0].span(), 3..5);

        let at_end = adjust(&previous, &[Edit::insert(4, "_")], &[ann]);
        assert_eq!(at_end.annotations[0].anchor_text(), "cd");
        assert_eq!(at_end.annotations[0].span(), 2..4);
    }

    #[test]
    fn test_malformed_range_is_clamped() {
        let previous = doc("abc");
        let ann = Annotation::new(previous.clone(), 0, 1, "t").unwrap();

        let out = adjust(
            &previous,
            &[Edit {
                range_start: 10,
                range_old_length: 5,
                new_text: "!".to_string(),
            }],
            &[ann],
        );

        assert_eq!(&*out.text, "abc!");
        assert_eq!(out.annotations[0].span(), 0..1);
    }

    #[test]
    fn test_range_widened_to_char_boundaries() {
        let edit = Edit::replace(2..3, "o");
        assert_eq!(edit.clamped_range("h★llo"), 1..4);
        assert_eq!(edit.apply("h★llo"), "hollo");
    }

    #[test]
    fn test_edit_wire_shape() {
        let edit: Edit = serde_json::from_str(
            r#"{"rangeStart": 3, "rangeOldLength": 1, "newText": "x"}"#,
        )
        .unwrap();
        assert_eq!(edit, Edit::replace(3..4, "x"));
    }
}
