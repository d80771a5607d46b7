//! Turning a line-based relocation answer into byte offsets.

use std::ops::Range;

use tether_anchors::find_span;
use tracing::debug;

use crate::error::{RetagError, Result};
use crate::response::RelocationAnswer;

/// Byte offsets of the lines of a text, split on `'\n'`.
///
/// A text always has at least one line, and a trailing newline starts an
/// extra empty one.
#[derive(Debug, Clone)]
pub struct LineIndex {
    starts: Vec<usize>,
    len: usize,
}

impl LineIndex {
    pub fn new(text: &str) -> Self {
        let starts = std::iter::once(0)
            .chain(text.match_indices('\n').map(|(i, _)| i + 1))
            .collect();
        Self {
            starts,
            len: text.len(),
        }
    }

    pub fn line_count(&self) -> usize {
        self.starts.len()
    }

    /// Byte range covering the 1-indexed inclusive lines
    /// `start_line..=end_line`, without the newline that ends the last one.
    ///
    /// Line numbers are clamped to the text.
    pub fn range(&self, start_line: usize, end_line: usize) -> Range<usize> {
        let last = self.line_count();
        let start_line = start_line.clamp(1, last);
        let end_line = end_line.clamp(start_line, last);

        let start = self.starts[start_line - 1];
        let end = if end_line < last {
            self.starts[end_line] - 1
        } else {
            self.len
        };
        start..end
    }
}

/// Find the answered text in `current`, searching the answered lines first
/// and then once more with one extra line on each side.
pub fn locate(current: &str, answer: &RelocationAnswer) -> Result<Range<usize>> {
    let lines = LineIndex::new(current);

    if let Some(span) = search(current, &lines, answer, answer.start_line, answer.end_line) {
        return Ok(span);
    }

    let start_line = answer.start_line.saturating_sub(1).max(1);
    let end_line = (answer.end_line + 1).min(lines.line_count());
    debug!(
        "Snippet not found in lines {}-{}, widening to {start_line}-{end_line}",
        answer.start_line, answer.end_line
    );

    search(current, &lines, answer, start_line, end_line).ok_or_else(|| {
        RetagError::SnippetMatching {
            text: answer.text.clone(),
            start_line,
            end_line,
        }
    })
}

fn search(
    current: &str,
    lines: &LineIndex,
    answer: &RelocationAnswer,
    start_line: usize,
    end_line: usize,
) -> Option<Range<usize>> {
    let section = lines.range(start_line, end_line);
    let offset = section.start;
    find_span(&current[section], &answer.text, answer.occurrence)
        .map(|found| found.start + offset..found.end + offset)
}

/// Check that `span` is a non-empty range of a text `len` bytes long.
pub fn check_span(span: &Range<usize>, len: usize) -> Result<()> {
    if span.start >= span.end || span.end > len {
        return Err(RetagError::InvalidPosition {
            start: span.start,
            end: span.end,
            len,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn answer(text: &str, start_line: usize, end_line: usize, occurrence: usize) -> RelocationAnswer {
        RelocationAnswer {
            text: text.to_string(),
            start_line,
            end_line,
            occurrence,
        }
    }

    #[test]
    fn test_line_index() {
        let lines = LineIndex::new("ab\ncd\n");
        assert_eq!(lines.line_count(), 3);
        assert_eq!(lines.range(1, 1), 0..2);
        assert_eq!(lines.range(2, 3), 3..6);
        assert_eq!(lines.range(3, 3), 6..6);
        assert_eq!(lines.range(1, 9), 0..6);

        assert_eq!(LineIndex::new("").line_count(), 1);
    }

    #[test]
    fn test_locate_within_lines() {
        let current = "let a = 1;\nlet b = 2;\nlet a = 1;";
        assert_eq!(locate(current, &answer("let a = 1;", 3, 3, 1)).unwrap(), 22..32);
        assert_eq!(locate(current, &answer("let a = 1;", 1, 3, 2)).unwrap(), 22..32);
    }

    #[test]
    fn test_locate_widens_once() {
        let current = "one\ntwo\nthree\nfour";
        assert_eq!(locate(current, &answer("three", 2, 2, 1)).unwrap(), 8..13);
        assert_eq!(locate(current, &answer("one", 2, 2, 1)).unwrap(), 0..3);

        assert_eq!(
            locate(current, &answer("four", 1, 2, 1)).unwrap_err(),
            RetagError::SnippetMatching {
                text: "four".to_string(),
                start_line: 1,
                end_line: 3,
            }
        );
    }

    #[test]
    fn test_locate_tolerates_whitespace() {
        let current = "fn f() {\n    a +\n        b\n}";
        let span = locate(current, &answer("a + b", 2, 3, 1)).unwrap();
        assert_eq!(&current[span], "a +\n        b");
    }

    #[test]
    fn test_check_span() {
        assert!(check_span(&(0..1), 1).is_ok());
        assert_eq!(
            check_span(&(2..2), 5).unwrap_err(),
            RetagError::InvalidPosition {
                start: 2,
                end: 2,
                len: 5
            }
        );
        assert!(check_span(&(1..6), 5).is_err());
    }
}
