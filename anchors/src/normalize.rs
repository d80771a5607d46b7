//! Whitespace-tolerant span matching.
//!
//! Relocated snippets often come back reindented or rewrapped, so matching is
//! done on a normalized form where every whitespace run is a single space.
//! Results are mapped back to byte offsets in the original text.

use std::ops::Range;

/// A whitespace-collapsed string with a map back to the source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizedText {
    /// The collapsed text.
    pub text: String,

    /// For every byte `i` of `text`, the source offset just past the run that
    /// produced it. Source runs tile the input, so the run behind byte `i`
    /// starts where the previous one ends.
    pub position_map: Vec<usize>,
}

impl NormalizedText {
    /// Source byte range covered by normalized bytes `start..end`.
    ///
    /// Both bounds must be character boundaries of `text` with `start < end`.
    pub fn source_range(&self, start: usize, end: usize) -> Range<usize> {
        let source_start = if start == 0 {
            0
        } else {
            self.position_map[start - 1]
        };
        source_start..self.position_map[end - 1]
    }
}

/// Collapse every run of whitespace in `s` into a single space.
pub fn normalize(s: &str) -> NormalizedText {
    let mut text = String::with_capacity(s.len());
    let mut position_map = Vec::with_capacity(s.len());
    let mut previous_was_whitespace = false;

    for (offset, ch) in s.char_indices() {
        let run_end = offset + ch.len_utf8();
        if ch.is_whitespace() {
            if previous_was_whitespace {
                // Extend the run that produced the last space.
                if let Some(last) = position_map.last_mut() {
                    *last = run_end;
                }
                continue;
            }
            text.push(' ');
            position_map.push(run_end);
            previous_was_whitespace = true;
        } else {
            text.push(ch);
            position_map.extend(std::iter::repeat_n(run_end, ch.len_utf8()));
            previous_was_whitespace = false;
        }
    }

    NormalizedText { text, position_map }
}

/// Find the `occurrence`-th match of `needle` in `haystack`, ignoring
/// whitespace differences, and return its byte range in `haystack`.
///
/// `occurrence` is 1-indexed; 0 is treated as 1. Occurrences may overlap.
/// Returns `None` when there are not enough matches or when the needle is
/// empty after normalization.
pub fn find_span(haystack: &str, needle: &str, occurrence: usize) -> Option<Range<usize>> {
    let haystack = normalize(haystack);
    let needle = normalize(needle).text;
    if needle.is_empty() || haystack.text.is_empty() {
        return None;
    }

    let mut from = 0;
    let mut remaining = occurrence.max(1);
    loop {
        let found = from + haystack.text[from..].find(&needle)?;
        remaining -= 1;
        if remaining == 0 {
            return Some(haystack.source_range(found, found + needle.len()));
        }
        // Step one character so overlapping matches are counted.
        from = found
            + haystack.text[found..]
                .chars()
                .next()
                .map_or(1, char::len_utf8);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_normalize_collapses_runs() {
        let normalized = normalize("a  b\nc");
        assert_eq!(normalized.text, "a b c");
        assert_eq!(normalized.position_map, vec![1, 3, 4, 5, 6]);
    }

    #[test]
    fn test_find_span_across_reformatting() {
        let haystack = "let a;\nfoo b\n   c bar";
        let span = find_span(haystack, "b c", 1).unwrap();
        assert_eq!(&haystack[span], "b\n   c");
    }

    #[test]
    fn test_find_span_exact_text() {
        let haystack = "function sum(a,b){return a+b}";
        assert_eq!(find_span(haystack, "sum", 1), Some(9..12));
    }

    #[test]
    fn test_find_span_selects_occurrence() {
        let haystack = "x = 1; x = 2; x = 3";
        assert_eq!(find_span(haystack, "x", 0), Some(0..1));
        assert_eq!(find_span(haystack, "x", 1), Some(0..1));
        assert_eq!(find_span(haystack, "x", 2), Some(7..8));
        assert_eq!(find_span(haystack, "x", 3), Some(14..15));
        assert_eq!(find_span(haystack, "x", 4), None);
    }

    #[test]
    fn test_find_span_counts_overlapping_matches() {
        assert_eq!(find_span("aaa", "aa", 2), Some(1..3));
    }

    #[test]
    fn test_find_span_edge_whitespace_covers_whole_run() {
        let haystack = "a\n\n  b";
        let span = find_span(haystack, "a ", 1).unwrap();
        assert_eq!(&haystack[span], "a\n\n  ");

        let span = find_span(haystack, " b", 1).unwrap();
        assert_eq!(&haystack[span], "\n\n  b");
    }

    #[test]
    fn test_find_span_multibyte() {
        let haystack = "héllo   wörld";
        let span = find_span(haystack, "llo wö", 1).unwrap();
        assert_eq!(&haystack[span], "llo   wö");
    }

    #[test]
    fn test_find_span_not_found() {
        assert_eq!(find_span("abc", "d", 1), None);
        assert_eq!(find_span("abc", "   ", 1), None);
        assert_eq!(find_span("abc", "", 1), None);
        assert_eq!(find_span("", "a", 1), None);
    }
}
