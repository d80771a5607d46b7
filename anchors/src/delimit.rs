//! Delimited snippets used to describe an anchor in a relocation request.

use crate::annotation::validate_span;
use crate::error::Result;

/// Sentinel used unless the document already contains it.
pub const DEFAULT_DELIMITER: char = '★';

/// Alternatives tried in order when the default delimiter occurs in the text.
const FALLBACK_DELIMITERS: [char; 6] = ['☆', '◆', '◇', '¤', '§', '¶'];

/// First of `preferred` and the built-in alternatives that occurs in none of
/// `texts`.
pub fn free_delimiter(preferred: char, texts: &[&str]) -> Option<char> {
    std::iter::once(preferred)
        .chain(FALLBACK_DELIMITERS)
        .find(|candidate| texts.iter().all(|text| !text.contains(*candidate)))
}

/// Document text with an anchor span wrapped in a sentinel character.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DelimitedSnippet {
    text: String,
    delimiter: char,
}

impl DelimitedSnippet {
    /// Wrap `start..end` of `document` with `delimiter`.
    pub fn new(document: &str, start: usize, end: usize, delimiter: char) -> Result<Self> {
        validate_span(document, start, end)?;

        let mut text = String::with_capacity(document.len() + 2 * delimiter.len_utf8());
        text.push_str(&document[..start]);
        text.push(delimiter);
        text.push_str(&document[start..end]);
        text.push(delimiter);
        text.push_str(&document[end..]);

        Ok(Self { text, delimiter })
    }

    /// The full delimited text.
    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn delimiter(&self) -> char {
        self.delimiter
    }

    /// Text strictly between the first and the last delimiter.
    pub fn anchor_text(&self) -> &str {
        let (Some(first), Some(last)) =
            (self.text.find(self.delimiter), self.text.rfind(self.delimiter))
        else {
            return "";
        };
        let from = first + self.delimiter.len_utf8();
        if last < from { "" } else { &self.text[from..last] }
    }

    /// The text with every delimiter removed.
    pub fn stripped(&self) -> String {
        self.text.replace(self.delimiter, "")
    }
}
