//! Relocation request text.

use tether_anchors::DelimitedSnippet;

/// Prefix every line of `text` with its 1-indexed number and a colon.
///
/// Lines are split on `'\n'` only, so a trailing newline yields a final
/// empty line just like [`crate::locate::LineIndex`] counts it.
pub fn number_lines(text: &str) -> String {
    text.split('\n')
        .enumerate()
        .map(|(i, line)| format!("{}:{line}", i + 1))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Build the request asking a model where the delimited segment of the
/// previous snapshot ended up in `current`.
///
/// The answer is a JSON object keyed `"1"` to `"4"`: relocated text, start
/// line, end line and the occurrence of that text within those lines.
pub fn build_prompt(snippet: &DelimitedSnippet, current: &str) -> String {
    let delimiter = snippet.delimiter();
    let previous = number_lines(snippet.text());
    let segment = snippet.anchor_text();
    let updated = number_lines(current);

    format!(
        r#"Here is a file, with each line prefixed by its line number:

<PREVIOUS>
{previous}
</PREVIOUS>

A segment of this file is enclosed in a pair of "{delimiter}" characters. The segment is exactly the text between the two "{delimiter}" marks:

<SEGMENT>
{segment}
</SEGMENT>

The file has since been edited. Here is the edited version, again with line numbers:

<UPDATED>
{updated}
</UPDATED>

The segment carries attached notes, so it must be placed on the matching text in UPDATED as precisely as possible. The segment may be unchanged, moved, or rewritten; when it was rewritten it may have grown or shrunk. Consider where it could now be, choose the best match, and include nothing beyond the segment itself.

Answer with a JSON object holding these numbered fields:

1) The full text of the segment as it appears in UPDATED.
2) The line number in UPDATED on which (1) starts.
3) The line number in UPDATED on which (1) ends.
4) (1) may appear more than once between lines (2) and (3). Which appearance is it, as a 1-indexed number?

The object must look like: {{"1": <text>, "2": <number>, "3": <number>, "4": <number>}}

Field 1 holds the code text only, with no markdown and no commentary."#
    )
}
