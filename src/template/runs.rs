//! Placeholder resolution across fragmented runs
//!
//! Word splits text into runs at arbitrary points (spell check, revision
//! marks, formatting), so a `{{name}}` token can span several `w:t`
//! fragments. Matching runs on the paragraph's logical text; results are
//! projected back onto the fragments.

use std::ops::Range;
use std::sync::LazyLock;

use regex::Regex;

/// `{{name}}`, or `{{#BLOCK:NAME}}` for a multi-line text block.
static PLACEHOLDER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{\{\s*((?:#BLOCK:)?[A-Za-z0-9_]+)\s*\}\}").unwrap());

/// A `{{name}}` occurrence in a paragraph's logical text.
#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    /// Byte span of the whole token, braces included
    pub span: Range<usize>,
    pub name: String,
}

/// Leftmost, non-overlapping placeholder tokens in `text`.
pub fn tokens(text: &str) -> Vec<Token> {
    PLACEHOLDER_RE
        .captures_iter(text)
        .filter_map(|c| {
            let whole = c.get(0)?;
            Some(Token { span: whole.range(), name: c[1].to_string() })
        })
        .collect()
}

/// Names only, in order of appearance (duplicates kept).
pub fn token_names(text: &str) -> impl Iterator<Item = &str> {
    PLACEHOLDER_RE.captures_iter(text).filter_map(|c| c.get(1).map(|m| m.as_str()))
}

/// Apply replacements to fragment texts.
///
/// `fragments` are the texts whose concatenation is the logical text;
/// `replacements` are non-overlapping `(span, value)` pairs sorted by span.
/// The fragment holding the first byte of a span keeps its prefix and gets
/// the value, fragments wholly inside the span are emptied, and the fragment
/// that extends past the span keeps its suffix.
pub fn project(fragments: &[&str], replacements: &[(Range<usize>, &str)]) -> Vec<String> {
    let mut out = Vec::with_capacity(fragments.len());
    let mut frag_start = 0usize;

    for frag in fragments {
        let frag_end = frag_start + frag.len();
        let mut text = String::with_capacity(frag.len());
        let mut pos = frag_start;

        for (span, value) in replacements {
            if span.end <= frag_start || span.start >= frag_end {
                continue;
            }
            if span.start > pos {
                text.push_str(&frag[pos - frag_start..span.start - frag_start]);
            }
            if span.start >= frag_start {
                text.push_str(value);
            }
            pos = pos.max(span.end.min(frag_end));
        }
        if pos < frag_end {
            text.push_str(&frag[pos - frag_start..]);
        }

        out.push(text);
        frag_start = frag_end;
    }
    out
}
