//! Structural cut-point detection over normalized text.
//!
//! Produces char offsets where a chunk may end:
//!
//! - **Paragraph**: the start of a blank-line run, and the start of any line
//!   opening a Markdown heading, list item or block quote.
//! - **Sentence**: just after `.`, `!`, `?` (followed by whitespace or end
//!   of text) and after `。`, `！`, `？`, including closing quotes that
//!   follow the terminator. Known abbreviations, single-letter initials and
//!   punctuation inside an open quotation are not sentence ends.
//!
//! Both lists always contain the text length. [`pick_boundary`] then
//! selects one candidate inside a window; callers hard-cut when it
//! returns `None`.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::normalize::is_horizontal_space;

/// Lowercased words that end with a period without ending a sentence.
const ABBREVIATIONS: &[&str] = &[
    "mr", "mrs", "ms", "dr", "prof", "sr", "jr", "st", "vs", "etc", "e.g", "i.e", "cf", "al",
    "fig", "no", "vol", "approx", "inc", "ltd", "co", "jan", "feb", "mar", "apr", "jun", "jul",
    "aug", "sep", "sept", "oct", "nov", "dec",
];

/// Priority class of a cut point; paragraph beats sentence beats none.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BoundaryKind {
    None,
    Sentence,
    Paragraph,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BoundaryOffset {
    pub offset: usize,
    pub kind: BoundaryKind,
}

/// Paragraph cut points as sorted, unique char offsets, ending with `len`.
pub fn paragraph_boundaries(text: &str) -> Vec<usize> {
    let chars: Vec<char> = text.chars().collect();
    let mut out = Vec::new();

    let mut i = 0;
    while i < chars.len() {
        if chars[i] == '\n' {
            let run_start = i;
            let mut j = i;
            while j < chars.len() && (chars[j] == '\n' || is_horizontal_space(chars[j])) {
                j += 1;
            }
            let newlines = chars[run_start..j].iter().filter(|&&c| c == '\n').count();
            if newlines >= 2 {
                out.push(run_start);
            }
            // Structural line starts right after any newline.
            let line_start = run_start + 1;
            if line_start < chars.len() && is_structural_line_start(&chars[line_start..]) {
                out.push(line_start);
            }
            i = run_start + 1;
        } else {
            i += 1;
        }
    }

    out.push(chars.len());
    out.sort_unstable();
    out.dedup();
    out
}

/// Sentence cut points as sorted, unique char offsets, ending with `len`.
pub fn sentence_boundaries(text: &str) -> Vec<usize> {
    let chars: Vec<char> = text.chars().collect();
    let mut out = Vec::new();
    let mut in_ascii_quote = false;
    let mut open_quotes = 0usize;

    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        match c {
            // A '"' with no partner before the paragraph ends is an inch or
            // ditto mark, not an opening quote.
            '"' if in_ascii_quote => in_ascii_quote = false,
            '"' => in_ascii_quote = ascii_quote_closes(&chars[i + 1..]),
            '\n' if is_blank_line_break(&chars[i..]) => {
                in_ascii_quote = false;
                open_quotes = 0;
            }
            '\u{201C}' | '\u{300C}' | '\u{300E}' | '\u{00AB}' => open_quotes += 1,
            '\u{201D}' | '\u{300D}' | '\u{300F}' | '\u{00BB}' => {
                open_quotes = open_quotes.saturating_sub(1)
            }
            _ => {}
        }

        let cjk = is_cjk_terminator(c);
        if !cjk && !is_latin_terminator(c) {
            i += 1;
            continue;
        }

        let term_start = i;
        let mut j = i;
        while j < chars.len() && (is_latin_terminator(chars[j]) || is_cjk_terminator(chars[j])) {
            j += 1;
        }
        let run_is_cjk = chars[term_start..j].iter().any(|&c| is_cjk_terminator(c));

        // Closing quotes and brackets belong to the sentence they end.
        let mut end = j;
        let mut quote_closed = false;
        while end < chars.len() && is_closing_mark(chars[end]) {
            if chars[end] == '"' {
                in_ascii_quote = false;
            } else if matches!(chars[end], '\u{201D}' | '\u{300D}' | '\u{300F}' | '\u{00BB}') {
                open_quotes = open_quotes.saturating_sub(1);
            }
            quote_closed = true;
            end += 1;
        }

        let followed_ok = end >= chars.len() || chars[end].is_whitespace() || run_is_cjk;
        let inside_quote = (in_ascii_quote || open_quotes > 0) && !quote_closed;
        let abbreviation = !run_is_cjk
            && j - term_start == 1
            && chars[term_start] == '.'
            && is_abbreviation(&chars[..term_start]);

        if followed_ok && !inside_quote && !abbreviation {
            out.push(end);
        }
        i = end.max(term_start + 1);
    }

    out.push(chars.len());
    out.sort_unstable();
    out.dedup();
    out
}

/// True when a closing '"' follows before the next blank line.
fn ascii_quote_closes(rest: &[char]) -> bool {
    for (k, &c) in rest.iter().enumerate() {
        match c {
            '"' => return true,
            '\n' if is_blank_line_break(&rest[k..]) => return false,
            _ => {}
        }
    }
    false
}

/// `chars` starts with a newline followed by a whitespace-only line.
fn is_blank_line_break(chars: &[char]) -> bool {
    chars
        .iter()
        .skip(1)
        .find(|c| !matches!(c, ' ' | '\t' | '\r'))
        .is_some_and(|&c| c == '\n')
}

/// All cut points tagged with their priority class.
///
/// An offset that is both a paragraph and a sentence boundary is reported
/// once, as a paragraph boundary.
pub fn boundaries(text: &str) -> Vec<BoundaryOffset> {
    let mut merged: BTreeMap<usize, BoundaryKind> = BTreeMap::new();
    for offset in sentence_boundaries(text) {
        merged.insert(offset, BoundaryKind::Sentence);
    }
    for offset in paragraph_boundaries(text) {
        merged.insert(offset, BoundaryKind::Paragraph);
    }
    merged
        .into_iter()
        .map(|(offset, kind)| BoundaryOffset { offset, kind })
        .collect()
}

/// Choose the candidate closest to `preferred_end` within
/// `[start + min_size, max_end]`.
///
/// `candidates` must be sorted ascending. Ties go to the later candidate.
/// Returns `None` when no candidate falls in the window, which tells the
/// caller to cut exactly at `max_end`.
pub fn pick_boundary(
    candidates: &[usize],
    start: usize,
    preferred_end: usize,
    max_end: usize,
    min_size: usize,
) -> Option<usize> {
    let lo = start + min_size.max(1);
    if lo > max_end {
        return None;
    }
    let left = candidates.partition_point(|&c| c < lo);
    let right = candidates.partition_point(|&c| c <= max_end);
    if left >= right {
        return None;
    }

    let window = &candidates[left..right];
    let split = window.partition_point(|&c| c < preferred_end);
    let after = window.get(split).copied();
    let before = split.checked_sub(1).map(|i| window[i]);

    match (before, after) {
        (Some(b), Some(a)) => {
            if preferred_end - b < a - preferred_end {
                Some(b)
            } else {
                Some(a)
            }
        }
        (Some(b), None) => Some(b),
        (None, Some(a)) => Some(a),
        (None, None) => None,
    }
}

fn is_latin_terminator(c: char) -> bool {
    matches!(c, '.' | '!' | '?')
}

fn is_cjk_terminator(c: char) -> bool {
    matches!(c, '。' | '！' | '？')
}

fn is_closing_mark(c: char) -> bool {
    matches!(
        c,
        '"' | '\'' | ')' | ']' | '\u{2019}' | '\u{201D}' | '\u{300D}' | '\u{300F}' | '\u{00BB}' | '）'
    )
}

/// Whether the word ending right before a period is a known abbreviation
/// or a single-letter initial.
fn is_abbreviation(before: &[char]) -> bool {
    let word_start = before
        .iter()
        .rposition(|c| c.is_whitespace() || matches!(c, '(' | '"' | '['))
        .map(|p| p + 1)
        .unwrap_or(0);
    let word: String = before[word_start..].iter().collect();
    if word.is_empty() {
        return false;
    }
    let letters: Vec<char> = word.chars().filter(|c| c.is_alphabetic()).collect();
    if letters.len() == 1 && word.chars().count() == 1 && letters[0].is_uppercase() {
        return true;
    }
    let lower = word.to_lowercase();
    ABBREVIATIONS.contains(&lower.as_str())
}

/// Markdown heading (`# `..`###### `), list item (`- `, `* `, `+ `, `1. `,
/// `1) `) or block quote (`>`), after optional indentation.
fn is_structural_line_start(line: &[char]) -> bool {
    let indent = line.iter().take_while(|&&c| c == ' ' || c == '\t').count();
    let rest = &line[indent..];
    let Some(&first) = rest.first() else {
        return false;
    };

    match first {
        '#' => {
            let hashes = rest.iter().take_while(|&&c| c == '#').count();
            hashes <= 6 && rest.get(hashes).is_some_and(|&c| c == ' ')
        }
        '>' => true,
        '-' | '*' | '+' => rest.get(1).is_some_and(|&c| c == ' '),
        d if d.is_ascii_digit() => {
            let digits = rest.iter().take_while(|c| c.is_ascii_digit()).count();
            digits <= 9
                && rest.get(digits).is_some_and(|&c| c == '.' || c == ')')
                && rest.get(digits + 1).is_some_and(|&c| c == ' ')
        }
        _ => false,
    }
}
