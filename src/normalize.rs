//! Unicode and whitespace canonicalization.
//!
//! Every offset the chunker reports is a char offset into a
//! [`NormalizedText`], so normalization runs exactly once per document and
//! before any boundary or token math.
//!
//! # Rules
//!
//! 1. `\r\n` and lone `\r` become `\n`.
//! 2. Control characters other than `\n` and `\t` are removed.
//! 3. The text is converted to NFC.
//! 4. Runs of four or more horizontal whitespace characters collapse to three spaces.
//! 5. Trailing horizontal whitespace is removed from every line, and
//!    trailing whitespace from the whole text.
//!
//! The transformation is idempotent and keeps every visible code point,
//! astral-plane emoji included.

use std::fmt;
use std::ops::Deref;

use unicode_normalization::UnicodeNormalization;

/// Longest horizontal whitespace run kept verbatim.
const MAX_WHITESPACE_RUN: usize = 3;

/// Immutable, normalized document text with char-offset slicing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizedText {
    text: String,
    /// Byte offset of every char, plus the total byte length at the end.
    byte_offsets: Vec<usize>,
}

impl NormalizedText {
    /// Length in chars.
    pub fn char_len(&self) -> usize {
        self.byte_offsets.len() - 1
    }

    pub fn as_str(&self) -> &str {
        &self.text
    }

    /// Byte offset of a char offset (clamped to the end of the text).
    pub fn byte_offset(&self, char_offset: usize) -> usize {
        let idx = char_offset.min(self.char_len());
        self.byte_offsets[idx]
    }

    /// Slice by half-open char range.
    pub fn slice(&self, start_char: usize, end_char: usize) -> &str {
        let start = self.byte_offset(start_char);
        let end = self.byte_offset(end_char.max(start_char));
        &self.text[start..end]
    }

    /// Whether the text contains only whitespace (or nothing).
    pub fn is_blank(&self) -> bool {
        self.text.trim().is_empty()
    }

    fn from_normalized(text: String) -> Self {
        let mut byte_offsets: Vec<usize> = text.char_indices().map(|(i, _)| i).collect();
        byte_offsets.push(text.len());
        Self { text, byte_offsets }
    }
}

impl Deref for NormalizedText {
    type Target = str;

    fn deref(&self) -> &str {
        &self.text
    }
}

impl fmt::Display for NormalizedText {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

/// Normalize raw document text. Never fails.
pub fn normalize(text: &str) -> NormalizedText {
    let unified = text.replace("\r\n", "\n").replace('\r', "\n");
    let stripped: String = unified
        .chars()
        .filter(|&c| c == '\n' || c == '\t' || !c.is_control())
        .collect();
    let composed: String = stripped.nfc().collect();
    let collapsed = collapse_whitespace_runs(&composed);
    let trimmed = trim_line_ends(&collapsed);
    NormalizedText::from_normalized(trimmed.trim_end().to_string())
}

/// Horizontal whitespace: anything `char::is_whitespace` except newline.
pub(crate) fn is_horizontal_space(c: char) -> bool {
    c != '\n' && c.is_whitespace()
}

fn collapse_whitespace_runs(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut run = String::new();
    let mut run_len = 0usize;

    let flush = |out: &mut String, run: &mut String, run_len: &mut usize| {
        if *run_len > MAX_WHITESPACE_RUN {
            out.push_str(&" ".repeat(MAX_WHITESPACE_RUN));
        } else {
            out.push_str(run);
        }
        run.clear();
        *run_len = 0;
    };

    for c in text.chars() {
        if is_horizontal_space(c) {
            run.push(c);
            run_len += 1;
        } else {
            flush(&mut out, &mut run, &mut run_len);
            out.push(c);
        }
    }
    flush(&mut out, &mut run, &mut run_len);
    out
}

fn trim_line_ends(text: &str) -> String {
    text.split('\n')
        .map(|line| line.trim_end_matches(is_horizontal_space))
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_newlines_unified() {
        assert_eq!(normalize("a\r\nb\rc").as_str(), "a\nb\nc");
    }

    #[test]
    fn test_control_chars_stripped() {
        assert_eq!(normalize("a\u{0007}b\u{0000}\tc\nd").as_str(), "ab\tc\nd");
    }

    #[test]
    fn test_nfc_composition() {
        let decomposed = "e\u{0301}te\u{0301}";
        let composed = "\u{00e9}t\u{00e9}";
        assert_eq!(normalize(decomposed).as_str(), composed);
        assert_eq!(normalize(composed).as_str(), composed);
    }

    #[test]
    fn test_whitespace_runs_collapsed() {
        assert_eq!(normalize("a        b").as_str(), "a   b");
        assert_eq!(normalize("a   b").as_str(), "a   b");
        assert_eq!(normalize("a \t \t b").as_str(), "a   b");
        assert_eq!(normalize("a  b").as_str(), "a  b");
    }

    #[test]
    fn test_trailing_whitespace_trimmed() {
        assert_eq!(normalize("line one   \nline two\t\n\n  ").as_str(), "line one\nline two");
    }

    #[test]
    fn test_emoji_preserved() {
        let text = "rocket \u{1F680} and family \u{1F468}\u{200D}\u{1F469}";
        let n = normalize(text);
        assert!(n.contains('\u{1F680}'));
        assert!(n.contains('\u{1F469}'));
        assert_eq!(n.char_len(), n.chars().count());
    }

    #[test]
    fn test_char_slicing() {
        let n = normalize("你好 world");
        assert_eq!(n.char_len(), 8);
        assert_eq!(n.slice(0, 2), "你好");
        assert_eq!(n.slice(3, 8), "world");
        assert_eq!(n.slice(3, 100), "world");
    }

    #[test]
    fn test_blank() {
        assert!(normalize("   \n\t").is_blank());
        assert_eq!(normalize("   \n\t").char_len(), 0);
        assert!(!normalize("x").is_blank());
    }

    proptest! {
        #[test]
        fn prop_idempotent(s in "\\PC{0,80}|[ \\t\\r\\n a-z\u{0301}\u{00e9}]{0,60}") {
            let once = normalize(&s);
            let twice = normalize(once.as_str());
            prop_assert_eq!(once.as_str(), twice.as_str());
        }
    }
}
