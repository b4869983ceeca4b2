//! Tokenizer adapter abstraction and implementations.
//!
//! Defines the [`TokenizerAdapter`] trait and the closed set of concrete
//! adapters behind [`Adapter`]:
//! - **[`HeuristicTokenizer`]**: character-ratio approximation; always available, `is_exact = false`.
//! - **[`TiktokenAdapter`]**: exact BPE counting via `tiktoken-rs` (feature `tiktoken`).
//! - **[`HuggingFaceAdapter`]**: exact subword counting from a `tokenizer.json` via `tokenizers` (feature `huggingface`).
//!
//! Adapters are constructed by name through the
//! [`TokenizerRegistry`](crate::registry::TokenizerRegistry), which owns the
//! fallback chain. When a backend feature is disabled, its constructor
//! returns [`TokenizerError::DependencyMissing`] and the registry moves on.
//!
//! # Token spans
//!
//! Besides counting, every adapter maps text to token spans (half-open
//! char ranges). The chunker walks these spans to place cut points. The
//! default mapping is [`word_spans`]: one span per word run, CJK character
//! and punctuation mark.

mod heuristic;
mod huggingface;
mod tiktoken;

use std::collections::HashMap;
use std::sync::Arc;

pub use heuristic::{HeuristicTokenizer, DEFAULT_CHARS_PER_TOKEN};
pub use huggingface::HuggingFaceAdapter;
pub use tiktoken::TiktokenAdapter;

use crate::error::Result;
use crate::models::TokenCount;

/// Half-open char range `(start, end)` covered by one token.
pub type TokenSpan = (usize, usize);

pub const HEURISTIC: &str = "heuristic";
pub const TIKTOKEN: &str = "tiktoken";
pub const HUGGINGFACE: &str = "huggingface";

/// Context window used when a model is unknown.
pub const DEFAULT_MAX_TOKENS: usize = 8192;

/// Known embedding model context sizes.
const MODEL_MAX_TOKENS: &[(&str, usize)] = &[
    ("text-embedding-ada-002", 8192),
    ("text-embedding-3-small", 8192),
    ("text-embedding-3-large", 8192),
    ("sentence-transformers/all-MiniLM-L6-v2", 256),
    ("all-minilm-l6-v2", 256),
    ("sentence-transformers/all-mpnet-base-v2", 384),
    ("bert-base-uncased", 512),
    ("BAAI/bge-small-en-v1.5", 512),
    ("BAAI/bge-base-en-v1.5", 512),
];

/// Resolve the max token budget for a model.
///
/// An entry in `overrides` wins, then the built-in table, then `default`.
pub fn resolve_model_max_tokens(
    model_name: &str,
    overrides: Option<&HashMap<String, usize>>,
    default: usize,
) -> usize {
    if let Some(v) = overrides.and_then(|o| o.get(model_name)) {
        return *v;
    }
    MODEL_MAX_TOKENS
        .iter()
        .find(|(name, _)| *name == model_name)
        .map(|(_, n)| *n)
        .unwrap_or(default)
}

/// Interface every tokenizer backend implements.
///
/// Implementations must be safe for concurrent `count_tokens` calls once
/// constructed.
pub trait TokenizerAdapter: Send + Sync {
    /// Adapter family name (`"heuristic"`, `"tiktoken"`, ...).
    fn adapter_id(&self) -> &str;
    fn model_name(&self) -> &str;
    fn count_tokens(&self, text: &str) -> Result<TokenCount>;
    /// Max token budget of the underlying model.
    fn max_tokens(&self) -> usize;
    /// Full identity of the counting configuration, e.g. `tiktoken:gpt-4`.
    fn tokenizer_id(&self) -> String {
        format!("{}:{}", self.adapter_id(), self.model_name())
    }
    /// Token spans over `text` in char offsets, ordered and non-overlapping.
    fn token_spans(&self, text: &str) -> Vec<TokenSpan> {
        word_spans(text)
    }
}

/// Closed set of adapters the registry can construct.
///
/// `Custom` admits externally supplied counters (remote tokenizers, test
/// doubles) without reflection.
#[derive(Clone)]
pub enum Adapter {
    Heuristic(HeuristicTokenizer),
    Tiktoken(Arc<TiktokenAdapter>),
    HuggingFace(Arc<HuggingFaceAdapter>),
    Custom(Arc<dyn TokenizerAdapter>),
}

impl Adapter {
    fn inner(&self) -> &dyn TokenizerAdapter {
        match self {
            Adapter::Heuristic(a) => a,
            Adapter::Tiktoken(a) => a.as_ref(),
            Adapter::HuggingFace(a) => a.as_ref(),
            Adapter::Custom(a) => a.as_ref(),
        }
    }

    pub fn is_exact(&self) -> bool {
        !matches!(self, Adapter::Heuristic(_))
    }
}

impl std::fmt::Debug for Adapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Adapter")
            .field("adapter_id", &self.adapter_id())
            .field("model_name", &self.model_name())
            .finish()
    }
}

impl TokenizerAdapter for Adapter {
    fn adapter_id(&self) -> &str {
        self.inner().adapter_id()
    }
    fn model_name(&self) -> &str {
        self.inner().model_name()
    }
    fn count_tokens(&self, text: &str) -> Result<TokenCount> {
        self.inner().count_tokens(text)
    }
    fn max_tokens(&self) -> usize {
        self.inner().max_tokens()
    }
    fn tokenizer_id(&self) -> String {
        self.inner().tokenizer_id()
    }
    fn token_spans(&self, text: &str) -> Vec<TokenSpan> {
        self.inner().token_spans(text)
    }
}

impl<T: TokenizerAdapter + ?Sized> TokenizerAdapter for &T {
    fn adapter_id(&self) -> &str {
        (**self).adapter_id()
    }
    fn model_name(&self) -> &str {
        (**self).model_name()
    }
    fn count_tokens(&self, text: &str) -> Result<TokenCount> {
        (**self).count_tokens(text)
    }
    fn max_tokens(&self) -> usize {
        (**self).max_tokens()
    }
    fn tokenizer_id(&self) -> String {
        (**self).tokenizer_id()
    }
    fn token_spans(&self, text: &str) -> Vec<TokenSpan> {
        (**self).token_spans(text)
    }
}

impl<T: TokenizerAdapter + ?Sized> TokenizerAdapter for Arc<T> {
    fn adapter_id(&self) -> &str {
        (**self).adapter_id()
    }
    fn model_name(&self) -> &str {
        (**self).model_name()
    }
    fn count_tokens(&self, text: &str) -> Result<TokenCount> {
        (**self).count_tokens(text)
    }
    fn max_tokens(&self) -> usize {
        (**self).max_tokens()
    }
    fn tokenizer_id(&self) -> String {
        (**self).tokenizer_id()
    }
    fn token_spans(&self, text: &str) -> Vec<TokenSpan> {
        (**self).token_spans(text)
    }
}

/// CJK ideographs, kana and hangul: one token per code point.
pub fn is_cjk(c: char) -> bool {
    matches!(
        c as u32,
        0x3400..=0x4DBF
            | 0x4E00..=0x9FFF
            | 0x3040..=0x30FF
            | 0xAC00..=0xD7AF
            | 0xF900..=0xFAFF
            | 0x20000..=0x2FA1F
    )
}

fn is_word_char(c: char) -> bool {
    (c.is_alphanumeric() || c == '_') && !is_cjk(c)
}

/// Tokenizer-agnostic spans: word runs (alphanumerics and `_`), single CJK
/// characters and single punctuation marks. Whitespace is never covered.
pub fn word_spans(text: &str) -> Vec<TokenSpan> {
    let chars: Vec<char> = text.chars().collect();
    let mut spans = Vec::new();
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        if c.is_whitespace() {
            i += 1;
        } else if is_word_char(c) {
            let mut j = i + 1;
            while j < chars.len() && is_word_char(chars[j]) {
                j += 1;
            }
            spans.push((i, j));
            i = j;
        } else {
            spans.push((i, i + 1));
            i += 1;
        }
    }
    spans
}

/// Convert byte-offset spans to char-offset spans, dropping empty ones.
#[cfg_attr(
    not(any(feature = "tiktoken", feature = "huggingface")),
    allow(dead_code)
)]
pub(crate) fn byte_spans_to_char_spans(text: &str, spans: &[(usize, usize)]) -> Vec<TokenSpan> {
    let mut byte_to_char = vec![0usize; text.len() + 1];
    let mut char_idx = 0;
    for (b, _) in text.char_indices() {
        byte_to_char[b] = char_idx;
        char_idx += 1;
    }
    byte_to_char[text.len()] = char_idx;
    // Offsets landing inside a char round down to its start.
    let mut last = 0;
    for slot in byte_to_char.iter_mut() {
        if *slot < last {
            *slot = last;
        }
        last = *slot;
    }

    let mut out: Vec<TokenSpan> = Vec::with_capacity(spans.len());
    for &(s, e) in spans {
        let s = byte_to_char[s.min(text.len())];
        let e = byte_to_char[e.min(text.len())];
        if e <= s {
            continue;
        }
        if let Some(prev) = out.last() {
            if s < prev.1 {
                continue;
            }
        }
        out.push((s, e));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_word_spans_mixed() {
        let spans = word_spans("Hello, world_1 你好!");
        assert_eq!(spans, vec![(0, 5), (5, 6), (7, 14), (15, 16), (16, 17), (17, 18)]);
    }

    #[test]
    fn test_word_spans_skip_whitespace() {
        assert!(word_spans("  \n\t ").is_empty());
        assert_eq!(word_spans(" a "), vec![(1, 2)]);
    }

    #[test]
    fn test_model_max_tokens() {
        assert_eq!(resolve_model_max_tokens("text-embedding-3-small", None, 1), 8192);
        assert_eq!(resolve_model_max_tokens("unknown", None, 77), 77);
        let mut o = HashMap::new();
        o.insert("unknown".to_string(), 99);
        assert_eq!(resolve_model_max_tokens("unknown", Some(&o), 77), 99);
    }

    #[test]
    fn test_byte_spans_to_char_spans() {
        let text = "é a";
        // 'é' is two bytes; a span ending mid-char rounds down.
        let spans = byte_spans_to_char_spans(text, &[(0, 2), (3, 4), (3, 4)]);
        assert_eq!(spans, vec![(0, 1), (2, 3)]);
    }

    #[test]
    fn test_adapter_enum_dispatch() {
        let adapter = Adapter::Heuristic(HeuristicTokenizer::new("m", None, 4.0).unwrap());
        assert_eq!(adapter.adapter_id(), HEURISTIC);
        assert!(!adapter.is_exact());
        assert_eq!(adapter.count_tokens("a b").unwrap().count, 2);
        assert_eq!(adapter.tokenizer_id(), "heuristic:m:chars_4.0");
    }
}
