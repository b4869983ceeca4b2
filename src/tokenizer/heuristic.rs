//! Offline character-ratio token estimation.
//!
//! Word runs count `ceil(chars / chars_per_token)` tokens, CJK characters
//! and punctuation marks one token each. Word runs are split into that many
//! even-width spans, so the span mapping and the count always agree.

use crate::error::{Result, TokenizerError};
use crate::models::TokenCount;

use super::{is_cjk, resolve_model_max_tokens, word_spans, TokenSpan, TokenizerAdapter};
use super::{DEFAULT_MAX_TOKENS, HEURISTIC};

pub const DEFAULT_CHARS_PER_TOKEN: f64 = 4.0;

#[derive(Debug, Clone)]
pub struct HeuristicTokenizer {
    model_name: String,
    max_tokens: Option<usize>,
    chars_per_token: f64,
    tokenizer_id: String,
}

impl HeuristicTokenizer {
    pub fn new(model_name: &str, max_tokens: Option<usize>, chars_per_token: f64) -> Result<Self> {
        if model_name.trim().is_empty() {
            return Err(TokenizerError::config("model", "model_name must be non-empty"));
        }
        if !chars_per_token.is_finite() || chars_per_token <= 0.0 {
            return Err(TokenizerError::config(
                "chars_per_token",
                "chars_per_token must be positive",
            ));
        }
        Ok(Self {
            model_name: model_name.to_string(),
            max_tokens,
            chars_per_token,
            tokenizer_id: format!("{}:{}:chars_{:.1}", HEURISTIC, model_name, chars_per_token),
        })
    }

    pub fn chars_per_token(&self) -> f64 {
        self.chars_per_token
    }

    /// Infallible count; `count_tokens` always returns this.
    pub fn estimate(&self, text: &str) -> TokenCount {
        TokenCount {
            count: self.spans(text).len(),
            method: HEURISTIC.to_string(),
            tokenizer_id: self.tokenizer_id.clone(),
            is_exact: false,
        }
    }

    fn pieces(&self, word_len: usize) -> usize {
        let ratio = self.chars_per_token.max(1.0);
        ((word_len as f64 / ratio).ceil() as usize).clamp(1, word_len.max(1))
    }

    fn spans(&self, text: &str) -> Vec<TokenSpan> {
        let chars: Vec<char> = text.chars().collect();
        let mut out = Vec::new();
        for (s, e) in word_spans(text) {
            let len = e - s;
            if len == 1 || is_cjk(chars[s]) {
                out.push((s, e));
                continue;
            }
            let n = self.pieces(len);
            let mut prev = s;
            for k in 1..=n {
                let cut = s + k * len / n;
                out.push((prev, cut));
                prev = cut;
            }
        }
        out
    }
}

impl TokenizerAdapter for HeuristicTokenizer {
    fn adapter_id(&self) -> &str {
        HEURISTIC
    }

    fn model_name(&self) -> &str {
        &self.model_name
    }

    fn count_tokens(&self, text: &str) -> Result<TokenCount> {
        Ok(self.estimate(text))
    }

    fn max_tokens(&self) -> usize {
        self.max_tokens
            .unwrap_or_else(|| resolve_model_max_tokens(&self.model_name, None, DEFAULT_MAX_TOKENS))
    }

    /// Includes the ratio, e.g. `heuristic:gpt-4:chars_4.0`.
    fn tokenizer_id(&self) -> String {
        self.tokenizer_id.clone()
    }

    fn token_spans(&self, text: &str) -> Vec<TokenSpan> {
        self.spans(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tok(ratio: f64) -> HeuristicTokenizer {
        HeuristicTokenizer::new("test-model", None, ratio).unwrap()
    }

    #[test]
    fn test_counts() {
        let t = tok(4.0);
        assert_eq!(t.count_tokens("").unwrap().count, 0);
        assert_eq!(t.count_tokens("a").unwrap().count, 1);
        assert_eq!(t.count_tokens("Hello, world!").unwrap().count, 6);
        assert_eq!(t.count_tokens("test_function_name").unwrap().count, 5);
        assert_eq!(t.count_tokens("你好世界").unwrap().count, 4);
    }

    #[test]
    fn test_cjk_per_character() {
        let t = tok(4.0);
        let text = "你好世界！这是一个测试文档。";
        let spans = t.token_spans(text);
        let chars: Vec<char> = text.chars().collect();
        let cjk = chars.iter().filter(|&&c| is_cjk(c)).count();
        let single_cjk = spans
            .iter()
            .filter(|(s, e)| e - s == 1 && is_cjk(chars[*s]))
            .count();
        assert_eq!(cjk, 12);
        assert_eq!(single_cjk, cjk);
        // The two full-width terminators are one token each.
        assert_eq!(t.count_tokens(text).unwrap().count, chars.len());
    }

    #[test]
    fn test_identity_and_exactness() {
        let count = tok(4.0).count_tokens("hi").unwrap();
        assert_eq!(count.method, "heuristic");
        assert_eq!(count.tokenizer_id, "heuristic:test-model:chars_4.0");
        assert!(!count.is_exact);
        assert_eq!(tok(6.0).tokenizer_id(), "heuristic:test-model:chars_6.0");
    }

    #[test]
    fn test_ratio_changes_density() {
        let text = "internationalization considerations";
        let dense = tok(2.0).count_tokens(text).unwrap().count;
        let sparse = tok(6.0).count_tokens(text).unwrap().count;
        assert!(dense > sparse);
    }

    #[test]
    fn test_spans_match_count_and_cover_words() {
        let t = tok(3.0);
        let text = "abcdefgh ij";
        let spans = t.token_spans(text);
        assert_eq!(spans, vec![(0, 2), (2, 5), (5, 8), (9, 11)]);
        assert_eq!(spans.len(), t.count_tokens(text).unwrap().count);
    }

    #[test]
    fn test_invalid_construction() {
        assert!(HeuristicTokenizer::new("", None, 4.0).is_err());
        assert!(HeuristicTokenizer::new("m", None, 0.0).is_err());
        assert!(HeuristicTokenizer::new("m", None, -1.0).is_err());
        assert!(HeuristicTokenizer::new("m", None, f64::NAN).is_err());
    }

    #[test]
    fn test_max_tokens_resolution() {
        assert_eq!(tok(4.0).max_tokens(), DEFAULT_MAX_TOKENS);
        let small = HeuristicTokenizer::new("text-embedding-3-small", Some(2048), 4.0).unwrap();
        assert_eq!(small.max_tokens(), 2048);
    }
}
