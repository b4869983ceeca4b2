//! Exact BPE counting for OpenAI encodings.
//!
//! Requires the `tiktoken` cargo feature. Without it, [`TiktokenAdapter::new`]
//! reports a missing `tiktoken-rs` dependency so the registry can fall back.
#![cfg_attr(not(feature = "tiktoken"), allow(dead_code))]

use crate::error::{Result, TokenizerError};
use crate::models::TokenCount;

use super::{resolve_model_max_tokens, TokenizerAdapter, DEFAULT_MAX_TOKENS, TIKTOKEN};

/// Encoding used when the model is not known to `tiktoken-rs`.
pub const FALLBACK_ENCODING: &str = "cl100k_base";

pub struct TiktokenAdapter {
    model_name: String,
    max_tokens: Option<usize>,
    encoding_name: String,
    #[cfg(feature = "tiktoken")]
    bpe: tiktoken_rs::CoreBPE,
}

impl TiktokenAdapter {
    /// Load the encoding for `model_name`, or the explicit `encoding` when given.
    ///
    /// Unknown models use [`FALLBACK_ENCODING`].
    #[cfg(feature = "tiktoken")]
    pub fn new(model_name: &str, max_tokens: Option<usize>, encoding: Option<&str>) -> Result<Self> {
        if model_name.trim().is_empty() {
            return Err(TokenizerError::config("model", "model_name must be non-empty"));
        }

        let (bpe, encoding_name) = match encoding {
            Some(name) => (load_encoding(name)?, name.to_string()),
            None => match tiktoken_rs::get_bpe_from_model(model_name) {
                Ok(bpe) => (bpe, format!("model:{}", model_name)),
                Err(_) => {
                    tracing::debug!(
                        "tiktoken has no encoding for model '{}', using {}",
                        model_name,
                        FALLBACK_ENCODING
                    );
                    (load_encoding(FALLBACK_ENCODING)?, FALLBACK_ENCODING.to_string())
                }
            },
        };

        Ok(Self {
            model_name: model_name.to_string(),
            max_tokens,
            encoding_name,
            bpe,
        })
    }

    #[cfg(not(feature = "tiktoken"))]
    pub fn new(model_name: &str, _max_tokens: Option<usize>, _encoding: Option<&str>) -> Result<Self> {
        Err(TokenizerError::dependency_missing(
            "tiktoken-rs",
            TIKTOKEN,
            Some(model_name),
        ))
    }

    pub fn encoding_name(&self) -> &str {
        &self.encoding_name
    }
}

#[cfg(feature = "tiktoken")]
fn load_encoding(name: &str) -> Result<tiktoken_rs::CoreBPE> {
    let loaded = match name {
        "cl100k_base" => tiktoken_rs::cl100k_base(),
        "o200k_base" => tiktoken_rs::o200k_base(),
        "p50k_base" => tiktoken_rs::p50k_base(),
        "p50k_edit" => tiktoken_rs::p50k_edit(),
        "r50k_base" | "gpt2" => tiktoken_rs::r50k_base(),
        other => {
            return Err(TokenizerError::config(
                "tiktoken.encoding",
                format!("unknown encoding '{}'", other),
            ))
        }
    };
    loaded.map_err(|e| {
        TokenizerError::config("tiktoken.encoding", format!("failed to load '{}': {}", name, e))
    })
}

impl TokenizerAdapter for TiktokenAdapter {
    fn adapter_id(&self) -> &str {
        TIKTOKEN
    }

    fn model_name(&self) -> &str {
        &self.model_name
    }

    #[cfg(feature = "tiktoken")]
    fn count_tokens(&self, text: &str) -> Result<TokenCount> {
        let count = self.bpe.encode_with_special_tokens(text).len();
        Ok(TokenCount {
            count,
            method: TIKTOKEN.to_string(),
            tokenizer_id: format!("{}:{}", TIKTOKEN, self.model_name),
            is_exact: true,
        })
    }

    #[cfg(not(feature = "tiktoken"))]
    fn count_tokens(&self, text: &str) -> Result<TokenCount> {
        Err(TokenizerError::tokenization_failed(
            TIKTOKEN,
            &self.model_name,
            text,
            "tiktoken support is not compiled in",
        ))
    }

    fn max_tokens(&self) -> usize {
        self.max_tokens
            .unwrap_or_else(|| resolve_model_max_tokens(&self.model_name, None, DEFAULT_MAX_TOKENS))
    }

    /// Spans of the actual BPE tokens.
    ///
    /// A token that is not valid UTF-8 on its own (a split multi-byte char)
    /// makes the pieces unusable; word spans are used for that text instead.
    #[cfg(feature = "tiktoken")]
    fn token_spans(&self, text: &str) -> Vec<super::TokenSpan> {
        let pieces = match self.bpe.split_by_token(text, true) {
            Ok(pieces) => pieces,
            Err(e) => {
                tracing::trace!("tiktoken pieces unavailable, using word spans: {}", e);
                return super::word_spans(text);
            }
        };
        let mut byte_spans = Vec::with_capacity(pieces.len());
        let mut offset = 0;
        for piece in &pieces {
            if !text[offset..].starts_with(piece.as_str()) {
                return super::word_spans(text);
            }
            byte_spans.push((offset, offset + piece.len()));
            offset += piece.len();
        }
        if offset != text.len() {
            return super::word_spans(text);
        }
        super::byte_spans_to_char_spans(text, &byte_spans)
    }
}

#[cfg(all(test, not(feature = "tiktoken")))]
mod tests {
    use super::*;

    #[test]
    fn test_missing_feature_reports_dependency() {
        let err = TiktokenAdapter::new("gpt-4", None, None).err().unwrap();
        assert!(matches!(
            err,
            TokenizerError::DependencyMissing { ref dependency, .. } if dependency == "tiktoken-rs"
        ));
        assert!(err.is_recoverable());
    }
}

#[cfg(all(test, feature = "tiktoken"))]
mod tests {
    use super::*;

    #[test]
    fn test_exact_count() {
        let adapter = TiktokenAdapter::new("text-embedding-3-small", None, None).unwrap();
        let count = adapter.count_tokens("Hello world").unwrap();
        assert!(count.is_exact);
        assert_eq!(count.method, "tiktoken");
        assert_eq!(count.count, 2);
    }

    #[test]
    fn test_token_spans_follow_bpe_tokens() {
        let adapter = TiktokenAdapter::new("text-embedding-3-small", None, None).unwrap();
        let text = "Hello world, tokenization!";
        let spans = adapter.token_spans(text);
        assert_eq!(spans.len(), adapter.count_tokens(text).unwrap().count);
        assert_eq!(spans[0], (0, 5));
        // BPE tokens carry their leading space.
        assert_eq!(spans[1], (5, 11));
        assert_eq!(spans.last().unwrap().1, text.chars().count());
        assert!(spans.windows(2).all(|w| w[0].1 == w[1].0));
    }

    #[test]
    fn test_unknown_model_uses_fallback_encoding() {
        let adapter = TiktokenAdapter::new("my-private-model", None, None).unwrap();
        assert_eq!(adapter.encoding_name(), FALLBACK_ENCODING);
    }

    #[test]
    fn test_unknown_encoding_is_config_error() {
        let err = TiktokenAdapter::new("gpt-4", None, Some("nope")).err().unwrap();
        assert!(matches!(err, TokenizerError::Config { .. }));
    }
}
