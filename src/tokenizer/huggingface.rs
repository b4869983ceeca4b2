//! Exact subword counting from a local `tokenizer.json`.
//!
//! Requires the `huggingface` cargo feature. The tokenizer file is looked up
//! in order: the configured `tokenizer_path`, the model name itself when it
//! points at an existing file, then
//! `~/.cache/kano-backlog/tokenizers/<model>/tokenizer.json`. Nothing is
//! downloaded; a missing file is reported as a missing dependency.
#![cfg_attr(not(feature = "huggingface"), allow(dead_code, unused_imports))]

use std::path::{Path, PathBuf};

use crate::error::{Result, TokenizerError};
use crate::models::TokenCount;

use super::{resolve_model_max_tokens, TokenSpan, TokenizerAdapter, DEFAULT_MAX_TOKENS, HUGGINGFACE};

pub struct HuggingFaceAdapter {
    model_name: String,
    max_tokens: Option<usize>,
    tokenizer_path: PathBuf,
    #[cfg(feature = "huggingface")]
    tokenizer: tokenizers::Tokenizer,
}

/// Default on-disk location for a model's tokenizer.
pub fn cached_tokenizer_path(model_name: &str) -> PathBuf {
    let base = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    PathBuf::from(base)
        .join(".cache")
        .join("kano-backlog")
        .join("tokenizers")
        .join(model_name.replace('/', "__"))
        .join("tokenizer.json")
}

fn locate_tokenizer(model_name: &str, explicit: Option<&Path>) -> Option<PathBuf> {
    if let Some(p) = explicit {
        return p.is_file().then(|| p.to_path_buf());
    }
    let as_path = Path::new(model_name);
    if as_path.is_file() {
        return Some(as_path.to_path_buf());
    }
    let cached = cached_tokenizer_path(model_name);
    cached.is_file().then_some(cached)
}

impl HuggingFaceAdapter {
    #[cfg(feature = "huggingface")]
    pub fn new(
        model_name: &str,
        max_tokens: Option<usize>,
        tokenizer_path: Option<&Path>,
    ) -> Result<Self> {
        if model_name.trim().is_empty() {
            return Err(TokenizerError::config("model", "model_name must be non-empty"));
        }
        let path = locate_tokenizer(model_name, tokenizer_path).ok_or_else(|| {
            TokenizerError::dependency_missing("tokenizer.json", HUGGINGFACE, Some(model_name))
        })?;
        let tokenizer = tokenizers::Tokenizer::from_file(&path).map_err(|e| {
            TokenizerError::config(
                "huggingface.tokenizer_path",
                format!("invalid tokenizer file {}: {}", path.display(), e),
            )
        })?;
        tracing::debug!("Loaded tokenizer for '{}' from {}", model_name, path.display());
        Ok(Self {
            model_name: model_name.to_string(),
            max_tokens,
            tokenizer_path: path,
            tokenizer,
        })
    }

    #[cfg(not(feature = "huggingface"))]
    pub fn new(
        model_name: &str,
        _max_tokens: Option<usize>,
        _tokenizer_path: Option<&Path>,
    ) -> Result<Self> {
        Err(TokenizerError::dependency_missing(
            "tokenizers",
            HUGGINGFACE,
            Some(model_name),
        ))
    }

    pub fn tokenizer_path(&self) -> &Path {
        &self.tokenizer_path
    }

    #[cfg(feature = "huggingface")]
    fn encode(&self, text: &str) -> Result<tokenizers::Encoding> {
        self.tokenizer.encode(text, false).map_err(|e| {
            TokenizerError::tokenization_failed(HUGGINGFACE, &self.model_name, text, e.to_string())
        })
    }
}

impl TokenizerAdapter for HuggingFaceAdapter {
    fn adapter_id(&self) -> &str {
        HUGGINGFACE
    }

    fn model_name(&self) -> &str {
        &self.model_name
    }

    #[cfg(feature = "huggingface")]
    fn count_tokens(&self, text: &str) -> Result<TokenCount> {
        let encoding = self.encode(text)?;
        Ok(TokenCount {
            count: encoding.get_ids().len(),
            method: HUGGINGFACE.to_string(),
            tokenizer_id: format!("{}:{}", HUGGINGFACE, self.model_name),
            is_exact: true,
        })
    }

    #[cfg(not(feature = "huggingface"))]
    fn count_tokens(&self, text: &str) -> Result<TokenCount> {
        Err(TokenizerError::tokenization_failed(
            HUGGINGFACE,
            &self.model_name,
            text,
            "huggingface support is not compiled in",
        ))
    }

    fn max_tokens(&self) -> usize {
        self.max_tokens
            .unwrap_or_else(|| resolve_model_max_tokens(&self.model_name, None, DEFAULT_MAX_TOKENS))
    }

    /// Real offsets from the encoding; falls back to word spans if encoding fails.
    #[cfg(feature = "huggingface")]
    fn token_spans(&self, text: &str) -> Vec<TokenSpan> {
        match self.encode(text) {
            Ok(encoding) => super::byte_spans_to_char_spans(text, encoding.get_offsets()),
            Err(_) => super::word_spans(text),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cached_path_flattens_model_name() {
        let p = cached_tokenizer_path("sentence-transformers/all-MiniLM-L6-v2");
        let s = p.to_string_lossy();
        assert!(s.ends_with("sentence-transformers__all-MiniLM-L6-v2/tokenizer.json"));
    }

    #[test]
    fn test_missing_tokenizer_is_dependency_error() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope.json");
        let err = HuggingFaceAdapter::new("some-model", None, Some(&missing))
            .err()
            .unwrap();
        assert!(matches!(err, TokenizerError::DependencyMissing { .. }));
        assert!(err.is_recoverable());
    }

    #[cfg(feature = "huggingface")]
    #[test]
    fn test_garbage_tokenizer_file_is_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tokenizer.json");
        std::fs::write(&path, "not json").unwrap();
        let err = HuggingFaceAdapter::new("m", None, Some(&path)).err().unwrap();
        assert!(matches!(err, TokenizerError::Config { .. }));
    }
}
