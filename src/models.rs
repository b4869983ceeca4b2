//! Core data models used throughout the chunking engine.
//!
//! These types represent the options, token counts and chunks that flow
//! from raw document text to the embedding pipeline.

use serde::Serialize;

use crate::error::{Result, TokenizerError};

/// Token count reported by a tokenizer adapter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TokenCount {
    pub count: usize,
    /// Tokenizer family (`"heuristic"`, `"tiktoken"`, `"huggingface"`).
    pub method: String,
    /// Adapter identity, e.g. `heuristic:text-embedding-3-small:chars_4.0`.
    pub tokenizer_id: String,
    /// `false` when the count is an approximation.
    pub is_exact: bool,
}

/// Validated chunking parameters.
///
/// Construct with [`ChunkingOptions::new`]; invalid combinations are a
/// configuration error and never reach the chunker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChunkingOptions {
    pub target_tokens: usize,
    pub max_tokens: usize,
    pub overlap_tokens: usize,
    /// Chunking algorithm revision, embedded in every chunk ID.
    pub version: String,
}

impl ChunkingOptions {
    pub fn new(
        target_tokens: usize,
        max_tokens: usize,
        overlap_tokens: usize,
        version: impl Into<String>,
    ) -> Result<Self> {
        let options = Self {
            target_tokens,
            max_tokens,
            overlap_tokens,
            version: version.into(),
        };
        options.validate()?;
        Ok(options)
    }

    pub fn validate(&self) -> Result<()> {
        if self.target_tokens == 0 {
            return Err(TokenizerError::config("target_tokens", "must be positive"));
        }
        if self.max_tokens == 0 {
            return Err(TokenizerError::config("max_tokens", "must be positive"));
        }
        if self.target_tokens > self.max_tokens {
            return Err(TokenizerError::config(
                "target_tokens",
                format!(
                    "target_tokens ({}) must be <= max_tokens ({})",
                    self.target_tokens, self.max_tokens
                ),
            ));
        }
        if self.overlap_tokens >= self.max_tokens {
            return Err(TokenizerError::config(
                "overlap_tokens",
                format!(
                    "overlap_tokens ({}) must be < max_tokens ({})",
                    self.overlap_tokens, self.max_tokens
                ),
            ));
        }
        if self.version.trim().is_empty() {
            return Err(TokenizerError::config("version", "must be non-empty"));
        }
        Ok(())
    }
}

impl Default for ChunkingOptions {
    fn default() -> Self {
        Self {
            target_tokens: 256,
            max_tokens: 512,
            overlap_tokens: 32,
            version: "chunk-v1".to_string(),
        }
    }
}

/// A contiguous span of normalized document text.
///
/// `start_char..end_char` is a half-open range of char offsets into the
/// normalized text, with `start_char < end_char`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Chunk {
    pub source_id: String,
    pub start_char: usize,
    pub end_char: usize,
    pub text: String,
    pub chunk_id: String,
}

/// A chunk whose text has been fitted to a token budget.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BudgetedChunk {
    pub source_id: String,
    pub start_char: usize,
    pub end_char: usize,
    pub text: String,
    pub chunk_id: String,
    pub token_count: TokenCount,
    pub trimmed: bool,
    /// Effective maximum the text was fitted to.
    pub target_budget: usize,
    pub safety_margin: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_options_valid() {
        assert!(ChunkingOptions::default().validate().is_ok());
    }

    #[test]
    fn test_overlap_must_be_below_max() {
        let err = ChunkingOptions::new(10, 20, 20, "v1").unwrap_err();
        assert!(matches!(err, TokenizerError::Config { ref key, .. } if key == "overlap_tokens"));
    }

    #[test]
    fn test_target_above_max_rejected() {
        let err = ChunkingOptions::new(30, 20, 0, "v1").unwrap_err();
        assert!(matches!(err, TokenizerError::Config { ref key, .. } if key == "target_tokens"));
    }

    #[test]
    fn test_zero_target_and_empty_version_rejected() {
        assert!(ChunkingOptions::new(0, 20, 0, "v1").is_err());
        assert!(ChunkingOptions::new(5, 20, 0, "  ").is_err());
        assert!(ChunkingOptions::new(20, 20, 19, "v1").is_ok());
    }
}
