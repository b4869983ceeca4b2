//! Token budget enforcement with deterministic tail trimming.
//!
//! A [`TokenBudgetManager`] reserves a safety margin out of the model's
//! token limit and fits text to what remains:
//!
//! ```text
//! safety_margin = max(round(max_tokens * 0.1), 16)
//! effective_max = max(1, max_tokens - safety_margin)
//! ```
//!
//! Text over budget is cut at the `effective_max`-th token span; if the
//! recount still exceeds the budget the longest fitting char prefix is
//! found by binary search. Binary search assumes token counts grow roughly
//! monotonically with prefix length. When a tokenizer breaks that
//! assumption the search still terminates and returns a fitting prefix,
//! but not necessarily the longest one.
//!
//! The result is always a literal prefix of the input and never empty for
//! non-empty input, even if the first character alone is over budget.

use serde::Serialize;
use tracing::{debug, warn};

use crate::chunk::{build_chunk_id, chunk_text};
use crate::error::{Result, TokenizerError};
use crate::models::{BudgetedChunk, ChunkingOptions, TokenCount};
use crate::tokenizer::TokenizerAdapter;

pub const DEFAULT_SAFETY_MARGIN_RATIO: f64 = 0.1;
pub const DEFAULT_SAFETY_MARGIN_MIN_TOKENS: usize = 16;

/// How much of the budget to hold back.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BudgetPolicy {
    pub safety_margin_ratio: f64,
    pub safety_margin_min_tokens: usize,
}

impl Default for BudgetPolicy {
    fn default() -> Self {
        Self {
            safety_margin_ratio: DEFAULT_SAFETY_MARGIN_RATIO,
            safety_margin_min_tokens: DEFAULT_SAFETY_MARGIN_MIN_TOKENS,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BudgetResult {
    pub text: String,
    pub token_count: TokenCount,
    pub was_trimmed: bool,
    pub original_token_count: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BudgetInfo {
    pub max_tokens: usize,
    pub effective_max: usize,
    pub safety_margin: usize,
    pub tokenizer_id: String,
    pub model_name: String,
}

pub struct TokenBudgetManager<T> {
    tokenizer: T,
    max_tokens: usize,
    safety_margin: usize,
    effective_max: usize,
}

impl<T: TokenizerAdapter> TokenBudgetManager<T> {
    /// Budget against `max_tokens`, or the tokenizer's own limit when `None`.
    pub fn new(tokenizer: T, max_tokens: Option<usize>) -> Result<Self> {
        Self::with_policy(tokenizer, max_tokens, BudgetPolicy::default())
    }

    pub fn with_policy(tokenizer: T, max_tokens: Option<usize>, policy: BudgetPolicy) -> Result<Self> {
        if !policy.safety_margin_ratio.is_finite() || policy.safety_margin_ratio < 0.0 {
            return Err(TokenizerError::config(
                "safety_margin_ratio",
                "must be a non-negative number",
            ));
        }
        let max_tokens = max_tokens.unwrap_or_else(|| tokenizer.max_tokens());
        if max_tokens == 0 {
            return Err(TokenizerError::config("max_tokens", "must be positive"));
        }
        let ratio_margin = (max_tokens as f64 * policy.safety_margin_ratio).round() as usize;
        let safety_margin = ratio_margin.max(policy.safety_margin_min_tokens);
        let effective_max = max_tokens.saturating_sub(safety_margin).max(1);
        Ok(Self {
            tokenizer,
            max_tokens,
            safety_margin,
            effective_max,
        })
    }

    pub fn effective_max(&self) -> usize {
        self.effective_max
    }

    pub fn safety_margin(&self) -> usize {
        self.safety_margin
    }

    pub fn tokenizer(&self) -> &T {
        &self.tokenizer
    }

    /// Fit `text` into the effective budget.
    pub fn apply_budget(&self, text: &str) -> Result<BudgetResult> {
        let original = self.tokenizer.count_tokens(text)?;
        if original.count <= self.effective_max {
            return Ok(BudgetResult {
                text: text.to_string(),
                original_token_count: original.count,
                token_count: original,
                was_trimmed: false,
            });
        }

        let (trimmed, count) = self.trim(text)?;
        debug!(
            "Trimmed text from {} to {} tokens (budget {})",
            original.count, count.count, self.effective_max
        );
        Ok(BudgetResult {
            text: trimmed,
            token_count: count,
            was_trimmed: true,
            original_token_count: original.count,
        })
    }

    /// Whether `text` already fits. Counting failures count as non-compliant.
    pub fn validate_budget_compliance(&self, text: &str) -> bool {
        self.tokenizer
            .count_tokens(text)
            .map(|c| c.count <= self.effective_max)
            .unwrap_or(false)
    }

    pub fn get_budget_info(&self) -> BudgetInfo {
        BudgetInfo {
            max_tokens: self.max_tokens,
            effective_max: self.effective_max,
            safety_margin: self.safety_margin,
            tokenizer_id: self.tokenizer.adapter_id().to_string(),
            model_name: self.tokenizer.model_name().to_string(),
        }
    }

    fn trim(&self, text: &str) -> Result<(String, TokenCount)> {
        let spans = self.tokenizer.token_spans(text);
        let offsets = char_byte_offsets(text);

        if !spans.is_empty() {
            let idx = self.effective_max.min(spans.len()) - 1;
            let end_char = spans[idx].1.min(offsets.len() - 1);
            if end_char > 0 {
                let candidate = &text[..offsets[end_char]];
                let count = self.tokenizer.count_tokens(candidate)?;
                if count.count <= self.effective_max {
                    return Ok((candidate.to_string(), count));
                }
            }
        }

        self.binary_search_prefix(text, &offsets)
    }

    /// Longest char prefix whose count fits, but never shorter than one char.
    fn binary_search_prefix(&self, text: &str, offsets: &[usize]) -> Result<(String, TokenCount)> {
        let char_len = offsets.len() - 1;
        let first = &text[..offsets[1.min(char_len)]];
        let mut best = (first.to_string(), self.tokenizer.count_tokens(first)?);

        let (mut low, mut high) = (1usize, char_len);
        while low <= high {
            let mid = low + (high - low) / 2;
            let candidate = &text[..offsets[mid]];
            let count = self.tokenizer.count_tokens(candidate)?;
            if count.count <= self.effective_max {
                best = (candidate.to_string(), count);
                low = mid + 1;
            } else {
                high = mid - 1;
            }
        }

        if best.1.count > self.effective_max {
            warn!(
                "Single character exceeds token budget ({} > {}), keeping it",
                best.1.count, self.effective_max
            );
        }
        Ok(best)
    }
}

/// Byte offset of every char boundary, including the end of the text.
fn char_byte_offsets(text: &str) -> Vec<usize> {
    text.char_indices()
        .map(|(b, _)| b)
        .chain(std::iter::once(text.len()))
        .collect()
}

/// Chunk `text` and fit every chunk into the budget.
///
/// The budget is `max_tokens` when given, else `options.max_tokens`; the
/// model's own context size only matters through an explicit override.
/// A trimmed chunk keeps its start, gets its `end_char` shortened to the
/// trimmed length and a chunk ID recomputed for the new span.
pub fn budget_chunks<T>(
    source_id: &str,
    text: &str,
    options: &ChunkingOptions,
    tokenizer: &T,
    max_tokens: Option<usize>,
) -> Result<Vec<BudgetedChunk>>
where
    T: TokenizerAdapter + ?Sized,
{
    let chunks = chunk_text(source_id, text, options, tokenizer)?;
    let budget = max_tokens.unwrap_or(options.max_tokens);
    let manager = TokenBudgetManager::new(tokenizer, Some(budget))?;

    let mut out = Vec::with_capacity(chunks.len());
    for chunk in chunks {
        let result = manager.apply_budget(&chunk.text)?;
        let (end_char, chunk_id) = if result.was_trimmed {
            let end = chunk.start_char + result.text.chars().count();
            let id = build_chunk_id(source_id, &options.version, chunk.start_char, end, &result.text);
            (end, id)
        } else {
            (chunk.end_char, chunk.chunk_id)
        };
        out.push(BudgetedChunk {
            source_id: chunk.source_id,
            start_char: chunk.start_char,
            end_char,
            text: result.text,
            chunk_id,
            token_count: result.token_count,
            trimmed: result.was_trimmed,
            target_budget: manager.effective_max(),
            safety_margin: manager.safety_margin(),
        });
    }
    Ok(out)
}
