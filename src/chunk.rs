//! Token-bounded, overlapping text chunker.
//!
//! Splits a document into [`Chunk`]s whose size is measured in the
//! tokenizer's own token spans. For each chunk the cursor looks for a cut
//! between `start + target_tokens` (preferred) and `start + max_tokens`
//! (hard limit), in priority order:
//!
//! 1. a paragraph boundary,
//! 2. a sentence boundary,
//! 3. a hard cut at the limit.
//!
//! Consecutive chunks overlap by up to `overlap_tokens`, never more than
//! half of the previous chunk, and every chunk starts strictly after the
//! previous one.
//!
//! Each chunk gets a deterministic ID derived from its source, the
//! chunking version, its char span and its content, so the ID can be used
//! directly as a vector-store key.

use sha2::{Digest, Sha256};

use crate::boundary::{paragraph_boundaries, pick_boundary, sentence_boundaries};
use crate::error::{Result, TokenizerError};
use crate::models::{Chunk, ChunkingOptions};
use crate::normalize::{normalize, NormalizedText};
use crate::tokenizer::{TokenSpan, TokenizerAdapter};

/// Chunk `text` for `source_id`.
///
/// Returns an empty list for blank input. Fails only on invalid options or
/// an empty `source_id`.
pub fn chunk_text<T>(
    source_id: &str,
    text: &str,
    options: &ChunkingOptions,
    tokenizer: &T,
) -> Result<Vec<Chunk>>
where
    T: TokenizerAdapter + ?Sized,
{
    if source_id.is_empty() {
        return Err(TokenizerError::config("source_id", "source_id must be non-empty"));
    }
    options.validate()?;

    let normalized = normalize(text);
    if normalized.is_blank() {
        return Ok(Vec::new());
    }
    Ok(chunk_normalized(source_id, &normalized, options, tokenizer))
}

/// Chunk text that has already been normalized. Options must be valid.
pub fn chunk_normalized<T>(
    source_id: &str,
    normalized: &NormalizedText,
    options: &ChunkingOptions,
    tokenizer: &T,
) -> Vec<Chunk>
where
    T: TokenizerAdapter + ?Sized,
{
    let spans = tokenizer.token_spans(normalized.as_str());
    if spans.is_empty() {
        return Vec::new();
    }

    let paragraphs = boundary_token_indexes(&paragraph_boundaries(normalized), &spans);
    let sentences = boundary_token_indexes(&sentence_boundaries(normalized), &spans);
    let min_size = (options.target_tokens / 4).max(1);
    let total = spans.len();

    let mut chunks = Vec::new();
    let mut start = 0;
    let mut prev_end = 0usize;
    while start < total {
        let max_end = (start + options.max_tokens).min(total);
        let preferred_end = (start + options.target_tokens).min(max_end);
        // A chunk must also reach past the previous one.
        let floor = (prev_end + 1).saturating_sub(start).max(min_size);

        let mut end = pick_boundary(&paragraphs, start, preferred_end, max_end, floor)
            .or_else(|| pick_boundary(&sentences, start, preferred_end, max_end, floor))
            .unwrap_or(max_end);
        if end <= start {
            end = (start + 1).min(total);
        }

        let start_char = spans[start].0;
        let end_char = spans[end - 1].1;
        let text = normalized.slice(start_char, end_char).to_string();
        chunks.push(Chunk {
            source_id: source_id.to_string(),
            start_char,
            end_char,
            chunk_id: build_chunk_id(source_id, &options.version, start_char, end_char, &text),
            text,
        });

        if end >= total {
            break;
        }
        prev_end = end;
        start = calculate_overlap_start(start, end, options.overlap_tokens);
    }
    chunks
}

/// Token index where the next chunk starts, given the previous chunk
/// covered tokens `prev_start..prev_end`.
///
/// Overlap is clamped to half the previous chunk and the result is always
/// greater than `prev_start`.
pub fn calculate_overlap_start(prev_start: usize, prev_end: usize, overlap_tokens: usize) -> usize {
    let chunk_len = prev_end.saturating_sub(prev_start);
    let overlap = overlap_tokens.min(chunk_len / 2);
    let next = prev_end - overlap;
    if next <= prev_start {
        prev_end.max(prev_start + 1)
    } else {
        next
    }
}

/// `{source_id}:{version}:{start}:{end}:{digest16}`.
///
/// The digest covers the whitespace-collapsed text, so chunks differing
/// only in whitespace runs share an ID.
pub fn build_chunk_id(
    source_id: &str,
    version: &str,
    start_char: usize,
    end_char: usize,
    text: &str,
) -> String {
    let collapsed = text.split_whitespace().collect::<Vec<_>>().join(" ");
    let mut hasher = Sha256::new();
    hasher.update(format!("{}\n{}\n{}\n{}\n", source_id, version, start_char, end_char).as_bytes());
    hasher.update(collapsed.as_bytes());
    let digest = hex::encode(hasher.finalize());
    format!(
        "{}:{}:{}:{}:{}",
        source_id,
        version,
        start_char,
        end_char,
        &digest[..16]
    )
}

/// Map char-offset boundaries to token indexes: a boundary at char `c`
/// becomes the number of tokens ending at or before `c`.
fn boundary_token_indexes(boundaries: &[usize], spans: &[TokenSpan]) -> Vec<usize> {
    let mut out: Vec<usize> = boundaries
        .iter()
        .map(|&c| spans.partition_point(|&(_, end)| end <= c))
        .collect();
    out.dedup();
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tokenizer::HeuristicTokenizer;
    use proptest::prelude::*;

    fn tok() -> HeuristicTokenizer {
        HeuristicTokenizer::new("test-model", None, 4.0).unwrap()
    }

    fn opts(target: usize, max: usize, overlap: usize) -> ChunkingOptions {
        ChunkingOptions::new(target, max, overlap, "chunk-v1").unwrap()
    }

    #[test]
    fn test_short_ascii_single_chunk() {
        let text = "This is a short ASCII paragraph for testing chunking behavior.";
        let chunks = chunk_text("doc1", text, &opts(256, 512, 32), &tok()).unwrap();
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].start_char, 0);
        assert_eq!(chunks[0].end_char, text.chars().count());
        assert_eq!(chunks[0].text, text);
    }

    #[test]
    fn test_empty_and_blank_input() {
        let o = ChunkingOptions::default();
        assert!(chunk_text("doc1", "", &o, &tok()).unwrap().is_empty());
        assert!(chunk_text("doc1", "   \n\t", &o, &tok()).unwrap().is_empty());
    }

    #[test]
    fn test_empty_source_id_rejected() {
        let err = chunk_text("", "text", &ChunkingOptions::default(), &tok()).unwrap_err();
        assert!(matches!(err, TokenizerError::Config { ref key, .. } if key == "source_id"));
    }

    #[test]
    fn test_invalid_options_rejected_before_chunking() {
        let bad = ChunkingOptions {
            target_tokens: 10,
            max_tokens: 10,
            overlap_tokens: 10,
            version: "v".into(),
        };
        assert!(chunk_text("doc1", "text", &bad, &tok()).is_err());
    }

    #[test]
    fn test_prefers_paragraph_break_over_hard_cut() {
        // 8 one-token words, blank line, 8 more
        let text = "aa bb cc dd ee ff gg hh\n\nii jj kk ll mm nn oo pp";
        let chunks = chunk_text("doc1", text, &opts(6, 12, 0), &tok()).unwrap();
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].text, "aa bb cc dd ee ff gg hh");
        assert_eq!(chunks[1].text, "ii jj kk ll mm nn oo pp");
    }

    #[test]
    fn test_prefers_sentence_break_over_hard_cut() {
        let text = "aa bb cc dd. ee ff gg hh ii jj kk ll";
        let chunks = chunk_text("doc1", text, &opts(4, 8, 0), &tok()).unwrap();
        // the first cut lands right after the period
        assert_eq!(chunks[0].text, "aa bb cc dd.");
    }

    #[test]
    fn test_hard_cut_at_max_tokens() {
        let text = "aa bb cc dd ee ff gg hh ii jj";
        let chunks = chunk_text("doc1", text, &opts(3, 4, 0), &tok()).unwrap();
        assert_eq!(chunks[0].text, "aa bb cc dd");
        assert_eq!(chunks.len(), 3);
    }

    #[test]
    fn test_zero_overlap_is_contiguous() {
        let text = "aa bb cc dd ee ff gg hh ii jj";
        let chunks = chunk_text("doc1", text, &opts(3, 4, 0), &tok()).unwrap();
        for pair in chunks.windows(2) {
            assert!(pair[1].start_char >= pair[0].end_char);
        }
    }

    #[test]
    fn test_overlap_repeats_tail_tokens() {
        let text = "aa bb cc dd ee ff gg hh ii jj";
        let chunks = chunk_text("doc1", text, &opts(4, 4, 2), &tok()).unwrap();
        assert_eq!(chunks[0].text, "aa bb cc dd");
        assert_eq!(chunks[1].text, "cc dd ee ff");
    }

    #[test]
    fn test_overlap_clamped_to_half_chunk() {
        assert_eq!(calculate_overlap_start(0, 10, 3), 7);
        assert_eq!(calculate_overlap_start(0, 10, 8), 5);
        assert_eq!(calculate_overlap_start(4, 5, 3), 5);
        assert_eq!(calculate_overlap_start(0, 10, 0), 10);
    }

    #[test]
    fn test_cjk_document() {
        let text = "你好世界！这是一个测试文档。".repeat(10);
        let chunks = chunk_text("doc-cjk", &text, &opts(20, 30, 4), &tok()).unwrap();
        assert!(chunks.len() > 1);
        // sentence cuts land right after 。 or ！
        assert!(chunks[0].text.ends_with('。') || chunks[0].text.ends_with('！'));
    }

    #[test]
    fn test_chunk_id_format_and_stability() {
        let id = build_chunk_id("doc1", "chunk-v1", 0, 5, "hello");
        let parts: Vec<&str> = id.split(':').collect();
        assert_eq!(&parts[..4], &["doc1", "chunk-v1", "0", "5"]);
        assert_eq!(parts[4].len(), 16);
        assert!(parts[4].chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(id, build_chunk_id("doc1", "chunk-v1", 0, 5, "hello"));
        assert_ne!(id, build_chunk_id("doc1", "chunk-v1", 0, 5, "hellp"));
        assert_ne!(id, build_chunk_id("doc1", "chunk-v2", 0, 5, "hello"));
    }

    #[test]
    fn test_chunk_id_ignores_whitespace_runs() {
        assert_eq!(
            build_chunk_id("d", "v", 0, 9, "a  b\n c"),
            build_chunk_id("d", "v", 0, 9, "a b c")
        );
    }

    #[test]
    fn test_chunk_text_matches_span() {
        let text = "Para one has words.\n\nPara two, too! Another sentence here.";
        let chunks = chunk_text("doc1", text, &opts(4, 6, 1), &tok()).unwrap();
        let normalized = normalize(text);
        for c in &chunks {
            assert!(c.start_char < c.end_char);
            assert!(c.end_char <= normalized.char_len());
            assert_eq!(c.text, normalized.slice(c.start_char, c.end_char));
        }
    }

    proptest! {
        #[test]
        fn prop_deterministic(text in "[a-zA-Z .!?\n]{0,400}", target in 1usize..20, extra in 0usize..20, overlap in 0usize..10) {
            let max = target + extra;
            prop_assume!(overlap < max);
            let o = opts(target, max, overlap);
            let a = chunk_text("doc", &text, &o, &tok()).unwrap();
            let b = chunk_text("doc", &text, &o, &tok()).unwrap();
            prop_assert_eq!(a, b);
        }

        #[test]
        fn prop_progress_and_bounds(text in "[a-z 。，\n]{1,300}", target in 1usize..10, extra in 0usize..10, overlap in 0usize..10) {
            let max = target + extra;
            prop_assume!(overlap < max);
            let o = opts(target, max, overlap);
            let t = tok();
            let chunks = chunk_text("doc", &text, &o, &t).unwrap();
            let len = normalize(&text).char_len();
            for c in &chunks {
                prop_assert!(c.start_char < c.end_char);
                prop_assert!(c.end_char <= len);
                prop_assert!(t.count_tokens(&c.text).unwrap().count <= max);
            }
            for pair in chunks.windows(2) {
                prop_assert!(pair[1].start_char > pair[0].start_char);
                prop_assert!(pair[1].end_char > pair[0].end_char);
            }
        }
    }
}
