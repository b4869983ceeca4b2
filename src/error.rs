//! Error taxonomy for tokenizer resolution, counting and chunking.
//!
//! Only two kinds of failure ever reach a caller of the chunking engine:
//! [`TokenizerError::Config`] (rejected before any processing) and
//! [`TokenizerError::FallbackChainExhausted`]. Everything else is swallowed
//! by the registry and surfaces as a less exact [`TokenCount`] plus a
//! degradation event.
//!
//! [`TokenCount`]: crate::models::TokenCount

use thiserror::Error;

/// Result alias used throughout the library.
pub type Result<T> = std::result::Result<T, TokenizerError>;

/// Maximum characters of input text kept in a [`TokenizerError::TokenizationFailed`] preview.
const PREVIEW_CHARS: usize = 100;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum TokenizerError {
    /// Invalid budget, chunking or tokenizer parameters.
    #[error("Invalid configuration for '{key}': {reason}")]
    Config { key: String, reason: String },

    /// An exact adapter's runtime dependency (cargo feature, tokenizer file) is absent.
    #[error("Required dependency '{dependency}' is missing for {adapter} adapter")]
    DependencyMissing {
        dependency: String,
        adapter: String,
        model: Option<String>,
    },

    /// The adapter name is not registered.
    #[error("Tokenizer adapter '{adapter}' is not available: {reason}")]
    AdapterNotAvailable { adapter: String, reason: String },

    /// An adapter failed on valid input.
    #[error("Tokenization failed with {adapter} adapter for model {model}: {message}")]
    TokenizationFailed {
        adapter: String,
        model: String,
        text_preview: String,
        message: String,
    },

    /// Every adapter in the fallback chain failed.
    #[error(
        "All tokenizer adapters failed for model '{model}'. Attempted: {}",
        attempted_adapters.join(", ")
    )]
    FallbackChainExhausted {
        attempted_adapters: Vec<String>,
        errors: Vec<String>,
        model: String,
    },
}

impl TokenizerError {
    pub fn config(key: impl Into<String>, reason: impl Into<String>) -> Self {
        TokenizerError::Config {
            key: key.into(),
            reason: reason.into(),
        }
    }

    pub fn dependency_missing(
        dependency: impl Into<String>,
        adapter: impl Into<String>,
        model: Option<&str>,
    ) -> Self {
        TokenizerError::DependencyMissing {
            dependency: dependency.into(),
            adapter: adapter.into(),
            model: model.map(str::to_string),
        }
    }

    pub fn tokenization_failed(
        adapter: impl Into<String>,
        model: impl Into<String>,
        text: &str,
        message: impl Into<String>,
    ) -> Self {
        let mut text_preview: String = text.chars().take(PREVIEW_CHARS).collect();
        if text.chars().nth(PREVIEW_CHARS).is_some() {
            text_preview.push_str("...");
        }
        TokenizerError::TokenizationFailed {
            adapter: adapter.into(),
            model: model.into(),
            text_preview,
            message: message.into(),
        }
    }

    /// Whether the registry may substitute another adapter for this failure.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            TokenizerError::DependencyMissing { .. } | TokenizerError::TokenizationFailed { .. }
        )
    }

    /// Adapter involved in the failure, when there is one.
    pub fn adapter_name(&self) -> Option<&str> {
        match self {
            TokenizerError::DependencyMissing { adapter, .. }
            | TokenizerError::AdapterNotAvailable { adapter, .. }
            | TokenizerError::TokenizationFailed { adapter, .. } => Some(adapter),
            TokenizerError::Config { .. } | TokenizerError::FallbackChainExhausted { .. } => None,
        }
    }

    /// Model involved in the failure, when there is one.
    pub fn model_name(&self) -> Option<&str> {
        match self {
            TokenizerError::DependencyMissing { model, .. } => model.as_deref(),
            TokenizerError::TokenizationFailed { model, .. }
            | TokenizerError::FallbackChainExhausted { model, .. } => Some(model),
            _ => None,
        }
    }

    /// Short variant label used in degradation events and telemetry.
    pub fn kind(&self) -> &'static str {
        match self {
            TokenizerError::Config { .. } => "config",
            TokenizerError::DependencyMissing { .. } => "dependency_missing",
            TokenizerError::AdapterNotAvailable { .. } => "adapter_not_available",
            TokenizerError::TokenizationFailed { .. } => "tokenization_failed",
            TokenizerError::FallbackChainExhausted { .. } => "fallback_chain_exhausted",
        }
    }

    /// Concrete remediation steps for this failure.
    pub fn recovery_suggestions(&self) -> Vec<String> {
        match self {
            TokenizerError::Config { key, .. } => config_suggestions(key),
            TokenizerError::DependencyMissing {
                dependency,
                adapter,
                ..
            } => {
                let mut out = install_instructions(dependency, adapter);
                out.push("Alternative: use the 'heuristic' adapter (no dependencies required)".into());
                out.push("Set tokenizer.adapter = \"heuristic\" in the config file".into());
                out
            }
            TokenizerError::AdapterNotAvailable { adapter, .. } => {
                if adapter.eq_ignore_ascii_case("heuristic") {
                    vec![
                        "Heuristic adapter should always be available".into(),
                        "Check for configuration errors".into(),
                        "Verify the model name is not empty".into(),
                    ]
                } else {
                    vec![
                        "Check adapter name spelling".into(),
                        "Use 'auto' for automatic adapter selection".into(),
                        "Available adapters: heuristic, tiktoken, huggingface".into(),
                    ]
                }
            }
            TokenizerError::TokenizationFailed { message, .. } => {
                let lower = message.to_lowercase();
                let mut out = Vec::new();
                if lower.contains("encoding") || lower.contains("decode") {
                    out.push("Check text encoding (input must be valid UTF-8)".into());
                    out.push("Remove or escape unusual control characters".into());
                } else if lower.contains("token") && lower.contains("limit") {
                    out.push("Text may exceed model token limits".into());
                    out.push("Chunk the text into smaller pieces".into());
                } else if lower.contains("model") || lower.contains("not found") {
                    out.push("Verify the model name is correct".into());
                    out.push("Check the model is supported by the tokenizer backend".into());
                }
                out.push("Use 'auto' for automatic adapter selection".into());
                out.push("Use the 'heuristic' adapter for approximate token counting".into());
                out
            }
            TokenizerError::FallbackChainExhausted { errors, .. } => {
                let mut out = Vec::new();
                let missing = errors
                    .iter()
                    .any(|e| e.contains("missing") || e.contains("feature"));
                let invalid = errors
                    .iter()
                    .any(|e| e.contains("configuration") || e.contains("invalid"));
                if missing {
                    out.push("Enable exact tokenizers: cargo build --features exact-tokenizers".into());
                }
                if invalid {
                    out.push("Check tokenizer configuration: model name and adapter tables".into());
                }
                out.push("Add 'heuristic' to tokenizer.fallback_chain (no dependencies)".into());
                out.push("Review the per-adapter errors above for specific issues".into());
                out
            }
        }
    }

    /// Message, context and numbered recovery suggestions in one block.
    pub fn detailed_message(&self) -> String {
        let mut parts = vec![self.to_string()];
        if let Some(adapter) = self.adapter_name() {
            parts.push(format!("Adapter: {}", adapter));
        }
        if let Some(model) = self.model_name() {
            parts.push(format!("Model: {}", model));
        }
        let suggestions = self.recovery_suggestions();
        if !suggestions.is_empty() {
            parts.push("Recovery suggestions:".into());
            for (i, s) in suggestions.iter().enumerate() {
                parts.push(format!("  {}. {}", i + 1, s));
            }
        }
        parts.join("\n")
    }
}

fn install_instructions(dependency: &str, adapter: &str) -> Vec<String> {
    match dependency {
        "tiktoken-rs" => vec![
            "Rebuild with exact BPE counting: cargo build --features tiktoken".into(),
        ],
        "tokenizers" => vec![
            "Rebuild with exact subword counting: cargo build --features huggingface".into(),
        ],
        "tokenizer.json" => vec![
            format!(
                "Set tokenizer.huggingface.tokenizer_path to a tokenizer.json for the {} adapter",
                adapter
            ),
            "Or place it at ~/.cache/kano-backlog/tokenizers/<model>/tokenizer.json".into(),
        ],
        other => vec![format!("Provide '{}' for the {} adapter", other, adapter)],
    }
}

fn config_suggestions(key: &str) -> Vec<String> {
    match key {
        "adapter" => vec![
            "Valid adapters: 'heuristic', 'tiktoken', 'huggingface', 'auto'".into(),
            "Use 'auto' for automatic adapter selection".into(),
        ],
        "model" => vec![
            "Ensure the model name is not empty".into(),
            "Use a valid model identifier (e.g. 'text-embedding-3-small')".into(),
        ],
        "max_tokens" | "target_tokens" | "overlap_tokens" => vec![
            "Require 1 <= target_tokens <= max_tokens".into(),
            "Require 0 <= overlap_tokens < max_tokens".into(),
            "Typical values: 256 target, 512 max, 32 overlap".into(),
        ],
        "fallback_chain" => vec![
            "Fallback chain must be a non-empty list".into(),
            "Valid adapters: ['tiktoken', 'huggingface', 'heuristic']".into(),
            "Order matters: the first working adapter is used".into(),
        ],
        "chars_per_token" => vec![
            "chars_per_token must be a positive number".into(),
            "Typical values: 3.0-5.0 for English text".into(),
        ],
        other => vec![
            format!("Check the documentation for '{}'", other),
            "Verify configuration file syntax".into(),
        ],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exhausted_message_lists_attempts() {
        let err = TokenizerError::FallbackChainExhausted {
            attempted_adapters: vec!["tiktoken".into(), "heuristic".into()],
            errors: vec!["tiktoken: dependency missing".into()],
            model: "gpt-4".into(),
        };
        let msg = err.to_string();
        assert!(msg.contains("gpt-4"));
        assert!(msg.contains("tiktoken, heuristic"));
        assert!(!err.is_recoverable());
        assert!(err
            .recovery_suggestions()
            .iter()
            .any(|s| s.contains("--features exact-tokenizers")));
    }

    #[test]
    fn test_dependency_missing_is_recoverable() {
        let err = TokenizerError::dependency_missing("tiktoken-rs", "tiktoken", Some("gpt-4"));
        assert!(err.is_recoverable());
        assert_eq!(err.adapter_name(), Some("tiktoken"));
        assert_eq!(err.model_name(), Some("gpt-4"));
        let detailed = err.detailed_message();
        assert!(detailed.contains("cargo build --features tiktoken"));
        assert!(detailed.contains("1. "));
    }

    #[test]
    fn test_preview_truncated() {
        let text = "x".repeat(250);
        match TokenizerError::tokenization_failed("hf", "m", &text, "boom") {
            TokenizerError::TokenizationFailed { text_preview, .. } => {
                assert_eq!(text_preview.len(), 103);
                assert!(text_preview.ends_with("..."));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_config_not_recoverable() {
        let err = TokenizerError::config("overlap_tokens", "must be < max_tokens");
        assert!(!err.is_recoverable());
        assert_eq!(err.kind(), "config");
    }
}
