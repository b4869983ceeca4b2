//! Adapter chain diagnostics for `kano-chunk diagnose`.
//!
//! Each adapter in the registry's fallback chain is constructed directly,
//! without falling back, and asked to count a fixed sample sentence. The
//! report says which adapters work, whether their counts are exact, and
//! what to do about the ones that do not.

use serde::Serialize;

use crate::error::TokenizerError;
use crate::registry::TokenizerRegistry;
use crate::tokenizer::TokenizerAdapter;

pub const SAMPLE_TEXT: &str = "The quick brown fox jumps over the lazy dog.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AdapterStatus {
    Success,
    Failed,
}

#[derive(Debug, Clone, Serialize)]
pub struct AdapterCheck {
    pub adapter: String,
    pub status: AdapterStatus,
    pub tokens: Option<usize>,
    pub is_exact: Option<bool>,
    pub tokenizer_id: Option<String>,
    pub error: Option<String>,
    /// Remediation for a failed adapter.
    pub suggestions: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChainReport {
    pub model_name: String,
    pub fallback_chain: Vec<String>,
    pub results: Vec<AdapterCheck>,
    /// First adapter in chain order that counted successfully.
    pub selected_adapter: Option<String>,
    pub recommendations: Vec<String>,
}

impl ChainReport {
    pub fn selected(&self) -> Option<&AdapterCheck> {
        let name = self.selected_adapter.as_deref()?;
        self.results.iter().find(|r| r.adapter == name)
    }
}

/// Probe every adapter in `registry`'s fallback chain for `model`.
pub fn test_adapter_chain(registry: &TokenizerRegistry, model: &str) -> ChainReport {
    let chain = registry.fallback_chain();
    let mut results = Vec::with_capacity(chain.len());

    for name in &chain {
        let outcome = registry
            .construct(name, model, None)
            .and_then(|adapter| adapter.count_tokens(SAMPLE_TEXT));
        results.push(match outcome {
            Ok(count) => AdapterCheck {
                adapter: name.clone(),
                status: AdapterStatus::Success,
                tokens: Some(count.count),
                is_exact: Some(count.is_exact),
                tokenizer_id: Some(count.tokenizer_id),
                error: None,
                suggestions: Vec::new(),
            },
            Err(err) => failed_check(name, &err),
        });
    }

    let selected_adapter = results
        .iter()
        .find(|r| r.status == AdapterStatus::Success)
        .map(|r| r.adapter.clone());
    let recommendations = chain_recommendations(&results);

    ChainReport {
        model_name: model.to_string(),
        fallback_chain: chain,
        results,
        selected_adapter,
        recommendations,
    }
}

fn failed_check(name: &str, err: &TokenizerError) -> AdapterCheck {
    AdapterCheck {
        adapter: name.to_string(),
        status: AdapterStatus::Failed,
        tokens: None,
        is_exact: None,
        tokenizer_id: None,
        error: Some(err.to_string()),
        suggestions: err.recovery_suggestions(),
    }
}

fn chain_recommendations(results: &[AdapterCheck]) -> Vec<String> {
    let mut out = Vec::new();
    let failed = results
        .iter()
        .filter(|r| r.status == AdapterStatus::Failed)
        .count();

    match results.iter().find(|r| r.status == AdapterStatus::Success) {
        None => {
            out.push("All adapters in the fallback chain failed".to_string());
            out.push("Enable an exact tokenizer feature or add 'heuristic' to tokenizer.fallback_chain".to_string());
        }
        Some(first) if first.is_exact == Some(true) => {
            out.push(format!(
                "Fallback chain working: '{}' provides exact tokenization",
                first.adapter
            ));
        }
        Some(first) => {
            out.push(format!(
                "Fallback chain uses approximate tokenization via '{}'",
                first.adapter
            ));
            out.push(
                "Build with --features exact-tokenizers for exact token counts".to_string(),
            );
        }
    }

    if failed > 0 && failed < results.len() {
        out.push(format!("{} adapter(s) failed but fallback is working", failed));
    }
    out
}

/// Plain-text rendering of a [`ChainReport`].
pub fn render_report(report: &ChainReport) -> String {
    let mut lines = Vec::new();
    lines.push("Tokenizer Diagnostics".to_string());
    lines.push("=====================".to_string());
    lines.push(String::new());
    lines.push(format!("  Model:  {}", report.model_name));
    lines.push(format!("  Chain:  {}", report.fallback_chain.join(" -> ")));
    lines.push(String::new());

    for r in &report.results {
        match r.status {
            AdapterStatus::Success => {
                let exact = if r.is_exact == Some(true) { "exact" } else { "approximate" };
                lines.push(format!(
                    "  [ok]   {:<12} {} tokens ({}) {}",
                    r.adapter,
                    r.tokens.unwrap_or(0),
                    exact,
                    r.tokenizer_id.as_deref().unwrap_or("")
                ));
            }
            AdapterStatus::Failed => {
                lines.push(format!(
                    "  [fail] {:<12} {}",
                    r.adapter,
                    r.error.as_deref().unwrap_or("unknown error")
                ));
                for s in &r.suggestions {
                    lines.push(format!("           - {}", s));
                }
            }
        }
    }

    lines.push(String::new());
    match &report.selected_adapter {
        Some(name) => lines.push(format!("  Selected: {}", name)),
        None => lines.push("  Selected: none".to_string()),
    }
    if !report.recommendations.is_empty() {
        lines.push(String::new());
        lines.push("  Recommendations:".to_string());
        for rec in &report.recommendations {
            lines.push(format!("    {}", rec));
        }
    }
    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{AdapterConstructor, AdapterSettings};
    use crate::tokenizer::{Adapter, HEURISTIC};
    use std::sync::Arc;

    fn failing() -> AdapterConstructor {
        Arc::new(|model: &str, _: Option<usize>, _: &AdapterSettings| -> crate::error::Result<Adapter> {
            Err(TokenizerError::dependency_missing("libbroken", "broken", Some(model)))
        })
    }

    #[test]
    fn test_heuristic_only_chain() {
        let registry = TokenizerRegistry::new();
        registry.set_fallback_chain(vec![HEURISTIC.to_string()]).unwrap();
        let report = test_adapter_chain(&registry, "text-embedding-3-small");
        assert_eq!(report.results.len(), 1);
        assert_eq!(report.results[0].status, AdapterStatus::Success);
        assert_eq!(report.results[0].is_exact, Some(false));
        assert_eq!(report.selected_adapter.as_deref(), Some(HEURISTIC));
        assert!(report.recommendations[0].contains("approximate"));
    }

    #[test]
    fn test_failed_adapter_reported_with_suggestions() {
        let registry = TokenizerRegistry::new();
        registry.register("broken", failing());
        registry
            .set_fallback_chain(vec!["broken".to_string(), HEURISTIC.to_string()])
            .unwrap();
        let report = test_adapter_chain(&registry, "m");
        assert_eq!(report.results[0].status, AdapterStatus::Failed);
        assert!(report.results[0].error.is_some());
        assert!(!report.results[0].suggestions.is_empty());
        assert_eq!(report.selected().unwrap().adapter, HEURISTIC);
        assert!(report
            .recommendations
            .iter()
            .any(|r| r.contains("1 adapter(s) failed")));

        let text = render_report(&report);
        assert!(text.contains("[fail] broken"));
        assert!(text.contains("Selected: heuristic"));
    }

    #[test]
    fn test_all_failed() {
        let registry = TokenizerRegistry::new();
        registry.register("broken", failing());
        registry.set_fallback_chain(vec!["broken".to_string()]).unwrap();
        let report = test_adapter_chain(&registry, "m");
        assert!(report.selected_adapter.is_none());
        assert!(report.recommendations[0].contains("All adapters"));
    }
}
