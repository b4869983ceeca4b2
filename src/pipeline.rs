//! Single entry point for the embedding pipeline.
//!
//! A [`Pipeline`] is built once from a [`Config`] and owns the shared state
//! every counting call goes through: the tokenizer registry, the token-count
//! cache, the recovery manager and the telemetry collector. It is `Send +
//! Sync`; batch indexers share one instance across worker threads.
//!
//! ```text
//! chunk_document(source_id, text)
//!   ├─ registry.resolve(adapter, model)   fallback chain, memoized
//!   ├─ chunk_text(...)                    normalize, boundaries, overlap
//!   └─ TokenBudgetManager::apply_budget   trim to effective max
//! ```

use std::sync::{Arc, OnceLock};

use tracing::debug;

use crate::budget::{budget_chunks, BudgetInfo, BudgetResult, TokenBudgetManager};
use crate::cache::{CacheStats, TokenCountCache};
use crate::config::Config;
use crate::error::Result;
use crate::models::{BudgetedChunk, ChunkingOptions, TokenCount};
use crate::recovery::{ErrorRecoveryManager, RecoveryStatistics};
use crate::registry::{ResolvedTokenizer, TokenizerRegistry};
use crate::telemetry::{NoopSink, TelemetryCollector, TelemetrySink, TelemetrySummary};
use crate::tokenizer::TokenizerAdapter;

pub struct Pipeline {
    config: Config,
    options: ChunkingOptions,
    registry: TokenizerRegistry,
    cache: Option<Arc<TokenCountCache>>,
    recovery: Arc<ErrorRecoveryManager>,
    telemetry: Option<Arc<TelemetryCollector>>,
}

impl Pipeline {
    pub fn from_config(config: Config) -> Result<Self> {
        config.validate()?;
        let options = config.chunking.to_options()?;

        let cache = config.cache.enabled.then(|| {
            Arc::new(TokenCountCache::with_ttl_seconds(
                config.cache.max_size,
                config.cache.ttl_seconds,
            ))
        });
        let recovery = Arc::new(ErrorRecoveryManager::new());
        let telemetry = config
            .telemetry
            .enabled
            .then(|| Arc::new(TelemetryCollector::new(config.telemetry.max_history)));
        let sink: Arc<dyn TelemetrySink> = match &telemetry {
            Some(collector) => Arc::clone(collector) as Arc<dyn TelemetrySink>,
            None => Arc::new(NoopSink),
        };

        let registry = TokenizerRegistry::new()
            .with_settings(config.tokenizer.adapter_settings())
            .with_cache(cache.clone())
            .with_recovery(Arc::clone(&recovery))
            .with_telemetry(sink);
        registry.set_fallback_chain(config.tokenizer.fallback_chain.clone())?;

        debug!(
            "Pipeline ready: adapter={} model={} chain={:?} cache={}",
            config.tokenizer.adapter,
            config.tokenizer.model,
            config.tokenizer.fallback_chain,
            cache.is_some()
        );

        Ok(Self {
            config,
            options,
            registry,
            cache,
            recovery,
            telemetry,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn options(&self) -> &ChunkingOptions {
        &self.options
    }

    pub fn registry(&self) -> &TokenizerRegistry {
        &self.registry
    }

    /// Tokenizer for the configured adapter and model, after fallback.
    pub fn tokenizer(&self) -> Result<Arc<ResolvedTokenizer>> {
        let t = &self.config.tokenizer;
        self.registry.resolve(&t.adapter, &t.model, t.max_tokens)
    }

    /// Chunk and budget one document.
    ///
    /// Errors only on invalid input (empty `source_id`) or when no adapter
    /// in the fallback chain can be constructed.
    pub fn chunk_document(&self, source_id: &str, text: &str) -> Result<Vec<BudgetedChunk>> {
        let tokenizer = self.tokenizer()?;
        let chunks = budget_chunks(
            source_id,
            text,
            &self.options,
            &*tokenizer,
            self.config.tokenizer.max_tokens,
        )?;
        debug!(
            "Chunked {} into {} chunks with {}",
            source_id,
            chunks.len(),
            tokenizer.adapter_id()
        );
        Ok(chunks)
    }

    pub fn count_tokens(&self, text: &str) -> Result<TokenCount> {
        Ok(self.tokenizer()?.count(text))
    }

    pub fn apply_budget(&self, text: &str) -> Result<BudgetResult> {
        self.budget_manager()?.apply_budget(text)
    }

    pub fn budget_info(&self) -> Result<BudgetInfo> {
        Ok(self.budget_manager()?.get_budget_info())
    }

    /// Budget against the tokenizer override, else the chunking max.
    fn budget_manager(&self) -> Result<TokenBudgetManager<Arc<ResolvedTokenizer>>> {
        let max = self.config.tokenizer.max_tokens.or(Some(self.options.max_tokens));
        TokenBudgetManager::new(self.tokenizer()?, max)
    }

    pub fn cache_stats(&self) -> Option<CacheStats> {
        self.cache.as_ref().map(|c| c.stats())
    }

    pub fn recovery_statistics(&self) -> RecoveryStatistics {
        self.recovery.get_recovery_statistics()
    }

    pub fn recovery(&self) -> &Arc<ErrorRecoveryManager> {
        &self.recovery
    }

    pub fn telemetry(&self) -> Option<&Arc<TelemetryCollector>> {
        self.telemetry.as_ref()
    }

    pub fn telemetry_summary(&self) -> Option<TelemetrySummary> {
        self.telemetry.as_ref().map(|t| t.summary())
    }
}

static DEFAULT_PIPELINE: OnceLock<Pipeline> = OnceLock::new();

/// Process-wide pipeline built from [`Config::default`] on first use.
pub fn default_pipeline() -> Result<&'static Pipeline> {
    if let Some(p) = DEFAULT_PIPELINE.get() {
        return Ok(p);
    }
    let pipeline = Pipeline::from_config(Config::default())?;
    Ok(DEFAULT_PIPELINE.get_or_init(|| pipeline))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TokenizerError;
    use crate::tokenizer::HEURISTIC;

    fn heuristic_config() -> Config {
        let mut config = Config::default();
        config.tokenizer.adapter = HEURISTIC.to_string();
        config.tokenizer.fallback_chain = vec![HEURISTIC.to_string()];
        config.chunking.target_tokens = 20;
        config.chunking.max_tokens = 40;
        config.chunking.overlap_tokens = 4;
        config
    }

    fn document() -> String {
        (0..30)
            .map(|i| format!("Sentence number {} talks about the backlog item.", i))
            .collect::<Vec<_>>()
            .join(" ")
    }

    #[test]
    fn test_chunk_document_is_deterministic() {
        let pipeline = Pipeline::from_config(heuristic_config()).unwrap();
        let a = pipeline.chunk_document("doc-1", &document()).unwrap();
        let b = pipeline.chunk_document("doc-1", &document()).unwrap();
        assert!(a.len() > 1);
        assert_eq!(a, b);
        for c in &a {
            assert!(c.chunk_id.starts_with("doc-1:chunk-v1:"));
            assert!(c.token_count.count <= c.target_budget);
        }
    }

    #[test]
    fn test_cache_is_shared_across_calls() {
        let pipeline = Pipeline::from_config(heuristic_config()).unwrap();
        pipeline.count_tokens("hello world").unwrap();
        pipeline.count_tokens("hello world").unwrap();
        let stats = pipeline.cache_stats().unwrap();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
    }

    #[test]
    fn test_cache_disabled() {
        let mut config = heuristic_config();
        config.cache.enabled = false;
        let pipeline = Pipeline::from_config(config).unwrap();
        pipeline.count_tokens("hello").unwrap();
        assert!(pipeline.cache_stats().is_none());
    }

    #[test]
    fn test_telemetry_records_counts() {
        let mut config = heuristic_config();
        config.telemetry.enabled = true;
        config.cache.enabled = false;
        let pipeline = Pipeline::from_config(config).unwrap();
        pipeline.count_tokens("one").unwrap();
        pipeline.count_tokens("two").unwrap();
        let summary = pipeline.telemetry_summary().unwrap();
        assert_eq!(summary.total_operations, 2);
        assert_eq!(summary.failed_operations, 0);
    }

    #[test]
    fn test_empty_source_id_rejected() {
        let pipeline = Pipeline::from_config(heuristic_config()).unwrap();
        let err = pipeline.chunk_document("", "text").unwrap_err();
        assert!(matches!(err, TokenizerError::Config { .. }));
    }

    #[test]
    fn test_invalid_config_rejected() {
        let mut config = heuristic_config();
        config.chunking.overlap_tokens = 40;
        assert!(Pipeline::from_config(config).is_err());
    }

    #[test]
    fn test_budget_info_uses_override() {
        let mut config = heuristic_config();
        config.tokenizer.max_tokens = Some(512);
        let pipeline = Pipeline::from_config(config).unwrap();
        let info = pipeline.budget_info().unwrap();
        assert_eq!(info.max_tokens, 512);
        assert_eq!(info.safety_margin, 51);
        assert_eq!(info.effective_max, 461);
    }

    #[test]
    fn test_budget_defaults_to_chunking_max() {
        let mut config = Config::default();
        config.tokenizer.adapter = HEURISTIC.to_string();
        config.tokenizer.fallback_chain = vec![HEURISTIC.to_string()];
        let pipeline = Pipeline::from_config(config).unwrap();

        let chunks = pipeline.chunk_document("doc", &document()).unwrap();
        assert_eq!(chunks[0].safety_margin, 51);
        assert_eq!(chunks[0].target_budget, 461);

        let info = pipeline.budget_info().unwrap();
        assert_eq!(info.max_tokens, 512);
        assert_eq!(info.effective_max, 461);
    }

    #[test]
    fn test_default_pipeline_is_singleton() {
        let a = default_pipeline().unwrap();
        let b = default_pipeline().unwrap();
        assert!(std::ptr::eq(a, b));
        let chunks = a.chunk_document("readme", "Short text.").unwrap();
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].text, "Short text.");
    }
}
