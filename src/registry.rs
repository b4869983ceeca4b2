//! Tokenizer registry: name → constructor, with an ordered fallback chain.
//!
//! [`TokenizerRegistry::resolve`] builds the requested adapter and, when
//! construction fails, walks the configured fallback chain with the help of
//! the [`ErrorRecoveryManager`]:
//!
//! ```text
//! requested ──fail──► suggest_fallback_adapter ──► next ──fail──► ... ──► FallbackChainExhausted
//!     │                                             │
//!     └──ok──► ResolvedTokenizer ◄──────────ok──────┘
//! ```
//!
//! The returned [`ResolvedTokenizer`] hides the substitution: it counts
//! through the shared [`TokenCountCache`] and telemetry sink, and if the
//! adapter fails on a particular text it degrades to the heuristic counter
//! and records a degradation event instead of returning an error.
//!
//! Adapter construction is memoized per `(adapter, model, max_tokens)`.
//! The memo map lock is released before a constructor runs; concurrent
//! resolvers of the same key wait on that key's slot only.
//!
//! Successful resolutions are memoized too, keyed by the requested adapter.
//! Repeated `resolve` calls hand out the same [`ResolvedTokenizer`], so a
//! fallback is walked (and its degradation recorded) once per key until
//! [`TokenizerRegistry::register`], [`TokenizerRegistry::set_fallback_chain`]
//! or [`TokenizerRegistry::clear`] drops the memo.

use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::{debug, info, warn};

use crate::cache::{CacheKey, TokenCountCache};
use crate::error::{Result, TokenizerError};
use crate::models::TokenCount;
use crate::recovery::{recovery_key, ErrorRecoveryManager, RecoveryStatistics};
use crate::telemetry::{track_operation, NoopSink, TelemetrySink};
use crate::tokenizer::{
    Adapter, HeuristicTokenizer, HuggingFaceAdapter, TiktokenAdapter, TokenSpan,
    TokenizerAdapter, DEFAULT_CHARS_PER_TOKEN, HEURISTIC, HUGGINGFACE, TIKTOKEN,
};

/// Adapter name that resolves to the head of the fallback chain.
pub const AUTO: &str = "auto";

/// Per-adapter options read by the built-in constructors.
#[derive(Debug, Clone, PartialEq)]
pub struct AdapterSettings {
    pub chars_per_token: f64,
    pub tiktoken_encoding: Option<String>,
    pub tokenizer_path: Option<PathBuf>,
}

impl Default for AdapterSettings {
    fn default() -> Self {
        Self {
            chars_per_token: DEFAULT_CHARS_PER_TOKEN,
            tiktoken_encoding: None,
            tokenizer_path: None,
        }
    }
}

/// Builds an adapter for `(model, max_tokens)`.
pub type AdapterConstructor =
    Arc<dyn Fn(&str, Option<usize>, &AdapterSettings) -> Result<Adapter> + Send + Sync>;

pub fn default_fallback_chain() -> Vec<String> {
    vec![TIKTOKEN.to_string(), HUGGINGFACE.to_string(), HEURISTIC.to_string()]
}

fn builtin_constructors() -> BTreeMap<String, AdapterConstructor> {
    let mut map: BTreeMap<String, AdapterConstructor> = BTreeMap::new();
    map.insert(
        HEURISTIC.to_string(),
        Arc::new(|model: &str, max: Option<usize>, s: &AdapterSettings| {
            HeuristicTokenizer::new(model, max, s.chars_per_token).map(Adapter::Heuristic)
        }),
    );
    map.insert(
        TIKTOKEN.to_string(),
        Arc::new(|model: &str, max: Option<usize>, s: &AdapterSettings| {
            TiktokenAdapter::new(model, max, s.tiktoken_encoding.as_deref())
                .map(|a| Adapter::Tiktoken(Arc::new(a)))
        }),
    );
    map.insert(
        HUGGINGFACE.to_string(),
        Arc::new(|model: &str, max: Option<usize>, s: &AdapterSettings| {
            HuggingFaceAdapter::new(model, max, s.tokenizer_path.as_deref())
                .map(|a| Adapter::HuggingFace(Arc::new(a)))
        }),
    );
    map
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

type MemoKey = (String, String, Option<usize>);
type MemoSlot = Arc<Mutex<Option<Result<Adapter>>>>;

// ═══════════════════════════════════════════════════════════════════════
// Registry
// ═══════════════════════════════════════════════════════════════════════

pub struct TokenizerRegistry {
    constructors: Mutex<BTreeMap<String, AdapterConstructor>>,
    fallback_chain: Mutex<Vec<String>>,
    settings: AdapterSettings,
    memo: Mutex<HashMap<MemoKey, MemoSlot>>,
    resolved: Mutex<HashMap<MemoKey, Arc<ResolvedTokenizer>>>,
    recovery: Arc<ErrorRecoveryManager>,
    cache: Option<Arc<TokenCountCache>>,
    telemetry: Arc<dyn TelemetrySink>,
}

impl TokenizerRegistry {
    /// Registry with the built-in adapters, default chain, no cache and no telemetry.
    pub fn new() -> Self {
        Self {
            constructors: Mutex::new(builtin_constructors()),
            fallback_chain: Mutex::new(default_fallback_chain()),
            settings: AdapterSettings::default(),
            memo: Mutex::new(HashMap::new()),
            resolved: Mutex::new(HashMap::new()),
            recovery: Arc::new(ErrorRecoveryManager::new()),
            cache: None,
            telemetry: Arc::new(NoopSink),
        }
    }

    pub fn with_settings(mut self, settings: AdapterSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn with_cache(mut self, cache: Option<Arc<TokenCountCache>>) -> Self {
        self.cache = cache;
        self
    }

    pub fn with_recovery(mut self, recovery: Arc<ErrorRecoveryManager>) -> Self {
        self.recovery = recovery;
        self
    }

    pub fn with_telemetry(mut self, telemetry: Arc<dyn TelemetrySink>) -> Self {
        self.telemetry = telemetry;
        self
    }

    /// Register or replace the constructor for `name`.
    ///
    /// Memoized adapters are dropped so the new constructor takes effect.
    pub fn register(&self, name: &str, constructor: AdapterConstructor) {
        lock(&self.constructors).insert(name.to_string(), constructor);
        self.clear();
        debug!("Registered tokenizer adapter '{}'", name);
    }

    /// Replace the fallback chain. Every entry must be a registered adapter.
    pub fn set_fallback_chain(&self, chain: Vec<String>) -> Result<()> {
        if chain.is_empty() {
            return Err(TokenizerError::config(
                "fallback_chain",
                "fallback chain must not be empty",
            ));
        }
        {
            let constructors = lock(&self.constructors);
            if let Some(unknown) = chain.iter().find(|n| !constructors.contains_key(n.as_str())) {
                return Err(TokenizerError::config(
                    "fallback_chain",
                    format!("unknown adapter '{}' in fallback chain", unknown),
                ));
            }
        }
        *lock(&self.fallback_chain) = chain;
        lock(&self.resolved).clear();
        Ok(())
    }

    pub fn fallback_chain(&self) -> Vec<String> {
        lock(&self.fallback_chain).clone()
    }

    /// Registered adapter names, sorted.
    pub fn available_adapters(&self) -> Vec<String> {
        lock(&self.constructors).keys().cloned().collect()
    }

    pub fn settings(&self) -> &AdapterSettings {
        &self.settings
    }

    pub fn recovery(&self) -> &Arc<ErrorRecoveryManager> {
        &self.recovery
    }

    pub fn cache(&self) -> Option<&Arc<TokenCountCache>> {
        self.cache.as_ref()
    }

    pub fn get_recovery_statistics(&self) -> RecoveryStatistics {
        self.recovery.get_recovery_statistics()
    }

    /// Drop memoized adapters and resolutions. Recovery state and cache are
    /// left alone.
    pub fn clear(&self) {
        lock(&self.memo).clear();
        lock(&self.resolved).clear();
    }

    /// Build (or fetch the memoized) adapter `name` without any fallback.
    pub fn construct(&self, name: &str, model: &str, max_tokens: Option<usize>) -> Result<Adapter> {
        let slot: MemoSlot = {
            let mut memo = lock(&self.memo);
            memo.entry((name.to_string(), model.to_string(), max_tokens))
                .or_default()
                .clone()
        };
        let mut guard = lock(&slot);
        if let Some(done) = guard.as_ref() {
            return done.clone();
        }

        let constructor = lock(&self.constructors).get(name).cloned();
        let built = match constructor {
            Some(ctor) => ctor(model, max_tokens, &self.settings),
            None => Err(TokenizerError::AdapterNotAvailable {
                adapter: name.to_string(),
                reason: "no constructor registered".to_string(),
            }),
        };
        match &built {
            Ok(_) => debug!("Constructed tokenizer adapter {} for model {}", name, model),
            Err(e) => debug!("Failed to construct {} for model {}: {}", name, model, e),
        }
        *guard = Some(built.clone());
        built
    }

    /// Resolve `adapter_name` (or [`AUTO`]) for `model`, falling back along the chain.
    ///
    /// Fails only with [`TokenizerError::Config`] (empty model),
    /// [`TokenizerError::AdapterNotAvailable`] (unknown requested name) or
    /// [`TokenizerError::FallbackChainExhausted`].
    pub fn resolve(
        &self,
        adapter_name: &str,
        model: &str,
        max_tokens: Option<usize>,
    ) -> Result<Arc<ResolvedTokenizer>> {
        if model.trim().is_empty() {
            return Err(TokenizerError::config("model", "model_name must be non-empty"));
        }
        if max_tokens == Some(0) {
            return Err(TokenizerError::config("max_tokens", "must be positive"));
        }

        let chain = self.fallback_chain();
        let registered = self.available_adapters();
        let requested = if adapter_name.eq_ignore_ascii_case(AUTO) {
            chain.first().cloned().unwrap_or_else(|| HEURISTIC.to_string())
        } else {
            let name = adapter_name.to_lowercase();
            if !registered.contains(&name) {
                return Err(TokenizerError::AdapterNotAvailable {
                    adapter: adapter_name.to_string(),
                    reason: format!("registered adapters: {}", registered.join(", ")),
                });
            }
            name
        };

        let memo_key: MemoKey = (requested.clone(), model.to_string(), max_tokens);
        if let Some(hit) = lock(&self.resolved).get(&memo_key) {
            return Ok(Arc::clone(hit));
        }

        let key = recovery_key(&requested, model);
        let mut attempted: Vec<String> = Vec::new();
        let mut errors: Vec<String> = Vec::new();
        let mut current = requested.clone();

        loop {
            match self.construct(&current, model, max_tokens) {
                Ok(adapter) => {
                    if current != requested {
                        self.recovery.reset_recovery_attempts(&key);
                        info!(
                            "Resolved tokenizer {} for model {} (requested {})",
                            current, model, requested
                        );
                    } else {
                        debug!("Resolved tokenizer {} for model {}", current, model);
                    }
                    let fallback_from = (current != requested).then(|| requested.clone());
                    let resolved = Arc::new(ResolvedTokenizer::new(
                        adapter,
                        fallback_from,
                        &self.settings,
                        max_tokens,
                        Arc::clone(&self.recovery),
                        self.cache.clone(),
                        Arc::clone(&self.telemetry),
                    )?);
                    // A racing resolver may have won; keep the first entry.
                    let mut memo = lock(&self.resolved);
                    return Ok(Arc::clone(memo.entry(memo_key).or_insert(resolved)));
                }
                Err(err) => {
                    attempted.push(current.clone());
                    errors.push(format!("{}: {}", current, err));

                    if !self.recovery.should_attempt_recovery(&key) {
                        warn!("Recovery attempts exhausted for {}", key);
                        break;
                    }
                    self.recovery.record_recovery_attempt(&key);

                    let remaining: Vec<String> = chain
                        .iter()
                        .filter(|n| !attempted.contains(n) && registered.contains(n))
                        .cloned()
                        .collect();
                    let Some(next) = self.recovery.suggest_fallback_adapter(&current, &remaining)
                    else {
                        break;
                    };
                    warn!("{}", self.create_user_notification(&current, &next, &err));
                    self.recovery.record_degradation_event(&current, &next, model, &err);
                    current = next;
                }
            }
        }

        // The next resolve walks the whole chain again.
        self.recovery.reset_recovery_attempts(&key);
        Err(TokenizerError::FallbackChainExhausted {
            attempted_adapters: attempted,
            errors,
            model: model.to_string(),
        })
    }

    /// One-paragraph notice explaining a substitution to the user.
    pub fn create_user_notification(
        &self,
        failed: &str,
        fallback: &str,
        error: &TokenizerError,
    ) -> String {
        let strategy = self.recovery.suggest_recovery_strategy(error, failed, "");
        let accuracy = if fallback == HEURISTIC {
            "Token counts are approximate."
        } else {
            "Token counts remain exact."
        };
        format!(
            "Tokenizer '{}' is unavailable, using '{}' instead. {} {}",
            failed, fallback, accuracy, strategy.user_message
        )
    }
}

impl Default for TokenizerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Resolved tokenizer
// ═══════════════════════════════════════════════════════════════════════

/// An adapter chosen by the registry, plus the shared state it counts through.
pub struct ResolvedTokenizer {
    adapter: Adapter,
    tokenizer_id: String,
    fallback_from: Option<String>,
    heuristic: HeuristicTokenizer,
    recovery: Arc<ErrorRecoveryManager>,
    cache: Option<Arc<TokenCountCache>>,
    telemetry: Arc<dyn TelemetrySink>,
}

impl ResolvedTokenizer {
    fn new(
        adapter: Adapter,
        fallback_from: Option<String>,
        settings: &AdapterSettings,
        max_tokens: Option<usize>,
        recovery: Arc<ErrorRecoveryManager>,
        cache: Option<Arc<TokenCountCache>>,
        telemetry: Arc<dyn TelemetrySink>,
    ) -> Result<Self> {
        let heuristic =
            HeuristicTokenizer::new(adapter.model_name(), max_tokens, settings.chars_per_token)?;
        Ok(Self {
            tokenizer_id: adapter.tokenizer_id(),
            adapter,
            fallback_from,
            heuristic,
            recovery,
            cache,
            telemetry,
        })
    }

    /// Wrap an adapter directly, bypassing the registry. Used by tests and
    /// callers that bring their own counter.
    pub fn standalone(adapter: Adapter) -> Result<Self> {
        let max = Some(adapter.max_tokens());
        Self::new(
            adapter,
            None,
            &AdapterSettings::default(),
            max,
            Arc::new(ErrorRecoveryManager::new()),
            None,
            Arc::new(NoopSink),
        )
    }

    pub fn adapter(&self) -> &Adapter {
        &self.adapter
    }

    pub fn is_exact(&self) -> bool {
        self.adapter.is_exact()
    }

    /// Requested adapter this one stands in for, if any.
    pub fn fallback_from(&self) -> Option<&str> {
        self.fallback_from.as_deref()
    }

    /// Count `text`; never fails.
    ///
    /// Served from the cache when possible. An adapter failure is recorded
    /// and answered with a heuristic estimate, which is not cached.
    pub fn count(&self, text: &str) -> TokenCount {
        let adapter_id = self.adapter.adapter_id();
        let model = self.adapter.model_name();

        let key = self
            .cache
            .as_ref()
            .map(|_| CacheKey::new(text, adapter_id, model));
        if let (Some(cache), Some(key)) = (self.cache.as_ref(), key.as_ref()) {
            if let Some(hit) = cache.get(key) {
                return hit;
            }
        }

        let mut tracker =
            track_operation(self.telemetry.as_ref(), adapter_id, &self.tokenizer_id, model, text);
        if let Some(from) = &self.fallback_from {
            tracker.mark_fallback(from);
        }

        match self.adapter.count_tokens(text) {
            Ok(count) => {
                tracker.set_result(&count);
                if let (Some(cache), Some(key)) = (self.cache.as_ref(), key) {
                    cache.put(key, count.clone());
                }
                count
            }
            Err(err) => {
                tracker.set_error(&err);
                warn!(
                    "Tokenizer {} failed for model {}, using heuristic estimate: {}",
                    adapter_id, model, err
                );
                self.recovery
                    .record_degradation_event(adapter_id, HEURISTIC, model, &err);
                self.heuristic.estimate(text)
            }
        }
    }
}

impl std::fmt::Debug for ResolvedTokenizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResolvedTokenizer")
            .field("adapter", &self.adapter)
            .field("fallback_from", &self.fallback_from)
            .field("cached", &self.cache.is_some())
            .finish()
    }
}

impl TokenizerAdapter for ResolvedTokenizer {
    fn adapter_id(&self) -> &str {
        self.adapter.adapter_id()
    }

    fn model_name(&self) -> &str {
        self.adapter.model_name()
    }

    fn count_tokens(&self, text: &str) -> Result<TokenCount> {
        Ok(self.count(text))
    }

    fn max_tokens(&self) -> usize {
        self.adapter.max_tokens()
    }

    fn tokenizer_id(&self) -> String {
        self.tokenizer_id.clone()
    }

    fn token_spans(&self, text: &str) -> Vec<TokenSpan> {
        self.adapter.token_spans(text)
    }
}
