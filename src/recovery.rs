//! Failure tracking and fallback decisions for tokenizer adapters.
//!
//! [`ErrorRecoveryManager`] is shared by the registry and every resolved
//! tokenizer. It keeps three things behind one mutex:
//!
//! | State | Purpose |
//! |-------|---------|
//! | attempt counters | cap retries per `adapter:model` key |
//! | degradation history | bounded log of adapter substitutions |
//! | preference table | which adapter to try after a given one fails |
//!
//! Adapters with more than two degradations in the last five minutes are
//! considered problematic and skipped when choosing a fallback, as long as
//! an alternative exists.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use tracing::{debug, info};

use crate::error::TokenizerError;
use crate::tokenizer::{HEURISTIC, HUGGINGFACE, TIKTOKEN};

pub const DEFAULT_MAX_RECOVERY_ATTEMPTS: u32 = 3;
pub const DEFAULT_HISTORY_CAPACITY: usize = 100;

const PROBLEMATIC_WINDOW_SECS: i64 = 300;
const PROBLEMATIC_THRESHOLD: usize = 2;
const RECENT_WINDOW_SECS: i64 = 3600;
const ERROR_SUMMARY_CHARS: usize = 200;

/// One substitution of a less exact adapter after a failure.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DegradationEvent {
    pub from_adapter: String,
    pub to_adapter: String,
    pub model: String,
    pub error_summary: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RecommendedAction {
    InstallDependency,
    FixConfiguration,
    Fallback,
}

impl std::fmt::Display for RecommendedAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            RecommendedAction::InstallDependency => "install_dependency",
            RecommendedAction::FixConfiguration => "fix_configuration",
            RecommendedAction::Fallback => "fallback",
        };
        f.write_str(s)
    }
}

/// What to do about a failure, with a message fit for end users.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecoveryStrategy {
    pub recommended_action: RecommendedAction,
    pub fallback_adapter: Option<String>,
    pub user_message: String,
    pub technical_details: String,
    pub retry_recommended: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AdapterDegradation {
    pub total_events: usize,
    pub recent_events: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RecoveryStatistics {
    pub total_recovery_attempts: u64,
    pub active_recovery_keys: usize,
    pub total_degradation_events: usize,
    /// Events in the last hour.
    pub recent_degradation_events: usize,
    pub most_problematic_adapter: Option<String>,
    pub degradation_by_adapter: BTreeMap<String, AdapterDegradation>,
}

/// Snapshot attached to diagnostics when an adapter fails.
#[derive(Debug, Clone, Serialize)]
pub struct RecoveryContext {
    pub error_kind: String,
    pub error_message: String,
    pub adapter: String,
    pub model: String,
    pub timestamp: DateTime<Utc>,
    pub recovery_attempts: u32,
    /// Up to the last three degradations away from `adapter`.
    pub recent_degradations: Vec<DegradationEvent>,
}

#[derive(Default)]
struct State {
    attempts: HashMap<String, u32>,
    history: VecDeque<DegradationEvent>,
}

impl State {
    fn failures_since(&self, adapter: &str, since: DateTime<Utc>) -> usize {
        self.history
            .iter()
            .filter(|e| e.from_adapter == adapter && e.timestamp > since)
            .count()
    }

    fn total_failures(&self, adapter: &str) -> usize {
        self.history.iter().filter(|e| e.from_adapter == adapter).count()
    }
}

/// Shared recovery bookkeeping. Cheap to call from many threads.
pub struct ErrorRecoveryManager {
    state: Mutex<State>,
    max_attempts: u32,
    history_capacity: usize,
}

/// Preferred successors for a failed adapter; unknown adapters go to heuristic.
fn fallback_preferences(failed: &str) -> &'static [&'static str] {
    match failed {
        TIKTOKEN => &[HUGGINGFACE, HEURISTIC],
        HUGGINGFACE => &[TIKTOKEN, HEURISTIC],
        HEURISTIC => &[],
        _ => &[HEURISTIC],
    }
}

/// `adapter:model`, the key attempt counters are tracked under.
pub fn recovery_key(adapter: &str, model: &str) -> String {
    format!("{}:{}", adapter, model)
}

fn truncate_chars(s: &str, max: usize) -> String {
    match s.char_indices().nth(max) {
        Some((byte, _)) => s[..byte].to_string(),
        None => s.to_string(),
    }
}

impl ErrorRecoveryManager {
    pub fn new() -> Self {
        Self::with_limits(DEFAULT_MAX_RECOVERY_ATTEMPTS, DEFAULT_HISTORY_CAPACITY)
    }

    pub fn with_limits(max_attempts: u32, history_capacity: usize) -> Self {
        Self {
            state: Mutex::new(State::default()),
            max_attempts,
            history_capacity: history_capacity.max(1),
        }
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// True until `key` has used up its attempt budget.
    pub fn should_attempt_recovery(&self, key: &str) -> bool {
        let attempts = self.lock().attempts.get(key).copied().unwrap_or(0);
        attempts < self.max_attempts
    }

    pub fn record_recovery_attempt(&self, key: &str) {
        let mut state = self.lock();
        let n = state.attempts.entry(key.to_string()).or_insert(0);
        *n += 1;
        debug!("Recovery attempt {} for {}", n, key);
    }

    pub fn reset_recovery_attempts(&self, key: &str) {
        self.lock().attempts.remove(key);
    }

    pub fn recovery_attempts(&self, key: &str) -> u32 {
        self.lock().attempts.get(key).copied().unwrap_or(0)
    }

    /// Pick the next adapter to try after `failed` among `available`.
    ///
    /// Walks the preference table first, then any available adapter, in
    /// both cases skipping problematic ones. If every candidate is
    /// problematic the one with the fewest recorded failures wins.
    pub fn suggest_fallback_adapter(&self, failed: &str, available: &[String]) -> Option<String> {
        let state = self.lock();
        let since = Utc::now() - Duration::seconds(PROBLEMATIC_WINDOW_SECS);
        let is_problematic = |name: &str| state.failures_since(name, since) > PROBLEMATIC_THRESHOLD;

        let candidates: Vec<&String> = available.iter().filter(|a| a.as_str() != failed).collect();

        for preferred in fallback_preferences(failed) {
            if candidates.iter().any(|a| a.as_str() == *preferred) && !is_problematic(*preferred) {
                return Some(preferred.to_string());
            }
        }
        if let Some(a) = candidates.iter().find(|a| !is_problematic(a.as_str())) {
            return Some(a.to_string());
        }
        candidates
            .into_iter()
            .min_by_key(|a| state.total_failures(a.as_str()))
            .cloned()
    }

    /// Names of adapters with more than two failures in the last five minutes.
    pub fn problematic_adapters(&self) -> Vec<String> {
        let state = self.lock();
        let since = Utc::now() - Duration::seconds(PROBLEMATIC_WINDOW_SECS);
        let mut seen: Vec<String> = Vec::new();
        for e in &state.history {
            if !seen.contains(&e.from_adapter)
                && state.failures_since(&e.from_adapter, since) > PROBLEMATIC_THRESHOLD
            {
                seen.push(e.from_adapter.clone());
            }
        }
        seen
    }

    pub fn record_degradation_event(
        &self,
        from_adapter: &str,
        to_adapter: &str,
        model: &str,
        error: &TokenizerError,
    ) {
        let event = DegradationEvent {
            from_adapter: from_adapter.to_string(),
            to_adapter: to_adapter.to_string(),
            model: model.to_string(),
            error_summary: truncate_chars(
                &format!("{}: {}", error.kind(), error),
                ERROR_SUMMARY_CHARS,
            ),
            timestamp: Utc::now(),
        };
        info!(
            "Tokenizer degraded from {} to {} for model {}",
            from_adapter, to_adapter, model
        );
        let mut state = self.lock();
        state.history.push_back(event);
        while state.history.len() > self.history_capacity {
            state.history.pop_front();
        }
    }

    /// Degradation history, oldest first.
    pub fn degradation_history(&self) -> Vec<DegradationEvent> {
        self.lock().history.iter().cloned().collect()
    }

    pub fn get_recovery_statistics(&self) -> RecoveryStatistics {
        let state = self.lock();
        let recent_since = Utc::now() - Duration::seconds(RECENT_WINDOW_SECS);

        let mut by_adapter: BTreeMap<String, AdapterDegradation> = BTreeMap::new();
        for e in &state.history {
            let entry = by_adapter.entry(e.from_adapter.clone()).or_default();
            entry.total_events += 1;
            if e.timestamp > recent_since {
                entry.recent_events += 1;
            }
        }

        let recent: usize = by_adapter.values().map(|d| d.recent_events).sum();
        let most_problematic = by_adapter
            .iter()
            .filter(|(_, d)| d.recent_events > 0)
            .max_by_key(|(_, d)| d.recent_events)
            .map(|(name, _)| name.clone());

        RecoveryStatistics {
            total_recovery_attempts: state.attempts.values().map(|&n| n as u64).sum(),
            active_recovery_keys: state.attempts.len(),
            total_degradation_events: state.history.len(),
            recent_degradation_events: recent,
            most_problematic_adapter: most_problematic,
            degradation_by_adapter: by_adapter,
        }
    }

    pub fn create_recovery_context(
        &self,
        error: &TokenizerError,
        adapter: &str,
        model: &str,
    ) -> RecoveryContext {
        let state = self.lock();
        let mut recent: Vec<DegradationEvent> = state
            .history
            .iter()
            .rev()
            .filter(|e| e.from_adapter == adapter)
            .take(3)
            .cloned()
            .collect();
        recent.reverse();
        RecoveryContext {
            error_kind: error.kind().to_string(),
            error_message: error.to_string(),
            adapter: adapter.to_string(),
            model: model.to_string(),
            timestamp: Utc::now(),
            recovery_attempts: state
                .attempts
                .get(&recovery_key(adapter, model))
                .copied()
                .unwrap_or(0),
            recent_degradations: recent,
        }
    }

    /// Classify `error` and describe the remediation.
    pub fn suggest_recovery_strategy(
        &self,
        error: &TokenizerError,
        adapter: &str,
        _model: &str,
    ) -> RecoveryStrategy {
        match error {
            TokenizerError::DependencyMissing { dependency, .. } => {
                let install = error
                    .recovery_suggestions()
                    .into_iter()
                    .next()
                    .unwrap_or_else(|| format!("Provide '{}'", dependency));
                let fallback = fallback_preferences(adapter)
                    .first()
                    .copied()
                    .unwrap_or(HEURISTIC);
                RecoveryStrategy {
                    recommended_action: RecommendedAction::InstallDependency,
                    fallback_adapter: Some(fallback.to_string()),
                    user_message: format!(
                        "The {} adapter needs '{}', which is not available. {}",
                        adapter, dependency, install
                    ),
                    technical_details: format!("{} provides exact token counts", dependency),
                    retry_recommended: true,
                }
            }
            TokenizerError::Config { .. } | TokenizerError::AdapterNotAvailable { .. } => {
                RecoveryStrategy {
                    recommended_action: RecommendedAction::FixConfiguration,
                    fallback_adapter: Some(HEURISTIC.to_string()),
                    user_message:
                        "Configuration error detected. Check model name and adapter settings."
                            .to_string(),
                    technical_details: format!("Error: {}", truncate_chars(&error.to_string(), 100)),
                    retry_recommended: true,
                }
            }
            _ => RecoveryStrategy {
                recommended_action: RecommendedAction::Fallback,
                fallback_adapter: Some(HEURISTIC.to_string()),
                user_message: format!(
                    "Adapter {} failed. Using approximate tokenization.",
                    adapter
                ),
                technical_details: format!("Error type: {}", error.kind()),
                retry_recommended: false,
            },
        }
    }

    /// Forget all attempt counters and degradation history.
    pub fn clear(&self) {
        let mut state = self.lock();
        state.attempts.clear();
        state.history.clear();
    }
}

impl Default for ErrorRecoveryManager {
    fn default() -> Self {
        Self::new()
    }
}
