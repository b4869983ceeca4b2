//! Optional telemetry for token counting.
//!
//! Counting code wraps each adapter call in [`track_operation`], which
//! returns an RAII [`OperationTracker`]. When the tracker is dropped it
//! emits one [`TokenizationTelemetry`] record to the attached
//! [`TelemetrySink`]. With [`NoopSink`] nothing is timed or recorded.
//!
//! [`TelemetryCollector`] is the in-memory sink: a bounded history plus
//! running per-adapter usage statistics, exportable as JSON.

use std::collections::{BTreeMap, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::debug;

use crate::error::TokenizerError;
use crate::models::TokenCount;

pub const DEFAULT_MAX_HISTORY: usize = 10_000;

const PREVIEW_CHARS: usize = 100;
const ERROR_MESSAGE_CHARS: usize = 200;

/// One tracked counting operation.
#[derive(Debug, Clone, Serialize)]
pub struct TokenizationTelemetry {
    /// Assigned by the collector, in recording order.
    pub operation_id: u64,
    pub timestamp: DateTime<Utc>,
    pub adapter_name: String,
    pub adapter_id: String,
    pub model_name: String,
    pub text_length: usize,
    pub text_preview: String,
    pub token_count: Option<TokenCount>,
    pub processing_time_ms: f64,
    pub was_fallback: bool,
    pub fallback_from: Option<String>,
    pub error_occurred: bool,
    pub error_type: Option<String>,
    pub error_message: Option<String>,
}

/// Running usage statistics for one adapter.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AdapterUsageStats {
    pub adapter_name: String,
    pub total_operations: u64,
    pub successful_operations: u64,
    pub failed_operations: u64,
    pub fallback_operations: u64,
    pub total_tokens_processed: u64,
    pub total_text_length: u64,
    pub total_processing_time_ms: f64,
    pub avg_processing_time_ms: f64,
    pub avg_tokens_per_operation: f64,
    pub avg_text_length: f64,
    pub success_rate: f64,
    pub fallback_rate: f64,
    pub first_seen: Option<DateTime<Utc>>,
    pub last_seen: Option<DateTime<Utc>>,
}

impl AdapterUsageStats {
    fn new(adapter_name: &str) -> Self {
        Self {
            adapter_name: adapter_name.to_string(),
            ..Default::default()
        }
    }

    fn update(&mut self, t: &TokenizationTelemetry) {
        if self.first_seen.is_none() {
            self.first_seen = Some(t.timestamp);
        }
        self.last_seen = Some(t.timestamp);
        self.total_operations += 1;

        if t.error_occurred {
            self.failed_operations += 1;
        } else {
            self.successful_operations += 1;
            self.total_tokens_processed += t.token_count.as_ref().map_or(0, |c| c.count as u64);
            self.total_text_length += t.text_length as u64;
            self.total_processing_time_ms += t.processing_time_ms;
        }
        if t.was_fallback {
            self.fallback_operations += 1;
        }

        if self.successful_operations > 0 {
            let n = self.successful_operations as f64;
            self.avg_processing_time_ms = self.total_processing_time_ms / n;
            self.avg_tokens_per_operation = self.total_tokens_processed as f64 / n;
            self.avg_text_length = self.total_text_length as f64 / n;
        }
        let total = self.total_operations as f64;
        self.success_rate = self.successful_operations as f64 / total;
        self.fallback_rate = self.fallback_operations as f64 / total;
    }
}

/// Destination for telemetry records.
pub trait TelemetrySink: Send + Sync {
    fn record_operation(&self, telemetry: TokenizationTelemetry);

    /// Disabled sinks are skipped entirely by [`track_operation`].
    fn is_enabled(&self) -> bool {
        true
    }
}

/// Sink used when no collector is attached.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopSink;

impl TelemetrySink for NoopSink {
    fn record_operation(&self, _telemetry: TokenizationTelemetry) {}

    fn is_enabled(&self) -> bool {
        false
    }
}

/// Aggregate view over everything a collector has seen.
#[derive(Debug, Clone, Serialize)]
pub struct TelemetrySummary {
    pub total_operations: u64,
    pub failed_operations: u64,
    pub fallback_operations: u64,
    pub history_len: usize,
    pub adapters: BTreeMap<String, AdapterUsageStats>,
}

#[derive(Serialize)]
struct TelemetryExport<'a> {
    exported_at: DateTime<Utc>,
    summary: &'a TelemetrySummary,
    history: &'a [TokenizationTelemetry],
}

struct CollectorState {
    history: VecDeque<TokenizationTelemetry>,
    stats: BTreeMap<String, AdapterUsageStats>,
    next_id: u64,
}

/// In-memory sink with bounded history.
pub struct TelemetryCollector {
    state: Mutex<CollectorState>,
    max_history: usize,
}

impl TelemetryCollector {
    pub fn new(max_history: usize) -> Self {
        Self {
            state: Mutex::new(CollectorState {
                history: VecDeque::new(),
                stats: BTreeMap::new(),
                next_id: 1,
            }),
            max_history: max_history.max(1),
        }
    }

    fn lock(&self) -> MutexGuard<'_, CollectorState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Usage statistics for one adapter; zeroed if it was never seen.
    pub fn adapter_stats(&self, adapter_name: &str) -> AdapterUsageStats {
        self.lock()
            .stats
            .get(adapter_name)
            .cloned()
            .unwrap_or_else(|| AdapterUsageStats::new(adapter_name))
    }

    pub fn all_adapter_stats(&self) -> BTreeMap<String, AdapterUsageStats> {
        self.lock().stats.clone()
    }

    /// The most recent `limit` records, oldest first.
    pub fn recent(&self, limit: usize) -> Vec<TokenizationTelemetry> {
        let state = self.lock();
        let skip = state.history.len().saturating_sub(limit);
        state.history.iter().skip(skip).cloned().collect()
    }

    pub fn summary(&self) -> TelemetrySummary {
        let state = self.lock();
        TelemetrySummary {
            total_operations: state.stats.values().map(|s| s.total_operations).sum(),
            failed_operations: state.stats.values().map(|s| s.failed_operations).sum(),
            fallback_operations: state.stats.values().map(|s| s.fallback_operations).sum(),
            history_len: state.history.len(),
            adapters: state.stats.clone(),
        }
    }

    /// Summary plus full history as pretty JSON.
    pub fn export_json(&self) -> serde_json::Result<String> {
        let summary = self.summary();
        let history = self.recent(usize::MAX);
        serde_json::to_string_pretty(&TelemetryExport {
            exported_at: Utc::now(),
            summary: &summary,
            history: &history,
        })
    }

    pub fn clear(&self) {
        let mut state = self.lock();
        state.history.clear();
        state.stats.clear();
    }
}

impl Default for TelemetryCollector {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_HISTORY)
    }
}

impl TelemetrySink for TelemetryCollector {
    fn record_operation(&self, mut telemetry: TokenizationTelemetry) {
        let mut state = self.lock();
        telemetry.operation_id = state.next_id;
        state.next_id += 1;
        state
            .stats
            .entry(telemetry.adapter_name.clone())
            .or_insert_with(|| AdapterUsageStats::new(&telemetry.adapter_name))
            .update(&telemetry);
        debug!("Recorded telemetry for operation {}", telemetry.operation_id);
        state.history.push_back(telemetry);
        while state.history.len() > self.max_history {
            state.history.pop_front();
        }
    }
}

fn preview(text: &str, max: usize) -> String {
    text.chars().take(max).collect()
}

/// Start timing one counting call. The record is emitted when the returned
/// tracker is dropped.
pub fn track_operation<'a>(
    sink: &'a dyn TelemetrySink,
    adapter_name: &str,
    adapter_id: &str,
    model_name: &str,
    text: &str,
) -> OperationTracker<'a> {
    if !sink.is_enabled() {
        return OperationTracker {
            sink: None,
            started: Instant::now(),
            record: None,
        };
    }
    OperationTracker {
        sink: Some(sink),
        started: Instant::now(),
        record: Some(TokenizationTelemetry {
            operation_id: 0,
            timestamp: Utc::now(),
            adapter_name: adapter_name.to_string(),
            adapter_id: adapter_id.to_string(),
            model_name: model_name.to_string(),
            text_length: text.chars().count(),
            text_preview: preview(text, PREVIEW_CHARS),
            token_count: None,
            processing_time_ms: 0.0,
            was_fallback: false,
            fallback_from: None,
            error_occurred: false,
            error_type: None,
            error_message: None,
        }),
    }
}

/// Scoped handle returned by [`track_operation`].
pub struct OperationTracker<'a> {
    sink: Option<&'a dyn TelemetrySink>,
    started: Instant,
    record: Option<TokenizationTelemetry>,
}

impl OperationTracker<'_> {
    pub fn set_result(&mut self, count: &TokenCount) {
        if let Some(r) = self.record.as_mut() {
            r.token_count = Some(count.clone());
        }
    }

    pub fn set_error(&mut self, error: &TokenizerError) {
        if let Some(r) = self.record.as_mut() {
            r.error_occurred = true;
            r.error_type = Some(error.kind().to_string());
            r.error_message = Some(preview(&error.to_string(), ERROR_MESSAGE_CHARS));
        }
    }

    /// Mark this operation as served by a substitute for `from_adapter`.
    pub fn mark_fallback(&mut self, from_adapter: &str) {
        if let Some(r) = self.record.as_mut() {
            r.was_fallback = true;
            r.fallback_from = Some(from_adapter.to_string());
        }
    }
}

impl Drop for OperationTracker<'_> {
    fn drop(&mut self) {
        if let (Some(sink), Some(mut record)) = (self.sink, self.record.take()) {
            record.processing_time_ms = self.started.elapsed().as_secs_f64() * 1000.0;
            if record.token_count.is_none() && !record.error_occurred {
                record.error_occurred = true;
                record.error_type = Some("incomplete".to_string());
            }
            sink.record_operation(record);
        }
    }
}
