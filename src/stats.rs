//! Cache, recovery and telemetry statistics.
//!
//! Used by `kano-chunk stats` after chunking a file, to show how the cache
//! performed and whether any tokenizer degraded along the way.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::cache::CacheStats;
use crate::pipeline::Pipeline;
use crate::recovery::{DegradationEvent, RecoveryStatistics};
use crate::telemetry::TelemetrySummary;

#[derive(Debug, Clone, Serialize)]
pub struct PipelineStats {
    pub chunks: usize,
    pub trimmed_chunks: usize,
    pub cache: Option<CacheStats>,
    pub recovery: RecoveryStatistics,
    pub last_degradation: Option<DegradationEvent>,
    pub telemetry: Option<TelemetrySummary>,
}

/// Snapshot `pipeline`'s counters after a run that produced `chunks` chunks.
pub fn collect_stats(pipeline: &Pipeline, chunks: usize, trimmed_chunks: usize) -> PipelineStats {
    PipelineStats {
        chunks,
        trimmed_chunks,
        cache: pipeline.cache_stats(),
        recovery: pipeline.recovery_statistics(),
        last_degradation: pipeline.recovery().degradation_history().pop(),
        telemetry: pipeline.telemetry_summary(),
    }
}

pub fn render_stats(stats: &PipelineStats) -> String {
    let mut out = Vec::new();
    out.push("Kano Chunk Stats".to_string());
    out.push("================".to_string());
    out.push(String::new());
    out.push(format!("  Chunks:      {}", stats.chunks));
    out.push(format!("  Trimmed:     {}", stats.trimmed_chunks));

    out.push(String::new());
    match &stats.cache {
        Some(c) => {
            out.push(format!("  Cache:       {} / {} entries", c.cache_size, c.max_size));
            out.push(format!(
                "  Hit rate:    {} ({} hits, {} misses)",
                format_percent(c.hit_rate),
                c.hits,
                c.misses
            ));
            out.push(format!("  Evictions:   {}", c.evictions));
        }
        None => out.push("  Cache:       disabled".to_string()),
    }

    let r = &stats.recovery;
    out.push(String::new());
    out.push(format!(
        "  Degradations: {} total, {} in the last hour",
        r.total_degradation_events, r.recent_degradation_events
    ));
    if let Some(adapter) = &r.most_problematic_adapter {
        out.push(format!("  Most problematic: {}", adapter));
    }
    if let Some(event) = &stats.last_degradation {
        out.push(format!(
            "  Last:        {} -> {} ({}, {})",
            event.from_adapter,
            event.to_adapter,
            event.model,
            format_relative(event.timestamp, Utc::now())
        ));
    }
    if !r.degradation_by_adapter.is_empty() {
        out.push(String::new());
        out.push(format!("  {:<16} {:>8} {:>8}", "ADAPTER", "TOTAL", "RECENT"));
        out.push(format!("  {}", "-".repeat(34)));
        for (adapter, d) in &r.degradation_by_adapter {
            out.push(format!(
                "  {:<16} {:>8} {:>8}",
                adapter, d.total_events, d.recent_events
            ));
        }
    }

    if let Some(t) = &stats.telemetry {
        out.push(String::new());
        out.push(format!(
            "  Telemetry:   {} operations, {} failed, {} fallback",
            t.total_operations, t.failed_operations, t.fallback_operations
        ));
    }

    out.join("\n")
}

fn format_percent(rate: f64) -> String {
    format!("{:.1}%", rate * 100.0)
}

/// "just now", "3 mins ago", ..., else an absolute timestamp.
fn format_relative(ts: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let delta = (now - ts).num_seconds();
    if delta < 0 {
        return ts.format("%Y-%m-%d %H:%M").to_string();
    }
    if delta < 60 {
        "just now".to_string()
    } else if delta < 3600 {
        let mins = delta / 60;
        format!("{} min{} ago", mins, if mins == 1 { "" } else { "s" })
    } else if delta < 86400 {
        let hours = delta / 3600;
        format!("{} hour{} ago", hours, if hours == 1 { "" } else { "s" })
    } else {
        ts.format("%Y-%m-%d %H:%M").to_string()
    }
}
