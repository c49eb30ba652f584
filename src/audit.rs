//! Structured events for the external audit/metrics sink.
//!
//! The engine only emits [`GraphEvent`]s; storing or aggregating them is the
//! sink's job. [`TracingSink`] writes each event as one JSON log line on the
//! `chronicle::metrics` target.

use std::sync::Mutex;

use serde::Serialize;

/// One observable event.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum GraphEvent {
    RebuildCompleted {
        org_id: String,
        artifacts: u64,
        nodes_created: u64,
        edges_created: u64,
        edges_updated: u64,
        heuristic_failures: u64,
        duration_ms: u64,
    },
    /// A rebuild stopped between batches; only `batches` were merged.
    RebuildCancelled {
        org_id: String,
        artifacts: u64,
        batches: u64,
        edges_created: u64,
        duration_ms: u64,
    },
    QueryServed {
        org_id: String,
        operation: &'static str,
        nodes: usize,
        edges: usize,
        cache_hit: bool,
        degraded: bool,
        duration_ms: u64,
    },
    SecurityViolation {
        org_id: String,
        operation: &'static str,
        detail: String,
    },
    HeuristicFailed {
        org_id: String,
        heuristic: &'static str,
        foreign_id: String,
        reason: String,
    },
    NarratorFallback {
        org_id: String,
        reason: String,
    },
}

/// Receiver for [`GraphEvent`]s.
pub trait MetricsSink: Send + Sync {
    fn emit(&self, event: GraphEvent);
}

/// Default sink: one `info!` line per event on target `chronicle::metrics`.
#[derive(Debug, Default)]
pub struct TracingSink;

impl MetricsSink for TracingSink {
    fn emit(&self, event: GraphEvent) {
        match serde_json::to_string(&event) {
            Ok(json) => tracing::info!(target: "chronicle::metrics", "{json}"),
            Err(e) => tracing::warn!(target: "chronicle::metrics", error = %e, "unserializable event"),
        }
    }
}

/// Sink that keeps every event in memory; used by tests and `doctor`-style
/// introspection.
#[derive(Debug, Default)]
pub struct RecordingSink {
    events: Mutex<Vec<GraphEvent>>,
}

impl RecordingSink {
    pub fn events(&self) -> Vec<GraphEvent> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }
}

impl MetricsSink for RecordingSink {
    fn emit(&self, event: GraphEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event);
        }
    }
}
