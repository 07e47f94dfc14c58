//! Event system for flow coordination
//!
//! Provides typed event emission for coordinator lifecycle events, so a
//! host can observe starts, detaches, per-field outcomes, and suppressed
//! stale completions without polling snapshots.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Coordinator lifecycle event types
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum FlowEvent {
    /// A new generation was started; all fields pending
    FlowStarted { generation: u64, field_count: usize },
    /// A field completed and was published for the active generation
    FieldResolved {
        generation: u64,
        field: String,
        value: Value,
    },
    /// A field failed and the failure was published
    FieldFailed {
        generation: u64,
        field: String,
        reason: String,
    },
    /// A completion arrived for a superseded or detached generation and
    /// was discarded
    StaleSuppressed { generation: u64, field: String },
    /// A generation was detached (superseded or torn down)
    FlowDetached { generation: u64 },
}

/// Event envelope with metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlowEventEnvelope {
    pub sequence: u64,
    pub coordinator_id: Uuid,
    pub timestamp_ms: i64,
    pub event: FlowEvent,
}

/// Event sink trait for emitting events
pub trait EventSink: Send + Sync {
    fn emit(&self, envelope: &FlowEventEnvelope);
}

/// A simple logging event sink
pub struct LoggingEventSink;

impl EventSink for LoggingEventSink {
    fn emit(&self, envelope: &FlowEventEnvelope) {
        tracing::debug!("flow event: {:?}", envelope);
    }
}

/// A buffering event sink that collects events
pub struct BufferingEventSink {
    events: Arc<parking_lot::RwLock<Vec<FlowEventEnvelope>>>,
}

impl BufferingEventSink {
    pub fn new() -> Self {
        Self {
            events: Arc::new(parking_lot::RwLock::new(Vec::new())),
        }
    }

    pub fn get_events(&self) -> Vec<FlowEventEnvelope> {
        self.events.read().clone()
    }

    pub fn clear(&self) {
        self.events.write().clear();
    }
}

impl Default for BufferingEventSink {
    fn default() -> Self {
        Self::new()
    }
}

impl EventSink for BufferingEventSink {
    fn emit(&self, envelope: &FlowEventEnvelope) {
        self.events.write().push(envelope.clone());
    }
}

/// Global sequence counter for events
static EVENT_SEQUENCE: AtomicU64 = AtomicU64::new(0);

/// Get the next event sequence number
pub fn next_sequence() -> u64 {
    EVENT_SEQUENCE.fetch_add(1, Ordering::SeqCst)
}

/// Current timestamp in milliseconds
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
