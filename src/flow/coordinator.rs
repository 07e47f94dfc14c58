//! Flow coordinator - generation-checked publication of field completions
//!
//! Each `start()` mints a new generation, publishes an all-pending snapshot
//! before any computation can complete, and tags every completion task with
//! the generation it belongs to. A completion only publishes if its
//! generation is still the active one; completions belonging to a
//! superseded or detached generation are discarded. That is the whole
//! cancellation story: write suppression, not task abortion, so it works
//! even when the underlying computation cannot be cancelled.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use anyhow::Result;
use parking_lot::RwLock;
use serde_json::Value;
use uuid::Uuid;

use crate::flow::aggregate::{PendingAggregate, Schema};
use crate::flow::events::{next_sequence, now_ms, EventSink, FlowEvent, FlowEventEnvelope};
use crate::flow::fields::FieldSet;

/// Sentinel for "no generation active"; real ids start at 1.
const INERT: u64 = 0;

/// Token identifying one `start()` invocation
///
/// Ids are monotonically increasing and never reused, so holding a stale
/// token can never alias a later generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Generation(u64);

impl Generation {
    pub fn id(self) -> u64 {
        self.0
    }
}

/// State shared between the coordinator handle and its completion tasks.
struct Shared {
    schema: Schema,
    coordinator_id: Uuid,
    /// Id of the active generation; completions compare their own id
    /// against this cell before publishing anything.
    active: AtomicU64,
    /// Monotonic mint counter for generation ids.
    minted: AtomicU64,
    /// The published snapshot. Replaced wholesale on every update, so a
    /// reader gets the full pre- or post-update aggregate, never a mix.
    snapshot: RwLock<Arc<PendingAggregate>>,
    sinks: Vec<Arc<dyn EventSink>>,
}

impl Shared {
    fn emit(&self, event: FlowEvent) {
        if self.sinks.is_empty() {
            return;
        }
        let envelope = FlowEventEnvelope {
            sequence: next_sequence(),
            coordinator_id: self.coordinator_id,
            timestamp_ms: now_ms(),
            event,
        };
        for sink in &self.sinks {
            sink.emit(&envelope);
        }
    }

    /// Generation-check-then-publish step run by every completion task.
    fn apply(&self, generation: u64, name: &str, outcome: Result<Value>) {
        // Fast path: skip the lock entirely for completions that are
        // already known to be stale.
        if self.active.load(Ordering::Acquire) != generation {
            tracing::debug!(generation, field = name, "suppressed stale completion");
            self.emit(FlowEvent::StaleSuppressed {
                generation,
                field: name.to_string(),
            });
            return;
        }

        let mut guard = self.snapshot.write();
        // Re-check under the lock: a start() or detach() may have raced in
        // between the fast-path check and lock acquisition.
        if self.active.load(Ordering::Acquire) != generation || guard.generation() != generation {
            tracing::debug!(generation, field = name, "suppressed stale completion");
            self.emit(FlowEvent::StaleSuppressed {
                generation,
                field: name.to_string(),
            });
            return;
        }
        // A field settles at most once per generation.
        if !guard.is_pending(name) {
            tracing::warn!(generation, field = name, "duplicate completion ignored");
            return;
        }

        let next = match outcome {
            Ok(value) => {
                let updated = guard.with_field_resolved(name, value.clone());
                tracing::debug!(generation, field = name, "field resolved");
                self.emit(FlowEvent::FieldResolved {
                    generation,
                    field: name.to_string(),
                    value,
                });
                updated
            }
            Err(err) => {
                let reason = format!("{err:#}");
                let updated = guard.with_field_failed(name, reason.clone());
                tracing::warn!(generation, field = name, %reason, "field failed");
                self.emit(FlowEvent::FieldFailed {
                    generation,
                    field: name.to_string(),
                    reason,
                });
                updated
            }
        };
        *guard = Arc::new(next);
    }
}

/// Coordinator for a composite value with independently resolving fields
///
/// Cheap to clone; clones share the same snapshot and generation cell, so
/// a handle can be passed to readers while another drives `start()`.
#[derive(Clone)]
pub struct FlowCoordinator {
    shared: Arc<Shared>,
}

impl FlowCoordinator {
    /// New coordinator whose initial snapshot has every field pending
    pub fn new(schema: Schema) -> Self {
        Self::builder(schema).build()
    }

    /// Builder for a coordinator with seeded values or event sinks
    pub fn builder(schema: Schema) -> FlowCoordinatorBuilder {
        FlowCoordinatorBuilder {
            schema,
            initial: None,
            sinks: Vec::new(),
        }
    }

    pub fn schema(&self) -> &Schema {
        &self.shared.schema
    }

    /// Replace the composite value with a new set of field computations.
    ///
    /// Detaches the prior generation, publishes an all-pending snapshot
    /// for the new one before any computation is spawned, then spawns one
    /// tokio task per field to run the completion protocol.
    ///
    /// Panics if the field-name set does not cover the schema exactly, and
    /// must be called from within a tokio runtime.
    pub fn start(&self, fields: FieldSet) -> Generation {
        self.shared.schema.assert_matches(&fields.names());
        let field_count = fields.len();

        // Mint, swap, and publish as one critical section so the active
        // cell and the snapshot's generation tag can never disagree, even
        // with start() racing on clones of this handle. Publishing happens
        // before anything is spawned: readers must see the all-pending
        // state for this generation before any completion for it can run.
        let (id, prior) = {
            let mut guard = self.shared.snapshot.write();
            let id = self.shared.minted.fetch_add(1, Ordering::Relaxed) + 1;
            let prior = self.shared.active.swap(id, Ordering::AcqRel);
            *guard = Arc::new(PendingAggregate::all_pending(&self.shared.schema, id));
            (id, prior)
        };

        if prior != INERT {
            tracing::debug!(generation = prior, "detached superseded generation");
            self.shared.emit(FlowEvent::FlowDetached { generation: prior });
        }
        tracing::debug!(generation = id, fields = field_count, "flow started");
        self.shared.emit(FlowEvent::FlowStarted {
            generation: id,
            field_count,
        });

        for (name, fut) in fields.into_futures() {
            let shared = Arc::clone(&self.shared);
            tokio::spawn(async move {
                let outcome = fut.await;
                shared.apply(id, &name, outcome);
            });
        }

        Generation(id)
    }

    /// Mark the active generation detached; its outstanding completions
    /// become permanent no-ops. Idempotent. The last published snapshot
    /// stays readable.
    pub fn detach(&self) {
        let prior = self.shared.active.swap(INERT, Ordering::AcqRel);
        if prior != INERT {
            tracing::debug!(generation = prior, "flow detached");
            self.shared.emit(FlowEvent::FlowDetached { generation: prior });
        }
    }

    /// Latest published snapshot, non-blocking
    pub fn snapshot(&self) -> Arc<PendingAggregate> {
        Arc::clone(&self.shared.snapshot.read())
    }

    /// Query one field's state without cloning the whole snapshot shape
    pub fn is_field_pending(&self, name: &str) -> bool {
        self.shared.snapshot.read().is_pending(name)
    }

    /// Whether the given generation is still the active one
    pub fn is_active(&self, generation: Generation) -> bool {
        self.shared.active.load(Ordering::Acquire) == generation.id()
    }

    /// The active generation, if any
    pub fn active_generation(&self) -> Option<Generation> {
        match self.shared.active.load(Ordering::Acquire) {
            INERT => None,
            id => Some(Generation(id)),
        }
    }
}

/// Builder in the same chaining style as the field set
pub struct FlowCoordinatorBuilder {
    schema: Schema,
    initial: Option<BTreeMap<String, Value>>,
    sinks: Vec<Arc<dyn EventSink>>,
}

impl FlowCoordinatorBuilder {
    /// Seed the initial snapshot with already-resolved values
    ///
    /// The map must cover the schema exactly; `build()` panics otherwise.
    pub fn initial_values(mut self, values: BTreeMap<String, Value>) -> Self {
        self.initial = Some(values);
        self
    }

    /// Install an event sink observing coordinator lifecycle events
    pub fn sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    pub fn build(self) -> FlowCoordinator {
        let snapshot = match self.initial {
            Some(values) => PendingAggregate::all_resolved(&self.schema, INERT, values),
            None => PendingAggregate::all_pending(&self.schema, INERT),
        };
        FlowCoordinator {
            shared: Arc::new(Shared {
                schema: self.schema,
                coordinator_id: Uuid::new_v4(),
                active: AtomicU64::new(INERT),
                minted: AtomicU64::new(INERT),
                snapshot: RwLock::new(Arc::new(snapshot)),
                sinks: self.sinks,
            }),
        }
    }
}
