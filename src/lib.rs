//! pendflow - generation-checked coordination of async composite values
//!
//! A `FlowCoordinator` manages a composite value whose named fields resolve
//! asynchronously and independently. Each `start()` publishes an
//! all-pending snapshot, spawns the field computations, and detaches the
//! previous generation so its in-flight completions become no-ops. Readers
//! take non-blocking, fully-consistent snapshots at any time.
//!
//! The hazard this defends against is the stale write: a slow computation
//! from a superseded request completing after a newer request has started
//! and overwriting one of its fields. Every completion is tagged with the
//! generation it was created under and checks that tag before publishing.

pub mod errors;
pub mod flow;

// Re-exports for convenience
pub use errors::FlowError;
pub use flow::{
    BufferingEventSink, EventSink, FieldFuture, FieldSet, FieldSource, FieldState, FlowCoordinator,
    FlowEvent, FlowEventEnvelope, Generation, LoggingEventSink, PendingAggregate, Schema,
};
