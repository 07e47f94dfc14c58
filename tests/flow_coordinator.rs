//! Concurrency-facing test suite for the flow coordinator
//!
//! Exercises the ordering and suppression guarantees: all-pending publish
//! before any completion, stale-write suppression across generations,
//! completion-order independence, and snapshot consistency under
//! concurrent readers.

use std::sync::Arc;
use std::time::Duration;

use pendflow::{
    BufferingEventSink, FieldSet, FlowCoordinator, FlowEvent, Schema,
};
use pretty_assertions::assert_eq;
use tokio::time::sleep;

fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

fn delayed<T: serde::Serialize + Send + 'static>(
    ms: u64,
    value: T,
) -> impl std::future::Future<Output = anyhow::Result<T>> + Send {
    async move {
        sleep(Duration::from_millis(ms)).await;
        Ok(value)
    }
}

/// Immediately after start(), every schema field reads pending, no matter
/// how fast the underlying computations are.
#[tokio::test]
async fn initial_snapshot_is_all_pending() {
    let coordinator = FlowCoordinator::new(Schema::new(["a", "b"]));
    let generation = coordinator.start(FieldSet::new().ready("a", "X").ready("b", "Y"));

    let snapshot = coordinator.snapshot();
    assert_eq!(snapshot.generation(), generation.id());
    assert!(snapshot.is_pending("a"));
    assert!(snapshot.is_pending("b"));
}

/// A superseded generation's completions must never reach the snapshot,
/// even though its computations keep running.
#[tokio::test]
async fn stale_writes_are_suppressed() {
    init_tracing();
    let sink = Arc::new(BufferingEventSink::new());
    let coordinator = FlowCoordinator::builder(Schema::new(["a", "b"]))
        .sink(sink.clone())
        .build();

    let first = coordinator.start(
        FieldSet::new()
            .field("a", delayed(100, "X"))
            .field("b", delayed(100, "Y")),
    );
    let second = coordinator.start(
        FieldSet::new()
            .field("a", delayed(10, "Z"))
            .field("b", delayed(10, "W")),
    );
    assert!(!coordinator.is_active(first));
    assert!(coordinator.is_active(second));

    sleep(Duration::from_millis(200)).await;

    let snapshot = coordinator.snapshot();
    assert_eq!(snapshot.generation(), second.id());
    assert_eq!(snapshot.get::<String>("a").unwrap(), "Z");
    assert_eq!(snapshot.get::<String>("b").unwrap(), "W");

    // Both of the first generation's completions arrived late and were
    // discarded, not applied.
    let suppressed: Vec<u64> = sink
        .get_events()
        .iter()
        .filter_map(|e| match &e.event {
            FlowEvent::StaleSuppressed { generation, .. } => Some(*generation),
            _ => None,
        })
        .collect();
    assert_eq!(suppressed, vec![first.id(), first.id()]);
}

/// Field updates within one generation commute: resolving b before a
/// produces the same final aggregate as a before b.
#[tokio::test]
async fn completion_order_does_not_matter() {
    let a_first = FlowCoordinator::new(Schema::new(["a", "b"]));
    a_first.start(
        FieldSet::new()
            .field("a", delayed(10, 1_u32))
            .field("b", delayed(60, 2_u32)),
    );

    let b_first = FlowCoordinator::new(Schema::new(["a", "b"]));
    b_first.start(
        FieldSet::new()
            .field("a", delayed(60, 1_u32))
            .field("b", delayed(10, 2_u32)),
    );

    sleep(Duration::from_millis(150)).await;

    let left = a_first.snapshot();
    let right = b_first.snapshot();
    assert!(left.is_settled() && right.is_settled());
    assert_eq!(*left, *right);
}

/// Detach keeps the last published snapshot readable but freezes it.
#[tokio::test]
async fn detach_freezes_the_snapshot() {
    let coordinator = FlowCoordinator::new(Schema::new(["a", "b"]));
    coordinator.start(
        FieldSet::new()
            .field("a", delayed(10, "fast"))
            .field("b", delayed(100, "slow")),
    );

    sleep(Duration::from_millis(50)).await;
    coordinator.detach();
    let frozen = coordinator.snapshot();
    assert_eq!(frozen.get::<String>("a").unwrap(), "fast");
    assert!(frozen.is_pending("b"));

    sleep(Duration::from_millis(100)).await;
    assert_eq!(*coordinator.snapshot(), *frozen);
}

/// A detached coordinator slot accepts a fresh start().
#[tokio::test]
async fn restart_after_detach() {
    let coordinator = FlowCoordinator::new(Schema::new(["a", "b"]));
    coordinator.start(
        FieldSet::new()
            .field("a", delayed(100, "old"))
            .field("b", delayed(100, "old")),
    );
    coordinator.detach();

    let fresh = coordinator.start(FieldSet::new().ready("a", "new").ready("b", "new"));
    sleep(Duration::from_millis(150)).await;

    let snapshot = coordinator.snapshot();
    assert_eq!(snapshot.generation(), fresh.id());
    assert_eq!(snapshot.get::<String>("a").unwrap(), "new");
    assert_eq!(snapshot.get::<String>("b").unwrap(), "new");
}

/// start() racing on clones of the same handle must converge: whichever
/// call wins, the active cell and the snapshot's generation tag agree,
/// and the winner's completions still publish rather than being wedged
/// into permanent suppression.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_starts_converge_on_one_generation() {
    let coordinator = FlowCoordinator::new(Schema::new(["a", "b"]));

    let mut handles = Vec::new();
    for i in 0..8u32 {
        let coordinator = coordinator.clone();
        handles.push(tokio::spawn(async move {
            coordinator.start(FieldSet::new().ready("a", i).ready("b", i))
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    sleep(Duration::from_millis(100)).await;

    let snapshot = coordinator.snapshot();
    let active = coordinator.active_generation().unwrap();
    assert_eq!(snapshot.generation(), active.id());
    assert!(snapshot.is_settled(), "winning generation must publish");
    assert_eq!(
        snapshot.get::<u32>("a").unwrap(),
        snapshot.get::<u32>("b").unwrap()
    );
}

/// Readers sampling concurrently with updates and restarts never observe
/// a snapshot mixing generations: every resolved value carries the id of
/// the generation that published it, and must match the snapshot's tag.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn snapshots_never_tear_across_generations() {
    init_tracing();
    let coordinator = FlowCoordinator::new(Schema::new(["a", "b", "c"]));

    let reader = {
        let coordinator = coordinator.clone();
        tokio::spawn(async move {
            for _ in 0..2000 {
                let snapshot = coordinator.snapshot();
                let tag = snapshot.generation();
                for (name, state) in snapshot.fields() {
                    if let Some(value) = state.as_value() {
                        let published_under = value["generation"].as_u64().unwrap();
                        assert_eq!(
                            published_under, tag,
                            "field {name} published under generation {published_under} \
                             observed in a generation-{tag} snapshot"
                        );
                    }
                }
                tokio::task::yield_now().await;
            }
        })
    };

    for _ in 0..25 {
        let generation = coordinator.active_generation().map_or(1, |g| g.id() + 1);
        coordinator.start(
            FieldSet::new()
                .field("a", delayed(1, serde_json::json!({ "generation": generation })))
                .field("b", delayed(2, serde_json::json!({ "generation": generation })))
                .field("c", delayed(3, serde_json::json!({ "generation": generation }))),
        );
        sleep(Duration::from_millis(5)).await;
    }

    reader.await.unwrap();
}
