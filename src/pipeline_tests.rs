//! End-to-end pipeline scenarios: fan-out with timeouts, validation
//! rejection, auto-disable, back-pressure and the store write path.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;

use crate::collectors::{Cadence, Collector, CollectorFailure, FailureCode};
use crate::db::{store, Database};
use crate::health::Health;
use crate::model::{CpuMetrics, Fragment, RamMetrics};
use crate::pipeline::{Pipeline, TickOutcome};
use crate::ring::RingBuffer;

enum StubBehavior {
    Cpu(f64),
    Ram,
    SleepMs(u64),
    Fail(FailureCode),
}

struct StubCollector {
    name: &'static str,
    cadence: Cadence,
    behavior: StubBehavior,
}

impl StubCollector {
    fn cpu(name: &'static str, usage: f64) -> Arc<dyn Collector> {
        Arc::new(Self {
            name,
            cadence: Cadence::High,
            behavior: StubBehavior::Cpu(usage),
        })
    }

    fn ram(name: &'static str) -> Arc<dyn Collector> {
        Arc::new(Self {
            name,
            cadence: Cadence::High,
            behavior: StubBehavior::Ram,
        })
    }

    fn slow(name: &'static str, sleep_ms: u64) -> Arc<dyn Collector> {
        Arc::new(Self {
            name,
            cadence: Cadence::Medium,
            behavior: StubBehavior::SleepMs(sleep_ms),
        })
    }

    fn failing(name: &'static str, code: FailureCode) -> Arc<dyn Collector> {
        Arc::new(Self {
            name,
            cadence: Cadence::High,
            behavior: StubBehavior::Fail(code),
        })
    }
}

fn cpu_fragment(usage: f64) -> Fragment {
    Fragment::Cpu(CpuMetrics {
        usage_percent: usage,
        frequency_mhz: Some(2000.0),
        per_core_usage: vec![usage, usage],
        temperature_celsius: None,
        logical_count: 2,
        physical_count: 2,
    })
}

#[async_trait]
impl Collector for StubCollector {
    fn name(&self) -> &'static str {
        self.name
    }

    fn cadence(&self) -> Cadence {
        self.cadence
    }

    async fn sample(&self, _deadline: Instant) -> Result<Fragment, CollectorFailure> {
        match &self.behavior {
            StubBehavior::Cpu(usage) => Ok(cpu_fragment(*usage)),
            StubBehavior::Ram => Ok(Fragment::Ram(RamMetrics {
                total_gb: 16.0,
                used_gb: 4.0,
                available_gb: 12.0,
                cached_gb: 1.0,
                swap_total_gb: 0.0,
                swap_used_gb: 0.0,
                usage_percent: None,
            })),
            StubBehavior::SleepMs(ms) => {
                tokio::time::sleep(Duration::from_millis(*ms)).await;
                Ok(cpu_fragment(1.0))
            }
            StubBehavior::Fail(code) => Err(CollectorFailure {
                code: *code,
                message: "stubbed failure".into(),
            }),
        }
    }
}

fn make_pipeline(collectors: Vec<Arc<dyn Collector>>) -> (Pipeline, RingBuffer, Health) {
    let ring = RingBuffer::new(16, 16);
    let health = Health::new();
    let pipeline = Pipeline::new(collectors, ring.clone(), health.clone(), 2);
    (pipeline, ring, health)
}

const BUDGET: Duration = Duration::from_millis(500);

// ---------------------------------------------------------------------------
// Tick assembly
// ---------------------------------------------------------------------------

#[tokio::test]
async fn tick_assembles_fragments_and_derives_ram_percent() {
    let (pipeline, ring, _) = make_pipeline(vec![
        StubCollector::cpu("cpu", 42.0),
        StubCollector::ram("ram"),
    ]);
    match pipeline.run_tick(Cadence::High, BUDGET).await {
        TickOutcome::Published(snapshot) => {
            assert_eq!(snapshot.cpu.as_ref().unwrap().usage_percent, 42.0);
            let ram = snapshot.ram.as_ref().unwrap();
            assert_eq!(ram.usage_percent, Some(25.0)); // derived 4/16
            assert!(snapshot.collector_errors.is_empty());
        }
        other => panic!("expected published snapshot, got {other:?}"),
    }
    assert_eq!(ring.len().await, 1);
}

#[tokio::test]
async fn slow_collector_times_out_without_aborting_the_tick() {
    let (pipeline, _, _) = make_pipeline(vec![
        StubCollector::cpu("cpu", 10.0),
        StubCollector::ram("ram"),
        StubCollector::slow("network", 10_000),
    ]);

    // Two consecutive ticks: a timeout never auto-disables.
    for _ in 0..2 {
        match pipeline
            .run_tick(Cadence::Medium, Duration::from_millis(100))
            .await
        {
            TickOutcome::Published(snapshot) => {
                assert!(snapshot.cpu.is_some());
                assert!(snapshot.ram.is_some());
                assert!(snapshot.network.is_none());
                assert_eq!(
                    snapshot.collector_errors.get("network").map(String::as_str),
                    Some("timeout")
                );
            }
            other => panic!("expected published snapshot, got {other:?}"),
        }
    }
    assert!(pipeline.disabled_collectors().await.is_empty());
}

#[tokio::test]
async fn high_tick_skips_slower_collectors() {
    let (pipeline, _, _) = make_pipeline(vec![
        StubCollector::cpu("cpu", 10.0),
        StubCollector::slow("network", 0),
    ]);
    match pipeline.run_tick(Cadence::High, BUDGET).await {
        TickOutcome::Published(snapshot) => {
            // The medium-cadence collector was not sampled at all
            assert!(!snapshot.collector_errors.contains_key("network"));
            assert!(snapshot.network.is_none());
        }
        other => panic!("expected published snapshot, got {other:?}"),
    }
}

#[tokio::test]
async fn all_collectors_failing_discards_the_snapshot() {
    let (pipeline, ring, _) = make_pipeline(vec![StubCollector::failing(
        "cpu",
        FailureCode::TransientError,
    )]);
    assert!(matches!(
        pipeline.run_tick(Cadence::High, BUDGET).await,
        TickOutcome::Empty
    ));
    assert!(ring.is_empty().await);
}

// ---------------------------------------------------------------------------
// Failure policy
// ---------------------------------------------------------------------------

#[tokio::test]
async fn permanent_failure_disables_collector_for_the_session() {
    let (pipeline, _, _) = make_pipeline(vec![
        StubCollector::cpu("cpu", 10.0),
        StubCollector::failing("gpu", FailureCode::Unsupported),
    ]);

    match pipeline.run_tick(Cadence::High, BUDGET).await {
        TickOutcome::Published(snapshot) => {
            assert_eq!(
                snapshot.collector_errors.get("gpu").map(String::as_str),
                Some("unsupported")
            );
        }
        other => panic!("expected published snapshot, got {other:?}"),
    }
    assert!(pipeline.disabled_collectors().await.contains("gpu"));

    // Next tick no longer samples the disabled collector.
    match pipeline.run_tick(Cadence::High, BUDGET).await {
        TickOutcome::Published(snapshot) => {
            assert!(!snapshot.collector_errors.contains_key("gpu"));
        }
        other => panic!("expected published snapshot, got {other:?}"),
    }
}

#[tokio::test]
async fn transient_failure_is_retried_next_tick() {
    let (pipeline, _, _) = make_pipeline(vec![
        StubCollector::cpu("cpu", 10.0),
        StubCollector::failing("network", FailureCode::TransientError),
    ]);
    for _ in 0..2 {
        match pipeline.run_tick(Cadence::High, BUDGET).await {
            TickOutcome::Published(snapshot) => {
                assert_eq!(
                    snapshot.collector_errors.get("network").map(String::as_str),
                    Some("transient_error")
                );
            }
            other => panic!("expected published snapshot, got {other:?}"),
        }
    }
    assert!(pipeline.disabled_collectors().await.is_empty());
}

#[tokio::test]
async fn out_of_range_fragment_is_rejected_with_field_reason() {
    let (pipeline, _, _) = make_pipeline(vec![
        StubCollector::cpu("cpu", 150.0), // invalid usage
        StubCollector::ram("ram"),
    ]);
    match pipeline.run_tick(Cadence::High, BUDGET).await {
        TickOutcome::Published(snapshot) => {
            assert!(snapshot.cpu.is_none());
            assert_eq!(
                snapshot.collector_errors.get("cpu").map(String::as_str),
                Some("invalid_range:usage_percent")
            );
            assert!(snapshot.ram.is_some());
        }
        other => panic!("expected published snapshot, got {other:?}"),
    }
}

// ---------------------------------------------------------------------------
// Ordering and persistence
// ---------------------------------------------------------------------------

#[tokio::test]
async fn published_timestamps_are_strictly_increasing() {
    let (pipeline, _, _) = make_pipeline(vec![StubCollector::cpu("cpu", 10.0)]);
    let mut last = 0_i64;
    for _ in 0..50 {
        match pipeline.run_tick(Cadence::High, BUDGET).await {
            TickOutcome::Published(snapshot) => {
                assert!(
                    snapshot.timestamp > last,
                    "timestamps must be strictly increasing"
                );
                last = snapshot.timestamp;
            }
            other => panic!("expected published snapshot, got {other:?}"),
        }
    }
}

#[tokio::test]
async fn snapshots_round_trip_through_the_store() {
    let db = Database::test_db().await;
    let (pipeline, _, _) = make_pipeline(vec![
        StubCollector::cpu("cpu", 33.5),
        StubCollector::ram("ram"),
    ]);

    let published = match pipeline.run_tick(Cadence::High, BUDGET).await {
        TickOutcome::Published(snapshot) => snapshot,
        other => panic!("expected published snapshot, got {other:?}"),
    };
    pipeline.drain_queue_for_test(&db).await;

    let restored = store::recent(&db, 1).await.expect("recent");
    assert_eq!(restored.len(), 1);
    let restored = &restored[0];
    assert_eq!(restored.timestamp, published.timestamp);
    let cpu = restored.cpu.as_ref().expect("cpu fragment");
    assert_eq!(cpu.usage_percent, 33.5);
    assert_eq!(cpu.per_core_usage, vec![33.5, 33.5]);
    let ram = restored.ram.as_ref().expect("ram fragment");
    assert_eq!(ram.usage_percent, Some(25.0));
}

#[tokio::test]
async fn saturated_write_queue_drops_oldest_and_counts() {
    let (pipeline, ring, health) = make_pipeline(vec![StubCollector::cpu("cpu", 10.0)]);
    // Queue capacity is 2; no writer is draining it.
    for _ in 0..4 {
        pipeline.run_tick(Cadence::High, BUDGET).await;
    }
    assert_eq!(pipeline.queue_len(), 2);
    assert_eq!(health.store_drops(), 2);
    // Live readers still see every snapshot via the ring buffer.
    assert_eq!(ring.len().await, 4);
}

#[tokio::test]
async fn subscriber_sees_snapshots_in_publish_order() {
    let (pipeline, ring, _) = make_pipeline(vec![StubCollector::cpu("cpu", 10.0)]);
    let mut rx = ring.subscribe();
    for _ in 0..10 {
        pipeline.run_tick(Cadence::High, BUDGET).await;
    }
    let mut last = 0_i64;
    for _ in 0..10 {
        let snapshot = rx.recv().await.expect("subscriber delivery");
        assert!(snapshot.timestamp > last);
        last = snapshot.timestamp;
    }
}
