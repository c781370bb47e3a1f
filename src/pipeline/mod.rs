pub mod normalize;
pub mod validate;

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::{watch, Notify, RwLock};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::collectors::{Cadence, Collector};
use crate::db::{store, Database};
use crate::health::Health;
use crate::model::{Fragment, Snapshot};
use crate::ring::RingBuffer;

/// Outcome of one sampling tick.
#[derive(Debug)]
pub enum TickOutcome {
    /// Snapshot assembled, published to the ring and queued for the store.
    Published(Arc<Snapshot>),
    /// Every collector failed or was skipped; nothing to persist.
    Empty,
    /// The wall clock moved backwards past the last snapshot; tick dropped.
    ClockSkew,
}

/// Orchestrates one sampling tick: concurrent fan-out to the enabled
/// collectors under a shared deadline, normalize, validate, assemble,
/// then hand off to the ring buffer (non-blocking) and the store write
/// queue (drop-oldest on saturation).
///
/// Cloning is cheap — clones share the same underlying data via Arc.
#[derive(Clone)]
pub struct Pipeline {
    collectors: Vec<Arc<dyn Collector>>,
    disabled: Arc<RwLock<BTreeSet<&'static str>>>,
    last_timestamp: Arc<Mutex<i64>>,
    ring: RingBuffer,
    queue: WriteQueue,
    health: Health,
}

impl Pipeline {
    pub fn new(
        collectors: Vec<Arc<dyn Collector>>,
        ring: RingBuffer,
        health: Health,
        write_queue_capacity: usize,
    ) -> Self {
        Self {
            collectors,
            disabled: Arc::new(RwLock::new(BTreeSet::new())),
            last_timestamp: Arc::new(Mutex::new(0)),
            ring,
            queue: WriteQueue::new(write_queue_capacity, health.clone()),
            health,
        }
    }

    /// Disable a collector for the rest of the session (self-throttle or
    /// permanent failure). Idempotent.
    pub async fn disable_collector(&self, name: &'static str) -> bool {
        self.disabled.write().await.insert(name)
    }

    pub async fn disabled_collectors(&self) -> BTreeSet<&'static str> {
        self.disabled.read().await.clone()
    }

    /// Run one tick at the given cadence. Collectors assigned to this
    /// cadence or faster run concurrently against a shared deadline; a
    /// collector that misses it contributes `timeout` to the error map.
    /// Never raises: failures are recorded and the next tick proceeds.
    pub async fn run_tick(&self, cadence: Cadence, budget: Duration) -> TickOutcome {
        let tick_start = Instant::now();
        let deadline = tick_start + budget;

        let disabled = self.disabled.read().await.clone();
        let eligible: Vec<Arc<dyn Collector>> = self
            .collectors
            .iter()
            .filter(|c| c.cadence() <= cadence && !disabled.contains(c.name()))
            .cloned()
            .collect();
        if eligible.is_empty() {
            return TickOutcome::Empty;
        }

        let samples = futures::future::join_all(eligible.iter().map(|collector| {
            let collector = Arc::clone(collector);
            async move {
                let result = tokio::time::timeout_at(deadline, collector.sample(deadline)).await;
                (collector.name(), result)
            }
        }))
        .await;

        let mut fragments: Vec<(&'static str, Fragment)> = Vec::new();
        let mut errors: BTreeMap<String, String> = BTreeMap::new();

        for (name, result) in samples {
            match result {
                Ok(Ok(mut fragment)) => {
                    normalize::normalize_fragment(&mut fragment);
                    match validate::validate_fragment(&fragment) {
                        Ok(()) => fragments.push((name, fragment)),
                        Err(reason) => {
                            debug!(collector = name, %reason, "fragment rejected");
                            self.health.record_collector_error(name, &reason).await;
                            errors.insert(name.to_string(), reason);
                        }
                    }
                }
                Ok(Err(failure)) => {
                    self.health
                        .record_collector_error(name, &failure.to_string())
                        .await;
                    errors.insert(name.to_string(), failure.code.as_str().to_string());
                    if failure.code.is_permanent() && self.disable_collector(name).await {
                        warn!(
                            collector = name,
                            code = failure.code.as_str(),
                            message = %failure.message,
                            "collector_disabled: permanent failure, disabled for this session"
                        );
                    }
                }
                Err(_elapsed) => {
                    self.health.record_collector_error(name, "timeout").await;
                    errors.insert(name.to_string(), "timeout".to_string());
                }
            }
        }

        if fragments.is_empty() {
            debug!("tick produced no fragments; snapshot discarded");
            return TickOutcome::Empty;
        }

        // Strictly monotonic timestamps: bump by 1 ms on a tie, drop the
        // tick if the clock went backwards.
        let timestamp = {
            let mut last = match self.last_timestamp.lock() {
                Ok(g) => g,
                Err(poisoned) => poisoned.into_inner(),
            };
            let now_ms = chrono::Utc::now().timestamp_millis();
            if now_ms > *last {
                *last = now_ms;
                now_ms
            } else if now_ms == *last {
                *last += 1;
                *last
            } else {
                warn!(now_ms, last = *last, "clock moved backwards; tick dropped");
                return TickOutcome::ClockSkew;
            }
        };

        let mut snapshot = Snapshot::empty(timestamp);
        snapshot.collector_errors = errors;
        for (name, fragment) in fragments {
            self.health.record_collector_success(name, timestamp).await;
            match fragment {
                Fragment::Cpu(v) => snapshot.cpu = Some(v),
                Fragment::Ram(v) => snapshot.ram = Some(v),
                Fragment::Gpu(v) => snapshot.gpus = Some(v),
                Fragment::Disk(v) => snapshot.disk = Some(v),
                Fragment::Network(v) => snapshot.network = Some(v),
                Fragment::Processes(v) => snapshot.processes = Some(v),
                Fragment::Context(v) => snapshot.context = Some(v),
            }
        }
        snapshot.collection_duration_ms =
            (tick_start.elapsed().as_millis() as i64).clamp(0, 10_000);

        let snapshot = Arc::new(snapshot);
        self.ring.publish(Arc::clone(&snapshot)).await;
        self.queue.push(Arc::clone(&snapshot)).await;
        TickOutcome::Published(snapshot)
    }

    /// Spawn the store writer task: the sole writer draining the bounded
    /// queue into single-transaction snapshot writes. Exits after the
    /// shutdown signal once the queue is drained.
    pub fn spawn_writer(
        &self,
        db: Database,
        mut shutdown: watch::Receiver<bool>,
    ) -> tokio::task::JoinHandle<()> {
        let queue = self.queue.clone();
        let health = self.health.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = queue.notified() => {}
                    _ = shutdown.changed() => {
                        // Complete snapshots still queued are written; the
                        // scheduler has already stopped producing new ones.
                        queue.drain_into(&db, &health).await;
                        info!("store writer stopped");
                        return;
                    }
                }
                queue.drain_into(&db, &health).await;
            }
        })
    }

    #[cfg(test)]
    pub(crate) fn queue_len(&self) -> usize {
        self.queue.len()
    }

    #[cfg(test)]
    pub(crate) async fn drain_queue_for_test(&self, db: &Database) {
        self.queue.drain_into(db, &self.health).await;
    }
}

/// Bounded FIFO between the pipeline and the store writer. When the
/// store cannot keep up the oldest unwritten snapshot is dropped and
/// counted; live readers still see it via the ring buffer.
#[derive(Clone)]
struct WriteQueue {
    inner: Arc<Mutex<VecDeque<Arc<Snapshot>>>>,
    capacity: usize,
    notify: Arc<Notify>,
    health: Health,
}

impl WriteQueue {
    fn new(capacity: usize, health: Health) -> Self {
        Self {
            inner: Arc::new(Mutex::new(VecDeque::new())),
            capacity: capacity.max(1),
            notify: Arc::new(Notify::new()),
            health,
        }
    }

    async fn push(&self, snapshot: Arc<Snapshot>) {
        {
            let mut queue = match self.inner.lock() {
                Ok(g) => g,
                Err(poisoned) => poisoned.into_inner(),
            };
            if queue.len() == self.capacity {
                queue.pop_front();
                self.health.add_store_drop();
                warn!("store write queue saturated; dropped oldest snapshot");
            }
            queue.push_back(snapshot);
        }
        self.notify.notify_one();
    }

    fn pop(&self) -> Option<Arc<Snapshot>> {
        match self.inner.lock() {
            Ok(mut g) => g.pop_front(),
            Err(poisoned) => poisoned.into_inner().pop_front(),
        }
    }

    fn len(&self) -> usize {
        match self.inner.lock() {
            Ok(g) => g.len(),
            Err(poisoned) => poisoned.into_inner().len(),
        }
    }

    async fn notified(&self) {
        self.notify.notified().await;
    }

    async fn drain_into(&self, db: &Database, health: &Health) {
        while let Some(snapshot) = self.pop() {
            match store::write_snapshot(db, &snapshot).await {
                Ok(_id) => health.record_store_write(true).await,
                Err(e) => {
                    warn!(timestamp = snapshot.timestamp, error = %e, "snapshot write failed; tick discarded");
                    health.record_store_write(false).await;
                }
            }
        }
    }
}
