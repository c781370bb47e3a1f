use std::collections::VecDeque;
use std::sync::Arc;

use tokio::sync::{broadcast, RwLock};

use crate::model::Snapshot;

/// Bounded in-memory FIFO of the most recent snapshots, with a live
/// broadcast channel for subscribers.
///
/// Publishing is non-blocking: when full, the oldest snapshot is
/// overwritten, and a subscriber that falls more than its queue capacity
/// behind is disconnected (`slow_consumer`) rather than allowed to
/// back-pressure the publisher.
///
/// Cloning is cheap — clones share the same underlying data via Arc.
#[derive(Debug, Clone)]
pub struct RingBuffer {
    buffer: Arc<RwLock<VecDeque<Arc<Snapshot>>>>,
    capacity: usize,
    tx: broadcast::Sender<Arc<Snapshot>>,
}

impl RingBuffer {
    pub fn new(capacity: usize, subscriber_capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(subscriber_capacity.max(1));
        Self {
            buffer: Arc::new(RwLock::new(VecDeque::with_capacity(capacity))),
            capacity: capacity.max(1),
            tx,
        }
    }

    /// O(1); overwrites the oldest entry when full. Never blocks on
    /// subscribers — if nobody is listening, the send error is ignored.
    pub async fn publish(&self, snapshot: Arc<Snapshot>) {
        {
            let mut buffer = self.buffer.write().await;
            if buffer.len() == self.capacity {
                buffer.pop_front();
            }
            buffer.push_back(Arc::clone(&snapshot));
        }
        let _ = self.tx.send(snapshot);
    }

    /// Most recent snapshot, or None before the first tick.
    pub async fn latest(&self) -> Option<Arc<Snapshot>> {
        self.buffer.read().await.back().cloned()
    }

    /// Up to `n` most recent snapshots in chronological order.
    pub async fn window(&self, n: usize) -> Vec<Arc<Snapshot>> {
        let buffer = self.buffer.read().await;
        let start = buffer.len().saturating_sub(n);
        buffer.iter().skip(start).cloned().collect()
    }

    pub async fn len(&self) -> usize {
        self.buffer.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.buffer.read().await.is_empty()
    }

    /// Bounded live channel of new snapshots. A receiver that lags past
    /// its capacity gets `RecvError::Lagged` and should treat itself as
    /// disconnected (`slow_consumer`).
    pub fn subscribe(&self) -> broadcast::Receiver<Arc<Snapshot>> {
        self.tx.subscribe()
    }
}
