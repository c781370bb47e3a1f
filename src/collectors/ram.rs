use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use sysinfo::System;
use tokio::time::Instant;

use super::{Cadence, Collector, CollectorFailure};
use crate::model::{Fragment, RamMetrics};

const BYTES_PER_GB: f64 = 1024.0 * 1024.0 * 1024.0;

/// Samples physical memory and swap. Sizes are normalized to GB.
pub struct RamCollector {
    sys: Arc<Mutex<System>>,
}

impl RamCollector {
    pub fn new() -> Self {
        Self {
            sys: Arc::new(Mutex::new(System::new())),
        }
    }
}

impl Default for RamCollector {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Collector for RamCollector {
    fn name(&self) -> &'static str {
        "ram"
    }

    fn cadence(&self) -> Cadence {
        Cadence::High
    }

    async fn sample(&self, _deadline: Instant) -> Result<Fragment, CollectorFailure> {
        let sys = Arc::clone(&self.sys);
        let metrics = tokio::task::spawn_blocking(move || {
            let mut sys = match sys.lock() {
                Ok(g) => g,
                Err(poisoned) => poisoned.into_inner(),
            };
            sys.refresh_memory();

            let total = sys.total_memory() as f64;
            let used = sys.used_memory() as f64;
            let available = sys.available_memory() as f64;
            let free = sys.free_memory() as f64;
            // No direct cached figure; reclaimable page cache is the gap
            // between available and free.
            let cached = (available - free).max(0.0);

            RamMetrics {
                total_gb: total / BYTES_PER_GB,
                used_gb: used / BYTES_PER_GB,
                available_gb: available / BYTES_PER_GB,
                cached_gb: cached / BYTES_PER_GB,
                swap_total_gb: sys.total_swap() as f64 / BYTES_PER_GB,
                swap_used_gb: sys.used_swap() as f64 / BYTES_PER_GB,
                usage_percent: None,
            }
        })
        .await
        .map_err(|e| CollectorFailure::transient(format!("ram sampler task failed: {e}")))?;

        if metrics.total_gb <= 0.0 {
            return Err(CollectorFailure::unsupported("no physical memory reported"));
        }
        Ok(Fragment::Ram(metrics))
    }
}
