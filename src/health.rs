use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::RwLock;
use tracing::{error, warn};

/// Store writes that must fail consecutively before the agent enters
/// degraded mode.
const DEGRADED_AFTER_FAILURES: u32 = 5;

#[derive(Debug, Clone, Serialize, Default)]
pub struct CollectorHealth {
    pub last_success_ts: Option<i64>,
    pub last_error: Option<String>,
}

#[derive(Debug, Default)]
struct HealthState {
    collectors: BTreeMap<String, CollectorHealth>,
    consecutive_store_failures: u32,
    store_degraded: bool,
    scheduler_running: bool,
}

/// Shared component health registry backing `/health`.
///
/// Cloning is cheap — clones share the same underlying data via Arc.
#[derive(Debug, Clone)]
pub struct Health {
    state: Arc<RwLock<HealthState>>,
    store_drops: Arc<AtomicU64>,
    started_at: chrono::DateTime<chrono::Utc>,
}

impl Default for Health {
    fn default() -> Self {
        Self::new()
    }
}

impl Health {
    pub fn new() -> Self {
        Self {
            state: Arc::new(RwLock::new(HealthState::default())),
            store_drops: Arc::new(AtomicU64::new(0)),
            started_at: chrono::Utc::now(),
        }
    }

    pub async fn record_collector_success(&self, name: &str, timestamp: i64) {
        let mut state = self.state.write().await;
        let entry = state.collectors.entry(name.to_string()).or_default();
        entry.last_success_ts = Some(timestamp);
        entry.last_error = None;
    }

    pub async fn record_collector_error(&self, name: &str, error: &str) {
        let mut state = self.state.write().await;
        let entry = state.collectors.entry(name.to_string()).or_default();
        entry.last_error = Some(error.to_string());
    }

    /// Track a store write outcome; flips to degraded after enough
    /// consecutive failures and recovers on the first success.
    pub async fn record_store_write(&self, ok: bool) {
        let mut state = self.state.write().await;
        if ok {
            state.consecutive_store_failures = 0;
            if state.store_degraded {
                warn!("store recovered from degraded mode");
                state.store_degraded = false;
            }
        } else {
            state.consecutive_store_failures += 1;
            if state.consecutive_store_failures >= DEGRADED_AFTER_FAILURES && !state.store_degraded
            {
                error!(
                    failures = state.consecutive_store_failures,
                    "store entering degraded mode"
                );
                state.store_degraded = true;
            }
        }
    }

    pub async fn set_scheduler_running(&self, running: bool) {
        self.state.write().await.scheduler_running = running;
    }

    pub fn add_store_drop(&self) {
        self.store_drops.fetch_add(1, Ordering::Relaxed);
    }

    pub fn store_drops(&self) -> u64 {
        self.store_drops.load(Ordering::Relaxed)
    }

    pub async fn store_degraded(&self) -> bool {
        self.state.read().await.store_degraded
    }

    /// Component health matrix for `/health`. Never fails.
    pub async fn report(&self) -> serde_json::Value {
        let state = self.state.read().await;
        let uptime_secs = (chrono::Utc::now() - self.started_at).num_seconds();
        serde_json::json!({
            "version": env!("CARGO_PKG_VERSION"),
            "uptime_secs": uptime_secs,
            "scheduler": if state.scheduler_running { "ok" } else { "stopped" },
            "store": if state.store_degraded { "degraded" } else { "ok" },
            "ring_buffer": "ok",
            "store_drops": self.store_drops(),
            "collectors": state.collectors,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn collector_success_clears_error() {
        let health = Health::new();
        health.record_collector_error("cpu", "transient_error").await;
        health.record_collector_success("cpu", 123).await;
        let report = health.report().await;
        let cpu = &report["collectors"]["cpu"];
        assert_eq!(cpu["last_success_ts"], 123);
        assert!(cpu["last_error"].is_null());
    }

    #[tokio::test]
    async fn store_degrades_after_five_consecutive_failures() {
        let health = Health::new();
        for _ in 0..4 {
            health.record_store_write(false).await;
        }
        assert!(!health.store_degraded().await);
        health.record_store_write(false).await;
        assert!(health.store_degraded().await);
        assert_eq!(health.report().await["store"], "degraded");

        // One success recovers
        health.record_store_write(true).await;
        assert!(!health.store_degraded().await);
    }

    #[tokio::test]
    async fn success_resets_failure_streak() {
        let health = Health::new();
        for _ in 0..4 {
            health.record_store_write(false).await;
        }
        health.record_store_write(true).await;
        for _ in 0..4 {
            health.record_store_write(false).await;
        }
        assert!(!health.store_degraded().await);
    }

    #[tokio::test]
    async fn report_always_contains_components() {
        let health = Health::new();
        let report = health.report().await;
        assert_eq!(report["ring_buffer"], "ok");
        assert_eq!(report["store"], "ok");
        assert_eq!(report["scheduler"], "stopped");
    }
}
