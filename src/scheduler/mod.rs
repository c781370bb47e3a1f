use std::time::Duration;

use sysinfo::{ProcessRefreshKind, ProcessesToUpdate, System};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::collectors::{Cadence, HEAVY_COLLECTORS};
use crate::config::AppConfig;
use crate::db::{store, Database};
use crate::health::Health;
use crate::patterns::PatternHandle;
use crate::pipeline::Pipeline;

/// Seconds between resource self-monitor checks.
const MONITOR_INTERVAL_SECS: u64 = 10;

/// Consecutive over-cap checks before the agent throttles itself
/// (3 checks at 10s spacing ≈ 30s sustained overrun).
const MONITOR_OVERRUN_CHECKS: u32 = 3;

/// Drives the pipeline on a multi-rate clock and owns the shutdown
/// signal. HIGH ticks sample cpu/ram/context; MEDIUM adds
/// disk/network/process; LOW adds gpu; the VERY_LOW loop refreshes
/// baselines and runs the retention sweep.
///
/// Cloning is cheap — clones share the same underlying data via Arc.
#[derive(Clone)]
pub struct Scheduler {
    config: AppConfig,
    pipeline: Pipeline,
    patterns: PatternHandle,
    db: Database,
    health: Health,
    shutdown_tx: watch::Sender<bool>,
}

impl Scheduler {
    pub fn new(
        config: AppConfig,
        pipeline: Pipeline,
        patterns: PatternHandle,
        db: Database,
        health: Health,
    ) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            config,
            pipeline,
            patterns,
            db,
            health,
            shutdown_tx,
        }
    }

    /// Receiver for the cooperative shutdown signal; background tasks
    /// exit when it flips to true.
    pub fn shutdown_signal(&self) -> watch::Receiver<bool> {
        self.shutdown_tx.subscribe()
    }

    /// Stop issuing ticks. In-flight ticks finish within the drain budget.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }

    /// Spawn every driver loop. Handles are awaited at shutdown.
    pub async fn spawn(&self) -> Vec<JoinHandle<()>> {
        self.health.set_scheduler_running(true).await;
        vec![
            self.spawn_tick_loop(Cadence::High, self.config.high_interval_sec),
            self.spawn_tick_loop(Cadence::Medium, self.config.medium_interval_sec),
            self.spawn_tick_loop(Cadence::Low, self.config.low_interval_sec),
            self.spawn_maintenance_loop(),
            self.spawn_resource_monitor(),
        ]
    }

    fn spawn_tick_loop(&self, cadence: Cadence, interval_sec: u64) -> JoinHandle<()> {
        let pipeline = self.pipeline.clone();
        let budget = self.config.tick_budget(interval_sec);
        let mut shutdown = self.shutdown_signal();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(interval_sec));
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        pipeline.run_tick(cadence, budget).await;
                    }
                    _ = shutdown.changed() => {
                        debug!(?cadence, "tick loop stopped");
                        return;
                    }
                }
            }
        })
    }

    /// VERY_LOW loop: baseline flush then retention sweep. The first tick
    /// is skipped so a fresh store is not swept at startup.
    fn spawn_maintenance_loop(&self) -> JoinHandle<()> {
        let patterns = self.patterns.clone();
        let db = self.db.clone();
        let config = self.config.clone();
        let mut shutdown = self.shutdown_signal();
        tokio::spawn(async move {
            let mut interval =
                tokio::time::interval(Duration::from_secs(config.very_low_interval_sec));
            interval.tick().await; // first tick is immediate — skip it
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        let now_ms = chrono::Utc::now().timestamp_millis();
                        patterns.flush_baselines(now_ms).await;
                        if let Err(e) = store::retention_sweep(
                            &db,
                            now_ms,
                            config.retention_days,
                            config.anomaly_retention_days,
                            config.db_size_cap_mb,
                        )
                        .await
                        {
                            warn!(error = %e, "retention sweep failed");
                        }
                    }
                    _ = shutdown.changed() => {
                        debug!("maintenance loop stopped");
                        return;
                    }
                }
            }
        })
    }

    /// Watches the agent's own resident set and CPU share; a sustained
    /// overrun disables the heaviest optional collectors.
    fn spawn_resource_monitor(&self) -> JoinHandle<()> {
        let pipeline = self.pipeline.clone();
        let memory_cap_bytes = self.config.memory_cap_mb * 1024 * 1024;
        let cpu_cap_percent = self.config.cpu_overhead_cap_percent;
        let mut shutdown = self.shutdown_signal();
        tokio::spawn(async move {
            let Ok(own_pid) = sysinfo::get_current_pid() else {
                warn!("cannot resolve own pid; resource self-monitor disabled");
                return;
            };
            let mut sys = System::new();
            let logical_cores = num_logical_cores(&mut sys);
            let mut overruns: u32 = 0;
            let mut throttled = false;
            let mut interval = tokio::time::interval(Duration::from_secs(MONITOR_INTERVAL_SECS));
            interval.tick().await; // first tick is immediate — skip it
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        sys.refresh_processes_specifics(
                            ProcessesToUpdate::Some(&[own_pid]),
                            true,
                            ProcessRefreshKind::everything(),
                        );
                        let Some(me) = sys.process(own_pid) else { continue };
                        let rss = me.memory();
                        let cpu_share = f64::from(me.cpu_usage()) / logical_cores;
                        let over = rss > memory_cap_bytes || cpu_share > cpu_cap_percent;
                        if over {
                            overruns += 1;
                        } else {
                            overruns = 0;
                        }
                        if overruns >= MONITOR_OVERRUN_CHECKS && !throttled {
                            throttled = true;
                            warn!(
                                rss_mb = rss / (1024 * 1024),
                                cpu_percent = cpu_share,
                                "self_throttle: resource caps exceeded, disabling heavy collectors"
                            );
                            for name in HEAVY_COLLECTORS {
                                pipeline.disable_collector(name).await;
                            }
                        }
                    }
                    _ = shutdown.changed() => {
                        debug!("resource monitor stopped");
                        return;
                    }
                }
            }
        })
    }
}

fn num_logical_cores(sys: &mut System) -> f64 {
    sys.refresh_cpu_usage();
    (sys.cpus().len().max(1)) as f64
}

/// Await the given background tasks, abandoning any that outlive the
/// drain budget.
pub async fn drain(handles: Vec<JoinHandle<()>>, budget: Duration) {
    let join_all = futures::future::join_all(handles);
    if tokio::time::timeout(budget, join_all).await.is_err() {
        warn!("drain budget exceeded; abandoning in-flight ticks");
    } else {
        info!("all background tasks drained");
    }
}
