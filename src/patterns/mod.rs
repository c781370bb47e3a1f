pub mod baseline;
pub mod spike;
pub mod threshold;

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{watch, Mutex};
use tracing::{info, warn};

use crate::config::{AppConfig, ThresholdPair};
use crate::db::{store, Database};
use crate::model::{Anomaly, Metric, Severity, Snapshot};
use crate::ring::RingBuffer;
use baseline::RollingBaseline;
use spike::SpikeDetector;
use threshold::{ThresholdDetector, ThresholdEvent};

struct MetricState {
    baseline: RollingBaseline,
    threshold: ThresholdDetector,
    spike: SpikeDetector,
}

/// Per-metric detectors consuming the snapshot stream: rolling baseline,
/// threshold hysteresis, and spike flagging.
pub struct PatternEngine {
    states: HashMap<Metric, MetricState>,
    sustain_window: usize,
}

impl PatternEngine {
    pub fn new(config: &AppConfig) -> Self {
        let default_pair = ThresholdPair {
            warn: f64::MAX,
            critical: f64::MAX,
        };
        let states = Metric::ALL
            .into_iter()
            .map(|metric| {
                let pair = config.thresholds.get(&metric).copied().unwrap_or(default_pair);
                (
                    metric,
                    MetricState {
                        baseline: RollingBaseline::new(config.pattern_window_samples),
                        threshold: ThresholdDetector::new(
                            pair.warn,
                            pair.critical,
                            config.sustain_window,
                        ),
                        spike: SpikeDetector::new(config.spike_sigma),
                    },
                )
            })
            .collect();
        Self {
            states,
            sustain_window: config.sustain_window,
        }
    }

    /// Feed one snapshot through every metric's detectors and return the
    /// anomalies to persist. Duplicate alerts (same metric, same type, no
    /// intervening clear) are suppressed by the detectors themselves.
    pub fn observe(&mut self, snapshot: &Snapshot) -> Vec<Anomaly> {
        let mut anomalies = Vec::new();

        for metric in Metric::ALL {
            let Some(value) = metric.extract(snapshot) else {
                continue;
            };
            let Some(state) = self.states.get_mut(&metric) else {
                continue;
            };

            // Baseline stats from the window *before* this sample.
            let stats = state.baseline.stats();
            let deviation_std = match stats {
                Some((mean, std)) if std > 0.0 => (value - mean).abs() / std,
                _ => 0.0,
            };

            match state.threshold.observe(value) {
                ThresholdEvent::WarnFired => anomalies.push(Anomaly {
                    timestamp: snapshot.timestamp,
                    metric_name: metric.as_str().to_string(),
                    current_value: value,
                    expected_value: state.threshold.warn_threshold(),
                    deviation_std,
                    severity: Severity::Warn,
                    context_json: serde_json::json!({
                        "type": "threshold",
                        "level": "warn",
                        "sustain_window": self.sustain_window,
                    }),
                }),
                ThresholdEvent::CriticalFired => anomalies.push(Anomaly {
                    timestamp: snapshot.timestamp,
                    metric_name: metric.as_str().to_string(),
                    current_value: value,
                    expected_value: state.threshold.critical_threshold(),
                    deviation_std,
                    severity: Severity::Critical,
                    context_json: serde_json::json!({
                        "type": "threshold",
                        "level": "critical",
                        "sustain_window": self.sustain_window,
                    }),
                }),
                ThresholdEvent::Cleared | ThresholdEvent::None => {}
            }

            if let Some(event) = state.spike.observe(value, stats) {
                // A spike while the mean already sits above warn is worth
                // more attention than one inside the normal band.
                let severity = if event.mean > state.threshold.warn_threshold() {
                    Severity::Warn
                } else {
                    Severity::Info
                };
                anomalies.push(Anomaly {
                    timestamp: snapshot.timestamp,
                    metric_name: metric.as_str().to_string(),
                    current_value: value,
                    expected_value: event.mean,
                    deviation_std: event.deviation_std,
                    severity,
                    context_json: serde_json::json!({ "type": "spike" }),
                });
            }

            state.baseline.push(value);
        }

        anomalies
    }

    /// Current (mean, std_dev, sample_count) per metric with a live baseline.
    pub fn baseline_rows(&self) -> Vec<(Metric, f64, f64, i64)> {
        self.states
            .iter()
            .filter_map(|(metric, state)| {
                state
                    .baseline
                    .stats()
                    .map(|(mean, std)| (*metric, mean, std, state.baseline.len() as i64))
            })
            .collect()
    }
}

/// Shared handle: the ring-buffer consumer task and the scheduler's
/// baseline flush both go through here.
///
/// Cloning is cheap — clones share the same underlying data via Arc.
#[derive(Clone)]
pub struct PatternHandle {
    engine: Arc<Mutex<PatternEngine>>,
    db: Database,
}

impl PatternHandle {
    pub fn new(config: &AppConfig, db: Database) -> Self {
        Self {
            engine: Arc::new(Mutex::new(PatternEngine::new(config))),
            db,
        }
    }

    /// Run detectors on one snapshot and persist any anomalies
    /// synchronously, preserving per-metric ordering.
    pub async fn process_snapshot(&self, snapshot: &Snapshot) {
        let anomalies = {
            let mut engine = self.engine.lock().await;
            engine.observe(snapshot)
        };
        for anomaly in anomalies {
            info!(
                metric = %anomaly.metric_name,
                severity = anomaly.severity.as_str(),
                value = anomaly.current_value,
                "anomaly detected"
            );
            if let Err(e) = store::insert_anomaly(&self.db, &anomaly).await {
                warn!(error = %e, "failed to persist anomaly");
            }
        }
    }

    /// Persist the latest rolling baselines, one row per metric.
    pub async fn flush_baselines(&self, now_ms: i64) {
        let rows = {
            let engine = self.engine.lock().await;
            engine.baseline_rows()
        };
        for (metric, mean, std_dev, samples) in rows {
            if let Err(e) =
                store::upsert_baseline(&self.db, metric, mean, std_dev, samples, now_ms).await
            {
                warn!(metric = %metric, error = %e, "failed to persist baseline");
            }
        }
    }

    /// Spawn the consumer task: subscribes to the ring buffer and feeds
    /// every published snapshot through the detectors. A lagged
    /// subscription logs and continues from the live edge.
    pub fn spawn(
        &self,
        ring: &RingBuffer,
        mut shutdown: watch::Receiver<bool>,
    ) -> tokio::task::JoinHandle<()> {
        let handle = self.clone();
        let mut rx = ring.subscribe();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown.changed() => {
                        info!("pattern layer stopped");
                        return;
                    }
                    received = rx.recv() => match received {
                        Ok(snapshot) => handle.process_snapshot(&snapshot).await,
                        Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                            warn!(skipped, "pattern layer lagged behind the ring buffer");
                        }
                        Err(tokio::sync::broadcast::error::RecvError::Closed) => {
                            info!("snapshot stream closed; pattern layer stopped");
                            return;
                        }
                    },
                }
            }
        })
    }
}
