use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use sysinfo::{Components, System};
use tokio::time::Instant;

use super::{Cadence, Collector, CollectorFailure};
use crate::model::{CpuMetrics, Fragment};

/// Samples aggregate and per-core CPU utilization, frequency, core counts
/// and package temperature.
///
/// Utilization is delta-based inside sysinfo: the `System` persists across
/// ticks so consecutive refreshes yield real percentages (the very first
/// tick reads as zero).
pub struct CpuCollector {
    state: Arc<Mutex<SamplerState>>,
}

struct SamplerState {
    sys: System,
    components: Components,
}

impl CpuCollector {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(SamplerState {
                sys: System::new(),
                components: Components::new_with_refreshed_list(),
            })),
        }
    }
}

impl Default for CpuCollector {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Collector for CpuCollector {
    fn name(&self) -> &'static str {
        "cpu"
    }

    fn cadence(&self) -> Cadence {
        Cadence::High
    }

    async fn sample(&self, _deadline: Instant) -> Result<Fragment, CollectorFailure> {
        let state = Arc::clone(&self.state);
        let metrics = tokio::task::spawn_blocking(move || {
            let mut guard = match state.lock() {
                Ok(g) => g,
                Err(poisoned) => poisoned.into_inner(),
            };
            let SamplerState { sys, components } = &mut *guard;

            sys.refresh_cpu_usage();

            let per_core_usage: Vec<f64> =
                sys.cpus().iter().map(|c| f64::from(c.cpu_usage())).collect();
            let logical_count = per_core_usage.len() as u32;
            let usage_percent = if per_core_usage.is_empty() {
                0.0
            } else {
                per_core_usage.iter().sum::<f64>() / per_core_usage.len() as f64
            };
            let frequency_mhz = sys
                .cpus()
                .first()
                .map(|c| c.frequency() as f64)
                .filter(|f| *f > 0.0);
            let physical_count = sys
                .physical_core_count()
                .map(|n| n as u32)
                .unwrap_or(logical_count);

            components.refresh(false);
            let temperature_celsius = package_temperature(components);

            CpuMetrics {
                usage_percent,
                frequency_mhz,
                per_core_usage,
                temperature_celsius,
                logical_count,
                physical_count,
            }
        })
        .await
        .map_err(|e| CollectorFailure::transient(format!("cpu sampler task failed: {e}")))?;

        if metrics.logical_count == 0 {
            return Err(CollectorFailure::unsupported("no CPUs reported"));
        }
        Ok(Fragment::Cpu(metrics))
    }
}

/// Pick the CPU package temperature from the component list.
/// Absent (not a sentinel) when no sensor matches.
fn package_temperature(components: &Components) -> Option<f64> {
    let labels = ["package", "tctl", "tdie", "coretemp", "cpu"];
    components
        .iter()
        .find(|c| {
            let label = c.label().to_lowercase();
            labels.iter().any(|want| label.contains(want))
        })
        .and_then(|c| c.temperature())
        .map(f64::from)
        .filter(|t| t.is_finite() && *t > 0.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::Duration;

    #[tokio::test]
    async fn sample_produces_cpu_fragment() {
        let collector = CpuCollector::new();
        let deadline = Instant::now() + Duration::from_secs(5);
        match collector.sample(deadline).await {
            Ok(Fragment::Cpu(cpu)) => {
                assert!(cpu.logical_count > 0);
                assert!(cpu.physical_count > 0);
                assert!(cpu.usage_percent >= 0.0);
                assert!(
                    cpu.per_core_usage.is_empty()
                        || cpu.per_core_usage.len() == cpu.logical_count as usize
                );
            }
            Ok(_) => panic!("cpu collector returned a non-cpu fragment"),
            // Containerized test environments may legitimately report no CPUs.
            Err(f) => assert!(f.code.is_permanent() || f.code == super::super::FailureCode::TransientError),
        }
    }

    #[tokio::test]
    async fn repeated_samples_are_consistent() {
        let collector = CpuCollector::new();
        let deadline = Instant::now() + Duration::from_secs(5);
        let first = collector.sample(deadline).await;
        let second = collector.sample(deadline).await;
        // A second call on the same instance behaves as a fresh call.
        assert_eq!(first.is_ok(), second.is_ok());
    }
}
