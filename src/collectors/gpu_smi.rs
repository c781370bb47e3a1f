use async_trait::async_trait;
use tokio::time::Instant;

use super::{Cadence, Collector, CollectorFailure};
use crate::model::{Fragment, GpuMetrics};

const QUERY_FIELDS: &str = "name,utilization.gpu,memory.used,memory.total,temperature.gpu,fan.speed,power.draw,clocks.sm,clocks.mem";

/// External-tool GPU bridge: queries all NVIDIA GPUs via `nvidia-smi`.
///
/// Optional; enable with `gpu_smi` in COLLECTORS_ENABLED in place of the
/// sysfs `gpu` collector.
pub struct GpuSmiCollector;

impl GpuSmiCollector {
    pub fn new() -> Self {
        Self
    }
}

impl Default for GpuSmiCollector {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Collector for GpuSmiCollector {
    fn name(&self) -> &'static str {
        "gpu_smi"
    }

    fn cadence(&self) -> Cadence {
        Cadence::Low
    }

    async fn sample(&self, deadline: Instant) -> Result<Fragment, CollectorFailure> {
        let output = tokio::time::timeout_at(
            deadline,
            tokio::process::Command::new("nvidia-smi")
                .arg(format!("--query-gpu={QUERY_FIELDS}"))
                .arg("--format=csv,noheader,nounits")
                .output(),
        )
        .await
        .map_err(|_| CollectorFailure::timeout())?;

        let output = match output {
            Ok(o) => o,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(CollectorFailure::missing_dependency(
                    "nvidia-smi not found on PATH",
                ));
            }
            Err(e) if e.kind() == std::io::ErrorKind::PermissionDenied => {
                return Err(CollectorFailure::permission_denied(format!(
                    "nvidia-smi: {e}"
                )));
            }
            Err(e) => {
                return Err(CollectorFailure::transient(format!("nvidia-smi: {e}")));
            }
        };

        if !output.status.success() {
            // Driver present but no usable device; will not recover this session.
            return Err(CollectorFailure::unsupported(format!(
                "nvidia-smi exited with {}",
                output.status
            )));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let gpus = parse_smi_output(&stdout);
        if gpus.is_empty() {
            return Err(CollectorFailure::unsupported("nvidia-smi reported no GPUs"));
        }
        Ok(Fragment::Gpu(gpus))
    }
}

/// Parse csv,noheader,nounits output. `[N/A]` and `[Not Supported]` fields
/// become absent, never zero.
fn parse_smi_output(stdout: &str) -> Vec<GpuMetrics> {
    stdout
        .lines()
        .enumerate()
        .filter_map(|(idx, line)| {
            let parts: Vec<&str> = line.split(',').map(|s| s.trim()).collect();
            if parts.len() < 4 {
                return None;
            }
            let name = parts[0].to_string();
            let usage_percent: f64 = parse_field(parts.get(1))?;
            let memory_used_mb: f64 = parse_field(parts.get(2))?;
            let memory_total_mb: f64 = parse_field(parts.get(3))?;
            Some(GpuMetrics {
                device_index: idx as u32,
                name,
                usage_percent: usage_percent.clamp(0.0, 100.0),
                memory_used_gb: (memory_used_mb / 1024.0).min(memory_total_mb / 1024.0),
                memory_total_gb: memory_total_mb / 1024.0,
                temperature_celsius: parse_field(parts.get(4)),
                fan_rpm: parse_field(parts.get(5)),
                power_watts: parse_field(parts.get(6)),
                core_clock_mhz: parse_field(parts.get(7)),
                memory_clock_mhz: parse_field(parts.get(8)),
            })
        })
        .collect()
}

fn parse_field(part: Option<&&str>) -> Option<f64> {
    part.and_then(|s| s.parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_two_devices() {
        let out = "NVIDIA GeForce RTX 3080, 45, 2048, 10240, 61, 1800, 220.5, 1710, 9501\n\
                   NVIDIA GeForce RTX 3060, 10, 512, 12288, 40, 0, 30.1, 600, 405\n";
        let gpus = parse_smi_output(out);
        assert_eq!(gpus.len(), 2);
        assert_eq!(gpus[0].device_index, 0);
        assert_eq!(gpus[0].name, "NVIDIA GeForce RTX 3080");
        assert_eq!(gpus[0].usage_percent, 45.0);
        assert_eq!(gpus[0].memory_used_gb, 2.0);
        assert_eq!(gpus[0].memory_total_gb, 10.0);
        assert_eq!(gpus[0].temperature_celsius, Some(61.0));
        assert_eq!(gpus[1].device_index, 1);
    }

    #[test]
    fn not_supported_fields_become_absent() {
        let out = "Tesla K80, 12, 1024, 11441, 55, [Not Supported], [N/A], 562, 2505\n";
        let gpus = parse_smi_output(out);
        assert_eq!(gpus.len(), 1);
        assert_eq!(gpus[0].fan_rpm, None);
        assert_eq!(gpus[0].power_watts, None);
        assert_eq!(gpus[0].core_clock_mhz, Some(562.0));
    }

    #[test]
    fn short_lines_are_skipped() {
        let out = "garbage line\n";
        assert!(parse_smi_output(out).is_empty());
    }

    #[test]
    fn memory_used_clamped_to_total() {
        let out = "X, 10, 20480, 10240, 50, 0, 10, 100, 100\n";
        let gpus = parse_smi_output(out);
        assert_eq!(gpus[0].memory_used_gb, gpus[0].memory_total_gb);
    }
}
