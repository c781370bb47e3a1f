use async_trait::async_trait;
use tokio::time::Instant;

use super::{Cadence, Collector, CollectorFailure};
use crate::model::{Fragment, GpuMetrics};

const BYTES_PER_GB: f64 = 1024.0 * 1024.0 * 1024.0;

/// Platform-query GPU collector: enumerates AMD GPUs through the kernel
/// sysfs interface (`/sys/class/drm/card*/device`). No CLI tools needed.
///
/// NVIDIA hosts should enable the `gpu_smi` bridge collector instead.
pub struct GpuCollector;

impl GpuCollector {
    pub fn new() -> Self {
        Self
    }
}

impl Default for GpuCollector {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Collector for GpuCollector {
    fn name(&self) -> &'static str {
        "gpu"
    }

    fn cadence(&self) -> Cadence {
        Cadence::Low
    }

    async fn sample(&self, _deadline: Instant) -> Result<Fragment, CollectorFailure> {
        let gpus = tokio::task::spawn_blocking(sample_amdgpu_sysfs)
            .await
            .map_err(|e| CollectorFailure::transient(format!("gpu sampler task failed: {e}")))?;

        if gpus.is_empty() {
            // Permanent for this session: no sysfs-visible GPU will appear
            // without a reboot. The pipeline disables this collector.
            return Err(CollectorFailure::unsupported(
                "no amdgpu device under /sys/class/drm",
            ));
        }
        Ok(Fragment::Gpu(gpus))
    }
}

/// Enumerate "cardN" entries and read busy percent, VRAM and hwmon sensors.
fn sample_amdgpu_sysfs() -> Vec<GpuMetrics> {
    let mut results = Vec::new();
    let drm_dir = match std::fs::read_dir("/sys/class/drm") {
        Ok(d) => d,
        Err(_) => return results,
    };

    let mut card_indices: Vec<u32> = Vec::new();
    for entry in drm_dir.flatten() {
        let name = entry.file_name();
        let name_str = name.to_string_lossy();
        // Match "card0", "card1", etc — skip "card0-DP-1" style entries
        if let Some(rest) = name_str.strip_prefix("card") {
            if let Ok(idx) = rest.parse::<u32>() {
                card_indices.push(idx);
            }
        }
    }
    card_indices.sort_unstable();

    for (device_index, card_idx) in card_indices.iter().enumerate() {
        let device = format!("/sys/class/drm/card{card_idx}/device");

        let usage_percent = match read_sysfs_u64(&format!("{device}/gpu_busy_percent")) {
            Some(v) => v.min(100) as f64,
            None => continue, // not an amdgpu-class device
        };
        let memory_total_gb = read_sysfs_u64(&format!("{device}/mem_info_vram_total"))
            .map(|b| b as f64 / BYTES_PER_GB)
            .unwrap_or(0.0);
        let memory_used_gb = read_sysfs_u64(&format!("{device}/mem_info_vram_used"))
            .map(|b| b as f64 / BYTES_PER_GB)
            .unwrap_or(0.0)
            .min(memory_total_gb);

        let hwmon = find_hwmon_dir(&device);
        let temperature_celsius = hwmon
            .as_deref()
            .and_then(|h| read_sysfs_u64(&format!("{h}/temp1_input")))
            .map(|millic| millic as f64 / 1000.0);
        let fan_rpm = hwmon
            .as_deref()
            .and_then(|h| read_sysfs_u64(&format!("{h}/fan1_input")))
            .map(|rpm| rpm as f64);
        let power_watts = hwmon
            .as_deref()
            .and_then(|h| read_sysfs_u64(&format!("{h}/power1_average")))
            .map(|microw| microw as f64 / 1_000_000.0);

        results.push(GpuMetrics {
            device_index: device_index as u32,
            name: format!("amdgpu card{card_idx}"),
            usage_percent,
            memory_used_gb,
            memory_total_gb,
            temperature_celsius,
            fan_rpm,
            power_watts,
            core_clock_mhz: None,
            memory_clock_mhz: None,
        });
    }

    results
}

fn read_sysfs_u64(path: &str) -> Option<u64> {
    std::fs::read_to_string(path)
        .ok()
        .and_then(|s| s.trim().parse().ok())
}

fn find_hwmon_dir(device: &str) -> Option<String> {
    let hwmon_root = format!("{device}/hwmon");
    let mut entries: Vec<String> = std::fs::read_dir(hwmon_root)
        .ok()?
        .flatten()
        .map(|e| e.path().to_string_lossy().into_owned())
        .collect();
    entries.sort();
    entries.into_iter().next()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collectors::FailureCode;
    use tokio::time::Duration;

    #[tokio::test]
    async fn sample_yields_gpus_or_unsupported() {
        let collector = GpuCollector::new();
        let deadline = Instant::now() + Duration::from_secs(5);
        match collector.sample(deadline).await {
            Ok(Fragment::Gpu(gpus)) => {
                assert!(!gpus.is_empty());
                for g in gpus {
                    assert!((0.0..=100.0).contains(&g.usage_percent));
                    assert!(g.memory_used_gb <= g.memory_total_gb);
                }
            }
            Ok(_) => panic!("gpu collector returned a non-gpu fragment"),
            Err(f) => assert_eq!(f.code, FailureCode::Unsupported),
        }
    }
}
