use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use sysinfo::Disks;
use tokio::time::Instant;

use super::{Cadence, Collector, CollectorFailure};
use crate::model::{DiskMetrics, DiskPartition, Fragment};

const BYTES_PER_GB: f64 = 1024.0 * 1024.0 * 1024.0;
const BYTES_PER_MB: f64 = 1024.0 * 1024.0;
const SECTOR_BYTES: u64 = 512;

/// Aggregate throughput counters across all physical block devices.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub(crate) struct DiskCounters {
    pub read_bytes: u64,
    pub write_bytes: u64,
    pub io_ops: u64,
    pub in_flight: u64,
}

/// Delta-based disk collector: throughput and IOPS from `/proc/diskstats`
/// first-differences, partition usage from mounted filesystems.
///
/// The first sample after startup emits zero rates (warming up); a counter
/// regression (device reset) also emits zero and restarts the delta state.
pub struct DiskCollector {
    prev: Arc<Mutex<Option<(DiskCounters, Instant)>>>,
}

impl DiskCollector {
    pub fn new() -> Self {
        Self {
            prev: Arc::new(Mutex::new(None)),
        }
    }
}

impl Default for DiskCollector {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Collector for DiskCollector {
    fn name(&self) -> &'static str {
        "disk"
    }

    fn cadence(&self) -> Cadence {
        Cadence::Medium
    }

    async fn sample(&self, _deadline: Instant) -> Result<Fragment, CollectorFailure> {
        let prev = Arc::clone(&self.prev);
        let metrics = tokio::task::spawn_blocking(move || {
            let content = std::fs::read_to_string("/proc/diskstats").map_err(|e| {
                if e.kind() == std::io::ErrorKind::PermissionDenied {
                    CollectorFailure::permission_denied(format!("/proc/diskstats: {e}"))
                } else {
                    CollectorFailure::unsupported(format!("/proc/diskstats: {e}"))
                }
            })?;
            let current = parse_diskstats(&content);
            let now = Instant::now();

            let mut state = match prev.lock() {
                Ok(g) => g,
                Err(poisoned) => poisoned.into_inner(),
            };
            let (read_mbps, write_mbps, io_ops_per_sec) = match *state {
                Some((before, at)) => rates(before, current, now.duration_since(at)),
                None => (0.0, 0.0, 0.0), // warming up
            };
            *state = Some((current, now));
            drop(state);

            Ok(DiskMetrics {
                read_mbps,
                write_mbps,
                io_ops_per_sec,
                queue_length: current.in_flight as f64,
                partitions: sample_partitions(),
            })
        })
        .await
        .map_err(|e| CollectorFailure::transient(format!("disk sampler task failed: {e}")))??;

        Ok(Fragment::Disk(metrics))
    }
}

/// Sum counters across physical devices, skipping partitions and
/// virtual devices (loop, ram, zram, dm).
pub(crate) fn parse_diskstats(content: &str) -> DiskCounters {
    let mut total = DiskCounters::default();
    for line in content.lines() {
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() < 12 {
            continue;
        }
        let name = fields[2];
        if !is_physical_device(name) {
            continue;
        }
        let parse = |i: usize| fields.get(i).and_then(|s| s.parse::<u64>().ok()).unwrap_or(0);
        total.read_bytes += parse(5) * SECTOR_BYTES; // sectors read
        total.write_bytes += parse(9) * SECTOR_BYTES; // sectors written
        total.io_ops += parse(3) + parse(7); // reads + writes completed
        total.in_flight += parse(11);
    }
    total
}

fn is_physical_device(name: &str) -> bool {
    for prefix in ["loop", "ram", "zram", "dm-", "sr", "md"] {
        if name.starts_with(prefix) {
            return false;
        }
    }
    // Partitions: "sda1", "vdb2", "nvme0n1p3"
    if name.starts_with("nvme") {
        return !name.contains('p');
    }
    !name.ends_with(|c: char| c.is_ascii_digit())
}

/// First-difference rates over the wall-clock gap. Counter regression
/// (wraparound or reset) yields zero for every rate.
pub(crate) fn rates(prev: DiskCounters, cur: DiskCounters, dt: Duration) -> (f64, f64, f64) {
    let secs = dt.as_secs_f64();
    if secs <= 0.0 {
        return (0.0, 0.0, 0.0);
    }
    if cur.read_bytes < prev.read_bytes
        || cur.write_bytes < prev.write_bytes
        || cur.io_ops < prev.io_ops
    {
        return (0.0, 0.0, 0.0);
    }
    (
        (cur.read_bytes - prev.read_bytes) as f64 / BYTES_PER_MB / secs,
        (cur.write_bytes - prev.write_bytes) as f64 / BYTES_PER_MB / secs,
        (cur.io_ops - prev.io_ops) as f64 / secs,
    )
}

/// Mounted-filesystem usage, ordered by device name.
fn sample_partitions() -> Vec<DiskPartition> {
    let disks = Disks::new_with_refreshed_list();
    let mut partitions: Vec<DiskPartition> = disks
        .iter()
        .map(|d| {
            let total = d.total_space() as f64;
            let free = d.available_space() as f64;
            let used = (total - free).max(0.0);
            DiskPartition {
                device: d.name().to_string_lossy().into_owned(),
                total_gb: total / BYTES_PER_GB,
                used_gb: used / BYTES_PER_GB,
                free_gb: free / BYTES_PER_GB,
                usage_percent: if total > 0.0 { used / total * 100.0 } else { 0.0 },
            }
        })
        .collect();
    partitions.sort_by(|a, b| a.device.cmp(&b.device));
    partitions.dedup_by(|a, b| a.device == b.device);
    partitions
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "\
   8       0 sda 1000 10 8000 500 2000 20 16000 900 3 1400 1400
   8       1 sda1 900 10 7000 450 1900 20 15000 850 0 1300 1300
   7       0 loop0 50 0 400 10 0 0 0 0 0 10 10
 259       0 nvme0n1 4000 0 64000 100 6000 0 96000 200 1 300 300
 259       1 nvme0n1p1 3900 0 60000 90 5900 0 90000 190 0 280 280
";

    #[test]
    fn parse_sums_physical_devices_only() {
        let c = parse_diskstats(SAMPLE);
        // sda + nvme0n1; partitions and loop skipped
        assert_eq!(c.read_bytes, (8000 + 64000) * SECTOR_BYTES);
        assert_eq!(c.write_bytes, (16000 + 96000) * SECTOR_BYTES);
        assert_eq!(c.io_ops, 1000 + 2000 + 4000 + 6000);
        assert_eq!(c.in_flight, 3 + 1);
    }

    #[test]
    fn physical_device_filter() {
        assert!(is_physical_device("sda"));
        assert!(is_physical_device("vdb"));
        assert!(is_physical_device("nvme0n1"));
        assert!(!is_physical_device("sda1"));
        assert!(!is_physical_device("nvme0n1p2"));
        assert!(!is_physical_device("loop7"));
        assert!(!is_physical_device("zram0"));
        assert!(!is_physical_device("dm-0"));
    }

    #[test]
    fn rates_are_first_differences() {
        let prev = DiskCounters {
            read_bytes: 0,
            write_bytes: 0,
            io_ops: 0,
            in_flight: 0,
        };
        let cur = DiskCounters {
            read_bytes: 10 * 1024 * 1024,
            write_bytes: 20 * 1024 * 1024,
            io_ops: 500,
            in_flight: 2,
        };
        let (r, w, ops) = rates(prev, cur, Duration::from_secs(10));
        assert!((r - 1.0).abs() < 1e-9);
        assert!((w - 2.0).abs() < 1e-9);
        assert!((ops - 50.0).abs() < 1e-9);
    }

    #[test]
    fn counter_regression_resets_to_zero() {
        let prev = DiskCounters {
            read_bytes: 1000,
            write_bytes: 1000,
            io_ops: 100,
            in_flight: 0,
        };
        let cur = DiskCounters {
            read_bytes: 10, // wrapped
            write_bytes: 2000,
            io_ops: 200,
            in_flight: 0,
        };
        assert_eq!(rates(prev, cur, Duration::from_secs(5)), (0.0, 0.0, 0.0));
    }

    #[test]
    fn zero_interval_yields_zero_rates() {
        let c = DiskCounters::default();
        assert_eq!(rates(c, c, Duration::from_secs(0)), (0.0, 0.0, 0.0));
    }

    #[tokio::test]
    async fn first_sample_is_warming_up() {
        let collector = DiskCollector::new();
        let deadline = Instant::now() + Duration::from_secs(5);
        if let Ok(Fragment::Disk(d)) = collector.sample(deadline).await {
            assert_eq!(d.read_mbps, 0.0);
            assert_eq!(d.write_mbps, 0.0);
        }
    }
}
