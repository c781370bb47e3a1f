use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// The complete sampled state for one timestamp.
///
/// Every fragment is optional: a tick only samples the collectors assigned
/// to its cadence (or faster), and a failed collector contributes an entry
/// in `collector_errors` instead of a fragment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    /// Unix milliseconds UTC, strictly monotonic per process lifetime.
    pub timestamp: i64,
    pub cpu: Option<CpuMetrics>,
    pub ram: Option<RamMetrics>,
    #[serde(rename = "gpu")]
    pub gpus: Option<Vec<GpuMetrics>>,
    pub disk: Option<DiskMetrics>,
    pub network: Option<NetworkMetrics>,
    pub processes: Option<Vec<ProcessInfo>>,
    pub context: Option<SystemContext>,
    pub collection_duration_ms: i64,
    /// Collector name → short failure reason. BTreeMap keeps JSON output stable.
    pub collector_errors: BTreeMap<String, String>,
}

impl Snapshot {
    pub fn empty(timestamp: i64) -> Self {
        Self {
            timestamp,
            cpu: None,
            ram: None,
            gpus: None,
            disk: None,
            network: None,
            processes: None,
            context: None,
            collection_duration_ms: 0,
            collector_errors: BTreeMap::new(),
        }
    }

    /// True if no collector produced any fragment this tick.
    pub fn is_empty(&self) -> bool {
        self.cpu.is_none()
            && self.ram.is_none()
            && self.gpus.is_none()
            && self.disk.is_none()
            && self.network.is_none()
            && self.processes.is_none()
            && self.context.is_none()
    }
}

/// One collector's contribution to a snapshot.
#[derive(Debug, Clone)]
pub enum Fragment {
    Cpu(CpuMetrics),
    Ram(RamMetrics),
    Gpu(Vec<GpuMetrics>),
    Disk(DiskMetrics),
    Network(NetworkMetrics),
    Processes(Vec<ProcessInfo>),
    Context(SystemContext),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CpuMetrics {
    /// Aggregate utilization in [0, 100].
    pub usage_percent: f64,
    /// Current frequency in MHz, when the platform reports one.
    pub frequency_mhz: Option<f64>,
    /// Per-core utilization; empty or length == logical_count.
    pub per_core_usage: Vec<f64>,
    /// Package temperature in Celsius; absent when no sensor reports.
    pub temperature_celsius: Option<f64>,
    pub logical_count: u32,
    pub physical_count: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RamMetrics {
    pub total_gb: f64,
    pub used_gb: f64,
    pub available_gb: f64,
    pub cached_gb: f64,
    pub swap_total_gb: f64,
    pub swap_used_gb: f64,
    /// Derived from used/total when the collector leaves it unset.
    pub usage_percent: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GpuMetrics {
    pub device_index: u32,
    pub name: String,
    pub usage_percent: f64,
    pub memory_used_gb: f64,
    pub memory_total_gb: f64,
    pub temperature_celsius: Option<f64>,
    pub fan_rpm: Option<f64>,
    pub power_watts: Option<f64>,
    pub core_clock_mhz: Option<f64>,
    pub memory_clock_mhz: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiskMetrics {
    /// Aggregate read throughput in MB/s.
    pub read_mbps: f64,
    /// Aggregate write throughput in MB/s.
    pub write_mbps: f64,
    pub io_ops_per_sec: f64,
    pub queue_length: f64,
    pub partitions: Vec<DiskPartition>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiskPartition {
    pub device: String,
    pub total_gb: f64,
    pub used_gb: f64,
    pub free_gb: f64,
    pub usage_percent: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkMetrics {
    /// Receive throughput in MB/s, first-difference of counters over wall time.
    pub download_mbps: f64,
    /// Transmit throughput in MB/s.
    pub upload_mbps: f64,
    pub connections_active: u64,
    pub bytes_sent: u64,
    pub bytes_received: u64,
    pub packets_sent: u64,
    pub packets_received: u64,
    pub errors_in: u64,
    pub errors_out: u64,
    pub interfaces: Vec<NetworkInterface>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkInterface {
    pub name: String,
    /// Link speed in Mbit/s as reported by the kernel; absent for virtual interfaces.
    pub speed_mbps: Option<f64>,
    pub is_up: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessInfo {
    pub pid: u32,
    pub name: String,
    pub cpu_percent: f64,
    pub memory_mb: f64,
    #[serde(rename = "threads")]
    pub thread_count: Option<u32>,
    pub status: String,
    /// Unix seconds the process started, when known.
    pub started_at: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemContext {
    pub user_active: bool,
    pub idle_seconds: u64,
    pub screen_locked: bool,
    pub time_of_day: TimeOfDay,
    pub day_of_week: String,
    pub user_action: UserAction,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimeOfDay {
    Morning,
    Afternoon,
    Evening,
    Night,
}

impl TimeOfDay {
    pub fn from_hour(hour: u32) -> Self {
        match hour {
            5..=11 => Self::Morning,
            12..=16 => Self::Afternoon,
            17..=21 => Self::Evening,
            _ => Self::Night,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Morning => "morning",
            Self::Afternoon => "afternoon",
            Self::Evening => "evening",
            Self::Night => "night",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UserAction {
    Coding,
    Gaming,
    Browsing,
    Streaming,
    Idle,
    Unknown,
}

impl UserAction {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Coding => "coding",
            Self::Gaming => "gaming",
            Self::Browsing => "browsing",
            Self::Streaming => "streaming",
            Self::Idle => "idle",
            Self::Unknown => "unknown",
        }
    }
}

/// The primary per-metric series the pattern layer and the history
/// endpoint operate on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Metric {
    CpuPercent,
    RamPercent,
    GpuPercent,
    DiskReadMbps,
    DiskWriteMbps,
    NetDownMbps,
    NetUpMbps,
}

impl Metric {
    pub const ALL: [Metric; 7] = [
        Metric::CpuPercent,
        Metric::RamPercent,
        Metric::GpuPercent,
        Metric::DiskReadMbps,
        Metric::DiskWriteMbps,
        Metric::NetDownMbps,
        Metric::NetUpMbps,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::CpuPercent => "cpu_percent",
            Self::RamPercent => "ram_percent",
            Self::GpuPercent => "gpu_percent",
            Self::DiskReadMbps => "disk_read_mbps",
            Self::DiskWriteMbps => "disk_write_mbps",
            Self::NetDownMbps => "net_down_mbps",
            Self::NetUpMbps => "net_up_mbps",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "cpu_percent" => Some(Self::CpuPercent),
            "ram_percent" => Some(Self::RamPercent),
            "gpu_percent" => Some(Self::GpuPercent),
            "disk_read_mbps" => Some(Self::DiskReadMbps),
            "disk_write_mbps" => Some(Self::DiskWriteMbps),
            "net_down_mbps" => Some(Self::NetDownMbps),
            "net_up_mbps" => Some(Self::NetUpMbps),
            _ => None,
        }
    }

    /// Extract this metric's value from a snapshot, if the relevant
    /// fragment was sampled this tick.
    pub fn extract(self, snapshot: &Snapshot) -> Option<f64> {
        match self {
            Self::CpuPercent => snapshot.cpu.as_ref().map(|c| c.usage_percent),
            Self::RamPercent => snapshot.ram.as_ref().and_then(|r| r.usage_percent),
            Self::GpuPercent => snapshot.gpus.as_ref().and_then(|gpus| {
                if gpus.is_empty() {
                    None
                } else {
                    let sum: f64 = gpus.iter().map(|g| g.usage_percent).sum();
                    Some(sum / gpus.len() as f64)
                }
            }),
            Self::DiskReadMbps => snapshot.disk.as_ref().map(|d| d.read_mbps),
            Self::DiskWriteMbps => snapshot.disk.as_ref().map(|d| d.write_mbps),
            Self::NetDownMbps => snapshot.network.as_ref().map(|n| n.download_mbps),
            Self::NetUpMbps => snapshot.network.as_ref().map(|n| n.upload_mbps),
        }
    }
}

impl std::fmt::Display for Metric {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warn,
    Critical,
}

impl Severity {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Critical => "critical",
        }
    }
}

/// A persisted baseline/threshold/spike event. Append-only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Anomaly {
    pub timestamp: i64,
    pub metric_name: String,
    pub current_value: f64,
    pub expected_value: f64,
    pub deviation_std: f64,
    pub severity: Severity,
    pub context_json: serde_json::Value,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_snapshot_has_no_fragments() {
        let s = Snapshot::empty(1_000);
        assert!(s.is_empty());
        assert_eq!(s.timestamp, 1_000);
    }

    #[test]
    fn snapshot_with_cpu_is_not_empty() {
        let mut s = Snapshot::empty(1_000);
        s.cpu = Some(CpuMetrics {
            usage_percent: 12.5,
            frequency_mhz: Some(2400.0),
            per_core_usage: vec![10.0, 15.0],
            temperature_celsius: None,
            logical_count: 2,
            physical_count: 1,
        });
        assert!(!s.is_empty());
    }

    #[test]
    fn time_of_day_boundaries() {
        assert_eq!(TimeOfDay::from_hour(5), TimeOfDay::Morning);
        assert_eq!(TimeOfDay::from_hour(11), TimeOfDay::Morning);
        assert_eq!(TimeOfDay::from_hour(12), TimeOfDay::Afternoon);
        assert_eq!(TimeOfDay::from_hour(16), TimeOfDay::Afternoon);
        assert_eq!(TimeOfDay::from_hour(17), TimeOfDay::Evening);
        assert_eq!(TimeOfDay::from_hour(21), TimeOfDay::Evening);
        assert_eq!(TimeOfDay::from_hour(22), TimeOfDay::Night);
        assert_eq!(TimeOfDay::from_hour(4), TimeOfDay::Night);
    }

    #[test]
    fn metric_parse_round_trips() {
        for m in Metric::ALL {
            assert_eq!(Metric::parse(m.as_str()), Some(m));
        }
        assert_eq!(Metric::parse("bogus"), None);
    }

    #[test]
    fn gpu_percent_averages_devices() {
        let mut s = Snapshot::empty(1);
        s.gpus = Some(vec![
            GpuMetrics {
                device_index: 0,
                name: "a".into(),
                usage_percent: 40.0,
                memory_used_gb: 1.0,
                memory_total_gb: 8.0,
                temperature_celsius: None,
                fan_rpm: None,
                power_watts: None,
                core_clock_mhz: None,
                memory_clock_mhz: None,
            },
            GpuMetrics {
                device_index: 1,
                name: "b".into(),
                usage_percent: 60.0,
                memory_used_gb: 1.0,
                memory_total_gb: 8.0,
                temperature_celsius: None,
                fan_rpm: None,
                power_watts: None,
                core_clock_mhz: None,
                memory_clock_mhz: None,
            },
        ]);
        assert_eq!(Metric::GpuPercent.extract(&s), Some(50.0));
    }

    #[test]
    fn metric_extract_none_when_fragment_missing() {
        let s = Snapshot::empty(1);
        for m in Metric::ALL {
            assert_eq!(m.extract(&s), None);
        }
    }
}
