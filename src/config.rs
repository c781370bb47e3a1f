use std::collections::{BTreeSet, HashMap};

use anyhow::{bail, Context, Result};

use crate::model::Metric;

/// Per-metric warn/critical threshold pair.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ThresholdPair {
    pub warn: f64,
    pub critical: f64,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Bind address; loopback by default (env: LISTEN_ADDR)
    pub listen_addr: String,

    /// SQLite database URL (env: DATABASE_URL)
    pub database_url: String,

    /// HIGH cadence in seconds: cpu, ram, context (env: HIGH_INTERVAL_SEC)
    pub high_interval_sec: u64,

    /// MEDIUM cadence: disk, network, processes (env: MEDIUM_INTERVAL_SEC)
    pub medium_interval_sec: u64,

    /// LOW cadence: gpu (env: LOW_INTERVAL_SEC)
    pub low_interval_sec: u64,

    /// VERY_LOW cadence: baseline flush, retention sweep (env: VERY_LOW_INTERVAL_SEC)
    pub very_low_interval_sec: u64,

    /// Fraction of the cadence interval a tick may spend sampling (env: TICK_BUDGET_RATIO)
    pub tick_budget_ratio: f64,

    /// Enabled collector names (env: COLLECTORS_ENABLED, comma-separated)
    pub collectors_enabled: BTreeSet<String>,

    /// Snapshot retention horizon in days (env: RETENTION_DAYS)
    pub retention_days: u32,

    /// Anomaly retention horizon in days (env: ANOMALY_RETENTION_DAYS)
    pub anomaly_retention_days: u32,

    /// Database file size cap in MB; oldest-first purge beyond it (env: DB_SIZE_CAP_MB)
    pub db_size_cap_mb: u64,

    /// Ring buffer capacity in snapshots (env: RING_CAPACITY)
    pub ring_capacity: usize,

    /// Per-subscriber live queue capacity (env: SUBSCRIBER_CAPACITY)
    pub subscriber_capacity: usize,

    /// Store write queue capacity; drop-oldest beyond it (env: WRITE_QUEUE_CAPACITY)
    pub write_queue_capacity: usize,

    /// Pattern rolling window in samples (env: PATTERN_WINDOW_SAMPLES)
    pub pattern_window_samples: usize,

    /// Spike detector sigma multiplier (env: SPIKE_SIGMA)
    pub spike_sigma: f64,

    /// Consecutive samples a threshold must sustain before an alert (env: SUSTAIN_WINDOW)
    pub sustain_window: usize,

    /// Per-metric warn/critical thresholds (env: THRESHOLD_<METRIC>_WARN/_CRITICAL)
    pub thresholds: HashMap<Metric, ThresholdPair>,

    /// Top-N processes kept per snapshot (env: PROCESS_TOP_N)
    pub process_top_n: usize,

    /// Capture process names only, never paths or command lines (env: PROCESS_NAME_ONLY)
    pub process_name_only: bool,

    /// Log file path; stderr when unset (env: LOG_FILE)
    pub log_file: Option<String>,

    /// Startup rollover threshold for the log file in MB (env: LOG_ROTATE_MB)
    pub log_rotate_mb: u64,

    /// Samples required before training is considered ready (env: MIN_TRAINING_SAMPLES)
    pub min_training_samples: u64,

    /// Hours of history required before training is ready (env: MIN_TRAINING_HOURS)
    pub min_training_hours: f64,

    /// Resident-set self-throttle cap in MB (env: MEMORY_CAP_MB)
    pub memory_cap_mb: u64,

    /// Own-process CPU self-throttle cap in percent (env: CPU_OVERHEAD_CAP_PERCENT)
    pub cpu_overhead_cap_percent: f64,

    /// Per-request HTTP deadline in seconds (env: HTTP_TIMEOUT_SECS)
    pub http_timeout_secs: u64,

    /// In-flight tick drain budget at shutdown in seconds (env: DRAIN_BUDGET_SECS)
    pub drain_budget_secs: u64,

    /// Hard shutdown grace in seconds (env: SHUTDOWN_GRACE_SECS)
    pub shutdown_grace_secs: u64,
}

/// Collector names accepted in COLLECTORS_ENABLED.
pub const KNOWN_COLLECTORS: &[&str] = &[
    "cpu", "ram", "gpu", "disk", "network", "process", "context", "gpu_smi", "session",
];

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> Result<T> {
    match std::env::var(key) {
        Ok(v) => v
            .parse()
            .map_err(|_| anyhow::anyhow!("invalid value for {key}: {v:?}")),
        Err(_) => Ok(default),
    }
}

fn default_thresholds() -> HashMap<Metric, ThresholdPair> {
    let mut map = HashMap::new();
    map.insert(Metric::CpuPercent, ThresholdPair { warn: 85.0, critical: 95.0 });
    map.insert(Metric::RamPercent, ThresholdPair { warn: 90.0, critical: 97.0 });
    map.insert(Metric::GpuPercent, ThresholdPair { warn: 90.0, critical: 98.0 });
    map.insert(Metric::DiskReadMbps, ThresholdPair { warn: 400.0, critical: 800.0 });
    map.insert(Metric::DiskWriteMbps, ThresholdPair { warn: 400.0, critical: 800.0 });
    map.insert(Metric::NetDownMbps, ThresholdPair { warn: 80.0, critical: 110.0 });
    map.insert(Metric::NetUpMbps, ThresholdPair { warn: 80.0, critical: 110.0 });
    map
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        let collectors_enabled: BTreeSet<String> = std::env::var("COLLECTORS_ENABLED")
            .unwrap_or_else(|_| "cpu,ram,gpu,disk,network,process,context".into())
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        for name in &collectors_enabled {
            if !KNOWN_COLLECTORS.contains(&name.as_str()) {
                bail!("unknown collector in COLLECTORS_ENABLED: {name:?}");
            }
        }

        // The bridge collectors replace a core collector for the same
        // fragment family; both enabled at once is a configuration error.
        if collectors_enabled.contains("gpu") && collectors_enabled.contains("gpu_smi") {
            bail!("collectors 'gpu' and 'gpu_smi' both feed the gpu fragment — enable one");
        }
        if collectors_enabled.contains("context") && collectors_enabled.contains("session") {
            bail!("collectors 'context' and 'session' both feed the context fragment — enable one");
        }

        let mut thresholds = default_thresholds();
        for metric in Metric::ALL {
            let upper = metric.as_str().to_uppercase();
            let warn = env_parse(&format!("THRESHOLD_{upper}_WARN"), thresholds[&metric].warn)?;
            let critical = env_parse(
                &format!("THRESHOLD_{upper}_CRITICAL"),
                thresholds[&metric].critical,
            )?;
            if warn > critical {
                bail!("threshold for {metric}: warn ({warn}) must not exceed critical ({critical})");
            }
            thresholds.insert(metric, ThresholdPair { warn, critical });
        }

        let tick_budget_ratio: f64 = env_parse("TICK_BUDGET_RATIO", 0.8)?;
        if !(0.1..=1.0).contains(&tick_budget_ratio) {
            bail!("TICK_BUDGET_RATIO must be in [0.1, 1.0], got {tick_budget_ratio}");
        }

        let high_interval_sec = env_parse("HIGH_INTERVAL_SEC", 3)?;
        let medium_interval_sec = env_parse("MEDIUM_INTERVAL_SEC", 15)?;
        let low_interval_sec = env_parse("LOW_INTERVAL_SEC", 60)?;
        let very_low_interval_sec = env_parse("VERY_LOW_INTERVAL_SEC", 300)?;
        for (key, v) in [
            ("HIGH_INTERVAL_SEC", high_interval_sec),
            ("MEDIUM_INTERVAL_SEC", medium_interval_sec),
            ("LOW_INTERVAL_SEC", low_interval_sec),
            ("VERY_LOW_INTERVAL_SEC", very_low_interval_sec),
        ] {
            if v == 0 {
                bail!("{key} must be positive");
            }
        }

        Ok(Self {
            listen_addr: std::env::var("LISTEN_ADDR").unwrap_or_else(|_| "127.0.0.1:8001".into()),
            database_url: std::env::var("DATABASE_URL")
                .unwrap_or_else(|_| "sqlite://data/system_stats.db".into()),
            high_interval_sec,
            medium_interval_sec,
            low_interval_sec,
            very_low_interval_sec,
            tick_budget_ratio,
            collectors_enabled,
            retention_days: env_parse("RETENTION_DAYS", 90)?,
            anomaly_retention_days: env_parse("ANOMALY_RETENTION_DAYS", 365)?,
            db_size_cap_mb: env_parse("DB_SIZE_CAP_MB", 2048)?,
            ring_capacity: env_parse("RING_CAPACITY", 600)?,
            subscriber_capacity: env_parse("SUBSCRIBER_CAPACITY", 64)?,
            write_queue_capacity: env_parse("WRITE_QUEUE_CAPACITY", 8)?,
            pattern_window_samples: env_parse("PATTERN_WINDOW_SAMPLES", 720)?,
            spike_sigma: env_parse("SPIKE_SIGMA", 3.0)?,
            sustain_window: env_parse("SUSTAIN_WINDOW", 10)?,
            thresholds,
            process_top_n: env_parse("PROCESS_TOP_N", 15)?,
            process_name_only: std::env::var("PROCESS_NAME_ONLY")
                .map(|v| !v.eq_ignore_ascii_case("false"))
                .unwrap_or(true),
            log_file: std::env::var("LOG_FILE").ok().filter(|s| !s.is_empty()),
            log_rotate_mb: env_parse("LOG_ROTATE_MB", 64)?,
            min_training_samples: env_parse("MIN_TRAINING_SAMPLES", 1000)?,
            min_training_hours: env_parse("MIN_TRAINING_HOURS", 12.0)?,
            memory_cap_mb: env_parse("MEMORY_CAP_MB", 500)?,
            cpu_overhead_cap_percent: env_parse("CPU_OVERHEAD_CAP_PERCENT", 2.0)?,
            http_timeout_secs: env_parse("HTTP_TIMEOUT_SECS", 5)?,
            drain_budget_secs: env_parse("DRAIN_BUDGET_SECS", 5)?,
            shutdown_grace_secs: env_parse("SHUTDOWN_GRACE_SECS", 10)?,
        })
    }

    /// Wall-clock budget for one tick at the given cadence interval.
    pub fn tick_budget(&self, interval_sec: u64) -> std::time::Duration {
        std::time::Duration::from_secs_f64(interval_sec as f64 * self.tick_budget_ratio)
    }

    /// Parse the bind address, surfacing a configuration error early.
    pub fn bind_addr(&self) -> Result<std::net::SocketAddr> {
        self.listen_addr
            .parse()
            .with_context(|| format!("invalid LISTEN_ADDR: {:?}", self.listen_addr))
    }
}

#[cfg(test)]
pub(crate) fn test_config() -> AppConfig {
    AppConfig {
        listen_addr: "127.0.0.1:0".into(),
        database_url: "sqlite::memory:".into(),
        high_interval_sec: 3,
        medium_interval_sec: 15,
        low_interval_sec: 60,
        very_low_interval_sec: 300,
        tick_budget_ratio: 0.8,
        collectors_enabled: ["cpu", "ram", "context"]
            .iter()
            .map(|s| s.to_string())
            .collect(),
        retention_days: 90,
        anomaly_retention_days: 365,
        db_size_cap_mb: 2048,
        ring_capacity: 600,
        subscriber_capacity: 64,
        write_queue_capacity: 8,
        pattern_window_samples: 720,
        spike_sigma: 3.0,
        sustain_window: 10,
        thresholds: default_thresholds(),
        process_top_n: 15,
        process_name_only: true,
        log_file: None,
        log_rotate_mb: 64,
        min_training_samples: 1000,
        min_training_hours: 12.0,
        memory_cap_mb: 500,
        cpu_overhead_cap_percent: 2.0,
        http_timeout_secs: 5,
        drain_budget_secs: 5,
        shutdown_grace_secs: 10,
    }
}
