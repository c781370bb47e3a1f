use std::collections::BTreeMap;

use serde::Serialize;
use sqlx::Row;
use thiserror::Error;
use tracing::{debug, info};

use super::models::{
    AnomalyRow, BaselineRow, ContextRow, CpuCoreRow, CpuRow, DiskPartitionRow, DiskRow, GpuRow,
    NetworkInterfaceRow, NetworkRow, ProcessRow, RamRow, SnapshotRow,
};
use super::Database;
use crate::model::{
    Anomaly, CpuMetrics, DiskMetrics, DiskPartition, GpuMetrics, Metric, NetworkInterface,
    NetworkMetrics, ProcessInfo, RamMetrics, Severity, Snapshot, SystemContext, TimeOfDay,
    UserAction,
};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("duplicate_timestamp: {0}")]
    DuplicateTimestamp(i64),
    #[error("storage_full")]
    StorageFull,
    #[error("schema_too_new: store file is version {found}, this binary supports {supported}")]
    SchemaTooNew { found: i64, supported: i64 },
    #[error("io_error: {0}")]
    Io(#[from] sqlx::Error),
    #[error("io_error: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),
}

fn classify_db_error(timestamp: i64, e: sqlx::Error) -> StoreError {
    if let sqlx::Error::Database(ref db_err) = e {
        if db_err.is_unique_violation() {
            return StoreError::DuplicateTimestamp(timestamp);
        }
        let message = db_err.message();
        if message.contains("disk is full") || message.contains("database or disk is full") {
            return StoreError::StorageFull;
        }
    }
    StoreError::Io(e)
}

// ---------------------------------------------------------------------------
// Write path
// ---------------------------------------------------------------------------

/// Write one snapshot and all child rows in a single transaction.
/// Fails with `duplicate_timestamp` or `storage_full`; either way no
/// partial rows are left behind.
pub async fn write_snapshot(db: &Database, snapshot: &Snapshot) -> Result<i64, StoreError> {
    let ts = snapshot.timestamp;
    let errors_json =
        serde_json::to_string(&snapshot.collector_errors).unwrap_or_else(|_| "{}".into());

    let mut tx = db.pool.begin().await?;

    let snapshot_id = sqlx::query(
        "INSERT INTO system_snapshots (timestamp, collection_duration_ms, collector_errors) VALUES (?, ?, ?)",
    )
    .bind(ts)
    .bind(snapshot.collection_duration_ms)
    .bind(&errors_json)
    .execute(&mut *tx)
    .await
    .map_err(|e| classify_db_error(ts, e))?
    .last_insert_rowid();

    if let Some(cpu) = &snapshot.cpu {
        let cpu_id = sqlx::query(
            "INSERT INTO cpu_metrics (snapshot_id, usage_percent, frequency_mhz, temperature_celsius, logical_count, physical_count) VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(snapshot_id)
        .bind(cpu.usage_percent)
        .bind(cpu.frequency_mhz)
        .bind(cpu.temperature_celsius)
        .bind(i64::from(cpu.logical_count))
        .bind(i64::from(cpu.physical_count))
        .execute(&mut *tx)
        .await
        .map_err(|e| classify_db_error(ts, e))?
        .last_insert_rowid();

        for (core_index, usage) in cpu.per_core_usage.iter().enumerate() {
            sqlx::query(
                "INSERT INTO cpu_core_usage (cpu_metric_id, core_index, usage_percent) VALUES (?, ?, ?)",
            )
            .bind(cpu_id)
            .bind(core_index as i64)
            .bind(usage)
            .execute(&mut *tx)
            .await
            .map_err(|e| classify_db_error(ts, e))?;
        }
    }

    if let Some(ram) = &snapshot.ram {
        sqlx::query(
            "INSERT INTO ram_metrics (snapshot_id, total_gb, used_gb, available_gb, cached_gb, swap_total_gb, swap_used_gb, usage_percent) VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(snapshot_id)
        .bind(ram.total_gb)
        .bind(ram.used_gb)
        .bind(ram.available_gb)
        .bind(ram.cached_gb)
        .bind(ram.swap_total_gb)
        .bind(ram.swap_used_gb)
        .bind(ram.usage_percent.unwrap_or(0.0))
        .execute(&mut *tx)
        .await
        .map_err(|e| classify_db_error(ts, e))?;
    }

    if let Some(gpus) = &snapshot.gpus {
        for gpu in gpus {
            sqlx::query(
                "INSERT INTO gpu_metrics (snapshot_id, device_index, name, usage_percent, memory_used_gb, memory_total_gb, temperature_celsius, fan_rpm, power_watts, core_clock_mhz, memory_clock_mhz) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(snapshot_id)
            .bind(i64::from(gpu.device_index))
            .bind(&gpu.name)
            .bind(gpu.usage_percent)
            .bind(gpu.memory_used_gb)
            .bind(gpu.memory_total_gb)
            .bind(gpu.temperature_celsius)
            .bind(gpu.fan_rpm)
            .bind(gpu.power_watts)
            .bind(gpu.core_clock_mhz)
            .bind(gpu.memory_clock_mhz)
            .execute(&mut *tx)
            .await
            .map_err(|e| classify_db_error(ts, e))?;
        }
    }

    if let Some(disk) = &snapshot.disk {
        let disk_id = sqlx::query(
            "INSERT INTO disk_metrics (snapshot_id, read_mbps, write_mbps, io_ops_per_sec, queue_length) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(snapshot_id)
        .bind(disk.read_mbps)
        .bind(disk.write_mbps)
        .bind(disk.io_ops_per_sec)
        .bind(disk.queue_length)
        .execute(&mut *tx)
        .await
        .map_err(|e| classify_db_error(ts, e))?
        .last_insert_rowid();

        for partition in &disk.partitions {
            sqlx::query(
                "INSERT INTO disk_partitions (disk_metric_id, device, total_gb, used_gb, free_gb, usage_percent) VALUES (?, ?, ?, ?, ?, ?)",
            )
            .bind(disk_id)
            .bind(&partition.device)
            .bind(partition.total_gb)
            .bind(partition.used_gb)
            .bind(partition.free_gb)
            .bind(partition.usage_percent)
            .execute(&mut *tx)
            .await
            .map_err(|e| classify_db_error(ts, e))?;
        }
    }

    if let Some(network) = &snapshot.network {
        let network_id = sqlx::query(
            "INSERT INTO network_metrics (snapshot_id, download_mbps, upload_mbps, connections_active, bytes_sent, bytes_received, packets_sent, packets_received, errors_in, errors_out) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(snapshot_id)
        .bind(network.download_mbps)
        .bind(network.upload_mbps)
        .bind(network.connections_active as i64)
        .bind(network.bytes_sent as i64)
        .bind(network.bytes_received as i64)
        .bind(network.packets_sent as i64)
        .bind(network.packets_received as i64)
        .bind(network.errors_in as i64)
        .bind(network.errors_out as i64)
        .execute(&mut *tx)
        .await
        .map_err(|e| classify_db_error(ts, e))?
        .last_insert_rowid();

        for iface in &network.interfaces {
            sqlx::query(
                "INSERT INTO network_interfaces (network_metric_id, name, speed_mbps, is_up) VALUES (?, ?, ?, ?)",
            )
            .bind(network_id)
            .bind(&iface.name)
            .bind(iface.speed_mbps)
            .bind(iface.is_up)
            .execute(&mut *tx)
            .await
            .map_err(|e| classify_db_error(ts, e))?;
        }
    }

    if let Some(processes) = &snapshot.processes {
        for (sort_order, process) in processes.iter().enumerate() {
            sqlx::query(
                "INSERT INTO process_info (snapshot_id, sort_order, pid, name, cpu_percent, memory_mb, thread_count, status, started_at) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(snapshot_id)
            .bind(sort_order as i64)
            .bind(i64::from(process.pid))
            .bind(&process.name)
            .bind(process.cpu_percent)
            .bind(process.memory_mb)
            .bind(process.thread_count.map(i64::from))
            .bind(&process.status)
            .bind(process.started_at)
            .execute(&mut *tx)
            .await
            .map_err(|e| classify_db_error(ts, e))?;
        }
    }

    if let Some(context) = &snapshot.context {
        sqlx::query(
            "INSERT INTO system_context (snapshot_id, user_active, idle_seconds, screen_locked, time_of_day, day_of_week, user_action) VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(snapshot_id)
        .bind(context.user_active)
        .bind(context.idle_seconds as i64)
        .bind(context.screen_locked)
        .bind(context.time_of_day.as_str())
        .bind(&context.day_of_week)
        .bind(context.user_action.as_str())
        .execute(&mut *tx)
        .await
        .map_err(|e| classify_db_error(ts, e))?;
    }

    tx.commit().await.map_err(|e| classify_db_error(ts, e))?;
    Ok(snapshot_id)
}

// ---------------------------------------------------------------------------
// Read path
// ---------------------------------------------------------------------------

/// The `n` most recent snapshots, reconstructed with their fragments,
/// in chronological order.
pub async fn recent(db: &Database, n: u32) -> Result<Vec<Snapshot>, StoreError> {
    let headers: Vec<SnapshotRow> = sqlx::query_as(
        "SELECT id, timestamp, collection_duration_ms, collector_errors FROM system_snapshots ORDER BY timestamp DESC LIMIT ?",
    )
    .bind(i64::from(n))
    .fetch_all(&db.pool)
    .await?;

    let mut snapshots = Vec::with_capacity(headers.len());
    for header in headers.into_iter().rev() {
        snapshots.push(load_snapshot(db, header).await?);
    }
    Ok(snapshots)
}

async fn load_snapshot(db: &Database, header: SnapshotRow) -> Result<Snapshot, StoreError> {
    let mut snapshot = Snapshot::empty(header.timestamp);
    snapshot.collection_duration_ms = header.collection_duration_ms;
    snapshot.collector_errors = serde_json::from_str(&header.collector_errors).unwrap_or_default();

    let cpu: Option<CpuRow> = sqlx::query_as(
        "SELECT id, snapshot_id, usage_percent, frequency_mhz, temperature_celsius, logical_count, physical_count FROM cpu_metrics WHERE snapshot_id = ?",
    )
    .bind(header.id)
    .fetch_optional(&db.pool)
    .await?;
    if let Some(cpu) = cpu {
        let cores: Vec<CpuCoreRow> = sqlx::query_as(
            "SELECT cpu_metric_id, core_index, usage_percent FROM cpu_core_usage WHERE cpu_metric_id = ? ORDER BY core_index",
        )
        .bind(cpu.id)
        .fetch_all(&db.pool)
        .await?;
        snapshot.cpu = Some(CpuMetrics {
            usage_percent: cpu.usage_percent,
            frequency_mhz: cpu.frequency_mhz,
            per_core_usage: cores.iter().map(|c| c.usage_percent).collect(),
            temperature_celsius: cpu.temperature_celsius,
            logical_count: cpu.logical_count as u32,
            physical_count: cpu.physical_count as u32,
        });
    }

    let ram: Option<RamRow> = sqlx::query_as(
        "SELECT snapshot_id, total_gb, used_gb, available_gb, cached_gb, swap_total_gb, swap_used_gb, usage_percent FROM ram_metrics WHERE snapshot_id = ?",
    )
    .bind(header.id)
    .fetch_optional(&db.pool)
    .await?;
    if let Some(ram) = ram {
        snapshot.ram = Some(RamMetrics {
            total_gb: ram.total_gb,
            used_gb: ram.used_gb,
            available_gb: ram.available_gb,
            cached_gb: ram.cached_gb,
            swap_total_gb: ram.swap_total_gb,
            swap_used_gb: ram.swap_used_gb,
            usage_percent: Some(ram.usage_percent),
        });
    }

    let gpus: Vec<GpuRow> = sqlx::query_as(
        "SELECT snapshot_id, device_index, name, usage_percent, memory_used_gb, memory_total_gb, temperature_celsius, fan_rpm, power_watts, core_clock_mhz, memory_clock_mhz FROM gpu_metrics WHERE snapshot_id = ? ORDER BY device_index",
    )
    .bind(header.id)
    .fetch_all(&db.pool)
    .await?;
    if !gpus.is_empty() {
        snapshot.gpus = Some(
            gpus.into_iter()
                .map(|g| GpuMetrics {
                    device_index: g.device_index as u32,
                    name: g.name,
                    usage_percent: g.usage_percent,
                    memory_used_gb: g.memory_used_gb,
                    memory_total_gb: g.memory_total_gb,
                    temperature_celsius: g.temperature_celsius,
                    fan_rpm: g.fan_rpm,
                    power_watts: g.power_watts,
                    core_clock_mhz: g.core_clock_mhz,
                    memory_clock_mhz: g.memory_clock_mhz,
                })
                .collect(),
        );
    }

    let disk: Option<DiskRow> = sqlx::query_as(
        "SELECT id, snapshot_id, read_mbps, write_mbps, io_ops_per_sec, queue_length FROM disk_metrics WHERE snapshot_id = ?",
    )
    .bind(header.id)
    .fetch_optional(&db.pool)
    .await?;
    if let Some(disk) = disk {
        let partitions: Vec<DiskPartitionRow> = sqlx::query_as(
            "SELECT disk_metric_id, device, total_gb, used_gb, free_gb, usage_percent FROM disk_partitions WHERE disk_metric_id = ? ORDER BY device",
        )
        .bind(disk.id)
        .fetch_all(&db.pool)
        .await?;
        snapshot.disk = Some(DiskMetrics {
            read_mbps: disk.read_mbps,
            write_mbps: disk.write_mbps,
            io_ops_per_sec: disk.io_ops_per_sec,
            queue_length: disk.queue_length,
            partitions: partitions
                .into_iter()
                .map(|p| DiskPartition {
                    device: p.device,
                    total_gb: p.total_gb,
                    used_gb: p.used_gb,
                    free_gb: p.free_gb,
                    usage_percent: p.usage_percent,
                })
                .collect(),
        });
    }

    let network: Option<NetworkRow> = sqlx::query_as(
        "SELECT id, snapshot_id, download_mbps, upload_mbps, connections_active, bytes_sent, bytes_received, packets_sent, packets_received, errors_in, errors_out FROM network_metrics WHERE snapshot_id = ?",
    )
    .bind(header.id)
    .fetch_optional(&db.pool)
    .await?;
    if let Some(network) = network {
        let interfaces: Vec<NetworkInterfaceRow> = sqlx::query_as(
            "SELECT network_metric_id, name, speed_mbps, is_up FROM network_interfaces WHERE network_metric_id = ? ORDER BY name",
        )
        .bind(network.id)
        .fetch_all(&db.pool)
        .await?;
        snapshot.network = Some(NetworkMetrics {
            download_mbps: network.download_mbps,
            upload_mbps: network.upload_mbps,
            connections_active: network.connections_active.max(0) as u64,
            bytes_sent: network.bytes_sent.max(0) as u64,
            bytes_received: network.bytes_received.max(0) as u64,
            packets_sent: network.packets_sent.max(0) as u64,
            packets_received: network.packets_received.max(0) as u64,
            errors_in: network.errors_in.max(0) as u64,
            errors_out: network.errors_out.max(0) as u64,
            interfaces: interfaces
                .into_iter()
                .map(|i| NetworkInterface {
                    name: i.name,
                    speed_mbps: i.speed_mbps,
                    is_up: i.is_up,
                })
                .collect(),
        });
    }

    let processes: Vec<ProcessRow> = sqlx::query_as(
        "SELECT snapshot_id, sort_order, pid, name, cpu_percent, memory_mb, thread_count, status, started_at FROM process_info WHERE snapshot_id = ? ORDER BY sort_order",
    )
    .bind(header.id)
    .fetch_all(&db.pool)
    .await?;
    if !processes.is_empty() {
        snapshot.processes = Some(processes.into_iter().map(process_from_row).collect());
    }

    let context: Option<ContextRow> = sqlx::query_as(
        "SELECT snapshot_id, user_active, idle_seconds, screen_locked, time_of_day, day_of_week, user_action FROM system_context WHERE snapshot_id = ?",
    )
    .bind(header.id)
    .fetch_optional(&db.pool)
    .await?;
    if let Some(context) = context {
        snapshot.context = Some(SystemContext {
            user_active: context.user_active,
            idle_seconds: context.idle_seconds.max(0) as u64,
            screen_locked: context.screen_locked,
            time_of_day: parse_time_of_day(&context.time_of_day),
            day_of_week: context.day_of_week,
            user_action: parse_user_action(&context.user_action),
        });
    }

    Ok(snapshot)
}

fn process_from_row(p: ProcessRow) -> ProcessInfo {
    ProcessInfo {
        pid: p.pid.max(0) as u32,
        name: p.name,
        cpu_percent: p.cpu_percent,
        memory_mb: p.memory_mb,
        thread_count: p.thread_count.map(|t| t.max(0) as u32),
        status: p.status,
        started_at: p.started_at,
    }
}

fn parse_time_of_day(s: &str) -> TimeOfDay {
    match s {
        "morning" => TimeOfDay::Morning,
        "afternoon" => TimeOfDay::Afternoon,
        "evening" => TimeOfDay::Evening,
        _ => TimeOfDay::Night,
    }
}

fn parse_user_action(s: &str) -> UserAction {
    match s {
        "coding" => UserAction::Coding,
        "gaming" => UserAction::Gaming,
        "browsing" => UserAction::Browsing,
        "streaming" => UserAction::Streaming,
        "idle" => UserAction::Idle,
        _ => UserAction::Unknown,
    }
}

fn metric_source(metric: Metric) -> (&'static str, &'static str) {
    match metric {
        Metric::CpuPercent => ("cpu_metrics", "usage_percent"),
        Metric::RamPercent => ("ram_metrics", "usage_percent"),
        Metric::GpuPercent => ("gpu_metrics", "usage_percent"),
        Metric::DiskReadMbps => ("disk_metrics", "read_mbps"),
        Metric::DiskWriteMbps => ("disk_metrics", "write_mbps"),
        Metric::NetDownMbps => ("network_metrics", "download_mbps"),
        Metric::NetUpMbps => ("network_metrics", "upload_mbps"),
    }
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct HistoryPoint {
    pub timestamp: i64,
    pub value: f64,
}

/// Per-metric time series over [from, to], decimated to at most
/// `max_points` by equal-width bucket averages aligned to `from`.
pub async fn history(
    db: &Database,
    metric: Metric,
    from_ms: i64,
    to_ms: i64,
    max_points: u32,
) -> Result<Vec<HistoryPoint>, StoreError> {
    if to_ms <= from_ms || max_points == 0 {
        return Ok(vec![]);
    }
    let (table, column) = metric_source(metric);

    let raw_count: i64 = sqlx::query_scalar(&format!(
        "SELECT COUNT(*) FROM {table} m JOIN system_snapshots s ON s.id = m.snapshot_id WHERE s.timestamp >= ? AND s.timestamp <= ?"
    ))
    .bind(from_ms)
    .bind(to_ms)
    .fetch_one(&db.pool)
    .await?;

    if raw_count <= i64::from(max_points) {
        let rows: Vec<(i64, f64)> = sqlx::query_as(&format!(
            "SELECT s.timestamp, AVG(m.{column}) FROM {table} m JOIN system_snapshots s ON s.id = m.snapshot_id WHERE s.timestamp >= ? AND s.timestamp <= ? GROUP BY s.timestamp ORDER BY s.timestamp"
        ))
        .bind(from_ms)
        .bind(to_ms)
        .fetch_all(&db.pool)
        .await?;
        return Ok(rows
            .into_iter()
            .map(|(timestamp, value)| HistoryPoint { timestamp, value })
            .collect());
    }

    let span = to_ms - from_ms;
    let bucket_ms = (span + i64::from(max_points) - 1) / i64::from(max_points);
    // A sample exactly at `to` folds into the last bucket.
    let rows: Vec<(i64, f64)> = sqlx::query_as(&format!(
        "SELECT MIN((s.timestamp - ?1) / ?2, ?3) AS bucket, AVG(m.{column}) \
         FROM {table} m JOIN system_snapshots s ON s.id = m.snapshot_id \
         WHERE s.timestamp >= ?1 AND s.timestamp <= ?4 \
         GROUP BY bucket ORDER BY bucket"
    ))
    .bind(from_ms)
    .bind(bucket_ms)
    .bind(i64::from(max_points) - 1)
    .bind(to_ms)
    .fetch_all(&db.pool)
    .await?;

    Ok(rows
        .into_iter()
        .map(|(bucket, value)| HistoryPoint {
            timestamp: from_ms + bucket * bucket_ms,
            value,
        })
        .collect())
}

/// Process slice from the most recent snapshot that sampled processes.
pub async fn latest_processes(db: &Database, limit: u32) -> Result<Vec<ProcessInfo>, StoreError> {
    let rows: Vec<ProcessRow> = sqlx::query_as(
        "SELECT snapshot_id, sort_order, pid, name, cpu_percent, memory_mb, thread_count, status, started_at \
         FROM process_info WHERE snapshot_id = (SELECT MAX(snapshot_id) FROM process_info) \
         ORDER BY sort_order LIMIT ?",
    )
    .bind(i64::from(limit))
    .fetch_all(&db.pool)
    .await?;
    Ok(rows.into_iter().map(process_from_row).collect())
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct SummaryStats {
    pub avg: f64,
    pub min: f64,
    pub max: f64,
    pub p95: f64,
}

/// avg/min/max/p95 per primary metric over [from, to]. Metrics with no
/// samples in the window are omitted.
pub async fn summary(
    db: &Database,
    from_ms: i64,
    to_ms: i64,
) -> Result<BTreeMap<String, SummaryStats>, StoreError> {
    let mut out = BTreeMap::new();
    for metric in Metric::ALL {
        let (table, column) = metric_source(metric);
        let row: (i64, Option<f64>, Option<f64>, Option<f64>) = sqlx::query_as(&format!(
            "SELECT COUNT(*), AVG(m.{column}), MIN(m.{column}), MAX(m.{column}) FROM {table} m JOIN system_snapshots s ON s.id = m.snapshot_id WHERE s.timestamp >= ? AND s.timestamp <= ?"
        ))
        .bind(from_ms)
        .bind(to_ms)
        .fetch_one(&db.pool)
        .await?;

        let (count, avg, min, max) = row;
        if count == 0 {
            continue;
        }
        let (avg, min, max) = match (avg, min, max) {
            (Some(a), Some(mn), Some(mx)) => (a, mn, mx),
            _ => continue,
        };

        // Nearest-rank p95 over the ordered values.
        let offset = ((count - 1) as f64 * 0.95).round() as i64;
        let p95: f64 = sqlx::query_scalar(&format!(
            "SELECT m.{column} FROM {table} m JOIN system_snapshots s ON s.id = m.snapshot_id WHERE s.timestamp >= ? AND s.timestamp <= ? ORDER BY m.{column} LIMIT 1 OFFSET ?"
        ))
        .bind(from_ms)
        .bind(to_ms)
        .bind(offset)
        .fetch_one(&db.pool)
        .await?;

        out.insert(
            metric.as_str().to_string(),
            SummaryStats { avg, min, max, p95 },
        );
    }
    Ok(out)
}

// ---------------------------------------------------------------------------
// Anomalies and baselines
// ---------------------------------------------------------------------------

pub async fn insert_anomaly(db: &Database, anomaly: &Anomaly) -> Result<(), StoreError> {
    sqlx::query(
        "INSERT INTO anomalies (timestamp, metric_name, current_value, expected_value, deviation_std, severity, context_json) VALUES (?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(anomaly.timestamp)
    .bind(&anomaly.metric_name)
    .bind(anomaly.current_value)
    .bind(anomaly.expected_value)
    .bind(anomaly.deviation_std)
    .bind(anomaly.severity.as_str())
    .bind(anomaly.context_json.to_string())
    .execute(&db.pool)
    .await?;
    Ok(())
}

pub async fn anomalies(
    db: &Database,
    from_ms: i64,
    to_ms: i64,
) -> Result<Vec<Anomaly>, StoreError> {
    let rows: Vec<AnomalyRow> = sqlx::query_as(
        "SELECT timestamp, metric_name, current_value, expected_value, deviation_std, severity, context_json FROM anomalies WHERE timestamp >= ? AND timestamp <= ? ORDER BY timestamp",
    )
    .bind(from_ms)
    .bind(to_ms)
    .fetch_all(&db.pool)
    .await?;

    Ok(rows
        .into_iter()
        .map(|r| Anomaly {
            timestamp: r.timestamp,
            metric_name: r.metric_name,
            current_value: r.current_value,
            expected_value: r.expected_value,
            deviation_std: r.deviation_std,
            severity: match r.severity.as_str() {
                "critical" => Severity::Critical,
                "warn" => Severity::Warn,
                _ => Severity::Info,
            },
            context_json: serde_json::from_str(&r.context_json)
                .unwrap_or(serde_json::Value::Null),
        })
        .collect())
}

/// Latest rolling baseline, one row per metric.
pub async fn upsert_baseline(
    db: &Database,
    metric: Metric,
    mean: f64,
    std_dev: f64,
    sample_count: i64,
    updated_at: i64,
) -> Result<(), StoreError> {
    sqlx::query(
        "INSERT INTO metric_baselines (metric_name, mean, std_dev, sample_count, updated_at) VALUES (?, ?, ?, ?, ?) \
         ON CONFLICT(metric_name) DO UPDATE SET mean = excluded.mean, std_dev = excluded.std_dev, sample_count = excluded.sample_count, updated_at = excluded.updated_at",
    )
    .bind(metric.as_str())
    .bind(mean)
    .bind(std_dev)
    .bind(sample_count)
    .bind(updated_at)
    .execute(&db.pool)
    .await?;
    Ok(())
}

pub async fn baselines(db: &Database) -> Result<Vec<BaselineRow>, StoreError> {
    Ok(sqlx::query_as(
        "SELECT metric_name, mean, std_dev, sample_count, updated_at FROM metric_baselines ORDER BY metric_name",
    )
    .fetch_all(&db.pool)
    .await?)
}

// ---------------------------------------------------------------------------
// Retention
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default)]
pub struct SweepStats {
    pub snapshots_deleted: u64,
    pub anomalies_deleted: u64,
    pub size_cap_deleted: u64,
    pub vacuumed: bool,
}

const MS_PER_DAY: i64 = 24 * 60 * 60 * 1000;

/// Delete snapshots past the retention horizon (cascade removes child
/// rows), purge expired anomalies, then free space if the file exceeds
/// the size cap — oldest snapshots first, followed by a VACUUM.
pub async fn retention_sweep(
    db: &Database,
    now_ms: i64,
    retention_days: u32,
    anomaly_retention_days: u32,
    size_cap_mb: u64,
) -> Result<SweepStats, StoreError> {
    let mut stats = SweepStats::default();

    let snapshot_cutoff = now_ms - i64::from(retention_days) * MS_PER_DAY;
    stats.snapshots_deleted = sqlx::query("DELETE FROM system_snapshots WHERE timestamp < ?")
        .bind(snapshot_cutoff)
        .execute(&db.pool)
        .await?
        .rows_affected();

    let anomaly_cutoff = now_ms - i64::from(anomaly_retention_days) * MS_PER_DAY;
    stats.anomalies_deleted = sqlx::query("DELETE FROM anomalies WHERE timestamp < ?")
        .bind(anomaly_cutoff)
        .execute(&db.pool)
        .await?
        .rows_affected();

    // Size cap: drop the oldest fifth of snapshots per pass until under
    // the cap, then compact. Bounded passes so a sweep always terminates.
    let cap_bytes = size_cap_mb.saturating_mul(1024 * 1024);
    let mut passes = 0;
    while file_size_bytes(db).await? > cap_bytes && passes < 5 {
        let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM system_snapshots")
            .fetch_one(&db.pool)
            .await?;
        if total == 0 {
            break;
        }
        let chunk = (total / 5).max(1);
        let deleted = sqlx::query(
            "DELETE FROM system_snapshots WHERE id IN (SELECT id FROM system_snapshots ORDER BY timestamp ASC LIMIT ?)",
        )
        .bind(chunk)
        .execute(&db.pool)
        .await?
        .rows_affected();
        stats.size_cap_deleted += deleted;
        passes += 1;
    }

    if stats.snapshots_deleted + stats.size_cap_deleted > 0 {
        sqlx::query("VACUUM").execute(&db.pool).await?;
        stats.vacuumed = true;
        info!(
            snapshots = stats.snapshots_deleted,
            size_cap = stats.size_cap_deleted,
            anomalies = stats.anomalies_deleted,
            "retention sweep compacted store"
        );
    } else {
        debug!("retention sweep found nothing to delete");
    }
    Ok(stats)
}

async fn file_size_bytes(db: &Database) -> Result<u64, StoreError> {
    let page_count: i64 = sqlx::query("PRAGMA page_count")
        .fetch_one(&db.pool)
        .await?
        .get(0);
    let page_size: i64 = sqlx::query("PRAGMA page_size")
        .fetch_one(&db.pool)
        .await?
        .get(0);
    Ok((page_count.max(0) as u64) * (page_size.max(0) as u64))
}

/// Sample count and oldest timestamp, for training readiness.
pub async fn sample_stats(db: &Database) -> Result<(u64, Option<i64>), StoreError> {
    let row: (i64, Option<i64>) =
        sqlx::query_as("SELECT COUNT(*), MIN(timestamp) FROM system_snapshots")
            .fetch_one(&db.pool)
            .await?;
    Ok((row.0.max(0) as u64, row.1))
}
