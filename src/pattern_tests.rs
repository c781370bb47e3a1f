//! Store and pattern-layer scenarios: threshold hysteresis end to end,
//! history decimation, retention sweep and snapshot round-trips.

use std::collections::BTreeMap;

use crate::config::test_config;
use crate::db::{store, Database};
use crate::model::{
    Anomaly, CpuMetrics, DiskMetrics, DiskPartition, GpuMetrics, Metric, NetworkInterface,
    NetworkMetrics, ProcessInfo, RamMetrics, Severity, Snapshot, SystemContext, TimeOfDay,
    UserAction,
};
use crate::patterns::PatternHandle;

fn cpu_snapshot(timestamp: i64, usage: f64) -> Snapshot {
    let mut snapshot = Snapshot::empty(timestamp);
    snapshot.cpu = Some(CpuMetrics {
        usage_percent: usage,
        frequency_mhz: None,
        per_core_usage: vec![],
        temperature_celsius: None,
        logical_count: 4,
        physical_count: 2,
    });
    snapshot
}

fn full_snapshot(timestamp: i64) -> Snapshot {
    let mut errors = BTreeMap::new();
    errors.insert("gpu_smi".to_string(), "missing_dependency".to_string());
    Snapshot {
        timestamp,
        cpu: Some(CpuMetrics {
            usage_percent: 37.5,
            frequency_mhz: Some(3200.0),
            per_core_usage: vec![30.0, 45.0],
            temperature_celsius: Some(58.0),
            logical_count: 2,
            physical_count: 2,
        }),
        ram: Some(RamMetrics {
            total_gb: 32.0,
            used_gb: 12.0,
            available_gb: 20.0,
            cached_gb: 6.0,
            swap_total_gb: 8.0,
            swap_used_gb: 0.5,
            usage_percent: Some(37.5),
        }),
        gpus: Some(vec![GpuMetrics {
            device_index: 0,
            name: "amdgpu card0".into(),
            usage_percent: 15.0,
            memory_used_gb: 2.0,
            memory_total_gb: 16.0,
            temperature_celsius: Some(44.0),
            fan_rpm: Some(1200.0),
            power_watts: Some(35.5),
            core_clock_mhz: None,
            memory_clock_mhz: None,
        }]),
        disk: Some(DiskMetrics {
            read_mbps: 12.0,
            write_mbps: 3.5,
            io_ops_per_sec: 180.0,
            queue_length: 1.0,
            partitions: vec![DiskPartition {
                device: "nvme0n1".into(),
                total_gb: 931.0,
                used_gb: 400.0,
                free_gb: 531.0,
                usage_percent: 42.9,
            }],
        }),
        network: Some(NetworkMetrics {
            download_mbps: 1.25,
            upload_mbps: 0.5,
            connections_active: 23,
            bytes_sent: 1_000_000,
            bytes_received: 9_000_000,
            packets_sent: 5_000,
            packets_received: 12_000,
            errors_in: 0,
            errors_out: 0,
            interfaces: vec![NetworkInterface {
                name: "eth0".into(),
                speed_mbps: Some(1000.0),
                is_up: true,
            }],
        }),
        processes: Some(vec![ProcessInfo {
            pid: 4242,
            name: "cargo".into(),
            cpu_percent: 88.0,
            memory_mb: 512.0,
            thread_count: Some(8),
            status: "Run".into(),
            started_at: Some(1_700_000_000),
        }]),
        context: Some(SystemContext {
            user_active: true,
            idle_seconds: 0,
            screen_locked: false,
            time_of_day: TimeOfDay::Afternoon,
            day_of_week: "Tue".into(),
            user_action: UserAction::Coding,
        }),
        collection_duration_ms: 41,
        collector_errors: errors,
    }
}

const MS_PER_DAY: i64 = 24 * 60 * 60 * 1000;

// ---------------------------------------------------------------------------
// Threshold hysteresis through the persisted anomaly log
// ---------------------------------------------------------------------------

#[tokio::test]
async fn sustained_cpu_violation_persists_exactly_one_warn_anomaly() {
    let db = Database::test_db().await;
    let cfg = test_config(); // cpu warn 85, sustain 10
    let patterns = PatternHandle::new(&cfg, db.clone());

    let mut series: Vec<f64> = vec![50.0; 20];
    series.extend(vec![95.0; 12]);
    series.extend(vec![50.0; 20]);
    for (i, value) in series.iter().enumerate() {
        patterns
            .process_snapshot(&cpu_snapshot(i as i64 + 1, *value))
            .await;
    }

    let anomalies = store::anomalies(&db, 0, 1_000).await.expect("anomalies");
    let warns: Vec<&Anomaly> = anomalies
        .iter()
        .filter(|a| a.severity == Severity::Warn)
        .collect();
    assert_eq!(warns.len(), 1);
    assert_eq!(warns[0].metric_name, "cpu_percent");
    // 20 normal samples, then the 10th violating sample is the 30th overall
    assert_eq!(warns[0].timestamp, 30);
    assert!(anomalies.iter().all(|a| a.severity != Severity::Critical));
}

#[tokio::test]
async fn baseline_flush_writes_one_row_per_metric() {
    let db = Database::test_db().await;
    let cfg = test_config();
    let patterns = PatternHandle::new(&cfg, db.clone());

    for i in 0..40 {
        patterns.process_snapshot(&cpu_snapshot(i + 1, 50.0)).await;
    }
    patterns.flush_baselines(99_000).await;
    patterns.flush_baselines(100_000).await; // second flush overwrites

    let rows = store::baselines(&db).await.expect("baselines");
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].metric_name, "cpu_percent");
    assert_eq!(rows[0].mean, 50.0);
    assert_eq!(rows[0].updated_at, 100_000);
}

// ---------------------------------------------------------------------------
// History decimation
// ---------------------------------------------------------------------------

#[tokio::test]
async fn hour_of_samples_decimates_to_bucket_means() {
    let db = Database::test_db().await;
    let from: i64 = 1_000_000;
    let to = from + 3_600_000;

    // 3600 one-second samples; value encodes the minute bucket.
    for i in 0..3600_i64 {
        let value = (i / 60) as f64;
        store::write_snapshot(&db, &cpu_snapshot(from + i * 1000, value))
            .await
            .expect("write");
    }

    let points = store::history(&db, Metric::CpuPercent, from, to, 60)
        .await
        .expect("history");
    assert_eq!(points.len(), 60);
    for (k, point) in points.iter().enumerate() {
        assert_eq!(point.timestamp, from + k as i64 * 60_000);
        assert!((point.value - k as f64).abs() < 1e-9, "bucket {k} mean");
    }
    // Uniform spacing: max/min gap ratio is 1
    for pair in points.windows(2) {
        assert_eq!(pair[1].timestamp - pair[0].timestamp, 60_000);
    }
}

#[tokio::test]
async fn short_series_returned_raw_without_bucketing() {
    let db = Database::test_db().await;
    for i in 0..10_i64 {
        store::write_snapshot(&db, &cpu_snapshot(1_000 + i * 500, i as f64))
            .await
            .expect("write");
    }
    let points = store::history(&db, Metric::CpuPercent, 0, 100_000, 100)
        .await
        .expect("history");
    assert_eq!(points.len(), 10);
    assert_eq!(points[0].timestamp, 1_000);
    assert_eq!(points[9].value, 9.0);
}

#[tokio::test]
async fn history_of_absent_metric_is_empty() {
    let db = Database::test_db().await;
    store::write_snapshot(&db, &cpu_snapshot(1_000, 5.0))
        .await
        .expect("write");
    let points = store::history(&db, Metric::NetDownMbps, 0, 100_000, 100)
        .await
        .expect("history");
    assert!(points.is_empty());
}

// ---------------------------------------------------------------------------
// Retention sweep
// ---------------------------------------------------------------------------

#[tokio::test]
async fn retention_sweep_removes_expired_snapshots_and_orphans() {
    let db = Database::test_db().await;
    let now = 500 * MS_PER_DAY;

    for age_days in [100_i64, 50, 1] {
        store::write_snapshot(&db, &full_snapshot(now - age_days * MS_PER_DAY))
            .await
            .expect("write");
    }
    for age_days in [400_i64, 10] {
        store::insert_anomaly(
            &db,
            &Anomaly {
                timestamp: now - age_days * MS_PER_DAY,
                metric_name: "cpu_percent".into(),
                current_value: 99.0,
                expected_value: 85.0,
                deviation_std: 3.2,
                severity: Severity::Warn,
                context_json: serde_json::json!({"type": "threshold"}),
            },
        )
        .await
        .expect("anomaly");
    }

    let stats = store::retention_sweep(&db, now, 90, 365, 10_000)
        .await
        .expect("sweep");
    assert_eq!(stats.snapshots_deleted, 1);
    assert_eq!(stats.anomalies_deleted, 1);

    let (samples, oldest) = store::sample_stats(&db).await.expect("stats");
    assert_eq!(samples, 2);
    assert_eq!(oldest, Some(now - 50 * MS_PER_DAY));

    // Cascade left no orphan child rows behind.
    for table in [
        "cpu_metrics",
        "ram_metrics",
        "gpu_metrics",
        "disk_metrics",
        "network_metrics",
        "process_info",
        "system_context",
    ] {
        let orphans: i64 = sqlx::query_scalar(&format!(
            "SELECT COUNT(*) FROM {table} WHERE snapshot_id NOT IN (SELECT id FROM system_snapshots)"
        ))
        .fetch_one(&db.pool)
        .await
        .expect("orphan query");
        assert_eq!(orphans, 0, "orphans in {table}");
    }

    let anomalies = store::anomalies(&db, 0, now).await.expect("anomalies");
    assert_eq!(anomalies.len(), 1);
}

#[tokio::test]
async fn size_cap_purges_oldest_first() {
    let db = Database::test_db().await;
    let now = 100 * MS_PER_DAY;
    for i in 0..50_i64 {
        store::write_snapshot(&db, &cpu_snapshot(now - i * 1_000, 10.0))
            .await
            .expect("write");
    }
    // A zero-MB cap forces the oldest-first purge passes.
    let stats = store::retention_sweep(&db, now, 90, 365, 0)
        .await
        .expect("sweep");
    assert!(stats.size_cap_deleted > 0);

    let (_, oldest) = store::sample_stats(&db).await.expect("stats");
    if let Some(oldest) = oldest {
        // Whatever survived is the newest end of the series
        assert!(oldest > now - 50 * 1_000);
    }
}

// ---------------------------------------------------------------------------
// Write invariants and round-trips
// ---------------------------------------------------------------------------

#[tokio::test]
async fn duplicate_timestamp_is_rejected_without_partial_rows() {
    let db = Database::test_db().await;
    store::write_snapshot(&db, &full_snapshot(42_000))
        .await
        .expect("first write");

    match store::write_snapshot(&db, &full_snapshot(42_000)).await {
        Err(store::StoreError::DuplicateTimestamp(ts)) => assert_eq!(ts, 42_000),
        other => panic!("expected duplicate_timestamp, got {other:?}"),
    }

    let cpu_rows: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM cpu_metrics")
        .fetch_one(&db.pool)
        .await
        .expect("count");
    assert_eq!(cpu_rows, 1);
}

#[tokio::test]
async fn full_snapshot_round_trips_through_recent() {
    let db = Database::test_db().await;
    let original = full_snapshot(77_000);
    store::write_snapshot(&db, &original).await.expect("write");

    let restored = store::recent(&db, 1).await.expect("recent");
    assert_eq!(restored.len(), 1);
    let restored = &restored[0];

    assert_eq!(restored.timestamp, original.timestamp);
    assert_eq!(restored.collection_duration_ms, original.collection_duration_ms);
    assert_eq!(restored.collector_errors, original.collector_errors);

    let cpu = restored.cpu.as_ref().expect("cpu");
    assert_eq!(cpu.usage_percent, 37.5);
    assert_eq!(cpu.per_core_usage, vec![30.0, 45.0]);
    assert_eq!(cpu.temperature_celsius, Some(58.0));

    let ram = restored.ram.as_ref().expect("ram");
    assert_eq!(ram.total_gb, 32.0);
    assert_eq!(ram.usage_percent, Some(37.5));

    let gpus = restored.gpus.as_ref().expect("gpus");
    assert_eq!(gpus.len(), 1);
    assert_eq!(gpus[0].name, "amdgpu card0");
    assert_eq!(gpus[0].fan_rpm, Some(1200.0));

    let disk = restored.disk.as_ref().expect("disk");
    assert_eq!(disk.read_mbps, 12.0);
    assert_eq!(disk.partitions.len(), 1);
    assert_eq!(disk.partitions[0].device, "nvme0n1");

    let network = restored.network.as_ref().expect("network");
    assert_eq!(network.bytes_received, 9_000_000);
    assert_eq!(network.interfaces[0].name, "eth0");
    assert!(network.interfaces[0].is_up);

    let processes = restored.processes.as_ref().expect("processes");
    assert_eq!(processes[0].name, "cargo");
    assert_eq!(processes[0].thread_count, Some(8));

    let context = restored.context.as_ref().expect("context");
    assert!(context.user_active);
    assert_eq!(context.time_of_day, TimeOfDay::Afternoon);
    assert_eq!(context.user_action, UserAction::Coding);
}

#[tokio::test]
async fn recent_returns_chronological_order() {
    let db = Database::test_db().await;
    for ts in [5_000_i64, 1_000, 3_000] {
        store::write_snapshot(&db, &cpu_snapshot(ts, 1.0))
            .await
            .expect("write");
    }
    let snapshots = store::recent(&db, 2).await.expect("recent");
    let timestamps: Vec<i64> = snapshots.iter().map(|s| s.timestamp).collect();
    assert_eq!(timestamps, vec![3_000, 5_000]);
}

// ---------------------------------------------------------------------------
// Summary and processes
// ---------------------------------------------------------------------------

#[tokio::test]
async fn summary_reports_avg_min_max_p95() {
    let db = Database::test_db().await;
    for i in 1..=20_i64 {
        store::write_snapshot(&db, &cpu_snapshot(i * 1_000, i as f64))
            .await
            .expect("write");
    }
    let summary = store::summary(&db, 0, 100_000).await.expect("summary");
    let cpu = summary.get("cpu_percent").expect("cpu summary");
    assert!((cpu.avg - 10.5).abs() < 1e-9);
    assert_eq!(cpu.min, 1.0);
    assert_eq!(cpu.max, 20.0);
    // Nearest-rank p95 over 20 ordered values
    assert_eq!(cpu.p95, 19.0);
    // No other metric was sampled
    assert!(!summary.contains_key("net_down_mbps"));
}

#[tokio::test]
async fn latest_processes_come_from_newest_sampling_snapshot() {
    let db = Database::test_db().await;
    let mut first = full_snapshot(10_000);
    first.processes = Some(vec![ProcessInfo {
        pid: 1,
        name: "old".into(),
        cpu_percent: 1.0,
        memory_mb: 1.0,
        thread_count: None,
        status: "Sleep".into(),
        started_at: None,
    }]);
    store::write_snapshot(&db, &first).await.expect("write");

    // A newer snapshot without processes does not shadow the slice.
    store::write_snapshot(&db, &cpu_snapshot(20_000, 1.0))
        .await
        .expect("write");

    let mut second = full_snapshot(30_000);
    second.processes = Some(vec![ProcessInfo {
        pid: 2,
        name: "new".into(),
        cpu_percent: 2.0,
        memory_mb: 2.0,
        thread_count: None,
        status: "Run".into(),
        started_at: None,
    }]);
    store::write_snapshot(&db, &second).await.expect("write");

    let processes = store::latest_processes(&db, 10).await.expect("processes");
    assert_eq!(processes.len(), 1);
    assert_eq!(processes[0].name, "new");
}
