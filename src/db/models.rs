use sqlx::FromRow;

/// Header row; child tables hang off `id` with ON DELETE CASCADE.
#[derive(Debug, Clone, FromRow)]
pub struct SnapshotRow {
    pub id: i64,
    pub timestamp: i64,
    pub collection_duration_ms: i64,
    pub collector_errors: String,
}

#[derive(Debug, Clone, FromRow)]
pub struct CpuRow {
    pub id: i64,
    pub snapshot_id: i64,
    pub usage_percent: f64,
    pub frequency_mhz: Option<f64>,
    pub temperature_celsius: Option<f64>,
    pub logical_count: i64,
    pub physical_count: i64,
}

#[derive(Debug, Clone, FromRow)]
pub struct CpuCoreRow {
    pub cpu_metric_id: i64,
    pub core_index: i64,
    pub usage_percent: f64,
}

#[derive(Debug, Clone, FromRow)]
pub struct RamRow {
    pub snapshot_id: i64,
    pub total_gb: f64,
    pub used_gb: f64,
    pub available_gb: f64,
    pub cached_gb: f64,
    pub swap_total_gb: f64,
    pub swap_used_gb: f64,
    pub usage_percent: f64,
}

#[derive(Debug, Clone, FromRow)]
pub struct GpuRow {
    pub snapshot_id: i64,
    pub device_index: i64,
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

#[derive(Debug, Clone, FromRow)]
pub struct DiskRow {
    pub id: i64,
    pub snapshot_id: i64,
    pub read_mbps: f64,
    pub write_mbps: f64,
    pub io_ops_per_sec: f64,
    pub queue_length: f64,
}

#[derive(Debug, Clone, FromRow)]
pub struct DiskPartitionRow {
    pub disk_metric_id: i64,
    pub device: String,
    pub total_gb: f64,
    pub used_gb: f64,
    pub free_gb: f64,
    pub usage_percent: f64,
}

#[derive(Debug, Clone, FromRow)]
pub struct NetworkRow {
    pub id: i64,
    pub snapshot_id: i64,
    pub download_mbps: f64,
    pub upload_mbps: f64,
    pub connections_active: i64,
    pub bytes_sent: i64,
    pub bytes_received: i64,
    pub packets_sent: i64,
    pub packets_received: i64,
    pub errors_in: i64,
    pub errors_out: i64,
}

#[derive(Debug, Clone, FromRow)]
pub struct NetworkInterfaceRow {
    pub network_metric_id: i64,
    pub name: String,
    pub speed_mbps: Option<f64>,
    pub is_up: bool,
}

#[derive(Debug, Clone, FromRow)]
pub struct ProcessRow {
    pub snapshot_id: i64,
    pub sort_order: i64,
    pub pid: i64,
    pub name: String,
    pub cpu_percent: f64,
    pub memory_mb: f64,
    pub thread_count: Option<i64>,
    pub status: String,
    pub started_at: Option<i64>,
}

#[derive(Debug, Clone, FromRow)]
pub struct ContextRow {
    pub snapshot_id: i64,
    pub user_active: bool,
    pub idle_seconds: i64,
    pub screen_locked: bool,
    pub time_of_day: String,
    pub day_of_week: String,
    pub user_action: String,
}

#[derive(Debug, Clone, FromRow)]
pub struct AnomalyRow {
    pub timestamp: i64,
    pub metric_name: String,
    pub current_value: f64,
    pub expected_value: f64,
    pub deviation_std: f64,
    pub severity: String,
    pub context_json: String,
}

#[derive(Debug, Clone, FromRow)]
pub struct BaselineRow {
    pub metric_name: String,
    pub mean: f64,
    pub std_dev: f64,
    pub sample_count: i64,
    pub updated_at: i64,
}
