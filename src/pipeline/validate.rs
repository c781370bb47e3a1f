use crate::model::{
    CpuMetrics, DiskMetrics, Fragment, GpuMetrics, NetworkMetrics, ProcessInfo, RamMetrics,
};

/// RAM accounting slack: used + available may exceed total by up to 5%.
const RAM_ACCOUNTING_TOLERANCE: f64 = 1.05;

/// Validate a normalized fragment against the value-range invariants.
///
/// Validation is per-fragment, never cross-fragment. On rejection the
/// fragment is dropped and the collector recorded in the error map with
/// the returned `invalid_range:<field>` reason.
pub fn validate_fragment(fragment: &Fragment) -> Result<(), String> {
    match fragment {
        Fragment::Cpu(cpu) => validate_cpu(cpu),
        Fragment::Ram(ram) => validate_ram(ram),
        Fragment::Gpu(gpus) => validate_gpus(gpus),
        Fragment::Disk(disk) => validate_disk(disk),
        Fragment::Network(network) => validate_network(network),
        Fragment::Processes(processes) => validate_processes(processes),
        Fragment::Context(_) => Ok(()), // field types already constrain the values
    }
}

fn invalid(field: &str) -> String {
    format!("invalid_range:{field}")
}

fn percent(value: f64, field: &str) -> Result<(), String> {
    if (0.0..=100.0).contains(&value) {
        Ok(())
    } else {
        Err(invalid(field))
    }
}

fn non_negative(value: f64, field: &str) -> Result<(), String> {
    if value >= 0.0 && value.is_finite() {
        Ok(())
    } else {
        Err(invalid(field))
    }
}

fn validate_cpu(cpu: &CpuMetrics) -> Result<(), String> {
    percent(cpu.usage_percent, "usage_percent")?;
    if let Some(freq) = cpu.frequency_mhz {
        if freq <= 0.0 {
            return Err(invalid("frequency_mhz"));
        }
    }
    if let Some(temp) = cpu.temperature_celsius {
        if !(0.0..=150.0).contains(&temp) {
            return Err(invalid("temperature_celsius"));
        }
    }
    if cpu.logical_count == 0 {
        return Err(invalid("logical_count"));
    }
    if cpu.physical_count == 0 {
        return Err(invalid("physical_count"));
    }
    if !cpu.per_core_usage.is_empty() && cpu.per_core_usage.len() != cpu.logical_count as usize {
        return Err(invalid("per_core_usage"));
    }
    for core in &cpu.per_core_usage {
        percent(*core, "per_core_usage")?;
    }
    Ok(())
}

fn validate_ram(ram: &RamMetrics) -> Result<(), String> {
    if ram.total_gb <= 0.0 {
        return Err(invalid("total_gb"));
    }
    non_negative(ram.used_gb, "used_gb")?;
    non_negative(ram.available_gb, "available_gb")?;
    non_negative(ram.cached_gb, "cached_gb")?;
    non_negative(ram.swap_total_gb, "swap_total_gb")?;
    non_negative(ram.swap_used_gb, "swap_used_gb")?;
    if ram.used_gb + ram.available_gb > ram.total_gb * RAM_ACCOUNTING_TOLERANCE {
        return Err(invalid("used_gb"));
    }
    if let Some(pct) = ram.usage_percent {
        percent(pct, "usage_percent")?;
    }
    Ok(())
}

fn validate_gpus(gpus: &[GpuMetrics]) -> Result<(), String> {
    for gpu in gpus {
        percent(gpu.usage_percent, "usage_percent")?;
        non_negative(gpu.memory_total_gb, "memory_total_gb")?;
        if gpu.memory_used_gb < 0.0 || gpu.memory_used_gb > gpu.memory_total_gb {
            return Err(invalid("memory_used_gb"));
        }
        if let Some(fan) = gpu.fan_rpm {
            non_negative(fan, "fan_rpm")?;
        }
        if let Some(power) = gpu.power_watts {
            non_negative(power, "power_watts")?;
        }
    }
    Ok(())
}

fn validate_disk(disk: &DiskMetrics) -> Result<(), String> {
    non_negative(disk.read_mbps, "read_mbps")?;
    non_negative(disk.write_mbps, "write_mbps")?;
    non_negative(disk.io_ops_per_sec, "io_ops_per_sec")?;
    non_negative(disk.queue_length, "queue_length")?;
    for partition in &disk.partitions {
        non_negative(partition.total_gb, "total_gb")?;
        non_negative(partition.used_gb, "used_gb")?;
        non_negative(partition.free_gb, "free_gb")?;
        percent(partition.usage_percent, "usage_percent")?;
    }
    Ok(())
}

fn validate_network(network: &NetworkMetrics) -> Result<(), String> {
    non_negative(network.download_mbps, "download_mbps")?;
    non_negative(network.upload_mbps, "upload_mbps")?;
    Ok(())
}

fn validate_processes(processes: &[ProcessInfo]) -> Result<(), String> {
    for process in processes {
        non_negative(process.cpu_percent, "cpu_percent")?;
        non_negative(process.memory_mb, "memory_mb")?;
    }
    Ok(())
}
