use crate::model::Fragment;

/// Normalize one fragment in place: derive trivially computable fields
/// and enforce the stable ordering of list fragments.
///
/// Unit coercion to GB/MHz/MB-per-second happens at the collector
/// boundary; this pass is pure and idempotent.
pub fn normalize_fragment(fragment: &mut Fragment) {
    match fragment {
        Fragment::Ram(ram) => {
            if ram.usage_percent.is_none() && ram.total_gb > 0.0 {
                ram.usage_percent = Some((ram.used_gb / ram.total_gb * 100.0).clamp(0.0, 100.0));
            }
        }
        Fragment::Gpu(gpus) => {
            gpus.sort_by_key(|g| g.device_index);
        }
        Fragment::Disk(disk) => {
            disk.partitions.sort_by(|a, b| a.device.cmp(&b.device));
        }
        Fragment::Network(network) => {
            network.interfaces.sort_by(|a, b| a.name.cmp(&b.name));
        }
        Fragment::Processes(processes) => {
            crate::collectors::process::sort_processes(processes);
        }
        Fragment::Cpu(_) | Fragment::Context(_) => {}
    }
}
