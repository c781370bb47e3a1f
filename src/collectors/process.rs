use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use sysinfo::{ProcessRefreshKind, ProcessesToUpdate, System};
use tokio::time::Instant;

use super::{Cadence, Collector, CollectorFailure};
use crate::model::{Fragment, ProcessInfo};

const BYTES_PER_MB: f64 = 1024.0 * 1024.0;

/// Samples the top-N processes by CPU, ties broken by memory then name.
///
/// With `name_only` set (the default) only the short process name is
/// captured — never executable paths or command lines. Unsetting it
/// substitutes the first command-line token, still without arguments.
pub struct ProcessCollector {
    sys: Arc<Mutex<System>>,
    top_n: usize,
    name_only: bool,
}

impl ProcessCollector {
    pub fn new(top_n: usize, name_only: bool) -> Self {
        Self {
            sys: Arc::new(Mutex::new(System::new())),
            top_n,
            name_only,
        }
    }
}

#[async_trait]
impl Collector for ProcessCollector {
    fn name(&self) -> &'static str {
        "process"
    }

    fn cadence(&self) -> Cadence {
        Cadence::Medium
    }

    async fn sample(&self, _deadline: Instant) -> Result<Fragment, CollectorFailure> {
        let sys = Arc::clone(&self.sys);
        let top_n = self.top_n;
        let name_only = self.name_only;
        let processes = tokio::task::spawn_blocking(move || {
            let mut sys = match sys.lock() {
                Ok(g) => g,
                Err(poisoned) => poisoned.into_inner(),
            };
            sys.refresh_processes_specifics(
                ProcessesToUpdate::All,
                true,
                ProcessRefreshKind::everything(),
            );

            let mut rows: Vec<ProcessInfo> = sys
                .processes()
                .values()
                .map(|p| {
                    let pid = p.pid().as_u32();
                    let name = if name_only {
                        p.name().to_string_lossy().into_owned()
                    } else {
                        p.cmd()
                            .first()
                            .map(|arg| arg.to_string_lossy().into_owned())
                            .unwrap_or_else(|| p.name().to_string_lossy().into_owned())
                    };
                    ProcessInfo {
                        pid,
                        name,
                        cpu_percent: f64::from(p.cpu_usage()),
                        memory_mb: p.memory() as f64 / BYTES_PER_MB,
                        thread_count: thread_count(pid),
                        status: p.status().to_string(),
                        started_at: (p.start_time() > 0).then(|| p.start_time() as i64),
                    }
                })
                .collect();

            sort_processes(&mut rows);
            rows.truncate(top_n);
            rows
        })
        .await
        .map_err(|e| CollectorFailure::transient(format!("process sampler task failed: {e}")))?;

        if processes.is_empty() {
            return Err(CollectorFailure::transient("no processes visible"));
        }
        Ok(Fragment::Processes(processes))
    }
}

/// Ordering rule: CPU percent descending, ties by higher memory, then
/// name ascending.
pub(crate) fn sort_processes(rows: &mut [ProcessInfo]) {
    rows.sort_by(|a, b| {
        b.cpu_percent
            .partial_cmp(&a.cpu_percent)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| {
                b.memory_mb
                    .partial_cmp(&a.memory_mb)
                    .unwrap_or(std::cmp::Ordering::Equal)
            })
            .then_with(|| a.name.cmp(&b.name))
    });
}

/// Thread count from /proc/<pid>/status; absent off-Linux or for
/// processes that vanished mid-sample.
fn thread_count(pid: u32) -> Option<u32> {
    let status = std::fs::read_to_string(format!("/proc/{pid}/status")).ok()?;
    status
        .lines()
        .find_map(|line| line.strip_prefix("Threads:"))
        .and_then(|rest| rest.trim().parse().ok())
}
