use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use sysinfo::Networks;
use tokio::time::Instant;

use super::{Cadence, Collector, CollectorFailure};
use crate::model::{Fragment, NetworkInterface, NetworkMetrics};

const BYTES_PER_MB: f64 = 1024.0 * 1024.0;

/// Cumulative per-interface counters as read from the OS.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct IfaceCounters {
    pub bytes_received: u64,
    pub bytes_sent: u64,
    pub packets_received: u64,
    pub packets_sent: u64,
    pub errors_in: u64,
    pub errors_out: u64,
}

/// Delta-based network collector.
///
/// Keeps last-sample counters per interface; the first sample for an
/// interface contributes zero to the rates (warming up), and a counter
/// regression (wraparound or interface reset) zeroes that interface's
/// rate and restarts its delta state.
pub struct NetworkCollector {
    prev: Arc<Mutex<HashMap<String, (IfaceCounters, Instant)>>>,
}

impl NetworkCollector {
    pub fn new() -> Self {
        Self {
            prev: Arc::new(Mutex::new(HashMap::new())),
        }
    }
}

impl Default for NetworkCollector {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Collector for NetworkCollector {
    fn name(&self) -> &'static str {
        "network"
    }

    fn cadence(&self) -> Cadence {
        Cadence::Medium
    }

    async fn sample(&self, _deadline: Instant) -> Result<Fragment, CollectorFailure> {
        let prev = Arc::clone(&self.prev);
        let metrics = tokio::task::spawn_blocking(move || {
            let networks = Networks::new_with_refreshed_list();
            let now = Instant::now();

            let mut totals = IfaceCounters::default();
            let mut download_bps = 0.0_f64;
            let mut upload_bps = 0.0_f64;
            let mut interfaces = Vec::new();

            let mut state = match prev.lock() {
                Ok(g) => g,
                Err(poisoned) => poisoned.into_inner(),
            };

            for (name, data) in networks.iter() {
                if name == "lo" {
                    continue;
                }
                let current = IfaceCounters {
                    bytes_received: data.total_received(),
                    bytes_sent: data.total_transmitted(),
                    packets_received: data.total_packets_received(),
                    packets_sent: data.total_packets_transmitted(),
                    errors_in: data.total_errors_on_received(),
                    errors_out: data.total_errors_on_transmitted(),
                };

                totals.bytes_received += current.bytes_received;
                totals.bytes_sent += current.bytes_sent;
                totals.packets_received += current.packets_received;
                totals.packets_sent += current.packets_sent;
                totals.errors_in += current.errors_in;
                totals.errors_out += current.errors_out;

                if let Some((before, at)) = state.get(name) {
                    let (down, up) = iface_rates(*before, current, now.duration_since(*at));
                    download_bps += down;
                    upload_bps += up;
                }
                state.insert(name.clone(), (current, now));

                interfaces.push(NetworkInterface {
                    name: name.clone(),
                    speed_mbps: interface_speed_mbps(name),
                    is_up: interface_is_up(name),
                });
            }
            // Drop state for interfaces that disappeared.
            state.retain(|_, (_, at)| *at == now);
            drop(state);

            interfaces.sort_by(|a, b| a.name.cmp(&b.name));

            NetworkMetrics {
                download_mbps: download_bps / BYTES_PER_MB,
                upload_mbps: upload_bps / BYTES_PER_MB,
                connections_active: count_established_connections(),
                bytes_sent: totals.bytes_sent,
                bytes_received: totals.bytes_received,
                packets_sent: totals.packets_sent,
                packets_received: totals.packets_received,
                errors_in: totals.errors_in,
                errors_out: totals.errors_out,
                interfaces,
            }
        })
        .await
        .map_err(|e| CollectorFailure::transient(format!("network sampler task failed: {e}")))?;

        Ok(Fragment::Network(metrics))
    }
}

/// Per-interface first-difference in bytes/sec. Regressions yield zero.
pub(crate) fn iface_rates(prev: IfaceCounters, cur: IfaceCounters, dt: Duration) -> (f64, f64) {
    let secs = dt.as_secs_f64();
    if secs <= 0.0 {
        return (0.0, 0.0);
    }
    if cur.bytes_received < prev.bytes_received || cur.bytes_sent < prev.bytes_sent {
        return (0.0, 0.0);
    }
    (
        (cur.bytes_received - prev.bytes_received) as f64 / secs,
        (cur.bytes_sent - prev.bytes_sent) as f64 / secs,
    )
}

/// Link speed in Mbit/s from sysfs; virtual interfaces report -1 or nothing.
fn interface_speed_mbps(name: &str) -> Option<f64> {
    std::fs::read_to_string(format!("/sys/class/net/{name}/speed"))
        .ok()
        .and_then(|s| s.trim().parse::<i64>().ok())
        .filter(|v| *v > 0)
        .map(|v| v as f64)
}

fn interface_is_up(name: &str) -> bool {
    std::fs::read_to_string(format!("/sys/class/net/{name}/operstate"))
        .map(|s| s.trim() == "up")
        .unwrap_or(false)
}

/// Count ESTABLISHED sockets in /proc/net/tcp and tcp6. Best effort.
fn count_established_connections() -> u64 {
    let mut count = 0_u64;
    for path in ["/proc/net/tcp", "/proc/net/tcp6"] {
        if let Ok(content) = std::fs::read_to_string(path) {
            count += content
                .lines()
                .skip(1)
                .filter(|line| {
                    // sl local_address rem_address st ...
                    line.split_whitespace().nth(3) == Some("01")
                })
                .count() as u64;
        }
    }
    count
}
