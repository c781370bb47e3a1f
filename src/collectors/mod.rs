pub mod context;
pub mod cpu;
pub mod disk;
pub mod gpu;
pub mod gpu_smi;
pub mod network;
pub mod process;
pub mod ram;
pub mod session;

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tokio::time::Instant;

use crate::config::AppConfig;
use crate::model::Fragment;

/// Rate class a collector is sampled at. Ordered fastest first, so a tick
/// at cadence T runs every collector with `cadence() <= T`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Cadence {
    High,
    Medium,
    Low,
}

/// Why a sample produced no fragment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureCode {
    Timeout,
    Unsupported,
    PermissionDenied,
    TransientError,
    MissingDependency,
}

impl FailureCode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Timeout => "timeout",
            Self::Unsupported => "unsupported",
            Self::PermissionDenied => "permission_denied",
            Self::TransientError => "transient_error",
            Self::MissingDependency => "missing_dependency",
        }
    }

    /// Permanent failures auto-disable the collector for the session.
    pub fn is_permanent(self) -> bool {
        matches!(
            self,
            Self::Unsupported | Self::PermissionDenied | Self::MissingDependency
        )
    }
}

#[derive(Debug, Clone, Error)]
#[error("{}: {message}", code.as_str())]
pub struct CollectorFailure {
    pub code: FailureCode,
    pub message: String,
}

impl CollectorFailure {
    pub fn timeout() -> Self {
        Self {
            code: FailureCode::Timeout,
            message: "deadline exceeded".into(),
        }
    }

    pub fn unsupported(message: impl Into<String>) -> Self {
        Self {
            code: FailureCode::Unsupported,
            message: message.into(),
        }
    }

    pub fn transient(message: impl Into<String>) -> Self {
        Self {
            code: FailureCode::TransientError,
            message: message.into(),
        }
    }

    pub fn missing_dependency(message: impl Into<String>) -> Self {
        Self {
            code: FailureCode::MissingDependency,
            message: message.into(),
        }
    }

    pub fn permission_denied(message: impl Into<String>) -> Self {
        Self {
            code: FailureCode::PermissionDenied,
            message: message.into(),
        }
    }
}

/// One metric-family sampler.
///
/// `sample` must be idempotent and side-effect-free apart from the
/// collector's own delta-state counters, must tolerate concurrent
/// invocation alongside other collectors, and must return by `deadline`.
#[async_trait]
pub trait Collector: Send + Sync {
    /// Stable identifier; key in the error map and the metric tables.
    fn name(&self) -> &'static str;

    fn cadence(&self) -> Cadence;

    async fn sample(&self, deadline: Instant) -> Result<Fragment, CollectorFailure>;
}

/// Build the enabled collector set from config.
///
/// Config validation has already rejected duplicate providers for the same
/// fragment family, so the result maps one collector per family.
pub fn build_collectors(config: &AppConfig) -> Vec<Arc<dyn Collector>> {
    let mut out: Vec<Arc<dyn Collector>> = Vec::new();
    for name in &config.collectors_enabled {
        match name.as_str() {
            "cpu" => out.push(Arc::new(cpu::CpuCollector::new())),
            "ram" => out.push(Arc::new(ram::RamCollector::new())),
            "gpu" => out.push(Arc::new(gpu::GpuCollector::new())),
            "gpu_smi" => out.push(Arc::new(gpu_smi::GpuSmiCollector::new())),
            "disk" => out.push(Arc::new(disk::DiskCollector::new())),
            "network" => out.push(Arc::new(network::NetworkCollector::new())),
            "process" => out.push(Arc::new(process::ProcessCollector::new(
                config.process_top_n,
                config.process_name_only,
            ))),
            "context" => out.push(Arc::new(context::ContextCollector::new())),
            "session" => out.push(Arc::new(session::SessionCollector::new())),
            other => unreachable!("collector {other} passed config validation"),
        }
    }
    out
}

/// Collectors considered heavy; the self-monitor disables these first
/// when the agent overruns its resource caps.
pub const HEAVY_COLLECTORS: &[&str] = &["gpu_smi", "process", "gpu"];
