mod api;
mod collectors;
mod config;
mod db;
mod health;
mod model;
mod patterns;
mod pipeline;
mod ring;
mod scheduler;

#[cfg(test)]
mod pattern_tests;
#[cfg(test)]
mod pipeline_tests;

use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use tower_http::compression::CompressionLayer;
use tower_http::cors::CorsLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use crate::config::AppConfig;
use crate::db::Database;
use crate::health::Health;
use crate::patterns::PatternHandle;
use crate::pipeline::Pipeline;
use crate::ring::RingBuffer;
use crate::scheduler::Scheduler;

/// Exit codes: 0 clean shutdown, 1 configuration error, 2 storage
/// initialization failure, 3 bind failure, 130 interrupt.
const EXIT_CONFIG: u8 = 1;
const EXIT_STORAGE: u8 = 2;
const EXIT_BIND: u8 = 3;
const EXIT_INTERRUPT: u8 = 130;

/// Shared application state available to all handlers.
pub struct AppState {
    pub config: AppConfig,
    pub db: Database,
    pub ring: RingBuffer,
    pub health: Health,
}

#[tokio::main]
async fn main() -> ExitCode {
    // Load .env if present (not required)
    dotenvy::dotenv().ok();

    let config = match AppConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("configuration error: {e:#}");
            return ExitCode::from(EXIT_CONFIG);
        }
    };

    let _log_guard = init_logging(&config);
    info!("Starting hostpulse v{}", env!("CARGO_PKG_VERSION"));

    // Bind address is config; parse failures are configuration errors.
    let addr = match config.bind_addr() {
        Ok(addr) => addr,
        Err(e) => {
            error!("configuration error: {e:#}");
            return ExitCode::from(EXIT_CONFIG);
        }
    };

    // Initialize the store
    let db = match Database::connect(&config.database_url).await {
        Ok(db) => db,
        Err(e) => {
            error!(error = %e, "storage initialization failed");
            return ExitCode::from(EXIT_STORAGE);
        }
    };
    if let Err(e) = db.migrate().await {
        error!(error = %e, "storage initialization failed");
        return ExitCode::from(EXIT_STORAGE);
    }
    info!(url = %config.database_url, "store initialized");

    // Wire up the sampling pipeline and its consumers
    let health = Health::new();
    let ring = RingBuffer::new(config.ring_capacity, config.subscriber_capacity);
    let collectors = collectors::build_collectors(&config);
    info!(
        collectors = collectors.len(),
        "collector registry initialized"
    );
    let pipeline = Pipeline::new(
        collectors,
        ring.clone(),
        health.clone(),
        config.write_queue_capacity,
    );
    let patterns = PatternHandle::new(&config, db.clone());
    let scheduler = Scheduler::new(
        config.clone(),
        pipeline.clone(),
        patterns.clone(),
        db.clone(),
        health.clone(),
    );

    // Consumers first, so the very first tick is neither missed by the
    // pattern layer nor stuck in the write queue.
    let mut handles = vec![
        pipeline.spawn_writer(db.clone(), scheduler.shutdown_signal()),
        patterns.spawn(&ring, scheduler.shutdown_signal()),
    ];
    handles.extend(scheduler.spawn().await);

    // HTTP surface (loopback by default)
    let state = Arc::new(AppState {
        config: config.clone(),
        db: db.clone(),
        ring,
        health: health.clone(),
    });
    let app = build_router(state);

    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(listener) => listener,
        Err(e) => {
            error!(%addr, error = %e, "failed to bind");
            return ExitCode::from(EXIT_BIND);
        }
    };
    info!("Starting HTTP server on {addr}");

    // Cooperative shutdown: scheduler stops ticking, in-flight work
    // drains within its budget, then HTTP stops accepting and the store
    // closes. A watchdog forces exit after the grace period.
    let interrupted = Arc::new(AtomicBool::new(false));
    let shutdown = {
        let scheduler = scheduler.clone();
        let interrupted = Arc::clone(&interrupted);
        let drain_budget = Duration::from_secs(config.drain_budget_secs);
        let grace = Duration::from_secs(config.shutdown_grace_secs);
        async move {
            let _ = tokio::signal::ctrl_c().await;
            interrupted.store(true, Ordering::SeqCst);
            info!("interrupt received; shutting down");
            tokio::spawn(async move {
                tokio::time::sleep(grace).await;
                error!("shutdown grace exceeded; forcing exit");
                std::process::exit(i32::from(EXIT_INTERRUPT));
            });
            scheduler.shutdown();
            scheduler::drain(handles, drain_budget).await;
        }
    };

    if let Err(e) = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
    {
        error!(error = %e, "server error");
    }

    db.close().await;
    health.set_scheduler_running(false).await;
    info!("shutdown complete");

    if interrupted.load(Ordering::SeqCst) {
        ExitCode::from(EXIT_INTERRUPT)
    } else {
        ExitCode::SUCCESS
    }
}

fn build_router(state: Arc<AppState>) -> Router {
    let timeout = Duration::from_secs(state.config.http_timeout_secs);
    api::routes(state)
        .layer(TraceLayer::new_for_http())
        .layer(CompressionLayer::new())
        .layer(TimeoutLayer::new(timeout))
        .layer(CorsLayer::permissive())
}

/// Tracing to stderr, or to LOG_FILE with a non-blocking writer. The
/// returned guard must stay alive for the file writer to flush.
fn init_logging(config: &AppConfig) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "hostpulse=info,tower_http=info".into());

    match &config.log_file {
        Some(path) => {
            rotate_oversized_log(path, config.log_rotate_mb);
            let path = std::path::Path::new(path);
            let dir = path
                .parent()
                .filter(|p| !p.as_os_str().is_empty())
                .unwrap_or_else(|| std::path::Path::new("."));
            let file_name = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| "hostpulse.log".into());
            let appender = tracing_appender::rolling::never(dir, file_name);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(writer)
                .with_ansi(false)
                .init();
            Some(guard)
        }
        None => {
            tracing_subscriber::fmt().with_env_filter(filter).init();
            None
        }
    }
}

/// Startup rollover: a log file past the size cap is renamed to
/// `<path>.1` (replacing any previous rollover) before the writer opens.
fn rotate_oversized_log(path: &str, rotate_mb: u64) {
    let cap_bytes = rotate_mb.saturating_mul(1024 * 1024);
    if let Ok(meta) = std::fs::metadata(path) {
        if meta.len() > cap_bytes {
            let rotated = format!("{path}.1");
            if let Err(e) = std::fs::rename(path, &rotated) {
                eprintln!("failed to rotate log file {path}: {e}");
            }
        }
    }
}
