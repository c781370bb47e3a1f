use async_trait::async_trait;
use chrono::{Datelike, Local, Timelike};
use tokio::time::Instant;

use super::{Cadence, Collector, CollectorFailure};
use crate::model::{Fragment, SystemContext, TimeOfDay, UserAction};

/// Platform-query context bridge: reads real idle/lock state from the
/// login manager via `loginctl`.
///
/// Optional; enable with `session` in COLLECTORS_ENABLED in place of the
/// heuristic `context` collector. Hosts without systemd-logind disable
/// themselves on first sample.
pub struct SessionCollector;

impl SessionCollector {
    pub fn new() -> Self {
        Self
    }
}

impl Default for SessionCollector {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Collector for SessionCollector {
    fn name(&self) -> &'static str {
        "session"
    }

    fn cadence(&self) -> Cadence {
        Cadence::High
    }

    async fn sample(&self, deadline: Instant) -> Result<Fragment, CollectorFailure> {
        let session_id = first_session_id(deadline).await?;
        let show = run_loginctl(
            deadline,
            &[
                "show-session",
                &session_id,
                "-p",
                "IdleHint",
                "-p",
                "IdleSinceHint",
                "-p",
                "LockedHint",
            ],
        )
        .await?;

        let props = parse_properties(&show);
        let idle = props.get("IdleHint").map(|v| v == "yes").unwrap_or(false);
        let locked = props.get("LockedHint").map(|v| v == "yes").unwrap_or(false);
        let idle_seconds = if idle {
            props
                .get("IdleSinceHint")
                .and_then(|v| v.parse::<i64>().ok())
                .map(|usec| {
                    let now_usec = chrono::Utc::now().timestamp_micros();
                    ((now_usec - usec).max(0) / 1_000_000) as u64
                })
                .unwrap_or(0)
        } else {
            0
        };

        let local = Local::now();
        Ok(Fragment::Context(SystemContext {
            user_active: !idle && !locked,
            idle_seconds,
            screen_locked: locked,
            time_of_day: TimeOfDay::from_hour(local.hour()),
            day_of_week: local.weekday().to_string(),
            user_action: if idle || locked {
                UserAction::Idle
            } else {
                UserAction::Unknown
            },
        }))
    }
}

async fn first_session_id(deadline: Instant) -> Result<String, CollectorFailure> {
    let listing = run_loginctl(deadline, &["list-sessions", "--no-legend"]).await?;
    listing
        .lines()
        .filter_map(|line| line.split_whitespace().next())
        .next()
        .map(str::to_string)
        .ok_or_else(|| CollectorFailure::unsupported("no login sessions"))
}

async fn run_loginctl(deadline: Instant, args: &[&str]) -> Result<String, CollectorFailure> {
    let output = tokio::time::timeout_at(
        deadline,
        tokio::process::Command::new("loginctl").args(args).output(),
    )
    .await
    .map_err(|_| CollectorFailure::timeout())?;

    let output = match output {
        Ok(o) => o,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(CollectorFailure::missing_dependency(
                "loginctl not found on PATH",
            ));
        }
        Err(e) => return Err(CollectorFailure::transient(format!("loginctl: {e}"))),
    };

    if !output.status.success() {
        return Err(CollectorFailure::unsupported(format!(
            "loginctl exited with {}",
            output.status
        )));
    }
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

/// Parse `Key=value` lines from `loginctl show-session`.
fn parse_properties(output: &str) -> std::collections::HashMap<String, String> {
    output
        .lines()
        .filter_map(|line| {
            let (key, value) = line.split_once('=')?;
            Some((key.trim().to_string(), value.trim().to_string()))
        })
        .collect()
}
