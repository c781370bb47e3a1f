use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{Datelike, Local, Timelike};
use sysinfo::{ProcessRefreshKind, ProcessesToUpdate, System};
use tokio::time::Instant;

use super::{Cadence, Collector, CollectorFailure};
use crate::model::{Fragment, SystemContext, TimeOfDay, UserAction};

/// CPU share below which the host counts as idle for activity tracking.
const ACTIVITY_CPU_THRESHOLD: f32 = 10.0;

/// Minimum CPU share for a process to count as an "active application"
/// when classifying the user's current activity.
const APP_CPU_THRESHOLD: f32 = 1.0;

/// Heuristic context collector: infers user activity from aggregate CPU
/// load and the names of busy processes.
///
/// `screen_locked` is always false here — the optional `session` bridge
/// reads the real lock state from the session manager.
pub struct ContextCollector {
    state: Arc<Mutex<ContextState>>,
}

struct ContextState {
    sys: System,
    last_active: Instant,
}

impl ContextCollector {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(ContextState {
                sys: System::new(),
                last_active: Instant::now(),
            })),
        }
    }
}

impl Default for ContextCollector {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Collector for ContextCollector {
    fn name(&self) -> &'static str {
        "context"
    }

    fn cadence(&self) -> Cadence {
        Cadence::High
    }

    async fn sample(&self, _deadline: Instant) -> Result<Fragment, CollectorFailure> {
        let state = Arc::clone(&self.state);
        let context = tokio::task::spawn_blocking(move || {
            let mut guard = match state.lock() {
                Ok(g) => g,
                Err(poisoned) => poisoned.into_inner(),
            };
            let now = Instant::now();

            guard.sys.refresh_cpu_usage();
            guard.sys.refresh_processes_specifics(
                ProcessesToUpdate::All,
                true,
                ProcessRefreshKind::nothing().with_cpu(),
            );

            let cpu_usage = guard.sys.global_cpu_usage();
            let busy_names: Vec<String> = guard
                .sys
                .processes()
                .values()
                .filter(|p| p.cpu_usage() > APP_CPU_THRESHOLD)
                .map(|p| p.name().to_string_lossy().to_lowercase())
                .collect();

            let action = classify_activity(&busy_names);
            let active = cpu_usage > ACTIVITY_CPU_THRESHOLD || action != UserAction::Unknown;
            if active {
                guard.last_active = now;
            }
            let idle_seconds = now.duration_since(guard.last_active).as_secs();
            drop(guard);

            let local = Local::now();
            SystemContext {
                user_active: active,
                idle_seconds,
                screen_locked: false,
                time_of_day: TimeOfDay::from_hour(local.hour()),
                day_of_week: local.weekday().to_string(),
                user_action: if active { action } else { UserAction::Idle },
            }
        })
        .await
        .map_err(|e| CollectorFailure::transient(format!("context sampler task failed: {e}")))?;

        Ok(Fragment::Context(context))
    }
}

/// Keyword classification over busy process names. Gaming wins over
/// streaming wins over coding wins over browsing, so a game with a
/// browser open still reads as gaming.
pub(crate) fn classify_activity(busy_names: &[String]) -> UserAction {
    const GAMING: &[&str] = &["steam", "proton", "wine", "lutris", "gamescope"];
    const STREAMING: &[&str] = &["vlc", "mpv", "spotify", "obs", "ffplay"];
    const CODING: &[&str] = &[
        "cargo", "rustc", "code", "codium", "vim", "nvim", "emacs", "idea", "pycharm", "clion",
        "gcc", "clang", "make",
    ];
    const BROWSING: &[&str] = &["firefox", "chrome", "chromium", "brave", "edge"];

    let matches = |keywords: &[&str]| {
        busy_names
            .iter()
            .any(|name| keywords.iter().any(|kw| name.contains(kw)))
    };

    if matches(GAMING) {
        UserAction::Gaming
    } else if matches(STREAMING) {
        UserAction::Streaming
    } else if matches(CODING) {
        UserAction::Coding
    } else if matches(BROWSING) {
        UserAction::Browsing
    } else {
        UserAction::Unknown
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::Duration;

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn classify_prefers_gaming_over_browsing() {
        let action = classify_activity(&names(&["firefox", "steam"]));
        assert_eq!(action, UserAction::Gaming);
    }

    #[test]
    fn classify_coding() {
        assert_eq!(
            classify_activity(&names(&["cargo", "bash"])),
            UserAction::Coding
        );
    }

    #[test]
    fn classify_unknown_for_unmatched() {
        assert_eq!(
            classify_activity(&names(&["systemd", "sshd"])),
            UserAction::Unknown
        );
        assert_eq!(classify_activity(&[]), UserAction::Unknown);
    }

    #[tokio::test]
    async fn sample_produces_context_fragment() {
        let collector = ContextCollector::new();
        let deadline = Instant::now() + Duration::from_secs(10);
        let fragment = collector.sample(deadline).await.expect("context sample");
        match fragment {
            Fragment::Context(ctx) => {
                assert!(!ctx.screen_locked);
                assert!(!ctx.day_of_week.is_empty());
            }
            other => panic!("expected context fragment, got {other:?}"),
        }
    }
}
