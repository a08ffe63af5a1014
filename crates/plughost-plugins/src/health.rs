//! Health monitor: periodic sweeps over plugin stats and task runs.
//!
//! The short sweep restarts scheduled tasks that failed and then went quiet.
//! The long sweep builds a [`HealthReport`] and forces a full reload when it
//! finds anything critical.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use plughost_core::clock::Clock;
use plughost_core::config::HealthConfig;
use plughost_scheduler::{TaskKey, TaskRunStatus, TaskSupervisor};
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use crate::loader::{LoadSummary, PluginLoader};
use crate::registry::PluginRegistry;

/// Error rate above which a plugin is critical.
pub const MAX_ERROR_RATE: f64 = 0.1;
/// Average handler time above which a plugin is reported slow.
pub const SLOW_AVG_EXECUTION_MS: u64 = 5000;
/// Consecutive failures above which a task counts as stuck.
pub const STUCK_CONSECUTIVE_ERRORS: u32 = 3;

/// Expected period assumed for a schedule whose cadence is unknown.
fn fallback_period() -> Duration {
    Duration::hours(1)
}

/// Silence after which the long sweep counts a task as stuck.
fn stale_floor() -> Duration {
    Duration::hours(2)
}

/// Counts of scheduled tasks seen by one long sweep.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TaskSummary {
    pub total: usize,
    pub stuck: usize,
    pub active: usize,
}

/// Result of one long sweep.
#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub issues: Vec<String>,
    pub critical_issue_count: usize,
    pub scheduled_tasks: TaskSummary,
    pub last_sweep_at: DateTime<Utc>,
    pub reload_triggered: bool,
    pub reload: Option<LoadSummary>,
}

impl HealthReport {
    pub fn is_healthy(&self) -> bool {
        self.critical_issue_count == 0
    }
}

pub struct HealthMonitor {
    registry: Arc<PluginRegistry>,
    supervisor: TaskSupervisor,
    loader: Arc<PluginLoader>,
    clock: Arc<dyn Clock>,
    config: HealthConfig,
    last_report: Mutex<Option<HealthReport>>,
}

impl HealthMonitor {
    pub fn new(
        registry: Arc<PluginRegistry>,
        supervisor: TaskSupervisor,
        loader: Arc<PluginLoader>,
        clock: Arc<dyn Clock>,
        config: HealthConfig,
    ) -> Self {
        Self {
            registry,
            supervisor,
            loader,
            clock,
            config,
            last_report: Mutex::new(None),
        }
    }

    /// Restart every task that has failed and not run for twice its period.
    pub fn short_sweep(&self) -> Vec<TaskKey> {
        let now = self.clock.now();
        let stuck: Vec<TaskKey> = self
            .supervisor
            .status()
            .into_iter()
            .filter(|s| s.consecutive_errors > 0)
            .filter(|s| {
                s.last_run_at
                    .is_some_and(|last| now - last > expected_period(s) * 2)
            })
            .map(|s| s.key())
            .collect();

        let mut restarted = Vec::with_capacity(stuck.len());
        for key in stuck {
            match self.supervisor.restart_stuck(&key) {
                Ok(()) => {
                    tracing::warn!("🩺 Restarted stuck task {key}");
                    restarted.push(key);
                }
                Err(e) => tracing::warn!("🩺 Could not restart {key}: {e}"),
            }
        }
        restarted
    }

    /// Inspect every plugin and task; reload everything if anything is critical.
    pub async fn long_sweep(&self) -> HealthReport {
        let now = self.clock.now();
        let mut issues = Vec::new();
        let mut critical = 0;

        for record in self.registry.list() {
            let snap = record.stats.snapshot();
            let rate = snap.error_rate();
            if rate > MAX_ERROR_RATE {
                issues.push(format!(
                    "Plugin {}: high error rate ({:.1}%)",
                    record.id,
                    rate * 100.0
                ));
                critical += 1;
            }
            if snap.avg_execution_time_ms > SLOW_AVG_EXECUTION_MS {
                issues.push(format!(
                    "Plugin {}: slow execution (avg {}ms)",
                    record.id, snap.avg_execution_time_ms
                ));
            }
        }

        let statuses = self.supervisor.status();
        let mut stuck = 0;
        for status in &statuses {
            let key = status.key();
            if status.consecutive_errors > STUCK_CONSECUTIVE_ERRORS {
                issues.push(format!(
                    "Task {key}: multiple scheduled-task failures ({})",
                    status.consecutive_errors
                ));
                stuck += 1;
                continue;
            }
            let baseline = status.last_run_at.unwrap_or(status.registered_at);
            if now - baseline > stale_floor() {
                issues.push(format!("Task {key}: no execution in 2+ hours"));
                stuck += 1;
            }
        }
        critical += stuck;

        let scheduled_tasks = TaskSummary {
            total: statuses.len(),
            stuck,
            active: statuses.iter().filter(|s| s.active).count(),
        };

        let reload_triggered = critical > 0;
        let mut reload = None;
        if reload_triggered {
            tracing::warn!("🩺 {critical} critical issue(s), reloading all plugins");
            for issue in &issues {
                tracing::warn!("🩺   {issue}");
            }
            match self.loader.load_all(true).await {
                Ok(summary) => reload = Some(summary),
                Err(e) => tracing::error!("🩺 Health reload failed: {e}"),
            }
        } else {
            tracing::info!(
                "🩺 Health OK: {} plugin(s), {} task(s), {} issue(s)",
                self.registry.len(),
                statuses.len(),
                issues.len()
            );
        }

        let report = HealthReport {
            issues,
            critical_issue_count: critical,
            scheduled_tasks,
            last_sweep_at: now,
            reload_triggered,
            reload,
        };
        *self.last_report.lock() = Some(report.clone());
        report
    }

    pub fn last_report(&self) -> Option<HealthReport> {
        self.last_report.lock().clone()
    }

    /// Start both sweep timers; they stop when `token` is cancelled.
    pub fn spawn(self: &Arc<Self>, token: CancellationToken) -> Vec<JoinHandle<()>> {
        let short = {
            let monitor = self.clone();
            let token = token.clone();
            let every = std::time::Duration::from_secs(self.config.short_sweep_secs.max(1));
            tokio::spawn(
                async move {
                    let mut interval = tokio::time::interval(every);
                    interval.tick().await;
                    loop {
                        tokio::select! {
                            _ = token.cancelled() => break,
                            _ = interval.tick() => {
                                monitor.short_sweep();
                            }
                        }
                    }
                }
                .instrument(tracing::info_span!("health-short-sweep")),
            )
        };

        let long = {
            let monitor = self.clone();
            let every = std::time::Duration::from_secs(self.config.long_sweep_secs.max(1));
            tokio::spawn(
                async move {
                    let mut interval = tokio::time::interval(every);
                    interval.tick().await;
                    loop {
                        tokio::select! {
                            _ = token.cancelled() => break,
                            _ = interval.tick() => {
                                monitor.long_sweep().await;
                            }
                        }
                    }
                }
                .instrument(tracing::info_span!("health-long-sweep")),
            )
        };

        tracing::info!(
            "🩺 Health monitor started (short every {}s, long every {}s)",
            self.config.short_sweep_secs,
            self.config.long_sweep_secs
        );
        vec![short, long]
    }
}

/// A task's expected period; an hour when the schedule gives no cadence.
fn expected_period(status: &TaskRunStatus) -> Duration {
    status
        .expected_period_secs
        .map_or(fallback_period(), Duration::seconds)
}
