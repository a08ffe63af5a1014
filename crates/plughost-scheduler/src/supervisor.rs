//! Task supervisor: one tokio worker per registered task.
//!
//! A worker sleeps on the injected [`Clock`] until the task's next fire,
//! asks the owners probe whether the plugin is still active, runs the handler
//! behind the panic guard and records the outcome. Workers are stopped through
//! per-run cancellation tokens that are children of the host's root token.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use parking_lot::Mutex;
use plughost_core::clock::Clock;
use plughost_core::error::{PlugHostError, Result};
use plughost_core::guard::{Guarded, run_guarded};
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use crate::cron::CronSchedule;
use crate::tasks::{TaskDescriptor, TaskHandler, TaskKey, TaskOwners, TaskRunStatus};

/// A run is hard-disabled once its consecutive failures exceed this.
pub const MAX_CONSECUTIVE_ERRORS: u32 = 5;

/// Live state of one registered task.
struct TaskRun {
    descriptor: TaskDescriptor,
    schedule: CronSchedule,
    registered_at: DateTime<Utc>,
    next_fire_at: Option<DateTime<Utc>>,
    last_run_at: Option<DateTime<Utc>>,
    consecutive_errors: u32,
    disabled: bool,
    cancel: CancellationToken,
    /// Identifies the worker currently allowed to drive this run.
    worker_id: u64,
    worker_alive: bool,
}

struct Shared {
    runs: Mutex<BTreeMap<TaskKey, TaskRun>>,
    clock: Arc<dyn Clock>,
    tz: Tz,
    owners: Arc<dyn TaskOwners>,
    root: CancellationToken,
    next_worker_id: AtomicU64,
}

/// Owns every task run; cheap to clone.
#[derive(Clone)]
pub struct TaskSupervisor {
    shared: Arc<Shared>,
}

impl std::fmt::Debug for TaskSupervisor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskSupervisor")
            .field("tz", &self.shared.tz)
            .field("tasks", &self.shared.runs.lock().len())
            .finish()
    }
}

impl TaskSupervisor {
    pub fn new(
        clock: Arc<dyn Clock>,
        tz: Tz,
        owners: Arc<dyn TaskOwners>,
        root: CancellationToken,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                runs: Mutex::new(BTreeMap::new()),
                clock,
                tz,
                owners,
                root,
                next_worker_id: AtomicU64::new(1),
            }),
        }
    }

    pub fn timezone(&self) -> Tz {
        self.shared.tz
    }

    /// Register a task and start its worker. An existing run with the same
    /// key is cancelled and replaced.
    pub fn register(&self, descriptor: TaskDescriptor) -> Result<()> {
        let schedule = CronSchedule::parse(&descriptor.expression)?;
        let now = self.shared.clock.now();
        let next_fire_at = schedule.next_after(now, &self.shared.tz);
        if next_fire_at.is_none() {
            tracing::warn!(
                "⏰ Task {} ('{}') has no fire time within the search window",
                descriptor.key,
                schedule
            );
        }

        let key = descriptor.key.clone();
        let worker_id = self.shared.next_worker_id.fetch_add(1, Ordering::Relaxed);
        let cancel = self.shared.root.child_token();
        let run = TaskRun {
            descriptor,
            schedule,
            registered_at: now,
            next_fire_at,
            last_run_at: None,
            consecutive_errors: 0,
            disabled: false,
            cancel: cancel.clone(),
            worker_id,
            worker_alive: true,
        };

        let replaced = self.shared.runs.lock().insert(key.clone(), run);
        if let Some(old) = replaced {
            old.cancel.cancel();
            tracing::info!("⏰ Task {key} re-registered, previous worker stopped");
        }

        tracing::info!(
            "⏰ Task registered: {key} next={}",
            next_fire_at.map(|t| t.to_rfc3339()).unwrap_or_else(|| "never".into())
        );
        self.spawn_worker(key, worker_id, cancel);
        Ok(())
    }

    /// Run a task now, outside its schedule, with the usual accounting.
    pub async fn trigger(&self, key: &TaskKey) -> Result<Guarded> {
        let handler = {
            let runs = self.shared.runs.lock();
            let run = runs
                .get(key)
                .ok_or_else(|| PlugHostError::NotFound(format!("task {key}")))?;
            run.descriptor.handler.clone()
        };
        tracing::info!("⏰ Manual trigger: {key}");
        Ok(self.shared.execute(key, None, handler).await)
    }

    /// Status of every run, ordered by key.
    pub fn status(&self) -> Vec<TaskRunStatus> {
        let now = self.shared.clock.now();
        let tz = self.shared.tz;
        self.shared
            .runs
            .lock()
            .iter()
            .map(|(key, run)| TaskRunStatus {
                plugin_id: key.plugin_id.clone(),
                name: key.task_name.clone(),
                expression: run.schedule.expression().to_string(),
                next_fire_at: run.next_fire_at,
                last_run_at: run.last_run_at,
                registered_at: run.registered_at,
                consecutive_errors: run.consecutive_errors,
                disabled: run.disabled,
                active: run.worker_alive && !run.disabled && !run.cancel.is_cancelled(),
                expected_period_secs: run
                    .schedule
                    .expected_period(now, &tz)
                    .map(|d| d.num_seconds()),
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.shared.runs.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, key: &TaskKey) -> bool {
        self.shared.runs.lock().contains_key(key)
    }

    /// Stop and forget every run.
    pub fn cancel_all(&self) -> usize {
        let drained = std::mem::take(&mut *self.shared.runs.lock());
        for run in drained.values() {
            run.cancel.cancel();
        }
        if !drained.is_empty() {
            tracing::info!("⏰ Cancelled {} scheduled task(s)", drained.len());
        }
        drained.len()
    }

    /// Stop and forget the runs owned by one plugin.
    pub fn cancel_plugin(&self, plugin_id: &str) -> usize {
        let mut runs = self.shared.runs.lock();
        let keys: Vec<TaskKey> = runs
            .keys()
            .filter(|k| k.plugin_id == plugin_id)
            .cloned()
            .collect();
        for key in &keys {
            if let Some(run) = runs.remove(key) {
                run.cancel.cancel();
            }
        }
        keys.len()
    }

    /// Stop the current worker, clear the failure state and start afresh.
    pub fn restart_stuck(&self, key: &TaskKey) -> Result<()> {
        let now = self.shared.clock.now();
        let worker_id = self.shared.next_worker_id.fetch_add(1, Ordering::Relaxed);
        let cancel = self.shared.root.child_token();
        {
            let mut runs = self.shared.runs.lock();
            let run = runs
                .get_mut(key)
                .ok_or_else(|| PlugHostError::NotFound(format!("task {key}")))?;
            run.cancel.cancel();
            run.cancel = cancel.clone();
            run.consecutive_errors = 0;
            run.disabled = false;
            run.next_fire_at = run.schedule.next_after(now, &self.shared.tz);
            run.worker_id = worker_id;
            run.worker_alive = true;
        }
        tracing::info!("🔄 Restarted scheduled task {key}");
        self.spawn_worker(key.clone(), worker_id, cancel);
        Ok(())
    }

    /// Admin-facing alias of [`Self::restart_stuck`].
    pub fn reset(&self, key: &TaskKey) -> Result<()> {
        self.restart_stuck(key)
    }

    /// Overwrite failure state so health checks can be exercised.
    #[cfg(any(test, feature = "test-util"))]
    pub fn force_run_state(
        &self,
        key: &TaskKey,
        consecutive_errors: u32,
        last_run_at: Option<DateTime<Utc>>,
    ) -> Result<()> {
        let mut runs = self.shared.runs.lock();
        let run = runs
            .get_mut(key)
            .ok_or_else(|| PlugHostError::NotFound(format!("task {key}")))?;
        run.consecutive_errors = consecutive_errors;
        run.last_run_at = last_run_at;
        Ok(())
    }

    fn spawn_worker(&self, key: TaskKey, worker_id: u64, cancel: CancellationToken) {
        let span = tracing::info_span!("task-worker", task = %key);
        let shared = self.shared.clone();
        tokio::spawn(worker_loop(shared, key, worker_id, cancel).instrument(span));
    }
}

impl Shared {
    /// Run a handler and fold the outcome into the run's state. `fired` is
    /// the scheduled instant and worker id for worker fires, `None` for
    /// manual triggers. A worker that was replaced while its handler ran
    /// leaves the replacement run untouched.
    async fn execute(
        &self,
        key: &TaskKey,
        fired: Option<(DateTime<Utc>, u64)>,
        handler: TaskHandler,
    ) -> Guarded {
        let outcome = run_guarded(handler()).await;
        let now = self.clock.now();

        if let Some(err) = outcome.error_text() {
            let err = PlugHostError::Task {
                key: key.to_string(),
                reason: err.to_string(),
            };
            tracing::warn!("❌ {err}");
            self.owners.record_task_error(&key.plugin_id, &err.to_string());
        }

        let mut runs = self.runs.lock();
        let run = runs
            .get_mut(key)
            .filter(|r| fired.is_none_or(|(_, worker_id)| r.worker_id == worker_id));
        if let Some(run) = run {
            run.last_run_at = Some(now);
            if outcome.is_ok() {
                run.consecutive_errors = 0;
            } else {
                run.consecutive_errors += 1;
                if run.consecutive_errors > MAX_CONSECUTIVE_ERRORS && !run.disabled {
                    run.disabled = true;
                    run.cancel.cancel();
                    tracing::error!(
                        "🛑 Task {key} disabled after {} consecutive failures",
                        run.consecutive_errors
                    );
                }
            }
            if let Some((fired, _)) = fired {
                run.next_fire_at = next_fire(&run.schedule, fired, now, &self.tz);
            }
        }
        outcome
    }

    /// Move a run past a fire that was skipped because its owner is inactive.
    fn skip(&self, key: &TaskKey, worker_id: u64, fired: DateTime<Utc>) {
        let now = self.clock.now();
        let mut runs = self.runs.lock();
        if let Some(run) = runs.get_mut(key).filter(|r| r.worker_id == worker_id) {
            run.next_fire_at = next_fire(&run.schedule, fired, now, &self.tz);
        }
    }
}

/// Next fire after `fired`; if that has already passed, re-anchor on `now`
/// so missed fires collapse into one.
fn next_fire(
    schedule: &CronSchedule,
    fired: DateTime<Utc>,
    now: DateTime<Utc>,
    tz: &Tz,
) -> Option<DateTime<Utc>> {
    match schedule.next_after(fired, tz) {
        Some(next) if next < now => schedule.next_after(now, tz),
        other => other,
    }
}

/// Clears `worker_alive` when the worker exits, however it exits.
struct WorkerGuard {
    shared: Arc<Shared>,
    key: TaskKey,
    worker_id: u64,
}

impl Drop for WorkerGuard {
    fn drop(&mut self) {
        let mut runs = self.shared.runs.lock();
        if let Some(run) = runs.get_mut(&self.key).filter(|r| r.worker_id == self.worker_id) {
            run.worker_alive = false;
        }
    }
}

async fn worker_loop(shared: Arc<Shared>, key: TaskKey, worker_id: u64, cancel: CancellationToken) {
    let _guard = WorkerGuard {
        shared: shared.clone(),
        key: key.clone(),
        worker_id,
    };

    loop {
        let deadline = {
            let runs = shared.runs.lock();
            match runs.get(&key) {
                Some(run) if run.worker_id == worker_id && !run.disabled => run.next_fire_at,
                _ => None,
            }
        };
        let Some(deadline) = deadline else {
            return;
        };

        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = shared.clock.sleep_until(deadline) => {}
        }

        let handler = {
            let runs = shared.runs.lock();
            match runs.get(&key) {
                Some(run) if run.worker_id == worker_id && !run.disabled => {
                    run.descriptor.handler.clone()
                }
                _ => return,
            }
        };
        if cancel.is_cancelled() {
            return;
        }

        if !shared.owners.is_active(&key.plugin_id) {
            tracing::debug!("⏰ Skipping {key}: plugin inactive");
            shared.skip(&key, worker_id, deadline);
            continue;
        }

        tracing::debug!("⏰ Firing {key}");
        shared.execute(&key, Some((deadline, worker_id)), handler).await;
    }
}
