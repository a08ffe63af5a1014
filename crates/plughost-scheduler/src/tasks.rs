//! Task definitions: identity, handler and the status view of a task run.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use plughost_core::error::PlugHostError;
use serde::{Deserialize, Serialize};

/// Identity of a scheduled task: the owning plugin plus the task's name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TaskKey {
    pub plugin_id: String,
    pub task_name: String,
}

impl TaskKey {
    pub fn new(plugin_id: &str, task_name: &str) -> Self {
        Self {
            plugin_id: plugin_id.to_string(),
            task_name: task_name.to_string(),
        }
    }
}

impl fmt::Display for TaskKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.plugin_id, self.task_name)
    }
}

impl FromStr for TaskKey {
    type Err = PlugHostError;

    /// Parse `"plugin/task"`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once('/') {
            Some((plugin, task)) if !plugin.is_empty() && !task.is_empty() => {
                Ok(Self::new(plugin, task))
            }
            _ => Err(PlugHostError::NotFound(format!(
                "task key '{s}' (expected plugin/task)"
            ))),
        }
    }
}

/// The work a task performs on each fire.
pub type TaskHandler = Arc<dyn Fn() -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync>;

/// Everything needed to register a task.
#[derive(Clone)]
pub struct TaskDescriptor {
    pub key: TaskKey,
    pub expression: String,
    pub handler: TaskHandler,
}

impl TaskDescriptor {
    pub fn new<F, Fut>(key: TaskKey, expression: &str, handler: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        Self {
            key,
            expression: expression.to_string(),
            handler: Arc::new(move || Box::pin(handler())),
        }
    }
}

impl fmt::Debug for TaskDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskDescriptor")
            .field("key", &self.key)
            .field("expression", &self.expression)
            .finish_non_exhaustive()
    }
}

/// Snapshot of one task run, as reported by the supervisor.
#[derive(Debug, Clone, Serialize)]
pub struct TaskRunStatus {
    pub plugin_id: String,
    pub name: String,
    pub expression: String,
    pub next_fire_at: Option<DateTime<Utc>>,
    pub last_run_at: Option<DateTime<Utc>>,
    pub registered_at: DateTime<Utc>,
    pub consecutive_errors: u32,
    /// Hard-disabled after too many consecutive failures.
    pub disabled: bool,
    /// A worker is currently waiting on this task.
    pub active: bool,
    /// Seconds between consecutive fires, when the schedule repeats.
    pub expected_period_secs: Option<i64>,
}

impl TaskRunStatus {
    pub fn key(&self) -> TaskKey {
        TaskKey::new(&self.plugin_id, &self.name)
    }
}

/// What the supervisor needs to know about the plugins that own tasks.
pub trait TaskOwners: Send + Sync {
    /// Whether the owning plugin is currently enabled; inactive owners have
    /// their fires skipped.
    fn is_active(&self, plugin_id: &str) -> bool;

    /// Called once per failed task execution.
    fn record_task_error(&self, plugin_id: &str, error: &str);
}

/// Owners that are always active and ignore errors.
#[derive(Debug, Default, Clone, Copy)]
pub struct AlwaysActive;

impl TaskOwners for AlwaysActive {
    fn is_active(&self, _plugin_id: &str) -> bool {
        true
    }

    fn record_task_error(&self, _plugin_id: &str, _error: &str) {}
}
