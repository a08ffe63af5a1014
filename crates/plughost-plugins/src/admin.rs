//! Operator controls over the running host.

use std::sync::Arc;

use plughost_core::error::Result;
use plughost_core::guard::Guarded;
use plughost_scheduler::{TaskKey, TaskRunStatus, TaskSupervisor};
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::health::{HealthMonitor, HealthReport};
use crate::loader::{LoadSummary, PluginLoader};
use crate::registry::{DispatchStats, PluginInfo, PluginRegistry};

/// A parsed admin command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdminCommand {
    Reload(Option<String>),
    Enable(String),
    Disable(String),
    List,
    Stats,
    Tasks,
    Trigger(TaskKey),
    Reset(TaskKey),
    Health,
    Shutdown,
}

impl AdminCommand {
    /// Parse e.g. `"reload"`, `"disable weather"`, `"trigger reminder/daily"`.
    pub fn parse(line: &str) -> std::result::Result<Self, String> {
        let mut parts = line.split_whitespace();
        let verb = parts.next().ok_or("empty admin command")?.to_lowercase();
        let arg = parts.next();
        if parts.next().is_some() {
            return Err(format!("too many arguments for '{verb}'"));
        }

        let need = |what: &str| arg.map(str::to_string).ok_or(format!("usage: {verb} <{what}>"));
        let task = |arg: String| arg.parse::<TaskKey>().map_err(|e| e.to_string());

        match verb.as_str() {
            "reload" => Ok(Self::Reload(arg.map(str::to_string))),
            "enable" => Ok(Self::Enable(need("plugin")?)),
            "disable" => Ok(Self::Disable(need("plugin")?)),
            "list" => Ok(Self::List),
            "stats" => Ok(Self::Stats),
            "tasks" => Ok(Self::Tasks),
            "trigger" => Ok(Self::Trigger(task(need("plugin/task")?)?)),
            "reset" => Ok(Self::Reset(task(need("plugin/task")?)?)),
            "health" => Ok(Self::Health),
            "shutdown" => Ok(Self::Shutdown),
            other => Err(format!("unknown admin command '{other}'")),
        }
    }
}

/// Registry-wide and per-plugin statistics.
#[derive(Debug, Clone, Serialize)]
pub struct AdminStats {
    pub summary: DispatchStats,
    pub plugins: Vec<PluginInfo>,
}

/// Result of [`AdminControl::execute`].
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", content = "data", rename_all = "snake_case")]
pub enum AdminResponse {
    Done(String),
    Reloaded(LoadSummary),
    Plugins(Vec<PluginInfo>),
    Stats(AdminStats),
    Tasks(Vec<TaskRunStatus>),
    Triggered { task: String, ok: bool, error: Option<String> },
    Health(Option<HealthReport>),
    ShuttingDown,
    Error(String),
}

impl AdminResponse {
    pub fn is_error(&self) -> bool {
        matches!(self, Self::Error(_))
    }
}

pub struct AdminControl {
    registry: Arc<PluginRegistry>,
    supervisor: TaskSupervisor,
    loader: Arc<PluginLoader>,
    monitor: Arc<HealthMonitor>,
    shutdown: CancellationToken,
}

impl AdminControl {
    pub fn new(
        registry: Arc<PluginRegistry>,
        supervisor: TaskSupervisor,
        loader: Arc<PluginLoader>,
        monitor: Arc<HealthMonitor>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            registry,
            supervisor,
            loader,
            monitor,
            shutdown,
        }
    }

    /// Enable a plugin. Its tasks keep their state.
    pub fn enable(&self, id: &str) -> Result<()> {
        if !self.registry.set_enabled(id, true)? {
            tracing::info!("✅ Plugin '{id}' enabled");
        }
        Ok(())
    }

    /// Disable a plugin. Its tasks stay registered but skip their fires.
    pub fn disable(&self, id: &str) -> Result<()> {
        if self.registry.set_enabled(id, false)? {
            tracing::info!("⏸️ Plugin '{id}' disabled");
        }
        Ok(())
    }

    pub async fn reload(&self) -> Result<LoadSummary> {
        self.loader.load_all(true).await
    }

    pub async fn reload_one(&self, id: &str) -> Result<usize> {
        self.loader.reload_one(id).await
    }

    pub fn list(&self) -> Vec<PluginInfo> {
        self.registry.list().iter().map(|r| r.info()).collect()
    }

    pub fn stats(&self) -> AdminStats {
        AdminStats {
            summary: self.registry.dispatch_stats(),
            plugins: self.list(),
        }
    }

    pub fn task_status(&self) -> Vec<TaskRunStatus> {
        self.supervisor.status()
    }

    pub async fn trigger_task(&self, key: &TaskKey) -> Result<Guarded> {
        self.supervisor.trigger(key).await
    }

    pub fn reset_task(&self, key: &TaskKey) -> Result<()> {
        self.supervisor.reset(key)
    }

    pub fn health(&self) -> Option<HealthReport> {
        self.monitor.last_report()
    }

    /// Stop every task and plugin, then signal the host to exit.
    pub async fn shutdown(&self) {
        tracing::info!("👋 Shutdown requested");
        self.loader.shutdown().await;
        self.shutdown.cancel();
    }

    pub async fn execute(&self, command: AdminCommand) -> AdminResponse {
        match self.run(command).await {
            Ok(response) => response,
            Err(e) => AdminResponse::Error(e.to_string()),
        }
    }

    async fn run(&self, command: AdminCommand) -> Result<AdminResponse> {
        Ok(match command {
            AdminCommand::Reload(None) => AdminResponse::Reloaded(self.reload().await?),
            AdminCommand::Reload(Some(id)) => {
                let tasks = self.reload_one(&id).await?;
                AdminResponse::Done(format!("reloaded '{id}' ({tasks} task(s))"))
            }
            AdminCommand::Enable(id) => {
                self.enable(&id)?;
                AdminResponse::Done(format!("enabled '{id}'"))
            }
            AdminCommand::Disable(id) => {
                self.disable(&id)?;
                AdminResponse::Done(format!("disabled '{id}'"))
            }
            AdminCommand::List => AdminResponse::Plugins(self.list()),
            AdminCommand::Stats => AdminResponse::Stats(self.stats()),
            AdminCommand::Tasks => AdminResponse::Tasks(self.task_status()),
            AdminCommand::Trigger(key) => {
                let outcome = self.trigger_task(&key).await?;
                AdminResponse::Triggered {
                    task: key.to_string(),
                    ok: outcome.is_ok(),
                    error: outcome.error_text().map(str::to_string),
                }
            }
            AdminCommand::Reset(key) => {
                self.reset_task(&key)?;
                AdminResponse::Done(format!("reset {key}"))
            }
            AdminCommand::Health => AdminResponse::Health(self.health()),
            AdminCommand::Shutdown => {
                self.shutdown().await;
                AdminResponse::ShuttingDown
            }
        })
    }
}
