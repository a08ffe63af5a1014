//! The plugin contract and the context handed to plugin code.

use std::sync::Arc;

use async_trait::async_trait;
use plughost_core::config::HostConfig;
use plughost_core::traits::{Store, Transport};
use plughost_core::types::{GroupEvent, GroupEventKind, IncomingMessage};
use serde::{Deserialize, Serialize};

use crate::manifest::PluginCategory;

/// A task a plugin wants fired on a cron schedule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduledTask {
    pub name: String,
    pub schedule: String,
}

impl ScheduledTask {
    pub fn new(name: &str, schedule: &str) -> Self {
        Self {
            name: name.to_string(),
            schedule: schedule.to_string(),
        }
    }
}

/// A unit of bot behaviour.
///
/// Every method may fail or panic; the host contains both and keeps going.
#[async_trait]
pub trait Plugin: Send + Sync {
    /// Invoked once per inbound message.
    async fn handle(&self, message: &IncomingMessage, ctx: &PluginContext) -> anyhow::Result<()>;

    /// Tasks to register with the supervisor.
    fn scheduled_tasks(&self) -> Vec<ScheduledTask> {
        Vec::new()
    }

    /// Run one of the tasks returned by [`Self::scheduled_tasks`].
    async fn run_task(&self, name: &str, _ctx: &PluginContext) -> anyhow::Result<()> {
        anyhow::bail!("no scheduled task named '{name}'")
    }

    /// Group event kinds this plugin wants delivered.
    fn group_events(&self) -> Vec<GroupEventKind> {
        Vec::new()
    }

    async fn on_group_event(&self, _event: &GroupEvent, _ctx: &PluginContext) -> anyhow::Result<()> {
        Ok(())
    }

    /// Runs once before the plugin is registered.
    async fn init(&self, _ctx: &PluginContext) -> anyhow::Result<()> {
        Ok(())
    }

    /// Runs once before the plugin is unregistered or reloaded.
    async fn cleanup(&self) -> anyhow::Result<()> {
        Ok(())
    }
}

/// One command as listed in the command directory.
#[derive(Debug, Clone, Serialize)]
pub struct CommandEntry {
    pub plugin_id: String,
    pub plugin_name: String,
    pub category: PluginCategory,
    pub command: String,
    pub aliases: Vec<String>,
    pub description: String,
    pub owner_only: bool,
    pub admin_only: bool,
}

/// Read-only view of the enabled plugins' commands.
pub trait CommandDirectory: Send + Sync {
    /// Commands of every enabled plugin, in load order.
    fn commands(&self) -> Vec<CommandEntry>;

    /// Id of the plugin answering to `token` (name or alias, any case).
    fn resolve(&self, token: &str) -> Option<String>;
}

/// Everything a plugin can reach while running.
#[derive(Clone)]
pub struct PluginContext {
    pub transport: Arc<dyn Transport>,
    pub store: Arc<dyn Store>,
    pub config: Arc<HostConfig>,
    pub directory: Arc<dyn CommandDirectory>,
}

impl PluginContext {
    pub fn new(
        transport: Arc<dyn Transport>,
        store: Arc<dyn Store>,
        config: Arc<HostConfig>,
        directory: Arc<dyn CommandDirectory>,
    ) -> Self {
        Self {
            transport,
            store,
            config,
            directory,
        }
    }

    /// Reply in the message's chat, quoting it.
    pub async fn reply(&self, message: &IncomingMessage, text: &str) -> anyhow::Result<()> {
        self.transport
            .send_text(&message.chat_id, text, Some(&message.id))
            .await?;
        Ok(())
    }

    /// The command token and arguments if the message uses the host prefix.
    pub fn command<'m>(&self, message: &'m IncomingMessage) -> Option<(String, Vec<&'m str>)> {
        message.command(&self.config.prefix)
    }

    pub fn is_owner(&self, sender_id: &str) -> bool {
        self.config.is_owner(sender_id)
    }
}

impl std::fmt::Debug for PluginContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginContext")
            .field("transport", &self.transport.name())
            .field("store", &self.store.name())
            .field("bot_name", &self.config.bot_name)
            .finish_non_exhaustive()
    }
}
