//! Records a heartbeat document on a schedule; `.heartbeat` shows the last one.

use async_trait::async_trait;
use plughost_core::traits::Document;
use plughost_core::types::IncomingMessage;
use plughost_plugins::{Plugin, PluginContext, PluginManifest, ScheduledTask};
use serde_json::json;

const COLLECTION: &str = "heartbeats";
const TASK: &str = "beat";

pub struct HeartbeatPlugin {
    schedule: String,
}

impl HeartbeatPlugin {
    /// The manifest's `[schedules] beat` takes precedence over this default.
    pub fn from_manifest(manifest: &PluginManifest) -> anyhow::Result<Self> {
        let schedule = manifest
            .setting::<String>("schedule")
            .unwrap_or_else(|| "*/5 * * * *".to_string());
        if schedule.trim().is_empty() {
            anyhow::bail!("heartbeat schedule must not be empty");
        }
        Ok(Self { schedule })
    }

    fn filter(ctx: &PluginContext) -> Document {
        let mut filter = Document::new();
        filter.insert("bot".into(), json!(ctx.config.bot_name));
        filter
    }
}

#[async_trait]
impl Plugin for HeartbeatPlugin {
    async fn handle(&self, message: &IncomingMessage, ctx: &PluginContext) -> anyhow::Result<()> {
        if !ctx.command(message).is_some_and(|(cmd, _)| cmd == "heartbeat") {
            return Ok(());
        }
        if !ctx.is_owner(&message.sender_id) {
            return ctx.reply(message, "⛔ Only the bot owner can use this command.").await;
        }
        let text = match ctx.store.find_one(COLLECTION, &Self::filter(ctx)).await? {
            Some(doc) => format!(
                "💓 {} beats, last at {}",
                doc.get("beats").and_then(|v| v.as_u64()).unwrap_or(0),
                doc.get("at").and_then(|v| v.as_str()).unwrap_or("?")
            ),
            None => "💓 No heartbeat recorded yet.".to_string(),
        };
        ctx.reply(message, &text).await
    }

    fn scheduled_tasks(&self) -> Vec<ScheduledTask> {
        vec![ScheduledTask::new(TASK, &self.schedule)]
    }

    async fn run_task(&self, name: &str, ctx: &PluginContext) -> anyhow::Result<()> {
        if name != TASK {
            anyhow::bail!("no scheduled task named '{name}'");
        }
        let mut update = Document::new();
        update.insert("$set".into(), json!({ "at": chrono::Utc::now().to_rfc3339() }));
        update.insert("$inc".into(), json!({ "beats": 1 }));
        ctx.store
            .update_one(COLLECTION, &Self::filter(ctx), &update, true)
            .await?;
        tracing::debug!("💓 Heartbeat recorded");
        Ok(())
    }
}
