use async_trait::async_trait;
use plughost_core::types::IncomingMessage;
use plughost_plugins::{Plugin, PluginContext};

/// Replies `pong` with the delivery latency.
pub struct PingPlugin;

#[async_trait]
impl Plugin for PingPlugin {
    async fn handle(&self, message: &IncomingMessage, ctx: &PluginContext) -> anyhow::Result<()> {
        if !ctx.command(message).is_some_and(|(cmd, _)| cmd == "ping") {
            return Ok(());
        }
        let latency = (chrono::Utc::now() - message.timestamp()).num_milliseconds().max(0);
        ctx.reply(message, &format!("🏓 pong ({latency} ms)")).await
    }
}
