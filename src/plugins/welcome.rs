//! Greets members joining a group.
//!
//! Groups can opt out with `.welcome off`; the switch lives in the
//! `welcome_settings` collection.

use async_trait::async_trait;
use plughost_core::traits::Document;
use plughost_core::types::{GroupEvent, GroupEventKind, IncomingMessage};
use plughost_plugins::{Plugin, PluginContext, PluginManifest};
use serde_json::json;

const COLLECTION: &str = "welcome_settings";

pub struct WelcomePlugin {
    greeting: String,
}

impl WelcomePlugin {
    pub fn from_manifest(manifest: &PluginManifest) -> Self {
        Self {
            greeting: manifest
                .setting::<String>("greeting")
                .unwrap_or_else(|| "Welcome!".to_string()),
        }
    }

    fn filter(group_id: &str) -> Document {
        let mut filter = Document::new();
        filter.insert("group_id".into(), json!(group_id));
        filter
    }

    async fn enabled_for(&self, ctx: &PluginContext, group_id: &str) -> anyhow::Result<bool> {
        let settings = ctx.store.find_one(COLLECTION, &Self::filter(group_id)).await?;
        Ok(settings
            .and_then(|doc| doc.get("enabled").and_then(|v| v.as_bool()))
            .unwrap_or(true))
    }

    /// Bot owners and group admins may flip the switch.
    async fn may_configure(&self, ctx: &PluginContext, message: &IncomingMessage) -> anyhow::Result<bool> {
        if ctx.is_owner(&message.sender_id) {
            return Ok(true);
        }
        let metadata = ctx.transport.group_metadata(&message.chat_id).await?;
        Ok(metadata
            .participants
            .iter()
            .any(|p| p.admin && p.id == message.sender_id))
    }
}

#[async_trait]
impl Plugin for WelcomePlugin {
    async fn handle(&self, message: &IncomingMessage, ctx: &PluginContext) -> anyhow::Result<()> {
        let Some((command, args)) = ctx.command(message) else {
            return Ok(());
        };
        if command != "welcome" {
            return Ok(());
        }
        if !message.is_group {
            return ctx.reply(message, "This command only works in groups.").await;
        }

        let enabled = match args.first().map(|a| a.to_lowercase()).as_deref() {
            Some("on") => true,
            Some("off") => false,
            _ => {
                let state = if self.enabled_for(ctx, &message.chat_id).await? { "on" } else { "off" };
                return ctx
                    .reply(message, &format!("Welcome messages are {state}. Use {}welcome on|off.", ctx.config.prefix))
                    .await;
            }
        };
        if !self.may_configure(ctx, message).await? {
            return ctx.reply(message, "⛔ Only group admins can change welcome messages.").await;
        }

        let mut update = Document::new();
        update.insert("$set".into(), json!({ "enabled": enabled }));
        ctx.store
            .update_one(COLLECTION, &Self::filter(&message.chat_id), &update, true)
            .await?;
        let state = if enabled { "on" } else { "off" };
        ctx.reply(message, &format!("Welcome messages turned {state}.")).await
    }

    fn group_events(&self) -> Vec<GroupEventKind> {
        vec![GroupEventKind::ParticipantsAdd]
    }

    async fn on_group_event(&self, event: &GroupEvent, ctx: &PluginContext) -> anyhow::Result<()> {
        if event.participants.is_empty() || !self.enabled_for(ctx, &event.group_id).await? {
            return Ok(());
        }
        let subject = ctx.transport.group_metadata(&event.group_id).await?.subject;
        let names: Vec<String> = event
            .participants
            .iter()
            .map(|p| format!("@{}", p.split('@').next().unwrap_or(p)))
            .collect();
        let text = format!("{} {} 👋\nYou joined *{subject}*.", self.greeting, names.join(" "));
        ctx.transport.send_text(&event.group_id, &text, None).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugins::testing::context;
    use plughost_core::config::HostConfig;

    fn plugin() -> WelcomePlugin {
        WelcomePlugin::from_manifest(
            &PluginManifest::from_toml("[settings]\ngreeting = \"Halo\"").unwrap(),
        )
    }

    fn joined(ids: &[&str]) -> GroupEvent {
        GroupEvent {
            kind: GroupEventKind::ParticipantsAdd,
            group_id: "g1".into(),
            participants: ids.iter().map(|s| s.to_string()).collect(),
            actor: None,
        }
    }

    #[test]
    fn test_default_greeting() {
        let p = WelcomePlugin::from_manifest(&PluginManifest::from_toml("").unwrap());
        assert_eq!(p.greeting, "Welcome!");
    }

    #[tokio::test]
    async fn test_greets_new_members() {
        let (ctx, transport) = context(HostConfig::default(), Vec::new());
        plugin()
            .on_group_event(&joined(&["6281@s.whatsapp.net", "6282"]), &ctx)
            .await
            .unwrap();

        let sent = transport.sent_texts();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, "g1");
        assert!(sent[0].1.starts_with("Halo @6281 @6282"));
        assert!(sent[0].1.contains("*group g1*"));
    }

    #[tokio::test]
    async fn test_group_can_opt_out() {
        let (ctx, transport) = context(HostConfig::default(), Vec::new());
        let plugin = plugin();
        let mut off = IncomingMessage::text("1", "g1", "owner", ".welcome off");
        off.is_group = true;
        plugin.handle(&off, &ctx).await.unwrap();

        plugin.on_group_event(&joined(&["6281"]), &ctx).await.unwrap();
        let sent = transport.sent_texts();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].1, "Welcome messages turned off.");

        let private = IncomingMessage::text("2", "dm", "u", ".welcome on");
        plugin.handle(&private, &ctx).await.unwrap();
        assert!(transport.sent_texts()[1].1.contains("only works in groups"));
    }

    #[tokio::test]
    async fn test_members_cannot_change_setting() {
        let (ctx, transport) = context(HostConfig::default(), Vec::new());
        let plugin = plugin();
        let mut off = IncomingMessage::text("1", "g1", "member", ".welcome off");
        off.is_group = true;
        plugin.handle(&off, &ctx).await.unwrap();
        assert!(transport.sent_texts()[0].1.contains("Only group admins"));

        plugin.on_group_event(&joined(&["6281"]), &ctx).await.unwrap();
        assert!(transport.sent_texts()[1].1.starts_with("Halo @6281"));

        // Bot owners need not be group admins.
        let config = HostConfig {
            owners: vec!["member".into()],
            ..HostConfig::default()
        };
        let (ctx, transport) = context(config, Vec::new());
        plugin.handle(&off, &ctx).await.unwrap();
        assert_eq!(transport.sent_texts()[0].1, "Welcome messages turned off.");
    }
}
