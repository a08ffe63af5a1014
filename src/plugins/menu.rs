//! `.menu [category]` lists the commands of every enabled plugin.

use std::collections::BTreeMap;

use async_trait::async_trait;
use plughost_core::types::IncomingMessage;
use plughost_plugins::{CommandEntry, Plugin, PluginContext};

pub struct MenuPlugin;

impl MenuPlugin {
    fn render(ctx: &PluginContext, sender_id: &str, category: Option<&str>) -> String {
        let owner = ctx.is_owner(sender_id);
        let mut sections: BTreeMap<&str, Vec<&CommandEntry>> = BTreeMap::new();
        let commands = ctx.directory.commands();
        for entry in &commands {
            if entry.owner_only && !owner {
                continue;
            }
            if category.is_some_and(|c| !c.eq_ignore_ascii_case(entry.category.as_str())) {
                continue;
            }
            sections.entry(entry.category.as_str()).or_default().push(entry);
        }

        if sections.is_empty() {
            return match category {
                Some(c) => format!("No commands in category '{c}'."),
                None => "No commands available.".to_string(),
            };
        }

        let prefix = &ctx.config.prefix;
        let mut out = format!("📋 *{}*\n", ctx.config.bot_name);
        for (section, entries) in sections {
            out.push_str(&format!("\n*{}*\n", section.to_uppercase()));
            for e in entries {
                out.push_str(&format!("• {prefix}{}", e.command));
                if !e.description.is_empty() {
                    out.push_str(&format!(" — {}", e.description));
                }
                out.push('\n');
            }
        }
        out.trim_end().to_string()
    }
}

#[async_trait]
impl Plugin for MenuPlugin {
    async fn handle(&self, message: &IncomingMessage, ctx: &PluginContext) -> anyhow::Result<()> {
        let Some((command, args)) = ctx.command(message) else {
            return Ok(());
        };
        if command != "menu" && command != "help" {
            return Ok(());
        }
        let text = Self::render(ctx, &message.sender_id, args.first().copied());
        ctx.reply(message, &text).await
    }
}
