//! Routes group membership events to the plugins that asked for them.

use std::collections::HashMap;
use std::sync::Arc;

use futures::future::join_all;
use parking_lot::RwLock;
use plughost_core::guard::run_guarded;
use plughost_core::types::{GroupEvent, GroupEventKind};

use crate::plugin::PluginContext;
use crate::registry::PluginRegistry;

pub struct GroupEventRouter {
    routes: RwLock<HashMap<GroupEventKind, Vec<String>>>,
    registry: Arc<PluginRegistry>,
    ctx: PluginContext,
}

impl GroupEventRouter {
    pub fn new(registry: Arc<PluginRegistry>, ctx: PluginContext) -> Self {
        Self {
            routes: RwLock::new(HashMap::new()),
            registry,
            ctx,
        }
    }

    pub fn register(&self, kind: GroupEventKind, plugin_id: &str) {
        let mut routes = self.routes.write();
        let ids = routes.entry(kind).or_default();
        if !ids.iter().any(|id| id == plugin_id) {
            ids.push(plugin_id.to_string());
        }
    }

    pub fn unregister_plugin(&self, plugin_id: &str) {
        let mut routes = self.routes.write();
        for ids in routes.values_mut() {
            ids.retain(|id| id != plugin_id);
        }
        routes.retain(|_, ids| !ids.is_empty());
    }

    pub fn clear(&self) {
        self.routes.write().clear();
    }

    /// Plugin ids registered for `kind`, in registration order.
    pub fn subscribers(&self, kind: GroupEventKind) -> Vec<String> {
        self.routes.read().get(&kind).cloned().unwrap_or_default()
    }

    /// Deliver `event` to every live, enabled subscriber. Returns how many
    /// handlers were invoked.
    pub async fn route(&self, event: &GroupEvent) -> usize {
        let targets: Vec<_> = self
            .subscribers(event.kind)
            .iter()
            .filter_map(|id| self.registry.get(id))
            .filter(|r| r.is_enabled())
            .collect();

        if targets.is_empty() {
            tracing::debug!("👥 No handlers for {} in {}", event.kind, event.group_id);
            return 0;
        }

        let outcomes = join_all(
            targets
                .iter()
                .map(|r| run_guarded(r.plugin.on_group_event(event, &self.ctx))),
        )
        .await;

        for (record, outcome) in targets.iter().zip(outcomes) {
            if let Some(err) = outcome.error_text() {
                tracing::warn!(
                    "❌ Group event {} failed in plugin '{}': {err}",
                    event.kind,
                    record.id
                );
            }
        }
        targets.len()
    }
}
