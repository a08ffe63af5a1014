//! Plugin registry: the loaded plugins of the current generation.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use plughost_core::error::{PlugHostError, Result};
use plughost_core::types::GroupEventKind;
use plughost_scheduler::TaskOwners;
use serde::Serialize;

use crate::manifest::{CommandSpec, PluginCategory, PluginManifest};
use crate::plugin::{CommandDirectory, CommandEntry, Plugin};
use crate::stats::{PluginStats, StatsSnapshot};

/// A loaded plugin instance and its metadata.
pub struct PluginRecord {
    pub id: String,
    pub name: String,
    pub version: String,
    pub author: String,
    pub description: String,
    pub category: PluginCategory,
    pub commands: Vec<CommandSpec>,
    pub task_names: Vec<String>,
    pub group_events: Vec<GroupEventKind>,
    pub owner_only: bool,
    pub admin_only: bool,
    pub loaded_at: DateTime<Utc>,
    /// Manifest file the plugin was loaded from.
    pub source: PathBuf,
    pub plugin: Arc<dyn Plugin>,
    pub stats: PluginStats,
    enabled: AtomicBool,
}

impl PluginRecord {
    pub fn new(
        id: &str,
        manifest: &PluginManifest,
        plugin: Arc<dyn Plugin>,
        source: PathBuf,
        loaded_at: DateTime<Utc>,
    ) -> Self {
        let task_names = plugin.scheduled_tasks().into_iter().map(|t| t.name).collect();
        let group_events = plugin.group_events();
        Self {
            id: id.to_string(),
            name: manifest.display_name(id).to_string(),
            version: manifest.version.clone(),
            author: manifest.author.clone(),
            description: manifest.description.clone(),
            category: manifest.category(),
            commands: manifest.commands.clone(),
            task_names,
            group_events,
            owner_only: manifest.owner_only,
            admin_only: manifest.admin_only,
            loaded_at,
            source,
            plugin,
            stats: PluginStats::new(),
            enabled: AtomicBool::new(true),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    pub fn has_scheduled_tasks(&self) -> bool {
        !self.task_names.is_empty()
    }

    pub fn info(&self) -> PluginInfo {
        PluginInfo {
            id: self.id.clone(),
            name: self.name.clone(),
            version: self.version.clone(),
            author: self.author.clone(),
            description: self.description.clone(),
            category: self.category,
            commands: self.commands.iter().map(|c| c.name.clone()).collect(),
            enabled: self.is_enabled(),
            owner_only: self.owner_only,
            admin_only: self.admin_only,
            has_scheduled_tasks: self.has_scheduled_tasks(),
            loaded_at: self.loaded_at,
            stats: self.stats.snapshot(),
        }
    }
}

impl std::fmt::Debug for PluginRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginRecord")
            .field("id", &self.id)
            .field("version", &self.version)
            .field("enabled", &self.is_enabled())
            .finish_non_exhaustive()
    }
}

/// Serializable view of a plugin for listings and stats.
#[derive(Debug, Clone, Serialize)]
pub struct PluginInfo {
    pub id: String,
    pub name: String,
    pub version: String,
    pub author: String,
    pub description: String,
    pub category: PluginCategory,
    pub commands: Vec<String>,
    pub enabled: bool,
    pub owner_only: bool,
    pub admin_only: bool,
    pub has_scheduled_tasks: bool,
    pub loaded_at: DateTime<Utc>,
    pub stats: StatsSnapshot,
}

/// Registry-wide aggregate.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DispatchStats {
    pub total: usize,
    pub enabled: usize,
    pub disabled: usize,
    pub total_executions: u64,
    pub total_errors: u64,
}

/// What `register` does when the id is already taken.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DuplicateIdPolicy {
    Reject,
    /// The later record wins; the displaced one is returned.
    #[default]
    Replace,
}

#[derive(Default)]
struct Inner {
    records: HashMap<String, Arc<PluginRecord>>,
    /// Registration order (filesystem order during a load).
    order: Vec<String>,
    /// Lowercase command name or alias → plugin id.
    commands: HashMap<String, String>,
    generation: u64,
}

impl Inner {
    fn rebuild_command_index(&mut self) {
        self.commands.clear();
        for id in &self.order {
            let Some(record) = self.records.get(id) else { continue };
            for cmd in &record.commands {
                for token in std::iter::once(&cmd.name).chain(cmd.aliases.iter()) {
                    self.commands
                        .entry(token.to_lowercase())
                        .or_insert_with(|| id.clone());
                }
            }
        }
    }

    fn ordered(&self) -> Vec<Arc<PluginRecord>> {
        self.order
            .iter()
            .filter_map(|id| self.records.get(id).cloned())
            .collect()
    }
}

/// Registry of loaded plugins.
pub struct PluginRegistry {
    inner: RwLock<Inner>,
    policy: DuplicateIdPolicy,
}

impl PluginRegistry {
    pub fn new(policy: DuplicateIdPolicy) -> Self {
        Self {
            inner: RwLock::new(Inner::default()),
            policy,
        }
    }

    /// Register a record. Under [`DuplicateIdPolicy::Replace`] the displaced
    /// record is returned so the caller can clean it up.
    pub fn register(&self, record: PluginRecord) -> Result<Option<Arc<PluginRecord>>> {
        let id = record.id.clone();
        let mut inner = self.inner.write();
        if inner.records.contains_key(&id) && self.policy == DuplicateIdPolicy::Reject {
            return Err(PlugHostError::DuplicateId(id));
        }
        let displaced = inner.records.insert(id.clone(), Arc::new(record));
        if displaced.is_none() {
            inner.order.push(id.clone());
        } else {
            tracing::warn!("🔌 Plugin '{id}' registered twice, later record wins");
        }
        inner.rebuild_command_index();
        Ok(displaced)
    }

    pub fn unregister(&self, id: &str) -> Result<Arc<PluginRecord>> {
        let mut inner = self.inner.write();
        let record = inner
            .records
            .remove(id)
            .ok_or_else(|| PlugHostError::NotFound(format!("plugin '{id}'")))?;
        inner.order.retain(|o| o != id);
        inner.rebuild_command_index();
        Ok(record)
    }

    pub fn get(&self, id: &str) -> Option<Arc<PluginRecord>> {
        self.inner.read().records.get(id).cloned()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.inner.read().records.contains_key(id)
    }

    /// All records in registration order.
    pub fn list(&self) -> Vec<Arc<PluginRecord>> {
        self.inner.read().ordered()
    }

    pub fn list_enabled(&self) -> Vec<Arc<PluginRecord>> {
        let inner = self.inner.read();
        inner
            .order
            .iter()
            .filter_map(|id| inner.records.get(id))
            .filter(|r| r.is_enabled())
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.inner.read().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Set the enabled flag; returns the previous value.
    pub fn set_enabled(&self, id: &str, enabled: bool) -> Result<bool> {
        let inner = self.inner.write();
        let record = inner
            .records
            .get(id)
            .ok_or_else(|| PlugHostError::NotFound(format!("plugin '{id}'")))?;
        Ok(record.enabled.swap(enabled, Ordering::SeqCst))
    }

    /// The plugin answering to a command name or alias, case-insensitively.
    pub fn resolve_command(&self, token: &str) -> Option<Arc<PluginRecord>> {
        let inner = self.inner.read();
        let id = inner.commands.get(&token.to_lowercase())?;
        inner.records.get(id).cloned()
    }

    /// Remove every record, in registration order.
    pub fn drain(&self) -> Vec<Arc<PluginRecord>> {
        let mut inner = self.inner.write();
        let drained = inner.ordered();
        inner.records.clear();
        inner.order.clear();
        inner.commands.clear();
        drained
    }

    pub fn generation(&self) -> u64 {
        self.inner.read().generation
    }

    /// Start a new generation; returns its number.
    pub fn bump_generation(&self) -> u64 {
        let mut inner = self.inner.write();
        inner.generation += 1;
        inner.generation
    }

    pub fn dispatch_stats(&self) -> DispatchStats {
        let inner = self.inner.read();
        let mut stats = DispatchStats {
            total: inner.records.len(),
            ..Default::default()
        };
        for record in inner.records.values() {
            if record.is_enabled() {
                stats.enabled += 1;
            } else {
                stats.disabled += 1;
            }
            stats.total_executions += record.stats.executions();
            stats.total_errors += record.stats.errors();
        }
        stats
    }
}

impl Default for PluginRegistry {
    fn default() -> Self {
        Self::new(DuplicateIdPolicy::default())
    }
}

impl std::fmt::Debug for PluginRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.read();
        f.debug_struct("PluginRegistry")
            .field("plugins", &inner.order)
            .field("generation", &inner.generation)
            .finish()
    }
}

impl TaskOwners for PluginRegistry {
    fn is_active(&self, plugin_id: &str) -> bool {
        self.get(plugin_id).is_some_and(|r| r.is_enabled())
    }

    fn record_task_error(&self, plugin_id: &str, error: &str) {
        if let Some(record) = self.get(plugin_id) {
            record.stats.record_task_error(error);
        }
    }
}

impl CommandDirectory for PluginRegistry {
    fn commands(&self) -> Vec<CommandEntry> {
        self.list_enabled()
            .iter()
            .flat_map(|r| {
                r.commands.iter().map(move |c| CommandEntry {
                    plugin_id: r.id.clone(),
                    plugin_name: r.name.clone(),
                    category: r.category,
                    command: c.name.clone(),
                    aliases: c.aliases.clone(),
                    description: c.description.clone(),
                    owner_only: r.owner_only,
                    admin_only: r.admin_only,
                })
            })
            .collect()
    }

    fn resolve(&self, token: &str) -> Option<String> {
        self.resolve_command(token)
            .filter(|r| r.is_enabled())
            .map(|r| r.id.clone())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::plugin::PluginContext;
    use async_trait::async_trait;
    use plughost_core::types::IncomingMessage;

    pub(crate) struct Quiet;

    #[async_trait]
    impl Plugin for Quiet {
        async fn handle(&self, _m: &IncomingMessage, _c: &PluginContext) -> anyhow::Result<()> {
            Ok(())
        }
    }

    pub(crate) fn record(id: &str, manifest: &str) -> PluginRecord {
        let manifest = PluginManifest::from_toml(manifest).unwrap();
        PluginRecord::new(id, &manifest, Arc::new(Quiet), PathBuf::from(format!("{id}.toml")), Utc::now())
    }

    #[test]
    fn test_register_and_order() {
        let reg = PluginRegistry::default();
        reg.register(record("b", "")).unwrap();
        reg.register(record("a", "")).unwrap();
        let ids: Vec<_> = reg.list().iter().map(|r| r.id.clone()).collect();
        assert_eq!(ids, vec!["b", "a"]);
        assert_eq!(reg.len(), 2);
    }

    #[test]
    fn test_duplicate_policies() {
        let strict = PluginRegistry::new(DuplicateIdPolicy::Reject);
        strict.register(record("x", "")).unwrap();
        assert!(matches!(strict.register(record("x", "")), Err(PlugHostError::DuplicateId(_))));

        let lenient = PluginRegistry::new(DuplicateIdPolicy::Replace);
        lenient.register(record("x", r#"version = "1""#)).unwrap();
        let displaced = lenient.register(record("x", r#"version = "2""#)).unwrap();
        assert_eq!(displaced.unwrap().version, "1");
        assert_eq!(lenient.get("x").unwrap().version, "2");
        assert_eq!(lenient.len(), 1);
    }

    #[test]
    fn test_enable_disable_round_trip() {
        let reg = PluginRegistry::default();
        reg.register(record("p", "")).unwrap();
        reg.get("p").unwrap().stats.record_failure("x", false, Utc::now());

        assert!(reg.set_enabled("p", true).unwrap());
        assert!(reg.set_enabled("p", false).unwrap());
        assert!(!reg.set_enabled("p", true).unwrap());

        let rec = reg.get("p").unwrap();
        assert!(rec.is_enabled());
        assert_eq!(rec.stats.errors(), 1);
        assert!(matches!(reg.set_enabled("nope", true), Err(PlugHostError::NotFound(_))));
    }

    #[test]
    fn test_command_resolution_first_wins() {
        let reg = PluginRegistry::default();
        reg.register(record(
            "alpha",
            r#"
[[commands]]
name = "Menu"
aliases = ["help"]
"#,
        ))
        .unwrap();
        reg.register(record(
            "beta",
            r#"
[[commands]]
name = "help"
"#,
        ))
        .unwrap();

        assert_eq!(reg.resolve_command("HELP").unwrap().id, "alpha");
        assert_eq!(reg.resolve_command("menu").unwrap().id, "alpha");

        reg.unregister("alpha").unwrap();
        assert_eq!(reg.resolve_command("help").unwrap().id, "beta");
        assert!(reg.resolve_command("menu").is_none());
    }

    #[test]
    fn test_directory_hides_disabled() {
        let reg = PluginRegistry::default();
        reg.register(record("p", "[[commands]]\nname = \"ping\"\n")).unwrap();
        assert_eq!(reg.commands().len(), 1);
        assert_eq!(reg.resolve("PING").as_deref(), Some("p"));

        reg.set_enabled("p", false).unwrap();
        assert!(reg.commands().is_empty());
        assert!(reg.resolve("ping").is_none());
        assert!(!reg.is_active("p"));
    }

    #[test]
    fn test_drain_and_stats() {
        let reg = PluginRegistry::default();
        reg.register(record("a", "")).unwrap();
        reg.register(record("b", "")).unwrap();
        reg.set_enabled("b", false).unwrap();
        reg.get("a").unwrap().stats.record_success(std::time::Duration::from_millis(1), Utc::now());

        let stats = reg.dispatch_stats();
        assert_eq!(stats, DispatchStats { total: 2, enabled: 1, disabled: 1, total_executions: 1, total_errors: 0 });

        assert_eq!(reg.drain().len(), 2);
        assert!(reg.is_empty());
        assert_eq!(reg.bump_generation(), 1);
        assert_eq!(reg.generation(), 1);
    }

    #[test]
    fn test_task_error_recorded_on_stats() {
        let reg = PluginRegistry::default();
        reg.register(record("p", "")).unwrap();
        reg.record_task_error("p", "cron job failed");
        reg.record_task_error("ghost", "ignored");
        let snap = reg.get("p").unwrap().stats.snapshot();
        assert_eq!(snap.scheduled_task_errors, 1);
        assert_eq!(snap.last_error_text.as_deref(), Some("cron job failed"));
    }
}
