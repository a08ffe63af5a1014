//! Plugin loader: discovers manifests and (re)builds the registry.
//!
//! Every load reads the manifest from disk and asks the catalog for a new
//! instance, so a forced reload always reflects the current directory.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use plughost_core::clock::Clock;
use plughost_core::error::{PlugHostError, Result};
use plughost_core::guard::run_guarded;
use plughost_scheduler::{TaskDescriptor, TaskKey, TaskSupervisor};
use serde::Serialize;
use tokio::sync::Mutex;

use crate::catalog::PluginCatalog;
use crate::group_events::GroupEventRouter;
use crate::manifest::PluginManifest;
use crate::plugin::{Plugin, PluginContext};
use crate::registry::{PluginRecord, PluginRegistry};

/// Result of one `load_all` pass.
#[derive(Debug, Clone, Default, Serialize)]
pub struct LoadSummary {
    pub loaded: usize,
    pub skipped: usize,
    /// (file name, error) for every manifest that failed to load.
    pub failed: Vec<(String, String)>,
    /// Scheduled tasks registered during this pass.
    pub tasks: usize,
    pub generation: u64,
}

pub struct PluginLoader {
    plugins_dir: PathBuf,
    disabled_dir: PathBuf,
    catalog: PluginCatalog,
    registry: Arc<PluginRegistry>,
    supervisor: TaskSupervisor,
    router: Arc<GroupEventRouter>,
    ctx: PluginContext,
    clock: Arc<dyn Clock>,
    /// Serializes loads; holds the summary of the last forced reload.
    lock: Mutex<Option<LoadSummary>>,
    /// Completed forced reloads.
    reload_epoch: AtomicU64,
}

impl PluginLoader {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        plugins_dir: PathBuf,
        disabled_dir: PathBuf,
        catalog: PluginCatalog,
        registry: Arc<PluginRegistry>,
        supervisor: TaskSupervisor,
        router: Arc<GroupEventRouter>,
        ctx: PluginContext,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            plugins_dir,
            disabled_dir,
            catalog,
            registry,
            supervisor,
            router,
            ctx,
            clock,
            lock: Mutex::new(None),
            reload_epoch: AtomicU64::new(0),
        }
    }

    pub fn plugins_dir(&self) -> &Path {
        &self.plugins_dir
    }

    /// Discover and load every manifest.
    ///
    /// With `force_reload`, everything currently loaded is torn down first.
    /// A forced reload that finds another one completed while it waited for
    /// the lock returns that reload's summary instead of running again.
    pub async fn load_all(&self, force_reload: bool) -> Result<LoadSummary> {
        let requested_epoch = self.reload_epoch.load(Ordering::SeqCst);
        let mut last_forced = self.lock.lock().await;

        if force_reload {
            if self.reload_epoch.load(Ordering::SeqCst) != requested_epoch
                && let Some(summary) = last_forced.as_ref()
            {
                tracing::info!("🔄 Reload already completed while waiting, reusing its result");
                return Ok(summary.clone());
            }
            self.teardown().await;
            let generation = self.registry.bump_generation();
            tracing::info!("🔄 Reloading all plugins (generation {generation})");
        }

        let summary = self.discover(force_reload).await?;
        tracing::info!(
            "🔌 Plugins: {} loaded, {} skipped, {} failed, {} task(s) scheduled",
            summary.loaded,
            summary.skipped,
            summary.failed.len(),
            summary.tasks
        );

        if force_reload {
            *last_forced = Some(summary.clone());
            self.reload_epoch.fetch_add(1, Ordering::SeqCst);
        }
        Ok(summary)
    }

    /// Tear down one plugin and load its manifest again.
    pub async fn reload_one(&self, id: &str) -> Result<usize> {
        let _guard = self.lock.lock().await;
        let record = self
            .registry
            .get(id)
            .ok_or_else(|| PlugHostError::NotFound(format!("plugin '{id}'")))?;
        self.remove(id).await?;
        tracing::info!("🔄 Reloading plugin '{id}'");
        self.load_one(&record.source).await
    }

    /// Tear down one plugin without loading it again.
    pub async fn unload(&self, id: &str) -> Result<()> {
        let _guard = self.lock.lock().await;
        self.remove(id).await?;
        tracing::info!("🔌 Unloaded plugin '{id}'");
        Ok(())
    }

    /// Cancel every task and clean up every plugin.
    pub async fn shutdown(&self) {
        let _guard = self.lock.lock().await;
        self.teardown().await;
    }

    async fn remove(&self, id: &str) -> Result<()> {
        if !self.registry.contains(id) {
            return Err(PlugHostError::NotFound(format!("plugin '{id}'")));
        }
        self.supervisor.cancel_plugin(id);
        self.router.unregister_plugin(id);
        let record = self.registry.unregister(id)?;
        cleanup(&record).await;
        Ok(())
    }

    async fn teardown(&self) {
        self.supervisor.cancel_all();
        self.router.clear();
        for record in self.registry.drain() {
            cleanup(&record).await;
        }
    }

    async fn discover(&self, force_reload: bool) -> Result<LoadSummary> {
        std::fs::create_dir_all(&self.plugins_dir)?;
        std::fs::create_dir_all(&self.disabled_dir)?;

        let mut summary = LoadSummary::default();
        for path in manifest_files(&self.plugins_dir)? {
            let id = plugin_id(&path);
            if !force_reload && self.registry.contains(&id) {
                summary.skipped += 1;
                continue;
            }
            match self.load_one(&path).await {
                Ok(tasks) => {
                    summary.loaded += 1;
                    summary.tasks += tasks;
                }
                Err(e) => {
                    let file = path
                        .file_name()
                        .map(|f| f.to_string_lossy().into_owned())
                        .unwrap_or_else(|| path.display().to_string());
                    tracing::warn!("⚠️ Skipping plugin {file}: {e}");
                    summary.failed.push((file, e.to_string()));
                }
            }
        }
        summary.generation = self.registry.generation();
        Ok(summary)
    }

    /// Load one manifest; returns the number of tasks scheduled.
    async fn load_one(&self, path: &Path) -> Result<usize> {
        let id = plugin_id(path);
        let manifest = PluginManifest::load(path)?;
        let entry = manifest.entry_or(&id).to_string();
        let plugin = self.catalog.instantiate(&entry, &manifest)?;

        if let Some(reason) = run_guarded(plugin.init(&self.ctx)).await.error_text() {
            return Err(PlugHostError::Init {
                plugin: id,
                reason: reason.to_string(),
            });
        }

        let record = PluginRecord::new(&id, &manifest, plugin.clone(), path.to_path_buf(), self.clock.now());
        let version = record.version.clone();
        if let Some(displaced) = self.registry.register(record)? {
            self.supervisor.cancel_plugin(&id);
            self.router.unregister_plugin(&id);
            cleanup(&displaced).await;
        }

        let tasks = self.schedule_tasks(&id, &manifest, &plugin);
        for kind in plugin.group_events() {
            self.router.register(kind, &id);
        }

        tracing::info!("🔌 Loaded plugin '{id}' v{version} (entry: {entry}, {tasks} task(s))");
        Ok(tasks)
    }

    fn schedule_tasks(&self, id: &str, manifest: &PluginManifest, plugin: &Arc<dyn Plugin>) -> usize {
        let declared = plugin.scheduled_tasks();
        for name in manifest.schedules.keys() {
            if !declared.iter().any(|t| &t.name == name) {
                tracing::warn!("⚠️ Plugin '{id}' overrides unknown task '{name}'");
            }
        }

        let mut registered = 0;
        for task in declared {
            let expression = manifest
                .schedules
                .get(&task.name)
                .cloned()
                .unwrap_or(task.schedule);
            let descriptor = {
                let plugin = plugin.clone();
                let ctx = self.ctx.clone();
                let name = task.name.clone();
                TaskDescriptor::new(TaskKey::new(id, &task.name), &expression, move || {
                    let plugin = plugin.clone();
                    let ctx = ctx.clone();
                    let name = name.clone();
                    async move { plugin.run_task(&name, &ctx).await }
                })
            };
            match self.supervisor.register(descriptor) {
                Ok(()) => registered += 1,
                Err(e) => tracing::warn!("⏰ Task '{}' of plugin '{id}' not scheduled: {e}", task.name),
            }
        }
        registered
    }
}

impl std::fmt::Debug for PluginLoader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginLoader")
            .field("plugins_dir", &self.plugins_dir)
            .field("disabled_dir", &self.disabled_dir)
            .field("catalog", &self.catalog)
            .finish_non_exhaustive()
    }
}

/// Run a plugin's cleanup hook, logging failures.
async fn cleanup(record: &PluginRecord) {
    if let Some(err) = run_guarded(record.plugin.cleanup()).await.error_text() {
        tracing::warn!("⚠️ Cleanup of plugin '{}' failed: {err}", record.id);
    }
}

/// Plugin id of a manifest path: its file stem.
fn plugin_id(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// Visible `.toml` files directly inside `dir`, sorted by name.
fn manifest_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        let name = entry.file_name();
        let name = name.to_string_lossy();
        if name.starts_with('.') || !entry.file_type()?.is_file() {
            continue;
        }
        if path.extension().and_then(|e| e.to_str()) == Some("toml") {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugin::ScheduledTask;
    use crate::testing::{TestHost, write_manifest};
    use async_trait::async_trait;
    use plughost_core::types::IncomingMessage;
    use std::sync::atomic::AtomicUsize;

    struct Basic;

    #[async_trait]
    impl Plugin for Basic {
        async fn handle(&self, _m: &IncomingMessage, _c: &PluginContext) -> anyhow::Result<()> {
            Ok(())
        }
    }

    struct Ticker {
        schedule: String,
    }

    #[async_trait]
    impl Plugin for Ticker {
        async fn handle(&self, _m: &IncomingMessage, _c: &PluginContext) -> anyhow::Result<()> {
            Ok(())
        }

        fn scheduled_tasks(&self) -> Vec<ScheduledTask> {
            vec![ScheduledTask::new("tick", &self.schedule)]
        }
    }

    struct BadInit;

    #[async_trait]
    impl Plugin for BadInit {
        async fn handle(&self, _m: &IncomingMessage, _c: &PluginContext) -> anyhow::Result<()> {
            Ok(())
        }

        async fn init(&self, _ctx: &PluginContext) -> anyhow::Result<()> {
            anyhow::bail!("no api key")
        }
    }

    struct MessyCleanup;

    #[async_trait]
    impl Plugin for MessyCleanup {
        async fn handle(&self, _m: &IncomingMessage, _c: &PluginContext) -> anyhow::Result<()> {
            Ok(())
        }

        async fn cleanup(&self) -> anyhow::Result<()> {
            panic!("cleanup exploded")
        }
    }

    struct SlowInit {
        inits: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Plugin for SlowInit {
        async fn handle(&self, _m: &IncomingMessage, _c: &PluginContext) -> anyhow::Result<()> {
            Ok(())
        }

        async fn init(&self, _ctx: &PluginContext) -> anyhow::Result<()> {
            self.inits.fetch_add(1, Ordering::SeqCst);
            tokio::task::yield_now().await;
            Ok(())
        }
    }

    fn catalog() -> PluginCatalog {
        PluginCatalog::new()
            .with("basic", |_| Ok(Arc::new(Basic)))
            .with("ticker", |m| {
                let schedule = m.setting::<String>("schedule").unwrap_or_else(|| "* * * * *".into());
                Ok(Arc::new(Ticker { schedule }))
            })
            .with("bad-init", |_| Ok(Arc::new(BadInit)))
            .with("messy", |_| Ok(Arc::new(MessyCleanup)))
    }

    #[tokio::test]
    async fn test_discovery_filters_and_orders() {
        let host = TestHost::new(catalog());
        write_manifest(host.dir(), "b.toml", "entry = \"basic\"");
        write_manifest(host.dir(), "a.toml", "entry = \"basic\"");
        write_manifest(host.dir(), ".hidden.toml", "entry = \"basic\"");
        write_manifest(host.dir(), "notes.txt", "entry = \"basic\"");
        write_manifest(host.dir(), "disabled/c.toml", "entry = \"basic\"");
        write_manifest(host.dir(), "ghost.toml", "entry = \"nope\"");
        write_manifest(host.dir(), "broken.toml", "entry = [");

        let summary = host.loader.load_all(false).await.unwrap();
        assert_eq!(summary.loaded, 2);
        assert_eq!(summary.failed.len(), 2);
        assert_eq!(summary.failed[0].0, "broken.toml");
        assert_eq!(summary.failed[1].0, "ghost.toml");

        let ids: Vec<_> = host.registry.list().iter().map(|r| r.id.clone()).collect();
        assert_eq!(ids, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_init_failure_not_registered() {
        let host = TestHost::new(catalog());
        write_manifest(host.dir(), "needy.toml", "entry = \"bad-init\"");
        let summary = host.loader.load_all(false).await.unwrap();
        assert_eq!(summary.loaded, 0);
        assert!(summary.failed[0].1.contains("no api key"));
        assert!(host.registry.is_empty());
    }

    #[tokio::test]
    async fn test_non_forced_load_keeps_records() {
        let host = TestHost::new(catalog());
        write_manifest(host.dir(), "a.toml", "entry = \"basic\"");
        host.loader.load_all(false).await.unwrap();
        let before = host.registry.get("a").unwrap();

        write_manifest(host.dir(), "b.toml", "entry = \"basic\"");
        let summary = host.loader.load_all(false).await.unwrap();
        assert_eq!(summary.loaded, 1);
        assert_eq!(summary.skipped, 1);
        assert!(Arc::ptr_eq(&before, &host.registry.get("a").unwrap()));
    }

    #[tokio::test]
    async fn test_forced_reload_reflects_filesystem() {
        let host = TestHost::new(catalog());
        write_manifest(host.dir(), "a.toml", "entry = \"basic\"");
        write_manifest(host.dir(), "t.toml", "entry = \"ticker\"");
        host.loader.load_all(false).await.unwrap();
        host.registry.get("a").unwrap().stats.record_failure("x", false, chrono::Utc::now());
        assert_eq!(host.supervisor.len(), 1);

        std::fs::rename(host.dir().join("a.toml"), host.dir().join("disabled/a.toml")).unwrap();
        write_manifest(host.dir(), "n.toml", "entry = \"basic\"");
        let summary = host.loader.load_all(true).await.unwrap();

        assert_eq!(summary.generation, 1);
        assert!(!host.registry.contains("a"));
        assert!(host.registry.contains("n"));
        assert_eq!(host.registry.get("t").unwrap().stats.executions(), 0);
        assert_eq!(host.supervisor.len(), 1);
    }

    #[tokio::test]
    async fn test_cleanup_panic_does_not_block_reload() {
        let host = TestHost::new(catalog());
        write_manifest(host.dir(), "m.toml", "entry = \"messy\"");
        host.loader.load_all(false).await.unwrap();
        let summary = host.loader.load_all(true).await.unwrap();
        assert_eq!(summary.loaded, 1);
        assert!(host.registry.contains("m"));
    }

    #[tokio::test]
    async fn test_tasks_and_overrides() {
        let host = TestHost::new(catalog());
        write_manifest(host.dir(), "plain.toml", "entry = \"basic\"");
        write_manifest(
            host.dir(),
            "tick.toml",
            "entry = \"ticker\"\n[schedules]\ntick = \"0 8 * * *\"\n",
        );
        write_manifest(
            host.dir(),
            "badcron.toml",
            "entry = \"ticker\"\n[settings]\nschedule = \"*/0 * * * *\"\n",
        );

        let summary = host.loader.load_all(false).await.unwrap();
        assert_eq!(summary.loaded, 3);
        assert_eq!(summary.tasks, 1);
        // The plugin with the invalid cron stays loaded.
        assert!(host.registry.contains("badcron"));

        let status = host.supervisor.status();
        assert_eq!(status.len(), 1);
        assert_eq!(status[0].plugin_id, "tick");
        assert_eq!(status[0].expression, "0 8 * * *");
        assert!(status.iter().all(|s| s.plugin_id != "plain"));
    }

    #[tokio::test]
    async fn test_reload_one_and_unload() {
        let host = TestHost::new(catalog());
        write_manifest(host.dir(), "t.toml", "entry = \"ticker\"");
        host.loader.load_all(false).await.unwrap();
        let before = host.registry.get("t").unwrap();

        assert_eq!(host.loader.reload_one("t").await.unwrap(), 1);
        assert!(!Arc::ptr_eq(&before, &host.registry.get("t").unwrap()));
        assert_eq!(host.supervisor.len(), 1);

        host.loader.unload("t").await.unwrap();
        assert!(host.registry.is_empty());
        assert!(host.supervisor.is_empty());
        assert!(matches!(host.loader.unload("t").await, Err(PlugHostError::NotFound(_))));
        assert!(matches!(host.loader.reload_one("t").await, Err(PlugHostError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_concurrent_forced_reloads_coalesce() {
        let inits = Arc::new(AtomicUsize::new(0));
        let counter = inits.clone();
        let host = TestHost::new(catalog().with("slow", move |_| {
            Ok(Arc::new(SlowInit { inits: counter.clone() }))
        }));
        write_manifest(host.dir(), "s.toml", "entry = \"slow\"");

        let (a, b) = tokio::join!(host.loader.load_all(true), host.loader.load_all(true));
        let (a, b) = (a.unwrap(), b.unwrap());
        assert_eq!(a.generation, b.generation);
        assert_eq!(inits.load(Ordering::SeqCst), 1);

        // A later reload runs again.
        let c = host.loader.load_all(true).await.unwrap();
        assert_eq!(c.generation, a.generation + 1);
        assert_eq!(inits.load(Ordering::SeqCst), 2);
    }
}
