//! The plugin host: owns every component and pumps transport events.

use std::sync::Arc;

use futures::StreamExt;
use plughost_core::clock::Clock;
use plughost_core::config::HostConfig;
use plughost_core::error::Result;
use plughost_core::traits::{Store, Transport};
use plughost_core::types::TransportEvent;
use plughost_scheduler::TaskSupervisor;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::admin::AdminControl;
use crate::catalog::PluginCatalog;
use crate::dispatch::Dispatcher;
use crate::group_events::GroupEventRouter;
use crate::health::HealthMonitor;
use crate::loader::{LoadSummary, PluginLoader};
use crate::plugin::PluginContext;
use crate::registry::{DuplicateIdPolicy, PluginRegistry};

pub struct PluginHost {
    pub registry: Arc<PluginRegistry>,
    pub supervisor: TaskSupervisor,
    pub loader: Arc<PluginLoader>,
    pub dispatcher: Arc<Dispatcher>,
    pub router: Arc<GroupEventRouter>,
    pub monitor: Arc<HealthMonitor>,
    pub admin: Arc<AdminControl>,
    config: Arc<HostConfig>,
    transport: Arc<dyn Transport>,
    ctx: PluginContext,
    root: CancellationToken,
}

impl PluginHost {
    /// Wire up a host. Nothing is loaded until [`Self::start`].
    pub fn new(
        config: HostConfig,
        catalog: PluginCatalog,
        transport: Arc<dyn Transport>,
        store: Arc<dyn Store>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        let tz = config.tz()?;
        let config = Arc::new(config);
        let root = CancellationToken::new();

        let registry = Arc::new(PluginRegistry::new(DuplicateIdPolicy::Replace));
        let ctx = PluginContext::new(transport.clone(), store, config.clone(), registry.clone());
        let supervisor = TaskSupervisor::new(clock.clone(), tz, registry.clone(), root.clone());
        let router = Arc::new(GroupEventRouter::new(registry.clone(), ctx.clone()));
        let loader = Arc::new(PluginLoader::new(
            config.plugins.dir_path(),
            config.plugins.disabled_path(),
            catalog,
            registry.clone(),
            supervisor.clone(),
            router.clone(),
            ctx.clone(),
            clock.clone(),
        ));
        let dispatcher = Arc::new(Dispatcher::new(registry.clone(), ctx.clone(), clock.clone()));
        let monitor = Arc::new(HealthMonitor::new(
            registry.clone(),
            supervisor.clone(),
            loader.clone(),
            clock,
            config.health.clone(),
        ));
        let admin = Arc::new(AdminControl::new(
            registry.clone(),
            supervisor.clone(),
            loader.clone(),
            monitor.clone(),
            root.clone(),
        ));

        Ok(Self {
            registry,
            supervisor,
            loader,
            dispatcher,
            router,
            monitor,
            admin,
            config,
            transport,
            ctx,
            root,
        })
    }

    pub fn config(&self) -> &HostConfig {
        &self.config
    }

    pub fn context(&self) -> &PluginContext {
        &self.ctx
    }

    /// Cancelled when the host shuts down.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.root.clone()
    }

    /// Load all plugins and start the health sweeps.
    pub async fn start(&self) -> Result<LoadSummary> {
        tracing::info!(
            "🚀 {} starting (transport: {}, plugins: {})",
            self.config.bot_name,
            self.transport.name(),
            self.loader.plugins_dir().display()
        );
        let summary = self.loader.load_all(false).await?;
        self.monitor.spawn(self.root.clone());
        Ok(summary)
    }

    /// Deliver one event and wait for every handler to finish.
    pub async fn handle_event(&self, event: TransportEvent) {
        match event {
            TransportEvent::Message(message) => {
                self.dispatcher.dispatch(&message).await;
            }
            TransportEvent::Group(event) => {
                self.router.route(&event).await;
            }
        }
    }

    /// Pump transport events until shutdown. Each event is handled on its
    /// own task so a slow plugin never stalls the stream.
    pub async fn run(&self) -> Result<()> {
        let mut events = self.transport.listen().await?;
        tracing::info!("👂 Listening on {}", self.transport.name());
        loop {
            tokio::select! {
                _ = self.root.cancelled() => break,
                event = events.next() => match event {
                    Some(event) => {
                        self.spawn_event(event);
                    }
                    None => {
                        tracing::info!("📭 Transport stream ended");
                        break;
                    }
                },
            }
        }
        Ok(())
    }

    fn spawn_event(&self, event: TransportEvent) -> JoinHandle<()> {
        match event {
            TransportEvent::Message(message) => {
                let dispatcher = self.dispatcher.clone();
                tokio::spawn(async move {
                    dispatcher.dispatch(&message).await;
                })
            }
            TransportEvent::Group(event) => {
                let router = self.router.clone();
                tokio::spawn(async move {
                    router.route(&event).await;
                })
            }
        }
    }

    /// Stop tasks and sweeps and clean up every plugin.
    pub async fn shutdown(&self) {
        if !self.root.is_cancelled() {
            self.admin.shutdown().await;
        }
    }
}

impl std::fmt::Debug for PluginHost {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginHost")
            .field("bot_name", &self.config.bot_name)
            .field("registry", &self.registry)
            .field("supervisor", &self.supervisor)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugin::{Plugin, ScheduledTask};
    use crate::testing::{TestHost, write_manifest};
    use async_trait::async_trait;
    use chrono::Duration;
    use plughost_core::types::{GroupEvent, GroupEventKind, IncomingMessage};
    use plughost_scheduler::TaskKey;

    struct Nothing;

    #[async_trait]
    impl Plugin for Nothing {
        async fn handle(&self, _m: &IncomingMessage, _c: &PluginContext) -> anyhow::Result<()> {
            Ok(())
        }
    }

    struct Counter;

    #[async_trait]
    impl Plugin for Counter {
        async fn handle(&self, m: &IncomingMessage, c: &PluginContext) -> anyhow::Result<()> {
            if c.command(m).is_some_and(|(cmd, _)| cmd == "count") {
                c.reply(m, "counted").await?;
            }
            Ok(())
        }

        fn scheduled_tasks(&self) -> Vec<ScheduledTask> {
            vec![ScheduledTask::new("tick", "* * * * *")]
        }

        fn group_events(&self) -> Vec<GroupEventKind> {
            vec![GroupEventKind::ParticipantsRemove]
        }

        async fn on_group_event(&self, e: &GroupEvent, c: &PluginContext) -> anyhow::Result<()> {
            c.transport.send_text(&e.group_id, "bye", None).await?;
            Ok(())
        }
    }

    /// Its every-minute task always fails.
    struct Broken {
        runs: Arc<std::sync::atomic::AtomicU32>,
    }

    #[async_trait]
    impl Plugin for Broken {
        async fn handle(&self, _m: &IncomingMessage, _c: &PluginContext) -> anyhow::Result<()> {
            Ok(())
        }

        fn scheduled_tasks(&self) -> Vec<ScheduledTask> {
            vec![ScheduledTask::new("sync", "*/1 * * * *")]
        }

        async fn run_task(&self, _name: &str, _c: &PluginContext) -> anyhow::Result<()> {
            self.runs.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            anyhow::bail!("upstream down")
        }
    }

    async fn wait_for(mut cond: impl FnMut() -> bool) {
        tokio::time::timeout(std::time::Duration::from_secs(5), async {
            while !cond() {
                tokio::time::sleep(std::time::Duration::from_millis(2)).await;
            }
        })
        .await
        .expect("condition not reached in time");
    }

    #[tokio::test]
    async fn test_failing_task_hard_disables_and_stops_counting() {
        use std::sync::atomic::{AtomicU32, Ordering};

        let runs = Arc::new(AtomicU32::new(0));
        let catalog = {
            let runs = runs.clone();
            PluginCatalog::new().with("broken", move |_| Ok(Arc::new(Broken { runs: runs.clone() })))
        };
        let host = TestHost::new(catalog);
        write_manifest(host.dir(), "broken.toml", "entry = \"broken\"");
        host.loader.load_all(false).await.unwrap();
        let record = host.registry.get("broken").unwrap();

        for fire in 1..=6u32 {
            host.clock.advance(Duration::minutes(1));
            let supervisor = host.supervisor.clone();
            wait_for(move || supervisor.status()[0].consecutive_errors == fire).await;
        }
        let status = &host.supervisor.status()[0];
        assert!(status.disabled);
        assert_eq!(record.stats.snapshot().scheduled_task_errors, 6);

        for _ in 0..10 {
            host.clock.advance(Duration::minutes(1));
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }
        assert_eq!(runs.load(Ordering::SeqCst), 6);
        assert_eq!(host.supervisor.status()[0].consecutive_errors, 6);
        let snap = host.registry.get("broken").unwrap().stats.snapshot();
        assert_eq!(snap.scheduled_task_errors, 6);
        // Task failures stay out of the handler counters.
        assert_eq!(snap.errors, 0);
        assert!(record.is_enabled());
        host.shutdown().await;
    }

    #[tokio::test]
    async fn test_plugin_without_tasks_creates_no_runs() {
        let host = TestHost::new(PluginCatalog::new().with("nothing", |_| Ok(Arc::new(Nothing))));
        write_manifest(host.dir(), "n.toml", "entry = \"nothing\"");
        let summary = host.start().await.unwrap();
        assert_eq!(summary.loaded, 1);
        assert_eq!(summary.tasks, 0);
        assert!(host.supervisor.is_empty());
        host.shutdown().await;
    }

    #[tokio::test]
    async fn test_events_reach_plugins() {
        let host = TestHost::new(PluginCatalog::new().with("counter", |_| Ok(Arc::new(Counter))));
        write_manifest(host.dir(), "counter.toml", "entry = \"counter\"");
        host.start().await.unwrap();

        host.handle_event(TransportEvent::Message(IncomingMessage::text("1", "c", "u", ".count")))
            .await;
        host.handle_event(TransportEvent::Group(GroupEvent {
            kind: GroupEventKind::ParticipantsRemove,
            group_id: "g".into(),
            participants: vec!["u".into()],
            actor: None,
        }))
        .await;
        assert_eq!(
            host.transport.sent_texts(),
            vec![("c".to_string(), "counted".to_string()), ("g".to_string(), "bye".to_string())]
        );
        assert!(host.supervisor.contains(&TaskKey::new("counter", "tick")));
    }

    #[tokio::test]
    async fn test_shutdown_stops_workers() {
        let host = TestHost::new(PluginCatalog::new().with("counter", |_| Ok(Arc::new(Counter))));
        write_manifest(host.dir(), "counter.toml", "entry = \"counter\"");
        host.start().await.unwrap();
        host.shutdown().await;

        assert!(host.shutdown_token().is_cancelled());
        assert!(host.registry.is_empty());
        host.clock.advance(Duration::minutes(5));
        // run() returns at once on a cancelled host.
        host.run().await.unwrap();
    }
}
