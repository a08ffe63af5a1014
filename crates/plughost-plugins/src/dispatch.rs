//! Message dispatcher: fans one inbound message out to every enabled plugin.

use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::join_all;
use plughost_core::clock::Clock;
use plughost_core::error::PlugHostError;
use plughost_core::guard::{Guarded, run_guarded};
use plughost_core::types::IncomingMessage;
use serde::Serialize;

use crate::plugin::PluginContext;
use crate::registry::{PluginRecord, PluginRegistry};

/// Handlers slower than this are logged.
pub const SLOW_HANDLER_THRESHOLD: Duration = Duration::from_millis(1000);

/// A plugin is auto-disabled once its error count exceeds this.
pub const MAX_HANDLER_ERRORS: u64 = 10;

/// Summary of one dispatch.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DispatchOutcome {
    pub delivered: usize,
    pub failed: usize,
    pub slow: usize,
    pub auto_disabled: Vec<String>,
}

enum Invocation {
    Ok { slow: bool },
    Failed { auto_disabled: bool },
}

pub struct Dispatcher {
    registry: Arc<PluginRegistry>,
    ctx: PluginContext,
    clock: Arc<dyn Clock>,
}

impl Dispatcher {
    pub fn new(registry: Arc<PluginRegistry>, ctx: PluginContext, clock: Arc<dyn Clock>) -> Self {
        Self { registry, ctx, clock }
    }

    /// Deliver `message` to every plugin enabled right now, concurrently.
    pub async fn dispatch(&self, message: &IncomingMessage) -> DispatchOutcome {
        let targets = self.registry.list_enabled();
        let results = join_all(targets.iter().map(|record| self.invoke(record, message))).await;

        let mut outcome = DispatchOutcome::default();
        for (record, result) in targets.iter().zip(results) {
            outcome.delivered += 1;
            match result {
                Invocation::Ok { slow } => {
                    if slow {
                        outcome.slow += 1;
                    }
                }
                Invocation::Failed { auto_disabled } => {
                    outcome.failed += 1;
                    if auto_disabled {
                        outcome.auto_disabled.push(record.id.clone());
                    }
                }
            }
        }
        outcome
    }

    async fn invoke(&self, record: &Arc<PluginRecord>, message: &IncomingMessage) -> Invocation {
        let started = Instant::now();
        let outcome = run_guarded(record.plugin.handle(message, &self.ctx)).await;
        let elapsed = started.elapsed();
        let now = self.clock.now();

        let error_text = match &outcome {
            Guarded::Ok => {
                record.stats.record_success(elapsed, now);
                if elapsed > SLOW_HANDLER_THRESHOLD {
                    tracing::warn!(
                        "🐢 Slow plugin '{}': {}ms on message {}",
                        record.id,
                        elapsed.as_millis(),
                        message.id
                    );
                    return Invocation::Ok { slow: true };
                }
                return Invocation::Ok { slow: false };
            }
            Guarded::Failed(e) | Guarded::Panicked(e) => e,
        };

        let crashed = matches!(outcome, Guarded::Panicked(_));
        let errors = record.stats.record_failure(error_text, crashed, now);
        let err = PlugHostError::Handler {
            plugin: record.id.clone(),
            reason: error_text.clone(),
        };
        if crashed {
            tracing::error!("💥 {err}");
        } else {
            tracing::warn!("❌ {err}");
        }

        if errors > MAX_HANDLER_ERRORS {
            match self.registry.set_enabled(&record.id, false) {
                Ok(true) => {
                    tracing::error!(
                        "🛑 Plugin '{}' auto-disabled after {errors} errors",
                        record.id
                    );
                    return Invocation::Failed { auto_disabled: true };
                }
                // Already disabled, or unloaded while the handler ran.
                Ok(false) | Err(_) => {}
            }
        }
        Invocation::Failed { auto_disabled: false }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::PluginManifest;
    use crate::plugin::Plugin;
    use crate::testing::test_context;
    use async_trait::async_trait;
    use chrono::{TimeZone, Utc};
    use plughost_core::clock::{ManualClock, SystemClock};
    use std::path::PathBuf;

    struct Failing;

    #[async_trait]
    impl Plugin for Failing {
        async fn handle(&self, _m: &IncomingMessage, _c: &PluginContext) -> anyhow::Result<()> {
            anyhow::bail!("always fails")
        }
    }

    struct Panicking;

    #[async_trait]
    impl Plugin for Panicking {
        async fn handle(&self, _m: &IncomingMessage, _c: &PluginContext) -> anyhow::Result<()> {
            panic!("handler blew up")
        }
    }

    struct Echo;

    #[async_trait]
    impl Plugin for Echo {
        async fn handle(&self, m: &IncomingMessage, c: &PluginContext) -> anyhow::Result<()> {
            c.reply(m, &m.body).await
        }
    }

    fn register(registry: &PluginRegistry, id: &str, plugin: Arc<dyn Plugin>) {
        let manifest = PluginManifest::from_toml("").unwrap();
        let record = PluginRecord::new(id, &manifest, plugin, PathBuf::from(id), Utc::now());
        registry.register(record).unwrap();
    }

    #[tokio::test]
    async fn test_auto_disable_after_eleven_failures() {
        let registry = Arc::new(PluginRegistry::default());
        register(&registry, "bad", Arc::new(Failing));
        let (ctx, _transport) = test_context(registry.clone());
        let dispatcher = Dispatcher::new(registry.clone(), ctx, Arc::new(SystemClock));
        let msg = IncomingMessage::text("m", "chat", "user", "hello");

        for i in 1..=11 {
            let outcome = dispatcher.dispatch(&msg).await;
            assert_eq!(outcome.failed, 1);
            assert_eq!(outcome.auto_disabled.is_empty(), i < 11);
        }

        let record = registry.get("bad").unwrap();
        assert!(!record.is_enabled());
        assert_eq!(record.stats.errors(), 11);
        assert_eq!(record.stats.executions(), 11);

        let outcome = dispatcher.dispatch(&msg).await;
        assert_eq!(outcome.delivered, 0);
        assert_eq!(record.stats.executions(), 11);
    }

    #[tokio::test]
    async fn test_failures_do_not_block_peers() {
        let registry = Arc::new(PluginRegistry::default());
        register(&registry, "bad", Arc::new(Failing));
        register(&registry, "boom", Arc::new(Panicking));
        register(&registry, "echo", Arc::new(Echo));
        let (ctx, transport) = test_context(registry.clone());
        let at = Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap();
        let dispatcher = Dispatcher::new(registry.clone(), ctx, Arc::new(ManualClock::new(at)));

        let outcome = dispatcher
            .dispatch(&IncomingMessage::text("m", "chat", "user", "hi"))
            .await;
        assert_eq!(outcome.delivered, 3);
        assert_eq!(outcome.failed, 2);
        assert_eq!(transport.sent_texts(), vec![("chat".to_string(), "hi".to_string())]);

        let boom = registry.get("boom").unwrap().stats.snapshot();
        assert_eq!(boom.crash_count, 1);
        assert_eq!(boom.errors, 1);
        assert!(boom.last_error_text.unwrap().contains("handler blew up"));

        let echo = registry.get("echo").unwrap().stats.snapshot();
        assert_eq!(echo.executions, 1);
        assert_eq!(echo.errors, 0);
        assert_eq!(echo.last_execution_at, Some(at));
        assert_eq!(boom.last_execution_at, Some(at));
    }

    #[tokio::test]
    async fn test_transport_outage_is_handler_error() {
        let registry = Arc::new(PluginRegistry::default());
        register(&registry, "echo", Arc::new(Echo));
        let (ctx, transport) = test_context(registry.clone());
        transport.set_offline(true);
        let dispatcher = Dispatcher::new(registry.clone(), ctx, Arc::new(SystemClock));

        let outcome = dispatcher
            .dispatch(&IncomingMessage::text("m", "chat", "user", "hi"))
            .await;
        assert_eq!(outcome.failed, 1);
        let snap = registry.get("echo").unwrap().stats.snapshot();
        assert!(snap.last_error_text.unwrap().contains("Transport unavailable"));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_dispatch_loses_no_increments() {
        let registry = Arc::new(PluginRegistry::default());
        for i in 0..100 {
            register(&registry, &format!("p{i:03}"), Arc::new(crate::registry::tests::Quiet));
        }
        let (ctx, _transport) = test_context(registry.clone());
        let dispatcher = Arc::new(Dispatcher::new(registry.clone(), ctx, Arc::new(SystemClock)));

        let handles: Vec<_> = (0..1000)
            .map(|i| {
                let dispatcher = dispatcher.clone();
                tokio::spawn(async move {
                    let msg = IncomingMessage::text(&format!("m{i}"), "chat", "user", "x");
                    dispatcher.dispatch(&msg).await
                })
            })
            .collect();
        for handle in handles {
            assert_eq!(handle.await.unwrap().delivered, 100);
        }

        for record in registry.list() {
            assert_eq!(record.stats.executions(), 1000, "plugin {}", record.id);
        }
        assert_eq!(registry.dispatch_stats().total_executions, 100_000);
    }
}
