//! Plugins compiled into the binary.
//!
//! A manifest activates one by naming its entry, e.g. `entry = "menu"`.

mod heartbeat;
mod menu;
mod ping;
mod welcome;

use std::sync::Arc;

use plughost_plugins::PluginCatalog;

pub use heartbeat::HeartbeatPlugin;
pub use menu::MenuPlugin;
pub use ping::PingPlugin;
pub use welcome::WelcomePlugin;

/// Every built-in plugin, keyed by catalog entry.
pub fn builtin_catalog() -> PluginCatalog {
    PluginCatalog::new()
        .with("menu", |_| Ok(Arc::new(MenuPlugin)))
        .with("ping", |_| Ok(Arc::new(PingPlugin)))
        .with("welcome", |m| Ok(Arc::new(WelcomePlugin::from_manifest(m))))
        .with("heartbeat", |m| Ok(Arc::new(HeartbeatPlugin::from_manifest(m)?)))
}


#[cfg(test)]
mod tests {
    use super::*;

    use chrono::{TimeZone, Utc};
    use plughost_core::config::HostConfig;
    use plughost_core::testing::RecordingTransport;
    use plughost_core::types::{IncomingMessage, TransportEvent};
    use plughost_core::ManualClock;
    use plughost_plugins::PluginHost;
    use plughost_store::MemoryStore;

    #[test]
    fn test_builtin_catalog_entries() {
        assert_eq!(builtin_catalog().entries(), vec!["heartbeat", "menu", "ping", "welcome"]);
    }

    #[tokio::test]
    async fn test_bundled_manifests_load() {
        let mut config = HostConfig::default();
        config.plugins.dir = concat!(env!("CARGO_MANIFEST_DIR"), "/plugins").to_string();
        let transport = Arc::new(RecordingTransport::new());
        let clock = Arc::new(ManualClock::new(Utc.with_ymd_and_hms(2026, 1, 5, 0, 0, 0).unwrap()));
        let host = PluginHost::new(
            config,
            builtin_catalog(),
            transport.clone(),
            Arc::new(MemoryStore::new()),
            clock,
        )
        .unwrap();

        let summary = host.loader.load_all(false).await.unwrap();
        assert_eq!(summary.loaded, 4);
        assert!(summary.failed.is_empty());
        assert_eq!(summary.tasks, 1);
        assert!(!host.registry.contains("ping-verbose"));

        host.handle_event(TransportEvent::Message(IncomingMessage::text("1", "c", "u", ".help")))
            .await;
        let sent = transport.sent_texts();
        assert_eq!(sent.len(), 1);
        assert!(sent[0].1.contains(".ping"));
        // Owner-only plugins stay hidden from other senders.
        assert!(!sent[0].1.contains(".heartbeat"));
        host.shutdown().await;
    }
}
