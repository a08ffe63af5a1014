//! Shared fixtures for this crate's tests.

use std::ops::Deref;
use std::path::Path;
use std::sync::Arc;

use chrono::{TimeZone, Utc};
use plughost_core::clock::ManualClock;
use plughost_core::config::HostConfig;
use plughost_core::testing::RecordingTransport;
use plughost_store::MemoryStore;

use crate::catalog::PluginCatalog;
use crate::host::PluginHost;
use crate::plugin::PluginContext;
use crate::registry::PluginRegistry;

/// A context backed by a recording transport and an in-memory store.
pub(crate) fn test_context(registry: Arc<PluginRegistry>) -> (PluginContext, Arc<RecordingTransport>) {
    let transport = Arc::new(RecordingTransport::new());
    let ctx = PluginContext::new(
        transport.clone(),
        Arc::new(MemoryStore::new()),
        Arc::new(HostConfig::default()),
        registry,
    );
    (ctx, transport)
}

/// Write a file under the plugins directory, creating parents.
pub(crate) fn write_manifest(dir: &Path, name: &str, content: &str) {
    let path = dir.join(name);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }
    std::fs::write(path, content).unwrap();
}

/// A full host over a temporary plugins directory and a manual clock.
pub(crate) struct TestHost {
    _tmp: tempfile::TempDir,
    pub clock: Arc<ManualClock>,
    pub transport: Arc<RecordingTransport>,
    host: PluginHost,
}

impl TestHost {
    pub fn new(catalog: PluginCatalog) -> Self {
        let tmp = tempfile::tempdir().unwrap();
        let mut config = HostConfig::default();
        config.plugins.dir = tmp.path().join("plugins").display().to_string();

        let clock = Arc::new(ManualClock::new(Utc.with_ymd_and_hms(2026, 1, 5, 0, 0, 0).unwrap()));
        let transport = Arc::new(RecordingTransport::new());
        let host = PluginHost::new(
            config,
            catalog,
            transport.clone(),
            Arc::new(MemoryStore::new()),
            clock.clone(),
        )
        .unwrap();
        std::fs::create_dir_all(host.loader.plugins_dir()).unwrap();

        Self {
            _tmp: tmp,
            clock,
            transport,
            host,
        }
    }

    pub fn dir(&self) -> &Path {
        self.host.loader.plugins_dir()
    }
}

impl Deref for TestHost {
    type Target = PluginHost;

    fn deref(&self) -> &PluginHost {
        &self.host
    }
}
