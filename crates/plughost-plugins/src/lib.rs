//! # PlugHost Plugins
//!
//! Plugin lifecycle for a chat bot: discovery, dispatch, scheduled tasks,
//! health monitoring and operator controls.
//!
//! ## Architecture
//! ```text
//! plugins/*.toml ──► PluginLoader ──► PluginCatalog (factory per entry)
//!                        │
//!                        ├──► PluginRegistry (records + stats)
//!                        ├──► TaskSupervisor (one worker per task)
//!                        └──► GroupEventRouter
//!
//! Transport ──► Dispatcher ──► every enabled plugin (join_all)
//!           └─► GroupEventRouter ──► subscribed plugins
//!
//! HealthMonitor ── short sweep ──► restart stuck tasks
//!               └─ long sweep  ──► HealthReport, forced reload when critical
//! ```

pub mod admin;
pub mod catalog;
pub mod dispatch;
pub mod group_events;
pub mod health;
pub mod host;
pub mod loader;
pub mod manifest;
pub mod plugin;
pub mod registry;
pub mod stats;

#[cfg(test)]
mod testing;

pub use admin::{AdminCommand, AdminControl, AdminResponse};
pub use catalog::PluginCatalog;
pub use dispatch::{DispatchOutcome, Dispatcher};
pub use group_events::GroupEventRouter;
pub use health::{HealthMonitor, HealthReport};
pub use host::PluginHost;
pub use loader::{LoadSummary, PluginLoader};
pub use manifest::{CommandSpec, PluginCategory, PluginManifest};
pub use plugin::{CommandDirectory, CommandEntry, Plugin, PluginContext, ScheduledTask};
pub use registry::{DispatchStats, DuplicateIdPolicy, PluginInfo, PluginRecord, PluginRegistry};
pub use stats::{PluginStats, StatsSnapshot};
