//! Error taxonomy shared across the workspace.

use thiserror::Error;

/// Errors raised by the plugin host and its adapters.
#[derive(Debug, Error)]
pub enum PlugHostError {
    /// A plugin manifest could not be read, parsed or resolved.
    #[error("Load error: {0}")]
    Load(String),

    /// A plugin's `init` hook failed; the plugin is not registered.
    #[error("Init failed for plugin '{plugin}': {reason}")]
    Init { plugin: String, reason: String },

    /// A plugin's message handler failed.
    #[error("Handler error in plugin '{plugin}': {reason}")]
    Handler { plugin: String, reason: String },

    /// A scheduled task handler failed.
    #[error("Scheduled task '{key}' failed: {reason}")]
    Task { key: String, reason: String },

    /// A cron expression could not be parsed.
    #[error("Cron error: {0}")]
    Cron(String),

    /// Unknown plugin id or task key.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Plugin id collision within one registry generation.
    #[error("Duplicate plugin id: {0}")]
    DuplicateId(String),

    #[error("Transport unavailable: {0}")]
    TransportUnavailable(String),

    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),

    /// A store filter or update document is malformed.
    #[error("Invalid document: {0}")]
    InvalidDocument(String),

    #[error("Config error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, PlugHostError>;
