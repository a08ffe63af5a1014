//! PlugHost configuration system.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{PlugHostError, Result};

/// Root configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostConfig {
    #[serde(default = "default_bot_name")]
    pub bot_name: String,
    /// Command prefix recognised in message bodies (e.g. ".menu").
    #[serde(default = "default_prefix")]
    pub prefix: String,
    /// Sender ids allowed to use owner-only plugins.
    #[serde(default)]
    pub owners: Vec<String>,
    /// IANA timezone in which cron expressions are evaluated.
    #[serde(default = "default_timezone")]
    pub timezone: String,
    #[serde(default)]
    pub plugins: PluginsConfig,
    #[serde(default)]
    pub health: HealthConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub transport: TransportConfig,
}

fn default_bot_name() -> String { "PlugHost".into() }
fn default_prefix() -> String { ".".into() }
fn default_timezone() -> String { "UTC".into() }

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            bot_name: default_bot_name(),
            prefix: default_prefix(),
            owners: Vec::new(),
            timezone: default_timezone(),
            plugins: PluginsConfig::default(),
            health: HealthConfig::default(),
            store: StoreConfig::default(),
            transport: TransportConfig::default(),
        }
    }
}

impl HostConfig {
    /// Load config from the default path (~/.plughost/config.toml).
    pub fn load() -> Result<Self> {
        let path = Self::default_path();
        if path.exists() {
            Self::load_from(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load config from a specific path.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| PlugHostError::Config(format!("Failed to read config {}: {e}", path.display())))?;
        Self::from_toml(&content)
    }

    /// Parse config from TOML text, validating the timezone.
    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)
            .map_err(|e| PlugHostError::Config(format!("Failed to parse config: {e}")))?;
        config.tz()?;
        Ok(config)
    }

    /// Get the default config path.
    pub fn default_path() -> PathBuf {
        Self::home_dir().join("config.toml")
    }

    /// Get the PlugHost home directory.
    pub fn home_dir() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".plughost")
    }

    /// The configured cron timezone.
    pub fn tz(&self) -> Result<chrono_tz::Tz> {
        self.timezone
            .parse::<chrono_tz::Tz>()
            .map_err(|e| PlugHostError::Config(format!("Invalid timezone '{}': {e}", self.timezone)))
    }

    /// Whether `sender_id` is listed as a bot owner.
    pub fn is_owner(&self, sender_id: &str) -> bool {
        self.owners.iter().any(|o| o == sender_id)
    }
}

/// Where plugin manifests live.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PluginsConfig {
    #[serde(default = "default_plugins_dir")]
    pub dir: String,
    /// Sub-directory of `dir`; manifests moved here are hidden from discovery.
    #[serde(default = "default_disabled_dir")]
    pub disabled_dir: String,
}

fn default_plugins_dir() -> String { "plugins".into() }
fn default_disabled_dir() -> String { "disabled".into() }

impl Default for PluginsConfig {
    fn default() -> Self {
        Self {
            dir: default_plugins_dir(),
            disabled_dir: default_disabled_dir(),
        }
    }
}

impl PluginsConfig {
    /// Plugins directory with `~` expanded.
    pub fn dir_path(&self) -> PathBuf {
        PathBuf::from(shellexpand::tilde(&self.dir).to_string())
    }

    pub fn disabled_path(&self) -> PathBuf {
        self.dir_path().join(&self.disabled_dir)
    }
}

/// Health monitor sweep intervals.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthConfig {
    #[serde(default = "default_short_sweep")]
    pub short_sweep_secs: u64,
    #[serde(default = "default_long_sweep")]
    pub long_sweep_secs: u64,
}

fn default_short_sweep() -> u64 { 600 }
fn default_long_sweep() -> u64 { 3600 }

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            short_sweep_secs: default_short_sweep(),
            long_sweep_secs: default_long_sweep(),
        }
    }
}

/// Document store configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// "sqlite" or "memory".
    #[serde(default = "default_store_backend")]
    pub backend: String,
    #[serde(default = "default_store_path")]
    pub path: String,
}

fn default_store_backend() -> String { "sqlite".into() }
fn default_store_path() -> String { "~/.plughost/store.db".into() }

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: default_store_backend(),
            path: default_store_path(),
        }
    }
}

impl StoreConfig {
    pub fn expanded_path(&self) -> PathBuf {
        PathBuf::from(shellexpand::tilde(&self.path).to_string())
    }
}

/// Transport selection and per-transport settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportConfig {
    /// "cli" or "whatsapp".
    #[serde(default = "default_transport_kind")]
    pub kind: String,
    #[serde(default)]
    pub cli: CliTransportConfig,
    #[serde(default)]
    pub whatsapp: Option<WhatsAppTransportConfig>,
}

fn default_transport_kind() -> String { "cli".into() }

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            kind: default_transport_kind(),
            cli: CliTransportConfig::default(),
            whatsapp: None,
        }
    }
}

/// Console transport: stdin lines become messages from a fixed chat.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CliTransportConfig {
    #[serde(default = "default_cli_chat")]
    pub chat_id: String,
    #[serde(default = "default_cli_sender")]
    pub sender_id: String,
    #[serde(default)]
    pub is_group: bool,
}

fn default_cli_chat() -> String { "cli".into() }
fn default_cli_sender() -> String { "local".into() }

impl Default for CliTransportConfig {
    fn default() -> Self {
        Self {
            chat_id: default_cli_chat(),
            sender_id: default_cli_sender(),
            is_group: false,
        }
    }
}

/// WhatsApp Business Cloud API credentials.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WhatsAppTransportConfig {
    pub access_token: String,
    pub phone_number_id: String,
    #[serde(default)]
    pub webhook_verify_token: String,
    #[serde(default = "default_graph_api_base")]
    pub api_base: String,
}

fn default_graph_api_base() -> String { "https://graph.facebook.com/v21.0".into() }
