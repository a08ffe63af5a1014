//! Plugin manifest: the `<id>.toml` file that activates a catalog entry.

use std::collections::BTreeMap;
use std::path::Path;

use plughost_core::error::{PlugHostError, Result};
use serde::{Deserialize, Serialize};

/// Menu category of a plugin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PluginCategory {
    General,
    Group,
    Fun,
    Tools,
    Economy,
    Ai,
    Admin,
    Owner,
    Other,
}

impl PluginCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::General => "general",
            Self::Group => "group",
            Self::Fun => "fun",
            Self::Tools => "tools",
            Self::Economy => "economy",
            Self::Ai => "ai",
            Self::Admin => "admin",
            Self::Owner => "owner",
            Self::Other => "other",
        }
    }

    /// Parse a category name; unknown names fall back to [`Self::Other`].
    pub fn parse_lenient(s: &str) -> Self {
        match s.trim().to_lowercase().as_str() {
            "general" => Self::General,
            "group" => Self::Group,
            "fun" => Self::Fun,
            "tools" => Self::Tools,
            "economy" => Self::Economy,
            "ai" => Self::Ai,
            "admin" => Self::Admin,
            "owner" => Self::Owner,
            "other" => Self::Other,
            unknown => {
                tracing::warn!("⚠️ Unknown plugin category '{unknown}', using 'other'");
                Self::Other
            }
        }
    }
}

impl std::fmt::Display for PluginCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A command a plugin answers to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandSpec {
    pub name: String,
    #[serde(default)]
    pub aliases: Vec<String>,
    #[serde(default)]
    pub description: String,
}

/// Plugin manifest, loaded from `plugins/<id>.toml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PluginManifest {
    /// Catalog entry to instantiate (None = use the file stem).
    #[serde(default)]
    pub entry: Option<String>,
    /// Human-readable name (empty = use the id).
    #[serde(default)]
    pub name: String,
    #[serde(default = "default_version")]
    pub version: String,
    #[serde(default = "default_author")]
    pub author: String,
    #[serde(default)]
    pub description: String,
    #[serde(default = "default_category")]
    pub category: String,
    #[serde(default)]
    pub owner_only: bool,
    #[serde(default)]
    pub admin_only: bool,
    #[serde(default)]
    pub commands: Vec<CommandSpec>,
    /// Cron overrides keyed by declared task name.
    #[serde(default)]
    pub schedules: BTreeMap<String, String>,
    /// Free-form table handed to the plugin factory.
    #[serde(default)]
    pub settings: toml::Table,
}

fn default_version() -> String { "1.0.0".into() }
fn default_author() -> String { "unknown".into() }
fn default_category() -> String { "other".into() }

impl PluginManifest {
    /// Parse a manifest from string content.
    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| PlugHostError::Load(format!("Parse manifest: {e}")))
    }

    /// Load a manifest from a file path.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| PlugHostError::Load(format!("Read {}: {e}", path.display())))?;
        Self::from_toml(&content).map_err(|e| match e {
            PlugHostError::Load(msg) => PlugHostError::Load(format!("{}: {msg}", path.display())),
            other => other,
        })
    }

    /// Catalog entry name, defaulting to the plugin id.
    pub fn entry_or<'a>(&'a self, id: &'a str) -> &'a str {
        self.entry.as_deref().filter(|e| !e.is_empty()).unwrap_or(id)
    }

    /// Display name, defaulting to the plugin id.
    pub fn display_name<'a>(&'a self, id: &'a str) -> &'a str {
        if self.name.is_empty() { id } else { &self.name }
    }

    pub fn category(&self) -> PluginCategory {
        PluginCategory::parse_lenient(&self.category)
    }

    /// Typed view of one settings key.
    pub fn setting<T: serde::de::DeserializeOwned>(&self, key: &str) -> Option<T> {
        self.settings.get(key).cloned().and_then(|v| v.try_into().ok())
    }
}
