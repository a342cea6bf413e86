//! Configuration management for the CLI

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::output::OutputFormat;

/// Defaults read from `~/.config/kdctl/config.json`
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// Namespace for pod commands when none is given
    pub default_namespace: Option<String>,
    /// Output format when none is given ("table" or "json")
    pub default_format: Option<String>,
}

impl Config {
    /// Load configuration from the user's config file, if any
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_path()?)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).context("Failed to read config file")?;

        serde_json::from_str(&content).context("Failed to parse config file")
    }

    /// Namespace to use: the explicit one, then the configured default,
    /// then `default`
    pub fn namespace(&self, explicit: Option<String>) -> String {
        explicit
            .or_else(|| self.default_namespace.clone())
            .unwrap_or_else(|| "default".to_string())
    }

    pub fn format(&self, explicit: Option<OutputFormat>) -> OutputFormat {
        explicit
            .or_else(|| match self.default_format.as_deref() {
                Some("json") => Some(OutputFormat::Json),
                Some("table") => Some(OutputFormat::Table),
                _ => None,
            })
            .unwrap_or_default()
    }

    fn config_path() -> Result<PathBuf> {
        let home = dirs_next::home_dir().context("Could not determine home directory")?;
        Ok(home.join(".config").join("kdctl").join("config.json"))
    }
}
