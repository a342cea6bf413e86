//! Advertiser configuration

use anyhow::{bail, Result};
use device_lib::ResourceList;
use serde::Deserialize;
use std::path::Path;

/// Environment variable naming an optional TOML config file
pub const CONFIG_PATH_ENV: &str = "ADVERTISER_CONFIG";

/// Advertiser configuration
#[derive(Debug, Clone, Deserialize)]
pub struct AdvertiserConfig {
    /// Node name from Kubernetes downward API
    #[serde(default = "default_node_name")]
    pub node_name: String,

    /// Port for health/metrics
    #[serde(default = "default_api_port")]
    pub api_port: u16,

    /// Seconds between publishes
    #[serde(default = "default_interval")]
    pub interval_secs: u64,

    /// Consecutive failed publishes before the advertiser reports unhealthy
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,

    /// Device capacity of this node
    #[serde(default)]
    pub capacity: ResourceList,

    /// Device allocatable of this node; empty means same as capacity
    #[serde(default)]
    pub allocatable: ResourceList,
}

fn default_node_name() -> String {
    std::env::var("NODE_NAME").unwrap_or_default()
}

fn default_api_port() -> u16 {
    8080
}

fn default_interval() -> u64 {
    30
}

fn default_failure_threshold() -> u32 {
    3
}

impl AdvertiserConfig {
    /// Load configuration from the optional config file and environment
    pub fn load() -> Result<Self> {
        match std::env::var(CONFIG_PATH_ENV) {
            Ok(path) => Self::load_from(Some(Path::new(&path))),
            Err(_) => Self::load_from(None),
        }
    }

    /// Load from `path` (TOML) overlaid with `ADVERTISER_*` variables
    pub fn load_from(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::new(
                &path.to_string_lossy(),
                config::FileFormat::Toml,
            ));
        }
        let config = builder
            .add_source(config::Environment::with_prefix("ADVERTISER"))
            .build()?;

        let config: AdvertiserConfig = config.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.node_name.trim().is_empty() {
            bail!("node_name is empty; set NODE_NAME or ADVERTISER_NODE_NAME");
        }
        if self.interval_secs == 0 {
            bail!("interval_secs must be positive");
        }
        for (resource, amount) in self.capacity.iter().chain(&self.allocatable) {
            if *amount < 0 {
                bail!("device count for {resource} is negative: {amount}");
            }
        }
        Ok(())
    }

    /// Allocatable devices to publish
    pub fn effective_allocatable(&self) -> &ResourceList {
        if self.allocatable.is_empty() {
            &self.capacity
        } else {
            &self.allocatable
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_config(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_load_from_file() {
        let file = write_config(
            r#"
node_name = "gpu-node-1"
interval_secs = 10

[capacity]
"nvidia.com/gpu" = 4
"#,
        );

        let config = AdvertiserConfig::load_from(Some(file.path())).unwrap();
        assert_eq!(config.node_name, "gpu-node-1");
        assert_eq!(config.interval_secs, 10);
        assert_eq!(config.api_port, 8080);
        assert_eq!(config.failure_threshold, 3);
        assert_eq!(config.capacity["nvidia.com/gpu"], 4);
        assert_eq!(config.effective_allocatable()["nvidia.com/gpu"], 4);
    }

    #[test]
    fn test_rejects_zero_interval() {
        let file = write_config("node_name = \"n1\"\ninterval_secs = 0\n");
        assert!(AdvertiserConfig::load_from(Some(file.path())).is_err());
    }

    #[test]
    fn test_rejects_negative_devices() {
        let file = write_config("node_name = \"n1\"\n[allocatable]\ngpu = -1\n");
        let err = AdvertiserConfig::load_from(Some(file.path())).unwrap_err();
        assert!(err.to_string().contains("negative"));
    }

    #[test]
    fn test_rejects_blank_node_name() {
        let file = write_config("node_name = \"  \"\n");
        assert!(AdvertiserConfig::load_from(Some(file.path())).is_err());
    }
}
