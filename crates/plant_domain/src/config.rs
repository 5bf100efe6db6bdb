use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use plant_core::Locale;
use serde::{Deserialize, Serialize};

/// Settings shared by the registry and its storage/scheduling backends.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct RegistryConfig {
    /// Directory holding one JSON file per plant.
    pub data_dir: PathBuf,
    /// Upper bound for any single store or scheduler call.
    pub io_timeout_ms: u64,
    /// Language for reminder payloads and the banner.
    pub locale: Locale,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("plants"),
            io_timeout_ms: 5_000,
            locale: Locale::Portuguese,
        }
    }
}

impl RegistryConfig {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("unable to read config `{}`", path.display()))?;
        let config: Self = serde_json::from_str(&raw)
            .with_context(|| format!("invalid config `{}`", path.display()))?;
        anyhow::ensure!(config.io_timeout_ms > 0, "io_timeout_ms must be positive");
        Ok(config)
    }

    pub fn io_timeout(&self) -> Duration {
        Duration::from_millis(self.io_timeout_ms.max(1))
    }
}
