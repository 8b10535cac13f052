use crate::model::DirectoryConfig;
use crate::timestamp::ClockFormat;
use crate::utils::path::{dedup_roots, expand_path};
use config::{Config, ConfigError, Environment, File as ConfigFile};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

const ENV_PREFIX: &str = "ACHIEVEMENT_SYNC";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub directories: Vec<DirectoryConfig>,
    pub status_cache_path: String,
    pub debounce_ms: u64,
    pub clock_format: ClockFormat,
}

impl AppConfig {
    /// Enabled roots in configured order, with `~/` expanded. A directory
    /// configured twice is returned once.
    pub fn enabled_roots(&self) -> Vec<PathBuf> {
        let roots: Vec<PathBuf> = self
            .directories
            .iter()
            .filter(|d| d.enabled)
            .map(|d| expand_path(&d.path))
            .collect();
        dedup_roots(&roots)
    }

    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    pub fn status_cache_path(&self) -> PathBuf {
        expand_path(&self.status_cache_path)
    }
}

/// Defaults, then `Config.toml` in the working directory if present, then
/// `ACHIEVEMENT_SYNC__*` environment variables.
pub fn load_configuration() -> Result<AppConfig, ConfigError> {
    build(ConfigFile::with_name("Config").required(false))
}

/// Same layering with an explicit config file.
pub fn load_from(path: &Path) -> Result<AppConfig, ConfigError> {
    build(ConfigFile::from(path).required(true))
}

fn build<S>(file: S) -> Result<AppConfig, ConfigError>
where
    S: config::Source + Send + Sync + 'static,
{
    let builder = Config::builder()
        .set_default("status_cache_path", "status_cache.json")?
        .set_default("debounce_ms", 500)?
        .set_default("clock_format", "24h")?
        .add_source(file)
        .add_source(Environment::with_prefix(ENV_PREFIX).separator("__"))
        .build()?;
    builder.try_deserialize::<AppConfig>()
}
