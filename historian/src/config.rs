//! Settings read from `config.toml` in the XDG config directory.

use crate::environment;
use anyhow::{Context as _, Result};
use historian_store::StoreOptions;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

pub const CONFIG_FILE: &str = "config.toml";
pub const DATABASE_FILE: &str = "history.db";

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Database file, overriding the XDG data location.
    pub database: Option<PathBuf>,
    pub busy_timeout_ms: u64,
    pub exclusive: bool,
}

impl Default for Config {
    fn default() -> Self {
        let options = StoreOptions::default();
        Config {
            database: None,
            busy_timeout_ms: options.busy_timeout.as_millis() as u64,
            exclusive: options.exclusive,
        }
    }
}

impl Config {
    /// Load the user's config file, falling back to defaults when there is none.
    pub fn load() -> Result<Self> {
        match environment::get_config_file(CONFIG_FILE)? {
            Some(path) => Self::from_file(&path),
            None => Ok(Config::default()),
        }
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        debug!("reading config {}", path.display());
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config {}", path.display()))?;
        Self::parse(&text).with_context(|| format!("invalid config {}", path.display()))
    }

    pub fn parse(text: &str) -> Result<Self> {
        Ok(toml::from_str(text)?)
    }

    pub fn store_options(&self) -> StoreOptions {
        StoreOptions::default()
            .busy_timeout(Duration::from_millis(self.busy_timeout_ms))
            .exclusive(self.exclusive)
    }

    /// Pick the database file: `flag`, then `env`, then the config file, then
    /// the XDG data directory.
    pub fn database_path(&self, flag: Option<&Path>, env: Option<PathBuf>) -> Result<PathBuf> {
        if let Some(path) = flag {
            return Ok(path.to_path_buf());
        }
        if let Some(path) = env.or_else(|| self.database.clone()) {
            return Ok(path);
        }
        environment::get_data_file(DATABASE_FILE)
    }
}
