use anyhow::Context as _;
use anyhow::Result;
use std::path::PathBuf;

pub const APP_NAME: &str = "historian";

/// Environment variable naming the database file.
pub const DATABASE_ENV: &str = "HISTORIAN_DB";

/// Environment variable holding the tracing filter.
pub const LOG_ENV: &str = "HISTORIAN_LOG";

pub fn get_config_file(name: &str) -> Result<Option<PathBuf>> {
    let xdg_dir =
        xdg::BaseDirectories::with_prefix(APP_NAME).context("failed get xdg directory")?;
    Ok(xdg_dir.find_config_file(name))
}

pub fn get_data_file(name: &str) -> Result<PathBuf> {
    let xdg_dir =
        xdg::BaseDirectories::with_prefix(APP_NAME).context("failed get xdg directory")?;
    xdg_dir.place_data_file(name).context("failed get path")
}

pub fn database_from_env() -> Option<PathBuf> {
    std::env::var_os(DATABASE_ENV)
        .filter(|value| !value.is_empty())
        .map(PathBuf::from)
}

/// The working directory as the partition name used for new entries.
pub fn current_directory() -> Result<String> {
    let cwd = std::env::current_dir().context("failed get current directory")?;
    Ok(cwd.to_string_lossy().into_owned())
}
