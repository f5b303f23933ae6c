pub mod config_cmd;
pub mod doctor;
pub mod run;
pub mod tools;

use std::path::{Path, PathBuf};

use deepreact_config::{AppConfig, ConfigError};

/// The config file in effect: `--config` if given, else the default path.
pub fn config_file(path: Option<&Path>) -> PathBuf {
    path.map_or_else(|| AppConfig::config_dir().join("config.toml"), Path::to_path_buf)
}

/// Load the config file plus environment overrides.
pub fn load_config(path: Option<&Path>) -> Result<AppConfig, ConfigError> {
    AppConfig::load_with(&config_file(path))
}
