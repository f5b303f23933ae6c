//! `deepreact config`: print configuration as TOML.

use std::path::Path;

use deepreact_config::AppConfig;

pub fn show(config_path: Option<&Path>, default: bool) -> Result<(), Box<dyn std::error::Error>> {
    let toml_str = if default {
        AppConfig::default_toml()
    } else {
        super::load_config(config_path)
            .map_err(|e| format!("Failed to load config: {e}"))?
            .to_toml()
    };
    println!("{toml_str}");
    Ok(())
}
