//! `deepreact doctor`: diagnose configuration and provider health.

use std::path::Path;
use std::time::Duration;

pub async fn run(config_path: Option<&Path>) -> Result<(), Box<dyn std::error::Error>> {
    println!("DeepReact Doctor");
    println!("================\n");

    let mut issues = 0;

    let path = super::config_file(config_path);
    if path.exists() {
        println!("  ✅ Config file: {}", path.display());
    } else {
        println!("  ⚠️  No config file at {}, using defaults", path.display());
    }

    let config = match super::load_config(config_path) {
        Ok(config) => {
            println!("  ✅ Configuration valid");
            config
        }
        Err(e) => {
            println!("  ❌ Configuration invalid: {e}");
            return Err(e.into());
        }
    };

    println!(
        "  ℹ️  Provider: {:?} at {} (model {})",
        config.provider.kind, config.provider.api_base, config.provider.model
    );

    if config.has_api_key() {
        println!("  ✅ Model API key configured");
    } else {
        println!("  ⚠️  No model API key; set DEEPREACT_API_KEY if the endpoint needs one");
    }

    let registry = deepreact_tools::default_registry(&config.tools);
    println!("  ℹ️  Tools: {}", registry.names().join(", "));
    if registry.contains("search") && config.tools.search.api_key.is_none() {
        println!("  ⚠️  search is enabled but SERPER_API_KEY is not set");
        issues += 1;
    }

    let timeout = Duration::from_secs(config.retry.model_timeout_secs.max(1));
    let provider = deepreact_providers::build_from_config(&config.provider, timeout);
    match provider.health_check().await {
        Ok(true) => println!("  ✅ Provider reachable"),
        Ok(false) => {
            println!("  ❌ Provider answered but reported unhealthy");
            issues += 1;
        }
        Err(e) => {
            println!("  ❌ Provider unreachable: {e}");
            issues += 1;
        }
    }

    println!();
    if issues == 0 {
        println!("  All checks passed.");
    } else {
        println!("  {issues} issue(s) found. See above for details.");
    }

    Ok(())
}
