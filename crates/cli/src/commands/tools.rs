//! `deepreact tools`: list the tools a rollout can call.

use std::path::Path;

use deepreact_core::provider::ToolDefinition;

pub fn run(config_path: Option<&Path>) -> Result<(), Box<dyn std::error::Error>> {
    let config = super::load_config(config_path)?;
    let registry = deepreact_tools::default_registry(&config.tools);

    if registry.is_empty() {
        println!("No tools enabled. Set [tools] enabled in the config file.");
        return Ok(());
    }

    println!("Enabled tools ({}):\n", registry.len());
    for definition in registry.definitions() {
        println!("{}", describe(&definition)?);
    }
    Ok(())
}

fn describe(definition: &ToolDefinition) -> Result<String, serde_json::Error> {
    let schema = serde_json::to_string_pretty(&definition.parameters)?;
    Ok(format!(
        "  {}\n    {}\n    parameters: {}\n",
        definition.name,
        definition.description,
        schema.replace('\n', "\n    ")
    ))
}
