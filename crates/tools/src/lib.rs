//! Built-in tool implementations for DeepReact.
//!
//! Tools give a rollout its reach beyond the model: web search, page
//! fetching, and a Python interpreter. Each one maps transport failures to
//! [`ToolError`] variants the retry controller can classify, and reports
//! soft failures (bad page, non-zero exit) as error-flagged output the
//! model gets to see.

pub mod fetch_url;
pub mod python;
pub mod search;

#[cfg(test)]
pub(crate) mod test_server;

use std::time::Duration;

use deepreact_config::ToolsConfig;
use deepreact_core::error::ToolError;
use deepreact_core::tool::ToolRegistry;
use tracing::warn;

pub use fetch_url::FetchUrlTool;
pub use python::PythonInterpreterTool;
pub use search::SearchTool;

/// Create the registry of built-in tools, narrowed to `config.enabled`.
pub fn default_registry(config: &ToolsConfig) -> ToolRegistry {
    let mut registry = ToolRegistry::new();
    registry.register(Box::new(SearchTool::new(&config.search)));
    registry.register(Box::new(FetchUrlTool::new(&config.fetch_url)));
    registry.register(Box::new(PythonInterpreterTool::new(&config.python)));
    registry.restrict_to(&config.enabled);
    registry
}

/// Read an argument that may be a single string or a list of strings.
pub(crate) fn string_list(arguments: &serde_json::Value, key: &str) -> Result<Vec<String>, ToolError> {
    let items: Vec<String> = match &arguments[key] {
        serde_json::Value::String(s) => vec![s.clone()],
        serde_json::Value::Array(values) => values
            .iter()
            .filter_map(|v| v.as_str().map(str::to_string))
            .collect(),
        _ => Vec::new(),
    };
    let items: Vec<String> = items
        .into_iter()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect();
    if items.is_empty() {
        return Err(ToolError::InvalidArguments(format!(
            "Missing '{key}' argument: expected a string or a list of strings"
        )));
    }
    Ok(items)
}

/// Build an HTTP client for tool traffic.
pub(crate) fn http_client(timeout: Duration) -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(timeout)
        .user_agent(concat!("deepreact/", env!("CARGO_PKG_VERSION")))
        .build()
        .unwrap_or_else(|e| {
            warn!(error = %e, "Falling back to default HTTP client");
            reqwest::Client::new()
        })
}

/// Map a reqwest transport failure for `tool_name`.
pub(crate) fn transport_error(tool_name: &str, timeout: Duration, e: reqwest::Error) -> ToolError {
    if e.is_timeout() {
        ToolError::Timeout {
            tool_name: tool_name.into(),
            timeout,
        }
    } else {
        ToolError::Network {
            tool_name: tool_name.into(),
            reason: e.to_string(),
        }
    }
}
