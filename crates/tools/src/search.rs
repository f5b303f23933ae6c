//! Web search tool backed by a Serper-compatible API.
//!
//! Accepts one query or a batch. Each query is sent as
//! `POST {api_url}` with `{"q": query}` and an `X-API-KEY` header; the
//! organic results are rendered as a numbered markdown list. Queries are
//! sent once each; retrying is left to the caller's tool policy. A batch
//! fails as a whole only when every query failed; otherwise failed queries
//! are reported inline next to the successful ones.

use std::time::Duration;

use async_trait::async_trait;
use deepreact_config::SearchToolConfig;
use deepreact_core::error::ToolError;
use deepreact_core::tool::{Tool, ToolOutput};
use serde::Deserialize;
use tracing::{debug, warn};

use crate::{http_client, string_list, transport_error};

const NAME: &str = "search";
const QUERY_SEPARATOR: &str = "\n=======\n";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

pub struct SearchTool {
    api_url: String,
    api_key: Option<String>,
    max_results: usize,
    client: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct SerperResponse {
    #[serde(default)]
    organic: Vec<OrganicResult>,
}

#[derive(Debug, Deserialize)]
struct OrganicResult {
    #[serde(default)]
    title: String,
    #[serde(default)]
    link: String,
    #[serde(default)]
    snippet: Option<String>,
    #[serde(default)]
    date: Option<String>,
}

impl SearchTool {
    pub fn new(config: &SearchToolConfig) -> Self {
        Self {
            api_url: config.api_url.clone(),
            api_key: config.api_key.clone(),
            max_results: config.max_results,
            client: http_client(REQUEST_TIMEOUT),
        }
    }

    async fn search_one(&self, api_key: &str, query: &str) -> Result<String, ToolError> {
        debug!(query, "Running web search");

        let response = self
            .client
            .post(&self.api_url)
            .header("X-API-KEY", api_key)
            .json(&serde_json::json!({ "q": query }))
            .send()
            .await
            .map_err(|e| transport_error(NAME, REQUEST_TIMEOUT, e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(match status.as_u16() {
                401 | 403 => ToolError::NotConfigured("search API rejected the API key".into()),
                code => ToolError::Upstream {
                    tool_name: NAME.into(),
                    status_code: code,
                },
            });
        }

        let body: SerperResponse = response.json().await.map_err(|e| ToolError::ExecutionFailed {
            tool_name: NAME.into(),
            reason: format!("unreadable search response: {e}"),
        })?;

        Ok(self.format_results(query, &body.organic))
    }

    fn format_results(&self, query: &str, results: &[OrganicResult]) -> String {
        if results.is_empty() {
            return format!("No results found for '{query}'. Try with a more general query.");
        }

        let entries: Vec<String> = results
            .iter()
            .take(self.max_results)
            .enumerate()
            .map(|(i, r)| {
                let mut entry = format!("{}. [{}]({})", i + 1, r.title, r.link);
                if let Some(date) = r.date.as_deref().filter(|d| !d.is_empty()) {
                    entry.push_str(&format!("\nDate published: {date}"));
                }
                if let Some(snippet) = r.snippet.as_deref().filter(|s| !s.is_empty()) {
                    entry.push('\n');
                    entry.push_str(snippet);
                }
                entry
            })
            .collect();

        format!(
            "A search for '{query}' found {} results:\n\n## Web Results\n{}",
            entries.len(),
            entries.join("\n\n")
        )
    }
}

#[async_trait]
impl Tool for SearchTool {
    fn name(&self) -> &str {
        NAME
    }

    fn description(&self) -> &str {
        "Perform web searches and return the top results for each query. Accepts multiple queries."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "query": {
                    "type": "array",
                    "items": { "type": "string", "description": "The search query." },
                    "minItems": 1,
                    "description": "The list of search queries."
                }
            },
            "required": ["query"]
        })
    }

    async fn execute(&self, arguments: serde_json::Value) -> Result<ToolOutput, ToolError> {
        let queries = string_list(&arguments, "query")?;
        let api_key = self
            .api_key
            .as_deref()
            .ok_or_else(|| ToolError::NotConfigured("search requires an API key (SERPER_API_KEY)".into()))?;

        let mut sections = Vec::with_capacity(queries.len());
        let mut succeeded = 0usize;
        let mut last_error = None;
        for query in &queries {
            match self.search_one(api_key, query).await {
                Ok(text) => {
                    succeeded += 1;
                    sections.push(text);
                }
                Err(e) => {
                    warn!(query = %query, error = %e, "Search query failed");
                    sections.push(format!("Search for '{query}' failed: {e}"));
                    last_error = Some(e);
                }
            }
        }

        // Nothing succeeded: return the error itself so it can be retried.
        if succeeded == 0
            && let Some(e) = last_error
        {
            return Err(e);
        }

        Ok(ToolOutput::ok(sections.join(QUERY_SEPARATOR)))
    }
}
