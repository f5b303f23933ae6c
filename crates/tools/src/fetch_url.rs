//! Page fetch tool: GET a URL and return its readable text.
//!
//! HTML is reduced to text (scripts, styles and tags removed, markdown
//! links collapsed to their labels) and truncated to `max_chars`.
//! Rate limiting and 5xx answers surface as retryable errors; other
//! failures are reported to the model as error-flagged output.

use std::time::Duration;

use async_trait::async_trait;
use deepreact_config::FetchToolConfig;
use deepreact_core::error::ToolError;
use deepreact_core::tool::{Tool, ToolOutput};
use regex_lite::Regex;
use tracing::{debug, warn};

use crate::{http_client, string_list, transport_error};

const NAME: &str = "fetch_url";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(50);
const URL_SEPARATOR: &str = "\n=======\n";

pub struct FetchUrlTool {
    max_chars: usize,
    client: reqwest::Client,
}

/// Outcome of fetching one URL.
enum Fetched {
    Page(String),
    Failed(String),
}

impl FetchUrlTool {
    pub fn new(config: &FetchToolConfig) -> Self {
        Self {
            max_chars: config.max_chars,
            client: http_client(REQUEST_TIMEOUT),
        }
    }

    async fn fetch_one(&self, url: &str) -> Result<Fetched, ToolError> {
        if !url.starts_with("http://") && !url.starts_with("https://") {
            return Ok(Fetched::Failed(failed_message(url)));
        }

        debug!(url, "Fetching page");
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| transport_error(NAME, REQUEST_TIMEOUT, e))?;

        let status = response.status().as_u16();
        if status == 429 || status >= 500 {
            return Err(ToolError::Upstream {
                tool_name: NAME.into(),
                status_code: status,
            });
        }
        if !response.status().is_success() {
            warn!(url, status, "Page fetch rejected");
            return Ok(Fetched::Failed(failed_message(url)));
        }

        let is_html = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|ct| ct.contains("html"));
        let body = response
            .text()
            .await
            .map_err(|e| transport_error(NAME, REQUEST_TIMEOUT, e))?;

        let text = if is_html { html_to_text(&body) } else { body };
        let text = remove_text_links(&text);
        if text.trim().is_empty() {
            return Ok(Fetched::Failed(failed_message(url)));
        }

        let content: String = text.chars().take(self.max_chars).collect();
        Ok(Fetched::Page(format!(
            "Content from {url}:\n\n[Website]: {}\n[URL]: {url}\n[Content]:\n{content}\n",
            domain_of(url)
        )))
    }
}

fn failed_message(url: &str) -> String {
    format!(
        "[fetch_url] Failed to fetch content from {url}. The webpage could not be accessed. Please check the URL."
    )
}

fn replace_all(pattern: &str, text: &str, replacement: &str) -> String {
    match Regex::new(pattern) {
        Ok(re) => re.replace_all(text, replacement).into_owned(),
        Err(e) => {
            warn!(pattern, error = %e, "Invalid cleanup pattern");
            text.to_string()
        }
    }
}

/// Strip markup from an HTML document, keeping paragraph breaks.
fn html_to_text(html: &str) -> String {
    let text = replace_all(r"(?is)<(script|style|noscript|head)\b.*?</(script|style|noscript|head)>", html, " ");
    let text = replace_all(r"(?s)<!--.*?-->", &text, " ");
    let text = replace_all(r"(?i)<(br|/p|/div|/li|/h[1-6]|/tr)\b[^>]*>", &text, "\n");
    let text = replace_all(r"(?s)<[^>]+>", &text, " ");
    let text = text
        .replace("&nbsp;", " ")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&amp;", "&");
    let text = replace_all(r"[ \t\r\f]+", &text, " ");
    let text = replace_all(r"\n\s*\n+", &text, "\n\n");
    text.lines().map(str::trim).collect::<Vec<_>>().join("\n").trim().to_string()
}

/// `[label](target)` becomes `label`.
fn remove_text_links(text: &str) -> String {
    replace_all(r"\[(.*?)\]\((.*?)\)", text, "$1")
}

fn domain_of(url: &str) -> &str {
    let rest = url.split_once("://").map_or(url, |(_, rest)| rest);
    let host = rest.split(['/', '?', '#']).next().unwrap_or(rest);
    if host.is_empty() { url } else { host }
}

#[async_trait]
impl Tool for FetchUrlTool {
    fn name(&self) -> &str {
        NAME
    }

    fn description(&self) -> &str {
        "Fetch webpage content directly without summarization. Returns the raw content of the webpage truncated to a reasonable length."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "url": {
                    "type": "string",
                    "description": "The URL of the webpage to fetch."
                }
            },
            "required": ["url"]
        })
    }

    async fn execute(&self, arguments: serde_json::Value) -> Result<ToolOutput, ToolError> {
        let urls = string_list(&arguments, "url").map_err(|_| {
            ToolError::InvalidArguments(
                "[fetch_url] Invalid request format: Input must be a JSON object containing 'url' field".into(),
            )
        })?;

        let mut sections = Vec::with_capacity(urls.len());
        let mut pages = 0usize;
        let mut last_error = None;
        for url in &urls {
            match self.fetch_one(url).await {
                Ok(Fetched::Page(text)) => {
                    pages += 1;
                    sections.push(text);
                }
                Ok(Fetched::Failed(text)) => sections.push(text),
                Err(e) => {
                    warn!(url = %url, error = %e, "Page fetch failed");
                    sections.push(failed_message(url));
                    last_error = Some(e);
                }
            }
        }

        if pages == 0 {
            // A single transient failure is worth retrying as a whole.
            if urls.len() == 1
                && let Some(e) = last_error
            {
                return Err(e);
            }
            return Ok(ToolOutput::error(sections.join(URL_SEPARATOR)));
        }
        Ok(ToolOutput::ok(sections.join(URL_SEPARATOR)))
    }
}
