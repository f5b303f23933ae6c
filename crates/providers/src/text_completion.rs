//! Raw text-generation provider (LightLLM / TGI style `/generate` endpoints).
//!
//! The conversation is rendered into a single ChatML prompt:
//!
//! ```text
//! <|im_start|>system
//! ...<|im_end|>
//! <|im_start|>user
//! ...<|im_end|>
//! <|im_start|>assistant
//! ```
//!
//! The backend has no notion of tools, so calls and results only ever
//! travel as markup inside the text.

use async_trait::async_trait;
use deepreact_core::error::ProviderError;
use deepreact_core::message::{Message, Role};
use deepreact_core::protocol::{render_assistant_text, TOOL_RESPONSE_CLOSE, TOOL_RESPONSE_OPEN};
use deepreact_core::provider::*;
use std::time::Duration;
use tracing::debug;

use crate::http::{build_client, error_for_response, transport_error};

const IM_START: &str = "<|im_start|>";
const IM_END: &str = "<|im_end|>";

/// A provider that posts a rendered prompt and reads back `generated_text`.
pub struct TextCompletionProvider {
    endpoint: String,
    client: reqwest::Client,
}

impl TextCompletionProvider {
    /// `endpoint` is the full generation URL (e.g. `http://host:8080/generate`).
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            client: build_client(Duration::from_secs(1800)),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.client = build_client(timeout);
        self
    }

    /// Render the tool catalogue appended to the system turn.
    fn tools_block(tools: &[ToolDefinition]) -> String {
        if tools.is_empty() {
            return String::new();
        }
        let defs: Vec<String> = tools
            .iter()
            .map(|t| {
                serde_json::json!({
                    "type": "function",
                    "function": {"name": t.name, "description": t.description, "parameters": t.parameters}
                })
                .to_string()
            })
            .collect();
        format!(
            "\n\n# Tools\n\nYou may call one or more functions to assist with the user query.\n\n\
             You are provided with function signatures within <tools></tools> XML tags:\n<tools>\n{}\n</tools>\n\n\
             For each function call, return a json object with function name and arguments within <tool_call></tool_call> XML tags:\n\
             <tool_call>\n{{\"name\": <function-name>, \"arguments\": <args-json-object>}}\n</tool_call>",
            defs.join("\n")
        )
    }

    /// Render messages into a ChatML prompt ending with an open assistant turn.
    pub fn render_prompt(messages: &[Message], tools: &[ToolDefinition]) -> String {
        let tools_block = Self::tools_block(tools);
        let mut prompt = String::new();
        let mut rest = messages;

        match messages.first() {
            Some(first) if first.role == Role::System => {
                prompt.push_str(&format!("{IM_START}system\n{}{tools_block}{IM_END}\n", first.content));
                rest = &messages[1..];
            }
            _ if !tools_block.is_empty() => {
                prompt.push_str(&format!("{IM_START}system\n{}{IM_END}\n", tools_block.trim_start()));
            }
            _ => {}
        }

        for message in rest {
            let (role, content) = match message.role {
                Role::User | Role::System => ("user", message.content.clone()),
                Role::Assistant => ("assistant", render_assistant_text(message)),
                Role::Tool if message.content.starts_with(TOOL_RESPONSE_OPEN) => ("user", message.content.clone()),
                Role::Tool => (
                    "user",
                    format!("{TOOL_RESPONSE_OPEN}\n{}\n{TOOL_RESPONSE_CLOSE}", message.content),
                ),
            };
            prompt.push_str(&format!("{IM_START}{role}\n{content}{IM_END}\n"));
        }

        prompt.push_str(&format!("{IM_START}assistant\n"));
        prompt
    }

    fn build_payload(request: &ProviderRequest) -> serde_json::Value {
        let mut stop = vec![IM_END.to_string()];
        stop.extend(request.stop.iter().cloned());

        let mut parameters = serde_json::json!({
            "temperature": request.temperature,
            "top_p": request.top_p,
            "do_sample": true,
            "stop_sequences": stop,
        });
        if let Some(max_tokens) = request.max_tokens {
            parameters["max_new_tokens"] = serde_json::json!(max_tokens);
        }
        if let Some(penalty) = request.presence_penalty {
            parameters["repetition_penalty"] = serde_json::json!(penalty);
        }

        serde_json::json!({
            "inputs": Self::render_prompt(&request.messages, &request.tools),
            "parameters": parameters,
        })
    }

    /// Accepts `{"generated_text": ..}` or a list of those; the text may
    /// itself be a string or a list of strings.
    fn extract_text(body: &serde_json::Value) -> Result<String, ProviderError> {
        let item = match body {
            serde_json::Value::Array(items) => items.first(),
            other => Some(other),
        };
        let generated = item
            .and_then(|i| i.get("generated_text"))
            .ok_or_else(|| ProviderError::MalformedResponse("missing generated_text".into()))?;
        let text = match generated {
            serde_json::Value::String(s) => Some(s.as_str()),
            serde_json::Value::Array(parts) => parts.first().and_then(|p| p.as_str()),
            _ => None,
        };
        text.map(|t| t.trim_end_matches(IM_END).to_string())
            .ok_or_else(|| ProviderError::MalformedResponse("generated_text is not text".into()))
    }
}

#[async_trait]
impl Provider for TextCompletionProvider {
    fn name(&self) -> &str {
        "text"
    }

    async fn complete(
        &self,
        request: ProviderRequest,
    ) -> std::result::Result<ProviderResponse, ProviderError> {
        let payload = Self::build_payload(&request);

        debug!(
            endpoint = %self.endpoint,
            model = %request.model,
            messages = request.messages.len(),
            "Sending generation request"
        );

        let response = self
            .client
            .post(&self.endpoint)
            .header("Content-Type", "application/json")
            .json(&payload)
            .send()
            .await
            .map_err(transport_error)?;

        if !response.status().is_success() {
            return Err(error_for_response("text", response).await);
        }

        // Some servers mislabel the content type, so parse from text.
        let raw = response.text().await.map_err(transport_error)?;
        let body: serde_json::Value = serde_json::from_str(&raw)
            .map_err(|e| ProviderError::MalformedResponse(format!("Failed to parse response: {e}")))?;

        Ok(ProviderResponse {
            message: Message::assistant(Self::extract_text(&body)?),
            usage: None,
            model: request.model,
        })
    }
}
