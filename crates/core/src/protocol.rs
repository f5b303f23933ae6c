//! The text tool-call protocol.
//!
//! Models without native function calling embed invocations in their output:
//!
//! ```text
//! <think>I should look this up.</think>
//! <tool_call>
//! {"name": "search", "arguments": {"query": ["rust async"]}}
//! </tool_call>
//! ```
//!
//! [`ProtocolAdapter`] turns such output into structured [`ToolCall`]s plus
//! the remaining display text, and renders [`ToolResult`]s back into
//! conversation messages in the format the backend expects. Backends with
//! native tool calling hand over structured calls directly; the adapter
//! passes those through and only cleans the text.

use chrono::Utc;
use serde_json::Value;
use tracing::debug;

use crate::error::ProtocolParseError;
use crate::message::Message;
use crate::provider::ProviderCapabilities;
use crate::tool::{ToolCall, ToolResult};

pub const TOOL_CALL_OPEN: &str = "<tool_call>";
pub const TOOL_CALL_CLOSE: &str = "</tool_call>";
pub const TOOL_RESPONSE_OPEN: &str = "<tool_response>";
pub const TOOL_RESPONSE_CLOSE: &str = "</tool_response>";
pub const ANSWER_OPEN: &str = "<answer>";
pub const ANSWER_CLOSE: &str = "</answer>";
pub const THINK_OPEN: &str = "<think>";
pub const THINK_CLOSE: &str = "</think>";
pub const CODE_OPEN: &str = "<code>";
pub const CODE_CLOSE: &str = "</code>";

/// Prefix that marks a failed tool result in its rendered content.
pub const ERROR_PREFIX: &str = "Error: ";

/// Stop sequences for text-protocol backends, so the model does not write
/// its own tool responses.
pub fn text_stop_sequences() -> Vec<String> {
    vec![format!("\n{TOOL_RESPONSE_OPEN}"), TOOL_RESPONSE_OPEN.to_string()]
}

/// One delimiter span found in model output.
#[derive(Debug, Clone, PartialEq)]
pub enum ParsedSegment {
    Call(ToolCall),
    ParseError(ProtocolParseError),
}

/// The adapter's view of one model turn.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParsedOutput {
    /// Output with every `<tool_call>` span removed
    pub display_text: String,
    /// Well-formed calls, in the order they appeared
    pub tool_calls: Vec<ToolCall>,
    /// Spans that could not be parsed
    pub errors: Vec<ProtocolParseError>,
    /// Reasoning trace, when one was present
    pub reasoning: Option<String>,
}

impl ParsedOutput {
    /// Whether the turn contained any tool-call span, valid or not.
    pub fn has_spans(&self) -> bool {
        !self.tool_calls.is_empty() || !self.errors.is_empty()
    }

    /// The final answer: the `<answer>` body if marked, else the display text.
    pub fn final_answer(&self) -> Option<String> {
        extract_answer(&self.display_text).or_else(|| {
            let text = self.display_text.trim();
            (!text.is_empty()).then(|| text.to_string())
        })
    }
}

/// How tool results are written back into the conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseFormat {
    /// `<tool_response>` wrapped, for text-protocol backends
    Tagged,
    /// Bare content in a tool-role message, for native tool calling
    Plain,
}

impl ResponseFormat {
    pub fn for_capabilities(capabilities: ProviderCapabilities) -> Self {
        if capabilities.native_tool_calls { Self::Plain } else { Self::Tagged }
    }
}

/// Result messages for one round, plus anything that did not match a call.
#[derive(Debug, Default)]
pub struct RenderedResults {
    pub messages: Vec<Message>,
    /// Results whose call id matched no outstanding call
    pub rejected: Vec<ToolResult>,
}

/// Stateful per-rollout adapter. Holds the call counter used for ids.
#[derive(Debug)]
pub struct ProtocolAdapter {
    format: ResponseFormat,
    issued: u64,
}

impl ProtocolAdapter {
    pub fn new(format: ResponseFormat) -> Self {
        Self { format, issued: 0 }
    }

    pub fn format(&self) -> ResponseFormat {
        self.format
    }

    /// Number of call ids issued so far.
    pub fn issued(&self) -> u64 {
        self.issued
    }

    fn next_call_id(&mut self) -> String {
        let id = format!("call_{}_{}", self.issued, Utc::now().timestamp_millis());
        self.issued += 1;
        id
    }

    /// Split raw output into display text and delimiter segments.
    pub fn segments(&mut self, raw: &str) -> (String, Vec<ParsedSegment>) {
        let mut display = String::new();
        let mut segments = Vec::new();
        let mut rest = raw;

        while let Some(start) = rest.find(TOOL_CALL_OPEN) {
            display.push_str(&rest[..start]);
            let after_tag = &rest[start + TOOL_CALL_OPEN.len()..];
            match after_tag.find(TOOL_CALL_CLOSE) {
                Some(end) => {
                    segments.push(self.parse_body(&after_tag[..end]));
                    rest = &after_tag[end + TOOL_CALL_CLOSE.len()..];
                }
                None => {
                    segments.push(ParsedSegment::ParseError(ProtocolParseError::Unterminated {
                        fragment: after_tag.trim().to_string(),
                    }));
                    rest = "";
                }
            }
        }

        if segments.is_empty() {
            return (raw.to_string(), segments);
        }
        display.push_str(rest);
        (display.trim().to_string(), segments)
    }

    /// Parse a text-protocol turn.
    pub fn parse_model_output(&mut self, raw: &str) -> ParsedOutput {
        let (display_text, segments) = self.segments(raw);
        let mut output = ParsedOutput {
            reasoning: extract_reasoning(raw),
            display_text,
            ..Default::default()
        };
        for segment in segments {
            match segment {
                ParsedSegment::Call(call) => output.tool_calls.push(call),
                ParsedSegment::ParseError(err) => {
                    debug!(error = %err, "Dropping malformed tool call");
                    output.errors.push(err);
                }
            }
        }
        output
    }

    /// Adopt calls a native backend already structured.
    ///
    /// Ids are kept as given; only a missing id is filled in. Any markup the
    /// model echoed into its text is stripped and not parsed again.
    pub fn adopt_structured(&mut self, content: &str, calls: Vec<ToolCall>) -> ParsedOutput {
        let tool_calls = calls
            .into_iter()
            .map(|mut call| {
                if call.id.is_empty() {
                    call.id = self.next_call_id();
                }
                call
            })
            .collect();
        ParsedOutput {
            display_text: strip_call_markup(content),
            tool_calls,
            errors: Vec::new(),
            reasoning: extract_reasoning(content),
        }
    }

    fn parse_body(&mut self, body: &str) -> ParsedSegment {
        let (json_part, code) = match body.find(CODE_OPEN) {
            Some(pos) => {
                let after = &body[pos + CODE_OPEN.len()..];
                let code = after.find(CODE_CLOSE).map_or(after, |end| &after[..end]);
                (&body[..pos], Some(code.trim().to_string()))
            }
            None => (body, None),
        };
        let fragment = json_part.trim();

        let value: Value = match serde_json::from_str(fragment) {
            Ok(v) => v,
            Err(e) => {
                return ParsedSegment::ParseError(ProtocolParseError::InvalidJson {
                    reason: e.to_string(),
                    fragment: fragment.to_string(),
                });
            }
        };

        let name = match value.get("name").and_then(Value::as_str) {
            Some(n) if !n.trim().is_empty() => n.trim().to_string(),
            _ => {
                return ParsedSegment::ParseError(ProtocolParseError::MissingName {
                    fragment: fragment.to_string(),
                });
            }
        };

        let mut arguments = match value.get("arguments") {
            None | Some(Value::Null) => Value::Object(Default::default()),
            Some(Value::Object(map)) => Value::Object(map.clone()),
            Some(Value::String(s)) => match serde_json::from_str::<Value>(s) {
                Ok(Value::Object(map)) => Value::Object(map),
                _ => {
                    return ParsedSegment::ParseError(ProtocolParseError::InvalidArguments {
                        fragment: fragment.to_string(),
                    });
                }
            },
            Some(_) => {
                return ParsedSegment::ParseError(ProtocolParseError::InvalidArguments {
                    fragment: fragment.to_string(),
                });
            }
        };

        if let Some(code) = code
            && let Value::Object(map) = &mut arguments
        {
            map.insert("code".into(), Value::String(code));
        }

        ParsedSegment::Call(ToolCall::new(self.next_call_id(), name, arguments))
    }

    /// Render one tool result as a conversation message.
    pub fn render_tool_result(&self, result: &ToolResult) -> Message {
        let body = if result.is_error && !result.content.starts_with(ERROR_PREFIX) {
            format!("{ERROR_PREFIX}{}", result.content)
        } else {
            result.content.clone()
        };
        let content = match self.format {
            ResponseFormat::Tagged => format!("{TOOL_RESPONSE_OPEN}\n{body}\n{TOOL_RESPONSE_CLOSE}"),
            ResponseFormat::Plain => body,
        };
        Message::tool_result(&result.call_id, content).with_error(result.is_error)
    }

    /// Render a round's results in call order.
    ///
    /// Every outstanding call gets exactly one message. A call with no
    /// matching result gets a synthetic error; results matching no call are
    /// returned as rejected.
    pub fn render_round(&self, outstanding: &[ToolCall], results: Vec<ToolResult>) -> RenderedResults {
        let mut pending: Vec<Option<ToolResult>> = results.into_iter().map(Some).collect();
        let mut messages = Vec::with_capacity(outstanding.len());

        for call in outstanding {
            let found = pending
                .iter_mut()
                .find(|slot| slot.as_ref().is_some_and(|r| r.call_id == call.id))
                .and_then(Option::take);
            let result = found.unwrap_or_else(|| {
                ToolResult::error(&call.id, format!("No result was produced for tool '{}'", call.name))
            });
            messages.push(self.render_tool_result(&result));
        }

        RenderedResults {
            messages,
            rejected: pending.into_iter().flatten().collect(),
        }
    }

    /// Feedback for a turn whose tool calls could not be parsed.
    pub fn render_parse_feedback(&self, errors: &[ProtocolParseError]) -> Message {
        let details: Vec<String> = errors.iter().map(|e| e.to_string()).collect();
        let body = format!(
            "{ERROR_PREFIX}{}\nA tool call must be a JSON object with a \"name\" string and an \"arguments\" object, wrapped in {TOOL_CALL_OPEN}{TOOL_CALL_CLOSE}.",
            details.join("\n")
        );
        Message::user(format!("{TOOL_RESPONSE_OPEN}\n{body}\n{TOOL_RESPONSE_CLOSE}"))
    }
}

/// Serialize one call back to markup.
pub fn render_call_markup(call: &ToolCall) -> String {
    let body = serde_json::json!({ "name": call.name, "arguments": call.arguments });
    format!("{TOOL_CALL_OPEN}\n{body}\n{TOOL_CALL_CLOSE}")
}

/// An assistant message as a text-protocol backend would have written it.
pub fn render_assistant_text(message: &Message) -> String {
    let mut parts = Vec::with_capacity(message.tool_calls.len() + 1);
    if !message.content.is_empty() {
        parts.push(message.content.clone());
    }
    parts.extend(message.tool_calls.iter().map(render_call_markup));
    parts.join("\n")
}

/// Cut raw output at a `<tool_response>` the model wrote itself.
pub fn truncate_at_observation(raw: &str) -> &str {
    raw.find(TOOL_RESPONSE_OPEN).map_or(raw, |pos| &raw[..pos])
}

fn between<'a>(text: &'a str, open: &str, close: &str) -> Option<&'a str> {
    let start = text.find(open)? + open.len();
    let end = text[start..].find(close)? + start;
    Some(&text[start..end])
}

/// The body of the first `<answer>` block.
pub fn extract_answer(text: &str) -> Option<String> {
    between(text, ANSWER_OPEN, ANSWER_CLOSE).map(|a| a.trim().to_string())
}

/// The body of the first `<think>` block.
pub fn extract_reasoning(text: &str) -> Option<String> {
    between(text, THINK_OPEN, THINK_CLOSE)
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
}

/// Remove every complete `<tool_call>` span without parsing it.
pub fn strip_call_markup(text: &str) -> String {
    let mut out = String::new();
    let mut rest = text;
    let mut stripped = false;
    while let Some(start) = rest.find(TOOL_CALL_OPEN) {
        let after_tag = &rest[start + TOOL_CALL_OPEN.len()..];
        let Some(end) = after_tag.find(TOOL_CALL_CLOSE) else { break };
        out.push_str(&rest[..start]);
        rest = &after_tag[end + TOOL_CALL_CLOSE.len()..];
        stripped = true;
    }
    if !stripped {
        return text.to_string();
    }
    out.push_str(rest);
    out.trim().to_string()
}
