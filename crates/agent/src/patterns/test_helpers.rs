//! Shared test helpers for pattern tests.

use async_trait::async_trait;
use deepreact_core::error::{ProviderError, ToolError};
use deepreact_core::message::Message;
use deepreact_core::provider::{
    Provider, ProviderCapabilities, ProviderRequest, ProviderResponse, Usage,
};
use deepreact_core::retry::RetryPolicy;
use deepreact_core::tool::{Tool, ToolCall, ToolOutput, ToolRegistry};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

type Scripted = Result<ProviderResponse, ProviderError>;

/// A mock provider that replays scripted responses.
///
/// Each call to `complete` pops the next entry; once the queue is empty
/// the `fallback` entry (if any) is returned forever. Every request is
/// recorded for inspection.
pub struct ScriptedProvider {
    queue: Mutex<VecDeque<Scripted>>,
    fallback: Option<Scripted>,
    native: bool,
    delay: Option<Duration>,
    calls: AtomicUsize,
    running: AtomicUsize,
    peak: AtomicUsize,
    requests: Mutex<Vec<ProviderRequest>>,
}

impl ScriptedProvider {
    pub fn new(script: Vec<Scripted>) -> Self {
        Self {
            queue: Mutex::new(script.into()),
            fallback: None,
            native: false,
            delay: None,
            calls: AtomicUsize::new(0),
            running: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Replies with the given texts in order.
    pub fn texts(texts: &[&str]) -> Self {
        Self::new(texts.iter().map(|t| Ok(text_response(t))).collect())
    }

    /// Replies with the same text on every call.
    pub fn repeating(text: &str) -> Self {
        Self::new(Vec::new()).with_fallback(Ok(text_response(text)))
    }

    /// Fails every call with `error`.
    pub fn failing(error: ProviderError) -> Self {
        Self::new(Vec::new()).with_fallback(Err(error))
    }

    pub fn with_fallback(mut self, fallback: Scripted) -> Self {
        self.fallback = Some(fallback);
        self
    }

    pub fn native(mut self) -> Self {
        self.native = true;
        self
    }

    /// Sleep this long inside every call (tracks peak concurrency).
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn peak_concurrency(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> Vec<ProviderRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl Provider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    fn capabilities(&self) -> ProviderCapabilities {
        ProviderCapabilities {
            native_tool_calls: self.native,
        }
    }

    async fn complete(&self, request: ProviderRequest) -> Result<ProviderResponse, ProviderError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().unwrap().push(request);

        if let Some(delay) = self.delay {
            let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(delay).await;
            self.running.fetch_sub(1, Ordering::SeqCst);
        }

        let next = self.queue.lock().unwrap().pop_front();
        match next.or_else(|| self.fallback.clone()) {
            Some(scripted) => scripted,
            None => panic!("ScriptedProvider: no response for call #{call}"),
        }
    }
}

/// A provider that panics on every call.
pub struct PanickingProvider;

#[async_trait]
impl Provider for PanickingProvider {
    fn name(&self) -> &str {
        "panicking"
    }

    async fn complete(&self, _request: ProviderRequest) -> Result<ProviderResponse, ProviderError> {
        panic!("scripted panic");
    }
}

/// A plain text turn.
pub fn text_response(text: &str) -> ProviderResponse {
    ProviderResponse {
        message: Message::assistant(text),
        usage: Some(Usage {
            prompt_tokens: 10,
            completion_tokens: 5,
            total_tokens: 15,
        }),
        model: "mock-model".into(),
    }
}

/// A turn carrying structured (native) tool calls.
pub fn native_response(content: &str, calls: Vec<ToolCall>) -> ProviderResponse {
    ProviderResponse {
        message: Message::assistant(content).with_tool_calls(calls),
        usage: None,
        model: "mock-model".into(),
    }
}

/// `<tool_call>` markup for one call.
pub fn call_markup(name: &str, arguments: serde_json::Value) -> String {
    format!(
        "<tool_call>\n{}\n</tool_call>",
        serde_json::json!({"name": name, "arguments": arguments})
    )
}

/// Echoes its `text` argument and counts invocations.
#[derive(Default)]
pub struct EchoTool {
    pub calls: Arc<AtomicUsize>,
}

#[async_trait]
impl Tool for EchoTool {
    fn name(&self) -> &str {
        "echo"
    }

    fn description(&self) -> &str {
        "Echo the input back"
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({"type": "object", "properties": {"text": {"type": "string"}}})
    }

    async fn execute(&self, arguments: serde_json::Value) -> Result<ToolOutput, ToolError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let text = arguments["text"].as_str().unwrap_or_default();
        Ok(ToolOutput::ok(format!("echo: {text}")))
    }
}

/// Sleeps for `millis` from its arguments, then returns its label.
pub struct SleepTool;

#[async_trait]
impl Tool for SleepTool {
    fn name(&self) -> &str {
        "sleep"
    }

    fn description(&self) -> &str {
        "Wait, then answer"
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({"type": "object"})
    }

    async fn execute(&self, arguments: serde_json::Value) -> Result<ToolOutput, ToolError> {
        let millis = arguments["millis"].as_u64().unwrap_or(0);
        tokio::time::sleep(Duration::from_millis(millis)).await;
        Ok(ToolOutput::ok(arguments["label"].as_str().unwrap_or_default().to_string()))
    }
}

/// Fails with a network error `failures` times, then succeeds.
pub struct FlakyTool {
    failures: AtomicU32,
}

impl FlakyTool {
    pub fn new(failures: u32) -> Self {
        Self { failures: AtomicU32::new(failures) }
    }
}

#[async_trait]
impl Tool for FlakyTool {
    fn name(&self) -> &str {
        "flaky"
    }

    fn description(&self) -> &str {
        "Sometimes fails"
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({"type": "object"})
    }

    async fn execute(&self, _arguments: serde_json::Value) -> Result<ToolOutput, ToolError> {
        let left = self.failures.load(Ordering::SeqCst);
        if left > 0 {
            self.failures.store(left - 1, Ordering::SeqCst);
            return Err(ToolError::Network {
                tool_name: "flaky".into(),
                reason: "connection reset".into(),
            });
        }
        Ok(ToolOutput::ok("recovered"))
    }
}

/// Always rejects its arguments.
pub struct BrokenTool;

#[async_trait]
impl Tool for BrokenTool {
    fn name(&self) -> &str {
        "broken"
    }

    fn description(&self) -> &str {
        "Never works"
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({"type": "object"})
    }

    async fn execute(&self, _arguments: serde_json::Value) -> Result<ToolOutput, ToolError> {
        Err(ToolError::InvalidArguments("bad input".into()))
    }
}

pub fn registry(tools: Vec<Box<dyn Tool>>) -> Arc<ToolRegistry> {
    let mut registry = ToolRegistry::new();
    for tool in tools {
        registry.register(tool);
    }
    Arc::new(registry)
}

/// Retries with short, deterministic delays.
pub fn fast_retry(max_retries: u32) -> RetryPolicy {
    RetryPolicy::new(max_retries)
        .with_base_delay(Duration::from_millis(10))
        .with_max_delay(Duration::from_millis(100))
        .with_jitter(Duration::ZERO)
}
