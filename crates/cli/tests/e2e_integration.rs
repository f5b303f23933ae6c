//! End-to-end integration tests for the DeepReact agent loop.
//!
//! These drive full rollouts from task to outcome: prompt assembly,
//! protocol parsing, tool execution through the registry, compaction,
//! budgets and multi-rollout coordination.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use deepreact_agent::{OMITTED_TOOL_RESPONSE, ReactAgent, RolloutCoordinator};
use deepreact_config::AppConfig;
use deepreact_core::error::{ProviderError, ToolError};
use deepreact_core::message::{Message, Role};
use deepreact_core::provider::{GenerationParams, Provider, ProviderRequest, ProviderResponse, Usage};
use deepreact_core::retry::RetryPolicy;
use deepreact_core::rollout::{RolloutOutcome, RolloutTask, TerminationReason};
use deepreact_core::tool::{Tool, ToolOutput, ToolRegistry};

// ── Mock Provider ────────────────────────────────────────────────────────

/// A mock provider that returns scripted turns in sequence, then repeats
/// the last one.
struct ScriptedProvider {
    turns: Vec<String>,
    call_count: AtomicUsize,
}

impl ScriptedProvider {
    fn new(turns: &[&str]) -> Self {
        Self {
            turns: turns.iter().map(|t| t.to_string()).collect(),
            call_count: AtomicUsize::new(0),
        }
    }

    fn calls(&self) -> usize {
        self.call_count.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl Provider for ScriptedProvider {
    fn name(&self) -> &str {
        "e2e_mock"
    }

    async fn complete(&self, _request: ProviderRequest) -> Result<ProviderResponse, ProviderError> {
        let n = self.call_count.fetch_add(1, Ordering::SeqCst);
        let text = self
            .turns
            .get(n)
            .or_else(|| self.turns.last())
            .expect("ScriptedProvider has no turns");
        Ok(ProviderResponse {
            message: Message::assistant(text.as_str()),
            usage: Some(Usage {
                prompt_tokens: 10,
                completion_tokens: 5,
                total_tokens: 15,
            }),
            model: "e2e-model".into(),
        })
    }
}

// ── Mock Tool ────────────────────────────────────────────────────────────

struct EchoTool {
    invocations: Arc<AtomicUsize>,
}

#[async_trait::async_trait]
impl Tool for EchoTool {
    fn name(&self) -> &str {
        "echo"
    }

    fn description(&self) -> &str {
        "Echo the input text"
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {"text": {"type": "string"}},
            "required": ["text"]
        })
    }

    async fn execute(&self, arguments: serde_json::Value) -> Result<ToolOutput, ToolError> {
        self.invocations.fetch_add(1, Ordering::SeqCst);
        let text = arguments["text"]
            .as_str()
            .ok_or_else(|| ToolError::InvalidArguments("text is required".into()))?;
        Ok(ToolOutput::ok(text))
    }
}

// ── Helpers ──────────────────────────────────────────────────────────────

const ECHO_X: &str = "I will echo.\n<tool_call>\n{\"name\": \"echo\", \"arguments\": {\"text\": \"x\"}}\n</tool_call>";

fn echo_agent(provider: Arc<ScriptedProvider>) -> (ReactAgent, Arc<AtomicUsize>) {
    let invocations = Arc::new(AtomicUsize::new(0));
    let mut registry = ToolRegistry::new();
    registry.register(Box::new(EchoTool {
        invocations: invocations.clone(),
    }));
    let agent = ReactAgent::new(provider, Arc::new(registry), GenerationParams::new("e2e-model"))
        .with_model_retry(RetryPolicy::none())
        .with_tool_retry(RetryPolicy::none());
    (agent, invocations)
}

fn tool_messages(outcome: &RolloutOutcome) -> Vec<&Message> {
    outcome
        .conversation
        .messages
        .iter()
        .filter(|m| m.role == Role::Tool)
        .collect()
}

// ═══════════════════════════════════════════════════════════════════════
// Loop driver
// ═══════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn e2e_round_limit_after_three_echo_rounds() {
    let provider = Arc::new(ScriptedProvider::new(&[ECHO_X]));
    let (agent, invocations) = echo_agent(provider.clone());
    let task = RolloutTask::new("Keep echoing").unwrap().with_max_rounds(3);

    let outcome = agent.run(&task, 0).await;

    assert_eq!(outcome.termination_reason, TerminationReason::RoundLimit);
    assert_eq!(invocations.load(Ordering::SeqCst), 3);
    assert_eq!(provider.calls(), 3);

    let roles: Vec<Role> = outcome.conversation.messages.iter().map(|m| m.role).collect();
    assert_eq!(
        roles,
        vec![
            Role::System,
            Role::User,
            Role::Assistant,
            Role::Tool,
            Role::Assistant,
            Role::Tool,
            Role::Assistant,
            Role::Tool,
        ]
    );
    assert_eq!(outcome.conversation.messages[2].content, "I will echo.");
    assert!(tool_messages(&outcome).iter().all(|m| m.content.contains('x') && !m.is_error));
}

#[tokio::test]
async fn e2e_compaction_keeps_only_newest_tool_response() {
    let provider = Arc::new(ScriptedProvider::new(&[
        ECHO_X,
        ECHO_X,
        ECHO_X,
        ECHO_X,
        "<think>enough</think>\n<answer>x</answer>",
    ]));
    let (agent, _) = echo_agent(provider);
    let task = RolloutTask::new("Echo four times").unwrap().with_keep_tool_rounds(1);

    let outcome = agent.run(&task, 0).await;

    assert_eq!(outcome.termination_reason, TerminationReason::Answer);
    assert_eq!(outcome.answer.as_deref(), Some("x"));
    let tools = tool_messages(&outcome);
    assert_eq!(tools.len(), 4);
    assert!(tools[..3].iter().all(|m| m.content == OMITTED_TOOL_RESPONSE));
    assert_eq!(tools[3].content, "<tool_response>\nx\n</tool_response>");
    // Call ids survive compaction.
    assert!(tools.iter().all(|m| m.tool_call_id.is_some()));
}

#[tokio::test]
async fn e2e_unknown_tool_is_reported_and_loop_continues() {
    let provider = Arc::new(ScriptedProvider::new(&[
        "<tool_call>\n{\"name\": \"foo\", \"arguments\": {}}\n</tool_call>",
        "<answer>gave up on foo</answer>",
    ]));
    let (agent, invocations) = echo_agent(provider.clone());

    let outcome = agent.run(&RolloutTask::new("Use foo").unwrap(), 0).await;

    let tools = tool_messages(&outcome);
    assert_eq!(tools.len(), 1);
    assert!(tools[0].is_error);
    assert!(tools[0].content.contains("Tool 'foo' is not available"));
    assert_eq!(invocations.load(Ordering::SeqCst), 0);
    assert_eq!(provider.calls(), 2);
    assert_eq!(outcome.termination_reason, TerminationReason::Answer);
    assert_eq!(outcome.answer.as_deref(), Some("gave up on foo"));
}

#[tokio::test]
async fn e2e_builtin_tool_runs_through_registry() {
    let mut config = AppConfig::default();
    config.tools.enabled = vec!["fetch_url".into()];
    let registry = deepreact_tools::default_registry(&config.tools);
    assert_eq!(registry.names(), vec!["fetch_url"]);

    let provider = Arc::new(ScriptedProvider::new(&[
        "<tool_call>\n{\"name\": \"fetch_url\", \"arguments\": {\"url\": \"ftp://example.com/file\"}}\n</tool_call>",
        "<answer>could not fetch</answer>",
    ]));
    let agent = ReactAgent::new(provider, Arc::new(registry), config.provider.generation_params())
        .with_model_retry(RetryPolicy::none())
        .with_tool_retry(RetryPolicy::none());

    let outcome = agent.run(&RolloutTask::new("Fetch it").unwrap(), 0).await;

    let tools = tool_messages(&outcome);
    assert!(tools[0].is_error);
    assert!(tools[0].content.contains("[fetch_url] Failed to fetch content from ftp://example.com/file"));
    assert!(outcome.tools_invoked.contains("fetch_url"));
    assert!(outcome.conversation.messages[0].content.contains("\"name\":\"fetch_url\""));
}

// ═══════════════════════════════════════════════════════════════════════
// Configuration → rollouts
// ═══════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn e2e_configured_limits_drive_coordinated_rollouts() {
    let config: AppConfig = toml::from_str(
        r#"
        [agent]
        max_rounds = 2
        rollouts = 3
        rollout_concurrency = 2
        "#,
    )
    .unwrap();
    config.validate().unwrap();

    let provider = Arc::new(ScriptedProvider::new(&[ECHO_X]));
    let (agent, invocations) = echo_agent(provider);
    let coordinator = RolloutCoordinator::new(Arc::new(agent), config.agent.rollout_concurrency).unwrap();
    let task = config.agent.task("Echo until stopped").unwrap();

    let outcomes = coordinator.run(&task, config.agent.rollouts).await.unwrap();

    assert_eq!(outcomes.len(), 3);
    for (i, outcome) in outcomes.iter().enumerate() {
        assert_eq!(outcome.rollout_index, i);
        assert_eq!(outcome.termination_reason, TerminationReason::RoundLimit);
        assert_eq!(outcome.rounds, 2);
        assert_eq!(outcome.conversation.len(), 6);
    }
    assert_eq!(invocations.load(Ordering::SeqCst), 6);
}
