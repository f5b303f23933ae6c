//! ReAct loop driver: reason, act, observe, until a stop condition.
//!
//! One call to [`ReactAgent::run`] drives one rollout through an explicit
//! state machine:
//!
//! ```text
//! AwaitingModelTurn ──▶ ParsingResponse ──▶ DispatchingTools ──▶ AwaitingToolResults
//!        ▲                    │                                          │
//!        │                    ▼                                          ▼
//!        └────────────── EvaluatingTermination ◀─────────────────────────┘
//!                             │
//!                             ▼
//!                        Terminated(reason)
//! ```
//!
//! - Before every model turn the conversation is compacted, and the model
//!   is called through the retry controller. Exhausted retries end the
//!   rollout with `model-unavailable`.
//! - A turn without any `<tool_call>` span is the final answer.
//! - Tool calls of one round run concurrently on the tool pool, each
//!   through the retry controller; results go back in call order.
//! - Round, model-call and wall-clock budgets are checked between rounds
//!   (and once before the first turn). They are cooperative: in-flight
//!   calls always finish.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use deepreact_core::error::{ProviderError, ToolError};
use deepreact_core::event::{DomainEvent, EventBus};
use deepreact_core::message::{Conversation, Message};
use deepreact_core::protocol::{
    self, ParsedOutput, ProtocolAdapter, ResponseFormat, extract_answer, truncate_at_observation,
};
use deepreact_core::provider::{GenerationParams, Provider, ProviderRequest, ProviderResponse, ToolDefinition};
use deepreact_core::retry::RetryPolicy;
use deepreact_core::rollout::{RolloutOutcome, RolloutTask, TerminationReason};
use deepreact_core::tool::{ToolCall, ToolOutput, ToolRegistry, ToolResult};
use futures::future::join_all;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::context::{compact, estimate_messages_tokens, estimate_tools_tokens};
use crate::pool::WorkerPool;
use crate::prompt::{self, FINAL_ANSWER_REQUEST};

/// The loop driver. Shareable across rollouts; all per-rollout state lives
/// inside [`ReactAgent::run`].
pub struct ReactAgent {
    provider: Arc<dyn Provider>,
    tools: Arc<ToolRegistry>,
    params: GenerationParams,
    /// Replaces the built-in system prompt when set
    system_prompt: Option<String>,
    /// Shared by every rollout driven by this agent
    tool_pool: WorkerPool,
    model_retry: RetryPolicy,
    tool_retry: RetryPolicy,
    event_bus: Option<Arc<EventBus>>,
    max_context_tokens: Option<usize>,
    max_duration: Option<Duration>,
}

/// Where the driver is within a round.
enum LoopState {
    AwaitingModelTurn,
    ParsingResponse(ProviderResponse),
    DispatchingTools(Vec<ToolCall>),
    AwaitingToolResults(Vec<(ToolCall, Dispatch)>),
    EvaluatingTermination,
    Terminated(TerminationReason),
}

/// A call after dispatch: running on the pool, or answered without running.
enum Dispatch {
    Running(JoinHandle<ToolRun>),
    Rejected(ToolResult),
}

/// What came back from one executed tool call.
struct ToolRun {
    result: Result<ToolOutput, ToolError>,
    attempts: u32,
    duration_ms: u64,
}

/// Mutable state of one rollout.
struct RolloutState {
    index: usize,
    conversation: Conversation,
    adapter: ProtocolAdapter,
    rounds: u32,
    model_calls: u32,
    parse_errors: usize,
    tools_invoked: BTreeSet<String>,
    answer: Option<String>,
    /// Parse-error feedback to append once the round's results are in
    pending_feedback: Option<Message>,
    /// The context budget ran out and the final-answer request was sent
    forced_final: bool,
    started: Instant,
}

impl ReactAgent {
    /// Create a driver with unbounded tool concurrency and default retries.
    pub fn new(provider: Arc<dyn Provider>, tools: Arc<ToolRegistry>, params: GenerationParams) -> Self {
        Self {
            provider,
            tools,
            params,
            system_prompt: None,
            tool_pool: WorkerPool::unbounded(),
            model_retry: RetryPolicy::default(),
            tool_retry: RetryPolicy::new(2),
            event_bus: None,
            max_context_tokens: None,
            max_duration: None,
        }
    }

    pub fn with_system_prompt(mut self, prompt: Option<String>) -> Self {
        self.system_prompt = prompt;
        self
    }

    /// Bound the number of tool calls running at once (`None` = unbounded).
    pub fn with_tool_concurrency(mut self, limit: Option<usize>) -> Self {
        self.tool_pool = WorkerPool::from_limit(limit);
        self
    }

    pub fn with_model_retry(mut self, policy: RetryPolicy) -> Self {
        self.model_retry = policy;
        self
    }

    pub fn with_tool_retry(mut self, policy: RetryPolicy) -> Self {
        self.tool_retry = policy;
        self
    }

    pub fn with_event_bus(mut self, bus: Arc<EventBus>) -> Self {
        self.event_bus = Some(bus);
        self
    }

    pub fn with_max_context_tokens(mut self, limit: Option<usize>) -> Self {
        self.max_context_tokens = limit;
        self
    }

    pub fn with_max_duration(mut self, limit: Option<Duration>) -> Self {
        self.max_duration = limit;
        self
    }

    pub fn provider_name(&self) -> &str {
        self.provider.name()
    }

    fn format(&self) -> ResponseFormat {
        ResponseFormat::for_capabilities(self.provider.capabilities())
    }

    fn publish(&self, event: DomainEvent) {
        if let Some(bus) = &self.event_bus {
            bus.publish(event);
        }
    }

    /// Drive one rollout of `task` to a terminal state.
    ///
    /// Never fails: expected failure modes end up as the outcome's
    /// termination reason.
    pub async fn run(&self, task: &RolloutTask, rollout_index: usize) -> RolloutOutcome {
        let format = self.format();
        let definitions = self.tools.definitions();
        let system = prompt::system_prompt(
            self.system_prompt.as_deref(),
            &definitions,
            format,
            Utc::now().date_naive(),
        );

        let mut rollout = RolloutState {
            index: rollout_index,
            conversation: Conversation::seeded(system, task.query()),
            adapter: ProtocolAdapter::new(format),
            rounds: 0,
            model_calls: 0,
            parse_errors: 0,
            tools_invoked: BTreeSet::new(),
            answer: None,
            pending_feedback: None,
            forced_final: false,
            started: Instant::now(),
        };

        info!(
            rollout = rollout_index,
            provider = self.provider.name(),
            model = %self.params.model,
            max_rounds = task.max_rounds(),
            max_model_calls = task.max_model_calls(),
            "Rollout starting"
        );

        let mut state = match self.budget_exhausted(task, &rollout) {
            Some(reason) => LoopState::Terminated(reason),
            None => LoopState::AwaitingModelTurn,
        };

        let reason = loop {
            state = match state {
                LoopState::AwaitingModelTurn => self.model_turn(task, &mut rollout, &definitions).await,
                LoopState::ParsingResponse(response) => self.parse_response(&mut rollout, response),
                LoopState::DispatchingTools(calls) => self.dispatch(&rollout, calls),
                LoopState::AwaitingToolResults(dispatched) => self.collect_results(&mut rollout, dispatched).await,
                LoopState::EvaluatingTermination => {
                    rollout.rounds += 1;
                    match self.budget_exhausted(task, &rollout) {
                        Some(reason) => LoopState::Terminated(reason),
                        None => LoopState::AwaitingModelTurn,
                    }
                }
                LoopState::Terminated(reason) => break reason,
            };
        };

        self.finish(rollout, reason)
    }

    /// Round limit wins over call limit, which wins over the clock.
    fn budget_exhausted(&self, task: &RolloutTask, rollout: &RolloutState) -> Option<TerminationReason> {
        if rollout.rounds >= task.max_rounds() {
            return Some(TerminationReason::RoundLimit);
        }
        if rollout.model_calls >= task.max_model_calls() {
            return Some(TerminationReason::CallLimit);
        }
        if let Some(limit) = self.max_duration
            && rollout.started.elapsed() >= limit
        {
            return Some(TerminationReason::TimeLimit);
        }
        None
    }

    async fn model_turn(
        &self,
        task: &RolloutTask,
        rollout: &mut RolloutState,
        definitions: &[ToolDefinition],
    ) -> LoopState {
        let conversation = std::mem::take(&mut rollout.conversation);
        rollout.conversation = compact(conversation, task.keep_tool_rounds());

        if let Some(limit) = self.max_context_tokens
            && !rollout.forced_final
        {
            let mut estimated = estimate_messages_tokens(&rollout.conversation.messages);
            if rollout.adapter.format() == ResponseFormat::Plain {
                estimated += estimate_tools_tokens(definitions);
            }
            if estimated > limit {
                warn!(
                    rollout = rollout.index,
                    estimated,
                    limit,
                    "Context budget exceeded, requesting a final answer"
                );
                rollout.conversation.push(Message::user(FINAL_ANSWER_REQUEST));
                rollout.forced_final = true;
            }
        }

        let mut request = ProviderRequest::new(&self.params, rollout.conversation.messages.clone());
        request = match rollout.adapter.format() {
            ResponseFormat::Tagged => request.with_stop(protocol::text_stop_sequences()),
            ResponseFormat::Plain => request.with_tools(definitions.to_vec()),
        };

        debug!(
            rollout = rollout.index,
            round = rollout.rounds,
            messages = request.messages.len(),
            "Requesting model turn"
        );

        let provider = &self.provider;
        let outcome = self
            .model_retry
            .execute("model", || {
                let request = request.clone();
                async move {
                    let response = provider.complete(request).await?;
                    if response.is_empty() {
                        return Err(ProviderError::EmptyResponse);
                    }
                    Ok(response)
                }
            })
            .await;
        let attempts = outcome.attempt_count();
        if attempts > 1 && outcome.succeeded() {
            debug!(rollout = rollout.index, attempts, "Model turn recovered after retries");
        }

        match outcome.into_result() {
            Ok(response) => {
                rollout.model_calls += 1;
                self.publish(DomainEvent::ModelTurnCompleted {
                    conversation_id: rollout.conversation.id.to_string(),
                    round: rollout.rounds,
                    model: response.model.clone(),
                    tokens_used: response.usage.as_ref().map_or(0, |u| u.total_tokens),
                    attempts,
                    timestamp: Utc::now(),
                });
                LoopState::ParsingResponse(response)
            }
            Err(e) => {
                warn!(rollout = rollout.index, attempts, error = %e, "Model unavailable");
                LoopState::Terminated(TerminationReason::ModelUnavailable)
            }
        }
    }

    fn parse_response(&self, rollout: &mut RolloutState, response: ProviderResponse) -> LoopState {
        let message = response.message;
        let provided_reasoning = message.reasoning_content;

        let parsed: ParsedOutput = if message.tool_calls.is_empty() {
            let raw = match rollout.adapter.format() {
                ResponseFormat::Tagged => truncate_at_observation(&message.content),
                ResponseFormat::Plain => message.content.as_str(),
            };
            rollout.adapter.parse_model_output(raw)
        } else {
            rollout.adapter.adopt_structured(&message.content, message.tool_calls)
        };

        for error in &parsed.errors {
            warn!(
                rollout = rollout.index,
                round = rollout.rounds,
                error = %error,
                fragment = error.fragment(),
                "Malformed tool call"
            );
            self.publish(DomainEvent::ProtocolErrorRecorded {
                conversation_id: rollout.conversation.id.to_string(),
                round: rollout.rounds,
                error_message: error.to_string(),
                timestamp: Utc::now(),
            });
        }
        rollout.parse_errors += parsed.errors.len();

        let reasoning = provided_reasoning.or_else(|| parsed.reasoning.clone());
        let assistant = Message::assistant(parsed.display_text.clone())
            .with_tool_calls(parsed.tool_calls.clone())
            .with_reasoning(reasoning);

        if rollout.forced_final {
            // Calls in the forced turn are not run.
            rollout.answer = extract_answer(&parsed.display_text);
            rollout.conversation.push(Message {
                tool_calls: Vec::new(),
                ..assistant
            });
            rollout.rounds += 1;
            return LoopState::Terminated(TerminationReason::ContextLimit);
        }

        if !parsed.has_spans() {
            rollout.answer = parsed.final_answer();
            rollout.conversation.push(assistant);
            rollout.rounds += 1;
            return LoopState::Terminated(TerminationReason::Answer);
        }

        rollout.conversation.push(assistant);
        if !parsed.errors.is_empty() {
            rollout.pending_feedback = Some(rollout.adapter.render_parse_feedback(&parsed.errors));
        }

        if parsed.tool_calls.is_empty() {
            if let Some(feedback) = rollout.pending_feedback.take() {
                rollout.conversation.push(feedback);
            }
            return LoopState::EvaluatingTermination;
        }
        LoopState::DispatchingTools(parsed.tool_calls)
    }

    fn dispatch(&self, rollout: &RolloutState, calls: Vec<ToolCall>) -> LoopState {
        let dispatched = calls
            .into_iter()
            .map(|call| {
                if !self.tools.contains(&call.name) {
                    warn!(rollout = rollout.index, tool = %call.name, "Model called an unknown tool");
                    let available = self.tools.names().join(", ");
                    let result = ToolResult::error(
                        &call.id,
                        format!("Tool '{}' is not available. Available tools: {available}", call.name),
                    );
                    return (call, Dispatch::Rejected(result));
                }

                debug!(rollout = rollout.index, tool = %call.name, call_id = %call.id, "Dispatching tool call");
                let tools = self.tools.clone();
                let retry = self.tool_retry.clone();
                let job = call.clone();
                let handle = self.tool_pool.submit(async move {
                    let started = Instant::now();
                    let outcome = retry.execute(&job.name, || tools.execute(&job)).await;
                    ToolRun {
                        attempts: outcome.attempt_count(),
                        duration_ms: started.elapsed().as_millis() as u64,
                        result: outcome.into_result(),
                    }
                });
                (call, Dispatch::Running(handle))
            })
            .collect();
        LoopState::AwaitingToolResults(dispatched)
    }

    async fn collect_results(&self, rollout: &mut RolloutState, dispatched: Vec<(ToolCall, Dispatch)>) -> LoopState {
        let settled = join_all(dispatched.into_iter().map(|(call, dispatch)| async move {
            let run = match dispatch {
                Dispatch::Rejected(result) => return (call, None, result),
                Dispatch::Running(handle) => handle.await,
            };
            match run {
                Ok(run) => {
                    let result = match &run.result {
                        Ok(output) => ToolResult::from_output(&call.id, output.clone()),
                        Err(e) => ToolResult::error(&call.id, e.to_string()),
                    };
                    (call, Some(run), result)
                }
                Err(join_error) => {
                    let result = ToolResult::error(&call.id, format!("Tool '{}' crashed: {join_error}", call.name));
                    (call, None, result)
                }
            }
        }))
        .await;

        let mut calls = Vec::with_capacity(settled.len());
        let mut results = Vec::with_capacity(settled.len());
        for (call, run, result) in settled {
            if let Some(run) = run {
                rollout.tools_invoked.insert(call.name.clone());
                if let Err(e) = &run.result {
                    warn!(rollout = rollout.index, tool = %call.name, attempts = run.attempts, error = %e, "Tool call failed");
                }
                self.publish(DomainEvent::ToolExecuted {
                    conversation_id: rollout.conversation.id.to_string(),
                    tool_name: call.name.clone(),
                    success: !result.is_error,
                    attempts: run.attempts,
                    duration_ms: run.duration_ms,
                    timestamp: Utc::now(),
                });
            }
            calls.push(call);
            results.push(result);
        }

        let rendered = rollout.adapter.render_round(&calls, results);
        for stray in &rendered.rejected {
            warn!(rollout = rollout.index, call_id = %stray.call_id, "Discarding result for unknown call id");
        }
        for message in rendered.messages {
            rollout.conversation.push(message);
        }
        if let Some(feedback) = rollout.pending_feedback.take() {
            rollout.conversation.push(feedback);
        }
        LoopState::EvaluatingTermination
    }

    fn finish(&self, rollout: RolloutState, reason: TerminationReason) -> RolloutOutcome {
        let elapsed_ms = rollout.started.elapsed().as_millis() as u64;
        info!(
            rollout = rollout.index,
            reason = %reason,
            rounds = rollout.rounds,
            model_calls = rollout.model_calls,
            tools = rollout.tools_invoked.len(),
            elapsed_ms,
            "Rollout finished"
        );
        self.publish(DomainEvent::RolloutFinished {
            conversation_id: rollout.conversation.id.to_string(),
            reason,
            rounds: rollout.rounds,
            model_calls: rollout.model_calls,
            timestamp: Utc::now(),
        });

        RolloutOutcome {
            rollout_index: rollout.index,
            conversation: rollout.conversation,
            answer: rollout.answer,
            termination_reason: reason,
            tools_invoked: rollout.tools_invoked,
            rounds: rollout.rounds,
            model_calls: rollout.model_calls,
            parse_errors: rollout.parse_errors,
            elapsed_ms,
        }
    }
}
