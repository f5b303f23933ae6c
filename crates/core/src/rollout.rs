//! Rollout task and outcome types.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::error::TaskError;
use crate::message::Conversation;

fn default_max_rounds() -> u32 {
    100
}
fn default_max_model_calls() -> u32 {
    100
}

/// Immutable input to one loop-driver run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RolloutTask {
    query: String,

    /// Rounds (model turn + tool dispatch) before `RoundLimit`
    #[serde(default = "default_max_rounds")]
    max_rounds: u32,

    /// Successful model completions before `CallLimit`
    #[serde(default = "default_max_model_calls")]
    max_model_calls: u32,

    /// Newest tool responses kept verbatim; 0 keeps all
    #[serde(default)]
    keep_tool_rounds: usize,
}

impl RolloutTask {
    /// Create a task with default limits. Rejects a blank query.
    pub fn new(query: impl Into<String>) -> Result<Self, TaskError> {
        let query = query.into();
        if query.trim().is_empty() {
            return Err(TaskError::EmptyQuery);
        }
        Ok(Self {
            query,
            max_rounds: default_max_rounds(),
            max_model_calls: default_max_model_calls(),
            keep_tool_rounds: 0,
        })
    }

    /// A limit of 0 terminates before the first model call.
    pub fn with_max_rounds(mut self, max_rounds: u32) -> Self {
        self.max_rounds = max_rounds;
        self
    }

    pub fn with_max_model_calls(mut self, max_model_calls: u32) -> Self {
        self.max_model_calls = max_model_calls;
        self
    }

    pub fn with_keep_tool_rounds(mut self, keep: usize) -> Self {
        self.keep_tool_rounds = keep;
        self
    }

    pub fn query(&self) -> &str {
        &self.query
    }

    pub fn max_rounds(&self) -> u32 {
        self.max_rounds
    }

    pub fn max_model_calls(&self) -> u32 {
        self.max_model_calls
    }

    pub fn keep_tool_rounds(&self) -> usize {
        self.keep_tool_rounds
    }
}

/// Why a rollout stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TerminationReason {
    /// The model produced a turn with no tool calls
    Answer,
    /// The model could not be reached after retries
    ModelUnavailable,
    /// `max_rounds` reached
    RoundLimit,
    /// `max_model_calls` reached
    CallLimit,
    /// The context budget was exceeded; one forced final turn was taken
    ContextLimit,
    /// The wall-clock budget ran out
    TimeLimit,
}

impl TerminationReason {
    /// Budget terminations are normal stops, not failures.
    pub fn is_budget(&self) -> bool {
        matches!(
            self,
            Self::RoundLimit | Self::CallLimit | Self::ContextLimit | Self::TimeLimit
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Answer => "answer",
            Self::ModelUnavailable => "model-unavailable",
            Self::RoundLimit => "round-limit",
            Self::CallLimit => "call-limit",
            Self::ContextLimit => "context-limit",
            Self::TimeLimit => "time-limit",
        }
    }
}

impl std::fmt::Display for TerminationReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Everything one rollout produced. Built once when the driver stops.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RolloutOutcome {
    /// Position of this rollout within its run
    pub rollout_index: usize,

    pub conversation: Conversation,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub answer: Option<String>,

    pub termination_reason: TerminationReason,

    /// Names of tools that actually executed
    pub tools_invoked: BTreeSet<String>,

    pub rounds: u32,
    pub model_calls: u32,
    pub parse_errors: usize,
    pub elapsed_ms: u64,
}
