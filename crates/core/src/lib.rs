//! # DeepReact Core
//!
//! Domain types, traits, and error definitions for the DeepReact agent loop.
//! This crate has no HTTP or CLI dependencies. It defines the model every
//! other crate implements against, plus the two leaf components of the loop:
//!
//! - [`protocol`]: parsing `<tool_call>` markup out of model text and
//!   rendering tool results back into messages
//! - [`retry`]: bounded retries with exponential backoff and failure
//!   classification for every outbound call

pub mod error;
pub mod message;
pub mod provider;
pub mod tool;
pub mod protocol;
pub mod retry;
pub mod rollout;
pub mod event;

// Re-export key types at crate root for ergonomics
pub use error::{Error, Result, FailureClass, RetryableError, ProviderError, ToolError, ProtocolParseError, TaskError};
pub use message::{Message, Role, Conversation, ConversationId};
pub use provider::{GenerationParams, Provider, ProviderCapabilities, ProviderRequest, ProviderResponse, ToolDefinition, Usage};
pub use tool::{Tool, ToolCall, ToolOutput, ToolResult, ToolRegistry};
pub use protocol::{ParsedOutput, ParsedSegment, ProtocolAdapter, ResponseFormat};
pub use retry::{AttemptOutcome, AttemptRecord, RetryOutcome, RetryPolicy};
pub use rollout::{RolloutOutcome, RolloutTask, TerminationReason};
pub use event::{DomainEvent, EventBus};
