//! Domain event system: decoupled observation of running rollouts.
//!
//! The loop driver publishes an event at each step worth watching.
//! Subscribers (progress output, tests) filter for what they care about.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;

use crate::rollout::TerminationReason;

/// All domain events in the system.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum DomainEvent {
    /// A model turn completed
    ModelTurnCompleted {
        conversation_id: String,
        round: u32,
        model: String,
        tokens_used: u32,
        attempts: u32,
        timestamp: DateTime<Utc>,
    },

    /// A tool was executed
    ToolExecuted {
        conversation_id: String,
        tool_name: String,
        success: bool,
        attempts: u32,
        duration_ms: u64,
        timestamp: DateTime<Utc>,
    },

    /// Model output contained tool-call markup that could not be parsed
    ProtocolErrorRecorded {
        conversation_id: String,
        round: u32,
        error_message: String,
        timestamp: DateTime<Utc>,
    },

    /// A rollout reached a terminal state
    RolloutFinished {
        conversation_id: String,
        reason: TerminationReason,
        rounds: u32,
        model_calls: u32,
        timestamp: DateTime<Utc>,
    },
}

/// A broadcast-based event bus for domain events.
///
/// Uses `tokio::sync::broadcast` for multi-consumer pub/sub.
pub struct EventBus {
    sender: broadcast::Sender<Arc<DomainEvent>>,
}

impl EventBus {
    /// Create a new event bus with the given capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish an event to all subscribers.
    pub fn publish(&self, event: DomainEvent) {
        // No subscribers is fine
        let _ = self.sender.send(Arc::new(event));
    }

    /// Subscribe to receive events.
    pub fn subscribe(&self) -> broadcast::Receiver<Arc<DomainEvent>> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}
