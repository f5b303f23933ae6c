//! The ReAct agent loop.
//!
//! A rollout alternates between the model and the tools:
//!
//! 1. **Compact** stale tool responses out of the conversation
//! 2. **Ask** the model for the next turn (through the retry controller)
//! 3. **Parse** `<tool_call>` spans out of the turn
//! 4. **Run** the calls concurrently, append results in call order
//! 5. **Check** round, call and time budgets, then loop back to 1
//!
//! A turn with no tool-call spans is the final answer. The
//! [`RolloutCoordinator`] runs many independent rollouts of one task under a
//! shared worker bound.

pub mod context;
pub mod patterns;
pub mod pool;
pub mod prompt;

pub use context::{compact, OMITTED_TOOL_RESPONSE};
pub use patterns::{ReactAgent, RolloutCoordinator};
pub use pool::WorkerPool;
