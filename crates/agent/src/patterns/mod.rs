//! Agent patterns.
//!
//! 1. **ReAct**: the per-rollout Thought → Action → Observation loop
//! 2. **Coordinator**: many rollouts of one task, bounded concurrency

pub mod coordinator;
pub mod react;

pub use coordinator::RolloutCoordinator;
pub use react::ReactAgent;

#[cfg(test)]
pub(crate) mod test_helpers;
