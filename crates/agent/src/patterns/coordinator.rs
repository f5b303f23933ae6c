//! Rollout coordination: many independent ReAct rollouts, bounded workers.
//!
//! ```text
//!            RolloutTask
//!                 │
//!        ┌────────┼────────┐
//!        ▼        ▼        ▼
//!   ┌────────┐┌────────┐┌────────┐
//!   │ run #0 ││ run #1 ││ run #2 │  ← at most `max_workers` at a time
//!   └───┬────┘└───┬────┘└───┬────┘
//!       └─────────┼─────────┘
//!                 ▼
//!        Vec<RolloutOutcome>
//! ```
//!
//! Each rollout gets its own conversation and protocol state; they share
//! only the agent (provider, tool registry, tool pool). One rollout ending
//! in `model-unavailable` has no effect on its siblings. A rollout that
//! panics is a bug and the panic is resumed on the caller.

use std::sync::Arc;

use deepreact_core::error::TaskError;
use deepreact_core::rollout::{RolloutOutcome, RolloutTask};
use futures::future::join_all;
use tokio::sync::mpsc;
use tokio::task::{JoinError, JoinHandle};
use tracing::info;

use crate::patterns::react::ReactAgent;
use crate::pool::WorkerPool;

pub struct RolloutCoordinator {
    agent: Arc<ReactAgent>,
    pool: WorkerPool,
    max_workers: usize,
}

impl RolloutCoordinator {
    /// `max_workers` bounds how many rollouts run at once, across every
    /// call made on this coordinator.
    pub fn new(agent: Arc<ReactAgent>, max_workers: usize) -> Result<Self, TaskError> {
        if max_workers == 0 {
            return Err(TaskError::ZeroWorkers);
        }
        Ok(Self {
            agent,
            pool: WorkerPool::bounded(max_workers),
            max_workers,
        })
    }

    pub fn max_workers(&self) -> usize {
        self.max_workers
    }

    fn spawn(&self, task: Arc<RolloutTask>, rollout_index: usize) -> JoinHandle<RolloutOutcome> {
        let agent = self.agent.clone();
        self.pool.submit(async move { agent.run(&task, rollout_index).await })
    }

    /// Run `count` rollouts of `task`; outcomes are sorted by rollout index.
    pub async fn run(&self, task: &RolloutTask, count: usize) -> Result<Vec<RolloutOutcome>, TaskError> {
        if count == 0 {
            return Err(TaskError::ZeroRollouts);
        }
        info!(rollouts = count, workers = self.max_workers, "Starting rollouts");

        let task = Arc::new(task.clone());
        let handles: Vec<_> = (0..count).map(|i| self.spawn(task.clone(), i)).collect();

        let mut outcomes: Vec<RolloutOutcome> = join_all(handles).await.into_iter().map(settle).collect();
        outcomes.sort_by_key(|o| o.rollout_index);

        let answered = outcomes.iter().filter(|o| o.answer.is_some()).count();
        info!(rollouts = count, answered, "Rollouts complete");
        Ok(outcomes)
    }

    /// Run `count` rollouts of `task`, yielding outcomes as they complete.
    ///
    /// The channel closes after the last outcome. A rollout that panics
    /// sends nothing, so the stream ends short.
    pub fn run_stream(&self, task: &RolloutTask, count: usize) -> Result<mpsc::Receiver<RolloutOutcome>, TaskError> {
        if count == 0 {
            return Err(TaskError::ZeroRollouts);
        }
        info!(rollouts = count, workers = self.max_workers, "Streaming rollouts");

        let (tx, rx) = mpsc::channel(count);
        let task = Arc::new(task.clone());
        for i in 0..count {
            let tx = tx.clone();
            let agent = self.agent.clone();
            let task = task.clone();
            self.pool.submit(async move {
                let outcome = agent.run(&task, i).await;
                // A dropped receiver means nobody wants the rest.
                let _ = tx.send(outcome).await;
            });
        }
        Ok(rx)
    }

    /// Run `count_per_task` rollouts of every task under the shared worker
    /// bound. Results are `(task_index, outcome)`, ordered by task then
    /// rollout index.
    pub async fn run_batch(
        &self,
        tasks: &[RolloutTask],
        count_per_task: usize,
    ) -> Result<Vec<(usize, RolloutOutcome)>, TaskError> {
        if count_per_task == 0 {
            return Err(TaskError::ZeroRollouts);
        }
        info!(
            tasks = tasks.len(),
            rollouts_per_task = count_per_task,
            workers = self.max_workers,
            "Starting batch"
        );

        let mut handles = Vec::with_capacity(tasks.len() * count_per_task);
        for (task_index, task) in tasks.iter().enumerate() {
            let task = Arc::new(task.clone());
            for i in 0..count_per_task {
                handles.push((task_index, self.spawn(task.clone(), i)));
            }
        }

        let (indices, handles): (Vec<usize>, Vec<_>) = handles.into_iter().unzip();
        let mut results: Vec<(usize, RolloutOutcome)> = indices
            .into_iter()
            .zip(join_all(handles).await.into_iter().map(settle))
            .collect();
        results.sort_by_key(|(task_index, o)| (*task_index, o.rollout_index));
        Ok(results)
    }
}

/// Unwrap a finished rollout task, resuming its panic if it had one.
fn settle(joined: Result<RolloutOutcome, JoinError>) -> RolloutOutcome {
    match joined {
        Ok(outcome) => outcome,
        Err(e) if e.is_panic() => std::panic::resume_unwind(e.into_panic()),
        // Tasks are never aborted, and the runtime outlives the coordinator.
        Err(e) => panic!("rollout task failed: {e}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::patterns::test_helpers::*;
    use deepreact_core::error::ProviderError;
    use deepreact_core::provider::GenerationParams;
    use deepreact_core::rollout::TerminationReason;
    use std::collections::BTreeSet;
    use std::time::Duration;

    fn coordinator(provider: Arc<ScriptedProvider>, workers: usize) -> RolloutCoordinator {
        let agent = ReactAgent::new(provider, registry(vec![]), GenerationParams::new("mock-model"))
            .with_model_retry(fast_retry(0));
        RolloutCoordinator::new(Arc::new(agent), workers).unwrap()
    }

    fn task() -> RolloutTask {
        RolloutTask::new("What is the answer?").unwrap()
    }

    #[tokio::test]
    async fn outcomes_sorted_with_independent_conversations() {
        let provider = Arc::new(ScriptedProvider::repeating("<answer>42</answer>"));
        let outcomes = coordinator(provider.clone(), 2).run(&task(), 5).await.unwrap();

        let indices: Vec<usize> = outcomes.iter().map(|o| o.rollout_index).collect();
        assert_eq!(indices, vec![0, 1, 2, 3, 4]);
        let ids: BTreeSet<String> = outcomes.iter().map(|o| o.conversation.id.to_string()).collect();
        assert_eq!(ids.len(), 5);
        assert!(outcomes.iter().all(|o| o.answer.as_deref() == Some("42")));
        assert_eq!(provider.call_count(), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn worker_bound_is_respected() {
        let provider = Arc::new(ScriptedProvider::repeating("<answer>a</answer>").with_delay(Duration::from_millis(100)));
        coordinator(provider.clone(), 2).run(&task(), 6).await.unwrap();
        assert_eq!(provider.peak_concurrency(), 2);
    }

    #[tokio::test]
    async fn failed_rollout_does_not_cancel_siblings() {
        let provider = Arc::new(ScriptedProvider::new(vec![
            Err(ProviderError::AuthenticationFailed("bad key".into())),
            Ok(text_response("<answer>a</answer>")),
            Ok(text_response("<answer>b</answer>")),
        ]));
        let outcomes = coordinator(provider, 1).run(&task(), 3).await.unwrap();

        assert_eq!(outcomes[0].termination_reason, TerminationReason::ModelUnavailable);
        assert_eq!(outcomes[1].termination_reason, TerminationReason::Answer);
        assert_eq!(outcomes[2].termination_reason, TerminationReason::Answer);
        assert_eq!(outcomes[2].answer.as_deref(), Some("b"));
    }

    #[tokio::test]
    async fn zero_counts_are_rejected() {
        let provider = Arc::new(ScriptedProvider::repeating("<answer>a</answer>"));
        let agent = Arc::new(ReactAgent::new(
            provider.clone(),
            registry(vec![]),
            GenerationParams::new("m"),
        ));
        assert_eq!(RolloutCoordinator::new(agent, 0).err(), Some(TaskError::ZeroWorkers));

        let coord = coordinator(provider.clone(), 1);
        assert_eq!(coord.run(&task(), 0).await.err(), Some(TaskError::ZeroRollouts));
        assert!(coord.run_stream(&task(), 0).is_err());
        assert_eq!(coord.run_batch(&[task()], 0).await.err(), Some(TaskError::ZeroRollouts));
        assert_eq!(provider.call_count(), 0);
    }

    #[tokio::test]
    async fn stream_yields_every_outcome() {
        let provider = Arc::new(ScriptedProvider::repeating("<answer>a</answer>"));
        let mut rx = coordinator(provider, 3).run_stream(&task(), 4).unwrap();

        let mut seen = BTreeSet::new();
        while let Some(outcome) = rx.recv().await {
            seen.insert(outcome.rollout_index);
        }
        assert_eq!(seen, (0..4).collect());
    }

    #[tokio::test]
    async fn batch_groups_by_task() {
        let provider = Arc::new(ScriptedProvider::repeating("<answer>a</answer>"));
        let tasks = vec![task(), RolloutTask::new("Second question").unwrap()];
        let results = coordinator(provider, 2).run_batch(&tasks, 2).await.unwrap();

        let keys: Vec<(usize, usize)> = results.iter().map(|(t, o)| (*t, o.rollout_index)).collect();
        assert_eq!(keys, vec![(0, 0), (0, 1), (1, 0), (1, 1)]);
        assert_eq!(results[2].1.conversation.messages[1].content, "Second question");
    }

    #[tokio::test]
    #[should_panic(expected = "scripted panic")]
    async fn panicking_rollout_is_resumed() {
        let agent = ReactAgent::new(Arc::new(PanickingProvider), registry(vec![]), GenerationParams::new("m"));
        let coord = RolloutCoordinator::new(Arc::new(agent), 1).unwrap();
        let _ = coord.run(&task(), 1).await;
    }
}
