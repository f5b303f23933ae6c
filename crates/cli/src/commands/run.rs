//! `deepreact run`: rollouts for a question or a JSONL dataset.

use std::collections::BTreeSet;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use clap::Args;
use deepreact_agent::{ReactAgent, RolloutCoordinator};
use deepreact_config::AppConfig;
use deepreact_core::message::Message;
use deepreact_core::rollout::{RolloutOutcome, TerminationReason};
use serde::{Deserialize, Serialize};
use tracing::info;

#[derive(Debug, Args)]
pub struct RunArgs {
    /// Question to research
    pub query: Option<String>,

    /// JSONL dataset, one `{"question": ..., "answer": ...}` per line
    #[arg(short, long, conflicts_with = "query")]
    pub input: Option<PathBuf>,

    /// Write results here instead of stdout
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Rollouts per question
    #[arg(long)]
    pub rollouts: Option<usize>,

    /// Rollouts running at once
    #[arg(long)]
    pub workers: Option<usize>,

    #[arg(long)]
    pub max_rounds: Option<u32>,

    /// Tool responses kept verbatim (0 keeps all)
    #[arg(long)]
    pub keep_tool_rounds: Option<usize>,
}

/// One dataset row.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Item {
    #[serde(alias = "query")]
    pub question: String,
    #[serde(default)]
    pub answer: Option<String>,
}

/// One output line.
#[derive(Debug, Serialize)]
pub struct Record<'a> {
    pub question: &'a str,
    pub expected_answer: Option<&'a str>,
    pub rollout: usize,
    pub prediction: Option<&'a str>,
    pub termination: TerminationReason,
    pub tools: &'a BTreeSet<String>,
    pub rounds: u32,
    pub model_calls: u32,
    pub elapsed_ms: u64,
    pub messages: &'a [Message],
}

impl<'a> Record<'a> {
    pub fn new(item: &'a Item, outcome: &'a RolloutOutcome) -> Self {
        Self {
            question: &item.question,
            expected_answer: item.answer.as_deref(),
            rollout: outcome.rollout_index,
            prediction: outcome.answer.as_deref(),
            termination: outcome.termination_reason,
            tools: &outcome.tools_invoked,
            rounds: outcome.rounds,
            model_calls: outcome.model_calls,
            elapsed_ms: outcome.elapsed_ms,
            messages: &outcome.conversation.messages,
        }
    }
}

/// Parse a JSONL dataset. Blank lines are skipped.
pub fn parse_items(content: &str) -> Result<Vec<Item>, Box<dyn std::error::Error>> {
    content
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(n, line)| {
            serde_json::from_str::<Item>(line)
                .map_err(|e| -> Box<dyn std::error::Error> { format!("line {}: {e}", n + 1).into() })
        })
        .collect()
}

fn load_items(args: &RunArgs) -> Result<Vec<Item>, Box<dyn std::error::Error>> {
    if let Some(path) = &args.input {
        let content = std::fs::read_to_string(path)
            .map_err(|e| format!("Failed to read {}: {e}", path.display()))?;
        let items = parse_items(&content)?;
        if items.is_empty() {
            return Err(format!("{} contains no questions", path.display()).into());
        }
        return Ok(items);
    }
    match &args.query {
        Some(q) => Ok(vec![Item { question: q.clone(), answer: None }]),
        None => Err("Provide a QUERY or --input FILE".into()),
    }
}

/// Fold command-line overrides into the loaded configuration.
pub fn apply_overrides(config: &mut AppConfig, args: &RunArgs) {
    if let Some(n) = args.rollouts {
        config.agent.rollouts = n;
    }
    if let Some(n) = args.workers {
        config.agent.rollout_concurrency = n;
    }
    if let Some(n) = args.max_rounds {
        config.agent.max_rounds = n;
    }
    if let Some(n) = args.keep_tool_rounds {
        config.agent.keep_tool_rounds = n;
    }
}

/// Assemble the loop driver from configuration.
pub fn build_agent(config: &AppConfig) -> ReactAgent {
    let request_timeout = Duration::from_secs(config.retry.model_timeout_secs.max(1));
    let provider = deepreact_providers::build_from_config(&config.provider, request_timeout);
    let tools = Arc::new(deepreact_tools::default_registry(&config.tools));

    ReactAgent::new(provider, tools, config.provider.generation_params())
        .with_system_prompt(config.agent.system_prompt.clone())
        .with_tool_concurrency(config.agent.tool_concurrency)
        .with_model_retry(config.retry.model_policy())
        .with_tool_retry(config.retry.tool_policy())
        .with_max_context_tokens(config.agent.max_context_tokens)
        .with_max_duration(config.agent.max_runtime())
}

pub async fn run(config_path: Option<&Path>, args: RunArgs) -> Result<(), Box<dyn std::error::Error>> {
    let mut config = super::load_config(config_path)?;
    apply_overrides(&mut config, &args);
    config.validate()?;

    let items = load_items(&args)?;
    let tasks = items
        .iter()
        .map(|item| config.agent.task(&item.question))
        .collect::<Result<Vec<_>, _>>()?;

    let agent = Arc::new(build_agent(&config));
    info!(
        questions = items.len(),
        rollouts = config.agent.rollouts,
        workers = config.agent.rollout_concurrency,
        provider = agent.provider_name(),
        "Running"
    );

    let coordinator = RolloutCoordinator::new(agent, config.agent.rollout_concurrency)?;
    let results = coordinator.run_batch(&tasks, config.agent.rollouts).await?;

    let mut out: Box<dyn Write> = match &args.output {
        Some(path) => Box::new(BufWriter::new(
            File::create(path).map_err(|e| format!("Failed to create {}: {e}", path.display()))?,
        )),
        None => Box::new(std::io::stdout().lock()),
    };
    for (task_index, outcome) in &results {
        let line = serde_json::to_string(&Record::new(&items[*task_index], outcome))?;
        writeln!(out, "{line}")?;
    }
    out.flush()?;

    let answered = results.iter().filter(|(_, o)| o.answer.is_some()).count();
    let budget_stops = results.iter().filter(|(_, o)| o.termination_reason.is_budget()).count();
    info!(outcomes = results.len(), answered, budget_stops, "Done");
    Ok(())
}
