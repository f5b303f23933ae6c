//! Configuration loading, validation, and management for DeepReact.
//!
//! Loads configuration from `~/.deepreact/config.toml` with environment
//! variable overrides. Validates all settings at startup and converts them
//! into the explicit values the core consumes; nothing below the CLI reads
//! the environment itself.

use deepreact_core::{GenerationParams, RetryPolicy, RolloutTask, TaskError};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Tool names shipped with the binary.
pub const BUILTIN_TOOLS: &[&str] = &["search", "fetch_url", "PythonInterpreter"];

/// The root configuration structure.
///
/// Maps directly to `~/.deepreact/config.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Model backend
    #[serde(default)]
    pub provider: ProviderConfig,

    /// Loop limits and concurrency
    #[serde(default)]
    pub agent: AgentSettings,

    /// Backoff for model and tool calls
    #[serde(default)]
    pub retry: RetrySettings,

    /// Tool allowlist and per-tool settings
    #[serde(default)]
    pub tools: ToolsConfig,
}

/// Which client talks to the model.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    /// OpenAI-compatible `/chat/completions`
    #[default]
    Openai,
    /// Raw text generation with a ChatML prompt
    Text,
}

#[derive(Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    #[serde(default)]
    pub kind: ProviderKind,

    #[serde(default = "default_api_base")]
    pub api_base: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    #[serde(default = "default_model")]
    pub model: String,

    /// Send tool schemas and read structured calls instead of `<tool_call>` markup
    #[serde(default)]
    pub native_tool_calls: bool,

    #[serde(default = "default_temperature")]
    pub temperature: f32,

    #[serde(default = "default_top_p")]
    pub top_p: f32,

    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    #[serde(default = "default_presence_penalty")]
    pub presence_penalty: f32,
}

fn default_api_base() -> String {
    "http://127.0.0.1:6001/v1".into()
}
fn default_model() -> String {
    "Tongyi-DeepResearch-30B-A3B".into()
}
fn default_temperature() -> f32 {
    0.6
}
fn default_top_p() -> f32 {
    0.95
}
fn default_max_tokens() -> u32 {
    10_000
}
fn default_presence_penalty() -> f32 {
    1.1
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            kind: ProviderKind::default(),
            api_base: default_api_base(),
            api_key: None,
            model: default_model(),
            native_tool_calls: false,
            temperature: default_temperature(),
            top_p: default_top_p(),
            max_tokens: default_max_tokens(),
            presence_penalty: default_presence_penalty(),
        }
    }
}

impl ProviderConfig {
    pub fn generation_params(&self) -> GenerationParams {
        GenerationParams {
            model: self.model.clone(),
            temperature: self.temperature,
            top_p: self.top_p,
            max_tokens: Some(self.max_tokens),
            presence_penalty: Some(self.presence_penalty),
        }
    }
}

/// Redact a secret for Debug output.
fn redact(s: &Option<String>) -> &'static str {
    match s {
        Some(_) => "[REDACTED]",
        None => "None",
    }
}

impl std::fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderConfig")
            .field("kind", &self.kind)
            .field("api_base", &self.api_base)
            .field("api_key", &redact(&self.api_key))
            .field("model", &self.model)
            .field("native_tool_calls", &self.native_tool_calls)
            .field("temperature", &self.temperature)
            .field("top_p", &self.top_p)
            .field("max_tokens", &self.max_tokens)
            .field("presence_penalty", &self.presence_penalty)
            .finish()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentSettings {
    #[serde(default = "default_max_rounds")]
    pub max_rounds: u32,

    #[serde(default = "default_max_model_calls")]
    pub max_model_calls: u32,

    /// Newest tool responses kept verbatim; 0 keeps the full history
    #[serde(default)]
    pub keep_tool_rounds: usize,

    /// Simultaneous tool calls across all rollouts; unset means unbounded
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_concurrency: Option<usize>,

    /// Simultaneous rollouts
    #[serde(default = "default_rollout_concurrency")]
    pub rollout_concurrency: usize,

    /// Rollouts per question
    #[serde(default = "default_rollouts")]
    pub rollouts: usize,

    /// Estimated-token budget that forces a final answer
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_context_tokens: Option<usize>,

    /// Wall-clock budget per rollout
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_runtime_secs: Option<u64>,

    /// Replaces the built-in system prompt
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,
}

fn default_max_rounds() -> u32 {
    100
}
fn default_max_model_calls() -> u32 {
    100
}
fn default_rollout_concurrency() -> usize {
    4
}
fn default_rollouts() -> usize {
    1
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self {
            max_rounds: default_max_rounds(),
            max_model_calls: default_max_model_calls(),
            keep_tool_rounds: 0,
            tool_concurrency: None,
            rollout_concurrency: default_rollout_concurrency(),
            rollouts: default_rollouts(),
            max_context_tokens: None,
            max_runtime_secs: None,
            system_prompt: None,
        }
    }
}

impl AgentSettings {
    /// A task for `query` carrying the configured limits.
    pub fn task(&self, query: &str) -> Result<RolloutTask, TaskError> {
        Ok(RolloutTask::new(query)?
            .with_max_rounds(self.max_rounds)
            .with_max_model_calls(self.max_model_calls)
            .with_keep_tool_rounds(self.keep_tool_rounds))
    }

    pub fn max_runtime(&self) -> Option<Duration> {
        self.max_runtime_secs.map(Duration::from_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrySettings {
    #[serde(default = "default_model_max_retries")]
    pub model_max_retries: u32,

    #[serde(default = "default_tool_max_retries")]
    pub tool_max_retries: u32,

    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,

    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,

    #[serde(default = "default_jitter_ms")]
    pub jitter_ms: u64,

    #[serde(default = "default_model_timeout_secs")]
    pub model_timeout_secs: u64,

    #[serde(default = "default_tool_timeout_secs")]
    pub tool_timeout_secs: u64,
}

fn default_model_max_retries() -> u32 {
    10
}
fn default_tool_max_retries() -> u32 {
    2
}
fn default_base_delay_ms() -> u64 {
    1_000
}
fn default_max_delay_ms() -> u64 {
    30_000
}
fn default_jitter_ms() -> u64 {
    1_000
}
fn default_model_timeout_secs() -> u64 {
    600
}
fn default_tool_timeout_secs() -> u64 {
    200
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            model_max_retries: default_model_max_retries(),
            tool_max_retries: default_tool_max_retries(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            jitter_ms: default_jitter_ms(),
            model_timeout_secs: default_model_timeout_secs(),
            tool_timeout_secs: default_tool_timeout_secs(),
        }
    }
}

impl RetrySettings {
    fn policy(&self, max_retries: u32, timeout_secs: u64) -> RetryPolicy {
        RetryPolicy::new(max_retries)
            .with_base_delay(Duration::from_millis(self.base_delay_ms))
            .with_max_delay(Duration::from_millis(self.max_delay_ms))
            .with_jitter(Duration::from_millis(self.jitter_ms))
            .with_attempt_timeout((timeout_secs > 0).then(|| Duration::from_secs(timeout_secs)))
    }

    pub fn model_policy(&self) -> RetryPolicy {
        self.policy(self.model_max_retries, self.model_timeout_secs)
    }

    pub fn tool_policy(&self) -> RetryPolicy {
        self.policy(self.tool_max_retries, self.tool_timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolsConfig {
    /// Allowlist of tool names exposed to the model
    #[serde(default = "default_enabled_tools")]
    pub enabled: Vec<String>,

    #[serde(default)]
    pub search: SearchToolConfig,

    #[serde(default)]
    pub fetch_url: FetchToolConfig,

    #[serde(default)]
    pub python: PythonToolConfig,
}

fn default_enabled_tools() -> Vec<String> {
    BUILTIN_TOOLS.iter().map(|s| s.to_string()).collect()
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled_tools(),
            search: SearchToolConfig::default(),
            fetch_url: FetchToolConfig::default(),
            python: PythonToolConfig::default(),
        }
    }
}

#[derive(Clone, Serialize, Deserialize)]
pub struct SearchToolConfig {
    #[serde(default = "default_search_url")]
    pub api_url: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    #[serde(default = "default_search_results")]
    pub max_results: usize,
}

fn default_search_url() -> String {
    "https://google.serper.dev/search".into()
}
fn default_search_results() -> usize {
    10
}

impl Default for SearchToolConfig {
    fn default() -> Self {
        Self {
            api_url: default_search_url(),
            api_key: None,
            max_results: default_search_results(),
        }
    }
}

impl std::fmt::Debug for SearchToolConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SearchToolConfig")
            .field("api_url", &self.api_url)
            .field("api_key", &redact(&self.api_key))
            .field("max_results", &self.max_results)
            .finish()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchToolConfig {
    /// Characters of page text returned to the model
    #[serde(default = "default_fetch_chars")]
    pub max_chars: usize,
}

fn default_fetch_chars() -> usize {
    40_000
}

impl Default for FetchToolConfig {
    fn default() -> Self {
        Self { max_chars: default_fetch_chars() }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PythonToolConfig {
    #[serde(default = "default_interpreter")]
    pub interpreter: String,

    #[serde(default = "default_python_timeout")]
    pub timeout_secs: u64,
}

fn default_interpreter() -> String {
    "python3".into()
}
fn default_python_timeout() -> u64 {
    50
}

impl Default for PythonToolConfig {
    fn default() -> Self {
        Self {
            interpreter: default_interpreter(),
            timeout_secs: default_python_timeout(),
        }
    }
}

impl AppConfig {
    /// Load configuration from the default path (~/.deepreact/config.toml).
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_with(&Self::config_dir().join("config.toml"))
    }

    /// Load from `path`, then apply process environment overrides.
    pub fn load_with(path: &Path) -> Result<Self, ConfigError> {
        let mut config = Self::load_from(path)?;
        config.apply_env_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific file path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::info!("No config file found at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Apply environment overrides read through `lookup`.
    ///
    /// Recognised keys:
    /// - `DEEPREACT_API_KEY`, falling back to `OPENAI_API_KEY`
    /// - `DEEPREACT_API_BASE`, `DEEPREACT_MODEL`, `DEEPREACT_SYSTEM_PROMPT`
    /// - `DEEPREACT_ENABLED_TOOLS` (comma separated)
    /// - `DEEPREACT_MAX_MODEL_CALLS`, `DEEPREACT_KEEP_TOOL_ROUNDS`
    /// - `SERPER_API_KEY`
    pub fn apply_env_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(key) = lookup("DEEPREACT_API_KEY").or_else(|| {
            self.provider.api_key.is_none().then(|| lookup("OPENAI_API_KEY")).flatten()
        }) {
            self.provider.api_key = Some(key);
        }
        if let Some(base) = lookup("DEEPREACT_API_BASE") {
            self.provider.api_base = base;
        }
        if let Some(model) = lookup("DEEPREACT_MODEL") {
            self.provider.model = model;
        }
        if let Some(prompt) = lookup("DEEPREACT_SYSTEM_PROMPT") {
            self.agent.system_prompt = Some(prompt);
        }
        if let Some(tools) = lookup("DEEPREACT_ENABLED_TOOLS") {
            self.tools.enabled = tools
                .split(',')
                .map(str::trim)
                .filter(|t| !t.is_empty())
                .map(String::from)
                .collect();
        }
        if let Some(raw) = lookup("DEEPREACT_MAX_MODEL_CALLS") {
            self.agent.max_model_calls = parse_env("DEEPREACT_MAX_MODEL_CALLS", &raw)?;
        }
        if let Some(raw) = lookup("DEEPREACT_KEEP_TOOL_ROUNDS") {
            self.agent.keep_tool_rounds = parse_env("DEEPREACT_KEEP_TOOL_ROUNDS", &raw)?;
        }
        if let Some(key) = lookup("SERPER_API_KEY") {
            self.tools.search.api_key = Some(key);
        }
        Ok(())
    }

    /// Get the configuration directory path.
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".deepreact")
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=2.0).contains(&self.provider.temperature) {
            return Err(ConfigError::ValidationError(
                "provider.temperature must be between 0.0 and 2.0".into(),
            ));
        }
        if !(0.0..=1.0).contains(&self.provider.top_p) || self.provider.top_p == 0.0 {
            return Err(ConfigError::ValidationError(
                "provider.top_p must be in (0.0, 1.0]".into(),
            ));
        }
        if self.agent.rollouts == 0 {
            return Err(ConfigError::ValidationError("agent.rollouts must be at least 1".into()));
        }
        if self.agent.rollout_concurrency == 0 {
            return Err(ConfigError::ValidationError(
                "agent.rollout_concurrency must be at least 1".into(),
            ));
        }
        if self.agent.tool_concurrency == Some(0) {
            return Err(ConfigError::ValidationError(
                "agent.tool_concurrency must be at least 1 when set".into(),
            ));
        }
        if self.retry.max_delay_ms < self.retry.base_delay_ms {
            return Err(ConfigError::ValidationError(
                "retry.max_delay_ms must not be below retry.base_delay_ms".into(),
            ));
        }
        Ok(())
    }

    /// Check if an API key is available (from config or environment).
    pub fn has_api_key(&self) -> bool {
        self.provider.api_key.is_some()
    }

    /// Generate a default config TOML string.
    pub fn default_toml() -> String {
        Self::default().to_toml()
    }

    pub fn to_toml(&self) -> String {
        toml::to_string_pretty(self).unwrap_or_default()
    }
}

fn parse_env<T: std::str::FromStr>(key: &str, raw: &str) -> Result<T, ConfigError> {
    raw.trim()
        .parse()
        .map_err(|_| ConfigError::ValidationError(format!("{key} has an invalid value: {raw}")))
}

/// Get the user's home directory.
fn dirs_home() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var("USERPROFILE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("C:\\Users\\Default"))
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/tmp"))
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {path}: {reason}")]
    ReadError { path: PathBuf, reason: String },

    #[error("Failed to parse config file at {path}: {reason}")]
    ParseError { path: PathBuf, reason: String },

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}
