//! Configuration loading, validation, and management for chatloop.
//!
//! Loads configuration from `~/.chatloop/config.toml` with environment
//! variable overrides, validates it once at startup, and hands the resulting
//! immutable [`AppConfig`] to the provider and agent constructors.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// The root configuration structure.
///
/// Maps directly to `~/.chatloop/config.toml`.
#[derive(Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Chat completions endpoint (full URL)
    #[serde(default = "default_endpoint")]
    pub endpoint: String,

    /// Model name sent with every request
    #[serde(default = "default_model")]
    pub model: String,

    /// Bearer token for the endpoint, if it needs one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// Token budget for the conversation history
    #[serde(default = "default_context_window_budget")]
    pub context_window_budget: usize,

    /// Ceiling for one request cycle, tool calls included
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    /// System prompt seeded at index 0 of every conversation
    #[serde(default = "default_system_prompt")]
    pub system_prompt: String,

    /// Redraw interval of the waiting indicator
    #[serde(default = "default_progress_interval_ms")]
    pub progress_interval_ms: u64,

    /// Consecutive tool-only cycles allowed before control returns to the user
    #[serde(default = "default_max_tool_rounds")]
    pub max_tool_rounds: u32,

    /// Sampling parameters
    #[serde(default)]
    pub sampling: SamplingConfig,

    /// Built-in tool settings
    #[serde(default)]
    pub tools: ToolsConfig,
}

fn default_endpoint() -> String {
    "http://localhost:11434/v1/chat/completions".into()
}
fn default_model() -> String {
    "llama3.1".into()
}
fn default_context_window_budget() -> usize {
    8192
}
fn default_request_timeout_secs() -> u64 {
    300
}
fn default_system_prompt() -> String {
    "You are a helpful assistant. Use the available tools when they help answer the question, \
     and answer concisely."
        .into()
}
fn default_progress_interval_ms() -> u64 {
    100
}
fn default_max_tool_rounds() -> u32 {
    25
}

/// Redact a secret string for Debug output.
fn redact(s: &Option<String>) -> &'static str {
    match s {
        Some(_) => "[REDACTED]",
        None => "None",
    }
}

impl std::fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppConfig")
            .field("endpoint", &self.endpoint)
            .field("model", &self.model)
            .field("api_key", &redact(&self.api_key))
            .field("context_window_budget", &self.context_window_budget)
            .field("request_timeout_secs", &self.request_timeout_secs)
            .field("sampling", &self.sampling)
            .field("system_prompt", &self.system_prompt)
            .field("progress_interval_ms", &self.progress_interval_ms)
            .field("max_tool_rounds", &self.max_tool_rounds)
            .field("tools", &self.tools)
            .finish()
    }
}

/// Sampling parameters sent with every request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SamplingConfig {
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    #[serde(default = "default_temperature")]
    pub temperature: f32,

    #[serde(default = "default_top_p")]
    pub top_p: f32,

    #[serde(default = "default_top_k")]
    pub top_k: u32,
}

fn default_max_tokens() -> u32 {
    2048
}
fn default_temperature() -> f32 {
    0.7
}
fn default_top_p() -> f32 {
    0.9
}
fn default_top_k() -> u32 {
    40
}

impl Default for SamplingConfig {
    fn default() -> Self {
        Self {
            max_tokens: default_max_tokens(),
            temperature: default_temperature(),
            top_p: default_top_p(),
            top_k: default_top_k(),
        }
    }
}

/// Settings for the built-in tools.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolsConfig {
    /// Commands `tool_run_command` may run. Empty = no restriction.
    #[serde(default = "default_allowed_commands")]
    pub allowed_commands: Vec<String>,

    /// Largest file `tool_read_file` returns, in bytes
    #[serde(default = "default_max_read_bytes")]
    pub max_read_bytes: u64,
}

fn default_allowed_commands() -> Vec<String> {
    ["ls", "cat", "head", "tail", "echo", "pwd", "date", "wc", "grep", "find", "git"]
        .iter()
        .map(|c| c.to_string())
        .collect()
}
fn default_max_read_bytes() -> u64 {
    64 * 1024
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            allowed_commands: default_allowed_commands(),
            max_read_bytes: default_max_read_bytes(),
        }
    }
}

impl AppConfig {
    /// Load configuration from the default path (~/.chatloop/config.toml).
    ///
    /// Environment variables override file values:
    /// - `CHATLOOP_ENDPOINT`, `CHATLOOP_MODEL`
    /// - `CHATLOOP_CONTEXT_BUDGET`, `CHATLOOP_REQUEST_TIMEOUT` (seconds)
    /// - `CHATLOOP_API_KEY`, then `OPENAI_API_KEY`, when the file sets no key
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::config_dir().join("config.toml");
        let mut config = Self::load_from(&config_path)?;
        config.apply_env(|key| std::env::var(key).ok())?;
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

    /// Apply overrides from an environment lookup.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(endpoint) = lookup("CHATLOOP_ENDPOINT") {
            self.endpoint = endpoint;
        }

        if let Some(model) = lookup("CHATLOOP_MODEL") {
            self.model = model;
        }

        if let Some(budget) = lookup("CHATLOOP_CONTEXT_BUDGET") {
            self.context_window_budget = parse_env("CHATLOOP_CONTEXT_BUDGET", &budget)?;
        }

        if let Some(timeout) = lookup("CHATLOOP_REQUEST_TIMEOUT") {
            self.request_timeout_secs = parse_env("CHATLOOP_REQUEST_TIMEOUT", &timeout)?;
        }

        if self.api_key.is_none() {
            self.api_key = lookup("CHATLOOP_API_KEY").or_else(|| lookup("OPENAI_API_KEY"));
        }

        Ok(())
    }

    /// Get the configuration directory path.
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".chatloop")
    }

    /// The per-cycle deadline.
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn progress_interval(&self) -> Duration {
        Duration::from_millis(self.progress_interval_ms)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.endpoint.trim().is_empty() {
            return Err(ConfigError::ValidationError("endpoint must not be empty".into()));
        }

        if self.model.trim().is_empty() {
            return Err(ConfigError::ValidationError("model must not be empty".into()));
        }

        if self.context_window_budget == 0 {
            return Err(ConfigError::ValidationError(
                "context_window_budget must be > 0".into(),
            ));
        }

        if self.request_timeout_secs == 0 {
            return Err(ConfigError::ValidationError(
                "request_timeout_secs must be > 0".into(),
            ));
        }

        if self.progress_interval_ms == 0 {
            return Err(ConfigError::ValidationError(
                "progress_interval_ms must be > 0".into(),
            ));
        }

        if self.max_tool_rounds == 0 {
            return Err(ConfigError::ValidationError(
                "max_tool_rounds must be > 0".into(),
            ));
        }

        if self.sampling.temperature < 0.0 || self.sampling.temperature > 2.0 {
            return Err(ConfigError::ValidationError(
                "temperature must be between 0.0 and 2.0".into(),
            ));
        }

        if self.sampling.top_p <= 0.0 || self.sampling.top_p > 1.0 {
            return Err(ConfigError::ValidationError(
                "top_p must be in (0.0, 1.0]".into(),
            ));
        }

        Ok(())
    }

    /// Check if an API key is available (from config or environment).
    pub fn has_api_key(&self) -> bool {
        self.api_key.is_some()
    }

    /// Generate a default config TOML string.
    pub fn default_toml() -> String {
        let config = Self::default();
        toml::to_string_pretty(&config).unwrap_or_default()
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            model: default_model(),
            api_key: None,
            context_window_budget: default_context_window_budget(),
            request_timeout_secs: default_request_timeout_secs(),
            sampling: SamplingConfig::default(),
            system_prompt: default_system_prompt(),
            progress_interval_ms: default_progress_interval_ms(),
            max_tool_rounds: default_max_tool_rounds(),
            tools: ToolsConfig::default(),
        }
    }
}

fn parse_env<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::InvalidEnv {
        key: key.to_string(),
        value: value.to_string(),
    })
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

    #[error("Invalid value for {key}: {value:?}")]
    InvalidEnv { key: String, value: String },

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}
