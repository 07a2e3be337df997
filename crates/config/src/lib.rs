//! Configuration loading, validation, and management for devloop.
//!
//! Loads configuration from `~/.devloop/config.toml` with environment
//! variable overrides. Validates all settings at startup.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// The root configuration structure.
///
/// Maps directly to `~/.devloop/config.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// LLM client settings
    #[serde(default)]
    pub llm: LlmConfig,

    /// Agent and controller limits
    #[serde(default)]
    pub agent: AgentConfig,

    /// Where the event log is persisted
    #[serde(default)]
    pub storage: StorageConfig,

    /// Sandbox settings
    #[serde(default)]
    pub runtime: RuntimeConfig,
}

/// LLM client configuration: sampling parameters plus timeout and retry policy.
#[derive(Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    #[serde(default = "default_model")]
    pub model: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,

    #[serde(default)]
    pub temperature: f32,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_output_tokens: Option<u32>,

    /// Per-request timeout
    #[serde(default = "default_llm_timeout")]
    pub timeout_secs: u64,

    /// Attempts per completion, including the first
    #[serde(default = "default_num_retries")]
    pub num_retries: u32,

    #[serde(default = "default_retry_min_wait")]
    pub retry_min_wait_secs: u64,

    #[serde(default = "default_retry_max_wait")]
    pub retry_max_wait_secs: u64,
}

fn default_model() -> String {
    "anthropic/claude-sonnet-4".into()
}
fn default_llm_timeout() -> u64 {
    120
}
fn default_num_retries() -> u32 {
    5
}
fn default_retry_min_wait() -> u64 {
    3
}
fn default_retry_max_wait() -> u64 {
    60
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            model: default_model(),
            api_key: None,
            base_url: None,
            temperature: 0.0,
            top_p: None,
            max_output_tokens: None,
            timeout_secs: default_llm_timeout(),
            num_retries: default_num_retries(),
            retry_min_wait_secs: default_retry_min_wait(),
            retry_max_wait_secs: default_retry_max_wait(),
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

impl std::fmt::Debug for LlmConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LlmConfig")
            .field("model", &self.model)
            .field("api_key", &redact(&self.api_key))
            .field("base_url", &self.base_url)
            .field("temperature", &self.temperature)
            .field("top_p", &self.top_p)
            .field("max_output_tokens", &self.max_output_tokens)
            .field("timeout_secs", &self.timeout_secs)
            .field("num_retries", &self.num_retries)
            .field("retry_min_wait_secs", &self.retry_min_wait_secs)
            .field("retry_max_wait_secs", &self.retry_max_wait_secs)
            .finish()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Persona that handles the user's task
    #[serde(default = "default_agent")]
    pub default_agent: String,

    /// Persona that browse blocks are delegated to
    #[serde(default = "default_delegate_agent")]
    pub delegate_agent: String,

    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,

    /// Spend ceiling per task in USD; unlimited when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_budget_per_task: Option<f64>,

    /// Persist controller state after every step
    #[serde(default = "default_true")]
    pub checkpoint: bool,
}

fn default_agent() -> String {
    "codeact".into()
}
fn default_delegate_agent() -> String {
    "searcher".into()
}
fn default_max_iterations() -> u32 {
    100
}
fn default_true() -> bool {
    true
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            default_agent: default_agent(),
            delegate_agent: default_delegate_agent(),
            max_iterations: default_max_iterations(),
            max_budget_per_task: None,
            checkpoint: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// "local" or "memory"
    #[serde(default = "default_storage_backend")]
    pub backend: String,

    /// Root directory for the local backend
    #[serde(default = "default_storage_path")]
    pub path: PathBuf,
}

fn default_storage_backend() -> String {
    "local".into()
}
fn default_storage_path() -> PathBuf {
    AppConfig::config_dir().join("file_store")
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: default_storage_backend(),
            path: default_storage_path(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    #[serde(default = "default_runtime_kind")]
    pub kind: String,

    /// Directory commands run in and file paths resolve against
    #[serde(default = "default_workspace_dir")]
    pub workspace_dir: PathBuf,

    /// Per-command timeout
    #[serde(default = "default_runtime_timeout")]
    pub timeout_secs: u64,
}

fn default_runtime_kind() -> String {
    "local".into()
}
fn default_workspace_dir() -> PathBuf {
    AppConfig::config_dir().join("workspace")
}
fn default_runtime_timeout() -> u64 {
    120
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            kind: default_runtime_kind(),
            workspace_dir: default_workspace_dir(),
            timeout_secs: default_runtime_timeout(),
        }
    }
}

impl AppConfig {
    /// Load configuration from the default path (~/.devloop/config.toml).
    ///
    /// Environment overrides, highest priority first:
    /// - `DEVLOOP_LLM_API_KEY`, then `LLM_API_KEY`
    /// - `DEVLOOP_LLM_MODEL`
    /// - `DEVLOOP_MAX_ITERATIONS`
    /// - `DEVLOOP_MAX_BUDGET`
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::config_dir().join("config.toml");
        let mut config = Self::load_from(&config_path)?;
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

    fn apply_env_overrides(
        &mut self,
        var: impl Fn(&str) -> Option<String>,
    ) -> Result<(), ConfigError> {
        if let Some(key) = var("DEVLOOP_LLM_API_KEY").or_else(|| var("LLM_API_KEY")) {
            self.llm.api_key = Some(key);
        }
        if let Some(model) = var("DEVLOOP_LLM_MODEL") {
            self.llm.model = model;
        }
        if let Some(raw) = var("DEVLOOP_MAX_ITERATIONS") {
            self.agent.max_iterations = raw.parse().map_err(|_| {
                ConfigError::ValidationError(format!("DEVLOOP_MAX_ITERATIONS is not a number: {raw}"))
            })?;
        }
        if let Some(raw) = var("DEVLOOP_MAX_BUDGET") {
            let budget = raw.parse().map_err(|_| {
                ConfigError::ValidationError(format!("DEVLOOP_MAX_BUDGET is not a number: {raw}"))
            })?;
            self.agent.max_budget_per_task = Some(budget);
        }
        Ok(())
    }

    /// Get the configuration directory path.
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".devloop")
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=2.0).contains(&self.llm.temperature) {
            return Err(ConfigError::ValidationError(
                "llm.temperature must be between 0.0 and 2.0".into(),
            ));
        }
        if self.llm.num_retries == 0 {
            return Err(ConfigError::ValidationError(
                "llm.num_retries must be at least 1".into(),
            ));
        }
        if self.llm.retry_min_wait_secs > self.llm.retry_max_wait_secs {
            return Err(ConfigError::ValidationError(
                "llm.retry_min_wait_secs must not exceed llm.retry_max_wait_secs".into(),
            ));
        }
        if self.agent.max_iterations == 0 {
            return Err(ConfigError::ValidationError(
                "agent.max_iterations must be > 0".into(),
            ));
        }
        if self.agent.max_budget_per_task.is_some_and(|b| b < 0.0) {
            return Err(ConfigError::ValidationError(
                "agent.max_budget_per_task must not be negative".into(),
            ));
        }
        if !matches!(self.storage.backend.as_str(), "local" | "memory") {
            return Err(ConfigError::ValidationError(format!(
                "unknown storage.backend '{}' (expected \"local\" or \"memory\")",
                self.storage.backend
            )));
        }
        Ok(())
    }

    /// Check if an API key is available (from config or environment).
    pub fn has_api_key(&self) -> bool {
        self.llm.api_key.is_some()
    }

    /// Generate a default config TOML string.
    pub fn default_toml() -> String {
        toml::to_string_pretty(&Self::default()).unwrap_or_default()
    }
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
