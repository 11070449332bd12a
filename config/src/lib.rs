//! PulseBot configuration: one YAML document, resolved with environment
//! substitution (`${VAR}`, `${VAR:-default}`) before parsing, then validated.
//!
//! The CLI loads `.env` into the process environment first, so secrets live
//! outside the config file and are pulled in by substitution. Every section
//! has serde defaults; a missing section means "defaults only".

mod subst;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use subst::expand_env;

#[derive(Error, Debug)]
pub enum LoadError {
    #[error("read config {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },
    #[error("parse config: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Root configuration document. See `pulsebot.yaml` written by `pulsebot init`
/// for a commented template.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default)]
    pub agent: AgentConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub providers: BTreeMap<String, ProviderConfig>,
    #[serde(default)]
    pub channels: BTreeMap<String, ChannelConfig>,
    #[serde(default)]
    pub skills: SkillsConfig,
    #[serde(default)]
    pub search: SearchConfig,
    #[serde(default)]
    pub memory: MemoryConfig,
    #[serde(default)]
    pub scheduled_tasks: BTreeMap<String, ScheduledTaskConfig>,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Agent identity and model selection.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AgentConfig {
    #[serde(default = "default_agent_name")]
    pub name: String,
    /// Model identifier; falls back to the provider's `default_model`.
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    /// Free-form extra instructions appended to the system prompt.
    #[serde(default)]
    pub instructions: Option<String>,
    /// How many past messages of a session the context builder loads.
    #[serde(default = "default_history_limit")]
    pub history_limit: usize,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            name: default_agent_name(),
            model: None,
            provider: default_provider(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            instructions: None,
            history_limit: default_history_limit(),
        }
    }
}

/// Streaming DB endpoints: request/response on `query_port`, tails on
/// `stream_port`. Auth is username + optional password.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_host")]
    pub host: String,
    #[serde(default = "default_query_port")]
    pub query_port: u16,
    #[serde(default = "default_stream_port")]
    pub stream_port: u16,
    #[serde(default = "default_db_user")]
    pub username: String,
    #[serde(default)]
    pub password: Option<String>,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            host: default_db_host(),
            query_port: default_query_port(),
            stream_port: default_stream_port(),
            username: default_db_user(),
            password: None,
        }
    }
}

/// One LLM provider entry under `providers.<name>`.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProviderConfig {
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub default_model: Option<String>,
    /// Base URL for local providers (e.g. Ollama).
    #[serde(default)]
    pub host: Option<String>,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

/// One front-end channel entry under `channels.<name>`.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ChannelConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub token: Option<String>,
    /// Empty list means any user.
    #[serde(default)]
    pub allowed_users: Vec<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SkillsConfig {
    /// Built-in coded skills to register.
    #[serde(default = "default_builtin_skills")]
    pub builtin: Vec<String>,
    /// Reserved for out-of-tree coded skills.
    #[serde(default)]
    pub custom: Vec<String>,
    /// Directories scanned for instruction-skill packages.
    #[serde(default)]
    pub skill_dirs: Vec<PathBuf>,
    #[serde(default)]
    pub disabled_skills: Vec<String>,
    #[serde(default = "default_shell_timeout")]
    pub shell_timeout_seconds: u64,
    #[serde(default = "default_shell_max_output")]
    pub shell_max_output: usize,
    /// Base path for the file skill; tools cannot escape it.
    #[serde(default = "default_file_base")]
    pub file_base_path: PathBuf,
    /// When set, `write_file` only accepts these extensions.
    #[serde(default)]
    pub file_write_extensions: Option<Vec<String>>,
}

impl Default for SkillsConfig {
    fn default() -> Self {
        Self {
            builtin: default_builtin_skills(),
            custom: Vec::new(),
            skill_dirs: Vec::new(),
            disabled_skills: Vec::new(),
            shell_timeout_seconds: default_shell_timeout(),
            shell_max_output: default_shell_max_output(),
            file_base_path: default_file_base(),
            file_write_extensions: None,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SearchConfig {
    /// `brave` or `searxng`.
    #[serde(default = "default_search_provider")]
    pub provider: String,
    #[serde(default)]
    pub api_key: Option<String>,
    /// SearXNG instance URL.
    #[serde(default)]
    pub url: Option<String>,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            provider: default_search_provider(),
            api_key: None,
            url: None,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MemoryConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_similarity_threshold")]
    pub similarity_threshold: f32,
    #[serde(default = "default_embedding_provider")]
    pub embedding_provider: String,
    #[serde(default)]
    pub embedding_model: Option<String>,
    /// Override; otherwise discovered from the first embedding.
    #[serde(default)]
    pub dimensions: Option<usize>,
    #[serde(default = "default_embedding_timeout")]
    pub embedding_timeout_seconds: u64,
    /// How many memories the context builder retrieves per turn.
    #[serde(default = "default_memory_limit")]
    pub retrieval_limit: usize,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            similarity_threshold: default_similarity_threshold(),
            embedding_provider: default_embedding_provider(),
            embedding_model: None,
            dimensions: None,
            embedding_timeout_seconds: default_embedding_timeout(),
            retrieval_limit: default_memory_limit(),
        }
    }
}

/// One entry under `scheduled_tasks.<name>` (`heartbeat`, `daily_summary`,
/// `cost_alert`). Which timing field applies depends on the task.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ScheduledTaskConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub interval_minutes: Option<u64>,
    /// UTC wall-clock time `HH:MM` for daily tasks.
    #[serde(default)]
    pub daily_time: Option<String>,
    /// Message payload text appended by the producer.
    #[serde(default)]
    pub payload: Option<String>,
    /// Cost-alert threshold in dollars per hour.
    #[serde(default)]
    pub hourly_cost_threshold: Option<f64>,
}

impl Default for ScheduledTaskConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_minutes: None,
            daily_time: None,
            payload: None,
            hourly_cost_threshold: None,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Json,
    #[default]
    Text,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::Text,
        }
    }
}

impl Config {
    /// Reads `path`, expands environment references, parses and validates.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, LoadError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| LoadError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_yaml(&raw)
    }

    /// Parses a YAML document (after env substitution) and validates it.
    pub fn from_yaml(raw: &str) -> Result<Self, LoadError> {
        let expanded = expand_env(raw);
        let config: Config = serde_yaml::from_str(&expanded)?;
        config.validate()?;
        Ok(config)
    }

    /// The provider entry selected by `agent.provider`, when present.
    pub fn active_provider(&self) -> Option<&ProviderConfig> {
        self.providers.get(&self.agent.provider)
    }

    fn validate(&self) -> Result<(), LoadError> {
        // "mock" needs no provider entry; everything else does.
        if self.agent.provider != "mock" {
            match self.providers.get(&self.agent.provider) {
                None => {
                    return Err(LoadError::Invalid(format!(
                        "agent.provider '{}' has no providers.{} section",
                        self.agent.provider, self.agent.provider
                    )))
                }
                Some(p) if !p.enabled => {
                    return Err(LoadError::Invalid(format!(
                        "agent.provider '{}' is disabled",
                        self.agent.provider
                    )))
                }
                Some(_) => {}
            }
        }

        if !(self.memory.similarity_threshold > 0.0 && self.memory.similarity_threshold <= 1.0) {
            return Err(LoadError::Invalid(format!(
                "memory.similarity_threshold must be in (0, 1], got {}",
                self.memory.similarity_threshold
            )));
        }

        if !matches!(self.search.provider.as_str(), "brave" | "searxng") {
            return Err(LoadError::Invalid(format!(
                "search.provider must be 'brave' or 'searxng', got '{}'",
                self.search.provider
            )));
        }

        for (name, task) in &self.scheduled_tasks {
            if let Some(t) = &task.daily_time {
                if parse_daily_time(t).is_none() {
                    return Err(LoadError::Invalid(format!(
                        "scheduled_tasks.{}.daily_time '{}' is not HH:MM",
                        name, t
                    )));
                }
            }
        }

        Ok(())
    }
}

/// Parses `HH:MM` into (hour, minute). Returns `None` when out of range.
pub fn parse_daily_time(s: &str) -> Option<(u32, u32)> {
    let (h, m) = s.split_once(':')?;
    let h: u32 = h.parse().ok()?;
    let m: u32 = m.parse().ok()?;
    (h < 24 && m < 60).then_some((h, m))
}

fn default_true() -> bool {
    true
}
fn default_agent_name() -> String {
    "pulsebot".to_string()
}
fn default_provider() -> String {
    "openai".to_string()
}
fn default_temperature() -> f32 {
    0.7
}
fn default_max_tokens() -> u32 {
    2048
}
fn default_history_limit() -> usize {
    20
}
fn default_db_host() -> String {
    "localhost".to_string()
}
fn default_query_port() -> u16 {
    8123
}
fn default_stream_port() -> u16 {
    3218
}
fn default_db_user() -> String {
    "default".to_string()
}
fn default_builtin_skills() -> Vec<String> {
    vec![
        "shell".to_string(),
        "file_ops".to_string(),
        "web_search".to_string(),
    ]
}
fn default_shell_timeout() -> u64 {
    30
}
fn default_shell_max_output() -> usize {
    10_000
}
fn default_file_base() -> PathBuf {
    PathBuf::from(".")
}
fn default_search_provider() -> String {
    "brave".to_string()
}
fn default_similarity_threshold() -> f32 {
    0.95
}
fn default_embedding_provider() -> String {
    "openai".to_string()
}
fn default_embedding_timeout() -> u64 {
    30
}
fn default_memory_limit() -> usize {
    5
}
fn default_log_level() -> String {
    "info".to_string()
}
