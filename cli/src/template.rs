//! Default configuration written by `pulsebot init`.

use std::path::{Path, PathBuf};

pub const DEFAULT_CONFIG: &str = r#"# PulseBot configuration.
# Values support ${VAR} and ${VAR:-default} substitution from the
# environment; the CLI loads .env before reading this file.

agent:
  name: pulsebot
  provider: openai
  model: gpt-4o-mini
  temperature: 0.7
  max_tokens: 2048

database:
  host: ${PROTON_HOST:-localhost}
  query_port: 8123
  stream_port: 3218
  username: ${PROTON_USER:-default}
  password: ${PROTON_PASSWORD}

providers:
  openai:
    api_key: ${OPENAI_API_KEY}
    default_model: gpt-4o-mini
  ollama:
    host: ${OLLAMA_HOST:-http://localhost:11434}
    default_model: llama3.2
    enabled: false

channels:
  web:
    enabled: true
  cli:
    enabled: true

skills:
  builtin: [shell, file_ops, web_search]
  skill_dirs: []
  disabled_skills: []
  shell_timeout_seconds: 30
  file_base_path: .

search:
  provider: brave
  api_key: ${BRAVE_API_KEY}

memory:
  enabled: true
  similarity_threshold: 0.95
  embedding_provider: openai
  embedding_model: text-embedding-3-small
  embedding_timeout_seconds: 30

scheduled_tasks:
  heartbeat:
    enabled: true
    interval_minutes: 30
  daily_summary:
    enabled: true
    daily_time: "08:00"
  cost_alert:
    enabled: true
    hourly_cost_threshold: 5.0

logging:
  level: info
  format: text
"#;

/// Writes the template, refusing to overwrite without `force`.
pub fn write_default_config(path: &Path, force: bool) -> Result<PathBuf, std::io::Error> {
    if path.exists() && !force {
        return Err(std::io::Error::new(
            std::io::ErrorKind::AlreadyExists,
            format!("{} exists; use --force to overwrite", path.display()),
        ));
    }
    std::fs::write(path, DEFAULT_CONFIG)?;
    Ok(path.to_path_buf())
}
