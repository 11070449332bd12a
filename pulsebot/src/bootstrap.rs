//! Config-driven assembly of the runtime.
//!
//! Everything that can fail here is an unrecoverable startup problem; the
//! CLI turns the error into a non-zero exit. Degradable concerns (memory
//! without credentials, web search without a key) log and assemble without
//! the capability instead of failing.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use env_config::Config;

use crate::agent::AgentLoop;
use crate::context::ContextBuilder;
use crate::embedding::{EmbeddingProvider, OllamaEmbedding, OpenAiEmbedding};
use crate::error::AgentError;
use crate::llm::{LlmProvider, MockLlm, OllamaChat, OpenAiChat};
use crate::memory::MemoryManager;
use crate::observe::ObservabilityWriter;
use crate::schedule::ScheduledProducers;
use crate::skills::{
    discover_instruction_skills, BridgeSkill, FileSkill, SearchBackend, ShellSkill, SkillRegistry,
    WebSearchSkill,
};
use crate::stream::{LogStore, ProtonClient, ProtonLogs};

const LLM_TIMEOUT: Duration = Duration::from_secs(120);
const DEFAULT_OLLAMA_HOST: &str = "http://localhost:11434";

/// The assembled runtime, ready to run.
pub struct Runtime {
    pub client: Arc<ProtonClient>,
    pub logs: Arc<dyn LogStore>,
    pub registry: Arc<SkillRegistry>,
    pub memory: Arc<MemoryManager>,
    pub llm: Arc<dyn LlmProvider>,
    pub agent: Arc<AgentLoop>,
    pub producers: Arc<ScheduledProducers>,
    pub shutdown: CancellationToken,
}

/// Builds the LLM provider selected by `agent.provider`.
pub fn build_llm(config: &Config) -> Result<Arc<dyn LlmProvider>, AgentError> {
    let provider_name = config.agent.provider.as_str();
    if provider_name == "mock" {
        return Ok(Arc::new(MockLlm::new()));
    }
    let provider = config
        .active_provider()
        .ok_or_else(|| AgentError::Bootstrap(format!("no providers.{provider_name} section")))?;
    let model = config
        .agent
        .model
        .clone()
        .or_else(|| provider.default_model.clone())
        .ok_or_else(|| {
            AgentError::Bootstrap(format!(
                "no model configured: set agent.model or providers.{provider_name}.default_model"
            ))
        })?;

    match provider_name {
        "openai" => {
            let api_key = provider.api_key.clone().filter(|k| !k.is_empty()).ok_or_else(|| {
                AgentError::Bootstrap("providers.openai.api_key is required".to_string())
            })?;
            let mut llm = OpenAiChat::new(
                &api_key,
                &model,
                config.agent.temperature,
                config.agent.max_tokens,
                LLM_TIMEOUT,
            );
            if let Some(host) = &provider.host {
                llm = llm.with_api_base(host);
            }
            Ok(Arc::new(llm))
        }
        "ollama" => {
            let host = provider
                .host
                .clone()
                .unwrap_or_else(|| DEFAULT_OLLAMA_HOST.to_string());
            Ok(Arc::new(OllamaChat::new(
                host,
                &model,
                config.agent.temperature,
                config.agent.max_tokens,
                LLM_TIMEOUT,
            )))
        }
        other => Err(AgentError::Bootstrap(format!(
            "unknown LLM provider '{other}' (expected openai, ollama, or mock)"
        ))),
    }
}

/// Builds the embedding provider for memory, or `None` when memory is
/// disabled or not usable with the given configuration.
pub fn build_embedding(config: &Config) -> Option<Arc<dyn EmbeddingProvider>> {
    if !config.memory.enabled {
        return None;
    }
    let memory = &config.memory;
    let timeout = Duration::from_secs(memory.embedding_timeout_seconds);
    match memory.embedding_provider.as_str() {
        "openai" => {
            let api_key = config
                .providers
                .get("openai")
                .and_then(|p| p.api_key.clone())
                .filter(|k| !k.is_empty());
            let Some(api_key) = api_key else {
                warn!("memory enabled but providers.openai.api_key is missing; memory is off");
                return None;
            };
            let model = memory
                .embedding_model
                .clone()
                .unwrap_or_else(|| "text-embedding-3-small".to_string());
            let mut embedder = OpenAiEmbedding::new(&api_key, model, timeout);
            if let Some(dims) = memory.dimensions {
                embedder = embedder.with_dimensions(dims);
            }
            Some(Arc::new(embedder))
        }
        "ollama" => {
            let host = config
                .providers
                .get("ollama")
                .and_then(|p| p.host.clone())
                .unwrap_or_else(|| DEFAULT_OLLAMA_HOST.to_string());
            let model = memory
                .embedding_model
                .clone()
                .unwrap_or_else(|| "nomic-embed-text".to_string());
            let mut embedder = OllamaEmbedding::new(host, model, timeout);
            if let Some(dims) = memory.dimensions {
                embedder = embedder.with_dimensions(dims);
            }
            Some(Arc::new(embedder))
        }
        other => {
            warn!(provider = other, "unknown embedding provider; memory is off");
            None
        }
    }
}

/// Builds the skill registry from config: built-in coded skills, then
/// instruction-skill discovery and the bridge. Returns the registry and the
/// instruction-skill index for the system prompt.
pub fn build_registry(
    config: &Config,
) -> Result<(Arc<SkillRegistry>, Vec<(String, String)>), AgentError> {
    let registry = SkillRegistry::new();
    let skills = &config.skills;
    let disabled = |name: &str| skills.disabled_skills.iter().any(|d| d == name);

    for builtin in &skills.builtin {
        if disabled(builtin) {
            info!(skill = %builtin, "built-in skill disabled");
            continue;
        }
        match builtin.as_str() {
            "shell" => registry.register(Arc::new(ShellSkill::new(
                Duration::from_secs(skills.shell_timeout_seconds),
                skills.shell_max_output,
            )))?,
            "file_ops" => registry.register(Arc::new(FileSkill::new(
                skills.file_base_path.clone(),
                skills.file_write_extensions.clone(),
            )))?,
            "web_search" => match search_backend(config) {
                Some(backend) => registry.register(Arc::new(WebSearchSkill::new(backend)))?,
                None => warn!("web_search requested but not configured; skipping"),
            },
            other => warn!(skill = other, "unknown built-in skill; skipping"),
        }
    }
    for custom in &skills.custom {
        warn!(skill = %custom, "custom coded skills are not supported by this build; skipping");
    }

    let mut discovered = discover_instruction_skills(&skills.skill_dirs);
    discovered.retain(|s| !disabled(s.name()));
    let index = if discovered.is_empty() {
        Vec::new()
    } else {
        let bridge = BridgeSkill::new(discovered);
        let index = bridge.index();
        registry.register(Arc::new(bridge))?;
        index
    };

    Ok((Arc::new(registry), index))
}

fn search_backend(config: &Config) -> Option<SearchBackend> {
    match config.search.provider.as_str() {
        "brave" => config
            .search
            .api_key
            .clone()
            .filter(|k| !k.is_empty())
            .map(|api_key| SearchBackend::Brave { api_key }),
        "searxng" => config
            .search
            .url
            .clone()
            .map(|url| SearchBackend::Searxng { url }),
        _ => None,
    }
}

/// Wires the whole runtime. The memory manager gets its own client so its
/// queries never share a transport with the agent loop's tail.
pub fn build_runtime(config: &Config, shutdown: CancellationToken) -> Result<Runtime, AgentError> {
    let client = Arc::new(ProtonClient::new(&config.database));
    let logs: Arc<dyn LogStore> = Arc::new(ProtonLogs::new(Arc::clone(&client)));

    let memory_client = Arc::new(ProtonClient::new(&config.database));
    let memory_logs: Arc<dyn LogStore> = Arc::new(ProtonLogs::new(memory_client));

    let llm = build_llm(config)?;
    let embedder = build_embedding(config);
    let memory = Arc::new(MemoryManager::new(
        memory_logs,
        embedder,
        config.memory.similarity_threshold,
        config.memory.dimensions,
    ));
    let (registry, skill_index) = build_registry(config)?;

    let context = ContextBuilder::new(
        Arc::clone(&logs),
        Arc::clone(&memory),
        Arc::clone(&registry),
        &config.agent.name,
        config.agent.instructions.clone(),
        skill_index,
        config.agent.history_limit,
        config.memory.retrieval_limit,
        config.memory.enabled,
    );
    let observe = ObservabilityWriter::new(Arc::clone(&logs), "agent-loop");

    let agent = Arc::new(AgentLoop::new(
        Arc::clone(&logs),
        Arc::clone(&llm),
        Arc::clone(&registry),
        Arc::clone(&memory),
        context,
        observe,
        &config.agent.name,
        Duration::from_secs(config.skills.shell_timeout_seconds),
        config.memory.enabled,
        shutdown.clone(),
    ));

    let producers = Arc::new(ScheduledProducers::new(
        Arc::clone(&logs),
        Arc::new(ObservabilityWriter::new(Arc::clone(&logs), "scheduler")),
        &config.agent.name,
        config.scheduled_tasks.clone(),
        shutdown.clone(),
    ));

    Ok(Runtime {
        client,
        logs,
        registry,
        memory,
        llm,
        agent,
        producers,
        shutdown,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mock_config(yaml: &str) -> Config {
        Config::from_yaml(yaml).unwrap()
    }

    #[test]
    fn mock_provider_builds_without_credentials() {
        let config = mock_config("agent:\n  provider: mock\n");
        let llm = build_llm(&config).unwrap();
        assert_eq!(llm.provider_name(), "mock");
    }

    #[test]
    fn openai_requires_api_key_and_model() {
        let config = mock_config(
            "agent:\n  provider: openai\nproviders:\n  openai:\n    default_model: gpt-4o-mini\n",
        );
        assert!(matches!(
            build_llm(&config),
            Err(AgentError::Bootstrap(_))
        ));

        let config = mock_config(
            "agent:\n  provider: openai\nproviders:\n  openai:\n    api_key: sk-x\n",
        );
        assert!(matches!(build_llm(&config), Err(AgentError::Bootstrap(_))));

        let config = mock_config(
            "agent:\n  provider: openai\nproviders:\n  openai:\n    api_key: sk-x\n    default_model: gpt-4o-mini\n",
        );
        let llm = build_llm(&config).unwrap();
        assert_eq!(llm.model(), "gpt-4o-mini");
    }

    #[test]
    fn memory_disabled_means_no_embedder() {
        let config = mock_config("agent:\n  provider: mock\nmemory:\n  enabled: false\n");
        assert!(build_embedding(&config).is_none());

        // Enabled but no key: degrades to None rather than failing.
        let config = mock_config("agent:\n  provider: mock\n");
        assert!(build_embedding(&config).is_none());
    }

    #[test]
    fn registry_skips_unconfigured_web_search() {
        let config = mock_config("agent:\n  provider: mock\n");
        let (registry, index) = build_registry(&config).unwrap();
        // shell + file_ops register; web_search has no credentials.
        assert!(registry.contains("run_command"));
        assert!(registry.contains("read_file"));
        assert!(!registry.contains("web_search"));
        assert!(index.is_empty());
    }

    #[test]
    fn disabled_skills_are_honored() {
        let config = mock_config(
            "agent:\n  provider: mock\nskills:\n  disabled_skills: [shell]\n",
        );
        let (registry, _) = build_registry(&config).unwrap();
        assert!(!registry.contains("run_command"));
        assert!(registry.contains("read_file"));
    }

    #[test]
    fn instruction_skills_bring_the_bridge() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("timeplus-sql-guide");
        std::fs::create_dir_all(&root).unwrap();
        std::fs::write(
            root.join("SKILL.md"),
            "---\nname: timeplus-sql-guide\ndescription: Streaming SQL.\n---\nbody\n",
        )
        .unwrap();

        let yaml = format!(
            "agent:\n  provider: mock\nskills:\n  skill_dirs: [\"{}\"]\n",
            dir.path().display()
        );
        let (registry, index) = build_registry(&mock_config(&yaml)).unwrap();
        assert!(registry.contains("load_skill"));
        assert!(registry.contains("read_skill_file"));
        assert_eq!(index[0].0, "timeplus-sql-guide");
    }
}
