//! # PulseBot
//!
//! A stream-native conversational-agent runtime. Every user interaction,
//! model call, tool invocation, and remembered fact is a row appended to one
//! of five streams on a streaming database; the runtime's parts communicate
//! only through those streams.
//!
//! ## Main modules
//!
//! - [`stream`]: the substrate: [`ProtonClient`] (execute / query / tail),
//!   the typed [`LogStore`] trait with [`ProtonLogs`] and the test-facing
//!   [`InMemoryLogs`], and the idempotent schema initializer.
//! - [`types`]: record types for the five logs and their wire enums.
//! - [`embedding`]: [`EmbeddingProvider`] with OpenAI and Ollama backends.
//! - [`memory`]: [`MemoryManager`]: dedup by pure cosine, retrieval by the
//!   hybrid `similarity × importance` score, append-only soft deletion.
//! - [`llm`]: [`LlmProvider`] with OpenAI, Ollama, and scripted mock
//!   implementations.
//! - [`skills`]: the [`Skill`] trait, [`SkillRegistry`] dispatch with JSON
//!   schema validation, shell / file / web-search built-ins, and
//!   filesystem-discovered instruction skills behind the bridge skill.
//! - [`context`]: per-turn assembly of system prompt, history, and tools.
//! - [`agent`]: the [`AgentLoop`]: tail triggers, bounded reason/act
//!   cycle, status broadcasts, memory extraction.
//! - [`schedule`]: heartbeat / daily summary / cost alert producers.
//! - [`observe`]: best-effort LLM-log, tool-log, and event writes.
//! - [`bootstrap`]: config-driven assembly of all of the above.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use tokio_util::sync::CancellationToken;
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), pulsebot::AgentError> {
//! let config = env_config::Config::load("pulsebot.yaml")?;
//! let runtime = pulsebot::bootstrap::build_runtime(&config, CancellationToken::new())?;
//! pulsebot::stream::init_streams(&runtime.client).await?;
//! runtime.agent.run().await;
//! # Ok(())
//! # }
//! ```

pub mod agent;
pub mod bootstrap;
pub mod context;
pub mod embedding;
pub mod error;
pub mod llm;
pub mod memory;
pub mod observe;
pub mod schedule;
pub mod skills;
pub mod stream;
pub mod types;

pub use agent::{AgentLoop, MAX_ITERATIONS};
pub use bootstrap::{build_embedding, build_llm, build_registry, build_runtime, Runtime};
pub use context::{BuiltContext, ContextBuilder};
pub use embedding::{EmbeddingError, EmbeddingProvider, MockEmbedding, OllamaEmbedding, OpenAiEmbedding};
pub use error::AgentError;
pub use llm::{
    ChatMessage, ChatResponse, ChatRole, LlmError, LlmProvider, LlmUsage, MockLlm, OllamaChat,
    OpenAiChat, ToolCallRequest,
};
pub use memory::{cosine_similarity, MemoryError, MemoryManager, MemorySearchHit};
pub use observe::{system_prompt_hash, ObservabilityWriter};
pub use schedule::ScheduledProducers;
pub use skills::{
    BridgeSkill, FileSkill, InstructionSkill, SearchBackend, ShellSkill, Skill, SkillError,
    SkillRegistry, ToolDefinition, ToolResult, WebSearchSkill,
};
pub use stream::{
    init_streams, verify_streams, InMemoryLogs, LogStore, MemoryFilter, ProtonClient, ProtonLogs,
    Row, SeekTo, StreamError, Tail,
};
pub use types::{
    channel_target, reply_target, EventRecord, LlmCallRecord, LlmCallStatus, MemoryCategory,
    MemoryRecord, MemoryType, MessageRecord, MessageType, Severity, ToolCallStatus, ToolLogRecord,
    TARGET_AGENT, TARGET_BROADCAST,
};
