//! Crate-level error type.
//!
//! Subsystems keep their own error enums; this is the aggregation the CLI
//! boundary and the per-turn catch see. Recoverable tool failures never
//! appear here: they travel as `ToolResult { success: false, .. }`.

use thiserror::Error;

use crate::embedding::EmbeddingError;
use crate::llm::LlmError;
use crate::memory::MemoryError;
use crate::skills::SkillError;
use crate::stream::StreamError;

#[derive(Error, Debug)]
pub enum AgentError {
    #[error(transparent)]
    Config(#[from] env_config::LoadError),
    #[error(transparent)]
    Stream(#[from] StreamError),
    #[error(transparent)]
    Memory(#[from] MemoryError),
    #[error(transparent)]
    Embedding(#[from] EmbeddingError),
    #[error(transparent)]
    Llm(#[from] LlmError),
    #[error(transparent)]
    Skill(#[from] SkillError),
    #[error("bootstrap failed: {0}")]
    Bootstrap(String),
}
