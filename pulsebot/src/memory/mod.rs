//! Semantic memory: embedding-indexed rows on the `memories` stream.
//!
//! Deduplication uses *pure* cosine similarity so content identity, not
//! salience, drives merging; retrieval uses the hybrid score
//! `similarity × importance` so important but slightly off-topic memories
//! can still surface. All reads go through the log store, which already
//! resolves latest-per-id and filters deleted rows.

use std::sync::Arc;

use once_cell::sync::OnceCell;
use thiserror::Error;
use tracing::{debug, info};
use uuid::Uuid;

use crate::embedding::{EmbeddingError, EmbeddingProvider};
use crate::stream::{LogStore, MemoryFilter, StreamError};
use crate::types::{MemoryCategory, MemoryRecord, MemoryType};

#[derive(Error, Debug)]
pub enum MemoryError {
    #[error("memory is unavailable: {0}")]
    Unavailable(String),
    #[error("embedding dimension mismatch: stored {stored}, provider {provider}")]
    DimensionMismatch { stored: usize, provider: usize },
    #[error(transparent)]
    Embedding(#[from] EmbeddingError),
    #[error(transparent)]
    Stream(#[from] StreamError),
}

/// One retrieval hit: the record plus its scores.
#[derive(Clone, Debug)]
pub struct MemorySearchHit {
    pub record: MemoryRecord,
    /// Pure cosine similarity to the query.
    pub similarity: f32,
    /// Hybrid score: `similarity × importance`.
    pub score: f32,
}

pub struct MemoryManager {
    logs: Arc<dyn LogStore>,
    embedder: Option<Arc<dyn EmbeddingProvider>>,
    similarity_threshold: f32,
    configured_dimensions: Option<usize>,
    dimensions: OnceCell<usize>,
}

impl MemoryManager {
    /// `logs` should be a handle with its own transport, distinct from the
    /// agent loop's, so memory queries never contend with the main tail.
    pub fn new(
        logs: Arc<dyn LogStore>,
        embedder: Option<Arc<dyn EmbeddingProvider>>,
        similarity_threshold: f32,
        configured_dimensions: Option<usize>,
    ) -> Self {
        Self {
            logs,
            embedder,
            similarity_threshold,
            configured_dimensions,
            dimensions: OnceCell::new(),
        }
    }

    /// False when no embedding provider is configured; memory retrieval and
    /// extraction are skipped in that case.
    pub fn is_available(&self) -> bool {
        self.embedder.is_some()
    }

    /// Stores a memory; with `check_duplicates`, an existing record whose
    /// pure cosine similarity is at or above the threshold wins and its id
    /// is returned without appending anything.
    #[allow(clippy::too_many_arguments)]
    pub async fn store(
        &self,
        content: &str,
        memory_type: MemoryType,
        category: MemoryCategory,
        importance: f32,
        source_session_id: &str,
        check_duplicates: bool,
    ) -> Result<Uuid, MemoryError> {
        let embedding = self.embed_checked(content).await?;

        if check_duplicates {
            // Dedup scans all types and categories: identity is about
            // content, not where it was filed.
            let candidates = self.logs.memory_candidates(&MemoryFilter::default()).await?;
            let near_band = 0.8 * self.similarity_threshold;
            for candidate in &candidates {
                if candidate.embedding.is_empty() {
                    continue;
                }
                let similarity = cosine_similarity(&embedding, &candidate.embedding);
                if similarity >= self.similarity_threshold {
                    debug!(
                        existing = %candidate.id,
                        similarity,
                        "duplicate memory, keeping existing record"
                    );
                    return Ok(candidate.id);
                }
                if similarity >= near_band {
                    info!(
                        existing = %candidate.id,
                        similarity,
                        threshold = self.similarity_threshold,
                        "near-duplicate memory stored separately"
                    );
                }
            }
        }

        let record = MemoryRecord {
            id: Uuid::new_v4(),
            timestamp: chrono::Utc::now(),
            memory_type,
            category,
            content: content.to_string(),
            source_session_id: source_session_id.to_string(),
            embedding,
            importance: importance.clamp(0.0, 1.0),
            is_deleted: false,
        };
        self.logs.append_memory(&record).await?;
        Ok(record.id)
    }

    /// Hybrid-ranked retrieval. Results are ordered by score descending,
    /// ties broken by recency then id, and are a prefix-stable function of
    /// `limit`.
    pub async fn search(
        &self,
        query: &str,
        limit: usize,
        min_importance: f32,
        memory_types: Option<&[MemoryType]>,
        categories: Option<&[MemoryCategory]>,
    ) -> Result<Vec<MemorySearchHit>, MemoryError> {
        let query_vector = self.embed_checked(query).await?;
        let candidates = self
            .logs
            .memory_candidates(&MemoryFilter {
                memory_types: memory_types.map(<[_]>::to_vec),
                categories: categories.map(<[_]>::to_vec),
                min_importance,
                ..Default::default()
            })
            .await?;

        let mut hits: Vec<MemorySearchHit> = candidates
            .into_iter()
            .filter(|c| !c.embedding.is_empty())
            .map(|record| {
                let similarity = cosine_similarity(&query_vector, &record.embedding);
                MemorySearchHit {
                    score: similarity * record.importance,
                    similarity,
                    record,
                }
            })
            .collect();

        hits.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(b.record.timestamp.cmp(&a.record.timestamp))
                .then(a.record.id.cmp(&b.record.id))
        });
        hits.truncate(limit);
        Ok(hits)
    }

    /// Memories extracted from one session, newest first.
    pub async fn get_by_session(
        &self,
        session_id: &str,
        limit: usize,
    ) -> Result<Vec<MemoryRecord>, MemoryError> {
        Ok(self.logs.memories_by_session(session_id, limit).await?)
    }

    /// Most recent live memories, optionally filtered by type.
    pub async fn get_recent(
        &self,
        limit: usize,
        memory_types: Option<&[MemoryType]>,
    ) -> Result<Vec<MemoryRecord>, MemoryError> {
        Ok(self
            .logs
            .memory_candidates(&MemoryFilter {
                memory_types: memory_types.map(<[_]>::to_vec),
                limit,
                ..Default::default()
            })
            .await?)
    }

    /// Appends the tombstone; subsequent reads no longer return the id.
    pub async fn mark_deleted(&self, id: Uuid) -> Result<(), MemoryError> {
        self.logs.append_memory(&MemoryRecord::tombstone(id)).await?;
        Ok(())
    }

    /// Embeds text and enforces a single dimensionality per deployment.
    /// The first successful embedding pins the expected length; a provider
    /// or stored vector that disagrees later is a configuration error.
    async fn embed_checked(&self, text: &str) -> Result<Vec<f32>, MemoryError> {
        let embedder = self
            .embedder
            .as_ref()
            .ok_or_else(|| MemoryError::Unavailable("no embedding provider".to_string()))?;
        let vector = embedder.embed(text).await?;

        let expected = *self
            .dimensions
            .get_or_init(|| self.configured_dimensions.unwrap_or(vector.len()));
        if vector.len() != expected {
            return Err(MemoryError::DimensionMismatch {
                stored: expected,
                provider: vector.len(),
            });
        }
        Ok(vector)
    }
}

/// Cosine similarity; 0.0 when either vector has zero magnitude or the
/// lengths disagree.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        dot / (norm_a * norm_b)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::MockEmbedding;
    use crate::stream::InMemoryLogs;

    fn manager(logs: Arc<InMemoryLogs>) -> MemoryManager {
        MemoryManager::new(
            logs,
            Some(Arc::new(MockEmbedding::new(16))),
            0.95,
            None,
        )
    }

    #[test]
    fn cosine_handles_degenerate_inputs() {
        assert_eq!(cosine_similarity(&[1.0, 0.0], &[1.0, 0.0]), 1.0);
        assert_eq!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]), 0.0);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 0.0]), 0.0);
        assert_eq!(cosine_similarity(&[1.0], &[1.0, 0.0]), 0.0);
    }

    #[tokio::test]
    async fn duplicate_store_returns_existing_id() {
        let logs = Arc::new(InMemoryLogs::new());
        let memory = manager(Arc::clone(&logs));

        let first = memory
            .store(
                "User's name is John Smith",
                MemoryType::Fact,
                MemoryCategory::UserInfo,
                0.9,
                "sess-x",
                true,
            )
            .await
            .unwrap();
        let second = memory
            .store(
                "User's name is John Smith",
                MemoryType::Fact,
                MemoryCategory::UserInfo,
                0.9,
                "sess-x",
                true,
            )
            .await
            .unwrap();
        assert_eq!(first, second);
        assert_eq!(logs.memory_rows().len(), 1);
    }

    #[tokio::test]
    async fn dedup_ignores_type_and_category() {
        let logs = Arc::new(InMemoryLogs::new());
        let memory = manager(Arc::clone(&logs));
        let first = memory
            .store(
                "likes espresso",
                MemoryType::Fact,
                MemoryCategory::General,
                0.5,
                "s1",
                true,
            )
            .await
            .unwrap();
        let second = memory
            .store(
                "likes espresso",
                MemoryType::Preference,
                MemoryCategory::UserInfo,
                0.9,
                "s2",
                true,
            )
            .await
            .unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn store_without_dedup_appends_new_rows() {
        let logs = Arc::new(InMemoryLogs::new());
        let memory = manager(Arc::clone(&logs));
        let a = memory
            .store("same text", MemoryType::Fact, MemoryCategory::General, 0.5, "s1", false)
            .await
            .unwrap();
        let b = memory
            .store("same text", MemoryType::Fact, MemoryCategory::General, 0.5, "s1", false)
            .await
            .unwrap();
        assert_ne!(a, b);
        assert_eq!(logs.memory_rows().len(), 2);
    }

    #[tokio::test]
    async fn search_ranks_by_hybrid_score() {
        let logs = Arc::new(InMemoryLogs::new());
        let embedder = Arc::new(MockEmbedding::new(4));
        // Same similarity to the query, different importance.
        embedder.set_vector("query", vec![1.0, 0.0, 0.0, 0.0]);
        embedder.set_vector("vital", vec![1.0, 0.0, 0.0, 0.0]);
        embedder.set_vector("minor", vec![1.0, 0.0, 0.0, 0.0]);
        // On-topic beats off-topic at equal importance.
        embedder.set_vector("offtopic", vec![0.0, 1.0, 0.0, 0.0]);
        let memory = MemoryManager::new(Arc::clone(&logs) as Arc<dyn LogStore>, Some(embedder), 0.95, None);

        memory
            .store("minor", MemoryType::Fact, MemoryCategory::General, 0.2, "s", false)
            .await
            .unwrap();
        memory
            .store("vital", MemoryType::Fact, MemoryCategory::General, 0.9, "s", false)
            .await
            .unwrap();
        memory
            .store("offtopic", MemoryType::Fact, MemoryCategory::General, 0.9, "s", false)
            .await
            .unwrap();

        let hits = memory.search("query", 10, 0.0, None, None).await.unwrap();
        assert_eq!(hits[0].record.content, "vital");
        assert_eq!(hits[1].record.content, "minor");
        assert_eq!(hits[2].record.content, "offtopic");

        // Monotone in limit: shorter results are a prefix of longer ones.
        let top2 = memory.search("query", 2, 0.0, None, None).await.unwrap();
        assert_eq!(top2.len(), 2);
        assert_eq!(top2[0].record.id, hits[0].record.id);
        assert_eq!(top2[1].record.id, hits[1].record.id);
    }

    #[tokio::test]
    async fn deleted_memories_never_come_back() {
        let logs = Arc::new(InMemoryLogs::new());
        let memory = manager(Arc::clone(&logs));
        let id = memory
            .store("ephemeral", MemoryType::Fact, MemoryCategory::General, 0.9, "s", false)
            .await
            .unwrap();
        memory.mark_deleted(id).await.unwrap();

        let hits = memory.search("ephemeral", 10, 0.0, None, None).await.unwrap();
        assert!(hits.iter().all(|h| h.record.id != id));
        let recent = memory.get_recent(10, None).await.unwrap();
        assert!(recent.iter().all(|m| m.id != id));
    }

    #[tokio::test]
    async fn type_filter_limits_search() {
        let logs = Arc::new(InMemoryLogs::new());
        let memory = manager(Arc::clone(&logs));
        memory
            .store("a fact", MemoryType::Fact, MemoryCategory::General, 0.9, "s", false)
            .await
            .unwrap();
        memory
            .store("a preference", MemoryType::Preference, MemoryCategory::General, 0.9, "s", false)
            .await
            .unwrap();

        let hits = memory
            .search("anything", 10, 0.0, Some(&[MemoryType::Preference]), None)
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].record.memory_type, MemoryType::Preference);
    }

    #[tokio::test]
    async fn get_by_session_scopes_to_one_session() {
        let logs = Arc::new(InMemoryLogs::new());
        let memory = manager(Arc::clone(&logs));
        memory
            .store("from s1", MemoryType::Fact, MemoryCategory::General, 0.5, "s1", false)
            .await
            .unwrap();
        memory
            .store("from s2", MemoryType::Fact, MemoryCategory::General, 0.5, "s2", false)
            .await
            .unwrap();

        let s1 = memory.get_by_session("s1", 10).await.unwrap();
        assert_eq!(s1.len(), 1);
        assert_eq!(s1[0].content, "from s1");
    }

    #[tokio::test]
    async fn unavailable_without_embedder() {
        let logs = Arc::new(InMemoryLogs::new());
        let memory = MemoryManager::new(logs, None, 0.95, None);
        assert!(!memory.is_available());
        let err = memory
            .store("x", MemoryType::Fact, MemoryCategory::General, 0.5, "s", false)
            .await
            .unwrap_err();
        assert!(matches!(err, MemoryError::Unavailable(_)));
    }

    #[tokio::test]
    async fn configured_dimension_mismatch_is_fatal() {
        let logs = Arc::new(InMemoryLogs::new());
        let memory = MemoryManager::new(
            logs,
            Some(Arc::new(MockEmbedding::new(16))),
            0.95,
            Some(1536),
        );
        let err = memory
            .store("x", MemoryType::Fact, MemoryCategory::General, 0.5, "s", false)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            MemoryError::DimensionMismatch {
                stored: 1536,
                provider: 16
            }
        ));
    }
}
