//! Embedding providers: text to fixed-length `f32` vectors.
//!
//! The contract is uniform across backends; callers treat vectors as opaque.
//! Dimensionality is either configured or discovered from the first returned
//! vector and cached.

mod mock;
mod ollama;
mod openai;

use async_trait::async_trait;
use thiserror::Error;

pub use mock::MockEmbedding;
pub use ollama::OllamaEmbedding;
pub use openai::OpenAiEmbedding;

#[derive(Error, Debug)]
pub enum EmbeddingError {
    #[error("embedding request timed out")]
    Timeout,
    #[error("embedding API error: {0}")]
    Api(String),
    #[error("no embedding returned")]
    NoVector,
}

/// Uniform embedding contract.
///
/// `dimensions()` is `None` until configured or discovered; after the first
/// successful call it is always `Some`.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError>;

    /// Batch variant; the default loops over [`embed`](Self::embed).
    async fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        let mut out = Vec::with_capacity(texts.len());
        for text in texts {
            out.push(self.embed(text).await?);
        }
        Ok(out)
    }

    fn provider_name(&self) -> &str;

    fn model(&self) -> &str;

    fn dimensions(&self) -> Option<usize>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn default_embed_batch_preserves_order() {
        let provider = MockEmbedding::new(4);
        let vectors = provider.embed_batch(&["a", "b"]).await.unwrap();
        assert_eq!(vectors.len(), 2);
        assert_eq!(vectors[0], provider.embed("a").await.unwrap());
        assert_eq!(vectors[1], provider.embed("b").await.unwrap());
    }
}
