//! OpenAI embeddings backend.
//!
//! Known models get their dimensionality up front; unknown models discover
//! it from the first returned vector.

use std::time::Duration;

use async_openai::{
    config::OpenAIConfig,
    types::embeddings::{CreateEmbeddingRequest, EmbeddingInput},
    Client,
};
use async_trait::async_trait;
use once_cell::sync::OnceCell;

use super::{EmbeddingError, EmbeddingProvider};

pub struct OpenAiEmbedding {
    config: OpenAIConfig,
    model: String,
    dimensions: OnceCell<usize>,
    timeout: Duration,
}

impl OpenAiEmbedding {
    pub fn new(api_key: &str, model: impl Into<String>, timeout: Duration) -> Self {
        let model = model.into();
        let dimensions = OnceCell::new();
        if let Some(known) = known_dimensions(&model) {
            let _ = dimensions.set(known);
        }
        Self {
            config: OpenAIConfig::new().with_api_key(api_key),
            model,
            dimensions,
            timeout,
        }
    }

    /// Overrides discovery with a configured dimensionality.
    pub fn with_dimensions(self, dims: usize) -> Self {
        let cell = OnceCell::new();
        let _ = cell.set(dims);
        Self {
            dimensions: cell,
            ..self
        }
    }

    async fn request(&self, input: EmbeddingInput) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        let client = Client::with_config(self.config.clone());
        let request = CreateEmbeddingRequest {
            input,
            model: self.model.clone(),
            ..Default::default()
        };
        let response = tokio::time::timeout(self.timeout, client.embeddings().create(request))
            .await
            .map_err(|_| EmbeddingError::Timeout)?
            .map_err(|e| EmbeddingError::Api(e.to_string()))?;
        if response.data.is_empty() {
            return Err(EmbeddingError::NoVector);
        }
        let vectors: Vec<Vec<f32>> = response.data.into_iter().map(|e| e.embedding).collect();
        let _ = self.dimensions.set(vectors[0].len());
        Ok(vectors)
    }
}

fn known_dimensions(model: &str) -> Option<usize> {
    match model {
        "text-embedding-3-large" => Some(3072),
        "text-embedding-3-small" | "text-embedding-ada-002" => Some(1536),
        _ => None,
    }
}

#[async_trait]
impl EmbeddingProvider for OpenAiEmbedding {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        let mut vectors = self
            .request(EmbeddingInput::String(text.to_string()))
            .await?;
        Ok(vectors.remove(0))
    }

    async fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let inputs: Vec<String> = texts.iter().map(|&s| s.to_string()).collect();
        self.request(EmbeddingInput::StringArray(inputs)).await
    }

    fn provider_name(&self) -> &str {
        "openai"
    }

    fn model(&self) -> &str {
        &self.model
    }

    fn dimensions(&self) -> Option<usize> {
        self.dimensions.get().copied()
    }
}
