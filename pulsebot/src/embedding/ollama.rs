//! Ollama embeddings backend (`/api/embeddings` on a local instance).

use std::time::Duration;

use async_trait::async_trait;
use once_cell::sync::OnceCell;
use serde::Deserialize;
use serde_json::json;

use super::{EmbeddingError, EmbeddingProvider};

pub struct OllamaEmbedding {
    http: reqwest::Client,
    host: String,
    model: String,
    dimensions: OnceCell<usize>,
    timeout: Duration,
}

#[derive(Deserialize)]
struct EmbeddingsResponse {
    embedding: Vec<f32>,
}

impl OllamaEmbedding {
    pub fn new(host: impl Into<String>, model: impl Into<String>, timeout: Duration) -> Self {
        Self {
            http: reqwest::Client::new(),
            host: host.into().trim_end_matches('/').to_string(),
            model: model.into(),
            dimensions: OnceCell::new(),
            timeout,
        }
    }

    pub fn with_dimensions(self, dims: usize) -> Self {
        let cell = OnceCell::new();
        let _ = cell.set(dims);
        Self {
            dimensions: cell,
            ..self
        }
    }
}

#[async_trait]
impl EmbeddingProvider for OllamaEmbedding {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        let url = format!("{}/api/embeddings", self.host);
        let body = json!({ "model": self.model, "prompt": text });
        let response = tokio::time::timeout(self.timeout, async {
            self.http
                .post(&url)
                .json(&body)
                .send()
                .await
                .map_err(|e| EmbeddingError::Api(e.to_string()))?
                .error_for_status()
                .map_err(|e| EmbeddingError::Api(e.to_string()))?
                .json::<EmbeddingsResponse>()
                .await
                .map_err(|e| EmbeddingError::Api(e.to_string()))
        })
        .await
        .map_err(|_| EmbeddingError::Timeout)??;

        if response.embedding.is_empty() {
            return Err(EmbeddingError::NoVector);
        }
        let _ = self.dimensions.set(response.embedding.len());
        Ok(response.embedding)
    }

    fn provider_name(&self) -> &str {
        "ollama"
    }

    fn model(&self) -> &str {
        &self.model
    }

    fn dimensions(&self) -> Option<usize> {
        self.dimensions.get().copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn host_trailing_slash_is_normalized() {
        let e = OllamaEmbedding::new(
            "http://localhost:11434/",
            "nomic-embed-text",
            Duration::from_secs(5),
        );
        assert_eq!(e.host, "http://localhost:11434");
        assert_eq!(e.provider_name(), "ollama");
        assert_eq!(e.dimensions(), None);
    }

    #[tokio::test]
    #[ignore = "Requires a local Ollama instance"]
    async fn embeds_against_local_instance() {
        let e = OllamaEmbedding::new(
            "http://localhost:11434",
            "nomic-embed-text",
            Duration::from_secs(30),
        );
        let v = e.embed("hello").await.unwrap();
        assert!(!v.is_empty());
        assert_eq!(e.dimensions(), Some(v.len()));
    }
}
