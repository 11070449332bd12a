//! Deterministic embedding provider for tests and offline runs.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;

use super::{EmbeddingError, EmbeddingProvider};

/// Maps text to a deterministic unit vector (byte-bucket histogram), with
/// optional per-text overrides so tests can pin exact similarities.
pub struct MockEmbedding {
    dims: usize,
    overrides: Mutex<HashMap<String, Vec<f32>>>,
}

impl MockEmbedding {
    pub fn new(dims: usize) -> Self {
        Self {
            dims,
            overrides: Mutex::new(HashMap::new()),
        }
    }

    /// Pins the vector returned for `text`.
    pub fn set_vector(&self, text: impl Into<String>, vector: Vec<f32>) {
        self.overrides.lock().unwrap().insert(text.into(), vector);
    }

    fn histogram(&self, text: &str) -> Vec<f32> {
        let mut v = vec![0.0f32; self.dims];
        for b in text.bytes() {
            v[b as usize % self.dims] += 1.0;
        }
        let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            for x in &mut v {
                *x /= norm;
            }
        }
        v
    }
}

#[async_trait]
impl EmbeddingProvider for MockEmbedding {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        if let Some(v) = self.overrides.lock().unwrap().get(text) {
            return Ok(v.clone());
        }
        Ok(self.histogram(text))
    }

    fn provider_name(&self) -> &str {
        "mock"
    }

    fn model(&self) -> &str {
        "mock-embedding"
    }

    fn dimensions(&self) -> Option<usize> {
        Some(self.dims)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn identical_text_embeds_identically() {
        let e = MockEmbedding::new(8);
        let a = e.embed("User's name is John Smith").await.unwrap();
        let b = e.embed("User's name is John Smith").await.unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), 8);
    }

    #[tokio::test]
    async fn overrides_win() {
        let e = MockEmbedding::new(2);
        e.set_vector("x", vec![0.0, 1.0]);
        assert_eq!(e.embed("x").await.unwrap(), vec![0.0, 1.0]);
    }
}
