//! Embedding client abstraction and adapters.

use crate::config::{EmbeddingProvider, get_config};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use thiserror::Error;

/// Errors raised by embedding providers.
#[derive(Debug, Error)]
pub enum EmbeddingError {
    /// Provider was unable to produce embeddings for the supplied input.
    #[error("Failed to generate embeddings: {0}")]
    GenerationFailed(String),
}

/// Interface implemented by embedding backends.
#[async_trait]
pub trait EmbeddingClient: Send + Sync {
    /// Produce an embedding vector for each supplied text, preserving order.
    async fn embed(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>, EmbeddingError>;

    /// Dimensionality of the produced vectors.
    fn dimension(&self) -> usize;
}

/// Deterministic embedding client producing normalized byte-hash vectors.
///
/// Requires no running model, which keeps offline operation and tests cheap while
/// remaining stable for identical inputs.
pub struct DeterministicEmbeddingClient {
    dimension: usize,
}

impl DeterministicEmbeddingClient {
    /// Construct a client producing vectors of the given dimensionality.
    pub const fn new(dimension: usize) -> Self {
        Self { dimension }
    }

    fn encode(text: &str, dimension: usize) -> Vec<f32> {
        let mut embedding = vec![0.0_f32; dimension];

        if text.is_empty() {
            return embedding;
        }

        for (idx, byte) in text.bytes().enumerate() {
            let position = idx % dimension;
            // Basic hashing of content into the vector slot
            embedding[position] += f32::from(byte) / 255.0;
        }

        let norm = embedding
            .iter()
            .map(|value| value * value)
            .sum::<f32>()
            .sqrt();

        if norm > 0.0 {
            for value in &mut embedding {
                *value /= norm;
            }
        }

        embedding
    }
}

#[async_trait]
impl EmbeddingClient for DeterministicEmbeddingClient {
    async fn embed(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        if self.dimension == 0 {
            return Err(EmbeddingError::GenerationFailed(
                "embedding dimension must be greater than zero".to_string(),
            ));
        }

        if texts.is_empty() {
            return Err(EmbeddingError::GenerationFailed(
                "no texts provided".to_string(),
            ));
        }

        let embeddings = texts
            .into_iter()
            .map(|text| Self::encode(&text, self.dimension))
            .collect();

        Ok(embeddings)
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

/// HTTP embedding client for an Ollama-compatible `/api/embeddings` endpoint.
pub struct OllamaEmbeddingClient {
    http: Client,
    base_url: String,
    model: String,
    dimension: usize,
}

impl OllamaEmbeddingClient {
    /// Construct a client against the given base URL, model, and expected dimension.
    pub fn new(base_url: String, model: String, dimension: usize) -> Self {
        let http = Client::builder()
            .user_agent("docrag/embed")
            .build()
            .expect("Failed to construct reqwest::Client for embeddings");
        Self {
            http,
            base_url,
            model,
            dimension,
        }
    }

    fn endpoint(&self) -> String {
        format!("{}/api/embeddings", self.base_url.trim_end_matches('/'))
    }
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    embedding: Vec<f32>,
}

#[async_trait]
impl EmbeddingClient for OllamaEmbeddingClient {
    async fn embed(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        if texts.is_empty() {
            return Err(EmbeddingError::GenerationFailed(
                "no texts provided".to_string(),
            ));
        }

        let mut embeddings = Vec::with_capacity(texts.len());
        for text in texts {
            let response = self
                .http
                .post(self.endpoint())
                .json(&json!({ "model": self.model, "prompt": text }))
                .send()
                .await
                .map_err(|error| {
                    EmbeddingError::GenerationFailed(format!(
                        "failed to reach embedding provider at {}: {error}",
                        self.base_url
                    ))
                })?;

            if !response.status().is_success() {
                let status = response.status();
                let body = response.text().await.unwrap_or_default();
                return Err(EmbeddingError::GenerationFailed(format!(
                    "embedding provider returned {status}: {body}"
                )));
            }

            let body: EmbeddingResponse = response.json().await.map_err(|error| {
                EmbeddingError::GenerationFailed(format!(
                    "failed to decode embedding response: {error}"
                ))
            })?;

            embeddings.push(body.embedding);
        }

        Ok(embeddings)
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

/// Build an embedding client suitable for the current configuration.
pub fn get_embedding_client() -> Box<dyn EmbeddingClient> {
    let config = get_config();
    tracing::debug!(
        provider = ?config.embedding_provider,
        model = %config.embedding_model,
        dimension = config.embedding_dimension,
        "Selecting embedding client"
    );
    match config.embedding_provider {
        EmbeddingProvider::Ollama => Box::new(OllamaEmbeddingClient::new(
            config.model_server_url.clone(),
            config.embedding_model.clone(),
            config.embedding_dimension,
        )),
        EmbeddingProvider::Deterministic => Box::new(DeterministicEmbeddingClient::new(
            config.embedding_dimension,
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::{Method::POST, MockServer};

    #[tokio::test]
    async fn deterministic_vectors_are_stable_and_normalized() {
        let client = DeterministicEmbeddingClient::new(8);
        let first = client.embed(vec!["hello".into()]).await.expect("embed");
        let second = client.embed(vec!["hello".into()]).await.expect("embed");
        assert_eq!(first, second);
        assert_eq!(first[0].len(), 8);

        let norm: f32 = first[0].iter().map(|v| v * v).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }

    #[tokio::test]
    async fn deterministic_rejects_empty_batch() {
        let client = DeterministicEmbeddingClient::new(8);
        assert!(client.embed(Vec::new()).await.is_err());
    }

    #[tokio::test]
    async fn ollama_client_collects_batch_in_order() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST).path("/api/embeddings");
                then.status(200)
                    .json_body(json!({ "embedding": [0.1, 0.2, 0.3] }));
            })
            .await;

        let client = OllamaEmbeddingClient::new(server.base_url(), "embedder".into(), 3);
        let embeddings = client
            .embed(vec!["one".into(), "two".into()])
            .await
            .expect("embeddings");

        assert_eq!(mock.hits(), 2);
        assert_eq!(embeddings.len(), 2);
        assert_eq!(embeddings[0], vec![0.1, 0.2, 0.3]);
    }
}
