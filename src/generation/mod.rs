//! Client for the external answer-generation service.
//!
//! The query engine assembles a grounded prompt from retrieved context and hands it to
//! this client. Failures here never escape the query path; they are absorbed into a
//! degraded answer.

use crate::config::get_config;
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::json;
use thiserror::Error;

/// Errors surfaced while generating an answer.
#[derive(Debug, Error)]
pub enum GenerationError {
    /// Provider was unreachable.
    #[error("Generation provider unavailable: {0}")]
    ProviderUnavailable(String),
    /// Provider returned an error response.
    #[error("Failed to generate answer: {0}")]
    GenerationFailed(String),
    /// Provider response could not be parsed.
    #[error("Malformed provider response: {0}")]
    InvalidResponse(String),
}

/// Interface implemented by answer-generation providers.
#[async_trait]
pub trait GenerationClient: Send + Sync {
    /// Generate an answer for the assembled prompt.
    async fn generate(&self, prompt: &str) -> Result<String, GenerationError>;
}

/// HTTP generation client for an Ollama-compatible endpoint.
pub struct HttpGenerationClient {
    http: Client,
    base_url: String,
    model: String,
}

impl HttpGenerationClient {
    /// Construct a client against the given base URL and model.
    pub fn new(base_url: String, model: String) -> Self {
        let http = Client::builder()
            .user_agent("docrag/generate")
            .build()
            .expect("Failed to construct reqwest::Client for generation");
        Self {
            http,
            base_url,
            model,
        }
    }

    /// Construct a client from the process configuration.
    pub fn from_config() -> Self {
        let config = get_config();
        Self::new(
            config.model_server_url.clone(),
            config.generation_model.clone(),
        )
    }

    fn endpoint(&self) -> String {
        format!("{}/api/generate", self.base_url.trim_end_matches('/'))
    }
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    response: String,
    done: bool,
}

#[async_trait]
impl GenerationClient for HttpGenerationClient {
    async fn generate(&self, prompt: &str) -> Result<String, GenerationError> {
        let payload = json!({
            "model": self.model,
            "prompt": prompt,
            "stream": false,
            "options": {
                "temperature": 0.1,
            }
        });

        let response = self
            .http
            .post(self.endpoint())
            .json(&payload)
            .send()
            .await
            .map_err(|error| {
                GenerationError::ProviderUnavailable(format!(
                    "failed to reach generator at {}: {error}",
                    self.base_url
                ))
            })?;

        if response.status() == StatusCode::NOT_FOUND {
            return Err(GenerationError::ProviderUnavailable(format!(
                "generation endpoint {} returned 404",
                self.endpoint()
            )));
        }

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(GenerationError::GenerationFailed(format!(
                "generator returned {status}: {body}"
            )));
        }

        let body: GenerateResponse = response.json().await.map_err(|error| {
            GenerationError::InvalidResponse(format!(
                "failed to decode generator response: {error}"
            ))
        })?;

        if !body.done {
            return Err(GenerationError::InvalidResponse(
                "generator response incomplete (streaming not supported)".into(),
            ));
        }

        Ok(body.response.trim().to_string())
    }
}
