//! Client for the external image-description service.
//!
//! The HTTP implementation speaks an Ollama-compatible `/api/generate` endpoint with the
//! image bytes passed through the `images` array. A per-call failure here is contained by
//! the image pipeline, which records a placeholder description instead of aborting the
//! document.

use crate::config::get_config;
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::json;
use thiserror::Error;

/// Errors surfaced while describing an image.
#[derive(Debug, Error)]
pub enum DescriptionError {
    /// Provider was unreachable.
    #[error("Vision provider unavailable: {0}")]
    ProviderUnavailable(String),
    /// Provider returned an error response.
    #[error("Failed to describe image: {0}")]
    DescriptionFailed(String),
    /// Provider response could not be parsed.
    #[error("Malformed provider response: {0}")]
    InvalidResponse(String),
}

/// Interface implemented by vision description providers.
#[async_trait]
pub trait VisionClient: Send + Sync {
    /// Produce a textual description of the base64-encoded image.
    async fn describe(&self, image_base64: &str) -> Result<String, DescriptionError>;
}

/// Prompt instructing the vision model what to extract from document figures.
pub fn image_description_prompt() -> &'static str {
    "Analyze this image and provide a detailed description focusing on:\n\
     - Any text, formulas, or equations visible\n\
     - Diagrams, charts, or visual representations\n\
     - Technical concepts or processes shown\n\
     - Key visual elements that convey information\n\
     - Context that would help answer technical questions\n\n\
     Be specific and comprehensive in your description."
}

/// HTTP vision client for an Ollama-compatible endpoint.
pub struct HttpVisionClient {
    http: Client,
    base_url: String,
    model: String,
}

impl HttpVisionClient {
    /// Construct a client against the given base URL and model.
    pub fn new(base_url: String, model: String) -> Self {
        let http = Client::builder()
            .user_agent("docrag/vision")
            .build()
            .expect("Failed to construct reqwest::Client for vision");
        Self {
            http,
            base_url,
            model,
        }
    }

    /// Construct a client from the process configuration.
    pub fn from_config() -> Self {
        let config = get_config();
        Self::new(config.model_server_url.clone(), config.vision_model.clone())
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
impl VisionClient for HttpVisionClient {
    async fn describe(&self, image_base64: &str) -> Result<String, DescriptionError> {
        let payload = json!({
            "model": self.model,
            "prompt": image_description_prompt(),
            "images": [image_base64],
            "stream": false,
        });

        let response = self
            .http
            .post(self.endpoint())
            .json(&payload)
            .send()
            .await
            .map_err(|error| {
                DescriptionError::ProviderUnavailable(format!(
                    "failed to reach vision service at {}: {error}",
                    self.base_url
                ))
            })?;

        if response.status() == StatusCode::NOT_FOUND {
            return Err(DescriptionError::ProviderUnavailable(format!(
                "vision endpoint {} returned 404",
                self.endpoint()
            )));
        }

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(DescriptionError::DescriptionFailed(format!(
                "vision service returned {status}: {body}"
            )));
        }

        let body: GenerateResponse = response.json().await.map_err(|error| {
            DescriptionError::InvalidResponse(format!(
                "failed to decode vision response: {error}"
            ))
        })?;

        if !body.done {
            return Err(DescriptionError::InvalidResponse(
                "vision response incomplete (streaming not supported)".into(),
            ));
        }

        let description = body.response.trim().to_string();
        if description.is_empty() {
            return Ok("No content detected in image".to_string());
        }
        Ok(description)
    }
}
