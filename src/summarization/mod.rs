//! Client for the external text/table summarization service.
//!
//! Summaries are retrieval artifacts: they feed the vector index and are surfaced only
//! as source excerpts, never as final answer content. The HTTP implementation speaks an
//! Ollama-compatible `/api/generate` endpoint.

use crate::config::get_config;
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::json;
use thiserror::Error;

/// Errors surfaced while attempting summarization.
#[derive(Debug, Error)]
pub enum SummarizationError {
    /// Provider was unreachable.
    #[error("Summarization provider unavailable: {0}")]
    ProviderUnavailable(String),
    /// Provider returned an error response.
    #[error("Failed to generate summary: {0}")]
    GenerationFailed(String),
    /// Provider response could not be parsed.
    #[error("Malformed provider response: {0}")]
    InvalidResponse(String),
}

/// Interface implemented by summarization providers.
#[async_trait]
pub trait SummarizationClient: Send + Sync {
    /// Generate a concise summary for the assembled prompt.
    async fn summarize(&self, prompt: &str) -> Result<String, SummarizationError>;
}

/// Prompt for summarizing a narrative text chunk for retrieval.
pub fn text_summary_prompt(content: &str) -> String {
    format!(
        "You are an expert at summarizing technical content for retrieval systems.\n\
         Create a comprehensive summary that includes:\n\
         - Key concepts and definitions\n\
         - Technical details and formulas\n\
         - Important relationships and connections\n\
         - Specific terminology that would help answer technical questions\n\n\
         Focus on preserving information that would be valuable for question-answering.\n\n\
         Content: {content}\n\n\
         Summary:"
    )
}

/// Prompt for summarizing a table from its structured HTML serialization.
pub fn table_summary_prompt(html: &str) -> String {
    format!(
        "You are an expert at summarizing tables and structured data.\n\
         Create a summary that includes:\n\
         - What the table shows/represents\n\
         - Key data points and patterns\n\
         - Column headers and data types\n\
         - Important numerical values or trends\n\
         - Context for when this data would be relevant\n\n\
         Table HTML: {html}\n\n\
         Summary:"
    )
}

/// HTTP summarization client for an Ollama-compatible endpoint.
pub struct HttpSummarizationClient {
    http: Client,
    base_url: String,
    model: String,
}

impl HttpSummarizationClient {
    /// Construct a client against the given base URL and model.
    pub fn new(base_url: String, model: String) -> Self {
        let http = Client::builder()
            .user_agent("docrag/summary")
            .build()
            .expect("Failed to construct reqwest::Client for summarization");
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
            config.summarization_model.clone(),
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
impl SummarizationClient for HttpSummarizationClient {
    async fn summarize(&self, prompt: &str) -> Result<String, SummarizationError> {
        let payload = json!({
            "model": self.model,
            "prompt": prompt,
            "stream": false,
            "options": {
                // Low temperature keeps summaries stable across re-ingestions.
                "temperature": 0.3,
            }
        });

        let response = self
            .http
            .post(self.endpoint())
            .json(&payload)
            .send()
            .await
            .map_err(|error| {
                SummarizationError::ProviderUnavailable(format!(
                    "failed to reach summarizer at {}: {error}",
                    self.base_url
                ))
            })?;

        if response.status() == StatusCode::NOT_FOUND {
            return Err(SummarizationError::ProviderUnavailable(format!(
                "summarizer endpoint {} returned 404",
                self.endpoint()
            )));
        }

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(SummarizationError::GenerationFailed(format!(
                "summarizer returned {status}: {body}"
            )));
        }

        let body: GenerateResponse = response.json().await.map_err(|error| {
            SummarizationError::InvalidResponse(format!(
                "failed to decode summarizer response: {error}"
            ))
        })?;

        if !body.done {
            return Err(SummarizationError::InvalidResponse(
                "summarizer response incomplete (streaming not supported)".into(),
            ));
        }

        Ok(body.response.trim().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::{Method::POST, MockServer};

    #[tokio::test]
    async fn client_handles_successful_response() {
        let server = MockServer::start_async().await;
        let client = HttpSummarizationClient::new(server.base_url(), "summarizer".into());

        let mock = server
            .mock_async(|when, then| {
                when.method(POST).path("/api/generate");
                then.status(200).json_body(json!({
                    "response": "  Summary text  ",
                    "done": true
                }));
            })
            .await;

        let summary = client
            .summarize(&text_summary_prompt("body"))
            .await
            .expect("summary");

        mock.assert();
        assert_eq!(summary, "Summary text");
    }

    #[tokio::test]
    async fn client_handles_error_status() {
        let server = MockServer::start_async().await;
        let client = HttpSummarizationClient::new(server.base_url(), "summarizer".into());

        server
            .mock_async(|when, then| {
                when.method(POST).path("/api/generate");
                then.status(500).body("boom");
            })
            .await;

        let error = client
            .summarize("Summarize")
            .await
            .expect_err("error response");

        assert!(
            matches!(error, SummarizationError::GenerationFailed(message) if message.contains("500"))
        );
    }

    #[test]
    fn prompts_embed_the_content() {
        assert!(text_summary_prompt("alpha beta").contains("alpha beta"));
        assert!(table_summary_prompt("<table/>").contains("<table/>"));
    }
}
