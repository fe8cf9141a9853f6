//! Content extraction backed by the external structure-parsing service.
//!
//! The parser does the heavy lifting (layout inference, table structure, inline image
//! payloads, chunk coalescing); this module owns the request contract, decodes the
//! ordered element list, and partitions it into typed content for the pipeline. A parser
//! failure is fatal to the enclosing ingestion run — corrupt input cannot be recovered
//! downstream.

use crate::config::get_config;
use async_trait::async_trait;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::json;
use thiserror::Error;

/// Errors surfaced while extracting content from a document.
#[derive(Debug, Error)]
pub enum ExtractionError {
    /// Parser service was unreachable.
    #[error("Structure parser unavailable: {0}")]
    ParserUnavailable(String),
    /// Parser rejected or could not process the document.
    #[error("Failed to parse document: {0}")]
    ParseFailed(String),
    /// Parser response could not be decoded.
    #[error("Malformed parser response: {0}")]
    InvalidResponse(String),
}

/// Options forwarded to the structure parser.
#[derive(Debug, Clone, Serialize)]
pub struct ParseOptions {
    /// Use high-fidelity structural inference rather than the fast path.
    pub high_fidelity: bool,
    /// Run table-structure detection and return tables as structured HTML.
    pub infer_table_structure: bool,
    /// Extract images inline with their raw bytes.
    pub extract_images: bool,
    /// Upper bound on characters per returned text chunk.
    pub max_chunk_chars: usize,
    /// Text runs below this size are merged with adjacent runs.
    pub combine_text_under_chars: usize,
    /// A new chunk is started after this many characters.
    pub new_chunk_after_chars: usize,
}

impl ParseOptions {
    /// Build options from the process configuration.
    pub fn from_config() -> Self {
        let config = get_config();
        Self {
            high_fidelity: true,
            infer_table_structure: true,
            extract_images: true,
            max_chunk_chars: config.max_chunk_chars,
            combine_text_under_chars: config.combine_text_under_chars,
            new_chunk_after_chars: config.new_chunk_after_chars,
        }
    }
}

/// One element of the parser's ordered output.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ParsedElement {
    /// A coalesced narrative text chunk.
    Text {
        /// Chunk text.
        text: String,
    },
    /// A detected table.
    Table {
        /// Flattened table text, used only when no HTML is available.
        #[serde(default)]
        text: String,
        /// Structured HTML serialization of the table.
        #[serde(default)]
        html: Option<String>,
    },
    /// An inline image.
    Image {
        /// Base64-encoded image bytes.
        image_base64: String,
    },
}

/// An extracted image, still in its wire encoding.
///
/// Decoding is deferred to the image pipeline so a single corrupt payload degrades
/// that image instead of failing extraction.
#[derive(Debug, Clone)]
pub struct RawImage {
    /// Base64-encoded image bytes as returned by the parser.
    pub base64: String,
}

/// Typed content produced by a successful extraction.
#[derive(Debug, Default)]
pub struct ExtractedContent {
    /// Narrative text chunks in document order.
    pub texts: Vec<String>,
    /// Table serializations in document order.
    pub tables: Vec<String>,
    /// Inline images in document order.
    pub images: Vec<RawImage>,
}

/// Interface to the external structure parser.
#[async_trait]
pub trait StructureParser: Send + Sync {
    /// Parse raw document bytes into an ordered element list.
    async fn parse(
        &self,
        document: &[u8],
        options: &ParseOptions,
    ) -> Result<Vec<ParsedElement>, ExtractionError>;
}

/// HTTP client for a structure-parsing service.
pub struct HttpStructureParser {
    http: Client,
    base_url: String,
}

impl HttpStructureParser {
    /// Construct a client against the given service base URL.
    pub fn new(base_url: String) -> Self {
        let http = Client::builder()
            .user_agent("docrag/parser")
            .build()
            .expect("Failed to construct reqwest::Client for parsing");
        Self { http, base_url }
    }

    /// Construct a client from the process configuration.
    pub fn from_config() -> Self {
        Self::new(get_config().parser_url.clone())
    }

    fn endpoint(&self) -> String {
        format!("{}/parse", self.base_url.trim_end_matches('/'))
    }
}

#[derive(Debug, Deserialize)]
struct ParseResponse {
    elements: Vec<ParsedElement>,
}

#[async_trait]
impl StructureParser for HttpStructureParser {
    async fn parse(
        &self,
        document: &[u8],
        options: &ParseOptions,
    ) -> Result<Vec<ParsedElement>, ExtractionError> {
        let payload = json!({
            "document_base64": BASE64.encode(document),
            "options": {
                "strategy": if options.high_fidelity { "hi_res" } else { "fast" },
                "infer_table_structure": options.infer_table_structure,
                "extract_images": options.extract_images,
                "max_characters": options.max_chunk_chars,
                "combine_text_under_n_chars": options.combine_text_under_chars,
                "new_after_n_chars": options.new_chunk_after_chars,
            }
        });

        let response = self
            .http
            .post(self.endpoint())
            .json(&payload)
            .send()
            .await
            .map_err(|error| {
                ExtractionError::ParserUnavailable(format!(
                    "failed to reach parser at {}: {error}",
                    self.base_url
                ))
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(ExtractionError::ParseFailed(format!(
                "parser returned {status}: {body}"
            )));
        }

        let body: ParseResponse = response.json().await.map_err(|error| {
            ExtractionError::InvalidResponse(format!("failed to decode parser response: {error}"))
        })?;

        Ok(body.elements)
    }
}

/// Partition an ordered element list into typed extraction output.
pub fn partition(elements: Vec<ParsedElement>) -> ExtractedContent {
    let mut content = ExtractedContent::default();
    for element in elements {
        match element {
            ParsedElement::Text { text } => content.texts.push(text),
            ParsedElement::Table { text, html } => {
                content.tables.push(html.unwrap_or(text));
            }
            ParsedElement::Image { image_base64 } => content.images.push(RawImage {
                base64: image_base64,
            }),
        }
    }
    content
}

/// Run extraction end to end: parse, then partition.
pub async fn extract<P: StructureParser + ?Sized>(
    parser: &P,
    document: &[u8],
    options: &ParseOptions,
) -> Result<ExtractedContent, ExtractionError> {
    let elements = parser.parse(document, options).await?;
    let content = partition(elements);
    tracing::info!(
        texts = content.texts.len(),
        tables = content.tables.len(),
        images = content.images.len(),
        "Extracted content"
    );
    Ok(content)
}
