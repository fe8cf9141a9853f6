//! Grounded question answering over a document's index.
//!
//! The query path never fails toward the caller: non-Completed documents, retrieval
//! errors, and generation errors all produce a structured `AnswerResult` whose
//! diagnostics say what happened. Retrieved payloads stay structured end to end — image
//! paths and metadata come from the typed units, never from re-parsing serialized text.

use crate::content::{ContentUnit, RetrievalKey};
use crate::document::{DocumentId, ProcessingState, StatusSnapshot};
use crate::generation::GenerationClient;
use crate::index::MultiVectorIndex;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde::Serialize;
use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::Instant;

/// Machine-readable classification of how a query concluded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryOutcome {
    /// Retrieval and generation both succeeded.
    Answered,
    /// The document is still queued; no content-derived answer was produced.
    DocumentPending,
    /// The document is still ingesting; no content-derived answer was produced.
    DocumentProcessing,
    /// The document failed ingestion; it must be re-submitted.
    DocumentFailed,
    /// Retrieval failed; the answer carries no grounded content.
    RetrievalDegraded,
    /// Generation failed; the answer carries sources but no generated text.
    GenerationDegraded,
}

/// Status block attached to every answer.
#[derive(Debug, Clone, Serialize)]
pub struct QueryDiagnostics {
    /// How the query concluded.
    pub outcome: QueryOutcome,
    /// Human-readable detail for the outcome.
    pub detail: String,
}

/// One retrieved unit cited in an answer.
#[derive(Debug, Clone, Serialize)]
pub struct SourceInfo {
    /// Content-type tag of the unit (`text` | `table` | `image`).
    pub content_type: String,
    /// Bounded excerpt of the unit's raw content.
    pub excerpt: String,
    /// Serializable metadata, including the retrieval key.
    pub metadata: Map<String, Value>,
}

/// An image related to the answered question.
#[derive(Debug, Clone, Serialize)]
pub struct RelatedImage {
    /// Caller-visible image identifier.
    pub image_id: String,
    /// Generated file name in the byte-store.
    pub filename: String,
    /// Path of the persisted bytes.
    pub path: String,
    /// Description produced during ingestion.
    pub description: String,
    /// Inline base64 encoding of the bytes, when the file is present on disk.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_base64: Option<String>,
}

/// Structured result of a query.
#[derive(Debug, Clone, Serialize)]
pub struct AnswerResult {
    /// Generated answer, or a state/degradation message.
    pub answer: String,
    /// Document the query ran against.
    pub document_id: DocumentId,
    /// Wall-clock seconds spent answering.
    pub elapsed_seconds: f64,
    /// Cited units for every retrieved entry.
    pub sources: Vec<SourceInfo>,
    /// Images among the retrieved entries.
    pub related_images: Vec<RelatedImage>,
    /// Confidence signal; zero for non-answers, absent when generation succeeded.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f32>,
    /// Machine-readable outcome of the query.
    pub diagnostics: QueryDiagnostics,
}

/// Assembles grounded answers from retrieved content.
pub struct QueryEngine {
    generator: Arc<dyn GenerationClient>,
    context_excerpt_chars: usize,
    source_excerpt_chars: usize,
}

impl QueryEngine {
    /// Construct an engine with explicit excerpt budgets.
    pub fn new(
        generator: Arc<dyn GenerationClient>,
        context_excerpt_chars: usize,
        source_excerpt_chars: usize,
    ) -> Self {
        Self {
            generator,
            context_excerpt_chars,
            source_excerpt_chars,
        }
    }

    /// Answer a question against a completed document's index.
    pub async fn answer(
        &self,
        index: &MultiVectorIndex,
        document_id: DocumentId,
        question: &str,
        max_results: usize,
    ) -> AnswerResult {
        let started = Instant::now();

        let keys = match index.query(question, max_results).await {
            Ok(keys) => keys,
            Err(error) => {
                tracing::warn!(document_id = %document_id, error = %error, "Retrieval failed");
                return degraded_answer(
                    document_id,
                    started,
                    QueryOutcome::RetrievalDegraded,
                    format!("Retrieval failed: {error}"),
                );
            }
        };

        let units = match index.resolve(&keys) {
            Ok(units) => units,
            Err(error) => {
                // A resolve miss means the vector and side tables disagree; loudly
                // surface the diagnostics but keep the caller-facing contract intact.
                tracing::error!(document_id = %document_id, error = %error, "Index consistency violation during resolve");
                return degraded_answer(
                    document_id,
                    started,
                    QueryOutcome::RetrievalDegraded,
                    format!("Retrieval failed: {error}"),
                );
            }
        };

        let context = self.build_context(&units);
        let prompt = build_prompt(question, &context);
        let sources: Vec<SourceInfo> = keys
            .iter()
            .zip(&units)
            .map(|(key, unit)| self.source_for(unit, *key))
            .collect();
        let related_images = collect_related_images(&units, max_results).await;

        match self.generator.generate(&prompt).await {
            Ok(answer) => AnswerResult {
                answer,
                document_id,
                elapsed_seconds: started.elapsed().as_secs_f64(),
                sources,
                related_images,
                confidence: None,
                diagnostics: QueryDiagnostics {
                    outcome: QueryOutcome::Answered,
                    detail: "Query completed successfully".to_string(),
                },
            },
            Err(error) => {
                tracing::warn!(document_id = %document_id, error = %error, "Generation failed; returning sources only");
                AnswerResult {
                    answer: "There was a technical issue generating an answer for your \
                             question. The retrieved context is listed under sources; \
                             please try again."
                        .to_string(),
                    document_id,
                    elapsed_seconds: started.elapsed().as_secs_f64(),
                    sources,
                    related_images,
                    confidence: Some(0.0),
                    diagnostics: QueryDiagnostics {
                        outcome: QueryOutcome::GenerationDegraded,
                        detail: format!("Generation failed: {error}"),
                    },
                }
            }
        }
    }

    /// Non-answer for a document that is not yet (or no longer) queryable.
    pub fn status_answer(snapshot: &StatusSnapshot) -> AnswerResult {
        let (answer, outcome) = match snapshot.state {
            ProcessingState::Pending => (
                "Your document is currently queued for processing. Please wait a moment \
                 and try again.",
                QueryOutcome::DocumentPending,
            ),
            ProcessingState::Processing => (
                "Your document is currently being processed. This usually takes 1-2 \
                 minutes depending on document complexity. Please try your query again \
                 in a moment.",
                QueryOutcome::DocumentProcessing,
            ),
            ProcessingState::Failed => (
                "There was an error processing your document. Please re-submit the \
                 document before querying it.",
                QueryOutcome::DocumentFailed,
            ),
            ProcessingState::Completed => (
                "Document is ready for queries.",
                QueryOutcome::Answered,
            ),
        };
        AnswerResult {
            answer: answer.to_string(),
            document_id: snapshot.document_id,
            elapsed_seconds: 0.0,
            sources: Vec::new(),
            related_images: Vec::new(),
            confidence: Some(0.0),
            diagnostics: QueryDiagnostics {
                outcome,
                detail: snapshot.message.clone(),
            },
        }
    }

    /// Degraded answer for a completed document whose index has been torn down.
    pub fn missing_index_answer(document_id: DocumentId) -> AnswerResult {
        degraded_answer(
            document_id,
            Instant::now(),
            QueryOutcome::RetrievalDegraded,
            "Document index is no longer available".to_string(),
        )
    }

    fn build_context(&self, units: &[ContentUnit]) -> String {
        let mut texts = Vec::new();
        let mut tables = Vec::new();
        let mut images = Vec::new();
        for unit in units {
            match unit {
                ContentUnit::Text { body } => texts.push(body.as_str()),
                ContentUnit::Table { html } => tables.push(html.as_str()),
                ContentUnit::Image { record } => images.push(record.description.as_str()),
            }
        }

        let mut parts = Vec::new();
        for (heading, entries) in [
            ("**TEXT CONTEXT:**", texts),
            ("**TABLE CONTEXT:**", tables),
            ("**IMAGE CONTEXT:**", images),
        ] {
            if entries.is_empty() {
                continue;
            }
            parts.push(heading.to_string());
            for (position, entry) in entries.iter().enumerate() {
                parts.push(format!(
                    "{}. {}",
                    position + 1,
                    truncate_excerpt(entry, self.context_excerpt_chars)
                ));
            }
            parts.push(String::new());
        }
        parts.join("\n")
    }

    fn source_for(&self, unit: &ContentUnit, key: RetrievalKey) -> SourceInfo {
        let mut metadata = Map::new();
        metadata.insert("retrieval_key".into(), Value::String(key.to_string()));
        if let ContentUnit::Image { record } = unit
            && let Ok(Value::Object(fields)) = serde_json::to_value(record)
        {
            metadata.extend(fields);
        }
        SourceInfo {
            content_type: unit.kind().to_string(),
            excerpt: truncate_excerpt(unit.display_text(), self.source_excerpt_chars),
            metadata,
        }
    }
}

fn degraded_answer(
    document_id: DocumentId,
    started: Instant,
    outcome: QueryOutcome,
    detail: String,
) -> AnswerResult {
    AnswerResult {
        answer: "There was a technical issue processing your query. Please try again."
            .to_string(),
        document_id,
        elapsed_seconds: started.elapsed().as_secs_f64(),
        sources: Vec::new(),
        related_images: Vec::new(),
        confidence: Some(0.0),
        diagnostics: QueryDiagnostics { outcome, detail },
    }
}

fn build_prompt(question: &str, context: &str) -> String {
    format!(
        "You are an expert AI assistant that answers questions based on provided context \
         from technical documents.\n\n\
         **CONTEXT:**\n{context}\n\n\
         **QUESTION:** {question}\n\n\
         **ANSWER:**"
    )
}

async fn collect_related_images(units: &[ContentUnit], max_results: usize) -> Vec<RelatedImage> {
    let mut related = Vec::new();
    for unit in units {
        if related.len() >= max_results {
            break;
        }
        let ContentUnit::Image { record } = unit else {
            continue;
        };
        let image_base64 = match tokio::fs::read(&record.path).await {
            Ok(bytes) => Some(BASE64.encode(bytes)),
            Err(error) => {
                tracing::debug!(path = %record.path.display(), error = %error, "Image bytes unavailable for inlining");
                None
            }
        };
        related.push(RelatedImage {
            image_id: record.image_id.clone(),
            filename: record.filename.clone(),
            path: record.path.display().to_string(),
            description: record.description.clone(),
            image_base64,
        });
    }
    related
}

/// Truncate to a character budget at a char boundary, marking elided content.
fn truncate_excerpt(text: &str, limit: usize) -> String {
    if text.chars().count() <= limit {
        return text.to_string();
    }
    let mut excerpt: String = text.chars().take(limit).collect();
    excerpt.push_str("...");
    excerpt
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::content::ImageRecord;
    use crate::document::DocumentRegistry;
    use crate::generation::GenerationError;
    use async_trait::async_trait;
    use std::path::PathBuf;

    struct NoopGenerator;

    #[async_trait]
    impl GenerationClient for NoopGenerator {
        async fn generate(&self, _prompt: &str) -> Result<String, GenerationError> {
            Ok(String::new())
        }
    }

    fn engine() -> QueryEngine {
        QueryEngine::new(Arc::new(NoopGenerator), 1000, 500)
    }

    #[test]
    fn truncate_respects_char_boundaries() {
        let text = "héllo wörld";
        assert_eq!(truncate_excerpt(text, 100), text);
        let truncated = truncate_excerpt(text, 4);
        assert_eq!(truncated, "héll...");
    }

    #[test]
    fn context_groups_units_by_type() {
        let units = vec![
            ContentUnit::Text {
                body: "first chunk".into(),
            },
            ContentUnit::Image {
                record: ImageRecord {
                    image_id: "ab12".into(),
                    filename: "image_1_ab12.png".into(),
                    path: PathBuf::from("/tmp/image_1_ab12.png"),
                    description: "a diagram".into(),
                    original_index: 0,
                },
            },
            ContentUnit::Table {
                html: "<table/>".into(),
            },
        ];

        let context = engine().build_context(&units);
        let text_at = context.find("**TEXT CONTEXT:**").expect("text section");
        let table_at = context.find("**TABLE CONTEXT:**").expect("table section");
        let image_at = context.find("**IMAGE CONTEXT:**").expect("image section");
        assert!(text_at < table_at && table_at < image_at);
        assert!(context.contains("1. first chunk"));
        assert!(context.contains("1. a diagram"));
    }

    #[test]
    fn image_sources_carry_structured_metadata() {
        let record = ImageRecord {
            image_id: "ab12".into(),
            filename: "image_1_ab12.png".into(),
            path: PathBuf::from("/tmp/image_1_ab12.png"),
            description: "a diagram".into(),
            original_index: 0,
        };
        let key = RetrievalKey::generate();
        let source = engine().source_for(&ContentUnit::Image { record }, key);

        assert_eq!(source.content_type, "image");
        assert_eq!(source.metadata["retrieval_key"], key.to_string());
        assert_eq!(source.metadata["filename"], "image_1_ab12.png");
        assert_eq!(source.metadata["image_id"], "ab12");
    }

    #[test]
    fn status_answers_are_state_specific_non_answers() {
        let registry = DocumentRegistry::new();
        let id = registry.register("doc.pdf", PathBuf::from("/tmp/doc.pdf"), 1);
        let pending = registry.snapshot(id).expect("snapshot");

        let result = QueryEngine::status_answer(&pending);
        assert_eq!(result.diagnostics.outcome, QueryOutcome::DocumentPending);
        assert!(result.sources.is_empty());
        assert!(result.related_images.is_empty());
        assert_eq!(result.confidence, Some(0.0));
        assert!(result.answer.contains("queued"));

        registry.begin_processing(id).expect("begin");
        registry.fail(id, "boom").expect("fail");
        let failed = registry.snapshot(id).expect("snapshot");
        let result = QueryEngine::status_answer(&failed);
        assert_eq!(result.diagnostics.outcome, QueryOutcome::DocumentFailed);
        assert!(result.answer.contains("re-submit"));
    }
}
