//! Lifecycle service coordinating registration, ingestion, and querying.
//!
//! `DocumentService` is the long-lived handle a transport layer talks to. It owns the
//! document registry, the status notifier, the client handles for every external
//! collaborator, and the per-document index map. Construct it once near process start
//! and share it through an `Arc`; ingestion runs are spawned from it and hold their own
//! clone.

use crate::config::get_config;
use crate::content::ContentUnit;
use crate::document::{
    BeginOutcome, DocumentId, DocumentRegistry, ProcessingState, RegistryError, StatusSnapshot,
    UnitCounts,
};
use crate::embedding::{EmbeddingClient, get_embedding_client};
use crate::extraction::{
    self, ExtractionError, HttpStructureParser, ParseOptions, StructureParser,
};
use crate::generation::{GenerationClient, HttpGenerationClient};
use crate::index::{IndexError, MultiVectorIndex};
use crate::metrics::{EngineMetrics, MetricsSnapshot};
use crate::notify::{ObserverId, StatusNotifier, StatusObserver};
use crate::pipeline::images::{ImagePipeline, RatePolicy};
use crate::pipeline::summaries::{SummaryKind, SummaryOutcome, SummaryPipeline};
use crate::qdrant::{QdrantError, QdrantService};
use crate::query::{AnswerResult, QueryEngine};
use crate::summarization::{HttpSummarizationClient, SummarizationClient};
use crate::vision::{HttpVisionClient, VisionClient};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, RwLock};
use std::time::Instant;
use thiserror::Error;

/// Errors that abort an ingestion run and mark the document Failed.
#[derive(Debug, Error)]
pub enum IngestError {
    /// Document disappeared from the registry mid-run.
    #[error("Document no longer registered: {0}")]
    Registry(#[from] RegistryError),
    /// Raw document bytes could not be read.
    #[error("Failed to read document source: {0}")]
    Source(#[from] std::io::Error),
    /// Structure parser rejected the document.
    #[error("Extraction failed: {0}")]
    Extraction(#[from] ExtractionError),
    /// Index construction failed.
    #[error("Index build failed: {0}")]
    Index(#[from] IndexError),
    /// Summary outcomes did not align 1:1 with their input units.
    #[error("Summary alignment broken: {inputs} units produced {outputs} summaries")]
    SummaryAlignment {
        /// Number of units submitted for summarization.
        inputs: usize,
        /// Number of summary outcomes received.
        outputs: usize,
    },
}

/// Client handles for every external collaborator the pipeline consumes.
pub struct ExternalClients {
    /// Document structure parser.
    pub parser: Arc<dyn StructureParser>,
    /// Text/table summarization service.
    pub summarizer: Arc<dyn SummarizationClient>,
    /// Image description service.
    pub vision: Arc<dyn VisionClient>,
    /// Answer generation service.
    pub generator: Arc<dyn GenerationClient>,
    /// Embedding backend.
    pub embedder: Arc<dyn EmbeddingClient>,
    /// Vector store transport.
    pub qdrant: Arc<QdrantService>,
}

/// Tunables governing the pipeline, independent of client wiring.
#[derive(Debug, Clone)]
pub struct ServiceSettings {
    /// Root directory of the image byte-store.
    pub images_dir: PathBuf,
    /// Options forwarded to the structure parser.
    pub parse_options: ParseOptions,
    /// Pacing between vision-service calls.
    pub rate_policy: RatePolicy,
    /// Fan-out bound for summarization calls.
    pub summary_concurrency: usize,
    /// Optional minimum similarity score for retrieval.
    pub score_threshold: Option<f32>,
    /// Character budget per unit in the generation context.
    pub context_excerpt_chars: usize,
    /// Character budget per unit in citation excerpts.
    pub source_excerpt_chars: usize,
}

impl ServiceSettings {
    /// Build settings from the process configuration.
    pub fn from_config() -> Self {
        let config = get_config();
        Self {
            images_dir: config.images_dir.clone(),
            parse_options: ParseOptions::from_config(),
            rate_policy: RatePolicy::from_config(),
            summary_concurrency: config.summary_concurrency,
            score_threshold: config.search_score_threshold,
            context_excerpt_chars: config.context_excerpt_chars,
            source_excerpt_chars: config.source_excerpt_chars,
        }
    }
}

/// Coordinates the full document lifecycle: register, ingest, observe, query, delete.
pub struct DocumentService {
    registry: DocumentRegistry,
    notifier: StatusNotifier,
    metrics: EngineMetrics,
    parser: Arc<dyn StructureParser>,
    summaries: SummaryPipeline,
    images: ImagePipeline,
    embedder: Arc<dyn EmbeddingClient>,
    qdrant: Arc<QdrantService>,
    query: QueryEngine,
    settings: ServiceSettings,
    indexes: RwLock<HashMap<DocumentId, Arc<MultiVectorIndex>>>,
}

impl DocumentService {
    /// Build a service from explicit clients and settings.
    pub fn new(clients: ExternalClients, settings: ServiceSettings) -> Self {
        let summaries = SummaryPipeline::new(clients.summarizer, settings.summary_concurrency);
        let images = ImagePipeline::new(
            clients.vision,
            settings.images_dir.clone(),
            settings.rate_policy,
        );
        let query = QueryEngine::new(
            clients.generator,
            settings.context_excerpt_chars,
            settings.source_excerpt_chars,
        );
        Self {
            registry: DocumentRegistry::new(),
            notifier: StatusNotifier::new(),
            metrics: EngineMetrics::new(),
            parser: clients.parser,
            summaries,
            images,
            embedder: clients.embedder,
            qdrant: clients.qdrant,
            query,
            settings,
            indexes: RwLock::new(HashMap::new()),
        }
    }

    /// Build a service wired to HTTP clients from the process configuration.
    pub fn from_config() -> Result<Self, QdrantError> {
        let config = get_config();
        let clients = ExternalClients {
            parser: Arc::new(HttpStructureParser::from_config()),
            summarizer: Arc::new(HttpSummarizationClient::from_config()),
            vision: Arc::new(HttpVisionClient::from_config()),
            generator: Arc::new(HttpGenerationClient::from_config()),
            embedder: Arc::from(get_embedding_client()),
            qdrant: Arc::new(QdrantService::new(
                &config.qdrant_url,
                config.qdrant_api_key.clone(),
            )?),
        };
        Ok(Self::new(clients, ServiceSettings::from_config()))
    }

    /// Register a document in the Pending state.
    ///
    /// `source_path` is where the (out-of-scope) upload layer stored the raw bytes; the
    /// ingestion task reads them from there.
    pub fn register(
        &self,
        filename: &str,
        source_path: impl Into<PathBuf>,
        size_bytes: u64,
    ) -> DocumentId {
        self.registry.register(filename, source_path.into(), size_bytes)
    }

    /// Current status snapshot for a document.
    pub fn get_status(&self, id: DocumentId) -> Result<StatusSnapshot, RegistryError> {
        self.registry.snapshot(id)
    }

    /// Status snapshots for every registered document.
    pub fn list_documents(&self) -> Vec<StatusSnapshot> {
        self.registry.list()
    }

    /// Subscribe an observer to a document's lifecycle transitions.
    pub fn subscribe(&self, id: DocumentId, observer: Box<dyn StatusObserver>) -> ObserverId {
        self.notifier.subscribe(id, observer)
    }

    /// Remove a previously registered observer.
    pub fn unsubscribe(&self, id: DocumentId, observer_id: ObserverId) -> bool {
        self.notifier.unsubscribe(id, observer_id)
    }

    /// Current engine counters.
    pub fn metrics_snapshot(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    /// The index built for a completed document, if present.
    pub fn index(&self, id: DocumentId) -> Option<Arc<MultiVectorIndex>> {
        self.indexes
            .read()
            .expect("index map poisoned")
            .get(&id)
            .cloned()
    }

    /// Start ingestion for a Pending document.
    ///
    /// Takes a clone of the service handle so the spawned unit of work can outlive the
    /// caller. This is the single serialization point: the Pending→Processing transition
    /// is atomic, so concurrent calls schedule exactly one unit of work. A document that
    /// is already Processing, Completed, or Failed is left untouched and its current
    /// state returned.
    pub fn start_processing(
        self: Arc<Self>,
        id: DocumentId,
    ) -> Result<ProcessingState, RegistryError> {
        match self.registry.begin_processing(id)? {
            BeginOutcome::AlreadyStarted(state) => {
                tracing::debug!(document_id = %id, state = ?state, "Ingestion already scheduled; ignoring");
                Ok(state)
            }
            BeginOutcome::Started(snapshot) => {
                self.notifier.publish(id, &snapshot);
                tokio::spawn(async move {
                    self.run_ingestion(id).await;
                });
                Ok(ProcessingState::Processing)
            }
        }
    }

    async fn run_ingestion(&self, id: DocumentId) {
        let started = Instant::now();
        tracing::info!(document_id = %id, "Ingestion started");

        match self.ingest(id).await {
            Ok(counts) => {
                let elapsed = started.elapsed().as_secs_f64();
                self.metrics.record_ingestion(counts.total() as u64);
                match self.registry.complete(id, elapsed, counts) {
                    Ok(snapshot) => {
                        tracing::info!(
                            document_id = %id,
                            seconds = elapsed,
                            texts = counts.texts,
                            tables = counts.tables,
                            images = counts.images,
                            "Ingestion completed"
                        );
                        self.notifier.publish(id, &snapshot);
                    }
                    Err(error) => {
                        tracing::warn!(document_id = %id, error = %error, "Completed ingestion for a removed document");
                    }
                }
            }
            Err(error) => {
                tracing::error!(document_id = %id, error = %error, "Ingestion failed");
                match self.registry.fail(id, &error.to_string()) {
                    Ok(snapshot) => self.notifier.publish(id, &snapshot),
                    Err(lookup) => {
                        tracing::warn!(document_id = %id, error = %lookup, "Failed ingestion for a removed document");
                    }
                }
            }
        }
    }

    async fn ingest(&self, id: DocumentId) -> Result<UnitCounts, IngestError> {
        let document = self.registry.document(id)?;
        let bytes = tokio::fs::read(&document.source_path).await?;

        let content =
            extraction::extract(self.parser.as_ref(), &bytes, &self.settings.parse_options)
                .await?;

        let image_records = self.images.process(id, content.images).await;

        let text_outcomes = self
            .summaries
            .summarize_batch(&content.texts, SummaryKind::Text)
            .await;
        ensure_aligned(content.texts.len(), text_outcomes.len())?;

        let table_outcomes = self
            .summaries
            .summarize_batch(&content.tables, SummaryKind::Table)
            .await;
        ensure_aligned(content.tables.len(), table_outcomes.len())?;

        let index = MultiVectorIndex::create(
            id,
            Arc::clone(&self.qdrant),
            Arc::clone(&self.embedder),
            self.settings.score_threshold,
        )
        .await?;

        let counts = UnitCounts {
            texts: content.texts.len(),
            tables: content.tables.len(),
            images: image_records.len(),
        };

        if let Err(error) = populate_index(
            &index,
            content.texts,
            &text_outcomes,
            content.tables,
            &table_outcomes,
            &image_records,
        )
        .await
        {
            // The handle is never published, so the partial state is unreachable; the
            // collection delete is cleanup only.
            if let Err(teardown) = index.destroy().await {
                tracing::warn!(document_id = %id, error = %teardown, "Failed to tear down partial collection");
            }
            return Err(error.into());
        }

        debug_assert_eq!(counts.total(), index.unit_count());

        self.indexes
            .write()
            .expect("index map poisoned")
            .insert(id, Arc::new(index));

        Ok(counts)
    }

    /// Answer a question against a document's index.
    ///
    /// Unknown ids surface as `RegistryError::NotFound`; every other condition —
    /// non-Completed states, retrieval or generation failures — produces a structured
    /// `AnswerResult` rather than an error.
    pub async fn answer(
        &self,
        id: DocumentId,
        question: &str,
        max_results: usize,
    ) -> Result<AnswerResult, RegistryError> {
        let snapshot = self.registry.snapshot(id)?;
        self.metrics.record_query();

        if snapshot.state != ProcessingState::Completed {
            return Ok(QueryEngine::status_answer(&snapshot));
        }

        let Some(index) = self.index(id) else {
            // Completed but the index was torn down underneath us (document deletion
            // racing the query): degrade rather than fail.
            tracing::warn!(document_id = %id, "Completed document has no index; answering degraded");
            return Ok(QueryEngine::missing_index_answer(id));
        };

        Ok(self.query.answer(index.as_ref(), id, question, max_results).await)
    }

    /// Delete a document: registry entry, observers, index collection, stored files.
    pub async fn delete(&self, id: DocumentId) -> Result<(), RegistryError> {
        let document = self.registry.remove(id)?;
        self.notifier.clear(id);

        let index = self.indexes.write().expect("index map poisoned").remove(&id);
        if let Some(index) = index {
            if let Err(error) = index.destroy().await {
                tracing::warn!(document_id = %id, error = %error, "Failed to delete index collection");
            }
        }

        let image_dir = self.settings.images_dir.join(id.to_string());
        if let Err(error) = tokio::fs::remove_dir_all(&image_dir).await
            && error.kind() != std::io::ErrorKind::NotFound
        {
            tracing::warn!(document_id = %id, error = %error, "Failed to remove image directory");
        }

        if let Err(error) = tokio::fs::remove_file(&document.source_path).await
            && error.kind() != std::io::ErrorKind::NotFound
        {
            tracing::warn!(document_id = %id, error = %error, "Failed to remove source file");
        }

        tracing::info!(document_id = %id, "Document deleted");
        Ok(())
    }
}

fn ensure_aligned(inputs: usize, outputs: usize) -> Result<(), IngestError> {
    if inputs == outputs {
        Ok(())
    } else {
        Err(IngestError::SummaryAlignment { inputs, outputs })
    }
}

async fn populate_index(
    index: &MultiVectorIndex,
    texts: Vec<String>,
    text_outcomes: &[SummaryOutcome],
    tables: Vec<String>,
    table_outcomes: &[SummaryOutcome],
    image_records: &[crate::content::ImageRecord],
) -> Result<(), IndexError> {
    for (body, outcome) in texts.into_iter().zip(text_outcomes) {
        index
            .insert(ContentUnit::Text { body }, outcome.index_text())
            .await?;
    }

    for (html, outcome) in tables.into_iter().zip(table_outcomes) {
        index
            .insert(ContentUnit::Table { html }, outcome.index_text())
            .await?;
    }

    for record in image_records {
        index
            .insert(
                ContentUnit::Image {
                    record: record.clone(),
                },
                &record.description,
            )
            .await?;
    }

    Ok(())
}
