//! Document lifecycle records and the process-wide registry.
//!
//! The registry is the single owner of per-document state. Transitions are monotonic:
//! `Pending -> Processing -> {Completed, Failed}`, enforced here so no caller can move a
//! document backwards. Lock discipline: an outer map lock held only to locate the entry,
//! a per-entry mutex held only for the field update. Nothing is awaited under either lock.

use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, RwLock};
use thiserror::Error;
use time::OffsetDateTime;
use uuid::Uuid;

/// Opaque identifier assigned to a document at registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct DocumentId(Uuid);

impl DocumentId {
    /// Generate a fresh identifier.
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }

    /// Parse an identifier from its canonical string form.
    pub fn parse(value: &str) -> Option<Self> {
        Uuid::parse_str(value).ok().map(Self)
    }

    /// Compact hyphen-free rendering used for collection and directory names.
    pub fn simple(&self) -> String {
        self.0.simple().to_string()
    }
}

impl fmt::Display for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Lifecycle state of a registered document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcessingState {
    /// Registered, ingestion not yet started.
    Pending,
    /// Ingestion unit of work is running.
    Processing,
    /// Ingestion finished; the document is queryable.
    Completed,
    /// Ingestion aborted; the document must be re-submitted.
    Failed,
}

impl ProcessingState {
    /// Whether the state admits no further transitions.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// User-facing status line for this state.
    pub fn message(self) -> &'static str {
        match self {
            Self::Pending => "Your document is queued for processing.",
            Self::Processing => "Processing your document. This may take 1-2 minutes.",
            Self::Completed => {
                "Processing complete. You can now ask questions about your document."
            }
            Self::Failed => "Processing failed. Please re-submit the document.",
        }
    }
}

/// Number of indexed units per content type.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct UnitCounts {
    /// Indexed text chunks.
    pub texts: usize,
    /// Indexed tables.
    pub tables: usize,
    /// Indexed images.
    pub images: usize,
}

impl UnitCounts {
    /// Total units across all content types.
    pub fn total(&self) -> usize {
        self.texts + self.tables + self.images
    }
}

/// Mutable per-document record owned by the registry.
#[derive(Debug, Clone)]
pub struct Document {
    /// Identifier assigned at registration.
    pub id: DocumentId,
    /// Original file name supplied by the caller.
    pub filename: String,
    /// Location of the raw document bytes on disk.
    pub source_path: PathBuf,
    /// Size of the raw document in bytes.
    pub size_bytes: u64,
    /// Registration timestamp, RFC3339.
    pub registered_at: String,
    /// Current lifecycle state.
    pub state: ProcessingState,
    /// Wall-clock seconds spent ingesting, set once terminal.
    pub processing_seconds: Option<f64>,
    /// Unit counts recorded on completion.
    pub unit_counts: Option<UnitCounts>,
    /// Last error message, set on failure.
    pub error: Option<String>,
}

impl Document {
    fn snapshot(&self) -> StatusSnapshot {
        let message = match (&self.state, &self.error) {
            (ProcessingState::Failed, Some(error)) => {
                format!("Processing failed: {error}. Please re-submit the document.")
            }
            (state, _) => state.message().to_string(),
        };
        StatusSnapshot {
            document_id: self.id,
            state: self.state,
            filename: self.filename.clone(),
            registered_at: self.registered_at.clone(),
            processing_seconds: self.processing_seconds,
            unit_counts: self.unit_counts,
            message,
        }
    }
}

/// Serializable view of a document's status, published to observers and callers.
#[derive(Debug, Clone, Serialize)]
pub struct StatusSnapshot {
    /// Identifier of the document.
    pub document_id: DocumentId,
    /// Lifecycle state at snapshot time.
    pub state: ProcessingState,
    /// Original file name.
    pub filename: String,
    /// Registration timestamp, RFC3339.
    pub registered_at: String,
    /// Ingestion duration in seconds, present once terminal.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub processing_seconds: Option<f64>,
    /// Unit counts, present once completed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unit_counts: Option<UnitCounts>,
    /// State-specific user-facing message.
    pub message: String,
}

/// Errors surfaced by registry lookups.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// The document id is not registered.
    #[error("Document {0} not found")]
    NotFound(DocumentId),
}

/// Outcome of attempting to start ingestion for a document.
#[derive(Debug, Clone)]
pub enum BeginOutcome {
    /// The document moved from Pending to Processing.
    Started(StatusSnapshot),
    /// The document was already past Pending; no new run may start.
    AlreadyStarted(ProcessingState),
}

/// Process-wide registry mapping document ids to their records.
#[derive(Default)]
pub struct DocumentRegistry {
    entries: RwLock<HashMap<DocumentId, Arc<Mutex<Document>>>>,
}

impl DocumentRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new document in the Pending state and return its id.
    pub fn register(&self, filename: &str, source_path: PathBuf, size_bytes: u64) -> DocumentId {
        let id = DocumentId::generate();
        let document = Document {
            id,
            filename: filename.to_string(),
            source_path,
            size_bytes,
            registered_at: now_rfc3339(),
            state: ProcessingState::Pending,
            processing_seconds: None,
            unit_counts: None,
            error: None,
        };
        self.entries
            .write()
            .expect("registry lock poisoned")
            .insert(id, Arc::new(Mutex::new(document)));
        tracing::info!(document_id = %id, filename, size_bytes, "Document registered");
        id
    }

    fn entry(&self, id: DocumentId) -> Result<Arc<Mutex<Document>>, RegistryError> {
        self.entries
            .read()
            .expect("registry lock poisoned")
            .get(&id)
            .cloned()
            .ok_or(RegistryError::NotFound(id))
    }

    /// Return a point-in-time status snapshot for the document.
    pub fn snapshot(&self, id: DocumentId) -> Result<StatusSnapshot, RegistryError> {
        let entry = self.entry(id)?;
        let document = entry.lock().expect("document lock poisoned");
        Ok(document.snapshot())
    }

    /// Return a full copy of the document record.
    pub fn document(&self, id: DocumentId) -> Result<Document, RegistryError> {
        let entry = self.entry(id)?;
        let document = entry.lock().expect("document lock poisoned");
        Ok(document.clone())
    }

    /// Atomically transition Pending -> Processing.
    ///
    /// Any other current state leaves the record untouched and reports it, which makes
    /// this the single serialization point for ingestion: two racing callers observe
    /// exactly one `Started`.
    pub fn begin_processing(&self, id: DocumentId) -> Result<BeginOutcome, RegistryError> {
        let entry = self.entry(id)?;
        let mut document = entry.lock().expect("document lock poisoned");
        if document.state != ProcessingState::Pending {
            return Ok(BeginOutcome::AlreadyStarted(document.state));
        }
        document.state = ProcessingState::Processing;
        Ok(BeginOutcome::Started(document.snapshot()))
    }

    /// Mark the document Completed with its elapsed time and unit counts.
    ///
    /// A record already in a terminal state is left as-is.
    pub fn complete(
        &self,
        id: DocumentId,
        seconds: f64,
        counts: UnitCounts,
    ) -> Result<StatusSnapshot, RegistryError> {
        let entry = self.entry(id)?;
        let mut document = entry.lock().expect("document lock poisoned");
        if !document.state.is_terminal() {
            document.state = ProcessingState::Completed;
            document.processing_seconds = Some(seconds);
            document.unit_counts = Some(counts);
        }
        Ok(document.snapshot())
    }

    /// Mark the document Failed with the captured error message.
    ///
    /// A record already in a terminal state is left as-is.
    pub fn fail(&self, id: DocumentId, error: &str) -> Result<StatusSnapshot, RegistryError> {
        let entry = self.entry(id)?;
        let mut document = entry.lock().expect("document lock poisoned");
        if !document.state.is_terminal() {
            document.state = ProcessingState::Failed;
            document.error = Some(error.to_string());
        }
        Ok(document.snapshot())
    }

    /// Remove the document record, returning it for teardown of associated state.
    pub fn remove(&self, id: DocumentId) -> Result<Document, RegistryError> {
        let entry = self
            .entries
            .write()
            .expect("registry lock poisoned")
            .remove(&id)
            .ok_or(RegistryError::NotFound(id))?;
        let document = entry.lock().expect("document lock poisoned");
        Ok(document.clone())
    }

    /// Snapshots for every registered document.
    pub fn list(&self) -> Vec<StatusSnapshot> {
        let entries: Vec<_> = self
            .entries
            .read()
            .expect("registry lock poisoned")
            .values()
            .cloned()
            .collect();
        entries
            .iter()
            .map(|entry| entry.lock().expect("document lock poisoned").snapshot())
            .collect()
    }
}

/// Current timestamp formatted as RFC3339.
pub(crate) fn now_rfc3339() -> String {
    OffsetDateTime::now_utc()
        .format(&time::format_description::well_known::Rfc3339)
        .unwrap_or_else(|_| "1970-01-01T00:00:00Z".to_string())
}
