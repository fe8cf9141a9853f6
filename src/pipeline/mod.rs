//! Document ingestion pipeline: extraction, description, summarization, indexing, and
//! the lifecycle service coordinating them.

pub mod images;
mod service;
pub mod summaries;

pub use images::{ImagePipeline, RatePolicy};
pub use service::{DocumentService, ExternalClients, IngestError, ServiceSettings};
pub use summaries::{SummaryKind, SummaryOutcome, SummaryPipeline};
