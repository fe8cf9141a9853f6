#![deny(missing_docs)]

//! Core library for the docrag multi-modal document QA engine.

/// Environment-driven configuration management.
pub mod config;
/// Typed content units and retrieval keys.
pub mod content;
/// Document records, processing states, and the shared registry.
pub mod document;
/// Embedding client abstraction and adapters.
pub mod embedding;
/// Structure-parser client and content extraction.
pub mod extraction;
/// Answer-generation client.
pub mod generation;
/// Per-document multi-vector index.
pub mod index;
/// Structured logging and tracing setup.
pub mod logging;
/// Ingestion and query metrics helpers.
pub mod metrics;
/// Status observer registration and publishing.
pub mod notify;
/// Document ingestion pipeline and lifecycle service.
pub mod pipeline;
/// Qdrant vector store integration.
pub mod qdrant;
/// Grounded question answering over the index.
pub mod query;
/// Text and table summarization client.
pub mod summarization;
/// Image description client.
pub mod vision;
