//! Qdrant vector store integration.
//!
//! One Qdrant collection is provisioned per ingested document; the client here covers
//! exactly the operations the index needs: collection create/delete, point upsert with
//! explicit ids and structured payloads, and similarity search.

mod client;
mod types;

pub use client::QdrantService;
pub use types::{PointInsert, QdrantError, ScoredPoint};
