//! Per-document multi-vector index.
//!
//! The index owns the indirection between what is searched and what is returned: compact
//! summaries (or image descriptions) are embedded and stored in a Qdrant collection, while
//! the raw content units live in a side table keyed by the same retrieval key. A vector is
//! only made searchable after its raw content is resolvable, and a failed upsert rolls the
//! side-table entry back, so neither table can hold an orphan.

use crate::content::{ContentUnit, RetrievalKey};
use crate::document::DocumentId;
use crate::embedding::{EmbeddingClient, EmbeddingError};
use crate::qdrant::{PointInsert, QdrantError, QdrantService};
use serde_json::json;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use thiserror::Error;

/// Errors surfaced by index operations.
#[derive(Debug, Error)]
pub enum IndexError {
    /// Embedding provider failed to produce a vector.
    #[error("Failed to generate embeddings: {0}")]
    Embedding(#[from] EmbeddingError),
    /// Qdrant interaction failed.
    #[error("Qdrant request failed: {0}")]
    Qdrant(#[from] QdrantError),
    /// Returned embedding dimension does not match the collection.
    #[error("Embedding dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch {
        /// Dimension the collection was provisioned with.
        expected: usize,
        /// Dimension the provider produced.
        actual: usize,
    },
    /// A searchable vector has no raw content behind it. This indicates a
    /// vector/side-table desync and is a programming error, never a runtime condition.
    #[error("Index consistency violation: no raw content for retrieval key {0}")]
    Consistency(RetrievalKey),
}

struct StoredUnit {
    unit: ContentUnit,
    seq: u64,
}

/// Searchable index over one document's content units.
pub struct MultiVectorIndex {
    document_id: DocumentId,
    collection: String,
    qdrant: Arc<QdrantService>,
    embedder: Arc<dyn EmbeddingClient>,
    score_threshold: Option<f32>,
    store: RwLock<HashMap<RetrievalKey, StoredUnit>>,
    next_seq: AtomicU64,
}

impl MultiVectorIndex {
    /// Provision the document's collection and return an empty index over it.
    pub async fn create(
        document_id: DocumentId,
        qdrant: Arc<QdrantService>,
        embedder: Arc<dyn EmbeddingClient>,
        score_threshold: Option<f32>,
    ) -> Result<Self, IndexError> {
        let collection = format!("doc_{}", document_id.simple());
        qdrant
            .create_collection(&collection, embedder.dimension() as u64)
            .await?;
        tracing::debug!(document_id = %document_id, collection, "Index collection ready");
        Ok(Self {
            document_id,
            collection,
            qdrant,
            embedder,
            score_threshold,
            store: RwLock::new(HashMap::new()),
            next_seq: AtomicU64::new(0),
        })
    }

    /// Name of the backing Qdrant collection.
    pub fn collection(&self) -> &str {
        &self.collection
    }

    /// Number of units currently held by the index.
    pub fn unit_count(&self) -> usize {
        self.store.read().expect("index store poisoned").len()
    }

    /// Retrieval keys in insertion order, for diagnostics.
    pub fn keys(&self) -> Vec<RetrievalKey> {
        let store = self.store.read().expect("index store poisoned");
        let mut entries: Vec<_> = store.iter().map(|(key, stored)| (stored.seq, *key)).collect();
        entries.sort_by_key(|(seq, _)| *seq);
        entries.into_iter().map(|(_, key)| key).collect()
    }

    /// Index a content unit under its summary or description.
    ///
    /// Returns the fresh retrieval key linking the searchable vector to the raw unit.
    pub async fn insert(
        &self,
        unit: ContentUnit,
        summary: &str,
    ) -> Result<RetrievalKey, IndexError> {
        let vector = self.embed_one(summary).await?;
        let key = RetrievalKey::generate();
        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        let kind = unit.kind();

        // Side table before vector: anything search can see must resolve.
        self.store
            .write()
            .expect("index store poisoned")
            .insert(key, StoredUnit { unit, seq });

        let payload = json!({
            "retrieval_key": key.to_string(),
            "content_type": kind,
            "seq": seq,
        });
        let point = PointInsert {
            id: key.to_string(),
            vector,
            payload,
        };

        match self.qdrant.upsert_points(&self.collection, vec![point]).await {
            Ok(()) => {
                tracing::debug!(
                    document_id = %self.document_id,
                    retrieval_key = %key,
                    content_type = kind,
                    seq,
                    "Unit indexed"
                );
                Ok(key)
            }
            Err(error) => {
                self.store
                    .write()
                    .expect("index store poisoned")
                    .remove(&key);
                Err(error.into())
            }
        }
    }

    /// Return up to `k` retrieval keys nearest to the question.
    ///
    /// Results are ordered by similarity score descending, ties broken by insertion
    /// order, making the outcome deterministic for identical index state and question.
    pub async fn query(&self, question: &str, k: usize) -> Result<Vec<RetrievalKey>, IndexError> {
        if k == 0 {
            return Ok(Vec::new());
        }
        let vector = self.embed_one(question).await?;
        let hits = self
            .qdrant
            .search_points(&self.collection, vector, k, self.score_threshold)
            .await?;

        let mut ranked: Vec<(f32, u64, RetrievalKey)> = hits
            .into_iter()
            .filter_map(|hit| {
                let key = hit
                    .payload
                    .as_ref()
                    .and_then(|payload| payload.get("retrieval_key"))
                    .and_then(|value| value.as_str())
                    .and_then(RetrievalKey::parse)
                    .or_else(|| RetrievalKey::parse(&hit.id))?;
                let seq = hit
                    .payload
                    .as_ref()
                    .and_then(|payload| payload.get("seq"))
                    .and_then(|value| value.as_u64())
                    .unwrap_or(u64::MAX);
                Some((hit.score, seq, key))
            })
            .collect();
        ranked.sort_by(|a, b| {
            b.0.partial_cmp(&a.0)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.1.cmp(&b.1))
        });
        ranked.truncate(k);

        Ok(ranked.into_iter().map(|(_, _, key)| key).collect())
    }

    /// Look up the raw content behind each retrieval key.
    pub fn resolve(&self, keys: &[RetrievalKey]) -> Result<Vec<ContentUnit>, IndexError> {
        let store = self.store.read().expect("index store poisoned");
        keys.iter()
            .map(|key| {
                store
                    .get(key)
                    .map(|stored| stored.unit.clone())
                    .ok_or(IndexError::Consistency(*key))
            })
            .collect()
    }

    /// Drop the backing collection. The side table dies with the index value.
    pub async fn destroy(&self) -> Result<(), QdrantError> {
        self.qdrant.delete_collection(&self.collection).await
    }

    async fn embed_one(&self, text: &str) -> Result<Vec<f32>, IndexError> {
        embed_one_with(self.embedder.as_ref(), text).await
    }
}

async fn embed_one_with<E: EmbeddingClient + ?Sized>(
    embedder: &E,
    text: &str,
) -> Result<Vec<f32>, IndexError> {
    let mut vectors = embedder.embed(vec![text.to_string()]).await?;
    let vector = vectors.pop().ok_or_else(|| {
        IndexError::Embedding(EmbeddingError::GenerationFailed(
            "provider returned no vectors".to_string(),
        ))
    })?;

    let expected = embedder.dimension();
    if vector.len() != expected {
        return Err(IndexError::DimensionMismatch {
            expected,
            actual: vector.len(),
        });
    }
    Ok(vector)
}
