//! Typed content units flowing from extraction through the index to the query path.
//!
//! Retrieval hands these back exactly as they were ingested; downstream code matches
//! exhaustively on the variant instead of probing payload shapes at runtime.

use serde::Serialize;
use std::fmt;
use std::path::PathBuf;
use uuid::Uuid;

/// Opaque identifier linking a searchable vector to its raw content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct RetrievalKey(Uuid);

impl RetrievalKey {
    /// Generate a fresh key.
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }

    /// Parse a key from its canonical string form.
    pub fn parse(value: &str) -> Option<Self> {
        Uuid::parse_str(value).ok().map(Self)
    }
}

impl fmt::Display for RetrievalKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Metadata recorded for an image persisted to the byte-store.
#[derive(Debug, Clone, Serialize)]
pub struct ImageRecord {
    /// Caller-visible short identifier, unique within the document.
    pub image_id: String,
    /// Generated file name under the document's image directory.
    pub filename: String,
    /// Absolute or workspace-relative path of the persisted bytes.
    pub path: PathBuf,
    /// Description produced by the vision service, or an error placeholder.
    pub description: String,
    /// Zero-based position of the image in extraction order.
    pub original_index: usize,
}

/// A single unit of document content, discriminated by modality.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "content_type", rename_all = "lowercase")]
pub enum ContentUnit {
    /// A narrative text chunk.
    Text {
        /// Raw chunk text.
        body: String,
    },
    /// A table, kept in its structured HTML serialization.
    Table {
        /// HTML serialization of the table.
        html: String,
    },
    /// An image persisted to the byte-store.
    Image {
        /// Metadata recorded while processing the image.
        record: ImageRecord,
    },
}

impl ContentUnit {
    /// Serializable tag describing the variant.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Text { .. } => "text",
            Self::Table { .. } => "table",
            Self::Image { .. } => "image",
        }
    }

    /// The text rendered for excerpts and context assembly.
    pub fn display_text(&self) -> &str {
        match self {
            Self::Text { body } => body,
            Self::Table { html } => html,
            Self::Image { record } => &record.description,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_matches_variant() {
        let text = ContentUnit::Text {
            body: "chunk".into(),
        };
        let table = ContentUnit::Table {
            html: "<table/>".into(),
        };
        assert_eq!(text.kind(), "text");
        assert_eq!(table.kind(), "table");
        assert_eq!(text.display_text(), "chunk");
    }

    #[test]
    fn retrieval_key_round_trips_through_display() {
        let key = RetrievalKey::generate();
        let parsed = RetrievalKey::parse(&key.to_string()).expect("parse");
        assert_eq!(key, parsed);
    }

    #[test]
    fn serializes_with_content_type_tag() {
        let unit = ContentUnit::Table {
            html: "<table></table>".into(),
        };
        let value = serde_json::to_value(&unit).expect("serialize");
        assert_eq!(value["content_type"], "table");
        assert_eq!(value["html"], "<table></table>");
    }
}
