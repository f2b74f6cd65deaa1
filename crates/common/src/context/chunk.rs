//! Typed view of indexed chunks
//!
//! Index metadata arrives as a loose JSON map; it is converted here, once,
//! at the retrieval boundary.

use crate::errors::{AppError, Result};
use crate::index::{IndexMatch, Metadata};
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const CONTENT_KEY: &str = "content";
pub const TITLE_KEY: &str = "document_title";
pub const WEB_URL_KEY: &str = "web_url";
pub const CREATED_AT_KEY: &str = "file_created_at";
pub const PRECHUNK_KEY: &str = "prechunk_id";
pub const POSTCHUNK_KEY: &str = "postchunk_id";

/// A unit of indexed text
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    pub id: String,
    pub content: String,
    pub document_title: String,
    pub doc_id: String,
    /// Empty when the document has no link
    pub web_url: String,
    pub created_at: String,
    pub created_at_unix: Option<i64>,
    /// `None` at the head of a document
    pub prechunk_id: Option<String>,
    /// `None` at the tail of a document
    pub postchunk_id: Option<String>,
    pub score: f32,
}

/// Where a retrieved chunk came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChunkOrigin {
    /// The similarity query sized by comprehensiveness
    Primary,
    /// The follow-up query scoped to one document
    Supplementary,
}

/// A chunk together with its origin
#[derive(Debug, Clone, PartialEq)]
pub struct RetrievedChunk {
    pub chunk: Chunk,
    pub origin: ChunkOrigin,
}

impl Chunk {
    /// Build a chunk from a query match.
    ///
    /// `content`, `document_title` and `doc_id` are required; everything
    /// else falls back to empty / `None`.
    pub fn from_match(m: &IndexMatch) -> Result<Self> {
        Self::from_metadata(&m.id, m.score, &m.metadata)
    }

    pub fn from_metadata(id: &str, score: f32, metadata: &Metadata) -> Result<Self> {
        Ok(Self {
            id: id.to_string(),
            content: required_str(metadata, CONTENT_KEY)?,
            document_title: required_str(metadata, TITLE_KEY)?,
            doc_id: required_str(metadata, crate::context::filter::DOC_ID_KEY)?,
            web_url: optional_str(metadata, WEB_URL_KEY).unwrap_or_default(),
            created_at: optional_str(metadata, CREATED_AT_KEY).unwrap_or_default(),
            created_at_unix: metadata
                .get(crate::context::filter::CREATED_AT_UNIX_KEY)
                .and_then(|v| v.as_i64().or_else(|| v.as_f64().map(|f| f as i64))),
            prechunk_id: optional_str(metadata, PRECHUNK_KEY).filter(|s| !s.is_empty()),
            postchunk_id: optional_str(metadata, POSTCHUNK_KEY).filter(|s| !s.is_empty()),
            score,
        })
    }

    /// Non-empty neighbor ids, previous first
    pub fn neighbor_ids(&self) -> Vec<String> {
        self.prechunk_id
            .iter()
            .chain(self.postchunk_id.iter())
            .cloned()
            .collect()
    }
}

/// Content of a fetched record, or empty when absent
pub fn record_content(metadata: &Metadata) -> &str {
    metadata.get(CONTENT_KEY).and_then(Value::as_str).unwrap_or("")
}

fn required_str(metadata: &Metadata, key: &str) -> Result<String> {
    optional_str(metadata, key).ok_or_else(|| AppError::MissingField {
        field: key.to_string(),
    })
}

fn optional_str(metadata: &Metadata, key: &str) -> Option<String> {
    match metadata.get(key)? {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}
