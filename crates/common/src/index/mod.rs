//! Vector index abstraction
//!
//! The index is consumed through two calls:
//! - `query`: similarity search with a metadata filter
//! - `fetch`: batched lookup of records by id
//!
//! Providers:
//! - Pinecone (REST data plane)
//! - In-memory cosine index for development and tests

mod memory;
mod pinecone;

pub use memory::InMemoryIndex;
pub use pinecone::PineconeIndex;

use crate::config::IndexConfig;
use crate::context::QueryFilter;
use crate::errors::{AppError, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

/// Loosely-typed record metadata as stored in the index
pub type Metadata = serde_json::Map<String, serde_json::Value>;

/// One similarity match
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexMatch {
    pub id: String,
    #[serde(default)]
    pub score: f32,
    #[serde(default)]
    pub metadata: Metadata,
}

/// A record returned by `fetch`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexRecord {
    pub id: String,
    #[serde(default)]
    pub metadata: Metadata,
}

/// Trait for vector index access
#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Similarity query, ordered by descending score
    async fn query(
        &self,
        vector: &[f32],
        top_k: usize,
        filter: &QueryFilter,
        include_metadata: bool,
    ) -> Result<Vec<IndexMatch>>;

    /// Fetch records by id. Unknown ids are absent from the result.
    async fn fetch(&self, ids: &[String]) -> Result<HashMap<String, IndexRecord>>;

    /// Provider name
    fn provider(&self) -> &str;
}

/// Create an index client based on configuration
pub fn create_index(config: &IndexConfig) -> Result<Arc<dyn VectorIndex>> {
    match config.provider.as_str() {
        "pinecone" => {
            let host = config.host.clone().ok_or_else(|| AppError::Configuration {
                message: "index.host is required for the pinecone provider".to_string(),
            })?;
            let api_key = config.api_key.clone().ok_or_else(|| AppError::Configuration {
                message: "index.api_key is required for the pinecone provider".to_string(),
            })?;
            Ok(Arc::new(PineconeIndex::new(
                &host,
                api_key,
                config.namespace.clone(),
                config.timeout(),
            )?))
        }
        "memory" => Ok(Arc::new(InMemoryIndex::new())),
        other => Err(AppError::Configuration {
            message: format!("Unknown index provider: {}", other),
        }),
    }
}
