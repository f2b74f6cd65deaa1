//! In-memory vector index using cosine similarity.
//!
//! Evaluates the same metadata filter language the hosted index accepts
//! (`$eq $ne $gt $gte $lt $lte $in $nin $and $or` and implicit equality),
//! so filters built by the pipeline behave identically in development.

use super::{IndexMatch, IndexRecord, Metadata, VectorIndex};
use crate::context::QueryFilter;
use crate::errors::Result;
use async_trait::async_trait;
use serde_json::Value;
use std::cmp::Ordering;
use std::collections::HashMap;
use tokio::sync::RwLock;

#[derive(Debug, Clone)]
struct StoredVector {
    values: Vec<f32>,
    metadata: Metadata,
}

/// An in-memory vector index
#[derive(Debug, Default)]
pub struct InMemoryIndex {
    vectors: RwLock<HashMap<String, StoredVector>>,
}

impl InMemoryIndex {
    /// Create a new empty index
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a vector with its metadata
    pub async fn upsert(&self, id: impl Into<String>, values: Vec<f32>, metadata: Metadata) {
        self.vectors
            .write()
            .await
            .insert(id.into(), StoredVector { values, metadata });
    }

    /// Number of stored vectors
    pub async fn len(&self) -> usize {
        self.vectors.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.vectors.read().await.is_empty()
    }
}

/// Cosine similarity; 0.0 when either vector has zero magnitude.
fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

/// Evaluate a filter document against record metadata
pub(crate) fn matches_filter(filter: &serde_json::Map<String, Value>, metadata: &Metadata) -> bool {
    filter.iter().all(|(key, condition)| match key.as_str() {
        "$and" => condition
            .as_array()
            .map(|clauses| clauses.iter().all(|c| clause_matches(c, metadata)))
            .unwrap_or(false),
        "$or" => condition
            .as_array()
            .map(|clauses| clauses.iter().any(|c| clause_matches(c, metadata)))
            .unwrap_or(false),
        field => field_matches(metadata.get(field), condition),
    })
}

fn clause_matches(clause: &Value, metadata: &Metadata) -> bool {
    clause
        .as_object()
        .map(|filter| matches_filter(filter, metadata))
        .unwrap_or(false)
}

fn field_matches(value: Option<&Value>, condition: &Value) -> bool {
    match condition {
        Value::Object(ops) if ops.keys().all(|k| k.starts_with('$')) => {
            ops.iter().all(|(op, operand)| operator_matches(value, op, operand))
        }
        literal => value.is_some_and(|v| values_equal(v, literal)),
    }
}

fn operator_matches(value: Option<&Value>, op: &str, operand: &Value) -> bool {
    match op {
        "$eq" => value.is_some_and(|v| values_equal(v, operand)),
        "$ne" => !value.is_some_and(|v| values_equal(v, operand)),
        "$gt" => compare(value, operand) == Some(Ordering::Greater),
        "$gte" => matches!(compare(value, operand), Some(Ordering::Greater | Ordering::Equal)),
        "$lt" => compare(value, operand) == Some(Ordering::Less),
        "$lte" => matches!(compare(value, operand), Some(Ordering::Less | Ordering::Equal)),
        "$in" => operand
            .as_array()
            .is_some_and(|items| value.is_some_and(|v| items.iter().any(|i| values_equal(v, i)))),
        "$nin" => operand
            .as_array()
            .is_some_and(|items| !value.is_some_and(|v| items.iter().any(|i| values_equal(v, i)))),
        _ => false,
    }
}

fn values_equal(a: &Value, b: &Value) -> bool {
    match (a.as_f64(), b.as_f64()) {
        (Some(x), Some(y)) => x == y,
        _ => a == b,
    }
}

fn compare(value: Option<&Value>, operand: &Value) -> Option<Ordering> {
    let value = value?;
    match (value.as_f64(), operand.as_f64()) {
        (Some(x), Some(y)) => x.partial_cmp(&y),
        _ => match (value.as_str(), operand.as_str()) {
            (Some(x), Some(y)) => Some(x.cmp(y)),
            _ => None,
        },
    }
}

#[async_trait]
impl VectorIndex for InMemoryIndex {
    async fn query(
        &self,
        vector: &[f32],
        top_k: usize,
        filter: &QueryFilter,
        include_metadata: bool,
    ) -> Result<Vec<IndexMatch>> {
        let vectors = self.vectors.read().await;

        let mut matches: Vec<IndexMatch> = vectors
            .iter()
            .filter(|(_, stored)| matches_filter(filter.as_map(), &stored.metadata))
            .map(|(id, stored)| IndexMatch {
                id: id.clone(),
                score: cosine_similarity(vector, &stored.values),
                metadata: if include_metadata {
                    stored.metadata.clone()
                } else {
                    Metadata::new()
                },
            })
            .collect();

        matches.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(Ordering::Equal)
                .then_with(|| a.id.cmp(&b.id))
        });
        matches.truncate(top_k);

        Ok(matches)
    }

    async fn fetch(&self, ids: &[String]) -> Result<HashMap<String, IndexRecord>> {
        let vectors = self.vectors.read().await;

        Ok(ids
            .iter()
            .filter_map(|id| {
                vectors.get(id).map(|stored| {
                    (
                        id.clone(),
                        IndexRecord {
                            id: id.clone(),
                            metadata: stored.metadata.clone(),
                        },
                    )
                })
            })
            .collect())
    }

    fn provider(&self) -> &str {
        "memory"
    }
}
