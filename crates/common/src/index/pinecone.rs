//! Pinecone data-plane client
//!
//! Talks to an index host directly over REST:
//! `POST /query` and `GET /vectors/fetch`.

use super::{IndexMatch, IndexRecord, VectorIndex};
use crate::context::QueryFilter;
use crate::errors::{AppError, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

const API_VERSION: &str = "2024-07";

/// Pinecone index client
pub struct PineconeIndex {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    namespace: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct QueryRequest<'a> {
    vector: &'a [f32],
    top_k: usize,
    include_metadata: bool,
    include_values: bool,
    #[serde(skip_serializing_if = "str::is_empty")]
    namespace: &'a str,
    #[serde(skip_serializing_if = "QueryFilter::is_empty")]
    filter: &'a QueryFilter,
}

#[derive(Deserialize)]
struct QueryResponse {
    #[serde(default)]
    matches: Vec<IndexMatch>,
}

#[derive(Deserialize)]
struct FetchResponse {
    #[serde(default)]
    vectors: HashMap<String, IndexRecord>,
}

impl PineconeIndex {
    /// Create a new client for the given index host
    pub fn new(host: &str, api_key: String, namespace: String, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AppError::Configuration {
                message: format!("Failed to create HTTP client: {}", e),
            })?;

        Ok(Self {
            client,
            base_url: normalize_host(host),
            api_key,
            namespace,
        })
    }

    async fn check(response: reqwest::Response, operation: &str) -> Result<reqwest::Response> {
        if response.status().is_success() {
            return Ok(response);
        }
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        Err(AppError::IndexError {
            message: format!("{} failed with {}: {}", operation, status, body),
        })
    }
}

fn normalize_host(host: &str) -> String {
    let host = host.trim_end_matches('/');
    if host.starts_with("http://") || host.starts_with("https://") {
        host.to_string()
    } else {
        format!("https://{}", host)
    }
}

#[async_trait]
impl VectorIndex for PineconeIndex {
    async fn query(
        &self,
        vector: &[f32],
        top_k: usize,
        filter: &QueryFilter,
        include_metadata: bool,
    ) -> Result<Vec<IndexMatch>> {
        let request = QueryRequest {
            vector,
            top_k,
            include_metadata,
            include_values: false,
            namespace: &self.namespace,
            filter,
        };

        let response = self.client
            .post(format!("{}/query", self.base_url))
            .header("Api-Key", &self.api_key)
            .header("X-Pinecone-API-Version", API_VERSION)
            .json(&request)
            .send()
            .await
            .map_err(|e| AppError::IndexError {
                message: format!("Query request failed: {}", e),
            })?;

        let response = Self::check(response, "Query").await?;
        let body: QueryResponse = response.json().await.map_err(|e| AppError::IndexError {
            message: format!("Failed to parse query response: {}", e),
        })?;

        Ok(body.matches)
    }

    async fn fetch(&self, ids: &[String]) -> Result<HashMap<String, IndexRecord>> {
        if ids.is_empty() {
            return Ok(HashMap::new());
        }

        let mut params: Vec<(&str, &str)> = ids.iter().map(|id| ("ids", id.as_str())).collect();
        if !self.namespace.is_empty() {
            params.push(("namespace", self.namespace.as_str()));
        }

        let response = self.client
            .get(format!("{}/vectors/fetch", self.base_url))
            .header("Api-Key", &self.api_key)
            .header("X-Pinecone-API-Version", API_VERSION)
            .query(&params)
            .send()
            .await
            .map_err(|e| AppError::IndexError {
                message: format!("Fetch request failed: {}", e),
            })?;

        let response = Self::check(response, "Fetch").await?;
        let body: FetchResponse = response.json().await.map_err(|e| AppError::IndexError {
            message: format!("Failed to parse fetch response: {}", e),
        })?;

        Ok(body.vectors)
    }

    fn provider(&self) -> &str {
        "pinecone"
    }
}
