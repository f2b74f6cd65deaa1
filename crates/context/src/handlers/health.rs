//! Health check handlers

use axum::{extract::State, Json};
use serde::Serialize;
use crate::AppState;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: &'static str,
}

#[derive(Serialize)]
pub struct ReadyResponse {
    pub status: String,
    pub providers: Providers,
}

/// Collaborator providers the pipeline was wired with
#[derive(Debug, Clone, Serialize)]
pub struct Providers {
    pub index: String,
    pub embedding: String,
    pub completion: String,
}

/// Liveness probe - always returns healthy if server is running
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: brag_common::VERSION,
    })
}

/// Readiness probe - reports the configured collaborators
pub async fn ready(State(state): State<AppState>) -> Json<ReadyResponse> {
    Json(ReadyResponse {
        status: "ready".to_string(),
        providers: state.providers.clone(),
    })
}
