//! BRAG Context Engine
//!
//! Retrieval-augmented chat service providing:
//! - Adaptive retrieval over the document archive
//! - Context stitching with neighboring chunks
//! - Source numbering for citations
//! - Streaming answers over server-sent events

mod handlers;

use axum::{
    routing::{get, post},
    Router,
};
use brag_common::{
    completion::create_completer,
    config::AppConfig,
    embeddings::create_embedder,
    index::create_index,
    metrics::{register_metrics, EMBEDDING_BUCKETS, LATENCY_BUCKETS},
    RagPipeline, VERSION,
};
use handlers::health::Providers;
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::signal;
use tower_http::{
    cors::{Any, CorsLayer},
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub pipeline: Arc<RagPipeline>,
    pub providers: Providers,
}

impl AppState {
    /// Build collaborators and the pipeline from configuration
    pub fn from_config(config: AppConfig) -> brag_common::Result<Self> {
        let embedder = create_embedder(&config.embedding)?;
        let index = create_index(&config.index)?;
        let completer = create_completer(&config.completion)?;

        if index.provider() == "memory" {
            warn!("Using the in-memory index; every question will return no context until it is seeded");
        }

        let providers = Providers {
            index: index.provider().to_string(),
            embedding: config.embedding.provider.clone(),
            completion: completer.provider().to_string(),
        };
        let pipeline = RagPipeline::from_config(&config, embedder, index, completer);

        Ok(Self {
            config: Arc::new(config),
            pipeline: Arc::new(pipeline),
            providers,
        })
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    // Load configuration
    let config = AppConfig::load()?;

    // Initialize tracing
    init_tracing(&config.observability.log_level, config.observability.json_logging);

    info!("Starting BRAG Context Engine v{}", VERSION);

    // Initialize metrics
    install_metrics_exporter(config.observability.metrics_port)?;
    register_metrics();

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port).parse()?;
    let shutdown_timeout = config.shutdown_timeout();

    let state = AppState::from_config(config)?;
    info!(
        index = %state.providers.index,
        embedding = %state.providers.embedding,
        completion = %state.providers.completion,
        "Collaborators ready"
    );

    let app = create_router(state);

    info!("Listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(shutdown_timeout))
        .await?;

    info!("Server shutdown complete");
    Ok(())
}

fn init_tracing(log_level: &str, json: bool) {
    let filter = EnvFilter::try_new(log_level).unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true);

    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn install_metrics_exporter(port: u16) -> anyhow::Result<()> {
    if port == 0 {
        return Ok(());
    }

    PrometheusBuilder::new()
        .with_http_listener(SocketAddr::from(([0, 0, 0, 0], port)))
        .set_buckets(LATENCY_BUCKETS)?
        .set_buckets_for_metric(
            Matcher::Suffix("embedding_duration_seconds".to_string()),
            EMBEDDING_BUCKETS,
        )?
        .install()?;

    info!(port, "Prometheus exporter listening");
    Ok(())
}

/// Create the main application router
fn create_router(state: AppState) -> Router {
    // CORS configuration
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    // Request ID propagation
    let request_id = SetRequestIdLayer::x_request_id(MakeRequestUuid);
    let propagate_id = PropagateRequestIdLayer::x_request_id();

    // Bounds time to the first response byte; event streams may run longer
    let timeout = TimeoutLayer::new(state.config.request_timeout());

    let api_routes = Router::new()
        .route("/chat", post(handlers::chat::chat))
        .route("/chat/subject", post(handlers::chat::subject));

    Router::new()
        .route("/health", get(handlers::health::health))
        .route("/ready", get(handlers::health::ready))
        .nest("/v1", api_routes)
        .layer(timeout)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .layer(request_id)
        .layer(propagate_id)
        .with_state(state)
}

/// Graceful shutdown signal handler
async fn shutdown_signal(grace: std::time::Duration) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, starting shutdown..."),
        _ = terminate => info!("Received SIGTERM, starting shutdown..."),
    }

    // Open answer streams get a bounded window to finish
    tokio::spawn(async move {
        tokio::time::sleep(grace).await;
        warn!(grace_secs = grace.as_secs(), "Shutdown grace period elapsed, exiting");
        std::process::exit(0);
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{to_bytes, Body};
    use axum::http::{Request, StatusCode};
    use brag_common::completion::MockCompleter;
    use brag_common::embeddings::{Embedder, MockEmbedder};
    use brag_common::index::{InMemoryIndex, Metadata};
    use serde_json::json;
    use tower::ServiceExt;

    async fn seeded_state(reply: &str) -> AppState {
        let config = AppConfig::default();
        let embedder = MockEmbedder::new(8);
        let index = InMemoryIndex::new();

        let content = "The board kept the cash rate at 4.35%.";
        let metadata: Metadata = json!({
            "content": content,
            "document_title": "RBA Statement",
            "doc_id": "rba",
            "web_url": "https://archive.example/rba",
            "file_created_at": "2024-05-07T14:30:00+10:00",
            "file_created_at_unix": 1_715_056_200,
            "prechunk_id": "",
            "postchunk_id": "",
        })
        .as_object()
        .cloned()
        .unwrap();
        index
            .upsert("rba#0", embedder.embed(content).await.unwrap(), metadata)
            .await;

        let pipeline = RagPipeline::from_config(
            &config,
            Arc::new(embedder),
            Arc::new(index),
            Arc::new(MockCompleter::with_reply(reply)),
        );

        AppState {
            config: Arc::new(config),
            pipeline: Arc::new(pipeline),
            providers: Providers {
                index: "memory".to_string(),
                embedding: "mock".to_string(),
                completion: "mock".to_string(),
            },
        }
    }

    fn post_json(uri: &str, body: serde_json::Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn body_text(response: axum::response::Response) -> String {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn test_health_and_ready() {
        let app = create_router(seeded_state("ok").await);

        let response = app
            .clone()
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers().contains_key("x-request-id"));
        assert!(body_text(response).await.contains("healthy"));

        let response = app
            .oneshot(Request::get("/ready").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let body: serde_json::Value = serde_json::from_str(&body_text(response).await).unwrap();
        assert_eq!(body["providers"]["index"], "memory");
    }

    #[tokio::test]
    async fn test_chat_streams_answer_and_sources() {
        let app = create_router(seeded_state("Rates were held [1].").await);

        let response = app
            .oneshot(post_json("/v1/chat", json!({"question": "What did the RBA do?"})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()["content-type"], "text/event-stream");

        let text = body_text(response).await;
        let sources_at = text.find("event: sources").unwrap();
        let delta_at = text.find("event: delta").unwrap();
        let done_at = text.find("event: done").unwrap();
        assert!(sources_at < delta_at && delta_at < done_at);
        assert!(text.contains(r#""title":"RBA Statement""#));
        assert!(text.contains("data: Rates "));
        assert!(text.contains("### Sources:"));
    }

    #[tokio::test]
    async fn test_chat_without_matches_sends_notice() {
        let app = create_router(seeded_state("unused").await);

        let response = app
            .oneshot(post_json(
                "/v1/chat",
                json!({"question": "Anything?", "doc_id": "does-not-exist"}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let text = body_text(response).await;
        assert!(text.contains("event: notice"));
        assert!(text.contains("data: No context found for this question. Please try again"));
        assert!(text.contains("data: []"));
        assert!(!text.contains("event: delta"));
    }

    #[tokio::test]
    async fn test_chat_rejects_invalid_body() {
        let app = create_router(seeded_state("ok").await);

        let response = app
            .clone()
            .oneshot(post_json("/v1/chat", json!({"question": ""})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body: serde_json::Value = serde_json::from_str(&body_text(response).await).unwrap();
        assert_eq!(body["error"]["code"], "VALIDATION_ERROR");

        let response = app
            .oneshot(post_json(
                "/v1/chat",
                json!({"question": "q", "date_range": {"start": "2024-06-02", "end": "2024-06-01"}}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_subject_streams_deltas() {
        let app = create_router(seeded_state("RBA cash rate decision").await);

        let response = app
            .oneshot(post_json("/v1/chat/subject", json!({"question": "What did the RBA do?"})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let text = body_text(response).await;
        assert!(text.contains("event: delta"));
        assert!(text.contains("data: RBA "));
        assert!(text.contains("event: done"));
    }
}
