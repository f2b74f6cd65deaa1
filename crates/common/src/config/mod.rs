//! Configuration management for BRAG services
//!
//! Supports loading configuration from:
//! - Environment variables (prefixed with APP__)
//! - Configuration files (config.toml, config.yaml)
//! - Default values

use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Main application configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct AppConfig {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Vector index configuration
    #[serde(default)]
    pub index: IndexConfig,

    /// Embedding service configuration
    #[serde(default)]
    pub embedding: EmbeddingConfig,

    /// Text-generation backend configuration
    #[serde(default)]
    pub completion: CompletionConfig,

    /// Adaptive retrieval tuning
    #[serde(default)]
    pub retrieval: RetrievalConfig,

    /// Prompt assembly tuning
    #[serde(default)]
    pub prompt: PromptConfig,

    /// Observability configuration
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    /// Host to bind to
    #[serde(default = "default_host")]
    pub host: String,

    /// Port to listen on
    #[serde(default = "default_port")]
    pub port: u16,

    /// Request timeout in seconds (time to first byte)
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    /// Shutdown timeout in seconds
    #[serde(default = "default_shutdown_timeout")]
    pub shutdown_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct IndexConfig {
    /// Index provider: pinecone, memory
    #[serde(default = "default_index_provider")]
    pub provider: String,

    /// Index host URL (e.g. https://my-index-abc123.svc.pinecone.io)
    pub host: Option<String>,

    /// API key for the index service
    pub api_key: Option<String>,

    /// Namespace to query (empty for the default namespace)
    #[serde(default)]
    pub namespace: String,

    /// Per-call timeout in seconds
    #[serde(default = "default_index_timeout")]
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EmbeddingConfig {
    /// Embedding provider: openai, mock
    #[serde(default = "default_embedding_provider")]
    pub provider: String,

    /// API key for embedding service
    pub api_key: Option<String>,

    /// API base URL (for custom endpoints)
    pub api_base: Option<String>,

    /// Model to use
    #[serde(default = "default_embedding_model")]
    pub model: String,

    /// Embedding dimension
    #[serde(default = "default_embedding_dimension")]
    pub dimension: usize,

    /// Request timeout in seconds
    #[serde(default = "default_embedding_timeout")]
    pub timeout_secs: u64,

    /// Maximum retries
    #[serde(default = "default_embedding_retries")]
    pub max_retries: u32,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CompletionConfig {
    /// Completion provider: openai, mock
    #[serde(default = "default_completion_provider")]
    pub provider: String,

    /// API key for the completion backend
    pub api_key: Option<String>,

    /// API base URL (for custom endpoints)
    pub api_base: Option<String>,

    /// Model used for answers
    #[serde(default = "default_completion_model")]
    pub model: String,

    /// Model used for chat subject lines
    #[serde(default = "default_completion_model")]
    pub subject_model: String,

    /// Sampling temperature
    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Timeout in seconds until the stream is opened
    #[serde(default = "default_completion_timeout")]
    pub timeout_secs: u64,

    /// Longest wait in seconds for the next delta of an open stream
    #[serde(default = "default_stream_idle_timeout")]
    pub stream_idle_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RetrievalConfig {
    /// Base result count for queries across the whole archive
    #[serde(default = "default_general_base_k")]
    pub general_base_k: usize,

    /// Base result count when a single document is targeted
    #[serde(default = "default_focused_base_k")]
    pub focused_base_k: usize,

    /// Lower bound for the computed top_k
    #[serde(default = "default_min_top_k")]
    pub min_top_k: usize,

    /// Upper bound for the computed top_k
    #[serde(default = "default_max_top_k")]
    pub max_top_k: usize,

    /// Result count of the supplementary single-document query
    #[serde(default = "default_supplementary_top_k")]
    pub supplementary_top_k: usize,

    /// Share of top_k one document must exceed to trigger supplementation
    #[serde(default = "default_dominance_ratio")]
    pub dominance_ratio: f64,

    /// Characters taken from each neighboring chunk
    #[serde(default = "default_neighbor_window")]
    pub neighbor_window_chars: usize,

    /// UTC offset (hours) used to turn calendar dates into timestamp ranges
    #[serde(default = "default_date_filter_offset")]
    pub date_filter_utc_offset_hours: i32,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PromptConfig {
    /// Conversation turns carried into the prompt
    #[serde(default = "default_history_turns")]
    pub history_turns: usize,

    /// Answer-detail values below this ask for brief answers
    #[serde(default = "default_brief_threshold")]
    pub brief_threshold: f64,

    /// Answer-detail values at or above this ask for comprehensive answers
    #[serde(default = "default_detailed_threshold")]
    pub detailed_threshold: f64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ObservabilityConfig {
    /// Log level (debug, info, warn, error) or a full EnvFilter directive
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Enable JSON logging
    #[serde(default = "default_json_logging")]
    pub json_logging: bool,

    /// Metrics port (0 to disable)
    #[serde(default = "default_metrics_port")]
    pub metrics_port: u16,

    /// Service name for tracing
    #[serde(default = "default_service_name")]
    pub service_name: String,
}

// Default value functions
fn default_host() -> String { "0.0.0.0".to_string() }
fn default_port() -> u16 { 8080 }
fn default_request_timeout() -> u64 { 120 }
fn default_shutdown_timeout() -> u64 { 30 }
fn default_index_provider() -> String { "memory".to_string() }
fn default_index_timeout() -> u64 { 15 }
fn default_embedding_provider() -> String { "mock".to_string() }
fn default_embedding_model() -> String { crate::DEFAULT_EMBEDDING_MODEL.to_string() }
fn default_embedding_dimension() -> usize { crate::DEFAULT_EMBEDDING_DIMENSION }
fn default_embedding_timeout() -> u64 { 30 }
fn default_embedding_retries() -> u32 { 3 }
fn default_completion_provider() -> String { "mock".to_string() }
fn default_completion_model() -> String { crate::DEFAULT_COMPLETION_MODEL.to_string() }
fn default_temperature() -> f32 { 0.5 }
fn default_completion_timeout() -> u64 { 60 }
fn default_stream_idle_timeout() -> u64 { 30 }
fn default_general_base_k() -> usize { 8 }
fn default_focused_base_k() -> usize { 15 }
fn default_min_top_k() -> usize { 5 }
fn default_max_top_k() -> usize { 30 }
fn default_supplementary_top_k() -> usize { 5 }
fn default_dominance_ratio() -> f64 { 0.6 }
fn default_neighbor_window() -> usize { 400 }
fn default_date_filter_offset() -> i32 { 10 }
fn default_history_turns() -> usize { 5 }
fn default_brief_threshold() -> f64 { 0.5 }
fn default_detailed_threshold() -> f64 { 1.0 }
fn default_log_level() -> String { "info".to_string() }
fn default_json_logging() -> bool { true }
fn default_metrics_port() -> u16 { 9090 }
fn default_service_name() -> String { "brag-context".to_string() }

impl AppConfig {
    /// Load configuration from environment and files
    pub fn load() -> Result<Self, ConfigError> {
        let env = std::env::var("APP_ENV").unwrap_or_else(|_| "development".to_string());

        let config = Config::builder()
            // Load base config file
            .add_source(File::with_name("config/default").required(false))

            // Load environment-specific config
            .add_source(File::with_name(&format!("config/{}", env)).required(false))

            // Load local overrides
            .add_source(File::with_name("config/local").required(false))

            // Load from environment variables with APP__ prefix
            // e.g., APP__COMPLETION__MODEL=gpt-4o
            .add_source(
                Environment::with_prefix("APP")
                    .separator("__")
                    .try_parsing(true)
            )

            .build()?;

        config.try_deserialize()
    }

    /// Load from a specific TOML file
    pub fn from_file(path: &str) -> Result<Self, ConfigError> {
        let config = Config::builder()
            .add_source(File::with_name(path))
            .add_source(
                Environment::with_prefix("APP")
                    .separator("__")
                    .try_parsing(true)
            )
            .build()?;

        config.try_deserialize()
    }

    /// Get request timeout as Duration
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.server.request_timeout_secs)
    }

    /// Get shutdown timeout as Duration
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.server.shutdown_timeout_secs)
    }
}

impl IndexConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl EmbeddingConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl CompletionConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn stream_idle_timeout(&self) -> Duration {
        Duration::from_secs(self.stream_idle_timeout_secs)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            request_timeout_secs: default_request_timeout(),
            shutdown_timeout_secs: default_shutdown_timeout(),
        }
    }
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            provider: default_index_provider(),
            host: None,
            api_key: None,
            namespace: String::new(),
            timeout_secs: default_index_timeout(),
        }
    }
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_embedding_provider(),
            api_key: None,
            api_base: None,
            model: default_embedding_model(),
            dimension: default_embedding_dimension(),
            timeout_secs: default_embedding_timeout(),
            max_retries: default_embedding_retries(),
        }
    }
}

impl Default for CompletionConfig {
    fn default() -> Self {
        Self {
            provider: default_completion_provider(),
            api_key: None,
            api_base: None,
            model: default_completion_model(),
            subject_model: default_completion_model(),
            temperature: default_temperature(),
            timeout_secs: default_completion_timeout(),
            stream_idle_timeout_secs: default_stream_idle_timeout(),
        }
    }
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            general_base_k: default_general_base_k(),
            focused_base_k: default_focused_base_k(),
            min_top_k: default_min_top_k(),
            max_top_k: default_max_top_k(),
            supplementary_top_k: default_supplementary_top_k(),
            dominance_ratio: default_dominance_ratio(),
            neighbor_window_chars: default_neighbor_window(),
            date_filter_utc_offset_hours: default_date_filter_offset(),
        }
    }
}

impl Default for PromptConfig {
    fn default() -> Self {
        Self {
            history_turns: default_history_turns(),
            brief_threshold: default_brief_threshold(),
            detailed_threshold: default_detailed_threshold(),
        }
    }
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            json_logging: default_json_logging(),
            metrics_port: default_metrics_port(),
            service_name: default_service_name(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.embedding.model, "text-embedding-3-large");
        assert_eq!(config.completion.model, "gpt-4o-mini");
        assert_eq!(config.completion.temperature, 0.5);
        assert_eq!(config.completion.stream_idle_timeout(), Duration::from_secs(30));
    }

    #[test]
    fn test_retrieval_defaults() {
        let retrieval = RetrievalConfig::default();
        assert_eq!(retrieval.general_base_k, 8);
        assert_eq!(retrieval.focused_base_k, 15);
        assert_eq!((retrieval.min_top_k, retrieval.max_top_k), (5, 30));
        assert_eq!(retrieval.supplementary_top_k, 5);
        assert_eq!(retrieval.neighbor_window_chars, 400);
    }

    #[test]
    fn test_partial_sections_fill_defaults() {
        let config: AppConfig = Config::builder()
            .set_override("completion.model", "gpt-4o")
            .and_then(|b| b.set_override("retrieval.max_top_k", 20))
            .and_then(|b| b.build())
            .and_then(|c| c.try_deserialize())
            .unwrap();

        assert_eq!(config.completion.model, "gpt-4o");
        assert_eq!(config.completion.provider, "mock");
        assert_eq!(config.retrieval.max_top_k, 20);
        assert_eq!(config.retrieval.min_top_k, 5);
        assert_eq!(config.prompt.history_turns, 5);
    }
}
