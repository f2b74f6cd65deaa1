//! BRAG Common Library
//!
//! Shared code for the BRAG services including:
//! - The context engine (retrieval, stitching, citation, prompt assembly)
//! - Embedding, vector index, and completion client abstractions
//! - Error types and handling
//! - Configuration management
//! - Metrics and observability

pub mod completion;
pub mod config;
pub mod context;
pub mod embeddings;
pub mod errors;
pub mod index;
pub mod metrics;

// Re-export commonly used types
pub use completion::{Completer, DeltaStream};
pub use config::AppConfig;
pub use context::{Answer, ChatRequest, ChatResponse, RagPipeline};
pub use embeddings::Embedder;
pub use errors::{AppError, Result};
pub use index::VectorIndex;

/// Application version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default embedding model
pub const DEFAULT_EMBEDDING_MODEL: &str = "text-embedding-3-large";

/// Default embedding dimension
pub const DEFAULT_EMBEDDING_DIMENSION: usize = 3072;

/// Default text-generation model
pub const DEFAULT_COMPLETION_MODEL: &str = "gpt-4o-mini";
