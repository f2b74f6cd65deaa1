//! Context Engine Core Components
//!
//! The Context Engine turns a question into a grounded prompt:
//! - Filter combination
//! - Adaptive retrieval
//! - Context stitching with neighboring chunks
//! - Source numbering
//! - Sanitized prompt assembly
//! - Streaming completion

pub mod chunk;
mod context_stitcher;
pub mod filter;
mod invoker;
mod pipeline;
pub mod prompt;
mod retriever;
pub mod sanitizer;
pub mod sources;

pub use chunk::{Chunk, ChunkOrigin, RetrievedChunk};
pub use context_stitcher::ContextStitcher;
pub use filter::QueryFilter;
pub use invoker::{Answer, CompletionInvoker, NO_CONTEXT_MESSAGE};
pub use pipeline::{ChatRequest, ChatResponse, RagPipeline};
pub use prompt::{ConversationTurn, Prompt, PromptAssembler, Role, Verbosity};
pub use retriever::{compute_top_k, AdaptiveRetriever, Retrieval};
pub use sanitizer::sanitize;
pub use sources::{render_sources_markdown, Source, SourceRegistry};

use crate::errors::{AppError, Result};
use std::future::Future;
use std::time::Duration;

/// Bound a collaborator call; elapsing maps to [`AppError::Timeout`].
pub(crate) async fn with_timeout<T, F>(operation: &str, limit: Duration, call: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    tokio::time::timeout(limit, call)
        .await
        .map_err(|_| AppError::Timeout {
            operation: operation.to_string(),
            timeout_ms: limit.as_millis() as u64,
        })?
}
