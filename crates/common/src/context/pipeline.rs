//! The retrieval cycle: question in, answer stream and sources out.
//!
//! Each call to [`RagPipeline::run`] owns its own source registry; nothing
//! is shared between questions.

use super::filter::QueryFilter;
use super::invoker::{Answer, CompletionInvoker};
use super::prompt::{ConversationTurn, PromptAssembler};
use super::retriever::AdaptiveRetriever;
use super::sources::{Source, SourceRegistry};
use super::ContextStitcher;
use crate::completion::Completer;
use crate::config::AppConfig;
use crate::embeddings::Embedder;
use crate::errors::Result;
use crate::index::VectorIndex;
use crate::metrics;
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, info_span, Instrument};
use uuid::Uuid;

/// Explicit inputs of one question
#[derive(Debug, Clone)]
pub struct ChatRequest {
    pub question: String,
    /// Full conversation so far; only the most recent turns are used
    pub history: Vec<ConversationTurn>,
    /// Filter fragments merged in order, later ones winning
    pub filters: Vec<Option<QueryFilter>>,
    /// Document to focus on when no filter names one
    pub target_doc_id: Option<String>,
    pub comprehensiveness: f64,
    pub answer_detail: f64,
}

impl ChatRequest {
    pub fn new(question: impl Into<String>) -> Self {
        Self {
            question: question.into(),
            history: Vec::new(),
            filters: Vec::new(),
            target_doc_id: None,
            comprehensiveness: 1.0,
            answer_detail: 1.0,
        }
    }

    pub fn with_history(mut self, history: Vec<ConversationTurn>) -> Self {
        self.history = history;
        self
    }

    pub fn with_filter(mut self, fragment: Option<QueryFilter>) -> Self {
        self.filters.push(fragment);
        self
    }

    pub fn with_target_document(mut self, doc_id: impl Into<String>) -> Self {
        self.target_doc_id = Some(doc_id.into());
        self
    }

    pub fn with_comprehensiveness(mut self, comprehensiveness: f64) -> Self {
        self.comprehensiveness = comprehensiveness;
        self
    }

    pub fn with_answer_detail(mut self, answer_detail: f64) -> Self {
        self.answer_detail = answer_detail;
        self
    }
}

/// Answer plus the sources it may cite
#[derive(Debug)]
pub struct ChatResponse {
    pub answer: Answer,
    /// Empty when nothing was retrieved
    pub sources: Vec<Source>,
}

pub struct RagPipeline {
    retriever: AdaptiveRetriever,
    stitcher: ContextStitcher,
    assembler: PromptAssembler,
    invoker: CompletionInvoker,
}

impl RagPipeline {
    pub fn new(
        retriever: AdaptiveRetriever,
        stitcher: ContextStitcher,
        assembler: PromptAssembler,
        invoker: CompletionInvoker,
    ) -> Self {
        Self {
            retriever,
            stitcher,
            assembler,
            invoker,
        }
    }

    /// Wire the pipeline stages from configuration and collaborators
    pub fn from_config(
        config: &AppConfig,
        embedder: Arc<dyn Embedder>,
        index: Arc<dyn VectorIndex>,
        completer: Arc<dyn Completer>,
    ) -> Self {
        let retriever = AdaptiveRetriever::new(
            embedder,
            index.clone(),
            config.retrieval.clone(),
            config.embedding.timeout(),
            config.index.timeout(),
        );
        let stitcher = ContextStitcher::new(
            index,
            config.retrieval.neighbor_window_chars,
            config.index.timeout(),
        );

        Self::new(
            retriever,
            stitcher,
            PromptAssembler::new(config.prompt.clone()),
            CompletionInvoker::new(completer, &config.completion),
        )
    }

    /// Answer one question.
    ///
    /// Returns `Err` only for retrieval failures. An empty retrieval yields
    /// [`Answer::NoContext`] without calling the completion backend.
    pub async fn run(&self, request: ChatRequest) -> Result<ChatResponse> {
        let cycle_id = Uuid::new_v4();
        self.run_cycle(request)
            .instrument(info_span!("rag_cycle", cycle_id = %cycle_id))
            .await
    }

    async fn run_cycle(&self, request: ChatRequest) -> Result<ChatResponse> {
        let start = Instant::now();
        let ChatRequest {
            question,
            history,
            filters,
            target_doc_id,
            comprehensiveness,
            answer_detail,
        } = request;

        let filter = QueryFilter::combine(filters);
        let retrieval = self
            .retriever
            .retrieve(&question, &filter, comprehensiveness, target_doc_id.as_deref())
            .await?;

        if retrieval.is_empty() {
            metrics::record_answer("no_context");
            info!(latency_ms = start.elapsed().as_millis() as u64, "No context found");
            return Ok(ChatResponse {
                answer: Answer::no_context(),
                sources: Vec::new(),
            });
        }

        let mut registry = SourceRegistry::new();
        let blocks = self.stitcher.stitch(&retrieval.chunks, &mut registry).await?;
        let sources = registry.into_sources();

        let answer = match self
            .assembler
            .assemble(&question, &blocks, &history, &sources, answer_detail)
        {
            Some(prompt) => self.invoker.invoke(prompt).await,
            None => {
                metrics::record_answer("no_context");
                Answer::no_context()
            }
        };

        info!(
            blocks = blocks.len(),
            sources = sources.len(),
            outcome = answer.outcome(),
            latency_ms = start.elapsed().as_millis() as u64,
            "Retrieval cycle complete"
        );

        Ok(ChatResponse { answer, sources })
    }

    /// Stream a short subject line for a new conversation
    pub async fn subject(&self, question: &str) -> Answer {
        self.invoker.subject(question).await
    }
}
