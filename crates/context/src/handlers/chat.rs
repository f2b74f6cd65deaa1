//! Chat handlers
//!
//! Answers are delivered as server-sent events:
//! - `sources`: JSON list of cited documents
//! - `delta`: a piece of answer text
//! - `notice`: nothing was found for the question
//! - `error`: the completion backend failed
//! - `done`: end of answer, with the rendered source appendix

use axum::{
    extract::State,
    response::sse::{Event, KeepAlive, Sse},
    Json,
};
use brag_common::{
    context::{render_sources_markdown, Answer, ChatRequest, ConversationTurn, QueryFilter, Source},
    errors::{AppError, Result},
    metrics::RequestMetrics,
};
use chrono::NaiveDate;
use futures::{Stream, StreamExt};
use serde::Deserialize;
use std::convert::Infallible;
use tracing::warn;
use validator::Validate;

use crate::AppState;

/// Chat request body
#[derive(Debug, Deserialize, Validate)]
pub struct ChatBody {
    #[validate(length(min = 1, max = 4000))]
    pub question: String,

    #[serde(default)]
    pub history: Vec<ConversationTurn>,

    /// Restrict retrieval to one document
    pub doc_id: Option<String>,

    /// Restrict retrieval to documents created on these calendar days
    pub date_range: Option<DateRange>,

    /// Additional raw filter fragments, applied before `date_range` and `doc_id`
    #[serde(default)]
    pub filters: Vec<Option<QueryFilter>>,

    #[serde(default = "default_factor")]
    #[validate(range(min = 0.1, max = 10.0))]
    pub comprehensiveness: f64,

    #[serde(default = "default_factor")]
    #[validate(range(min = 0.0, max = 10.0))]
    pub answer_detail: f64,
}

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct DateRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

/// Subject request body
#[derive(Debug, Deserialize, Validate)]
pub struct SubjectBody {
    #[validate(length(min = 1, max = 4000))]
    pub question: String,
}

fn default_factor() -> f64 { 1.0 }

impl ChatBody {
    /// Convert into pipeline input, building date and document fragments
    pub fn into_request(self, utc_offset_hours: i32) -> Result<ChatRequest> {
        let date_fragment = self
            .date_range
            .map(|range| QueryFilter::for_dates(range.start, range.end, utc_offset_hours))
            .transpose()?;
        let doc_fragment = self
            .doc_id
            .filter(|id| !id.is_empty())
            .map(QueryFilter::for_document);

        let mut request = ChatRequest::new(self.question)
            .with_history(self.history)
            .with_comprehensiveness(self.comprehensiveness)
            .with_answer_detail(self.answer_detail);
        for fragment in self.filters {
            request = request.with_filter(fragment);
        }
        Ok(request.with_filter(date_fragment).with_filter(doc_fragment))
    }
}

/// Answer a question as a stream of events
pub async fn chat(
    State(state): State<AppState>,
    Json(body): Json<ChatBody>,
) -> Result<Sse<impl Stream<Item = std::result::Result<Event, Infallible>>>> {
    let metrics = RequestMetrics::start("POST", "/v1/chat");

    let outcome = async {
        body.validate().map_err(|e| AppError::Validation {
            message: e.to_string(),
            field: None,
        })?;

        let request = body.into_request(state.config.retrieval.date_filter_utc_offset_hours)?;
        state.pipeline.run(request).await
    }
    .await;

    let response = match outcome {
        Ok(response) => {
            metrics.finish(200);
            response
        }
        Err(e) => {
            metrics.finish(e.status_code().as_u16());
            return Err(e);
        }
    };

    let sources_event = Event::default()
        .event("sources")
        .data(serde_json::to_string(&response.sources)?);
    let events = futures::stream::once(async move { sources_event })
        .chain(answer_events(response.answer, &response.sources))
        .map(Ok::<Event, Infallible>);

    Ok(Sse::new(events).keep_alive(KeepAlive::default()))
}

/// Stream a short subject line for a new conversation
pub async fn subject(
    State(state): State<AppState>,
    Json(body): Json<SubjectBody>,
) -> Result<Sse<impl Stream<Item = std::result::Result<Event, Infallible>>>> {
    body.validate().map_err(|e| AppError::Validation {
        message: e.to_string(),
        field: None,
    })?;

    let answer = state.pipeline.subject(&body.question).await;
    Ok(Sse::new(answer_events(answer, &[]).map(Ok::<Event, Infallible>)))
}

/// Events for an answer, always ending with `done`
fn answer_events(answer: Answer, sources: &[Source]) -> impl Stream<Item = Event> {
    let done = serde_json::json!({ "sources_markdown": render_sources_markdown(sources) }).to_string();

    async_stream::stream! {
        match answer {
            Answer::Stream(mut deltas) => {
                while let Some(delta) = deltas.next().await {
                    match delta {
                        Ok(text) => yield text_event("delta", &text),
                        Err(e) => {
                            warn!(error = %e, "Answer stream failed mid-way");
                            yield text_event("error", &e.to_string());
                            break;
                        }
                    }
                }
            }
            Answer::NoContext(message) => yield text_event("notice", &message),
            Answer::Failure(message) => yield text_event("error", &message),
        }
        yield Event::default().event("done").data(done);
    }
}

/// SSE cannot carry carriage returns; drop them
fn text_event(name: &'static str, text: &str) -> Event {
    Event::default().event(name).data(text.replace('\r', ""))
}
