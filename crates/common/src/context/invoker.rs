//! Completion Invoker - opens the answer stream
//!
//! Backend failures never surface as errors from this module. They become
//! an [`Answer::Failure`] carrying a short message the caller can show
//! inline. Once open, a stream that goes quiet for longer than the idle
//! timeout ends with an [`AppError::Timeout`] item.

use super::prompt::Prompt;
use super::sanitizer::sanitize;
use super::with_timeout;
use crate::completion::{Completer, CompletionRequest, DeltaStream};
use crate::config::CompletionConfig;
use crate::errors::AppError;
use crate::metrics;
use futures::stream::{self, StreamExt};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Informational answer for a question with no matching context
pub const NO_CONTEXT_MESSAGE: &str = "No context found for this question. Please try again";

const SUBJECT_INSTRUCTION: &str = "Please generate a concise subject for the following question \
capturing core information. Only output the subject and nothing else.";

/// What the caller receives in place of a finished answer
pub enum Answer {
    /// Incremental text from the backend
    Stream(DeltaStream),
    /// Nothing was retrieved; the backend was not called
    NoContext(String),
    /// The backend could not be reached or rejected the request
    Failure(String),
}

impl Answer {
    pub fn no_context() -> Self {
        Answer::NoContext(NO_CONTEXT_MESSAGE.to_string())
    }

    pub fn is_stream(&self) -> bool {
        matches!(self, Answer::Stream(_))
    }

    /// Metric label for this outcome
    pub fn outcome(&self) -> &'static str {
        match self {
            Answer::Stream(_) => "stream",
            Answer::NoContext(_) => "no_context",
            Answer::Failure(_) => "failure",
        }
    }

    /// Drain the answer into one string.
    ///
    /// A stream that fails part way yields the text received before the
    /// failure.
    pub async fn into_text(self) -> String {
        match self {
            Answer::Stream(mut stream) => {
                let mut text = String::new();
                while let Some(delta) = stream.next().await {
                    match delta {
                        Ok(delta) => text.push_str(&delta),
                        Err(e) => {
                            warn!(error = %e, received = text.len(), "Answer stream interrupted");
                            break;
                        }
                    }
                }
                text
            }
            Answer::NoContext(message) | Answer::Failure(message) => message,
        }
    }
}

impl fmt::Debug for Answer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Answer::Stream(_) => f.write_str("Answer::Stream(..)"),
            Answer::NoContext(message) => f.debug_tuple("Answer::NoContext").field(message).finish(),
            Answer::Failure(message) => f.debug_tuple("Answer::Failure").field(message).finish(),
        }
    }
}

/// Sends prompts to the completion backend with fixed model settings
pub struct CompletionInvoker {
    completer: Arc<dyn Completer>,
    model: String,
    subject_model: String,
    temperature: f32,
    timeout: Duration,
    idle_timeout: Duration,
}

impl CompletionInvoker {
    pub fn new(completer: Arc<dyn Completer>, config: &CompletionConfig) -> Self {
        Self {
            completer,
            model: config.model.clone(),
            subject_model: config.subject_model.clone(),
            temperature: config.temperature,
            timeout: config.timeout(),
            idle_timeout: config.stream_idle_timeout(),
        }
    }

    /// Open a streaming answer for an assembled prompt
    pub async fn invoke(&self, prompt: Prompt) -> Answer {
        let request = CompletionRequest {
            model: self.model.clone(),
            system: prompt.system,
            user: prompt.user,
            temperature: Some(self.temperature),
        };
        self.open(request).await
    }

    /// Open a streaming subject line for a new conversation
    pub async fn subject(&self, question: &str) -> Answer {
        let request = CompletionRequest {
            model: self.subject_model.clone(),
            system: SUBJECT_INSTRUCTION.to_string(),
            user: format!("Question: {}", sanitize(question)),
            temperature: None,
        };
        self.open(request).await
    }

    async fn open(&self, request: CompletionRequest) -> Answer {
        let model = request.model.clone();
        let answer = match with_timeout("completion", self.timeout, self.completer.complete(request)).await {
            Ok(stream) => {
                info!(model = %model, provider = self.completer.provider(), "Completion stream opened");
                Answer::Stream(bound_idle(stream, self.idle_timeout))
            }
            Err(e) => {
                warn!(model = %model, error = %e, "Completion failed");
                Answer::Failure(format!(
                    "An error occurred while querying the completion backend: {}",
                    e
                ))
            }
        };
        metrics::record_answer(answer.outcome());
        answer
    }
}

/// End the stream with a timeout error when no delta arrives within `idle`
fn bound_idle(deltas: DeltaStream, idle: Duration) -> DeltaStream {
    stream::unfold(Some(deltas), move |state| async move {
        let mut deltas = state?;
        match tokio::time::timeout(idle, deltas.next()).await {
            Ok(Some(delta)) => Some((delta, Some(deltas))),
            Ok(None) => None,
            Err(_) => {
                warn!(idle_ms = idle.as_millis() as u64, "Completion stream stalled");
                let timeout = AppError::Timeout {
                    operation: "completion stream".to_string(),
                    timeout_ms: idle.as_millis() as u64,
                };
                Some((Err(timeout), None))
            }
        }
    })
    .boxed()
}

#[cfg(test)]
pub(crate) mod testing {
    //! Completer doubles that record requests.

    use super::*;
    use crate::errors::Result;
    use async_trait::async_trait;
    use std::sync::Mutex;

    pub enum Behavior {
        Reply(Vec<&'static str>),
        Fail,
        BreakAfter(Vec<&'static str>),
        Hang,
        /// Sends the deltas, then never yields again
        Stall(Vec<&'static str>),
    }

    pub struct RecordingCompleter {
        behavior: Behavior,
        pub requests: Mutex<Vec<CompletionRequest>>,
    }

    impl RecordingCompleter {
        pub fn new(behavior: Behavior) -> Self {
            Self {
                behavior,
                requests: Mutex::new(Vec::new()),
            }
        }

        pub fn calls(&self) -> usize {
            self.requests.lock().unwrap().len()
        }

        pub fn last_request(&self) -> Option<CompletionRequest> {
            self.requests.lock().unwrap().last().cloned()
        }
    }

    #[async_trait]
    impl Completer for RecordingCompleter {
        async fn complete(&self, request: CompletionRequest) -> Result<DeltaStream> {
            self.requests.lock().unwrap().push(request);
            match &self.behavior {
                Behavior::Reply(deltas) => {
                    let items: Vec<Result<String>> = deltas.iter().map(|d| Ok(d.to_string())).collect();
                    Ok(stream::iter(items).boxed())
                }
                Behavior::Fail => Err(AppError::CompletionError {
                    message: "API error 401 Unauthorized".to_string(),
                }),
                Behavior::BreakAfter(deltas) => {
                    let mut items: Vec<Result<String>> = deltas.iter().map(|d| Ok(d.to_string())).collect();
                    items.push(Err(AppError::CompletionError {
                        message: "Stream interrupted".to_string(),
                    }));
                    Ok(stream::iter(items).boxed())
                }
                Behavior::Hang => {
                    tokio::time::sleep(Duration::from_secs(30)).await;
                    Ok(stream::empty().boxed())
                }
                Behavior::Stall(deltas) => {
                    let items: Vec<Result<String>> = deltas.iter().map(|d| Ok(d.to_string())).collect();
                    Ok(stream::iter(items).chain(stream::pending()).boxed())
                }
            }
        }

        fn provider(&self) -> &str {
            "recording"
        }
    }
}
