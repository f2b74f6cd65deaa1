//! Prompt Assembler - builds the system and user messages
//!
//! Everything taken from documents or users passes through the sanitizer
//! before it reaches the prompt.

use super::sanitizer::sanitize;
use super::sources::Source;
use crate::config::PromptConfig;
use serde::{Deserialize, Serialize};
use std::fmt;

const GUIDANCE: &str = "You are an analyst assistant answering questions from a firm's document archive. When answering, ensure that you:\n\
1. Include as many relevant perspectives and views from the context as possible, without directional bias.\n\
2. Are exact. Quote numbers correctly and confirm whether events or data are present in the context. Do not leave out relevant events or misquote forecasts.\n\
3. Stay strictly relevant. Leave out courtesies and anything not tied to the question and context.\n\
4. Clearly state that you cannot find the information when it is not present in the context.\n\
5. Consider second-order effects and interrelated events discussed in the context.\n\
6. Cite information taken from the context using the numbered sources provided.\n\
Your goal is accurate, well-evidenced, relevant and unbiased analysis based solely on the given context and conversation history.\n";

const INSTRUCTION: &str = "Analyze the following context and conversation history to answer the current question. \
Ensure your response follows the guidelines in the system message.";

/// Speaker of a conversation turn
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::User => write!(f, "user"),
            Role::Assistant => write!(f, "assistant"),
        }
    }
}

/// One message of the running conversation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub role: Role,
    pub content: String,
}

impl ConversationTurn {
    pub fn user(content: impl Into<String>) -> Self {
        Self { role: Role::User, content: content.into() }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self { role: Role::Assistant, content: content.into() }
    }
}

/// The most recent `turns` messages as `role: content` lines
pub fn format_history(history: &[ConversationTurn], turns: usize) -> String {
    let skip = history.len().saturating_sub(turns);
    history[skip..]
        .iter()
        .map(|turn| format!("{}: {}", turn.role, turn.content))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Answer length requested from the model
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verbosity {
    Brief,
    Detailed,
    Comprehensive,
}

impl Verbosity {
    pub fn from_detail(answer_detail: f64, config: &PromptConfig) -> Self {
        if answer_detail < config.brief_threshold {
            Verbosity::Brief
        } else if answer_detail < config.detailed_threshold {
            Verbosity::Detailed
        } else {
            Verbosity::Comprehensive
        }
    }

    pub fn directive(self) -> &'static str {
        match self {
            Verbosity::Brief => "Provide brief and concise answers.",
            Verbosity::Detailed => "Provide detailed answers, but keep them concise.",
            Verbosity::Comprehensive => "Provide detailed and comprehensive answers.",
        }
    }
}

/// A system + user message pair ready for the completion backend
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Prompt {
    pub system: String,
    pub user: String,
}

pub struct PromptAssembler {
    config: PromptConfig,
}

impl PromptAssembler {
    pub fn new(config: PromptConfig) -> Self {
        Self { config }
    }

    pub fn system_message(&self, answer_detail: f64) -> String {
        format!(
            "{}\n{}",
            GUIDANCE,
            Verbosity::from_detail(answer_detail, &self.config).directive()
        )
    }

    /// Sections in fixed order: sources, context, history, question.
    pub fn user_message(
        &self,
        question: &str,
        blocks: &[String],
        history: &[ConversationTurn],
        sources: &[Source],
    ) -> String {
        let sources = sources
            .iter()
            .map(|source| sanitize(&source.label()))
            .collect::<Vec<_>>()
            .join("\n");
        let context = blocks
            .iter()
            .map(|block| sanitize(block))
            .collect::<Vec<_>>()
            .join(" ");
        let conversation = sanitize(&format_history(history, self.config.history_turns));

        format!(
            "{}\n\nSources:\n{}\n\nContext information:\n{}\n\nConversation history:\n{}\n\nCurrent question: {}\n\nAnswer:",
            INSTRUCTION,
            sources,
            context,
            conversation,
            sanitize(question)
        )
    }

    /// Build the prompt, or `None` when there is no context to ground it.
    pub fn assemble(
        &self,
        question: &str,
        blocks: &[String],
        history: &[ConversationTurn],
        sources: &[Source],
        answer_detail: f64,
    ) -> Option<Prompt> {
        if blocks.is_empty() {
            return None;
        }

        Some(Prompt {
            system: self.system_message(answer_detail),
            user: self.user_message(question, blocks, history, sources),
        })
    }
}
