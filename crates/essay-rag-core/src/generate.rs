//! Answer generator trait and prompt types.
//!
//! A [`Prompt`] is an ordered list of role-tagged messages in the shape
//! chat-completion APIs expect. Generators return either the whole reply
//! ([`AnswerGenerator::generate`]) or a [`TokenStream`] of text chunks
//! ([`AnswerGenerator::stream`]).

use anyhow::Result;
use async_trait::async_trait;
use futures_util::stream::{self, BoxStream, StreamExt};
use serde::{Deserialize, Serialize};

/// A lazy, finite, non-restartable sequence of text chunks.
pub type TokenStream = BoxStream<'static, Result<String>>;

/// Speaker of a prompt message, as understood by chat-completion APIs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PromptRole {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromptMessage {
    pub role: PromptRole,
    pub content: String,
}

impl PromptMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: PromptRole::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: PromptRole::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: PromptRole::Assistant,
            content: content.into(),
        }
    }
}

/// Structured prompt: system instruction, history, and the final question.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Prompt {
    pub messages: Vec<PromptMessage>,
}

impl Prompt {
    /// Content of the leading system message, if any.
    pub fn system_text(&self) -> Option<&str> {
        self.messages
            .first()
            .filter(|m| m.role == PromptRole::System)
            .map(|m| m.content.as_str())
    }

    /// Content of the trailing user message, if any.
    pub fn last_user_text(&self) -> Option<&str> {
        self.messages
            .last()
            .filter(|m| m.role == PromptRole::User)
            .map(|m| m.content.as_str())
    }
}

/// Trait for language-model backends.
#[async_trait]
pub trait AnswerGenerator: Send + Sync {
    /// Returns the model identifier (e.g. `"gpt-4o-mini"`).
    fn model_name(&self) -> &str;

    /// Produce the complete reply to `prompt`.
    async fn generate(&self, prompt: &Prompt) -> Result<String>;

    /// Produce the reply as a stream of text chunks.
    ///
    /// The default implementation yields the result of
    /// [`generate`](AnswerGenerator::generate) as a single chunk.
    async fn stream(&self, prompt: &Prompt) -> Result<TokenStream> {
        let text = self.generate(prompt).await?;
        Ok(stream::once(async move { Ok(text) }).boxed())
    }
}

/// Drain a token stream into the full reply.
///
/// Stops at the first error; chunks received before it are discarded.
pub async fn collect_tokens(mut tokens: TokenStream) -> Result<String> {
    let mut out = String::new();
    while let Some(chunk) = tokens.next().await {
        out.push_str(&chunk?);
    }
    Ok(out)
}
