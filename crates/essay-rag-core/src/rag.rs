//! The answer pipeline.
//!
//! One request runs strictly in sequence:
//!
//! 1. validate the question and history
//! 2. rewrite the question into a standalone query
//! 3. retrieve the top-`k` passages
//! 4. assemble them into the system instruction
//! 5. generate the answer
//! 6. attach deduplicated sources
//!
//! Retrieval failures stop the request before any generation happens: an
//! answer is never produced without its grounding step having succeeded.
//! Nothing is retried here.

use std::sync::Arc;

use futures_util::stream::{self, StreamExt};
use tracing::debug;

use crate::context::assemble;
use crate::embedding::EmbeddingProvider;
use crate::error::RagError;
use crate::generate::{collect_tokens, AnswerGenerator, Prompt, TokenStream};
use crate::index::VectorIndex;
use crate::models::{Answer, ChatMessage, Role, ScoredDocument, Source};
use crate::prompt::answer_prompt;
use crate::retrieve::{Retriever, DEFAULT_K};
use crate::rewrite::{QueryRewriter, RewritePolicy};
use crate::sources::sources_for;

/// Reported when the model's reply contains no visible text.
const EMPTY_ANSWER: &str = "model returned an empty answer";

/// Everything the generator needs, plus what the response will cite.
#[derive(Debug, Clone)]
pub struct GroundedPrompt {
    /// Standalone query used for retrieval.
    pub query: String,
    pub documents: Vec<ScoredDocument>,
    pub prompt: Prompt,
    pub sources: Vec<Source>,
}

/// A streamed answer: citations up front, text as it arrives.
pub struct AnswerStream {
    pub query: String,
    pub sources: Vec<Source>,
    pub tokens: TokenStream,
}

impl AnswerStream {
    /// Buffer the whole stream into an [`Answer`].
    pub async fn collect(self) -> Result<Answer, RagError> {
        let content = collect_tokens(self.tokens)
            .await
            .map_err(|e| RagError::generation(e.context("answer stream failed")))?;
        Ok(Answer {
            content,
            sources: self.sources,
        })
    }
}

/// Composes rewriter, retriever, and generator into one request cycle.
///
/// Holds only shared, read-only provider handles; one instance serves any
/// number of concurrent requests.
pub struct RagPipeline {
    rewriter: QueryRewriter,
    retriever: Retriever,
    generator: Arc<dyn AnswerGenerator>,
    k: usize,
}

impl RagPipeline {
    pub fn new(
        embedder: Arc<dyn EmbeddingProvider>,
        index: Arc<dyn VectorIndex>,
        generator: Arc<dyn AnswerGenerator>,
    ) -> Self {
        Self {
            rewriter: QueryRewriter::new(generator.clone(), RewritePolicy::default()),
            retriever: Retriever::new(embedder, index),
            generator,
            k: DEFAULT_K,
        }
    }

    /// Number of passages fetched per question.
    pub fn with_k(mut self, k: usize) -> Self {
        self.k = k;
        self
    }

    pub fn with_rewrite_policy(mut self, policy: RewritePolicy) -> Self {
        self.rewriter = QueryRewriter::new(self.generator.clone(), policy);
        self
    }

    pub fn k(&self) -> usize {
        self.k
    }

    pub fn retriever(&self) -> &Retriever {
        &self.retriever
    }

    /// Answer `utterance` given the conversation so far.
    pub async fn answer(&self, history: &[ChatMessage], utterance: &str) -> Result<Answer, RagError> {
        let grounded = self.ground(history, utterance).await?;
        let content = self
            .generator
            .generate(&grounded.prompt)
            .await
            .map_err(|e| RagError::generation(e.context("answer generation failed")))?;
        if content.trim().is_empty() {
            return Err(RagError::GenerationUnavailable(EMPTY_ANSWER.to_string()));
        }
        debug!(
            chars = content.len(),
            sources = grounded.sources.len(),
            "generated answer"
        );
        Ok(Answer {
            content,
            sources: grounded.sources,
        })
    }

    /// Like [`answer`](Self::answer), but hands back the generator's token
    /// stream instead of waiting for the full reply. A reply with no
    /// visible text ends the stream with an error, as `answer` would fail.
    pub async fn answer_stream(
        &self,
        history: &[ChatMessage],
        utterance: &str,
    ) -> Result<AnswerStream, RagError> {
        let grounded = self.ground(history, utterance).await?;
        let tokens = self
            .generator
            .stream(&grounded.prompt)
            .await
            .map_err(|e| RagError::generation(e.context("answer stream failed to start")))?;
        Ok(AnswerStream {
            query: grounded.query,
            sources: grounded.sources,
            tokens: reject_blank(tokens),
        })
    }

    /// Run every step up to (not including) generation.
    pub async fn ground(
        &self,
        history: &[ChatMessage],
        utterance: &str,
    ) -> Result<GroundedPrompt, RagError> {
        validate_request(history, utterance)?;
        let utterance = utterance.trim();

        let query = self.rewriter.rewrite(history, utterance).await?;
        let retrieved = self.retriever.retrieve(&query, self.k).await?;

        let context = assemble(retrieved.documents());
        let prompt = answer_prompt(history, utterance, &context);
        let sources = sources_for(retrieved.documents());

        Ok(GroundedPrompt {
            query: retrieved.query,
            documents: retrieved.documents,
            prompt,
            sources,
        })
    }
}

/// Pass chunks through, but end with an error instead of finishing when
/// nothing but whitespace arrived. Nothing is yielded after an error.
fn reject_blank(tokens: TokenStream) -> TokenStream {
    stream::unfold(
        (Some(tokens), false),
        |(tokens, seen_text)| async move {
            let mut tokens = tokens?;
            match tokens.next().await {
                Some(Ok(text)) => {
                    let seen_text = seen_text || !text.trim().is_empty();
                    Some((Ok(text), (Some(tokens), seen_text)))
                }
                Some(Err(e)) => Some((Err(e), (None, seen_text))),
                None if seen_text => None,
                None => Some((Err(anyhow::anyhow!(EMPTY_ANSWER)), (None, seen_text))),
            }
        },
    )
    .boxed()
}

/// Reject blank questions and histories that break the message invariants.
pub fn validate_request(history: &[ChatMessage], utterance: &str) -> Result<(), RagError> {
    if utterance.trim().is_empty() {
        return Err(RagError::invalid("input must not be empty"));
    }
    for (i, msg) in history.iter().enumerate() {
        let has_sources = msg.sources.as_ref().is_some_and(|s| !s.is_empty());
        if msg.role == Role::User && has_sources {
            return Err(RagError::invalid(format!(
                "messages[{}]: only system messages may carry sources",
                i
            )));
        }
    }
    Ok(())
}
