//! History-aware query rewriting.
//!
//! Follow-up questions ("why did he say that?") retrieve poorly on their
//! own. The [`QueryRewriter`] asks the language model to turn the latest
//! utterance into a standalone question using the conversation so far.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::error::RagError;
use crate::generate::AnswerGenerator;
use crate::models::ChatMessage;
use crate::prompt::rewrite_prompt;

/// When the rewriter calls the model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RewritePolicy {
    /// Skip the model call when there is no history; the utterance is
    /// already standalone.
    #[default]
    FastPath,
    /// Always ask the model, even for the first turn.
    Always,
}

impl std::str::FromStr for RewritePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "fast_path" => Ok(RewritePolicy::FastPath),
            "always" => Ok(RewritePolicy::Always),
            other => Err(format!(
                "Unknown rewrite policy: '{}'. Must be fast_path or always.",
                other
            )),
        }
    }
}

/// Produces standalone retrieval queries.
pub struct QueryRewriter {
    generator: Arc<dyn AnswerGenerator>,
    policy: RewritePolicy,
}

impl QueryRewriter {
    pub fn new(generator: Arc<dyn AnswerGenerator>, policy: RewritePolicy) -> Self {
        Self { generator, policy }
    }

    pub fn policy(&self) -> RewritePolicy {
        self.policy
    }

    /// Rewrite `utterance` into a question that stands without `history`.
    ///
    /// The model is only instructed not to answer; its reply is cleaned up
    /// but not otherwise validated. A blank reply falls back to the
    /// original utterance.
    pub async fn rewrite(&self, history: &[ChatMessage], utterance: &str) -> Result<String, RagError> {
        if history.is_empty() && self.policy == RewritePolicy::FastPath {
            return Ok(utterance.to_string());
        }

        let prompt = rewrite_prompt(history, utterance);
        let raw = self
            .generator
            .generate(&prompt)
            .await
            .map_err(|e| RagError::generation(e.context("query rewrite failed")))?;

        let query = clean_rewrite(&raw);
        if query.is_empty() {
            warn!("query rewrite returned blank output, using original utterance");
            return Ok(utterance.to_string());
        }
        debug!(original = utterance, rewritten = %query, "rewrote query");
        Ok(query)
    }
}

/// Strip labels and wrapping quotes models like to add around the question.
fn clean_rewrite(raw: &str) -> String {
    let mut text = raw.trim();
    for label in ["Standalone question:", "standalone question:", "Question:"] {
        if let Some(rest) = text.strip_prefix(label) {
            text = rest.trim();
        }
    }
    for (open, close) in [('"', '"'), ('\'', '\''), ('“', '”')] {
        if text.len() >= 2 && text.starts_with(open) && text.ends_with(close) {
            text = text[open.len_utf8()..text.len() - close.len_utf8()].trim();
        }
    }
    text.to_string()
}
