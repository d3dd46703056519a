//! Prompt templates for query rewriting and grounded answering.
//!
//! History turns are mapped onto chat-completion roles: client `user`
//! turns stay `user`, this service's own earlier answers (role `system`
//! on the wire) become `assistant` so the model does not read them as
//! instructions.

use crate::generate::{Prompt, PromptMessage};
use crate::models::{ChatMessage, Role};

/// Instruction for turning a follow-up into a standalone question.
pub const CONTEXTUALIZE_INSTRUCTION: &str = "Given a chat history and the latest user question \
which might reference context in the chat history, formulate a standalone question which can be \
understood without the chat history. Do NOT answer the question, just reformulate it if needed \
and otherwise return it as is. Reply with the question only.";

/// Instruction for answering from retrieved essay passages.
pub const ANSWER_INSTRUCTION: &str = "You are an assistant for question-answering tasks about a \
collection of essays. Use only the following pieces of retrieved context to answer the question. \
If the context does not contain the answer, just say that you don't know. Use three sentences \
maximum and keep the answer concise.";

/// Appended instead of a context block when retrieval found nothing.
pub const NO_CONTEXT_NOTICE: &str = "No relevant context was found for this question. \
Say that you don't know.";

fn history_messages(history: &[ChatMessage]) -> impl Iterator<Item = PromptMessage> + '_ {
    history.iter().map(|m| match m.role {
        Role::User => PromptMessage::user(m.content.clone()),
        Role::System => PromptMessage::assistant(m.content.clone()),
    })
}

/// Build the system instruction with the context block injected.
pub fn answer_instruction(context: &str) -> String {
    if context.trim().is_empty() {
        format!("{}\n\n{}", ANSWER_INSTRUCTION, NO_CONTEXT_NOTICE)
    } else {
        format!("{}\n\nContext:\n{}", ANSWER_INSTRUCTION, context)
    }
}

/// Prompt for the query rewriter: instruction, history, then the utterance.
pub fn rewrite_prompt(history: &[ChatMessage], utterance: &str) -> Prompt {
    let mut messages = Vec::with_capacity(history.len() + 2);
    messages.push(PromptMessage::system(CONTEXTUALIZE_INSTRUCTION));
    messages.extend(history_messages(history));
    messages.push(PromptMessage::user(utterance));
    Prompt { messages }
}

/// Prompt for the answer generator: grounded instruction, history, then
/// the utterance as the final user turn.
pub fn answer_prompt(history: &[ChatMessage], utterance: &str, context: &str) -> Prompt {
    let mut messages = Vec::with_capacity(history.len() + 2);
    messages.push(PromptMessage::system(answer_instruction(context)));
    messages.extend(history_messages(history));
    messages.push(PromptMessage::user(utterance));
    Prompt { messages }
}
