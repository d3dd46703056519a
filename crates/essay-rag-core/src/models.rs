//! Core data models: retrieved documents and the chat wire types.
//!
//! [`ChatMessage`] and [`Source`] are the shapes exchanged with clients at
//! the HTTP boundary. [`Document`] and [`ScoredDocument`] are what the
//! vector index hands back for a single request and are dropped once the
//! answer is built.

use serde::{Deserialize, Serialize};

/// Metadata attached to an indexed passage.
///
/// `title` and `source` are the two keys the pipeline reads. Anything else
/// the ingester stored (chunk index, language, ...) is carried through
/// untouched in `extra`.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct DocumentMetadata {
    #[serde(default)]
    pub title: String,
    /// URL of the essay the passage came from. Stored under `source` to
    /// stay compatible with LangChain-written rows.
    #[serde(default, rename = "source", alias = "source_url")]
    pub source_url: String,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// A passage of essay text with its metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub content: String,
    pub metadata: DocumentMetadata,
}

impl Document {
    pub fn new(content: impl Into<String>, title: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            metadata: DocumentMetadata {
                title: title.into(),
                source_url: url.into(),
                extra: serde_json::Map::new(),
            },
        }
    }

    /// The citation for this passage.
    pub fn source(&self) -> Source {
        Source {
            title: self.metadata.title.clone(),
            url: self.metadata.source_url.clone(),
        }
    }
}

/// A document paired with its similarity to the query vector.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredDocument {
    pub document: Document,
    /// Similarity score; higher is closer.
    pub score: f64,
}

/// Output of a single retrieval call.
#[derive(Debug, Clone, PartialEq)]
pub struct RetrievalResult {
    /// The standalone query that was embedded.
    pub query: String,
    /// Documents in descending similarity order.
    pub documents: Vec<ScoredDocument>,
}

impl RetrievalResult {
    pub fn documents(&self) -> impl Iterator<Item = &Document> {
        self.documents.iter().map(|d| &d.document)
    }
}

/// A cited essay.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Source {
    pub title: String,
    pub url: String,
}

/// Author of a chat turn.
///
/// Answers produced by this service are sent back with role `system`, so
/// that is also how they come back in the history. `assistant` is accepted
/// as an alias on input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    #[serde(alias = "assistant")]
    System,
}

/// One turn of a conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sources: Option<Vec<Source>>,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
            sources: None,
        }
    }

    pub fn system(content: impl Into<String>, sources: Vec<Source>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
            sources: Some(sources),
        }
    }
}

/// A grounded answer with its deduplicated citations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Answer {
    pub content: String,
    pub sources: Vec<Source>,
}

impl Answer {
    /// Turn this answer into the history entry a client appends.
    pub fn into_message(self) -> ChatMessage {
        ChatMessage::system(self.content, self.sources)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chat_message_roundtrip() {
        let msg = ChatMessage::system(
            "Startups are about growth.",
            vec![Source {
                title: "Startup = Growth".to_string(),
                url: "https://paulgraham.com/growth.html".to_string(),
            }],
        );
        let json = serde_json::to_string(&msg).unwrap();
        let parsed: ChatMessage = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, msg);
    }

    #[test]
    fn test_user_message_omits_sources() {
        let json = serde_json::to_value(ChatMessage::user("hi")).unwrap();
        assert_eq!(json, serde_json::json!({ "role": "user", "content": "hi" }));
    }

    #[test]
    fn test_assistant_alias_maps_to_system() {
        let msg: ChatMessage =
            serde_json::from_str(r#"{"role":"assistant","content":"earlier answer"}"#).unwrap();
        assert_eq!(msg.role, Role::System);
        assert!(msg.sources.is_none());
    }

    #[test]
    fn test_unknown_role_rejected() {
        let res = serde_json::from_str::<ChatMessage>(r#"{"role":"tool","content":"x"}"#);
        assert!(res.is_err());
    }

    #[test]
    fn test_metadata_keeps_extra_keys() {
        let meta: DocumentMetadata = serde_json::from_value(serde_json::json!({
            "title": "How to Do Great Work",
            "source": "https://paulgraham.com/greatwork.html",
            "chunk_index": 4
        }))
        .unwrap();
        assert_eq!(meta.title, "How to Do Great Work");
        assert_eq!(meta.source_url, "https://paulgraham.com/greatwork.html");
        assert_eq!(meta.extra.get("chunk_index"), Some(&serde_json::json!(4)));

        let back = serde_json::to_value(&meta).unwrap();
        assert_eq!(back["source"], "https://paulgraham.com/greatwork.html");
        assert_eq!(back["chunk_index"], 4);
    }

    #[test]
    fn test_metadata_missing_fields_default_empty() {
        let meta: DocumentMetadata = serde_json::from_str("{}").unwrap();
        assert!(meta.title.is_empty());
        assert!(meta.source_url.is_empty());
    }
}
