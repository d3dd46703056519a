//! Error taxonomy for the answer pipeline.

use thiserror::Error;

/// Failure of a single RAG request.
///
/// Provider errors are classified by the pipeline stage they came from:
/// anything raised while embedding the query or searching the index is a
/// retrieval failure, anything raised by the language model (during query
/// rewriting or answering) is a generation failure.
#[derive(Debug, Error)]
pub enum RagError {
    /// Empty question or malformed history. Never retry.
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    /// Embedding provider or vector index unreachable, timed out, or
    /// rejected the query.
    #[error("retrieval unavailable: {0}")]
    RetrievalUnavailable(String),
    /// Language model unreachable, rate-limited, timed out, or returned
    /// malformed output.
    #[error("generation unavailable: {0}")]
    GenerationUnavailable(String),
}

impl RagError {
    pub fn invalid(msg: impl Into<String>) -> Self {
        RagError::InvalidRequest(msg.into())
    }

    pub fn retrieval(err: anyhow::Error) -> Self {
        RagError::RetrievalUnavailable(format!("{:#}", err))
    }

    pub fn generation(err: anyhow::Error) -> Self {
        RagError::GenerationUnavailable(format!("{:#}", err))
    }

    /// Machine-readable code used in HTTP error bodies.
    pub fn code(&self) -> &'static str {
        match self {
            RagError::InvalidRequest(_) => "invalid_request",
            RagError::RetrievalUnavailable(_) => "retrieval_unavailable",
            RagError::GenerationUnavailable(_) => "generation_unavailable",
        }
    }

    /// Whether a transport layer may retry the request with backoff.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, RagError::InvalidRequest(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_request_not_retryable() {
        assert!(!RagError::invalid("empty").is_retryable());
        assert!(RagError::retrieval(anyhow::anyhow!("down")).is_retryable());
        assert!(RagError::generation(anyhow::anyhow!("429")).is_retryable());
    }

    #[test]
    fn test_context_chain_kept_in_message() {
        let err = anyhow::anyhow!("connection refused").context("vector search failed");
        let rag = RagError::retrieval(err);
        assert_eq!(
            rag.to_string(),
            "retrieval unavailable: vector search failed: connection refused"
        );
        assert_eq!(rag.code(), "retrieval_unavailable");
    }
}
