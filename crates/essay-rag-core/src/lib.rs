//! # Essay RAG Core
//!
//! Runtime-agnostic logic for Essay RAG: chat and document models, the
//! provider traits (embedding, vector index, answer generation), and the
//! retrieval-augmented answer pipeline built on top of them.
//!
//! This crate performs no network, database, or filesystem I/O. Concrete
//! providers (OpenAI, Ollama, pgvector, Supabase) live in the `essay-rag`
//! app crate and are injected as trait objects.
//!
//! ## Pipeline
//!
//! ```text
//! history + utterance
//!        │
//!        ▼
//! ┌──────────────┐   ┌───────────┐   ┌──────────┐   ┌───────────┐
//! │ QueryRewriter│──▶│ Retriever │──▶│ assemble │──▶│ Generator │
//! └──────────────┘   └─────┬─────┘   └──────────┘   └─────┬─────┘
//!                          │ documents                     │ answer
//!                          ▼                               ▼
//!                   dedup_sources ──────────────────▶  Answer
//! ```

pub mod context;
pub mod embedding;
pub mod error;
pub mod generate;
pub mod index;
pub mod models;
pub mod prompt;
pub mod rag;
pub mod retrieve;
pub mod rewrite;
pub mod sources;

pub use error::RagError;
pub use models::{Answer, ChatMessage, Document, DocumentMetadata, Role, ScoredDocument, Source};
pub use rag::RagPipeline;
