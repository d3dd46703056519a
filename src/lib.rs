//! # Essay RAG
//!
//! Retrieval-augmented question answering over an essay corpus.
//!
//! The answer pipeline itself (rewrite → retrieve → assemble → generate →
//! cite) lives in [`essay_rag_core`]. This crate supplies everything around
//! it: configuration, the concrete providers, corpus ingestion, the CLI
//! and the HTTP server.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐   ┌──────────────┐   ┌────────────┐
//! │   Sources   │──▶│   Ingest     │──▶│  pgvector  │
//! │  web / fs   │   │ chunk+embed  │   │ (Postgres) │
//! └─────────────┘   └──────────────┘   └─────┬──────┘
//!                                            │ search
//!                    ┌───────────────────────┤
//!                    ▼                       ▼
//!              ┌───────────┐  RagPipeline ┌──────────┐
//!              │    CLI    │◀────────────▶│   HTTP   │
//!              │ ask/chat  │              │ /api/chat│
//!              └───────────┘              └──────────┘
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`app`] | Provider wiring and per-call deadlines |
//! | [`embedding`] | OpenAI / Ollama embedding providers |
//! | [`generation`] | OpenAI / Ollama chat-completion backends |
//! | [`index`] | pgvector and Supabase vector index backends |
//! | [`ingest`] | Corpus ingestion pipeline |
//! | [`scrape`] | Essay website source |
//! | [`connector_fs`] | Local directory source |
//! | [`chunk`] | Overlapping text chunker |
//! | [`server`] | HTTP chat API |
//! | [`ask`] | `search`, `ask` and `chat` commands |
//! | [`db`] | PostgreSQL connection |
//! | [`migrate`] | Schema setup |

pub mod app;
pub mod ask;
pub mod chunk;
pub mod config;
pub mod connector_fs;
pub mod db;
pub mod embedding;
pub mod generation;
pub mod http;
pub mod index;
pub mod ingest;
pub mod migrate;
pub mod models;
pub mod scrape;
pub mod server;
