//! Vector index abstraction.
//!
//! The [`VectorIndex`] trait covers the two operations the system needs
//! from a similarity-search service: nearest-neighbour search for the
//! answer pipeline and bulk insertion for corpus ingestion. Backends
//! (pgvector, Supabase, in-memory) are interchangeable behind it.
//!
//! Implementations must be `Send + Sync` to be shared across requests.

pub mod memory;

use anyhow::{bail, Result};
use async_trait::async_trait;

use crate::models::{Document, ScoredDocument};

/// A passage ready to be written to the index.
#[derive(Debug, Clone)]
pub struct IndexEntry {
    /// Stable identifier; re-adding the same id replaces the entry.
    pub id: String,
    pub document: Document,
    pub vector: Vec<f32>,
}

/// Abstract similarity-search backend.
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`search`](VectorIndex::search) | Top-`k` nearest documents to a query vector |
/// | [`add`](VectorIndex::add) | Insert or replace entries |
/// | [`replace_source`](VectorIndex::replace_source) | Swap in a source's new passages |
#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Short backend name for logs (e.g. `"pgvector"`).
    fn name(&self) -> &str;

    /// Return at most `limit` documents ordered by descending similarity.
    ///
    /// An empty result is not an error.
    async fn search(&self, query_vec: &[f32], limit: usize) -> Result<Vec<ScoredDocument>>;

    /// Insert or replace entries, returning how many were written.
    async fn add(&self, entries: &[IndexEntry]) -> Result<usize>;

    /// Make `entries` the complete set of passages stored for `source_url`.
    ///
    /// Earlier passages of that source whose ids are not in `entries` are
    /// removed, so a re-ingested essay that got shorter leaves nothing
    /// behind. Read-only backends keep the default, which fails.
    async fn replace_source(&self, _source_url: &str, _entries: &[IndexEntry]) -> Result<usize> {
        bail!("{} index does not support writes", self.name())
    }
}
