//! In-memory [`VectorIndex`] implementation for tests and small corpora.
//!
//! Entries live in a `Vec` behind `std::sync::RwLock`. Search is
//! brute-force cosine similarity over every stored vector.

use std::sync::RwLock;

use anyhow::{anyhow, Result};
use async_trait::async_trait;

use crate::embedding::cosine_similarity;
use crate::models::ScoredDocument;

use super::{IndexEntry, VectorIndex};

/// In-memory brute-force index.
pub struct InMemoryIndex {
    entries: RwLock<Vec<IndexEntry>>,
}

impl InMemoryIndex {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(Vec::new()),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.read().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for InMemoryIndex {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl VectorIndex for InMemoryIndex {
    fn name(&self) -> &str {
        "memory"
    }

    async fn search(&self, query_vec: &[f32], limit: usize) -> Result<Vec<ScoredDocument>> {
        let entries = self
            .entries
            .read()
            .map_err(|_| anyhow!("in-memory index lock poisoned"))?;
        let mut scored: Vec<ScoredDocument> = entries
            .iter()
            .map(|e| ScoredDocument {
                document: e.document.clone(),
                score: cosine_similarity(query_vec, &e.vector) as f64,
            })
            .collect();
        // Stable sort keeps insertion order among equal scores.
        scored.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        scored.truncate(limit);
        Ok(scored)
    }

    async fn add(&self, new_entries: &[IndexEntry]) -> Result<usize> {
        let mut entries = self
            .entries
            .write()
            .map_err(|_| anyhow!("in-memory index lock poisoned"))?;
        for entry in new_entries {
            entries.retain(|e| e.id != entry.id);
            entries.push(entry.clone());
        }
        Ok(new_entries.len())
    }

    async fn replace_source(&self, source_url: &str, new_entries: &[IndexEntry]) -> Result<usize> {
        let mut entries = self
            .entries
            .write()
            .map_err(|_| anyhow!("in-memory index lock poisoned"))?;
        entries.retain(|e| {
            e.document.metadata.source_url != source_url
                && !new_entries.iter().any(|n| n.id == e.id)
        });
        entries.extend(new_entries.iter().cloned());
        Ok(new_entries.len())
    }
}
