//! Ingestion data models.
//!
//! Sources first list [`EssayRef`]s (cheap: one index page or one directory
//! walk), so already-processed essays can be skipped before anything is
//! fetched. Only pending refs are turned into [`Essay`]s.

use chrono::{DateTime, Utc};
use std::path::PathBuf;

/// An essay discovered by a source, not yet fetched.
#[derive(Debug, Clone, PartialEq)]
pub struct EssayRef {
    /// Canonical URL; also the ingestion ledger key and the citation URL.
    pub url: String,
    /// Local file backing the essay, for filesystem sources.
    pub path: Option<PathBuf>,
}

impl EssayRef {
    pub fn web(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            path: None,
        }
    }
}

/// A fetched essay, reduced to plain text.
#[derive(Debug, Clone)]
pub struct Essay {
    pub url: String,
    pub title: String,
    /// Body text with paragraph breaks kept as blank lines.
    pub text: String,
    pub updated_at: Option<DateTime<Utc>>,
}
