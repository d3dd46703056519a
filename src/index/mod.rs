//! Vector index backends.
//!
//! - [`pgvector::PgVectorIndex`]: direct PostgreSQL access; supports both
//!   search and ingestion, and owns the [`pgvector::IngestLedger`].
//! - [`supabase::SupabaseIndex`]: search-only, through the PostgREST RPC
//!   endpoint of a Supabase project.
//!
//! The in-memory index used by tests lives in `essay-rag-core`.

pub mod pgvector;
pub mod supabase;

use anyhow::{bail, Result};
use std::sync::Arc;

use essay_rag_core::index::VectorIndex;

use crate::config::IndexConfig;
use crate::db;

pub use pgvector::{IngestLedger, PgVectorIndex};
pub use supabase::SupabaseIndex;

/// Build the backend selected by `index.provider`.
pub async fn create_index(config: &IndexConfig) -> Result<Arc<dyn VectorIndex>> {
    match config.provider.as_str() {
        "pgvector" => {
            let pool = db::connect(config).await?;
            Ok(Arc::new(PgVectorIndex::new(pool, config)))
        }
        "supabase" => Ok(Arc::new(SupabaseIndex::new(config)?)),
        other => bail!("Unknown index provider: {}", other),
    }
}
