//! Corpus ingestion.
//!
//! Flow per run: list essays from a source → drop those already in the
//! ledger → fetch each (rate-limited) → chunk → embed → add to the index →
//! record the URL as processed.
//!
//! A URL is only recorded after its passages are stored, so an interrupted
//! run resumes where it stopped. Storing an essay replaces all of its
//! earlier passages. Fetch failures skip the essay; embedding
//! or storage failures abort the run.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tracing::{info, warn};

use essay_rag_core::embedding::EmbeddingProvider;
use essay_rag_core::index::{IndexEntry, VectorIndex};
use essay_rag_core::models::Document;

use crate::app::DeadlineIndex;
use crate::chunk::chunk_essay;
use crate::config::Config;
use crate::connector_fs::FilesystemSource;
use crate::db;
use crate::embedding::create_embedder;
use crate::index::PgVectorIndex;
use crate::models::{Essay, EssayRef};
use crate::scrape::WebSource;

/// Where essays come from.
#[async_trait]
pub trait EssaySource: Send + Sync {
    fn name(&self) -> &str;

    /// Minimum spacing between fetches, for remote sources.
    fn request_interval(&self) -> Option<Duration> {
        None
    }

    async fn list(&self) -> Result<Vec<EssayRef>>;

    async fn fetch(&self, essay: &EssayRef) -> Result<Essay>;
}

/// Persistent set of fully ingested essay URLs.
#[async_trait]
pub trait ProcessedLog: Send + Sync {
    async fn processed_urls(&self) -> Result<HashSet<String>>;
    async fn mark_processed(&self, url: &str, at: DateTime<Utc>) -> Result<()>;
    /// Forget everything; returns how many URLs were dropped.
    async fn clear(&self) -> Result<u64>;
}

#[derive(Debug, Clone)]
pub struct IngestOptions {
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    pub dry_run: bool,
    pub full: bool,
    pub limit: Option<usize>,
}

#[derive(Debug, Default, Clone, PartialEq)]
pub struct IngestStats {
    pub found: usize,
    pub skipped: usize,
    pub ingested: usize,
    pub failed: usize,
    pub chunks: usize,
}

/// `essay-rag ingest <source>`: build the source, index and ledger from the
/// config and run one ingestion pass.
pub async fn run_ingest(
    config: &Config,
    source: &str,
    dry_run: bool,
    full: bool,
    limit: Option<usize>,
) -> Result<()> {
    if config.index.provider != "pgvector" {
        bail!(
            "Ingestion requires index.provider = \"pgvector\" (got '{}')",
            config.index.provider
        );
    }

    let source: Box<dyn EssaySource> = match source {
        "web" => {
            let web = config
                .ingest
                .web
                .as_ref()
                .ok_or_else(|| anyhow::anyhow!("[ingest.web] is not configured"))?;
            Box::new(WebSource::new(web, config.ingest.requests_per_second)?)
        }
        "filesystem" => {
            let fs = config
                .ingest
                .filesystem
                .as_ref()
                .ok_or_else(|| anyhow::anyhow!("[ingest.filesystem] is not configured"))?;
            Box::new(FilesystemSource::new(fs)?)
        }
        other => bail!("Unknown source: '{}'. Available: web, filesystem", other),
    };

    let pool = db::connect(&config.index).await?;
    let pgvector = PgVectorIndex::new(pool, &config.index);
    let ledger = pgvector.ledger();
    let index = DeadlineIndex::new(
        Arc::new(pgvector),
        Duration::from_secs(config.index.timeout_secs),
    );
    let embedder = create_embedder(&config.embedding)?;

    let options = IngestOptions {
        chunk_size: config.ingest.chunk_size,
        chunk_overlap: config.ingest.chunk_overlap,
        dry_run,
        full,
        limit,
    };

    let stats = ingest(source.as_ref(), embedder, Arc::new(index), &ledger, &options).await?;

    if dry_run {
        println!("ingest {} (dry-run)", source.name());
        println!("  essays found:   {}", stats.found);
        println!("  already done:   {}", stats.skipped);
        println!("  would ingest:   {}", stats.found - stats.skipped);
    } else {
        println!("ingest {}", source.name());
        println!("  essays found:   {}", stats.found);
        println!("  already done:   {}", stats.skipped);
        println!("  ingested:       {}", stats.ingested);
        println!("  failed:         {}", stats.failed);
        println!("  chunks written: {}", stats.chunks);
    }
    Ok(())
}

/// Run one ingestion pass.
pub async fn ingest(
    source: &dyn EssaySource,
    embedder: Arc<dyn EmbeddingProvider>,
    index: Arc<dyn VectorIndex>,
    ledger: &dyn ProcessedLog,
    options: &IngestOptions,
) -> Result<IngestStats> {
    let mut stats = IngestStats::default();

    if options.full && !options.dry_run {
        let cleared = ledger.clear().await?;
        info!(cleared, "full re-ingest: cleared processed URLs");
    }

    let refs = source
        .list()
        .await
        .with_context(|| format!("Failed to list essays from {}", source.name()))?;
    stats.found = refs.len();

    let processed = if options.full {
        HashSet::new()
    } else {
        ledger.processed_urls().await?
    };
    let mut pending: Vec<EssayRef> = refs
        .into_iter()
        .filter(|r| !processed.contains(&r.url))
        .collect();
    stats.skipped = stats.found - pending.len();
    if let Some(limit) = options.limit {
        pending.truncate(limit);
    }

    info!(
        source = source.name(),
        found = stats.found,
        skipped = stats.skipped,
        pending = pending.len(),
        "essays listed"
    );
    if options.dry_run {
        return Ok(stats);
    }

    let mut ticker = source.request_interval().map(|period| {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        interval
    });

    for essay_ref in &pending {
        if let Some(ticker) = ticker.as_mut() {
            ticker.tick().await;
        }

        let essay = match source.fetch(essay_ref).await {
            Ok(essay) => essay,
            Err(e) => {
                warn!(url = %essay_ref.url, error = %format!("{:#}", e), "fetch failed, skipping");
                stats.failed += 1;
                continue;
            }
        };

        let entries = embed_essay(&essay, embedder.as_ref(), options).await?;
        if entries.is_empty() {
            warn!(url = %essay.url, "essay has no text, skipping");
            stats.failed += 1;
            continue;
        }

        let written = index
            .replace_source(&essay.url, &entries)
            .await
            .with_context(|| format!("Failed to store passages for {}", essay.url))?;
        ledger.mark_processed(&essay.url, Utc::now()).await?;

        info!(url = %essay.url, title = %essay.title, chunks = written, "ingested essay");
        stats.ingested += 1;
        stats.chunks += written;
    }

    Ok(stats)
}

/// Chunk and embed one essay into index entries.
async fn embed_essay(
    essay: &Essay,
    embedder: &dyn EmbeddingProvider,
    options: &IngestOptions,
) -> Result<Vec<IndexEntry>> {
    let chunks = chunk_essay(&essay.url, &essay.text, options.chunk_size, options.chunk_overlap);
    if chunks.is_empty() {
        return Ok(Vec::new());
    }

    let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
    let vectors = embedder
        .embed_batch(&texts)
        .await
        .with_context(|| format!("Failed to embed {}", essay.url))?;
    if vectors.len() != chunks.len() {
        bail!(
            "Embedder returned {} vectors for {} chunks of {}",
            vectors.len(),
            chunks.len(),
            essay.url
        );
    }

    Ok(chunks
        .into_iter()
        .zip(vectors)
        .map(|(chunk, vector)| {
            let mut document = Document::new(chunk.text, essay.title.clone(), essay.url.clone());
            document
                .metadata
                .extra
                .insert("chunk_index".to_string(), chunk.index.into());
            if let Some(updated_at) = essay.updated_at {
                document
                    .metadata
                    .extra
                    .insert("updated_at".to_string(), updated_at.to_rfc3339().into());
            }
            IndexEntry {
                id: chunk.id,
                document,
                vector,
            }
        })
        .collect())
}
