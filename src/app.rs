//! Application context: provider handles built once at start-up.
//!
//! Every provider is wrapped in a deadline adapter so a hung upstream call
//! surfaces as an error instead of stalling the request. Deadlines come
//! from each section's `timeout_secs`. Dropping the request future cancels
//! the in-flight call.

use anyhow::Result;
use async_trait::async_trait;
use futures_util::stream::{self, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{timeout, timeout_at, Instant};
use tracing::info;

use essay_rag_core::embedding::EmbeddingProvider;
use essay_rag_core::generate::{AnswerGenerator, Prompt, TokenStream};
use essay_rag_core::index::{IndexEntry, VectorIndex};
use essay_rag_core::rewrite::RewritePolicy;
use essay_rag_core::{RagPipeline, ScoredDocument};

use crate::config::Config;
use crate::embedding::create_embedder;
use crate::generation::create_generator;
use crate::index::create_index;

/// Shared, read-only state handed to the CLI commands and the server.
pub struct AppContext {
    pub pipeline: Arc<RagPipeline>,
    pub embedder: Arc<dyn EmbeddingProvider>,
    pub index: Arc<dyn VectorIndex>,
    pub generator: Arc<dyn AnswerGenerator>,
}

impl AppContext {
    /// Build every provider named in `config`, failing fast on missing
    /// credentials or bad settings.
    pub async fn from_config(config: &Config) -> Result<Self> {
        let embedder = create_embedder(&config.embedding)?;
        let index = create_index(&config.index).await?;
        let generator = create_generator(&config.generation)?;

        info!(
            embedding = embedder.model_name(),
            index = index.name(),
            generation = generator.model_name(),
            k = config.retrieval.k,
            "providers ready"
        );

        Ok(Self::assemble(
            embedder,
            index,
            generator,
            Deadlines {
                embedding: Duration::from_secs(config.embedding.timeout_secs),
                index: Duration::from_secs(config.index.timeout_secs),
                generation: Duration::from_secs(config.generation.timeout_secs),
            },
            config.retrieval.k,
            config.generation.rewrite_policy()?,
        ))
    }

    /// Wire already-built providers into a pipeline.
    pub fn assemble(
        embedder: Arc<dyn EmbeddingProvider>,
        index: Arc<dyn VectorIndex>,
        generator: Arc<dyn AnswerGenerator>,
        deadlines: Deadlines,
        k: usize,
        rewrite: RewritePolicy,
    ) -> Self {
        let embedder: Arc<dyn EmbeddingProvider> =
            Arc::new(DeadlineEmbedder::new(embedder, deadlines.embedding));
        let index: Arc<dyn VectorIndex> = Arc::new(DeadlineIndex::new(index, deadlines.index));
        let generator: Arc<dyn AnswerGenerator> =
            Arc::new(DeadlineGenerator::new(generator, deadlines.generation));

        let pipeline = RagPipeline::new(embedder.clone(), index.clone(), generator.clone())
            .with_k(k)
            .with_rewrite_policy(rewrite);

        Self {
            pipeline: Arc::new(pipeline),
            embedder,
            index,
            generator,
        }
    }
}

/// Per-provider call deadlines.
#[derive(Debug, Clone, Copy)]
pub struct Deadlines {
    pub embedding: Duration,
    pub index: Duration,
    pub generation: Duration,
}

pub struct DeadlineEmbedder {
    inner: Arc<dyn EmbeddingProvider>,
    limit: Duration,
}

impl DeadlineEmbedder {
    pub fn new(inner: Arc<dyn EmbeddingProvider>, limit: Duration) -> Self {
        Self { inner, limit }
    }
}

#[async_trait]
impl EmbeddingProvider for DeadlineEmbedder {
    fn model_name(&self) -> &str {
        self.inner.model_name()
    }
    fn dims(&self) -> usize {
        self.inner.dims()
    }
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        timeout(self.limit, self.inner.embed_batch(texts))
            .await
            .map_err(|_| anyhow::anyhow!("embedding timed out after {:?}", self.limit))?
    }
}

pub struct DeadlineIndex {
    inner: Arc<dyn VectorIndex>,
    limit: Duration,
}

impl DeadlineIndex {
    pub fn new(inner: Arc<dyn VectorIndex>, limit: Duration) -> Self {
        Self { inner, limit }
    }
}

#[async_trait]
impl VectorIndex for DeadlineIndex {
    fn name(&self) -> &str {
        self.inner.name()
    }
    async fn search(&self, query_vec: &[f32], limit: usize) -> Result<Vec<ScoredDocument>> {
        timeout(self.limit, self.inner.search(query_vec, limit))
            .await
            .map_err(|_| anyhow::anyhow!("{} search timed out after {:?}", self.name(), self.limit))?
    }
    async fn add(&self, entries: &[IndexEntry]) -> Result<usize> {
        timeout(self.limit, self.inner.add(entries))
            .await
            .map_err(|_| anyhow::anyhow!("{} write timed out after {:?}", self.name(), self.limit))?
    }
    async fn replace_source(&self, source_url: &str, entries: &[IndexEntry]) -> Result<usize> {
        timeout(self.limit, self.inner.replace_source(source_url, entries))
            .await
            .map_err(|_| anyhow::anyhow!("{} write timed out after {:?}", self.name(), self.limit))?
    }
}

/// Bounds both buffered generation and the whole life of a token stream.
pub struct DeadlineGenerator {
    inner: Arc<dyn AnswerGenerator>,
    limit: Duration,
}

impl DeadlineGenerator {
    pub fn new(inner: Arc<dyn AnswerGenerator>, limit: Duration) -> Self {
        Self { inner, limit }
    }
}

#[async_trait]
impl AnswerGenerator for DeadlineGenerator {
    fn model_name(&self) -> &str {
        self.inner.model_name()
    }

    async fn generate(&self, prompt: &Prompt) -> Result<String> {
        timeout(self.limit, self.inner.generate(prompt))
            .await
            .map_err(|_| anyhow::anyhow!("generation timed out after {:?}", self.limit))?
    }

    async fn stream(&self, prompt: &Prompt) -> Result<TokenStream> {
        let deadline = Instant::now() + self.limit;
        let limit = self.limit;
        let tokens = timeout_at(deadline, self.inner.stream(prompt))
            .await
            .map_err(|_| anyhow::anyhow!("generation timed out after {:?}", limit))??;

        // Each chunk must arrive before the overall deadline; a timeout ends
        // the stream with an error.
        Ok(stream::unfold(Some(tokens), move |state| async move {
            let mut tokens = state?;
            match timeout_at(deadline, tokens.next()).await {
                Ok(Some(item)) => Some((item, Some(tokens))),
                Ok(None) => None,
                Err(_) => Some((
                    Err(anyhow::anyhow!("generation timed out after {:?}", limit)),
                    None,
                )),
            }
        })
        .boxed())
    }
}
