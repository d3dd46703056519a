//! Embedding providers.
//!
//! Concrete implementations of [`EmbeddingProvider`]:
//! - **[`OpenAIEmbedder`]**: `POST /v1/embeddings` on the OpenAI API (or a
//!   compatible gateway set via `embedding.url`).
//! - **[`OllamaEmbedder`]**: `POST /api/embed` on an Ollama instance.
//!
//! Both split large inputs into `embedding.batch_size` requests, retry
//! transient failures with exponential backoff (see [`crate::http`]), and
//! check that every returned vector has the configured dimensionality.
//!
//! Use [`create_embedder`] to build the provider named in the config.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use std::sync::Arc;

use essay_rag_core::embedding::EmbeddingProvider;

use crate::config::{env_secret, EmbeddingConfig};
use crate::http;

const OPENAI_URL: &str = "https://api.openai.com/v1";
const OLLAMA_URL: &str = "http://localhost:11434";

/// Build the embedding provider selected by `embedding.provider`.
pub fn create_embedder(config: &EmbeddingConfig) -> Result<Arc<dyn EmbeddingProvider>> {
    match config.provider.as_str() {
        "openai" => Ok(Arc::new(OpenAIEmbedder::new(config)?)),
        "ollama" => Ok(Arc::new(OllamaEmbedder::new(config)?)),
        other => bail!("Unknown embedding provider: {}", other),
    }
}

fn required_model(config: &EmbeddingConfig) -> Result<(String, usize)> {
    let model = config.model.clone().ok_or_else(|| {
        anyhow::anyhow!("embedding.model required for {} provider", config.provider)
    })?;
    let dims = config.dims.ok_or_else(|| {
        anyhow::anyhow!("embedding.dims required for {} provider", config.provider)
    })?;
    Ok((model, dims))
}

// ============ OpenAI ============

pub struct OpenAIEmbedder {
    model: String,
    dims: usize,
    base_url: String,
    api_key: String,
    batch_size: usize,
    max_retries: u32,
    client: reqwest::Client,
}

impl OpenAIEmbedder {
    /// # Errors
    ///
    /// Fails if `model` or `dims` is unset, or the API key variable named
    /// by `embedding.api_key_env` is missing.
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let (model, dims) = required_model(config)?;
        let api_key = env_secret(&config.api_key_env)?;
        Ok(Self {
            model,
            dims,
            base_url: config
                .url
                .clone()
                .unwrap_or_else(|| OPENAI_URL.to_string())
                .trim_end_matches('/')
                .to_string(),
            api_key,
            batch_size: config.batch_size.max(1),
            max_retries: config.max_retries,
            client: http::client(config.timeout_secs)?,
        })
    }

    async fn embed_one_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let body = serde_json::json!({
            "model": self.model,
            "input": texts,
        });
        let url = format!("{}/embeddings", self.base_url);
        let response = http::send_with_retry(
            || {
                self.client
                    .post(&url)
                    .bearer_auth(&self.api_key)
                    .json(&body)
            },
            self.max_retries,
            "OpenAI API",
        )
        .await?;
        let json: serde_json::Value = response.json().await?;
        let vectors = parse_openai_response(&json)?;
        check_shape(&vectors, texts.len(), self.dims)?;
        Ok(vectors)
    }
}

#[async_trait]
impl EmbeddingProvider for OpenAIEmbedder {
    fn model_name(&self) -> &str {
        &self.model
    }
    fn dims(&self) -> usize {
        self.dims
    }
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut out = Vec::with_capacity(texts.len());
        for batch in texts.chunks(self.batch_size) {
            out.extend(self.embed_one_batch(batch).await?);
        }
        Ok(out)
    }
}

/// Parse the OpenAI embeddings response, ordering vectors by their
/// `index` field.
fn parse_openai_response(json: &serde_json::Value) -> Result<Vec<Vec<f32>>> {
    let data = json
        .get("data")
        .and_then(|d| d.as_array())
        .ok_or_else(|| anyhow::anyhow!("Invalid OpenAI response: missing data array"))?;

    let mut indexed = Vec::with_capacity(data.len());
    for (pos, item) in data.iter().enumerate() {
        let embedding = item
            .get("embedding")
            .and_then(|e| e.as_array())
            .ok_or_else(|| anyhow::anyhow!("Invalid OpenAI response: missing embedding"))?;
        let index = item
            .get("index")
            .and_then(|i| i.as_u64())
            .map(|i| i as usize)
            .unwrap_or(pos);
        indexed.push((index, to_f32(embedding)));
    }
    indexed.sort_by_key(|(i, _)| *i);
    Ok(indexed.into_iter().map(|(_, v)| v).collect())
}

// ============ Ollama ============

pub struct OllamaEmbedder {
    model: String,
    dims: usize,
    url: String,
    batch_size: usize,
    max_retries: u32,
    client: reqwest::Client,
}

impl OllamaEmbedder {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let (model, dims) = required_model(config)?;
        Ok(Self {
            model,
            dims,
            url: config
                .url
                .clone()
                .unwrap_or_else(|| OLLAMA_URL.to_string())
                .trim_end_matches('/')
                .to_string(),
            batch_size: config.batch_size.max(1),
            max_retries: config.max_retries,
            client: http::client(config.timeout_secs)?,
        })
    }
}

#[async_trait]
impl EmbeddingProvider for OllamaEmbedder {
    fn model_name(&self) -> &str {
        &self.model
    }
    fn dims(&self) -> usize {
        self.dims
    }
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let url = format!("{}/api/embed", self.url);
        let mut out = Vec::with_capacity(texts.len());
        for batch in texts.chunks(self.batch_size) {
            let body = serde_json::json!({
                "model": self.model,
                "input": batch,
            });
            let response = http::send_with_retry(
                || self.client.post(&url).json(&body),
                self.max_retries,
                "Ollama API",
            )
            .await
            .with_context(|| format!("is Ollama running at {}?", self.url))?;
            let json: serde_json::Value = response.json().await?;
            let vectors = parse_ollama_response(&json)?;
            check_shape(&vectors, batch.len(), self.dims)?;
            out.extend(vectors);
        }
        Ok(out)
    }
}

fn parse_ollama_response(json: &serde_json::Value) -> Result<Vec<Vec<f32>>> {
    let embeddings = json
        .get("embeddings")
        .and_then(|e| e.as_array())
        .ok_or_else(|| anyhow::anyhow!("Invalid Ollama response: missing embeddings array"))?;

    embeddings
        .iter()
        .map(|embedding| {
            embedding
                .as_array()
                .map(|values| to_f32(values))
                .ok_or_else(|| anyhow::anyhow!("Invalid Ollama response: embedding is not an array"))
        })
        .collect()
}

fn to_f32(values: &[serde_json::Value]) -> Vec<f32> {
    values
        .iter()
        .map(|v| v.as_f64().unwrap_or(0.0) as f32)
        .collect()
}

fn check_shape(vectors: &[Vec<f32>], expected: usize, dims: usize) -> Result<()> {
    if vectors.len() != expected {
        bail!(
            "Embedding response has {} vectors for {} inputs",
            vectors.len(),
            expected
        );
    }
    if let Some(bad) = vectors.iter().find(|v| v.len() != dims) {
        bail!(
            "Embedding has {} dimensions, expected {} (check embedding.dims)",
            bad.len(),
            dims
        );
    }
    Ok(())
}
