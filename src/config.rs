//! TOML configuration.
//!
//! Every setting lives in one file passed with `--config`. Credentials are
//! never written there: each provider section names the environment
//! variable its secret is read from (`api_key_env`, `key_env`, `url_env`),
//! and the value is resolved when the provider is built.

use anyhow::{Context, Result};
use essay_rag_core::rewrite::RewritePolicy;
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub index: IndexConfig,
    pub embedding: EmbeddingConfig,
    pub generation: GenerationConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub ingest: IngestConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct IndexConfig {
    /// `pgvector` or `supabase`.
    pub provider: String,
    /// Env var holding the PostgreSQL connection string (pgvector).
    #[serde(default = "default_url_env")]
    pub url_env: String,
    /// Supabase project URL, e.g. `https://abc.supabase.co`.
    #[serde(default)]
    pub url: Option<String>,
    /// Env var holding the Supabase API key.
    #[serde(default = "default_key_env")]
    pub key_env: String,
    #[serde(default = "default_table")]
    pub table: String,
    #[serde(default = "default_collection")]
    pub collection: String,
    /// SQL function used for similarity search over RPC.
    #[serde(default = "default_query_name")]
    pub query_name: String,
    #[serde(default = "default_index_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_url_env() -> String {
    "DATABASE_URL".to_string()
}
fn default_key_env() -> String {
    "SUPABASE_ANON_KEY".to_string()
}
fn default_table() -> String {
    "langchain_pg_embedding".to_string()
}
fn default_collection() -> String {
    "essays".to_string()
}
fn default_query_name() -> String {
    "match_essays".to_string()
}
fn default_index_timeout_secs() -> u64 {
    10
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    /// `openai` or `ollama`.
    pub provider: String,
    pub model: Option<String>,
    pub dims: Option<usize>,
    /// Base URL override (OpenAI-compatible gateways, remote Ollama).
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_api_key_env() -> String {
    "OPENAI_API_KEY".to_string()
}
fn default_batch_size() -> usize {
    64
}
fn default_max_retries() -> u32 {
    5
}
fn default_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct GenerationConfig {
    /// `openai` or `ollama`.
    pub provider: String,
    pub model: Option<String>,
    #[serde(default)]
    pub temperature: f32,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_generation_retries")]
    pub max_retries: u32,
    #[serde(default = "default_generation_timeout_secs")]
    pub timeout_secs: u64,
    /// `fast_path` or `always`.
    #[serde(default = "default_rewrite")]
    pub rewrite: String,
}

fn default_generation_retries() -> u32 {
    2
}
fn default_generation_timeout_secs() -> u64 {
    60
}
fn default_rewrite() -> String {
    "fast_path".to_string()
}

impl GenerationConfig {
    pub fn rewrite_policy(&self) -> Result<RewritePolicy> {
        self.rewrite.parse().map_err(|e: String| anyhow::anyhow!(e))
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_k")]
    pub k: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self { k: default_k() }
    }
}

fn default_k() -> usize {
    essay_rag_core::retrieve::DEFAULT_K
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:3000".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct IngestConfig {
    /// Maximum chunk length in characters.
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    /// Characters shared between consecutive chunks.
    #[serde(default = "default_chunk_overlap")]
    pub chunk_overlap: usize,
    #[serde(default = "default_requests_per_second")]
    pub requests_per_second: f64,
    #[serde(default)]
    pub web: Option<WebSourceConfig>,
    #[serde(default)]
    pub filesystem: Option<FilesystemSourceConfig>,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            chunk_overlap: default_chunk_overlap(),
            requests_per_second: default_requests_per_second(),
            web: None,
            filesystem: None,
        }
    }
}

fn default_chunk_size() -> usize {
    1000
}
fn default_chunk_overlap() -> usize {
    200
}
fn default_requests_per_second() -> f64 {
    1.0
}

/// An essay site with an index page linking to every essay.
#[derive(Debug, Deserialize, Clone)]
pub struct WebSourceConfig {
    pub base_url: String,
    #[serde(default = "default_index_path")]
    pub index_path: String,
}

fn default_index_path() -> String {
    "articles.html".to_string()
}

/// A local directory of essay files.
#[derive(Debug, Deserialize, Clone)]
pub struct FilesystemSourceConfig {
    pub root: PathBuf,
    #[serde(default = "default_include_globs")]
    pub include_globs: Vec<String>,
    #[serde(default)]
    pub exclude_globs: Vec<String>,
    /// Prefix for citation URLs; relative paths are appended. Defaults to
    /// `file://` URLs.
    #[serde(default)]
    pub base_url: Option<String>,
}

fn default_include_globs() -> Vec<String> {
    vec![
        "**/*.html".to_string(),
        "**/*.txt".to_string(),
        "**/*.md".to_string(),
    ]
}

/// Read and validate a config file.
pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    parse_config(&content)
}

/// Parse and validate config text.
pub fn parse_config(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

fn validate(config: &Config) -> Result<()> {
    // Index
    match config.index.provider.as_str() {
        "pgvector" => {}
        "supabase" => {
            if config.index.url.as_deref().map_or(true, str::is_empty) {
                anyhow::bail!("index.url must be set when provider is 'supabase'");
            }
        }
        other => anyhow::bail!(
            "Unknown index provider: '{}'. Must be pgvector or supabase.",
            other
        ),
    }
    for (key, value) in [
        ("index.table", &config.index.table),
        ("index.query_name", &config.index.query_name),
    ] {
        if !is_sql_identifier(value) {
            anyhow::bail!("{} must be a plain SQL identifier, got '{}'", key, value);
        }
    }
    if config.index.timeout_secs == 0 {
        anyhow::bail!("index.timeout_secs must be > 0");
    }

    // Embedding
    match config.embedding.provider.as_str() {
        "openai" | "ollama" => {}
        other => anyhow::bail!(
            "Unknown embedding provider: '{}'. Must be openai or ollama.",
            other
        ),
    }
    if config.embedding.model.as_deref().map_or(true, str::is_empty) {
        anyhow::bail!(
            "embedding.model must be specified when provider is '{}'",
            config.embedding.provider
        );
    }
    if config.embedding.dims.is_none() || config.embedding.dims == Some(0) {
        anyhow::bail!(
            "embedding.dims must be > 0 when provider is '{}'",
            config.embedding.provider
        );
    }
    if config.embedding.batch_size == 0 {
        anyhow::bail!("embedding.batch_size must be > 0");
    }

    // Generation
    match config.generation.provider.as_str() {
        "openai" | "ollama" => {}
        other => anyhow::bail!(
            "Unknown generation provider: '{}'. Must be openai or ollama.",
            other
        ),
    }
    if config.generation.model.as_deref().map_or(true, str::is_empty) {
        anyhow::bail!(
            "generation.model must be specified when provider is '{}'",
            config.generation.provider
        );
    }
    if !(0.0..=2.0).contains(&config.generation.temperature) {
        anyhow::bail!("generation.temperature must be in [0.0, 2.0]");
    }
    config.generation.rewrite_policy()?;

    // Retrieval
    if config.retrieval.k < 1 {
        anyhow::bail!("retrieval.k must be >= 1");
    }

    // Ingest
    if config.ingest.chunk_size == 0 {
        anyhow::bail!("ingest.chunk_size must be > 0");
    }
    if config.ingest.chunk_overlap >= config.ingest.chunk_size {
        anyhow::bail!("ingest.chunk_overlap must be smaller than ingest.chunk_size");
    }
    if config.ingest.requests_per_second <= 0.0 {
        anyhow::bail!("ingest.requests_per_second must be > 0");
    }

    Ok(())
}

fn is_sql_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Read a required secret from the environment.
pub fn env_secret(var: &str) -> Result<String> {
    match std::env::var(var) {
        Ok(v) if !v.trim().is_empty() => Ok(v),
        _ => anyhow::bail!("{} environment variable not set", var),
    }
}
