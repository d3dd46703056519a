//! Supabase backend: similarity search through PostgREST RPC.
//!
//! Calls `POST {url}/rest/v1/rpc/{query_name}` with the project's API key.
//! The SQL function is the one [`crate::migrate`] creates; any function
//! returning `content`, `metadata` and `similarity` columns works.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde::Deserialize;

use essay_rag_core::index::{IndexEntry, VectorIndex};
use essay_rag_core::models::{Document, DocumentMetadata, ScoredDocument};

use crate::config::{env_secret, IndexConfig};
use crate::http;

pub struct SupabaseIndex {
    rpc_url: String,
    api_key: String,
    client: reqwest::Client,
}

impl SupabaseIndex {
    pub fn new(config: &IndexConfig) -> Result<Self> {
        let base = config
            .url
            .as_deref()
            .ok_or_else(|| anyhow::anyhow!("index.url required for supabase provider"))?
            .trim_end_matches('/');
        Ok(Self {
            rpc_url: format!("{}/rest/v1/rpc/{}", base, config.query_name),
            api_key: env_secret(&config.key_env)?,
            client: http::client(config.timeout_secs)?,
        })
    }
}

#[derive(Debug, Deserialize)]
struct MatchRow {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    metadata: Option<DocumentMetadata>,
    similarity: f64,
}

#[async_trait]
impl VectorIndex for SupabaseIndex {
    fn name(&self) -> &str {
        "supabase"
    }

    async fn search(&self, query_vec: &[f32], limit: usize) -> Result<Vec<ScoredDocument>> {
        let body = serde_json::json!({
            "query_embedding": query_vec,
            "match_count": limit,
            "filter": {},
        });

        let response = self
            .client
            .post(&self.rpc_url)
            .header("apikey", &self.api_key)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .context("Supabase connection error")?;

        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            bail!("Supabase RPC error {}: {}", status, body_text);
        }

        let text = response.text().await?;
        parse_matches(&text)
    }

    async fn add(&self, _entries: &[IndexEntry]) -> Result<usize> {
        bail!("The supabase index is search-only; ingest with provider = \"pgvector\"")
    }
}

fn parse_matches(body: &str) -> Result<Vec<ScoredDocument>> {
    let rows: Vec<MatchRow> =
        serde_json::from_str(body).context("Invalid Supabase RPC response")?;
    Ok(rows
        .into_iter()
        .map(|row| ScoredDocument {
            document: Document {
                content: row.content.unwrap_or_default(),
                metadata: row.metadata.unwrap_or_default(),
            },
            score: row.similarity,
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_matches() {
        let body = r#"[
            {"id": "1", "content": "Startups are...", "metadata": {"title": "Startup = Growth", "source": "http://paulgraham.com/growth.html"}, "similarity": 0.82},
            {"id": "2", "content": null, "metadata": null, "similarity": 0.4}
        ]"#;
        let docs = parse_matches(body).unwrap();
        assert_eq!(docs.len(), 2);
        assert_eq!(docs[0].document.metadata.title, "Startup = Growth");
        assert_eq!(
            docs[0].document.source().url,
            "http://paulgraham.com/growth.html"
        );
        assert_eq!(docs[1].document.content, "");
        assert!((docs[0].score - 0.82).abs() < 1e-9);
    }

    #[test]
    fn test_parse_error_body() {
        assert!(parse_matches(r#"{"message": "function not found"}"#).is_err());
    }

    #[test]
    fn test_new_builds_rpc_url() {
        std::env::set_var("ESSAY_RAG_TEST_SUPABASE_KEY", "anon");
        let config = IndexConfig {
            provider: "supabase".into(),
            url_env: "DATABASE_URL".into(),
            url: Some("https://abc.supabase.co/".into()),
            key_env: "ESSAY_RAG_TEST_SUPABASE_KEY".into(),
            table: "langchain_pg_embedding".into(),
            collection: "essays".into(),
            query_name: "match_essays".into(),
            timeout_secs: 10,
        };
        let index = SupabaseIndex::new(&config).unwrap();
        assert_eq!(index.rpc_url, "https://abc.supabase.co/rest/v1/rpc/match_essays");
    }
}
