//! PostgreSQL + pgvector backend.
//!
//! Reads and writes the LangChain PGVector layout created by
//! [`crate::migrate`]: one row per passage in the embedding table, scoped
//! to a named collection. Vectors are bound as text literals and cast with
//! `::vector`, and similarity is `1 - cosine distance`.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, Row, Transaction};
use std::collections::HashSet;
use tracing::debug;

use essay_rag_core::index::{IndexEntry, VectorIndex};
use essay_rag_core::models::{Document, DocumentMetadata, ScoredDocument};

use crate::config::IndexConfig;
use crate::db::vector_literal;
use crate::ingest::ProcessedLog;
use crate::migrate::ensure_collection;

pub struct PgVectorIndex {
    pool: PgPool,
    table: String,
    collection: String,
}

impl PgVectorIndex {
    pub fn new(pool: PgPool, config: &IndexConfig) -> Self {
        Self {
            pool,
            table: config.table.clone(),
            collection: config.collection.clone(),
        }
    }

    /// The ledger of processed URLs sharing this index's pool.
    pub fn ledger(&self) -> IngestLedger {
        IngestLedger {
            pool: self.pool.clone(),
        }
    }
}

#[async_trait]
impl VectorIndex for PgVectorIndex {
    fn name(&self) -> &str {
        "pgvector"
    }

    async fn search(&self, query_vec: &[f32], limit: usize) -> Result<Vec<ScoredDocument>> {
        let sql = format!(
            r#"
            SELECT e.document, e.cmetadata,
                   (1 - (e.embedding <=> $1::vector))::FLOAT8 AS score
            FROM {} e
            JOIN langchain_pg_collection c ON e.collection_id = c.uuid
            WHERE c.name = $2
            ORDER BY e.embedding <=> $1::vector
            LIMIT $3
            "#,
            self.table
        );

        let rows = sqlx::query(&sql)
            .bind(vector_literal(query_vec))
            .bind(&self.collection)
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await?;

        rows.iter()
            .map(|row| -> Result<ScoredDocument> {
                let content: Option<String> = row.try_get("document")?;
                let metadata: Option<serde_json::Value> = row.try_get("cmetadata")?;
                let score: f64 = row.try_get("score")?;
                Ok(ScoredDocument {
                    document: Document {
                        content: content.unwrap_or_default(),
                        metadata: parse_metadata(metadata)?,
                    },
                    score,
                })
            })
            .collect()
    }

    async fn add(&self, entries: &[IndexEntry]) -> Result<usize> {
        if entries.is_empty() {
            return Ok(0);
        }
        ensure_collection(&self.pool, &self.collection).await?;

        let mut tx = self.pool.begin().await?;
        self.upsert(&mut tx, entries).await?;
        tx.commit().await?;
        Ok(entries.len())
    }

    async fn replace_source(&self, source_url: &str, entries: &[IndexEntry]) -> Result<usize> {
        ensure_collection(&self.pool, &self.collection).await?;

        let keep: Vec<String> = entries.iter().map(|e| e.id.clone()).collect();
        let mut tx = self.pool.begin().await?;
        let removed = sqlx::query(&delete_stale_sql(&self.table))
            .bind(&self.collection)
            .bind(source_url)
            .bind(&keep)
            .execute(&mut *tx)
            .await
            .with_context(|| format!("Failed to remove old passages of {}", source_url))?
            .rows_affected();
        self.upsert(&mut tx, entries).await?;
        tx.commit().await?;

        if removed > 0 {
            debug!(source = source_url, removed, "dropped stale passages");
        }
        Ok(entries.len())
    }
}

impl PgVectorIndex {
    async fn upsert(&self, tx: &mut Transaction<'_, Postgres>, entries: &[IndexEntry]) -> Result<()> {
        let sql = upsert_sql(&self.table);
        for entry in entries {
            let metadata = serde_json::to_value(&entry.document.metadata)?;
            sqlx::query(&sql)
                .bind(&entry.id)
                .bind(&self.collection)
                .bind(vector_literal(&entry.vector))
                .bind(&entry.document.content)
                .bind(metadata)
                .execute(&mut **tx)
                .await
                .with_context(|| format!("Failed to upsert passage {}", entry.id))?;
        }
        Ok(())
    }
}

fn upsert_sql(table: &str) -> String {
    format!(
        r#"
        INSERT INTO {} (id, collection_id, embedding, document, cmetadata)
        VALUES ($1, (SELECT uuid FROM langchain_pg_collection WHERE name = $2), $3::vector, $4, $5)
        ON CONFLICT (id) DO UPDATE SET
            collection_id = EXCLUDED.collection_id,
            embedding = EXCLUDED.embedding,
            document = EXCLUDED.document,
            cmetadata = EXCLUDED.cmetadata
        "#,
        table
    )
}

/// Rows of one source (`$2`) in one collection (`$1`) whose id is not in `$3`.
fn delete_stale_sql(table: &str) -> String {
    format!(
        r#"
        DELETE FROM {}
        WHERE collection_id = (SELECT uuid FROM langchain_pg_collection WHERE name = $1)
          AND cmetadata->>'source' = $2
          AND NOT (id = ANY($3))
        "#,
        table
    )
}

fn parse_metadata(value: Option<serde_json::Value>) -> Result<DocumentMetadata> {
    match value {
        None | Some(serde_json::Value::Null) => Ok(DocumentMetadata::default()),
        Some(v) => serde_json::from_value(v).context("Invalid passage metadata"),
    }
}

/// Record of essay URLs that were fully ingested, so reruns skip them.
#[derive(Clone)]
pub struct IngestLedger {
    pool: PgPool,
}

#[async_trait]
impl ProcessedLog for IngestLedger {
    async fn processed_urls(&self) -> Result<HashSet<String>> {
        let urls: Vec<String> = sqlx::query_scalar("SELECT url FROM processed_urls")
            .fetch_all(&self.pool)
            .await?;
        Ok(urls.into_iter().collect())
    }

    async fn mark_processed(&self, url: &str, at: DateTime<Utc>) -> Result<()> {
        sqlx::query(
            "INSERT INTO processed_urls (url, processed_at) VALUES ($1, $2)
             ON CONFLICT (url) DO UPDATE SET processed_at = EXCLUDED.processed_at",
        )
        .bind(url)
        .bind(at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn clear(&self) -> Result<u64> {
        let result = sqlx::query("DELETE FROM processed_urls")
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_statements_target_configured_table() {
        let upsert = upsert_sql("essay_chunks");
        assert!(upsert.contains("INSERT INTO essay_chunks"));
        assert!(upsert.contains("ON CONFLICT (id) DO UPDATE"));

        let delete = delete_stale_sql("essay_chunks");
        assert!(delete.contains("DELETE FROM essay_chunks"));
        assert!(delete.contains("cmetadata->>'source' = $2"));
        assert!(delete.contains("NOT (id = ANY($3))"));
    }
    use serde_json::json;

    #[test]
    fn test_parse_langchain_metadata() {
        let meta = parse_metadata(Some(json!({
            "title": "Do Things that Don't Scale",
            "source": "http://paulgraham.com/ds.html",
            "chunk_index": 4
        })))
        .unwrap();
        assert_eq!(meta.title, "Do Things that Don't Scale");
        assert_eq!(meta.source_url, "http://paulgraham.com/ds.html");
        assert_eq!(meta.extra["chunk_index"], 4);
    }

    #[test]
    fn test_parse_missing_metadata() {
        assert_eq!(parse_metadata(None).unwrap(), DocumentMetadata::default());
        assert_eq!(
            parse_metadata(Some(serde_json::Value::Null)).unwrap(),
            DocumentMetadata::default()
        );
        assert!(parse_metadata(Some(json!("not an object"))).is_err());
    }
}
