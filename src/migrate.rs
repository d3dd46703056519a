//! Schema setup for the pgvector backend (`essay-rag init`).
//!
//! Creates, idempotently:
//! - the `vector` extension
//! - `langchain_pg_collection` and the embedding table, in the layout
//!   LangChain's PGVector store uses, so existing corpora can be queried
//! - `processed_urls`, the ingestion ledger
//! - the similarity-search SQL function named by `index.query_name`,
//!   callable over Supabase RPC as well as directly

use anyhow::Result;
use sqlx::PgPool;
use tracing::info;

use crate::config::Config;
use crate::db;

pub async fn run_migrations(config: &Config) -> Result<()> {
    let pool = db::connect(&config.index).await?;
    let dims = config
        .embedding
        .dims
        .ok_or_else(|| anyhow::anyhow!("embedding.dims required to create the index table"))?;

    let statements = schema_statements(
        &config.index.table,
        &config.index.query_name,
        &config.index.collection,
        dims,
    );
    for statement in statements {
        sqlx::query(&statement).execute(&pool).await?;
    }
    ensure_collection(&pool, &config.index.collection).await?;

    info!(
        table = %config.index.table,
        collection = %config.index.collection,
        function = %config.index.query_name,
        dims,
        "schema ready"
    );
    Ok(())
}

/// Insert the named collection if it does not exist yet.
pub async fn ensure_collection(pool: &PgPool, name: &str) -> Result<()> {
    sqlx::query(
        "INSERT INTO langchain_pg_collection (name, cmetadata) VALUES ($1, '{}'::json)
         ON CONFLICT (name) DO NOTHING",
    )
    .bind(name)
    .execute(pool)
    .await?;
    Ok(())
}

/// DDL for the whole schema. `table` and `function` must already be
/// validated identifiers.
fn schema_statements(table: &str, function: &str, collection: &str, dims: usize) -> Vec<String> {
    let collection = collection.replace('\'', "''");
    vec![
        "CREATE EXTENSION IF NOT EXISTS vector".to_string(),
        r#"
        CREATE TABLE IF NOT EXISTS langchain_pg_collection (
            uuid UUID PRIMARY KEY DEFAULT gen_random_uuid(),
            name VARCHAR NOT NULL UNIQUE,
            cmetadata JSON
        )
        "#
        .to_string(),
        format!(
            r#"
            CREATE TABLE IF NOT EXISTS {table} (
                id VARCHAR PRIMARY KEY,
                collection_id UUID REFERENCES langchain_pg_collection(uuid) ON DELETE CASCADE,
                embedding vector({dims}),
                document VARCHAR,
                cmetadata JSONB
            )
            "#
        ),
        format!(
            "CREATE INDEX IF NOT EXISTS ix_{table}_cmetadata_gin ON {table} USING gin (cmetadata jsonb_path_ops)"
        ),
        r#"
        CREATE TABLE IF NOT EXISTS processed_urls (
            url TEXT PRIMARY KEY,
            processed_at TIMESTAMPTZ NOT NULL DEFAULT now()
        )
        "#
        .to_string(),
        format!(
            r#"
            CREATE OR REPLACE FUNCTION {function}(
                query_embedding vector({dims}),
                match_count INT DEFAULT 3,
                filter JSONB DEFAULT '{{}}',
                collection_name TEXT DEFAULT '{collection}'
            )
            RETURNS TABLE (id VARCHAR, content VARCHAR, metadata JSONB, similarity FLOAT8)
            LANGUAGE plpgsql
            AS $$
            BEGIN
                RETURN QUERY
                SELECT e.id, e.document, e.cmetadata,
                       (1 - (e.embedding <=> query_embedding))::FLOAT8 AS similarity
                FROM {table} e
                JOIN langchain_pg_collection c ON e.collection_id = c.uuid
                WHERE c.name = collection_name
                  AND e.cmetadata @> filter
                ORDER BY e.embedding <=> query_embedding
                LIMIT match_count;
            END;
            $$
            "#
        ),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schema_uses_configured_names() {
        let ddl = schema_statements("essay_chunks", "match_essays", "pg_articles", 3072);
        let joined = ddl.join("\n");
        assert!(joined.contains("CREATE TABLE IF NOT EXISTS essay_chunks"));
        assert!(joined.contains("embedding vector(3072)"));
        assert!(joined.contains("FUNCTION match_essays("));
        assert!(joined.contains("DEFAULT 'pg_articles'"));
        assert!(joined.contains("filter JSONB DEFAULT '{}'"));
        assert!(joined.contains("processed_urls"));
    }

    #[test]
    fn test_collection_literal_is_escaped() {
        let ddl = schema_statements("t", "f", "paul's essays", 8);
        assert!(ddl.join("\n").contains("DEFAULT 'paul''s essays'"));
    }
}
