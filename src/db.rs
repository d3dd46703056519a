use anyhow::{Context, Result};
use sqlx::postgres::{PgPool, PgPoolOptions};
use std::time::Duration;

use crate::config::{env_secret, IndexConfig};

/// Open a PostgreSQL pool using the connection string in `index.url_env`.
pub async fn connect(config: &IndexConfig) -> Result<PgPool> {
    let url = env_secret(&config.url_env)?;

    let pool = PgPoolOptions::new()
        .max_connections(5)
        .acquire_timeout(Duration::from_secs(config.timeout_secs))
        .connect(&url)
        .await
        .with_context(|| format!("Failed to connect to PostgreSQL (from {})", config.url_env))?;

    Ok(pool)
}

/// Render a vector as a pgvector text literal (`[0.1,0.2,...]`), to be
/// bound as text and cast with `::vector`.
pub fn vector_literal(v: &[f32]) -> String {
    let mut out = String::with_capacity(v.len() * 10 + 2);
    out.push('[');
    for (i, x) in v.iter().enumerate() {
        if i > 0 {
            out.push(',');
        }
        out.push_str(&x.to_string());
    }
    out.push(']');
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vector_literal() {
        assert_eq!(vector_literal(&[0.5, -1.0, 2.25]), "[0.5,-1,2.25]");
        assert_eq!(vector_literal(&[]), "[]");
    }
}
